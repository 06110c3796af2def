//! Host-side pixel buffers and regions of interest.

use crate::error::ConversionError;

/// Host buffer bit depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BitDepth {
    /// 8-bit grayscale.
    Gray8,
    /// 16-bit grayscale.
    Gray16,
    /// 24-bit colour, packed `0x00RRGGBB` per pixel.
    Rgb24,
    /// 32-bit float grayscale.
    Float32,
}

impl BitDepth {
    /// Bits per pixel.
    pub fn bits(&self) -> u32 {
        match self {
            BitDepth::Gray8 => 8,
            BitDepth::Gray16 => 16,
            BitDepth::Rgb24 => 24,
            BitDepth::Float32 => 32,
        }
    }

    /// Look up a depth by bits per pixel.
    pub fn from_bits(bits: u32) -> Result<Self, ConversionError> {
        match bits {
            8 => Ok(BitDepth::Gray8),
            16 => Ok(BitDepth::Gray16),
            24 => Ok(BitDepth::Rgb24),
            32 => Ok(BitDepth::Float32),
            other => Err(ConversionError::UnsupportedBitDepth(other)),
        }
    }
}

/// Pixel storage, row-major, one entry per pixel.
#[derive(Debug, Clone, PartialEq)]
pub enum Pixels {
    /// 8-bit grayscale.
    Gray8(Vec<u8>),
    /// 16-bit grayscale.
    Gray16(Vec<u16>),
    /// Packed `0x00RRGGBB`.
    Rgb24(Vec<u32>),
    /// 32-bit float.
    Float32(Vec<f32>),
}

impl Pixels {
    fn len(&self) -> usize {
        match self {
            Pixels::Gray8(p) => p.len(),
            Pixels::Gray16(p) => p.len(),
            Pixels::Rgb24(p) => p.len(),
            Pixels::Float32(p) => p.len(),
        }
    }

    fn depth(&self) -> BitDepth {
        match self {
            Pixels::Gray8(_) => BitDepth::Gray8,
            Pixels::Gray16(_) => BitDepth::Gray16,
            Pixels::Rgb24(_) => BitDepth::Rgb24,
            Pixels::Float32(_) => BitDepth::Float32,
        }
    }
}

/// A 2-D host pixel buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageBuffer {
    width: u32,
    height: u32,
    pixels: Pixels,
}

impl ImageBuffer {
    /// Create a zero-filled buffer.
    pub fn new(width: u32, height: u32, depth: BitDepth) -> Self {
        let len = width as usize * height as usize;
        let pixels = match depth {
            BitDepth::Gray8 => Pixels::Gray8(vec![0; len]),
            BitDepth::Gray16 => Pixels::Gray16(vec![0; len]),
            BitDepth::Rgb24 => Pixels::Rgb24(vec![0; len]),
            BitDepth::Float32 => Pixels::Float32(vec![0.0; len]),
        };
        Self {
            width,
            height,
            pixels,
        }
    }

    /// Wrap existing pixels; the length must equal `width * height`.
    pub fn from_pixels(width: u32, height: u32, pixels: Pixels) -> Result<Self, ConversionError> {
        let expected = width as usize * height as usize;
        if pixels.len() != expected {
            return Err(ConversionError::DataLength {
                expected,
                actual: pixels.len(),
            });
        }
        Ok(Self {
            width,
            height,
            pixels,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Bit depth.
    pub fn depth(&self) -> BitDepth {
        self.pixels.depth()
    }

    /// Pixel storage.
    pub fn pixels(&self) -> &Pixels {
        &self.pixels
    }

    /// Mutable pixel storage. The variant and length must be preserved.
    pub(crate) fn pixels_mut(&mut self) -> &mut Pixels {
        &mut self.pixels
    }

    /// Row-major index of (x, y), if inside the buffer.
    pub fn index(&self, x: u32, y: u32) -> Option<usize> {
        (x < self.width && y < self.height).then(|| y as usize * self.width as usize + x as usize)
    }

    /// Read a pixel as `f64` (packed value for 24-bit buffers).
    pub fn get(&self, x: u32, y: u32) -> Option<f64> {
        let i = self.index(x, y)?;
        Some(match &self.pixels {
            Pixels::Gray8(p) => f64::from(p[i]),
            Pixels::Gray16(p) => f64::from(p[i]),
            Pixels::Rgb24(p) => f64::from(p[i]),
            Pixels::Float32(p) => f64::from(p[i]),
        })
    }

    /// Write a pixel, saturating to the buffer depth (packed value for 24-bit).
    pub fn set(&mut self, x: u32, y: u32, value: f64) -> bool {
        let Some(i) = self.index(x, y) else {
            return false;
        };
        match &mut self.pixels {
            Pixels::Gray8(p) => p[i] = value.clamp(0.0, 255.0) as u8,
            Pixels::Gray16(p) => p[i] = value.clamp(0.0, 65535.0) as u16,
            Pixels::Rgb24(p) => p[i] = (value as u32) & 0x00FF_FFFF,
            Pixels::Float32(p) => p[i] = value as f32,
        }
        true
    }
}

/// Rectangular region of interest attached to a host image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Roi {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: u32,
    /// Height.
    pub height: u32,
}

impl Roi {
    /// Create a region.
    pub const fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Region covering a whole buffer.
    pub fn full(buffer: &ImageBuffer) -> Self {
        Self::new(0, 0, buffer.width(), buffer.height())
    }

    /// Intersect with a `width` x `height` buffer. `None` if nothing remains.
    pub fn clip(&self, width: u32, height: u32) -> Option<Roi> {
        let x0 = i64::from(self.x).max(0);
        let y0 = i64::from(self.y).max(0);
        let x1 = (i64::from(self.x) + i64::from(self.width)).min(i64::from(width));
        let y1 = (i64::from(self.y) + i64::from(self.height)).min(i64::from(height));
        if x1 <= x0 || y1 <= y0 {
            return None;
        }
        Some(Roi::new(x0 as i32, y0 as i32, (x1 - x0) as u32, (y1 - y0) as u32))
    }

    /// Top-left corner.
    pub fn offset(&self) -> (i32, i32) {
        (self.x, self.y)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bit_depth_lookup() {
        assert_eq!(BitDepth::from_bits(24).unwrap(), BitDepth::Rgb24);
        assert_eq!(BitDepth::Float32.bits(), 32);
        assert_eq!(
            BitDepth::from_bits(12),
            Err(ConversionError::UnsupportedBitDepth(12))
        );
    }

    #[test]
    fn test_from_pixels_checks_length() {
        assert!(ImageBuffer::from_pixels(2, 2, Pixels::Gray8(vec![0; 4])).is_ok());
        assert!(ImageBuffer::from_pixels(2, 2, Pixels::Gray8(vec![0; 5])).is_err());
    }

    #[test]
    fn test_get_set() {
        let mut buf = ImageBuffer::new(3, 2, BitDepth::Gray16);
        assert!(buf.set(2, 1, 70000.0));
        assert_eq!(buf.get(2, 1), Some(65535.0));
        assert!(!buf.set(3, 0, 1.0));
        assert_eq!(buf.get(0, 2), None);
    }

    #[test]
    fn test_roi_clip() {
        let roi = Roi::new(-2, 1, 5, 10);
        assert_eq!(roi.clip(4, 4), Some(Roi::new(0, 1, 3, 3)));
        assert_eq!(Roi::new(5, 5, 2, 2).clip(4, 4), None);
        assert_eq!(Roi::new(0, 0, 0, 3).clip(4, 4), None);
    }
}
