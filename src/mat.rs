//! Library-side matrix representation.
//!
//! A [`Mat`] is a dense, row-major, channel-interleaved 2-D array. Element
//! types follow the usual `<bits><signedness>C<channels>` naming, so a
//! single-channel byte matrix is `8UC1` and a packed colour matrix is `8UC3`.

use crate::error::ConversionError;
use std::fmt;

/// Per-channel sample depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Depth {
    /// Unsigned 8-bit.
    U8,
    /// Signed 8-bit.
    S8,
    /// Unsigned 16-bit.
    U16,
    /// Signed 16-bit.
    S16,
    /// Signed 32-bit.
    S32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
}

impl Depth {
    /// Size of one sample in bytes.
    pub fn size(&self) -> usize {
        match self {
            Depth::U8 | Depth::S8 => 1,
            Depth::U16 | Depth::S16 => 2,
            Depth::S32 | Depth::F32 => 4,
            Depth::F64 => 8,
        }
    }

    fn tag(&self) -> &'static str {
        match self {
            Depth::U8 => "8U",
            Depth::S8 => "8S",
            Depth::U16 => "16U",
            Depth::S16 => "16S",
            Depth::S32 => "32S",
            Depth::F32 => "32F",
            Depth::F64 => "64F",
        }
    }
}

/// Matrix element type: depth plus channel count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ElemType {
    /// Sample depth.
    pub depth: Depth,
    /// Channels per element (1..=4).
    pub channels: u8,
}

impl ElemType {
    /// Single-channel unsigned bytes.
    pub const U8C1: ElemType = ElemType::new(Depth::U8, 1);
    /// Three-channel unsigned bytes (B, G, R order).
    pub const U8C3: ElemType = ElemType::new(Depth::U8, 3);
    /// Single-channel unsigned 16-bit.
    pub const U16C1: ElemType = ElemType::new(Depth::U16, 1);
    /// Single-channel signed 32-bit.
    pub const S32C1: ElemType = ElemType::new(Depth::S32, 1);
    /// Single-channel 32-bit float.
    pub const F32C1: ElemType = ElemType::new(Depth::F32, 1);
    /// Single-channel 64-bit float.
    pub const F64C1: ElemType = ElemType::new(Depth::F64, 1);

    /// Create an element type.
    pub const fn new(depth: Depth, channels: u8) -> Self {
        Self { depth, channels }
    }
}

impl fmt::Display for ElemType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}C{}", self.depth.tag(), self.channels)
    }
}

/// Typed sample storage.
#[derive(Debug, Clone, PartialEq)]
pub enum MatData {
    /// Unsigned bytes.
    U8(Vec<u8>),
    /// Signed bytes.
    S8(Vec<i8>),
    /// Unsigned 16-bit.
    U16(Vec<u16>),
    /// Signed 16-bit.
    S16(Vec<i16>),
    /// Signed 32-bit.
    S32(Vec<i32>),
    /// 32-bit float.
    F32(Vec<f32>),
    /// 64-bit float.
    F64(Vec<f64>),
}

impl MatData {
    fn zeros(depth: Depth, len: usize) -> Self {
        match depth {
            Depth::U8 => MatData::U8(vec![0; len]),
            Depth::S8 => MatData::S8(vec![0; len]),
            Depth::U16 => MatData::U16(vec![0; len]),
            Depth::S16 => MatData::S16(vec![0; len]),
            Depth::S32 => MatData::S32(vec![0; len]),
            Depth::F32 => MatData::F32(vec![0.0; len]),
            Depth::F64 => MatData::F64(vec![0.0; len]),
        }
    }

    fn depth(&self) -> Depth {
        match self {
            MatData::U8(_) => Depth::U8,
            MatData::S8(_) => Depth::S8,
            MatData::U16(_) => Depth::U16,
            MatData::S16(_) => Depth::S16,
            MatData::S32(_) => Depth::S32,
            MatData::F32(_) => Depth::F32,
            MatData::F64(_) => Depth::F64,
        }
    }

    fn len(&self) -> usize {
        match self {
            MatData::U8(v) => v.len(),
            MatData::S8(v) => v.len(),
            MatData::U16(v) => v.len(),
            MatData::S16(v) => v.len(),
            MatData::S32(v) => v.len(),
            MatData::F32(v) => v.len(),
            MatData::F64(v) => v.len(),
        }
    }

    fn get(&self, i: usize) -> Option<f64> {
        Some(match self {
            MatData::U8(v) => f64::from(*v.get(i)?),
            MatData::S8(v) => f64::from(*v.get(i)?),
            MatData::U16(v) => f64::from(*v.get(i)?),
            MatData::S16(v) => f64::from(*v.get(i)?),
            MatData::S32(v) => f64::from(*v.get(i)?),
            MatData::F32(v) => f64::from(*v.get(i)?),
            MatData::F64(v) => *v.get(i)?,
        })
    }

    // Saturating store, the way the library's own setters behave.
    fn set(&mut self, i: usize, value: f64) -> bool {
        let stored = match self {
            MatData::U8(v) => v.get_mut(i).map(|s| *s = value.round().clamp(0.0, 255.0) as u8),
            MatData::S8(v) => v.get_mut(i).map(|s| *s = value.round().clamp(-128.0, 127.0) as i8),
            MatData::U16(v) => v.get_mut(i).map(|s| *s = value.round().clamp(0.0, 65535.0) as u16),
            MatData::S16(v) => v
                .get_mut(i)
                .map(|s| *s = value.round().clamp(-32768.0, 32767.0) as i16),
            MatData::S32(v) => v.get_mut(i).map(|s| *s = value.round() as i32),
            MatData::F32(v) => v.get_mut(i).map(|s| *s = value as f32),
            MatData::F64(v) => v.get_mut(i).map(|s| *s = value),
        };
        stored.is_some()
    }
}

/// A dense 2-D matrix.
#[derive(Debug, Clone, PartialEq)]
pub struct Mat {
    rows: usize,
    cols: usize,
    channels: u8,
    data: MatData,
}

impl Mat {
    /// Create a zero-filled matrix.
    pub fn zeros(rows: usize, cols: usize, elem_type: ElemType) -> Self {
        let channels = elem_type.channels.max(1);
        Self {
            rows,
            cols,
            channels,
            data: MatData::zeros(elem_type.depth, rows * cols * channels as usize),
        }
    }

    /// Wrap existing samples. The length must equal `rows * cols * channels`.
    pub fn from_data(
        rows: usize,
        cols: usize,
        channels: u8,
        data: MatData,
    ) -> Result<Self, ConversionError> {
        let expected = rows * cols * channels as usize;
        if channels == 0 || data.len() != expected {
            return Err(ConversionError::DataLength {
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            rows,
            cols,
            channels,
            data,
        })
    }

    /// Number of rows.
    pub fn rows(&self) -> usize {
        self.rows
    }

    /// Number of columns.
    pub fn cols(&self) -> usize {
        self.cols
    }

    /// Channels per element.
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Element type.
    pub fn elem_type(&self) -> ElemType {
        ElemType::new(self.data.depth(), self.channels)
    }

    /// Returns true if the matrix has no elements.
    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    /// Typed sample storage.
    pub fn data(&self) -> &MatData {
        &self.data
    }

    fn index(&self, row: usize, col: usize, channel: usize) -> Option<usize> {
        (row < self.rows && col < self.cols && channel < self.channels as usize)
            .then(|| (row * self.cols + col) * self.channels as usize + channel)
    }

    /// Read one sample, widened to `f64`.
    pub fn at(&self, row: usize, col: usize, channel: usize) -> Option<f64> {
        self.data.get(self.index(row, col, channel)?)
    }

    /// Write one sample, saturating to the matrix depth.
    ///
    /// Returns false if the position is out of range.
    pub fn set(&mut self, row: usize, col: usize, channel: usize, value: f64) -> bool {
        match self.index(row, col, channel) {
            Some(i) => self.data.set(i, value),
            None => false,
        }
    }

    /// Apply `f` to every sample in place.
    pub fn map_in_place(&mut self, mut f: impl FnMut(f64) -> f64) {
        for i in 0..self.data.len() {
            if let Some(v) = self.data.get(i) {
                self.data.set(i, f(v));
            }
        }
    }
}
