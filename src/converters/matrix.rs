//! Host buffer ⇄ library matrix conversion.
//!
//! | Host depth | Matrix type | Notes |
//! |------------|-------------|-------|
//! | 8-bit      | `8UC1`      | copied as-is |
//! | 16-bit     | `16UC1`     | copied as-is |
//! | 24-bit RGB | `8UC3`      | per pixel, R,G,B ⇄ B,G,R |
//! | 32-bit     | `32FC1`     | copied as-is |
//!
//! Everything else is a [`ConversionError`].

use crate::error::ConversionError;
use crate::image::{BitDepth, ImageBuffer, Pixels, Roi};
use crate::mat::{ElemType, Mat, MatData};
use crate::value::Rect;

/// Matrix element type matching a host bit depth.
pub fn elem_type_for(depth: BitDepth) -> ElemType {
    match depth {
        BitDepth::Gray8 => ElemType::U8C1,
        BitDepth::Gray16 => ElemType::U16C1,
        BitDepth::Rgb24 => ElemType::U8C3,
        BitDepth::Float32 => ElemType::F32C1,
    }
}

/// Host bit depth matching a matrix element type.
pub fn bit_depth_for(elem_type: ElemType) -> Result<BitDepth, ConversionError> {
    match elem_type {
        ElemType::U8C1 => Ok(BitDepth::Gray8),
        ElemType::U16C1 => Ok(BitDepth::Gray16),
        ElemType::U8C3 => Ok(BitDepth::Rgb24),
        ElemType::F32C1 => Ok(BitDepth::Float32),
        other => Err(ConversionError::UnsupportedMatType(other.to_string())),
    }
}

/// The part of `buffer` a conversion covers: the ROI clipped to the buffer,
/// or the whole buffer when there is no ROI.
pub fn effective_roi(buffer: &ImageBuffer, roi: Option<Roi>) -> Result<Roi, ConversionError> {
    let Some(roi) = roi else {
        return Ok(Roi::full(buffer));
    };
    roi.clip(buffer.width(), buffer.height())
        .ok_or(ConversionError::EmptyRegion {
            x: roi.x,
            y: roi.y,
            width: roi.width,
            height: roi.height,
        })
}

/// Zero matrix with the size and element type of `buffer`.
pub fn create_compatible_mat(buffer: &ImageBuffer) -> Mat {
    Mat::zeros(
        buffer.height() as usize,
        buffer.width() as usize,
        elem_type_for(buffer.depth()),
    )
}

/// Zero host buffer with the size and depth of `mat`.
pub fn create_compatible_image(mat: &Mat) -> Result<ImageBuffer, ConversionError> {
    let depth = bit_depth_for(mat.elem_type())?;
    Ok(ImageBuffer::new(mat.cols() as u32, mat.rows() as u32, depth))
}

fn crop<T: Copy>(src: &[T], stride: usize, region: Roi) -> Vec<T> {
    let (x0, y0) = (region.x as usize, region.y as usize);
    let (w, h) = (region.width as usize, region.height as usize);
    let mut out = Vec::with_capacity(w * h);
    for y in y0..y0 + h {
        let start = y * stride + x0;
        out.extend_from_slice(&src[start..start + w]);
    }
    out
}

/// Convert a host buffer (or its ROI) into a new matrix.
pub fn image_to_mat(buffer: &ImageBuffer, roi: Option<Roi>) -> Result<Mat, ConversionError> {
    let region = effective_roi(buffer, roi)?;
    let stride = buffer.width() as usize;
    let (rows, cols) = (region.height as usize, region.width as usize);

    let (channels, data) = match buffer.pixels() {
        Pixels::Gray8(p) => (1, MatData::U8(crop(p, stride, region))),
        Pixels::Gray16(p) => (1, MatData::U16(crop(p, stride, region))),
        Pixels::Float32(p) => (1, MatData::F32(crop(p, stride, region))),
        Pixels::Rgb24(p) => {
            let packed = crop(p, stride, region);
            let mut bgr = Vec::with_capacity(packed.len() * 3);
            for px in packed {
                bgr.extend_from_slice(&[
                    (px & 0xFF) as u8,
                    ((px >> 8) & 0xFF) as u8,
                    ((px >> 16) & 0xFF) as u8,
                ]);
            }
            (3, MatData::U8(bgr))
        }
    };
    Mat::from_data(rows, cols, channels, data)
}

/// Convert a matrix into a new host buffer of the same size.
pub fn mat_to_image(mat: &Mat) -> Result<ImageBuffer, ConversionError> {
    let mut buffer = create_compatible_image(mat)?;
    write_back(mat, &mut buffer, (0, 0))?;
    Ok(buffer)
}

// Source columns/rows of a `cols` x `rows` matrix that land inside a
// `width` x `height` buffer when placed at (ox, oy).
fn visible_span(len: usize, offset: i32, limit: u32) -> Option<(usize, usize)> {
    let start = (-i64::from(offset)).max(0);
    let end = (i64::from(limit) - i64::from(offset)).min(len as i64);
    (end > start).then_some((start as usize, end as usize))
}

fn paste<T: Copy>(
    src: &[T],
    cols: usize,
    dst: &mut [T],
    stride: usize,
    rows: (usize, usize),
    columns: (usize, usize),
    offset: (i32, i32),
) {
    let (c0, c1) = columns;
    for r in rows.0..rows.1 {
        let ty = (r as i64 + i64::from(offset.1)) as usize;
        let tx = (c0 as i64 + i64::from(offset.0)) as usize;
        let from = r * cols;
        dst[ty * stride + tx..ty * stride + tx + (c1 - c0)]
            .copy_from_slice(&src[from + c0..from + c1]);
    }
}

/// Check that [`write_back`] would accept `mat` for `buffer` without
/// touching any pixels.
pub fn check_write_back(mat: &Mat, buffer: &ImageBuffer) -> Result<(), ConversionError> {
    let expected = elem_type_for(buffer.depth());
    if mat.elem_type() != expected {
        return Err(ConversionError::TypeMismatch {
            expected: expected.to_string(),
            actual: mat.elem_type().to_string(),
        });
    }
    Ok(())
}

/// Write `mat` into `buffer` so that matrix (0, 0) lands at host (ox, oy).
///
/// Pixels outside the written rectangle are left alone and anything falling
/// outside the buffer is clipped. The matrix type must match the buffer.
pub fn write_back(
    mat: &Mat,
    buffer: &mut ImageBuffer,
    offset: (i32, i32),
) -> Result<(), ConversionError> {
    check_write_back(mat, buffer)?;

    let (Some(rows), Some(columns)) = (
        visible_span(mat.rows(), offset.1, buffer.height()),
        visible_span(mat.cols(), offset.0, buffer.width()),
    ) else {
        return Ok(());
    };
    let stride = buffer.width() as usize;
    let cols = mat.cols();

    match (mat.data(), buffer.pixels_mut()) {
        (MatData::U8(src), Pixels::Gray8(dst)) => paste(src, cols, dst, stride, rows, columns, offset),
        (MatData::U16(src), Pixels::Gray16(dst)) => {
            paste(src, cols, dst, stride, rows, columns, offset)
        }
        (MatData::F32(src), Pixels::Float32(dst)) => {
            paste(src, cols, dst, stride, rows, columns, offset)
        }
        (MatData::U8(src), Pixels::Rgb24(dst)) => {
            for r in rows.0..rows.1 {
                let ty = (r as i64 + i64::from(offset.1)) as usize;
                for c in columns.0..columns.1 {
                    let tx = (c as i64 + i64::from(offset.0)) as usize;
                    let s = (r * cols + c) * 3;
                    let (b, g, red) = (src[s] as u32, src[s + 1] as u32, src[s + 2] as u32);
                    dst[ty * stride + tx] = (red << 16) | (g << 8) | b;
                }
            }
        }
        _ => {
            return Err(ConversionError::TypeMismatch {
                expected: elem_type_for(buffer.depth()).to_string(),
                actual: mat.elem_type().to_string(),
            });
        }
    }
    Ok(())
}

/// Library rectangle for a host ROI.
pub fn roi_to_rect(roi: Roi) -> Rect {
    Rect::new(roi.x, roi.y, roi.width as i32, roi.height as i32)
}

/// Host ROI for a library rectangle; negative extents become empty.
pub fn rect_to_roi(rect: Rect) -> Roi {
    Roi::new(
        rect.x,
        rect.y,
        rect.width.max(0) as u32,
        rect.height.max(0) as u32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gray8(width: u32, height: u32) -> ImageBuffer {
        let pixels = (0..width * height).map(|i| i as u8).collect();
        ImageBuffer::from_pixels(width, height, Pixels::Gray8(pixels)).unwrap()
    }

    #[test]
    fn test_type_mapping() {
        assert_eq!(elem_type_for(BitDepth::Gray8), ElemType::U8C1);
        assert_eq!(elem_type_for(BitDepth::Gray16), ElemType::U16C1);
        assert_eq!(elem_type_for(BitDepth::Rgb24), ElemType::U8C3);
        assert_eq!(elem_type_for(BitDepth::Float32), ElemType::F32C1);
        assert_eq!(
            bit_depth_for(ElemType::S32C1),
            Err(ConversionError::UnsupportedMatType("32SC1".into()))
        );
    }

    #[test]
    fn test_gray_round_trip() {
        let buffer = gray8(4, 3);
        let mat = image_to_mat(&buffer, None).unwrap();
        assert_eq!(mat.rows(), 3);
        assert_eq!(mat.cols(), 4);
        assert_eq!(mat.at(1, 2, 0), Some(6.0));
        assert_eq!(mat_to_image(&mat).unwrap(), buffer);
    }

    #[test]
    fn test_float_and_short_round_trip() {
        let f = ImageBuffer::from_pixels(2, 1, Pixels::Float32(vec![-1.5, 3.25])).unwrap();
        assert_eq!(mat_to_image(&image_to_mat(&f, None).unwrap()).unwrap(), f);

        let s = ImageBuffer::from_pixels(2, 1, Pixels::Gray16(vec![0, 65535])).unwrap();
        assert_eq!(mat_to_image(&image_to_mat(&s, None).unwrap()).unwrap(), s);
    }

    #[test]
    fn test_rgb_reorders_channels() {
        let buffer = ImageBuffer::from_pixels(1, 1, Pixels::Rgb24(vec![0x11_22_33])).unwrap();
        let mat = image_to_mat(&buffer, None).unwrap();
        assert_eq!(mat.elem_type(), ElemType::U8C3);
        assert_eq!(mat.data(), &MatData::U8(vec![0x33, 0x22, 0x11]));
        assert_eq!(mat_to_image(&mat).unwrap(), buffer);
    }

    #[test]
    fn test_roi_extraction() {
        let buffer = gray8(4, 4);
        let mat = image_to_mat(&buffer, Some(Roi::new(1, 2, 2, 2))).unwrap();
        assert_eq!(mat.data(), &MatData::U8(vec![9, 10, 13, 14]));

        let err = image_to_mat(&buffer, Some(Roi::new(10, 10, 2, 2))).unwrap_err();
        assert!(matches!(err, ConversionError::EmptyRegion { .. }));
    }

    #[test]
    fn test_write_back_at_offset() {
        let mut buffer = ImageBuffer::new(4, 4, BitDepth::Gray8);
        let mat = Mat::from_data(2, 2, 1, MatData::U8(vec![1, 2, 3, 4])).unwrap();
        write_back(&mat, &mut buffer, (1, 2)).unwrap();

        assert_eq!(buffer.get(1, 2), Some(1.0));
        assert_eq!(buffer.get(2, 3), Some(4.0));
        assert_eq!(buffer.get(0, 0), Some(0.0));
        assert_eq!(buffer.get(3, 2), Some(0.0));
    }

    #[test]
    fn test_write_back_clips() {
        let mut buffer = ImageBuffer::new(3, 3, BitDepth::Gray8);
        let mat = Mat::from_data(2, 2, 1, MatData::U8(vec![1, 2, 3, 4])).unwrap();
        write_back(&mat, &mut buffer, (2, -1)).unwrap();
        assert_eq!(buffer.get(2, 0), Some(3.0));
        let written: usize = (0..3)
            .flat_map(|y| (0..3).map(move |x| (x, y)))
            .filter(|&(x, y)| buffer.get(x, y) != Some(0.0))
            .count();
        assert_eq!(written, 1);

        write_back(&mat, &mut buffer, (5, 5)).unwrap();
    }

    #[test]
    fn test_write_back_type_mismatch() {
        let mut buffer = ImageBuffer::new(2, 2, BitDepth::Gray16);
        let mat = Mat::zeros(2, 2, ElemType::U8C1);
        assert!(matches!(
            write_back(&mat, &mut buffer, (0, 0)),
            Err(ConversionError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn test_write_back_extreme_offsets() {
        let mut buffer = gray8(2, 2);
        let mat = Mat::zeros(2, 2, ElemType::U8C1);
        write_back(&mat, &mut buffer, (i32::MIN, i32::MIN)).unwrap();
        write_back(&mat, &mut buffer, (i32::MAX, 0)).unwrap();
        assert!(check_write_back(&mat, &buffer).is_ok());
    }

    #[test]
    fn test_rect_roi() {
        let roi = Roi::new(3, 4, 5, 6);
        assert_eq!(rect_to_roi(roi_to_rect(roi)), roi);
        assert_eq!(rect_to_roi(Rect::new(0, 0, -1, 2)).width, 0);
    }

    #[test]
    fn test_compatible_mat() {
        let mat = create_compatible_mat(&ImageBuffer::new(5, 2, BitDepth::Rgb24));
        assert_eq!((mat.rows(), mat.cols()), (2, 5));
        assert_eq!(mat.elem_type(), ElemType::U8C3);
    }
}
