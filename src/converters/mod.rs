//! Pixel/matrix converters.
//!
//! Pure, stateless functions that move pixels between host buffers and
//! library matrices, honouring regions of interest in both directions.

mod matrix;

pub use matrix::{
    bit_depth_for, check_write_back, create_compatible_image, create_compatible_mat, effective_roi, elem_type_for,
    image_to_mat, mat_to_image, rect_to_roi, roi_to_rect, write_back,
};
