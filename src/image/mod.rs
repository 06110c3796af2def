//! Host image model: pixel buffers, regions of interest and the registry of
//! open images that invocations lock.

mod buffer;
mod registry;

pub use buffer::{BitDepth, ImageBuffer, Pixels, Roi};
pub use registry::{AllImagesLock, HostImage, ImageRegistry};
