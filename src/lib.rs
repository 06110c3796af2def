//! # matbind
//!
//! Run-time binding to versioned image-processing libraries.
//!
//! matbind loads a computation library selected at run time into its own
//! namespace, catalogs the operations and types it exposes under readable
//! signatures, and invokes them against host images, converting between the
//! host's pixel buffers and the library's matrices in both directions.
//!
//! ## Features
//!
//! - **Isolated namespaces**: two versions of a library never see each other
//! - **Catalog**: `Mat threshold(Mat, int)`-style signatures, extension
//!   shards merged incrementally, filterable tree projection
//! - **Marshaling**: ROI-aware host buffer ⇄ matrix conversion with
//!   offset write-back
//! - **Result store**: named results with change listeners
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use matbind::prelude::*;
//!
//! let forge = Forge::new(LibraryLayout::new("/opt/imgops/native"));
//! unsafe { forge.select_library("/opt/imgops/imgops-2.4.9.so")? };
//!
//! let image = forge.images().open("blobs", buffer);
//! forge.invoke("Mat threshold(Mat, int)", vec![image.into(), Value::Int(128).into()], "mask")?;
//! let mask = forge.store().get("mask")?;
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_op_in_unsafe_fn)]

pub mod catalog;
pub mod config;
pub mod converters;
pub mod error;
pub mod forge;
pub mod image;
pub mod inspect;
pub mod invoke;
pub mod loader;
pub mod mat;
pub mod observability;
pub mod store;
pub mod value;

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::catalog::{Catalog, CatalogTree};
    pub use crate::error::{Error, Result};
    pub use crate::forge::Forge;
    pub use crate::image::{BitDepth, HostImage, ImageBuffer, ImageRegistry, Roi};
    pub use crate::invoke::{Argument, Executor, InvocationOutcome};
    pub use crate::loader::{Archive, ConstructorDef, LibraryLayout, OperationDef, TypeDef};
    pub use crate::mat::{ElemType, Mat};
    pub use crate::store::{ResultStore, StoredValue};
    pub use crate::value::{Object, Rect, Value};
}

pub use error::{Error, Result};
