//! Operation catalog.
//!
//! A [`Catalog`] maps operation signatures to callable handles and simple
//! type names to constructible types. It is rebuilt from a library's primary
//! archive and extended by merging extension archives; every change produces
//! a [`CatalogReport`] listing collisions and skipped entries.
//!
//! [`CatalogTree`] projects a generation into a filterable hierarchy.

mod cache;
pub mod tree;

pub use cache::{
    Catalog, CatalogReport, CatalogSnapshot, CatalogWriteGuard, InvocationPermit, OperationHandle,
};
pub use tree::{CatalogTree, NodeKind, TreeNode, TreePath};
