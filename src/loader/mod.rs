//! Isolated loading of library archives.
//!
//! Each selected library version gets its own [`Namespace`]. Archives are
//! either shared objects opened with local symbol visibility or archives
//! assembled in-process with [`ArchiveBuilder`]. Native libraries the
//! archives depend on are loaded process-wide and never unloaded.
//!
//! # Archive Structure
//!
//! A foreign archive is a shared library that exports a single symbol:
//!
//! ```c
//! const ArchiveDescriptor* matbind_archive_descriptor();
//! ```
//!
//! The descriptor lists the archive's entries. Type entries carry a resolver
//! returning a [`TypeDescriptor`] with the type's operations and
//! constructors; each member has an `extern "C"` invoke function taking a
//! [`CallFrame`].
//!
//! # Example Archive (Rust)
//!
//! ```ignore
//! use matbind::loader::*;
//!
//! unsafe extern "C" fn blur(frame: *mut CallFrame) -> CallStatus {
//!     unsafe { CallFrame::guard(frame, |f| { /* ... */ Ok(Value::Void) }) }
//! }
//!
//! static ARCHIVE: ArchiveDescriptor = ArchiveDescriptor { /* ... */ };
//! matbind::export_archive!(ARCHIVE);
//! ```

mod archive;
mod descriptor;
mod layout;
mod namespace;
mod native;

pub use archive::{
    Archive, ArchiveBuilder, ArchiveEntry, ConstructorDef, Invoker, OperationDef, TypeDef,
    Visibility,
};
pub use descriptor::{
    ARCHIVE_ENTRY_POINT, ArchiveDescriptor, CallFrame, CallStatus, ConstructorDescriptor,
    EntryDescriptor, FLAG_PUBLIC, FLAG_STATIC, InvokeFn, MATBIND_ABI_VERSION,
    OperationDescriptor, ResolveFn, TypeDescriptor, TypeName,
};
pub use layout::{LibraryLayout, default_native_name, discover_archives, discover_shards};
pub use namespace::{EXTENSION_MARKER, LoadedType, Loader, Namespace, NamespaceId};
pub use native::{load_native_library, loaded_native_libraries};
