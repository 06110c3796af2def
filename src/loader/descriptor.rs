//! Archive, type and operation descriptors for the C-compatible ABI.
//!
//! A foreign archive is a shared object exporting
//! `matbind_archive_descriptor`, which returns a static [`ArchiveDescriptor`].
//! Types are resolved lazily through each entry's `resolve` function, so an
//! archive with a broken entry still loads and the entry is skipped during
//! enumeration.
//!
//! Values cross the boundary inside a [`CallFrame`]; both sides must be built
//! against the same version of this crate.

use crate::error::ForeignError;
use crate::value::Value;
use std::ffi::{CStr, c_char};
use std::panic::{AssertUnwindSafe, catch_unwind};

/// Current ABI version. Archives must match this version to be loaded.
pub const MATBIND_ABI_VERSION: u32 = 1;

/// Symbol every foreign archive exports.
pub const ARCHIVE_ENTRY_POINT: &[u8] = b"matbind_archive_descriptor\0";

/// Operation/constructor flag: publicly visible.
pub const FLAG_PUBLIC: u32 = 1 << 0;
/// Operation flag: callable without an instance.
pub const FLAG_STATIC: u32 = 1 << 1;

/// Outcome of a foreign call.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// The call succeeded; the result is in the frame.
    Ok = 0,
    /// The call failed; the message is in the frame.
    Failed = 1,
    /// The call ran out of memory.
    OutOfMemory = 2,
}

/// Arguments in, result or error out.
///
/// Passed to foreign code as an opaque pointer.
#[derive(Debug, Default)]
pub struct CallFrame {
    /// Arguments; callables may update matrices in place.
    pub args: Vec<Value>,
    /// Return value.
    pub result: Value,
    /// Failure message.
    pub error: Option<String>,
}

impl CallFrame {
    /// Run `body` against the frame behind `frame`, recording its outcome.
    ///
    /// Panics inside `body` are caught and reported as failures so they never
    /// unwind across the `extern "C"` boundary.
    ///
    /// # Safety
    ///
    /// `frame` must be the valid, exclusive pointer handed to an invoke
    /// function.
    pub unsafe fn guard(
        frame: *mut CallFrame,
        body: impl FnOnce(&mut CallFrame) -> Result<Value, ForeignError>,
    ) -> CallStatus {
        if frame.is_null() {
            return CallStatus::Failed;
        }
        // SAFETY: Caller guarantees `frame` is valid and exclusively ours.
        let frame = unsafe { &mut *frame };
        match catch_unwind(AssertUnwindSafe(|| body(&mut *frame))) {
            Ok(Ok(value)) => {
                frame.result = value;
                CallStatus::Ok
            }
            Ok(Err(ForeignError::OutOfMemory(message))) => {
                frame.error = Some(message);
                CallStatus::OutOfMemory
            }
            Ok(Err(err)) => {
                frame.error = Some(err.to_string());
                CallStatus::Failed
            }
            Err(_) => {
                frame.error = Some("panic in foreign callable".to_string());
                CallStatus::Failed
            }
        }
    }
}

/// Function pointer type for operations and constructors.
pub type InvokeFn = unsafe extern "C" fn(frame: *mut CallFrame) -> CallStatus;

/// Function pointer type resolving an archive entry to its type.
pub type ResolveFn = unsafe extern "C" fn() -> *const TypeDescriptor;

/// Null-terminated type name.
#[repr(transparent)]
#[derive(Debug, Clone, Copy)]
pub struct TypeName(pub *const c_char);

// SAFETY: TypeName only points at static, immutable string data.
unsafe impl Send for TypeName {}
unsafe impl Sync for TypeName {}

impl TypeName {
    /// Wrap a static C string.
    pub const fn new(name: &'static CStr) -> Self {
        Self(name.as_ptr())
    }

    /// Get the name as a Rust string.
    ///
    /// # Safety
    ///
    /// The pointer must be valid and null-terminated.
    pub unsafe fn as_str(&self) -> &str {
        // SAFETY: Caller guarantees the pointer is valid and null-terminated.
        unsafe { c_str(self.0, "") }
    }
}

unsafe fn c_str<'a>(ptr: *const c_char, fallback: &'a str) -> &'a str {
    if ptr.is_null() {
        return fallback;
    }
    // SAFETY: Caller guarantees `ptr` is valid and null-terminated.
    unsafe { CStr::from_ptr(ptr).to_str().unwrap_or(fallback) }
}

unsafe fn slice<'a, T>(ptr: *const T, len: u32) -> &'a [T] {
    if ptr.is_null() || len == 0 {
        &[]
    } else {
        // SAFETY: Caller guarantees `ptr` points to `len` valid items.
        unsafe { std::slice::from_raw_parts(ptr, len as usize) }
    }
}

/// Describes one operation of a type.
#[repr(C)]
pub struct OperationDescriptor {
    /// Null-terminated operation name.
    pub name: *const c_char,
    /// Return type name (`void` for none).
    pub return_type: TypeName,
    /// Parameter type names.
    pub params: *const TypeName,
    /// Number of entries in `params`.
    pub num_params: u32,
    /// `FLAG_PUBLIC` / `FLAG_STATIC`.
    pub flags: u32,
    /// Entry point, or null if the operation cannot be called.
    pub invoke: Option<InvokeFn>,
}

/// Describes one constructor of a type.
#[repr(C)]
pub struct ConstructorDescriptor {
    /// Parameter type names.
    pub params: *const TypeName,
    /// Number of entries in `params`.
    pub num_params: u32,
    /// `FLAG_PUBLIC`.
    pub flags: u32,
    /// Entry point; the result is the new instance.
    pub invoke: Option<InvokeFn>,
}

/// Describes a type defined in an archive.
#[repr(C)]
pub struct TypeDescriptor {
    /// Null-terminated simple type name.
    pub name: *const c_char,
    /// Null-terminated dotted package (may be empty).
    pub package: *const c_char,
    /// Capability names the type implements.
    pub capabilities: *const TypeName,
    /// Number of entries in `capabilities`.
    pub num_capabilities: u32,
    /// Operations.
    pub operations: *const OperationDescriptor,
    /// Number of entries in `operations`.
    pub num_operations: u32,
    /// Constructors.
    pub constructors: *const ConstructorDescriptor,
    /// Number of entries in `constructors`.
    pub num_constructors: u32,
}

/// One entry of an archive: a type (when `resolve` is set) or a resource.
#[repr(C)]
pub struct EntryDescriptor {
    /// Null-terminated entry path.
    pub path: *const c_char,
    /// Type resolver, or null for non-type resources.
    pub resolve: Option<ResolveFn>,
}

/// Archive descriptor returned by `matbind_archive_descriptor()`.
#[repr(C)]
pub struct ArchiveDescriptor {
    /// ABI version - must match `MATBIND_ABI_VERSION`.
    pub abi_version: u32,
    /// Null-terminated library name.
    pub name: *const c_char,
    /// Null-terminated library version.
    pub version: *const c_char,
    /// Number of entries in `entries`.
    pub num_entries: u32,
    /// Entry table.
    pub entries: *const EntryDescriptor,
}

// SAFETY: The descriptors contain only raw pointers to static data and
// function pointers, which are inherently Send + Sync.
unsafe impl Send for OperationDescriptor {}
unsafe impl Sync for OperationDescriptor {}
unsafe impl Send for ConstructorDescriptor {}
unsafe impl Sync for ConstructorDescriptor {}
unsafe impl Send for TypeDescriptor {}
unsafe impl Sync for TypeDescriptor {}
unsafe impl Send for EntryDescriptor {}
unsafe impl Sync for EntryDescriptor {}
unsafe impl Send for ArchiveDescriptor {}
unsafe impl Sync for ArchiveDescriptor {}

impl OperationDescriptor {
    /// Operation name.
    ///
    /// # Safety
    ///
    /// `name` must be valid and null-terminated.
    pub unsafe fn name_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.name, "") }
    }

    /// Parameter type names.
    ///
    /// # Safety
    ///
    /// `params` must point to `num_params` valid names.
    pub unsafe fn params(&self) -> &[TypeName] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.params, self.num_params) }
    }
}

impl ConstructorDescriptor {
    /// Parameter type names.
    ///
    /// # Safety
    ///
    /// `params` must point to `num_params` valid names.
    pub unsafe fn params(&self) -> &[TypeName] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.params, self.num_params) }
    }
}

impl TypeDescriptor {
    /// Simple type name.
    ///
    /// # Safety
    ///
    /// `name` must be valid and null-terminated.
    pub unsafe fn name_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.name, "") }
    }

    /// Dotted package.
    ///
    /// # Safety
    ///
    /// `package` must be null or valid and null-terminated.
    pub unsafe fn package_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.package, "") }
    }

    /// Capability names.
    ///
    /// # Safety
    ///
    /// `capabilities` must point to `num_capabilities` valid names.
    pub unsafe fn capabilities(&self) -> &[TypeName] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.capabilities, self.num_capabilities) }
    }

    /// Operation descriptors.
    ///
    /// # Safety
    ///
    /// `operations` must point to `num_operations` valid descriptors.
    pub unsafe fn operations(&self) -> &[OperationDescriptor] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.operations, self.num_operations) }
    }

    /// Constructor descriptors.
    ///
    /// # Safety
    ///
    /// `constructors` must point to `num_constructors` valid descriptors.
    pub unsafe fn constructors(&self) -> &[ConstructorDescriptor] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.constructors, self.num_constructors) }
    }

    /// Check the fields a type cannot be used without.
    ///
    /// # Safety
    ///
    /// All pointer fields must be valid or null.
    pub unsafe fn validate(&self) -> Result<(), &'static str> {
        // SAFETY: We're in an unsafe fn, caller guarantees validity.
        unsafe {
            if self.name.is_null() || self.name_str().is_empty() {
                return Err("type name is null");
            }
            for op in self.operations() {
                if op.name.is_null() || op.return_type.0.is_null() {
                    return Err("operation name or return type is null");
                }
                if op.params().iter().any(|p| p.0.is_null()) {
                    return Err("operation parameter type is null");
                }
            }
            for ctor in self.constructors() {
                if ctor.params().iter().any(|p| p.0.is_null()) {
                    return Err("constructor parameter type is null");
                }
            }
        }
        Ok(())
    }
}

impl EntryDescriptor {
    /// Entry path.
    ///
    /// # Safety
    ///
    /// `path` must be valid and null-terminated.
    pub unsafe fn path_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.path, "") }
    }
}

impl ArchiveDescriptor {
    /// Library name.
    ///
    /// # Safety
    ///
    /// `name` must be valid and null-terminated.
    pub unsafe fn name_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.name, "unknown") }
    }

    /// Library version.
    ///
    /// # Safety
    ///
    /// `version` must be null or valid and null-terminated.
    pub unsafe fn version_str(&self) -> &str {
        // SAFETY: Caller guarantees validity.
        unsafe { c_str(self.version, "0.0.0") }
    }

    /// Entry table.
    ///
    /// # Safety
    ///
    /// `entries` must point to `num_entries` valid descriptors.
    pub unsafe fn entries(&self) -> &[EntryDescriptor] {
        // SAFETY: Caller guarantees validity.
        unsafe { slice(self.entries, self.num_entries) }
    }

    /// Validate that this descriptor is safe to use.
    ///
    /// Entry types are validated later, when each entry is resolved.
    ///
    /// # Safety
    ///
    /// All pointer fields must be valid.
    pub unsafe fn validate(&self) -> Result<(), &'static str> {
        if self.abi_version != MATBIND_ABI_VERSION {
            return Err("ABI version mismatch");
        }
        if self.name.is_null() {
            return Err("archive name is null");
        }
        if self.num_entries > 0 && self.entries.is_null() {
            return Err("entry table is null");
        }
        // SAFETY: We're in an unsafe fn, caller guarantees validity.
        for entry in unsafe { self.entries() } {
            if entry.path.is_null() {
                return Err("entry path is null");
            }
        }
        Ok(())
    }
}

/// Export a static [`ArchiveDescriptor`] as the archive entry point.
///
/// # Example
///
/// ```ignore
/// static ARCHIVE: ArchiveDescriptor = ArchiveDescriptor { /* ... */ };
/// matbind::export_archive!(ARCHIVE);
/// ```
#[macro_export]
macro_rules! export_archive {
    ($descriptor:path) => {
        /// Archive entry point.
        #[unsafe(no_mangle)]
        pub extern "C" fn matbind_archive_descriptor() -> *const $crate::loader::ArchiveDescriptor {
            &$descriptor
        }
    };
}
