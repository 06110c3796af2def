//! Archive inspection.
//!
//! Walks an archive's entries through its namespace and selects the types
//! and operations a catalog is built from. Enumeration is best effort: an
//! entry that cannot be resolved is logged, recorded in the result and
//! skipped.

mod signature;

pub use signature::{constructor_signature, operation_signature};

use crate::error::{EnumerationError, LoadError};
use crate::loader::{EXTENSION_MARKER, LoadedType, Namespace, OperationDef, Visibility};
use crate::observability::{record_enumeration_skipped, span_enumeration};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What to select from an archive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnumerationMode {
    /// Every type; used for the constructible-type cache.
    Full,
    /// Types with at least one public static operation.
    Operations,
    /// As `Operations`, restricted to types with the extension marker.
    Extensions,
}

impl fmt::Display for EnumerationMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EnumerationMode::Full => write!(f, "full"),
            EnumerationMode::Operations => write!(f, "operations"),
            EnumerationMode::Extensions => write!(f, "extensions"),
        }
    }
}

/// Language-neutral view of one operation, as seen by selection predicates.
#[derive(Debug, Clone, Copy)]
pub struct OperationInfo<'a> {
    /// Operation name.
    pub name: &'a str,
    /// Simple name of the declaring type.
    pub owner: &'a str,
    /// Package of the declaring type.
    pub package: &'a str,
    /// Parameter type names.
    pub params: &'a [String],
    /// Return type name.
    pub returns: &'a str,
    /// Visibility.
    pub visibility: Visibility,
    /// Whether the operation needs no instance.
    pub is_static: bool,
}

impl<'a> OperationInfo<'a> {
    /// View `op` as declared by `owner`.
    pub fn new(owner: &'a LoadedType, op: &'a OperationDef) -> Self {
        Self {
            name: &op.name,
            owner: owner.name(),
            package: owner.package(),
            params: &op.params,
            returns: &op.returns,
            visibility: op.visibility,
            is_static: op.is_static,
        }
    }
}

/// Whether an operation can be cataloged: public and static.
///
/// Void-returning and value-returning operations both qualify.
pub fn is_invokable(info: &OperationInfo<'_>) -> bool {
    info.visibility == Visibility::Public && info.is_static
}

/// A type selected by the inspector.
#[derive(Debug, Clone)]
pub struct InspectedType {
    /// The loaded type.
    pub loaded: Arc<LoadedType>,
    /// Indices of the invokable operations, in declaration order.
    pub operations: Vec<usize>,
}

impl InspectedType {
    /// Invokable operations with their indices.
    pub fn invokable(&self) -> impl Iterator<Item = (usize, &OperationDef)> + '_ {
        self.operations
            .iter()
            .map(|&i| (i, &self.loaded.operations()[i]))
    }

    /// Returns true if the type has at least one public constructor.
    pub fn is_constructible(&self) -> bool {
        self.loaded
            .constructors()
            .iter()
            .any(|c| c.visibility == Visibility::Public)
    }
}

/// Result of enumerating one archive.
#[derive(Debug, Default)]
pub struct Enumeration {
    /// Selected types, in archive order.
    pub types: Vec<InspectedType>,
    /// Entries that could not be resolved.
    pub skipped: Vec<EnumerationError>,
}

/// Enumerate the types of `archive_path` as loaded through `namespace`.
///
/// Fails only if the archive is not part of the namespace.
pub fn enumerate_types(
    namespace: &Namespace,
    archive_path: &Path,
    mode: EnumerationMode,
) -> Result<Enumeration, LoadError> {
    let archive = namespace
        .archive(archive_path)
        .ok_or_else(|| LoadError::NotInNamespace {
            path: archive_path.to_path_buf(),
            namespace: namespace.id(),
        })?;
    let archive_label = archive_path.display().to_string();
    let _span = span_enumeration(&archive_label, &mode.to_string()).entered();

    let mut result = Enumeration::default();
    for entry in archive.entries() {
        let loaded = match namespace.load_type(&archive, entry) {
            Ok(Some(loaded)) => loaded,
            Ok(None) => continue,
            Err(err) => {
                tracing::warn!(error = %err, "skipping archive entry");
                result.skipped.push(err);
                continue;
            }
        };

        if mode == EnumerationMode::Extensions && !loaded.implements(EXTENSION_MARKER) {
            continue;
        }
        let operations: Vec<usize> = loaded
            .operations()
            .iter()
            .enumerate()
            .filter(|(_, op)| is_invokable(&OperationInfo::new(&loaded, op)))
            .map(|(i, _)| i)
            .collect();
        if mode != EnumerationMode::Full && operations.is_empty() {
            continue;
        }
        result.types.push(InspectedType { loaded, operations });
    }

    if !result.skipped.is_empty() {
        record_enumeration_skipped(&archive_label, result.skipped.len());
    }
    tracing::debug!(
        types = result.types.len(),
        skipped = result.skipped.len(),
        "enumerated archive"
    );
    Ok(result)
}
