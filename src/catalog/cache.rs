//! The operation and constructible-type caches.

use crate::error::{
    CacheCollisionWarning, CollisionKind, EnumerationError, Error, LoadError, Result,
};
use crate::inspect::{Enumeration, EnumerationMode, enumerate_types, operation_signature};
use crate::loader::{LoadedType, Namespace, OperationDef};
use crate::observability::{record_catalog_size, record_collisions, span_catalog};
use indexmap::IndexMap;
use std::fmt;
use std::path::Path;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, TryLockError};

/// A cataloged operation.
pub struct OperationHandle {
    signature: String,
    owner: Arc<LoadedType>,
    index: usize,
}

impl OperationHandle {
    /// Catalog key.
    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Type declaring the operation.
    pub fn owner(&self) -> &Arc<LoadedType> {
        &self.owner
    }

    /// Operation definition.
    pub fn def(&self) -> &OperationDef {
        &self.owner.operations()[self.index]
    }

    /// Text shown next to the signature in listings: `pkg.Type :: signature`.
    pub fn display_text(&self) -> String {
        format!("{} :: {}", self.owner.qualified_name(), self.signature)
    }
}

impl fmt::Debug for OperationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OperationHandle")
            .field("signature", &self.signature)
            .field("owner", &self.owner.qualified_name())
            .field("archive", &self.owner.archive())
            .finish()
    }
}

/// One catalog generation. Never mutated once published.
#[derive(Debug, Default)]
pub struct CatalogSnapshot {
    generation: u64,
    library: Option<String>,
    operations: IndexMap<String, Arc<OperationHandle>>,
    types: IndexMap<String, Arc<LoadedType>>,
}

impl CatalogSnapshot {
    /// Rebuild counter; 0 before the first rebuild.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Name of the library the generation was built from.
    pub fn library(&self) -> Option<&str> {
        self.library.as_deref()
    }

    /// Look up an operation by signature.
    pub fn operation(&self, signature: &str) -> Option<&Arc<OperationHandle>> {
        self.operations.get(signature)
    }

    /// Look up a constructible type by simple name.
    pub fn constructible(&self, name: &str) -> Option<&Arc<LoadedType>> {
        self.types.get(name)
    }

    /// Operations in insertion order.
    pub fn operations(&self) -> impl Iterator<Item = &Arc<OperationHandle>> {
        self.operations.values()
    }

    /// Constructible type names in insertion order.
    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.types.keys().map(String::as_str)
    }

    /// Number of operations.
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    /// Returns true if no operation is cataloged.
    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }
}

/// What a rebuild or merge did.
#[derive(Debug, Clone, Default)]
pub struct CatalogReport {
    /// Generation after the change.
    pub generation: u64,
    /// Operations written by this change.
    pub operations: usize,
    /// Constructible types written by this change.
    pub types: usize,
    /// Keys that replaced an earlier entry.
    pub collisions: Vec<CacheCollisionWarning>,
    /// Archive entries that could not be read.
    pub skipped: Vec<EnumerationError>,
}

/// Held by every running invocation; while any is alive the catalog cannot
/// be rebuilt or merged into.
#[derive(Debug)]
pub struct InvocationPermit<'a> {
    _guard: RwLockReadGuard<'a, ()>,
}

/// Exclusive right to change the catalog, taken before any loading work.
///
/// While it is held no invocation can start, and a second reservation
/// fails with [`Error::Busy`].
#[derive(Debug)]
pub struct CatalogWriteGuard<'a> {
    catalog: &'a Catalog,
    _guard: RwLockWriteGuard<'a, ()>,
}

impl CatalogWriteGuard<'_> {
    /// [`Catalog::rebuild`] under this reservation.
    pub fn rebuild(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        self.catalog.rebuild_reserved(namespace, archive)
    }

    /// [`Catalog::merge`] under this reservation.
    pub fn merge(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        self.catalog.merge_reserved(namespace, archive)
    }
}

/// Signature → operation and name → constructible-type caches.
///
/// Readers always see a complete generation: rebuilds and merges assemble a
/// new snapshot on the side and swap it in.
#[derive(Debug, Default)]
pub struct Catalog {
    current: RwLock<Arc<CatalogSnapshot>>,
    gate: RwLock<()>,
}

fn owner_label(owner: &LoadedType) -> String {
    format!("{} ({})", owner.qualified_name(), owner.archive().display())
}

fn insert_operations(
    operations: &mut IndexMap<String, Arc<OperationHandle>>,
    enumeration: &Enumeration,
    collisions: &mut Vec<CacheCollisionWarning>,
) -> usize {
    let mut written = 0;
    for inspected in &enumeration.types {
        for (index, op) in inspected.invokable() {
            let handle = Arc::new(OperationHandle {
                signature: operation_signature(op),
                owner: Arc::clone(&inspected.loaded),
                index,
            });
            if let Some(previous) = operations.insert(handle.signature.clone(), Arc::clone(&handle))
            {
                collisions.push(CacheCollisionWarning {
                    kind: CollisionKind::Operation,
                    key: handle.signature.clone(),
                    replaced: owner_label(&previous.owner),
                    winner: owner_label(&handle.owner),
                });
            }
            written += 1;
        }
    }
    written
}

fn insert_types(
    types: &mut IndexMap<String, Arc<LoadedType>>,
    enumeration: &Enumeration,
    collisions: &mut Vec<CacheCollisionWarning>,
) -> usize {
    let mut written = 0;
    for inspected in enumeration.types.iter().filter(|t| t.is_constructible()) {
        let loaded = &inspected.loaded;
        if let Some(previous) = types.insert(loaded.name().to_string(), Arc::clone(loaded)) {
            collisions.push(CacheCollisionWarning {
                kind: CollisionKind::Type,
                key: loaded.name().to_string(),
                replaced: owner_label(&previous),
                winner: owner_label(loaded),
            });
        }
        written += 1;
    }
    written
}

impl Catalog {
    /// Create an empty catalog (generation 0).
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an invocation as running until the permit is dropped.
    pub fn begin_invocation(&self) -> InvocationPermit<'_> {
        InvocationPermit {
            _guard: self.gate.read().unwrap_or_else(|e| e.into_inner()),
        }
    }

    /// Reserve the catalog for a rebuild or merge.
    ///
    /// Fails with [`Error::Busy`] while an invocation or another
    /// reservation is alive.
    pub fn reserve(&self) -> Result<CatalogWriteGuard<'_>> {
        let guard = match self.gate.try_write() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return Err(Error::Busy),
        };
        Ok(CatalogWriteGuard {
            catalog: self,
            _guard: guard,
        })
    }

    /// Current generation.
    pub fn snapshot(&self) -> Arc<CatalogSnapshot> {
        Arc::clone(&self.current.read().unwrap_or_else(|e| e.into_inner()))
    }

    fn publish(&self, snapshot: CatalogSnapshot) {
        record_catalog_size(snapshot.operations.len(), snapshot.types.len());
        *self.current.write().unwrap_or_else(|e| e.into_inner()) = Arc::new(snapshot);
    }

    fn library_name(namespace: &Namespace, archive: &Path) -> Result<String> {
        namespace
            .archive(archive)
            .map(|a| a.name().to_string())
            .ok_or_else(|| {
                Error::Load(LoadError::NotInNamespace {
                    path: archive.to_path_buf(),
                    namespace: namespace.id(),
                })
            })
    }

    /// Replace both caches with the contents of `archive`.
    ///
    /// On error the previous generation stays in place.
    pub fn rebuild(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        self.reserve()?.rebuild(namespace, archive)
    }

    fn rebuild_reserved(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        let _span = span_catalog("rebuild", &archive.display().to_string()).entered();
        let library = Self::library_name(namespace, archive)?;

        let ops = enumerate_types(namespace, archive, EnumerationMode::Operations)?;
        let full = enumerate_types(namespace, archive, EnumerationMode::Full)?;

        let mut report = CatalogReport::default();
        let mut operations = IndexMap::new();
        let mut types = IndexMap::new();
        report.operations = insert_operations(&mut operations, &ops, &mut report.collisions);
        report.types = insert_types(&mut types, &full, &mut report.collisions);
        report.skipped = ops.skipped;
        report.generation = self.snapshot().generation + 1;

        self.finish("rebuild", &report);
        self.publish(CatalogSnapshot {
            generation: report.generation,
            library: Some(library),
            operations,
            types,
        });
        Ok(report)
    }

    /// Add the extension types of `archive` to the current generation.
    ///
    /// Existing entries are kept unless the archive defines the same key, in
    /// which case the merged entry wins.
    pub fn merge(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        self.reserve()?.merge(namespace, archive)
    }

    fn merge_reserved(&self, namespace: &Namespace, archive: &Path) -> Result<CatalogReport> {
        let _span = span_catalog("merge", &archive.display().to_string()).entered();

        let ops = enumerate_types(namespace, archive, EnumerationMode::Extensions)?;
        let full = enumerate_types(namespace, archive, EnumerationMode::Full)?;

        let current = self.snapshot();
        let mut operations = current.operations.clone();
        let mut types = current.types.clone();

        let mut report = CatalogReport {
            generation: current.generation,
            ..CatalogReport::default()
        };
        report.operations = insert_operations(&mut operations, &ops, &mut report.collisions);
        report.types = insert_types(&mut types, &full, &mut report.collisions);
        report.skipped = ops.skipped;

        self.finish("merge", &report);
        self.publish(CatalogSnapshot {
            generation: current.generation,
            library: current.library.clone(),
            operations,
            types,
        });
        Ok(report)
    }

    fn finish(&self, action: &str, report: &CatalogReport) {
        for collision in &report.collisions {
            tracing::warn!(%collision, "catalog key collision, last writer wins");
        }
        if !report.collisions.is_empty() {
            record_collisions(report.collisions.len());
        }
        tracing::info!(
            action,
            generation = report.generation,
            operations = report.operations,
            types = report.types,
            collisions = report.collisions.len(),
            skipped = report.skipped.len(),
            "catalog updated"
        );
    }

    /// Look up an operation by signature.
    pub fn lookup_operation(&self, signature: &str) -> Option<Arc<OperationHandle>> {
        self.snapshot().operation(signature).cloned()
    }

    /// Look up a constructible type by simple name.
    pub fn lookup_type(&self, name: &str) -> Option<Arc<LoadedType>> {
        self.snapshot().constructible(name).cloned()
    }

    /// `(signature, display text)` for every cataloged operation.
    pub fn list_operations(&self) -> Vec<(String, String)> {
        self.snapshot()
            .operations()
            .map(|h| (h.signature().to_string(), h.display_text()))
            .collect()
    }

    /// Names of every constructible type.
    pub fn list_constructible_types(&self) -> Vec<String> {
        self.snapshot().type_names().map(str::to_string).collect()
    }

    /// Current generation number.
    pub fn generation(&self) -> u64 {
        self.snapshot().generation
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{Archive, ConstructorDef, EXTENSION_MARKER, TypeDef};
    use crate::value::Value;
    use std::path::PathBuf;

    fn blur() -> OperationDef {
        OperationDef::new("blur", "void", &["Mat"], |_| Ok(Value::Void))
    }

    fn mount(ns: &Namespace, path: &str, def: TypeDef) -> PathBuf {
        ns.mount(Archive::builder(path).with_type(def).build())
            .path()
            .to_path_buf()
    }

    #[test]
    fn test_rebuild_swaps_generation() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(
            &ns,
            "a.so",
            TypeDef::new("org.example", "Foo")
                .operation(blur())
                .constructor(ConstructorDef::new(&[], |_| Ok(Value::Void))),
        );

        let report = catalog.rebuild(&ns, &a).unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(report.operations, 1);
        assert_eq!(report.types, 1);
        assert!(catalog.lookup_operation("void blur(Mat)").is_some());
        assert!(catalog.lookup_type("Foo").is_some());
        assert_eq!(catalog.snapshot().library(), Some("a"));
        assert_eq!(
            catalog.list_operations(),
            vec![(
                "void blur(Mat)".to_string(),
                "org.example.Foo :: void blur(Mat)".to_string()
            )]
        );
    }

    #[test]
    fn test_failed_rebuild_keeps_previous() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(&ns, "a.so", TypeDef::new("p", "Foo").operation(blur()));
        catalog.rebuild(&ns, &a).unwrap();

        let err = catalog.rebuild(&ns, Path::new("missing.so")).unwrap_err();
        assert!(matches!(err, Error::Load(LoadError::NotInNamespace { .. })));
        assert_eq!(catalog.generation(), 1);
        assert!(catalog.lookup_operation("void blur(Mat)").is_some());
    }

    #[test]
    fn test_merge_overwrites_on_collision() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(&ns, "a.so", TypeDef::new("p", "Foo").operation(blur()));
        let b = mount(
            &ns,
            "b.so",
            TypeDef::new("p", "Foo")
                .capability(EXTENSION_MARKER)
                .operation(blur()),
        );
        catalog.rebuild(&ns, &a).unwrap();
        let report = catalog.merge(&ns, &b).unwrap();

        assert_eq!(report.collisions.len(), 1);
        assert_eq!(report.collisions[0].kind, CollisionKind::Operation);
        let handle = catalog.lookup_operation("void blur(Mat)").unwrap();
        assert_eq!(handle.owner().archive(), Path::new("b.so"));
        assert_eq!(report.generation, 1);
    }

    #[test]
    fn test_merge_ignores_unmarked_types() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(&ns, "a.so", TypeDef::new("p", "Foo").operation(blur()));
        let plain = mount(
            &ns,
            "plain.so",
            TypeDef::new("p", "Bar").operation(OperationDef::new(
                "sharpen",
                "void",
                &["Mat"],
                |_| Ok(Value::Void),
            )),
        );
        catalog.rebuild(&ns, &a).unwrap();
        let report = catalog.merge(&ns, &plain).unwrap();
        assert_eq!(report.operations, 0);
        assert!(catalog.lookup_operation("void sharpen(Mat)").is_none());
    }

    #[test]
    fn test_rebuild_rejected_while_invoking() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(&ns, "a.so", TypeDef::new("p", "Foo").operation(blur()));

        let permit = catalog.begin_invocation();
        assert!(matches!(catalog.rebuild(&ns, &a), Err(Error::Busy)));
        assert!(matches!(catalog.merge(&ns, &a), Err(Error::Busy)));
        drop(permit);
        assert!(catalog.rebuild(&ns, &a).is_ok());
    }

    #[test]
    fn test_reservation_excludes_others() {
        let catalog = Catalog::new();
        let ns = Namespace::new();
        let a = mount(&ns, "a.so", TypeDef::new("p", "Foo").operation(blur()));

        let permit = catalog.begin_invocation();
        assert!(matches!(catalog.reserve(), Err(Error::Busy)));
        drop(permit);

        let reservation = catalog.reserve().unwrap();
        assert!(matches!(catalog.reserve(), Err(Error::Busy)));
        assert!(matches!(catalog.rebuild(&ns, &a), Err(Error::Busy)));
        let report = reservation.rebuild(&ns, &a).unwrap();
        assert_eq!(report.generation, 1);
        assert_eq!(reservation.merge(&ns, &a).unwrap().generation, 1);
        drop(reservation);
        assert!(catalog.reserve().is_ok());
    }
}
