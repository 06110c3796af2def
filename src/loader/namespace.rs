//! Isolated loading namespaces.
//!
//! Every library version is loaded into its own [`Namespace`]. A type is
//! identified by the archive it came from and the entry it was stored under,
//! so two archives that both define `org.example.Foo` yield two distinct
//! [`LoadedType`]s. Resolution by name only ever searches the namespace's
//! own archives; the [`EXTENSION_MARKER`] capability name is the only thing
//! shared across namespaces by contract.

use super::archive::{Archive, ArchiveEntry, ConstructorDef, OperationDef, TypeDef};
use super::native;
use crate::error::{EnumerationError, LoadError};
use indexmap::IndexMap;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

/// Capability an extension (shard) type implements to be merged into a
/// catalog.
pub const EXTENSION_MARKER: &str = "matbind.Extension";

static NEXT_NAMESPACE: AtomicU64 = AtomicU64::new(1);

/// Namespace identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NamespaceId(u64);

impl fmt::Display for NamespaceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ns{}", self.0)
    }
}

/// A type loaded through a namespace.
#[derive(Debug)]
pub struct LoadedType {
    namespace: NamespaceId,
    archive: PathBuf,
    entry: String,
    def: Arc<TypeDef>,
}

impl LoadedType {
    /// Namespace the type was loaded through.
    pub fn namespace(&self) -> NamespaceId {
        self.namespace
    }

    /// Archive the type came from.
    pub fn archive(&self) -> &Path {
        &self.archive
    }

    /// Entry path inside the archive.
    pub fn entry(&self) -> &str {
        &self.entry
    }

    /// Simple name.
    pub fn name(&self) -> &str {
        &self.def.name
    }

    /// Dotted package.
    pub fn package(&self) -> &str {
        &self.def.package
    }

    /// `package.Name`.
    pub fn qualified_name(&self) -> String {
        self.def.qualified_name()
    }

    /// Returns true if the type implements `capability`.
    pub fn implements(&self, capability: &str) -> bool {
        self.def.implements(capability)
    }

    /// Operations in declaration order.
    pub fn operations(&self) -> &[OperationDef] {
        &self.def.operations
    }

    /// Constructors in declaration order.
    pub fn constructors(&self) -> &[ConstructorDef] {
        &self.def.constructors
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|e| e.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|e| e.into_inner())
}

/// An isolated loading context.
///
/// Namespaces are never unloaded; they live until the process exits.
pub struct Namespace {
    id: NamespaceId,
    archives: RwLock<IndexMap<PathBuf, Arc<Archive>>>,
    types: Mutex<HashMap<(PathBuf, String), Arc<LoadedType>>>,
    natives: Mutex<Vec<PathBuf>>,
}

impl Namespace {
    /// Create an empty namespace with a fresh id.
    pub fn new() -> Self {
        Self {
            id: NamespaceId(NEXT_NAMESPACE.fetch_add(1, Ordering::Relaxed)),
            archives: RwLock::new(IndexMap::new()),
            types: Mutex::new(HashMap::new()),
            natives: Mutex::new(Vec::new()),
        }
    }

    /// Namespace id.
    pub fn id(&self) -> NamespaceId {
        self.id
    }

    /// Open a foreign archive and add it to this namespace.
    ///
    /// Adding the same path twice returns the archive already loaded.
    ///
    /// # Safety
    ///
    /// See [`Archive::open`].
    pub unsafe fn add_archive(&self, path: impl AsRef<Path>) -> Result<Arc<Archive>, LoadError> {
        let path = path.as_ref();
        if let Some(existing) = self.archive(path) {
            return Ok(existing);
        }
        // SAFETY: Caller guarantees the archive is trusted.
        let archive = unsafe { Archive::open(path) }?;
        tracing::info!(
            namespace = %self.id,
            archive = %path.display(),
            name = archive.name(),
            version = archive.version(),
            "added archive"
        );
        Ok(self.mount(archive))
    }

    /// Add an archive assembled in-process, replacing any archive already
    /// mounted at the same path.
    pub fn mount(&self, archive: Archive) -> Arc<Archive> {
        let path = archive.path().to_path_buf();
        let archive = Arc::new(archive);
        if write(&self.archives)
            .insert(path.clone(), Arc::clone(&archive))
            .is_some()
        {
            self.types
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .retain(|(archive_path, _), _| archive_path != &path);
        }
        archive
    }

    /// Load a native shared object this namespace's archives depend on.
    ///
    /// Native libraries are process-global and never unloaded.
    ///
    /// # Safety
    ///
    /// See [`native::load_native_library`].
    pub unsafe fn load_native_library(&self, path: impl AsRef<Path>) -> Result<(), LoadError> {
        let path = path.as_ref();
        // SAFETY: Caller guarantees the library is trusted.
        unsafe { native::load_native_library(path) }?;
        let mut natives = self.natives.lock().unwrap_or_else(|e| e.into_inner());
        if !natives.iter().any(|p| p == path) {
            natives.push(path.to_path_buf());
        }
        Ok(())
    }

    /// Archive added under `path`.
    pub fn archive(&self, path: &Path) -> Option<Arc<Archive>> {
        read(&self.archives).get(path).cloned()
    }

    /// All archives in the order they were added.
    pub fn archives(&self) -> Vec<Arc<Archive>> {
        read(&self.archives).values().cloned().collect()
    }

    /// Native libraries loaded on behalf of this namespace.
    pub fn native_libraries(&self) -> Vec<PathBuf> {
        self.natives
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    /// Load one archive entry through this namespace.
    ///
    /// Returns `Ok(None)` for non-type resources. Repeated loads of the same
    /// entry return the same handle.
    pub fn load_type(
        &self,
        archive: &Archive,
        entry: &ArchiveEntry,
    ) -> Result<Option<Arc<LoadedType>>, EnumerationError> {
        if !entry.is_type() {
            return Ok(None);
        }
        let key = (archive.path().to_path_buf(), entry.path().to_string());
        let mut types = self.types.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(loaded) = types.get(&key) {
            return Ok(Some(Arc::clone(loaded)));
        }
        let def = entry
            .resolve()
            .map_err(|reason| EnumerationError {
                archive: key.0.clone(),
                entry: key.1.clone(),
                reason,
            })?
            .ok_or_else(|| EnumerationError {
                archive: key.0.clone(),
                entry: key.1.clone(),
                reason: "entry resolved to nothing".to_string(),
            })?;
        let loaded = Arc::new(LoadedType {
            namespace: self.id,
            archive: key.0.clone(),
            entry: key.1.clone(),
            def,
        });
        types.insert(key, Arc::clone(&loaded));
        Ok(Some(loaded))
    }

    /// Find a type by qualified name among this namespace's archives.
    ///
    /// Archives added later shadow earlier ones. Unreadable entries are
    /// skipped.
    pub fn resolve_type(&self, qualified_name: &str) -> Option<Arc<LoadedType>> {
        for archive in self.archives().iter().rev() {
            for entry in archive.entries() {
                if let Ok(Some(loaded)) = self.load_type(archive, entry)
                    && loaded.qualified_name() == qualified_name
                {
                    return Some(loaded);
                }
            }
        }
        None
    }
}

impl Default for Namespace {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Namespace")
            .field("id", &self.id)
            .field("archives", &read(&self.archives).len())
            .finish()
    }
}

/// Owns every namespace created in the process.
#[derive(Debug, Default)]
pub struct Loader {
    namespaces: RwLock<Vec<Arc<Namespace>>>,
}

impl Loader {
    /// Create a loader with no namespaces.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a new namespace.
    pub fn create_namespace(&self) -> Arc<Namespace> {
        let namespace = Arc::new(Namespace::new());
        tracing::debug!(namespace = %namespace.id(), "created namespace");
        write(&self.namespaces).push(Arc::clone(&namespace));
        namespace
    }

    /// Look up a namespace by id.
    pub fn get(&self, id: NamespaceId) -> Option<Arc<Namespace>> {
        read(&self.namespaces)
            .iter()
            .find(|ns| ns.id() == id)
            .cloned()
    }

    /// Every namespace, oldest first.
    pub fn namespaces(&self) -> Vec<Arc<Namespace>> {
        read(&self.namespaces).clone()
    }
}
