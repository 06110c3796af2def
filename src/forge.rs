//! Entry point tying the components together.

use crate::catalog::{Catalog, CatalogReport, CatalogTree};
use crate::config::ForgeConfig;
use crate::error::{ConstructionError, Error, Result};
use crate::image::ImageRegistry;
use crate::invoke::{Argument, Executor, InvocationOutcome};
use crate::loader::{
    Archive, LibraryLayout, Loader, Namespace, discover_archives, discover_shards,
};
use crate::observability::{init_metrics, verbose_filter};
use crate::store::ResultStore;
use crate::value::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tracing::level_filters::LevelFilter;

/// Builder for [`Forge`].
#[derive(Debug, Default)]
pub struct ForgeBuilder {
    layout: Option<LibraryLayout>,
    store: Option<Arc<ResultStore>>,
    images: Option<Arc<ImageRegistry>>,
    config: Option<ForgeConfig>,
    config_path: Option<PathBuf>,
}

impl ForgeBuilder {
    /// Where native libraries are found and how they are named.
    pub fn layout(mut self, layout: LibraryLayout) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Share an existing result store.
    pub fn store(mut self, store: Arc<ResultStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Share an existing image registry.
    pub fn images(mut self, images: Arc<ImageRegistry>) -> Self {
        self.images = Some(images);
        self
    }

    /// Start from an in-memory configuration.
    pub fn config(mut self, config: ForgeConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Read the configuration from `path` and write changes back to it.
    pub fn config_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Build the facade. Fails if the config file exists but cannot be read.
    pub fn build(self) -> Result<Forge> {
        let config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => ForgeConfig::load(path)?,
            (None, None) => ForgeConfig::default(),
        };
        init_metrics();
        let catalog = Arc::new(Catalog::new());
        let images = self.images.unwrap_or_default();
        let store = self.store.unwrap_or_default();
        let executor = Arc::new(Executor::new(
            Arc::clone(&catalog),
            Arc::clone(&images),
            Arc::clone(&store),
        ));
        Ok(Forge {
            loader: Loader::new(),
            layout: self.layout.unwrap_or_else(|| LibraryLayout::new(".")),
            catalog,
            executor,
            config: Mutex::new(config),
            config_path: self.config_path,
            active: RwLock::new(None),
        })
    }
}

/// Library selection, shard merging and invocation behind one handle.
///
/// Each selected library gets a fresh namespace; the catalog is rebuilt from
/// it and the previous catalog stays in place if anything fails. Namespaces
/// are never unloaded.
#[derive(Debug)]
pub struct Forge {
    loader: Loader,
    layout: LibraryLayout,
    catalog: Arc<Catalog>,
    executor: Arc<Executor>,
    config: Mutex<ForgeConfig>,
    config_path: Option<PathBuf>,
    active: RwLock<Option<Arc<Namespace>>>,
}

impl Forge {
    /// Start building a facade.
    pub fn builder() -> ForgeBuilder {
        ForgeBuilder::default()
    }

    /// Facade with default services and no config file.
    pub fn new(layout: LibraryLayout) -> Self {
        init_metrics();
        let catalog = Arc::new(Catalog::new());
        let executor = Arc::new(Executor::new(
            Arc::clone(&catalog),
            Arc::new(ImageRegistry::new()),
            Arc::new(ResultStore::new()),
        ));
        Self {
            loader: Loader::new(),
            layout,
            catalog,
            executor,
            config: Mutex::new(ForgeConfig::default()),
            config_path: None,
            active: RwLock::new(None),
        }
    }

    fn config_guard(&self) -> MutexGuard<'_, ForgeConfig> {
        self.config.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, config: &ForgeConfig) -> Result<()> {
        match &self.config_path {
            Some(path) => config.save(path),
            None => Ok(()),
        }
    }

    /// Namespace the catalog was built from.
    pub fn active_namespace(&self) -> Option<Arc<Namespace>> {
        self.active.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn require_active(&self) -> Result<Arc<Namespace>> {
        self.active_namespace().ok_or(Error::NoActiveLibrary)
    }

    fn activate(&self, namespace: Arc<Namespace>, archive: &Path) -> Result<()> {
        *self.active.write().unwrap_or_else(|e| e.into_inner()) = Some(namespace);
        let mut config = self.config_guard();
        config.set_lib_path(archive)?;
        self.persist(&config)
    }

    /// Load a library archive into a new namespace and rebuild the catalog
    /// from it.
    ///
    /// The native library the layout names for the archive is loaded first,
    /// if it exists. Nothing is loaded while an invocation is running; the
    /// call fails with [`Error::Busy`] instead.
    ///
    /// # Safety
    ///
    /// Runs code from the archive and its native library; see
    /// [`Archive::open`].
    pub unsafe fn select_library(&self, archive: impl AsRef<Path>) -> Result<CatalogReport> {
        let archive = archive.as_ref();
        let reservation = self.catalog.reserve()?;
        let namespace = self.loader.create_namespace();

        match self.layout.native_library_for(archive) {
            Some(native) if native.exists() => {
                // SAFETY: Caller vouches for the library's native code.
                unsafe { namespace.load_native_library(&native) }?;
            }
            Some(native) => {
                tracing::debug!(native = %native.display(), "no native library for archive")
            }
            None => {}
        }
        // SAFETY: Caller vouches for the archive.
        unsafe { namespace.add_archive(archive) }?;

        let report = reservation.rebuild(&namespace, archive)?;
        drop(reservation);
        self.activate(namespace, archive)?;
        tracing::info!(
            archive = %archive.display(),
            operations = report.operations,
            types = report.types,
            "selected library"
        );
        Ok(report)
    }

    /// Select an archive assembled in-process.
    pub fn select_archive(&self, archive: Archive) -> Result<CatalogReport> {
        let reservation = self.catalog.reserve()?;
        let namespace = self.loader.create_namespace();
        let path = namespace.mount(archive).path().to_path_buf();
        let report = reservation.rebuild(&namespace, &path)?;
        drop(reservation);
        self.activate(namespace, &path)?;
        tracing::info!(archive = %path.display(), operations = report.operations, "selected library");
        Ok(report)
    }

    /// Re-select the library recorded under `libPath`, if any.
    ///
    /// # Safety
    ///
    /// See [`select_library`](Self::select_library).
    pub unsafe fn restore_library(&self) -> Result<Option<CatalogReport>> {
        let Some(path) = self.config_guard().lib_path() else {
            return Ok(None);
        };
        // SAFETY: Forwarded to the caller.
        unsafe { self.select_library(path) }.map(Some)
    }

    /// Merge every shard in `dir` into the catalog, best effort.
    ///
    /// Shards that fail to load are logged and skipped. Returns one report
    /// per merged shard.
    ///
    /// # Safety
    ///
    /// See [`Archive::open`].
    pub unsafe fn load_shards(&self, dir: impl AsRef<Path>) -> Result<Vec<CatalogReport>> {
        let namespace = self.require_active()?;
        let shards = discover_shards(dir)?;
        let reservation = self.catalog.reserve()?;
        let mut reports = Vec::new();
        for shard in shards {
            // SAFETY: Caller vouches for every shard in the directory.
            if let Err(err) = unsafe { namespace.add_archive(&shard) } {
                tracing::warn!(shard = %shard.display(), error = %err, "skipping shard");
                continue;
            }
            reports.push(reservation.merge(&namespace, &shard)?);
        }
        Ok(reports)
    }

    /// Merge an in-process extension archive into the active namespace.
    pub fn merge_archive(&self, archive: Archive) -> Result<CatalogReport> {
        let namespace = self.require_active()?;
        let reservation = self.catalog.reserve()?;
        let path = namespace.mount(archive).path().to_path_buf();
        reservation.merge(&namespace, &path)
    }

    /// Library archives in `dir` whose name contains `filter`.
    pub fn discover_libraries(&self, dir: impl AsRef<Path>, filter: &str) -> Result<Vec<PathBuf>> {
        Ok(discover_archives(dir, filter)?)
    }

    /// Record an installed library archive. Returns its index.
    pub fn register_installed(&self, archive: &Path) -> Result<u32> {
        let mut config = self.config_guard();
        let n = config.add_installed(archive)?;
        self.persist(&config)?;
        Ok(n)
    }

    /// Installed library archives, in installation order.
    pub fn installed_libraries(&self) -> Vec<PathBuf> {
        self.config_guard().installed()
    }

    /// Invoke a cataloged operation.
    pub fn invoke(
        &self,
        signature: &str,
        args: Vec<Argument>,
        result_name: &str,
    ) -> Result<InvocationOutcome> {
        Ok(self.executor.invoke(signature, args, result_name)?)
    }

    /// Invoke on a blocking worker.
    pub async fn invoke_async(
        &self,
        signature: impl Into<String>,
        args: Vec<Argument>,
        result_name: impl Into<String>,
    ) -> Result<InvocationOutcome> {
        Ok(Arc::clone(&self.executor)
            .invoke_async(signature, args, result_name)
            .await?)
    }

    /// Construct an instance of a constructible type.
    pub fn construct_instance(
        &self,
        type_name: &str,
        index: usize,
        args: Vec<Value>,
    ) -> std::result::Result<Value, ConstructionError> {
        self.executor.construct_instance(type_name, index, args)
    }

    /// `(signature, display text)` of every cataloged operation.
    pub fn list_operations(&self) -> Vec<(String, String)> {
        self.catalog.list_operations()
    }

    /// Names of every constructible type.
    pub fn list_constructible_types(&self) -> Vec<String> {
        self.catalog.list_constructible_types()
    }

    /// Tree projection of the current catalog.
    pub fn catalog_tree(&self) -> CatalogTree {
        CatalogTree::new(&self.catalog.snapshot())
    }

    /// The catalog.
    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// The executor.
    pub fn executor(&self) -> &Arc<Executor> {
        &self.executor
    }

    /// Open host images.
    pub fn images(&self) -> &Arc<ImageRegistry> {
        self.executor.images()
    }

    /// Published results.
    pub fn store(&self) -> &Arc<ResultStore> {
        self.executor.store()
    }

    /// The namespace loader.
    pub fn loader(&self) -> &Loader {
        &self.loader
    }

    /// Copy of the current configuration.
    pub fn config(&self) -> ForgeConfig {
        self.config_guard().clone()
    }

    /// Change the configuration and write it back.
    pub fn update_config<R>(&self, f: impl FnOnce(&mut ForgeConfig) -> R) -> Result<R> {
        let mut config = self.config_guard();
        let out = f(&mut config);
        self.persist(&config)?;
        Ok(out)
    }

    /// Log level matching the `verbose` setting.
    pub fn log_filter(&self) -> LevelFilter {
        verbose_filter(self.config_guard().verbose())
    }

    /// Refuse new invocations and write the configuration.
    pub fn shutdown(&self) -> Result<()> {
        self.executor.close();
        let config = self.config_guard();
        self.persist(&config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::{EXTENSION_MARKER, OperationDef, TypeDef};

    fn archive(path: &str, package: &str, ops: &[&str]) -> Archive {
        let mut def = TypeDef::new(package, "Ops");
        for name in ops {
            def = def.operation(OperationDef::new(*name, "void", &[], |_| Ok(Value::Void)));
        }
        Archive::builder(path).with_type(def).build()
    }

    #[test]
    fn test_select_and_merge() {
        let forge = Forge::new(LibraryLayout::new("/nonexistent"));
        assert!(matches!(
            forge.merge_archive(archive("x.so", "p", &["a"])),
            Err(Error::NoActiveLibrary)
        ));

        forge.select_archive(archive("lib-1.0.so", "p", &["a", "b"])).unwrap();
        assert_eq!(forge.list_operations().len(), 2);
        assert_eq!(forge.config().get("libPath"), Some("lib-1.0.so"));

        let shard = Archive::builder("extra.shard.so")
            .with_type(
                TypeDef::new("q", "Extra")
                    .capability(EXTENSION_MARKER)
                    .operation(OperationDef::new("c", "void", &[], |_| Ok(Value::Void))),
            )
            .build();
        let report = forge.merge_archive(shard).unwrap();
        assert_eq!(report.operations, 1);
        assert_eq!(forge.list_operations().len(), 3);
    }

    #[test]
    fn test_reselect_replaces_catalog() {
        let forge = Forge::new(LibraryLayout::new("/nonexistent"));
        forge.select_archive(archive("one.so", "p", &["a"])).unwrap();
        let first = forge.active_namespace().unwrap().id();
        forge.select_archive(archive("two.so", "p", &["z"])).unwrap();
        assert_ne!(forge.active_namespace().unwrap().id(), first);
        assert_eq!(forge.catalog().generation(), 2);
        let sigs: Vec<_> = forge.list_operations().into_iter().map(|(s, _)| s).collect();
        assert_eq!(sigs, vec!["void z()"]);
        assert_eq!(forge.loader().namespaces().len(), 2);
    }

    #[test]
    fn test_failed_selection_keeps_catalog() {
        let forge = Forge::new(LibraryLayout::new("/nonexistent"));
        forge.select_archive(archive("one.so", "p", &["a"])).unwrap();
        // SAFETY: The path does not exist, nothing is loaded.
        let err = unsafe { forge.select_library("/nonexistent/missing-1.0.so") }.unwrap_err();
        assert!(matches!(err, Error::Load(_)));
        assert_eq!(forge.list_operations().len(), 1);
        assert_eq!(forge.config().lib_path(), Some(PathBuf::from("one.so")));
    }

    #[test]
    fn test_config_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conf").join("forge.cfg");
        let forge = Forge::builder().config_path(&path).build().unwrap();
        forge.select_archive(archive("lib.so", "p", &["a"])).unwrap();
        forge.register_installed(Path::new("/libs/lib-2.0.so")).unwrap();
        forge.update_config(|c| c.set_verbose(false)).unwrap();

        let reloaded = ForgeConfig::load(&path).unwrap();
        assert_eq!(reloaded.lib_path(), Some(PathBuf::from("lib.so")));
        assert_eq!(reloaded.installed(), vec![PathBuf::from("/libs/lib-2.0.so")]);
        assert!(!reloaded.verbose());
        assert_eq!(forge.log_filter(), LevelFilter::WARN);
    }
}
