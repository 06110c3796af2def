//! Where archives and their native libraries live on disk.

use std::env::consts::{DLL_EXTENSION, DLL_PREFIX, DLL_SUFFIX};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

type NamingFn = Arc<dyn Fn(&Path) -> Option<String> + Send + Sync>;

/// Maps an archive to the native library it needs.
#[derive(Clone)]
pub struct LibraryLayout {
    native_dir: PathBuf,
    naming: NamingFn,
}

impl LibraryLayout {
    /// Layout with native libraries in `native_dir`, named by
    /// [`default_native_name`].
    pub fn new(native_dir: impl Into<PathBuf>) -> Self {
        Self {
            native_dir: native_dir.into(),
            naming: Arc::new(default_native_name),
        }
    }

    /// Replace the naming transform.
    pub fn with_naming<F>(mut self, naming: F) -> Self
    where
        F: Fn(&Path) -> Option<String> + Send + Sync + 'static,
    {
        self.naming = Arc::new(naming);
        self
    }

    /// Directory holding native libraries.
    pub fn native_dir(&self) -> &Path {
        &self.native_dir
    }

    /// Native library path for `archive`, if the transform yields one.
    pub fn native_library_for(&self, archive: &Path) -> Option<PathBuf> {
        (self.naming)(archive).map(|name| self.native_dir.join(name))
    }
}

impl fmt::Debug for LibraryLayout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LibraryLayout")
            .field("native_dir", &self.native_dir)
            .finish_non_exhaustive()
    }
}

/// `<name>-<version>.<ext>` becomes
/// `<DLL_PREFIX><name>_native<version without dots><DLL_SUFFIX>`.
///
/// `imgops-2.4.9.so` maps to `libimgops_native249.so` on Linux.
pub fn default_native_name(archive: &Path) -> Option<String> {
    let stem = archive.file_stem()?.to_str()?;
    let (name, version) = stem.rsplit_once('-')?;
    let name = name.strip_prefix(DLL_PREFIX).unwrap_or(name);
    if name.is_empty() || version.is_empty() {
        return None;
    }
    let version: String = version.chars().filter(|c| *c != '.').collect();
    Some(format!("{DLL_PREFIX}{name}_native{version}{DLL_SUFFIX}"))
}

fn is_library(path: &Path) -> bool {
    path.is_file() && path.extension().and_then(|e| e.to_str()) == Some(DLL_EXTENSION)
}

fn is_shard(path: &Path) -> bool {
    path.file_stem()
        .and_then(|s| s.to_str())
        .is_some_and(|stem| stem.ends_with(".shard"))
}

fn sorted_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> io::Result<Vec<PathBuf>> {
    let mut found: Vec<PathBuf> = std::fs::read_dir(dir)?
        .flatten()
        .map(|entry| entry.path())
        .filter(|path| is_library(path) && keep(path))
        .collect();
    found.sort();
    Ok(found)
}

/// Installed library archives in `dir` whose file name contains `filter`.
/// Shards are excluded.
pub fn discover_archives(dir: impl AsRef<Path>, filter: &str) -> io::Result<Vec<PathBuf>> {
    sorted_files(dir.as_ref(), |path| {
        !is_shard(path)
            && path
                .file_name()
                .and_then(|n| n.to_str())
                .is_some_and(|n| n.contains(filter))
    })
}

/// Extension archives (`*.shard.<ext>`) in `dir`, sorted by path.
pub fn discover_shards(dir: impl AsRef<Path>) -> io::Result<Vec<PathBuf>> {
    sorted_files(dir.as_ref(), is_shard)
}
