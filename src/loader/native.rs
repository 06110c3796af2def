//! Native library loading.
//!
//! Native libraries back the archives' foreign entry points. Loading one is a
//! process-lifetime commitment: the handle is leaked and never closed, and
//! loading the same path again is a no-op.

use crate::error::LoadError;
use indexmap::IndexSet;
use libloading::Library;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, OnceLock};

static NATIVE_LIBRARIES: OnceLock<Mutex<IndexSet<PathBuf>>> = OnceLock::new();

fn registry() -> &'static Mutex<IndexSet<PathBuf>> {
    NATIVE_LIBRARIES.get_or_init(|| Mutex::new(IndexSet::new()))
}

/// Load a native library into the process.
///
/// Returns `true` if the library was loaded by this call and `false` if it
/// was already loaded.
///
/// # Safety
///
/// Loading a native library runs its initializers. The library must be
/// trusted and compatible with the running process.
pub unsafe fn load_native_library(path: impl AsRef<Path>) -> Result<bool, LoadError> {
    let path = path.as_ref();
    let key = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let mut loaded = registry().lock().unwrap_or_else(|e| e.into_inner());
    if loaded.contains(&key) {
        tracing::debug!(library = %key.display(), "native library already loaded");
        return Ok(false);
    }

    // SAFETY: Caller guarantees the library is trusted.
    let library = unsafe { open_global(path) }.map_err(|e| LoadError::Native {
        path: path.to_path_buf(),
        reason: e.to_string(),
    })?;
    std::mem::forget(library);

    tracing::info!(library = %key.display(), "loaded native library");
    loaded.insert(key);
    Ok(true)
}

/// Every native library loaded so far, in load order.
pub fn loaded_native_libraries() -> Vec<PathBuf> {
    registry()
        .lock()
        .unwrap_or_else(|e| e.into_inner())
        .iter()
        .cloned()
        .collect()
}

#[cfg(unix)]
unsafe fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    use libloading::os::unix::{Library as UnixLibrary, RTLD_GLOBAL, RTLD_NOW};
    // SAFETY: Caller guarantees the library is trusted.
    unsafe { UnixLibrary::open(Some(path), RTLD_NOW | RTLD_GLOBAL) }.map(Library::from)
}

#[cfg(not(unix))]
unsafe fn open_global(path: &Path) -> Result<Library, libloading::Error> {
    // SAFETY: Caller guarantees the library is trusted.
    unsafe { Library::new(path) }
}
