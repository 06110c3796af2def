//! Key/value configuration file.
//!
//! The format is one `key = value` per line. Keys and values are trimmed,
//! the value is everything after the first `=`, and lines starting with `#`
//! are comments. Lines without a key are skipped with a warning. Files are
//! written back as `key\t=\tvalue` in key order.
//!
//! | Key | Type | Meaning |
//! |-----|------|---------|
//! | `verbose` | bool | Debug-level logging (default true) |
//! | `libPath` | path | Active library archive |
//! | `installed-<n>` | path | Installed library archives |
//! | `winX`, `winY`, `winWidth`, `winHeight` | int | Host window geometry |
//!
//! Unknown keys round-trip untouched.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use winnow::Parser;
use winnow::error::ContextError;
use winnow::token::{rest, take_till};

type WResult<T> = std::result::Result<T, ContextError>;

/// `verbose` key.
pub const VERBOSE: &str = "verbose";
/// `libPath` key.
pub const LIB_PATH: &str = "libPath";
/// Prefix of the `installed-<n>` keys.
pub const INSTALLED_PREFIX: &str = "installed-";
const WIN_X: &str = "winX";
const WIN_Y: &str = "winY";
const WIN_WIDTH: &str = "winWidth";
const WIN_HEIGHT: &str = "winHeight";

/// Parse `key = value`.
fn entry<'a>(input: &mut &'a str) -> WResult<(&'a str, &'a str)> {
    let (key, _, value): (&str, char, &str) = (take_till(1.., '='), '=', rest).parse_next(input)?;
    Ok((key.trim(), value.trim()))
}

/// Saved host window position and size.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowGeometry {
    /// Left edge.
    pub x: i32,
    /// Top edge.
    pub y: i32,
    /// Width.
    pub width: i32,
    /// Height.
    pub height: i32,
}

/// Parsed configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ForgeConfig {
    entries: BTreeMap<String, String>,
}

impl ForgeConfig {
    /// Empty configuration.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse configuration text. Malformed lines are skipped.
    pub fn parse(text: &str) -> Self {
        let mut entries = BTreeMap::new();
        for (number, line) in text.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            match entry.parse(line) {
                Ok((key, value)) if !key.is_empty() => {
                    entries.insert(key.to_string(), value.to_string());
                }
                Ok(_) => tracing::warn!(line = number + 1, "skipping config line with empty key"),
                Err(e) => tracing::warn!(line = number + 1, error = %e, "skipping malformed config line"),
            }
        }
        Self { entries }
    }

    /// Read a config file. A missing file yields an empty configuration.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(Self::parse(&text)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(Error::Io(e)),
        }
    }

    /// Write the configuration, creating parent directories as needed.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, self.to_string())?;
        tracing::debug!(path = %path.display(), entries = self.entries.len(), "saved config");
        Ok(())
    }

    /// Raw value of `key`.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Set a raw value.
    ///
    /// Fails if the pair could not be read back: an empty key, a key with
    /// `=`, or a line break in either part.
    pub fn set(&mut self, key: &str, value: impl Into<String>) -> Result<()> {
        let key = key.trim();
        let value = value.into();
        if key.is_empty() || key.contains('=') || key.starts_with('#') {
            return Err(Error::Config(format!("invalid key '{key}'")));
        }
        if key.contains(['\n', '\r']) || value.contains(['\n', '\r']) {
            return Err(Error::Config(format!("line break in value of '{key}'")));
        }
        self.entries.insert(key.to_string(), value.trim().to_string());
        Ok(())
    }

    /// Remove `key`.
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }

    /// Debug logging flag; true unless set to something other than `true`.
    pub fn verbose(&self) -> bool {
        self.get(VERBOSE)
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(true)
    }

    /// Set the debug logging flag.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.entries.insert(VERBOSE.to_string(), verbose.to_string());
    }

    /// Active library archive.
    pub fn lib_path(&self) -> Option<PathBuf> {
        self.get(LIB_PATH)
            .filter(|v| !v.is_empty())
            .map(PathBuf::from)
    }

    /// Record the active library archive.
    pub fn set_lib_path(&mut self, path: &Path) -> Result<()> {
        self.set(LIB_PATH, path.display().to_string())
    }

    fn installed_entries(&self) -> Vec<(u32, &str)> {
        let mut installed: Vec<_> = self
            .entries
            .iter()
            .filter_map(|(k, v)| {
                let n = k.strip_prefix(INSTALLED_PREFIX)?.parse::<u32>().ok()?;
                Some((n, v.as_str()))
            })
            .collect();
        installed.sort_by_key(|(n, _)| *n);
        installed
    }

    /// Installed library archives, in installation order.
    pub fn installed(&self) -> Vec<PathBuf> {
        self.installed_entries()
            .into_iter()
            .map(|(_, v)| PathBuf::from(v))
            .collect()
    }

    /// Add an installed archive. Returns its index; an archive that is
    /// already listed keeps its index.
    pub fn add_installed(&mut self, path: &Path) -> Result<u32> {
        let text = path.display().to_string();
        let installed = self.installed_entries();
        if let Some((n, _)) = installed.iter().find(|(_, v)| *v == text) {
            return Ok(*n);
        }
        let next = installed.last().map(|(n, _)| n + 1).unwrap_or(0);
        self.set(&format!("{INSTALLED_PREFIX}{next}"), text)?;
        Ok(next)
    }

    /// Remove an installed archive. Returns false if it was not listed.
    pub fn remove_installed(&mut self, path: &Path) -> bool {
        let text = path.display().to_string();
        let keys: Vec<String> = self
            .installed_entries()
            .into_iter()
            .filter(|(_, v)| *v == text)
            .map(|(n, _)| format!("{INSTALLED_PREFIX}{n}"))
            .collect();
        for key in &keys {
            self.entries.remove(key);
        }
        !keys.is_empty()
    }

    /// Saved window geometry, if all four keys are present and numeric.
    pub fn window(&self) -> Option<WindowGeometry> {
        let int = |key: &str| self.get(key)?.parse::<i32>().ok();
        Some(WindowGeometry {
            x: int(WIN_X)?,
            y: int(WIN_Y)?,
            width: int(WIN_WIDTH)?,
            height: int(WIN_HEIGHT)?,
        })
    }

    /// Save window geometry.
    pub fn set_window(&mut self, geometry: WindowGeometry) {
        for (key, value) in [
            (WIN_X, geometry.x),
            (WIN_Y, geometry.y),
            (WIN_WIDTH, geometry.width),
            (WIN_HEIGHT, geometry.height),
        ] {
            self.entries.insert(key.to_string(), value.to_string());
        }
    }
}

impl fmt::Display for ForgeConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (key, value) in &self.entries {
            writeln!(f, "{key}\t=\t{value}")?;
        }
        Ok(())
    }
}
