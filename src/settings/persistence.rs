// SPDX-License-Identifier: GPL-3.0-only

//! Settings persistence backends

use super::SettingsError;
use crate::constants::app_info;
use parking_lot::Mutex;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::debug;

/// Flat key to value snapshot
pub type SettingsMap = BTreeMap<String, Value>;

/// Storage medium for persisted settings
pub trait SettingsBackend: Send + Sync {
    /// Read all persisted values
    fn load(&self) -> Result<SettingsMap, SettingsError>;

    /// Replace the persisted values with `values`
    fn store(&self, values: &SettingsMap) -> Result<(), SettingsError>;
}

/// Backend that keeps the "persisted" copy in memory
#[derive(Debug, Default)]
pub struct MemoryBackend {
    values: Mutex<SettingsMap>,
    writes: AtomicUsize,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Backend pre-populated with `values`
    pub fn with_values(values: SettingsMap) -> Self {
        Self {
            values: Mutex::new(values),
            writes: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> SettingsMap {
        self.values.lock().clone()
    }

    /// Number of `store` calls so far
    pub fn writes(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

impl SettingsBackend for MemoryBackend {
    fn load(&self) -> Result<SettingsMap, SettingsError> {
        Ok(self.values.lock().clone())
    }

    fn store(&self, values: &SettingsMap) -> Result<(), SettingsError> {
        *self.values.lock() = values.clone();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

/// JSON file backend
///
/// Writes go to a sibling temp file that is then renamed over the target,
/// so a crash mid-write never leaves a truncated settings file.
#[derive(Debug, Clone)]
pub struct JsonFileBackend {
    path: PathBuf,
}

impl JsonFileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Default settings file location
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(app_info::CONFIG_DIR).join(app_info::SETTINGS_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self, source: std::io::Error) -> SettingsError {
        SettingsError::Io {
            path: self.path.clone(),
            source,
        }
    }
}

impl SettingsBackend for JsonFileBackend {
    fn load(&self) -> Result<SettingsMap, SettingsError> {
        match std::fs::read_to_string(&self.path) {
            Ok(text) => Ok(serde_json::from_str(&text)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(SettingsMap::new()),
            Err(e) => Err(self.io_error(e)),
        }
    }

    fn store(&self, values: &SettingsMap) -> Result<(), SettingsError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| self.io_error(e))?;
        }
        let json = serde_json::to_string_pretty(values)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|e| self.io_error(e))?;
        std::fs::rename(&tmp, &self.path).map_err(|e| self.io_error(e))?;
        debug!(path = %self.path.display(), count = values.len(), "Settings persisted");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_backend_missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested").join("settings.json"));
        assert!(backend.load().unwrap().is_empty());
    }

    #[test]
    fn test_json_backend_store_creates_parent() {
        let dir = tempfile::tempdir().unwrap();
        let backend = JsonFileBackend::new(dir.path().join("nested").join("settings.json"));
        let mut values = SettingsMap::new();
        values.insert("camera.zoom".into(), Value::from(2.0));

        backend.store(&values).unwrap();
        assert_eq!(backend.load().unwrap(), values);
        assert!(!backend.path().with_extension("json.tmp").exists());
    }

    #[test]
    fn test_json_backend_corrupt_file_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{ not json").unwrap();
        let backend = JsonFileBackend::new(path);
        assert!(matches!(backend.load(), Err(SettingsError::Serialize(_))));
    }
}
