use std::collections::HashMap;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use log::warn;
use serde::{de::DeserializeOwned, Serialize};

pub const MODEL_FILENAME: &str = "gemma-2b-it-cpu-int4.bin";
pub const MODEL_URL: &str =
    "https://huggingface.co/metsman/gemma-2b-it-cpu-int4-org/resolve/main/gemma-2b-it-cpu-int4.bin";

/// Expected uncorrupted size of the model artifact. Anything smaller on disk
/// is treated as a corrupt remnant.
pub const MIN_VALID_SIZE_BYTES: u64 = 1_300_000_000;
pub const REQUIRED_STORAGE_MB: u64 = 2000;
pub const REQUIRED_MEMORY_MB: u64 = 1000;
pub const MODEL_LOAD_TIMEOUT_SECS: u64 = 60;
pub const INFERENCE_TIMEOUT_SECS: u64 = 30;
pub const MAX_INPUT_CHARS: usize = 5000;

/// Static configuration for the single rewrite model managed by this crate.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    /// Directory holding the artifact and its temp file.
    pub model_dir: PathBuf,
    /// Artifact filename inside `model_dir`.
    pub model_filename: String,
    /// Download source URL.
    pub download_url: String,
    /// Artifacts below this size are considered corrupt.
    pub min_valid_size_bytes: u64,
    /// Free disk space required before starting a download.
    pub required_storage_mb: u64,
    /// Free memory required before loading the model.
    pub required_memory_mb: u64,
    pub load_timeout: Duration,
    pub inference_timeout: Duration,
    pub max_input_chars: usize,
}

impl ModelConfig {
    pub fn new(model_dir: impl Into<PathBuf>) -> Self {
        Self {
            model_dir: model_dir.into(),
            model_filename: MODEL_FILENAME.to_string(),
            download_url: MODEL_URL.to_string(),
            min_valid_size_bytes: MIN_VALID_SIZE_BYTES,
            required_storage_mb: REQUIRED_STORAGE_MB,
            required_memory_mb: REQUIRED_MEMORY_MB,
            load_timeout: Duration::from_secs(MODEL_LOAD_TIMEOUT_SECS),
            inference_timeout: Duration::from_secs(INFERENCE_TIMEOUT_SECS),
            max_input_chars: MAX_INPUT_CHARS,
        }
    }

    /// Final artifact path.
    pub fn model_path(&self) -> PathBuf {
        self.model_dir.join(&self.model_filename)
    }

    /// Temp path used while a download session is in flight.
    pub fn temp_path(&self) -> PathBuf {
        self.model_dir.join(format!("{}.tmp", self.model_filename))
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        let base = dirs::data_local_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("refine-local")
            .join("models");
        Self::new(base)
    }
}

/// Type-safe settings key that associates a key name with its value type.
#[derive(Debug, Clone, Copy)]
pub struct ConfigKey<T> {
    name: &'static str,
    _phantom: PhantomData<T>,
}

impl<T> ConfigKey<T> {
    const fn new(name: &'static str) -> Self {
        Self {
            name,
            _phantom: PhantomData,
        }
    }

    pub fn key_name(&self) -> &'static str {
        self.name
    }
}

impl ConfigKey<bool> {
    /// Advisory hint set on download completion. Never authoritative:
    /// readiness is always re-derived from the on-disk size check in
    /// `StorageGate`.
    pub const MODEL_DOWNLOADED: Self = Self::new("modelDownloaded");
}

pub trait ConfigStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T>;
    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), String>;
    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), String>;
}

/// JSON-file-backed settings store.
pub struct JsonFileStore {
    path: PathBuf,
    cache: Mutex<HashMap<String, serde_json::Value>>,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let cache = Self::load(&path);
        Self {
            path,
            cache: Mutex::new(cache),
        }
    }

    fn load(path: &Path) -> HashMap<String, serde_json::Value> {
        match std::fs::read_to_string(path) {
            Ok(contents) => serde_json::from_str(&contents).unwrap_or_else(|e| {
                warn!("Settings file {:?} is malformed, starting fresh: {}", path, e);
                HashMap::new()
            }),
            Err(_) => HashMap::new(),
        }
    }

    fn save(&self, cache: &HashMap<String, serde_json::Value>) -> Result<(), String> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| format!("Failed to create settings directory: {}", e))?;
        }
        let json = serde_json::to_string_pretty(cache).map_err(|e| e.to_string())?;
        std::fs::write(&self.path, json).map_err(|e| e.to_string())
    }
}

impl ConfigStore for JsonFileStore {
    fn get<T: DeserializeOwned>(&self, key: &ConfigKey<T>) -> Option<T> {
        self.cache
            .lock()
            .unwrap()
            .get(key.key_name())
            .and_then(|v| serde_json::from_value(v.clone()).ok())
    }

    fn set<T: Serialize>(&self, key: &ConfigKey<T>, value: T) -> Result<(), String> {
        let val = serde_json::to_value(value).map_err(|e| e.to_string())?;
        let mut cache = self.cache.lock().unwrap();
        cache.insert(key.key_name().to_string(), val);
        self.save(&cache)
    }

    fn delete<T>(&self, key: &ConfigKey<T>) -> Result<(), String> {
        let mut cache = self.cache.lock().unwrap();
        cache.remove(key.key_name());
        self.save(&cache)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn model_paths_derive_from_dir() {
        let config = ModelConfig::new("/tmp/models");
        assert_eq!(
            config.model_path(),
            PathBuf::from("/tmp/models").join(MODEL_FILENAME)
        );
        assert_eq!(
            config.temp_path(),
            PathBuf::from("/tmp/models").join(format!("{}.tmp", MODEL_FILENAME))
        );
    }

    #[test]
    fn store_roundtrips_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get(&ConfigKey::MODEL_DOWNLOADED), None);

        store.set(&ConfigKey::MODEL_DOWNLOADED, true).unwrap();
        assert_eq!(store.get(&ConfigKey::MODEL_DOWNLOADED), Some(true));

        // A fresh store reads the same file.
        let reopened = JsonFileStore::new(&path);
        assert_eq!(reopened.get(&ConfigKey::MODEL_DOWNLOADED), Some(true));

        reopened.delete(&ConfigKey::MODEL_DOWNLOADED).unwrap();
        assert_eq!(reopened.get(&ConfigKey::MODEL_DOWNLOADED), None);
    }

    #[test]
    fn malformed_settings_file_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "{not json").unwrap();

        let store = JsonFileStore::new(&path);
        assert_eq!(store.get(&ConfigKey::MODEL_DOWNLOADED), None);
        store.set(&ConfigKey::MODEL_DOWNLOADED, false).unwrap();
        assert_eq!(store.get(&ConfigKey::MODEL_DOWNLOADED), Some(false));
    }
}
