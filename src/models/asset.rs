use std::path::PathBuf;

use log::{debug, info, warn};
use sysinfo::Disks;

use crate::config::ModelConfig;

/// Answers whether a valid artifact is present and whether enough storage or
/// memory exists to proceed. Pure queries: resource checks fail open, so a
/// broken system probe never blocks the user, only a confirmed shortfall does.
#[derive(Debug, Clone)]
pub struct StorageGate {
    config: ModelConfig,
}

impl StorageGate {
    pub fn new(config: ModelConfig) -> Self {
        Self { config }
    }

    pub fn model_path(&self) -> PathBuf {
        self.config.model_path()
    }

    /// True iff the artifact exists and is at least the expected size.
    /// Anything smaller is a corrupt remnant and counts as absent.
    pub fn is_asset_valid(&self) -> bool {
        let path = self.config.model_path();
        match std::fs::metadata(&path) {
            Ok(meta) => {
                let valid = meta.len() >= self.config.min_valid_size_bytes;
                if !valid {
                    warn!(
                        "Model file exists but is too small ({} bytes). May be corrupted.",
                        meta.len()
                    );
                }
                valid
            }
            Err(_) => false,
        }
    }

    /// On-disk size of the artifact in MB, 0 when absent.
    pub fn model_size_mb(&self) -> u64 {
        std::fs::metadata(self.config.model_path())
            .map(|m| m.len() / (1024 * 1024))
            .unwrap_or(0)
    }

    /// Free space check on the volume holding the model directory.
    pub fn has_sufficient_storage(&self, required_mb: u64) -> bool {
        let disks = Disks::new_with_refreshed_list();
        let model_dir = self.config.model_dir.clone();

        // Longest mount point that prefixes the model dir wins.
        let available = disks
            .iter()
            .filter(|d| model_dir.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .map(|d| d.available_space());

        match available {
            Some(bytes) => {
                let available_mb = bytes / (1024 * 1024);
                debug!(
                    "Available storage: {} MB, required: {} MB",
                    available_mb, required_mb
                );
                available_mb >= required_mb
            }
            None => {
                warn!(
                    "Could not determine free space for {:?}, assuming sufficient",
                    model_dir
                );
                true
            }
        }
    }

    /// Free memory check, used only before loading the model into RAM.
    pub fn has_sufficient_memory(&self, required_mb: u64) -> bool {
        let mut sys = sysinfo::System::new();
        sys.refresh_memory();
        let available_mb = sys.available_memory() / (1024 * 1024);

        if available_mb == 0 {
            warn!("Could not determine available memory, assuming sufficient");
            return true;
        }

        debug!(
            "Available memory: {} MB, required: {} MB",
            available_mb, required_mb
        );
        available_mb >= required_mb
    }

    /// Delete the artifact, if present. Returns whether a file was removed.
    pub fn delete_asset(&self) -> bool {
        let path = self.config.model_path();
        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!("Model file deleted: {:?}", path);
                true
            }
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gate_with_threshold(dir: &std::path::Path, threshold: u64) -> StorageGate {
        let mut config = ModelConfig::new(dir);
        config.min_valid_size_bytes = threshold;
        StorageGate::new(config)
    }

    #[test]
    fn missing_artifact_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_threshold(dir.path(), 100);
        assert!(!gate.is_asset_valid());
        assert_eq!(gate.model_size_mb(), 0);
    }

    #[test]
    fn undersized_artifact_is_invalid() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_threshold(dir.path(), 100);
        std::fs::write(gate.model_path(), vec![0u8; 99]).unwrap();
        assert!(!gate.is_asset_valid());
    }

    #[test]
    fn artifact_at_threshold_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_threshold(dir.path(), 100);
        std::fs::write(gate.model_path(), vec![0u8; 100]).unwrap();
        assert!(gate.is_asset_valid());
    }

    #[test]
    fn delete_asset_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_threshold(dir.path(), 10);
        std::fs::write(gate.model_path(), b"0123456789").unwrap();
        assert!(gate.delete_asset());
        assert!(!gate.model_path().exists());
        // Idempotent on a missing file.
        assert!(!gate.delete_asset());
    }

    #[test]
    fn zero_requirements_always_pass() {
        let dir = tempfile::tempdir().unwrap();
        let gate = gate_with_threshold(dir.path(), 10);
        assert!(gate.has_sufficient_storage(0));
        assert!(gate.has_sufficient_memory(0));
    }
}
