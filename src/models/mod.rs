mod asset;
mod download;
pub mod events;
mod loader;

pub use asset::StorageGate;
pub use download::DownloadManager;
pub use loader::ModelLoader;

use serde::{Deserialize, Serialize};

/// Runtime status snapshot of the single managed model - computed, not stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelStatus {
    /// Does a valid artifact exist on disk? Derived from the size check,
    /// never from the advisory settings hint.
    pub is_downloaded: bool,
    /// Is a download session currently active?
    pub is_downloading: bool,
    /// Is the engine loaded in memory?
    pub is_loaded: bool,
    /// Is a load attempt in flight?
    pub is_loading: bool,
    /// On-disk artifact size in MB, 0 when absent.
    pub size_mb: u64,
}
