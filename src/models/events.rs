//! Download and load state events, serialized as tagged unions so a host
//! bridge can forward them to a UI without reshaping.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Single event stream for one download session. Each session delivers any
/// number of `Progress` events followed by exactly one terminal event;
/// cancellation delivers no terminal event at all.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum DownloadEvent {
    #[serde(rename_all = "camelCase")]
    Progress {
        bytes_downloaded: u64,
        total_bytes: Option<u64>,
        /// Whole percent, -1 when the total size is unknown.
        percent: i32,
    },
    #[serde(rename_all = "camelCase")]
    Complete { file_path: PathBuf },
    Error { message: String },
}

/// State stream for one load attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "camelCase")]
pub enum LoadEvent {
    Started,
    Complete,
    Error { message: String },
}

pub trait DownloadListener: Send + Sync {
    fn on_event(&self, event: DownloadEvent);
}

impl<F> DownloadListener for F
where
    F: Fn(DownloadEvent) + Send + Sync,
{
    fn on_event(&self, event: DownloadEvent) {
        self(event)
    }
}

pub trait LoadListener: Send + Sync {
    fn on_event(&self, event: LoadEvent);
}

impl<F> LoadListener for F
where
    F: Fn(LoadEvent) + Send + Sync,
{
    fn on_event(&self, event: LoadEvent) {
        self(event)
    }
}
