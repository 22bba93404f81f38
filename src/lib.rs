//! Local model lifecycle and on-device rewrite engine.
//!
//! Manages a single large model artifact: downloading it with progress and
//! cancellation, validating its integrity, loading it into an inference
//! engine exactly once at a time, running bounded-time generation calls, and
//! degrading to a deterministic, clearly-marked simulation mode whenever the
//! artifact or engine is unavailable.
//!
//! The inference engine itself is a trait seam ([`engine::EngineFactory`] /
//! [`engine::InferenceEngine`]): the crate orchestrates around it but does
//! not prescribe a backend.

pub mod config;
pub mod engine;
pub mod error;
pub mod models;
pub mod prompt;
pub mod service;

pub use config::{ConfigKey, ConfigStore, JsonFileStore, ModelConfig};
pub use engine::{
    clean_model_output, simulate, EngineError, EngineFactory, InferenceEngine, InferenceRequest,
    ModelHandle, DEMO_MARKER,
};
pub use error::RewriteError;
pub use models::events::{DownloadEvent, DownloadListener, LoadEvent, LoadListener};
pub use models::{DownloadManager, ModelLoader, ModelStatus, StorageGate};
pub use prompt::{build_prompt, TaskType};
pub use service::{FallbackPolicy, RewriteService};
