use std::sync::Arc;

use log::{info, warn};

use crate::config::{ConfigKey, ConfigStore, JsonFileStore, ModelConfig};
use crate::engine::{infer, simulate, EngineFactory, InferenceRequest};
use crate::error::RewriteError;
use crate::models::events::{DownloadListener, LoadListener};
use crate::models::{DownloadManager, ModelLoader, ModelStatus, StorageGate};
use crate::prompt::TaskType;

/// What to do when loading or inference fails while a valid artifact exists.
/// Degradation to simulation output is always an explicit caller choice,
/// never something the executor decides on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FallbackPolicy {
    /// Surface load/inference errors to the caller.
    #[default]
    SurfaceErrors,
    /// Answer with marked simulation output instead of an error.
    DegradeToSimulation,
}

/// Top-level orchestration of one rewrite request: input validation, task
/// classification, artifact gate, single-flight load, bounded inference, and
/// the simulation fallback.
pub struct RewriteService {
    config: ModelConfig,
    gate: StorageGate,
    downloads: DownloadManager,
    loader: ModelLoader,
    settings: Arc<JsonFileStore>,
    policy: FallbackPolicy,
}

impl RewriteService {
    pub fn new(
        config: ModelConfig,
        factory: Arc<dyn EngineFactory>,
        settings: Arc<JsonFileStore>,
        policy: FallbackPolicy,
    ) -> Self {
        let gate = StorageGate::new(config.clone());
        let downloads = DownloadManager::new(config.clone(), Arc::clone(&settings));
        let loader = ModelLoader::new(config.clone(), factory);
        Self {
            config,
            gate,
            downloads,
            loader,
            settings,
            policy,
        }
    }

    pub fn set_load_listener(&self, listener: Arc<dyn LoadListener>) {
        self.loader.set_listener(listener);
    }

    /// Rewrite `input` according to `instruction`.
    ///
    /// Without a valid artifact the answer is deterministic simulation output
    /// carrying the demo marker. With one, the engine is loaded on first use
    /// and the generation call is bounded by the inference timeout.
    pub async fn rewrite(&self, input: &str, instruction: &str) -> Result<String, RewriteError> {
        self.validate_input(input)?;
        let task = TaskType::classify(instruction);

        if !self.gate.is_asset_valid() {
            info!("No valid model artifact, answering in simulation mode");
            return Ok(simulate(task, input));
        }

        let handle = match self.loader.ensure_loaded().await {
            Ok(handle) => handle,
            Err(err) => return self.degrade_or_fail(err, task, input),
        };

        let request = InferenceRequest::new(input, instruction, self.config.inference_timeout);
        match infer(&handle, &request).await {
            Ok(text) => Ok(text),
            Err(RewriteError::Cancelled) => Err(RewriteError::Cancelled),
            Err(err) => self.degrade_or_fail(err, task, input),
        }
    }

    fn degrade_or_fail(
        &self,
        err: RewriteError,
        task: TaskType,
        input: &str,
    ) -> Result<String, RewriteError> {
        match self.policy {
            FallbackPolicy::SurfaceErrors => Err(err),
            FallbackPolicy::DegradeToSimulation => {
                warn!("Degrading to simulation mode after failure: {}", err);
                Ok(simulate(task, input))
            }
        }
    }

    fn validate_input(&self, input: &str) -> Result<(), RewriteError> {
        if input.trim().is_empty() {
            return Err(RewriteError::InputInvalid(
                "Input text is empty".to_string(),
            ));
        }
        let chars = input.chars().count();
        if chars > self.config.max_input_chars {
            return Err(RewriteError::InputInvalid(format!(
                "Input too long: {} characters, maximum is {}",
                chars, self.config.max_input_chars
            )));
        }
        Ok(())
    }

    // ===== Model management passthrough for the host bridge =====

    pub fn is_model_ready(&self) -> bool {
        self.gate.is_asset_valid()
    }

    pub fn model_size_mb(&self) -> u64 {
        self.gate.model_size_mb()
    }

    pub fn status(&self) -> ModelStatus {
        ModelStatus {
            is_downloaded: self.gate.is_asset_valid(),
            is_downloading: self.downloads.is_downloading(),
            is_loaded: self.loader.is_loaded(),
            is_loading: self.loader.is_loading(),
            size_mb: self.gate.model_size_mb(),
        }
    }

    pub async fn download(&self, listener: &dyn DownloadListener) -> Result<(), RewriteError> {
        self.downloads.download(listener).await
    }

    pub fn cancel_download(&self) {
        self.downloads.cancel_download();
    }

    /// Pick up a freshly installed artifact without a process restart.
    pub fn reload_model(&self) {
        self.loader.reload();
    }

    pub fn close_model(&self) {
        self.loader.close();
    }

    /// User-initiated removal: releases the engine, deletes the artifact and
    /// clears the advisory hint.
    pub fn delete_model(&self) -> bool {
        self.loader.close();
        let deleted = self.gate.delete_asset();
        if let Err(e) = self.settings.delete(&ConfigKey::MODEL_DOWNLOADED) {
            warn!("Could not clear download hint: {}", e);
        }
        deleted
    }
}
