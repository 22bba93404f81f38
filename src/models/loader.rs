use std::sync::{Arc, Mutex};

use log::{debug, error, info};
use tokio::sync::watch;

use crate::config::ModelConfig;
use crate::engine::{EngineFactory, ModelHandle};
use crate::error::RewriteError;

use super::asset::StorageGate;
use super::events::{LoadEvent, LoadListener};

/// Terminal result of one load attempt, broadcast to every waiter of that
/// attempt.
#[derive(Clone)]
enum AttemptOutcome {
    Pending,
    Ready(ModelHandle),
    Error(RewriteError),
}

/// Closed state machine for the engine handle. `Loading` carries the channel
/// waiters subscribe to, so waking happens exactly on transition, never by
/// polling.
enum LoadState {
    Unloaded,
    Loading { rx: watch::Receiver<AttemptOutcome> },
    Loaded(ModelHandle),
    Failed(RewriteError),
}

struct LoaderInner {
    state: LoadState,
    /// Bumped on every new attempt and on close/reload, so a stale attempt
    /// finishing after a reset cannot commit its result.
    generation: u64,
}

/// Owns the in-memory engine handle and turns a validated artifact into a
/// ready handle at most once at a time. Concurrent callers share the single
/// in-flight attempt and all observe its outcome.
pub struct ModelLoader {
    config: ModelConfig,
    gate: StorageGate,
    factory: Arc<dyn EngineFactory>,
    inner: Arc<Mutex<LoaderInner>>,
    listener: Arc<Mutex<Option<Arc<dyn LoadListener>>>>,
}

impl ModelLoader {
    pub fn new(config: ModelConfig, factory: Arc<dyn EngineFactory>) -> Self {
        let gate = StorageGate::new(config.clone());
        Self {
            config,
            gate,
            factory,
            inner: Arc::new(Mutex::new(LoaderInner {
                state: LoadState::Unloaded,
                generation: 0,
            })),
            listener: Arc::new(Mutex::new(None)),
        }
    }

    pub fn set_listener(&self, listener: Arc<dyn LoadListener>) {
        *self.listener.lock().unwrap() = Some(listener);
    }

    /// Return the loaded handle, loading it first if necessary.
    ///
    /// Single-flight: if an attempt is already running, this call waits for
    /// its terminal outcome instead of starting a second construction. The
    /// attempt itself runs on a detached task, so it survives cancellation of
    /// any individual caller.
    pub async fn ensure_loaded(&self) -> Result<ModelHandle, RewriteError> {
        enum Plan {
            Ready(ModelHandle),
            Wait(watch::Receiver<AttemptOutcome>),
            Run {
                rx: watch::Receiver<AttemptOutcome>,
                tx: watch::Sender<AttemptOutcome>,
                generation: u64,
            },
        }

        let plan = {
            let mut inner = self.inner.lock().unwrap();
            match &inner.state {
                LoadState::Loaded(handle) => Plan::Ready(handle.clone()),
                LoadState::Loading { rx } => Plan::Wait(rx.clone()),
                LoadState::Unloaded | LoadState::Failed(_) => {
                    let (tx, rx) = watch::channel(AttemptOutcome::Pending);
                    inner.generation += 1;
                    inner.state = LoadState::Loading { rx: rx.clone() };
                    Plan::Run {
                        rx,
                        tx,
                        generation: inner.generation,
                    }
                }
            }
        };

        match plan {
            Plan::Ready(handle) => Ok(handle),
            Plan::Wait(rx) => Self::await_outcome(rx).await,
            Plan::Run { rx, tx, generation } => {
                tokio::spawn(Self::attempt(
                    self.config.clone(),
                    self.gate.clone(),
                    Arc::clone(&self.factory),
                    Arc::clone(&self.inner),
                    Arc::clone(&self.listener),
                    tx,
                    generation,
                ));
                Self::await_outcome(rx).await
            }
        }
    }

    /// Release the handle and reset to `Unloaded` so a freshly downloaded
    /// artifact is picked up on the next `ensure_loaded`. Clears any stored
    /// error. Idempotent.
    pub fn reload(&self) {
        info!("Resetting model loader for a fresh artifact");
        self.close();
    }

    /// Release the handle and reset to `Unloaded`. Idempotent. A load attempt
    /// still in flight keeps running detached; its result is discarded.
    pub fn close(&self) {
        let mut inner = self.inner.lock().unwrap();
        if matches!(inner.state, LoadState::Loaded(_)) {
            info!("Unloading model, memory released");
        }
        inner.generation += 1;
        inner.state = LoadState::Unloaded;
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, LoadState::Loaded(_))
    }

    pub fn is_loading(&self) -> bool {
        matches!(self.inner.lock().unwrap().state, LoadState::Loading { .. })
    }

    /// Error from the most recent failed attempt, if the loader is in the
    /// `Failed` state.
    pub fn last_error(&self) -> Option<RewriteError> {
        match &self.inner.lock().unwrap().state {
            LoadState::Failed(err) => Some(err.clone()),
            _ => None,
        }
    }

    async fn await_outcome(
        mut rx: watch::Receiver<AttemptOutcome>,
    ) -> Result<ModelHandle, RewriteError> {
        let outcome = match rx
            .wait_for(|outcome| !matches!(outcome, AttemptOutcome::Pending))
            .await
        {
            Ok(outcome) => outcome.clone(),
            // Sender dropped without a terminal outcome: the attempt task
            // itself panicked.
            Err(_) => AttemptOutcome::Error(RewriteError::LoadFailed(
                "load attempt was abandoned".to_string(),
            )),
        };
        match outcome {
            AttemptOutcome::Ready(handle) => Ok(handle),
            AttemptOutcome::Error(err) => Err(err),
            AttemptOutcome::Pending => unreachable!("wait_for filters pending"),
        }
    }

    async fn attempt(
        config: ModelConfig,
        gate: StorageGate,
        factory: Arc<dyn EngineFactory>,
        inner: Arc<Mutex<LoaderInner>>,
        listener: Arc<Mutex<Option<Arc<dyn LoadListener>>>>,
        tx: watch::Sender<AttemptOutcome>,
        generation: u64,
    ) {
        Self::emit(&listener, LoadEvent::Started);
        info!("Loading model from {:?}", config.model_path());

        let outcome = Self::construct(&config, &gate, factory).await;

        {
            let mut inner = inner.lock().unwrap();
            if inner.generation == generation {
                inner.state = match &outcome {
                    Ok(handle) => LoadState::Loaded(handle.clone()),
                    Err(err) => LoadState::Failed(err.clone()),
                };
            } else {
                debug!("Loader was reset mid-attempt, discarding stale result");
            }
        }

        match &outcome {
            Ok(_) => {
                info!("Model loaded successfully");
                Self::emit(&listener, LoadEvent::Complete);
            }
            Err(err) => {
                error!("Model load failed: {}", err);
                Self::emit(
                    &listener,
                    LoadEvent::Error {
                        message: err.user_message(),
                    },
                );
            }
        }

        let _ = tx.send(match outcome {
            Ok(handle) => AttemptOutcome::Ready(handle),
            Err(err) => AttemptOutcome::Error(err),
        });
    }

    async fn construct(
        config: &ModelConfig,
        gate: &StorageGate,
        factory: Arc<dyn EngineFactory>,
    ) -> Result<ModelHandle, RewriteError> {
        if !gate.has_sufficient_memory(config.required_memory_mb) {
            return Err(RewriteError::MemoryInsufficient {
                required_mb: config.required_memory_mb,
            });
        }

        let path = config.model_path();
        if !path.exists() {
            return Err(RewriteError::LoadFailed(format!(
                "Model file not found: {:?}",
                path
            )));
        }

        let construction = tokio::task::spawn_blocking(move || factory.create(&path));

        // The engine has no cancel hook: on timeout the construction keeps
        // running detached and its eventual result is dropped.
        match tokio::time::timeout(config.load_timeout, construction).await {
            Err(_) => Err(RewriteError::LoadTimeout(config.load_timeout)),
            Ok(Err(join_err)) => Err(RewriteError::LoadFailed(format!(
                "construction task panicked: {}",
                join_err
            ))),
            Ok(Ok(Err(engine_err))) => Err(RewriteError::LoadFailed(engine_err.to_string())),
            Ok(Ok(Ok(engine))) => Ok(ModelHandle::new(engine)),
        }
    }

    fn emit(listener: &Arc<Mutex<Option<Arc<dyn LoadListener>>>>, event: LoadEvent) {
        let listener = listener.lock().unwrap().clone();
        if let Some(listener) = listener {
            listener.on_event(event);
        }
    }
}
