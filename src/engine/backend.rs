use std::error::Error;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub type EngineError = Box<dyn Error + Send + Sync>;

/// A loaded inference engine. Generation is synchronous and potentially very
/// slow; callers run it on a blocking task and bound it with a timeout.
pub trait InferenceEngine: Send {
    fn generate(&mut self, prompt: &str) -> Result<String, EngineError>;
}

/// Constructs an engine from a validated artifact path. Construction is
/// CPU/memory heavy and may take tens of seconds; the loader time-boxes it.
pub trait EngineFactory: Send + Sync + 'static {
    fn create(&self, model_path: &Path) -> Result<Box<dyn InferenceEngine>, EngineError>;
}

/// Handle to the in-memory engine. The loader owns the authoritative copy;
/// the executor clones it for the duration of exactly one call and must not
/// retain it afterwards. A detached timed-out call may briefly keep the engine
/// alive until it returns, which is the documented cost of cooperative
/// cancellation against an engine with no native cancel hook.
#[derive(Clone)]
pub struct ModelHandle {
    engine: Arc<Mutex<Box<dyn InferenceEngine>>>,
}

impl ModelHandle {
    pub fn new(engine: Box<dyn InferenceEngine>) -> Self {
        Self {
            engine: Arc::new(Mutex::new(engine)),
        }
    }

    pub(crate) fn engine(&self) -> Arc<Mutex<Box<dyn InferenceEngine>>> {
        Arc::clone(&self.engine)
    }
}

impl std::fmt::Debug for ModelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelHandle").finish_non_exhaustive()
    }
}
