mod backend;
mod executor;
mod sanitize;
mod simulator;

pub use backend::{EngineError, EngineFactory, InferenceEngine, ModelHandle};
pub use executor::{infer, InferenceRequest};
pub use sanitize::clean_model_output;
pub use simulator::{simulate, DEMO_MARKER};
