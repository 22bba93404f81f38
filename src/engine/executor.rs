use std::time::Duration;

use log::{info, warn};
use tokio_util::sync::CancellationToken;

use crate::error::RewriteError;
use crate::prompt::{build_prompt, TaskType};

use super::backend::ModelHandle;
use super::sanitize::clean_model_output;

/// One rewrite request against a loaded engine. Ephemeral, never persisted.
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    pub input: String,
    pub instruction: String,
    pub prompt: String,
    pub task: TaskType,
    pub deadline: Duration,
    pub cancel: CancellationToken,
}

impl InferenceRequest {
    pub fn new(input: &str, instruction: &str, deadline: Duration) -> Self {
        Self {
            input: input.to_string(),
            instruction: instruction.to_string(),
            prompt: build_prompt(input, instruction),
            task: TaskType::classify(instruction),
            deadline,
            cancel: CancellationToken::new(),
        }
    }
}

/// Run one generation call against a loaded handle, bounded by the request
/// deadline and its cancellation token.
///
/// The engine offers no native cancel hook, so a timed-out or cancelled call
/// is detached: we stop waiting and discard whatever it eventually produces.
pub async fn infer(handle: &ModelHandle, request: &InferenceRequest) -> Result<String, RewriteError> {
    if request.cancel.is_cancelled() {
        return Err(RewriteError::Cancelled);
    }

    let engine = handle.engine();
    let prompt = request.prompt.clone();
    let generation = tokio::task::spawn_blocking(move || {
        let mut engine = engine.lock().unwrap();
        engine.generate(&prompt)
    });

    let raw = tokio::select! {
        _ = request.cancel.cancelled() => {
            info!("Inference cancelled, abandoning generation call");
            return Err(RewriteError::Cancelled);
        }
        outcome = tokio::time::timeout(request.deadline, generation) => match outcome {
            Err(_) => {
                warn!(
                    "Inference exceeded {:?} deadline, abandoning generation call",
                    request.deadline
                );
                return Err(RewriteError::InferenceTimeout(request.deadline));
            }
            Ok(Err(join_err)) => {
                return Err(RewriteError::InferenceFailed(format!(
                    "generation task panicked: {}",
                    join_err
                )));
            }
            Ok(Ok(Err(engine_err))) => {
                return Err(RewriteError::InferenceFailed(engine_err.to_string()));
            }
            Ok(Ok(Ok(raw))) => raw,
        },
    };

    let cleaned = clean_model_output(&raw);
    if cleaned.is_empty() {
        return Err(RewriteError::InferenceFailed(
            "Empty response from model".to_string(),
        ));
    }
    Ok(cleaned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::backend::{EngineError, InferenceEngine};

    struct ScriptedEngine {
        output: Result<String, String>,
        delay: Duration,
    }

    impl InferenceEngine for ScriptedEngine {
        fn generate(&mut self, _prompt: &str) -> Result<String, EngineError> {
            if !self.delay.is_zero() {
                std::thread::sleep(self.delay);
            }
            self.output.clone().map_err(EngineError::from)
        }
    }

    fn handle_with(output: Result<String, String>, delay: Duration) -> ModelHandle {
        ModelHandle::new(Box::new(ScriptedEngine { output, delay }))
    }

    fn request(deadline: Duration) -> InferenceRequest {
        InferenceRequest::new("hello", "make it formal", deadline)
    }

    #[tokio::test]
    async fn success_is_sanitized() {
        let handle = handle_with(
            Ok("Sure! Here's the result: Hello there.<end_of_turn>".to_string()),
            Duration::ZERO,
        );
        let out = infer(&handle, &request(Duration::from_secs(5))).await.unwrap();
        assert_eq!(out, "Hello there.");
    }

    #[tokio::test]
    async fn empty_output_is_an_engine_failure() {
        let handle = handle_with(Ok("<end_of_turn>".to_string()), Duration::ZERO);
        let err = infer(&handle, &request(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RewriteError::InferenceFailed("Empty response from model".to_string())
        );
    }

    #[tokio::test]
    async fn engine_error_surfaces_with_message() {
        let handle = handle_with(Err("backend exploded".to_string()), Duration::ZERO);
        let err = infer(&handle, &request(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            RewriteError::InferenceFailed("backend exploded".to_string())
        );
    }

    #[tokio::test]
    async fn slow_generation_times_out() {
        let handle = handle_with(
            Ok("too late".to_string()),
            Duration::from_millis(400),
        );
        let err = infer(&handle, &request(Duration::from_millis(50)))
            .await
            .unwrap_err();
        assert_eq!(err, RewriteError::InferenceTimeout(Duration::from_millis(50)));
    }

    #[tokio::test]
    async fn pre_cancelled_request_never_runs() {
        let handle = handle_with(Ok("never used".to_string()), Duration::ZERO);
        let req = request(Duration::from_secs(5));
        req.cancel.cancel();
        let err = infer(&handle, &req).await.unwrap_err();
        assert_eq!(err, RewriteError::Cancelled);
    }
}
