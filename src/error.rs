use std::time::Duration;

/// Errors surfaced by the model lifecycle and rewrite pipeline.
///
/// Storage/memory *query* failures are never represented here: the gate fails
/// open and logs instead. Only a confirmed-insufficient result becomes an error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RewriteError {
    #[error("Invalid input: {0}")]
    InputInvalid(String),
    #[error("Insufficient storage: {required_mb} MB required")]
    StorageInsufficient { required_mb: u64 },
    #[error("Insufficient memory: {required_mb} MB required")]
    MemoryInsufficient { required_mb: u64 },
    #[error("Download failed: {0}")]
    Network(String),
    #[error("Model file not found on server")]
    SourceNotFound,
    #[error("Access to model source denied")]
    SourceAccessDenied,
    #[error("Server error: {0}")]
    SourceServerError(u16),
    #[error("Downloaded file too small: {actual} bytes, expected at least {required}")]
    Integrity { actual: u64, required: u64 },
    #[error("Failed to save model file: {0}")]
    Save(String),
    #[error("A download is already in progress")]
    DownloadInProgress,
    #[error("Model loading timed out after {0:?}")]
    LoadTimeout(Duration),
    #[error("Failed to load model: {0}")]
    LoadFailed(String),
    #[error("Inference timed out after {0:?}")]
    InferenceTimeout(Duration),
    #[error("Inference failed: {0}")]
    InferenceFailed(String),
    #[error("Operation cancelled")]
    Cancelled,
}

impl RewriteError {
    /// Returns a user-friendly message suitable for display in the UI.
    pub fn user_message(&self) -> String {
        match self {
            RewriteError::InputInvalid(reason) => reason.clone(),
            RewriteError::StorageInsufficient { required_mb } => {
                format!("Not enough storage. Need {} MB free space.", required_mb)
            }
            RewriteError::MemoryInsufficient { required_mb } => format!(
                "Not enough memory ({} MB needed). Please close some apps and try again.",
                required_mb
            ),
            RewriteError::Network(cause) => format!("Download failed: {}", cause),
            RewriteError::SourceNotFound => {
                "Model file not found. Please check the download URL.".to_string()
            }
            RewriteError::SourceAccessDenied => {
                "Access denied. Repository may be private.".to_string()
            }
            RewriteError::SourceServerError(code) => format!("Server error: {}", code),
            RewriteError::Integrity { .. } => "Download incomplete. Please try again.".to_string(),
            RewriteError::Save(_) => "Failed to save model file".to_string(),
            RewriteError::DownloadInProgress => {
                "A download is already in progress.".to_string()
            }
            RewriteError::LoadTimeout(_) => {
                "Model loading timed out. Please try again.".to_string()
            }
            RewriteError::LoadFailed(msg) => format!("Model error: {}", msg),
            RewriteError::InferenceTimeout(_) => {
                "Response timed out. Please try again.".to_string()
            }
            RewriteError::InferenceFailed(msg) => format!("Inference failed: {}", msg),
            RewriteError::Cancelled => "Operation cancelled".to_string(),
        }
    }
}
