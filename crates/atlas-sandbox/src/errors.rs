use thiserror::Error;

/// Failures talking to a sandbox backend.
#[derive(Debug, Error)]
pub enum BackendError {
    #[error("sandbox api returned {status}: {message}")]
    Http { status: u16, message: String },
    #[error("sandbox transport error: {0}")]
    Transport(String),
    #[error("sandbox protocol error: {0}")]
    Protocol(String),
    #[error("artifact '{name}' could not be resolved: {reason}")]
    Artifact { name: String, reason: String },
}

impl From<reqwest::Error> for BackendError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status) => BackendError::Http {
                status: status.as_u16(),
                message: err.to_string(),
            },
            None => BackendError::Transport(err.to_string()),
        }
    }
}

/// Session-level failures. Errors raised by the executed code itself are
/// never reported here; they come back as stderr lines.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session initialization failed: {0}")]
    Initialization(String),
    #[error("session is not initialized")]
    NotInitialized,
    #[error("execution failed: {0}")]
    Execution(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
}
