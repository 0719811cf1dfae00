use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::errors::BackendError;

/// Captured output of one snippet.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionOutput {
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
}

impl ExecutionOutput {
    /// True when stderr carries anything besides blank lines.
    pub fn has_errors(&self) -> bool {
        self.stderr.iter().any(|line| !line.trim().is_empty())
    }
}

/// Allocates sandboxes.
#[async_trait]
pub trait SandboxBackend: Send + Sync {
    fn name(&self) -> &str;

    async fn create(&self) -> Result<Box<dyn SandboxHandle>, BackendError>;
}

/// One live sandbox. Interpreter state persists across `run` calls.
#[async_trait]
pub trait SandboxHandle: Send + Sync {
    fn id(&self) -> &str;

    async fn write_file(&self, name: &str, bytes: Vec<u8>) -> Result<(), BackendError>;

    async fn run(&self, code: &str) -> Result<ExecutionOutput, BackendError>;

    async fn destroy(&self) -> Result<(), BackendError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_stderr_is_not_an_error() {
        let output = ExecutionOutput {
            stdout: vec!["1".into()],
            stderr: vec!["".into(), "   ".into()],
        };
        assert!(!output.has_errors());

        let output = ExecutionOutput {
            stdout: vec![],
            stderr: vec!["Traceback (most recent call last):".into()],
        };
        assert!(output.has_errors());
    }
}
