use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use crate::artifact::{ArtifactSource, ResolvedArtifact};
use crate::backend::{ExecutionOutput, SandboxBackend, SandboxHandle};
use crate::errors::{BackendError, SessionError};

/// Upper bounds for each remote call a session makes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SessionTimeouts {
    pub create: Duration,
    /// Applies to fetching a URL artifact and to writing it into the sandbox.
    pub upload: Duration,
    pub execute: Duration,
    pub destroy: Duration,
}

impl Default for SessionTimeouts {
    fn default() -> Self {
        Self {
            create: Duration::from_secs(60),
            upload: Duration::from_secs(60),
            execute: Duration::from_secs(120),
            destroy: Duration::from_secs(15),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Uninitialized,
    Ready,
    Closed,
}

/// One sandbox, its staged artifacts, and its persistent interpreter state.
///
/// `close` must be awaited on every exit path. Dropping a session that still
/// holds a sandbox schedules a best-effort release on the current runtime.
pub struct ExecutionSession {
    backend: Arc<dyn SandboxBackend>,
    http: reqwest::Client,
    timeouts: SessionTimeouts,
    state: SessionState,
    handle: Option<Box<dyn SandboxHandle>>,
    uploaded: Vec<String>,
}

impl std::fmt::Debug for ExecutionSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionSession")
            .field("backend", &self.backend.name())
            .field("state", &self.state)
            .field("sandbox", &self.handle.as_ref().map(|handle| handle.id()))
            .field("uploaded", &self.uploaded)
            .finish()
    }
}

impl ExecutionSession {
    pub fn new(backend: Arc<dyn SandboxBackend>) -> Self {
        Self {
            backend,
            http: reqwest::Client::new(),
            timeouts: SessionTimeouts::default(),
            state: SessionState::Uninitialized,
            handle: None,
            uploaded: Vec::new(),
        }
    }

    pub fn with_timeouts(mut self, timeouts: SessionTimeouts) -> Self {
        self.timeouts = timeouts;
        self
    }

    pub fn with_http_client(mut self, http: reqwest::Client) -> Self {
        self.http = http;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// In-sandbox names of the artifacts staged so far.
    pub fn uploaded(&self) -> &[String] {
        &self.uploaded
    }

    /// Resolve every artifact, then allocate the sandbox and stage them.
    ///
    /// Artifact bytes are resolved before the sandbox is allocated. If any
    /// write fails the sandbox is released and the session stays unusable.
    pub async fn init(&mut self, files: &BTreeMap<String, String>) -> Result<(), SessionError> {
        self.ensure_uninitialized()?;
        let mut artifacts = Vec::with_capacity(files.len());
        for (name, source) in files {
            let artifact = ArtifactSource::parse(source)
                .resolve(name, &self.http, self.timeouts.upload)
                .await
                .map_err(|err| SessionError::Initialization(err.to_string()))?;
            artifacts.push(artifact);
        }
        self.init_with(artifacts).await
    }

    /// Allocate the sandbox and stage artifacts whose bytes are already in
    /// hand.
    pub async fn init_with(&mut self, artifacts: Vec<ResolvedArtifact>) -> Result<(), SessionError> {
        self.ensure_uninitialized()?;
        let handle = bounded(self.timeouts.create, "sandbox creation", self.backend.create())
            .await
            .map_err(|err| SessionError::Initialization(err.to_string()))?;
        let sandbox = handle.id().to_string();

        if let Err(err) = self.stage(handle.as_ref(), artifacts).await {
            tracing::warn!(%sandbox, error = %err, "artifact upload failed; releasing sandbox");
            self.uploaded.clear();
            release(handle, self.timeouts.destroy).await;
            return Err(SessionError::Initialization(err.to_string()));
        }

        tracing::info!(
            %sandbox,
            backend = self.backend.name(),
            files = self.uploaded.len(),
            "execution session ready"
        );
        self.handle = Some(handle);
        self.state = SessionState::Ready;
        Ok(())
    }

    fn ensure_uninitialized(&self) -> Result<(), SessionError> {
        match self.state {
            SessionState::Uninitialized => Ok(()),
            state => Err(SessionError::Initialization(format!("session is {state:?}"))),
        }
    }

    async fn stage(
        &mut self,
        handle: &dyn SandboxHandle,
        artifacts: Vec<ResolvedArtifact>,
    ) -> Result<(), BackendError> {
        for artifact in artifacts {
            bounded(
                self.timeouts.upload,
                "file upload",
                handle.write_file(&artifact.name, artifact.bytes),
            )
            .await?;
            self.uploaded.push(artifact.name);
        }
        Ok(())
    }

    /// Execute one snippet. Exceptions raised by the snippet come back as
    /// stderr lines; only transport failures are errors.
    pub async fn run(&mut self, code: &str) -> Result<ExecutionOutput, SessionError> {
        let handle = match (self.state, self.handle.as_ref()) {
            (SessionState::Ready, Some(handle)) => handle,
            _ => return Err(SessionError::NotInitialized),
        };
        tracing::debug!(sandbox = handle.id(), bytes = code.len(), "executing snippet");
        bounded(self.timeouts.execute, "execution", handle.run(code))
            .await
            .map_err(|err| SessionError::Execution(err.to_string()))
    }

    /// Release the sandbox. Closing twice, or without `init`, is a no-op.
    pub async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            let sandbox = handle.id().to_string();
            release(handle, self.timeouts.destroy).await;
            tracing::info!(%sandbox, "execution session closed");
        }
        self.state = SessionState::Closed;
    }
}

impl Drop for ExecutionSession {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        tracing::warn!(sandbox = handle.id(), "execution session dropped while open");
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let destroy_timeout = self.timeouts.destroy;
            runtime.spawn(release(handle, destroy_timeout));
        }
    }
}

async fn bounded<T>(
    limit: Duration,
    what: &str,
    call: impl Future<Output = Result<T, BackendError>>,
) -> Result<T, BackendError> {
    tokio::time::timeout(limit, call)
        .await
        .map_err(|_| BackendError::Transport(format!("{what} timed out after {limit:?}")))?
}

async fn release(handle: Box<dyn SandboxHandle>, limit: Duration) {
    if let Err(err) = bounded(limit, "sandbox release", handle.destroy()).await {
        tracing::warn!(sandbox = handle.id(), error = %err, "sandbox release failed");
    }
}
