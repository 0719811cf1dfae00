//! Remote execution sessions.
//!
//! An [`ExecutionSession`] owns one sandbox allocated through a
//! [`SandboxBackend`], stages input artifacts into it once, runs any number
//! of snippets against the same interpreter state, and releases it on close.

pub mod artifact;
pub mod backend;
pub mod e2b;
pub mod errors;
pub mod session;

pub use artifact::{ArtifactSource, ResolvedArtifact};
pub use backend::{ExecutionOutput, SandboxBackend, SandboxHandle};
pub use e2b::{E2bBackend, E2bConfig};
pub use errors::{BackendError, SessionError};
pub use session::{ExecutionSession, SessionState, SessionTimeouts};
