//! Provider adapter contract.

use async_trait::async_trait;

use crate::errors::SDKError;
use crate::stream::StreamEventStream;
use crate::types::{Request, Response};

/// A generation service that can answer a request in one shot or as a stream.
///
/// Implementations must end every successful stream with a single
/// `Finish` event whose `response` holds the finalized turn.
#[async_trait]
pub trait ProviderAdapter: Send + Sync {
    fn name(&self) -> &str;

    async fn complete(&self, request: Request) -> Result<Response, SDKError>;

    async fn stream(&self, request: Request) -> Result<StreamEventStream, SDKError>;

    fn supports_builtin_tool(&self, _tag: &str) -> bool {
        false
    }
}
