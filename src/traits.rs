//! Core Backend trait

use async_trait::async_trait;

use crate::error::BackendError;
use crate::types::{BackendOutput, Capabilities, FragmentStream, OperationRequest};

/// One interchangeable generative-AI backend.
///
/// Adapters translate an [`OperationRequest`] into a vendor call and report
/// failures as [`BackendError`]; the dispatcher handles retries, fallback,
/// caching and accounting around them.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Name for logging and metrics
    fn name(&self) -> &str;

    /// What can this backend do?
    fn capabilities(&self) -> Capabilities;

    /// Model used when the request does not name one.
    fn default_model(&self) -> Option<&str> {
        None
    }

    /// Whether the backend can take calls right now (credentials present,
    /// local runtime up, ...). Unavailable backends are skipped.
    fn is_available(&self) -> bool {
        true
    }

    async fn invoke(&self, request: &OperationRequest) -> Result<BackendOutput, BackendError>;

    /// Streaming variant; only called when
    /// [`Capabilities::supports_streaming`] is true for the operation.
    async fn invoke_stream(
        &self,
        request: &OperationRequest,
    ) -> Result<FragmentStream, BackendError> {
        Err(BackendError::Unsupported(format!(
            "{} does not stream {}",
            self.name(),
            request.operation
        )))
    }
}
