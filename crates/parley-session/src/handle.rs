//! Cancellation capability for one in-flight stream.

use tokio_util::sync::CancellationToken;

/// A cloneable handle bound to exactly one streaming request.
///
/// Cancelling is cooperative: the consumer observes the token at every
/// await point and before every callback, then drops the transport.
#[derive(Clone, Debug, Default)]
pub struct StreamHandle {
    cancel: CancellationToken,
}

impl StreamHandle {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Abort the stream. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether [`StreamHandle::cancel`] has been called
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Get the cancellation token (for callers that need to await it).
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}
