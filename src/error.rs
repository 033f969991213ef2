use std::time::Instant;

use futures::channel::mpsc::SendError;
use futures::channel::oneshot::Canceled;
use thiserror::Error;

use crate::ids::{DocumentId, FrameId};

/// The text fragment a real execution-context backend is expected to raise
/// when a context dies. [`RerunnableTask`](crate::frame::rerunnable::RerunnableTask)
/// matches on these substrings to decide whether to swallow the error and
/// wait for the next context instead of failing the caller.
pub const CONTEXT_DESTROYED_TEXT: &str = "Execution context was destroyed";
/// Legacy wording for the same condition, also absorbed.
pub const CONTEXT_NOT_FOUND_TEXT: &str = "Cannot find context with specified id";

/// Error taxonomy for the frame coordination core (spec §7).
#[derive(Debug, Error)]
pub enum CoreError {
    /// A `ProgressController` deadline elapsed before the operation settled.
    #[error("Timeout {0}ms exceeded")]
    Timeout(u64),

    /// A request carrying the frame's `pendingDocumentId` failed.
    #[error("{0}")]
    Navigation(String),

    /// `waitForSpecificDocument` observed a different document id commit
    /// first.
    #[error("navigation interrupted by another one")]
    NavigationInterrupted,

    /// The frame detached while an operation held a reference to it.
    #[error("frame '{0}' was detached")]
    FrameDetached(FrameId),

    /// The browser transport disconnected.
    #[error("page disconnected")]
    PageDisconnected,

    /// Absorbed internally by [`RerunnableTask`](crate::frame::rerunnable::RerunnableTask);
    /// must never be surfaced to a caller.
    #[error("{CONTEXT_DESTROYED_TEXT}")]
    ExecutionContextDestroyed,

    /// Raised by element actions when the resolved node is no longer
    /// connected to the DOM; absorbed by the retry-with-selector loop.
    #[error("element is not connected")]
    NotConnected,

    /// Malformed caller input: unknown lifecycle value, unknown selector
    /// state, too many evaluate arguments, conflicting referer, etc.
    #[error("{0}")]
    InvalidArgument(String),

    /// Inline script/style blocked by Content Security Policy.
    #[error("{0}")]
    Csp(String),

    #[error("{0}")]
    Channel(#[from] ChannelError),

    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl CoreError {
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        CoreError::InvalidArgument(msg.into())
    }

    /// True if this error's message is one of the two context-destruction
    /// markers a real [`ExecutionContext`](crate::contracts::ExecutionContext)
    /// is expected to raise (spec §4.3 step 4).
    pub fn is_context_destroyed(msg: &str) -> bool {
        msg.contains(CONTEXT_DESTROYED_TEXT) || msg.contains(CONTEXT_NOT_FOUND_TEXT)
    }

    pub fn navigation_failed(doc: &DocumentId, text: impl AsRef<str>, cancelled: bool) -> Self {
        let mut msg = format!(
            "navigating frame failed for document {doc}: {}",
            text.as_ref()
        );
        if cancelled {
            msg.push_str("; maybe frame was detached?");
        }
        CoreError::Navigation(msg)
    }
}

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("{0}")]
    Send(#[from] SendError),
    #[error("{0}")]
    Canceled(#[from] Canceled),
}

impl From<Canceled> for CoreError {
    fn from(err: Canceled) -> Self {
        ChannelError::from(err).into()
    }
}

impl From<SendError> for CoreError {
    fn from(err: SendError) -> Self {
        ChannelError::from(err).into()
    }
}

/// An error where `now > deadline`, used by [`ProgressController`](crate::progress::ProgressController).
#[derive(Debug, Clone)]
pub struct DeadlineExceeded {
    pub deadline: Instant,
    pub now: Instant,
}

impl DeadlineExceeded {
    /// panics if `now < deadline`
    pub fn new(now: Instant, deadline: Instant) -> Self {
        assert!(now >= deadline);
        Self { now, deadline }
    }
}

pub type Result<T, E = CoreError> = std::result::Result<T, E>;
