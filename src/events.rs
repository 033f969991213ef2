//! The browser event surface the [`FrameManager`](crate::frame::manager::FrameManager)
//! consumes, and the page event surface it emits to the embedder (spec §4.5,
//! §6).

use std::sync::Arc;

use crate::contracts::ExecutionContext;
use crate::ids::{DocumentId, FrameId, RequestId, World};

/// `domcontentloaded | load | networkidle`, ordered conceptually but
/// observed as independent set membership (spec §3 "Lifecycle event").
/// `networkidle0` is accepted as a legacy alias for `networkidle` (spec §4.2,
/// §6).
#[derive(Debug, Copy, Clone, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum LifecycleEvent {
    DomContentLoaded,
    Load,
    NetworkIdle,
}

impl LifecycleEvent {
    pub fn parse(value: &str) -> Result<Self, crate::error::CoreError> {
        match value {
            "domcontentloaded" => Ok(LifecycleEvent::DomContentLoaded),
            "load" => Ok(LifecycleEvent::Load),
            "networkidle" | "networkidle0" => Ok(LifecycleEvent::NetworkIdle),
            other => Err(crate::error::CoreError::invalid_argument(format!(
                "unsupported waitUntil value '{other}'"
            ))),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            LifecycleEvent::DomContentLoaded => "domcontentloaded",
            LifecycleEvent::Load => "load",
            LifecycleEvent::NetworkIdle => "networkidle",
        }
    }
}

/// A network request, carried only far enough for the coordination core to
/// do its bookkeeping (spec §1: "the network request/response objects
/// themselves" are an external collaborator). `response` is an opaque
/// marker set once a response arrives.
#[derive(Debug, Clone)]
pub struct NetworkRequest {
    pub id: RequestId,
    pub frame: FrameId,
    pub document_id: Option<DocumentId>,
    pub is_favicon: bool,
    pub is_redirect: bool,
    pub response: Option<Arc<dyn NetworkResponse>>,
}

/// Fully opaque from the core's point of view; only used so `goto` /
/// `waitForNavigation` have something concrete to hand back to the caller.
pub trait NetworkResponse: Send + Sync + std::fmt::Debug {}

/// A console message, either routed to the one-shot `setContent` tag
/// handler or re-emitted as `PageEvent::Console` (spec §4.5 "Console tag
/// routing").
#[derive(Debug, Clone)]
pub struct ConsoleMessage {
    pub message_type: String,
    pub text: String,
}

/// Raw events produced by the browser transport, consumed by the
/// [`FrameManager`](crate::frame::manager::FrameManager) (spec §4.5 event
/// handler table — the complete set this core must consume).
#[derive(Debug, Clone)]
pub enum BrowserEvent {
    FrameAttached {
        id: FrameId,
        parent_id: Option<FrameId>,
    },
    FrameRequestedNavigation {
        id: FrameId,
        document_id: DocumentId,
    },
    FrameUpdatedDocumentIdForNavigation {
        id: FrameId,
        document_id: DocumentId,
    },
    FrameCommittedNewDocument {
        id: FrameId,
        url: String,
        name: String,
        document_id: DocumentId,
        initial: bool,
    },
    FrameCommittedSameDocument {
        id: FrameId,
        url: String,
    },
    FrameDetached {
        id: FrameId,
    },
    FrameStoppedLoading {
        id: FrameId,
    },
    FrameLifecycleEvent {
        id: FrameId,
        event: LifecycleEvent,
    },
    ExecutionContextCreated {
        frame: FrameId,
        world: World,
        context: Arc<dyn ExecutionContext>,
    },
    ExecutionContextDestroyed {
        frame: FrameId,
        world: World,
    },
    RequestStarted(NetworkRequest),
    RequestReceivedResponse(NetworkRequest),
    RequestFinished(NetworkRequest),
    RequestFailed {
        request: NetworkRequest,
        error_text: String,
        canceled: bool,
    },
    ProvisionalLoadFailed {
        frame: FrameId,
        document_id: DocumentId,
        message: String,
    },
    Console(ConsoleMessage),
}

/// Events the core emits to the embedder (spec §6 "Event surface emitted to
/// the embedder").
#[derive(Debug, Clone)]
pub enum PageEvent {
    FrameAttached(FrameId),
    FrameDetached(FrameId),
    FrameNavigated(FrameId),
    DomContentLoaded,
    Load,
    Request(NetworkRequest),
    Response(NetworkRequest),
    RequestFinished(NetworkRequest),
    RequestFailed(NetworkRequest),
    Console(ConsoleMessage),
}

/// The page-level event emitter collaborator (spec §4.6, §9 "Global event
/// bus"): the core only calls `emit`.
pub trait EventBus: Send + Sync {
    fn emit(&self, event: PageEvent);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lifecycle_parses_legacy_alias() {
        assert_eq!(
            LifecycleEvent::parse("networkidle0").unwrap(),
            LifecycleEvent::NetworkIdle
        );
    }

    #[test]
    fn lifecycle_rejects_unknown() {
        assert!(LifecycleEvent::parse("bogus").is_err());
    }
}
