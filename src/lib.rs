//! Frame tree coordination, navigation lifecycle, and execution-context
//! gating for a remote browser-automation engine.
//!
//! This crate implements the coordination layer that sits between a raw
//! stream of browser events (frame attached/detached, navigation
//! requested/committed, request started/finished, execution-context
//! created/destroyed, lifecycle events, console output) and an API client
//! that wants an imperative, awaitable view over a page's frame tree:
//! navigate, wait for a selector, retry an element action, evaluate
//! JavaScript.
//!
//! The browser transport, selector compiler, and DOM-handle layer are
//! external collaborators represented as traits in [`contracts`] — this
//! crate never speaks the wire protocol itself. See `DESIGN.md` for how each
//! piece is grounded in its reference implementation.

pub mod contracts;
pub mod error;
pub mod events;
pub mod frame;
pub mod ids;
pub mod progress;
pub(crate) mod rt;
pub(crate) mod signal;

pub use contracts::{
    ActionOutcome, ClickOptions, ElementAction, ElementHandle, ExecutionContext, NavigateOutcome,
    PageDelegate, Polling, SelectorEngine, SelectorState, UrlMatcher,
};
pub use error::{CoreError, Result};
pub use events::{BrowserEvent, ConsoleMessage, EventBus, LifecycleEvent, NetworkRequest, PageEvent};
pub use frame::{
    AddScriptTagOptions, AddStyleTagOptions, Frame, FrameManager, GotoOptions, SignalBarrier,
    Timeouts, WaitForNavigationOptions,
};
pub use ids::{DocumentId, FrameId, RequestId, TaskId, World};
pub use progress::{AbortReason, Progress, ProgressController};
