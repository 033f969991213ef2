//! Frame tree coordination (spec §3 "Frame", §3 "Frame Manager").
//!
//! [`Frame`] is the caller-facing unit: every navigation, wait, selector, and
//! element-action operation is a method on it. [`FrameManager`] is the sole
//! consumer of [`crate::events::BrowserEvent`]s and owns the tree; a `Frame`
//! never holds a reference back to its manager, only to the
//! [`Collaborators`] both share, which keeps a `Frame` constructible and
//! testable on its own.

use std::sync::Arc;
use std::time::Duration;

use crate::contracts::{PageDelegate, SelectorEngine};
use crate::events::EventBus;
use crate::signal::Signal;

mod barrier;
mod context_slot;
mod frame;
pub mod manager;
mod rerunnable;
pub mod task;

#[cfg(test)]
pub(crate) mod test_support;

pub use barrier::SignalBarrier;
pub(crate) use context_slot::ContextSlot;
pub use frame::{
    AddScriptTagOptions, AddStyleTagOptions, Frame, GotoOptions, WaitForNavigationOptions,
};
pub use manager::FrameManager;
pub(crate) use rerunnable::{RerunnableHandle, RerunnableTask};
pub use task::FrameTask;

use manager::{BarrierRegistry, ConsoleTagRegistry, CspWatchers};

/// Per-operation default timeouts (spec §4.6, §9 "Configuration"). Cloned
/// into [`Collaborators`] so every `Frame` sees the same values without a
/// dependency on a live page object.
#[derive(Debug, Clone, Copy)]
pub struct Timeouts {
    pub default_navigation_timeout: Duration,
    pub default_timeout: Duration,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            default_navigation_timeout: Duration::from_secs(30),
            default_timeout: Duration::from_secs(30),
        }
    }
}

/// Everything a [`Frame`] needs beyond its own tree position: the external
/// contracts (spec §4.6) plus the cross-frame registries the
/// [`FrameManager`] coordinates through (signal barriers, console tags, CSP
/// watchers, and the page-disconnected signal). Shared via `Arc` rather than
/// threaded individually so adding a new cross-frame concern never changes
/// every `Frame` method's signature.
pub struct Collaborators {
    pub delegate: Arc<dyn PageDelegate>,
    pub selector_engine: Arc<dyn SelectorEngine>,
    pub event_bus: Arc<dyn EventBus>,
    pub timeouts: Timeouts,
    pub(crate) barriers: BarrierRegistry,
    pub(crate) console_tags: ConsoleTagRegistry,
    pub(crate) csp_watchers: CspWatchers,
    pub(crate) disconnected: Signal,
}

impl Collaborators {
    pub fn new(
        delegate: Arc<dyn PageDelegate>,
        selector_engine: Arc<dyn SelectorEngine>,
        event_bus: Arc<dyn EventBus>,
        timeouts: Timeouts,
    ) -> Arc<Self> {
        Arc::new(Self {
            delegate,
            selector_engine,
            event_bus,
            timeouts,
            barriers: BarrierRegistry::default(),
            console_tags: ConsoleTagRegistry::default(),
            csp_watchers: CspWatchers::default(),
            disconnected: Signal::new(),
        })
    }
}
