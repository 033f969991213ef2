//! Fakes for the external contracts (spec §4.6), used throughout this
//! module's unit tests to exercise frame-tree coordination, lifecycle
//! propagation, and context gating without a real browser transport.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Value;

use crate::contracts::{
    ElementHandle, ExecutionContext, InjectedScriptHandle, NavigateOutcome, PageDelegate,
    PollBuilder, Polling, SelectorEngine, SelectorState,
};
use crate::error::{CoreError, Result};
use crate::events::{EventBus, PageEvent};
use crate::frame::{Collaborators, Timeouts};
use crate::ids::{FrameId, World};

/// A minimal execution context: evaluates to `null`, never asked to produce
/// an element handle by these tests.
#[derive(Debug)]
pub(crate) struct FakeContext(pub World);

#[async_trait]
impl ExecutionContext for FakeContext {
    fn world(&self) -> World {
        self.0
    }

    async fn evaluate_internal(&self, _expression: &str, _arg: Option<Value>) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn evaluate_handle_internal(
        &self,
        _expression: &str,
        _arg: Option<Value>,
    ) -> Result<Arc<dyn ElementHandle>> {
        unimplemented!("FakeContext never resolves element handles")
    }

    fn injected_script(&self) -> InjectedScriptHandle {
        InjectedScriptHandle { context: self.0 }
    }

    async fn wait_for_function(
        &self,
        _expression: &str,
        _arg: Option<Value>,
        _polling: Polling,
    ) -> Result<Value> {
        Ok(Value::Null)
    }
}

/// Records every emitted [`PageEvent`] in order, for assertions.
#[derive(Default)]
pub(crate) struct FakeEventBus(Mutex<Vec<PageEvent>>);

impl FakeEventBus {
    pub(crate) fn events(&self) -> Vec<PageEvent> {
        self.0.lock().unwrap().clone()
    }
}

impl EventBus for FakeEventBus {
    fn emit(&self, event: PageEvent) {
        self.0.lock().unwrap().push(event);
    }
}

/// A `PageDelegate` whose navigation outcome and referer are controllable
/// from the test, defaulting to "no new document, no referer conflict".
#[derive(Default)]
pub(crate) struct FakeDelegate {
    pub(crate) next_navigate_outcome: Mutex<Option<NavigateOutcome>>,
    pub(crate) referer: Mutex<Option<String>>,
    pub(crate) csp_async: Mutex<bool>,
}

#[async_trait]
impl PageDelegate for FakeDelegate {
    async fn navigate_frame(
        &self,
        _frame: &FrameId,
        _url: &str,
        _referer: Option<&str>,
    ) -> Result<NavigateOutcome> {
        Ok(self
            .next_navigate_outcome
            .lock()
            .unwrap()
            .clone()
            .unwrap_or(NavigateOutcome { new_document_id: None }))
    }

    async fn get_frame_element(&self, _frame: &FrameId) -> Result<Arc<dyn ElementHandle>> {
        unimplemented!("not exercised by these fakes")
    }

    async fn adopt_element_handle(
        &self,
        handle: Arc<dyn ElementHandle>,
        _target_world: World,
    ) -> Result<Arc<dyn ElementHandle>> {
        Ok(handle)
    }

    async fn input_action_epilogue(&self) -> Result<()> {
        Ok(())
    }

    fn csp_errors_asynchronous_for_inline_scripts(&self) -> bool {
        *self.csp_async.lock().unwrap()
    }

    fn extra_http_referer(&self) -> Option<String> {
        self.referer.lock().unwrap().clone()
    }
}

/// A `SelectorEngine` that resolves nothing by default; `wait_for_selector_task`
/// errors unless the test overrides it, since none of the slot/context/task
/// unit tests in this module drive a real selector wait.
#[derive(Default)]
pub(crate) struct FakeSelectorEngine;

#[async_trait]
impl SelectorEngine for FakeSelectorEngine {
    async fn query(&self, _frame: &FrameId, _selector: &str) -> Result<Option<Arc<dyn ElementHandle>>> {
        Ok(None)
    }

    async fn query_all(&self, _frame: &FrameId, _selector: &str) -> Result<Vec<Arc<dyn ElementHandle>>> {
        Ok(Vec::new())
    }

    async fn eval(
        &self,
        _frame: &FrameId,
        _selector: &str,
        _expression: &str,
        _arg: Option<Value>,
    ) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn eval_all(
        &self,
        _frame: &FrameId,
        _selector: &str,
        _expression: &str,
        _arg: Option<Value>,
    ) -> Result<Value> {
        Ok(Value::Null)
    }

    async fn dispatch_event(
        &self,
        _frame: &FrameId,
        _selector: &str,
        _event_type: &str,
        _event_init: Option<Value>,
    ) -> Result<()> {
        Ok(())
    }

    fn wait_for_selector_task(
        &self,
        _frame: &FrameId,
        _selector: &str,
        _state: SelectorState,
    ) -> Result<(World, PollBuilder<Option<Arc<dyn ElementHandle>>>)> {
        Err(CoreError::invalid_argument(
            "FakeSelectorEngine has no selector task wired up for this test",
        ))
    }
}

/// A ready-to-use [`Collaborators`] backed entirely by the fakes above.
pub(crate) fn fake_collaborators() -> Arc<Collaborators> {
    Collaborators::new(
        Arc::new(FakeDelegate::default()),
        Arc::new(FakeSelectorEngine),
        Arc::new(FakeEventBus::default()),
        Timeouts::default(),
    )
}
