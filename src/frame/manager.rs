//! The `FrameManager`: the single authority over the frame tree, consuming
//! [`BrowserEvent`]s and dispatching to [`Frame`]s (spec §3 "Frame Manager",
//! §4.5).

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use fnv::FnvHashMap;
use futures::channel::oneshot;

use crate::events::{BrowserEvent, ConsoleMessage, EventBus, LifecycleEvent, PageEvent};
use crate::frame::barrier::SignalBarrier;
use crate::frame::{Collaborators, Frame, Timeouts};
use crate::ids::{FrameId, World};

/// The set of signal barriers currently "active" (spec §4.1): every one of
/// them must observe every concurrent frame navigation before any of the
/// input actions that registered them can return.
#[derive(Clone, Default)]
pub(crate) struct BarrierRegistry(Arc<Mutex<Vec<SignalBarrier>>>);

impl BarrierRegistry {
    pub(crate) fn register(&self, barrier: SignalBarrier) {
        self.0.lock().unwrap().push(barrier);
    }

    pub(crate) fn unregister(&self, barrier: &SignalBarrier) {
        self.0.lock().unwrap().retain(|b| !SignalBarrier::same(b, barrier));
    }

    fn snapshot(&self) -> Vec<SignalBarrier> {
        self.0.lock().unwrap().clone()
    }

    /// `retain`s every active barrier, called once before an input action
    /// starts so a navigation it triggers is tracked even if it lands before
    /// the action's own code reaches `wait_for` (spec §4.1 rationale).
    pub(crate) fn retain_all(&self) {
        for barrier in self.0.lock().unwrap().iter() {
            barrier.retain();
        }
    }

    pub(crate) fn release_all(&self) {
        for barrier in self.0.lock().unwrap().iter() {
            barrier.release();
        }
    }
}

/// One-shot console-message tags minted by `setContent`, matched against
/// incoming `console.debug` messages so that particular call can tell its
/// own injected markup apart from everything else on the page (spec §4.4
/// `setContent`, §4.5 "Console tag routing").
#[derive(Clone, Default)]
pub(crate) struct ConsoleTagRegistry(Arc<Mutex<HashMap<String, oneshot::Sender<()>>>>);

impl ConsoleTagRegistry {
    pub(crate) fn register(&self, tag: String) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        self.0.lock().unwrap().insert(tag, tx);
        rx
    }

    /// Consumes the message if it's a tag match. Returns `true` when the
    /// message must *not* be re-emitted as `PageEvent::Console` (spec §4.5:
    /// "never forwarded to the embedder").
    fn intercept(&self, msg: &ConsoleMessage) -> bool {
        if msg.message_type != "debug" {
            return false;
        }
        match self.0.lock().unwrap().remove(&msg.text) {
            Some(tx) => {
                let _ = tx.send(());
                true
            }
            None => false,
        }
    }
}

/// Watchers for a CSP violation console message, used to race
/// `addScriptTag`/`addStyleTag`'s inline-content evaluate call against the
/// browser's asynchronous CSP report (spec §9/§10 "CSP-error racing"). A
/// match resolves every outstanding watcher; in the (rare) case of two
/// concurrent inline tag insertions this can hand one call's CSP error to
/// the other — noted in `DESIGN.md`.
#[derive(Clone, Default)]
pub(crate) struct CspWatchers(Arc<Mutex<Vec<oneshot::Sender<String>>>>);

impl CspWatchers {
    pub(crate) fn register(&self) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.0.lock().unwrap().push(tx);
        rx
    }

    fn notify(&self, text: &str) {
        let senders = std::mem::take(&mut *self.0.lock().unwrap());
        for tx in senders {
            let _ = tx.send(text.to_string());
        }
    }
}

/// Owns the frame tree and is the sole consumer of [`BrowserEvent`]s (spec
/// §3, §4.5). Frames never hold a reference back to their manager — they
/// only share its [`Collaborators`], so a `Frame` can be exercised standalone
/// in unit tests.
pub struct FrameManager {
    frames: Mutex<FnvHashMap<FrameId, Arc<Frame>>>,
    main_frame: Mutex<Option<Arc<Frame>>>,
    collaborators: Arc<Collaborators>,
}

impl FrameManager {
    pub fn new(
        delegate: Arc<dyn crate::contracts::PageDelegate>,
        selector_engine: Arc<dyn crate::contracts::SelectorEngine>,
        event_bus: Arc<dyn EventBus>,
        timeouts: Timeouts,
    ) -> Self {
        Self {
            frames: Mutex::new(FnvHashMap::default()),
            main_frame: Mutex::new(None),
            collaborators: Collaborators::new(delegate, selector_engine, event_bus, timeouts),
        }
    }

    pub fn collaborators(&self) -> Arc<Collaborators> {
        self.collaborators.clone()
    }

    pub fn main_frame(&self) -> Option<Arc<Frame>> {
        self.main_frame.lock().unwrap().clone()
    }

    pub fn frame(&self, id: &FrameId) -> Option<Arc<Frame>> {
        self.frames.lock().unwrap().get(id).cloned()
    }

    pub fn frames(&self) -> Vec<Arc<Frame>> {
        self.frames.lock().unwrap().values().cloned().collect()
    }

    /// Marks every frame and in-flight operation as belonging to a
    /// disconnected page (spec §4.4 preamble: every operation races this).
    pub fn disconnect(&self) {
        self.collaborators.disconnected.fire();
    }

    pub fn handle_event(&self, event: BrowserEvent) {
        match event {
            BrowserEvent::FrameAttached { id, parent_id } => self.on_frame_attached(id, parent_id),
            BrowserEvent::FrameRequestedNavigation { id, document_id } => {
                self.on_frame_requested_navigation(id, document_id)
            }
            BrowserEvent::FrameUpdatedDocumentIdForNavigation { id, document_id } => {
                self.on_frame_updated_document_id(id, document_id)
            }
            BrowserEvent::FrameCommittedNewDocument {
                id,
                url,
                name,
                document_id,
                initial,
            } => self.on_frame_committed_new_document(id, url, name, document_id, initial),
            BrowserEvent::FrameCommittedSameDocument { id, url } => {
                self.on_frame_committed_same_document(id, url)
            }
            BrowserEvent::FrameDetached { id } => self.on_frame_detached(id),
            BrowserEvent::FrameStoppedLoading { id } => self.on_frame_stopped_loading(id),
            BrowserEvent::FrameLifecycleEvent { id, event } => {
                self.on_frame_lifecycle_event(id, event)
            }
            BrowserEvent::ExecutionContextCreated {
                frame,
                world,
                context,
            } => self.on_execution_context_created(frame, world, context),
            BrowserEvent::ExecutionContextDestroyed { frame, world } => {
                self.on_execution_context_destroyed(frame, world)
            }
            BrowserEvent::RequestStarted(req) => self.on_request_started(req),
            BrowserEvent::RequestReceivedResponse(req) => self.on_request_received_response(req),
            BrowserEvent::RequestFinished(req) => self.on_request_finished(req),
            BrowserEvent::RequestFailed {
                request,
                error_text,
                canceled,
            } => self.on_request_failed(request, error_text, canceled),
            BrowserEvent::ProvisionalLoadFailed {
                frame,
                document_id,
                message,
            } => self.on_provisional_load_failed(frame, document_id, message),
            BrowserEvent::Console(msg) => self.on_console(msg),
        }
    }

    /// spec §4.5 `frameAttached`: a `parentId` that is null or names a frame
    /// we don't know about means this is (re)identifying the main frame — a
    /// cross-process navigation can hand the main frame a brand new id, and
    /// its prior identity (context slots, tasks, children) must survive the
    /// rename. A known `parentId` always creates a genuine new child frame.
    fn on_frame_attached(&self, id: FrameId, parent_id: Option<FrameId>) {
        if self.frames.lock().unwrap().contains_key(&id) {
            return;
        }
        let parent = parent_id.as_ref().and_then(|pid| self.frame(pid));
        let identifying_main = parent.is_none();

        if identifying_main {
            if let Some(existing) = self.main_frame() {
                let old_id = existing.id();
                existing.set_id(id.clone());
                let mut frames = self.frames.lock().unwrap();
                frames.remove(&old_id);
                frames.insert(id.clone(), existing);
                return;
            }
        }

        let frame = Frame::with_manager(id.clone(), parent.clone(), self.collaborators.clone());
        if let Some(parent) = &parent {
            parent.add_child(frame.clone());
        } else {
            *self.main_frame.lock().unwrap() = Some(frame.clone());
        }
        self.frames.lock().unwrap().insert(id.clone(), frame);
        self.collaborators.event_bus.emit(PageEvent::FrameAttached(id));
    }

    /// spec §4.1 `addFrameNavigation`: while any signal barrier is active,
    /// track this navigation's eventual settlement (new document commit,
    /// same-document commit, or the frame's own cancellation) against every
    /// one of them.
    fn track_navigation_for_barriers(&self, frame: &Arc<Frame>) {
        let barriers = self.collaborators.barriers.snapshot();
        if barriers.is_empty() {
            return;
        }
        let probe = Arc::new(crate::frame::task::FrameTask::new(&frame.id()));
        frame.register_task(probe.clone());
        let new_doc_rx = probe.wait_for_new_document(crate::contracts::UrlMatcher::Any);
        let same_doc_rx = probe.wait_for_same_document_navigation(crate::contracts::UrlMatcher::Any);
        let cancellation = frame.cancellation();
        let frame_for_cleanup = frame.clone();
        let settled = crate::signal::Signal::new();
        let settled_setter = settled.clone();
        crate::rt::spawn(async move {
            futures::pin_mut!(new_doc_rx);
            futures::pin_mut!(same_doc_rx);
            futures::pin_mut!(cancellation);
            futures::select! {
                _ = new_doc_rx => {},
                _ = same_doc_rx => {},
                _ = cancellation => {},
            }
            frame_for_cleanup.remove_task(&probe);
            settled_setter.fire();
        });
        for barrier in barriers {
            barrier.track_navigation(settled.wait());
        }
    }

    fn on_frame_requested_navigation(&self, id: FrameId, document_id: crate::ids::DocumentId) {
        if let Some(frame) = self.frame(&id) {
            frame.set_pending_document(Some(document_id));
            self.track_navigation_for_barriers(&frame);
        }
    }

    fn on_frame_updated_document_id(&self, id: FrameId, document_id: crate::ids::DocumentId) {
        if let Some(frame) = self.frame(&id) {
            frame.set_pending_document(Some(document_id));
        }
    }

    fn on_frame_committed_new_document(
        &self,
        id: FrameId,
        url: String,
        name: String,
        document_id: crate::ids::DocumentId,
        initial: bool,
    ) {
        let frame = match self.frame(&id) {
            Some(f) => f,
            None => return,
        };

        for child in frame.take_children() {
            self.remove_subtree(&child);
        }

        frame.commit_new_document(url.clone(), name, document_id.clone());
        frame.clear_lifecycle();

        for task in frame.tasks_snapshot() {
            task.on_new_document(&document_id, Some(url.as_str()), None);
        }

        if !initial {
            self.collaborators
                .event_bus
                .emit(PageEvent::FrameNavigated(id));
        }
    }

    fn on_frame_committed_same_document(&self, id: FrameId, url: String) {
        if let Some(frame) = self.frame(&id) {
            frame.set_url(url.clone());
            for task in frame.tasks_snapshot() {
                task.on_same_document(&url);
            }
            self.collaborators
                .event_bus
                .emit(PageEvent::FrameNavigated(id));
        }
    }

    fn on_frame_detached(&self, id: FrameId) {
        let frame = match self.frames.lock().unwrap().remove(&id) {
            Some(f) => f,
            None => return,
        };
        if let Some(parent) = frame.parent() {
            parent.remove_child(&id);
        }
        if self
            .main_frame
            .lock()
            .unwrap()
            .as_ref()
            .map(|m| m.id() == id)
            .unwrap_or(false)
        {
            *self.main_frame.lock().unwrap() = None;
        }
        self.remove_subtree(&frame);
    }

    /// Detaches `frame` and every descendant still in the tree (spec §4.5
    /// `frameDetached`: "also detaches every descendant").
    fn remove_subtree(&self, frame: &Arc<Frame>) {
        for child in frame.take_children() {
            self.frames.lock().unwrap().remove(&child.id());
            self.remove_subtree(&child);
        }
        frame.clear_parent();
        frame.detach();
        self.collaborators
            .event_bus
            .emit(PageEvent::FrameDetached(frame.id()));
    }

    fn on_frame_stopped_loading(&self, id: FrameId) {
        if let Some(frame) = self.frame(&id) {
            self.notify_lifecycle(&frame, LifecycleEvent::Load);
            self.notify_lifecycle(&frame, LifecycleEvent::DomContentLoaded);
        }
    }

    fn on_frame_lifecycle_event(&self, id: FrameId, event: LifecycleEvent) {
        if let Some(frame) = self.frame(&id) {
            self.notify_lifecycle(&frame, event);
        }
    }

    /// Fires `event` on `frame` (if not already fired) and, only for the two
    /// events promoted to the page-level surface, emits the corresponding
    /// `PageEvent` when `frame` is the main frame (spec §6 "Event surface").
    fn notify_lifecycle(&self, frame: &Arc<Frame>, event: LifecycleEvent) {
        if !frame.fire_lifecycle(event) {
            return;
        }
        let is_main = self
            .main_frame
            .lock()
            .unwrap()
            .as_ref()
            .map(|m| m.id() == frame.id())
            .unwrap_or(false);
        if !is_main {
            return;
        }
        match event {
            LifecycleEvent::Load => self.collaborators.event_bus.emit(PageEvent::Load),
            LifecycleEvent::DomContentLoaded => {
                self.collaborators.event_bus.emit(PageEvent::DomContentLoaded)
            }
            LifecycleEvent::NetworkIdle => {}
        }
    }

    fn on_execution_context_created(
        &self,
        frame: FrameId,
        world: World,
        context: Arc<dyn crate::contracts::ExecutionContext>,
    ) {
        if let Some(frame) = self.frame(&frame) {
            frame.context_created(world, context);
        }
    }

    /// spec §9 "ambient stack" design note: the browser event only names the
    /// `(frame, world)` pair, not the context identity that was destroyed, so
    /// this simplifies the spec's "for any slot currently holding ctx, null
    /// it" rule to "null whatever that slot currently holds".
    fn on_execution_context_destroyed(&self, frame: FrameId, world: World) {
        if let Some(frame) = self.frame(&frame) {
            frame.context_destroyed(world);
        }
    }

    fn on_request_started(&self, req: crate::events::NetworkRequest) {
        if let Some(frame) = self.frame(&req.frame) {
            frame.request_started(req.clone());
        }
        if !req.is_favicon {
            self.collaborators.event_bus.emit(PageEvent::Request(req));
        }
    }

    fn on_request_received_response(&self, req: crate::events::NetworkRequest) {
        if let Some(frame) = self.frame(&req.frame) {
            frame.request_response(req.clone());
        }
        if !req.is_favicon {
            self.collaborators.event_bus.emit(PageEvent::Response(req));
        }
    }

    fn on_request_finished(&self, req: crate::events::NetworkRequest) {
        if let Some(frame) = self.frame(&req.frame) {
            frame.request_finished(req.clone());
        }
        if !req.is_favicon {
            self.collaborators
                .event_bus
                .emit(PageEvent::RequestFinished(req));
        }
    }

    fn on_request_failed(&self, req: crate::events::NetworkRequest, error_text: String, canceled: bool) {
        if let Some(frame) = self.frame(&req.frame) {
            frame.request_finished(req.clone());
            if frame.pending_document_id() == req.document_id {
                if let Some(doc) = req.document_id.clone() {
                    frame.clear_pending_document();
                    let mut message = error_text.clone();
                    if canceled {
                        message.push_str("; maybe frame was detached?");
                    }
                    for task in frame.tasks_snapshot() {
                        task.on_new_document(&doc, None, Some(message.clone()));
                    }
                }
            }
        }
        if !req.is_favicon {
            self.collaborators
                .event_bus
                .emit(PageEvent::RequestFailed(req));
        }
    }

    fn on_provisional_load_failed(
        &self,
        frame: FrameId,
        document_id: crate::ids::DocumentId,
        message: String,
    ) {
        if let Some(frame) = self.frame(&frame) {
            for task in frame.tasks_snapshot() {
                task.on_new_document(&document_id, None, Some(message.clone()));
            }
        }
    }

    fn on_console(&self, msg: ConsoleMessage) {
        if self.collaborators.console_tags.intercept(&msg) {
            return;
        }
        if msg.message_type == "error" && msg.text.contains("Content Security Policy") {
            self.collaborators.csp_watchers.notify(&msg.text);
        }
        self.collaborators.event_bus.emit(PageEvent::Console(msg));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::NavigateOutcome;
    use crate::error::CoreError;
    use crate::events::NetworkRequest;
    use crate::frame::test_support::{FakeContext, FakeDelegate, FakeEventBus, FakeSelectorEngine};
    use crate::frame::GotoOptions;
    use crate::ids::{DocumentId, RequestId};
    use std::time::Duration;

    #[derive(Debug)]
    struct FakeResponse;
    impl crate::events::NetworkResponse for FakeResponse {}

    fn manager() -> (Arc<FrameManager>, Arc<FakeDelegate>, Arc<FakeEventBus>) {
        let delegate = Arc::new(FakeDelegate::default());
        let bus = Arc::new(FakeEventBus::default());
        let mgr = Arc::new(FrameManager::new(
            delegate.clone() as Arc<dyn crate::contracts::PageDelegate>,
            Arc::new(FakeSelectorEngine) as Arc<dyn crate::contracts::SelectorEngine>,
            bus.clone() as Arc<dyn EventBus>,
            Timeouts::default(),
        ));
        (mgr, delegate, bus)
    }

    fn request(id: &'static str, frame: FrameId, document_id: Option<DocumentId>) -> NetworkRequest {
        NetworkRequest {
            id: RequestId::new(id),
            frame,
            document_id,
            is_favicon: false,
            is_redirect: false,
            response: None,
        }
    }

    /// Scenario 1 (spec §8): a same-document navigation resolves a pending
    /// `waitForNavigation()` with `null` and emits `FrameNavigated` exactly
    /// once.
    #[tokio::test]
    async fn same_document_navigation_resolves_wait_for_navigation_with_no_response() {
        let (mgr, _delegate, bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        let frame = mgr.main_frame().unwrap();

        let wait = tokio::spawn({
            let frame = frame.clone();
            async move {
                frame
                    .wait_for_navigation(Default::default(), Some(Duration::from_secs(2)))
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.handle_event(BrowserEvent::FrameCommittedSameDocument {
            id: frame.id(),
            url: "https://a/#x".into(),
        });
        mgr.handle_event(BrowserEvent::FrameLifecycleEvent {
            id: frame.id(),
            event: LifecycleEvent::Load,
        });

        let result = wait.await.unwrap().unwrap();
        assert!(result.is_none());
        let navigated = bus
            .events()
            .iter()
            .filter(|e| matches!(e, PageEvent::FrameNavigated(_)))
            .count();
        assert_eq!(navigated, 1);
    }

    /// Scenario 2 (spec §8): a successful new-document navigation resolves
    /// `goto` with the top-level request's response.
    #[tokio::test]
    async fn new_document_navigation_success_resolves_goto_with_response() {
        let (mgr, delegate, _bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        let frame = mgr.main_frame().unwrap();
        let doc = DocumentId::from("D1".to_string());
        *delegate.next_navigate_outcome.lock().unwrap() = Some(NavigateOutcome {
            new_document_id: Some(doc.clone()),
        });

        let goto = tokio::spawn({
            let frame = frame.clone();
            async move {
                frame
                    .goto(
                        "https://a/",
                        GotoOptions {
                            wait_until: Some(LifecycleEvent::Load),
                            referer: None,
                        },
                        Some(Duration::from_secs(2)),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;

        let mut req = request("R1", frame.id(), Some(doc.clone()));
        mgr.handle_event(BrowserEvent::FrameRequestedNavigation {
            id: frame.id(),
            document_id: doc.clone(),
        });
        mgr.handle_event(BrowserEvent::RequestStarted(req.clone()));
        mgr.handle_event(BrowserEvent::FrameCommittedNewDocument {
            id: frame.id(),
            url: "https://a/".into(),
            name: "".into(),
            document_id: doc.clone(),
            initial: false,
        });
        req.response = Some(Arc::new(FakeResponse));
        mgr.handle_event(BrowserEvent::RequestReceivedResponse(req.clone()));
        mgr.handle_event(BrowserEvent::RequestFinished(req.clone()));
        mgr.handle_event(BrowserEvent::FrameLifecycleEvent {
            id: frame.id(),
            event: LifecycleEvent::DomContentLoaded,
        });
        mgr.handle_event(BrowserEvent::FrameLifecycleEvent {
            id: frame.id(),
            event: LifecycleEvent::Load,
        });

        let result = goto.await.unwrap().unwrap();
        assert!(result.is_some());
    }

    /// Scenario 3 (spec §8): a second navigation's document commits before
    /// the one `goto` is waiting on, so it rejects with
    /// `NavigationInterrupted` rather than hanging until timeout.
    #[tokio::test]
    async fn new_document_navigation_interrupted_by_another_document() {
        let (mgr, delegate, _bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        let frame = mgr.main_frame().unwrap();
        let d1 = DocumentId::from("D1".to_string());
        *delegate.next_navigate_outcome.lock().unwrap() = Some(NavigateOutcome {
            new_document_id: Some(d1.clone()),
        });

        let goto = tokio::spawn({
            let frame = frame.clone();
            async move {
                frame
                    .goto(
                        "https://a/",
                        GotoOptions {
                            wait_until: Some(LifecycleEvent::Load),
                            referer: None,
                        },
                        Some(Duration::from_secs(2)),
                    )
                    .await
            }
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        mgr.handle_event(BrowserEvent::FrameRequestedNavigation {
            id: frame.id(),
            document_id: d1.clone(),
        });
        let d2 = DocumentId::from("D2".to_string());
        mgr.handle_event(BrowserEvent::FrameRequestedNavigation {
            id: frame.id(),
            document_id: d2.clone(),
        });
        mgr.handle_event(BrowserEvent::FrameCommittedNewDocument {
            id: frame.id(),
            url: "https://b/".into(),
            name: "".into(),
            document_id: d2.clone(),
            initial: false,
        });

        let result = goto.await.unwrap();
        assert!(matches!(result, Err(CoreError::NavigationInterrupted)));
    }

    /// Scenario 4 (spec §8): 500ms after the last in-flight request settles,
    /// `networkidle` fires.
    #[tokio::test]
    async fn network_idle_fires_500ms_after_last_request_finishes() {
        let (mgr, _delegate, _bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        let frame = mgr.main_frame().unwrap();
        let req = request("R1", frame.id(), None);
        mgr.handle_event(BrowserEvent::RequestStarted(req.clone()));
        mgr.handle_event(BrowserEvent::RequestFinished(req));

        let result = frame
            .wait_for_load_state(LifecycleEvent::NetworkIdle, Some(Duration::from_millis(800)))
            .await;
        assert!(result.is_ok());
    }

    /// Scenario 4 continued: a request starting before the 500ms window
    /// elapses cancels the timer, so `networkidle` does not fire on the
    /// original schedule.
    #[tokio::test]
    async fn network_idle_timer_resets_on_new_request() {
        let (mgr, _delegate, _bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        let frame = mgr.main_frame().unwrap();
        let r1 = request("R1", frame.id(), None);
        mgr.handle_event(BrowserEvent::RequestStarted(r1.clone()));
        mgr.handle_event(BrowserEvent::RequestFinished(r1));

        tokio::time::sleep(Duration::from_millis(400)).await;
        let r2 = request("R2", frame.id(), None);
        mgr.handle_event(BrowserEvent::RequestStarted(r2));

        let result = frame
            .wait_for_load_state(LifecycleEvent::NetworkIdle, Some(Duration::from_millis(200)))
            .await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
    }

    /// spec §4.5 `frameAttached`: a cross-process navigation re-keys the
    /// main frame under its new id instead of creating a fresh one, so
    /// execution contexts and tree position survive.
    #[tokio::test]
    async fn cross_process_navigation_rekeys_main_frame_preserving_identity() {
        let (mgr, _delegate, bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("old".to_string()),
            parent_id: None,
        });
        let old_frame = mgr.main_frame().unwrap();
        old_frame.test_set_context(World::Main, Arc::new(FakeContext(World::Main)));

        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("new".to_string()),
            parent_id: None,
        });

        let current = mgr.main_frame().unwrap();
        assert_eq!(current.id(), FrameId::from("new".to_string()));
        assert!(Arc::ptr_eq(&current, &old_frame));
        assert!(mgr.frame(&FrameId::from("old".to_string())).is_none());
        assert!(current.context(World::Main).await.is_ok());
        let attached = bus
            .events()
            .iter()
            .filter(|e| matches!(e, PageEvent::FrameAttached(_)))
            .count();
        assert_eq!(attached, 1);
    }

    /// spec §4.5 `frameDetached`: detaching a frame recursively detaches
    /// every descendant still in the tree.
    #[tokio::test]
    async fn frame_detach_cascades_to_descendants() {
        let (mgr, _delegate, bus) = manager();
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("root".to_string()),
            parent_id: None,
        });
        mgr.handle_event(BrowserEvent::FrameAttached {
            id: FrameId::from("child".to_string()),
            parent_id: Some(FrameId::from("root".to_string())),
        });
        assert!(mgr.frame(&FrameId::from("child".to_string())).is_some());

        mgr.handle_event(BrowserEvent::FrameDetached {
            id: FrameId::from("root".to_string()),
        });

        assert!(mgr.frame(&FrameId::from("root".to_string())).is_none());
        assert!(mgr.frame(&FrameId::from("child".to_string())).is_none());
        assert!(mgr.main_frame().is_none());
        let detached = bus
            .events()
            .iter()
            .filter(|e| matches!(e, PageEvent::FrameDetached(_)))
            .count();
        assert_eq!(detached, 2);
    }
}
