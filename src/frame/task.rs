//! One-shot observer for a single caller operation (spec §3 "Frame Task",
//! §4.2). Attached to exactly one frame for its lifetime; holds at most one
//! waiter of each kind; removed from the frame on `done` (explicit, or via
//! the owning `Progress` aborting).

use std::sync::Mutex;

use futures::channel::oneshot;

use crate::contracts::UrlMatcher;
use crate::error::{CoreError, Result};
use crate::events::LifecycleEvent;
use crate::frame::Frame;
use crate::ids::{DocumentId, FrameId};

struct Waiter<T> {
    tx: oneshot::Sender<Result<T>>,
}

/// Registered with a [`Frame`] while a caller operation is in flight.
/// Dropping every waiter (without resolving) simply leaves the corresponding
/// `wait_for_*` future pending forever from the caller's point of view — in
/// practice the operation's `ProgressController` timeout or cancellation
/// future always races it, so that never actually happens.
pub struct FrameTask {
    frame: FrameId,
    same_document: Mutex<Option<(UrlMatcher, Waiter<()>)>>,
    specific_document: Mutex<Option<(DocumentId, Waiter<()>)>>,
    any_new_document: Mutex<Option<(UrlMatcher, Waiter<DocumentId>)>>,
    lifecycle: Mutex<Option<(LifecycleEvent, Waiter<()>)>>,
}

impl FrameTask {
    pub fn new(frame: &FrameId) -> Self {
        Self {
            frame: frame.clone(),
            same_document: Mutex::new(None),
            specific_document: Mutex::new(None),
            any_new_document: Mutex::new(None),
            lifecycle: Mutex::new(None),
        }
    }

    pub fn frame_id(&self) -> &FrameId {
        &self.frame
    }

    /// Resolves on the next same-document commit whose URL matches.
    pub fn wait_for_same_document_navigation(
        &self,
        matcher: UrlMatcher,
    ) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        *self.same_document.lock().unwrap() = Some((matcher, Waiter { tx }));
        rx
    }

    /// Resolves on commit of `expected`; rejects
    /// [`CoreError::NavigationInterrupted`] if a different document id
    /// commits first (spec §4.2).
    pub fn wait_for_specific_document(&self, expected: DocumentId) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        *self.specific_document.lock().unwrap() = Some((expected, Waiter { tx }));
        rx
    }

    /// Resolves with the committing document's id on any new-document commit
    /// whose URL matches; rejects on navigation error.
    pub fn wait_for_new_document(
        &self,
        matcher: UrlMatcher,
    ) -> oneshot::Receiver<Result<DocumentId>> {
        let (tx, rx) = oneshot::channel();
        *self.any_new_document.lock().unwrap() = Some((matcher, Waiter { tx }));
        rx
    }

    /// Resolves when `event` has fired on `frame` and recursively on every
    /// descendant (spec §4.2 `waitForLifecycle`). The subtree predicate is
    /// recomputed on every lifecycle notification anywhere in the page; this
    /// call only records intent, `on_lifecycle` does the recomputation.
    pub fn wait_for_lifecycle(&self, event: LifecycleEvent) -> oneshot::Receiver<Result<()>> {
        let (tx, rx) = oneshot::channel();
        *self.lifecycle.lock().unwrap() = Some((event, Waiter { tx }));
        rx
    }

    pub fn on_same_document(&self, url: &str) {
        if let Some((matcher, waiter)) = self.same_document.lock().unwrap().take() {
            if matcher.matches(url) {
                let _ = waiter.tx.send(Ok(()));
            } else {
                *self.same_document.lock().unwrap() = Some((matcher, waiter));
            }
        }
    }

    pub fn on_new_document(&self, committed: &DocumentId, url: Option<&str>, error: Option<String>) {
        if let Some((expected, waiter)) = self.specific_document.lock().unwrap().take() {
            if &expected == committed {
                let result = match error.clone() {
                    Some(msg) => Err(CoreError::Navigation(msg)),
                    None => Ok(()),
                };
                let _ = waiter.tx.send(result);
            } else if error.is_none() {
                // a *different* document committed before ours.
                let _ = waiter.tx.send(Err(CoreError::NavigationInterrupted));
            } else {
                *self.specific_document.lock().unwrap() = Some((expected, waiter));
            }
        }

        if let Some((matcher, waiter)) = self.any_new_document.lock().unwrap().take() {
            match error {
                Some(msg) => {
                    let _ = waiter.tx.send(Err(CoreError::Navigation(msg)));
                }
                None => {
                    if url.map(|u| matcher.matches(u)).unwrap_or(false) {
                        let _ = waiter.tx.send(Ok(committed.clone()));
                    } else {
                        *self.any_new_document.lock().unwrap() = Some((matcher, waiter));
                    }
                }
            }
        }
    }

    /// Invoked by the frame whose subtree just changed lifecycle state
    /// (spec §4.5 `frameLifecycleEvent`: "notify ancestors' Frame Tasks via
    /// `onLifecycle(frame, event)`"). `is_subtree_complete` is supplied by
    /// the caller (the [`Frame`] this task is attached to), since only it
    /// can walk its own descendants.
    pub fn on_lifecycle(&self, frame: &Frame, event: LifecycleEvent) {
        let mut guard = self.lifecycle.lock().unwrap();
        if let Some((want, waiter)) = guard.take() {
            if want == event && frame.lifecycle_complete(want) {
                let _ = waiter.tx.send(Ok(()));
            } else {
                *guard = Some((want, waiter));
            }
        }
    }

    /// Rejects every still-pending waiter kind with a fresh
    /// [`CoreError::FrameDetached`], used when the owning frame detaches
    /// (spec §8: "For every Frame Task alive on frame `f`, either `f` is
    /// attached or the task has been rejected").
    pub fn fail_all_detached(&self) {
        if let Some((_, waiter)) = self.same_document.lock().unwrap().take() {
            let _ = waiter.tx.send(Err(CoreError::FrameDetached(self.frame.clone())));
        }
        if let Some((_, waiter)) = self.specific_document.lock().unwrap().take() {
            let _ = waiter.tx.send(Err(CoreError::FrameDetached(self.frame.clone())));
        }
        if let Some((_, waiter)) = self.any_new_document.lock().unwrap().take() {
            let _ = waiter.tx.send(Err(CoreError::FrameDetached(self.frame.clone())));
        }
        if let Some((_, waiter)) = self.lifecycle.lock().unwrap().take() {
            let _ = waiter.tx.send(Err(CoreError::FrameDetached(self.frame.clone())));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::World;

    fn frame(id: &str) -> std::sync::Arc<Frame> {
        Frame::new_root(FrameId::from(id.to_string()), crate::frame::test_support::fake_collaborators())
    }

    #[tokio::test]
    async fn same_document_resolves_on_matching_url() {
        let task = FrameTask::new(&FrameId::from("f1".to_string()));
        let rx = task.wait_for_same_document_navigation(UrlMatcher::Exact("https://a/#x".into()));
        task.on_same_document("https://a/#y");
        task.on_same_document("https://a/#x");
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn specific_document_rejects_on_interruption() {
        let task = FrameTask::new(&FrameId::from("f1".to_string()));
        let rx = task.wait_for_specific_document(DocumentId::from("D1".to_string()));
        task.on_new_document(&DocumentId::from("D2".to_string()), Some("https://a/"), None);
        assert!(matches!(rx.await.unwrap(), Err(CoreError::NavigationInterrupted)));
    }

    #[tokio::test]
    async fn specific_document_resolves_on_match() {
        let task = FrameTask::new(&FrameId::from("f1".to_string()));
        let rx = task.wait_for_specific_document(DocumentId::from("D1".to_string()));
        task.on_new_document(&DocumentId::from("D1".to_string()), Some("https://a/"), None);
        assert!(rx.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn lifecycle_waits_for_subtree() {
        let world = World::Main;
        let _ = world;
        let f = frame("root");
        let task = FrameTask::new(&f.id());
        let rx = task.wait_for_lifecycle(LifecycleEvent::Load);
        // not complete yet
        task.on_lifecycle(&f, LifecycleEvent::Load);
        f.mark_lifecycle_fired_for_test(LifecycleEvent::Load);
        task.on_lifecycle(&f, LifecycleEvent::Load);
        assert!(rx.await.unwrap().is_ok());
    }
}
