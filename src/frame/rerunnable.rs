//! A long-lived task bound to one `(frame, world)` that re-executes itself
//! every time a fresh execution context appears, until it succeeds, is
//! cancelled, or hits a non-context-destruction error (spec §3 "Rerunnable
//! Task", §4.3).

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use futures::channel::oneshot;

use crate::contracts::{ExecutionContext, PollBuilder};
use crate::error::{CoreError, Result};
use crate::frame::Frame;
use crate::ids::{FrameId, TaskId, World};
use crate::progress::Progress;

/// Type-erased handle so a frame's per-world task set can hold rerunnable
/// tasks of different result types in one collection.
pub(crate) trait RerunnableHandle: Send + Sync {
    fn rerun(self: Arc<Self>, ctx: Arc<dyn ExecutionContext>);
    fn terminate(&self, error: CoreError);
}

fn next_task_id() -> TaskId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    TaskId(NEXT.fetch_add(1, Ordering::Relaxed))
}

struct Shared<T> {
    id: TaskId,
    frame: FrameId,
    owner: Weak<Frame>,
    world: World,
    builder: PollBuilder<T>,
    progress: Progress,
    tx: Mutex<Option<oneshot::Sender<Result<T>>>>,
    generation: AtomicU64,
}

/// The task itself. Cloned cheaply (it's an `Arc` internally); callers
/// receive a [`oneshot::Receiver`] tied to its resolution rather than the
/// task object.
pub struct RerunnableTask<T>(Arc<Shared<T>>);

impl<T> Clone for RerunnableTask<T> {
    fn clone(&self) -> Self {
        RerunnableTask(self.0.clone())
    }
}

impl<T: Send + 'static> RerunnableTask<T> {
    /// Constructs the task and registers it in `world`'s task set on
    /// `frame`. If the slot already holds a context, reruns immediately;
    /// otherwise the next `_setContext(world, ctx)` transition triggers the
    /// first run (spec §4.3 step 1).
    pub fn spawn(
        frame: &Arc<Frame>,
        world: World,
        builder: PollBuilder<T>,
        progress: Progress,
    ) -> (Self, oneshot::Receiver<Result<T>>) {
        let (tx, rx) = oneshot::channel();
        let id = next_task_id();
        let task = RerunnableTask(Arc::new(Shared {
            id,
            frame: frame.id(),
            owner: Arc::downgrade(frame),
            world,
            builder,
            progress,
            tx: Mutex::new(Some(tx)),
            generation: AtomicU64::new(0),
        }));
        frame.register_rerunnable(world, id, Arc::new(task.clone()) as Arc<dyn RerunnableHandle>);
        if let Some(ctx) = frame.context_slot(world).current() {
            Arc::new(task.clone()).rerun(ctx);
        }
        (task, rx)
    }

    pub fn terminate(&self, error: CoreError) {
        RerunnableHandle::terminate(self, error);
    }
}

impl<T: Send + 'static> RerunnableHandle for RerunnableTask<T> {
    /// Invokes the builder against `ctx`, awaits its poll result, and
    /// resolves (on success or a non-context-destruction error) or silently
    /// waits for the next context (spec §4.3 steps 2-4).
    fn rerun(self: Arc<Self>, ctx: Arc<dyn ExecutionContext>) {
        let shared = self.0.clone();
        let generation = shared.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let fut: std::pin::Pin<Box<dyn Future<Output = Result<T>> + Send>> =
            (shared.builder)(ctx, shared.progress.clone());
        crate::rt::spawn(async move {
            let result = fut.await;
            if shared.generation.load(Ordering::SeqCst) != generation {
                // superseded by a newer context transition; let that one resolve.
                return;
            }
            match result {
                Ok(value) => resolve(&shared, Ok(value)),
                Err(err) if CoreError::is_context_destroyed(&err.to_string()) => {
                    tracing::trace!(
                        frame = %shared.frame,
                        world = ?shared.world,
                        "execution context destroyed mid-poll, awaiting next context"
                    );
                }
                Err(err) => resolve(&shared, Err(err)),
            }
        });
    }

    fn terminate(&self, error: CoreError) {
        resolve(&self.0, Err(error));
    }
}

/// Sends `result` to whichever caller is awaiting this task (a no-op if
/// already resolved) and deregisters the task from its owning frame's world
/// task set, since a resolved rerunnable no longer needs `rerun` calls.
fn resolve<T>(shared: &Shared<T>, result: Result<T>) {
    if let Some(tx) = shared.tx.lock().unwrap().take() {
        let _ = tx.send(result);
    }
    if let Some(frame) = shared.owner.upgrade() {
        frame.deregister_rerunnable(shared.world, shared.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contracts::BoxFuture;
    use crate::frame::test_support::{fake_collaborators, FakeContext};
    use crate::ids::World;
    use std::sync::atomic::{AtomicU32, Ordering as O};

    fn builder_counting(calls: Arc<AtomicU32>, succeed_on: u32) -> PollBuilder<u32> {
        Arc::new(move |_ctx, _progress| {
            let calls = calls.clone();
            let fut: BoxFuture<'static, Result<u32>> = Box::pin(async move {
                let n = calls.fetch_add(1, O::SeqCst) + 1;
                if n >= succeed_on {
                    Ok(n)
                } else {
                    Err(CoreError::ExecutionContextDestroyed)
                }
            });
            fut
        })
    }

    #[tokio::test]
    async fn reruns_on_context_swap_and_resolves() {
        let frame = crate::frame::Frame::new_root(
            FrameId::from("f1".to_string()),
            fake_collaborators(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let progress = crate::progress::ProgressController::new(None).progress();
        let (_task, rx) =
            RerunnableTask::spawn(&frame, World::Main, builder_counting(calls.clone(), 2), progress);
        // no context yet: task is idle, waiting for the slot.
        frame.test_set_context(World::Main, Arc::new(FakeContext(World::Main)));
        // first run swallows (context "destroyed"), second succeeds after a
        // fresh context transition.
        frame.test_clear_context(World::Main);
        frame.test_set_context(World::Main, Arc::new(FakeContext(World::Main)));
        let result = rx.await.unwrap();
        assert_eq!(result.unwrap(), 2);
    }

    #[tokio::test]
    async fn terminate_rejects_external_promise() {
        let frame = crate::frame::Frame::new_root(
            FrameId::from("f2".to_string()),
            fake_collaborators(),
        );
        let calls = Arc::new(AtomicU32::new(0));
        let progress = crate::progress::ProgressController::new(None).progress();
        let builder = builder_counting(calls, 99);
        let (task, rx) = RerunnableTask::spawn(&frame, World::Main, builder, progress);
        task.terminate(CoreError::FrameDetached(frame.id()));
        assert!(rx.await.unwrap().is_err());
    }
}
