//! A context slot (spec §3 "Context slot", §4.4.2 "Context slot protocol"):
//! per-world storage for the current `ExecutionContext`, plus a promise
//! that resolves to the next one installed, re-issued every time the slot
//! goes null.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

use crate::contracts::ExecutionContext;

struct SlotState {
    current: Option<Arc<dyn ExecutionContext>>,
    waiters: Vec<Waker>,
}

/// Cheap to clone; every clone observes the same underlying context.
#[derive(Clone)]
pub struct ContextSlot {
    inner: Arc<Mutex<SlotState>>,
}

impl Default for ContextSlot {
    fn default() -> Self {
        Self::new()
    }
}

impl ContextSlot {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(SlotState {
                current: None,
                waiters: Vec::new(),
            })),
        }
    }

    pub fn current(&self) -> Option<Arc<dyn ExecutionContext>> {
        self.inner.lock().unwrap().current.clone()
    }

    /// A future that resolves with whichever context is active the moment
    /// it resolves — "callers awaiting the slot see exactly the context
    /// active at the moment the promise resolves" (spec §3 invariant).
    pub fn wait(&self) -> ContextWait {
        ContextWait { slot: self.clone() }
    }

    /// Installs `ctx`, waking anyone awaiting the slot's promise.
    pub(crate) fn set(&self, ctx: Arc<dyn ExecutionContext>) {
        let mut state = self.inner.lock().unwrap();
        state.current = Some(ctx);
        for waker in state.waiters.drain(..) {
            waker.wake();
        }
    }

    /// Clears the slot; a fresh, as-yet-unresolved promise is implicitly in
    /// effect for the next `wait()` caller.
    pub(crate) fn clear(&self) {
        self.inner.lock().unwrap().current = None;
    }
}

pub struct ContextWait {
    slot: ContextSlot,
}

impl Future for ContextWait {
    type Output = Arc<dyn ExecutionContext>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut state = self.slot.inner.lock().unwrap();
        if let Some(ctx) = &state.current {
            Poll::Ready(ctx.clone())
        } else {
            state.waiters.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::World;
    use async_trait::async_trait;
    use serde_json::Value;

    #[derive(Debug)]
    struct FakeContext;

    #[async_trait]
    impl ExecutionContext for FakeContext {
        fn world(&self) -> World {
            World::Main
        }
        async fn evaluate_internal(
            &self,
            _expression: &str,
            _arg: Option<Value>,
        ) -> crate::error::Result<Value> {
            Ok(Value::Null)
        }
        async fn evaluate_handle_internal(
            &self,
            _expression: &str,
            _arg: Option<Value>,
        ) -> crate::error::Result<Arc<dyn crate::contracts::ElementHandle>> {
            unimplemented!()
        }
        fn injected_script(&self) -> crate::contracts::InjectedScriptHandle {
            crate::contracts::InjectedScriptHandle { context: World::Main }
        }
    }

    #[tokio::test]
    async fn resolves_once_context_installed() {
        let slot = ContextSlot::new();
        assert!(slot.current().is_none());
        let waiter = slot.wait();
        let slot2 = slot.clone();
        crate::rt::spawn(async move {
            crate::rt::sleep(std::time::Duration::from_millis(10)).await;
            slot2.set(Arc::new(FakeContext));
        });
        let ctx = waiter.await;
        assert_eq!(ctx.world(), World::Main);
    }

    #[tokio::test]
    async fn clear_then_set_resolves_new_waiters() {
        let slot = ContextSlot::new();
        slot.set(Arc::new(FakeContext));
        assert!(slot.current().is_some());
        slot.clear();
        assert!(slot.current().is_none());
        let waiter = slot.wait();
        let slot2 = slot.clone();
        crate::rt::spawn(async move {
            crate::rt::sleep(std::time::Duration::from_millis(10)).await;
            slot2.set(Arc::new(FakeContext));
        });
        waiter.await;
    }
}
