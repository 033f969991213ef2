//! The signal barrier (spec §4.1): lets an input action wait for every
//! navigation it might have triggered before returning control to the
//! caller.

use std::future::Future;
use std::sync::{Arc, Mutex};

use futures::channel::oneshot;

struct Inner {
    count: Mutex<i64>,
    notify: Mutex<Option<oneshot::Sender<()>>>,
    rx: Mutex<Option<oneshot::Receiver<()>>>,
}

/// A reference-counted latch. `retain`/`release` must be strictly paired;
/// the barrier cannot resolve before every retain has a matching release,
/// which is what lets one counter track N concurrent input actions and M
/// concurrent frame navigations uniformly (spec §4.1 "Rationale").
#[derive(Clone)]
pub struct SignalBarrier {
    inner: Arc<Inner>,
}

impl Default for SignalBarrier {
    fn default() -> Self {
        Self::new()
    }
}

impl SignalBarrier {
    /// Creates a barrier with `protectCount = 1`, a self-retain released by
    /// `wait_for`.
    pub fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self {
            inner: Arc::new(Inner {
                count: Mutex::new(1),
                notify: Mutex::new(Some(tx)),
                rx: Mutex::new(Some(rx)),
            }),
        }
    }

    pub fn retain(&self) {
        *self.inner.count.lock().unwrap() += 1;
    }

    pub fn release(&self) {
        let mut count = self.inner.count.lock().unwrap();
        *count -= 1;
        if *count == 0 {
            if let Some(tx) = self.inner.notify.lock().unwrap().take() {
                let _ = tx.send(());
            }
        }
    }

    /// Called when the `FrameManager` observes a navigation request on any
    /// frame while this barrier is active: retains, spawns a background
    /// race against the navigation's possible outcomes, and releases once
    /// `settle` resolves (spec §4.1 `addFrameNavigation`).
    pub fn track_navigation(&self, settle: impl Future<Output = ()> + Send + 'static) {
        self.retain();
        let this = self.clone();
        crate::rt::spawn(async move {
            settle.await;
            this.release();
        });
    }

    /// Releases the self-retain and waits until the count returns to zero.
    /// Resolves immediately if no navigation was ever tracked.
    pub async fn wait_for(&self) {
        self.release();
        let rx = self.inner.rx.lock().unwrap().take();
        if let Some(rx) = rx {
            let _ = rx.await;
        }
    }

    /// Identity comparison, used by the active-barrier registry to remove
    /// exactly one entry (spec §4.1: "kept in the Frame Manager's
    /// active-barrier set").
    pub fn same(a: &Self, b: &Self) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn resolves_immediately_with_no_navigations() {
        let barrier = SignalBarrier::new();
        barrier.wait_for().await;
    }

    #[tokio::test]
    async fn waits_for_tracked_navigation() {
        let barrier = SignalBarrier::new();
        let settled = Arc::new(AtomicBool::new(false));
        let settled2 = settled.clone();
        barrier.track_navigation(async move {
            crate::rt::sleep(Duration::from_millis(20)).await;
            settled2.store(true, Ordering::SeqCst);
        });
        barrier.wait_for().await;
        assert!(settled.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn handles_multiple_concurrent_navigations() {
        let barrier = SignalBarrier::new();
        let count = Arc::new(std::sync::atomic::AtomicU32::new(0));
        for delay_ms in [5, 15, 25] {
            let count = count.clone();
            barrier.track_navigation(async move {
                crate::rt::sleep(Duration::from_millis(delay_ms)).await;
                count.fetch_add(1, Ordering::SeqCst);
            });
        }
        barrier.wait_for().await;
        assert_eq!(count.load(Ordering::SeqCst), 3);
    }
}
