//! A one-shot broadcast signal: many waiters, fired at most once. Backs the
//! page-disconnect and frame-detach cancellation sources every caller
//! operation races against (spec §4.4 preamble, §5 "Suspension points").

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll, Waker};

struct Inner {
    fired: bool,
    wakers: Vec<Waker>,
}

#[derive(Clone)]
pub struct Signal {
    inner: Arc<Mutex<Inner>>,
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}

impl Signal {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                fired: false,
                wakers: Vec::new(),
            })),
        }
    }

    /// Idempotent: firing a signal twice is a no-op.
    pub fn fire(&self) {
        let mut inner = self.inner.lock().unwrap();
        if !inner.fired {
            inner.fired = true;
            for waker in inner.wakers.drain(..) {
                waker.wake();
            }
        }
    }

    pub fn is_fired(&self) -> bool {
        self.inner.lock().unwrap().fired
    }

    pub fn wait(&self) -> SignalWait {
        SignalWait {
            signal: self.clone(),
        }
    }
}

pub struct SignalWait {
    signal: Signal,
}

impl Future for SignalWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        let mut inner = self.signal.inner.lock().unwrap();
        if inner.fired {
            Poll::Ready(())
        } else {
            inner.wakers.push(cx.waker().clone());
            Poll::Pending
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn fires_all_waiters() {
        let signal = Signal::new();
        let a = signal.wait();
        let b = signal.wait();
        signal.fire();
        a.await;
        b.await;
    }

    #[tokio::test]
    async fn fire_is_idempotent() {
        let signal = Signal::new();
        signal.fire();
        signal.fire();
        assert!(signal.is_fired());
        signal.wait().await;
    }
}
