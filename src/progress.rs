//! The `ProgressController` / `Progress` primitive (spec §4.6, §5).
//!
//! Every caller-facing [`Frame`](crate::frame::Frame) operation runs under a
//! fresh controller parameterized by a per-operation timeout, and is
//! additionally cancelled on page-disconnect and frame-detach (spec §4.4
//! preamble). `Progress` is the handle threaded through the operation: it
//! exposes a log sink, an `is_running` check for retry loops, and a registry
//! of cleanup callbacks that fire once, when the operation is aborted.
//!
//! The spec is explicit that cleanup must not rely on unwinding a call stack
//! (§9 design notes) — so cleanup is an explicit callback registry rather
//! than a `Drop` impl, even though the latter would also work in Rust.

use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use crate::error::CoreError;
use crate::ids::FrameId;

/// Why an operation's `Progress` was aborted.
#[derive(Debug, Clone)]
pub enum AbortReason {
    Timeout(Duration),
    PageDisconnected,
    FrameDetached(FrameId),
}

impl From<AbortReason> for CoreError {
    fn from(reason: AbortReason) -> Self {
        match reason {
            AbortReason::Timeout(d) => CoreError::Timeout(d.as_millis() as u64),
            AbortReason::PageDisconnected => CoreError::PageDisconnected,
            AbortReason::FrameDetached(id) => CoreError::FrameDetached(id),
        }
    }
}

type Cleanup = Box<dyn FnOnce() + Send>;

struct Inner {
    running: AtomicBool,
    log: Mutex<Vec<String>>,
    cleanups: Mutex<Vec<Cleanup>>,
    started: Instant,
}

impl fmt::Debug for Inner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Inner")
            .field("running", &self.running.load(Ordering::SeqCst))
            .field("started", &self.started)
            .finish()
    }
}

/// Cheap-to-clone handle passed down into an operation. Every suspension
/// point in the operation should check [`Progress::is_running`] before
/// continuing (spec §4.4.1 step 2, the retry-with-selector loop).
#[derive(Debug, Clone)]
pub struct Progress {
    inner: Arc<Inner>,
}

impl Progress {
    fn new() -> Self {
        Self {
            inner: Arc::new(Inner {
                running: AtomicBool::new(true),
                log: Mutex::new(Vec::new()),
                cleanups: Mutex::new(Vec::new()),
                started: Instant::now(),
            }),
        }
    }

    /// `true` until the controller aborts this progress.
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Appends a line to the operation's progress log (spec §7: "errors...
    /// log as `progress.log`").
    pub fn log(&self, msg: impl Into<String>) {
        let msg = msg.into();
        tracing::debug!(elapsed = ?self.inner.started.elapsed(), "{msg}");
        self.inner.log.lock().unwrap().push(msg);
    }

    /// Returns a snapshot of everything logged so far.
    pub fn log_lines(&self) -> Vec<String> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Registers a callback that runs exactly once, only if this progress is
    /// aborted before the operation otherwise completes. Used for element
    /// handle disposal, frame-task deregistration, and signal-barrier
    /// membership (spec §5 "Resource discipline").
    pub fn cleanup_when_aborted(&self, f: impl FnOnce() + Send + 'static) {
        self.inner.cleanups.lock().unwrap().push(Box::new(f));
    }

    fn abort(&self) {
        if self
            .inner
            .running
            .compare_exchange(true, false, Ordering::SeqCst, Ordering::SeqCst)
            .is_ok()
        {
            let cleanups = std::mem::take(&mut *self.inner.cleanups.lock().unwrap());
            for cleanup in cleanups {
                cleanup();
            }
        }
    }
}

/// Drives one caller operation: races it against an optional timeout and an
/// externally supplied cancellation future (page-disconnect, frame-detach),
/// per spec §4.4/§5. Mirrors the intent of Playwright's
/// `ProgressController.run(...)`.
pub struct ProgressController {
    progress: Progress,
    timeout: Option<Duration>,
}

impl ProgressController {
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            progress: Progress::new(),
            timeout,
        }
    }

    pub fn progress(&self) -> Progress {
        self.progress.clone()
    }

    /// Runs `f` to completion, aborting it (and running registered cleanup
    /// callbacks) if the timeout elapses or `cancel` resolves first.
    pub async fn run_abortable_task<F, Fut, T>(
        timeout: Option<Duration>,
        cancel: impl Future<Output = AbortReason>,
        f: F,
    ) -> Result<T, CoreError>
    where
        F: FnOnce(Progress) -> Fut,
        Fut: Future<Output = Result<T, CoreError>>,
    {
        let controller = ProgressController::new(timeout);
        let progress = controller.progress();
        let op = f(progress.clone());

        futures::pin_mut!(op);
        futures::pin_mut!(cancel);

        let sleep = async {
            match timeout {
                Some(d) => {
                    crate::rt::sleep(d).await;
                    AbortReason::Timeout(d)
                }
                None => futures::future::pending().await,
            }
        };
        futures::pin_mut!(sleep);

        futures::select! {
            res = op => {
                res
            }
            reason = sleep => {
                progress.abort();
                Err(reason.into())
            }
            reason = cancel => {
                progress.abort();
                Err(reason.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    #[tokio::test]
    async fn completes_before_timeout() {
        let result = ProgressController::run_abortable_task(
            Some(Duration::from_millis(200)),
            futures::future::pending(),
            |_progress| async { Ok::<_, CoreError>(42) },
        )
        .await
        .unwrap();
        assert_eq!(result, 42);
    }

    #[tokio::test]
    async fn timeout_runs_cleanup() {
        let ran = Arc::new(AtomicU32::new(0));
        let ran2 = ran.clone();
        let result: Result<(), CoreError> = ProgressController::run_abortable_task(
            Some(Duration::from_millis(10)),
            futures::future::pending(),
            move |progress| {
                progress.cleanup_when_aborted(move || {
                    ran2.fetch_add(1, Ordering::SeqCst);
                });
                async {
                    futures::future::pending::<()>().await;
                    Ok(())
                }
            },
        )
        .await;
        assert!(matches!(result, Err(CoreError::Timeout(_))));
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_future_aborts_immediately() {
        let result: Result<(), CoreError> = ProgressController::run_abortable_task(
            None,
            async { AbortReason::PageDisconnected },
            |_progress| async {
                futures::future::pending::<()>().await;
                Ok(())
            },
        )
        .await;
        assert!(matches!(result, Err(CoreError::PageDisconnected)));
    }
}
