//! Runtime-agnostic helpers, mirroring the `cfg_if!`-gated dual `async-std`
//! / `tokio` support the teacher crate uses for its process and filesystem
//! primitives (`async_process.rs`, `utils.rs`).
//!
//! The coordination core itself needs no executor: every suspension point
//! (§5) goes through a future supplied by the caller or by
//! [`futures_timer::Delay`], both runtime-agnostic. The two places that
//! genuinely depend on a runtime are reading a local `path` for
//! `addScriptTag`/`addStyleTag` (spec §4.4, §6) and `waitForTimeout`'s sleep.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use crate::error::Result;

/// Fire-and-forget spawn of a `'static` future on whichever runtime feature
/// is enabled, used for the small number of background tasks the spec
/// describes as running independently of the caller (the signal barrier's
/// per-navigation race, spec §4.1).
pub(crate) fn spawn(fut: impl Future<Output = ()> + Send + 'static) {
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-runtime")] {
            tokio::spawn(fut);
        } else if #[cfg(feature = "async-std-runtime")] {
            async_std::task::spawn(fut);
        } else {
            compile_error!("either `async-std-runtime` or `tokio-runtime` must be enabled");
        }
    }
}

/// Reads a local file as UTF-8, the way `addScriptTag`/`addStyleTag`'s
/// `path` option requires (spec §6 "Environment interactions").
pub(crate) async fn read_to_string(path: impl AsRef<Path>) -> Result<String> {
    cfg_if::cfg_if! {
        if #[cfg(feature = "tokio-runtime")] {
            Ok(tokio::fs::read_to_string(path.as_ref()).await?)
        } else if #[cfg(feature = "async-std-runtime")] {
            Ok(async_std::fs::read_to_string(path.as_ref()).await?)
        } else {
            compile_error!("either `async-std-runtime` or `tokio-runtime` must be enabled");
        }
    }
}

/// Sleeps for the given duration. Used by `waitForTimeout` (spec §4.4) and
/// is deliberately a thin wrapper over `futures_timer::Delay` rather than a
/// runtime-specific sleep, so it works under either feature flag and in
/// plain `futures::executor::block_on` tests.
pub(crate) async fn sleep(duration: Duration) {
    futures_timer::Delay::new(duration).await;
}

/// Appends a `//# sourceURL=...` (or `/*# sourceURL=...*/`) annotation with
/// newlines stripped from `path`, per spec §6.
pub(crate) fn source_url_comment(path: &Path, style: SourceUrlStyle) -> String {
    let url: String = path.to_string_lossy().chars().filter(|c| *c != '\n' && *c != '\r').collect();
    match style {
        SourceUrlStyle::Script => format!("//# sourceURL={url}"),
        SourceUrlStyle::Style => format!("/*# sourceURL={url}*/"),
    }
}

#[derive(Debug, Copy, Clone)]
pub(crate) enum SourceUrlStyle {
    Script,
    Style,
}

/// Yields to the executor once. Used between releasing a signal barrier and
/// unregistering it, to give any navigation the action just triggered a
/// chance to actually reach the `FrameManager` before the barrier is
/// forgotten (spec §4.1 `waitForInputActionSignalBarrier`).
pub(crate) async fn yield_now() {
    struct YieldOnce(bool);

    impl Future for YieldOnce {
        type Output = ();

        fn poll(
            mut self: std::pin::Pin<&mut Self>,
            cx: &mut std::task::Context<'_>,
        ) -> std::task::Poll<()> {
            if self.0 {
                std::task::Poll::Ready(())
            } else {
                self.0 = true;
                cx.waker().wake_by_ref();
                std::task::Poll::Pending
            }
        }
    }

    YieldOnce(false).await
}
