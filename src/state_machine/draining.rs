use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use crate::config::SessionConfig;
use crate::context::ContextCodec;
use crate::driver::BrowserHandle;
use crate::hooks::EndReason;

use super::{ClosedState, ErrorState, FailedFrom, SessionDeps};

#[derive(Clone)]
pub enum DrainOutcome {
    Closed(ClosedState),
    Error(ErrorState),
}

/// No new critical work; in-flight work is given a bounded chance to
/// complete, then the browser is closed regardless.
#[derive(Clone)]
pub struct DrainingState {
    deps: Arc<SessionDeps>,
    browser: Arc<dyn BrowserHandle>,
    reason: EndReason,
    config: SessionConfig,
    cell: Arc<OnceCell<DrainOutcome>>,
}

impl DrainingState {
    pub fn new(deps: Arc<SessionDeps>, browser: Arc<dyn BrowserHandle>, reason: EndReason, config: SessionConfig) -> Self {
        Self {
            deps,
            browser,
            reason,
            config,
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub fn reason(&self) -> &EndReason {
        &self.reason
    }

    /// Drains the scheduler, fires `onSessionEnd`, snapshots context, closes
    /// the browser, cancels anything left. Idempotent and cached the same
    /// way as `LaunchingState::await_launch`, so concurrent callers all
    /// observe the same outcome instead of racing to close twice.
    pub async fn await_drain(&self) -> DrainOutcome {
        self.cell.get_or_init(|| self.do_drain()).await.clone()
    }

    async fn do_drain(&self) -> DrainOutcome {
        let deadline = self.deps.shared.runtime.drain_timeout();
        self.deps.scheduler.drain(deadline).await;

        self.deps.shared.hooks.session_end(Some(&self.config.session_context)).await;

        let pages = self.browser.pages().await.unwrap_or_default();
        let user_data_dir = self.config.user_data_dir.as_deref();
        let snapshot =
            ContextCodec::snapshot(Some(&self.config.session_context), &self.browser, &pages, user_data_dir).await;

        let close_result = self.browser.close().await;
        self.deps.scheduler.cancel_all("drain complete");

        match close_result {
            Ok(()) => {
                self.deps.shared.hooks.closed().await;
                DrainOutcome::Closed(ClosedState::new(self.deps.shared.clone(), Some(snapshot)))
            }
            Err(e) => {
                warn!("draining: browser close failed: {e}");
                let message = e.to_string();
                self.deps.shared.hooks.enter_error(FailedFrom::Draining.as_str(), &message).await;
                DrainOutcome::Error(ErrorState::new(self.deps.shared.clone(), message, FailedFrom::Draining))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{FakeBrowserHandle, FakeBrowserLauncher};
    use crate::hooks::HookFabric;
    use crate::scheduler::TaskScheduler;
    use std::sync::atomic::Ordering;
    use tokio::sync::mpsc;

    fn draining_state(browser: Arc<FakeBrowserHandle>) -> DrainingState {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runtime = crate::config::RuntimeConfig::default();
        let shared = Arc::new(super::super::RuntimeDeps {
            driver: tokio::sync::Mutex::new(crate::driver::BrowserDriver::new(Arc::new(
                FakeBrowserLauncher::new(),
            ))),
            hooks: HookFabric::new(runtime.hook_timeout()),
            runtime,
            events_tx,
        });
        let deps = Arc::new(SessionDeps {
            shared,
            scheduler: TaskScheduler::new(),
        });
        DrainingState::new(deps, browser, EndReason::requested(), SessionConfig::default())
    }

    #[tokio::test]
    async fn successful_close_reaches_closed_with_a_snapshot() {
        let browser = FakeBrowserHandle::new();
        let draining = draining_state(browser.clone());
        match draining.await_drain().await {
            DrainOutcome::Closed(closed) => assert!(closed.last_context.is_some()),
            DrainOutcome::Error(err) => panic!("expected Closed, got Error({})", err.error),
        }
        assert!(browser.is_closed());
    }

    #[tokio::test]
    async fn await_drain_is_cached_across_calls() {
        let browser = FakeBrowserHandle::new();
        let draining = draining_state(browser);
        draining.await_drain().await;
        draining.await_drain().await;
    }

    #[tokio::test]
    async fn close_failure_reaches_error_with_draining_origin() {
        let browser = FakeBrowserHandle::new();
        browser.fail_close.store(true, Ordering::SeqCst);
        let draining = draining_state(browser);
        match draining.await_drain().await {
            DrainOutcome::Error(err) => assert_eq!(err.failed_from, FailedFrom::Draining),
            DrainOutcome::Closed(_) => panic!("expected Error"),
        }
    }
}
