use std::sync::Arc;

use tokio::sync::Mutex as AsyncMutex;

use crate::config::SessionConfig;
use crate::driver::{BrowserHandle, PageHandle};
use crate::hooks::EndReason;

use super::{DrainingState, ErrorState, FailedFrom, SessionDeps};

/// Accepting operations: a browser and a primary page are live. `end` and
/// `crash` are the only transitions out.
#[derive(Clone)]
pub struct LiveState {
    deps: Arc<SessionDeps>,
    browser: Arc<dyn BrowserHandle>,
    primary_page: Arc<AsyncMutex<Arc<dyn PageHandle>>>,
    config: SessionConfig,
}

impl LiveState {
    pub fn new(
        deps: Arc<SessionDeps>,
        browser: Arc<dyn BrowserHandle>,
        primary_page: Arc<dyn PageHandle>,
        config: SessionConfig,
    ) -> Self {
        Self {
            deps,
            browser,
            primary_page: Arc::new(AsyncMutex::new(primary_page)),
            config,
        }
    }

    pub fn browser(&self) -> Arc<dyn BrowserHandle> {
        self.browser.clone()
    }

    pub async fn primary_page(&self) -> Arc<dyn PageHandle> {
        self.primary_page.lock().await.clone()
    }

    pub async fn set_primary_page(&self, page: Arc<dyn PageHandle>) {
        *self.primary_page.lock().await = page;
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// `Live → Draining`. Hook order: `onExitLive` then `onEnterDraining`,
    /// the generic `onExit(prev) → mutate → onEnter(next)` sequence every
    /// other transition in this module follows.
    pub async fn end(&self, reason: EndReason) -> DrainingState {
        self.deps.shared.hooks.exit_live().await;
        let draining = DrainingState::new(
            self.deps.clone(),
            self.browser.clone(),
            reason.clone(),
            self.config.clone(),
        );
        self.deps.shared.hooks.enter_draining(&reason).await;
        draining
    }

    /// `Live → Error(crashed)`. Hook order is `onCrash → onExitLive →
    /// onEnterError`, the one transition that runs an extra hook ahead of
    /// the generic exit/enter pair so observers learn about the crash
    /// before the session state moves out from under them.
    pub async fn crash(&self, error: impl Into<String>) -> ErrorState {
        let error = error.into();
        self.deps.shared.hooks.crash(&error).await;
        self.deps.shared.hooks.exit_live().await;
        let state = ErrorState::new(self.deps.shared.clone(), error.clone(), FailedFrom::Crashed);
        self.deps.shared.hooks.enter_error(FailedFrom::Crashed.as_str(), &error).await;
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::{FakeBrowserHandle, FakeBrowserLauncher};
    use crate::hooks::HookFabric;
    use crate::scheduler::TaskScheduler;
    use tokio::sync::mpsc;

    async fn live_state() -> LiveState {
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
        let browser = FakeBrowserHandle::new();
        let page = browser.new_page("about:blank").await.unwrap();
        LiveState::new(deps, browser, page, SessionConfig::default())
    }

    #[tokio::test]
    async fn end_transitions_to_draining_with_the_given_reason() {
        let live = live_state().await;
        let draining = live.end(EndReason::requested()).await;
        assert_eq!(draining.reason().0, "requested");
    }

    #[tokio::test]
    async fn crash_transitions_to_error_with_crashed_origin() {
        let live = live_state().await;
        let error = live.crash("disconnected").await;
        assert_eq!(error.failed_from, FailedFrom::Crashed);
        assert_eq!(error.error, "disconnected");
    }
}
