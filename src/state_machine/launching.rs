use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::warn;

use crate::config::SessionConfig;
use crate::context::ContextCodec;

use super::{ErrorState, FailedFrom, LiveState, SessionDeps};

/// Cached, idempotent outcome of `await_launch`: repeated calls must return
/// the same resolved successor without re-running the launch.
#[derive(Clone)]
pub enum LaunchOutcome {
    Live(LiveState),
    Error(ErrorState),
}

/// Awaiting browser readiness. Carries the config so observers can inspect
/// it before launch completes.
#[derive(Clone)]
pub struct LaunchingState {
    deps: Arc<SessionDeps>,
    config: SessionConfig,
    cell: Arc<OnceCell<LaunchOutcome>>,
}

impl LaunchingState {
    pub fn new(deps: Arc<SessionDeps>, config: SessionConfig) -> Self {
        Self {
            deps,
            config,
            cell: Arc::new(OnceCell::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Runs the launch under `TaskScheduler::run_critical` with the
    /// configured launch deadline exactly once; subsequent calls (including
    /// concurrent ones racing on the same `OnceCell`) observe the cached
    /// result.
    pub async fn await_launch(&self) -> LaunchOutcome {
        self.cell
            .get_or_init(|| self.do_launch())
            .await
            .clone()
    }

    async fn do_launch(&self) -> LaunchOutcome {
        let deps = self.deps.clone();
        let config = self.config.clone();
        let timeout = deps.shared.runtime.launch_timeout();

        let launch_future = {
            let deps = deps.clone();
            let config = config.clone();
            async move {
                let mut driver = deps.shared.driver.lock().await;
                driver.launch(&config, deps.shared.events_tx.clone()).await
            }
        };

        let outcome = deps.scheduler.run_critical("launch", timeout, launch_future).await;

        match outcome {
            Ok(Ok(launched)) => {
                if let Err(e) =
                    ContextCodec::restore(&config.session_context, &launched.browser, &launched.primary_page).await
                {
                    warn!("launch: context restore reported a failure: {e}");
                }
                let live = LiveState::new(deps.clone(), launched.browser, launched.primary_page, config);
                deps.shared.hooks.enter_live().await;
                LaunchOutcome::Live(live)
            }
            Ok(Err(driver_err)) => self.failed(&deps, driver_err.to_string()).await,
            Err(runtime_err) => self.failed(&deps, runtime_err.to_string()).await,
        }
    }

    async fn failed(&self, deps: &Arc<SessionDeps>, message: String) -> LaunchOutcome {
        deps.shared.hooks.launch_failed(&message).await;
        LaunchOutcome::Error(ErrorState::new(deps.shared.clone(), message, FailedFrom::Launching))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeBrowserLauncher;
    use crate::driver::BrowserDriver;
    use crate::hooks::HookFabric;
    use crate::scheduler::TaskScheduler;
    use std::sync::atomic::Ordering;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    fn session_deps(launcher: Arc<FakeBrowserLauncher>) -> Arc<SessionDeps> {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runtime = crate::config::RuntimeConfig::default();
        let shared = Arc::new(super::super::RuntimeDeps {
            driver: AsyncMutex::new(BrowserDriver::new(launcher)),
            hooks: HookFabric::new(runtime.hook_timeout()),
            runtime,
            events_tx,
        });
        Arc::new(SessionDeps {
            shared,
            scheduler: TaskScheduler::new(),
        })
    }

    #[tokio::test]
    async fn successful_launch_reaches_live() {
        let launcher = Arc::new(FakeBrowserLauncher::new());
        let deps = session_deps(launcher);
        let launching = LaunchingState::new(deps, SessionConfig::default());
        match launching.await_launch().await {
            LaunchOutcome::Live(_) => {}
            LaunchOutcome::Error(err) => panic!("expected Live, got Error({})", err.error),
        }
    }

    #[tokio::test]
    async fn await_launch_is_cached_across_calls() {
        let launcher = Arc::new(FakeBrowserLauncher::new());
        let deps = session_deps(launcher.clone());
        let launching = LaunchingState::new(deps, SessionConfig::default());
        launching.await_launch().await;
        launching.await_launch().await;
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_launch_reaches_error_with_launching_origin() {
        let launcher = Arc::new(FakeBrowserLauncher::new());
        launcher.fail_launch.store(true, Ordering::SeqCst);
        let deps = session_deps(launcher);
        let launching = LaunchingState::new(deps, SessionConfig::default());
        match launching.await_launch().await {
            LaunchOutcome::Error(err) => assert_eq!(err.failed_from, FailedFrom::Launching),
            LaunchOutcome::Live(_) => panic!("expected Error"),
        }
    }
}
