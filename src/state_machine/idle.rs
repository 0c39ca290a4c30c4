use std::sync::Arc;

use crate::config::SessionConfig;
use crate::scheduler::TaskScheduler;

use super::{LaunchingState, RuntimeDeps, SessionDeps};

/// No browser. The only legal move is `start`, which stores the config and
/// returns `Launching` without launching anything yet.
#[derive(Clone)]
pub struct IdleState {
    deps: Arc<RuntimeDeps>,
}

impl IdleState {
    pub fn new(deps: Arc<RuntimeDeps>) -> Self {
        Self { deps }
    }

    pub fn start(self, config: SessionConfig) -> LaunchingState {
        let session_deps = Arc::new(SessionDeps {
            shared: self.deps,
            scheduler: TaskScheduler::new(),
        });
        LaunchingState::new(session_deps, config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::driver::testing::FakeBrowserLauncher;
    use crate::driver::BrowserDriver;
    use crate::hooks::HookFabric;
    use tokio::sync::{mpsc, Mutex as AsyncMutex};

    fn runtime_deps() -> Arc<RuntimeDeps> {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runtime = crate::config::RuntimeConfig::default();
        Arc::new(RuntimeDeps {
            driver: AsyncMutex::new(BrowserDriver::new(Arc::new(FakeBrowserLauncher::new()))),
            hooks: HookFabric::new(runtime.hook_timeout()),
            runtime,
            events_tx,
        })
    }

    #[test]
    fn start_carries_the_given_config_into_launching() {
        let idle = IdleState::new(runtime_deps());
        let config = SessionConfig {
            headless: false,
            ..Default::default()
        };
        let launching = idle.start(config);
        assert!(!launching.config().headless);
    }
}
