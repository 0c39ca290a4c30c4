use std::sync::Arc;

use crate::config::SessionContext;

use super::{IdleState, RuntimeDeps};

/// Cleanly terminated. Carries the last snapshot taken on the way in, if
/// any, so the Orchestrator can return it from `getBrowserState` calls made
/// right after shutdown.
#[derive(Clone)]
pub struct ClosedState {
    deps: Arc<RuntimeDeps>,
    pub last_context: Option<SessionContext>,
}

impl ClosedState {
    pub fn new(deps: Arc<RuntimeDeps>, last_context: Option<SessionContext>) -> Self {
        Self { deps, last_context }
    }

    pub fn restart(&self) -> IdleState {
        IdleState::new(self.deps.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::driver::testing::FakeBrowserLauncher;
    use crate::hooks::HookFabric;
    use tokio::sync::mpsc;

    fn runtime_deps() -> Arc<RuntimeDeps> {
        let (events_tx, _events_rx) = mpsc::unbounded_channel();
        let runtime = crate::config::RuntimeConfig::default();
        Arc::new(RuntimeDeps {
            driver: tokio::sync::Mutex::new(crate::driver::BrowserDriver::new(Arc::new(
                FakeBrowserLauncher::new(),
            ))),
            hooks: HookFabric::new(runtime.hook_timeout()),
            runtime,
            events_tx,
        })
    }

    #[test]
    fn restart_produces_a_fresh_idle_that_can_launch_again() {
        let closed = ClosedState::new(runtime_deps(), None);
        let idle = closed.restart();
        let launching = idle.start(SessionConfig::default());
        assert!(launching.config().headless);
    }

    #[test]
    fn last_context_is_preserved_from_construction() {
        let context = SessionContext::default();
        let closed = ClosedState::new(runtime_deps(), Some(context));
        assert!(closed.last_context.is_some());
    }
}
