use std::sync::Arc;

use tracing::warn;

use super::{ClosedState, FailedFrom, IdleState, RuntimeDeps};

/// Terminal until explicitly recovered or terminated.
#[derive(Clone)]
pub struct ErrorState {
    deps: Arc<RuntimeDeps>,
    pub error: String,
    pub failed_from: FailedFrom,
}

impl ErrorState {
    pub fn new(deps: Arc<RuntimeDeps>, error: String, failed_from: FailedFrom) -> Self {
        Self {
            deps,
            error,
            failed_from,
        }
    }

    /// `Error → Idle`. A browser only exists to force-close if this error
    /// didn't originate in `Launching` (no process was ever created there).
    pub async fn recover(&self) -> IdleState {
        if self.failed_from != FailedFrom::Launching {
            let mut driver = self.deps.driver.lock().await;
            if let Err(e) = driver.force_close().await {
                warn!("recover: force_close failed: {e}");
            }
        }
        IdleState::new(self.deps.clone())
    }

    /// `Error → Closed`. Always force-closes first, regardless of origin.
    pub async fn terminate(&self) -> ClosedState {
        let mut driver = self.deps.driver.lock().await;
        if let Err(e) = driver.force_close().await {
            warn!("terminate: force_close failed: {e}");
        }
        drop(driver);
        self.deps.hooks.closed().await;
        ClosedState::new(self.deps.clone(), None)
    }
}
