//! Plugin observation fabric: fan out transition events to registered
//! plugins without letting them mediate the transition.
//!
//! A narrow, optional-semantics observer trait fanned out by a registry,
//! generalized from a single shutdown callback to the full set of
//! transition points a plugin might want to observe.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::warn;

use crate::config::SessionContext;
use crate::error::RuntimeError;

/// A session-scoped reason string plus the optional `file-protocol-violation`
/// marker a file-protocol-ending session tags itself with.
#[derive(Debug, Clone)]
pub struct EndReason(pub String);

impl EndReason {
    pub fn requested() -> Self {
        Self("requested".to_string())
    }

    pub fn file_protocol_violation(url: impl Into<String>) -> Self {
        Self(format!("file-protocol-violation:{}", url.into()))
    }
}

/// All callbacks are optional; a plugin implements only the ones it cares
/// about. Default bodies are no-ops.
#[async_trait]
pub trait Plugin: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn on_enter_live(&self) {}
    async fn on_exit_live(&self) {}
    async fn on_enter_draining(&self, _reason: &EndReason) {}
    async fn on_enter_error(&self, _failed_from: &str, _error: &str) {}
    async fn on_closed(&self) {}
    async fn on_launch_failed(&self, _error: &str) {}
    async fn on_crash(&self, _error: &str) {}
    async fn on_before_page_close(&self, _page_id: &str) {}
    async fn on_session_end(&self, _context: Option<&SessionContext>) {}
}

/// Registration-order fan-out with a per-call deadline. Holds no session
/// state; it is handed a reentrancy flag by the caller so a plugin cannot
/// call back into the Orchestrator's state-changing methods from inside a
/// hook it is currently running under.
pub struct HookFabric {
    plugins: Vec<Arc<dyn Plugin>>,
    hook_timeout: Duration,
    in_hook: Arc<AtomicBool>,
}

impl HookFabric {
    pub fn new(hook_timeout: Duration) -> Self {
        Self {
            plugins: Vec::new(),
            hook_timeout,
            in_hook: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Idempotent-with-warning: registering a plugin whose name is already
    /// present is allowed but logged, rather than treated as an error.
    pub fn register(&mut self, plugin: Arc<dyn Plugin>) {
        if self.plugins.iter().any(|p| p.name() == plugin.name()) {
            warn!("plugin '{}' registered more than once", plugin.name());
        }
        self.plugins.push(plugin);
    }

    /// True while a hook callback is executing on the calling task. The
    /// Orchestrator checks this before honoring a state-changing call and
    /// returns [`RuntimeError::Reentrant`] if a plugin tries to drive a
    /// transition from inside its own callback.
    pub fn reentrancy_guard(&self) -> Arc<AtomicBool> {
        self.in_hook.clone()
    }

    pub fn check_not_reentrant(&self) -> Result<(), RuntimeError> {
        if self.in_hook.load(Ordering::SeqCst) {
            return Err(RuntimeError::Reentrant);
        }
        Ok(())
    }

    async fn fan_out<'a, F, Fut>(&'a self, call: F)
    where
        F: Fn(&'a Arc<dyn Plugin>) -> Fut,
        Fut: std::future::Future<Output = ()> + Send + 'a,
    {
        for plugin in &self.plugins {
            self.in_hook.store(true, Ordering::SeqCst);
            let result = tokio::time::timeout(self.hook_timeout, call(plugin)).await;
            self.in_hook.store(false, Ordering::SeqCst);
            if result.is_err() {
                warn!(
                    "plugin '{}' exceeded hook deadline of {:?}",
                    plugin.name(),
                    self.hook_timeout
                );
            }
        }
    }

    pub async fn enter_live(&self) {
        self.fan_out(|p| p.on_enter_live()).await;
    }

    pub async fn exit_live(&self) {
        self.fan_out(|p| p.on_exit_live()).await;
    }

    pub async fn enter_draining(&self, reason: &EndReason) {
        self.fan_out(|p| p.on_enter_draining(reason)).await;
    }

    pub async fn enter_error(&self, failed_from: &str, error: &str) {
        self.fan_out(|p| p.on_enter_error(failed_from, error)).await;
    }

    pub async fn closed(&self) {
        self.fan_out(|p| p.on_closed()).await;
    }

    pub async fn launch_failed(&self, error: &str) {
        self.fan_out(|p| p.on_launch_failed(error)).await;
    }

    pub async fn crash(&self, error: &str) {
        self.fan_out(|p| p.on_crash(error)).await;
    }

    pub async fn before_page_close(&self, page_id: &str) {
        self.fan_out(|p| p.on_before_page_close(page_id)).await;
    }

    pub async fn session_end(&self, context: Option<&SessionContext>) {
        self.fan_out(|p| p.on_session_end(context)).await;
    }
}
