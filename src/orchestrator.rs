//! Single-instance façade: serialises state-changing operations behind one
//! mutex, runs the crash-recovery policy, and fronts the WebSocket reverse
//! proxy.
//!
//! A single owned browser, a health-check-then-relaunch policy, and a
//! background task watching process liveness, all driven through the typed
//! session machine in [`crate::state_machine`] instead of a single
//! `Option<Browser>`.

use std::sync::Arc;

use axum::extract::ws::WebSocket;
use futures_util::future::BoxFuture;
use tokio::sync::{mpsc, watch, Mutex};
use tracing::{debug, info, warn};

use crate::config::{RuntimeConfig, SessionConfig, SessionContext};
use crate::context::ContextCodec;
use crate::driver::{BrowserDriver, BrowserHandle, BrowserLauncher, PageHandle};
use crate::error::{RuntimeError, RuntimeResult};
use crate::events::RuntimeEvent;
use crate::hooks::{EndReason, HookFabric, Plugin};
use crate::proxy;
use crate::state_machine::{DrainOutcome, IdleState, LaunchOutcome, RuntimeDeps, SessionStateDyn};

/// Coarse, externally-observable session state, distinct from
/// [`SessionStateDyn`] so callers outside this crate never need to name the
/// per-state structs to ask "what state are we in".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BrowserState {
    Idle,
    Launching,
    Live,
    Draining,
    Closed,
    Error,
}

impl SessionStateDyn {
    fn coarse(&self) -> BrowserState {
        match self {
            SessionStateDyn::Idle(_) => BrowserState::Idle,
            SessionStateDyn::Launching(_) => BrowserState::Launching,
            SessionStateDyn::Live(_) => BrowserState::Live,
            SessionStateDyn::Draining(_) => BrowserState::Draining,
            SessionStateDyn::Closed(_) => BrowserState::Closed,
            SessionStateDyn::Error(_) => BrowserState::Error,
        }
    }
}

/// A caller-registered override for `/` WebSocket upgrades; when present it
/// wins over the default browser reverse-proxy.
pub type CustomProxyHandler = Arc<dyn Fn(WebSocket) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Orchestrator {
    deps: Arc<RuntimeDeps>,
    state: Mutex<SessionStateDyn>,
    /// Flips to `false` the moment the live browser becomes unusable
    /// (close, process exit, or disconnect); the proxy subscribes to this
    /// to tear down bridged sockets without a direct dependency on the
    /// driver.
    browser_alive: watch::Sender<bool>,
    custom_proxy: Mutex<Option<CustomProxyHandler>>,
}

impl Orchestrator {
    /// Builds a fresh runtime `Idle` and spawns the crash-policy loop that
    /// consumes the driver's event stream for the orchestrator's entire
    /// lifetime.
    pub fn new(runtime: RuntimeConfig, launcher: Arc<dyn BrowserLauncher>, plugins: Vec<Arc<dyn Plugin>>) -> Arc<Self> {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let mut hooks = HookFabric::new(runtime.hook_timeout());
        for plugin in plugins {
            hooks.register(plugin);
        }

        let deps = Arc::new(RuntimeDeps {
            driver: Mutex::new(BrowserDriver::new(launcher)),
            hooks,
            runtime,
            events_tx,
        });

        let (browser_alive, _) = watch::channel(false);

        let orchestrator = Arc::new(Self {
            deps: deps.clone(),
            state: Mutex::new(SessionStateDyn::Idle(IdleState::new(deps))),
            browser_alive,
            custom_proxy: Mutex::new(None),
        });

        tokio::spawn(orchestrator.clone().run_event_loop(events_rx));
        orchestrator
    }

    /// Registers a handler that takes over `/` WebSocket upgrades entirely;
    /// pass `None` to fall back to the default browser reverse-proxy.
    pub async fn set_proxy_handler(&self, handler: Option<CustomProxyHandler>) {
        *self.custom_proxy.lock().await = handler;
    }

    async fn run_event_loop(self: Arc<Self>, mut events_rx: mpsc::UnboundedReceiver<RuntimeEvent>) {
        while let Some(event) = events_rx.recv().await {
            match event {
                RuntimeEvent::Disconnected => self.handle_crash().await,
                RuntimeEvent::FileProtocolViolation { url } => self.handle_file_violation(url).await,
                RuntimeEvent::TargetCreated { target } => debug!("target created: {target:?}"),
                RuntimeEvent::TargetChanged { target } => debug!("target changed: {target:?}"),
                RuntimeEvent::TargetDestroyed { target_id } => debug!("target destroyed: {target_id}"),
            }
        }
        debug!("orchestrator event loop ended: driver event channel closed");
    }

    /// `disconnected` while `Live`: `Live → Error(crashed)`, always via
    /// `recover()` to `Idle`; if the crashed session's `keepAlive` was set,
    /// relaunches with the runtime's default config — deliberately never
    /// the crashed session's own config, so a config that reliably crashes
    /// the browser cannot wedge the orchestrator into a relaunch loop.
    async fn handle_crash(&self) {
        let mut state = self.state.lock().await;
        let SessionStateDyn::Live(live) = &*state else {
            return;
        };
        let keep_alive = live.config().keep_alive;
        warn!("driver reported disconnect while live, treating as a crash");
        let error_state = live.crash("browser disconnected").await;
        self.browser_alive.send_replace(false);
        *state = SessionStateDyn::Error(error_state);

        let SessionStateDyn::Error(error_state) = &*state else {
            unreachable!()
        };
        let idle = error_state.recover().await;
        if keep_alive {
            info!("keep-alive is on, relaunching with the runtime's default session config");
            let launching = idle.start(SessionConfig::default());
            *state = SessionStateDyn::Launching(launching.clone());
            match launching.await_launch().await {
                LaunchOutcome::Live(live) => {
                    self.browser_alive.send_replace(true);
                    *state = SessionStateDyn::Live(live);
                }
                LaunchOutcome::Error(err) => *state = SessionStateDyn::Error(err),
            }
        } else {
            *state = SessionStateDyn::Idle(idle);
        }
    }

    /// Invariant 7: any `file://` URL ends the live session, regardless of
    /// whether the driver's own page-close already happened. Drives the
    /// drain through to its terminal state itself, since nothing else will
    /// call `awaitDrain` on a session nobody asked to end.
    async fn handle_file_violation(&self, url: String) {
        let mut state = self.state.lock().await;
        let SessionStateDyn::Live(live) = &*state else {
            debug!("file-protocol violation observed outside Live, ignoring: {url}");
            return;
        };
        warn!("file-protocol violation, ending session: {url}");
        let draining = live.end(EndReason::file_protocol_violation(url)).await;
        *state = SessionStateDyn::Draining(draining.clone());

        match draining.await_drain().await {
            DrainOutcome::Closed(closed) => {
                self.browser_alive.send_replace(false);
                *state = SessionStateDyn::Closed(closed);
            }
            DrainOutcome::Error(err) => {
                *state = SessionStateDyn::Error(err);
            }
        }
    }

    /// `launch(config?)`: returns the existing browser if already `Live`;
    /// otherwise drives `Idle → Launching → {Live | Error}`.
    pub async fn launch(&self, config: Option<SessionConfig>) -> RuntimeResult<Arc<dyn BrowserHandle>> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionStateDyn::Live(live) => Ok(live.browser()),
            SessionStateDyn::Idle(idle) => {
                let launching = idle.clone().start(config.unwrap_or_default());
                *state = SessionStateDyn::Launching(launching.clone());
                match launching.await_launch().await {
                    LaunchOutcome::Live(live) => {
                        self.browser_alive.send_replace(true);
                        let browser = live.browser();
                        *state = SessionStateDyn::Live(live);
                        Ok(browser)
                    }
                    LaunchOutcome::Error(err) => {
                        let message = err.error.clone();
                        *state = SessionStateDyn::Error(err);
                        Err(RuntimeError::Launch(anyhow::anyhow!(message)))
                    }
                }
            }
            other => Err(RuntimeError::InvalidState(format!(
                "launch() requires Idle or Live, found {}",
                other.label()
            ))),
        }
    }

    /// `shutdown()`: `Live → Draining → Closed`; `Error → terminate() → Closed`.
    pub async fn shutdown(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        match &*state {
            SessionStateDyn::Live(live) => {
                let draining = live.end(EndReason::requested()).await;
                *state = SessionStateDyn::Draining(draining.clone());
                match draining.await_drain().await {
                    DrainOutcome::Closed(closed) => {
                        self.browser_alive.send_replace(false);
                        *state = SessionStateDyn::Closed(closed);
                        Ok(())
                    }
                    DrainOutcome::Error(err) => {
                        let message = err.error.clone();
                        *state = SessionStateDyn::Error(err);
                        Err(RuntimeError::Drain(message))
                    }
                }
            }
            SessionStateDyn::Error(err) => {
                let closed = err.terminate().await;
                self.browser_alive.send_replace(false);
                *state = SessionStateDyn::Closed(closed);
                Ok(())
            }
            SessionStateDyn::Idle(_) | SessionStateDyn::Closed(_) => Ok(()),
            other => Err(RuntimeError::InvalidState(format!(
                "shutdown() cannot run from {}",
                other.label()
            ))),
        }
    }

    /// `startNewSession(config)`: ends the current session first if `Live`,
    /// recovers to `Idle` from `Closed`/`Error`, then launches with `config`.
    pub async fn start_new_session(&self, config: SessionConfig) -> RuntimeResult<Arc<dyn BrowserHandle>> {
        {
            let mut state = self.state.lock().await;
            match &*state {
                SessionStateDyn::Live(live) => {
                    let draining = live.end(EndReason::requested()).await;
                    *state = SessionStateDyn::Draining(draining.clone());
                    match draining.await_drain().await {
                        DrainOutcome::Closed(closed) => {
                            self.browser_alive.send_replace(false);
                            *state = SessionStateDyn::Idle(closed.restart());
                        }
                        DrainOutcome::Error(err) => {
                            *state = SessionStateDyn::Idle(err.recover().await);
                        }
                    }
                }
                SessionStateDyn::Closed(closed) => {
                    *state = SessionStateDyn::Idle(closed.restart());
                }
                SessionStateDyn::Error(err) => {
                    *state = SessionStateDyn::Idle(err.recover().await);
                }
                SessionStateDyn::Idle(_) => {}
                other => {
                    return Err(RuntimeError::InvalidState(format!(
                        "startNewSession() cannot run from {}",
                        other.label()
                    )));
                }
            }
        }
        self.launch(Some(config)).await
    }

    /// `endSession()`: drives `Live → Draining → Closed`; if the just-ended
    /// session had `keepAlive` set, immediately relaunches with the
    /// runtime's default config so the external HTTP surface stays ready.
    pub async fn end_session(&self) -> RuntimeResult<()> {
        let mut state = self.state.lock().await;
        let SessionStateDyn::Live(live) = &*state else {
            return Err(RuntimeError::InvalidState(format!(
                "endSession() requires Live, found {}",
                state.label()
            )));
        };
        let keep_alive = live.config().keep_alive;
        let draining = live.end(EndReason::requested()).await;
        *state = SessionStateDyn::Draining(draining.clone());

        let closed = match draining.await_drain().await {
            DrainOutcome::Closed(closed) => {
                self.browser_alive.send_replace(false);
                closed
            }
            DrainOutcome::Error(err) => {
                *state = SessionStateDyn::Error(err);
                return Err(RuntimeError::Drain("drain failed while ending session".into()));
            }
        };
        let idle = closed.restart();

        if keep_alive {
            let launching = idle.start(SessionConfig::default());
            *state = SessionStateDyn::Launching(launching.clone());
            match launching.await_launch().await {
                LaunchOutcome::Live(live) => {
                    self.browser_alive.send_replace(true);
                    *state = SessionStateDyn::Live(live);
                    Ok(())
                }
                LaunchOutcome::Error(err) => {
                    let message = err.error.clone();
                    *state = SessionStateDyn::Error(err);
                    Err(RuntimeError::Launch(anyhow::anyhow!(message)))
                }
            }
        } else {
            *state = SessionStateDyn::Idle(idle);
            Ok(())
        }
    }

    /// `getBrowserState()`: snapshots context without transitioning state.
    pub async fn get_browser_state(&self) -> RuntimeResult<SessionContext> {
        let state = self.state.lock().await;
        let SessionStateDyn::Live(live) = &*state else {
            return Err(RuntimeError::InvalidState(format!(
                "getBrowserState() requires Live, found {}",
                state.label()
            )));
        };
        let browser = live.browser();
        let pages = browser.pages().await.map_err(|e| RuntimeError::Context(e.to_string()))?;
        let existing = Some(&live.config().session_context);
        let user_data_dir = live.config().user_data_dir.as_deref();
        Ok(ContextCodec::snapshot(existing, &browser, &pages, user_data_dir).await)
    }

    /// `refreshPrimaryPage()`: opens a new page, fires `onBeforePageClose`
    /// for the outgoing one, closes it, rebinds primary.
    pub async fn refresh_primary_page(&self) -> RuntimeResult<Arc<dyn PageHandle>> {
        let state = self.state.lock().await;
        let SessionStateDyn::Live(live) = &*state else {
            return Err(RuntimeError::InvalidState(format!(
                "refreshPrimaryPage() requires Live, found {}",
                state.label()
            )));
        };
        let browser = live.browser();
        let new_page = browser
            .new_page("about:blank")
            .await
            .map_err(|e| RuntimeError::Launch(anyhow::anyhow!(e)))?;

        let old_page = live.primary_page().await;
        self.deps.hooks.before_page_close(&old_page.id()).await;
        if let Err(e) = old_page.close().await {
            warn!("refreshPrimaryPage: failed to close outgoing page: {e}");
        }
        live.set_primary_page(new_page.clone()).await;
        Ok(new_page)
    }

    /// `proxyWebSocket(req, socket, head)`: a registered custom handler
    /// wins; otherwise reverse-proxies to the browser's control-protocol
    /// endpoint discovered at launch. Does not hold the orchestrator mutex
    /// for the socket's lifetime, only to resolve the endpoint.
    pub async fn proxy_websocket(&self, socket: WebSocket) -> RuntimeResult<()> {
        if let Some(handler) = self.custom_proxy.lock().await.clone() {
            handler(socket).await;
            return Ok(());
        }

        let (ws_endpoint, gone_rx) = {
            let state = self.state.lock().await;
            let SessionStateDyn::Live(live) = &*state else {
                return Err(RuntimeError::InvalidState(format!(
                    "proxyWebSocket() requires Live, found {}",
                    state.label()
                )));
            };
            (live.browser().ws_endpoint(), self.browser_alive.subscribe())
        };

        tokio::spawn(proxy::proxy_websocket(socket, ws_endpoint, gone_rx));
        Ok(())
    }

    pub async fn get_browser(&self) -> Option<Arc<dyn BrowserHandle>> {
        match &*self.state.lock().await {
            SessionStateDyn::Live(live) => Some(live.browser()),
            _ => None,
        }
    }

    pub async fn get_primary_page(&self) -> Option<Arc<dyn PageHandle>> {
        match &*self.state.lock().await {
            SessionStateDyn::Live(live) => Some(live.primary_page().await),
            _ => None,
        }
    }

    pub async fn is_running(&self) -> bool {
        matches!(&*self.state.lock().await, SessionStateDyn::Live(_) | SessionStateDyn::Launching(_))
    }

    pub async fn get_session_state(&self) -> BrowserState {
        self.state.lock().await.coarse()
    }

    /// Cheap to call even while another operation holds the lock for a
    /// long-running state change: the underlying state is still read behind
    /// the mutex, but this never competes for anything beyond the instant
    /// it takes to clone a string.
    pub async fn get_user_agent(&self) -> Option<String> {
        match &*self.state.lock().await {
            SessionStateDyn::Live(live) => live.config().user_agent.clone().or_else(|| {
                Some(crate::utils::constants::CHROME_USER_AGENT.to_string())
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::config::RuntimeConfig;
    use crate::driver::testing::FakeBrowserLauncher;
    use crate::events::RuntimeEvent;

    fn new_orchestrator() -> (Arc<Orchestrator>, Arc<FakeBrowserLauncher>) {
        let launcher = Arc::new(FakeBrowserLauncher::new());
        let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher.clone(), Vec::new());
        (orchestrator, launcher)
    }

    #[tokio::test]
    async fn launch_from_idle_reaches_live() {
        let (orchestrator, launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_is_idempotent_while_live() {
        let (orchestrator, launcher) = new_orchestrator();
        let first = orchestrator.launch(None).await.unwrap();
        let second = orchestrator.launch(None).await.unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn launch_failure_lands_in_error_state() {
        let (orchestrator, launcher) = new_orchestrator();
        launcher.fail_launch.store(true, Ordering::SeqCst);
        let err = orchestrator.launch(None).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Launch(_)));
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Error);
    }

    #[tokio::test]
    async fn end_session_without_keep_alive_returns_to_idle() {
        let (orchestrator, _launcher) = new_orchestrator();
        let config = SessionConfig {
            keep_alive: false,
            ..Default::default()
        };
        orchestrator.launch(Some(config)).await.unwrap();
        orchestrator.end_session().await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }

    #[tokio::test]
    async fn end_session_with_keep_alive_relaunches_immediately() {
        let (orchestrator, launcher) = new_orchestrator();
        let config = SessionConfig {
            keep_alive: true,
            ..Default::default()
        };
        orchestrator.launch(Some(config)).await.unwrap();
        orchestrator.end_session().await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn crash_without_keep_alive_recovers_to_idle() {
        let (orchestrator, _launcher) = new_orchestrator();
        let config = SessionConfig {
            keep_alive: false,
            ..Default::default()
        };
        orchestrator.launch(Some(config)).await.unwrap();
        orchestrator.handle_crash().await;
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }

    #[tokio::test]
    async fn crash_with_keep_alive_relaunches_with_default_config() {
        let (orchestrator, launcher) = new_orchestrator();
        let config = SessionConfig {
            keep_alive: true,
            proxy_url: Some("http://poisoned.invalid:9".to_string()),
            ..Default::default()
        };
        orchestrator.launch(Some(config)).await.unwrap();
        orchestrator.handle_crash().await;
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);

        // the crash-triggered relaunch must use fresh defaults, never the
        // crashed session's own (possibly poisoned) config
        let browser = orchestrator.get_browser().await.unwrap();
        let _ = browser;
        assert_eq!(orchestrator.get_user_agent().await.is_some(), true);
    }

    #[tokio::test]
    async fn crash_while_not_live_is_a_no_op() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.handle_crash().await;
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }

    #[tokio::test]
    async fn file_protocol_violation_ends_the_live_session() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();
        orchestrator.handle_file_violation("file:///etc/passwd".to_string()).await;
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Closed);
    }

    #[tokio::test]
    async fn file_protocol_violation_outside_live_is_ignored() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.handle_file_violation("file:///etc/passwd".to_string()).await;
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }

    #[tokio::test]
    async fn start_new_session_ends_the_current_one_first() {
        let (orchestrator, launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();
        orchestrator.start_new_session(SessionConfig::default()).await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
        assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn shutdown_from_idle_is_a_no_op() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.shutdown().await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }

    #[tokio::test]
    async fn shutdown_drains_a_live_session_to_closed() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();
        orchestrator.shutdown().await.unwrap();
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Closed);
    }

    #[tokio::test]
    async fn operations_requiring_live_fail_with_invalid_state_from_idle() {
        let (orchestrator, _launcher) = new_orchestrator();
        let err = orchestrator.end_session().await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
        let err = orchestrator.get_browser_state().await.unwrap_err();
        assert!(matches!(err, RuntimeError::InvalidState(_)));
    }

    #[tokio::test]
    async fn refresh_primary_page_swaps_the_page_and_closes_the_old_one() {
        let (orchestrator, launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();
        let original = orchestrator.get_primary_page().await.unwrap();

        let refreshed = orchestrator.refresh_primary_page().await.unwrap();
        assert_ne!(original.id(), refreshed.id());

        let handle = launcher.last_handle().unwrap();
        assert_eq!(handle.page_count(), 2);
    }

    #[tokio::test]
    async fn driver_disconnect_event_is_treated_as_a_crash() {
        let (orchestrator, _launcher) = new_orchestrator();
        orchestrator.launch(None).await.unwrap();

        let events_tx = orchestrator.deps.events_tx.clone();
        events_tx.send(RuntimeEvent::Disconnected).unwrap();

        for _ in 0..50 {
            if orchestrator.get_session_state().await == BrowserState::Idle {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        }
        assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    }
}
