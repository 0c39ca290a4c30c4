//! Browser process ownership and the narrow event stream the rest of the
//! runtime observes.
//!
//! Launch-argument composition, a `JoinHandle` forwarding CDP handler events,
//! and RAII temp-dir cleanup live behind the [`BrowserHandle`]/[`PageHandle`]
//! traits so the state machine and orchestrator can be tested without a real
//! Chrome process — see [`testing`] for the in-memory doubles.

pub mod chromium;
pub mod executable;
pub mod fingerprint;
pub mod launch_args;
pub mod testing;

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::{Cookie, SessionConfig};
use crate::error::DriverError;
use crate::events::RuntimeEvent;

/// A single page/tab, abstracted over chromiumoxide's `Page` so the rest of
/// the crate never names a concrete CDP type.
#[async_trait]
pub trait PageHandle: Send + Sync + 'static {
    fn id(&self) -> String;
    async fn url(&self) -> Option<String>;
    /// Evaluate a script in the page's JS context and return its JSON result.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, DriverError>;
    /// Register a script that runs before every document on this page and
    /// its subframes, on every navigation, for the page's lifetime. Used by
    /// [`crate::context::ContextCodec::restore`] to install the per-origin
    /// storage population observer.
    async fn evaluate_on_new_document(&self, script: &str) -> Result<(), DriverError>;
    async fn navigate(&self, url: &str) -> Result<(), DriverError>;
    async fn close(&self) -> Result<(), DriverError>;
}

/// A live browser instance, abstracted over chromiumoxide's `Browser`.
#[async_trait]
pub trait BrowserHandle: Send + Sync + 'static {
    async fn new_page(&self, url: &str) -> Result<Arc<dyn PageHandle>, DriverError>;
    async fn pages(&self) -> Result<Vec<Arc<dyn PageHandle>>, DriverError>;
    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), DriverError>;
    async fn get_cookies(&self) -> Result<Vec<Cookie>, DriverError>;
    /// The control-protocol WebSocket endpoint the reverse proxy dials.
    fn ws_endpoint(&self) -> String;
    /// Health check; used by crash detection paths that poll rather than
    /// wait on the disconnect event.
    async fn version(&self) -> Result<String, DriverError>;
    async fn close(&self) -> Result<(), DriverError>;
}

/// Launches a concrete [`BrowserHandle`] for a [`SessionConfig`], emitting
/// [`RuntimeEvent`]s on `events` for the handle's lifetime.
#[async_trait]
pub trait BrowserLauncher: Send + Sync + 'static {
    async fn launch(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Result<Arc<dyn BrowserHandle>, DriverError>;
}

/// The result of a successful launch: the browser handle plus its first page.
pub struct Launched {
    pub browser: Arc<dyn BrowserHandle>,
    pub primary_page: Arc<dyn PageHandle>,
}

/// Owns at most one live browser handle and the event-forwarding task
/// attached to it. Re-launch is never the driver's own decision — that is
/// the [`crate::orchestrator::Orchestrator`]'s policy.
///
/// Holds the launcher behind `Arc<dyn BrowserLauncher>` (rather than a
/// generic parameter) so the state machine and `Orchestrator` that own a
/// `BrowserDriver` don't have to propagate a launcher type parameter through
/// every public type in the crate.
pub struct BrowserDriver {
    launcher: Arc<dyn BrowserLauncher>,
    browser: Option<Arc<dyn BrowserHandle>>,
    primary_page: Option<Arc<dyn PageHandle>>,
    event_forwarder: Option<JoinHandle<()>>,
}

impl BrowserDriver {
    pub fn new(launcher: Arc<dyn BrowserLauncher>) -> Self {
        Self {
            launcher,
            browser: None,
            primary_page: None,
            event_forwarder: None,
        }
    }

    /// Launch a new browser for `config`. Events observed during this
    /// session are forwarded to `events` until `close`/`force_close` detaches
    /// the listener.
    pub async fn launch(
        &mut self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Result<Launched, DriverError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let browser = match self.launcher.launch(config, tx).await {
            Ok(browser) => browser,
            Err(err) => {
                // No process survives a failed launch; nothing to force-close.
                return Err(err);
            }
        };

        let forward_events = events.clone();
        let forwarder = tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                if forward_events.send(event).is_err() {
                    break;
                }
            }
        });

        let primary_page = match browser.new_page("about:blank").await {
            Ok(page) => page,
            Err(err) => {
                // Post-launch setup failed: force-close to avoid an orphan
                // process, then detach and rethrow.
                warn!("post-launch page enumeration failed, forcing close: {err}");
                let _ = browser.close().await;
                forwarder.abort();
                return Err(err);
            }
        };

        if let Some(script) = fingerprint::build_script(config) {
            if let Err(e) = primary_page.evaluate_on_new_document(&script).await {
                warn!("failed to install fingerprint override: {e}");
            }
        }

        self.browser = Some(browser.clone());
        self.primary_page = Some(primary_page.clone());
        self.event_forwarder = Some(forwarder);

        Ok(Launched {
            browser,
            primary_page,
        })
    }

    /// Graceful close: ask the browser to close, then detach listeners.
    pub async fn close(&mut self) -> Result<(), DriverError> {
        self.teardown(false).await
    }

    /// Immediate close: skip the graceful handshake.
    pub async fn force_close(&mut self) -> Result<(), DriverError> {
        self.teardown(true).await
    }

    async fn teardown(&mut self, force: bool) -> Result<(), DriverError> {
        if let Some(forwarder) = self.event_forwarder.take() {
            forwarder.abort();
        }
        self.primary_page = None;
        if let Some(browser) = self.browser.take() {
            if force {
                info!("force-closing browser");
            } else {
                info!("closing browser gracefully");
            }
            browser.close().await?;
        }
        Ok(())
    }

    pub fn get_browser(&self) -> Option<Arc<dyn BrowserHandle>> {
        self.browser.clone()
    }

    pub fn get_primary_page(&self) -> Option<Arc<dyn PageHandle>> {
        self.primary_page.clone()
    }

    pub fn set_primary_page(&mut self, page: Arc<dyn PageHandle>) {
        self.primary_page = Some(page);
    }
}
