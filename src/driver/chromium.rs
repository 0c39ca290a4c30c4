//! Chromiumoxide-backed [`BrowserLauncher`]/[`BrowserHandle`]/[`PageHandle`].
//!
//! Finds or downloads the executable, builds a `BrowserConfig`, spawns the
//! handler forwarding task, and filters the benign CDP deserialization
//! errors `chromiumoxide` is known to emit. Temp-dir cleanup is RAII; shutdown
//! is an explicit close-then-wait.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chromiumoxide::browser::{Browser, BrowserConfigBuilder, HeadlessMode};
use chromiumoxide::cdp::browser_protocol::fetch::{
    ContinueRequestParams, EnableParams as FetchEnableParams, EventRequestPaused, FailRequestParams,
    RequestPattern,
};
use chromiumoxide::cdp::browser_protocol::network::{
    CookieParam, CookieSameSite, ErrorReason, GetCookiesParams, SetCookiesParams,
};
use chromiumoxide::cdp::browser_protocol::target::{
    EventTargetCreated, EventTargetDestroyed, EventTargetInfoChanged,
};
use chromiumoxide::page::Page;
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, trace, warn};

use crate::config::{Cookie, SameSite, SessionConfig};
use crate::driver::launch_args;
use crate::driver::{executable, BrowserHandle, BrowserLauncher, PageHandle};
use crate::error::DriverError;
use crate::events::{RuntimeEvent, Target};
use crate::config::RuntimeConfig;

fn to_cdp_same_site(s: SameSite) -> CookieSameSite {
    match s {
        SameSite::Strict => CookieSameSite::Strict,
        SameSite::Lax => CookieSameSite::Lax,
        SameSite::None => CookieSameSite::None,
    }
}

fn from_cdp_same_site(s: Option<CookieSameSite>) -> SameSite {
    match s {
        Some(CookieSameSite::Strict) => SameSite::Strict,
        Some(CookieSameSite::None) => SameSite::None,
        _ => SameSite::Lax,
    }
}

/// A real chromiumoxide page.
pub struct ChromiumPage {
    page: Page,
}

#[async_trait]
impl PageHandle for ChromiumPage {
    fn id(&self) -> String {
        self.page.target_id().to_string()
    }

    async fn url(&self) -> Option<String> {
        self.page.url().await.ok().flatten()
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        let result = self
            .page
            .evaluate(script)
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        result
            .into_value()
            .map_err(|e| DriverError::Cdp(format!("failed to parse evaluate() result: {e}")))
    }

    async fn evaluate_on_new_document(&self, script: &str) -> Result<(), DriverError> {
        self.page
            .evaluate_on_new_document(script)
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        self.page
            .goto(url)
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.page
            .close()
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))
    }
}

/// A real chromiumoxide browser plus its handler-forwarding task.
pub struct ChromiumBrowser {
    browser: Mutex<Browser>,
    ws_endpoint: String,
    handler_task: JoinHandle<()>,
    user_data_dir: Option<PathBuf>,
    block_ads: bool,
    events: mpsc::UnboundedSender<RuntimeEvent>,
}

#[async_trait]
impl BrowserHandle for ChromiumBrowser {
    async fn new_page(&self, url: &str) -> Result<Arc<dyn PageHandle>, DriverError> {
        let browser = self.browser.lock().await;
        let page = browser
            .new_page(url)
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        install_request_guard(&page, self.block_ads, self.events.clone());
        Ok(Arc::new(ChromiumPage { page }))
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn PageHandle>>, DriverError> {
        let browser = self.browser.lock().await;
        let pages = browser
            .pages()
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        Ok(pages
            .into_iter()
            .map(|page| Arc::new(ChromiumPage { page }) as Arc<dyn PageHandle>)
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), DriverError> {
        let browser = self.browser.lock().await;
        let pages = browser
            .pages()
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        let Some(page) = pages.first() else {
            return Err(DriverError::NoPage);
        };
        let params: Vec<CookieParam> = cookies
            .into_iter()
            .map(|c| {
                let mut builder = CookieParam::builder()
                    .name(c.name)
                    .value(c.value)
                    .domain(c.domain)
                    .path(c.path)
                    .secure(c.secure)
                    .http_only(c.http_only)
                    .same_site(to_cdp_same_site(c.same_site));
                if c.expires != 0 {
                    builder = builder.expires(c.expires as f64);
                }
                builder.build().expect("cookie params always buildable")
            })
            .collect();
        page.execute(SetCookiesParams::builder().cookies(params).build().unwrap())
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        Ok(())
    }

    async fn get_cookies(&self) -> Result<Vec<Cookie>, DriverError> {
        let browser = self.browser.lock().await;
        let pages = browser
            .pages()
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        let Some(page) = pages.first() else {
            return Ok(Vec::new());
        };
        let result = page
            .execute(GetCookiesParams::default())
            .await
            .map_err(|e| DriverError::Cdp(e.to_string()))?;
        Ok(result
            .result
            .cookies
            .into_iter()
            .map(|c| Cookie {
                name: c.name,
                value: c.value,
                domain: c.domain,
                path: c.path,
                expires: if c.expires > 0.0 { c.expires as i64 } else { 0 },
                secure: c.secure,
                http_only: c.http_only,
                same_site: from_cdp_same_site(c.same_site),
                source_scheme: Some(format!("{:?}", c.source_scheme)),
                partition_key: c.partition_key.map(|k| format!("{k:?}")),
            })
            .collect())
    }

    fn ws_endpoint(&self) -> String {
        self.ws_endpoint.clone()
    }

    async fn version(&self) -> Result<String, DriverError> {
        let browser = self.browser.lock().await;
        browser
            .version()
            .await
            .map(|v| v.product)
            .map_err(|e| DriverError::Cdp(e.to_string()))
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.handler_task.abort();
        let mut browser = self.browser.lock().await;
        let _ = browser.close().await;
        let _ = browser.wait().await;
        if let Some(dir) = &self.user_data_dir {
            if let Err(e) = std::fs::remove_dir_all(dir) {
                warn!("failed to remove user-data dir {}: {e}", dir.display());
            }
        }
        Ok(())
    }
}

/// Hostnames blocked outright when `SessionConfig::block_ads` is set. Not
/// exhaustive; covers the handful of ad/analytics networks common enough
/// that blocking them measurably reduces page noise without a full
/// third-party filter-list dependency.
const AD_HOST_SUBSTRINGS: &[&str] = &[
    "doubleclick.net",
    "googlesyndication.com",
    "googleadservices.com",
    "adservice.google.",
    "adnxs.com",
    "taboola.com",
    "outbrain.com",
    "scorecardresearch.com",
];

fn is_ad_request(url: &str) -> bool {
    AD_HOST_SUBSTRINGS.iter().any(|host| url.contains(host))
}

/// Attach a `Fetch`-domain request/response interceptor that aborts any
/// `file://` traffic and emits [`RuntimeEvent::FileProtocolViolation`] on
/// `events` so the orchestrator drains the session through the normal state
/// machine, and, when `block_ads` is set, also aborts requests to known
/// ad/analytics hosts. Installed exactly once per page target.
fn install_request_guard(page: &Page, block_ads: bool, events: mpsc::UnboundedSender<RuntimeEvent>) {
    let page = page.clone();
    tokio::spawn(async move {
        if let Err(e) = page
            .execute(
                FetchEnableParams::builder()
                    .patterns(vec![RequestPattern::builder().url_pattern("*").build()])
                    .build(),
            )
            .await
        {
            trace!("Fetch.enable not available for request guard: {e}");
            return;
        }
        let Ok(mut listener) = page.event_listener::<EventRequestPaused>().await else {
            return;
        };
        while let Some(event) = listener.next().await {
            let is_file = event.request.url.starts_with("file://");
            let is_ad = !is_file && block_ads && is_ad_request(&event.request.url);
            let blocked = is_file || is_ad;
            let outcome = if blocked {
                page.execute(FailRequestParams::new(
                    event.request_id.clone(),
                    ErrorReason::BlockedByClient,
                ))
                .await
                .map(|_| ())
            } else {
                page.execute(ContinueRequestParams::new(event.request_id.clone()))
                    .await
                    .map(|_| ())
            };
            if let Err(e) = outcome {
                trace!("failed to resolve intercepted request: {e}");
            }
            if is_file {
                let _ = events.send(RuntimeEvent::FileProtocolViolation {
                    url: event.request.url.clone(),
                });
            }
        }
    });
}

/// Subscribe to `Target.targetCreated`/`targetInfoChanged`/`targetDestroyed`
/// and re-emit them as [`RuntimeEvent`]s. One task per event kind.
async fn spawn_target_forwarders(browser: &Browser, events: mpsc::UnboundedSender<RuntimeEvent>) {
    if let Ok(mut created) = browser.event_listener::<EventTargetCreated>().await {
        let tx = events.clone();
        tokio::spawn(async move {
            while let Some(event) = created.next().await {
                let info = &event.target_info;
                let _ = tx.send(RuntimeEvent::TargetCreated {
                    target: Target {
                        target_id: info.target_id.inner().clone(),
                        kind: info.r#type.clone(),
                        url: info.url.clone(),
                    },
                });
            }
        });
    }

    if let Ok(mut changed) = browser.event_listener::<EventTargetInfoChanged>().await {
        let tx = events.clone();
        tokio::spawn(async move {
            while let Some(event) = changed.next().await {
                let info = &event.target_info;
                let _ = tx.send(RuntimeEvent::TargetChanged {
                    target: Target {
                        target_id: info.target_id.inner().clone(),
                        kind: info.r#type.clone(),
                        url: info.url.clone(),
                    },
                });
            }
        });
    }

    if let Ok(mut destroyed) = browser.event_listener::<EventTargetDestroyed>().await {
        let tx = events.clone();
        tokio::spawn(async move {
            while let Some(event) = destroyed.next().await {
                let _ = tx.send(RuntimeEvent::TargetDestroyed {
                    target_id: event.target_id.inner().clone(),
                });
            }
        });
    }
}

/// Launches real chromiumoxide browsers.
pub struct ChromiumLauncher {
    runtime: RuntimeConfig,
}

impl ChromiumLauncher {
    pub fn new(runtime: RuntimeConfig) -> Self {
        Self { runtime }
    }
}

#[async_trait]
impl BrowserLauncher for ChromiumLauncher {
    async fn launch(
        &self,
        config: &SessionConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Result<Arc<dyn BrowserHandle>, DriverError> {
        let chrome_path = match executable::find_browser_executable(&self.runtime).await {
            Ok(path) => path,
            Err(_) => executable::download_managed_browser().await?,
        };

        let is_root = executable::effective_uid_is_root();
        // Linux is the only platform where Chrome's setuid sandbox binary exists at
        // all, so root-without-container there falls through to `--no-sandbox` via
        // `launch_args::compose` instead of failing; every other platform has no
        // sandbox story for root to fall back on, hence `UnsupportedSandbox`.
        if is_root && !executable::running_in_container() && cfg!(not(target_os = "linux")) {
            return Err(DriverError::UnsupportedSandbox);
        }

        let user_data_dir = config
            .user_data_dir
            .clone()
            .unwrap_or_else(|| std::env::temp_dir().join(format!("bsr_{}", uuid::Uuid::new_v4())));
        std::fs::create_dir_all(&user_data_dir)?;
        write_user_preferences(&user_data_dir, &config.user_preferences)?;

        let remote_debugging_port = portpicker_fallback();
        let args = launch_args::compose(config, &self.runtime, remote_debugging_port, is_root);

        let mut builder = BrowserConfigBuilder::default()
            .request_timeout(self.runtime.launch_timeout())
            .window_size(config.dimensions.width as u32, config.dimensions.height as u32)
            .user_data_dir(user_data_dir.clone())
            .chrome_executable(chrome_path);

        builder = if config.headless {
            builder.headless_mode(HeadlessMode::default())
        } else {
            builder.with_head()
        };
        for arg in &args {
            builder = builder.arg(arg.clone());
        }

        let browser_config = builder
            .build()
            .map_err(|e| DriverError::LaunchFailed(anyhow::anyhow!(e)))?;

        info!("launching browser with {} args", args.len());
        let (mut browser, handler) = Browser::launch(browser_config)
            .await
            .map_err(|e| DriverError::LaunchFailed(anyhow::anyhow!(e)))?;

        let ws_endpoint = browser.websocket_address().to_string();

        spawn_target_forwarders(&browser, events.clone()).await;

        let events_for_forwarder = events.clone();
        let handler_task = tokio::spawn(async move {
            let mut handler = handler;
            while let Some(event) = handler.next().await {
                if let Err(e) = event {
                    let msg = e.to_string();
                    let benign = msg
                        .contains("data did not match any variant of untagged enum Message")
                        || msg.contains("Failed to deserialize WS response");
                    if benign {
                        trace!("suppressed benign CDP deserialization error: {msg}");
                    } else {
                        error!("browser handler error: {msg}");
                    }
                }
            }
            let _ = events_for_forwarder.send(RuntimeEvent::Disconnected);
            info!("browser handler task completed");
        });

        Ok(Arc::new(ChromiumBrowser {
            browser: Mutex::new(browser),
            ws_endpoint,
            handler_task,
            user_data_dir: Some(user_data_dir),
            block_ads: config.block_ads,
            events,
        }))
    }
}

/// Seeds `user_data_dir/Default/Preferences` with caller-supplied values
/// before the browser ever reads it, the way Chrome's own first-run
/// preference bootstrap would. A no-op when `user_preferences` is empty so
/// the profile keeps Chrome's stock defaults.
fn write_user_preferences(
    user_data_dir: &std::path::Path,
    user_preferences: &std::collections::HashMap<String, serde_json::Value>,
) -> Result<(), DriverError> {
    if user_preferences.is_empty() {
        return Ok(());
    }
    let default_dir = user_data_dir.join("Default");
    std::fs::create_dir_all(&default_dir)?;
    let body = serde_json::to_vec(user_preferences)
        .map_err(|e| DriverError::LaunchFailed(anyhow::anyhow!(e)))?;
    std::fs::write(default_dir.join("Preferences"), body)?;
    Ok(())
}

/// Picks an ephemeral local port for `--remote-debugging-port`. Chromiumoxide
/// itself assigns a port when none is requested explicitly, but the runtime
/// needs a stable value ahead of launch to compose the argument vector and
/// to know what to proxy to.
fn portpicker_fallback() -> u16 {
    use std::net::TcpListener;
    TcpListener::bind("127.0.0.1:0")
        .and_then(|l| l.local_addr())
        .map(|a| a.port())
        .unwrap_or(9222)
}
