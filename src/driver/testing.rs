//! In-memory [`BrowserLauncher`]/[`BrowserHandle`]/[`PageHandle`] doubles.
//!
//! No test in this crate spins up a real Chrome process; the state machine,
//! scheduler, hook fabric, and orchestrator are all exercised against these
//! fakes instead, stubbing out the browser process with in-memory state and
//! `AtomicBool` failure toggles rather than touching the network or a real
//! CDP endpoint.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;

use crate::config::{Cookie, SessionConfig};
use crate::driver::{BrowserHandle, BrowserLauncher, PageHandle};
use crate::error::DriverError;
use crate::events::RuntimeEvent;

/// A page double. Scripts are answered from a canned table keyed by exact
/// source string; anything unrecognized evaluates to `null`.
pub struct FakePage {
    id: String,
    url: Mutex<String>,
    closed: AtomicBool,
    responses: Mutex<HashMap<String, serde_json::Value>>,
    navigations: Mutex<Vec<String>>,
    /// Scripts registered via `evaluate_on_new_document`, replayed (by
    /// recording them as "applied") every time `navigate` is called, the
    /// way a real new-document script runs on every subsequent navigation.
    new_document_scripts: Mutex<Vec<String>>,
    applied_on_navigate: Mutex<Vec<(String, String)>>,
}

impl FakePage {
    pub fn new(id: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            url: Mutex::new(url.into()),
            closed: AtomicBool::new(false),
            responses: Mutex::new(HashMap::new()),
            navigations: Mutex::new(Vec::new()),
            new_document_scripts: Mutex::new(Vec::new()),
            applied_on_navigate: Mutex::new(Vec::new()),
        }
    }

    pub fn stub(&self, script: impl Into<String>, value: serde_json::Value) {
        self.responses.lock().insert(script.into(), value);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn navigation_history(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    /// Scripts applied at each navigated URL, in navigation order: mirrors
    /// what a real browser would have executed via the new-document hook.
    pub fn applied_on_navigate(&self) -> Vec<(String, String)> {
        self.applied_on_navigate.lock().clone()
    }
}

#[async_trait]
impl PageHandle for FakePage {
    fn id(&self) -> String {
        self.id.clone()
    }

    async fn url(&self) -> Option<String> {
        Some(self.url.lock().clone())
    }

    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::NoPage);
        }
        Ok(self
            .responses
            .lock()
            .get(script)
            .cloned()
            .unwrap_or(serde_json::Value::Null))
    }

    async fn evaluate_on_new_document(&self, script: &str) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::NoPage);
        }
        self.new_document_scripts.lock().push(script.to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<(), DriverError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::NoPage);
        }
        *self.url.lock() = url.to_string();
        self.navigations.lock().push(url.to_string());
        for script in self.new_document_scripts.lock().iter() {
            self.applied_on_navigate
                .lock()
                .push((url.to_string(), script.clone()));
        }
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A browser double holding any number of [`FakePage`]s and an injectable
/// cookie jar. `fail_new_page`/`fail_version` let tests force the error
/// paths the orchestrator's crash-recovery logic must cover.
pub struct FakeBrowserHandle {
    pages: Mutex<Vec<Arc<FakePage>>>,
    cookies: Mutex<Vec<Cookie>>,
    closed: AtomicBool,
    page_counter: AtomicUsize,
    pub fail_new_page: AtomicBool,
    pub fail_version: AtomicBool,
    pub fail_close: AtomicBool,
}

impl FakeBrowserHandle {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pages: Mutex::new(Vec::new()),
            cookies: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            page_counter: AtomicUsize::new(0),
            fail_new_page: AtomicBool::new(false),
            fail_version: AtomicBool::new(false),
            fail_close: AtomicBool::new(false),
        })
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    pub fn page_count(&self) -> usize {
        self.pages.lock().len()
    }
}

#[async_trait]
impl BrowserHandle for FakeBrowserHandle {
    async fn new_page(&self, url: &str) -> Result<Arc<dyn PageHandle>, DriverError> {
        if self.fail_new_page.load(Ordering::SeqCst) {
            return Err(DriverError::Cdp("fake: new_page forced failure".into()));
        }
        let id = self.page_counter.fetch_add(1, Ordering::SeqCst);
        let page = Arc::new(FakePage::new(format!("page-{id}"), url));
        self.pages.lock().push(page.clone());
        Ok(page)
    }

    async fn pages(&self) -> Result<Vec<Arc<dyn PageHandle>>, DriverError> {
        Ok(self
            .pages
            .lock()
            .iter()
            .cloned()
            .map(|p| p as Arc<dyn PageHandle>)
            .collect())
    }

    async fn set_cookies(&self, cookies: Vec<Cookie>) -> Result<(), DriverError> {
        *self.cookies.lock() = cookies;
        Ok(())
    }

    async fn get_cookies(&self) -> Result<Vec<Cookie>, DriverError> {
        Ok(self.cookies.lock().clone())
    }

    fn ws_endpoint(&self) -> String {
        "ws://127.0.0.1:0/fake".to_string()
    }

    async fn version(&self) -> Result<String, DriverError> {
        if self.fail_version.load(Ordering::SeqCst) || self.closed.load(Ordering::SeqCst) {
            return Err(DriverError::Cdp("fake: browser not reachable".into()));
        }
        Ok("FakeChrome/1.0".to_string())
    }

    async fn close(&self) -> Result<(), DriverError> {
        if self.fail_close.load(Ordering::SeqCst) {
            return Err(DriverError::Cdp("fake: close forced failure".into()));
        }
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A launcher double. `fail_launch` simulates the process never coming up;
/// every successful launch is recorded in `launch_count` so tests can assert
/// how many times the orchestrator actually relaunched the browser.
/// `fail_next_new_page`, if set, is copied onto the handle's own
/// `fail_new_page` the moment it's created, since the handle only exists
/// inside this call and a caller has no other way to poison it ahead of the
/// `BrowserDriver::launch`'s post-connect `new_page` call.
pub struct FakeBrowserLauncher {
    pub fail_launch: AtomicBool,
    pub fail_next_new_page: AtomicBool,
    pub launch_count: AtomicUsize,
    last_handle: Mutex<Option<Arc<FakeBrowserHandle>>>,
}

impl FakeBrowserLauncher {
    pub fn new() -> Self {
        Self {
            fail_launch: AtomicBool::new(false),
            fail_next_new_page: AtomicBool::new(false),
            launch_count: AtomicUsize::new(0),
            last_handle: Mutex::new(None),
        }
    }

    pub fn last_handle(&self) -> Option<Arc<FakeBrowserHandle>> {
        self.last_handle.lock().clone()
    }
}

impl Default for FakeBrowserLauncher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrowserLauncher for FakeBrowserLauncher {
    async fn launch(
        &self,
        _config: &SessionConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Result<Arc<dyn BrowserHandle>, DriverError> {
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(DriverError::LaunchFailed(anyhow::anyhow!(
                "fake: launch forced failure"
            )));
        }
        self.launch_count.fetch_add(1, Ordering::SeqCst);
        let handle = FakeBrowserHandle::new();
        if self.fail_next_new_page.load(Ordering::SeqCst) {
            handle.fail_new_page.store(true, Ordering::SeqCst);
        }
        *self.last_handle.lock() = Some(handle.clone());
        let _ = events;
        Ok(handle)
    }
}
