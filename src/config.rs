//! Runtime configuration: session launch options and process-wide defaults.
//!
//! Serde-derived, with `#[serde(default = "...")]` per field, a YAML file
//! layered with hard defaults, and environment-variable overrides applied
//! on top of both.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Device class used to select a fingerprint/UA/viewport bundle at launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceClass {
    Desktop,
    Mobile,
}

impl Default for DeviceClass {
    fn default() -> Self {
        DeviceClass::Desktop
    }
}

/// Window/viewport dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Default for Dimensions {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
        }
    }
}

/// Bundle of navigator/screen/header values injected at launch to make the
/// browser present as a specific device class. Left mostly opaque (a
/// free-form map) since the exact override surface is a CDP/JS concern
/// handled by the driver, not a runtime invariant.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Fingerprint {
    pub device: DeviceClass,
    pub user_agent: Option<String>,
    pub platform: Option<String>,
    pub extra: HashMap<String, serde_json::Value>,
}

/// Per-origin key/value storage snapshot (localStorage or sessionStorage).
pub type OriginStorage = HashMap<String, HashMap<String, String>>;

/// `SameSite` cookie attribute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum SameSite {
    Strict,
    Lax,
    None,
}

/// A single cookie, as restored/snapshotted by the `ContextCodec`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cookie {
    pub name: String,
    pub value: String,
    pub domain: String,
    pub path: String,
    /// Epoch seconds; `0` means a session cookie.
    pub expires: i64,
    pub secure: bool,
    pub http_only: bool,
    pub same_site: SameSite,
    pub source_scheme: Option<String>,
    pub partition_key: Option<String>,
}

impl Cookie {
    /// A session cookie lives only for the browser's lifetime (`expires == 0`).
    pub fn is_session(&self) -> bool {
        self.expires == 0
    }
}

/// One IndexedDB object store, as exported/imported via the library-agnostic
/// wire format the `ContextCodec` loads into the page.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedDbStore {
    pub name: String,
    /// Record key -> JSON value, or a base64 blob for values that don't
    /// admit JSON.
    pub records: HashMap<String, serde_json::Value>,
}

/// One IndexedDB database, as exported/imported per origin.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexedDbDatabase {
    pub database_name: String,
    pub version: u32,
    pub stores: Vec<IndexedDbStore>,
}

/// Abstract snapshot of a session's browser-visible state: cookies plus
/// per-origin local/session storage and IndexedDB.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionContext {
    pub cookies: Vec<Cookie>,
    pub local_storage: HashMap<String, HashMap<String, String>>,
    pub session_storage: HashMap<String, HashMap<String, String>>,
    pub indexed_db: HashMap<String, Vec<IndexedDbDatabase>>,
}

impl SessionContext {
    pub fn is_empty(&self) -> bool {
        self.cookies.is_empty()
            && self.local_storage.is_empty()
            && self.session_storage.is_empty()
            && self.indexed_db.is_empty()
    }
}

/// Immutable, per-session launch configuration. Once handed to
/// `IdleState::start`, the orchestrator only ever reads this value; it is
/// never mutated in place.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(default = "default_headless")]
    pub headless: bool,

    #[serde(default)]
    pub dimensions: Dimensions,

    pub user_agent: Option<String>,
    pub proxy_url: Option<String>,
    pub timezone: Option<String>,

    #[serde(default)]
    pub extensions: Vec<PathBuf>,

    pub user_data_dir: Option<PathBuf>,

    #[serde(default)]
    pub fingerprint: Fingerprint,

    #[serde(default)]
    pub session_context: SessionContext,

    /// Caller-supplied extra launch arguments, appended after all
    /// config-derived flags and before the environment allow/deny lists.
    #[serde(default)]
    pub launch_args: Vec<String>,

    #[serde(default)]
    pub block_ads: bool,

    #[serde(default)]
    pub device_class: DeviceClass,

    #[serde(default)]
    pub skip_fingerprint_injection: bool,

    #[serde(default)]
    pub user_preferences: HashMap<String, serde_json::Value>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive: bool,
}

fn default_headless() -> bool {
    true
}

fn default_keep_alive() -> bool {
    true
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            headless: default_headless(),
            dimensions: Dimensions::default(),
            user_agent: None,
            proxy_url: None,
            timezone: None,
            extensions: Vec::new(),
            user_data_dir: None,
            fingerprint: Fingerprint::default(),
            session_context: SessionContext::default(),
            launch_args: Vec::new(),
            block_ads: false,
            device_class: DeviceClass::default(),
            skip_fingerprint_injection: false,
            user_preferences: HashMap::new(),
            keep_alive: default_keep_alive(),
        }
    }
}

/// Process-wide timeouts and defaults, overridable via environment
/// variables (`DISPLAY`, `CHROME_EXECUTABLE_PATH`, `CHROME_ARGS`,
/// `FILTER_CHROME_ARGS`, `HOST`, `PORT`, `DEFAULT_TIMEZONE`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_launch_timeout_ms")]
    pub timeout_launch_ms: u64,

    #[serde(default = "default_drain_timeout_ms")]
    pub timeout_drain_ms: u64,

    #[serde(default = "default_hook_timeout_ms")]
    pub timeout_hook_ms: u64,

    #[serde(default = "default_page_timeout_ms")]
    pub timeout_page_ms: u64,

    pub chrome_executable_path: Option<PathBuf>,

    #[serde(default)]
    pub chrome_args_extra: Vec<String>,

    #[serde(default)]
    pub chrome_args_filter: Vec<String>,

    pub default_timezone: Option<String>,

    pub host: Option<String>,
    pub port: Option<u16>,
}

fn default_launch_timeout_ms() -> u64 {
    60_000
}
fn default_drain_timeout_ms() -> u64 {
    5_000
}
fn default_hook_timeout_ms() -> u64 {
    10_000
}
fn default_page_timeout_ms() -> u64 {
    15_000
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            timeout_launch_ms: default_launch_timeout_ms(),
            timeout_drain_ms: default_drain_timeout_ms(),
            timeout_hook_ms: default_hook_timeout_ms(),
            timeout_page_ms: default_page_timeout_ms(),
            chrome_executable_path: None,
            chrome_args_extra: Vec::new(),
            chrome_args_filter: Vec::new(),
            default_timezone: None,
            host: None,
            port: None,
        }
    }
}

impl RuntimeConfig {
    pub fn launch_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_launch_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_drain_ms)
    }

    pub fn hook_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_hook_ms)
    }

    pub fn page_timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_page_ms)
    }

    /// Load defaults, then a `runtime.yaml` in the crate's manifest directory
    /// if present, then environment-variable overrides. Mirrors the
    /// teacher's `load_yaml_config` with an added env-override pass.
    pub fn load() -> anyhow::Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> anyhow::Result<Self> {
        let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("runtime.yaml");
        if path.exists() {
            let contents = std::fs::read_to_string(&path)?;
            Ok(serde_yaml::from_str(&contents)?)
        } else {
            Ok(Self::default())
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(path) = std::env::var("CHROME_EXECUTABLE_PATH") {
            self.chrome_executable_path = Some(PathBuf::from(path));
        }
        if let Ok(args) = std::env::var("CHROME_ARGS") {
            self.chrome_args_extra
                .extend(args.split_whitespace().map(str::to_string));
        }
        if let Ok(args) = std::env::var("FILTER_CHROME_ARGS") {
            self.chrome_args_filter
                .extend(args.split_whitespace().map(str::to_string));
        }
        if let Ok(tz) = std::env::var("DEFAULT_TIMEZONE") {
            self.default_timezone = Some(tz);
        }
        if let Ok(host) = std::env::var("HOST") {
            self.host = Some(host);
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.port = Some(port);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_cookie_detection() {
        let cookie = Cookie {
            name: "a".into(),
            value: "b".into(),
            domain: "example.com".into(),
            path: "/".into(),
            expires: 0,
            secure: true,
            http_only: false,
            same_site: SameSite::Lax,
            source_scheme: None,
            partition_key: None,
        };
        assert!(cookie.is_session());
    }

    #[test]
    fn runtime_config_env_overrides() {
        // SAFETY: tests in this module run single-threaded relative to this var via
        // the default test harness's per-test process isolation is not guaranteed,
        // so we only assert parsing logic, not global env mutation ordering.
        let mut config = RuntimeConfig::default();
        unsafe {
            std::env::set_var("DEFAULT_TIMEZONE", "UTC");
        }
        config.apply_env_overrides();
        assert_eq!(config.default_timezone.as_deref(), Some("UTC"));
        unsafe {
            std::env::remove_var("DEFAULT_TIMEZONE");
        }
    }
}
