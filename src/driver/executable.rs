//! Chrome/Chromium executable discovery.
//!
//! Prefers `RuntimeConfig::chrome_executable_path` (populated from
//! `CHROME_EXECUTABLE_PATH`) ahead of platform search paths, falling back to
//! a managed download via `chromiumoxide`'s fetcher.

use std::path::PathBuf;
use std::process::Command;

use chromiumoxide::fetcher::{BrowserFetcher, BrowserFetcherOptions};
use tracing::{info, warn};

use crate::config::RuntimeConfig;
use crate::error::DriverError;

/// Find a Chrome/Chromium executable, checking (in order): the runtime
/// config override, common platform install paths, then `which`.
pub async fn find_browser_executable(runtime: &RuntimeConfig) -> Result<PathBuf, DriverError> {
    if let Some(path) = &runtime.chrome_executable_path {
        if path.exists() {
            info!("using browser from CHROME_EXECUTABLE_PATH: {}", path.display());
            return Ok(path.clone());
        }
        warn!(
            "CHROME_EXECUTABLE_PATH points to a non-existent file: {}",
            path.display()
        );
    }

    let candidates = platform_search_paths();
    for candidate in candidates {
        let path = PathBuf::from(candidate);
        if path.exists() {
            info!("found browser at: {}", path.display());
            return Ok(path);
        }
    }

    if !cfg!(target_os = "windows") {
        for cmd in ["chromium", "chromium-browser", "google-chrome", "chrome"] {
            if let Ok(output) = Command::new("which").arg(cmd).output() {
                if output.status.success() {
                    let path_str = String::from_utf8_lossy(&output.stdout).trim().to_string();
                    if !path_str.is_empty() {
                        let path = PathBuf::from(path_str);
                        info!("found browser using 'which': {}", path.display());
                        return Ok(path);
                    }
                }
            }
        }
    }

    Err(DriverError::ExecutableNotFound(
        "no Chrome/Chromium executable found".to_string(),
    ))
}

fn platform_search_paths() -> Vec<&'static str> {
    if cfg!(target_os = "windows") {
        vec![
            r"C:\Program Files\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files (x86)\Google\Chrome\Application\chrome.exe",
            r"C:\Program Files\Chromium\Application\chrome.exe",
        ]
    } else if cfg!(target_os = "macos") {
        vec![
            "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
            "/Applications/Chromium.app/Contents/MacOS/Chromium",
            "/opt/homebrew/bin/chromium",
        ]
    } else {
        vec![
            "/usr/bin/google-chrome",
            "/usr/bin/google-chrome-stable",
            "/usr/bin/chromium",
            "/usr/bin/chromium-browser",
            "/snap/bin/chromium",
            "/usr/local/bin/chromium",
            "/opt/google/chrome/chrome",
        ]
    }
}

/// Download a managed Chromium build when none is found locally.
pub async fn download_managed_browser() -> Result<PathBuf, DriverError> {
    info!("downloading managed Chromium build");

    let cache_dir = dirs::cache_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("browser_session_runtime/chromium");
    std::fs::create_dir_all(&cache_dir)?;

    let fetcher = BrowserFetcher::new(
        BrowserFetcherOptions::builder()
            .with_path(&cache_dir)
            .build()
            .map_err(|e| DriverError::LaunchFailed(anyhow::anyhow!(e)))?,
    );

    let revision_info = fetcher
        .fetch()
        .await
        .map_err(|e| DriverError::LaunchFailed(anyhow::anyhow!(e)))?;

    info!("downloaded Chromium to: {}", revision_info.folder_path.display());
    Ok(revision_info.executable_path)
}

/// Detect containerized environments, where setuid sandboxing never works.
pub fn running_in_container() -> bool {
    std::path::Path::new("/.dockerenv").exists()
        || std::env::var("container").is_ok()
        || std::env::var("KUBERNETES_SERVICE_HOST").is_ok()
}

/// Whether the sandbox must be explicitly disabled: running as root (uid 0)
/// outside a container is the one case that surfaces an `Unsupported` error
/// rather than silently injecting a flag, since the setuid sandbox simply
/// does not work there.
pub fn effective_uid_is_root() -> bool {
    #[cfg(unix)]
    {
        libc_geteuid() == 0
    }
    #[cfg(not(unix))]
    {
        false
    }
}

#[cfg(unix)]
fn libc_geteuid() -> u32 {
    unsafe extern "C" {
        fn geteuid() -> u32;
    }
    // SAFETY: geteuid is always safe to call.
    unsafe { geteuid() }
}
