//! Launch-argument vector composition.
//!
//! An ordered pipeline: static defaults, headless/headful flags,
//! config-derived dynamic flags, extension flags, caller extras, then the
//! environment allow/deny list, with de-duplication and empty-string
//! filtering as the final pass.

use crate::config::{RuntimeConfig, SessionConfig};

/// Flags applied regardless of mode: a benign stealth/noise-reduction set.
const STATIC_DEFAULTS: &[&str] = &[
    "--disable-blink-features=AutomationControlled",
    "--disable-infobars",
    "--disable-notifications",
    "--disable-print-preview",
    "--disable-desktop-notifications",
    "--disable-software-rasterizer",
    "--no-first-run",
    "--no-default-browser-check",
    "--enable-features=NetworkService,NetworkServiceInProcess",
    "--disable-popup-blocking",
    "--disable-background-networking",
    "--disable-background-timer-throttling",
    "--disable-backgrounding-occluded-windows",
    "--disable-breakpad",
    "--disable-component-extensions-with-background-pages",
    "--disable-features=TranslateUI",
    "--disable-hang-monitor",
    "--disable-ipc-flooding-protection",
    "--disable-prompt-on-repost",
    "--metrics-recording-only",
    "--password-store=basic",
    "--use-mock-keychain",
    "--hide-scrollbars",
    "--mute-audio",
];

const HEADLESS_ARGS: &[&str] = &["--headless=new"];
const HEADFUL_ARGS: &[&str] = &[];

/// Build the full, de-duplicated launch-argument vector for `config`.
///
/// Pipeline, in order:
/// 1. static defaults
/// 2. headless- or headful-specific flags
/// 3. dynamic flags derived from `config` (dimensions, UA, proxy, timezone,
///    remote-debugging port)
/// 4. one `--load-extension=` flag listing every configured extension path
/// 5. caller-supplied extras (`config.launch_args`)
/// 6. environment allow-list (`runtime.chrome_args_extra`) then deny-list
///    (`runtime.chrome_args_filter`) applied last, so operators always have
///    the final say
///
/// Duplicates are removed (first occurrence wins) and empty strings dropped.
pub fn compose(
    config: &SessionConfig,
    runtime: &RuntimeConfig,
    remote_debugging_port: u16,
    is_root: bool,
) -> Vec<String> {
    let mut args: Vec<String> = Vec::new();

    args.extend(STATIC_DEFAULTS.iter().map(|s| s.to_string()));

    if config.headless {
        args.extend(HEADLESS_ARGS.iter().map(|s| s.to_string()));
    } else {
        args.extend(HEADFUL_ARGS.iter().map(|s| s.to_string()));
    }

    args.push(format!(
        "--window-size={},{}",
        config.dimensions.width, config.dimensions.height
    ));
    if let Some(ua) = &config.user_agent {
        args.push(format!("--user-agent={ua}"));
    }
    if let Some(proxy) = &config.proxy_url {
        args.push(format!("--proxy-server={proxy}"));
    }
    let timezone = config
        .timezone
        .clone()
        .or_else(|| runtime.default_timezone.clone());
    if let Some(tz) = timezone {
        args.push(format!("--timezone={tz}"));
    }
    args.push(format!("--remote-debugging-port={remote_debugging_port}"));

    if !config.extensions.is_empty() {
        let paths: Vec<String> = config
            .extensions
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        args.push(format!("--load-extension={}", paths.join(",")));
        args.push("--disable-extensions-except=".to_string() + &paths.join(","));
    } else {
        args.push("--disable-extensions".to_string());
    }

    args.extend(config.launch_args.iter().cloned());

    if is_root {
        // Sandboxing is dropped for the root user by Chrome itself; surface
        // it explicitly rather than letting the browser silently run
        // unsandboxed, and require the caller to opt in via `--no-sandbox`
        // being present in the deny list if that is genuinely wanted.
        args.push("--no-sandbox".to_string());
        args.push("--disable-setuid-sandbox".to_string());
    }

    args.extend(runtime.chrome_args_extra.iter().cloned());

    let deny: std::collections::HashSet<&str> = runtime
        .chrome_args_filter
        .iter()
        .map(String::as_str)
        .collect();

    dedup_and_filter(args, &deny)
}

fn dedup_and_filter(args: Vec<String>, deny: &std::collections::HashSet<&str>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        if arg.is_empty() {
            continue;
        }
        let flag_name = arg.split('=').next().unwrap_or(&arg);
        if deny.contains(flag_name) || deny.contains(arg.as_str()) {
            continue;
        }
        if seen.insert(arg.clone()) {
            out.push(arg);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headless_adds_headless_flag() {
        let config = SessionConfig {
            headless: true,
            ..Default::default()
        };
        let args = compose(&config, &RuntimeConfig::default(), 9222, false);
        assert!(args.contains(&"--headless=new".to_string()));
    }

    #[test]
    fn headful_omits_headless_flag() {
        let config = SessionConfig {
            headless: false,
            ..Default::default()
        };
        let args = compose(&config, &RuntimeConfig::default(), 9222, false);
        assert!(!args.iter().any(|a| a.starts_with("--headless")));
    }

    #[test]
    fn root_injects_sandbox_flags() {
        let args = compose(&SessionConfig::default(), &RuntimeConfig::default(), 9222, true);
        assert!(args.contains(&"--no-sandbox".to_string()));
    }

    #[test]
    fn duplicates_are_removed() {
        let config = SessionConfig {
            launch_args: vec!["--mute-audio".to_string(), "--mute-audio".to_string()],
            ..Default::default()
        };
        let args = compose(&config, &RuntimeConfig::default(), 9222, false);
        assert_eq!(args.iter().filter(|a| *a == "--mute-audio").count(), 1);
    }

    #[test]
    fn deny_list_removes_matching_flags() {
        let runtime = RuntimeConfig {
            chrome_args_filter: vec!["--mute-audio".to_string()],
            ..RuntimeConfig::default()
        };
        let args = compose(&SessionConfig::default(), &runtime, 9222, false);
        assert!(!args.contains(&"--mute-audio".to_string()));
    }

    #[test]
    fn empty_strings_are_dropped() {
        let config = SessionConfig {
            launch_args: vec!["".to_string(), "--foo".to_string()],
            ..Default::default()
        };
        let args = compose(&config, &RuntimeConfig::default(), 9222, false);
        assert!(!args.iter().any(|a| a.is_empty()));
        assert!(args.contains(&"--foo".to_string()));
    }
}
