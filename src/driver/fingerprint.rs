//! Fingerprint injection: navigator/screen overrides applied before any
//! page script runs, so a freshly launched browser presents as the
//! configured [`crate::config::DeviceClass`] instead of stock Chromium.
//!
//! Grounded in the same `evaluate_on_new_document` idiom
//! [`crate::context::ContextCodec::restore`] uses to install the storage
//! observer; this is the other consumer of that primitive.

use crate::config::{DeviceClass, SessionConfig};

const MOBILE_USER_AGENT: &str =
    "Mozilla/5.0 (Linux; Android 14; Pixel 8) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/132.0.0.0 Mobile Safari/537.36";

/// Script run via `evaluate_on_new_document`, layered on top of the
/// CDP-level `--disable-blink-features` automation flag.
/// `navigator.webdriver` still needs a JS-level override because that flag
/// only suppresses a subset of the automation surface.
pub fn build_script(config: &SessionConfig) -> Option<String> {
    if config.skip_fingerprint_injection {
        return None;
    }

    // `device_class` is the authoritative device selection (spec's
    // `deviceConfig`); `fingerprint` supplies overrides layered on top of
    // whatever that device's defaults are.
    let device = config.device_class;
    let fp = &config.fingerprint;
    let user_agent = fp
        .user_agent
        .clone()
        .or_else(|| config.user_agent.clone())
        .unwrap_or_else(|| default_user_agent(device));
    let platform = fp.platform.clone().unwrap_or_else(|| default_platform(device));

    Some(format!(
        r#"(function(){{
  Object.defineProperty(navigator, 'webdriver', {{ get: () => undefined }});
  Object.defineProperty(navigator, 'userAgent', {{ get: () => {user_agent:?} }});
  Object.defineProperty(navigator, 'platform', {{ get: () => {platform:?} }});
  Object.defineProperty(navigator, 'maxTouchPoints', {{ get: () => {touch_points} }});
  Object.defineProperty(screen, 'width', {{ get: () => {width} }});
  Object.defineProperty(screen, 'height', {{ get: () => {height} }});
}})();"#,
        touch_points = if device == DeviceClass::Mobile { 5 } else { 0 },
        width = config.dimensions.width,
        height = config.dimensions.height,
    ))
}

fn default_user_agent(device: DeviceClass) -> String {
    match device {
        DeviceClass::Mobile => MOBILE_USER_AGENT.to_string(),
        DeviceClass::Desktop => crate::utils::constants::CHROME_USER_AGENT.to_string(),
    }
}

fn default_platform(device: DeviceClass) -> &'static str {
    match device {
        DeviceClass::Mobile => "Linux armv8l",
        DeviceClass::Desktop => "Win32",
    }
}
