//! Driver-level lifecycle events, narrowed from the browser's raw CDP event
//! stream down to the handful of variants the orchestrator actually reacts to.

use serde::{Deserialize, Serialize};

/// Any controllable unit inside the browser (page, service worker, iframe,
/// background page).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Target {
    pub target_id: String,
    pub kind: String,
    pub url: String,
}

/// Events emitted by [`crate::driver::BrowserDriver`] and consumed by the
/// [`crate::orchestrator::Orchestrator`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RuntimeEvent {
    /// The browser process disconnected (crashed, was killed out of band).
    Disconnected,
    TargetCreated { target: Target },
    TargetChanged { target: Target },
    TargetDestroyed { target_id: String },
    /// A request or response URL used the `file://` scheme.
    FileProtocolViolation { url: String },
}
