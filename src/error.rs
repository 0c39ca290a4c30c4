//! Error taxonomy for the browser session runtime.
//!
//! A flat `thiserror` enum with one variant per failure kind, covering the
//! handful of kinds the runtime's propagation policy distinguishes.

use thiserror::Error;

/// Errors surfaced across the runtime's public boundary.
///
/// Only [`RuntimeError::InvalidState`], [`RuntimeError::Launch`] and
/// [`RuntimeError::Drain`] are returned from [`crate::orchestrator::Orchestrator`]
/// methods. [`RuntimeError::Context`] and [`RuntimeError::HookFailure`] are
/// observability events only (logged, never returned). [`RuntimeError::Crash`]
/// is consumed by the crash-recovery loop, or surfaced as `InvalidState` on the
/// next operation when `keep_alive` is off.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// Operation issued against a state that does not expose it. Caller bug,
    /// never retried.
    #[error("invalid operation for current session state: {0}")]
    InvalidState(String),

    /// The browser could not be started. Wraps the underlying cause; the
    /// runtime guarantees no orphan process after this is returned.
    #[error("failed to launch browser: {0}")]
    Launch(#[source] anyhow::Error),

    /// Drain deadline exceeded, or the driver's close failed.
    #[error("drain failed: {0}")]
    Drain(String),

    /// The driver reported a disconnect while `Live`. Always recoverable.
    #[error("browser crashed: {0}")]
    Crash(String),

    /// Restore or snapshot partially failed. Logged at warning, never aborts
    /// the transition that triggered it.
    #[error("context codec error: {0}")]
    Context(String),

    /// A plugin hook threw or exceeded its deadline. Logged with the plugin's
    /// name; the transition proceeds regardless.
    #[error("hook '{plugin}' failed: {reason}")]
    HookFailure { plugin: String, reason: String },

    /// A plugin attempted to drive a state change from within a hook
    /// callback. Treated as a plugin bug; the offending call fails
    /// immediately.
    #[error("reentrant state mutation attempted from within a hook")]
    Reentrant,
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Lower-level driver errors, wrapped into [`RuntimeError::Launch`] or
/// [`RuntimeError::Crash`] by the orchestrator depending on when they occur.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("browser executable not found: {0}")]
    ExecutableNotFound(String),

    #[error("sandboxing is required (running as root) but unsupported on this platform")]
    UnsupportedSandbox,

    #[error("browser process failed to launch: {0}")]
    LaunchFailed(#[source] anyhow::Error),

    #[error("CDP command failed: {0}")]
    Cdp(String),

    #[error("page not found")]
    NoPage,

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
