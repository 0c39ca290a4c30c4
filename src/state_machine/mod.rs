//! The six-state session typestate: one struct per state, each exposing
//! only the operations valid to call while the session is in that state.
//!
//! The `Live → Error(crashed)` transition follows the same
//! health-check/relaunch shape as a `get_or_launch` loop watching process
//! liveness; the general shape of a typed startup/shutdown/recovery module
//! comes from daemon-lifecycle code elsewhere in the ecosystem.

mod closed;
mod draining;
mod error;
mod idle;
mod launching;
mod live;

pub use closed::ClosedState;
pub use draining::{DrainOutcome, DrainingState};
pub use error::ErrorState;
pub use idle::IdleState;
pub use launching::{LaunchOutcome, LaunchingState};
pub use live::LiveState;

use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};

use crate::config::RuntimeConfig;
use crate::driver::BrowserDriver;
use crate::events::RuntimeEvent;
use crate::hooks::HookFabric;
use crate::scheduler::TaskScheduler;

/// Why a session landed in `Error`. `Live` is part of the tagged origin
/// set even though this implementation only ever constructs `Crashed` for
/// a `Live`-origin failure (a driver disconnect is always a crash, never a
/// bare `Live` error with another cause).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedFrom {
    Launching,
    Live,
    Draining,
    Crashed,
}

impl FailedFrom {
    pub fn as_str(self) -> &'static str {
        match self {
            FailedFrom::Launching => "launching",
            FailedFrom::Live => "live",
            FailedFrom::Draining => "draining",
            FailedFrom::Crashed => "crashed",
        }
    }
}

/// Dependencies that outlive any single session: one browser driver (the
/// runtime owns at most one live browser, ever), the registered hooks, the
/// process-wide timeouts, and the sender half of the crash-detection event
/// channel.
pub struct RuntimeDeps {
    pub driver: Mutex<BrowserDriver>,
    pub hooks: HookFabric,
    pub runtime: RuntimeConfig,
    pub events_tx: mpsc::UnboundedSender<RuntimeEvent>,
}

/// Per-session-cycle dependencies: the persistent [`RuntimeDeps`] plus a
/// fresh [`TaskScheduler`], since a scheduler is single-use — once it has
/// drained, `Idle::start` builds a new one for the next `Launching`/`Live`
/// cycle rather than resetting this one in place.
pub struct SessionDeps {
    pub shared: Arc<RuntimeDeps>,
    pub scheduler: TaskScheduler,
}

/// Whichever state the session is currently in, stored behind the
/// `Orchestrator`'s single mutex. Holding this enum rather than a trait
/// object keeps every legal method reachable only through its own state's
/// inherent methods; the enum itself is never asked to do anything a state
/// doesn't support.
pub enum SessionStateDyn {
    Idle(IdleState),
    Launching(LaunchingState),
    Live(LiveState),
    Draining(DrainingState),
    Closed(ClosedState),
    Error(ErrorState),
}

impl SessionStateDyn {
    pub fn label(&self) -> &'static str {
        match self {
            SessionStateDyn::Idle(_) => "idle",
            SessionStateDyn::Launching(_) => "launching",
            SessionStateDyn::Live(_) => "live",
            SessionStateDyn::Draining(_) => "draining",
            SessionStateDyn::Closed(_) => "closed",
            SessionStateDyn::Error(_) => "error",
        }
    }
}
