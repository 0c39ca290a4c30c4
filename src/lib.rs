//! Browser session runtime: a supervisor that owns at most one live
//! headless-browser process, modeled as a six-state typed session machine
//! with a bounded task scheduler, a plugin hook fabric, crash recovery, and
//! a WebSocket reverse proxy onto the browser's own control protocol.
//!
//! Built on `chromiumoxide` for launch, page, and CDP event handling, with
//! daemon-style process-lifecycle conventions generalized into the
//! typestate session machine in [`state_machine`] and fronted by
//! [`orchestrator::Orchestrator`].

pub mod config;
pub mod context;
pub mod driver;
pub mod error;
pub mod events;
pub mod hooks;
pub mod orchestrator;
pub mod proxy;
pub mod scheduler;
pub mod state_machine;
mod utils;

pub use config::{RuntimeConfig, SessionConfig, SessionContext};
pub use error::{DriverError, RuntimeError, RuntimeResult};
pub use events::RuntimeEvent;
pub use hooks::{EndReason, HookFabric, Plugin};
pub use orchestrator::{BrowserState, Orchestrator};
pub use scheduler::TaskScheduler;
