//! End-to-end coverage of the session lifecycle against the public crate
//! surface: launch, graceful end, launch failure, crash recovery, and
//! file-protocol-violation draining, each driven the way an external caller
//! actually would (never `handle_crash`/`handle_file_violation` directly,
//! those are exercised from inside `orchestrator.rs`'s own unit tests).

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use browser_session_runtime::config::{RuntimeConfig, SessionConfig};
use browser_session_runtime::driver::testing::{FakeBrowserHandle, FakeBrowserLauncher};
use browser_session_runtime::driver::{BrowserHandle, BrowserLauncher};
use browser_session_runtime::error::{DriverError, RuntimeError};
use browser_session_runtime::events::RuntimeEvent;
use browser_session_runtime::orchestrator::{BrowserState, Orchestrator};

/// A launcher whose handles report a problem on the driver's own event
/// channel shortly after launch, so crash- and violation-recovery can be
/// exercised the way the real `ChromiumLauncher`'s event-forwarding task
/// would trigger them, rather than by reaching into orchestrator internals.
struct MisbehavingLauncher {
    fire: FireKind,
    pub launch_count: AtomicUsize,
}

#[derive(Clone, Copy)]
enum FireKind {
    Disconnect,
    FileProtocolViolation,
}

impl MisbehavingLauncher {
    fn new(fire: FireKind) -> Self {
        Self {
            fire,
            launch_count: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl BrowserLauncher for MisbehavingLauncher {
    async fn launch(
        &self,
        _config: &SessionConfig,
        events: mpsc::UnboundedSender<RuntimeEvent>,
    ) -> Result<Arc<dyn BrowserHandle>, DriverError> {
        self.launch_count.fetch_add(1, Ordering::SeqCst);
        let handle = FakeBrowserHandle::new();
        let fire = self.fire;
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            let event = match fire {
                FireKind::Disconnect => RuntimeEvent::Disconnected,
                FireKind::FileProtocolViolation => RuntimeEvent::FileProtocolViolation {
                    url: "file:///etc/passwd".to_string(),
                },
            };
            let _ = events.send(event);
        });
        Ok(handle)
    }
}

async fn wait_for_state(orchestrator: &Orchestrator, target: BrowserState) {
    for _ in 0..200 {
        if orchestrator.get_session_state().await == target {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "timed out waiting for {target:?}, still in {:?}",
        orchestrator.get_session_state().await
    );
}

#[tokio::test]
async fn happy_path_launch_reaches_live() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    orchestrator.launch(None).await.unwrap();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
    assert!(orchestrator.is_running().await);
}

#[tokio::test]
async fn graceful_end_with_keep_alive_restarts_automatically() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher.clone(), Vec::new());
    let config = SessionConfig {
        keep_alive: true,
        ..Default::default()
    };
    orchestrator.launch(Some(config)).await.unwrap();
    orchestrator.end_session().await.unwrap();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
    assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn graceful_end_without_keep_alive_settles_on_idle() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    let config = SessionConfig {
        keep_alive: false,
        ..Default::default()
    };
    orchestrator.launch(Some(config)).await.unwrap();
    orchestrator.end_session().await.unwrap();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Idle);
    assert!(!orchestrator.is_running().await);
}

#[tokio::test]
async fn launch_failure_surfaces_as_launch_error_and_lands_in_error_state() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    launcher.fail_launch.store(true, Ordering::SeqCst);
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    let err = orchestrator.launch(None).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Launch(_)));
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Error);
}

#[tokio::test]
async fn driver_disconnect_without_keep_alive_recovers_to_idle() {
    let launcher = Arc::new(MisbehavingLauncher::new(FireKind::Disconnect));
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    let config = SessionConfig {
        keep_alive: false,
        ..Default::default()
    };
    orchestrator.launch(Some(config)).await.unwrap();
    wait_for_state(&orchestrator, BrowserState::Idle).await;
}

#[tokio::test]
async fn driver_disconnect_with_keep_alive_relaunches_to_live() {
    let launcher = Arc::new(MisbehavingLauncher::new(FireKind::Disconnect));
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher.clone(), Vec::new());
    let config = SessionConfig {
        keep_alive: true,
        ..Default::default()
    };
    orchestrator.launch(Some(config)).await.unwrap();
    wait_for_state(&orchestrator, BrowserState::Live).await;
    assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn file_protocol_violation_drains_the_session_to_closed() {
    let launcher = Arc::new(MisbehavingLauncher::new(FireKind::FileProtocolViolation));
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    orchestrator.launch(None).await.unwrap();
    wait_for_state(&orchestrator, BrowserState::Closed).await;
}

#[tokio::test]
async fn start_new_session_ends_a_live_session_before_relaunching() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher.clone(), Vec::new());
    orchestrator.launch(None).await.unwrap();
    orchestrator
        .start_new_session(SessionConfig::default())
        .await
        .unwrap();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Live);
    assert_eq!(launcher.launch_count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn shutdown_from_error_state_reaches_closed() {
    let launcher = Arc::new(FakeBrowserLauncher::new());
    launcher.fail_launch.store(true, Ordering::SeqCst);
    let orchestrator = Orchestrator::new(RuntimeConfig::default(), launcher, Vec::new());
    orchestrator.launch(None).await.unwrap_err();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Error);
    orchestrator.shutdown().await.unwrap();
    assert_eq!(orchestrator.get_session_state().await, BrowserState::Closed);
}
