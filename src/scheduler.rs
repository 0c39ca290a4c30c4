//! Tracks in-flight critical/background work and makes drain correct in the
//! presence of concurrent callers.
//!
//! DashMap-keyed handle tracking with a cleanup sweep, plus an `AtomicUsize`
//! counter and `JoinHandle`s the owner can `abort()`, generalized from "one
//! background job" to "many critical-or-background tasks with a drain
//! barrier".

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{oneshot, Notify};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::RuntimeError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    Critical,
    Background,
}

struct TaskHandle {
    kind: TaskKind,
    cancel: Arc<Notify>,
    cancelled: Arc<AtomicBool>,
    label: String,
    #[allow(dead_code)]
    started_at: Instant,
}

/// Tracks concurrent work for one session's lifetime. A scheduler is
/// single-use: once `drain` has run, a fresh one is created for the next
/// session rather than resetting this one in place.
pub struct TaskScheduler {
    tasks: Arc<DashMap<u64, TaskHandle>>,
    next_id: AtomicU64,
    draining: AtomicBool,
}

impl Default for TaskScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskScheduler {
    pub fn new() -> Self {
        Self {
            tasks: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            draining: AtomicBool::new(false),
        }
    }

    fn tasks_handle(&self) -> Arc<DashMap<u64, TaskHandle>> {
        self.tasks.clone()
    }

    pub fn is_draining(&self) -> bool {
        self.draining.load(Ordering::SeqCst)
    }

    fn register(&self, kind: TaskKind, label: &str) -> (u64, Arc<Notify>, Arc<AtomicBool>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let cancel = Arc::new(Notify::new());
        let cancelled = Arc::new(AtomicBool::new(false));
        self.tasks.insert(
            id,
            TaskHandle {
                kind,
                cancel: cancel.clone(),
                cancelled: cancelled.clone(),
                label: label.to_string(),
                started_at: Instant::now(),
            },
        );
        (id, cancel, cancelled)
    }

    fn unregister(&self, id: u64) {
        self.tasks.remove(&id);
    }

    /// Register a best-effort background task. Its failure is logged, never
    /// propagated; its cancel signal fires immediately on drain entry.
    pub fn wait_until<F>(&self, label: impl Into<String>, fut: F)
    where
        F: std::future::Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let label = label.into();
        let (id, cancel, cancelled) = self.register(TaskKind::Background, &label);
        let tasks = self.tasks_handle();
        tokio::spawn(async move {
            tokio::select! {
                biased;
                _ = cancel.notified() => {
                    cancelled.store(true, Ordering::SeqCst);
                    debug!("background task '{label}' cancelled");
                }
                result = fut => {
                    if let Err(e) = result {
                        warn!("background task '{label}' failed: {e}");
                    }
                }
            }
            tasks.remove(&id);
        });
    }

    /// Run `fut` as critical work, counted against drain. Fails immediately
    /// with [`RuntimeError::Drain`] if the scheduler is already draining.
    pub async fn run_critical<F, T>(
        &self,
        label: impl Into<String>,
        deadline: Duration,
        fut: F,
    ) -> Result<T, RuntimeError>
    where
        F: std::future::Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        if self.is_draining() {
            return Err(RuntimeError::Drain(
                "scheduler is draining, cannot start critical task".to_string(),
            ));
        }
        let label = label.into();
        let (id, cancel, cancelled) = self.register(TaskKind::Critical, &label);

        let (tx, rx) = oneshot::channel();
        let task_label = label.clone();
        let handle = tokio::spawn(async move {
            let value = fut.await;
            let _ = tx.send(value);
            let _ = task_label;
        });

        let result = tokio::select! {
            biased;
            _ = cancel.notified() => {
                cancelled.store(true, Ordering::SeqCst);
                handle.abort();
                None
            }
            _ = tokio::time::sleep(deadline) => {
                warn!("critical task '{label}' exceeded its {deadline:?} deadline, cancelling");
                cancelled.store(true, Ordering::SeqCst);
                handle.abort();
                None
            }
            value = rx => value.ok(),
        };

        self.unregister(id);
        result.ok_or_else(|| RuntimeError::Drain(format!("critical task '{label}' did not complete")))
    }

    /// Mark the scheduler draining, cancel all background tasks immediately,
    /// then wait for in-flight critical tasks up to `deadline`.
    pub async fn drain(&self, deadline: Duration) {
        self.draining.store(true, Ordering::SeqCst);

        let mut critical_remaining = Vec::new();
        for entry in self.tasks.iter() {
            match entry.kind {
                TaskKind::Background => entry.cancel.notify_waiters(),
                TaskKind::Critical => critical_remaining.push(entry.key().to_owned()),
            }
        }

        if critical_remaining.is_empty() {
            return;
        }

        let deadline_at = Instant::now() + deadline;
        loop {
            let still_outstanding = critical_remaining
                .iter()
                .filter(|id| self.tasks.contains_key(*id))
                .count();
            if still_outstanding == 0 || Instant::now() >= deadline_at {
                break;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        for id in &critical_remaining {
            if let Some(entry) = self.tasks.get(id) {
                warn!("critical task '{}' did not drain in time, cancelling", entry.label);
                entry.cancel.notify_waiters();
            }
        }
    }

    /// Fire the cancel signal on every tracked task and return immediately.
    pub fn cancel_all(&self, reason: &str) {
        for entry in self.tasks.iter() {
            debug!("cancelling task '{}': {reason}", entry.label);
            entry.cancel.notify_waiters();
        }
    }

    pub fn outstanding_count(&self) -> usize {
        self.tasks.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test]
    async fn run_critical_rejects_when_draining() {
        let scheduler = TaskScheduler::new();
        scheduler.drain(Duration::from_millis(10)).await;
        let err = scheduler
            .run_critical("late", Duration::from_millis(100), async { 1 })
            .await
            .unwrap_err();
        assert!(matches!(err, RuntimeError::Drain(_)));
    }

    #[tokio::test]
    async fn run_critical_returns_value() {
        let scheduler = TaskScheduler::new();
        let value = scheduler
            .run_critical("ok", Duration::from_secs(1), async { 42 })
            .await
            .unwrap();
        assert_eq!(value, 42);
    }

    #[tokio::test]
    async fn drain_waits_for_critical_then_returns() {
        let scheduler = Arc::new(TaskScheduler::new());
        let done = Arc::new(AtomicUsize::new(0));
        let done_clone = done.clone();
        let sched_clone = scheduler.clone();
        let handle = tokio::spawn(async move {
            sched_clone
                .run_critical("slow", Duration::from_millis(500), async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    done_clone.fetch_add(1, Ordering::SeqCst);
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        scheduler.drain(Duration::from_millis(300)).await;
        let _ = handle.await;
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cancel_all_notifies_without_blocking() {
        let scheduler = TaskScheduler::new();
        scheduler.cancel_all("test");
        assert_eq!(scheduler.outstanding_count(), 0);
    }
}
