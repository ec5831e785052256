//! Heartbeat tracking and TTL eviction.
//!
//! One table guarded by a reader/writer lock. Heartbeat traffic takes
//! short write sections to bump `last_active`; the reaper holds the
//! write lock only at the moment it decides to evict a container.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio_util::sync::CancellationToken;

use wb_domain::{Error, Result};

use crate::runtime::ContainerRuntime;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// State machine
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Pending → Active → Idle → Removed. Removed is terminal; a container
/// never leaves it, a new id is required.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerState {
    Pending,
    Active,
    Idle,
    Removed,
}

/// One tracked container.
#[derive(Debug, Clone)]
pub struct TrackedContainer {
    pub container_id: String,
    pub session_id: String,
    pub created_at: DateTime<Utc>,
    pub last_active: DateTime<Utc>,
    pub labels: HashMap<String, String>,
    pub state: ContainerState,
}

/// Aggregate numbers for `get_stats`.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TtlStats {
    pub total: usize,
    pub active: usize,
    pub idle: usize,
    pub idle_timeout_secs: u64,
    pub average_age_secs: u64,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tracker
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct TtlTracker {
    runtime: Arc<dyn ContainerRuntime>,
    table: RwLock<HashMap<String, TrackedContainer>>,
    idle_timeout: RwLock<Duration>,
    check_interval: Duration,
    stop_grace: Duration,
    cancel: CancellationToken,
}

impl TtlTracker {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        idle_timeout: Duration,
        check_interval: Duration,
        stop_grace: Duration,
    ) -> Self {
        Self {
            runtime,
            table: RwLock::new(HashMap::new()),
            idle_timeout: RwLock::new(idle_timeout),
            check_interval,
            stop_grace,
            cancel: CancellationToken::new(),
        }
    }

    // ── registration & heartbeats ──────────────────────────────────

    pub fn register(
        &self,
        container_id: &str,
        session_id: &str,
        labels: HashMap<String, String>,
    ) -> Result<()> {
        let mut table = self.table.write();
        if table.contains_key(container_id) {
            return Err(Error::Conflict(format!(
                "container '{container_id}' is already tracked"
            )));
        }
        let now = Utc::now();
        table.insert(
            container_id.to_string(),
            TrackedContainer {
                container_id: container_id.to_string(),
                session_id: session_id.to_string(),
                created_at: now,
                last_active: now,
                labels,
                state: ContainerState::Pending,
            },
        );
        tracing::debug!(container = container_id, "container registered for TTL tracking");
        Ok(())
    }

    pub fn unregister(&self, container_id: &str) -> Result<()> {
        self.table
            .write()
            .remove(container_id)
            .map(|_| ())
            .ok_or_else(|| Error::not_found("container", container_id))
    }

    /// Record liveness. `last_active` strictly increases on every
    /// successful call, even when the clock has not advanced.
    pub fn heartbeat(&self, container_id: &str) -> Result<DateTime<Utc>> {
        let mut table = self.table.write();
        let tracked = table
            .get_mut(container_id)
            .ok_or_else(|| Error::not_found("container", container_id))?;
        if tracked.state == ContainerState::Removed {
            return Err(Error::Conflict(format!(
                "container '{container_id}' is removed"
            )));
        }

        let now = Utc::now();
        tracked.last_active = if now > tracked.last_active {
            now
        } else {
            tracked.last_active + chrono::Duration::microseconds(1)
        };
        if tracked.state == ContainerState::Pending || tracked.state == ContainerState::Idle {
            tracked.state = ContainerState::Active;
        }
        Ok(tracked.last_active)
    }

    /// Promote Pending → Active on the configured ready signal.
    pub fn mark_active(&self, container_id: &str) -> Result<()> {
        let mut table = self.table.write();
        let tracked = table
            .get_mut(container_id)
            .ok_or_else(|| Error::not_found("container", container_id))?;
        if tracked.state == ContainerState::Removed {
            return Err(Error::Conflict(format!(
                "container '{container_id}' is removed"
            )));
        }
        tracked.state = ContainerState::Active;
        Ok(())
    }

    // ── queries ────────────────────────────────────────────────────

    pub fn get(&self, container_id: &str) -> Result<TrackedContainer> {
        self.table
            .read()
            .get(container_id)
            .cloned()
            .ok_or_else(|| Error::not_found("container", container_id))
    }

    pub fn get_state(&self, container_id: &str) -> Result<ContainerState> {
        self.get(container_id).map(|c| c.state)
    }

    pub fn get_idle_time(&self, container_id: &str) -> Result<Duration> {
        let tracked = self.get(container_id)?;
        let idle = Utc::now().signed_duration_since(tracked.last_active);
        Ok(idle.to_std().unwrap_or(Duration::ZERO))
    }

    pub fn list(&self) -> Vec<TrackedContainer> {
        self.table.read().values().cloned().collect()
    }

    pub fn count(&self) -> usize {
        self.table.read().len()
    }

    pub fn set_idle_timeout(&self, timeout: Duration) {
        *self.idle_timeout.write() = timeout;
        tracing::info!(timeout_secs = timeout.as_secs(), "idle timeout updated");
    }

    pub fn idle_timeout(&self) -> Duration {
        *self.idle_timeout.read()
    }

    pub fn stats(&self) -> TtlStats {
        let table = self.table.read();
        let timeout = *self.idle_timeout.read();
        let now = Utc::now();

        let mut active = 0usize;
        let mut idle = 0usize;
        let mut age_total = 0i64;
        for c in table.values() {
            let idle_for = now.signed_duration_since(c.last_active);
            if idle_for.to_std().unwrap_or(Duration::ZERO) > timeout {
                idle += 1;
            } else {
                active += 1;
            }
            age_total += now.signed_duration_since(c.created_at).num_seconds();
        }

        TtlStats {
            total: table.len(),
            active,
            idle,
            idle_timeout_secs: timeout.as_secs(),
            average_age_secs: if table.is_empty() {
                0
            } else {
                (age_total / table.len() as i64).max(0) as u64
            },
        }
    }

    // ── eviction ───────────────────────────────────────────────────

    /// Stop and remove a container immediately, regardless of idle time.
    pub async fn force_remove(&self, container_id: &str) -> Result<()> {
        // Verify it is tracked before touching the runtime.
        self.get(container_id)?;
        self.evict(container_id, "forced").await;
        Ok(())
    }

    /// One reaper pass: evict every container idle past the timeout.
    /// Returns the evicted container ids.
    pub async fn reap(&self) -> Vec<String> {
        let timeout = *self.idle_timeout.read();
        let now = Utc::now();

        // Decide under the read lock; evict with short write sections.
        let expired: Vec<String> = {
            let table = self.table.read();
            table
                .values()
                .filter(|c| c.state != ContainerState::Removed)
                .filter(|c| {
                    now.signed_duration_since(c.last_active)
                        .to_std()
                        .map(|d| d > timeout)
                        .unwrap_or(false)
                })
                .map(|c| c.container_id.clone())
                .collect()
        };

        for id in &expired {
            // Re-check under the write lock: a heartbeat may have
            // arrived between the decision and the eviction.
            let still_idle = {
                let mut table = self.table.write();
                match table.get_mut(id) {
                    Some(c)
                        if now
                            .signed_duration_since(c.last_active)
                            .to_std()
                            .map(|d| d > timeout)
                            .unwrap_or(false) =>
                    {
                        c.state = ContainerState::Idle;
                        true
                    }
                    _ => false,
                }
            };
            if still_idle {
                self.evict(id, "idle timeout").await;
            }
        }

        expired
    }

    /// Graceful stop then remove. Stop failures are logged but never
    /// block removal. The container leaves the table Removed.
    async fn evict(&self, container_id: &str, reason: &str) {
        if let Err(e) = self.runtime.stop(container_id, self.stop_grace).await {
            tracing::warn!(container = container_id, error = %e, "stop failed; removing anyway");
        }
        if let Err(e) = self.runtime.remove(container_id).await {
            tracing::warn!(container = container_id, error = %e, "remove failed");
        }

        let mut table = self.table.write();
        if let Some(c) = table.get_mut(container_id) {
            c.state = ContainerState::Removed;
        }
        table.remove(container_id);
        tracing::info!(container = container_id, reason, "container evicted");
    }

    // ── background loop ────────────────────────────────────────────

    /// Spawn the periodic reaper. Idempotent per tracker instance; call
    /// `stop` to cancel.
    pub fn start(self: &Arc<Self>) {
        let tracker = self.clone();
        let cancel = self.cancel.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tracker.check_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        let evicted = tracker.reap().await;
                        if !evicted.is_empty() {
                            tracing::info!(count = evicted.len(), "TTL reaper evicted containers");
                        }
                    }
                    _ = cancel.cancelled() => {
                        tracing::debug!("TTL reaper stopped");
                        return;
                    }
                }
            }
        });
    }

    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    fn tracker(runtime: Arc<MockRuntime>, idle_ms: u64, check_ms: u64) -> Arc<TtlTracker> {
        Arc::new(TtlTracker::new(
            runtime,
            Duration::from_millis(idle_ms),
            Duration::from_millis(check_ms),
            Duration::from_secs(1),
        ))
    }

    #[tokio::test]
    async fn heartbeat_strictly_increases_last_active() {
        let tracker = tracker(Arc::new(MockRuntime::new()), 1000, 500);
        tracker.register("c1", "s1", HashMap::new()).unwrap();

        let mut prev = tracker.get("c1").unwrap().last_active;
        for _ in 0..50 {
            let next = tracker.heartbeat("c1").unwrap();
            assert!(next > prev, "last_active must strictly increase");
            prev = next;
        }
    }

    #[tokio::test]
    async fn heartbeat_on_unknown_container_fails() {
        let tracker = tracker(Arc::new(MockRuntime::new()), 1000, 500);
        assert!(tracker.heartbeat("ghost").is_err());
    }

    #[tokio::test]
    async fn first_heartbeat_promotes_pending_to_active() {
        let tracker = tracker(Arc::new(MockRuntime::new()), 1000, 500);
        tracker.register("c1", "s1", HashMap::new()).unwrap();
        assert_eq!(tracker.get_state("c1").unwrap(), ContainerState::Pending);
        tracker.heartbeat("c1").unwrap();
        assert_eq!(tracker.get_state("c1").unwrap(), ContainerState::Active);
    }

    #[tokio::test]
    async fn idle_container_is_reaped_within_one_interval() {
        let runtime = Arc::new(MockRuntime::new());
        let tracker = tracker(runtime.clone(), 100, 50);
        tracker.register("c1", "s1", HashMap::new()).unwrap();
        tracker.start();

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(tracker.count(), 0, "idle container must be evicted");

        let calls = runtime.calls();
        assert!(calls.iter().any(|c| c == "stop c1"));
        assert!(calls.iter().any(|c| c == "remove c1"));
        tracker.stop();
    }

    #[tokio::test]
    async fn heartbeats_keep_a_container_alive() {
        let runtime = Arc::new(MockRuntime::new());
        let tracker = tracker(runtime, 100, 50);
        tracker.register("c1", "s1", HashMap::new()).unwrap();
        tracker.start();

        for _ in 0..6 {
            tokio::time::sleep(Duration::from_millis(50)).await;
            tracker.heartbeat("c1").unwrap();
        }
        assert_eq!(tracker.count(), 1);
        tracker.stop();
    }

    #[tokio::test]
    async fn stop_failure_does_not_block_removal() {
        let runtime = Arc::new(MockRuntime::new());
        *runtime.fail_stops.lock() = true;
        let tracker = tracker(runtime.clone(), 100, 50);
        tracker.register("c1", "s1", HashMap::new()).unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        tracker.reap().await;
        assert_eq!(tracker.count(), 0);
        assert!(runtime.calls().iter().any(|c| c == "remove c1"));
    }

    #[tokio::test]
    async fn force_remove_then_heartbeat_fails() {
        let runtime = Arc::new(MockRuntime::new());
        let tracker = tracker(runtime, 10_000, 5_000);
        tracker.register("c1", "s1", HashMap::new()).unwrap();
        tracker.force_remove("c1").await.unwrap();
        assert!(tracker.heartbeat("c1").is_err());
    }

    #[tokio::test]
    async fn stats_report_counts_and_timeout() {
        let tracker = tracker(Arc::new(MockRuntime::new()), 1000, 500);
        tracker.register("c1", "s1", HashMap::new()).unwrap();
        tracker.register("c2", "s2", HashMap::new()).unwrap();

        let stats = tracker.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.active, 2);
        assert_eq!(stats.idle, 0);
        assert_eq!(stats.idle_timeout_secs, 1);
    }
}
