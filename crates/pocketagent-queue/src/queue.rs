//! The offline action queue proper.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::action::PendingAction;
use crate::error::QueueError;
use crate::store::ActionStore;

/// Connectivity probe, answered by the connection state machine in
/// production.
pub trait Connectivity: Send + Sync {
    fn is_connected(&self) -> bool;
}

/// Injectable time source so expiry is testable.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Downstream delivery for replayed decisions.
#[async_trait]
pub trait DecisionSink: Send + Sync {
    async fn dispatch(&self, request_id: &str, approved: bool) -> Result<(), QueueError>;
}

/// What one processing pass did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessOutcome {
    pub dispatched: usize,
    pub expired: usize,
    pub remaining: usize,
    /// The pass stopped early because connectivity was unavailable or a
    /// dispatch failed; remaining entries are untouched and keep their order.
    pub halted: bool,
}

/// Ordered, durable queue of pending user decisions.
///
/// The internal lock serializes `process_queue` against itself and against
/// mutation; callers may share the queue freely.
pub struct OfflineActionQueue {
    store: Arc<dyn ActionStore>,
    clock: Arc<dyn Clock>,
    connectivity: Arc<dyn Connectivity>,
    sink: Arc<dyn DecisionSink>,
    actions: Mutex<Vec<PendingAction>>,
}

impl OfflineActionQueue {
    /// Load the persisted queue. A missing or empty backing store yields an
    /// empty queue.
    pub async fn load(
        store: Arc<dyn ActionStore>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
        sink: Arc<dyn DecisionSink>,
    ) -> Result<Self, QueueError> {
        let actions = store.load().await?;
        Ok(Self {
            store,
            clock,
            connectivity,
            sink,
            actions: Mutex::new(actions),
        })
    }

    /// Record a decision for later delivery. Insertion order is dispatch
    /// order.
    pub async fn queue_approval(
        &self,
        request_id: impl Into<String>,
        approved: bool,
    ) -> Result<Uuid, QueueError> {
        let mut actions = self.actions.lock().await;
        let action = PendingAction::new(request_id, approved, self.clock.now());
        let id = action.id;
        actions.push(action);
        self.store.save(&actions).await?;
        tracing::debug!(%id, remaining = actions.len(), "queued offline decision");
        Ok(id)
    }

    /// Remove every entry for `request_id`. A no-op when absent.
    pub async fn remove_action(&self, request_id: &str) -> Result<usize, QueueError> {
        let mut actions = self.actions.lock().await;
        let before = actions.len();
        actions.retain(|action| action.request_id != request_id);
        let removed = before - actions.len();
        if removed > 0 {
            self.store.save(&actions).await?;
        }
        Ok(removed)
    }

    pub async fn clear_all(&self) -> Result<(), QueueError> {
        let mut actions = self.actions.lock().await;
        if actions.is_empty() {
            return Ok(());
        }
        actions.clear();
        self.store.save(&actions).await
    }

    pub async fn pending(&self) -> Vec<PendingAction> {
        self.actions.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.actions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.actions.lock().await.is_empty()
    }

    /// One delivery pass, in insertion order: expired entries are dropped
    /// silently; the first entry found while offline halts the pass (no
    /// reordering, no skip-ahead); everything else is dispatched and removed.
    /// A pass that finds no connectivity performs no store I/O, and the
    /// remaining list is persisted at most once per pass.
    pub async fn process_queue(&self) -> Result<ProcessOutcome, QueueError> {
        let mut actions = self.actions.lock().await;
        if actions.is_empty() {
            return Ok(ProcessOutcome::default());
        }

        let now = self.clock.now();
        let online = self.connectivity.is_connected();
        let mut outcome = ProcessOutcome::default();
        let mut kept: Vec<PendingAction> = Vec::with_capacity(actions.len());

        for action in actions.drain(..) {
            if outcome.halted {
                kept.push(action);
                continue;
            }
            if action.is_expired(now) {
                outcome.expired += 1;
                continue;
            }
            if !online {
                outcome.halted = true;
                kept.push(action);
                continue;
            }
            match self
                .sink
                .dispatch(&action.request_id, action.approved)
                .await
            {
                Ok(()) => outcome.dispatched += 1,
                Err(err) => {
                    tracing::warn!(error = %err, request_id = %action.request_id,
                        "offline decision dispatch failed; will retry next pass");
                    outcome.halted = true;
                    kept.push(action);
                }
            }
        }

        *actions = kept;
        outcome.remaining = actions.len();

        // Offline passes stay I/O-free; expired entries pruned in memory will
        // simply expire again from the stale file on a later online pass.
        if online && (outcome.dispatched > 0 || outcome.expired > 0) {
            self.store.save(&actions).await?;
        }
        Ok(outcome)
    }
}
