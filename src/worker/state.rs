//! Worker lifecycle state machine.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of one worker context. `Stopped` is terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerState {
    Idle,
    Starting,
    Running,
    Stopping,
    Stopped,
}

impl WorkerState {
    /// Whether `self -> next` is a legal transition.
    pub fn can_transition_to(self, next: WorkerState) -> bool {
        use WorkerState::*;
        matches!(
            (self, next),
            (Idle, Starting)
                | (Starting, Running)
                | (Starting, Stopping)
                | (Running, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// A stop request is meaningful in this state.
    pub fn is_active(self) -> bool {
        matches!(self, WorkerState::Starting | WorkerState::Running)
    }

    /// An isolated context may exist in this state.
    pub fn is_live(self) -> bool {
        matches!(
            self,
            WorkerState::Starting | WorkerState::Running | WorkerState::Stopping
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerState::Idle => "idle",
            WorkerState::Starting => "starting",
            WorkerState::Running => "running",
            WorkerState::Stopping => "stopping",
            WorkerState::Stopped => "stopped",
        }
    }
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared, observable worker state. Written by either context, watched by the
/// interactive side.
#[derive(Clone)]
pub struct StateCell {
    tx: Arc<watch::Sender<WorkerState>>,
}

impl StateCell {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(WorkerState::Idle);
        Self { tx: Arc::new(tx) }
    }

    pub fn get(&self) -> WorkerState {
        *self.tx.borrow()
    }

    /// Move to `next` if the transition is legal. Returns whether it happened.
    pub fn advance(&self, next: WorkerState) -> bool {
        let mut from = None;
        let changed = self.tx.send_if_modified(|current| {
            if current.can_transition_to(next) {
                from = Some(*current);
                *current = next;
                true
            } else {
                false
            }
        });
        if let Some(from) = from {
            tracing::debug!("Worker state {from} -> {next}");
        }
        changed
    }

    pub fn subscribe(&self) -> watch::Receiver<WorkerState> {
        self.tx.subscribe()
    }
}

impl Default for StateCell {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StateCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("StateCell").field(&self.get()).finish()
    }
}
