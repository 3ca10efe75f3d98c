//! Per-session progress stream: one update on every stage transition and at
//! finalization.

use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Debug, Clone, Serialize)]
pub struct ProgressUpdate {
    pub session_id: String,
    pub chain_id: String,
    pub current_stage: Option<String>,
    pub total_stages: usize,
    pub completed_stages: usize,
    pub status: String,
}

#[derive(Clone)]
pub struct ProgressBroadcaster {
    tx: broadcast::Sender<ProgressUpdate>,
}

impl ProgressBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProgressUpdate> {
        self.tx.subscribe()
    }

    pub fn publish(&self, update: ProgressUpdate) {
        // No receivers is fine; the edge may not be attached.
        let _ = self.tx.send(update);
    }
}

impl Default for ProgressBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
