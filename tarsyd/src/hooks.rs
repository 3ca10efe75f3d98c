//! Hook bus subscribers: the audit writer and the dashboard broadcaster.

use async_trait::async_trait;
use tokio::sync::broadcast;

use tarsy_audit::AuditStore;
use tarsy_hooks::{InteractionEvent, InteractionHook};

/// Persists every interaction event into the audit store. If this
/// subscriber is not registered, events are dropped silently by the bus.
pub struct AuditWriterHook {
    store: AuditStore,
}

impl AuditWriterHook {
    pub fn new(store: AuditStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl InteractionHook for AuditWriterHook {
    fn name(&self) -> &str {
        "audit-writer"
    }

    async fn on_event(&self, event: &InteractionEvent) -> anyhow::Result<()> {
        match event {
            InteractionEvent::Llm(e) => self.store.append_llm_interaction(e).await?,
            InteractionEvent::Mcp(e) => self.store.append_mcp_interaction(e).await?,
            InteractionEvent::Lifecycle(e) => self.store.append_lifecycle_event(e).await?,
        }
        Ok(())
    }
}

/// Fans interaction events out to dashboard subscribers over a broadcast
/// channel. Lagging or absent receivers never affect delivery to other
/// subscribers.
#[derive(Clone)]
pub struct DashboardBroadcaster {
    tx: broadcast::Sender<InteractionEvent>,
}

impl DashboardBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InteractionEvent> {
        self.tx.subscribe()
    }
}

impl Default for DashboardBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

pub struct DashboardHook {
    broadcaster: DashboardBroadcaster,
}

impl DashboardHook {
    pub fn new(broadcaster: DashboardBroadcaster) -> Self {
        Self { broadcaster }
    }
}

#[async_trait]
impl InteractionHook for DashboardHook {
    fn name(&self) -> &str {
        "dashboard-broadcaster"
    }

    async fn on_event(&self, event: &InteractionEvent) -> anyhow::Result<()> {
        // A send error just means no dashboard is connected right now.
        let _ = self.broadcaster.tx.send(event.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tarsy_hooks::{HookBus, LifecycleEventKind, SessionLifecycleEvent};

    #[tokio::test]
    async fn dashboard_hook_forwards_events_to_subscribers() {
        let broadcaster = DashboardBroadcaster::new();
        let mut rx = broadcaster.subscribe();
        let bus = HookBus::start(vec![Arc::new(DashboardHook::new(broadcaster))]);

        bus.publish_lifecycle(SessionLifecycleEvent {
            session_id: "s-1".into(),
            stage_execution_id: None,
            ts_us: 1,
            kind: LifecycleEventKind::SessionStarted,
            detail: None,
        });
        bus.flush().await;

        let event = rx.recv().await.expect("event");
        assert_eq!(event.session_id(), "s-1");
    }

    #[tokio::test]
    async fn dashboard_hook_tolerates_no_subscribers() {
        let bus = HookBus::start(vec![Arc::new(DashboardHook::new(
            DashboardBroadcaster::new(),
        ))]);
        bus.publish_lifecycle(SessionLifecycleEvent {
            session_id: "s-1".into(),
            stage_execution_id: None,
            ts_us: 1,
            kind: LifecycleEventKind::SessionStarted,
            detail: None,
        });
        bus.flush().await;
    }
}
