//! In-process hook bus: fans interaction events out to subscribers (audit
//! writer, dashboard broadcaster) without ever blocking the emitting task.
//!
//! Emission is an unbounded enqueue; a dedicated dispatcher task delivers
//! each event to every subscriber in registration order, isolating subscriber
//! errors from one another and from the caller. With no subscribers
//! registered, events are consumed and dropped silently.

mod event;
mod scope;

pub use event::{
    InteractionEvent, LifecycleEventKind, LlmInteractionEvent, McpInteractionEvent,
    SessionLifecycleEvent,
};
pub use scope::{current_scope, scoped_now_us, with_scope, SessionScope};

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

/// A hook bus subscriber. Errors are collected and logged per subscriber;
/// they never propagate to the emitting call site.
#[async_trait]
pub trait InteractionHook: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: &InteractionEvent) -> anyhow::Result<()>;
}

enum BusMessage {
    Event(InteractionEvent),
    Flush(oneshot::Sender<()>),
}

/// Handle to the running hook bus. Cheap to clone; every emission site holds
/// one.
#[derive(Clone)]
pub struct HookBus {
    tx: mpsc::UnboundedSender<BusMessage>,
}

impl HookBus {
    /// Start the dispatcher with a fixed subscriber set. Subscribers are
    /// registered once at startup; the set is immutable afterwards.
    pub fn start(hooks: Vec<Arc<dyn InteractionHook>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<BusMessage>();
        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                match message {
                    BusMessage::Event(event) => {
                        for hook in &hooks {
                            if let Err(error) = hook.on_event(&event).await {
                                warn!(
                                    hook = hook.name(),
                                    error = %error,
                                    "hook subscriber failed; continuing with remaining subscribers"
                                );
                            }
                        }
                    }
                    BusMessage::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        Self { tx }
    }

    /// Enqueue an event. Never blocks and never fails from the caller's
    /// perspective; a closed bus (shutdown) logs and drops.
    pub fn publish(&self, event: InteractionEvent) {
        if self.tx.send(BusMessage::Event(event)).is_err() {
            warn!("hook bus closed; dropping event");
        }
    }

    pub fn publish_llm(&self, event: LlmInteractionEvent) {
        self.publish(InteractionEvent::Llm(event));
    }

    pub fn publish_mcp(&self, event: McpInteractionEvent) {
        self.publish(InteractionEvent::Mcp(event));
    }

    pub fn publish_lifecycle(&self, event: SessionLifecycleEvent) {
        self.publish(InteractionEvent::Lifecycle(event));
    }

    /// Wait until every event published before this call has been delivered
    /// to all subscribers.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(BusMessage::Flush(ack_tx)).is_ok() {
            let _ = ack_rx.await;
        }
    }
}
