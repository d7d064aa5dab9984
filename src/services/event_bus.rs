//! Broadcast bus carrying engine output events.
//!
//! Workers publish their outputs here; the Engine Manager runs the single
//! routing subscriber. Additional subscribers (monitors, tests) may attach
//! without affecting routing.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::broadcast;
use uuid::Uuid;

/// An output event produced by an engine worker, tagged with the producing
/// agent and the event instance it answered.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineOutput {
    /// Monotonic sequence assigned by the bus
    pub sequence: u64,
    pub scenario_run_id: Uuid,
    pub source_agent_id: Uuid,
    pub source_engine_id: String,
    /// Output event type (e.g. `actor_speech_generated`)
    pub event_type: String,
    pub payload: serde_json::Value,
    /// The leased event this output answers
    pub in_reply_to: Uuid,
    pub produced_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct EventBusConfig {
    pub channel_capacity: usize,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 1024,
        }
    }
}

/// Publish-subscribe bus with sequence numbering.
pub struct EventBus {
    sender: broadcast::Sender<EngineOutput>,
    sequence: AtomicU64,
}

impl EventBus {
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, _) = broadcast::channel(config.channel_capacity);
        Self {
            sender,
            sequence: AtomicU64::new(0),
        }
    }

    /// Publish an output. Send errors (no subscribers) are ignored.
    pub fn publish(&self, mut output: EngineOutput) {
        output.sequence = self.sequence.fetch_add(1, Ordering::SeqCst);
        let _ = self.sender.send(output);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineOutput> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn current_sequence(&self) -> u64 {
        self.sequence.load(Ordering::SeqCst)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EventBusConfig::default())
    }
}

impl EngineOutput {
    pub fn new(
        scenario_run_id: Uuid,
        source_agent_id: Uuid,
        source_engine_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
        in_reply_to: Uuid,
    ) -> Self {
        Self {
            sequence: 0,
            scenario_run_id,
            source_agent_id,
            source_engine_id: source_engine_id.into(),
            event_type: event_type.into(),
            payload,
            in_reply_to,
            produced_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn output() -> EngineOutput {
        EngineOutput::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            "actor_a_12345678",
            "actor_speech_generated",
            serde_json::json!({"content": "line"}),
            Uuid::new_v4(),
        )
    }

    #[tokio::test]
    async fn sequence_assignment() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();

        bus.publish(output());
        bus.publish(output());

        assert_eq!(rx.recv().await.unwrap().sequence, 0);
        assert_eq!(rx.recv().await.unwrap().sequence, 1);
        assert_eq!(bus.current_sequence(), 2);
    }

    #[tokio::test]
    async fn publish_without_subscribers_does_not_panic() {
        let bus = EventBus::default();
        bus.publish(output());
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn multiple_subscribers_each_receive() {
        let bus = EventBus::default();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(output());
        assert_eq!(rx1.recv().await.unwrap().sequence, 0);
        assert_eq!(rx2.recv().await.unwrap().sequence, 0);
    }
}
