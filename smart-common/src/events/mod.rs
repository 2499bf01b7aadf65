//! Event types for the SMART event system
//!
//! Provides pipeline event definitions and the EventBus shared by the engine
//! and any operator-facing subscriber.

mod batch_types;

pub use batch_types::BatchState;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Engine events
///
/// Broadcast via EventBus; serializable so a subscriber can forward them.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineEvent {
    /// A queue was topped up
    QueueFilled {
        queue_id: Uuid,
        project_id: Uuid,
        inserted: usize,
        occupancy: usize,
        timestamp: DateTime<Utc>,
    },

    /// An ingestion batch entered the training-trigger pipeline
    BatchSubmitted {
        batch_id: Uuid,
        project_id: Uuid,
        data_count: usize,
        vectorize_tasks: usize,
        timestamp: DateTime<Utc>,
    },

    /// A batch moved between lifecycle states
    BatchStateChanged {
        batch_id: Uuid,
        project_id: Uuid,
        old_state: BatchState,
        new_state: BatchState,
        timestamp: DateTime<Utc>,
    },

    /// A batch reached FAILED; the trigger check will not run for it
    ///
    /// Operator-facing: the uploader is not notified.
    BatchFailed {
        batch_id: Uuid,
        project_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// A training job was handed to the model training subsystem
    TrainingTriggered {
        batch_id: Uuid,
        project_id: Uuid,
        training_set: i64,
        labeled_count: u64,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    pub fn event_type(&self) -> &'static str {
        match self {
            PipelineEvent::QueueFilled { .. } => "QueueFilled",
            PipelineEvent::BatchSubmitted { .. } => "BatchSubmitted",
            PipelineEvent::BatchStateChanged { .. } => "BatchStateChanged",
            PipelineEvent::BatchFailed { .. } => "BatchFailed",
            PipelineEvent::TrainingTriggered { .. } => "TrainingTriggered",
        }
    }
}

/// Central event distribution bus
///
/// Cloning shares the underlying channel.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
    capacity: usize,
}

impl EventBus {
    /// Creates a new EventBus buffering up to `capacity` events per subscriber
    ///
    /// ```
    /// use smart_common::events::EventBus;
    ///
    /// let event_bus = EventBus::new(100);
    /// assert_eq!(event_bus.capacity(), 100);
    /// ```
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx, capacity }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    /// Emit an event to all subscribers
    ///
    /// Returns `Err` if no subscribers are listening.
    #[allow(clippy::result_large_err)]
    pub fn emit(
        &self,
        event: PipelineEvent,
    ) -> Result<usize, broadcast::error::SendError<PipelineEvent>> {
        self.tx.send(event)
    }

    /// Emit an event, ignoring if no subscribers are listening
    pub fn emit_lossy(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_subscriber_receives_emitted_event() {
        let bus = EventBus::new(10);
        let mut rx = bus.subscribe();

        let batch_id = Uuid::new_v4();
        bus.emit(PipelineEvent::BatchFailed {
            batch_id,
            project_id: Uuid::new_v4(),
            reason: "vectorizer down".to_string(),
            timestamp: Utc::now(),
        })
        .unwrap();

        match rx.recv().await.unwrap() {
            PipelineEvent::BatchFailed { batch_id: got, reason, .. } => {
                assert_eq!(got, batch_id);
                assert_eq!(reason, "vectorizer down");
            }
            other => panic!("unexpected event {:?}", other),
        }
    }

    #[test]
    fn test_emit_without_subscribers() {
        let bus = EventBus::new(10);
        let event = PipelineEvent::QueueFilled {
            queue_id: Uuid::new_v4(),
            project_id: Uuid::new_v4(),
            inserted: 3,
            occupancy: 3,
            timestamp: Utc::now(),
        };
        assert!(bus.emit(event.clone()).is_err());
        // Lossy variant must not panic
        bus.emit_lossy(event);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn test_event_serializes_with_type_tag() {
        let event = PipelineEvent::BatchStateChanged {
            batch_id: Uuid::nil(),
            project_id: Uuid::nil(),
            old_state: BatchState::Vectorizing,
            new_state: BatchState::AllVectorized,
            timestamp: Utc::now(),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "BatchStateChanged");
        assert_eq!(json["new_state"], "ALL_VECTORIZED");
        assert_eq!(event.event_type(), "BatchStateChanged");
    }
}
