//! # Pending game events across copyover.
//!
//! The general-purpose game-event queue serializes each entry as
//! `(type tag, attribute mapping)` and carries its FIFO order counter so
//! ordering survives the exec. Reconstitution dispatches on the tag to a
//! type-specific constructor; events whose tags are unknown to the
//! successor are discarded with a warning.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{GameEvent, GameWorld, QueuedEvent};

#[derive(Serialize, Deserialize)]
struct SerializedEvent {
    event_type: String,
    priority: i32,
    order: u64,
    data: Value,
}

#[derive(Serialize, Deserialize)]
struct EventQueueBlob {
    queued_events: Vec<SerializedEvent>,
    order_counter: u64,
    saved_at: SystemTime,
}

/// Event-queue participant in the copyover fan-out.
pub struct EventQueueSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl EventQueueSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }
}

#[async_trait]
impl Subsystem for EventQueueSubsystem {
    fn name(&self) -> &'static str {
        "event_queue"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let (events, order_counter) = self.world.queue().snapshot();
        if events.is_empty() {
            return Ok(GatherOutcome::Nothing);
        }
        let blob = EventQueueBlob {
            queued_events: events
                .iter()
                .map(|qe| SerializedEvent {
                    event_type: qe.event.tag().to_string(),
                    priority: qe.priority,
                    order: qe.order,
                    data: qe.event.attributes(),
                })
                .collect(),
            order_counter,
            saved_at: SystemTime::now(),
        };
        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: EventQueueBlob =
            serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;

        let mut events = Vec::with_capacity(blob.queued_events.len());
        for serialized in blob.queued_events {
            match GameEvent::from_parts(&serialized.event_type, &serialized.data) {
                Some(event) => events.push(QueuedEvent {
                    event,
                    priority: serialized.priority,
                    order: serialized.order,
                }),
                None => {
                    tracing::warn!(
                        tag = %serialized.event_type,
                        "discarding queued event with unknown tag"
                    );
                }
            }
        }

        let restored = events.len();
        self.world.queue().restore(events, blob.order_counter);
        tracing::info!(restored, "event queue restored");
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn queue_round_trips_with_order_counter() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());

        let world = Arc::new(GameWorld::new());
        world.queue().push(
            GameEvent::Quest {
                user_id: 1,
                quest_token: "ratcatcher/2".into(),
            },
            0,
        );
        world.queue().push(
            GameEvent::EquipmentChange {
                user_id: 1,
                gold_change: -100,
                bank_change: 0,
            },
            5,
        );

        let sub = EventQueueSubsystem::new(Arc::clone(&world), cfg.clone());
        assert_eq!(sub.gather().await.unwrap(), GatherOutcome::Saved);

        let successor = Arc::new(GameWorld::new());
        let sub2 = EventQueueSubsystem::new(Arc::clone(&successor), cfg);
        sub2.restore().await.unwrap();

        assert_eq!(successor.queue().len(), 2);
        // Highest priority pops first, exactly as before the exec.
        let first = successor.queue().pop().unwrap();
        assert!(matches!(first.event, GameEvent::EquipmentChange { .. }));
        // FIFO counter continues where the predecessor stopped.
        successor.queue().push(
            GameEvent::Quest {
                user_id: 2,
                quest_token: "x".into(),
            },
            0,
        );
        let (events, _) = successor.queue().snapshot();
        assert!(events.iter().any(|e| e.order == 3));
    }

    #[tokio::test]
    async fn unknown_tags_are_discarded_with_the_rest_kept() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());

        // A successor reading a blob written by a build that knew more
        // event types than this one.
        let blob = EventQueueBlob {
            queued_events: vec![
                SerializedEvent {
                    event_type: "Quest".into(),
                    priority: 0,
                    order: 1,
                    data: serde_json::json!({"user_id": 5, "quest_token": "t"}),
                },
                SerializedEvent {
                    event_type: "MoonPhaseAlignment".into(),
                    priority: 0,
                    order: 2,
                    data: serde_json::json!({"user_id": 5}),
                },
            ],
            order_counter: 2,
            saved_at: SystemTime::now(),
        };
        snapshot::write_blob(&cfg, "event_queue", &serde_json::to_vec(&blob).unwrap()).unwrap();

        let world = Arc::new(GameWorld::new());
        let sub = EventQueueSubsystem::new(Arc::clone(&world), cfg);
        sub.restore().await.unwrap();

        assert_eq!(world.queue().len(), 1);
        assert!(matches!(
            world.queue().pop().unwrap().event,
            GameEvent::Quest { user_id: 5, .. }
        ));
    }
}
