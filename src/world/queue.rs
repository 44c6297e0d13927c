//! # The pending game-event queue.
//!
//! A priority queue of dynamic-typed game events. Each event serializes as
//! a `(tag, attribute mapping)` pair; reconstitution dispatches on the tag
//! to a type-specific constructor. Tags unknown to the running build are
//! discarded with a warning.
//!
//! FIFO order among equal priorities is kept by a monotonic order counter;
//! the counter itself is part of the copyover blob so ordering survives the
//! exec.

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::Mutex;

use serde_json::{json, Value};

use crate::world::UserId;

/// A typed game event.
///
/// The variants mirror the events the server actually queues; everything
/// else arriving from a snapshot is unknown and dropped.
#[derive(Debug, Clone, PartialEq)]
pub enum GameEvent {
    /// Quest progression for a user.
    Quest {
        /// The progressing user.
        user_id: UserId,
        /// Opaque quest token.
        quest_token: String,
    },
    /// Gold/bank delta after an equipment change.
    EquipmentChange {
        /// Affected user.
        user_id: UserId,
        /// Carried-gold delta.
        gold_change: i64,
        /// Banked-gold delta.
        bank_change: i64,
    },
    /// An item changed hands.
    ItemOwnership {
        /// Affected user.
        user_id: UserId,
        /// Item template id.
        item_id: i64,
        /// Gained (true) or lost (false).
        gained: bool,
    },
}

impl GameEvent {
    /// Stable type tag written into the blob.
    pub fn tag(&self) -> &'static str {
        match self {
            GameEvent::Quest { .. } => "Quest",
            GameEvent::EquipmentChange { .. } => "EquipmentChange",
            GameEvent::ItemOwnership { .. } => "ItemOwnership",
        }
    }

    /// Attribute mapping written into the blob.
    pub fn attributes(&self) -> Value {
        match self {
            GameEvent::Quest {
                user_id,
                quest_token,
            } => json!({ "user_id": user_id, "quest_token": quest_token }),
            GameEvent::EquipmentChange {
                user_id,
                gold_change,
                bank_change,
            } => json!({
                "user_id": user_id,
                "gold_change": gold_change,
                "bank_change": bank_change,
            }),
            GameEvent::ItemOwnership {
                user_id,
                item_id,
                gained,
            } => json!({ "user_id": user_id, "item_id": item_id, "gained": gained }),
        }
    }

    /// Type-specific constructor dispatch. `None` for unknown tags or
    /// attribute mappings that no longer parse.
    pub fn from_parts(tag: &str, attrs: &Value) -> Option<GameEvent> {
        let user_id = attrs.get("user_id")?.as_i64();
        match tag {
            "Quest" => Some(GameEvent::Quest {
                user_id: user_id?,
                quest_token: attrs.get("quest_token")?.as_str()?.to_string(),
            }),
            "EquipmentChange" => Some(GameEvent::EquipmentChange {
                user_id: user_id?,
                gold_change: attrs.get("gold_change")?.as_i64()?,
                bank_change: attrs.get("bank_change")?.as_i64()?,
            }),
            "ItemOwnership" => Some(GameEvent::ItemOwnership {
                user_id: user_id?,
                item_id: attrs.get("item_id")?.as_i64()?,
                gained: attrs.get("gained")?.as_bool()?,
            }),
            _ => None,
        }
    }
}

/// A queued event with its scheduling metadata.
#[derive(Debug, Clone)]
pub struct QueuedEvent {
    /// The event payload.
    pub event: GameEvent,
    /// Higher runs first.
    pub priority: i32,
    /// FIFO tiebreak among equal priorities.
    pub order: u64,
}

impl PartialEq for QueuedEvent {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.order == other.order
    }
}
impl Eq for QueuedEvent {}

impl Ord for QueuedEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Max-heap: highest priority first, then lowest order (FIFO).
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.order.cmp(&self.order))
    }
}

impl PartialOrd for QueuedEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

struct QueueInner {
    heap: BinaryHeap<QueuedEvent>,
    order_counter: u64,
}

/// Priority queue of pending game events.
pub struct GameQueue {
    inner: Mutex<QueueInner>,
}

impl Default for GameQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl GameQueue {
    /// Creates an empty queue.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                order_counter: 0,
            }),
        }
    }

    /// Enqueues an event at the given priority.
    pub fn push(&self, event: GameEvent, priority: i32) {
        let mut inner = self.inner.lock().unwrap();
        inner.order_counter += 1;
        let order = inner.order_counter;
        inner.heap.push(QueuedEvent {
            event,
            priority,
            order,
        });
    }

    /// Dequeues the highest-priority (then oldest) event.
    pub fn pop(&self) -> Option<QueuedEvent> {
        self.inner.lock().unwrap().heap.pop()
    }

    /// Pending event count.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().heap.len()
    }

    /// True when nothing is pending.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Non-destructive snapshot of the queue contents and the order
    /// counter, in heap-pop order.
    pub fn snapshot(&self) -> (Vec<QueuedEvent>, u64) {
        let inner = self.inner.lock().unwrap();
        let mut events: Vec<QueuedEvent> = inner.heap.iter().cloned().collect();
        events.sort_by(|a, b| b.cmp(a));
        (events, inner.order_counter)
    }

    /// Replaces the queue contents and order counter (restore path).
    pub fn restore(&self, events: Vec<QueuedEvent>, order_counter: u64) {
        let mut inner = self.inner.lock().unwrap();
        inner.heap = events.into_iter().collect();
        inner.order_counter = order_counter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn priority_then_fifo() {
        let q = GameQueue::new();
        q.push(
            GameEvent::Quest {
                user_id: 1,
                quest_token: "a".into(),
            },
            0,
        );
        q.push(
            GameEvent::Quest {
                user_id: 2,
                quest_token: "b".into(),
            },
            5,
        );
        q.push(
            GameEvent::Quest {
                user_id: 3,
                quest_token: "c".into(),
            },
            0,
        );

        let order: Vec<UserId> = std::iter::from_fn(|| q.pop())
            .map(|qe| match qe.event {
                GameEvent::Quest { user_id, .. } => user_id,
                _ => unreachable!(),
            })
            .collect();
        assert_eq!(order, vec![2, 1, 3]);
    }

    #[test]
    fn tag_round_trip() {
        let events = [
            GameEvent::Quest {
                user_id: 7,
                quest_token: "start/3".into(),
            },
            GameEvent::EquipmentChange {
                user_id: 7,
                gold_change: -20,
                bank_change: 0,
            },
            GameEvent::ItemOwnership {
                user_id: 7,
                item_id: 456,
                gained: true,
            },
        ];
        for ev in events {
            let rebuilt = GameEvent::from_parts(ev.tag(), &ev.attributes()).unwrap();
            assert_eq!(rebuilt, ev);
        }
    }

    #[test]
    fn unknown_tag_is_rejected() {
        assert!(GameEvent::from_parts("HologramCalibration", &json!({"user_id": 1})).is_none());
    }

    #[test]
    fn snapshot_preserves_order_counter() {
        let q = GameQueue::new();
        q.push(
            GameEvent::ItemOwnership {
                user_id: 1,
                item_id: 2,
                gained: false,
            },
            0,
        );
        let (events, counter) = q.snapshot();
        assert_eq!(events.len(), 1);
        assert_eq!(counter, 1);
        // Snapshot is non-destructive.
        assert_eq!(q.len(), 1);

        let q2 = GameQueue::new();
        q2.restore(events, counter);
        q2.push(
            GameEvent::ItemOwnership {
                user_id: 1,
                item_id: 3,
                gained: true,
            },
            0,
        );
        let (events, _) = q2.snapshot();
        // FIFO continues across the restore.
        assert_eq!(events[0].order, 1);
        assert_eq!(events[1].order, 2);
    }
}
