//! # The lifecycle event bus.
//!
//! Everything the engine does out loud — phase transitions, scheduling,
//! cancellation, the gather/restore milestones, the listener shutdown
//! signal, rendered player notices — is announced as an [`Event`] on one
//! process-wide channel. The phase machine, coordinator, and recovery
//! path publish; the subscriber dispatcher, operator tooling, and tests
//! attach receivers.
//!
//! The channel is a bounded tokio broadcast, which gives the bus exactly
//! the posture a copyover needs: publishing never blocks (nothing on the
//! observation side may stall the sequence), a headless embedding with
//! zero receivers is valid (events simply evaporate), and a receiver that
//! falls more than `capacity` events behind loses the oldest ones instead
//! of back-pressuring an exec in flight.

use tokio::sync::broadcast;

use super::event::{Event, EventKind};

/// Process-wide channel for lifecycle events.
#[derive(Clone)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus buffering at most `capacity` undelivered events per
    /// receiver. A zero capacity is bumped to one.
    pub fn new(capacity: usize) -> Self {
        let (tx, _idle_rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Announces an event to every attached receiver.
    ///
    /// Never blocks. With nobody attached the event evaporates, which is
    /// how headless embeddings run; delivery is therefore best-effort by
    /// contract, not by accident.
    pub fn publish(&self, ev: Event) {
        if let Ok(reached) = self.tx.send(ev) {
            tracing::trace!(reached, "lifecycle event published");
        }
    }

    /// Shorthand for the most common announcement: rendered narrative
    /// text destined for every logged-in player.
    pub fn broadcast_text(&self, text: impl Into<String>) {
        self.publish(Event::now(EventKind::Broadcast).with_text(text));
    }

    /// Attaches a new receiver. It sees every event published from this
    /// moment on; history is not replayed.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
