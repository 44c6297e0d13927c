//! # Broadcast-to-connections subscriber.
//!
//! Delivers the rendered text of `Broadcast` events to every logged-in
//! connection. Countdown announcements, cancellation notices, and the
//! pre-exec message all reach clients through this path. Interest is
//! declared as `Broadcast` only, so phase-change traffic never touches
//! this subscriber's queue.

use std::sync::Arc;

use async_trait::async_trait;

use crate::conn::ConnectionManager;
use crate::events::{Event, EventKind};

use super::Subscribe;

/// Writes `Broadcast` event text to all logged-in peers.
pub struct BroadcastSubscriber {
    conns: Arc<ConnectionManager>,
}

impl BroadcastSubscriber {
    /// Creates a subscriber delivering to the given connection manager.
    pub fn new(conns: Arc<ConnectionManager>) -> Self {
        Self { conns }
    }
}

#[async_trait]
impl Subscribe for BroadcastSubscriber {
    async fn on_event(&self, event: &Event) {
        if let Some(text) = &event.text {
            self.conns.broadcast(text);
        }
    }

    fn name(&self) -> &'static str {
        "broadcast"
    }

    fn interested_in(&self, kind: EventKind) -> bool {
        kind == EventKind::Broadcast
    }

    fn queue_depth(&self) -> usize {
        256
    }
}
