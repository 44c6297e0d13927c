//! # The subscriber contract.
//!
//! A [`Subscribe`] implementation is one observer of the copyover
//! lifecycle: the built-in log mirror, the broadcast-to-players delivery,
//! an embedding server's metrics exporter. Subscribers never run on the
//! publisher's call path — the [`Dispatcher`](crate::subscribers::Dispatcher)
//! hands each one its events through a private bounded queue — so an
//! implementation is free to do slow I/O, batch, or retry without
//! touching copyover latency.
//!
//! Two knobs shape delivery. [`Subscribe::interested_in`] filters by
//! [`EventKind`] before an event ever reaches the queue: an observer that
//! only cares about `Broadcast` text never pays for phase-change traffic.
//! [`Subscribe::queue_depth`] bounds the queue; when it overflows, events
//! are dropped for that subscriber alone and the drop is counted.

use async_trait::async_trait;

use crate::events::{Event, EventKind};

/// One observer of the lifecycle stream.
///
/// Runs on its own worker task. A panic inside [`Subscribe::on_event`]
/// detaches the subscriber rather than crashing the engine.
#[async_trait]
pub trait Subscribe: Send + Sync + 'static {
    /// Handles one event. Slow work is fine here; only this subscriber's
    /// own queue fills while it runs.
    async fn on_event(&self, event: &Event);

    /// Stable name for logs and drop accounting.
    fn name(&self) -> &'static str {
        std::any::type_name::<Self>()
    }

    /// Which event kinds this subscriber wants. Events outside the set
    /// are filtered out before they touch the queue.
    fn interested_in(&self, kind: EventKind) -> bool {
        let _ = kind;
        true
    }

    /// Depth of this subscriber's delivery queue. On overflow, events are
    /// dropped for this subscriber only.
    fn queue_depth(&self) -> usize {
        1024
    }
}
