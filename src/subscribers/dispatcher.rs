//! # Dispatcher: bus-to-subscriber delivery.
//!
//! One pump task drains the lifecycle bus and feeds every attached
//! subscriber through its own bounded queue and worker. The pump is the
//! only bus receiver the subscribers share; everything downstream of it
//! is per-subscriber, so observers cannot slow the copyover sequence or
//! each other.
//!
//! Delivery policy, in order:
//! 1. Events a subscriber declared no interest in
//!    ([`Subscribe::interested_in`]) are filtered before queueing and are
//!    not counted as anything.
//! 2. A full queue drops the event for that subscriber alone; drops are
//!    counted per subscriber and logged.
//! 3. A subscriber that panics is detached: its worker exits after
//!    logging the payload, and every later event for it lands in the
//!    drop count. The rest of the set keeps running.
//! 4. Within one subscriber, events arrive in queue order. Across
//!    subscribers no ordering is promised.

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use crate::events::{Bus, Event};

use super::Subscribe;

/// One attached subscriber, as the pump sees it.
struct Outlet {
    sub: Arc<dyn Subscribe>,
    queue: mpsc::Sender<Arc<Event>>,
    dropped: Arc<AtomicU64>,
}

/// Drives lifecycle events from a [`Bus`] into a set of subscribers.
///
/// Dropping the `Dispatcher` handle does not stop delivery; the pump and
/// workers run until the bus itself is gone. [`Dispatcher::join`] exists
/// for tests and orderly shutdown paths that want to see the queues
/// drain.
pub struct Dispatcher {
    drop_counts: Vec<(&'static str, Arc<AtomicU64>)>,
    workers: Vec<JoinHandle<()>>,
    pump: JoinHandle<()>,
}

impl Dispatcher {
    /// Plugs `subscribers` into `bus` and starts delivery.
    pub fn attach(bus: &Bus, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        let mut outlets = Vec::with_capacity(subscribers.len());
        let mut workers = Vec::with_capacity(subscribers.len());
        let mut drop_counts = Vec::with_capacity(subscribers.len());

        for sub in subscribers {
            let (queue, feed) = mpsc::channel(sub.queue_depth().max(1));
            let dropped = Arc::new(AtomicU64::new(0));
            drop_counts.push((sub.name(), Arc::clone(&dropped)));
            workers.push(spawn_worker(Arc::clone(&sub), feed));
            outlets.push(Outlet {
                sub,
                queue,
                dropped,
            });
        }

        let mut feed = bus.subscribe();
        let pump = tokio::spawn(async move {
            loop {
                match feed.recv().await {
                    Ok(ev) => fan_out(&outlets, ev),
                    Err(broadcast::error::RecvError::Lagged(missed)) => {
                        tracing::warn!(missed, "dispatcher fell behind the bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            // Outlets drop with the pump; workers drain what is queued
            // and exit.
        });

        Self {
            drop_counts,
            workers,
            pump,
        }
    }

    /// Events dropped so far for the named subscriber (queue overflow or
    /// post-detach).
    pub fn dropped_events(&self, subscriber: &str) -> u64 {
        self.drop_counts
            .iter()
            .find(|(name, _)| *name == subscriber)
            .map(|(_, count)| count.load(AtomicOrdering::Relaxed))
            .unwrap_or(0)
    }

    /// Waits for the pump and every worker to finish.
    ///
    /// Only completes once every clone of the bus has been dropped; until
    /// then the pump keeps listening.
    pub async fn join(self) {
        let _ = self.pump.await;
        for worker in self.workers {
            let _ = worker.await;
        }
    }
}

/// Hands one event to every interested outlet without awaiting anyone.
fn fan_out(outlets: &[Outlet], ev: Event) {
    let ev = Arc::new(ev);
    for outlet in outlets {
        if !outlet.sub.interested_in(ev.kind) {
            continue;
        }
        if outlet.queue.try_send(Arc::clone(&ev)).is_err() {
            // Full queue and detached worker look the same from here:
            // the event is lost for this subscriber only.
            let total = outlet.dropped.fetch_add(1, AtomicOrdering::Relaxed) + 1;
            tracing::warn!(
                subscriber = outlet.sub.name(),
                total,
                "event dropped for subscriber"
            );
        }
    }
}

/// Runs one subscriber until its queue closes or it panics.
fn spawn_worker(sub: Arc<dyn Subscribe>, mut feed: mpsc::Receiver<Arc<Event>>) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(ev) = feed.recv().await {
            let delivery = std::panic::AssertUnwindSafe(sub.on_event(&ev)).catch_unwind();
            if let Err(payload) = delivery.await {
                tracing::error!(
                    subscriber = sub.name(),
                    panic = ?payload,
                    "subscriber panicked; detaching it"
                );
                return;
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::events::EventKind;

    struct Counter {
        seen: AtomicUsize,
        only: Option<EventKind>,
    }

    impl Counter {
        fn all() -> Arc<Self> {
            Arc::new(Self {
                seen: AtomicUsize::new(0),
                only: None,
            })
        }

        fn only(kind: EventKind) -> Arc<Self> {
            Arc::new(Self {
                seen: AtomicUsize::new(0),
                only: Some(kind),
            })
        }
    }

    #[async_trait]
    impl Subscribe for Counter {
        async fn on_event(&self, _event: &Event) {
            self.seen.fetch_add(1, Ordering::SeqCst);
        }
        fn name(&self) -> &'static str {
            "counter"
        }
        fn interested_in(&self, kind: EventKind) -> bool {
            self.only.map_or(true, |only| only == kind)
        }
    }

    struct Panicker;

    #[async_trait]
    impl Subscribe for Panicker {
        async fn on_event(&self, _event: &Event) {
            panic!("subscriber bug");
        }
        fn name(&self) -> &'static str {
            "panicker"
        }
    }

    #[tokio::test]
    async fn panicking_subscriber_is_detached_others_keep_running() {
        let bus = Bus::new(16);
        let counter = Counter::all();
        let dispatcher = Dispatcher::attach(&bus, vec![Arc::new(Panicker), counter.clone()]);

        for _ in 0..3 {
            bus.publish(Event::now(EventKind::PhaseChange));
        }
        drop(bus);
        dispatcher.join().await;

        assert_eq!(counter.seen.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn interest_filter_runs_before_the_queue() {
        let bus = Bus::new(16);
        let broadcasts = Counter::only(EventKind::Broadcast);
        let dispatcher = Dispatcher::attach(&bus, vec![broadcasts.clone()]);

        bus.publish(Event::now(EventKind::PhaseChange));
        bus.publish(Event::now(EventKind::Broadcast).with_text("hello"));
        bus.publish(Event::now(EventKind::Completed));

        // Let the pump run, then check the books before joining.
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        // Filtered events are not drops.
        assert_eq!(dispatcher.dropped_events("counter"), 0);

        drop(bus);
        dispatcher.join().await;
        assert_eq!(broadcasts.seen.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn drop_accounting_is_per_subscriber() {
        let bus = Bus::new(16);
        let counter = Counter::all();
        let dispatcher = Dispatcher::attach(&bus, vec![counter.clone()]);

        assert_eq!(dispatcher.dropped_events("counter"), 0);
        assert_eq!(dispatcher.dropped_events("nonexistent"), 0);

        bus.publish(Event::now(EventKind::Completed));
        drop(bus);
        dispatcher.join().await;
        assert_eq!(counter.seen.load(Ordering::SeqCst), 1);
    }
}
