//! # Lifecycle-event subscribers.
//!
//! Observers of the copyover stream implement [`Subscribe`] and are wired
//! onto the bus by [`Dispatcher::attach`], which gives each one a private
//! queue and worker so none of them can slow the sequence down. Two ship
//! with the engine: [`LogSubscriber`] mirrors lifecycle events into
//! `tracing`, and [`BroadcastSubscriber`] delivers rendered `Broadcast`
//! text to every logged-in connection.

mod broadcast;
mod dispatcher;
mod log;
mod subscribe;

pub use broadcast::BroadcastSubscriber;
pub use dispatcher::Dispatcher;
pub use log::LogSubscriber;
pub use subscribe::Subscribe;
