//! # Lifecycle events and the broadcast bus.
//!
//! Every milestone of a copyover — scheduling, each phase transition,
//! cancellation, fan-out start, completion — is published as an [`Event`]
//! on the [`Bus`]. Observers attach through the subscriber dispatcher or
//! subscribe directly (operator tooling, tests) and see transitions in
//! the order the phase machine produced them.

mod bus;
mod event;

pub use bus::Bus;
pub use event::{Event, EventKind};
