//! # Subsystem registration and fan-out.
//!
//! Heterogeneous subsystems (combat, parties, the event queue, auctions, …)
//! participate in copyover through a uniform capability set: gather state
//! before exec, restore it after, veto an ill-timed copyover, prepare for
//! the freeze, and clean up after a cancellation. [`Subsystem`] is the
//! contract; [`SubsystemRegistry`] maps names to registrations and fans
//! events out in registration order.

mod registry;
mod subsystem;

pub use registry::{GatherSummary, SubsystemRegistry};
pub use subsystem::{GatherOutcome, Participation, Subsystem, SubsystemRef, Veto};
