//! # Copyover phase tracking.
//!
//! [`Phase`] enumerates the states of the copyover sequence and encodes the
//! permitted transition graph. [`PhaseMachine`] owns the single phase per
//! process: every mutation goes through its validated transition function,
//! serialized by one mutex, and each accepted transition publishes a
//! `PhaseChange` lifecycle event. The machine also owns the bounded history
//! ring and the per-stage progress counters from which overall progress is
//! derived.

mod machine;
mod phase;
mod status;

pub use machine::{PhaseMachine, Stage};
pub use phase::Phase;
pub use status::{HistoryRecord, Status, VetoRecord, VetoSeverity};
