//! # The copyover coordinator.
//!
//! Sequences countdown → build → quiesce → snapshot → exec on the
//! predecessor side and drives recovery on the successor side. The
//! operator surface talks to [`Coordinator`]; the embedding server calls
//! [`recovery::detect_startup`] and [`recovery::recover`] during boot.

pub(crate) mod build;
pub(crate) mod core;
mod countdown;
pub(crate) mod recovery;

pub use self::build::{build_number, run_build, set_build_number};
pub use self::core::{Collaborators, Coordinator, InitiateOptions};
pub use self::recovery::{detect_startup, recover, Recovered, StartupMode};
