//! # Error types used by the copyover engine.
//!
//! This module defines three error enums:
//!
//! - [`CopyoverError`] errors raised by the coordinator and phase machine.
//! - [`SnapshotError`] errors raised by the snapshot codec.
//! - [`SubsystemError`] errors raised by individual subsystem gather/restore
//!   callbacks.
//!
//! All types provide an `as_label` helper returning a short stable
//! snake_case label for logs and metrics.
//!
//! ## Propagation rules
//! - Errors in fan-out operations (gather, restore, prepare, cleanup) are
//!   collected-and-continue: they are logged per subsystem and never abort
//!   the overall copyover.
//! - Errors in the coordinator's primary sequence are fatal to the current
//!   copyover (the machine lands in `Failed`) but never to the process.
//! - Operator-precondition errors (`AlreadyInProgress`, `Vetoed`,
//!   `ScheduleInPast`, `CancelRefused`, `CountdownTooLong`) surface
//!   synchronously to the caller with no side effects.

use std::io;
use std::time::SystemTime;

use thiserror::Error;

use crate::phase::Phase;

/// # Errors produced by the copyover coordinator and phase machine.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum CopyoverError {
    /// A copyover sequence is already active; a second one cannot start.
    #[error("copyover already in progress (phase: {phase})")]
    AlreadyInProgress {
        /// Phase the machine was in when the request arrived.
        phase: Phase,
    },

    /// A subsystem issued a hard veto against initiating right now.
    #[error("copyover vetoed by '{subsystem}': {reason}")]
    Vetoed {
        /// Name of the vetoing subsystem.
        subsystem: String,
        /// The veto reason, verbatim.
        reason: String,
    },

    /// `schedule` was called with an instant that is not in the future.
    #[error("scheduled time {when:?} is in the past")]
    ScheduleInPast {
        /// The rejected instant.
        when: SystemTime,
    },

    /// A phase transition outside the permitted adjacency graph was
    /// requested. The machine state is unchanged.
    #[error("invalid phase transition {from} -> {to}")]
    InvalidTransition {
        /// Phase the machine was in.
        from: Phase,
        /// The rejected target phase.
        to: Phase,
    },

    /// `cancel` was called in a phase that does not permit cancellation
    /// (anything at or past `Saving`, or when nothing is in flight).
    #[error("cannot cancel copyover in phase {phase}")]
    CancelRefused {
        /// Phase the machine was in.
        phase: Phase,
    },

    /// The requested countdown exceeds the operator cap.
    #[error("countdown {requested}s exceeds maximum of {max}s")]
    CountdownTooLong {
        /// The requested countdown, seconds.
        requested: u32,
        /// The configured maximum, seconds.
        max: u32,
    },

    /// The build toolchain exited non-zero or could not be invoked.
    #[error("build failed: {reason}")]
    BuildFailed {
        /// Tail of the toolchain's stderr, or the spawn error.
        reason: String,
    },

    /// The primary snapshot could not be written or validated.
    #[error("snapshot: {0}")]
    SnapshotIo(#[from] SnapshotError),

    /// The process-replacement spawn returned an error. The snapshot file
    /// is retained on disk for operator triage.
    #[error("exec failed: {reason}")]
    ExecFailed {
        /// The underlying spawn error.
        reason: String,
    },

    /// A subsystem with this name is already registered.
    #[error("subsystem '{name}' already registered")]
    DuplicateSubsystem {
        /// The duplicate name.
        name: &'static str,
    },

    /// Registration was attempted after the first copyover began.
    #[error("subsystem registrations are frozen once the first copyover begins")]
    RegistryFrozen,
}

impl CopyoverError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            CopyoverError::AlreadyInProgress { .. } => "copyover_already_in_progress",
            CopyoverError::Vetoed { .. } => "copyover_vetoed",
            CopyoverError::ScheduleInPast { .. } => "copyover_schedule_in_past",
            CopyoverError::InvalidTransition { .. } => "copyover_invalid_transition",
            CopyoverError::CancelRefused { .. } => "copyover_cancel_refused",
            CopyoverError::CountdownTooLong { .. } => "copyover_countdown_too_long",
            CopyoverError::BuildFailed { .. } => "copyover_build_failed",
            CopyoverError::SnapshotIo(_) => "copyover_snapshot_io",
            CopyoverError::ExecFailed { .. } => "copyover_exec_failed",
            CopyoverError::DuplicateSubsystem { .. } => "copyover_duplicate_subsystem",
            CopyoverError::RegistryFrozen => "copyover_registry_frozen",
        }
    }

    /// True for operator-precondition refusals that have no side effects.
    pub fn is_refusal(&self) -> bool {
        matches!(
            self,
            CopyoverError::AlreadyInProgress { .. }
                | CopyoverError::Vetoed { .. }
                | CopyoverError::ScheduleInPast { .. }
                | CopyoverError::CancelRefused { .. }
                | CopyoverError::CountdownTooLong { .. }
        )
    }
}

/// # Errors produced by the snapshot codec.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SnapshotError {
    /// Filesystem failure while writing or reading snapshot files.
    #[error("snapshot io: {0}")]
    Io(#[from] io::Error),

    /// The snapshot value could not be serialized.
    #[error("snapshot encode: {0}")]
    Encode(serde_json::Error),

    /// The on-disk bytes could not be parsed back into a snapshot.
    ///
    /// In recovery this means: delete the file, log, boot cold.
    #[error("snapshot malformed: {0}")]
    Malformed(serde_json::Error),

    /// The decoded snapshot violates a structural invariant (sparse or
    /// duplicated FD indices, connections ahead of listeners).
    #[error("snapshot invalid: {reason}")]
    Invalid {
        /// Which invariant failed.
        reason: String,
    },
}

impl SnapshotError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SnapshotError::Io(_) => "snapshot_io",
            SnapshotError::Encode(_) => "snapshot_encode",
            SnapshotError::Malformed(_) => "snapshot_malformed",
            SnapshotError::Invalid { .. } => "snapshot_invalid",
        }
    }
}

/// # Errors produced by subsystem gather/restore callbacks.
///
/// These never abort a copyover; the registry logs them and continues with
/// the remaining subsystems.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum SubsystemError {
    /// Blob file could not be read or written.
    #[error("blob io: {0}")]
    Io(#[from] io::Error),

    /// Subsystem state could not be serialized into its blob.
    #[error("blob encode: {0}")]
    Encode(serde_json::Error),

    /// Blob bytes could not be parsed. The blob is skipped with a warning.
    #[error("blob decode: {0}")]
    Decode(serde_json::Error),

    /// Anything else a subsystem wants to report.
    #[error("{0}")]
    Other(String),
}

impl SubsystemError {
    /// Returns a short stable label.
    pub fn as_label(&self) -> &'static str {
        match self {
            SubsystemError::Io(_) => "subsystem_io",
            SubsystemError::Encode(_) => "subsystem_encode",
            SubsystemError::Decode(_) => "subsystem_decode",
            SubsystemError::Other(_) => "subsystem_other",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        let e = CopyoverError::RegistryFrozen;
        assert_eq!(e.as_label(), "copyover_registry_frozen");

        let e = CopyoverError::Vetoed {
            subsystem: "auctions".into(),
            reason: "auction ending".into(),
        };
        assert_eq!(e.as_label(), "copyover_vetoed");
        assert!(e.is_refusal());

        let e = CopyoverError::BuildFailed {
            reason: "boom".into(),
        };
        assert!(!e.is_refusal());
    }

    #[test]
    fn display_carries_context() {
        let e = CopyoverError::InvalidTransition {
            from: Phase::Idle,
            to: Phase::Executing,
        };
        assert_eq!(e.to_string(), "invalid phase transition idle -> executing");
    }
}
