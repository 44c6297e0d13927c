//! # The copyover phase enum and its transition graph.
//!
//! ## Permitted transitions
//! ```text
//! Idle        → Scheduled | Building | Recovering
//! Scheduled   → Announcing | Cancelling
//! Announcing  → Building | Cancelling
//! Building    → Saving | Failed | Cancelling
//! Saving      → Gathering | Failed
//! Gathering   → Executing | Failed
//! Executing   → Recovering | Failed      (Recovering is reached in the successor)
//! Recovering  → Idle | Failed
//! Cancelling  → Idle
//! Failed      → Idle
//! ```
//!
//! Terminal resting states are `Idle` and `Failed`; everything else counts
//! as an active copyover. A transition request to an unlisted target fails
//! and leaves the state unchanged.

use std::fmt;

/// Current phase of the copyover sequence. Exactly one per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    /// No copyover in progress.
    Idle,
    /// A copyover has been scheduled for a future instant.
    Scheduled,
    /// Countdown announcements are being sent.
    Announcing,
    /// The new executable is being built.
    Building,
    /// Resident users are being persisted.
    Saving,
    /// Subsystem state is being gathered and FDs extracted.
    Gathering,
    /// The successor process is being spawned.
    Executing,
    /// The successor is reconstituting state.
    Recovering,
    /// Cancellation in progress.
    Cancelling,
    /// The copyover failed; awaiting reset to `Idle`.
    Failed,
}

impl Phase {
    /// Stable lowercase name for logs and the operator surface.
    pub fn as_str(self) -> &'static str {
        match self {
            Phase::Idle => "idle",
            Phase::Scheduled => "scheduled",
            Phase::Announcing => "announcing",
            Phase::Building => "building",
            Phase::Saving => "saving",
            Phase::Gathering => "gathering",
            Phase::Executing => "executing",
            Phase::Recovering => "recovering",
            Phase::Cancelling => "cancelling",
            Phase::Failed => "failed",
        }
    }

    /// Whether a transition to `target` is on the permitted graph.
    pub fn can_transition_to(self, target: Phase) -> bool {
        use Phase::*;
        let allowed: &[Phase] = match self {
            Idle => &[Scheduled, Building, Recovering],
            Scheduled => &[Announcing, Cancelling],
            Announcing => &[Building, Cancelling],
            Building => &[Saving, Failed, Cancelling],
            Saving => &[Gathering, Failed],
            Gathering => &[Executing, Failed],
            Executing => &[Recovering, Failed],
            Recovering => &[Idle, Failed],
            Cancelling => &[Idle],
            Failed => &[Idle],
        };
        allowed.contains(&target)
    }

    /// True for the resting states (`Idle`, `Failed`).
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Idle | Phase::Failed)
    }

    /// True while a copyover is in progress.
    pub fn is_active(self) -> bool {
        !self.is_terminal()
    }

    /// True for the phases from which `cancel` is accepted.
    ///
    /// A cancel after `Saving` begins is refused: the world is already
    /// quiescent and the sequence runs to exec or failure.
    pub fn is_cancellable(self) -> bool {
        matches!(self, Phase::Scheduled | Phase::Announcing | Phase::Building)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
