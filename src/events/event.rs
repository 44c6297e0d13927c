//! # Lifecycle events emitted by the phase machine and coordinator.
//!
//! The [`EventKind`] enum classifies event types across three categories:
//! - **Lifecycle events**: scheduling, phase transitions, cancellation,
//!   completion
//! - **Fan-out milestones**: gather and restore sweeps starting
//! - **Notices**: the listener shutdown signal and rendered broadcast text
//!   for connected users
//!
//! The [`Event`] struct carries additional metadata such as the old/new
//! phase, overall progress, the operator's reason, and rendered text.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases
//! monotonically. Phase transitions are produced under the machine mutex,
//! so observers see them in transition order.
//!
//! ## Event flow, immediate copyover
//! ```text
//! initiate()
//!   → PhaseChange (idle → building)
//!   → Broadcast (countdown messages)
//!   → PhaseChange (building → saving)
//!   → PhaseChange (saving → gathering)
//!   → GatherState
//!   → PhaseChange (gathering → executing)
//!   → ShutdownListeners
//!   → [exec; successor process]
//!   → PhaseChange (idle → recovering)
//!   → RestoreState
//!   → PhaseChange (recovering → idle)
//!   → Completed
//! ```

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::phase::Phase;

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// A copyover was scheduled for a future instant.
    Scheduled,
    /// The phase machine moved to a new phase.
    PhaseChange,
    /// A scheduled or in-flight copyover was cancelled.
    Cancelled,
    /// Recovery finished; the copyover is complete.
    Completed,

    /// The gather fan-out is starting (state is about to be frozen).
    GatherState,
    /// The restore fan-out is starting in the successor.
    RestoreState,

    /// Listener accept loops must exit without closing their sockets; the
    /// coordinator still owns the duplicated FDs.
    ShutdownListeners,
    /// Rendered narrative text to deliver to every logged-in connection.
    Broadcast,
}

/// Lifecycle event with optional metadata.
///
/// Carries information about phase transitions, scheduling, cancellation
/// reasons, and broadcast text.
#[derive(Clone)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    /// Used to determine event ordering across async boundaries.
    pub seq: u64,
    /// Wall-clock timestamp (may go backwards, use for logging only).
    pub at: SystemTime,
    /// The kind of event.
    pub kind: EventKind,
    /// Previous phase (for `PhaseChange`).
    pub from: Option<Phase>,
    /// Current phase (for `PhaseChange`).
    pub phase: Option<Phase>,
    /// Overall progress 0–100 (for `PhaseChange`).
    pub progress: Option<u8>,
    /// Operator reason, if one was supplied.
    pub reason: Option<String>,
    /// Rendered text (for `Broadcast`).
    pub text: Option<String>,
    /// Scheduled instant (for `Scheduled`).
    pub when: Option<SystemTime>,
}

impl Event {
    /// Creates a new event of the given kind with the current timestamp and
    /// next sequence number.
    pub fn now(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            from: None,
            phase: None,
            progress: None,
            reason: None,
            text: None,
            when: None,
        }
    }

    /// Attaches a phase transition (old phase, new phase, overall progress).
    pub fn with_transition(mut self, from: Phase, to: Phase, progress: u8) -> Self {
        self.from = Some(from);
        self.phase = Some(to);
        self.progress = Some(progress);
        self
    }

    /// Attaches the current phase.
    pub fn with_phase(mut self, phase: Phase) -> Self {
        self.phase = Some(phase);
        self
    }

    /// Attaches an operator reason.
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Attaches rendered broadcast text.
    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = Some(text.into());
        self
    }

    /// Attaches a scheduled instant.
    pub fn with_when(mut self, when: SystemTime) -> Self {
        self.when = Some(when);
        self
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut d = f.debug_struct("Event");
        d.field("seq", &self.seq).field("kind", &self.kind);
        if let (Some(from), Some(to)) = (self.from, self.phase) {
            d.field("transition", &format_args!("{from} -> {to}"));
        }
        if let Some(r) = &self.reason {
            d.field("reason", r);
        }
        d.finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_numbers_increase() {
        let a = Event::now(EventKind::PhaseChange);
        let b = Event::now(EventKind::PhaseChange);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_attach_metadata() {
        let ev = Event::now(EventKind::PhaseChange)
            .with_transition(Phase::Building, Phase::Saving, 25)
            .with_reason("nightly deploy");
        assert_eq!(ev.from, Some(Phase::Building));
        assert_eq!(ev.phase, Some(Phase::Saving));
        assert_eq!(ev.progress, Some(25));
        assert_eq!(ev.reason.as_deref(), Some("nightly deploy"));
    }
}
