//! # Status, veto, and history record types.
//!
//! [`Status`] is the read-only view the operator surface renders: current
//! phase, derived overall progress, scheduling info, active vetoes, and
//! running totals. [`HistoryRecord`] is one completed (or failed) copyover
//! in the bounded history ring.

use std::time::{Duration, SystemTime};

use crate::phase::Phase;

/// Severity of a subsystem veto.
///
/// A hard veto blocks initiation regardless of operator privilege; soft
/// vetoes only warn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VetoSeverity {
    /// Warn the operator but allow the copyover.
    Soft,
    /// Block the copyover.
    Hard,
}

impl VetoSeverity {
    /// Stable lowercase name.
    pub fn as_str(self) -> &'static str {
        match self {
            VetoSeverity::Soft => "soft",
            VetoSeverity::Hard => "hard",
        }
    }
}

/// A subsystem's vote against initiating copyover right now.
#[derive(Debug, Clone)]
pub struct VetoRecord {
    /// Name of the vetoing subsystem.
    pub subsystem: &'static str,
    /// Human-readable reason, shown verbatim to the operator.
    pub reason: String,
    /// Whether the veto blocks or merely warns.
    pub severity: VetoSeverity,
    /// When the veto was collected.
    pub at: SystemTime,
}

/// One completed copyover in the history ring.
#[derive(Debug, Clone)]
pub struct HistoryRecord {
    /// Monotonic record id, starting at 1.
    pub id: u64,
    /// When the sequence started (predecessor side).
    pub started_at: SystemTime,
    /// When recovery completed (successor side), or when the failure was
    /// recorded.
    pub completed_at: SystemTime,
    /// Wall-clock duration of the whole sequence.
    pub duration: Duration,
    /// Whether the copyover completed.
    pub success: bool,
    /// Operator (or automation) that initiated it.
    pub initiated_by: String,
    /// The reason supplied at initiation.
    pub reason: String,
    /// Build identifier of the successor.
    pub build: String,
    /// Build identifier of the replaced process.
    pub old_build: String,
    /// Connections carried across the exec.
    pub connections_saved: u32,
    /// Connections dropped (non-inheritable transports, wrap failures).
    pub connections_lost: u32,
    /// Error text for failed copyovers.
    pub error: Option<String>,
}

/// Per-stage progress counters, each 0–100.
#[derive(Debug, Clone, Copy, Default)]
pub struct StageProgress {
    /// Build step progress.
    pub build: u8,
    /// User-save step progress.
    pub save: u8,
    /// Gather fan-out progress.
    pub gather: u8,
    /// Restore fan-out progress (successor side).
    pub restore: u8,
}

/// Read-only view of the copyover system.
#[derive(Debug, Clone)]
pub struct Status {
    /// Current phase.
    pub phase: Phase,
    /// When the phase last changed.
    pub changed_at: SystemTime,
    /// Scheduled instant, while `Scheduled`.
    pub scheduled_for: Option<SystemTime>,
    /// Who initiated the in-flight or scheduled copyover.
    pub initiated_by: Option<String>,
    /// The reason supplied at initiation.
    pub reason: Option<String>,
    /// Per-stage progress counters.
    pub stages: StageProgress,
    /// Vetoes collected at the last readiness check.
    pub vetoes: Vec<VetoRecord>,
    /// Most recent error, if any.
    pub last_error: Option<String>,
    /// Total copyovers recorded since process start.
    pub total_copyovers: u64,
    /// Average duration across recorded copyovers.
    pub average_duration: Duration,
}

impl Status {
    /// Derived overall progress, 0–100.
    ///
    /// Bands: Building 0–25, Saving 25–50, Gathering 50–75, Executing fixed
    /// 75, Recovering 75–100. Resting and preliminary phases report zero.
    pub fn overall_progress(&self) -> u8 {
        match self.phase {
            Phase::Building => self.stages.build / 4,
            Phase::Saving => 25 + self.stages.save / 4,
            Phase::Gathering => 50 + self.stages.gather / 4,
            Phase::Executing => 75,
            Phase::Recovering => 75 + self.stages.restore / 4,
            _ => 0,
        }
    }

    /// Time remaining until the scheduled instant, zero when not scheduled
    /// or already due.
    pub fn time_until_scheduled(&self) -> Duration {
        if self.phase != Phase::Scheduled {
            return Duration::ZERO;
        }
        match self.scheduled_for {
            Some(when) => when
                .duration_since(SystemTime::now())
                .unwrap_or(Duration::ZERO),
            None => Duration::ZERO,
        }
    }

    /// Whether an operator may initiate a copyover right now, with the
    /// blocking reasons when not.
    pub fn can_copyover(&self) -> (bool, Vec<String>) {
        let mut reasons = Vec::new();
        if self.phase.is_active() {
            reasons.push(format!("copyover already in progress (phase: {})", self.phase));
        }
        for veto in &self.vetoes {
            if veto.severity == VetoSeverity::Hard {
                reasons.push(format!("{}: {}", veto.subsystem, veto.reason));
            }
        }
        (reasons.is_empty(), reasons)
    }
}
