//! # PhaseMachine: the single owner of the copyover phase.
//!
//! Every state mutation is serialized by one mutex and validated against
//! the transition graph in [`Phase::can_transition_to`]. A rejected
//! transition returns an error and leaves the machine untouched; an
//! accepted one stamps `changed_at` and publishes a `PhaseChange` event
//! carrying (old phase, new phase, overall progress).
//!
//! The machine also owns:
//! - the per-stage progress counters (clamped to 0–100),
//! - scheduling metadata (`scheduled_for`, initiator, reason),
//! - the bounded history ring plus running totals and average duration.
//!
//! ## Rules
//! - Lifecycle observers see transitions in mutex order.
//! - History is returned newest-first and capped; old records fall off.
//! - `status()` returns a detached copy; mutating it does not touch the
//!   machine.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use crate::error::CopyoverError;
use crate::events::{Bus, Event, EventKind};
use crate::phase::status::StageProgress;
use crate::phase::{HistoryRecord, Phase, Status, VetoRecord};

/// Which stage a progress update applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    /// Build step (Building band).
    Build,
    /// User-save step (Saving band).
    Save,
    /// Gather fan-out (Gathering band).
    Gather,
    /// Restore fan-out (Recovering band).
    Restore,
}

struct Inner {
    phase: Phase,
    changed_at: SystemTime,
    scheduled_for: Option<SystemTime>,
    initiated_by: Option<String>,
    reason: Option<String>,
    stages: StageProgress,
    vetoes: Vec<VetoRecord>,
    last_error: Option<String>,
    history: VecDeque<HistoryRecord>,
    history_counter: u64,
    total_duration: Duration,
}

/// Owns the copyover phase; validates transitions; publishes lifecycle
/// events; tracks progress and history.
pub struct PhaseMachine {
    inner: Mutex<Inner>,
    bus: Bus,
    history_cap: usize,
}

impl PhaseMachine {
    /// Creates a machine resting in `Idle`.
    pub fn new(bus: Bus, history_cap: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                phase: Phase::Idle,
                changed_at: SystemTime::now(),
                scheduled_for: None,
                initiated_by: None,
                reason: None,
                stages: StageProgress::default(),
                vetoes: Vec::new(),
                last_error: None,
                history: VecDeque::new(),
                history_counter: 0,
                total_duration: Duration::ZERO,
            }),
            bus,
            history_cap,
        }
    }

    /// Current phase.
    pub fn phase(&self) -> Phase {
        self.inner.lock().unwrap().phase
    }

    /// True while a copyover is in progress.
    pub fn is_active(&self) -> bool {
        self.phase().is_active()
    }

    /// Requests a transition to `target`.
    ///
    /// On success the machine publishes a `PhaseChange` event and returns
    /// the previous phase. An unlisted target returns
    /// [`CopyoverError::InvalidTransition`] with no side effects.
    pub fn transition(&self, target: Phase) -> Result<Phase, CopyoverError> {
        let mut inner = self.inner.lock().unwrap();
        let from = inner.phase;
        if !from.can_transition_to(target) {
            return Err(CopyoverError::InvalidTransition { from, to: target });
        }
        inner.phase = target;
        inner.changed_at = SystemTime::now();
        if target == Phase::Idle {
            // Back at rest: scheduling metadata no longer applies.
            inner.scheduled_for = None;
            inner.stages = StageProgress::default();
        }
        let progress = overall(target, inner.stages);

        // Published under the lock: observers see transitions in mutation
        // order. `publish` never blocks.
        tracing::info!(from = from.as_str(), to = target.as_str(), "phase change");
        self.bus
            .publish(Event::now(EventKind::PhaseChange).with_transition(from, target, progress));
        Ok(from)
    }

    /// Transition that only logs on rejection, for paths where the graph
    /// already guarantees legality.
    pub fn force(&self, target: Phase) {
        if let Err(err) = self.transition(target) {
            tracing::error!(error = %err, "unexpected transition rejection");
        }
    }

    /// Updates a stage's progress, clamped to 0–100.
    pub fn set_progress(&self, stage: Stage, pct: i32) {
        let pct = pct.clamp(0, 100) as u8;
        let mut inner = self.inner.lock().unwrap();
        match stage {
            Stage::Build => inner.stages.build = pct,
            Stage::Save => inner.stages.save = pct,
            Stage::Gather => inner.stages.gather = pct,
            Stage::Restore => inner.stages.restore = pct,
        }
    }

    /// Records scheduling metadata when entering the scheduled/announcing
    /// path.
    pub fn set_schedule(&self, when: Option<SystemTime>, by: &str, reason: &str) {
        let mut inner = self.inner.lock().unwrap();
        inner.scheduled_for = when;
        inner.initiated_by = Some(by.to_string());
        inner.reason = Some(reason.to_string());
    }

    /// Replaces the collected veto set shown in status.
    pub fn set_vetoes(&self, vetoes: Vec<VetoRecord>) {
        self.inner.lock().unwrap().vetoes = vetoes;
    }

    /// Records the most recent error for the status surface.
    pub fn set_error(&self, error: impl Into<String>) {
        self.inner.lock().unwrap().last_error = Some(error.into());
    }

    /// Returns a detached copy of the current status.
    pub fn status(&self) -> Status {
        let inner = self.inner.lock().unwrap();
        Status {
            phase: inner.phase,
            changed_at: inner.changed_at,
            scheduled_for: inner.scheduled_for,
            initiated_by: inner.initiated_by.clone(),
            reason: inner.reason.clone(),
            stages: inner.stages,
            vetoes: inner.vetoes.clone(),
            last_error: inner.last_error.clone(),
            total_copyovers: inner.history_counter,
            average_duration: if inner.history_counter == 0 {
                Duration::ZERO
            } else {
                inner.total_duration / inner.history_counter as u32
            },
        }
    }

    /// Appends a history record, assigning its id and trimming the ring.
    pub fn record(&self, mut rec: HistoryRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.history_counter += 1;
        rec.id = inner.history_counter;
        inner.total_duration += rec.duration;
        inner.history.push_back(rec);
        while inner.history.len() > self.history_cap {
            inner.history.pop_front();
        }
    }

    /// Returns up to `limit` history records, newest first. Zero means all
    /// retained records.
    pub fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        let inner = self.inner.lock().unwrap();
        let iter = inner.history.iter().rev().cloned();
        if limit == 0 {
            iter.collect()
        } else {
            iter.take(limit).collect()
        }
    }
}

/// Overall progress for a phase given the stage counters. Mirrors
/// [`Status::overall_progress`]; kept here so transition events can carry
/// it without building a full status copy.
fn overall(phase: Phase, stages: StageProgress) -> u8 {
    match phase {
        Phase::Building => stages.build / 4,
        Phase::Saving => 25 + stages.save / 4,
        Phase::Gathering => 50 + stages.gather / 4,
        Phase::Executing => 75,
        Phase::Recovering => 75 + stages.restore / 4,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn machine() -> PhaseMachine {
        PhaseMachine::new(Bus::new(64), 100)
    }

    #[test]
    fn rejected_transition_leaves_state_unchanged() {
        let m = machine();
        let err = m.transition(Phase::Executing).unwrap_err();
        assert!(matches!(err, CopyoverError::InvalidTransition { .. }));
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[tokio::test]
    async fn accepted_transition_publishes_phase_change() {
        let bus = Bus::new(64);
        let mut rx = bus.subscribe();
        let m = PhaseMachine::new(bus, 100);

        m.transition(Phase::Building).unwrap();
        let ev = rx.recv().await.unwrap();
        assert_eq!(ev.kind, EventKind::PhaseChange);
        assert_eq!(ev.from, Some(Phase::Idle));
        assert_eq!(ev.phase, Some(Phase::Building));
        assert_eq!(ev.progress, Some(0));
    }

    #[test]
    fn progress_is_clamped() {
        let m = machine();
        m.set_progress(Stage::Build, 150);
        assert_eq!(m.status().stages.build, 100);
        m.set_progress(Stage::Build, -50);
        assert_eq!(m.status().stages.build, 0);
    }

    #[test]
    fn status_is_a_detached_copy() {
        let m = machine();
        let mut st = m.status();
        st.phase = Phase::Building;
        assert_eq!(m.phase(), Phase::Idle);
    }

    #[test]
    fn history_assigns_ids_and_averages() {
        let m = machine();
        for i in 0..5u64 {
            m.record(HistoryRecord {
                id: 0,
                started_at: SystemTime::now(),
                completed_at: SystemTime::now(),
                duration: Duration::from_secs(5),
                success: i % 2 == 0,
                initiated_by: "op".into(),
                reason: String::new(),
                build: "b2".into(),
                old_build: "b1".into(),
                connections_saved: 2,
                connections_lost: 0,
                error: None,
            });
        }
        let hist = m.history(0);
        assert_eq!(hist.len(), 5);
        // Newest first, ids assigned in insertion order.
        assert_eq!(hist[0].id, 5);
        assert_eq!(hist[4].id, 1);

        let limited = m.history(2);
        assert_eq!(limited.len(), 2);
        assert_eq!(limited[0].id, 5);

        let st = m.status();
        assert_eq!(st.total_copyovers, 5);
        assert_eq!(st.average_duration, Duration::from_secs(5));
    }

    #[test]
    fn history_ring_is_bounded() {
        let m = PhaseMachine::new(Bus::new(4), 3);
        for _ in 0..10 {
            m.record(HistoryRecord {
                id: 0,
                started_at: SystemTime::now(),
                completed_at: SystemTime::now(),
                duration: Duration::ZERO,
                success: true,
                initiated_by: String::new(),
                reason: String::new(),
                build: String::new(),
                old_build: String::new(),
                connections_saved: 0,
                connections_lost: 0,
                error: None,
            });
        }
        let hist = m.history(0);
        assert_eq!(hist.len(), 3);
        assert_eq!(hist[0].id, 10);
        // Counter keeps the running total even after trimming.
        assert_eq!(m.status().total_copyovers, 10);
    }

    #[test]
    fn returning_to_idle_clears_schedule_and_progress() {
        let m = machine();
        m.set_schedule(Some(SystemTime::now()), "op", "test");
        m.transition(Phase::Scheduled).unwrap();
        m.transition(Phase::Cancelling).unwrap();
        m.set_progress(Stage::Build, 80);
        m.transition(Phase::Idle).unwrap();

        let st = m.status();
        assert_eq!(st.scheduled_for, None);
        assert_eq!(st.stages.build, 0);
    }
}
