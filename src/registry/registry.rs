//! # SubsystemRegistry: name → registration map with ordered fan-out.
//!
//! ## Architecture
//! ```text
//! register(subsystem)           (process init, rejected once frozen)
//!        │
//!        ▼
//! ┌─────────────────────┐   gather_all()    → each writes its own blob
//! │ Vec<SubsystemRef>   │   restore_all()   → successor, registration order
//! │ (registration order)│   check_vetoes()  → union of VetoRecords
//! └─────────────────────┘   prepare_all()   → before the freeze
//!                           cleanup_all()   → on cancel/abort
//! ```
//!
//! ## Rules
//! - Duplicate names are rejected.
//! - Registrations freeze when the first copyover begins.
//! - Fan-out iterates a snapshot of the registration set, so registration
//!   may interleave with an in-flight sweep without deadlock.
//! - Gather/prepare/cleanup failures are logged and never abort; restore
//!   returns the first error but continues through the remaining
//!   subsystems.

use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::RwLock;
use std::time::SystemTime;

use crate::error::{CopyoverError, SubsystemError};
use crate::phase::{VetoRecord, VetoSeverity};
use crate::registry::subsystem::{GatherOutcome, Participation, SubsystemRef};

/// Result of a gather sweep, for logging and the snapshot's bookkeeping.
#[derive(Debug, Default, Clone)]
pub struct GatherSummary {
    /// Subsystems that wrote a blob.
    pub saved: Vec<&'static str>,
    /// Subsystems with nothing to save (or automatically persisted).
    pub skipped: Vec<&'static str>,
    /// Subsystems whose gather failed (logged, not fatal).
    pub failed: Vec<&'static str>,
}

/// Registry of copyover participants.
pub struct SubsystemRegistry {
    subsystems: RwLock<Vec<SubsystemRef>>,
    frozen: AtomicBool,
}

impl Default for SubsystemRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SubsystemRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            subsystems: RwLock::new(Vec::new()),
            frozen: AtomicBool::new(false),
        }
    }

    /// Registers a subsystem.
    ///
    /// Rejects duplicate names and any registration after the first
    /// copyover has begun.
    pub fn register(&self, subsystem: SubsystemRef) -> Result<(), CopyoverError> {
        if self.frozen.load(AtomicOrdering::Acquire) {
            return Err(CopyoverError::RegistryFrozen);
        }
        let mut subs = self.subsystems.write().unwrap();
        let name = subsystem.name();
        if subs.iter().any(|s| s.name() == name) {
            return Err(CopyoverError::DuplicateSubsystem { name });
        }
        subs.push(subsystem);
        Ok(())
    }

    /// Marks registrations immutable. Called when the first copyover
    /// begins; idempotent.
    pub fn freeze(&self) {
        self.frozen.store(true, AtomicOrdering::Release);
    }

    /// Names of all registered subsystems, in registration order.
    pub fn names(&self) -> Vec<&'static str> {
        self.subsystems
            .read()
            .unwrap()
            .iter()
            .map(|s| s.name())
            .collect()
    }

    /// Number of registered subsystems.
    pub fn len(&self) -> usize {
        self.subsystems.read().unwrap().len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.subsystems.read().unwrap().is_empty()
    }

    // Fan-outs iterate a detached copy so a sweep never holds the lock
    // across an await point.
    fn snapshot_set(&self) -> Vec<SubsystemRef> {
        self.subsystems.read().unwrap().clone()
    }

    /// Collects vetoes from every subsystem.
    ///
    /// Returns `(can_proceed, vetoes)`: any hard veto flips `can_proceed`
    /// to false; soft vetoes are carried for warning display only.
    pub fn check_vetoes(&self) -> (bool, Vec<VetoRecord>) {
        let mut vetoes = Vec::new();
        let mut can_proceed = true;

        for sub in self.snapshot_set() {
            if let Some(veto) = sub.can_copyover() {
                if veto.severity == VetoSeverity::Hard {
                    can_proceed = false;
                }
                vetoes.push(VetoRecord {
                    subsystem: sub.name(),
                    reason: veto.reason,
                    severity: veto.severity,
                    at: SystemTime::now(),
                });
            }
        }

        (can_proceed, vetoes)
    }

    /// Runs every copy-preserving subsystem's gather, in registration
    /// order. Failures are logged and never abort the sweep.
    pub async fn gather_all(&self) -> GatherSummary {
        let mut summary = GatherSummary::default();

        for sub in self.snapshot_set() {
            let name = sub.name();
            if sub.participation() == Participation::AutomaticallyPersisted {
                summary.skipped.push(name);
                continue;
            }
            match sub.gather().await {
                Ok(GatherOutcome::Saved) => {
                    tracing::info!(subsystem = name, "state gathered");
                    summary.saved.push(name);
                }
                Ok(GatherOutcome::Nothing) => summary.skipped.push(name),
                Err(err) => {
                    tracing::error!(subsystem = name, error = %err, "gather failed");
                    summary.failed.push(name);
                }
            }
        }

        summary
    }

    /// Runs every copy-preserving subsystem's restore, in registration
    /// order. Failures are logged; the first error is returned but the
    /// sweep continues.
    pub async fn restore_all(&self) -> Result<(), SubsystemError> {
        let mut first_error = None;

        for sub in self.snapshot_set() {
            if sub.participation() == Participation::AutomaticallyPersisted {
                continue;
            }
            let name = sub.name();
            if let Err(err) = sub.restore().await {
                tracing::error!(subsystem = name, error = %err, "restore failed");
                if first_error.is_none() {
                    first_error = Some(err);
                }
            } else {
                tracing::info!(subsystem = name, "state restored");
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Notifies every subsystem that copyover is imminent. Failures are
    /// logged; the copyover proceeds.
    pub async fn prepare_all(&self) {
        for sub in self.snapshot_set() {
            if let Err(err) = sub.prepare().await {
                tracing::error!(subsystem = sub.name(), error = %err, "prepare failed");
            }
        }
    }

    /// Notifies every subsystem that the copyover was cancelled or
    /// aborted. Failures are logged; normal operation resumes.
    pub async fn cleanup_all(&self) {
        for sub in self.snapshot_set() {
            if let Err(err) = sub.cleanup().await {
                tracing::error!(subsystem = sub.name(), error = %err, "cleanup failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;

    use super::*;
    use crate::registry::subsystem::{Subsystem, Veto};

    struct Probe {
        name: &'static str,
        veto: Option<Veto>,
        gather_fails: bool,
        restore_fails: bool,
        gathered: AtomicUsize,
        restored: AtomicUsize,
        cleaned: AtomicBool,
    }

    impl Probe {
        fn new(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                veto: None,
                gather_fails: false,
                restore_fails: false,
                gathered: AtomicUsize::new(0),
                restored: AtomicUsize::new(0),
                cleaned: AtomicBool::new(false),
            })
        }

        fn vetoing(name: &'static str, veto: Veto) -> Arc<Self> {
            let mut p = Self::new(name);
            Arc::get_mut(&mut p).unwrap().veto = Some(veto);
            p
        }

        fn failing(name: &'static str, gather: bool, restore: bool) -> Arc<Self> {
            let mut p = Self::new(name);
            let inner = Arc::get_mut(&mut p).unwrap();
            inner.gather_fails = gather;
            inner.restore_fails = restore;
            p
        }
    }

    #[async_trait]
    impl Subsystem for Probe {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
            self.gathered.fetch_add(1, Ordering::SeqCst);
            if self.gather_fails {
                return Err(SubsystemError::Other("gather boom".into()));
            }
            Ok(GatherOutcome::Saved)
        }

        async fn restore(&self) -> Result<(), SubsystemError> {
            self.restored.fetch_add(1, Ordering::SeqCst);
            if self.restore_fails {
                return Err(SubsystemError::Other("restore boom".into()));
            }
            Ok(())
        }

        fn can_copyover(&self) -> Option<Veto> {
            self.veto.clone()
        }

        async fn cleanup(&self) -> Result<(), SubsystemError> {
            self.cleaned.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn duplicate_names_are_rejected() {
        let reg = SubsystemRegistry::new();
        reg.register(Probe::new("combat")).unwrap();
        let err = reg.register(Probe::new("combat")).unwrap_err();
        assert!(matches!(
            err,
            CopyoverError::DuplicateSubsystem { name: "combat" }
        ));
        assert_eq!(reg.len(), 1);
    }

    #[test]
    fn frozen_registry_rejects_registration() {
        let reg = SubsystemRegistry::new();
        reg.register(Probe::new("combat")).unwrap();
        reg.freeze();
        let err = reg.register(Probe::new("parties")).unwrap_err();
        assert!(matches!(err, CopyoverError::RegistryFrozen));
    }

    #[test]
    fn hard_veto_blocks_soft_warns() {
        let reg = SubsystemRegistry::new();
        reg.register(Probe::new("rooms")).unwrap();
        reg.register(Probe::vetoing(
            "combat",
            Veto::hard("battle ending in 20s"),
        ))
        .unwrap();
        reg.register(Probe::vetoing("auctions", Veto::soft("auction live")))
            .unwrap();

        let (ok, vetoes) = reg.check_vetoes();
        assert!(!ok);
        assert_eq!(vetoes.len(), 2);
        let hard = vetoes
            .iter()
            .find(|v| v.severity == VetoSeverity::Hard)
            .unwrap();
        assert_eq!(hard.subsystem, "combat");
        assert_eq!(hard.reason, "battle ending in 20s");
    }

    #[test]
    fn soft_vetoes_alone_allow_copyover() {
        let reg = SubsystemRegistry::new();
        reg.register(Probe::vetoing("auctions", Veto::soft("auction live")))
            .unwrap();
        let (ok, vetoes) = reg.check_vetoes();
        assert!(ok);
        assert_eq!(vetoes.len(), 1);
    }

    #[tokio::test]
    async fn gather_failure_does_not_stop_the_sweep() {
        let reg = SubsystemRegistry::new();
        let bad = Probe::failing("economy", true, false);
        let good = Probe::new("parties");
        reg.register(bad.clone()).unwrap();
        reg.register(good.clone()).unwrap();

        let summary = reg.gather_all().await;
        assert_eq!(summary.failed, vec!["economy"]);
        assert_eq!(summary.saved, vec!["parties"]);
        assert_eq!(good.gathered.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn restore_returns_first_error_but_continues() {
        let reg = SubsystemRegistry::new();
        let bad = Probe::failing("economy", false, true);
        let good = Probe::new("parties");
        reg.register(bad.clone()).unwrap();
        reg.register(good.clone()).unwrap();

        let err = reg.restore_all().await.unwrap_err();
        assert_eq!(err.to_string(), "restore boom");
        assert_eq!(good.restored.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn auto_persisted_subsystems_skip_gather_and_restore() {
        struct AutoPersisted;
        #[async_trait]
        impl Subsystem for AutoPersisted {
            fn name(&self) -> &'static str {
                "characters"
            }
            fn participation(&self) -> Participation {
                Participation::AutomaticallyPersisted
            }
            async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
                panic!("gather must not run for automatically persisted subsystems");
            }
            async fn restore(&self) -> Result<(), SubsystemError> {
                panic!("restore must not run for automatically persisted subsystems");
            }
        }

        let reg = SubsystemRegistry::new();
        reg.register(Arc::new(AutoPersisted)).unwrap();
        let summary = reg.gather_all().await;
        assert_eq!(summary.skipped, vec!["characters"]);
        reg.restore_all().await.unwrap();
    }

    #[tokio::test]
    async fn cleanup_reaches_every_subsystem() {
        let reg = SubsystemRegistry::new();
        let a = Probe::new("combat");
        let b = Probe::new("parties");
        reg.register(a.clone()).unwrap();
        reg.register(b.clone()).unwrap();

        reg.cleanup_all().await;
        assert!(a.cleaned.load(Ordering::SeqCst));
        assert!(b.cleaned.load(Ordering::SeqCst));
    }
}
