//! End-to-end coordinator flows that stop short of the exec boundary:
//! scheduling and cancellation, veto refusal, mutual exclusion under
//! concurrent initiation, and the build-failure path back to rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use async_trait::async_trait;
use copyvisor::{
    Collaborators, Config, ConnectionManager, Coordinator, CopyoverError, EventKind, GameWorld,
    GatherOutcome, InitiateOptions, JsonUserStore, Phase, PlainRenderer, Subsystem,
    SubsystemError, SubsystemRegistry, Veto, WorldEntry,
};

struct RecordingEntry {
    entries: Mutex<Vec<(i64, i64)>>,
}

impl WorldEntry for RecordingEntry {
    fn enter(&self, user_id: i64, room_id: i64) {
        self.entries.lock().unwrap().push((user_id, room_id));
    }
}

struct CleanupProbe {
    cleaned: AtomicBool,
    veto: Option<Veto>,
}

#[async_trait]
impl Subsystem for CleanupProbe {
    fn name(&self) -> &'static str {
        "probe"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        Ok(GatherOutcome::Nothing)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
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

struct Fixture {
    coordinator: Arc<Coordinator>,
    _dir: tempfile::TempDir,
}

fn fixture(registry: Arc<SubsystemRegistry>, mutate_cfg: impl FnOnce(&mut Config)) -> Fixture {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let dir = tempfile::tempdir().unwrap();
    let mut cfg = Config::with_data_dir(dir.path());
    // Tests never invoke a real toolchain unless they mean to.
    cfg.build_command = "true".to_string();
    cfg.build_args = Vec::new();
    mutate_cfg(&mut cfg);

    let coordinator = Coordinator::new(
        cfg,
        Arc::new(GameWorld::new()),
        Arc::new(ConnectionManager::new()),
        registry,
        Collaborators {
            users: Arc::new(JsonUserStore::new(dir.path())),
            renderer: Arc::new(PlainRenderer::with_defaults()),
            world_entry: Arc::new(RecordingEntry {
                entries: Mutex::new(Vec::new()),
            }),
        },
        Vec::new(),
    );
    Fixture {
        coordinator,
        _dir: dir,
    }
}

async fn wait_for_phase(coordinator: &Arc<Coordinator>, phase: Phase) {
    for _ in 0..200 {
        if coordinator.status().phase == phase {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!(
        "never reached {phase}, stuck in {}",
        coordinator.status().phase
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn scheduled_copyover_cancels_back_to_idle() {
    let probe = Arc::new(CleanupProbe {
        cleaned: AtomicBool::new(false),
        veto: None,
    });
    let registry = Arc::new(SubsystemRegistry::new());
    registry.register(probe.clone()).unwrap();
    let fx = fixture(registry, |_| {});

    let mut events = fx.coordinator.bus().subscribe();

    let when = SystemTime::now() + Duration::from_secs(60);
    fx.coordinator.schedule(when, "op", "maintenance").unwrap();
    assert!(fx.coordinator.is_in_progress());

    // Give the countdown worker a moment to start announcing.
    tokio::time::sleep(Duration::from_millis(50)).await;

    fx.coordinator.cancel("test").await.unwrap();
    wait_for_phase(&fx.coordinator, Phase::Idle).await;
    assert!(!fx.coordinator.is_in_progress());
    assert!(probe.cleaned.load(Ordering::SeqCst), "cleanup fan-out ran");

    // The event stream carries the schedule, the cancellation, and a
    // broadcast containing the literal reason.
    let mut saw_scheduled = false;
    let mut saw_cancelled = false;
    let mut saw_reason_broadcast = false;
    while let Ok(ev) = events.try_recv() {
        match ev.kind {
            EventKind::Scheduled => saw_scheduled = true,
            EventKind::Cancelled => {
                saw_cancelled = true;
                assert_eq!(ev.reason.as_deref(), Some("test"));
            }
            EventKind::Broadcast => {
                if ev.text.as_deref().is_some_and(|t| t.contains("test")) {
                    saw_reason_broadcast = true;
                }
            }
            _ => {}
        }
    }
    assert!(saw_scheduled);
    assert!(saw_cancelled);
    assert!(saw_reason_broadcast);
}

#[tokio::test(flavor = "multi_thread")]
async fn hard_veto_refuses_initiation_without_side_effects() {
    let registry = Arc::new(SubsystemRegistry::new());
    registry
        .register(Arc::new(CleanupProbe {
            cleaned: AtomicBool::new(false),
            veto: Some(Veto::hard("battle ending in 20s")),
        }))
        .unwrap();
    let fx = fixture(registry, |_| {});

    let err = fx
        .coordinator
        .initiate(InitiateOptions::default())
        .unwrap_err();
    match err {
        CopyoverError::Vetoed { subsystem, reason } => {
            assert_eq!(subsystem, "probe");
            assert_eq!(reason, "battle ending in 20s");
        }
        other => panic!("expected veto, got {other}"),
    }
    assert_eq!(fx.coordinator.status().phase, Phase::Idle);
    assert!(!fx.coordinator.is_in_progress());
    assert!(fx.coordinator.history(0).is_empty());
}

#[tokio::test(flavor = "multi_thread")]
async fn only_one_copyover_may_be_active() {
    let fx = fixture(Arc::new(SubsystemRegistry::new()), |_| {});

    fx.coordinator
        .initiate(InitiateOptions {
            countdown: 60,
            build: false,
            reason: String::new(),
            initiated_by: "first".to_string(),
        })
        .unwrap();

    // A second initiate, and a schedule, both bounce.
    assert!(matches!(
        fx.coordinator.initiate(InitiateOptions::default()),
        Err(CopyoverError::AlreadyInProgress { .. })
    ));
    assert!(matches!(
        fx.coordinator
            .schedule(SystemTime::now() + Duration::from_secs(120), "second", ""),
        Err(CopyoverError::AlreadyInProgress { .. })
    ));

    fx.coordinator.cancel("making room").await.unwrap();
    wait_for_phase(&fx.coordinator, Phase::Idle).await;

    // The slot is free again.
    fx.coordinator
        .initiate(InitiateOptions {
            countdown: 60,
            build: false,
            reason: String::new(),
            initiated_by: "third".to_string(),
        })
        .unwrap();
    fx.coordinator.cancel("done").await.unwrap();
    wait_for_phase(&fx.coordinator, Phase::Idle).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn schedule_rejects_past_instants() {
    let fx = fixture(Arc::new(SubsystemRegistry::new()), |_| {});
    let err = fx
        .coordinator
        .schedule(SystemTime::now() - Duration::from_secs(30), "op", "late")
        .unwrap_err();
    assert!(matches!(err, CopyoverError::ScheduleInPast { .. }));
    assert_eq!(fx.coordinator.status().phase, Phase::Idle);
}

#[tokio::test(flavor = "multi_thread")]
async fn countdown_above_cap_is_refused() {
    let fx = fixture(Arc::new(SubsystemRegistry::new()), |_| {});
    let err = fx
        .coordinator
        .initiate(InitiateOptions {
            countdown: 301,
            ..Default::default()
        })
        .unwrap_err();
    assert!(matches!(
        err,
        CopyoverError::CountdownTooLong {
            requested: 301,
            max: 300
        }
    ));
}

#[tokio::test(flavor = "multi_thread")]
async fn build_failure_returns_to_rest_with_history() {
    let fx = fixture(Arc::new(SubsystemRegistry::new()), |cfg| {
        cfg.build_command = "false".to_string();
    });

    fx.coordinator
        .initiate(InitiateOptions {
            countdown: 0,
            build: true,
            reason: "nightly".to_string(),
            initiated_by: "cron".to_string(),
        })
        .unwrap();

    // The worker records the failure before returning to rest.
    for _ in 0..200 {
        if !fx.coordinator.history(0).is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    wait_for_phase(&fx.coordinator, Phase::Idle).await;

    let history = fx.coordinator.history(0);
    assert_eq!(history.len(), 1);
    assert!(!history[0].success);
    assert_eq!(history[0].initiated_by, "cron");
    assert!(history[0].error.as_deref().unwrap_or("").contains("build"));
    assert!(fx.coordinator.status().last_error.is_some());

    // The engine is usable again after the failure.
    fx.coordinator
        .initiate(InitiateOptions {
            countdown: 60,
            build: false,
            ..Default::default()
        })
        .unwrap();
    fx.coordinator.cancel("enough").await.unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn operator_verbs_round_trip_through_dispatch() {
    use copyvisor::ops::{dispatch, OperatorCommand};

    let registry = Arc::new(SubsystemRegistry::new());
    registry
        .register(Arc::new(CleanupProbe {
            cleaned: AtomicBool::new(false),
            veto: Some(Veto::soft("auction ending in 90s")),
        }))
        .unwrap();
    let fx = fixture(registry, |_| {});
    let cfg = Config::default();

    let reply = dispatch(&fx.coordinator, &cfg, OperatorCommand::Status, "op").await;
    assert!(reply.contains("Phase: idle"), "status was: {reply}");

    let reply = dispatch(&fx.coordinator, &cfg, OperatorCommand::Test, "op").await;
    assert!(reply.contains("soft veto from probe: auction ending in 90s"));
    assert!(reply.contains("ready"));

    let reply = dispatch(&fx.coordinator, &cfg, OperatorCommand::Cancel, "op").await;
    assert_eq!(reply, "No copyover in progress.");
}

#[tokio::test(flavor = "multi_thread")]
async fn cancel_with_nothing_pending_is_refused() {
    let fx = fixture(Arc::new(SubsystemRegistry::new()), |_| {});
    let err = fx.coordinator.cancel("nothing there").await.unwrap_err();
    assert!(matches!(
        err,
        CopyoverError::CancelRefused { phase: Phase::Idle }
    ));
}
