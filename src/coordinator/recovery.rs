//! # Child-side recovery.
//!
//! The successor detects an inherited run, reads the snapshot, wraps the
//! inherited descriptors back into listeners and connections, fans restore
//! out to the subsystems, and re-seats every user into the world. The
//! whole path is biased toward partial success: a missing user, a bad
//! descriptor, or one failed restorer drops that entity and continues —
//! recovery never aborts the server.
//!
//! ## Startup decision
//! Two signals are inspected: the inheritance environment marker and the
//! presence of the snapshot file. Marker set → recover. Marker absent with
//! a file present → the file is a stale artifact from a dead run; it is
//! removed and the server boots cold.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use crate::config::{Config, RECOVERY_ENV_VAR};
use crate::conn::Connection;
use crate::coordinator::build;
use crate::coordinator::core::Coordinator;
use crate::error::CopyoverError;
use crate::events::{Event, EventKind};
use crate::fdpass;
use crate::hooks::TemplateVars;
use crate::phase::{HistoryRecord, Phase, Stage};
use crate::snapshot::{self, Snapshot, FD_NOT_INHERITED};

/// How the process should start.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Plain start; no snapshot anywhere.
    Cold,
    /// Inherited run: the snapshot drives recovery.
    Recover,
    /// A snapshot existed without the marker; it was removed. Boot cold.
    StaleCleaned,
}

/// Inspects the two recovery signals and removes stale artifacts.
///
/// Call once, early in startup, before any listener is bound.
pub fn detect_startup(cfg: &Config) -> StartupMode {
    let marker = std::env::var(RECOVERY_ENV_VAR).map(|v| v == "1").unwrap_or(false);
    let file = cfg.snapshot_path().exists();

    match (marker, file) {
        (true, _) => StartupMode::Recover,
        (false, true) => {
            snapshot::clean_stale(cfg);
            StartupMode::StaleCleaned
        }
        (false, false) => StartupMode::Cold,
    }
}

/// What recovery reconstructed, handed back to the embedding server.
pub struct Recovered {
    /// Rehydrated listeners by name, ready for accept loops.
    pub listeners: BTreeMap<String, std::net::TcpListener>,
    /// Connections re-seated with their users.
    pub connections: Vec<Arc<Connection>>,
    /// Count of connections carried across the exec.
    pub connections_saved: u32,
    /// Count dropped (sentinel transports, wrap failures, missing users).
    pub connections_lost: u32,
}

/// Runs the full recovery sequence.
///
/// Returns an error only when the snapshot is unreadable (the caller boots
/// cold); every per-entity failure inside is logged and skipped.
pub async fn recover(coordinator: &Arc<Coordinator>, cfg: &Config) -> Result<Recovered, CopyoverError> {
    tracing::info!("copyover recovery starting");
    let machine = Arc::clone(coordinator.machine());
    let world_lock = coordinator.world_lock().clone();

    // No command processes until the world is whole again.
    let lock_guard = world_lock.freeze().await;
    machine.transition(Phase::Recovering)?;

    let path = cfg.snapshot_path();
    let snap = match snapshot::read_snapshot(&path) {
        Ok(snap) => snap,
        Err(err) => {
            // Malformed snapshot: delete, log, boot cold.
            tracing::error!(error = %err, "snapshot unreadable; booting cold");
            let _ = std::fs::remove_file(&path);
            machine.force(Phase::Failed);
            machine.force(Phase::Idle);
            return Err(CopyoverError::SnapshotIo(err));
        }
    };
    // Consumed: remove immediately so a crash mid-recovery cannot loop.
    if let Err(err) = std::fs::remove_file(&path) {
        tracing::warn!(error = %err, "could not remove consumed snapshot");
    }

    for (key, value) in &snap.environment {
        std::env::set_var(key, value);
    }

    let mut recovered = Recovered {
        listeners: BTreeMap::new(),
        connections: Vec::new(),
        connections_saved: 0,
        connections_lost: 0,
    };

    restore_listeners(&snap, &mut recovered);
    restore_connections(coordinator, &snap, &mut recovered).await;

    // Subsystem fan-out, registration order; each restorer consumes its
    // own blob.
    coordinator.bus().publish(Event::now(EventKind::RestoreState));
    machine.set_progress(Stage::Restore, 10);
    let _ = coordinator.registry().restore_all().await;
    machine.set_progress(Stage::Restore, 80);

    reseat_users(coordinator, cfg);

    drop(lock_guard);

    finish(coordinator, &snap, &recovered);
    machine.set_progress(Stage::Restore, 100);
    machine.transition(Phase::Idle)?;
    coordinator.bus().publish(Event::now(EventKind::Completed));
    tracing::info!(
        saved = recovered.connections_saved,
        lost = recovered.connections_lost,
        "copyover recovery complete"
    );
    Ok(recovered)
}

/// Wraps each listener descriptor back into a bound listener, walking the
/// dense index sequence. Mismatched or broken entries are skipped.
fn restore_listeners(snap: &Snapshot, recovered: &mut Recovered) {
    let mut expected = snapshot::FIRST_INHERITED_FD;

    // Sorted-name order, the order the indices were assigned.
    for (name, record) in &snap.listeners {
        if record.fd != expected {
            tracing::error!(
                listener = %name,
                expected,
                got = record.fd,
                "listener fd mismatch; skipping"
            );
            expected += 1;
            continue;
        }

        match unsafe { fdpass::listener_from_index(record.fd) } {
            Ok(listener) => {
                match listener.local_addr() {
                    Ok(addr) if addr.to_string() != record.address => {
                        tracing::warn!(
                            listener = %name,
                            recorded = %record.address,
                            actual = %addr,
                            "listener address changed across exec"
                        );
                    }
                    Err(err) => {
                        tracing::warn!(listener = %name, error = %err, "cannot stat listener");
                    }
                    _ => {}
                }
                tracing::info!(listener = %name, fd = record.fd, address = %record.address, "listener recovered");
                recovered.listeners.insert(name.clone(), listener);
            }
            Err(err) => {
                // The wrap consumed and closed the descriptor.
                tracing::error!(listener = %name, fd = record.fd, error = %err, "listener wrap failed");
            }
        }
        expected += 1;
    }
}

/// Wraps each connection descriptor, re-binds its user (loading from the
/// store when not resident), attaches the standard handler chain, and
/// marks everything recovering.
async fn restore_connections(
    coordinator: &Arc<Coordinator>,
    snap: &Snapshot,
    recovered: &mut Recovered,
) {
    let mut expected = snapshot::FIRST_INHERITED_FD + snap.listeners.len() as i32;

    for record in &snap.connections {
        if record.fd == FD_NOT_INHERITED {
            // Dropped before exec; the peer was told to reconnect.
            tracing::info!(user = record.user_id, "non-inheritable transport; user must reconnect");
            recovered.connections_lost += 1;
            continue;
        }
        if record.fd != expected {
            tracing::error!(
                conn = record.connection_id,
                expected,
                got = record.fd,
                "connection fd mismatch; skipping"
            );
            expected += 1;
            recovered.connections_lost += 1;
            continue;
        }
        expected += 1;

        let stream = match unsafe { fdpass::stream_from_index(record.fd) } {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(conn = record.connection_id, fd = record.fd, error = %err, "connection wrap failed");
                recovered.connections_lost += 1;
                continue;
            }
        };

        // Make sure the user exists before seating the connection.
        if coordinator.world().user(record.user_id).is_none() {
            match coordinator.users().load(record.user_id).await {
                Ok(mut user) => {
                    user.recovering = true;
                    tracing::info!(user = record.user_id, username = %user.username, "user loaded from store");
                    coordinator.world().add_user(user);
                }
                Err(err) => {
                    tracing::error!(user = record.user_id, error = %err, "user not recoverable; dropping connection");
                    let conn = coordinator.conns().add_with_id(
                        record.connection_id,
                        record.transport,
                        Some(stream),
                        record.remote_addr.clone(),
                    );
                    conn.send_raw(b"\r\n=== Your character could not be restored. Please reconnect. ===\r\n");
                    coordinator.conns().remove(record.connection_id);
                    recovered.connections_lost += 1;
                    continue;
                }
            }
        } else {
            coordinator
                .world()
                .update_user(record.user_id, |u| u.recovering = true);
        }

        let conn = coordinator.conns().add_with_id(
            record.connection_id,
            record.transport,
            Some(stream),
            record.remote_addr.clone(),
        );
        coordinator.conns().attach_login_handlers(&conn);
        conn.bind_user(record.user_id);
        conn.set_recovering(true);

        tracing::info!(
            conn = record.connection_id,
            user = record.user_id,
            addr = %record.remote_addr,
            "connection recovered"
        );
        recovered.connections_saved += 1;
        recovered.connections.push(conn);
    }
}

/// Re-seats every resident user into the room their record reports,
/// falling back to the configured safe room.
fn reseat_users(coordinator: &Arc<Coordinator>, cfg: &Config) {
    for user_id in coordinator.world().resident_user_ids() {
        let Some(user) = coordinator.world().user(user_id) else {
            continue;
        };
        let room_id = if user.room_id > 0 {
            user.room_id
        } else {
            tracing::warn!(user = user_id, "user had no room; seating in fallback");
            cfg.fallback_room
        };
        coordinator.world_entry().enter(user_id, room_id);
        coordinator.world().update_user(user_id, |u| u.recovering = false);
    }
}

/// Post-recovery notices and the completed history record.
fn finish(coordinator: &Arc<Coordinator>, snap: &Snapshot, recovered: &Recovered) {
    let elapsed = snap
        .start_time
        .elapsed()
        .unwrap_or(Duration::ZERO);
    let vars = TemplateVars {
        build: Some(build::build_number()),
        duration: Some(format!("{}ms", elapsed.as_millis())),
        ..Default::default()
    };

    for conn in &recovered.connections {
        match coordinator.renderer().render("copyover-post", &vars) {
            Ok(text) => {
                conn.send_raw(format!("\r\n{text}\r\n").as_bytes());
            }
            Err(err) => {
                tracing::warn!(error = %err, "post-copyover template failed");
                conn.send_raw(
                    format!("\r\n=== COPYOVER COMPLETE (build {}) ===\r\n", build::build_number())
                        .as_bytes(),
                );
            }
        }
        conn.set_recovering(false);
    }

    coordinator.machine().record(HistoryRecord {
        id: 0,
        started_at: snap.start_time,
        completed_at: SystemTime::now(),
        duration: elapsed,
        success: true,
        initiated_by: snap.initiated_by.clone(),
        reason: snap.reason.clone(),
        build: build::build_number(),
        old_build: snap.old_build.clone(),
        connections_saved: recovered.connections_saved,
        connections_lost: recovered.connections_lost,
        error: None,
    });
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::conn::ConnectionManager;
    use crate::coordinator::core::Collaborators;
    use crate::events::EventKind;
    use crate::hooks::{JsonUserStore, PlainRenderer, WorldEntry};
    use crate::registry::SubsystemRegistry;
    use crate::world::{GameWorld, UserRecord};

    struct RecordingEntry {
        seated: Mutex<Vec<(i64, i64)>>,
    }

    impl WorldEntry for RecordingEntry {
        fn enter(&self, user_id: i64, room_id: i64) {
            self.seated.lock().unwrap().push((user_id, room_id));
        }
    }

    #[tokio::test]
    async fn recovery_consumes_snapshot_and_reseats_users() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());

        let entry = Arc::new(RecordingEntry {
            seated: Mutex::new(Vec::new()),
        });
        let world = Arc::new(GameWorld::new());
        world.add_user(UserRecord::new(7, "kit", 100));

        let coordinator = Coordinator::new(
            cfg.clone(),
            Arc::clone(&world),
            Arc::new(ConnectionManager::new()),
            Arc::new(SubsystemRegistry::new()),
            Collaborators {
                users: Arc::new(JsonUserStore::new(dir.path())),
                renderer: Arc::new(PlainRenderer::with_defaults()),
                world_entry: entry.clone(),
            },
            Vec::new(),
        );
        let mut events = coordinator.bus().subscribe();

        let mut snap = Snapshot::new(SystemTime::now() - Duration::from_millis(250));
        snap.initiated_by = "op".to_string();
        snap.reason = "nightly".to_string();
        snap.old_build = "prev-build".to_string();
        snap.environment
            .insert("COPYVISOR_TEST_CARRIED".to_string(), "1".to_string());
        snapshot::write_atomic(&cfg.snapshot_path(), &snap).unwrap();

        let recovered = recover(&coordinator, &cfg).await.unwrap();

        assert!(!cfg.snapshot_path().exists(), "snapshot is consumed");
        assert_eq!(recovered.connections_saved, 0);
        assert_eq!(std::env::var("COPYVISOR_TEST_CARRIED").as_deref(), Ok("1"));
        std::env::remove_var("COPYVISOR_TEST_CARRIED");

        // The resident user went back into their room.
        assert_eq!(*entry.seated.lock().unwrap(), vec![(7, 100)]);
        assert!(!world.user(7).unwrap().recovering);

        let history = coordinator.history(0);
        assert_eq!(history.len(), 1);
        assert!(history[0].success);
        assert_eq!(history[0].initiated_by, "op");
        assert_eq!(history[0].old_build, "prev-build");

        assert_eq!(coordinator.status().phase, Phase::Idle);
        let mut saw_completed = false;
        while let Ok(ev) = events.try_recv() {
            if ev.kind == EventKind::Completed {
                saw_completed = true;
            }
        }
        assert!(saw_completed);
    }

    #[tokio::test]
    async fn malformed_snapshot_falls_back_to_cold_boot() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());
        std::fs::write(cfg.snapshot_path(), b"{ not a snapshot").unwrap();

        let coordinator = Coordinator::new(
            cfg.clone(),
            Arc::new(GameWorld::new()),
            Arc::new(ConnectionManager::new()),
            Arc::new(SubsystemRegistry::new()),
            Collaborators {
                users: Arc::new(JsonUserStore::new(dir.path())),
                renderer: Arc::new(PlainRenderer::with_defaults()),
                world_entry: Arc::new(RecordingEntry {
                    seated: Mutex::new(Vec::new()),
                }),
            },
            Vec::new(),
        );

        assert!(recover(&coordinator, &cfg).await.is_err());
        // The bad file is gone and the machine is back at rest.
        assert!(!cfg.snapshot_path().exists());
        assert_eq!(coordinator.status().phase, Phase::Idle);
        assert!(!coordinator.world_lock().is_held());
    }

    #[test]
    fn startup_detection_handles_stale_files() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());

        // Nothing anywhere: cold boot.
        std::env::remove_var(RECOVERY_ENV_VAR);
        assert_eq!(detect_startup(&cfg), StartupMode::Cold);

        // Snapshot without the marker: stale, removed, cold boot.
        let snap = Snapshot::new(SystemTime::now());
        snapshot::write_atomic(&cfg.snapshot_path(), &snap).unwrap();
        assert_eq!(detect_startup(&cfg), StartupMode::StaleCleaned);
        assert!(!cfg.snapshot_path().exists());

        // Marker present: recovery, file untouched here.
        snapshot::write_atomic(&cfg.snapshot_path(), &snap).unwrap();
        std::env::set_var(RECOVERY_ENV_VAR, "1");
        assert_eq!(detect_startup(&cfg), StartupMode::Recover);
        assert!(cfg.snapshot_path().exists());
        std::env::remove_var(RECOVERY_ENV_VAR);
    }
}
