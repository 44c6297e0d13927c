//! # Coordinator: orchestrates the copyover sequence.
//!
//! One coordinator per process. It owns the in-flight copyover: the claim
//! that only one sequence runs at a time, the cancellation token for the
//! countdown window, and the ordered FD list handed to the successor.
//!
//! ## Architecture
//! ```text
//! operator verb ──► initiate()/schedule()/cancel()   (sync validation,
//!                        │                            no side effects on
//!                        │ spawn                      refusal)
//!                        ▼
//!                  run_sequence() worker
//!                        │
//!                        ├──► build (no world lock)
//!                        ├──► countdown broadcasts   (cancellable)
//!                        ├──► prepare fan-out, then world lock ("time stops")
//!                        ├──► Saving:    persist every resident user
//!                        ├──► Gathering: subsystem blobs + snapshot + FDs
//!                        ├──► snapshot write (atomic)
//!                        └──► Executing: ShutdownListeners, drain grace,
//!                             spawn successor, child grace, exit(0)
//! ```
//!
//! ## Rules
//! - Mutual exclusion is a compare-and-swap claim, released when the
//!   machine returns to rest; a refused `initiate` has no side effects.
//! - Cancellation is honored only until `Saving` begins; after that the
//!   sequence runs to exec or failure.
//! - Every failure path releases the world lock and the duplicated FDs,
//!   records a failed history entry, and returns the machine to rest. The
//!   snapshot file is retained on exec failure for operator triage.

use std::collections::BTreeMap;
use std::os::fd::{AsRawFd, BorrowedFd, RawFd};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use tokio_util::sync::CancellationToken;

use crate::config::Config;
use crate::conn::ConnectionManager;
use crate::coordinator::{build, countdown};
use crate::error::CopyoverError;
use crate::events::{Bus, Event, EventKind};
use crate::fdpass::{self, InheritedFds, SuccessorSpec};
use crate::hooks::{TemplateRenderer, TemplateVars, UserStore, WorldEntry};
use crate::phase::{HistoryRecord, Phase, PhaseMachine, Stage, Status, VetoSeverity};
use crate::registry::SubsystemRegistry;
use crate::snapshot::{
    self, ConnectionRecord, GameSummary, ListenerRecord, Snapshot, Transport, FD_NOT_INHERITED,
};
use crate::subscribers::{BroadcastSubscriber, Dispatcher, LogSubscriber, Subscribe};
use crate::world::{GameWorld, RoundClock, WorldLock};

/// External collaborators the coordinator drives.
pub struct Collaborators {
    /// Durable user persistence.
    pub users: Arc<dyn UserStore>,
    /// Notice template rendering.
    pub renderer: Arc<dyn TemplateRenderer>,
    /// Post-recovery world placement.
    pub world_entry: Arc<dyn WorldEntry>,
}

/// Options for [`Coordinator::initiate`].
#[derive(Debug, Clone)]
pub struct InitiateOptions {
    /// Countdown seconds; zero means the configured default.
    pub countdown: u32,
    /// Whether to run the build step first.
    pub build: bool,
    /// Reason shown in announcements and history.
    pub reason: String,
    /// Operator (or automation) name for history.
    pub initiated_by: String,
}

impl Default for InitiateOptions {
    fn default() -> Self {
        Self {
            countdown: 0,
            build: true,
            reason: String::new(),
            initiated_by: "system".to_string(),
        }
    }
}

/// A registered accept socket.
///
/// Holds the raw descriptor only; the listener object itself stays with
/// the accept loop, which must keep it open for the life of the process.
struct ListenerHandle {
    transport: Transport,
    address: String,
    fd: RawFd,
}

/// Orchestrates countdown, build, quiesce, snapshot, and exec.
pub struct Coordinator {
    cfg: Config,
    bus: Bus,
    machine: Arc<PhaseMachine>,
    registry: Arc<SubsystemRegistry>,
    world: Arc<GameWorld>,
    conns: Arc<ConnectionManager>,
    world_lock: WorldLock,
    users: Arc<dyn UserStore>,
    renderer: Arc<dyn TemplateRenderer>,
    world_entry: Arc<dyn WorldEntry>,
    listeners: Mutex<BTreeMap<String, ListenerHandle>>,
    extra_files: Mutex<InheritedFds>,
    cancel_slot: Mutex<Option<CancellationToken>>,
    in_flight: AtomicBool,
}

impl Coordinator {
    /// Creates the coordinator and wires the built-in subscribers (log,
    /// connection broadcast) plus any supplied ones onto the bus. Must be
    /// called within a tokio runtime.
    pub fn new(
        cfg: Config,
        world: Arc<GameWorld>,
        conns: Arc<ConnectionManager>,
        registry: Arc<SubsystemRegistry>,
        collaborators: Collaborators,
        mut subscribers: Vec<Arc<dyn Subscribe>>,
    ) -> Arc<Self> {
        let bus = Bus::new(cfg.bus_capacity);
        let machine = Arc::new(PhaseMachine::new(bus.clone(), cfg.history_cap));

        subscribers.push(Arc::new(LogSubscriber));
        subscribers.push(Arc::new(BroadcastSubscriber::new(Arc::clone(&conns))));
        // The dispatcher handle is intentionally let go: delivery runs
        // until the bus itself is dropped.
        Dispatcher::attach(&bus, subscribers);

        Arc::new(Self {
            cfg,
            bus,
            machine,
            registry,
            world,
            conns,
            world_lock: WorldLock::new(),
            users: collaborators.users,
            renderer: collaborators.renderer,
            world_entry: collaborators.world_entry,
            listeners: Mutex::new(BTreeMap::new()),
            extra_files: Mutex::new(InheritedFds::new()),
            cancel_slot: Mutex::new(None),
            in_flight: AtomicBool::new(false),
        })
    }

    /// The lifecycle event bus.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// The world quiescence lock, shared with command dispatch and the
    /// round ticker.
    pub fn world_lock(&self) -> &WorldLock {
        &self.world_lock
    }

    /// The phase machine (read-only use outside the coordinator).
    pub(crate) fn machine(&self) -> &Arc<PhaseMachine> {
        &self.machine
    }

    /// The subsystem registry this coordinator fans out to.
    pub fn registry(&self) -> &Arc<SubsystemRegistry> {
        &self.registry
    }

    /// The shared world.
    pub fn world(&self) -> &Arc<GameWorld> {
        &self.world
    }

    /// The live connection manager.
    pub fn conns(&self) -> &Arc<ConnectionManager> {
        &self.conns
    }

    pub(crate) fn users(&self) -> &Arc<dyn UserStore> {
        &self.users
    }

    pub(crate) fn renderer(&self) -> &Arc<dyn TemplateRenderer> {
        &self.renderer
    }

    pub(crate) fn world_entry(&self) -> &Arc<dyn WorldEntry> {
        &self.world_entry
    }

    /// Registers an accept socket so its descriptor crosses the exec.
    ///
    /// The listener must stay open for the life of the process; only its
    /// raw descriptor is retained here.
    pub fn register_listener(
        &self,
        name: &str,
        transport: Transport,
        listener: &std::net::TcpListener,
    ) -> std::io::Result<()> {
        let address = listener.local_addr()?.to_string();
        self.listeners.lock().unwrap().insert(
            name.to_string(),
            ListenerHandle {
                transport,
                address,
                fd: listener.as_raw_fd(),
            },
        );
        Ok(())
    }

    /// True while a copyover sequence is active.
    pub fn is_in_progress(&self) -> bool {
        self.machine.is_active()
    }

    /// Detached status view for the operator surface.
    pub fn status(&self) -> Status {
        self.machine.status()
    }

    /// History records, newest first; zero means all retained.
    pub fn history(&self, limit: usize) -> Vec<HistoryRecord> {
        self.machine.history(limit)
    }

    // ---- Claim handling ----

    fn claim(&self) -> Result<(), CopyoverError> {
        if self
            .in_flight
            .compare_exchange(false, true, AtomicOrdering::AcqRel, AtomicOrdering::Acquire)
            .is_err()
        {
            return Err(CopyoverError::AlreadyInProgress {
                phase: self.machine.phase(),
            });
        }
        if self.machine.is_active() {
            self.in_flight.store(false, AtomicOrdering::Release);
            return Err(CopyoverError::AlreadyInProgress {
                phase: self.machine.phase(),
            });
        }
        Ok(())
    }

    fn release_claim(&self) {
        self.in_flight.store(false, AtomicOrdering::Release);
        *self.cancel_slot.lock().unwrap() = None;
    }

    fn check_vetoes(&self) -> Result<(), CopyoverError> {
        let (can_proceed, vetoes) = self.registry.check_vetoes();
        for veto in &vetoes {
            match veto.severity {
                VetoSeverity::Hard => tracing::error!(
                    subsystem = veto.subsystem,
                    reason = %veto.reason,
                    "hard veto"
                ),
                VetoSeverity::Soft => tracing::warn!(
                    subsystem = veto.subsystem,
                    reason = %veto.reason,
                    "soft veto"
                ),
            }
        }
        let first_hard = vetoes
            .iter()
            .find(|v| v.severity == VetoSeverity::Hard)
            .cloned();
        self.machine.set_vetoes(vetoes);
        match (can_proceed, first_hard) {
            (true, _) => Ok(()),
            (false, Some(veto)) => Err(CopyoverError::Vetoed {
                subsystem: veto.subsystem.to_string(),
                reason: veto.reason,
            }),
            (false, None) => unreachable!("cannot block without a hard veto"),
        }
    }

    // ---- Public operations ----

    /// Starts an immediate (or counted-down) copyover.
    ///
    /// Validates synchronously — phase, countdown cap, vetoes — then spawns
    /// the sequence on a worker and returns. A refusal has no side effects.
    pub fn initiate(self: &Arc<Self>, opts: InitiateOptions) -> Result<(), CopyoverError> {
        if opts.countdown > self.cfg.max_countdown {
            return Err(CopyoverError::CountdownTooLong {
                requested: opts.countdown,
                max: self.cfg.max_countdown,
            });
        }
        self.claim()?;
        if let Err(err) = self.check_vetoes() {
            self.release_claim();
            return Err(err);
        }

        self.registry.freeze();
        self.machine
            .set_schedule(None, &opts.initiated_by, &opts.reason);
        if let Err(err) = self.machine.transition(Phase::Building) {
            self.release_claim();
            return Err(err);
        }

        let token = CancellationToken::new();
        *self.cancel_slot.lock().unwrap() = Some(token.clone());

        let me = Arc::clone(self);
        tokio::spawn(async move {
            me.run_sequence(opts, token, SystemTime::now()).await;
        });
        Ok(())
    }

    /// Schedules a copyover for an absolute future instant.
    ///
    /// Countdown announcements run for the whole wait; cancellation is
    /// accepted until the build completes.
    pub fn schedule(
        self: &Arc<Self>,
        when: SystemTime,
        initiated_by: &str,
        reason: &str,
    ) -> Result<(), CopyoverError> {
        let delay = when
            .duration_since(SystemTime::now())
            .map_err(|_| CopyoverError::ScheduleInPast { when })?;

        self.claim()?;
        if let Err(err) = self.check_vetoes() {
            self.release_claim();
            return Err(err);
        }

        self.registry.freeze();
        self.machine.set_schedule(Some(when), initiated_by, reason);
        if let Err(err) = self.machine.transition(Phase::Scheduled) {
            self.release_claim();
            return Err(err);
        }
        self.bus.publish(
            Event::now(EventKind::Scheduled)
                .with_when(when)
                .with_reason(reason),
        );

        let token = CancellationToken::new();
        *self.cancel_slot.lock().unwrap() = Some(token.clone());

        let opts = InitiateOptions {
            countdown: delay.as_secs().min(u32::MAX as u64) as u32,
            build: true,
            reason: reason.to_string(),
            initiated_by: initiated_by.to_string(),
        };
        let me = Arc::clone(self);
        tokio::spawn(async move {
            me.run_scheduled(opts, token, SystemTime::now()).await;
        });
        Ok(())
    }

    /// Cancels a scheduled or in-flight copyover.
    ///
    /// Permitted only while Scheduled, Announcing, or Building: stops the
    /// countdown worker, broadcasts the cancellation with the literal
    /// reason, runs the cleanup fan-out, and returns to rest.
    pub async fn cancel(&self, reason: &str) -> Result<(), CopyoverError> {
        let phase = self.machine.phase();
        if !phase.is_cancellable() {
            return Err(CopyoverError::CancelRefused { phase });
        }
        // The transition is the authoritative gate; a sequence that moved
        // past Building between the check and here rejects it.
        self.machine
            .transition(Phase::Cancelling)
            .map_err(|_| CopyoverError::CancelRefused {
                phase: self.machine.phase(),
            })?;

        if let Some(token) = self.cancel_slot.lock().unwrap().take() {
            token.cancel();
        }

        tracing::warn!(reason, "copyover cancelled");
        self.broadcast_template(
            "copyover-cancelled",
            &TemplateVars {
                reason: Some(reason.to_string()),
                ..Default::default()
            },
        );
        self.bus
            .publish(Event::now(EventKind::Cancelled).with_reason(reason));

        self.registry.cleanup_all().await;
        self.extra_files.lock().unwrap().release();
        self.machine.force(Phase::Idle);
        self.release_claim();
        Ok(())
    }

    // ---- Sequence internals ----

    /// Scheduled path: countdown through the wait, then the common tail.
    async fn run_scheduled(
        self: Arc<Self>,
        opts: InitiateOptions,
        token: CancellationToken,
        started: SystemTime,
    ) {
        if token.is_cancelled() {
            return;
        }
        self.announce_schedule(opts.countdown as u64, &opts.reason);
        if self.machine.transition(Phase::Announcing).is_err() {
            return; // cancelled before the countdown began
        }

        let renderer_self = Arc::clone(&self);
        let finished = countdown::run_marks(opts.countdown as u64, &token, |remaining| {
            renderer_self.announce_mark(remaining);
        })
        .await;
        if !finished || token.is_cancelled() {
            return; // cancel() already drove the state back to rest
        }

        // Re-check vetoes armed during the wait; a hard veto now aborts
        // rather than freezing a contested world.
        if self.check_vetoes().is_err() {
            self.broadcast_template("copyover-cancelled", &TemplateVars {
                reason: Some("vetoed at the scheduled instant".to_string()),
                ..Default::default()
            });
            self.bus
                .publish(Event::now(EventKind::Cancelled).with_reason("vetoed"));
            self.machine.force(Phase::Cancelling);
            self.registry.cleanup_all().await;
            self.machine.force(Phase::Idle);
            self.release_claim();
            return;
        }

        if self.machine.transition(Phase::Building).is_err() {
            return;
        }
        self.run_sequence_inner(opts, token, started, false).await;
    }

    /// Immediate path (already in Building).
    async fn run_sequence(
        self: Arc<Self>,
        opts: InitiateOptions,
        token: CancellationToken,
        started: SystemTime,
    ) {
        self.run_sequence_inner(opts, token, started, true).await;
    }

    async fn run_sequence_inner(
        self: &Arc<Self>,
        opts: InitiateOptions,
        token: CancellationToken,
        started: SystemTime,
        countdown_pending: bool,
    ) {
        // Build first, before any client-visible pause.
        if opts.build {
            self.broadcast_template("copyover-building", &TemplateVars::default());
            if let Err(err) = build::run_build(&self.cfg).await {
                self.broadcast_template("copyover-build-failed", &TemplateVars::default());
                self.fail_sequence(&opts, started, &err.to_string(), Phase::Building);
                return;
            }
            if token.is_cancelled() {
                return;
            }
        }

        // Immediate path announces after the build so the pause between
        // the last tick and the freeze stays short.
        if countdown_pending && opts.countdown > 0 {
            let me = Arc::clone(self);
            let finished = countdown::run_marks(opts.countdown as u64, &token, |remaining| {
                me.announce_mark(remaining);
            })
            .await;
            if !finished || token.is_cancelled() {
                return;
            }
        }

        self.broadcast_template("copyover-pre", &TemplateVars::default());

        // Last cancellation checkpoint; past here the sequence runs to
        // exec or failure.
        self.registry.prepare_all().await;
        if token.is_cancelled() {
            return;
        }
        *self.cancel_slot.lock().unwrap() = None;

        let lock_guard = self.world_lock.freeze().await;
        let lock_taken = std::time::Instant::now();

        // Saving: persist every resident user; per-user failures are
        // logged, never fatal.
        if self.machine.transition(Phase::Saving).is_err() {
            drop(lock_guard);
            return;
        }
        self.save_all_users().await;

        // Gathering: subsystem blobs, then the primary snapshot with FD
        // extraction.
        if self.machine.transition(Phase::Gathering).is_err() {
            drop(lock_guard);
            return;
        }
        self.bus.publish(Event::now(EventKind::GatherState));
        let summary = self.registry.gather_all().await;
        tracing::info!(
            saved = summary.saved.len(),
            skipped = summary.skipped.len(),
            failed = summary.failed.len(),
            "subsystem gather complete"
        );
        self.machine.set_progress(Stage::Gather, 50);

        let snapshot = match self.gather_snapshot(&opts, started) {
            Ok(snapshot) => snapshot,
            Err(err) => {
                drop(lock_guard);
                self.fail_sequence(&opts, started, &err.to_string(), Phase::Gathering);
                return;
            }
        };
        self.machine.set_progress(Stage::Gather, 100);

        if let Err(err) = snapshot::write_atomic(&self.cfg.snapshot_path(), &snapshot) {
            drop(lock_guard);
            self.fail_sequence(&opts, started, &err.to_string(), Phase::Gathering);
            return;
        }

        // Executing: stop the accept loops (sockets stay open), let
        // in-flight writes drain, then replace the process image.
        if self.machine.transition(Phase::Executing).is_err() {
            drop(lock_guard);
            return;
        }
        self.bus.publish(Event::now(EventKind::ShutdownListeners));
        tokio::time::sleep(self.cfg.drain_grace).await;

        if lock_taken.elapsed() > self.cfg.lock_soft_budget {
            tracing::warn!(
                held = ?lock_taken.elapsed(),
                budget = ?self.cfg.lock_soft_budget,
                "world lock held past soft budget"
            );
        }

        match self.exec_successor() {
            Ok(never) => match never {},
            Err(err) => {
                // Exec did not happen: release everything, keep the
                // snapshot file for operator triage.
                self.extra_files.lock().unwrap().release();
                drop(lock_guard);
                self.fail_sequence(&opts, started, &err.to_string(), Phase::Executing);
            }
        }
    }

    /// Persists every resident user, tracking save progress.
    async fn save_all_users(&self) {
        let ids = self.world.resident_user_ids();
        let total = ids.len().max(1);
        tracing::info!(users = ids.len(), "saving active users");

        for (done, id) in ids.into_iter().enumerate() {
            let Some(user) = self.world.user(id) else {
                continue;
            };
            if let Err(err) = self.users.save(&user).await {
                tracing::error!(user = id, username = %user.username, error = %err, "user save failed");
            }
            self.machine
                .set_progress(Stage::Save, ((done + 1) * 100 / total) as i32);
        }
        self.machine.set_progress(Stage::Save, 100);
    }

    /// Builds the primary snapshot while extracting FDs into the ordered
    /// inherited list: listeners by sorted name, then connections in
    /// gather order. Non-inheritable transports get the sentinel and a
    /// reconnect notice.
    pub(crate) fn gather_snapshot(
        &self,
        opts: &InitiateOptions,
        started: SystemTime,
    ) -> Result<Snapshot, CopyoverError> {
        let mut snapshot = Snapshot::new(started);
        snapshot.initiated_by = opts.initiated_by.clone();
        snapshot.reason = opts.reason.clone();
        snapshot.old_build = build::build_number();

        for key in &self.cfg.preserved_env {
            if let Ok(value) = std::env::var(key) {
                if !value.is_empty() {
                    snapshot.environment.insert(key.clone(), value);
                }
            }
        }

        let mut extra = self.extra_files.lock().unwrap();
        extra.release();

        {
            let listeners = self.listeners.lock().unwrap();
            for (name, handle) in listeners.iter() {
                let borrowed = unsafe { BorrowedFd::borrow_raw(handle.fd) };
                let dup = fdpass::duplicate(borrowed).map_err(|err| {
                    CopyoverError::ExecFailed {
                        reason: format!("listener '{name}' fd duplication failed: {err}"),
                    }
                })?;
                let index = extra.push(dup).map_err(|err| CopyoverError::ExecFailed {
                    reason: format!("listener '{name}' fd registration failed: {err}"),
                })?;
                snapshot.listeners.insert(
                    name.clone(),
                    ListenerRecord {
                        transport: handle.transport,
                        address: handle.address.clone(),
                        fd: index,
                    },
                );
                tracing::info!(listener = %name, fd = index, "listener preserved");
            }
        }

        for conn_id in self.conns.ids() {
            let Some(conn) = self.conns.get(conn_id) else {
                continue;
            };
            if !conn.is_logged_in() {
                continue;
            }
            let Some(user_id) = conn.user_id() else {
                continue;
            };
            let room_id = self
                .world
                .user(user_id)
                .map(|u| u.room_id)
                .unwrap_or_default();

            let fd = if conn.transport.is_inheritable() {
                match conn.stream().map(fdpass::duplicate) {
                    Some(Ok(dup)) => match extra.push(dup) {
                        Ok(index) => index,
                        Err(err) => {
                            tracing::error!(conn = conn_id, error = %err, "fd registration failed");
                            continue;
                        }
                    },
                    Some(Err(err)) => {
                        tracing::error!(conn = conn_id, error = %err, "fd duplication failed");
                        continue;
                    }
                    None => {
                        tracing::warn!(conn = conn_id, "no kernel stream to preserve");
                        continue;
                    }
                }
            } else {
                // The transport cannot cross the exec; tell the peer to
                // come back.
                self.notify_reconnect(&conn);
                FD_NOT_INHERITED
            };

            snapshot.connections.push(ConnectionRecord {
                connection_id: conn_id,
                transport: conn.transport,
                fd,
                remote_addr: conn.remote_addr.clone(),
                user_id,
                room_id,
            });
        }
        drop(extra);

        snapshot.game = Some(GameSummary {
            current_round: self.world.current_round(),
            resident_users: self.world.user_count() as u32,
        });

        snapshot.validate()?;
        tracing::info!(
            listeners = snapshot.listeners.len(),
            connections = snapshot.connections.len(),
            dropped = snapshot.dropped_connections(),
            "snapshot gathered"
        );
        Ok(snapshot)
    }

    fn notify_reconnect(&self, conn: &crate::conn::Connection) {
        match self
            .renderer
            .render("copyover-reconnect", &TemplateVars::default())
        {
            Ok(text) => {
                conn.send_raw(format!("\r\n{text}\r\n").as_bytes());
            }
            Err(err) => {
                tracing::warn!(error = %err, "reconnect notice template failed");
            }
        }
    }

    /// Replaces the process image. On success this never returns: the
    /// successor is spawned with the inherited FDs, granted its start
    /// grace, and the predecessor exits.
    fn exec_successor(&self) -> Result<std::convert::Infallible, CopyoverError> {
        let executable = match &self.cfg.successor_path {
            Some(path) => path.clone(),
            None => std::env::current_exe().map_err(|err| CopyoverError::ExecFailed {
                reason: format!("cannot resolve current executable: {err}"),
            })?,
        };
        let spec = SuccessorSpec {
            executable,
            args: std::env::args().skip(1).collect(),
        };

        let extra = self.extra_files.lock().unwrap();
        tracing::info!(fds = extra.len(), exe = %spec.executable.display(), "executing successor");
        let _child = fdpass::spawn_successor(&spec, &extra).map_err(|err| {
            CopyoverError::ExecFailed {
                reason: err.to_string(),
            }
        })?;
        drop(extra);

        // Give the successor a moment to come up, then step aside.
        std::thread::sleep(self.cfg.child_start_grace);
        tracing::info!("predecessor exiting");
        std::process::exit(0);
    }

    /// Common failure tail: record, log, return the machine to rest.
    fn fail_sequence(&self, opts: &InitiateOptions, started: SystemTime, error: &str, at: Phase) {
        tracing::error!(phase = at.as_str(), error, "copyover failed");
        self.machine.set_error(error);
        self.machine.force(Phase::Failed);
        self.machine.record(HistoryRecord {
            id: 0,
            started_at: started,
            completed_at: SystemTime::now(),
            duration: started.elapsed().unwrap_or(Duration::ZERO),
            success: false,
            initiated_by: opts.initiated_by.clone(),
            reason: opts.reason.clone(),
            build: build::build_number(),
            old_build: build::build_number(),
            connections_saved: 0,
            connections_lost: 0,
            error: Some(error.to_string()),
        });
        self.machine.force(Phase::Idle);
        self.release_claim();
    }

    // ---- Announcements ----

    fn announce_schedule(&self, seconds: u64, reason: &str) {
        let vars = if seconds > 60 {
            TemplateVars {
                minutes: Some(seconds / 60),
                reason: Some(reason.to_string()),
                ..Default::default()
            }
        } else {
            TemplateVars {
                seconds: Some(seconds),
                reason: Some(reason.to_string()),
                ..Default::default()
            }
        };
        self.broadcast_template("copyover-announce", &vars);
    }

    fn announce_mark(&self, remaining: u64) {
        let vars = if remaining > 60 {
            TemplateVars {
                minutes: Some(remaining / 60),
                ..Default::default()
            }
        } else {
            TemplateVars {
                seconds: Some(remaining),
                ..Default::default()
            }
        };
        self.broadcast_template("copyover-countdown", &vars);
    }

    /// Renders a template and publishes it as a `Broadcast` event. Falls
    /// back to a plain marker when the template is missing.
    pub(crate) fn broadcast_template(&self, name: &str, vars: &TemplateVars) {
        let text = match self.renderer.render(name, vars) {
            Ok(text) => text,
            Err(err) => {
                tracing::error!(template = name, error = %err, "template render failed");
                format!("[template error: {name}]")
            }
        };
        self.bus.broadcast_text(text);
    }
}

#[cfg(test)]
mod tests {
    use std::io::Read;
    use std::net::{TcpListener, TcpStream};

    use super::*;
    use crate::hooks::{JsonUserStore, PlainRenderer};
    use crate::world::UserRecord;

    struct NoopEntry;
    impl WorldEntry for NoopEntry {
        fn enter(&self, _user_id: i64, _room_id: i64) {}
    }

    fn coordinator(dir: &std::path::Path) -> Arc<Coordinator> {
        let cfg = Config::with_data_dir(dir);
        Coordinator::new(
            cfg,
            Arc::new(GameWorld::new()),
            Arc::new(ConnectionManager::new()),
            Arc::new(SubsystemRegistry::new()),
            Collaborators {
                users: Arc::new(JsonUserStore::new(dir)),
                renderer: Arc::new(PlainRenderer::with_defaults()),
                world_entry: Arc::new(NoopEntry),
            },
            Vec::new(),
        )
    }

    fn loopback_pair(listener: &TcpListener) -> (TcpStream, TcpStream) {
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[tokio::test]
    async fn gather_assigns_listener_then_connection_indices() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        coord
            .register_listener("telnet", Transport::Telnet, &listener)
            .unwrap();

        // Two logged-in telnet clients at rooms 100 and 200.
        let (_peer_a, server_a) = loopback_pair(&listener);
        let (_peer_b, server_b) = loopback_pair(&listener);
        coord.world().add_user(UserRecord::new(1, "alpha", 100));
        coord.world().add_user(UserRecord::new(2, "beta", 200));
        let remote_a = server_a.peer_addr().unwrap().to_string();
        let remote_b = server_b.peer_addr().unwrap().to_string();
        let conn_a = coord.conns().add(Transport::Telnet, Some(server_a), remote_a);
        conn_a.bind_user(1);
        let conn_b = coord.conns().add(Transport::Telnet, Some(server_b), remote_b);
        conn_b.bind_user(2);

        let snapshot = coord
            .gather_snapshot(&InitiateOptions::default(), SystemTime::now())
            .unwrap();

        assert_eq!(snapshot.listeners["telnet"].fd, 3);
        assert_eq!(snapshot.connections.len(), 2);
        assert_eq!(snapshot.connections[0].fd, 4);
        assert_eq!(snapshot.connections[0].user_id, 1);
        assert_eq!(snapshot.connections[0].room_id, 100);
        assert_eq!(snapshot.connections[1].fd, 5);
        assert_eq!(snapshot.connections[1].room_id, 200);
        assert_eq!(snapshot.dropped_connections(), 0);
        snapshot.validate().unwrap();

        coord.extra_files.lock().unwrap().release();
    }

    #[tokio::test]
    async fn non_inheritable_transport_gets_sentinel_and_notice() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        coord
            .register_listener("telnet", Transport::Telnet, &listener)
            .unwrap();

        // A browser-upgraded client: the kernel stream exists for the
        // notice, but the transport is marked non-inheritable.
        let (mut peer, server) = loopback_pair(&listener);
        let remote = server.peer_addr().unwrap().to_string();
        let conn = coord.conns().add(Transport::WebSocket, Some(server), remote);
        conn.bind_user(9);
        coord.world().add_user(UserRecord::new(9, "webby", 300));

        let snapshot = coord
            .gather_snapshot(&InitiateOptions::default(), SystemTime::now())
            .unwrap();

        assert_eq!(snapshot.connections.len(), 1);
        assert_eq!(snapshot.connections[0].fd, FD_NOT_INHERITED);
        assert_eq!(snapshot.dropped_connections(), 1);
        snapshot.validate().unwrap();

        // The peer was told to reconnect before the exec.
        coord.conns().remove(conn.id);
        drop(conn);
        let mut text = String::new();
        peer.read_to_string(&mut text).unwrap();
        assert!(text.contains("reconnect"), "notice was: {text:?}");

        coord.extra_files.lock().unwrap().release();
    }

    #[tokio::test]
    async fn anonymous_connections_are_not_carried() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        coord
            .register_listener("telnet", Transport::Telnet, &listener)
            .unwrap();
        let (_peer, server) = loopback_pair(&listener);
        let remote = server.peer_addr().unwrap().to_string();
        // Connected but never logged in.
        coord.conns().add(Transport::Telnet, Some(server), remote);

        let snapshot = coord
            .gather_snapshot(&InitiateOptions::default(), SystemTime::now())
            .unwrap();
        assert!(snapshot.connections.is_empty());

        coord.extra_files.lock().unwrap().release();
    }

    #[tokio::test]
    async fn preserved_env_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let coord = coordinator(dir.path());
        std::env::set_var("LOG_LEVEL", "debug");

        let snapshot = coord
            .gather_snapshot(&InitiateOptions::default(), SystemTime::now())
            .unwrap();
        assert_eq!(
            snapshot.environment.get("LOG_LEVEL").map(String::as_str),
            Some("debug")
        );
        std::env::remove_var("LOG_LEVEL");
    }
}
