//! # copyvisor
//!
//! **Copyvisor** is a hot-reload ("copyover") engine for long-running,
//! stateful, multi-user text servers.
//!
//! It replaces the running server executable with a freshly built binary
//! without disconnecting a single client and without losing in-memory game
//! state. Users see a brief pause; privileged operators trigger the swap
//! at will.
//!
//! ## Features
//!
//! | Area                | Description                                                            | Key types / traits                        |
//! |---------------------|------------------------------------------------------------------------|-------------------------------------------|
//! | **Coordination**    | Sequence countdown → build → quiesce → snapshot → exec → recover.      | [`Coordinator`], [`InitiateOptions`]      |
//! | **Phase tracking**  | Validated transition graph with derived progress and bounded history.  | [`Phase`], [`PhaseMachine`], [`Status`]   |
//! | **FD inheritance**  | Hand the accept socket and every client socket to the successor.       | [`fd`]                                    |
//! | **Snapshots**       | Versioned, atomically written on-disk state plus per-subsystem blobs.  | [`snapshots::Snapshot`], [`snapshots`]    |
//! | **Subsystems**      | Gather/restore/veto/prepare/cleanup fan-out over game systems.         | [`Subsystem`], [`SubsystemRegistry`]      |
//! | **Recovery**        | Child-side reconstruction of listeners, connections, and world state.  | [`detect_startup`], [`recover`]           |
//! | **Operator surface**| `copyover (now \| <seconds> \| test \| status \| cancel)`.             | [`ops`]                                   |
//! | **Events**          | Lifecycle stream with non-blocking subscriber fan-out.                 | [`Event`], [`Bus`], [`Subscribe`]         |
//!
//! ## The shape of a copyover
//!
//! ```text
//! operator ──► Coordinator::initiate()
//!                  │  veto check, then claim
//!                  ▼
//!          build ──► countdown broadcasts ──► world lock ("time stops")
//!                  │
//!                  ├─► save users      (UserStore)
//!                  ├─► gather fan-out  (each subsystem writes its blob)
//!                  ├─► snapshot + FDs  (listeners, then connections)
//!                  └─► exec successor  (inherited FDs at indices 3..N)
//!                            │
//!                            ▼   successor process
//!          detect_startup() ──► recover(): wrap FDs, restore fan-out,
//!                               re-seat users, one completion notice
//! ```
//!
//! ## Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use copyvisor::{
//!     Collaborators, Config, ConnectionManager, Coordinator, GameWorld,
//!     JsonUserStore, PlainRenderer, SubsystemRegistry,
//! };
//!
//! struct Reseat;
//! impl copyvisor::WorldEntry for Reseat {
//!     fn enter(&self, user_id: i64, room_id: i64) {
//!         println!("user {user_id} re-enters room {room_id}");
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let cfg = Config::default();
//!     let world = Arc::new(GameWorld::new());
//!     let conns = Arc::new(ConnectionManager::new());
//!     let registry = Arc::new(SubsystemRegistry::new());
//!     copyvisor::subsystems::register_defaults(&registry, Arc::clone(&world), cfg.clone())?;
//!
//!     let coordinator = Coordinator::new(
//!         cfg.clone(),
//!         world,
//!         conns,
//!         registry,
//!         Collaborators {
//!             users: Arc::new(JsonUserStore::new("data/users")),
//!             renderer: Arc::new(PlainRenderer::with_defaults()),
//!             world_entry: Arc::new(Reseat),
//!         },
//!         Vec::new(),
//!     );
//!
//!     // Boot: recover from an inherited run, or clean stale artifacts.
//!     if copyvisor::detect_startup(&cfg) == copyvisor::StartupMode::Recover {
//!         copyvisor::recover(&coordinator, &cfg).await?;
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ---

mod config;
mod conn;
mod coordinator;
mod error;
mod events;
mod fdpass;
mod hooks;
mod operator;
mod phase;
mod registry;
mod snapshot;
mod subscribers;
mod world;

pub mod subsystems;

// ---- Public re-exports ----

pub use config::{Config, RECOVERY_ENV_VAR, SNAPSHOT_FILE};
pub use conn::{Connection, ConnectionId, ConnectionManager, LOGIN_HANDLERS};
pub use coordinator::{
    build_number, detect_startup, recover, run_build, set_build_number, Collaborators,
    Coordinator, InitiateOptions, Recovered, StartupMode,
};
pub use error::{CopyoverError, SnapshotError, SubsystemError};
pub use events::{Bus, Event, EventKind};
pub use hooks::{
    JsonUserStore, PlainRenderer, TemplateRenderer, TemplateVars, UserStore, WorldEntry,
};
pub use phase::{HistoryRecord, Phase, PhaseMachine, Status, VetoRecord, VetoSeverity};
pub use registry::{GatherOutcome, Participation, Subsystem, SubsystemRef, SubsystemRegistry, Veto};
pub use snapshot::Transport;
pub use subscribers::{BroadcastSubscriber, Dispatcher, LogSubscriber, Subscribe};
pub use world::{
    Aggro, AggroKind, CharmInfo, GameEvent, GameQueue, GameWorld, MobId, MobInstance,
    MobInstanceId, Party, QueuedEvent, RoomId, RoomRuntime, RoundClock, RoundTimer, ShopItem,
    SpellAggro, UserId, UserRecord, WorldLock,
};

// FD plumbing and snapshot internals are useful to embedding servers that
// roll their own transports, so they stay public as modules.
pub mod fd {
    //! File-descriptor inheritance helpers.
    pub use crate::fdpass::{
        duplicate, is_cloexec, listener_from_index, set_cloexec, spawn_successor,
        stream_from_index, InheritedFds, SuccessorSpec,
    };
}

pub mod snapshots {
    //! Snapshot types and codec.
    pub use crate::snapshot::{
        clean_stale, decode, encode, read_blob, read_snapshot, remove_blob, write_atomic,
        write_blob, ConnectionRecord, GameSummary, ListenerRecord, Snapshot, Transport,
        FD_NOT_INHERITED, FIRST_INHERITED_FD, SNAPSHOT_VERSION,
    };
}

pub mod ops {
    //! Operator verb parsing and dispatch.
    pub use crate::operator::{dispatch, parse_command, OperatorCommand};
}
