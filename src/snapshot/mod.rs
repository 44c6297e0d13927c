//! # The on-disk copyover snapshot.
//!
//! One primary snapshot file drives recovery: environment, listeners,
//! connections, and bookkeeping for the history record. Subsystem state
//! never lives in the primary snapshot; each subsystem writes its own blob
//! file through the helpers in [`codec`].
//!
//! The snapshot is ephemeral: created immediately before exec, consumed and
//! removed by the successor. A snapshot found at startup without the
//! inheritance environment marker is a stale artifact and is removed.

mod codec;
mod types;

pub use codec::{
    clean_stale, decode, encode, read_blob, read_snapshot, remove_blob, write_atomic, write_blob,
};
pub use types::{
    ConnectionRecord, GameSummary, ListenerRecord, Snapshot, Transport, FD_NOT_INHERITED,
    FIRST_INHERITED_FD, SNAPSHOT_VERSION,
};
