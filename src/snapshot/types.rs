//! # Snapshot value types.
//!
//! [`Snapshot`] is the single on-disk artifact consumed by the successor.
//! Its wire format is versioned by the leading `version` field:
//! - unknown fields written by a newer predecessor are captured into
//!   `unknown` and discarded with a warning,
//! - fields missing from an older snapshot fall to typed defaults.
//!
//! ## FD invariants
//! - Inherited FD indices form a dense sequence starting at
//!   [`FIRST_INHERITED_FD`] (the first three FDs belong to the inherited
//!   stdio triple).
//! - No index appears twice.
//! - Listener indices precede connection indices.
//! - Connections whose transport cannot survive exec carry
//!   [`FD_NOT_INHERITED`].

use std::collections::BTreeMap;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

use crate::error::SnapshotError;
use crate::world::{RoomId, UserId};

/// Wire-format epoch written into every snapshot.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// First FD index available to inherited sockets; 0–2 are stdio.
pub const FIRST_INHERITED_FD: i32 = 3;

/// Sentinel index for connections whose transport cannot be inherited.
pub const FD_NOT_INHERITED: i32 = -1;

/// Kind of transport behind a listener or connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    /// Plain kernel TCP socket; inheritable across exec.
    Telnet,
    /// Application-level upgraded transport; cannot be handed to the
    /// successor. Recorded with the sentinel index and dropped with a
    /// reconnection notice.
    WebSocket,
}

impl Transport {
    /// Whether this transport survives process replacement.
    pub fn is_inheritable(self) -> bool {
        matches!(self, Transport::Telnet)
    }
}

/// A listening socket's record. Must be reconstructible into a bound,
/// listening endpoint from the inherited FD alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerRecord {
    /// Transport served by this listener.
    pub transport: Transport,
    /// Bound address string, verified (warn-only) after rehydration.
    pub address: String,
    /// Index in the inherited FD sequence.
    pub fd: i32,
}

/// An established connection's record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionRecord {
    /// Stable connection id, re-used by the successor.
    pub connection_id: u64,
    /// Transport kind.
    pub transport: Transport,
    /// Index in the inherited FD sequence, or [`FD_NOT_INHERITED`].
    pub fd: i32,
    /// Peer address at gather time.
    pub remote_addr: String,
    /// Bound user; must identify a persisted user.
    pub user_id: UserId,
    /// Room the user occupied at gather time.
    pub room_id: RoomId,
}

/// Optional world summary carried for subsystems that validate
/// time-sensitive state after recovery.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GameSummary {
    /// Round counter at gather time.
    #[serde(default)]
    pub current_round: u64,
    /// Resident user count at gather time.
    #[serde(default)]
    pub resident_users: u32,
}

fn default_version() -> String {
    SNAPSHOT_VERSION.to_string()
}

/// The single on-disk artifact driving recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    /// Wire-format epoch; the leading field of the serialized value.
    #[serde(default = "default_version")]
    pub version: String,
    /// When the snapshot was written.
    pub timestamp: SystemTime,
    /// When the copyover sequence started; the successor computes the
    /// user-visible elapsed duration from this.
    pub start_time: SystemTime,
    /// Preserved environment variables, restored in the successor.
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
    /// Listeners by name; name order (sorted) matches FD order.
    #[serde(default)]
    pub listeners: BTreeMap<String, ListenerRecord>,
    /// Connections in gather order; FD order continues after listeners.
    #[serde(default)]
    pub connections: Vec<ConnectionRecord>,
    /// Optional world summary.
    #[serde(default)]
    pub game: Option<GameSummary>,
    /// Who initiated the copyover; carried into the history record.
    #[serde(default)]
    pub initiated_by: String,
    /// The reason supplied at initiation.
    #[serde(default)]
    pub reason: String,
    /// Build identifier of the replaced process.
    #[serde(default)]
    pub old_build: String,
    /// Fields this build does not know about. Logged and discarded.
    #[serde(flatten)]
    pub unknown: BTreeMap<String, serde_json::Value>,
}

impl Snapshot {
    /// Creates an empty snapshot stamped now.
    pub fn new(start_time: SystemTime) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: SystemTime::now(),
            start_time,
            environment: BTreeMap::new(),
            listeners: BTreeMap::new(),
            connections: Vec::new(),
            game: None,
            initiated_by: String::new(),
            reason: String::new(),
            old_build: String::new(),
            unknown: BTreeMap::new(),
        }
    }

    /// Number of connections whose FD is inherited.
    pub fn inherited_connections(&self) -> usize {
        self.connections
            .iter()
            .filter(|c| c.fd != FD_NOT_INHERITED)
            .count()
    }

    /// Number of connections dropped at exec (sentinel index).
    pub fn dropped_connections(&self) -> usize {
        self.connections.len() - self.inherited_connections()
    }

    /// Checks the structural FD invariants.
    ///
    /// Listener indices (in sorted-name order) must start at
    /// [`FIRST_INHERITED_FD`] and increase densely; inherited connection
    /// indices continue the sequence; no duplicates; sentinel entries are
    /// exempt.
    pub fn validate(&self) -> Result<(), SnapshotError> {
        let mut expected = FIRST_INHERITED_FD;

        // BTreeMap iterates in sorted name order, the order FDs were
        // assigned during gather.
        for (name, listener) in &self.listeners {
            if listener.fd != expected {
                return Err(SnapshotError::Invalid {
                    reason: format!(
                        "listener '{name}' fd {} out of sequence (expected {expected})",
                        listener.fd
                    ),
                });
            }
            expected += 1;
        }

        for conn in &self.connections {
            if conn.fd == FD_NOT_INHERITED {
                continue;
            }
            if conn.fd < FIRST_INHERITED_FD + self.listeners.len() as i32 {
                return Err(SnapshotError::Invalid {
                    reason: format!(
                        "connection {} fd {} overlaps listener range",
                        conn.connection_id, conn.fd
                    ),
                });
            }
            if conn.fd != expected {
                return Err(SnapshotError::Invalid {
                    reason: format!(
                        "connection {} fd {} out of sequence (expected {expected})",
                        conn.connection_id, conn.fd
                    ),
                });
            }
            expected += 1;
        }

        Ok(())
    }
}
