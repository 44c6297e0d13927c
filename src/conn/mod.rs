//! # Connection tracking.
//!
//! [`ConnectionManager`] owns every live client connection: its stable id,
//! transport kind, kernel stream (when the transport has one), bound user,
//! and the named input-handler chain the downstream parser walks. The
//! copyover gather reads connections out of here; recovery re-creates them
//! here with their original ids.

mod manager;

pub use manager::{Connection, ConnectionId, ConnectionManager, LOGIN_HANDLERS};
