//! # Core subsystem trait.
//!
//! `Subsystem` is the extension point for plugging game systems into the
//! copyover sequence. Each subsystem owns its blob file (written by its
//! `gather`, read and deleted by its `restore`) and its internal schema;
//! the engine treats blobs as opaque bytes on disk.
//!
//! ## Contract
//! - `name` is unique across the process; duplicates are rejected at
//!   registration.
//! - `gather` runs on the coordinator's worker while the world is
//!   quiescent. Returning [`GatherOutcome::Nothing`] elides the subsystem
//!   from the snapshot entirely (no empty blob files).
//! - `restore` runs in the successor, in registration order, and deletes
//!   the blob on success. A missing blob is not an error.
//! - `can_copyover` is consulted when an operator asks to initiate or
//!   schedule; it must be cheap and non-blocking.
//! - `prepare` runs immediately before state is frozen; `cleanup` runs iff
//!   a scheduled or in-flight copyover is cancelled or aborted.
//!
//! ## Example (skeleton)
//! ```rust
//! use async_trait::async_trait;
//! use copyvisor::{GatherOutcome, Subsystem, SubsystemError};
//!
//! struct Weather;
//!
//! #[async_trait]
//! impl Subsystem for Weather {
//!     fn name(&self) -> &'static str { "weather" }
//!
//!     async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
//!         // write blob, or:
//!         Ok(GatherOutcome::Nothing)
//!     }
//!
//!     async fn restore(&self) -> Result<(), SubsystemError> { Ok(()) }
//! }
//! ```

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::SubsystemError;
use crate::phase::VetoSeverity;

/// Shared handle to a registered subsystem.
pub type SubsystemRef = Arc<dyn Subsystem>;

/// Whether a subsystem carries state through the snapshot at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Participation {
    /// Gather/restore move in-memory state across the exec.
    CopyPreserving,
    /// The subsystem's state is already durably persisted elsewhere; it is
    /// skipped by the gather and restore fan-outs but still consulted for
    /// vetoes, prepare, and cleanup.
    AutomaticallyPersisted,
}

/// A subsystem's vote against copyover, before the registry stamps it with
/// the subsystem name and timestamp.
#[derive(Debug, Clone)]
pub struct Veto {
    /// Human-readable reason, shown verbatim to the operator.
    pub reason: String,
    /// Hard blocks; soft warns.
    pub severity: VetoSeverity,
}

impl Veto {
    /// A blocking veto.
    pub fn hard(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            severity: VetoSeverity::Hard,
        }
    }

    /// A warning veto.
    pub fn soft(reason: impl Into<String>) -> Self {
        Self {
            reason: reason.into(),
            severity: VetoSeverity::Soft,
        }
    }
}

/// What a gather callback produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GatherOutcome {
    /// A blob was written to the subsystem's file.
    Saved,
    /// There was no state worth saving; no file was written.
    Nothing,
}

/// Contract for copyover participants.
///
/// Callbacks execute on the coordinator's worker; implementations should
/// avoid blocking the async runtime (prefer async I/O and cooperative
/// waits).
#[async_trait]
pub trait Subsystem: Send + Sync + 'static {
    /// Unique, stable subsystem name. Used for blob paths, veto records,
    /// and logs.
    fn name(&self) -> &'static str;

    /// Whether this subsystem moves state through the snapshot.
    fn participation(&self) -> Participation {
        Participation::CopyPreserving
    }

    /// Collects the subsystem's state into its blob file before exec.
    async fn gather(&self) -> Result<GatherOutcome, SubsystemError>;

    /// Reconstructs the subsystem's state in the successor from its blob
    /// file, deleting the file on success.
    async fn restore(&self) -> Result<(), SubsystemError>;

    /// Whether the subsystem is ready for copyover right now. `None` means
    /// ready.
    fn can_copyover(&self) -> Option<Veto> {
        None
    }

    /// Called when copyover is imminent, immediately before state is
    /// frozen. Failures are logged; the copyover proceeds.
    async fn prepare(&self) -> Result<(), SubsystemError> {
        Ok(())
    }

    /// Called iff a scheduled or in-flight copyover is cancelled or
    /// aborted. Failures are logged; normal operation resumes.
    async fn cleanup(&self) -> Result<(), SubsystemError> {
        Ok(())
    }
}
