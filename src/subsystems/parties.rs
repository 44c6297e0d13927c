//! # Party membership across copyover.
//!
//! Parties are pure id graphs (leader, members, invites, formation
//! positions) and restore wholesale. Membership is not pruned against
//! residency here: members mid-reconnect rejoin their party the moment
//! they are re-seated.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{GameWorld, Party};

#[derive(Serialize, Deserialize)]
struct PartiesBlob {
    parties: Vec<Party>,
    saved_at: SystemTime,
}

/// Party participant in the copyover fan-out.
pub struct PartiesSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl PartiesSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }
}

#[async_trait]
impl Subsystem for PartiesSubsystem {
    fn name(&self) -> &'static str {
        "parties"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let parties: Vec<Party> = self.world.parties().into_values().collect();
        if parties.is_empty() {
            return Ok(GatherOutcome::Nothing);
        }
        let blob = PartiesBlob {
            parties,
            saved_at: SystemTime::now(),
        };
        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: PartiesBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        let count = blob.parties.len();
        self.world
            .set_parties(blob.parties.into_iter().map(|p| (p.leader, p)).collect());
        tracing::info!(parties = count, "parties restored");
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
