//! # Room runtime state across copyover.
//!
//! Room templates are durable; what crosses here is only the transient
//! layer: temporary exits, active mutator ids, and visit bookkeeping.
//! Mutators restore by id and rebuild their effects on demand.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{GameWorld, RoomId, RoomRuntime};

#[derive(Serialize, Deserialize)]
struct RoomsBlob {
    room_states: HashMap<RoomId, RoomRuntime>,
    saved_at: SystemTime,
}

/// Room-runtime participant in the copyover fan-out.
pub struct RoomsSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl RoomsSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }
}

#[async_trait]
impl Subsystem for RoomsSubsystem {
    fn name(&self) -> &'static str {
        "rooms"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let mut room_states = HashMap::new();
        for room_id in self.world.rooms_with_runtime() {
            if let Some(runtime) = self.world.room_runtime(room_id) {
                room_states.insert(room_id, runtime);
            }
        }
        if room_states.is_empty() {
            return Ok(GatherOutcome::Nothing);
        }
        let blob = RoomsBlob {
            room_states,
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
        let blob: RoomsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        let count = blob.room_states.len();
        for (room_id, runtime) in blob.room_states {
            self.world.set_room_runtime(room_id, runtime);
        }
        tracing::info!(rooms = count, "room runtime state restored");
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
