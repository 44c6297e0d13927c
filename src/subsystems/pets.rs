//! # Pet/charm relations across copyover.
//!
//! A charm is a cycle on purpose: the user's record lists the charmed mob
//! instance, and the mob's record points back at its charmer. Only the ids
//! cross the exec; restore re-resolves both ends and discards relations
//! whose user or mob did not survive.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{CharmInfo, GameWorld, MobId, MobInstanceId, RoomId, UserId};

#[derive(Serialize, Deserialize)]
struct CharmedRelationship {
    user_id: UserId,
    mob_instance_id: MobInstanceId,
    mob_id: MobId,
    room_id: RoomId,
    charm: CharmInfo,
}

#[derive(Serialize, Deserialize)]
struct PetsBlob {
    charmed_relationships: Vec<CharmedRelationship>,
    saved_at: SystemTime,
}

/// Pet/charm participant in the copyover fan-out.
pub struct PetsSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl PetsSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }

    fn collect(&self) -> PetsBlob {
        let mut blob = PetsBlob {
            charmed_relationships: Vec::new(),
            saved_at: SystemTime::now(),
        };

        for user_id in self.world.resident_user_ids() {
            let Some(user) = self.world.user(user_id) else {
                continue;
            };
            for mob_instance_id in user.charmed_mobs {
                let Some(mob) = self.world.mob(mob_instance_id) else {
                    continue;
                };
                let Some(charm) = mob.charmed else {
                    continue;
                };
                blob.charmed_relationships.push(CharmedRelationship {
                    user_id,
                    mob_instance_id,
                    mob_id: mob.mob_id,
                    room_id: mob.room_id,
                    charm,
                });
            }
        }

        blob
    }

    fn apply(&self, blob: PetsBlob) {
        let mut restored = 0usize;
        let total = blob.charmed_relationships.len();

        for rel in blob.charmed_relationships {
            if self.world.user(rel.user_id).is_none() {
                tracing::warn!(user = rel.user_id, "charm restore: user not resident");
                continue;
            }
            let Some(mob) = self.world.mob(rel.mob_instance_id) else {
                tracing::warn!(instance = rel.mob_instance_id, "charm restore: mob gone");
                continue;
            };
            if mob.room_id != rel.room_id {
                tracing::warn!(
                    instance = rel.mob_instance_id,
                    expected = rel.room_id,
                    actual = mob.room_id,
                    "charm restore: mob not in expected room"
                );
                continue;
            }

            self.world
                .update_mob(rel.mob_instance_id, |m| m.charmed = Some(rel.charm.clone()));
            self.world.update_user(rel.user_id, |u| {
                if !u.charmed_mobs.contains(&rel.mob_instance_id) {
                    u.charmed_mobs.push(rel.mob_instance_id);
                }
            });
            restored += 1;
        }

        tracing::info!(restored, total, "charm relationships restored");
    }
}

#[async_trait]
impl Subsystem for PetsSubsystem {
    fn name(&self) -> &'static str {
        "pets"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let blob = self.collect();
        if blob.charmed_relationships.is_empty() {
            return Ok(GatherOutcome::Nothing);
        }
        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: PetsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        self.apply(blob);
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
