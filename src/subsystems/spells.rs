//! # In-flight spell casts across copyover.
//!
//! A three-round incantation started before the copyover must still land
//! after it. Gather captures every spell-cast aggro record (users and
//! mobs) with its remaining rounds; restore rebuilds the records and
//! prunes target ids that no longer resolve in the successor's world.

use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{Aggro, AggroKind, GameWorld, MobInstanceId, RoomId, SpellAggro, UserId};

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "caster_type", content = "caster_id")]
enum Caster {
    User(UserId),
    Mob(MobInstanceId),
}

#[derive(Serialize, Deserialize)]
struct ActiveSpellCast {
    #[serde(flatten)]
    caster: Caster,
    room_id: RoomId,
    spell_id: String,
    rounds_waiting: u32,
    spell: SpellAggro,
}

#[derive(Serialize, Deserialize)]
struct SpellsBlob {
    active_spells: Vec<ActiveSpellCast>,
    saved_at: SystemTime,
}

/// Spell-cast participant in the copyover fan-out.
pub struct SpellsSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl SpellsSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }

    fn collect(&self) -> SpellsBlob {
        let mut blob = SpellsBlob {
            active_spells: Vec::new(),
            saved_at: SystemTime::now(),
        };

        for user_id in self.world.resident_user_ids() {
            let Some(user) = self.world.user(user_id) else {
                continue;
            };
            if let Some(aggro) = user.aggro {
                if aggro.kind == AggroKind::SpellCast {
                    if let Some(spell) = aggro.spell {
                        blob.active_spells.push(ActiveSpellCast {
                            caster: Caster::User(user_id),
                            room_id: user.room_id,
                            spell_id: spell.spell_id.clone(),
                            rounds_waiting: aggro.rounds_waiting,
                            spell,
                        });
                    }
                }
            }
        }

        for instance_id in self.world.mob_instance_ids() {
            let Some(mob) = self.world.mob(instance_id) else {
                continue;
            };
            if let Some(aggro) = mob.aggro {
                if aggro.kind == AggroKind::SpellCast {
                    if let Some(spell) = aggro.spell {
                        blob.active_spells.push(ActiveSpellCast {
                            caster: Caster::Mob(instance_id),
                            room_id: mob.room_id,
                            spell_id: spell.spell_id.clone(),
                            rounds_waiting: aggro.rounds_waiting,
                            spell,
                        });
                    }
                }
            }
        }

        blob
    }

    /// Drops target ids that no longer resolve.
    fn prune_targets(&self, spell: &mut SpellAggro) {
        spell
            .target_user_ids
            .retain(|id| self.world.user(*id).is_some());
        spell
            .target_mob_ids
            .retain(|id| self.world.mob(*id).is_some());
    }

    fn apply(&self, blob: SpellsBlob) {
        for mut cast in blob.active_spells {
            self.prune_targets(&mut cast.spell);
            let aggro = Aggro {
                kind: AggroKind::SpellCast,
                target_user: None,
                target_mob: None,
                rounds_waiting: cast.rounds_waiting,
                spell: Some(cast.spell),
            };

            match cast.caster {
                Caster::User(user_id) => {
                    let applied = self.world.update_user(user_id, |u| u.aggro = Some(aggro.clone()));
                    if !applied {
                        tracing::warn!(user = user_id, "spell restore: caster not resident");
                    }
                }
                Caster::Mob(instance_id) => {
                    let Some(mob) = self.world.mob(instance_id) else {
                        tracing::warn!(instance = instance_id, "spell restore: caster mob gone");
                        continue;
                    };
                    if mob.room_id != cast.room_id {
                        tracing::warn!(
                            instance = instance_id,
                            expected = cast.room_id,
                            actual = mob.room_id,
                            "spell restore: mob not in expected room"
                        );
                        continue;
                    }
                    self.world.update_mob(instance_id, |m| m.aggro = Some(aggro.clone()));
                }
            }
        }
    }
}

#[async_trait]
impl Subsystem for SpellsSubsystem {
    fn name(&self) -> &'static str {
        "spells"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let blob = self.collect();
        if blob.active_spells.is_empty() {
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
        let blob: SpellsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        self.apply(blob);
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
