//! # Combat state across copyover.
//!
//! Preserves melee aggro for users and mobs, per-user damage tracking, and
//! the mob instance counter. The counter restores **first** so that
//! instance ids minted after recovery never collide with ids referenced
//! from serialized combat relations. Restore validates every aggro target
//! and clears records whose targets no longer resolve.
//!
//! Spell-cast aggro is owned by the spells subsystem, not here.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{Aggro, AggroKind, CharmInfo, GameWorld, MobId, MobInstanceId, RoomId, UserId};

#[derive(Serialize, Deserialize)]
struct PlayerCombatState {
    user_id: UserId,
    room_id: RoomId,
    aggro: Aggro,
}

#[derive(Serialize, Deserialize)]
struct MobCombatState {
    mob_id: MobId,
    instance_id: MobInstanceId,
    room_id: RoomId,
    #[serde(default)]
    aggro: Option<Aggro>,
    #[serde(default)]
    damage: HashMap<UserId, i64>,
    #[serde(default)]
    charmed_by: Option<UserId>,
}

#[derive(Serialize, Deserialize)]
struct CombatBlob {
    player_combat: Vec<PlayerCombatState>,
    mob_combat: Vec<MobCombatState>,
    mob_instance_counter: i64,
    saved_at: SystemTime,
}

/// Combat participant in the copyover fan-out.
pub struct CombatSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl CombatSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }

    fn collect(&self) -> CombatBlob {
        let mut blob = CombatBlob {
            player_combat: Vec::new(),
            mob_combat: Vec::new(),
            mob_instance_counter: self.world.mob_counter(),
            saved_at: SystemTime::now(),
        };

        for user_id in self.world.resident_user_ids() {
            let Some(user) = self.world.user(user_id) else {
                continue;
            };
            if let Some(aggro) = user.aggro {
                if aggro.kind == AggroKind::Combat {
                    blob.player_combat.push(PlayerCombatState {
                        user_id,
                        room_id: user.room_id,
                        aggro,
                    });
                }
            }
        }

        for instance_id in self.world.mob_instance_ids() {
            let Some(mob) = self.world.mob(instance_id) else {
                continue;
            };
            let in_combat = matches!(&mob.aggro, Some(a) if a.kind == AggroKind::Combat);
            if !in_combat && mob.player_damage.is_empty() {
                continue;
            }
            blob.mob_combat.push(MobCombatState {
                mob_id: mob.mob_id,
                instance_id,
                room_id: mob.room_id,
                aggro: mob.aggro.filter(|a| a.kind == AggroKind::Combat),
                damage: mob.player_damage,
                charmed_by: mob.charmed.map(|c| c.user_id),
            });
        }

        blob
    }

    fn aggro_target_resolves(&self, aggro: &Aggro) -> bool {
        if let Some(user_id) = aggro.target_user {
            return self.world.user(user_id).is_some();
        }
        if let Some(mob_id) = aggro.target_mob {
            return self.world.mob(mob_id).is_some();
        }
        true
    }

    fn apply(&self, blob: CombatBlob) {
        // Counter first: every id minted from here on is above the
        // serialized references.
        self.world.set_mob_counter(blob.mob_instance_counter);

        for player in blob.player_combat {
            let resolves = self.aggro_target_resolves(&player.aggro);
            let applied = self.world.update_user(player.user_id, |user| {
                user.aggro = if resolves {
                    Some(player.aggro.clone())
                } else {
                    None
                };
            });
            if !applied {
                tracing::warn!(user = player.user_id, "combat restore: user not resident");
            } else if !resolves {
                tracing::warn!(user = player.user_id, "combat restore: dangling aggro target cleared");
            }
        }

        for mob_state in blob.mob_combat {
            let Some(mob) = self.world.mob(mob_state.instance_id) else {
                tracing::warn!(
                    instance = mob_state.instance_id,
                    "combat restore: mob instance not found"
                );
                continue;
            };
            if mob.room_id != mob_state.room_id {
                tracing::warn!(
                    instance = mob_state.instance_id,
                    expected = mob_state.room_id,
                    actual = mob.room_id,
                    "combat restore: mob not in expected room"
                );
                continue;
            }

            let aggro = mob_state
                .aggro
                .filter(|a| self.aggro_target_resolves(a));
            let charmed = mob_state.charmed_by.and_then(|user_id| {
                self.world.user(user_id).map(|_| CharmInfo {
                    user_id,
                    rounds_remaining: -1, // permanent charm survives as-is
                })
            });
            self.world.update_mob(mob_state.instance_id, |m| {
                m.aggro = aggro.clone();
                m.player_damage = mob_state.damage.clone();
                if m.charmed.is_none() {
                    m.charmed = charmed;
                }
            });
        }
    }
}

#[async_trait]
impl Subsystem for CombatSubsystem {
    fn name(&self) -> &'static str {
        "combat"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let blob = self.collect();
        if blob.player_combat.is_empty() && blob.mob_combat.is_empty() {
            // Still worth carrying the counter when mobs exist at all.
            if blob.mob_instance_counter == 0 {
                return Ok(GatherOutcome::Nothing);
            }
        }
        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: CombatBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        self.apply(blob);
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::world::UserRecord;

    fn fixture() -> (Arc<GameWorld>, Config, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let cfg = Config::with_data_dir(dir.path());
        (Arc::new(GameWorld::new()), cfg, dir)
    }

    fn combat_aggro(target_user: UserId) -> Aggro {
        Aggro {
            kind: AggroKind::Combat,
            target_user: Some(target_user),
            target_mob: None,
            rounds_waiting: 0,
            spell: None,
        }
    }

    #[tokio::test]
    async fn round_trips_player_and_mob_combat() {
        let (world, cfg, _dir) = fixture();
        world.add_user(UserRecord::new(1, "attacker", 100));
        world.add_user(UserRecord::new(2, "defender", 100));
        world.update_user(1, |u| u.aggro = Some(combat_aggro(2)));

        let mob = world.spawn_mob(500, 100);
        world.update_mob(mob, |m| {
            m.aggro = Some(combat_aggro(1));
            m.player_damage.insert(1, 37);
        });

        let sub = CombatSubsystem::new(Arc::clone(&world), cfg.clone());
        assert_eq!(sub.gather().await.unwrap(), GatherOutcome::Saved);

        // Successor world: same residents and mobs, transient state gone.
        let successor = Arc::new(GameWorld::new());
        successor.add_user(UserRecord::new(1, "attacker", 100));
        successor.add_user(UserRecord::new(2, "defender", 100));
        successor.insert_mob(crate::world::MobInstance::new(mob, 500, 100));

        let sub2 = CombatSubsystem::new(Arc::clone(&successor), cfg.clone());
        sub2.restore().await.unwrap();

        assert_eq!(successor.user(1).unwrap().aggro, Some(combat_aggro(2)));
        let restored_mob = successor.mob(mob).unwrap();
        assert_eq!(restored_mob.aggro, Some(combat_aggro(1)));
        assert_eq!(restored_mob.player_damage.get(&1), Some(&37));
        assert_eq!(successor.mob_counter(), 1);
        // Blob is consumed.
        assert!(snapshot::read_blob(&cfg, "combat").unwrap().is_none());
    }

    #[tokio::test]
    async fn dangling_aggro_targets_are_cleared() {
        let (world, cfg, _dir) = fixture();
        world.add_user(UserRecord::new(1, "attacker", 100));
        world.add_user(UserRecord::new(2, "victim", 100));
        world.update_user(1, |u| u.aggro = Some(combat_aggro(2)));

        let sub = CombatSubsystem::new(Arc::clone(&world), cfg.clone());
        sub.gather().await.unwrap();

        // Victim never made it back after the copyover.
        let successor = Arc::new(GameWorld::new());
        successor.add_user(UserRecord::new(1, "attacker", 100));
        let sub2 = CombatSubsystem::new(Arc::clone(&successor), cfg);
        sub2.restore().await.unwrap();

        assert_eq!(successor.user(1).unwrap().aggro, None);
    }

    #[tokio::test]
    async fn counter_restores_before_mints() {
        let (world, cfg, _dir) = fixture();
        world.spawn_mob(10, 1);
        world.spawn_mob(10, 1);
        let sub = CombatSubsystem::new(Arc::clone(&world), cfg.clone());
        sub.gather().await.unwrap();

        let successor = Arc::new(GameWorld::new());
        let sub2 = CombatSubsystem::new(Arc::clone(&successor), cfg);
        sub2.restore().await.unwrap();
        assert_eq!(successor.spawn_mob(10, 1), 3);
    }

    #[tokio::test]
    async fn quiet_world_gathers_nothing() {
        let (world, cfg, _dir) = fixture();
        let sub = CombatSubsystem::new(world, cfg.clone());
        assert_eq!(sub.gather().await.unwrap(), GatherOutcome::Nothing);
        assert!(snapshot::read_blob(&cfg, "combat").unwrap().is_none());
    }
}
