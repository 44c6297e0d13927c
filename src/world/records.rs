//! # World record types.
//!
//! These are the in-memory shapes the copyover subsystems gather from and
//! restore into. Cross-references are stable ids only; see the module docs
//! on [`crate::world`].

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::world::{MobId, MobInstanceId, RoomId, UserId};

/// What a character's aggression record represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AggroKind {
    /// Plain melee/ranged combat.
    Combat,
    /// A spell cast in progress (`rounds_waiting` rounds to go).
    SpellCast,
}

/// Spell metadata inside an aggro record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellAggro {
    /// Spell identifier.
    pub spell_id: String,
    /// Targeted users; pruned on restore when they no longer resolve.
    #[serde(default)]
    pub target_user_ids: Vec<UserId>,
    /// Targeted mob instances; pruned on restore when they no longer
    /// resolve.
    #[serde(default)]
    pub target_mob_ids: Vec<MobInstanceId>,
}

/// A character's aggression record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggro {
    /// Combat or spell cast.
    pub kind: AggroKind,
    /// Target user, for combat aggro.
    #[serde(default)]
    pub target_user: Option<UserId>,
    /// Target mob instance, for combat aggro.
    #[serde(default)]
    pub target_mob: Option<MobInstanceId>,
    /// Rounds until the action lands.
    #[serde(default)]
    pub rounds_waiting: u32,
    /// Spell metadata, for spell casts.
    #[serde(default)]
    pub spell: Option<SpellAggro>,
}

/// A charm relationship from the mob's side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CharmInfo {
    /// The charming user.
    pub user_id: UserId,
    /// Rounds until the charm expires; negative means permanent.
    pub rounds_remaining: i32,
}

/// A named round-based timer on a character.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundTimer {
    /// Round the timer was armed.
    pub round_number: u64,
    /// Length in rounds.
    pub length: u64,
}

/// One item line in a shop inventory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopItem {
    /// Item template id.
    pub item_id: i64,
    /// Units in stock.
    pub quantity: u32,
    /// Unit price in gold.
    pub price: u64,
}

/// A resident user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Stable user id.
    pub id: UserId,
    /// Login name.
    pub username: String,
    /// Current room.
    pub room_id: RoomId,
    /// Aggression record, when in combat or casting.
    #[serde(default)]
    pub aggro: Option<Aggro>,
    /// Mob instances this user has charmed.
    #[serde(default)]
    pub charmed_mobs: Vec<MobInstanceId>,
    /// Named round timers (quest deadlines, cooldowns).
    #[serde(default)]
    pub timers: HashMap<String, RoundTimer>,
    /// Set while the user is being carried through a copyover; cleared
    /// after world re-entry.
    #[serde(skip)]
    pub recovering: bool,
}

impl UserRecord {
    /// Creates a user at a room with no transient state.
    pub fn new(id: UserId, username: impl Into<String>, room_id: RoomId) -> Self {
        Self {
            id,
            username: username.into(),
            room_id,
            aggro: None,
            charmed_mobs: Vec::new(),
            timers: HashMap::new(),
            recovering: false,
        }
    }
}

/// A spawned mob instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MobInstance {
    /// Stable instance id (minted by the world's counter).
    pub instance_id: MobInstanceId,
    /// Template id.
    pub mob_id: MobId,
    /// Current room.
    pub room_id: RoomId,
    /// Aggression record.
    #[serde(default)]
    pub aggro: Option<Aggro>,
    /// Charm relationship, when charmed.
    #[serde(default)]
    pub charmed: Option<CharmInfo>,
    /// Damage dealt per user, for kill credit.
    #[serde(default)]
    pub player_damage: HashMap<UserId, i64>,
    /// Shop inventory, when this mob is a vendor.
    #[serde(default)]
    pub shop: Vec<ShopItem>,
}

impl MobInstance {
    /// Creates a plain instance with no transient state.
    pub fn new(instance_id: MobInstanceId, mob_id: MobId, room_id: RoomId) -> Self {
        Self {
            instance_id,
            mob_id,
            room_id,
            aggro: None,
            charmed: None,
            player_damage: HashMap::new(),
            shop: Vec::new(),
        }
    }
}

/// An adventuring party, keyed by its leader.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Party {
    /// Leader's user id (also the map key).
    pub leader: UserId,
    /// Members, leader included.
    pub members: Vec<UserId>,
    /// Outstanding invites.
    #[serde(default)]
    pub invites: Vec<UserId>,
    /// Members auto-attacking the leader's target.
    #[serde(default)]
    pub auto_attackers: Vec<UserId>,
    /// Formation position per member ("front", "middle", "back").
    #[serde(default)]
    pub positions: HashMap<UserId, String>,
}

/// Transient per-room state that is not part of the room template.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RoomRuntime {
    /// Temporary exits: direction → destination room.
    #[serde(default)]
    pub temp_exits: HashMap<String, RoomId>,
    /// Active mutator ids; the mutators themselves recreate on demand.
    #[serde(default)]
    pub mutators: Vec<String>,
    /// Round of the last visit, for idle despawn logic.
    #[serde(default)]
    pub last_visited: u64,
}
