//! # Economy state across copyover.
//!
//! Shop inventories must cross the exec exactly: a vendor restocked down
//! to two healing draughts still has two afterwards. Pending gold
//! transfers (escrowed trades) live in this subsystem itself and are
//! replayed into the successor's queue of work.

use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{GameWorld, MobInstanceId, RoomId, ShopItem, UserId};

/// A gold transfer awaiting settlement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingTransfer {
    /// Paying user.
    pub from_user_id: UserId,
    /// Receiving user.
    pub to_user_id: UserId,
    /// Amount in gold.
    pub amount: u64,
    /// When the transfer was queued.
    pub queued_at: SystemTime,
}

#[derive(Serialize, Deserialize)]
struct ShopState {
    owner_instance_id: MobInstanceId,
    room_id: RoomId,
    items: Vec<ShopItem>,
}

#[derive(Serialize, Deserialize)]
struct EconomyBlob {
    shop_states: Vec<ShopState>,
    pending_transfers: Vec<PendingTransfer>,
    saved_at: SystemTime,
}

/// Economy participant in the copyover fan-out.
pub struct EconomySubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
    pending: Mutex<Vec<PendingTransfer>>,
}

impl EconomySubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self {
            world,
            cfg,
            pending: Mutex::new(Vec::new()),
        })
    }

    /// Queues a transfer for settlement.
    pub fn queue_transfer(&self, transfer: PendingTransfer) {
        self.pending.lock().unwrap().push(transfer);
    }

    /// Transfers currently awaiting settlement.
    pub fn pending_transfers(&self) -> Vec<PendingTransfer> {
        self.pending.lock().unwrap().clone()
    }

    fn collect(&self) -> EconomyBlob {
        let mut shop_states = Vec::new();
        for instance_id in self.world.mob_instance_ids() {
            let Some(mob) = self.world.mob(instance_id) else {
                continue;
            };
            if !mob.shop.is_empty() {
                shop_states.push(ShopState {
                    owner_instance_id: instance_id,
                    room_id: mob.room_id,
                    items: mob.shop,
                });
            }
        }
        EconomyBlob {
            shop_states,
            pending_transfers: self.pending.lock().unwrap().clone(),
            saved_at: SystemTime::now(),
        }
    }

    fn apply(&self, blob: EconomyBlob) {
        for shop in blob.shop_states {
            let applied = self
                .world
                .update_mob(shop.owner_instance_id, |m| m.shop = shop.items.clone());
            if !applied {
                tracing::warn!(
                    instance = shop.owner_instance_id,
                    "economy restore: shop owner gone"
                );
            }
        }
        *self.pending.lock().unwrap() = blob.pending_transfers;
    }
}

#[async_trait]
impl Subsystem for EconomySubsystem {
    fn name(&self) -> &'static str {
        "economy"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let blob = self.collect();
        if blob.shop_states.is_empty() && blob.pending_transfers.is_empty() {
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
        let blob: EconomyBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        self.apply(blob);
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
