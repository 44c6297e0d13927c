//! # Script system state across copyover.
//!
//! Script VM internals are not serializable; what crosses is the cache
//! inventory (which VMs were warm, by key) and the text-wrap styles. VMs
//! recreate on demand when a script next fires, so restore only re-seeds
//! the bookkeeping.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::RoomId;

/// Wrapping style applied to rendered text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextWrapStyle {
    /// Wrap column.
    pub width: u16,
    /// Hanging-indent columns.
    pub indent: u8,
}

impl Default for TextWrapStyle {
    fn default() -> Self {
        Self {
            width: 80,
            indent: 0,
        }
    }
}

#[derive(Serialize, Deserialize)]
struct ScriptsBlob {
    room_vms: Vec<RoomId>,
    mob_vms: Vec<String>,
    item_vms: Vec<String>,
    user_text_wrap: TextWrapStyle,
    room_text_wrap: TextWrapStyle,
    saved_at: SystemTime,
}

#[derive(Default)]
struct VmCaches {
    rooms: BTreeSet<RoomId>,
    mobs: BTreeSet<String>,
    items: BTreeSet<String>,
}

/// Script-system participant in the copyover fan-out.
pub struct ScriptsSubsystem {
    cfg: Config,
    caches: Mutex<VmCaches>,
    user_wrap: Mutex<TextWrapStyle>,
    room_wrap: Mutex<TextWrapStyle>,
}

impl ScriptsSubsystem {
    /// Creates the subsystem.
    pub fn new(cfg: Config) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            caches: Mutex::new(VmCaches::default()),
            user_wrap: Mutex::new(TextWrapStyle::default()),
            room_wrap: Mutex::new(TextWrapStyle::default()),
        })
    }

    /// Marks a room VM warm.
    pub fn mark_room_vm(&self, room_id: RoomId) {
        self.caches.lock().unwrap().rooms.insert(room_id);
    }

    /// Marks a mob VM warm by instance key.
    pub fn mark_mob_vm(&self, key: impl Into<String>) {
        self.caches.lock().unwrap().mobs.insert(key.into());
    }

    /// Room VMs currently marked warm.
    pub fn warm_room_vms(&self) -> Vec<RoomId> {
        self.caches.lock().unwrap().rooms.iter().copied().collect()
    }

    /// Sets the user-facing text wrap style.
    pub fn set_user_wrap(&self, style: TextWrapStyle) {
        *self.user_wrap.lock().unwrap() = style;
    }

    /// Current user-facing text wrap style.
    pub fn user_wrap(&self) -> TextWrapStyle {
        *self.user_wrap.lock().unwrap()
    }
}

#[async_trait]
impl Subsystem for ScriptsSubsystem {
    fn name(&self) -> &'static str {
        "scripts"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let caches = self.caches.lock().unwrap();
        let blob = ScriptsBlob {
            room_vms: caches.rooms.iter().copied().collect(),
            mob_vms: caches.mobs.iter().cloned().collect(),
            item_vms: caches.items.iter().cloned().collect(),
            user_text_wrap: *self.user_wrap.lock().unwrap(),
            room_text_wrap: *self.room_wrap.lock().unwrap(),
            saved_at: SystemTime::now(),
        };
        drop(caches);

        let bytes = serde_json::to_vec(&blob).map_err(SubsystemError::Encode)?;
        snapshot::write_blob(&self.cfg, self.name(), &bytes)?;
        Ok(GatherOutcome::Saved)
    }

    async fn restore(&self) -> Result<(), SubsystemError> {
        let Some(bytes) = snapshot::read_blob(&self.cfg, self.name())? else {
            return Ok(());
        };
        let blob: ScriptsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;

        // VMs themselves recreate on demand; only the inventory and the
        // wrap styles carry over.
        let mut caches = self.caches.lock().unwrap();
        caches.rooms = blob.room_vms.into_iter().collect();
        caches.mobs = blob.mob_vms.into_iter().collect();
        caches.items = blob.item_vms.into_iter().collect();
        drop(caches);
        *self.user_wrap.lock().unwrap() = blob.user_text_wrap;
        *self.room_wrap.lock().unwrap() = blob.room_text_wrap;

        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
