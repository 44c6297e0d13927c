//! # Quest timers across copyover.
//!
//! Quest deadlines live as named round timers on the character; only the
//! `quest`-prefixed ones belong to this subsystem. Timers for users who do
//! not come back are dropped with a warning.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::Config;
use crate::error::SubsystemError;
use crate::registry::{GatherOutcome, Subsystem};
use crate::snapshot;
use crate::world::{GameWorld, RoundTimer, UserId};

const QUEST_TIMER_PREFIX: &str = "quest";

#[derive(Serialize, Deserialize)]
struct CharacterQuestTimers {
    user_id: UserId,
    timers: HashMap<String, RoundTimer>,
}

#[derive(Serialize, Deserialize)]
struct QuestsBlob {
    character_timers: Vec<CharacterQuestTimers>,
    saved_at: SystemTime,
}

/// Quest-timer participant in the copyover fan-out.
pub struct QuestsSubsystem {
    world: Arc<GameWorld>,
    cfg: Config,
}

impl QuestsSubsystem {
    /// Creates the subsystem over the shared world.
    pub fn new(world: Arc<GameWorld>, cfg: Config) -> Arc<Self> {
        Arc::new(Self { world, cfg })
    }

    fn collect(&self) -> QuestsBlob {
        let mut blob = QuestsBlob {
            character_timers: Vec::new(),
            saved_at: SystemTime::now(),
        };

        for user_id in self.world.resident_user_ids() {
            let Some(user) = self.world.user(user_id) else {
                continue;
            };
            let timers: HashMap<String, RoundTimer> = user
                .timers
                .into_iter()
                .filter(|(name, _)| name.starts_with(QUEST_TIMER_PREFIX))
                .collect();
            if !timers.is_empty() {
                blob.character_timers
                    .push(CharacterQuestTimers { user_id, timers });
            }
        }

        blob
    }

    fn apply(&self, blob: QuestsBlob) {
        for char_timers in blob.character_timers {
            let applied = self.world.update_user(char_timers.user_id, |user| {
                user.timers.extend(char_timers.timers.clone());
            });
            if !applied {
                tracing::warn!(user = char_timers.user_id, "quest restore: user not resident");
            }
        }
    }
}

#[async_trait]
impl Subsystem for QuestsSubsystem {
    fn name(&self) -> &'static str {
        "quests"
    }

    async fn gather(&self) -> Result<GatherOutcome, SubsystemError> {
        let blob = self.collect();
        if blob.character_timers.is_empty() {
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
        let blob: QuestsBlob = serde_json::from_slice(&bytes).map_err(SubsystemError::Decode)?;
        self.apply(blob);
        snapshot::remove_blob(&self.cfg, self.name());
        Ok(())
    }
}
