//! # Copyover-preserving subsystems.
//!
//! Each game system that owns transient in-memory state registers here:
//! combat, in-flight spells, parties, the economy, room runtime state, the
//! game-event queue, script VM caches, pet/charm relations, quest timers,
//! and auctions. Every subsystem owns its own blob file and schema; the
//! engine only drives the fan-out.
//!
//! [`register_defaults`] wires the nine world-backed subsystems into a
//! registry. Auctions follows the module pattern instead: it carries its
//! own live state and is constructed and registered by the embedding
//! server (see [`auctions::AuctionsSubsystem`]).

pub mod auctions;
pub mod combat;
pub mod economy;
pub mod event_queue;
pub mod parties;
pub mod pets;
pub mod quests;
pub mod rooms;
pub mod scripts;
pub mod spells;

use std::sync::Arc;

use crate::config::Config;
use crate::error::CopyoverError;
use crate::registry::SubsystemRegistry;
use crate::world::GameWorld;

/// Registers the world-backed subsystems in their canonical order.
pub fn register_defaults(
    registry: &SubsystemRegistry,
    world: Arc<GameWorld>,
    cfg: Config,
) -> Result<(), CopyoverError> {
    registry.register(combat::CombatSubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(rooms::RoomsSubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(event_queue::EventQueueSubsystem::new(
        Arc::clone(&world),
        cfg.clone(),
    ))?;
    registry.register(scripts::ScriptsSubsystem::new(cfg.clone()))?;
    registry.register(economy::EconomySubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(parties::PartiesSubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(pets::PetsSubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(quests::QuestsSubsystem::new(Arc::clone(&world), cfg.clone()))?;
    registry.register(spells::SpellsSubsystem::new(world, cfg))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registration_order_is_stable() {
        let registry = SubsystemRegistry::new();
        let world = Arc::new(GameWorld::new());
        register_defaults(&registry, world, Config::default()).unwrap();
        assert_eq!(
            registry.names(),
            vec![
                "combat",
                "rooms",
                "event_queue",
                "scripts",
                "economy",
                "parties",
                "pets",
                "quests",
                "spells",
            ]
        );
    }

    #[test]
    fn double_registration_is_rejected() {
        let registry = SubsystemRegistry::new();
        let world = Arc::new(GameWorld::new());
        register_defaults(&registry, Arc::clone(&world), Config::default()).unwrap();
        assert!(register_defaults(&registry, world, Config::default()).is_err());
    }
}
