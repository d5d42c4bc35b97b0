//! D&D 5e tactical combat and spellcasting rules engine.
//!
//! This crate provides:
//! - Dice expressions with advantage, criticals, exploding dice and rerolls
//! - Attack, damage and saving-throw resolution with selectable critical rules
//! - Conditions with durations, save-ends and ongoing effects
//! - An encounter state machine: initiative, turns, action economy, victory
//! - Spell slots, upcasting and concentration
//! - A typed event bus for observers
//!
//! # Quick Start
//!
//! ```
//! use dnd_rules::testing::{sample_goblin, sample_hero};
//! use dnd_rules::{CombatEngine, RulePreset};
//!
//! let hero = sample_hero();
//! let goblin = sample_goblin();
//! let longsword = hero.actions[0].clone();
//!
//! let mut engine = CombatEngine::seeded(42);
//! let id = engine.create_encounter("Ambush", vec![hero, goblin.clone()], RulePreset::standard());
//! engine.dice_mut().supply([15, 12]);
//! engine.roll_initiative(id)?;
//!
//! engine.dice_mut().supply([12, 5]);
//! let results = engine.execute_action(id, &longsword, &[goblin.id])?;
//! assert_eq!(results[0].total_damage, 8);
//! # Ok::<(), dnd_rules::CombatError>(())
//! ```

pub mod actions;
pub mod combatant;
pub mod conditions;
pub mod dice;
pub mod encounter;
pub mod engine;
pub mod error;
pub mod events;
pub mod preset;
pub mod repository;
pub mod resolver;
pub mod spellcasting;
pub mod spells;
pub mod testing;

// Primary public API
pub use actions::{ActionCost, AttackSpec, CombatAction, DamageType, Effect, Requirement, SaveSpec};
pub use combatant::{Ability, AbilityScores, Combatant, CombatantId, HitPoints, Position, Team};
pub use conditions::{CombatCondition, ConditionChange, ConditionManager, SaveTiming};
pub use dice::{Advantage, DiceError, DiceExpression, DiceResolver, RollOptions, RollResult};
pub use encounter::{
    Battlefield, CombatEncounter, EncounterId, EncounterOutcome, EncounterSetup, Phase, Roster,
    VictoryCondition,
};
pub use engine::CombatEngine;
pub use error::{CombatError, Result};
pub use events::{CombatEvent, EventBus, EventKind, EventRecord};
pub use preset::{CriticalRule, DiagonalMovement, InitiativeVariant, RulePreset};
pub use repository::{InMemoryRepository, Repository};
pub use resolver::{ActionResolver, AttackResult};
pub use spellcasting::{SpellCastResult, Spellcaster, SpellcastingResolver};
pub use spells::{Spell, SpellBook, SpellId};
