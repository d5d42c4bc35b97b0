//! Errors raised by the engine and the spellcasting resolver.
//!
//! Every rejected operation leaves state exactly as it was.

use crate::actions::ActionCost;
use crate::combatant::CombatantId;
use crate::dice::DiceError;
use crate::encounter::{EncounterId, Phase};
use crate::preset::PresetError;
use crate::spells::SpellId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CombatError {
    // Not found
    #[error("Encounter not found: {0}")]
    EncounterNotFound(EncounterId),

    #[error("Combatant not found: {0}")]
    CombatantNotFound(CombatantId),

    #[error("Spell not found: {0}")]
    SpellNotFound(SpellId),

    #[error("Combatant {0} is not a spellcaster")]
    NotASpellcaster(CombatantId),

    // Illegal state
    #[error("Cannot {operation} during the {phase} phase")]
    InvalidPhase { operation: &'static str, phase: Phase },

    #[error("Encounter has no combatants")]
    NoCombatants,

    #[error("It is not {0}'s turn")]
    NotCombatantsTurn(CombatantId),

    #[error("Combatant {combatant} has no {cost} left this turn")]
    ActionUnavailable {
        combatant: CombatantId,
        cost: ActionCost,
    },

    #[error("Combatant {0} cannot act")]
    Incapacitated(CombatantId),

    #[error("Move needs {needed} ft but only {remaining} ft remain")]
    InsufficientMovement { needed: u32, remaining: u32 },

    #[error("Position ({x}, {y}) is outside the battlefield")]
    OutOfBounds { x: i32, y: i32 },

    #[error("No level {level} spell slot available")]
    NoSpellSlot { level: u8 },

    #[error("Cannot cast a level {spell_level} spell at level {requested}")]
    InvalidCastLevel { spell_level: u8, requested: u8 },

    #[error("Spell not known: {0}")]
    SpellNotKnown(SpellId),

    #[error("Spell not prepared: {0}")]
    SpellNotPrepared(SpellId),

    #[error("Casting time of {0} is too long for combat")]
    CastingTimeTooLong(SpellId),

    // Validation
    #[error("Too many targets: at most {max}, got {given}")]
    TooManyTargets { max: usize, given: usize },

    #[error("Target {target} is {distance} ft away, beyond {range} ft")]
    TargetOutOfRange {
        target: CombatantId,
        distance: u32,
        range: u32,
    },

    #[error("Requirement not met: {0}")]
    RequirementNotMet(String),

    // Wrapped
    #[error("Dice error: {0}")]
    Dice(#[from] DiceError),

    #[error("Preset error: {0}")]
    Preset(#[from] PresetError),
}

pub type Result<T> = std::result::Result<T, CombatError>;
