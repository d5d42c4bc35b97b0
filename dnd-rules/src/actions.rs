//! Combat action templates.
//!
//! A [`CombatAction`] is an immutable description of something a combatant
//! can do on its turn: what it costs, whether it rolls to hit, what damage
//! it deals and which saving throw it forces. The rules data behind it is
//! supplied by a collaborator; the engine only reads it.

use crate::combatant::Ability;
use crate::conditions::CombatCondition;
use crate::dice::{Advantage, DiceError, DiceExpression};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Common D&D damage types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DamageType {
    Slashing,
    Piercing,
    Bludgeoning,
    Fire,
    Cold,
    Lightning,
    Thunder,
    Acid,
    Poison,
    Necrotic,
    Radiant,
    Force,
    Psychic,
}

impl DamageType {
    pub fn name(&self) -> &'static str {
        match self {
            DamageType::Slashing => "slashing",
            DamageType::Piercing => "piercing",
            DamageType::Bludgeoning => "bludgeoning",
            DamageType::Fire => "fire",
            DamageType::Cold => "cold",
            DamageType::Lightning => "lightning",
            DamageType::Thunder => "thunder",
            DamageType::Acid => "acid",
            DamageType::Poison => "poison",
            DamageType::Necrotic => "necrotic",
            DamageType::Radiant => "radiant",
            DamageType::Force => "force",
            DamageType::Psychic => "psychic",
        }
    }
}

impl fmt::Display for DamageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Which slice of the action economy an action consumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActionCost {
    Action,
    BonusAction,
    Reaction,
    /// Feet of movement.
    Movement(u32),
    Free,
}

impl fmt::Display for ActionCost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionCost::Action => write!(f, "action"),
            ActionCost::BonusAction => write!(f, "bonus action"),
            ActionCost::Reaction => write!(f, "reaction"),
            ActionCost::Movement(feet) => write!(f, "{feet} ft of movement"),
            ActionCost::Free => write!(f, "free"),
        }
    }
}

/// Derived statistics a condition can modify.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Stat {
    ArmorClass,
    Speed,
    AttackRolls,
    SavingThrows,
}

/// One piece of an action's, spell's or condition's outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Effect {
    /// Roll and deal damage. `halved` rounds the rolled total down.
    Damage {
        dice: String,
        damage_type: DamageType,
        halved: bool,
    },
    /// Roll and restore hit points.
    Healing { dice: String },
    /// Grant temporary hit points.
    TemporaryHitPoints { amount: i32 },
    /// Attach a condition to the target.
    Condition(CombatCondition),
    /// Remove a named condition from the target.
    RemoveCondition(String),
    /// Adjust a derived stat. Only meaningful inside a condition's effect list.
    StatChange { stat: Stat, delta: i32 },
    /// Narrative-only effect for rules the engine doesn't model.
    Special { description: String },
}

impl Effect {
    pub fn damage(dice: impl Into<String>, damage_type: DamageType) -> Self {
        Effect::Damage {
            dice: dice.into(),
            damage_type,
            halved: false,
        }
    }

    pub fn half_damage(dice: impl Into<String>, damage_type: DamageType) -> Self {
        Effect::Damage {
            dice: dice.into(),
            damage_type,
            halved: true,
        }
    }

    pub fn healing(dice: impl Into<String>) -> Self {
        Effect::Healing { dice: dice.into() }
    }

    /// Check every dice string this effect would roll.
    pub fn validate(&self) -> Result<(), DiceError> {
        match self {
            Effect::Damage { dice, .. } | Effect::Healing { dice } => {
                DiceExpression::parse(dice).map(|_| ())
            }
            Effect::Condition(condition) => condition.effects.iter().try_for_each(Effect::validate),
            Effect::TemporaryHitPoints { .. }
            | Effect::RemoveCondition(_)
            | Effect::StatChange { .. }
            | Effect::Special { .. } => Ok(()),
        }
    }
}

/// Attack roll specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttackSpec {
    pub bonus: i32,
    pub advantage: Advantage,
    /// Melee attacks can benefit from flanking.
    pub melee: bool,
}

impl AttackSpec {
    pub fn melee(bonus: i32) -> Self {
        Self {
            bonus,
            advantage: Advantage::Normal,
            melee: true,
        }
    }

    pub fn ranged(bonus: i32) -> Self {
        Self {
            bonus,
            advantage: Advantage::Normal,
            melee: false,
        }
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }
}

/// One damage component of an action (e.g. `1d8+3` slashing).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageSpec {
    pub dice: String,
    pub damage_type: DamageType,
}

impl DamageSpec {
    pub fn new(dice: impl Into<String>, damage_type: DamageType) -> Self {
        Self {
            dice: dice.into(),
            damage_type,
        }
    }
}

/// A saving throw the target must make.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SaveSpec {
    pub ability: Ability,
    pub dc: i32,
    pub on_success: Vec<Effect>,
    pub on_failure: Vec<Effect>,
}

impl SaveSpec {
    pub fn new(ability: Ability, dc: i32) -> Self {
        Self {
            ability,
            dc,
            on_success: Vec::new(),
            on_failure: Vec::new(),
        }
    }

    pub fn on_success(mut self, effect: Effect) -> Self {
        self.on_success.push(effect);
        self
    }

    pub fn on_failure(mut self, effect: Effect) -> Self {
        self.on_failure.push(effect);
        self
    }
}

/// Preconditions checked before an action's cost is paid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Requirement {
    /// Every target must be within this many feet.
    WithinRange(u32),
    ActorHasCondition(String),
    ActorLacksCondition(String),
}

/// An action template: cost, attack roll, damage, saving throw, extra effects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatAction {
    pub name: String,
    pub cost: ActionCost,
    pub attack: Option<AttackSpec>,
    pub damage: Vec<DamageSpec>,
    pub saving_throw: Option<SaveSpec>,
    /// Applied on a hit, or unconditionally when there is no attack roll.
    pub effects: Vec<Effect>,
    pub requirements: Vec<Requirement>,
}

impl CombatAction {
    pub fn new(name: impl Into<String>, cost: ActionCost) -> Self {
        Self {
            name: name.into(),
            cost,
            attack: None,
            damage: Vec::new(),
            saving_throw: None,
            effects: Vec::new(),
            requirements: Vec::new(),
        }
    }

    /// A typical weapon attack: one attack roll and one damage component.
    pub fn weapon(
        name: impl Into<String>,
        attack: AttackSpec,
        damage: impl Into<String>,
        damage_type: DamageType,
    ) -> Self {
        Self::new(name, ActionCost::Action)
            .with_attack(attack)
            .with_damage(damage, damage_type)
    }

    pub fn with_attack(mut self, attack: AttackSpec) -> Self {
        self.attack = Some(attack);
        self
    }

    pub fn with_damage(mut self, dice: impl Into<String>, damage_type: DamageType) -> Self {
        self.damage.push(DamageSpec::new(dice, damage_type));
        self
    }

    pub fn with_save(mut self, save: SaveSpec) -> Self {
        self.saving_throw = Some(save);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_requirement(mut self, requirement: Requirement) -> Self {
        self.requirements.push(requirement);
        self
    }

    /// Reach/range in feet if the action declares one.
    pub fn range(&self) -> Option<u32> {
        self.requirements.iter().find_map(|r| match r {
            Requirement::WithinRange(feet) => Some(*feet),
            _ => None,
        })
    }

    /// Parse every dice string up front so resolution cannot fail halfway.
    pub fn validate(&self) -> Result<(), DiceError> {
        for spec in &self.damage {
            DiceExpression::parse(&spec.dice)?;
        }
        if let Some(save) = &self.saving_throw {
            save.on_success.iter().try_for_each(Effect::validate)?;
            save.on_failure.iter().try_for_each(Effect::validate)?;
        }
        self.effects.iter().try_for_each(Effect::validate)
    }

    /// Whether resolving this action against a target does anything.
    pub fn targets_something(&self) -> bool {
        self.attack.is_some()
            || !self.damage.is_empty()
            || self.saving_throw.is_some()
            || !self.effects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weapon_builder() {
        let action = CombatAction::weapon(
            "Longsword",
            AttackSpec::melee(5),
            "1d8+3",
            DamageType::Slashing,
        )
        .with_requirement(Requirement::WithinRange(5));
        assert_eq!(action.cost, ActionCost::Action);
        assert_eq!(action.range(), Some(5));
        assert!(action.validate().is_ok());
        assert!(action.targets_something());
    }

    #[test]
    fn test_validate_catches_bad_dice() {
        let action = CombatAction::new("Broken", ActionCost::Action)
            .with_save(SaveSpec::new(Ability::Dexterity, 13).on_failure(Effect::damage("2dq", DamageType::Fire)));
        assert!(action.validate().is_err());
    }

    #[test]
    fn test_dash_targets_nothing() {
        let dash = CombatAction::new("Dash", ActionCost::Action);
        assert!(!dash.targets_something());
        assert_eq!(dash.range(), None);
    }
}
