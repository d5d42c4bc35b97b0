//! Status effects attached to combatants.
//!
//! Conditions are generic: a name, a duration in rounds, the effects they
//! carry while active and an optional saving throw that ends them. The
//! [`ConditionManager`] applies them and advances them at turn boundaries.

use crate::actions::{Effect, Stat};
use crate::combatant::{Ability, Combatant, CombatantId};
use crate::dice::{DiceExpression, DiceResolver, RollOptions};
use crate::resolver::{apply_damage, apply_healing, roll_save};
use crate::spells::SpellId;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Name of the condition applied when a combatant drops to 0 HP.
pub const UNCONSCIOUS: &str = "Unconscious";

/// When a save-ends condition offers its saving throw.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveTiming {
    StartOfTurn,
    EndOfTurn,
    /// Rolled once, as the condition is applied.
    Immediate,
}

/// "Ends on a successful save" rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveEnds {
    pub ability: Ability,
    /// Zero means the caster's spell save DC, filled in when a spell applies it.
    pub dc: i32,
    pub timing: SaveTiming,
}

/// Ties a condition to the concentration that sustains it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationLink {
    pub caster: CombatantId,
    pub spell: SpellId,
}

/// A condition applied to a combatant with tracking info.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CombatCondition {
    pub name: String,
    /// Remaining rounds; `None` lasts until removed.
    pub duration_rounds: Option<u32>,
    pub source: String,
    pub effects: Vec<Effect>,
    pub incapacitating: bool,
    pub save_ends: Option<SaveEnds>,
    pub concentration: Option<ConcentrationLink>,
}

impl CombatCondition {
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            duration_rounds: None,
            source: source.into(),
            effects: Vec::new(),
            incapacitating: false,
            save_ends: None,
            concentration: None,
        }
    }

    /// The condition every combatant gets at 0 HP.
    pub fn unconscious(source: impl Into<String>) -> Self {
        Self::new(UNCONSCIOUS, source).incapacitating()
    }

    pub fn with_duration(mut self, rounds: u32) -> Self {
        self.duration_rounds = Some(rounds);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn incapacitating(mut self) -> Self {
        self.incapacitating = true;
        self
    }

    pub fn ends_on_save(mut self, ability: Ability, dc: i32, timing: SaveTiming) -> Self {
        self.save_ends = Some(SaveEnds {
            ability,
            dc,
            timing,
        });
        self
    }

    pub fn linked_to(mut self, caster: CombatantId, spell: SpellId) -> Self {
        self.concentration = Some(ConcentrationLink { caster, spell });
        self
    }

    pub fn is_indefinite(&self) -> bool {
        self.duration_rounds.is_none()
    }

    pub fn stat_changes(&self) -> impl Iterator<Item = (Stat, i32)> + '_ {
        self.effects.iter().filter_map(|e| match e {
            Effect::StatChange { stat, delta } => Some((*stat, *delta)),
            _ => None,
        })
    }

    fn outlasts(&self, other: &CombatCondition) -> bool {
        match (self.duration_rounds, other.duration_rounds) {
            (None, _) => true,
            (Some(_), None) => false,
            (Some(a), Some(b)) => a > b,
        }
    }
}

/// Something that happened to a combatant's conditions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionChange {
    Applied { name: String },
    /// Removed by an effect or by the end of concentration.
    Removed { name: String },
    Expired { name: String },
    /// A save-ends saving throw succeeded and the condition ended.
    SavedAgainst { name: String, roll: i32, dc: i32 },
    /// An immediate save succeeded so the condition never took hold.
    Resisted { name: String, roll: i32, dc: i32 },
    OngoingDamage { name: String, amount: i32 },
    OngoingHealing { name: String, amount: i32 },
}

impl ConditionChange {
    /// Condition newly present on the combatant.
    pub fn applied_name(&self) -> Option<&str> {
        match self {
            ConditionChange::Applied { name } => Some(name),
            _ => None,
        }
    }

    /// Condition no longer present on the combatant.
    pub fn removed_name(&self) -> Option<&str> {
        match self {
            ConditionChange::Removed { name }
            | ConditionChange::Expired { name }
            | ConditionChange::SavedAgainst { name, .. } => Some(name),
            _ => None,
        }
    }
}

/// Attaches, advances and expires conditions.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConditionManager;

impl ConditionManager {
    pub fn new() -> Self {
        Self
    }

    /// Attach a condition. A same-named condition is replaced only when the
    /// new one lasts longer.
    pub fn apply(
        &self,
        target: &mut Combatant,
        condition: CombatCondition,
        dice: &mut DiceResolver,
    ) -> Vec<ConditionChange> {
        if let Some(save) = condition.save_ends {
            if save.timing == SaveTiming::Immediate {
                let outcome = roll_save(target, save.ability, save.dc, dice);
                if outcome.success {
                    debug!(target = %target.name, condition = %condition.name, "condition resisted");
                    return vec![ConditionChange::Resisted {
                        name: condition.name,
                        roll: outcome.roll.total,
                        dc: save.dc,
                    }];
                }
            }
        }

        match target
            .conditions
            .iter_mut()
            .find(|c| c.name.eq_ignore_ascii_case(&condition.name))
        {
            Some(existing) => {
                if condition.outlasts(existing) {
                    *existing = condition;
                }
                Vec::new()
            }
            None => {
                let name = condition.name.clone();
                target.conditions.push(condition);
                vec![ConditionChange::Applied { name }]
            }
        }
    }

    pub fn remove(&self, target: &mut Combatant, name: &str) -> Option<CombatCondition> {
        let idx = target
            .conditions
            .iter()
            .position(|c| c.name.eq_ignore_ascii_case(name))?;
        Some(target.conditions.remove(idx))
    }

    pub fn has(&self, target: &Combatant, name: &str) -> bool {
        target.has_condition(name)
    }

    /// Remove every condition sustained by `caster`'s concentration on `spell`.
    pub fn remove_linked(
        &self,
        target: &mut Combatant,
        caster: CombatantId,
        spell: &SpellId,
    ) -> Vec<ConditionChange> {
        let mut removed = Vec::new();
        target.conditions.retain(|c| match &c.concentration {
            Some(link) if link.caster == caster && &link.spell == spell => {
                removed.push(ConditionChange::Removed {
                    name: c.name.clone(),
                });
                false
            }
            _ => true,
        });
        removed
    }

    /// Ongoing effects fire, then start-of-turn saves are rolled.
    pub fn start_of_turn(
        &self,
        target: &mut Combatant,
        dice: &mut DiceResolver,
    ) -> Vec<ConditionChange> {
        let mut changes = Vec::new();

        let ongoing: Vec<(String, Effect)> = target
            .conditions
            .iter()
            .flat_map(|c| c.effects.iter().map(move |e| (c.name.clone(), e.clone())))
            .collect();
        for (name, effect) in ongoing {
            match effect {
                Effect::Damage { dice: notation, halved, .. } => {
                    let Ok(expr) = DiceExpression::parse(&notation) else {
                        continue;
                    };
                    let mut amount = dice.roll(&expr, &RollOptions::default()).total.max(0);
                    if halved {
                        amount /= 2;
                    }
                    let taken = apply_damage(target, amount, &name);
                    changes.push(ConditionChange::OngoingDamage { name, amount });
                    if taken.dropped_to_zero {
                        changes.push(ConditionChange::Applied {
                            name: UNCONSCIOUS.to_string(),
                        });
                    }
                }
                Effect::Healing { dice: notation } => {
                    let Ok(expr) = DiceExpression::parse(&notation) else {
                        continue;
                    };
                    let amount = dice.roll(&expr, &RollOptions::default()).total.max(0);
                    let (restored, revived) = apply_healing(target, amount);
                    changes.push(ConditionChange::OngoingHealing {
                        name,
                        amount: restored,
                    });
                    if revived {
                        changes.push(ConditionChange::Removed {
                            name: UNCONSCIOUS.to_string(),
                        });
                    }
                }
                Effect::TemporaryHitPoints { amount } => target.hit_points.add_temp_hp(amount),
                Effect::Condition(_)
                | Effect::RemoveCondition(_)
                | Effect::StatChange { .. }
                | Effect::Special { .. } => {}
            }
        }

        changes.extend(self.roll_timed_saves(target, SaveTiming::StartOfTurn, dice));
        changes
    }

    /// End-of-turn saves are rolled, then durations tick down and expire.
    pub fn end_of_turn(
        &self,
        target: &mut Combatant,
        dice: &mut DiceResolver,
    ) -> Vec<ConditionChange> {
        let mut changes = self.roll_timed_saves(target, SaveTiming::EndOfTurn, dice);

        for condition in &mut target.conditions {
            if let Some(rounds) = condition.duration_rounds.as_mut() {
                *rounds = rounds.saturating_sub(1);
            }
        }
        target.conditions.retain(|c| {
            if c.duration_rounds == Some(0) {
                changes.push(ConditionChange::Expired {
                    name: c.name.clone(),
                });
                false
            } else {
                true
            }
        });
        changes
    }

    fn roll_timed_saves(
        &self,
        target: &mut Combatant,
        timing: SaveTiming,
        dice: &mut DiceResolver,
    ) -> Vec<ConditionChange> {
        let due: Vec<(String, SaveEnds)> = target
            .conditions
            .iter()
            .filter_map(|c| match c.save_ends {
                Some(save) if save.timing == timing => Some((c.name.clone(), save)),
                _ => None,
            })
            .collect();

        let mut changes = Vec::new();
        for (name, save) in due {
            let outcome = roll_save(target, save.ability, save.dc, dice);
            if outcome.success {
                self.remove(target, &name);
                changes.push(ConditionChange::SavedAgainst {
                    name,
                    roll: outcome.roll.total,
                    dc: save.dc,
                });
            }
        }
        changes
    }
}
