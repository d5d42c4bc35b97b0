//! Resolution of one action against one target.
//!
//! Attack rolls against armor class, damage composition under the
//! encounter's critical-hit rule, saving throws and their effect branches.
//! Everything here is synchronous: dice are rolled (or taken from the
//! supplied queue) and the target is mutated before the call returns.

use crate::actions::{CombatAction, DamageType, Effect};
use crate::combatant::{Ability, Combatant, CombatantId, DamageTaken};
use crate::conditions::{CombatCondition, ConditionChange, ConditionManager, UNCONSCIOUS};
use crate::dice::{Advantage, DiceError, DiceExpression, DiceResolver, RollOptions, RollResult};
use crate::preset::{CriticalRule, RulePreset};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Outcome of a saving throw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    pub ability: Ability,
    pub dc: i32,
    pub roll: RollResult,
    pub success: bool,
}

/// Output of one action-vs-target resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AttackResult {
    pub target_id: CombatantId,
    /// True when the action landed: the attack roll hit, or there was no attack roll.
    pub hit: bool,
    pub critical: bool,
    pub attack_roll: Option<RollResult>,
    pub damage_rolls: Vec<RollResult>,
    pub save: Option<SaveOutcome>,
    pub total_damage: i32,
    pub damage_by_type: BTreeMap<DamageType, i32>,
    pub damage_taken: Option<DamageTaken>,
    pub healing: i32,
    pub conditions: Vec<ConditionChange>,
}

impl AttackResult {
    pub(crate) fn new(target_id: CombatantId) -> Self {
        Self {
            target_id,
            hit: false,
            critical: false,
            attack_roll: None,
            damage_rolls: Vec::new(),
            save: None,
            total_damage: 0,
            damage_by_type: BTreeMap::new(),
            damage_taken: None,
            healing: 0,
            conditions: Vec::new(),
        }
    }

    pub fn dropped_to_zero(&self) -> bool {
        self.damage_taken.is_some_and(|d| d.dropped_to_zero)
    }

    pub fn conditions_applied(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(ConditionChange::applied_name)
    }

    pub fn conditions_removed(&self) -> impl Iterator<Item = &str> {
        self.conditions.iter().filter_map(ConditionChange::removed_name)
    }

    /// Every dice roll behind this result, attack first.
    pub fn rolls(&self) -> impl Iterator<Item = &RollResult> {
        self.attack_roll
            .iter()
            .chain(self.save.iter().map(|s| &s.roll))
            .chain(self.damage_rolls.iter())
    }

    pub(crate) fn add_damage(&mut self, damage_type: DamageType, amount: i32) {
        *self.damage_by_type.entry(damage_type).or_insert(0) += amount;
        self.total_damage += amount;
    }
}

/// Roll a saving throw for `target`.
pub fn roll_save(
    target: &Combatant,
    ability: Ability,
    dc: i32,
    dice: &mut DiceResolver,
) -> SaveOutcome {
    let bonus = target.saving_throw_modifier(ability) + target.save_bonus_from_conditions();
    let roll = dice.d20(bonus, Advantage::Normal);
    let success = roll.meets_dc(dc);
    SaveOutcome {
        ability,
        dc,
        roll,
        success,
    }
}

/// Roll one damage expression, applying `rule` when `critical` is set.
///
/// Returns the roll and the damage it deals.
pub fn roll_damage(
    expr: &DiceExpression,
    critical: bool,
    rule: CriticalRule,
    dice: &mut DiceResolver,
) -> (RollResult, i32) {
    let options = RollOptions::default();
    if !critical {
        let roll = dice.roll(expr, &options);
        let amount = roll.total.max(0);
        return (roll, amount);
    }
    match rule {
        CriticalRule::DoubleDice => {
            let roll = dice.roll(&expr.doubled_dice(), &options);
            let amount = roll.total.max(0);
            (roll, amount)
        }
        CriticalRule::DoubleDamage => {
            let roll = dice.roll(expr, &options);
            let amount = roll.total.max(0) * 2;
            (roll, amount)
        }
        CriticalRule::MaxDamagePlusRoll => {
            let roll = dice.roll(expr, &options);
            let amount = (roll.total + expr.max_dice_total()).max(0);
            (roll, amount)
        }
    }
}

/// Apply damage: temporary HP first, current HP floors at zero, and a
/// combatant reaching zero falls unconscious.
/// Whether an attack roll beats `armor_class`.
///
/// With `natural_rolls_automatic`, a natural 1 always misses and a
/// critical always hits; otherwise only the total counts.
pub fn attack_hits(roll: &RollResult, armor_class: i32, natural_rolls_automatic: bool) -> bool {
    if natural_rolls_automatic {
        !roll.is_fumble() && (roll.is_critical() || roll.total >= armor_class)
    } else {
        roll.total >= armor_class
    }
}

pub fn apply_damage(target: &mut Combatant, amount: i32, source: &str) -> DamageTaken {
    let taken = target.hit_points.take_damage(amount);
    if taken.dropped_to_zero && !target.has_condition(UNCONSCIOUS) {
        target.conditions.push(CombatCondition::unconscious(source));
    }
    taken
}

/// Heal up to maximum. Returns the HP restored and whether the target woke up.
pub fn apply_healing(target: &mut Combatant, amount: i32) -> (i32, bool) {
    let restored = target.hit_points.heal(amount);
    let mut revived = false;
    if target.hit_points.current > 0 && target.has_condition(UNCONSCIOUS) {
        target
            .conditions
            .retain(|c| !c.name.eq_ignore_ascii_case(UNCONSCIOUS));
        revived = true;
    }
    (restored, revived)
}

/// Resolves an action from one combatant against one target.
pub struct ActionResolver<'a> {
    rules: &'a RulePreset,
}

impl<'a> ActionResolver<'a> {
    pub fn new(rules: &'a RulePreset) -> Self {
        Self { rules }
    }

    /// Resolve `action` from `actor` against `target`.
    ///
    /// `situational` is combined with the attack's own advantage (flanking,
    /// for instance). Returns `Ok(None)` when the action does nothing to a target.
    pub fn resolve(
        &self,
        actor: &Combatant,
        target: &mut Combatant,
        action: &CombatAction,
        situational: Advantage,
        dice: &mut DiceResolver,
    ) -> Result<Option<AttackResult>, DiceError> {
        if !action.targets_something() {
            return Ok(None);
        }

        let mut result = AttackResult::new(target.id);

        match action.attack {
            Some(attack) => {
                let options = RollOptions::new()
                    .with_bonus(attack.bonus + actor.attack_bonus_from_conditions())
                    .with_advantage(attack.advantage.combine(situational))
                    .with_critical_threshold(self.rules.critical_threshold);
                let roll = dice.roll(&DiceExpression::d20(0), &options);
                let armor_class = target.effective_armor_class();

                result.critical = roll.is_critical();
                result.hit = attack_hits(&roll, armor_class, self.rules.natural_rolls_automatic);
                debug!(
                    actor = %actor.name,
                    target = %target.name,
                    roll = roll.total,
                    armor_class,
                    hit = result.hit,
                    critical = result.critical,
                    "attack roll"
                );
                result.attack_roll = Some(roll);
                if !result.hit {
                    result.critical = false;
                    return Ok(Some(result));
                }
            }
            None => result.hit = true,
        }

        for spec in &action.damage {
            let expr = DiceExpression::parse(&spec.dice)?;
            let (roll, amount) = roll_damage(&expr, result.critical, self.rules.critical_rule, dice);
            result.add_damage(spec.damage_type, amount);
            result.damage_rolls.push(roll);
        }

        let mut effects: Vec<&Effect> = Vec::new();
        if let Some(save) = &action.saving_throw {
            let outcome = roll_save(target, save.ability, save.dc, dice);
            effects.extend(if outcome.success {
                save.on_success.iter()
            } else {
                save.on_failure.iter()
            });
            result.save = Some(outcome);
        }

        // Action-level effects ride on the hit, so they crit along with it.
        let mut effect_crit = Vec::with_capacity(effects.len() + action.effects.len());
        effect_crit.extend(std::iter::repeat(false).take(effects.len()));
        effects.extend(action.effects.iter());
        effect_crit.extend(std::iter::repeat(result.critical).take(action.effects.len()));

        for (effect, critical) in effects.iter().zip(&effect_crit) {
            if let Effect::Damage {
                dice: notation,
                damage_type,
                halved,
            } = effect
            {
                let expr = DiceExpression::parse(notation)?;
                let (roll, mut amount) =
                    roll_damage(&expr, *critical, self.rules.critical_rule, dice);
                if *halved {
                    amount /= 2;
                }
                result.add_damage(*damage_type, amount);
                result.damage_rolls.push(roll);
            }
        }

        if result.total_damage > 0 {
            let taken = apply_damage(target, result.total_damage, &action.name);
            if taken.dropped_to_zero {
                result.conditions.push(ConditionChange::Applied {
                    name: UNCONSCIOUS.to_string(),
                });
            }
            result.damage_taken = Some(taken);
        }

        for effect in effects {
            apply_effect(target, effect, &mut result, dice)?;
        }

        Ok(Some(result))
    }
}

/// Apply a non-damage effect. Damage effects are rolled by the caller so
/// that all damage lands as one total.
pub(crate) fn apply_effect(
    target: &mut Combatant,
    effect: &Effect,
    result: &mut AttackResult,
    dice: &mut DiceResolver,
) -> Result<(), DiceError> {
    let conditions = ConditionManager::new();
    match effect {
        Effect::Damage { .. } => {}
        Effect::Healing { dice: notation } => {
            let expr = DiceExpression::parse(notation)?;
            let roll = dice.roll(&expr, &RollOptions::default());
            let (restored, revived) = apply_healing(target, roll.total.max(0));
            result.healing += restored;
            result.damage_rolls.push(roll);
            if revived {
                result.conditions.push(ConditionChange::Removed {
                    name: UNCONSCIOUS.to_string(),
                });
            }
        }
        Effect::TemporaryHitPoints { amount } => target.hit_points.add_temp_hp(*amount),
        Effect::Condition(condition) => {
            let changes = conditions.apply(target, condition.clone(), dice);
            result.conditions.extend(changes);
        }
        Effect::RemoveCondition(name) => {
            if let Some(removed) = conditions.remove(target, name) {
                result.conditions.push(ConditionChange::Removed { name: removed.name });
            }
        }
        Effect::StatChange { .. } | Effect::Special { .. } => {}
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::actions::{AttackSpec, SaveSpec};
    use crate::combatant::Team;

    fn hero() -> Combatant {
        Combatant::new("Hero", Team::Player).with_hit_points(30)
    }

    fn goblin() -> Combatant {
        Combatant::new("Goblin", Team::Enemy)
            .with_hit_points(20)
            .with_armor_class(13)
    }

    fn longsword() -> CombatAction {
        CombatAction::weapon("Longsword", AttackSpec::melee(5), "1d8+3", DamageType::Slashing)
    }

    #[test]
    fn test_hit_applies_damage() {
        let rules = RulePreset::default();
        let resolver = ActionResolver::new(&rules);
        let mut dice = DiceResolver::seeded(1);
        let (hero, mut goblin) = (hero(), goblin());

        dice.supply([12, 5]);
        let result = resolver
            .resolve(&hero, &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(result.hit);
        assert!(!result.critical);
        assert_eq!(result.attack_roll.as_ref().unwrap().total, 17);
        assert_eq!(result.total_damage, 8);
        assert_eq!(result.damage_by_type[&DamageType::Slashing], 8);
        assert_eq!(goblin.hit_points.current, 12);
    }

    #[test]
    fn test_miss_rolls_no_damage() {
        let rules = RulePreset::default();
        let resolver = ActionResolver::new(&rules);
        let mut dice = DiceResolver::seeded(1);
        let (hero, mut goblin) = (hero(), goblin());

        dice.supply([3, 8]);
        let result = resolver
            .resolve(&hero, &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(!result.hit);
        assert!(result.damage_rolls.is_empty());
        assert_eq!(goblin.hit_points.current, 20);
        assert_eq!(dice.pending_faces(), 1);
    }

    #[test]
    fn test_natural_one_misses_even_high_bonus() {
        let rules = RulePreset::default();
        let resolver = ActionResolver::new(&rules);
        let mut dice = DiceResolver::seeded(1);
        let mut goblin = goblin().with_armor_class(2);
        let action = CombatAction::weapon("Club", AttackSpec::melee(20), "1d4", DamageType::Bludgeoning);

        dice.supply([1]);
        let result = resolver
            .resolve(&hero(), &mut goblin, &action, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(!result.hit);
    }

    #[test]
    fn test_natural_rolls_only_count_their_total_when_disabled() {
        let rules = RulePreset::default().with_natural_rolls_automatic(false);
        let resolver = ActionResolver::new(&rules);
        let mut dice = DiceResolver::seeded(1);

        let mut soft = goblin().with_armor_class(2);
        let club = CombatAction::weapon("Club", AttackSpec::melee(20), "1d4", DamageType::Bludgeoning);
        dice.supply([1, 3]);
        let result = resolver
            .resolve(&hero(), &mut soft, &club, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(result.hit);
        assert_eq!(result.total_damage, 3);

        let mut armored = goblin().with_armor_class(30);
        let stick = CombatAction::weapon("Stick", AttackSpec::melee(0), "1d4", DamageType::Bludgeoning);
        dice.supply([20, 3]);
        let result = resolver
            .resolve(&hero(), &mut armored, &stick, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(!result.hit);
        assert!(!result.critical);
        assert_eq!(armored.hit_points.current, 20);
    }

    #[test]
    fn test_critical_rules() {
        let mut dice = DiceResolver::seeded(1);

        let rules = RulePreset::default().with_critical_rule(CriticalRule::DoubleDice);
        let mut goblin = goblin().with_hit_points(100);
        dice.supply([20, 4, 6]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(result.critical);
        assert_eq!(result.total_damage, 4 + 6 + 3);
        assert_eq!(result.damage_rolls[0].expression.to_string(), "2d8+3");

        let rules = RulePreset::default().with_critical_rule(CriticalRule::DoubleDamage);
        dice.supply([20, 4]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert_eq!(result.total_damage, 14);

        let rules = RulePreset::default().with_critical_rule(CriticalRule::MaxDamagePlusRoll);
        dice.supply([20, 4]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert_eq!(result.total_damage, 4 + 3 + 8);
    }

    #[test]
    fn test_critical_rule_applies_to_every_component() {
        let rules = RulePreset::default();
        let mut dice = DiceResolver::seeded(1);
        let mut goblin = goblin().with_hit_points(100);
        let flame_tongue = longsword().with_damage("2d6", DamageType::Fire);

        dice.supply([20, 1, 1, 2, 2, 3, 3]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &flame_tongue, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert_eq!(result.damage_by_type[&DamageType::Slashing], 1 + 1 + 3);
        assert_eq!(result.damage_by_type[&DamageType::Fire], 2 + 2 + 3 + 3);
        assert_eq!(result.total_damage, 15);
    }

    #[test]
    fn test_drop_to_zero_applies_unconscious() {
        let rules = RulePreset::default();
        let mut dice = DiceResolver::seeded(1);
        let mut goblin = goblin().with_hit_points(5);

        dice.supply([15, 8]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &longsword(), Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(result.dropped_to_zero());
        assert_eq!(goblin.hit_points.current, 0);
        assert!(goblin.has_condition(UNCONSCIOUS));
        assert!(!goblin.can_act());
    }

    #[test]
    fn test_save_branches_are_exclusive() {
        let rules = RulePreset::default();
        let mut dice = DiceResolver::seeded(1);
        let poison_spray = CombatAction::new("Stinking Cloud", crate::actions::ActionCost::Action).with_save(
            SaveSpec::new(Ability::Constitution, 13)
                .on_success(Effect::half_damage("2d6", DamageType::Poison))
                .on_failure(Effect::damage("2d6", DamageType::Poison))
                .on_failure(Effect::Condition(CombatCondition::new("Poisoned", "Cloud").with_duration(1))),
        );

        let mut goblin = goblin();
        dice.supply([4, 3, 5]);
        let failed = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &poison_spray, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(!failed.save.as_ref().unwrap().success);
        assert_eq!(failed.total_damage, 8);
        assert!(goblin.has_condition("Poisoned"));

        let mut goblin = self::goblin();
        dice.supply([16, 3, 5]);
        let saved = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin, &poison_spray, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert!(saved.save.as_ref().unwrap().success);
        assert_eq!(saved.total_damage, 4);
        assert!(!goblin.has_condition("Poisoned"));
    }

    #[test]
    fn test_healing_revives() {
        let rules = RulePreset::default();
        let mut dice = DiceResolver::seeded(1);
        let mut ally = Combatant::new("Ally", Team::Ally).with_hit_points(10);
        apply_damage(&mut ally, 15, "Ogre");
        assert!(ally.has_condition(UNCONSCIOUS));

        let potion = CombatAction::new("Healing Word", crate::actions::ActionCost::BonusAction)
            .with_effect(Effect::healing("1d4+2"));
        dice.supply([2]);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut ally, &potion, Advantage::Normal, &mut dice)
            .unwrap()
            .unwrap();
        assert_eq!(result.healing, 4);
        assert!(!ally.has_condition(UNCONSCIOUS));
        assert!(ally.can_act());
    }

    #[test]
    fn test_utility_action_resolves_to_none() {
        let rules = RulePreset::default();
        let mut dice = DiceResolver::seeded(1);
        let dash = CombatAction::new("Dash", crate::actions::ActionCost::Action);
        let result = ActionResolver::new(&rules)
            .resolve(&hero(), &mut goblin(), &dash, Advantage::Normal, &mut dice)
            .unwrap();
        assert!(result.is_none());
    }
}
