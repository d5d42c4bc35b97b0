//! Spell slots, concentration and spell resolution.
//!
//! [`SpellcastingResolver`] owns every caster's [`Spellcaster`] record and
//! resolves spells against a [`Roster`], which is either a live encounter or
//! a plain list of combatants. Casting validates everything first; a slot is
//! consumed only once the cast is known to go ahead.

use crate::actions::{ActionCost, Effect};
use crate::combatant::{Ability, Combatant, CombatantId};
use crate::conditions::{CombatCondition, ConditionChange, ConditionManager, UNCONSCIOUS};
use crate::dice::{Advantage, DiceExpression, DiceResolver, RollOptions, RollResult};
use crate::encounter::Roster;
use crate::error::{CombatError, Result};
use crate::events::{publish_result, CombatEvent, ConcentrationEnd, EventBus, RestKind};
use crate::preset::CriticalRule;
use crate::repository::{InMemoryRepository, Repository};
use crate::resolver::{
    apply_damage, apply_effect, apply_healing, attack_hits, roll_damage, roll_save, AttackResult,
    SaveOutcome,
};
use crate::spells::{SaveEffect, Spell, SpellBook, SpellId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, trace};

/// Highest spell level.
pub const MAX_SPELL_LEVEL: u8 = 9;

/// Whether a caster casts from a fixed known list or prepares daily.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SpellPreparation {
    #[default]
    Known,
    Prepared,
}

/// Which rest restores slots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum SlotRecovery {
    #[default]
    LongRest,
    /// Pact magic: short and long rests both restore slots.
    ShortRest,
}

/// Slots of one level. `used` never exceeds `total`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSlot {
    pub level: u8,
    pub total: u32,
    pub used: u32,
}

impl SpellSlot {
    pub fn new(level: u8, total: u32) -> Self {
        Self {
            level,
            total,
            used: 0,
        }
    }

    pub fn available(&self) -> u32 {
        self.total.saturating_sub(self.used)
    }

    fn consume(&mut self) -> bool {
        if self.available() == 0 {
            return false;
        }
        self.used += 1;
        true
    }

    pub fn reset(&mut self) {
        self.used = 0;
    }
}

/// The spell a caster is currently concentrating on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Concentration {
    pub spell_id: SpellId,
    pub level: u8,
    pub started_at: DateTime<Utc>,
    /// Rounds the spell lasts, `None` when open-ended.
    pub duration: Option<u32>,
    /// Counted down at the end of each of the caster's turns.
    #[serde(default)]
    pub rounds_remaining: Option<u32>,
    /// Set when the cast left conditions linked to this concentration.
    #[serde(default)]
    pub sustains_conditions: bool,
}

/// A combatant's magical capability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spellcaster {
    pub combatant_id: CombatantId,
    pub ability: Ability,
    pub ability_modifier: i32,
    pub attack_bonus: i32,
    pub save_dc: i32,
    pub concentration_save_bonus: i32,
    pub slots: Vec<SpellSlot>,
    pub known: Vec<SpellId>,
    pub prepared: Vec<SpellId>,
    pub preparation: SpellPreparation,
    pub recovery: SlotRecovery,
    pub concentration: Option<Concentration>,
}

impl Spellcaster {
    /// Derive attack bonus and save DC from the combatant's stats.
    pub fn new(combatant: &Combatant, ability: Ability) -> Self {
        let ability_modifier = combatant.ability_modifier(ability);
        Self {
            combatant_id: combatant.id,
            ability,
            ability_modifier,
            attack_bonus: combatant.proficiency_bonus + ability_modifier,
            save_dc: 8 + combatant.proficiency_bonus + ability_modifier,
            concentration_save_bonus: combatant.saving_throw_modifier(Ability::Constitution),
            slots: Vec::new(),
            known: Vec::new(),
            prepared: Vec::new(),
            preparation: SpellPreparation::Known,
            recovery: SlotRecovery::LongRest,
            concentration: None,
        }
    }

    /// Set the slot table as `(level, total)` pairs.
    pub fn with_slots(mut self, slots: &[(u8, u32)]) -> Self {
        self.slots = slots
            .iter()
            .map(|&(level, total)| SpellSlot::new(level, total))
            .collect();
        self.slots.sort_by_key(|s| s.level);
        self
    }

    pub fn knowing<I, S>(mut self, spells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SpellId>,
    {
        self.known.extend(spells.into_iter().map(Into::into));
        self
    }

    /// Switch to daily preparation and prepare `spells`.
    pub fn preparing<I, S>(mut self, spells: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<SpellId>,
    {
        self.preparation = SpellPreparation::Prepared;
        self.prepared.extend(spells.into_iter().map(Into::into));
        self
    }

    pub fn with_recovery(mut self, recovery: SlotRecovery) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn slot(&self, level: u8) -> Option<&SpellSlot> {
        self.slots.iter().find(|s| s.level == level)
    }

    fn slot_mut(&mut self, level: u8) -> Option<&mut SpellSlot> {
        self.slots.iter_mut().find(|s| s.level == level)
    }

    pub fn available_slots(&self, level: u8) -> u32 {
        self.slot(level).map_or(0, SpellSlot::available)
    }

    pub fn knows(&self, spell: &SpellId) -> bool {
        self.known.contains(spell)
    }

    pub fn is_prepared(&self, spell: &SpellId) -> bool {
        self.preparation == SpellPreparation::Known || self.prepared.contains(spell)
    }

    pub fn is_concentrating(&self) -> bool {
        self.concentration.is_some()
    }

    fn recover_all(&mut self) {
        for slot in &mut self.slots {
            slot.reset();
        }
    }
}

/// A validated cast, ready to commit.
#[derive(Debug, Clone, PartialEq)]
pub struct CastPlan {
    pub caster: CombatantId,
    pub spell: Spell,
    /// Effective casting level: 0 for cantrips.
    pub level: u8,
    pub targets: Vec<CombatantId>,
}

impl CastPlan {
    pub fn consumes_slot(&self) -> bool {
        self.level > 0
    }

    /// Action-economy cost in combat, `None` when the casting time is too long.
    pub fn action_cost(&self) -> Option<ActionCost> {
        self.spell.casting_time.action_cost()
    }
}

/// Outcome of a concentration save or a forced end of concentration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcentrationCheck {
    pub caster: CombatantId,
    pub spell: SpellId,
    pub dc: i32,
    /// `None` when no save was allowed (the caster dropped to 0 HP).
    pub save: Option<SaveOutcome>,
    pub maintained: bool,
}

/// Everything that happened during one cast.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpellCastResult {
    pub caster: CombatantId,
    pub spell: SpellId,
    pub level: u8,
    pub slot_consumed: bool,
    pub targets: Vec<AttackResult>,
    /// Concentration that ended because this spell replaced it.
    pub replaced_concentration: Option<SpellId>,
    /// Saves forced on concentrating targets this spell damaged.
    pub concentration_checks: Vec<ConcentrationCheck>,
}

impl SpellCastResult {
    pub fn total_damage(&self) -> i32 {
        self.targets.iter().map(|t| t.total_damage).sum()
    }

    pub fn total_healing(&self) -> i32 {
        self.targets.iter().map(|t| t.healing).sum()
    }

    pub fn rolls(&self) -> impl Iterator<Item = &RollResult> {
        self.targets.iter().flat_map(AttackResult::rolls)
    }
}

/// Spell-slot economy, concentration tracking and spell effects.
pub struct SpellcastingResolver<C = InMemoryRepository<CombatantId, Spellcaster>> {
    casters: C,
    book: SpellBook,
    dice: DiceResolver,
    events: EventBus,
}

impl SpellcastingResolver {
    /// In-memory caster registry with an entropy-seeded RNG.
    pub fn new(book: SpellBook, events: EventBus) -> Self {
        Self::with_parts(InMemoryRepository::new(), book, DiceResolver::new(), events)
    }
}

impl<C: Repository<CombatantId, Spellcaster>> SpellcastingResolver<C> {
    pub fn with_parts(casters: C, book: SpellBook, dice: DiceResolver, events: EventBus) -> Self {
        Self {
            casters,
            book,
            dice,
            events,
        }
    }

    /// Register or replace a caster's record.
    pub fn register(&mut self, caster: Spellcaster) -> Option<Spellcaster> {
        self.casters.put(caster.combatant_id, caster)
    }

    pub fn spellcaster(&self, caster: CombatantId) -> Result<&Spellcaster> {
        self.casters
            .get(&caster)
            .ok_or(CombatError::NotASpellcaster(caster))
    }

    pub fn spell(&self, spell: &SpellId) -> Result<&Spell> {
        self.book
            .get(spell)
            .ok_or_else(|| CombatError::SpellNotFound(spell.clone()))
    }

    pub fn book(&self) -> &SpellBook {
        &self.book
    }

    pub fn dice_mut(&mut self) -> &mut DiceResolver {
        &mut self.dice
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn available_slots(&self, caster: CombatantId, level: u8) -> Result<u32> {
        Ok(self.spellcaster(caster)?.available_slots(level))
    }

    /// Validate a cast without changing anything.
    pub fn plan_cast<R: Roster + ?Sized>(
        &self,
        roster: &R,
        caster: CombatantId,
        spell_id: &SpellId,
        level: u8,
        targets: &[CombatantId],
    ) -> Result<CastPlan> {
        let record = self.spellcaster(caster)?;
        let spell = self.spell(spell_id)?;

        if !record.knows(spell_id) {
            return Err(CombatError::SpellNotKnown(spell_id.clone()));
        }
        if !spell.is_cantrip() && !record.is_prepared(spell_id) {
            return Err(CombatError::SpellNotPrepared(spell_id.clone()));
        }

        let level = if spell.is_cantrip() { 0 } else { level };
        if !spell.is_cantrip() {
            if level < spell.level || level > MAX_SPELL_LEVEL {
                return Err(CombatError::InvalidCastLevel {
                    spell_level: spell.level,
                    requested: level,
                });
            }
            if record.available_slots(level) == 0 {
                return Err(CombatError::NoSpellSlot { level });
            }
        }

        if let Some(max) = spell.max_targets {
            if targets.len() > max {
                return Err(CombatError::TooManyTargets {
                    max,
                    given: targets.len(),
                });
            }
        }

        let caster_combatant = roster
            .find_combatant(caster)
            .ok_or(CombatError::CombatantNotFound(caster))?;
        if !caster_combatant.is_conscious() || !caster_combatant.can_act() {
            return Err(CombatError::Incapacitated(caster));
        }

        for &target in targets {
            let combatant = roster
                .find_combatant(target)
                .ok_or(CombatError::CombatantNotFound(target))?;
            if let Some(range) = spell.range.reach_feet() {
                let distance = caster_combatant.position.feet_to(combatant.position);
                if distance > range {
                    return Err(CombatError::TargetOutOfRange {
                        target,
                        distance,
                        range,
                    });
                }
            }
        }

        spell.validate()?;

        Ok(CastPlan {
            caster,
            spell: spell.clone(),
            level,
            targets: targets.to_vec(),
        })
    }

    /// Cast `spell_id` at `level` on `targets`.
    ///
    /// Fails without consuming anything unless the spell is known (and
    /// prepared), a slot of `level` is free, and every target exists and is
    /// in range. Cantrips never use a slot.
    pub fn cast_spell<R: Roster + ?Sized>(
        &mut self,
        roster: &mut R,
        caster: CombatantId,
        spell_id: &SpellId,
        level: u8,
        targets: &[CombatantId],
    ) -> Result<SpellCastResult> {
        let plan = self.plan_cast(&*roster, caster, spell_id, level, targets)?;
        self.commit(roster, plan)
    }

    fn commit<R: Roster + ?Sized>(&mut self, roster: &mut R, plan: CastPlan) -> Result<SpellCastResult> {
        let CastPlan {
            caster,
            spell,
            level,
            targets,
        } = plan;
        let encounter_id = roster.encounter_id();

        let record = self
            .casters
            .get_mut(&caster)
            .ok_or(CombatError::NotASpellcaster(caster))?;
        let slot_consumed = level > 0;
        if slot_consumed {
            let consumed = record.slot_mut(level).is_some_and(SpellSlot::consume);
            if !consumed {
                return Err(CombatError::NoSpellSlot { level });
            }
        }
        let stats = record.clone();

        let replaced_concentration = if spell.concentration {
            self.end_concentration(roster, caster, ConcentrationEnd::Replaced)?
        } else {
            None
        };

        info!(
            caster = %caster,
            spell = %spell.name,
            level,
            targets = targets.len(),
            "spell cast"
        );
        self.events.publish(
            encounter_id,
            CombatEvent::SpellCast {
                caster,
                spell: spell.id.clone(),
                level,
                targets: targets.clone(),
            },
        );

        let caster_snapshot = roster.find_combatant(caster).cloned();
        let rules = SpellRules {
            critical_rule: roster.critical_rule(),
            critical_threshold: roster.critical_threshold(),
            natural_rolls_automatic: roster.natural_rolls_automatic(),
        };
        let mut results = Vec::with_capacity(targets.len());
        for target_id in &targets {
            let Some(target) = roster.find_combatant_mut(*target_id) else {
                continue;
            };
            let result = resolve_on_target(
                &spell,
                level,
                &stats,
                caster_snapshot.as_ref(),
                target,
                rules,
                &mut self.dice,
            )?;
            publish_result(
                &self.events,
                encounter_id,
                Some(caster),
                &result,
                target.hit_points.current,
            );
            results.push(result);
        }

        if spell.concentration {
            let sustains_conditions = has_linked_conditions(&*roster, caster, &spell.id);
            if let Some(record) = self.casters.get_mut(&caster) {
                let duration = spell.duration.rounds();
                record.concentration = Some(Concentration {
                    spell_id: spell.id.clone(),
                    level,
                    started_at: Utc::now(),
                    duration,
                    rounds_remaining: duration,
                    sustains_conditions,
                });
            }
            if let Some(combatant) = roster.find_combatant_mut(caster) {
                combatant.concentration = Some(spell.id.clone());
            }
            self.events.publish(
                encounter_id,
                CombatEvent::ConcentrationStarted {
                    caster,
                    spell: spell.id.clone(),
                },
            );
        }

        let concentration_checks = self.check_concentration(&results, roster);

        Ok(SpellCastResult {
            caster,
            spell: spell.id,
            level,
            slot_consumed,
            targets: results,
            replaced_concentration,
            concentration_checks,
        })
    }

    /// Concentration save after taking `damage`: DC is the larger of 10 and
    /// half the damage. Failure ends concentration at once.
    ///
    /// Returns `None` if the caster is not concentrating.
    pub fn make_concentration_save<R: Roster + ?Sized>(
        &mut self,
        roster: &mut R,
        caster: CombatantId,
        damage: i32,
    ) -> Result<Option<ConcentrationCheck>> {
        let record = self.spellcaster(caster)?;
        let Some(concentration) = &record.concentration else {
            return Ok(None);
        };
        let spell = concentration.spell_id.clone();
        let dc = concentration_dc(damage);
        let bonus = record.concentration_save_bonus
            + roster
                .find_combatant(caster)
                .map_or(0, Combatant::save_bonus_from_conditions);

        let roll = self.dice.d20(bonus, Advantage::Normal);
        let success = roll.meets_dc(dc);
        debug!(caster = %caster, dc, roll = roll.total, success, "concentration save");
        let save = SaveOutcome {
            ability: Ability::Constitution,
            dc,
            roll,
            success,
        };
        if !success {
            self.end_concentration(roster, caster, ConcentrationEnd::Broken)?;
        }
        Ok(Some(ConcentrationCheck {
            caster,
            spell,
            dc,
            save: Some(save),
            maintained: success,
        }))
    }

    /// Run concentration checks for every concentrating caster damaged in
    /// `results`. A caster at 0 HP loses concentration without a save.
    pub fn check_concentration<R: Roster + ?Sized>(
        &mut self,
        results: &[AttackResult],
        roster: &mut R,
    ) -> Vec<ConcentrationCheck> {
        let mut checks = Vec::new();
        for result in results {
            let Some(taken) = result.damage_taken else {
                continue;
            };
            if taken.amount <= 0 {
                continue;
            }
            let target = result.target_id;
            let Some(spell) = self
                .casters
                .get(&target)
                .and_then(|r| r.concentration.as_ref())
                .map(|c| c.spell_id.clone())
            else {
                continue;
            };

            let down = roster
                .find_combatant(target)
                .map_or(true, |c| c.hit_points.is_down());
            if down {
                if let Ok(Some(_)) =
                    self.end_concentration(roster, target, ConcentrationEnd::Incapacitated)
                {
                    checks.push(ConcentrationCheck {
                        caster: target,
                        spell,
                        dc: concentration_dc(taken.amount),
                        save: None,
                        maintained: false,
                    });
                }
                continue;
            }
            if let Ok(Some(check)) = self.make_concentration_save(roster, target, taken.amount) {
                checks.push(check);
            }
        }
        checks
    }

    /// Count `caster`'s concentration down by one round at the end of their turn.
    ///
    /// Concentration ends as [`ConcentrationEnd::Expired`] when the count
    /// reaches zero, or when every condition the spell sustained is gone.
    /// Combatants without a spellcaster record are ignored.
    pub fn tick_concentration<R: Roster + ?Sized>(
        &mut self,
        roster: &mut R,
        caster: CombatantId,
    ) -> Result<Option<SpellId>> {
        let Some(record) = self.casters.get_mut(&caster) else {
            return Ok(None);
        };
        let Some(concentration) = record.concentration.as_mut() else {
            return Ok(None);
        };
        if let Some(remaining) = concentration.rounds_remaining.as_mut() {
            *remaining = remaining.saturating_sub(1);
        }
        let ran_out = concentration.rounds_remaining == Some(0);
        let spell = concentration.spell_id.clone();
        let unsupported = concentration.sustains_conditions
            && !has_linked_conditions(&*roster, caster, &spell);
        trace!(
            caster = %caster,
            spell = %spell,
            remaining = ?concentration.rounds_remaining,
            "concentration ticked"
        );
        if ran_out || unsupported {
            return self.end_concentration(roster, caster, ConcentrationEnd::Expired);
        }
        Ok(None)
    }

    /// End `caster`'s concentration and remove every condition it sustained.
    ///
    /// Returns the spell that ended, if there was one.
    pub fn end_concentration<R: Roster + ?Sized>(
        &mut self,
        roster: &mut R,
        caster: CombatantId,
        reason: ConcentrationEnd,
    ) -> Result<Option<SpellId>> {
        let record = self
            .casters
            .get_mut(&caster)
            .ok_or(CombatError::NotASpellcaster(caster))?;
        let Some(concentration) = record.concentration.take() else {
            return Ok(None);
        };
        let spell = concentration.spell_id;
        let encounter_id = roster.encounter_id();

        if let Some(combatant) = roster.find_combatant_mut(caster) {
            combatant.concentration = None;
        }
        let manager = ConditionManager::new();
        for id in roster.combatant_ids() {
            let Some(target) = roster.find_combatant_mut(id) else {
                continue;
            };
            for change in manager.remove_linked(target, caster, &spell) {
                if let Some(name) = change.removed_name() {
                    self.events.publish(
                        encounter_id,
                        CombatEvent::ConditionRemoved {
                            target: id,
                            condition: name.to_string(),
                        },
                    );
                }
            }
        }

        info!(caster = %caster, spell = %spell, ?reason, "concentration ended");
        self.events.publish(
            encounter_id,
            CombatEvent::ConcentrationEnded {
                caster,
                spell: spell.clone(),
                reason,
            },
        );
        Ok(Some(spell))
    }

    /// Restore every slot.
    pub fn long_rest(&mut self, caster: CombatantId) -> Result<()> {
        let record = self
            .casters
            .get_mut(&caster)
            .ok_or(CombatError::NotASpellcaster(caster))?;
        record.recover_all();
        info!(caster = %caster, "slots recovered on long rest");
        self.events.publish(
            None,
            CombatEvent::SlotsRecovered {
                caster,
                rest: RestKind::Long,
            },
        );
        Ok(())
    }

    /// Restore slots only for short-rest (pact magic) casters.
    ///
    /// Returns whether anything was recovered.
    pub fn short_rest(&mut self, caster: CombatantId) -> Result<bool> {
        let record = self
            .casters
            .get_mut(&caster)
            .ok_or(CombatError::NotASpellcaster(caster))?;
        if record.recovery != SlotRecovery::ShortRest {
            return Ok(false);
        }
        record.recover_all();
        info!(caster = %caster, "slots recovered on short rest");
        self.events.publish(
            None,
            CombatEvent::SlotsRecovered {
                caster,
                rest: RestKind::Short,
            },
        );
        Ok(true)
    }

    pub fn long_rest_all(&mut self) -> usize {
        let ids = self.casters.keys();
        ids.into_iter()
            .filter(|id| self.long_rest(*id).is_ok())
            .count()
    }

    /// Returns how many casters recovered slots.
    pub fn short_rest_all(&mut self) -> usize {
        let ids = self.casters.keys();
        ids.into_iter()
            .filter(|id| matches!(self.short_rest(*id), Ok(true)))
            .count()
    }
}

fn has_linked_conditions<R: Roster + ?Sized>(roster: &R, caster: CombatantId, spell: &SpellId) -> bool {
    roster.combatant_ids().into_iter().any(|id| {
        roster.find_combatant(id).is_some_and(|c| {
            c.conditions.iter().any(|condition| {
                condition
                    .concentration
                    .as_ref()
                    .is_some_and(|link| link.caster == caster && &link.spell == spell)
            })
        })
    })
}

fn concentration_dc(damage: i32) -> i32 {
    (damage / 2).max(10)
}

#[derive(Debug, Clone, Copy)]
struct SpellRules {
    critical_rule: CriticalRule,
    critical_threshold: u32,
    natural_rolls_automatic: bool,
}

/// Tie a spell's condition to its caster: fill in the caster's DC, the
/// spell's duration and the concentration link.
fn bind_condition(mut condition: CombatCondition, spell: &Spell, caster: &Spellcaster) -> CombatCondition {
    if let Some(save) = condition.save_ends.as_mut() {
        if save.dc <= 0 {
            save.dc = caster.save_dc;
        }
    }
    if condition.duration_rounds.is_none() {
        condition.duration_rounds = spell.duration.rounds().filter(|r| *r > 0);
    }
    if spell.concentration {
        condition = condition.linked_to(caster.combatant_id, spell.id.clone());
    }
    condition
}

fn resolve_on_target(
    spell: &Spell,
    level: u8,
    caster: &Spellcaster,
    caster_combatant: Option<&Combatant>,
    target: &mut Combatant,
    rules: SpellRules,
    dice: &mut DiceResolver,
) -> Result<AttackResult> {
    let mut result = AttackResult::new(target.id);
    result.hit = true;

    if spell.attack.is_some() {
        let bonus = caster.attack_bonus + caster_combatant.map_or(0, Combatant::attack_bonus_from_conditions);
        let options = RollOptions::new()
            .with_bonus(bonus)
            .with_critical_threshold(rules.critical_threshold);
        let roll = dice.roll(&DiceExpression::d20(0), &options);
        result.critical = roll.is_critical();
        result.hit = attack_hits(
            &roll,
            target.effective_armor_class(),
            rules.natural_rolls_automatic,
        );
        result.attack_roll = Some(roll);
        if !result.hit {
            result.critical = false;
            return Ok(result);
        }
    }

    let mut saved = false;
    if let Some(save) = spell.saving_throw {
        let outcome = roll_save(target, save.ability, caster.save_dc, dice);
        saved = outcome.success;
        result.save = Some(outcome);
        if saved && save.on_success == SaveEffect::Negates {
            result.hit = false;
            return Ok(result);
        }
    }

    // Upcast scaling is already in the expression; the critical rule applies on top
    if let (Some(damage), Some(expr)) = (&spell.damage, spell.damage_at(level)?) {
        let (roll, mut amount) = roll_damage(&expr, result.critical, rules.critical_rule, dice);
        if saved {
            amount /= 2;
        }
        result.add_damage(damage.damage_type, amount);
        result.damage_rolls.push(roll);
    }

    let extra: Vec<Effect> = if saved {
        Vec::new()
    } else {
        spell
            .effects
            .iter()
            .cloned()
            .map(|effect| match effect {
                Effect::Condition(condition) => Effect::Condition(bind_condition(condition, spell, caster)),
                other => other,
            })
            .collect()
    };
    for effect in &extra {
        if let Effect::Damage {
            dice: notation,
            damage_type,
            halved,
        } = effect
        {
            let expr = DiceExpression::parse(notation)?;
            let (roll, mut amount) = roll_damage(&expr, result.critical, rules.critical_rule, dice);
            if *halved {
                amount /= 2;
            }
            result.add_damage(*damage_type, amount);
            result.damage_rolls.push(roll);
        }
    }

    if result.total_damage > 0 {
        let taken = apply_damage(target, result.total_damage, &spell.name);
        if taken.dropped_to_zero {
            result.conditions.push(ConditionChange::Applied {
                name: UNCONSCIOUS.to_string(),
            });
        }
        result.damage_taken = Some(taken);
    }

    if let (Some(healing), Some(expr)) = (&spell.healing, spell.healing_at(level)?) {
        let bonus = if healing.add_modifier {
            caster.ability_modifier
        } else {
            0
        };
        let roll = dice.roll(&expr, &RollOptions::new().with_bonus(bonus));
        let (restored, revived) = apply_healing(target, roll.total.max(0));
        result.healing += restored;
        result.damage_rolls.push(roll);
        if revived {
            result.conditions.push(ConditionChange::Removed {
                name: UNCONSCIOUS.to_string(),
            });
        }
    }

    for effect in &extra {
        apply_effect(target, effect, &mut result, dice)?;
    }
    Ok(result)
}
