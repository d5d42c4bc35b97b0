//! The combat state machine.
//!
//! [`CombatEngine`] drives encounters through setup, initiative, combat and
//! resolution. Every entry point validates first and mutates only once the
//! whole operation is known to succeed.

use crate::actions::{ActionCost, CombatAction, Requirement};
use crate::combatant::{Combatant, CombatantId, Position, FEET_PER_GRID_UNIT};
use crate::conditions::{ConditionChange, ConditionManager};
use crate::dice::{Advantage, DiceResolver, RollResult};
use crate::encounter::{
    reset_for_encounter, CombatEncounter, EncounterId, EncounterOutcome, EncounterSetup, Phase,
};
use crate::error::{CombatError, Result};
use crate::events::{publish_condition_changes, publish_result, CombatEvent, EventBus};
use crate::preset::{DiagonalMovement, InitiativeVariant, RulePreset};
use crate::repository::{InMemoryRepository, Repository};
use crate::resolver::{ActionResolver, AttackResult};
use crate::spellcasting::{ConcentrationCheck, SpellCastResult, Spellcaster, SpellcastingResolver};
use crate::spells::SpellId;
use chrono::{Duration, Utc};
use std::cmp::Ordering;
use std::fmt::Write;
use tracing::{debug, info, warn};

/// Feet needed to move in a straight line from `from` to `to`.
pub fn movement_cost(from: Position, to: Position, rule: DiagonalMovement) -> u32 {
    let dx = from.x.abs_diff(to.x);
    let dy = from.y.abs_diff(to.y);
    match rule {
        DiagonalMovement::Euclidean => {
            (from.distance(to) * f64::from(FEET_PER_GRID_UNIT)).ceil() as u32
        }
        DiagonalMovement::Uniform => dx.max(dy) * FEET_PER_GRID_UNIT,
        DiagonalMovement::Alternating => {
            let diagonal = dx.min(dy);
            let straight = dx.max(dy) - diagonal;
            (straight + diagonal + diagonal / 2) * FEET_PER_GRID_UNIT
        }
    }
}

/// Highest initiative first; ties go to the higher Dexterity score, then
/// to whoever was listed first.
pub fn initiative_order(combatants: &[Combatant]) -> Vec<CombatantId> {
    let mut sorted: Vec<&Combatant> = combatants.iter().collect();
    sorted.sort_by(|a, b| initiative_cmp(b, a));
    sorted.into_iter().map(|c| c.id).collect()
}

fn initiative_cmp(a: &Combatant, b: &Combatant) -> Ordering {
    a.initiative
        .cmp(&b.initiative)
        .then(a.ability_scores.dexterity.cmp(&b.ability_scores.dexterity))
}

/// Runs encounters stored in an injected repository.
pub struct CombatEngine<R = InMemoryRepository<EncounterId, CombatEncounter>> {
    encounters: R,
    dice: DiceResolver,
    events: EventBus,
}

impl CombatEngine {
    /// In-memory engine with an entropy-seeded RNG and its own event bus.
    pub fn new() -> Self {
        Self::with_parts(InMemoryRepository::new(), DiceResolver::new(), EventBus::new())
    }

    /// Reproducible engine for replays and tests.
    pub fn seeded(seed: u64) -> Self {
        Self::with_parts(
            InMemoryRepository::new(),
            DiceResolver::seeded(seed),
            EventBus::new(),
        )
    }
}

impl Default for CombatEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Repository<EncounterId, CombatEncounter>> CombatEngine<R> {
    pub fn with_parts(encounters: R, dice: DiceResolver, events: EventBus) -> Self {
        Self {
            encounters,
            dice,
            events,
        }
    }

    pub fn dice_mut(&mut self) -> &mut DiceResolver {
        &mut self.dice
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // ========================================================================
    // Setup
    // ========================================================================

    /// Create an encounter in the setup phase on a default battlefield.
    pub fn create_encounter(
        &mut self,
        name: impl Into<String>,
        combatants: Vec<Combatant>,
        rules: RulePreset,
    ) -> EncounterId {
        self.create_encounter_with(
            EncounterSetup::new(name)
                .with_combatants(combatants)
                .with_rules(rules),
        )
    }

    pub fn create_encounter_with(&mut self, setup: EncounterSetup) -> EncounterId {
        let encounter = CombatEncounter::from_setup(setup);
        let id = encounter.id;
        let names: Vec<String> = encounter.combatants.iter().map(|c| c.name.clone()).collect();

        info!(
            encounter = %id,
            name = %encounter.name,
            combatants = names.len(),
            rules = %encounter.rules.name,
            "encounter created"
        );
        self.events.publish(
            Some(id),
            CombatEvent::CombatStart {
                name: encounter.name.clone(),
                combatants: encounter.combatants.iter().map(|c| c.id).collect(),
            },
        );
        self.encounters.put(id, encounter);
        id
    }

    /// Add a combatant. In setup it is appended; in combat it rolls
    /// initiative and slots into the turn order without changing whose
    /// turn it is.
    pub fn add_combatant(&mut self, id: EncounterId, mut combatant: Combatant) -> Result<CombatantId> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        if !matches!(encounter.phase, Phase::Setup | Phase::Combat) {
            return Err(CombatError::InvalidPhase {
                operation: "add a combatant",
                phase: encounter.phase,
            });
        }

        reset_for_encounter(&mut combatant);
        let combatant_id = combatant.id;

        if encounter.phase == Phase::Combat {
            let roll = roll_initiative_for(&combatant, encounter.rules.initiative, &mut self.dice);
            combatant.initiative = roll.as_ref().map_or(10 + combatant.initiative_modifier(), |r| r.total);

            let index = encounter
                .turn_order
                .iter()
                .position(|other| {
                    encounter
                        .combatant(*other)
                        .is_some_and(|o| initiative_cmp(&combatant, o) == Ordering::Greater)
                })
                .unwrap_or(encounter.turn_order.len());
            if index <= encounter.current_turn {
                encounter.current_turn += 1;
            }
            encounter.turn_order.insert(index, combatant_id);
            encounter.log.push(
                encounter.round,
                Some(combatant_id),
                format!(
                    "{} joins the fight with initiative {}",
                    combatant.name, combatant.initiative
                ),
                roll.into_iter().collect(),
            );
        }

        debug!(encounter = %id, combatant = %combatant.name, "combatant added");
        encounter.combatants.push(combatant);
        Ok(combatant_id)
    }

    /// Remove a combatant before initiative is rolled.
    pub fn remove_combatant(&mut self, id: EncounterId, combatant: CombatantId) -> Result<Combatant> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Setup, "remove a combatant")?;
        let index = encounter
            .combatants
            .iter()
            .position(|c| c.id == combatant)
            .ok_or(CombatError::CombatantNotFound(combatant))?;
        Ok(encounter.combatants.remove(index))
    }

    pub fn remove_encounter(&mut self, id: EncounterId) -> Result<CombatEncounter> {
        self.encounters
            .remove(&id)
            .ok_or(CombatError::EncounterNotFound(id))
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn encounter(&self, id: EncounterId) -> Result<&CombatEncounter> {
        self.encounters
            .get(&id)
            .ok_or(CombatError::EncounterNotFound(id))
    }

    pub fn encounter_ids(&self) -> Vec<EncounterId> {
        self.encounters.keys()
    }

    /// Whose turn it is; `None` outside the combat phase.
    pub fn current_combatant(&self, id: EncounterId) -> Result<Option<&Combatant>> {
        Ok(self.encounter(id)?.current_combatant())
    }

    /// Actions `combatant` could take right now. Off-turn only reactions
    /// are available.
    pub fn available_actions(&self, id: EncounterId, combatant: CombatantId) -> Result<Vec<&CombatAction>> {
        let encounter = self.encounter(id)?;
        let actor = encounter
            .combatant(combatant)
            .ok_or(CombatError::CombatantNotFound(combatant))?;
        if encounter.phase != Phase::Combat || !actor.is_conscious() || !actor.can_act() {
            return Ok(Vec::new());
        }

        let on_turn = encounter.current_combatant_id() == Some(combatant);
        let max_reactions = encounter.rules.max_reactions;
        Ok(actor
            .actions
            .iter()
            .filter(|a| {
                if on_turn {
                    actor.can_pay(a.cost, max_reactions)
                } else {
                    a.cost == ActionCost::Reaction && actor.can_pay(a.cost, max_reactions)
                }
            })
            .collect())
    }

    pub fn remaining_movement(&self, id: EncounterId, combatant: CombatantId) -> Result<u32> {
        self.encounter(id)?
            .combatant(combatant)
            .map(Combatant::remaining_movement)
            .ok_or(CombatError::CombatantNotFound(combatant))
    }

    /// Time left on the current turn's clock, if the preset sets one.
    pub fn turn_time_remaining(&self, id: EncounterId) -> Result<Option<Duration>> {
        Ok(self.encounter(id)?.turn_time_remaining(Utc::now()))
    }

    // ========================================================================
    // Initiative and turns
    // ========================================================================

    /// Roll initiative for everyone and start round 1.
    ///
    /// Returns the turn order.
    pub fn roll_initiative(&mut self, id: EncounterId) -> Result<Vec<CombatantId>> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Setup, "roll initiative")?;
        if encounter.combatants.is_empty() {
            return Err(CombatError::NoCombatants);
        }

        encounter.phase = Phase::Initiative;
        let variant = encounter.rules.initiative;
        let mut rolls = Vec::new();
        for combatant in &mut encounter.combatants {
            let roll = roll_initiative_for(combatant, variant, &mut self.dice);
            combatant.initiative = match &roll {
                Some(roll) => roll.total,
                None => 10 + combatant.initiative_modifier(),
            };
            rolls.extend(roll);
        }
        encounter.turn_order = initiative_order(&encounter.combatants);

        let mut summary = String::from("Initiative:");
        for (i, combatant_id) in encounter.turn_order.iter().enumerate() {
            if let Some(c) = encounter.combatant(*combatant_id) {
                let sep = if i == 0 { " " } else { ", " };
                let _ = write!(summary, "{sep}{} {}", c.name, c.initiative);
            }
        }
        info!(encounter = %id, order = %summary, "initiative rolled");
        encounter.log.push(1, None, summary, rolls);

        encounter.phase = Phase::Combat;
        encounter.round = 1;
        encounter.current_turn = 0;
        encounter.started_at = Some(Utc::now());
        self.events
            .publish(Some(id), CombatEvent::RoundStart { round: 1 });
        start_turn(encounter, &mut self.dice, &self.events);

        Ok(encounter.turn_order.clone())
    }

    /// Finish the active combatant's turn and hand over to the next one.
    pub fn end_turn(&mut self, id: EncounterId) -> Result<()> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Combat, "end a turn")?;
        let combatant_id = encounter
            .current_combatant_id()
            .ok_or(CombatError::NoCombatants)?;
        let round = encounter.round;

        if let Some(combatant) = encounter.combatant_mut(combatant_id) {
            let name = combatant.name.clone();
            let changes = ConditionManager::new().end_of_turn(combatant, &mut self.dice);
            log_condition_changes(encounter, combatant_id, &name, &changes);
            publish_condition_changes(&self.events, Some(id), combatant_id, &changes);
        }
        self.events.publish(
            Some(id),
            CombatEvent::TurnEnd {
                round,
                combatant: combatant_id,
            },
        );

        encounter.current_turn += 1;
        if encounter.current_turn >= encounter.turn_order.len() {
            end_round(encounter, &mut self.dice, &self.events);
        } else {
            start_turn(encounter, &mut self.dice, &self.events);
        }
        Ok(())
    }

    /// [`end_turn`](Self::end_turn), first counting down the active
    /// combatant's concentration.
    pub fn end_turn_with<C: Repository<CombatantId, Spellcaster>>(
        &mut self,
        id: EncounterId,
        spellcasting: &mut SpellcastingResolver<C>,
    ) -> Result<Option<SpellId>> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Combat, "end a turn")?;
        let combatant_id = encounter
            .current_combatant_id()
            .ok_or(CombatError::NoCombatants)?;
        let expired = spellcasting.tick_concentration(encounter, combatant_id)?;
        if let Some(spell) = &expired {
            let name = encounter
                .combatant(combatant_id)
                .map_or_else(|| combatant_id.to_string(), |c| c.name.clone());
            encounter.log.push(
                encounter.round,
                Some(combatant_id),
                format!("{name}'s concentration on {spell} ends"),
                Vec::new(),
            );
        }
        self.end_turn(id)?;
        Ok(expired)
    }

    /// Stop the encounter early.
    pub fn end_encounter(&mut self, id: EncounterId) -> Result<EncounterOutcome> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        if encounter.phase >= Phase::Resolution {
            return Err(CombatError::InvalidPhase {
                operation: "end the encounter",
                phase: encounter.phase,
            });
        }
        finish(encounter, EncounterOutcome::Aborted, &self.events);
        Ok(EncounterOutcome::Aborted)
    }

    // ========================================================================
    // Actions
    // ========================================================================

    /// The active combatant takes `action` against `targets`.
    ///
    /// Concentration saves for damaged casters are not rolled here; use
    /// [`execute_action_with`](Self::execute_action_with) or follow up with
    /// [`check_concentration`](Self::check_concentration).
    pub fn execute_action(
        &mut self,
        id: EncounterId,
        action: &CombatAction,
        targets: &[CombatantId],
    ) -> Result<Vec<AttackResult>> {
        let encounter = self.encounter(id)?;
        require_phase(encounter, Phase::Combat, "take an action")?;
        let actor = encounter
            .current_combatant_id()
            .ok_or(CombatError::NoCombatants)?;
        self.perform(id, actor, action, targets, action.cost)
    }

    /// [`execute_action`](Self::execute_action) followed by concentration
    /// saves for every caster it damaged.
    pub fn execute_action_with<C: Repository<CombatantId, Spellcaster>>(
        &mut self,
        id: EncounterId,
        spellcasting: &mut SpellcastingResolver<C>,
        action: &CombatAction,
        targets: &[CombatantId],
    ) -> Result<(Vec<AttackResult>, Vec<ConcentrationCheck>)> {
        let results = self.execute_action(id, action, targets)?;
        let checks = self.check_concentration(id, spellcasting, &results)?;
        Ok((results, checks))
    }

    /// `reactor` uses its reaction, on or off its own turn.
    pub fn execute_reaction(
        &mut self,
        id: EncounterId,
        reactor: CombatantId,
        action: &CombatAction,
        targets: &[CombatantId],
    ) -> Result<Vec<AttackResult>> {
        self.perform(id, reactor, action, targets, ActionCost::Reaction)
    }

    fn perform(
        &mut self,
        id: EncounterId,
        actor_id: CombatantId,
        action: &CombatAction,
        targets: &[CombatantId],
        cost: ActionCost,
    ) -> Result<Vec<AttackResult>> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Combat, "take an action")?;

        let actor = encounter
            .combatant(actor_id)
            .ok_or(CombatError::CombatantNotFound(actor_id))?
            .clone();
        if !actor.is_conscious() || !actor.can_act() {
            return Err(CombatError::Incapacitated(actor_id));
        }
        action.validate()?;
        check_requirements(encounter, &actor, action, targets)?;
        if !actor.can_pay(cost, encounter.rules.max_reactions) {
            return Err(CombatError::ActionUnavailable {
                combatant: actor_id,
                cost,
            });
        }

        // Committed from here on
        if let Some(combatant) = encounter.combatant_mut(actor_id) {
            combatant.pay(cost);
        }

        let rules = encounter.rules.clone();
        let resolver = ActionResolver::new(&rules);
        let mut results = Vec::with_capacity(targets.len());
        let mut outcomes = Vec::with_capacity(targets.len());
        for &target_id in targets {
            let situational = if is_flanked(encounter, &actor, action, target_id) {
                Advantage::Advantage
            } else {
                Advantage::Normal
            };
            let Some(target) = encounter.combatant_mut(target_id) else {
                continue;
            };
            let Some(result) = resolver.resolve(&actor, target, action, situational, &mut self.dice)? else {
                continue;
            };
            publish_result(
                &self.events,
                Some(id),
                Some(actor_id),
                &result,
                target.hit_points.current,
            );
            outcomes.push(describe_result(&target.name, &result));
            results.push(result);
        }

        let message = if outcomes.is_empty() {
            format!("{} uses {}", actor.name, action.name)
        } else {
            format!("{} uses {}: {}", actor.name, action.name, outcomes.join("; "))
        };
        info!(encounter = %id, actor = %actor.name, action = %action.name, "{message}");
        let rolls = collect_rolls(&results);
        encounter
            .log
            .push(encounter.round, Some(actor_id), message, rolls);
        Ok(results)
    }

    /// Move the active combatant in a straight line to `to`.
    ///
    /// Returns the feet spent.
    pub fn move_combatant(&mut self, id: EncounterId, combatant: CombatantId, to: Position) -> Result<u32> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Combat, "move")?;
        if encounter.current_combatant_id() != Some(combatant) {
            return Err(CombatError::NotCombatantsTurn(combatant));
        }
        if !encounter.battlefield.contains(to) {
            return Err(CombatError::OutOfBounds { x: to.x, y: to.y });
        }
        let rule = encounter.rules.diagonal_movement;
        let mover = encounter
            .combatant_mut(combatant)
            .ok_or(CombatError::CombatantNotFound(combatant))?;
        if !mover.can_act() {
            return Err(CombatError::Incapacitated(combatant));
        }

        let needed = movement_cost(mover.position, to, rule);
        let remaining = mover.remaining_movement();
        if needed > remaining {
            return Err(CombatError::InsufficientMovement { needed, remaining });
        }

        let from = mover.position;
        mover.position = to;
        mover.pay(ActionCost::Movement(needed));
        let message = format!(
            "{} moves from ({}, {}) to ({}, {}), {needed} ft",
            mover.name, from.x, from.y, to.x, to.y
        );
        debug!(encounter = %id, combatant = %mover.name, feet = needed, "moved");
        encounter.log.push(encounter.round, Some(combatant), message, Vec::new());
        Ok(needed)
    }

    // ========================================================================
    // Spells
    // ========================================================================

    /// Cast a spell in combat, paying its casting time from the caster's
    /// action economy. Reaction spells may be cast off-turn.
    pub fn cast_spell<C: Repository<CombatantId, Spellcaster>>(
        &mut self,
        id: EncounterId,
        spellcasting: &mut SpellcastingResolver<C>,
        caster: CombatantId,
        spell_id: &SpellId,
        level: u8,
        targets: &[CombatantId],
    ) -> Result<SpellCastResult> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        require_phase(encounter, Phase::Combat, "cast a spell")?;

        let plan = spellcasting.plan_cast(&*encounter, caster, spell_id, level, targets)?;
        let cost = plan
            .action_cost()
            .ok_or_else(|| CombatError::CastingTimeTooLong(spell_id.clone()))?;
        if cost != ActionCost::Reaction && encounter.current_combatant_id() != Some(caster) {
            return Err(CombatError::NotCombatantsTurn(caster));
        }
        let combatant = encounter
            .combatant(caster)
            .ok_or(CombatError::CombatantNotFound(caster))?;
        if !combatant.can_pay(cost, encounter.rules.max_reactions) {
            return Err(CombatError::ActionUnavailable {
                combatant: caster,
                cost,
            });
        }
        let caster_name = combatant.name.clone();

        let result = spellcasting.cast_spell(encounter, caster, spell_id, plan.level, targets)?;
        if let Some(combatant) = encounter.combatant_mut(caster) {
            combatant.pay(cost);
        }

        let outcomes: Vec<String> = result
            .targets
            .iter()
            .filter_map(|r| {
                encounter
                    .combatant(r.target_id)
                    .map(|t| describe_result(&t.name, r))
            })
            .collect();
        let mut message = if plan.spell.is_cantrip() {
            format!("{caster_name} casts {}", plan.spell.name)
        } else {
            format!("{caster_name} casts {} at level {}", plan.spell.name, result.level)
        };
        if !outcomes.is_empty() {
            let _ = write!(message, ": {}", outcomes.join("; "));
        }
        let rolls = result.rolls().cloned().collect();
        encounter.log.push(encounter.round, Some(caster), message, rolls);
        log_concentration_checks(encounter, &result.concentration_checks);
        Ok(result)
    }

    /// Concentration saves for casters damaged by `results`.
    pub fn check_concentration<C: Repository<CombatantId, Spellcaster>>(
        &mut self,
        id: EncounterId,
        spellcasting: &mut SpellcastingResolver<C>,
        results: &[AttackResult],
    ) -> Result<Vec<ConcentrationCheck>> {
        let encounter = fetch_mut(&mut self.encounters, id)?;
        let checks = spellcasting.check_concentration(results, encounter);
        log_concentration_checks(encounter, &checks);
        Ok(checks)
    }
}

fn fetch_mut<R: Repository<EncounterId, CombatEncounter>>(
    encounters: &mut R,
    id: EncounterId,
) -> Result<&mut CombatEncounter> {
    encounters
        .get_mut(&id)
        .ok_or(CombatError::EncounterNotFound(id))
}

fn require_phase(encounter: &CombatEncounter, phase: Phase, operation: &'static str) -> Result<()> {
    if encounter.phase != phase {
        return Err(CombatError::InvalidPhase {
            operation,
            phase: encounter.phase,
        });
    }
    Ok(())
}

/// `None` for passive initiative.
fn roll_initiative_for(
    combatant: &Combatant,
    variant: InitiativeVariant,
    dice: &mut DiceResolver,
) -> Option<RollResult> {
    match variant {
        InitiativeVariant::Standard => {
            Some(dice.d20(combatant.initiative_modifier(), Advantage::Normal))
        }
        InitiativeVariant::Passive => None,
    }
}

fn check_requirements(
    encounter: &CombatEncounter,
    actor: &Combatant,
    action: &CombatAction,
    targets: &[CombatantId],
) -> Result<()> {
    let mut positions = Vec::with_capacity(targets.len());
    for &target in targets {
        let combatant = encounter
            .combatant(target)
            .ok_or(CombatError::CombatantNotFound(target))?;
        positions.push((target, combatant.position));
    }

    for requirement in &action.requirements {
        match requirement {
            Requirement::WithinRange(range) => {
                for &(target, position) in &positions {
                    let distance = actor.position.feet_to(position);
                    if distance > *range {
                        return Err(CombatError::TargetOutOfRange {
                            target,
                            distance,
                            range: *range,
                        });
                    }
                }
            }
            Requirement::ActorHasCondition(name) => {
                if !actor.has_condition(name) {
                    return Err(CombatError::RequirementNotMet(format!(
                        "{} requires {}",
                        action.name, name
                    )));
                }
            }
            Requirement::ActorLacksCondition(name) => {
                if actor.has_condition(name) {
                    return Err(CombatError::RequirementNotMet(format!(
                        "{} cannot be used while {}",
                        action.name, name
                    )));
                }
            }
        }
    }
    Ok(())
}

/// A melee attacker flanks when a conscious ally stands on the square
/// directly opposite it across the target.
fn is_flanked(
    encounter: &CombatEncounter,
    actor: &Combatant,
    action: &CombatAction,
    target_id: CombatantId,
) -> bool {
    if !encounter.rules.flanking || !action.attack.is_some_and(|a| a.melee) {
        return false;
    }
    let Some(target) = encounter.combatant(target_id) else {
        return false;
    };
    if !actor.position.is_adjacent(target.position) {
        return false;
    }
    let opposite = Position::new(
        2 * target.position.x - actor.position.x,
        2 * target.position.y - actor.position.y,
    );
    encounter.combatants.iter().any(|c| {
        c.id != actor.id
            && c.id != target_id
            && c.team.is_friendly_to(actor.team)
            && c.is_conscious()
            && c.can_act()
            && c.position == opposite
    })
}

fn start_turn(encounter: &mut CombatEncounter, dice: &mut DiceResolver, events: &EventBus) {
    let Some(combatant_id) = encounter.current_combatant_id() else {
        return;
    };
    let id = encounter.id;
    let round = encounter.round;
    encounter.turn_started_at = Some(Utc::now());

    let Some(combatant) = encounter.combatant_mut(combatant_id) else {
        warn!(encounter = %id, combatant = %combatant_id, "turn order names a missing combatant");
        return;
    };
    combatant.economy.reset();
    let changes = ConditionManager::new().start_of_turn(combatant, dice);
    let name = combatant.name.clone();
    let hp_after = combatant.hit_points.current;
    debug!(encounter = %id, round, combatant = %name, "turn started");

    for change in &changes {
        if let ConditionChange::OngoingDamage { amount, .. } = change {
            events.publish(
                Some(id),
                CombatEvent::DamageDealt {
                    source: None,
                    target: combatant_id,
                    amount: *amount,
                    damage_types: Vec::new(),
                    critical: false,
                    hp_after,
                },
            );
        }
    }
    publish_condition_changes(events, Some(id), combatant_id, &changes);
    log_condition_changes(encounter, combatant_id, &name, &changes);
    events.publish(
        Some(id),
        CombatEvent::TurnStart {
            round,
            combatant: combatant_id,
        },
    );
}

fn end_round(encounter: &mut CombatEncounter, dice: &mut DiceResolver, events: &EventBus) {
    let id = encounter.id;
    let round = encounter.round;
    events.publish(Some(id), CombatEvent::RoundEnd { round });
    debug!(encounter = %id, round, "round ended");

    let outcome = match encounter.victory_met() {
        Some(victory) => Some(EncounterOutcome::Victory(victory)),
        None if encounter.party_defeated() => Some(EncounterOutcome::Defeat),
        None => None,
    };
    if let Some(outcome) = outcome {
        finish(encounter, outcome, events);
        return;
    }

    encounter.round += 1;
    encounter.current_turn = 0;
    events.publish(
        Some(id),
        CombatEvent::RoundStart {
            round: encounter.round,
        },
    );
    start_turn(encounter, dice, events);
}

fn finish(encounter: &mut CombatEncounter, outcome: EncounterOutcome, events: &EventBus) {
    encounter.phase = Phase::Resolution;
    let message = match outcome {
        EncounterOutcome::Victory(_) => "Victory",
        EncounterOutcome::Defeat => "Defeat",
        EncounterOutcome::Aborted => "Encounter ended",
    };
    encounter.log.push(
        encounter.round,
        None,
        format!("{message} after {} round(s)", encounter.round),
        Vec::new(),
    );

    encounter.phase = Phase::Ended;
    encounter.ended_at = Some(Utc::now());
    encounter.outcome = Some(outcome);
    info!(encounter = %encounter.id, ?outcome, rounds = encounter.round, "encounter ended");
    events.publish(
        Some(encounter.id),
        CombatEvent::CombatEnd {
            outcome,
            rounds: encounter.round,
        },
    );
}

fn describe_result(target: &str, result: &AttackResult) -> String {
    let mut text = match (&result.attack_roll, &result.save) {
        (Some(_), _) if !result.hit => return format!("misses {target}"),
        (Some(_), _) if result.critical => format!("critically hits {target}"),
        (Some(_), _) => format!("hits {target}"),
        (None, Some(save)) if save.success => format!("{target} saves"),
        (None, Some(_)) => format!("{target} fails the save"),
        (None, None) if result.healing > 0 => format!("heals {target}"),
        (None, None) => format!("affects {target}"),
    };
    if result.total_damage > 0 {
        let _ = write!(text, " for {} damage", result.total_damage);
    }
    if result.healing > 0 {
        let _ = write!(text, " for {} HP", result.healing);
    }
    for name in result.conditions_applied() {
        let _ = write!(text, ", {name}");
    }
    text
}

fn collect_rolls(results: &[AttackResult]) -> Vec<RollResult> {
    results
        .iter()
        .flat_map(AttackResult::rolls)
        .cloned()
        .collect()
}

fn log_condition_changes(
    encounter: &mut CombatEncounter,
    combatant: CombatantId,
    name: &str,
    changes: &[ConditionChange],
) {
    for change in changes {
        let message = match change {
            ConditionChange::Applied { name: c } => format!("{name} is {c}"),
            ConditionChange::Removed { name: c } => format!("{name} is no longer {c}"),
            ConditionChange::Expired { name: c } => format!("{c} on {name} wears off"),
            ConditionChange::SavedAgainst { name: c, roll, dc } => {
                format!("{name} shakes off {c} ({roll} vs DC {dc})")
            }
            ConditionChange::Resisted { name: c, roll, dc } => {
                format!("{name} resists {c} ({roll} vs DC {dc})")
            }
            ConditionChange::OngoingDamage { name: c, amount } => {
                format!("{name} takes {amount} damage from {c}")
            }
            ConditionChange::OngoingHealing { name: c, amount } => {
                format!("{name} regains {amount} HP from {c}")
            }
        };
        encounter
            .log
            .push(encounter.round, Some(combatant), message, Vec::new());
    }
}

fn log_concentration_checks(encounter: &mut CombatEncounter, checks: &[ConcentrationCheck]) {
    for check in checks {
        let name = encounter
            .combatant(check.caster)
            .map_or_else(|| check.caster.to_string(), |c| c.name.clone());
        let message = if check.maintained {
            format!("{name} keeps concentration on {} (DC {})", check.spell, check.dc)
        } else {
            format!("{name} loses concentration on {}", check.spell)
        };
        let rolls = check.save.iter().map(|s| s.roll.clone()).collect();
        encounter
            .log
            .push(encounter.round, Some(check.caster), message, rolls);
    }
}
