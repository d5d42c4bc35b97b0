//! Testing utilities for the rules engine.
//!
//! This module provides tools for integration testing:
//! - sample combatants and casters
//! - `scripted_dice` and `EventRecorder` for deterministic checks
//! - `TestHarness` wiring an engine and a spellcasting resolver to one bus
//! - assertion helpers for verifying encounter state

use crate::actions::{AttackSpec, CombatAction, DamageType};
use crate::combatant::{Ability, AbilityScores, Combatant, CombatantId, Team};
use crate::dice::DiceResolver;
use crate::encounter::{CombatEncounter, EncounterId, Phase};
use crate::engine::CombatEngine;
use crate::error::Result;
use crate::events::{EventBus, EventKind, EventRecord, SubscriptionId};
use crate::preset::RulePreset;
use crate::repository::InMemoryRepository;
use crate::spellcasting::{Spellcaster, SpellcastingResolver};
use crate::spells::SpellBook;
use std::sync::{Arc, Mutex};

/// Fighter with a +5 longsword (1d8+3), Dex 16.
pub fn sample_hero() -> Combatant {
    Combatant::new("Hero", Team::Player)
        .with_abilities(AbilityScores::new(16, 16, 14, 10, 12, 8))
        .with_armor_class(16)
        .with_hit_points(24)
        .with_save_proficiency(Ability::Strength)
        .with_save_proficiency(Ability::Constitution)
        .with_action(CombatAction::weapon(
            "Longsword",
            AttackSpec::melee(5),
            "1d8+3",
            DamageType::Slashing,
        ))
}

/// AC 13, 12 HP, +4 scimitar, one square east of the origin.
pub fn sample_goblin() -> Combatant {
    Combatant::new("Goblin", Team::Enemy)
        .with_armor_class(13)
        .with_hit_points(12)
        .at(1, 0)
        .with_action(CombatAction::weapon(
            "Scimitar",
            AttackSpec::melee(4),
            "1d6+2",
            DamageType::Slashing,
        ))
}

pub fn sample_wizard() -> Combatant {
    Combatant::new("Elara", Team::Player)
        .with_abilities(AbilityScores::new(8, 14, 12, 16, 12, 10))
        .with_armor_class(12)
        .with_hit_points(14)
        .with_save_proficiency(Ability::Intelligence)
        .with_spell("Fire Bolt")
        .with_spell("Magic Missile")
        .with_spell("Burning Hands")
        .with_spell("Hold Person")
        .with_spell("Fireball")
}

pub fn sample_cleric() -> Combatant {
    Combatant::new("Brother Aldous", Team::Ally)
        .with_abilities(AbilityScores::new(14, 10, 14, 10, 16, 12))
        .with_armor_class(16)
        .with_hit_points(20)
        .with_save_proficiency(Ability::Wisdom)
        .with_action(CombatAction::weapon(
            "Mace",
            AttackSpec::melee(4),
            "1d6+2",
            DamageType::Bludgeoning,
        ))
        .with_spell("Sacred Flame")
        .with_spell("Cure Wounds")
        .with_spell("Bless")
        .with_spell("Hold Person")
}

/// Fifth-level wizard: four 1st, three 2nd and two 3rd level slots.
pub fn sample_wizard_caster(wizard: &Combatant) -> Spellcaster {
    Spellcaster::new(wizard, Ability::Intelligence)
        .with_slots(&[(1, 4), (2, 3), (3, 2)])
        .knowing(wizard.spells.iter())
}

/// Cleric who prepares everything they know.
pub fn sample_cleric_caster(cleric: &Combatant) -> Spellcaster {
    Spellcaster::new(cleric, Ability::Wisdom)
        .with_slots(&[(1, 4), (2, 2)])
        .knowing(cleric.spells.iter())
        .preparing(cleric.spells.iter())
}

/// Dice that return `faces` in order before falling back to a fixed seed.
pub fn scripted_dice(faces: impl IntoIterator<Item = u32>) -> DiceResolver {
    let mut dice = DiceResolver::seeded(0);
    dice.supply(faces);
    dice
}

/// Collects every event published on a bus.
#[derive(Clone, Default)]
pub struct EventRecorder {
    records: Arc<Mutex<Vec<EventRecord>>>,
}

impl EventRecorder {
    pub fn attach(bus: &EventBus) -> (Self, SubscriptionId) {
        let recorder = Self::default();
        let sink = Arc::clone(&recorder.records);
        let id = bus.subscribe_all(move |record| {
            sink.lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(record.clone());
        });
        (recorder, id)
    }

    pub fn records(&self) -> Vec<EventRecord> {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.records().iter().map(EventRecord::kind).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.kinds().into_iter().filter(|k| *k == kind).count()
    }

    pub fn clear(&self) {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

/// An engine, a spellcasting resolver and one encounter sharing one bus.
pub struct TestHarness {
    pub engine: CombatEngine,
    pub spellcasting: SpellcastingResolver,
    pub encounter: EncounterId,
    pub recorder: EventRecorder,
}

impl TestHarness {
    pub fn new(combatants: Vec<Combatant>) -> Self {
        Self::with_rules(combatants, RulePreset::standard())
    }

    pub fn with_rules(combatants: Vec<Combatant>, rules: RulePreset) -> Self {
        let bus = EventBus::new();
        let (recorder, _) = EventRecorder::attach(&bus);
        let mut engine =
            CombatEngine::with_parts(InMemoryRepository::new(), DiceResolver::seeded(0), bus.clone());
        let spellcasting = SpellcastingResolver::with_parts(
            InMemoryRepository::new(),
            SpellBook::standard(),
            DiceResolver::seeded(1),
            bus,
        );
        let encounter = engine.create_encounter("Test Encounter", combatants, rules);
        Self {
            engine,
            spellcasting,
            encounter,
            recorder,
        }
    }

    /// Queue faces for the engine's dice (initiative, attacks, saves).
    pub fn script(&mut self, faces: impl IntoIterator<Item = u32>) -> &mut Self {
        self.engine.dice_mut().supply(faces);
        self
    }

    /// Queue faces for spell resolution.
    pub fn script_spells(&mut self, faces: impl IntoIterator<Item = u32>) -> &mut Self {
        self.spellcasting.dice_mut().supply(faces);
        self
    }

    pub fn register_caster(&mut self, caster: Spellcaster) -> &mut Self {
        self.spellcasting.register(caster);
        self
    }

    /// Roll initiative and start round 1.
    pub fn start(&mut self) -> Result<Vec<CombatantId>> {
        self.engine.roll_initiative(self.encounter)
    }

    pub fn state(&self) -> Result<&CombatEncounter> {
        self.engine.encounter(self.encounter)
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.state().ok()?.combatant(id)
    }

    pub fn hp(&self, id: CombatantId) -> Option<i32> {
        self.combatant(id).map(|c| c.hit_points.current)
    }

    pub fn phase(&self) -> Option<Phase> {
        self.state().ok().map(|e| e.phase)
    }

    pub fn log_messages(&self) -> Vec<String> {
        self.state()
            .map(|e| e.log.entries().iter().map(|l| l.message.clone()).collect())
            .unwrap_or_default()
    }

    /// End turns until `combatant` is up, at most one full round.
    pub fn advance_to(&mut self, combatant: CombatantId) -> Result<bool> {
        let turns = self.state()?.turn_order.len();
        for _ in 0..=turns {
            if self.state()?.current_combatant_id() == Some(combatant) {
                return Ok(true);
            }
            if self.phase() != Some(Phase::Combat) {
                return Ok(false);
            }
            self.engine.end_turn(self.encounter)?;
        }
        Ok(false)
    }
}

// ============================================================================
// Assertion Helpers
// ============================================================================

/// Assert a combatant's current HP.
pub fn assert_hp(harness: &TestHarness, combatant: CombatantId, expected: i32) {
    let actual = harness.hp(combatant);
    assert_eq!(
        actual,
        Some(expected),
        "Expected HP {expected}, got {actual:?}"
    );
}

pub fn assert_phase(harness: &TestHarness, expected: Phase) {
    assert_eq!(harness.phase(), Some(expected), "Unexpected encounter phase");
}

pub fn assert_has_condition(harness: &TestHarness, combatant: CombatantId, name: &str) {
    assert!(
        harness.combatant(combatant).is_some_and(|c| c.has_condition(name)),
        "Expected condition '{name}'"
    );
}

pub fn assert_lacks_condition(harness: &TestHarness, combatant: CombatantId, name: &str) {
    assert!(
        !harness.combatant(combatant).is_some_and(|c| c.has_condition(name)),
        "Expected no condition '{name}'"
    );
}

pub fn assert_event_count(harness: &TestHarness, kind: EventKind, expected: usize) {
    let actual = harness.recorder.count(kind);
    assert_eq!(actual, expected, "Expected {expected} {kind:?} event(s), got {actual}");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dice::Advantage;

    #[test]
    fn test_harness_starts_combat() {
        let hero = sample_hero();
        let goblin = sample_goblin();
        let mut harness = TestHarness::new(vec![hero.clone(), goblin.clone()]);
        harness.script([15, 12]);

        let order = harness.start().unwrap();
        assert_eq!(order, vec![hero.id, goblin.id]);
        assert_phase(&harness, Phase::Combat);
        assert_event_count(&harness, EventKind::CombatStart, 1);
        assert_event_count(&harness, EventKind::TurnStart, 1);
    }

    #[test]
    fn test_advance_to() {
        let hero = sample_hero();
        let goblin = sample_goblin();
        let mut harness = TestHarness::new(vec![hero.clone(), goblin.clone()]);
        harness.script([15, 12]);
        harness.start().unwrap();

        assert!(harness.advance_to(goblin.id).unwrap());
        assert_eq!(harness.state().unwrap().current_turn, 1);
        assert!(harness.advance_to(hero.id).unwrap());
        assert_eq!(harness.state().unwrap().round, 2);
    }

    #[test]
    fn test_scripted_dice() {
        let mut dice = scripted_dice([4, 17]);
        assert_eq!(dice.d20(0, Advantage::Normal).total, 4);
        assert_eq!(dice.d20(2, Advantage::Normal).total, 19);
        assert_eq!(dice.pending_faces(), 0);
    }

    #[test]
    fn test_sample_casters() {
        let wizard = sample_wizard();
        let caster = sample_wizard_caster(&wizard);
        assert_eq!(caster.save_dc, 13);
        assert_eq!(caster.known.len(), 5);
        assert_eq!(caster.available_slots(3), 2);

        let cleric = sample_cleric();
        let caster = sample_cleric_caster(&cleric);
        assert_eq!(caster.attack_bonus, 5);
        assert!(caster.is_prepared(&"Bless".into()));
    }
}
