//! End-to-end encounter flow through the public engine API.

use dnd_rules::events::EventKind;
use dnd_rules::testing::{
    assert_event_count, assert_has_condition, assert_hp, assert_lacks_condition, assert_phase,
    sample_goblin, sample_hero, TestHarness,
};
use dnd_rules::{
    ActionCost, AttackSpec, CombatAction, CombatCondition, CombatError, DamageType, Effect,
    EncounterOutcome, Phase, Requirement, VictoryCondition,
};

#[test]
fn test_hero_hits_goblin_for_eight() {
    let hero = sample_hero();
    let goblin = sample_goblin();
    let longsword = hero.find_action("Longsword").unwrap().clone();
    let mut harness = TestHarness::new(vec![hero.clone(), goblin.clone()]);

    harness.script([15, 12]);
    let order = harness.start().unwrap();
    assert_eq!(order, vec![hero.id, goblin.id]);
    assert_eq!(harness.combatant(hero.id).unwrap().initiative, 18);

    harness.script([12, 5]);
    let results = harness
        .engine
        .execute_action(harness.encounter, &longsword, &[goblin.id])
        .unwrap();

    let result = &results[0];
    assert!(result.hit);
    assert!(!result.critical);
    assert_eq!(result.attack_roll.as_ref().unwrap().total, 17);
    assert_eq!(result.total_damage, 8);
    assert_hp(&harness, goblin.id, 12 - 8);

    let hits: Vec<String> = harness
        .log_messages()
        .into_iter()
        .filter(|m| m.contains("hits"))
        .collect();
    assert_eq!(hits.len(), 1);
    assert!(hits[0].contains("for 8 damage"), "{}", hits[0]);
    assert_event_count(&harness, EventKind::DamageDealt, 1);
}

#[test]
fn test_victory_is_announced_once() {
    let hero = sample_hero();
    let mut goblin = sample_goblin();
    goblin.hit_points.current = 0;
    let mut harness = TestHarness::new(vec![hero, goblin.clone()]);
    assert_has_condition(&harness, goblin.id, "Unconscious");

    harness.script([15, 12]);
    harness.start().unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();

    assert_phase(&harness, Phase::Ended);
    let state = harness.state().unwrap();
    assert_eq!(
        state.outcome,
        Some(EncounterOutcome::Victory(VictoryCondition::DefeatAll))
    );
    assert!(state.ended_at.is_some());
    assert_event_count(&harness, EventKind::CombatEnd, 1);

    let again = harness.engine.end_turn(harness.encounter);
    assert!(matches!(again, Err(CombatError::InvalidPhase { .. })));
    assert_event_count(&harness, EventKind::CombatEnd, 1);
}

#[test]
fn test_party_wipe_is_a_defeat() {
    let mut hero = sample_hero();
    hero.hit_points.current = 0;
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![hero, goblin]);

    harness.script([15, 12]);
    harness.start().unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();

    assert_eq!(harness.state().unwrap().outcome, Some(EncounterOutcome::Defeat));
}

#[test]
fn test_turn_and_round_events_in_order() {
    let hero = sample_hero();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![hero, goblin]);
    harness.script([15, 12]);
    harness.start().unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();

    use EventKind::*;
    assert_eq!(
        harness.recorder.kinds(),
        vec![
            CombatStart,
            RoundStart,
            TurnStart,
            TurnEnd,
            TurnStart,
            TurnEnd,
            RoundEnd,
            RoundStart,
            TurnStart,
        ]
    );
    assert_eq!(harness.state().unwrap().round, 2);
}

#[test]
fn test_knocked_out_combatant_cannot_act() {
    let hero = sample_hero();
    let mut goblin = sample_goblin();
    goblin.hit_points.current = 5;
    let scimitar = goblin.actions[0].clone();
    let longsword = hero.actions[0].clone();
    let mut harness = TestHarness::new(vec![hero.clone(), goblin.clone()]);

    harness.script([15, 12]);
    harness.start().unwrap();
    harness.script([14, 6]);
    let results = harness
        .engine
        .execute_action(harness.encounter, &longsword, &[goblin.id])
        .unwrap();
    assert!(results[0].dropped_to_zero());
    assert_hp(&harness, goblin.id, 0);
    assert_has_condition(&harness, goblin.id, "Unconscious");

    harness.engine.end_turn(harness.encounter).unwrap();
    let err = harness
        .engine
        .execute_action(harness.encounter, &scimitar, &[hero.id])
        .unwrap_err();
    assert!(matches!(err, CombatError::Incapacitated(id) if id == goblin.id));
    assert!(harness
        .engine
        .available_actions(harness.encounter, goblin.id)
        .unwrap()
        .is_empty());
}

#[test]
fn test_condition_expires_at_end_of_targets_turn() {
    let dart = CombatAction::new("Sleep Dart", ActionCost::Action)
        .with_attack(AttackSpec::ranged(4))
        .with_damage("1d4", DamageType::Piercing)
        .with_effect(Effect::Condition(
            CombatCondition::new("Drowsy", "Sleep Dart").with_duration(1),
        ));
    let hero = sample_hero().with_action(dart.clone());
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![hero, goblin.clone()]);

    harness.script([15, 12]);
    harness.start().unwrap();
    harness.script([15, 2]);
    harness
        .engine
        .execute_action(harness.encounter, &dart, &[goblin.id])
        .unwrap();
    assert_has_condition(&harness, goblin.id, "Drowsy");

    harness.engine.end_turn(harness.encounter).unwrap();
    assert_has_condition(&harness, goblin.id, "Drowsy");
    harness.engine.end_turn(harness.encounter).unwrap();
    assert_lacks_condition(&harness, goblin.id, "Drowsy");
    assert_event_count(&harness, EventKind::ConditionApplied, 1);
    assert_event_count(&harness, EventKind::ConditionRemoved, 1);
}

#[test]
fn test_ongoing_damage_at_start_of_turn() {
    let hero = sample_hero();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![hero, goblin.clone()]);
    harness.script([15, 12]);
    harness.start().unwrap();

    let torch = CombatAction::new("Torch", ActionCost::Action).with_effect(Effect::Condition(
        CombatCondition::new("Burning", "Torch")
            .with_duration(2)
            .with_effect(Effect::damage("1d4", DamageType::Fire)),
    ));
    harness
        .engine
        .execute_action(harness.encounter, &torch, &[goblin.id])
        .unwrap();

    harness.script([3]);
    harness.engine.end_turn(harness.encounter).unwrap();
    assert_hp(&harness, goblin.id, 9);
    assert!(harness
        .log_messages()
        .iter()
        .any(|m| m == "Goblin takes 3 damage from Burning"));
}

#[test]
fn test_ongoing_damage_published_before_turn_start() {
    let hero = sample_hero();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![hero, goblin.clone()]);
    harness.script([15, 12]);
    harness.start().unwrap();

    let torch = CombatAction::new("Torch", ActionCost::Action).with_effect(Effect::Condition(
        CombatCondition::new("Burning", "Torch")
            .with_duration(2)
            .with_effect(Effect::damage("1d4", DamageType::Fire)),
    ));
    harness
        .engine
        .execute_action(harness.encounter, &torch, &[goblin.id])
        .unwrap();

    harness.recorder.clear();
    harness.script([3]);
    harness.engine.end_turn(harness.encounter).unwrap();

    let kinds = harness.recorder.kinds();
    assert_eq!(kinds.first(), Some(&EventKind::TurnEnd));
    assert_eq!(kinds.last(), Some(&EventKind::TurnStart));
    let damage = kinds
        .iter()
        .position(|k| *k == EventKind::DamageDealt)
        .expect("ongoing damage event");
    let turn_start = kinds
        .iter()
        .position(|k| *k == EventKind::TurnStart)
        .expect("turn start event");
    assert!(damage < turn_start);

    let damage_record = harness
        .recorder
        .records()
        .into_iter()
        .find(|r| r.kind() == EventKind::DamageDealt)
        .unwrap();
    assert!(matches!(
        damage_record.event,
        dnd_rules::CombatEvent::DamageDealt { amount: 3, hp_after: 9, .. }
    ));
}

#[test]
fn test_range_requirement_checked_before_cost() {
    let hero = sample_hero();
    let goblin = sample_goblin().at(5, 0);
    let lunge = CombatAction::weapon("Lunge", AttackSpec::melee(5), "1d8+3", DamageType::Piercing)
        .with_requirement(Requirement::WithinRange(10));
    let mut harness = TestHarness::new(vec![hero.clone(), goblin.clone()]);
    harness.script([15, 12]);
    harness.start().unwrap();

    let err = harness
        .engine
        .execute_action(harness.encounter, &lunge, &[goblin.id])
        .unwrap_err();
    assert!(matches!(
        err,
        CombatError::TargetOutOfRange { distance: 25, range: 10, .. }
    ));
    assert!(!harness.combatant(hero.id).unwrap().economy.action_used);
}

#[test]
fn test_end_encounter_aborts() {
    let mut harness = TestHarness::new(vec![sample_hero(), sample_goblin()]);
    harness.start().unwrap();
    let outcome = harness.engine.end_encounter(harness.encounter).unwrap();
    assert_eq!(outcome, EncounterOutcome::Aborted);
    assert_phase(&harness, Phase::Ended);
    assert_event_count(&harness, EventKind::CombatEnd, 1);
}

#[test]
fn test_action_log_serializes() {
    let hero = sample_hero();
    let goblin = sample_goblin();
    let longsword = hero.actions[0].clone();
    let mut harness = TestHarness::new(vec![hero, goblin.clone()]);
    harness.script([15, 12, 12, 5]);
    harness.start().unwrap();
    harness
        .engine
        .execute_action(harness.encounter, &longsword, &[goblin.id])
        .unwrap();

    let json = harness.state().unwrap().log.to_json().unwrap();
    let entries: serde_json::Value = serde_json::from_str(&json).unwrap();
    let entries = entries.as_array().unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1]["rolls"].as_array().unwrap().len(), 2);
}
