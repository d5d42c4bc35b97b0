//! Spellcasting inside a running encounter.

use dnd_rules::events::{CombatEvent, ConcentrationEnd, EventKind};
use dnd_rules::testing::{
    assert_event_count, assert_has_condition, assert_hp, assert_lacks_condition,
    sample_cleric, sample_cleric_caster, sample_goblin, sample_wizard, sample_wizard_caster,
    TestHarness,
};
use dnd_rules::{ActionCost, CombatError, Combatant, RulePreset, SpellId};

fn goblin_at(name: &str, x: i32, y: i32) -> Combatant {
    let mut goblin = sample_goblin().at(x, y);
    goblin.name = name.to_string();
    goblin
}

#[test]
fn test_critical_cantrip_doubles_dice() {
    let wizard = sample_wizard();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![wizard.clone(), goblin.clone()]);
    harness.register_caster(sample_wizard_caster(&wizard));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness.script_spells([20, 3, 4]);
    let result = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Fire Bolt"),
            0,
            &[goblin.id],
        )
        .unwrap();

    let target = &result.targets[0];
    assert!(target.critical);
    assert_eq!(target.damage_rolls[0].expression.to_string(), "2d10");
    assert_eq!(result.total_damage(), 7);
    assert!(!result.slot_consumed);
    assert_hp(&harness, goblin.id, 5);
    assert!(harness.combatant(wizard.id).unwrap().economy.action_used);

    let err = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Fire Bolt"),
            0,
            &[goblin.id],
        )
        .unwrap_err();
    assert!(matches!(
        err,
        CombatError::ActionUnavailable {
            cost: ActionCost::Action,
            ..
        }
    ));
}

#[test]
fn test_burning_hands_saves_per_target() {
    let wizard = sample_wizard();
    let near = goblin_at("Goblin A", 1, 0);
    let far = goblin_at("Goblin B", 2, 0);
    let mut harness = TestHarness::new(vec![wizard.clone(), near.clone(), far.clone()]);
    harness.register_caster(sample_wizard_caster(&wizard));
    harness.script([20, 1, 1]);
    harness.start().unwrap();

    // A fails (5 vs DC 13) and takes 18; B saves (15) and takes half of 6
    harness.script_spells([5, 6, 6, 6, 15, 2, 2, 2]);
    let result = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Burning Hands"),
            1,
            &[near.id, far.id],
        )
        .unwrap();

    assert!(result.slot_consumed);
    assert_hp(&harness, near.id, 0);
    assert_has_condition(&harness, near.id, "Unconscious");
    assert_hp(&harness, far.id, 9);
    assert_eq!(
        harness
            .spellcasting
            .available_slots(wizard.id, 1)
            .unwrap(),
        3
    );
    assert_event_count(&harness, EventKind::SpellCast, 1);
    assert_event_count(&harness, EventKind::DamageDealt, 2);
    let last = harness.log_messages().pop().unwrap();
    assert!(last.starts_with("Elara casts Burning Hands at level 1"), "{last}");
}

#[test]
fn test_spells_respect_turn_order_and_phase() {
    let wizard = sample_wizard();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![wizard.clone(), goblin.clone()]);
    harness.register_caster(sample_wizard_caster(&wizard));

    let err = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Magic Missile"),
            1,
            &[goblin.id],
        )
        .unwrap_err();
    assert!(matches!(err, CombatError::InvalidPhase { .. }));

    harness.script([1, 20]);
    harness.start().unwrap();
    let err = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Magic Missile"),
            1,
            &[goblin.id],
        )
        .unwrap_err();
    assert!(matches!(err, CombatError::NotCombatantsTurn(id) if id == wizard.id));
    assert_eq!(
        harness
            .spellcasting
            .available_slots(wizard.id, 1)
            .unwrap(),
        4
    );
}

#[test]
fn test_damage_breaks_concentration() {
    let cleric = sample_cleric();
    let goblin = sample_goblin();
    let scimitar = goblin.actions[0].clone();
    let mut harness = TestHarness::new(vec![cleric.clone(), goblin.clone()]);
    harness.register_caster(sample_cleric_caster(&cleric));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            cleric.id,
            &SpellId::from("Bless"),
            1,
            &[cleric.id],
        )
        .unwrap();
    assert_has_condition(&harness, cleric.id, "Blessed");
    assert_eq!(
        harness.combatant(cleric.id).unwrap().concentration,
        Some(SpellId::from("bless"))
    );

    harness.engine.end_turn(harness.encounter).unwrap();
    harness.script([15, 6]);
    let results = harness
        .engine
        .execute_action(harness.encounter, &scimitar, &[cleric.id])
        .unwrap();
    assert_eq!(results[0].total_damage, 8);

    // DC 10; 3 + 2 (Con) + 2 (Blessed) = 7 fails
    harness.script_spells([3]);
    let checks = harness
        .engine
        .check_concentration(harness.encounter, &mut harness.spellcasting, &results)
        .unwrap();
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].dc, 10);
    assert!(!checks[0].maintained);
    assert_lacks_condition(&harness, cleric.id, "Blessed");
    assert_eq!(harness.combatant(cleric.id).unwrap().concentration, None);
    assert_event_count(&harness, EventKind::ConcentrationEnded, 1);
    assert!(harness
        .log_messages()
        .iter()
        .any(|m| m == "Brother Aldous loses concentration on bless"));
}

#[test]
fn test_hold_person_save_ends_on_later_turn() {
    let cleric = sample_cleric();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![cleric.clone(), goblin.clone()]);
    harness.register_caster(sample_cleric_caster(&cleric));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness.script_spells([2]);
    harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            cleric.id,
            &SpellId::from("Hold Person"),
            2,
            &[goblin.id],
        )
        .unwrap();
    assert_has_condition(&harness, goblin.id, "Paralyzed");

    harness.engine.end_turn(harness.encounter).unwrap();
    assert!(harness
        .engine
        .available_actions(harness.encounter, goblin.id)
        .unwrap()
        .is_empty());

    // End-of-turn Wisdom save against the cleric's DC 13
    harness.script([17]);
    harness.engine.end_turn(harness.encounter).unwrap();
    assert_lacks_condition(&harness, goblin.id, "Paralyzed");
    assert!(harness
        .spellcasting
        .spellcaster(cleric.id)
        .unwrap()
        .is_concentrating());

    // Nothing left to sustain: ends at the cleric's next turn boundary
    let expired = harness
        .engine
        .end_turn_with(harness.encounter, &mut harness.spellcasting)
        .unwrap();
    assert_eq!(expired, Some(SpellId::from("Hold Person")));
    assert_eq!(harness.combatant(cleric.id).unwrap().concentration, None);
}

#[test]
fn test_bless_expires_after_ten_rounds() {
    let cleric = sample_cleric();
    let goblin = sample_goblin();
    let mut harness = TestHarness::new(vec![cleric.clone(), goblin.clone()]);
    harness.register_caster(sample_cleric_caster(&cleric));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            cleric.id,
            &SpellId::from("Bless"),
            1,
            &[cleric.id],
        )
        .unwrap();

    for _ in 0..9 {
        for _ in 0..2 {
            let expired = harness
                .engine
                .end_turn_with(harness.encounter, &mut harness.spellcasting)
                .unwrap();
            assert_eq!(expired, None);
        }
    }
    assert_eq!(harness.state().unwrap().round, 10);
    assert_has_condition(&harness, cleric.id, "Blessed");
    assert!(harness
        .spellcasting
        .spellcaster(cleric.id)
        .unwrap()
        .is_concentrating());

    let expired = harness
        .engine
        .end_turn_with(harness.encounter, &mut harness.spellcasting)
        .unwrap();
    assert_eq!(expired, Some(SpellId::from("bless")));
    assert!(!harness
        .spellcasting
        .spellcaster(cleric.id)
        .unwrap()
        .is_concentrating());
    assert_eq!(harness.combatant(cleric.id).unwrap().concentration, None);
    assert_lacks_condition(&harness, cleric.id, "Blessed");

    let reasons: Vec<ConcentrationEnd> = harness
        .recorder
        .records()
        .into_iter()
        .filter_map(|r| match r.event {
            CombatEvent::ConcentrationEnded { reason, .. } => Some(reason),
            _ => None,
        })
        .collect();
    assert_eq!(reasons, vec![ConcentrationEnd::Expired]);
    assert!(harness
        .log_messages()
        .iter()
        .any(|m| m == "Brother Aldous's concentration on bless ends"));
}

#[test]
fn test_weapon_damage_rolls_concentration_save() {
    let cleric = sample_cleric();
    let goblin = sample_goblin();
    let scimitar = goblin.actions[0].clone();
    let mut harness = TestHarness::new(vec![cleric.clone(), goblin.clone()]);
    harness.register_caster(sample_cleric_caster(&cleric));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            cleric.id,
            &SpellId::from("Bless"),
            1,
            &[cleric.id],
        )
        .unwrap();
    harness.engine.end_turn(harness.encounter).unwrap();

    harness.script([15, 6]);
    harness.script_spells([18]);
    let (results, checks) = harness
        .engine
        .execute_action_with(
            harness.encounter,
            &mut harness.spellcasting,
            &scimitar,
            &[cleric.id],
        )
        .unwrap();
    assert_eq!(results[0].total_damage, 8);
    assert_eq!(checks.len(), 1);
    assert_eq!(checks[0].dc, 10);
    assert!(checks[0].maintained);
    assert_has_condition(&harness, cleric.id, "Blessed");
    assert_eq!(
        harness.combatant(cleric.id).unwrap().concentration,
        Some(SpellId::from("bless"))
    );
}

#[test]
fn test_spell_attack_natural_one_can_hit_without_automatic_rolls() {
    let wizard = sample_wizard();
    let goblin = sample_goblin().with_armor_class(2);
    let rules = RulePreset::standard().with_natural_rolls_automatic(false);
    let mut harness = TestHarness::with_rules(vec![wizard.clone(), goblin.clone()], rules);
    harness.register_caster(sample_wizard_caster(&wizard));
    harness.script([20, 1]);
    harness.start().unwrap();

    harness.script_spells([1, 7]);
    let result = harness
        .engine
        .cast_spell(
            harness.encounter,
            &mut harness.spellcasting,
            wizard.id,
            &SpellId::from("Fire Bolt"),
            0,
            &[goblin.id],
        )
        .unwrap();
    assert!(result.targets[0].hit);
    assert!(!result.targets[0].critical);
    assert_eq!(result.total_damage(), 7);
    assert_hp(&harness, goblin.id, 5);
}
