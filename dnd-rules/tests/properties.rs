//! Property tests for the engine's core invariants.

use dnd_rules::combatant::HitPoints;
use dnd_rules::engine::initiative_order;
use dnd_rules::spellcasting::Spellcaster;
use dnd_rules::{
    Ability, AbilityScores, CombatError, Combatant, DiceExpression, DiceResolver, RollOptions,
    SpellBook, SpellcastingResolver, Team,
};
use dnd_rules::{EventBus, InMemoryRepository, SpellId};
use proptest::prelude::*;

proptest! {
    #[test]
    fn hp_never_drops_below_zero(
        maximum in 1i32..200,
        temporary in 0i32..20,
        hits in prop::collection::vec(-5i32..80, 0..20),
    ) {
        let mut hp = HitPoints::new(maximum);
        hp.add_temp_hp(temporary);
        let mut dropped = 0;
        for amount in hits {
            let taken = hp.take_damage(amount);
            prop_assert!(hp.current >= 0);
            prop_assert!(hp.temporary >= 0);
            prop_assert_eq!(taken.absorbed_by_temporary + taken.hp_lost <= taken.amount, true);
            if taken.dropped_to_zero {
                dropped += 1;
            }
        }
        prop_assert!(dropped <= 1);
        prop_assert_eq!(dropped == 1, hp.current == 0);
    }

    #[test]
    fn initiative_order_is_non_increasing(
        rolls in prop::collection::vec((-2i32..25, 1u8..20), 1..10),
    ) {
        let combatants: Vec<Combatant> = rolls
            .iter()
            .map(|&(initiative, dex)| {
                let mut c = Combatant::new("c", Team::Enemy)
                    .with_abilities(AbilityScores::new(10, dex, 10, 10, 10, 10));
                c.initiative = initiative;
                c
            })
            .collect();

        let order = initiative_order(&combatants);
        prop_assert_eq!(order.len(), combatants.len());
        let keyed: Vec<(i32, u8)> = order
            .iter()
            .map(|id| {
                let c = combatants.iter().find(|c| c.id == *id).unwrap();
                (c.initiative, c.ability_scores.dexterity)
            })
            .collect();
        for pair in keyed.windows(2) {
            prop_assert!(pair[0] >= pair[1]);
        }
    }

    #[test]
    fn doubled_dice_doubles_only_the_dice(count in 1u32..6, sides in prop::sample::select(vec![4u32, 6, 8, 10, 12]), modifier in 0i32..6) {
        let expr = DiceExpression::dice(count, sides).plus(modifier);
        let doubled = expr.doubled_dice();
        prop_assert_eq!(doubled.dice_count(), 2 * expr.dice_count());
        prop_assert_eq!(doubled.modifier, expr.modifier);
        prop_assert_eq!(doubled.max_dice_total(), 2 * expr.max_dice_total());

        let mut dice = DiceResolver::seeded(u64::from(count * sides));
        let roll = dice.roll(&doubled, &RollOptions::default());
        let low = 2 * count as i32 + modifier;
        let high = doubled.max_dice_total() + modifier;
        prop_assert!(roll.total >= low && roll.total <= high);
    }

    #[test]
    fn slots_are_consumed_all_or_nothing(
        totals in prop::collection::vec(0u32..3, 3),
        attempts in prop::collection::vec(1u8..5, 0..12),
    ) {
        let wizard = Combatant::new("Wizard", Team::Player)
            .with_abilities(AbilityScores::new(10, 10, 10, 16, 10, 10));
        let goblin = Combatant::new("Goblin", Team::Enemy).with_hit_points(500).at(1, 0);
        let caster = Spellcaster::new(&wizard, Ability::Intelligence)
            .with_slots(&[(1, totals[0]), (2, totals[1]), (3, totals[2])])
            .knowing(["Magic Missile"]);
        let mut resolver = SpellcastingResolver::with_parts(
            InMemoryRepository::new(),
            SpellBook::standard(),
            DiceResolver::seeded(3),
            EventBus::new(),
        );
        resolver.register(caster);
        let (wizard_id, goblin_id) = (wizard.id, goblin.id);
        let mut roster = vec![wizard, goblin];
        let missile = SpellId::from("Magic Missile");

        let mut successes = 0u32;
        for level in attempts {
            let before: u32 = resolver.spellcaster(wizard_id).unwrap().slots.iter().map(|s| s.used).sum();
            match resolver.cast_spell(&mut roster, wizard_id, &missile, level, &[goblin_id]) {
                Ok(result) => {
                    prop_assert!(result.slot_consumed);
                    successes += 1;
                    let after: u32 = resolver.spellcaster(wizard_id).unwrap().slots.iter().map(|s| s.used).sum();
                    prop_assert_eq!(after, before + 1);
                }
                Err(err) => {
                    let is_slot_error = matches!(err, CombatError::NoSpellSlot { .. });
                    prop_assert!(is_slot_error);
                    let after: u32 = resolver.spellcaster(wizard_id).unwrap().slots.iter().map(|s| s.used).sum();
                    prop_assert_eq!(after, before);
                }
            }
        }

        let record = resolver.spellcaster(wizard_id).unwrap();
        for slot in &record.slots {
            prop_assert!(slot.used <= slot.total);
        }
        prop_assert_eq!(record.slots.iter().map(|s| s.used).sum::<u32>(), successes);
    }
}
