//! Headless Skirmish Runner
//!
//! Plays a scripted party-versus-goblins fight with simple AI on both sides
//! and prints the action log.

use anyhow::{Context, Result};
use clap::Parser;
use dnd_rules::engine::movement_cost;
use dnd_rules::testing::{
    sample_cleric, sample_cleric_caster, sample_goblin, sample_hero, sample_wizard,
    sample_wizard_caster,
};
use dnd_rules::{
    ActionCost, CombatEncounter, CombatEngine, Combatant, CombatantId, DiceResolver,
    EncounterId, EventBus, InMemoryRepository, Position, RulePreset, SpellBook, SpellId,
    SpellcastingResolver,
};
use std::path::PathBuf;
use tracing::{info, warn};

/// Headless Skirmish Runner - party vs goblins
#[derive(Parser, Debug)]
#[command(name = "dnd-skirmish")]
#[command(about = "Run a party-versus-goblins skirmish and print the action log")]
struct Args {
    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Rules preset (TOML)
    #[arg(long)]
    preset: Option<PathBuf>,

    /// Rounds before the fight is called off
    #[arg(long, default_value_t = 10)]
    rounds: u32,

    /// Print the action log as JSON
    #[arg(long)]
    json: bool,
}

type Engine = CombatEngine;
type Casting = SpellcastingResolver;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "dnd_rules=info".into()),
        )
        .init();

    let args = Args::parse();
    let rules = match &args.preset {
        Some(path) => RulePreset::load(path)
            .with_context(|| format!("loading preset {}", path.display()))?,
        None => RulePreset::standard(),
    };

    let bus = EventBus::new();
    let (engine_dice, spell_dice) = match args.seed {
        Some(seed) => (
            DiceResolver::seeded(seed),
            DiceResolver::seeded(seed.wrapping_add(1)),
        ),
        None => (DiceResolver::new(), DiceResolver::new()),
    };
    let mut engine = Engine::with_parts(InMemoryRepository::new(), engine_dice, bus.clone());
    let mut spellcasting = Casting::with_parts(
        InMemoryRepository::new(),
        SpellBook::standard(),
        spell_dice,
        bus,
    );

    let id = setup(&mut engine, &mut spellcasting, rules);
    engine.roll_initiative(id)?;

    loop {
        let encounter = engine.encounter(id)?;
        if encounter.is_over() {
            break;
        }
        if encounter.round > args.rounds {
            engine.end_encounter(id)?;
            break;
        }
        let Some(actor) = encounter.current_combatant().cloned() else {
            break;
        };
        if actor.is_conscious() && actor.can_act() {
            take_turn(&mut engine, &mut spellcasting, id, &actor)?;
        }
        if !engine.encounter(id)?.is_over() {
            if let Some(spell) = engine.end_turn_with(id, &mut spellcasting)? {
                info!(caster = %actor.name, spell = %spell, "concentration expired");
            }
        }
    }

    let encounter = engine.encounter(id)?;
    if args.json {
        println!("{}", encounter.log.to_json()?);
    } else {
        for entry in encounter.log.entries() {
            println!("[round {}] {}", entry.round, entry.message);
        }
    }
    info!(outcome = ?encounter.outcome, rounds = encounter.round, "skirmish finished");
    Ok(())
}

fn setup(engine: &mut Engine, spellcasting: &mut Casting, rules: RulePreset) -> EncounterId {
    let hero = sample_hero().at(3, 5);
    let wizard = sample_wizard().at(1, 4);
    let cleric = sample_cleric().at(2, 6);
    spellcasting.register(sample_wizard_caster(&wizard));
    spellcasting.register(sample_cleric_caster(&cleric));

    let goblins = [(9, 4), (9, 5), (10, 6)]
        .into_iter()
        .enumerate()
        .map(|(i, (x, y))| {
            let mut goblin = sample_goblin().at(x, y);
            goblin.name = format!("Goblin {}", i + 1);
            goblin
        });

    let mut combatants = vec![hero, wizard, cleric];
    combatants.extend(goblins);
    engine.create_encounter("Goblin Ambush", combatants, rules)
}

fn take_turn(
    engine: &mut Engine,
    spellcasting: &mut Casting,
    id: EncounterId,
    actor: &Combatant,
) -> Result<()> {
    if spellcasting.spellcaster(actor.id).is_ok() {
        let Some(spell) = choose_spell(engine.encounter(id)?, spellcasting, actor) else {
            return melee(engine, spellcasting, id, actor);
        };
        let (spell_id, level, targets) = spell;
        match engine.cast_spell(id, spellcasting, actor.id, &spell_id, level, &targets) {
            Ok(_) => return Ok(()),
            Err(err) => warn!(caster = %actor.name, spell = %spell_id, %err, "cast failed"),
        }
    }
    melee(engine, spellcasting, id, actor)
}

/// Close in on the nearest enemy and swing.
fn melee(
    engine: &mut Engine,
    spellcasting: &mut Casting,
    id: EncounterId,
    actor: &Combatant,
) -> Result<()> {
    let Some(target) = nearest_enemy(engine.encounter(id)?, actor) else {
        return Ok(());
    };
    approach(engine, id, actor.id, target.position)?;

    let encounter = engine.encounter(id)?;
    let in_reach = encounter
        .combatant(actor.id)
        .is_some_and(|me| me.position.is_adjacent(target.position));
    let Some(action) = actor
        .actions
        .iter()
        .find(|a| a.cost == ActionCost::Action && a.attack.is_some())
        .cloned()
    else {
        return Ok(());
    };
    if !in_reach {
        return Ok(());
    }

    let (_, checks) = engine.execute_action_with(id, spellcasting, &action, &[target.id])?;
    if checks.iter().any(|c| !c.maintained) {
        info!(target = %target.name, "concentration broken");
    }
    Ok(())
}

fn nearest_enemy(encounter: &CombatEncounter, actor: &Combatant) -> Option<Combatant> {
    encounter
        .standing_enemies_of(actor.team)
        .min_by_key(|c| actor.position.feet_to(c.position))
        .cloned()
}

/// Walk straight toward `target` until adjacent, blocked or out of movement.
fn approach(engine: &mut Engine, id: EncounterId, mover: CombatantId, target: Position) -> Result<()> {
    let encounter = engine.encounter(id)?;
    let Some(me) = encounter.combatant(mover) else {
        return Ok(());
    };
    let rule = encounter.rules.diagonal_movement;
    let occupied: Vec<Position> = encounter
        .combatants
        .iter()
        .filter(|c| c.id != mover && c.is_conscious())
        .map(|c| c.position)
        .collect();

    let start = me.position;
    let remaining = me.remaining_movement();
    let mut step = start;
    while !step.is_adjacent(target) {
        let next = Position::new(
            step.x + (target.x - step.x).signum(),
            step.y + (target.y - step.y).signum(),
        );
        if next == target || occupied.contains(&next) || movement_cost(start, next, rule) > remaining {
            break;
        }
        step = next;
    }

    if step != start {
        engine.move_combatant(id, mover, step)?;
    }
    Ok(())
}

/// Pick a spell, cast level and targets for a caster, if any applies.
fn choose_spell(
    encounter: &CombatEncounter,
    spellcasting: &Casting,
    actor: &Combatant,
) -> Option<(SpellId, u8, Vec<CombatantId>)> {
    let record = spellcasting.spellcaster(actor.id).ok()?;
    let mut enemies: Vec<&Combatant> = encounter.standing_enemies_of(actor.team).collect();
    enemies.sort_by_key(|c| actor.position.feet_to(c.position));
    let within = |feet: u32| -> Vec<CombatantId> {
        enemies
            .iter()
            .filter(|c| actor.position.feet_to(c.position) <= feet)
            .map(|c| c.id)
            .collect()
    };
    let has_slot = record.available_slots(1) > 0;
    let knows = |name: &str| record.knows(&SpellId::from(name));

    if knows("Bless") && has_slot && !record.is_concentrating() {
        let friends: Vec<CombatantId> = encounter
            .combatants
            .iter()
            .filter(|c| c.team.is_friendly_to(actor.team) && c.is_conscious())
            .filter(|c| actor.position.feet_to(c.position) <= 30)
            .take(3)
            .map(|c| c.id)
            .collect();
        if !friends.is_empty() {
            return Some(("Bless".into(), 1, friends));
        }
    }

    if knows("Cure Wounds") && has_slot {
        let wounded = encounter.combatants.iter().find(|c| {
            c.team.is_friendly_to(actor.team)
                && c.hit_points.current * 2 < c.hit_points.maximum
                && actor.position.feet_to(c.position) <= 5
        });
        if let Some(wounded) = wounded {
            return Some(("Cure Wounds".into(), 1, vec![wounded.id]));
        }
    }

    if knows("Burning Hands") && has_slot {
        let cone = within(15);
        if cone.len() >= 2 {
            return Some(("Burning Hands".into(), 1, cone));
        }
    }

    let nearest = enemies.first()?;
    if knows("Magic Missile") && has_slot && actor.position.feet_to(nearest.position) <= 120 {
        return Some(("Magic Missile".into(), 1, vec![nearest.id]));
    }
    for (cantrip, range) in [("Fire Bolt", 120), ("Sacred Flame", 60)] {
        if knows(cantrip) && actor.position.feet_to(nearest.position) <= range {
            return Some((cantrip.into(), 0, vec![nearest.id]));
        }
    }
    None
}
