//! Spell definitions and the spell book.
//!
//! Contains a small SRD-style spell list and the types describing each
//! spell's casting requirements and combat mechanics.

use crate::actions::{ActionCost, DamageType, Effect, Stat};
use crate::combatant::Ability;
use crate::conditions::{CombatCondition, SaveTiming};
use crate::dice::{DiceError, DiceExpression};
use crate::repository::{InMemoryRepository, Repository};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Spell lookup key: the lower-cased name with spaces turned into dashes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SpellId(String);

impl SpellId {
    pub fn new(name: &str) -> Self {
        let slug = name
            .trim()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join("-")
            .to_lowercase();
        Self(slug)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SpellId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl From<String> for SpellId {
    fn from(name: String) -> Self {
        Self::new(&name)
    }
}

impl From<&SpellId> for SpellId {
    fn from(id: &SpellId) -> Self {
        id.clone()
    }
}

impl fmt::Display for SpellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Schools of magic in D&D.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellSchool {
    Abjuration,
    Conjuration,
    Divination,
    Enchantment,
    Evocation,
    Illusion,
    Necromancy,
    Transmutation,
}

impl SpellSchool {
    pub fn name(&self) -> &'static str {
        match self {
            SpellSchool::Abjuration => "Abjuration",
            SpellSchool::Conjuration => "Conjuration",
            SpellSchool::Divination => "Divination",
            SpellSchool::Enchantment => "Enchantment",
            SpellSchool::Evocation => "Evocation",
            SpellSchool::Illusion => "Illusion",
            SpellSchool::Necromancy => "Necromancy",
            SpellSchool::Transmutation => "Transmutation",
        }
    }
}

/// How long it takes to cast a spell.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum CastingTime {
    Action,
    BonusAction,
    Reaction(String), // Trigger condition
    Minutes(u32),
    Hours(u32),
}

impl CastingTime {
    /// Action-economy cost when cast in combat; `None` if it takes too long.
    pub fn action_cost(&self) -> Option<ActionCost> {
        match self {
            CastingTime::Action => Some(ActionCost::Action),
            CastingTime::BonusAction => Some(ActionCost::BonusAction),
            CastingTime::Reaction(_) => Some(ActionCost::Reaction),
            CastingTime::Minutes(_) | CastingTime::Hours(_) => None,
        }
    }
}

impl fmt::Display for CastingTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CastingTime::Action => write!(f, "1 action"),
            CastingTime::BonusAction => write!(f, "1 bonus action"),
            CastingTime::Reaction(trigger) => write!(f, "1 reaction, {trigger}"),
            CastingTime::Minutes(m) => write!(f, "{m} minute{}", if *m == 1 { "" } else { "s" }),
            CastingTime::Hours(h) => write!(f, "{h} hour{}", if *h == 1 { "" } else { "s" }),
        }
    }
}

/// Range of a spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellRange {
    Self_,
    Touch,
    Feet(u32),
    Sight,
    Unlimited,
    SelfRadius(u32), // Self with radius (e.g., Thunderwave)
    SelfCone(u32),   // Self with cone (e.g., Burning Hands)
}

impl SpellRange {
    /// Furthest a target may be, in feet. `None` means no limit.
    pub fn reach_feet(&self) -> Option<u32> {
        match self {
            SpellRange::Self_ => Some(0),
            SpellRange::Touch => Some(5),
            SpellRange::Feet(f) | SpellRange::SelfRadius(f) | SpellRange::SelfCone(f) => Some(*f),
            SpellRange::Sight | SpellRange::Unlimited => None,
        }
    }
}

/// Spell components required.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Components {
    pub verbal: bool,
    pub somatic: bool,
    pub material: Option<String>,
}

impl Components {
    pub fn v() -> Self {
        Self {
            verbal: true,
            somatic: false,
            material: None,
        }
    }

    pub fn vs() -> Self {
        Self {
            verbal: true,
            somatic: true,
            material: None,
        }
    }

    pub fn vsm(material: &str) -> Self {
        Self {
            verbal: true,
            somatic: true,
            material: Some(material.to_string()),
        }
    }
}

/// Duration of a spell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellDuration {
    Instantaneous,
    Rounds(u32),
    Minutes(u32),
    Hours(u32),
    UntilDispelled,
}

impl SpellDuration {
    /// Length in combat rounds (6 seconds each). `None` for open-ended durations.
    pub fn rounds(&self) -> Option<u32> {
        match self {
            SpellDuration::Instantaneous => Some(0),
            SpellDuration::Rounds(r) => Some(*r),
            SpellDuration::Minutes(m) => Some(m * 10),
            SpellDuration::Hours(h) => Some(h * 600),
            SpellDuration::UntilDispelled => None,
        }
    }
}

/// Type of spell attack (if any).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SpellAttackType {
    Melee,
    Ranged,
}

/// What a successful save against a spell does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SaveEffect {
    /// The target is unaffected.
    Negates,
    /// Damage is halved; other effects are avoided.
    HalfDamage,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellSave {
    pub ability: Ability,
    pub on_success: SaveEffect,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellDamage {
    pub dice: String,
    pub damage_type: DamageType,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpellHealing {
    pub dice: String,
    /// Add the caster's spellcasting ability modifier.
    pub add_modifier: bool,
}

/// Extra dice and modifier gained per `interval` slot levels above the base.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpcastScaling {
    pub extra_dice: Option<String>,
    pub extra_modifier: i32,
    pub interval: u8,
}

impl UpcastScaling {
    pub fn per_level(extra_dice: &str) -> Self {
        Self {
            extra_dice: Some(extra_dice.to_string()),
            extra_modifier: 0,
            interval: 1,
        }
    }

    /// Number of scaling steps earned by casting a `base` spell at `level`.
    pub fn steps(&self, base: u8, level: u8) -> u32 {
        if level <= base || self.interval == 0 {
            return 0;
        }
        ((level - base) / self.interval) as u32
    }

    /// Scale `expr` for a cast at `level`. Applied before anything is rolled.
    pub fn apply(&self, expr: &DiceExpression, base: u8, level: u8) -> Result<DiceExpression, DiceError> {
        let steps = self.steps(base, level);
        if steps == 0 {
            return Ok(expr.clone());
        }
        let mut scaled = match &self.extra_dice {
            Some(extra) => expr.with_extra(&DiceExpression::parse(extra)?, steps),
            None => expr.clone(),
        };
        scaled.modifier += self.extra_modifier * steps as i32;
        Ok(scaled)
    }
}

/// Complete spell definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spell {
    pub id: SpellId,
    pub name: String,
    pub level: u8, // 0 for cantrips
    pub school: SpellSchool,
    pub casting_time: CastingTime,
    pub range: SpellRange,
    pub components: Components,
    pub duration: SpellDuration,
    pub concentration: bool,

    // Combat mechanics
    pub attack: Option<SpellAttackType>,
    pub saving_throw: Option<SpellSave>,
    pub damage: Option<SpellDamage>,
    pub healing: Option<SpellHealing>,
    pub scaling: Option<UpcastScaling>,
    /// Applied to each target the spell lands on.
    pub effects: Vec<Effect>,
    /// `None` means any number of targets (area spells).
    pub max_targets: Option<usize>,
}

impl Spell {
    pub fn new(name: &str, level: u8, school: SpellSchool) -> Self {
        Self {
            id: SpellId::new(name),
            name: name.to_string(),
            level,
            school,
            casting_time: CastingTime::Action,
            range: SpellRange::Feet(60),
            components: Components::vs(),
            duration: SpellDuration::Instantaneous,
            concentration: false,
            attack: None,
            saving_throw: None,
            damage: None,
            healing: None,
            scaling: None,
            effects: Vec::new(),
            max_targets: Some(1),
        }
    }

    pub fn is_cantrip(&self) -> bool {
        self.level == 0
    }

    pub fn with_casting_time(mut self, casting_time: CastingTime) -> Self {
        self.casting_time = casting_time;
        self
    }

    pub fn with_range(mut self, range: SpellRange) -> Self {
        self.range = range;
        self
    }

    pub fn with_components(mut self, components: Components) -> Self {
        self.components = components;
        self
    }

    pub fn with_duration(mut self, duration: SpellDuration) -> Self {
        self.duration = duration;
        self
    }

    pub fn concentration(mut self) -> Self {
        self.concentration = true;
        self
    }

    pub fn with_attack(mut self, attack: SpellAttackType) -> Self {
        self.attack = Some(attack);
        self
    }

    pub fn with_save(mut self, ability: Ability, on_success: SaveEffect) -> Self {
        self.saving_throw = Some(SpellSave {
            ability,
            on_success,
        });
        self
    }

    pub fn with_damage(mut self, dice: &str, damage_type: DamageType) -> Self {
        self.damage = Some(SpellDamage {
            dice: dice.to_string(),
            damage_type,
        });
        self
    }

    pub fn with_healing(mut self, dice: &str, add_modifier: bool) -> Self {
        self.healing = Some(SpellHealing {
            dice: dice.to_string(),
            add_modifier,
        });
        self
    }

    pub fn with_scaling(mut self, scaling: UpcastScaling) -> Self {
        self.scaling = Some(scaling);
        self
    }

    pub fn with_effect(mut self, effect: Effect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn with_max_targets(mut self, max: Option<usize>) -> Self {
        self.max_targets = max;
        self
    }

    fn scaled(&self, dice: &str, level: u8) -> Result<DiceExpression, DiceError> {
        let expr = DiceExpression::parse(dice)?;
        match &self.scaling {
            Some(scaling) => scaling.apply(&expr, self.level, level),
            None => Ok(expr),
        }
    }

    /// Damage expression for a cast at `level`, upcast scaling included.
    pub fn damage_at(&self, level: u8) -> Result<Option<DiceExpression>, DiceError> {
        self.damage
            .as_ref()
            .map(|d| self.scaled(&d.dice, level))
            .transpose()
    }

    /// Healing expression for a cast at `level`, upcast scaling included.
    pub fn healing_at(&self, level: u8) -> Result<Option<DiceExpression>, DiceError> {
        self.healing
            .as_ref()
            .map(|h| self.scaled(&h.dice, level))
            .transpose()
    }

    /// Parse every dice string the spell can roll.
    pub fn validate(&self) -> Result<(), DiceError> {
        self.damage_at(self.level)?;
        self.healing_at(self.level)?;
        if let Some(UpcastScaling {
            extra_dice: Some(extra),
            ..
        }) = &self.scaling
        {
            DiceExpression::parse(extra)?;
        }
        self.effects.iter().try_for_each(Effect::validate)
    }
}

// ============================================================================
// Spell Book
// ============================================================================

/// Spell definitions keyed by [`SpellId`].
#[derive(Debug, Clone, Default)]
pub struct SpellBook {
    spells: InMemoryRepository<SpellId, Spell>,
}

impl SpellBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// The built-in spell list.
    pub fn standard() -> Self {
        let mut book = Self::new();
        for spell in standard_spells() {
            book.insert(spell);
        }
        book
    }

    pub fn insert(&mut self, spell: Spell) -> Option<Spell> {
        self.spells.put(spell.id.clone(), spell)
    }

    /// Look up a spell by name (case-insensitive).
    pub fn by_name(&self, name: &str) -> Option<&Spell> {
        self.spells.get(&SpellId::new(name))
    }

    pub fn by_level(&self, level: u8) -> impl Iterator<Item = &Spell> {
        self.spells.values().filter(move |s| s.level == level)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Spell> {
        self.spells.values()
    }
}

impl Repository<SpellId, Spell> for SpellBook {
    fn get(&self, key: &SpellId) -> Option<&Spell> {
        self.spells.get(key)
    }

    fn get_mut(&mut self, key: &SpellId) -> Option<&mut Spell> {
        self.spells.get_mut(key)
    }

    fn put(&mut self, key: SpellId, value: Spell) -> Option<Spell> {
        self.spells.put(key, value)
    }

    fn remove(&mut self, key: &SpellId) -> Option<Spell> {
        self.spells.remove(key)
    }

    fn keys(&self) -> Vec<SpellId> {
        self.spells.keys()
    }

    fn len(&self) -> usize {
        self.spells.len()
    }
}

fn standard_spells() -> Vec<Spell> {
    vec![
        // Cantrips
        Spell::new("Fire Bolt", 0, SpellSchool::Evocation)
            .with_range(SpellRange::Feet(120))
            .with_attack(SpellAttackType::Ranged)
            .with_damage("1d10", DamageType::Fire),
        Spell::new("Sacred Flame", 0, SpellSchool::Evocation)
            .with_save(Ability::Dexterity, SaveEffect::Negates)
            .with_damage("1d8", DamageType::Radiant),
        // 1st level
        Spell::new("Magic Missile", 1, SpellSchool::Evocation)
            .with_range(SpellRange::Feet(120))
            .with_damage("3d4+3", DamageType::Force)
            .with_scaling(UpcastScaling {
                extra_dice: Some("1d4".to_string()),
                extra_modifier: 1,
                interval: 1,
            }),
        Spell::new("Cure Wounds", 1, SpellSchool::Abjuration)
            .with_range(SpellRange::Touch)
            .with_healing("2d8", true)
            .with_scaling(UpcastScaling::per_level("2d8")),
        Spell::new("Burning Hands", 1, SpellSchool::Evocation)
            .with_range(SpellRange::SelfCone(15))
            .with_save(Ability::Dexterity, SaveEffect::HalfDamage)
            .with_damage("3d6", DamageType::Fire)
            .with_scaling(UpcastScaling::per_level("1d6"))
            .with_max_targets(None),
        Spell::new("Bless", 1, SpellSchool::Enchantment)
            .with_range(SpellRange::Feet(30))
            .with_components(Components::vsm("a sprinkling of holy water"))
            .with_duration(SpellDuration::Minutes(1))
            .concentration()
            .with_max_targets(Some(3))
            .with_effect(Effect::Condition(
                // Flat +2 stands in for the 1d4 bonus
                CombatCondition::new("Blessed", "Bless")
                    .with_effect(Effect::StatChange {
                        stat: Stat::AttackRolls,
                        delta: 2,
                    })
                    .with_effect(Effect::StatChange {
                        stat: Stat::SavingThrows,
                        delta: 2,
                    }),
            )),
        Spell::new("Hex", 1, SpellSchool::Enchantment)
            .with_casting_time(CastingTime::BonusAction)
            .with_range(SpellRange::Feet(90))
            .with_duration(SpellDuration::Hours(1))
            .concentration()
            .with_effect(Effect::Condition(CombatCondition::new("Hexed", "Hex").with_effect(
                Effect::Special {
                    description: "takes an extra 1d6 necrotic damage from the caster's hits"
                        .to_string(),
                },
            ))),
        Spell::new("Shield of Faith", 1, SpellSchool::Abjuration)
            .with_casting_time(CastingTime::BonusAction)
            .with_duration(SpellDuration::Minutes(10))
            .concentration()
            .with_effect(Effect::Condition(
                CombatCondition::new("Shield of Faith", "Shield of Faith").with_effect(
                    Effect::StatChange {
                        stat: Stat::ArmorClass,
                        delta: 2,
                    },
                ),
            )),
        // 2nd level
        Spell::new("Hold Person", 2, SpellSchool::Enchantment)
            .with_duration(SpellDuration::Minutes(1))
            .concentration()
            .with_save(Ability::Wisdom, SaveEffect::Negates)
            .with_effect(Effect::Condition(
                CombatCondition::new("Paralyzed", "Hold Person")
                    .incapacitating()
                    .ends_on_save(Ability::Wisdom, 0, SaveTiming::EndOfTurn),
            )),
        // 3rd level
        Spell::new("Fireball", 3, SpellSchool::Evocation)
            .with_range(SpellRange::Feet(150))
            .with_components(Components::vsm("a ball of bat guano and sulfur"))
            .with_save(Ability::Dexterity, SaveEffect::HalfDamage)
            .with_damage("8d6", DamageType::Fire)
            .with_scaling(UpcastScaling::per_level("1d6"))
            .with_max_targets(None),
    ]
}
