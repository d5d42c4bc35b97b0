//! Combat participants.
//!
//! Ability scores, hit points, the per-turn action economy and the
//! [`Combatant`] record the engine mutates throughout an encounter.

use crate::actions::{ActionCost, CombatAction, Stat};
use crate::conditions::{CombatCondition, UNCONSCIOUS};
use crate::spells::SpellId;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for combatants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CombatantId(pub Uuid);

impl CombatantId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for CombatantId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Ability Scores
// ============================================================================

/// The six ability scores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn abbreviation(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Ability::Strength => "Strength",
            Ability::Dexterity => "Dexterity",
            Ability::Constitution => "Constitution",
            Ability::Intelligence => "Intelligence",
            Ability::Wisdom => "Wisdom",
            Ability::Charisma => "Charisma",
        }
    }
}

impl fmt::Display for Ability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Ability scores container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbilityScores {
    pub strength: u8,
    pub dexterity: u8,
    pub constitution: u8,
    pub intelligence: u8,
    pub wisdom: u8,
    pub charisma: u8,
}

impl AbilityScores {
    pub fn new(str: u8, dex: u8, con: u8, int: u8, wis: u8, cha: u8) -> Self {
        Self {
            strength: str,
            dexterity: dex,
            constitution: con,
            intelligence: int,
            wisdom: wis,
            charisma: cha,
        }
    }

    pub fn get(&self, ability: Ability) -> u8 {
        match ability {
            Ability::Strength => self.strength,
            Ability::Dexterity => self.dexterity,
            Ability::Constitution => self.constitution,
            Ability::Intelligence => self.intelligence,
            Ability::Wisdom => self.wisdom,
            Ability::Charisma => self.charisma,
        }
    }

    pub fn set(&mut self, ability: Ability, value: u8) {
        match ability {
            Ability::Strength => self.strength = value,
            Ability::Dexterity => self.dexterity = value,
            Ability::Constitution => self.constitution = value,
            Ability::Intelligence => self.intelligence = value,
            Ability::Wisdom => self.wisdom = value,
            Ability::Charisma => self.charisma = value,
        }
    }

    /// `floor((score - 10) / 2)`, so 9 is -1 and 8 is -1.
    pub fn modifier(&self, ability: Ability) -> i32 {
        (self.get(ability) as i32 - 10).div_euclid(2)
    }
}

impl Default for AbilityScores {
    fn default() -> Self {
        Self::new(10, 10, 10, 10, 10, 10)
    }
}

// ============================================================================
// Teams
// ============================================================================

/// Which side of the fight a combatant is on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Team {
    Player,
    Npc,
    Enemy,
    Ally,
}

impl Team {
    pub fn name(&self) -> &'static str {
        match self {
            Team::Player => "player",
            Team::Npc => "npc",
            Team::Enemy => "enemy",
            Team::Ally => "ally",
        }
    }

    /// Players and allies fight together; enemies oppose both; NPCs are neutral.
    pub fn is_friendly_to(&self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Player | Team::Ally, Team::Player | Team::Ally) | (Team::Enemy, Team::Enemy)
        )
    }

    pub fn is_hostile_to(&self, other: Team) -> bool {
        matches!(
            (self, other),
            (Team::Player | Team::Ally, Team::Enemy) | (Team::Enemy, Team::Player | Team::Ally)
        )
    }
}

impl fmt::Display for Team {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

// ============================================================================
// Hit Points
// ============================================================================

/// Hit points tracking.
///
/// `current` stays within `0..=maximum` and `temporary` never goes negative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitPoints {
    pub current: i32,
    pub maximum: i32,
    pub temporary: i32,
}

impl HitPoints {
    pub fn new(maximum: i32) -> Self {
        let maximum = maximum.max(1);
        Self {
            current: maximum,
            maximum,
            temporary: 0,
        }
    }

    /// Temporary hit points absorb damage first; current HP floors at zero.
    pub fn take_damage(&mut self, amount: i32) -> DamageTaken {
        let amount = amount.max(0);
        let was_up = self.current > 0;

        let absorbed = self.temporary.min(amount);
        self.temporary -= absorbed;

        let remaining = amount - absorbed;
        let lost = remaining.min(self.current);
        self.current -= lost;

        DamageTaken {
            amount,
            absorbed_by_temporary: absorbed,
            hp_lost: lost,
            dropped_to_zero: was_up && self.current == 0,
        }
    }

    /// Heal up to the maximum. Returns the amount actually restored.
    pub fn heal(&mut self, amount: i32) -> i32 {
        let old = self.current;
        self.current = (self.current + amount.max(0)).min(self.maximum);
        self.current - old
    }

    /// Temporary hit points don't stack; the larger pool wins.
    pub fn add_temp_hp(&mut self, amount: i32) {
        self.temporary = self.temporary.max(amount.max(0));
    }

    pub fn is_down(&self) -> bool {
        self.current <= 0
    }

    pub fn ratio(&self) -> f32 {
        (self.current as f32 / self.maximum as f32).max(0.0)
    }
}

/// Result of taking damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DamageTaken {
    pub amount: i32,
    pub absorbed_by_temporary: i32,
    pub hp_lost: i32,
    pub dropped_to_zero: bool,
}

// ============================================================================
// Action Economy
// ============================================================================

/// What a combatant has spent this turn.
///
/// The booleans only flip false→true during a turn and are cleared by
/// [`ActionEconomy::reset`] at the start of the owner's turn.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActionEconomy {
    pub action_used: bool,
    pub bonus_action_used: bool,
    /// Feet of movement spent.
    pub movement_spent: u32,
    pub reactions_used: u32,
}

impl ActionEconomy {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Feet covered by one grid square.
pub const FEET_PER_GRID_UNIT: u32 = 5;

/// A square on the battle grid.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: i32,
    pub y: i32,
}

impl Position {
    pub fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Straight-line distance in grid units.
    pub fn distance(&self, other: Position) -> f64 {
        let dx = (self.x - other.x) as f64;
        let dy = (self.y - other.y) as f64;
        (dx * dx + dy * dy).sqrt()
    }

    /// Grid distance in feet, counting a diagonal step as one square.
    pub fn feet_to(&self, other: Position) -> u32 {
        let squares = (self.x - other.x).unsigned_abs().max((self.y - other.y).unsigned_abs());
        squares * FEET_PER_GRID_UNIT
    }

    /// True when the two squares touch, diagonals included.
    pub fn is_adjacent(&self, other: Position) -> bool {
        *self != other && (self.x - other.x).abs() <= 1 && (self.y - other.y).abs() <= 1
    }
}

// ============================================================================
// Combatant
// ============================================================================

/// Combat participant.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    pub team: Team,
    pub ability_scores: AbilityScores,
    /// Base AC before condition modifiers.
    pub armor_class: i32,
    /// Walking speed in feet before condition modifiers.
    pub speed: u32,
    pub proficiency_bonus: i32,
    /// Rolled initiative total; zero until initiative is rolled.
    pub initiative: i32,
    pub hit_points: HitPoints,
    pub position: Position,
    pub economy: ActionEconomy,
    pub conditions: Vec<CombatCondition>,
    pub concentration: Option<SpellId>,
    pub save_proficiencies: Vec<Ability>,
    pub actions: Vec<CombatAction>,
    pub spells: Vec<SpellId>,
}

impl Combatant {
    pub fn new(name: impl Into<String>, team: Team) -> Self {
        Self {
            id: CombatantId::new(),
            name: name.into(),
            team,
            ability_scores: AbilityScores::default(),
            armor_class: 10,
            speed: 30,
            proficiency_bonus: 2,
            initiative: 0,
            hit_points: HitPoints::new(10),
            position: Position::default(),
            economy: ActionEconomy::default(),
            conditions: Vec::new(),
            concentration: None,
            save_proficiencies: Vec::new(),
            actions: Vec::new(),
            spells: Vec::new(),
        }
    }

    pub fn with_abilities(mut self, scores: AbilityScores) -> Self {
        self.ability_scores = scores;
        self
    }

    pub fn with_armor_class(mut self, ac: i32) -> Self {
        self.armor_class = ac;
        self
    }

    pub fn with_hit_points(mut self, maximum: i32) -> Self {
        self.hit_points = HitPoints::new(maximum);
        self
    }

    pub fn with_speed(mut self, feet: u32) -> Self {
        self.speed = feet;
        self
    }

    pub fn with_proficiency_bonus(mut self, bonus: i32) -> Self {
        self.proficiency_bonus = bonus;
        self
    }

    pub fn at(mut self, x: i32, y: i32) -> Self {
        self.position = Position::new(x, y);
        self
    }

    pub fn with_save_proficiency(mut self, ability: Ability) -> Self {
        if !self.save_proficiencies.contains(&ability) {
            self.save_proficiencies.push(ability);
        }
        self
    }

    pub fn with_action(mut self, action: CombatAction) -> Self {
        self.actions.push(action);
        self
    }

    pub fn with_spell(mut self, spell: impl Into<SpellId>) -> Self {
        self.spells.push(spell.into());
        self
    }

    pub fn ability_modifier(&self, ability: Ability) -> i32 {
        self.ability_scores.modifier(ability)
    }

    pub fn initiative_modifier(&self) -> i32 {
        self.ability_modifier(Ability::Dexterity)
    }

    pub fn saving_throw_modifier(&self, ability: Ability) -> i32 {
        let base = self.ability_modifier(ability);
        if self.save_proficiencies.contains(&ability) {
            base + self.proficiency_bonus
        } else {
            base
        }
    }

    fn stat_bonus(&self, stat: Stat) -> i32 {
        self.conditions
            .iter()
            .flat_map(|c| c.stat_changes())
            .filter(|(s, _)| *s == stat)
            .map(|(_, delta)| delta)
            .sum()
    }

    /// AC including condition modifiers.
    pub fn effective_armor_class(&self) -> i32 {
        self.armor_class + self.stat_bonus(Stat::ArmorClass)
    }

    /// Speed in feet including condition modifiers, never negative.
    pub fn effective_speed(&self) -> u32 {
        (self.speed as i32 + self.stat_bonus(Stat::Speed)).max(0) as u32
    }

    /// Bonus to attack rolls granted by conditions.
    pub fn attack_bonus_from_conditions(&self) -> i32 {
        self.stat_bonus(Stat::AttackRolls)
    }

    /// Bonus to saving throws granted by conditions.
    pub fn save_bonus_from_conditions(&self) -> i32 {
        self.stat_bonus(Stat::SavingThrows)
    }

    pub fn remaining_movement(&self) -> u32 {
        self.effective_speed().saturating_sub(self.economy.movement_spent)
    }

    pub fn is_conscious(&self) -> bool {
        !self.hit_points.is_down() && !self.has_condition(UNCONSCIOUS)
    }

    /// False while any incapacitating condition is active.
    pub fn can_act(&self) -> bool {
        !self.conditions.iter().any(|c| c.incapacitating)
    }

    pub fn has_condition(&self, name: &str) -> bool {
        self.conditions
            .iter()
            .any(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whether this combatant can still pay `cost` this turn.
    pub fn can_pay(&self, cost: ActionCost, max_reactions: u32) -> bool {
        match cost {
            ActionCost::Action => !self.economy.action_used,
            ActionCost::BonusAction => !self.economy.bonus_action_used,
            ActionCost::Reaction => self.economy.reactions_used < max_reactions,
            ActionCost::Movement(feet) => self.remaining_movement() >= feet,
            ActionCost::Free => true,
        }
    }

    /// Spend `cost`. Callers check [`Combatant::can_pay`] first.
    pub(crate) fn pay(&mut self, cost: ActionCost) {
        match cost {
            ActionCost::Action => self.economy.action_used = true,
            ActionCost::BonusAction => self.economy.bonus_action_used = true,
            ActionCost::Reaction => self.economy.reactions_used += 1,
            ActionCost::Movement(feet) => self.economy.movement_spent += feet,
            ActionCost::Free => {}
        }
    }

    pub fn find_action(&self, name: &str) -> Option<&CombatAction> {
        self.actions
            .iter()
            .find(|a| a.name.eq_ignore_ascii_case(name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ability_modifier_floors() {
        let scores = AbilityScores::new(8, 9, 10, 11, 16, 20);
        assert_eq!(scores.modifier(Ability::Strength), -1);
        assert_eq!(scores.modifier(Ability::Dexterity), -1);
        assert_eq!(scores.modifier(Ability::Constitution), 0);
        assert_eq!(scores.modifier(Ability::Intelligence), 0);
        assert_eq!(scores.modifier(Ability::Wisdom), 3);
        assert_eq!(scores.modifier(Ability::Charisma), 5);
    }

    #[test]
    fn test_temporary_hp_absorbs_first() {
        let mut hp = HitPoints::new(20);
        hp.add_temp_hp(5);
        let taken = hp.take_damage(8);
        assert_eq!(taken.absorbed_by_temporary, 5);
        assert_eq!(taken.hp_lost, 3);
        assert_eq!(hp.temporary, 0);
        assert_eq!(hp.current, 17);
    }

    #[test]
    fn test_damage_floors_at_zero() {
        let mut hp = HitPoints::new(10);
        let taken = hp.take_damage(25);
        assert_eq!(hp.current, 0);
        assert!(taken.dropped_to_zero);

        let again = hp.take_damage(5);
        assert_eq!(hp.current, 0);
        assert!(!again.dropped_to_zero);
    }

    #[test]
    fn test_heal_caps_at_maximum() {
        let mut hp = HitPoints::new(10);
        hp.take_damage(4);
        assert_eq!(hp.heal(10), 4);
        assert_eq!(hp.current, 10);
    }

    #[test]
    fn test_temp_hp_does_not_stack() {
        let mut hp = HitPoints::new(10);
        hp.add_temp_hp(5);
        hp.add_temp_hp(3);
        assert_eq!(hp.temporary, 5);
    }

    #[test]
    fn test_team_relations() {
        assert!(Team::Player.is_friendly_to(Team::Ally));
        assert!(Team::Enemy.is_hostile_to(Team::Ally));
        assert!(!Team::Npc.is_hostile_to(Team::Enemy));
        assert!(!Team::Npc.is_friendly_to(Team::Player));
    }

    #[test]
    fn test_cost_payment() {
        let mut fighter = Combatant::new("Roland", Team::Player);
        assert!(fighter.can_pay(ActionCost::Action, 1));
        fighter.pay(ActionCost::Action);
        assert!(!fighter.can_pay(ActionCost::Action, 1));
        assert!(fighter.can_pay(ActionCost::BonusAction, 1));

        fighter.pay(ActionCost::Reaction);
        assert!(!fighter.can_pay(ActionCost::Reaction, 1));
        assert!(fighter.can_pay(ActionCost::Free, 1));

        assert!(fighter.can_pay(ActionCost::Movement(30), 1));
        fighter.pay(ActionCost::Movement(15));
        assert!(!fighter.can_pay(ActionCost::Movement(30), 1));

        fighter.economy.reset();
        assert!(fighter.can_pay(ActionCost::Action, 1));
    }

    #[test]
    fn test_adjacency() {
        let p = Position::new(2, 2);
        assert!(p.is_adjacent(Position::new(3, 3)));
        assert!(!p.is_adjacent(Position::new(4, 2)));
        assert!(!p.is_adjacent(p));
        assert!((p.distance(Position::new(5, 6)) - 5.0).abs() < f64::EPSILON);
        assert_eq!(p.feet_to(Position::new(3, 3)), 5);
        assert_eq!(p.feet_to(Position::new(2, 8)), 30);
    }
}
