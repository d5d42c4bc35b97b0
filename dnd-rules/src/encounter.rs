//! The encounter aggregate: phase, turn order, battlefield and action log.

use crate::combatant::{Combatant, CombatantId, Position, Team};
use crate::conditions::CombatCondition;
use crate::dice::RollResult;
use crate::preset::{CriticalRule, RulePreset};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for encounters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EncounterId(pub Uuid);

impl EncounterId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EncounterId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EncounterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Encounter lifecycle. Phases only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Phase {
    Setup,
    Initiative,
    Combat,
    Resolution,
    Ended,
}

impl Phase {
    pub fn name(&self) -> &'static str {
        match self {
            Phase::Setup => "setup",
            Phase::Initiative => "initiative",
            Phase::Combat => "combat",
            Phase::Resolution => "resolution",
            Phase::Ended => "ended",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Rectangular grid, `0..width` by `0..height`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Battlefield {
    pub width: u32,
    pub height: u32,
}

impl Battlefield {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn contains(&self, position: Position) -> bool {
        position.x >= 0
            && position.y >= 0
            && (position.x as u32) < self.width
            && (position.y as u32) < self.height
    }
}

impl Default for Battlefield {
    fn default() -> Self {
        Self::new(20, 20)
    }
}

/// What ends an encounter in the players' favour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VictoryCondition {
    /// Every enemy is at 0 HP.
    DefeatAll,
    /// One specific combatant is at 0 HP.
    DefeatTarget(CombatantId),
    /// The encounter lasted this many rounds.
    SurviveRounds(u32),
}

impl VictoryCondition {
    pub fn is_met(&self, encounter: &CombatEncounter) -> bool {
        match self {
            VictoryCondition::DefeatAll => encounter
                .combatants
                .iter()
                .filter(|c| c.team == Team::Enemy)
                .all(|c| c.hit_points.current <= 0),
            VictoryCondition::DefeatTarget(id) => encounter
                .combatant(*id)
                .is_some_and(|c| c.hit_points.current <= 0),
            VictoryCondition::SurviveRounds(rounds) => encounter.round >= *rounds,
        }
    }
}

/// How an encounter finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EncounterOutcome {
    Victory(VictoryCondition),
    /// Every player and ally is down.
    Defeat,
    /// Ended by the caller before any condition was met.
    Aborted,
}

/// One line of the action log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    pub at: DateTime<Utc>,
    pub round: u32,
    pub actor: Option<CombatantId>,
    pub message: String,
    pub rolls: Vec<RollResult>,
}

/// Append-only, chronological record of what happened.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionLog {
    entries: Vec<LogEntry>,
}

impl ActionLog {
    pub(crate) fn push(
        &mut self,
        round: u32,
        actor: Option<CombatantId>,
        message: impl Into<String>,
        rolls: Vec<RollResult>,
    ) {
        self.entries.push(LogEntry {
            at: Utc::now(),
            round,
            actor,
            message: message.into(),
            rolls,
        });
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(&self.entries)
    }
}

/// Everything needed to create an encounter.
#[derive(Debug, Clone)]
pub struct EncounterSetup {
    pub name: String,
    pub combatants: Vec<Combatant>,
    pub rules: RulePreset,
    pub battlefield: Battlefield,
    /// Defaults to [`VictoryCondition::DefeatAll`] when empty.
    pub victory: Vec<VictoryCondition>,
}

impl EncounterSetup {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            combatants: Vec::new(),
            rules: RulePreset::default(),
            battlefield: Battlefield::default(),
            victory: Vec::new(),
        }
    }

    pub fn with_combatant(mut self, combatant: Combatant) -> Self {
        self.combatants.push(combatant);
        self
    }

    pub fn with_combatants(mut self, combatants: impl IntoIterator<Item = Combatant>) -> Self {
        self.combatants.extend(combatants);
        self
    }

    pub fn with_rules(mut self, rules: RulePreset) -> Self {
        self.rules = rules;
        self
    }

    pub fn with_battlefield(mut self, battlefield: Battlefield) -> Self {
        self.battlefield = battlefield;
        self
    }

    pub fn with_victory(mut self, condition: VictoryCondition) -> Self {
        self.victory.push(condition);
        self
    }
}

/// Aggregate root for one fight. Mutated only through the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CombatEncounter {
    pub id: EncounterId,
    pub name: String,
    pub phase: Phase,
    /// Zero until initiative is rolled.
    pub round: u32,
    /// Index into `turn_order`, valid while in combat.
    pub current_turn: usize,
    pub combatants: Vec<Combatant>,
    pub turn_order: Vec<CombatantId>,
    pub battlefield: Battlefield,
    pub rules: RulePreset,
    pub log: ActionLog,
    pub victory: Vec<VictoryCondition>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub turn_started_at: Option<DateTime<Utc>>,
    pub outcome: Option<EncounterOutcome>,
}

impl CombatEncounter {
    pub(crate) fn from_setup(setup: EncounterSetup) -> Self {
        let mut combatants = setup.combatants;
        combatants.iter_mut().for_each(reset_for_encounter);
        let victory = if setup.victory.is_empty() {
            vec![VictoryCondition::DefeatAll]
        } else {
            setup.victory
        };
        Self {
            id: EncounterId::new(),
            name: setup.name,
            phase: Phase::Setup,
            round: 0,
            current_turn: 0,
            combatants,
            turn_order: Vec::new(),
            battlefield: setup.battlefield,
            rules: setup.rules,
            log: ActionLog::default(),
            victory,
            started_at: None,
            ended_at: None,
            turn_started_at: None,
            outcome: None,
        }
    }

    pub fn combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.combatants.iter().find(|c| c.id == id)
    }

    pub fn combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.combatants.iter_mut().find(|c| c.id == id)
    }

    pub fn combatant_by_name(&self, name: &str) -> Option<&Combatant> {
        self.combatants
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }

    /// Whose turn it is, if combat is running.
    pub fn current_combatant_id(&self) -> Option<CombatantId> {
        if self.phase != Phase::Combat {
            return None;
        }
        self.turn_order.get(self.current_turn).copied()
    }

    pub fn current_combatant(&self) -> Option<&Combatant> {
        self.current_combatant_id().and_then(|id| self.combatant(id))
    }

    pub fn is_over(&self) -> bool {
        self.phase == Phase::Ended
    }

    /// Combatants hostile to `team` that are still standing.
    pub fn standing_enemies_of(&self, team: Team) -> impl Iterator<Item = &Combatant> {
        self.combatants
            .iter()
            .filter(move |c| team.is_hostile_to(c.team) && c.hit_points.current > 0)
    }

    /// First victory condition currently satisfied.
    pub fn victory_met(&self) -> Option<VictoryCondition> {
        self.victory.iter().copied().find(|v| v.is_met(self))
    }

    /// Every player and ally is down (and there was at least one).
    pub fn party_defeated(&self) -> bool {
        let mut party = self
            .combatants
            .iter()
            .filter(|c| matches!(c.team, Team::Player | Team::Ally))
            .peekable();
        party.peek().is_some() && party.all(|c| c.hit_points.current <= 0)
    }

    /// Time left on the current turn's clock, if the preset sets one.
    pub fn turn_time_remaining(&self, now: DateTime<Utc>) -> Option<Duration> {
        let limit = self.rules.turn_time_limit_secs?;
        let started = self.turn_started_at?;
        let limit = Duration::try_seconds(i64::try_from(limit).ok()?)?;
        Some((started + limit - now).max(Duration::zero()))
    }
}

/// Clear per-encounter state. A combatant entering at 0 HP is unconscious.
pub(crate) fn reset_for_encounter(combatant: &mut Combatant) {
    combatant.economy.reset();
    combatant.conditions.clear();
    combatant.concentration = None;
    combatant.initiative = 0;
    if combatant.hit_points.is_down() {
        combatant.conditions.push(CombatCondition::unconscious("setup"));
    }
}

/// Anything spell targets can be looked up in.
///
/// Lets spells resolve against a live encounter or a plain list of
/// combatants outside combat.
pub trait Roster {
    fn find_combatant(&self, id: CombatantId) -> Option<&Combatant>;

    fn find_combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant>;

    fn combatant_ids(&self) -> Vec<CombatantId>;

    fn critical_rule(&self) -> CriticalRule {
        CriticalRule::default()
    }

    fn critical_threshold(&self) -> u32 {
        crate::dice::DEFAULT_CRITICAL_THRESHOLD
    }

    fn natural_rolls_automatic(&self) -> bool {
        true
    }

    fn encounter_id(&self) -> Option<EncounterId> {
        None
    }
}

impl Roster for CombatEncounter {
    fn find_combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.combatant(id)
    }

    fn find_combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.combatant_mut(id)
    }

    fn combatant_ids(&self) -> Vec<CombatantId> {
        self.combatants.iter().map(|c| c.id).collect()
    }

    fn critical_rule(&self) -> CriticalRule {
        self.rules.critical_rule
    }

    fn critical_threshold(&self) -> u32 {
        self.rules.critical_threshold
    }

    fn natural_rolls_automatic(&self) -> bool {
        self.rules.natural_rolls_automatic
    }

    fn encounter_id(&self) -> Option<EncounterId> {
        Some(self.id)
    }
}

impl Roster for Vec<Combatant> {
    fn find_combatant(&self, id: CombatantId) -> Option<&Combatant> {
        self.iter().find(|c| c.id == id)
    }

    fn find_combatant_mut(&mut self, id: CombatantId) -> Option<&mut Combatant> {
        self.iter_mut().find(|c| c.id == id)
    }

    fn combatant_ids(&self) -> Vec<CombatantId> {
        self.iter().map(|c| c.id).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encounter() -> CombatEncounter {
        CombatEncounter::from_setup(
            EncounterSetup::new("Ambush")
                .with_combatant(Combatant::new("Hero", Team::Player).with_hit_points(10))
                .with_combatant(Combatant::new("Goblin A", Team::Enemy).with_hit_points(7))
                .with_combatant(Combatant::new("Goblin B", Team::Enemy).with_hit_points(7)),
        )
    }

    #[test]
    fn test_setup_defaults_to_defeat_all() {
        let encounter = encounter();
        assert_eq!(encounter.phase, Phase::Setup);
        assert_eq!(encounter.victory, vec![VictoryCondition::DefeatAll]);
        assert!(encounter.current_combatant_id().is_none());
    }

    #[test]
    fn test_defeat_all_needs_every_enemy_down() {
        let mut encounter = encounter();
        assert!(encounter.victory_met().is_none());

        encounter.combatants[1].hit_points.current = 0;
        assert!(encounter.victory_met().is_none());

        encounter.combatants[2].hit_points.current = 0;
        assert_eq!(encounter.victory_met(), Some(VictoryCondition::DefeatAll));
    }

    #[test]
    fn test_party_defeated() {
        let mut encounter = encounter();
        assert!(!encounter.party_defeated());
        encounter.combatants[0].hit_points.current = 0;
        assert!(encounter.party_defeated());
    }

    #[test]
    fn test_battlefield_bounds() {
        let field = Battlefield::new(10, 5);
        assert!(field.contains(Position::new(0, 0)));
        assert!(field.contains(Position::new(9, 4)));
        assert!(!field.contains(Position::new(10, 4)));
        assert!(!field.contains(Position::new(-1, 0)));
    }

    #[test]
    fn test_log_serializes() {
        let mut log = ActionLog::default();
        log.push(1, None, "Round 1 begins", Vec::new());
        let json = log.to_json().unwrap();
        assert!(json.contains("Round 1 begins"));
        assert_eq!(log.len(), 1);
    }

    #[test]
    fn test_turn_clock() {
        let mut encounter = encounter();
        encounter.rules = encounter.rules.clone().with_turn_time_limit(60);
        let start = Utc::now();
        encounter.turn_started_at = Some(start);
        let remaining = encounter
            .turn_time_remaining(start + Duration::seconds(45))
            .unwrap();
        assert_eq!(remaining, Duration::seconds(15));
        assert_eq!(
            encounter.turn_time_remaining(start + Duration::seconds(90)),
            Some(Duration::zero())
        );
    }
}
