//! Rules presets supplied at encounter creation.
//!
//! A preset selects the optional rules an encounter runs under. Presets can
//! be built in code or loaded from TOML:
//!
//! ```toml
//! critical_rule = "max_damage_plus_roll"
//! flanking = true
//! diagonal_movement = "alternating"
//! turn_time_limit_secs = 90
//! ```

use crate::dice::DEFAULT_CRITICAL_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors from loading a preset.
#[derive(Debug, Error)]
pub enum PresetError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid preset: {0}")]
    Parse(#[from] toml::de::Error),
}

/// How a critical hit changes damage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CriticalRule {
    /// Roll twice as many dice; the modifier is added once.
    #[default]
    DoubleDice,
    /// Roll normally and double the total.
    DoubleDamage,
    /// Add the dice's maximum to a normal roll.
    MaxDamagePlusRoll,
}

/// How turn order is determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InitiativeVariant {
    /// 1d20 + Dexterity modifier.
    #[default]
    Standard,
    /// 10 + Dexterity modifier, no roll.
    Passive,
}

/// How diagonal steps are priced. All variants approximate movement as a
/// straight line from start to destination.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagonalMovement {
    /// Euclidean distance, rounded up to the next foot.
    #[default]
    Euclidean,
    /// Every square costs 5 ft, diagonals included.
    Uniform,
    /// Diagonals alternate 5 ft and 10 ft.
    Alternating,
}

/// Optional rules for an encounter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulePreset {
    pub name: String,
    pub critical_rule: CriticalRule,
    /// Natural d20 face at or above which an attack is critical.
    pub critical_threshold: u32,
    pub initiative: InitiativeVariant,
    /// Natural 1 always misses and a critical always hits.
    pub natural_rolls_automatic: bool,
    /// Melee attacks against a target flanked by an ally gain advantage.
    pub flanking: bool,
    pub diagonal_movement: DiagonalMovement,
    pub max_reactions: u32,
    /// Turn clock in seconds. Reported, never enforced.
    pub turn_time_limit_secs: Option<u64>,
    pub round_time_limit_secs: Option<u64>,
}

impl Default for RulePreset {
    fn default() -> Self {
        Self {
            name: "standard".to_string(),
            critical_rule: CriticalRule::DoubleDice,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
            initiative: InitiativeVariant::Standard,
            natural_rolls_automatic: true,
            flanking: false,
            diagonal_movement: DiagonalMovement::Euclidean,
            max_reactions: 1,
            turn_time_limit_secs: None,
            round_time_limit_secs: None,
        }
    }
}

impl RulePreset {
    /// Rules as written.
    pub fn standard() -> Self {
        Self::default()
    }

    /// Deadlier crits and flanking.
    pub fn gritty() -> Self {
        Self {
            name: "gritty".to_string(),
            critical_rule: CriticalRule::MaxDamagePlusRoll,
            flanking: true,
            diagonal_movement: DiagonalMovement::Alternating,
            ..Self::default()
        }
    }

    pub fn with_critical_rule(mut self, rule: CriticalRule) -> Self {
        self.critical_rule = rule;
        self
    }

    pub fn with_critical_threshold(mut self, threshold: u32) -> Self {
        self.critical_threshold = threshold.clamp(2, 20);
        self
    }

    pub fn with_initiative(mut self, variant: InitiativeVariant) -> Self {
        self.initiative = variant;
        self
    }

    pub fn with_natural_rolls_automatic(mut self, enabled: bool) -> Self {
        self.natural_rolls_automatic = enabled;
        self
    }

    pub fn with_flanking(mut self, enabled: bool) -> Self {
        self.flanking = enabled;
        self
    }

    pub fn with_diagonal_movement(mut self, rule: DiagonalMovement) -> Self {
        self.diagonal_movement = rule;
        self
    }

    pub fn with_turn_time_limit(mut self, secs: u64) -> Self {
        self.turn_time_limit_secs = Some(secs);
        self
    }

    /// Parse a preset from TOML. Missing keys fall back to the defaults.
    pub fn from_toml_str(content: &str) -> Result<Self, PresetError> {
        let mut preset: RulePreset = toml::from_str(content)?;
        preset.critical_threshold = preset.critical_threshold.clamp(2, 20);
        Ok(preset)
    }

    /// Load a preset from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, PresetError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }
}
