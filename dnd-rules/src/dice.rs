//! D&D dice rolling system.
//!
//! Supports standard dice notation (XdY+Z, keep highest/lowest, `d%`) and
//! the roll options the combat rules need: advantage/disadvantage,
//! exploding dice, rerolling ones and critical detection.
//!
//! Rolls are drawn from a seedable RNG. Faces produced elsewhere (for
//! example by a physics dice animation in a UI) can be queued with
//! [`DiceResolver::supply`]; queued faces are consumed before the RNG, so
//! a caller can present a roll first and have the engine resolve it after.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use tracing::warn;

/// Upper bound on how many times a single exploding die may explode.
pub const MAX_EXPLOSIONS: usize = 20;

/// Most dice a single component may roll.
pub const MAX_DICE_COUNT: u32 = 1000;

/// Largest die a component may use.
pub const MAX_DIE_SIDES: u32 = 1000;

/// Natural d20 face that counts as a critical unless a preset overrides it.
pub const DEFAULT_CRITICAL_THRESHOLD: u32 = 20;

/// Error type for dice parsing and rolling.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DiceError {
    #[error("Invalid dice notation: {0}")]
    InvalidNotation(String),
    #[error("Invalid die size: {0}")]
    InvalidDieSize(u32),
    #[error("No dice specified")]
    NoDice,
    #[error("Too many dice: {count} (at most {})", MAX_DICE_COUNT)]
    TooManyDice { count: u32 },
    #[error("Die too large: d{sides} (at most d{})", MAX_DIE_SIDES)]
    DieTooLarge { sides: u32 },
    #[error("Cannot keep {keep} dice when only rolling {count} (in {notation})")]
    InvalidKeepCount {
        keep: u32,
        count: u32,
        notation: String,
    },
}

/// Advantage state for d20 rolls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Advantage {
    #[default]
    Normal,
    Advantage,
    Disadvantage,
}

impl Advantage {
    /// Combine two advantage states (advantage + disadvantage = normal).
    pub fn combine(self, other: Advantage) -> Advantage {
        match (self, other) {
            (Advantage::Normal, x) | (x, Advantage::Normal) => x,
            (Advantage::Advantage, Advantage::Disadvantage) => Advantage::Normal,
            (Advantage::Disadvantage, Advantage::Advantage) => Advantage::Normal,
            (Advantage::Advantage, Advantage::Advantage) => Advantage::Advantage,
            (Advantage::Disadvantage, Advantage::Disadvantage) => Advantage::Disadvantage,
        }
    }
}

/// A single die component of a dice expression (e.g. the `4d6kh3` in `4d6kh3+2`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceComponent {
    pub count: u32,
    pub sides: u32,
    pub keep_highest: Option<u32>,
    pub keep_lowest: Option<u32>,
}

impl DiceComponent {
    pub fn new(count: u32, sides: u32) -> Self {
        Self {
            count,
            sides,
            keep_highest: None,
            keep_lowest: None,
        }
    }

    /// Number of dice that contribute to the total.
    pub fn kept_count(&self) -> u32 {
        self.keep_highest.or(self.keep_lowest).unwrap_or(self.count)
    }

    /// Highest total this component can produce without explosions.
    pub fn max_total(&self) -> i32 {
        let max = u64::from(self.kept_count()) * u64::from(self.sides);
        i32::try_from(max).unwrap_or(i32::MAX)
    }
}

impl fmt::Display for DiceComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}d{}", self.count, self.sides)?;
        if let Some(keep) = self.keep_highest {
            write!(f, "kh{keep}")?;
        } else if let Some(keep) = self.keep_lowest {
            write!(f, "kl{keep}")?;
        }
        Ok(())
    }
}

/// A complete dice expression (e.g., 2d6+3).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiceExpression {
    pub components: Vec<DiceComponent>,
    pub modifier: i32,
}

impl DiceExpression {
    /// A bare `NdS` expression with no modifier.
    pub fn dice(count: u32, sides: u32) -> Self {
        Self {
            components: vec![DiceComponent::new(count, sides)],
            modifier: 0,
        }
    }

    /// A single d20 plus a flat bonus.
    pub fn d20(bonus: i32) -> Self {
        Self::dice(1, 20).plus(bonus)
    }

    /// Add a flat amount to the modifier.
    pub fn plus(mut self, amount: i32) -> Self {
        self.modifier += amount;
        self
    }

    /// Parse a dice notation string.
    pub fn parse(notation: &str) -> Result<Self, DiceError> {
        let notation = notation.trim().to_lowercase();
        if notation.is_empty() {
            return Err(DiceError::NoDice);
        }

        let mut components = Vec::new();
        let mut modifier: i32 = 0;
        let mut current = String::new();
        let mut sign: i32 = 1;

        for ch in notation.chars() {
            match ch {
                '+' | '-' => {
                    if !current.is_empty() {
                        Self::parse_component(&current, sign, &mut components, &mut modifier)?;
                        current.clear();
                    }
                    sign = if ch == '+' { 1 } else { -1 };
                }
                ' ' => continue,
                _ => current.push(ch),
            }
        }

        if !current.is_empty() {
            Self::parse_component(&current, sign, &mut components, &mut modifier)?;
        }

        if components.is_empty() && modifier == 0 {
            return Err(DiceError::NoDice);
        }

        Ok(DiceExpression {
            components,
            modifier,
        })
    }

    fn parse_component(
        s: &str,
        sign: i32,
        components: &mut Vec<DiceComponent>,
        modifier: &mut i32,
    ) -> Result<(), DiceError> {
        let Some(d_pos) = s.find('d') else {
            let value: i32 = s
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            *modifier += sign * value;
            return Ok(());
        };

        // Subtracted dice ("1d20-1d4") are not part of any rules text we model.
        if sign < 0 {
            return Err(DiceError::InvalidNotation(s.to_string()));
        }

        let count_str = &s[..d_pos];
        let rest = &s[d_pos + 1..];

        let count: u32 = if count_str.is_empty() {
            1
        } else {
            count_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?
        };

        let (sides_str, keep_highest, keep_lowest) = if let Some(kh_pos) = rest.find("kh") {
            let keep: u32 = rest[kh_pos + 2..]
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            (&rest[..kh_pos], Some(keep), None)
        } else if let Some(kl_pos) = rest.find("kl") {
            let keep: u32 = rest[kl_pos + 2..]
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?;
            (&rest[..kl_pos], None, Some(keep))
        } else {
            (rest, None, None)
        };

        let sides: u32 = if sides_str == "%" {
            100
        } else {
            sides_str
                .parse()
                .map_err(|_| DiceError::InvalidNotation(s.to_string()))?
        };
        if sides < 2 {
            return Err(DiceError::InvalidDieSize(sides));
        }
        if sides > MAX_DIE_SIDES {
            return Err(DiceError::DieTooLarge { sides });
        }
        if count == 0 {
            return Err(DiceError::InvalidNotation(s.to_string()));
        }
        if count > MAX_DICE_COUNT {
            return Err(DiceError::TooManyDice { count });
        }

        if let Some(keep) = keep_highest.or(keep_lowest) {
            if keep > count {
                return Err(DiceError::InvalidKeepCount {
                    keep,
                    count,
                    notation: s.to_string(),
                });
            }
        }

        components.push(DiceComponent {
            count,
            sides,
            keep_highest,
            keep_lowest,
        });
        Ok(())
    }

    /// Same expression with every die count doubled; the modifier is untouched.
    ///
    /// This is the `double_dice` critical transform: `2d6+3` becomes `4d6+3`.
    pub fn doubled_dice(&self) -> DiceExpression {
        DiceExpression {
            components: self
                .components
                .iter()
                .map(|c| DiceComponent {
                    count: c.count.saturating_mul(2),
                    sides: c.sides,
                    keep_highest: c.keep_highest.map(|k| k.saturating_mul(2)),
                    keep_lowest: c.keep_lowest.map(|k| k.saturating_mul(2)),
                })
                .collect(),
            modifier: self.modifier,
        }
    }

    /// Theoretical maximum of the dice alone (modifier excluded).
    pub fn max_dice_total(&self) -> i32 {
        self.components
            .iter()
            .map(DiceComponent::max_total)
            .fold(0i32, i32::saturating_add)
    }

    /// Append `extra` to this expression `times` times.
    ///
    /// Dice with matching sides are merged, so `8d6` with `1d6` twice is `10d6`.
    pub fn with_extra(&self, extra: &DiceExpression, times: u32) -> DiceExpression {
        let mut result = self.clone();
        if times == 0 {
            return result;
        }
        for component in &extra.components {
            let added = component.count.saturating_mul(times);
            match result.components.iter_mut().find(|c| {
                c.sides == component.sides && c.keep_highest.is_none() && c.keep_lowest.is_none()
            }) {
                Some(existing) => existing.count = existing.count.saturating_add(added),
                None => result
                    .components
                    .push(DiceComponent::new(added, component.sides)),
            }
        }
        let times = i32::try_from(times).unwrap_or(i32::MAX);
        result.modifier = result
            .modifier
            .saturating_add(extra.modifier.saturating_mul(times));
        result
    }

    /// Total number of physical dice rolled (before advantage).
    pub fn dice_count(&self) -> u32 {
        self.components
            .iter()
            .map(|c| c.count)
            .fold(0u32, u32::saturating_add)
    }

    pub fn is_single_d20(&self) -> bool {
        self.components.len() == 1
            && self.components[0].count == 1
            && self.components[0].sides == 20
    }
}

impl FromStr for DiceExpression {
    type Err = DiceError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DiceExpression::parse(s)
    }
}

impl fmt::Display for DiceExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dice: Vec<String> = self.components.iter().map(|c| c.to_string()).collect();
        let dice = dice.join("+");
        match (dice.is_empty(), self.modifier) {
            (true, m) => write!(f, "{m}"),
            (false, 0) => write!(f, "{dice}"),
            (false, m) if m > 0 => write!(f, "{dice}+{m}"),
            (false, m) => write!(f, "{dice}{m}"),
        }
    }
}

/// Options that change how an expression is rolled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOptions {
    /// Only honoured for a single d20.
    pub advantage: Advantage,
    /// Flat bonus added on top of the expression's own modifier.
    pub bonus: i32,
    pub exploding: bool,
    pub reroll_ones: bool,
    pub critical_threshold: u32,
}

impl Default for RollOptions {
    fn default() -> Self {
        Self {
            advantage: Advantage::Normal,
            bonus: 0,
            exploding: false,
            reroll_ones: false,
            critical_threshold: DEFAULT_CRITICAL_THRESHOLD,
        }
    }
}

impl RollOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_advantage(mut self, advantage: Advantage) -> Self {
        self.advantage = advantage;
        self
    }

    pub fn with_bonus(mut self, bonus: i32) -> Self {
        self.bonus = bonus;
        self
    }

    pub fn exploding(mut self) -> Self {
        self.exploding = true;
        self
    }

    pub fn reroll_ones(mut self) -> Self {
        self.reroll_ones = true;
        self
    }

    pub fn with_critical_threshold(mut self, threshold: u32) -> Self {
        self.critical_threshold = threshold;
        self
    }
}

/// One physical die and everything that happened to it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DieRoll {
    pub sides: u32,
    /// Face that stands after any reroll, before explosions.
    pub natural: u32,
    /// Contribution to the total (natural plus explosion faces).
    pub value: u32,
    pub explosions: Vec<u32>,
    /// The face that was thrown away by a reroll-ones rule.
    pub rerolled_from: Option<u32>,
    /// Set for the unused die of an advantage roll or a die dropped by kh/kl.
    pub discarded: bool,
}

/// Result of rolling a single dice component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComponentResult {
    pub sides: u32,
    pub rolls: Vec<DieRoll>,
    pub subtotal: u32,
}

impl ComponentResult {
    pub fn kept(&self) -> impl Iterator<Item = &DieRoll> {
        self.rolls.iter().filter(|r| !r.discarded)
    }
}

/// Complete result of a dice roll.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollResult {
    pub expression: DiceExpression,
    pub component_results: Vec<ComponentResult>,
    /// Expression modifier plus any option bonus.
    pub modifier: i32,
    pub total: i32,
    pub critical: bool,
    pub fumble: bool,
}

impl RollResult {
    /// Natural face of the kept d20, if this roll had exactly one.
    pub fn natural_d20(&self) -> Option<u32> {
        self.component_results
            .iter()
            .find(|c| c.sides == 20 && c.kept().count() == 1)
            .and_then(|c| c.kept().next())
            .map(|r| r.natural)
    }

    /// Sum of the kept dice without any modifier.
    pub fn dice_total(&self) -> i32 {
        self.component_results
            .iter()
            .map(|c| subtotal_i32(c.subtotal))
            .fold(0i32, i32::saturating_add)
    }

    /// Format the individual dice results for display.
    ///
    /// Discarded dice are shown in parentheses, explosions with `!`.
    pub fn dice_display(&self) -> String {
        let dice_parts: Vec<String> = self
            .component_results
            .iter()
            .map(|c| {
                let shown: Vec<String> = c
                    .rolls
                    .iter()
                    .map(|r| {
                        let mut face = r.natural.to_string();
                        for extra in &r.explosions {
                            face.push_str(&format!("!{extra}"));
                        }
                        if r.discarded {
                            format!("({face})")
                        } else {
                            face
                        }
                    })
                    .collect();
                format!("[{}]", shown.join(", "))
            })
            .collect();

        let dice_str = dice_parts.join(" + ");
        match self.modifier {
            0 => dice_str,
            m if dice_str.is_empty() => m.to_string(),
            m if m > 0 => format!("{dice_str} + {m}"),
            m => format!("{dice_str} - {}", m.abs()),
        }
    }

    /// Check if the roll meets or exceeds a DC.
    pub fn meets_dc(&self, dc: i32) -> bool {
        self.total >= dc
    }

    pub fn is_critical(&self) -> bool {
        self.critical
    }

    pub fn is_fumble(&self) -> bool {
        self.fumble
    }
}

impl fmt::Display for RollResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} = {}", self.dice_display(), self.total)
    }
}

fn subtotal_i32(subtotal: u32) -> i32 {
    i32::try_from(subtotal).unwrap_or(i32::MAX)
}

/// Produces roll results for dice expressions.
///
/// Stateless between calls apart from the RNG stream and the queue of
/// supplied faces.
#[derive(Clone)]
pub struct DiceResolver {
    rng: ChaCha8Rng,
    supplied: VecDeque<u32>,
}

impl fmt::Debug for DiceResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DiceResolver")
            .field("supplied", &self.supplied)
            .finish_non_exhaustive()
    }
}

impl Default for DiceResolver {
    fn default() -> Self {
        Self::new()
    }
}

impl DiceResolver {
    /// A resolver seeded from OS entropy.
    pub fn new() -> Self {
        Self {
            rng: ChaCha8Rng::from_entropy(),
            supplied: VecDeque::new(),
        }
    }

    /// A reproducible resolver: the same seed yields the same rolls.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: ChaCha8Rng::seed_from_u64(seed),
            supplied: VecDeque::new(),
        }
    }

    /// Queue faces to be used, in order, before drawing from the RNG.
    pub fn supply(&mut self, faces: impl IntoIterator<Item = u32>) {
        self.supplied.extend(faces);
    }

    /// Number of supplied faces not yet consumed.
    pub fn pending_faces(&self) -> usize {
        self.supplied.len()
    }

    /// Drop any supplied faces that were not consumed.
    pub fn clear_supplied(&mut self) {
        self.supplied.clear();
    }

    /// Parse and roll in one step.
    pub fn roll_notation(
        &mut self,
        notation: &str,
        options: &RollOptions,
    ) -> Result<RollResult, DiceError> {
        let expr = DiceExpression::parse(notation)?;
        Ok(self.roll(&expr, options))
    }

    /// Roll an ability check, attack or save: 1d20 + bonus.
    pub fn d20(&mut self, bonus: i32, advantage: Advantage) -> RollResult {
        self.roll(
            &DiceExpression::d20(0),
            &RollOptions::new()
                .with_bonus(bonus)
                .with_advantage(advantage),
        )
    }

    /// Roll an expression with the given options.
    pub fn roll(&mut self, expr: &DiceExpression, options: &RollOptions) -> RollResult {
        let component_results = if options.advantage != Advantage::Normal && expr.is_single_d20()
        {
            vec![self.roll_d20_pair(options)]
        } else {
            expr.components
                .iter()
                .map(|c| self.roll_component(c, options))
                .collect()
        };

        let dice_total = component_results
            .iter()
            .map(|c| subtotal_i32(c.subtotal))
            .fold(0i32, i32::saturating_add);
        let modifier = expr.modifier.saturating_add(options.bonus);

        let mut result = RollResult {
            expression: expr.clone(),
            component_results,
            modifier,
            total: dice_total.saturating_add(modifier),
            critical: false,
            fumble: false,
        };
        if let Some(natural) = result.natural_d20() {
            result.critical = natural >= options.critical_threshold;
            result.fumble = natural == 1;
        }
        result
    }

    fn roll_d20_pair(&mut self, options: &RollOptions) -> ComponentResult {
        let first = self.roll_die(20, options);
        let second = self.roll_die(20, options);

        let keep_first = match options.advantage {
            Advantage::Advantage => first.value >= second.value,
            Advantage::Disadvantage => first.value <= second.value,
            Advantage::Normal => true,
        };

        let (mut first, mut second) = (first, second);
        if keep_first {
            second.discarded = true;
        } else {
            first.discarded = true;
        }
        let subtotal = if keep_first { first.value } else { second.value };

        ComponentResult {
            sides: 20,
            rolls: vec![first, second],
            subtotal,
        }
    }

    fn roll_component(&mut self, component: &DiceComponent, options: &RollOptions) -> ComponentResult {
        // Doubling a critical may take a parsed component past MAX_DICE_COUNT once.
        let count_limit = MAX_DICE_COUNT.saturating_mul(2);
        let count = component.count.min(count_limit);
        let sides = component.sides.clamp(1, MAX_DIE_SIDES);
        if count != component.count || sides != component.sides {
            warn!(
                count = component.count,
                sides = component.sides,
                "dice component outside limits, clamping"
            );
        }
        let mut rolls: Vec<DieRoll> = (0..count)
            .map(|_| self.roll_die(sides, options))
            .collect();

        if let Some(keep) = component.keep_highest.or(component.keep_lowest) {
            let mut order: Vec<usize> = (0..rolls.len()).collect();
            if component.keep_highest.is_some() {
                order.sort_by(|&a, &b| rolls[b].value.cmp(&rolls[a].value));
            } else {
                order.sort_by(|&a, &b| rolls[a].value.cmp(&rolls[b].value));
            }
            for &idx in order.iter().skip(keep as usize) {
                rolls[idx].discarded = true;
            }
        }

        let subtotal = rolls
            .iter()
            .filter(|r| !r.discarded)
            .fold(0u32, |acc, r| acc.saturating_add(r.value));
        ComponentResult {
            sides,
            rolls,
            subtotal,
        }
    }

    fn roll_die(&mut self, sides: u32, options: &RollOptions) -> DieRoll {
        let mut natural = self.face(sides);
        let mut rerolled_from = None;
        if options.reroll_ones && natural == 1 {
            rerolled_from = Some(natural);
            natural = self.face(sides);
        }

        let mut value = natural;
        let mut explosions = Vec::new();
        if options.exploding {
            let mut last = natural;
            while last == sides && explosions.len() < MAX_EXPLOSIONS {
                last = self.face(sides);
                explosions.push(last);
                value = value.saturating_add(last);
            }
        }

        DieRoll {
            sides,
            natural,
            value,
            explosions,
            rerolled_from,
            discarded: false,
        }
    }

    fn face(&mut self, sides: u32) -> u32 {
        match self.supplied.pop_front() {
            Some(face) if (1..=sides).contains(&face) => face,
            Some(face) => {
                warn!(face, sides, "supplied face out of range, clamping");
                face.clamp(1, sides)
            }
            None => self.rng.gen_range(1..=sides),
        }
    }
}
