//! Core type definitions used throughout the codebase

use serde::{Deserialize, Serialize};
use std::cell::Cell;
use std::fmt;

/// Unique identifier for combatants
///
/// Hosts address combatants by string id; the rules core never invents them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CombatantId(pub String);

impl CombatantId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CombatantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CombatantId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CombatantId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Combat clock tick (one tick per turn boundary)
pub type Tick = u64;

/// 2D battlefield position (meters)
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

impl std::ops::Add for Vec2 {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self { x: self.x + rhs.x, y: self.y + rhs.y }
    }
}

impl std::ops::Sub for Vec2 {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self { x: self.x - rhs.x, y: self.y - rhs.y }
    }
}

/// The six ability scores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Ability {
    Strength,
    Dexterity,
    Constitution,
    Intelligence,
    Wisdom,
    Charisma,
}

impl Ability {
    pub fn all() -> &'static [Ability] {
        &[
            Ability::Strength,
            Ability::Dexterity,
            Ability::Constitution,
            Ability::Intelligence,
            Ability::Wisdom,
            Ability::Charisma,
        ]
    }

    /// Parse "STR", "str", "Strength" etc.
    pub fn parse(raw: &str) -> Option<Ability> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "str" | "strength" => Some(Ability::Strength),
            "dex" | "dexterity" => Some(Ability::Dexterity),
            "con" | "constitution" => Some(Ability::Constitution),
            "int" | "intelligence" => Some(Ability::Intelligence),
            "wis" | "wisdom" => Some(Ability::Wisdom),
            "cha" | "charisma" => Some(Ability::Charisma),
            _ => None,
        }
    }

    pub fn index(&self) -> usize {
        *self as usize
    }

    pub fn short_name(&self) -> &'static str {
        match self {
            Ability::Strength => "STR",
            Ability::Dexterity => "DEX",
            Ability::Constitution => "CON",
            Ability::Intelligence => "INT",
            Ability::Wisdom => "WIS",
            Ability::Charisma => "CHA",
        }
    }
}

/// Score-to-modifier conversion: 10-11 => +0, 8-9 => -1, 12-13 => +1
pub fn ability_modifier(score: i32) -> i32 {
    (score - 10).div_euclid(2)
}

/// Monotonic combat clock shared by every engine in a session
///
/// `now()` stamps instances, prompts and concentration records so that
/// ordering by time is stable across a replay.
#[derive(Debug, Default)]
pub struct CombatClock {
    tick: Cell<Tick>,
    round: Cell<u32>,
}

impl CombatClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Tick {
        self.tick.get()
    }

    pub fn round(&self) -> u32 {
        self.round.get()
    }

    /// Advance one tick and return the new value
    pub fn advance(&self) -> Tick {
        let next = self.tick.get() + 1;
        self.tick.set(next);
        next
    }

    pub fn next_round(&self) -> u32 {
        let next = self.round.get() + 1;
        self.round.set(next);
        next
    }

    /// Jump to a saved position; used when loading a snapshot
    pub fn restore(&self, tick: Tick, round: u32) {
        self.tick.set(tick);
        self.round.set(round);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combatant_id_display() {
        let id = CombatantId::new("wizard_1");
        assert_eq!(id.to_string(), "wizard_1");
        assert_eq!(CombatantId::from("wizard_1"), id);
    }

    #[test]
    fn test_ability_parse_is_case_insensitive() {
        assert_eq!(Ability::parse("CON"), Some(Ability::Constitution));
        assert_eq!(Ability::parse("wisdom"), Some(Ability::Wisdom));
        assert_eq!(Ability::parse(" Dex "), Some(Ability::Dexterity));
        assert_eq!(Ability::parse("luck"), None);
    }

    #[test]
    fn test_ability_modifier() {
        assert_eq!(ability_modifier(10), 0);
        assert_eq!(ability_modifier(11), 0);
        assert_eq!(ability_modifier(8), -1);
        assert_eq!(ability_modifier(9), -1);
        assert_eq!(ability_modifier(18), 4);
        assert_eq!(ability_modifier(1), -5);
    }

    #[test]
    fn test_vec2_distance() {
        let a = Vec2::new(0.0, 0.0);
        let b = Vec2::new(3.0, 4.0);
        assert!((a.distance(&b) - 5.0).abs() < 0.0001);
    }

    #[test]
    fn test_clock_advances() {
        let clock = CombatClock::new();
        assert_eq!(clock.now(), 0);
        assert_eq!(clock.advance(), 1);
        assert_eq!(clock.next_round(), 1);
        assert_eq!(clock.now(), 1);
    }
}
