//! Dice resolvers
//!
//! The core decides when to roll and what a result means. A `Resolver`
//! decides how: the provided methods implement the usual d20 arithmetic on
//! top of `roll_die`, and any implementor may override them.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::query::{params, QueryInput, QueryResult, QueryType};
use crate::core::rng::SessionRng;

pub trait Resolver {
    /// One die with `sides` faces, 1..=sides
    fn roll_die(&self, sides: u32) -> u32;

    /// d20 honouring net advantage/disadvantage
    fn roll_kept_d20(&self, input: &QueryInput) -> u32 {
        let first = self.roll_die(20);
        if input.modifiers.has_advantage() {
            first.max(self.roll_die(20))
        } else if input.modifiers.has_disadvantage() {
            first.min(self.roll_die(20))
        } else {
            first
        }
    }

    /// Saving throw against `input.dc`; auto-fail skips the roll
    fn roll_save(&self, input: &QueryInput) -> QueryResult {
        if input.modifiers.auto_fail {
            return QueryResult {
                is_success: false,
                natural_roll: 0,
                final_value: 0,
            };
        }
        let natural = self.roll_kept_d20(input);
        let total = natural as i32 + input.base_value + input.modifiers.flat.round() as i32;
        QueryResult {
            is_success: total >= input.dc,
            natural_roll: natural,
            final_value: total,
        }
    }

    /// Damage: `dice_count`d`dice_sides` plus base and flat, times multiplier
    fn roll_damage(&self, input: &QueryInput) -> QueryResult {
        let count = input.parameter(params::DICE_COUNT).unwrap_or(0).max(0) as u32;
        let sides = input.parameter(params::DICE_SIDES).unwrap_or(0).max(0) as u32;
        let rolled: i32 = (0..count).map(|_| self.roll_die(sides) as i32).sum();
        let raw = rolled as f64 + input.base_value as f64 + input.modifiers.flat;
        let total = (raw * input.modifiers.multiplier).floor().max(0.0) as i32;
        QueryResult {
            is_success: true,
            natural_roll: 0,
            final_value: total,
        }
    }

    /// Attack rolls treat natural 20 as a hit and natural 1 as a miss;
    /// raw d20 checks compare the total only.
    fn roll_d20(&self, input: &QueryInput) -> QueryResult {
        if input.modifiers.auto_fail {
            return QueryResult {
                is_success: false,
                natural_roll: 0,
                final_value: 0,
            };
        }
        let natural = self.roll_kept_d20(input);
        let total = natural as i32 + input.base_value + input.modifiers.flat.round() as i32;
        let is_success = match (input.query_type, natural) {
            (QueryType::AttackRoll, 20) => true,
            (QueryType::AttackRoll, 1) => false,
            _ => total >= input.dc,
        };
        QueryResult {
            is_success,
            natural_roll: natural,
            final_value: total,
        }
    }
}

/// Resolver drawing from the session RNG
#[derive(Debug, Clone)]
pub struct DiceResolver {
    rng: Rc<SessionRng>,
}

impl DiceResolver {
    pub fn new(rng: Rc<SessionRng>) -> Self {
        Self { rng }
    }
}

impl Resolver for DiceResolver {
    fn roll_die(&self, sides: u32) -> u32 {
        self.rng.roll_die(sides)
    }
}

/// Resolver replaying predetermined results
///
/// d20s come from one queue, every other die from another. An exhausted
/// queue falls back to a fixed d20 face and to the rounded-up average for
/// other dice.
#[derive(Debug)]
pub struct ScriptedResolver {
    d20s: RefCell<VecDeque<u32>>,
    dice: RefCell<VecDeque<u32>>,
    fallback_d20: u32,
    rolled: RefCell<Vec<u32>>,
}

impl ScriptedResolver {
    pub fn new<I: IntoIterator<Item = u32>>(d20s: I) -> Self {
        Self {
            d20s: RefCell::new(d20s.into_iter().collect()),
            dice: RefCell::new(VecDeque::new()),
            fallback_d20: 10,
            rolled: RefCell::new(Vec::new()),
        }
    }

    /// Every d20 rolls this face
    pub fn always(face: u32) -> Self {
        Self::new(Vec::new()).with_fallback(face)
    }

    pub fn with_fallback(mut self, face: u32) -> Self {
        self.fallback_d20 = face.clamp(1, 20);
        self
    }

    pub fn with_dice<I: IntoIterator<Item = u32>>(self, dice: I) -> Self {
        self.dice.borrow_mut().extend(dice);
        self
    }

    pub fn push_d20(&self, face: u32) {
        self.d20s.borrow_mut().push_back(face);
    }

    pub fn remaining_d20s(&self) -> usize {
        self.d20s.borrow().len()
    }

    /// Every face handed out so far, in order
    pub fn history(&self) -> Vec<u32> {
        self.rolled.borrow().clone()
    }
}

impl Resolver for ScriptedResolver {
    fn roll_die(&self, sides: u32) -> u32 {
        let face = if sides == 20 {
            self.d20s.borrow_mut().pop_front().unwrap_or(self.fallback_d20)
        } else {
            self.dice
                .borrow_mut()
                .pop_front()
                .unwrap_or((sides + 1) / 2)
        };
        self.rolled.borrow_mut().push(face);
        face
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn save(dc: i32, base: i32) -> QueryInput {
        QueryInput::new(QueryType::SavingThrow).with_dc(dc).with_base(base)
    }

    #[test]
    fn test_save_compares_total_to_dc() {
        let resolver = ScriptedResolver::new([10, 9]);
        assert!(resolver.roll_save(&save(13, 3)).is_success);
        assert!(!resolver.roll_save(&save(13, 3)).is_success);
    }

    #[test]
    fn test_advantage_keeps_higher() {
        let resolver = ScriptedResolver::new([4, 17]);
        let mut input = save(15, 0);
        input.modifiers.grant_advantage("test");
        let result = resolver.roll_save(&input);
        assert_eq!(result.natural_roll, 17);
        assert!(result.is_success);
    }

    #[test]
    fn test_disadvantage_keeps_lower() {
        let resolver = ScriptedResolver::new([18, 3]);
        let mut input = save(10, 0);
        input.modifiers.impose_disadvantage("test");
        assert_eq!(resolver.roll_save(&input).natural_roll, 3);
    }

    #[test]
    fn test_both_cancel_to_single_roll() {
        let resolver = ScriptedResolver::new([12, 1]);
        let mut input = save(10, 0);
        input.modifiers.grant_advantage("a");
        input.modifiers.impose_disadvantage("b");
        assert_eq!(resolver.roll_save(&input).natural_roll, 12);
        assert_eq!(resolver.remaining_d20s(), 1);
    }

    #[test]
    fn test_auto_fail_skips_roll() {
        let resolver = ScriptedResolver::new([20]);
        let mut input = save(5, 10);
        input.modifiers.auto_fail = true;
        assert!(!resolver.roll_save(&input).is_success);
        assert_eq!(resolver.remaining_d20s(), 1);
    }

    #[test]
    fn test_attack_naturals() {
        let resolver = ScriptedResolver::new([20, 1]);
        let attack = QueryInput::new(QueryType::AttackRoll).with_dc(30).with_base(0);
        assert!(resolver.roll_d20(&attack).is_success);
        let easy = QueryInput::new(QueryType::AttackRoll).with_dc(2).with_base(10);
        assert!(!resolver.roll_d20(&easy).is_success);
    }

    #[test]
    fn test_damage_multiplier_floors() {
        let resolver = ScriptedResolver::always(10).with_dice([6, 5]);
        let mut input = QueryInput::new(QueryType::DamageRoll)
            .with_base(2)
            .with_parameter(params::DICE_COUNT, 2)
            .with_parameter(params::DICE_SIDES, 6);
        input.modifiers.multiplier = 0.5;
        assert_eq!(resolver.roll_damage(&input).final_value, 6);
    }

    #[test]
    fn test_dice_resolver_is_deterministic() {
        let a = DiceResolver::new(Rc::new(SessionRng::from_seed(7)));
        let b = DiceResolver::new(Rc::new(SessionRng::from_seed(7)));
        let input = save(10, 0);
        let rolls_a: Vec<u32> = (0..10).map(|_| a.roll_save(&input).natural_roll).collect();
        let rolls_b: Vec<u32> = (0..10).map(|_| b.roll_save(&input).natural_roll).collect();
        assert_eq!(rolls_a, rolls_b);
        assert!(rolls_a.iter().all(|r| (1..=20).contains(r)));
    }
}
