//! Roll modifiers and the per-combatant registry statuses write into
//!
//! Conditional modifiers keep their predicate and are evaluated against the
//! roll's tags when the roll is made, never folded into a flat number.

use ahash::AHashMap;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::collections::BTreeSet;

use crate::core::types::{Ability, CombatantId};

/// What a modifier adjusts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierTarget {
    /// The holder's own attack rolls
    AttackRoll,
    /// Attack rolls made against the holder
    IncomingAttack,
    /// Saving throws; `None` applies to every ability
    SavingThrow(Option<Ability>),
    AbilityCheck,
    ArmorClass,
    DamageDealt,
    DamageTaken,
    Speed,
}

impl ModifierTarget {
    /// Does a modifier aimed at `self` apply to a roll of kind `roll`?
    pub fn applies_to(&self, roll: &ModifierTarget) -> bool {
        match (self, roll) {
            (ModifierTarget::SavingThrow(None), ModifierTarget::SavingThrow(_)) => true,
            (ModifierTarget::SavingThrow(Some(a)), ModifierTarget::SavingThrow(Some(b))) => a == b,
            _ => self == roll,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ModifierKind {
    Flat,
    Advantage,
    Disadvantage,
    /// Multiplies the final value (damage resistance = 0.5)
    Multiplier,
    AutoFail,
}

/// Small predicate over the tags of the roll being made
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ContextPredicate {
    HasTag(String),
    LacksTag(String),
    AnyTag(Vec<String>),
    All(Vec<ContextPredicate>),
    Any(Vec<ContextPredicate>),
    Not(Box<ContextPredicate>),
}

impl ContextPredicate {
    pub fn evaluate(&self, tags: &BTreeSet<String>) -> bool {
        match self {
            ContextPredicate::HasTag(tag) => tags.contains(tag),
            ContextPredicate::LacksTag(tag) => !tags.contains(tag),
            ContextPredicate::AnyTag(any) => any.iter().any(|t| tags.contains(t)),
            ContextPredicate::All(all) => all.iter().all(|p| p.evaluate(tags)),
            ContextPredicate::Any(any) => any.iter().any(|p| p.evaluate(tags)),
            ContextPredicate::Not(inner) => !inner.evaluate(tags),
        }
    }
}

/// Modifier template carried by a status definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModifierSpec {
    pub target: ModifierTarget,
    pub kind: ModifierKind,
    pub value: f64,
    /// Added once per stack beyond the first
    #[serde(default)]
    pub per_stack: f64,
    #[serde(default)]
    pub condition: Option<ContextPredicate>,
}

impl ModifierSpec {
    pub fn new(target: ModifierTarget, kind: ModifierKind, value: f64) -> Self {
        Self {
            target,
            kind,
            value,
            per_stack: 0.0,
            condition: None,
        }
    }

    pub fn flat(target: ModifierTarget, value: f64) -> Self {
        Self::new(target, ModifierKind::Flat, value)
    }

    pub fn advantage(target: ModifierTarget) -> Self {
        Self::new(target, ModifierKind::Advantage, 0.0)
    }

    pub fn disadvantage(target: ModifierTarget) -> Self {
        Self::new(target, ModifierKind::Disadvantage, 0.0)
    }

    pub fn per_stack(mut self, per_stack: f64) -> Self {
        self.per_stack = per_stack;
        self
    }

    pub fn when(mut self, condition: ContextPredicate) -> Self {
        self.condition = Some(condition);
        self
    }

    /// `value + per_stack * (stacks - 1)`
    pub fn value_at(&self, stacks: u32) -> f64 {
        self.value + self.per_stack * stacks.saturating_sub(1) as f64
    }

    /// Concrete modifier for an instance holding `stacks` stacks
    pub fn instantiate(&self, id: impl Into<String>, source: impl Into<String>, stacks: u32) -> Modifier {
        Modifier {
            id: id.into(),
            source: source.into(),
            target: self.target,
            kind: self.kind,
            value: self.value_at(stacks),
            condition: self.condition.clone(),
        }
    }
}

/// A modifier registered against one combatant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Modifier {
    pub id: String,
    /// Owner key used for bulk removal (a status instance id, a reaction id)
    pub source: String,
    pub target: ModifierTarget,
    pub kind: ModifierKind,
    pub value: f64,
    pub condition: Option<ContextPredicate>,
}

impl Modifier {
    pub fn is_active_for(&self, tags: &BTreeSet<String>) -> bool {
        self.condition.as_ref().map_or(true, |c| c.evaluate(tags))
    }
}

/// Everything that ends up changing a single roll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollModifiers {
    pub flat: f64,
    pub advantage_sources: Vec<String>,
    pub disadvantage_sources: Vec<String>,
    pub auto_fail: bool,
    pub multiplier: f64,
}

impl Default for RollModifiers {
    fn default() -> Self {
        Self {
            flat: 0.0,
            advantage_sources: Vec::new(),
            disadvantage_sources: Vec::new(),
            auto_fail: false,
            multiplier: 1.0,
        }
    }
}

impl RollModifiers {
    pub fn add(&mut self, modifier: &Modifier) {
        match modifier.kind {
            ModifierKind::Flat => self.flat += modifier.value,
            ModifierKind::Advantage => self.advantage_sources.push(modifier.source.clone()),
            ModifierKind::Disadvantage => self.disadvantage_sources.push(modifier.source.clone()),
            ModifierKind::Multiplier => self.multiplier *= modifier.value,
            ModifierKind::AutoFail => self.auto_fail = true,
        }
    }

    pub fn grant_advantage(&mut self, source: impl Into<String>) {
        self.advantage_sources.push(source.into());
    }

    pub fn impose_disadvantage(&mut self, source: impl Into<String>) {
        self.disadvantage_sources.push(source.into());
    }

    /// Advantage that is not cancelled by disadvantage
    pub fn has_advantage(&self) -> bool {
        !self.advantage_sources.is_empty() && self.disadvantage_sources.is_empty()
    }

    pub fn has_disadvantage(&self) -> bool {
        !self.disadvantage_sources.is_empty() && self.advantage_sources.is_empty()
    }
}

/// Per-combatant modifier lists
#[derive(Debug, Default)]
pub struct ModifierRegistry {
    by_combatant: RefCell<AHashMap<CombatantId, Vec<Modifier>>>,
}

impl ModifierRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, combatant: &CombatantId, modifier: Modifier) {
        self.by_combatant
            .borrow_mut()
            .entry(combatant.clone())
            .or_default()
            .push(modifier);
    }

    /// Remove every modifier registered under `source`
    pub fn remove_by_source(&self, combatant: &CombatantId, source: &str) -> usize {
        let mut map = self.by_combatant.borrow_mut();
        let Some(list) = map.get_mut(combatant) else {
            return 0;
        };
        let before = list.len();
        list.retain(|m| m.source != source);
        let removed = before - list.len();
        if list.is_empty() {
            map.remove(combatant);
        }
        removed
    }

    /// Modifiers aimed at `roll` whose condition holds for `tags`
    pub fn applicable(
        &self,
        combatant: &CombatantId,
        roll: ModifierTarget,
        tags: &BTreeSet<String>,
    ) -> Vec<Modifier> {
        self.by_combatant
            .borrow()
            .get(combatant)
            .map(|list| {
                list.iter()
                    .filter(|m| m.target.applies_to(&roll) && m.is_active_for(tags))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn modifiers_of(&self, combatant: &CombatantId) -> Vec<Modifier> {
        self.by_combatant
            .borrow()
            .get(combatant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn clear_combatant(&self, combatant: &CombatantId) {
        self.by_combatant.borrow_mut().remove(combatant);
    }
}
