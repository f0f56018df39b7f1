//! Query/result contract between the rules core and the dice resolver

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::modifiers::RollModifiers;
use crate::core::types::CombatantId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum QueryType {
    SavingThrow,
    DamageRoll,
    AttackRoll,
    RawD20,
}

/// Parameter keys understood by the default resolver
pub mod params {
    pub const DICE_COUNT: &str = "dice_count";
    pub const DICE_SIDES: &str = "dice_sides";
}

/// One roll the core wants made
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryInput {
    pub query_type: QueryType,
    /// Target number; unused for damage
    pub dc: i32,
    /// Bonus added to the natural roll (or flat damage)
    pub base_value: i32,
    pub target: Option<CombatantId>,
    pub source: Option<CombatantId>,
    pub tags: BTreeSet<String>,
    pub parameters: BTreeMap<String, i32>,
    pub modifiers: RollModifiers,
}

impl QueryInput {
    pub fn new(query_type: QueryType) -> Self {
        Self {
            query_type,
            dc: 0,
            base_value: 0,
            target: None,
            source: None,
            tags: BTreeSet::new(),
            parameters: BTreeMap::new(),
            modifiers: RollModifiers::default(),
        }
    }

    pub fn with_dc(mut self, dc: i32) -> Self {
        self.dc = dc;
        self
    }

    pub fn with_base(mut self, base_value: i32) -> Self {
        self.base_value = base_value;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_parameter(mut self, key: impl Into<String>, value: i32) -> Self {
        self.parameters.insert(key.into(), value);
        self
    }

    pub fn parameter(&self, key: &str) -> Option<i32> {
        self.parameters.get(key).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct QueryResult {
    pub is_success: bool,
    /// The d20 face that was kept (0 when nothing was rolled)
    pub natural_roll: u32,
    pub final_value: i32,
}

impl QueryResult {
    pub fn is_natural_20(&self) -> bool {
        self.natural_roll == 20
    }

    pub fn is_natural_1(&self) -> bool {
        self.natural_roll == 1
    }
}
