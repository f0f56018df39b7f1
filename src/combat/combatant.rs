//! Combatant state as seen by the rules core

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::core::types::{ability_modifier, Ability, CombatantId, Vec2};

/// Feats the engines read mechanically
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Feat {
    /// Advantage on concentration saves
    WarCaster,
    /// Targets damaged by this combatant have disadvantage on concentration saves
    MageSlayer,
    /// +5 initiative, cannot be surprised
    Alert,
    /// Opportunity attacks stop movement
    Sentinel,
}

impl Feat {
    pub fn parse(raw: &str) -> Option<Feat> {
        match raw.trim().to_ascii_lowercase().replace([' ', '-'], "_").as_str() {
            "war_caster" | "warcaster" => Some(Feat::WarCaster),
            "mage_slayer" | "mageslayer" => Some(Feat::MageSlayer),
            "alert" => Some(Feat::Alert),
            "sentinel" => Some(Feat::Sentinel),
            _ => None,
        }
    }
}

/// One participant in combat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Combatant {
    pub id: CombatantId,
    pub name: String,
    pub faction: String,
    /// Current hit points; may go negative on overflow damage
    pub hp: i32,
    pub max_hp: i32,
    pub temp_hp: i32,
    pub armor_class: i32,
    pub position: Vec2,
    /// Scores indexed by `Ability::index()`
    pub ability_scores: [i32; 6],
    pub proficiency_bonus: i32,
    pub save_proficiencies: Vec<Ability>,
    /// Remaining slots, index 0 = level 1
    pub spell_slots: [u32; 9],
    pub reactions_available: u32,
    pub is_active: bool,
    /// Free-form immunity names ("Paralyzed", "poisoned"), case-insensitive
    pub condition_immunities: Vec<String>,
    pub feats: Vec<Feat>,
    pub class_resources: BTreeMap<String, u32>,
}

impl Combatant {
    pub fn new(id: impl Into<CombatantId>, max_hp: i32) -> Self {
        let id = id.into();
        Self {
            name: id.0.clone(),
            id,
            faction: "neutral".into(),
            hp: max_hp,
            max_hp,
            temp_hp: 0,
            armor_class: 10,
            position: Vec2::default(),
            ability_scores: [10; 6],
            proficiency_bonus: 2,
            save_proficiencies: Vec::new(),
            spell_slots: [0; 9],
            reactions_available: 1,
            is_active: true,
            condition_immunities: Vec::new(),
            feats: Vec::new(),
            class_resources: BTreeMap::new(),
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_faction(mut self, faction: impl Into<String>) -> Self {
        self.faction = faction.into();
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Vec2::new(x, y);
        self
    }

    pub fn with_armor_class(mut self, armor_class: i32) -> Self {
        self.armor_class = armor_class;
        self
    }

    pub fn with_ability(mut self, ability: Ability, score: i32) -> Self {
        self.ability_scores[ability.index()] = score;
        self
    }

    pub fn with_save_proficiency(mut self, ability: Ability) -> Self {
        if !self.save_proficiencies.contains(&ability) {
            self.save_proficiencies.push(ability);
        }
        self
    }

    /// Set the number of slots at a spell level (1-9)
    pub fn with_spell_slots(mut self, level: u8, count: u32) -> Self {
        if (1..=9).contains(&level) {
            self.spell_slots[(level - 1) as usize] = count;
        }
        self
    }

    pub fn with_immunity(mut self, condition: impl Into<String>) -> Self {
        self.condition_immunities.push(condition.into());
        self
    }

    pub fn with_feat(mut self, feat: Feat) -> Self {
        if !self.feats.contains(&feat) {
            self.feats.push(feat);
        }
        self
    }

    pub fn with_resource(mut self, name: impl Into<String>, amount: u32) -> Self {
        self.class_resources.insert(name.into(), amount);
        self
    }

    pub fn ability_modifier(&self, ability: Ability) -> i32 {
        ability_modifier(self.ability_scores[ability.index()])
    }

    /// Ability modifier plus proficiency when proficient
    pub fn save_bonus(&self, ability: Ability) -> i32 {
        let proficiency = if self.save_proficiencies.contains(&ability) {
            self.proficiency_bonus
        } else {
            0
        };
        self.ability_modifier(ability) + proficiency
    }

    pub fn is_alive(&self) -> bool {
        self.hp > 0
    }

    /// Able to act at all (alive and still in the fight)
    pub fn can_act(&self) -> bool {
        self.is_active && self.is_alive()
    }

    pub fn has_feat(&self, feat: Feat) -> bool {
        self.feats.contains(&feat)
    }

    pub fn is_hostile_to(&self, other: &Combatant) -> bool {
        self.faction != other.faction
    }

    /// Lowest slot level at or above `min_level` with a slot left
    pub fn available_slot(&self, min_level: u8) -> Option<u8> {
        let start = min_level.clamp(1, 9);
        (start..=9).find(|level| self.spell_slots[(*level - 1) as usize] > 0)
    }

    /// Spend the lowest qualifying slot; returns the level spent
    pub fn consume_spell_slot(&mut self, min_level: u8) -> Option<u8> {
        let level = self.available_slot(min_level)?;
        self.spell_slots[(level - 1) as usize] -= 1;
        Some(level)
    }

    pub fn resource(&self, name: &str) -> u32 {
        self.class_resources.get(name).copied().unwrap_or(0)
    }

    pub fn consume_resource(&mut self, name: &str, amount: u32) -> bool {
        match self.class_resources.get_mut(name) {
            Some(current) if *current >= amount => {
                *current -= amount;
                true
            }
            _ => false,
        }
    }

    pub fn is_immune_to(&self, condition: &str) -> bool {
        self.condition_immunities
            .iter()
            .any(|imm| imm.eq_ignore_ascii_case(condition))
    }
}
