//! Reaction definitions and the closed sets their behaviour is built from

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::core::types::CombatantId;

/// Trigger windows a reaction can answer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReactionTrigger {
    EnemyLeavesReach,
    EnemyEntersReach,
    YouAreAttacked,
    YouAreHit,
    YouTakeDamage,
    AllyAttacked,
    AllyTakesDamage,
    SpellCastNearby,
    YouAreTargetedBySpell,
    YouFailSave,
}

impl ReactionTrigger {
    pub fn parse(raw: &str) -> Option<ReactionTrigger> {
        let trigger = match raw.trim().to_ascii_lowercase().replace(['_', ' '], "").as_str() {
            "enemyleavesreach" => ReactionTrigger::EnemyLeavesReach,
            "enemyentersreach" => ReactionTrigger::EnemyEntersReach,
            "youareattacked" => ReactionTrigger::YouAreAttacked,
            "youarehit" => ReactionTrigger::YouAreHit,
            "youtakedamage" => ReactionTrigger::YouTakeDamage,
            "allyattacked" => ReactionTrigger::AllyAttacked,
            "allytakesdamage" => ReactionTrigger::AllyTakesDamage,
            "spellcastnearby" => ReactionTrigger::SpellCastNearby,
            "youaretargetedbyspell" => ReactionTrigger::YouAreTargetedBySpell,
            "youfailsave" => ReactionTrigger::YouFailSave,
            _ => return None,
        };
        Some(trigger)
    }
}

/// Mechanical flags read by eligibility and use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ReactionFlag {
    /// Only when the triggering attack would hit
    RequiresHit,
    /// Spends a spell slot even without an explicit resource
    CostsSpellSlot,
    /// Never reacts to the reactor's own action
    NotSelf,
}

impl ReactionFlag {
    pub fn parse(raw: &str) -> Option<ReactionFlag> {
        match raw.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "requireshit" => Some(ReactionFlag::RequiresHit),
            "costsspellslot" => Some(ReactionFlag::CostsSpellSlot),
            "notself" => Some(ReactionFlag::NotSelf),
            _ => None,
        }
    }
}

/// Policy hook answering "would the AI take this reaction?"
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AiPolicy {
    Always,
    Never,
    /// Use when the triggering damage reaches the threshold
    DamageThreshold { min_damage: f64 },
    /// Use when the trigger's source or subject is listed
    PriorityTargets { targets: Vec<CombatantId> },
    /// Use with the given probability from the session RNG
    Random { chance: f64 },
}

impl Default for AiPolicy {
    fn default() -> Self {
        AiPolicy::Always
    }
}

/// What using a reaction costs besides the reaction budget
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ReactionResource {
    #[default]
    None,
    SpellSlot { min_level: u8 },
    ClassResource { name: String, amount: u32 },
}

/// Effects run when a reaction is used
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ReactionEffect {
    /// Apply a status to the reactor
    ApplyBoost {
        status_id: String,
        duration: Option<i32>,
    },
    /// Cancel the triggering action when it allows it
    CancelTrigger,
    /// Scale the triggering damage; recorded as `damageMultiplier`
    DamageMultiplier { multiplier: f64 },
    /// Queue an attack against the trigger source
    QueueAttack { action_id: String },
    /// Queue a spell against the trigger source
    CastSpell { action_id: String },
    /// Adjust the triggering roll
    ModifyRoll { delta: f64 },
    /// Damage the trigger source
    DealDamage {
        amount: i32,
        damage_type: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionDefinition {
    /// Canonical once registered
    pub id: String,
    pub name: String,
    pub description: String,
    pub triggers: BTreeSet<ReactionTrigger>,
    /// Lower resolves first
    pub priority: i32,
    /// 0 means any distance
    pub range: f32,
    pub can_cancel: bool,
    pub can_modify: bool,
    pub flags: BTreeSet<ReactionFlag>,
    pub tags: BTreeSet<String>,
    pub ai_policy: AiPolicy,
    pub action_id: Option<String>,
    pub resource: ReactionResource,
    pub effects: Vec<ReactionEffect>,
}

impl ReactionDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            triggers: BTreeSet::new(),
            priority: 10,
            range: 0.0,
            can_cancel: false,
            can_modify: false,
            flags: BTreeSet::new(),
            tags: BTreeSet::new(),
            ai_policy: AiPolicy::Always,
            action_id: None,
            resource: ReactionResource::None,
            effects: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn on(mut self, trigger: ReactionTrigger) -> Self {
        self.triggers.insert(trigger);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_range(mut self, range: f32) -> Self {
        self.range = range.max(0.0);
        self
    }

    pub fn cancels(mut self) -> Self {
        self.can_cancel = true;
        self
    }

    pub fn modifies(mut self) -> Self {
        self.can_modify = true;
        self
    }

    pub fn with_flag(mut self, flag: ReactionFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_policy(mut self, policy: AiPolicy) -> Self {
        self.ai_policy = policy;
        self
    }

    pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn costs(mut self, resource: ReactionResource) -> Self {
        self.resource = resource;
        self
    }

    pub fn with_effect(mut self, effect: ReactionEffect) -> Self {
        self.effects.push(effect);
        self
    }

    pub fn has_flag(&self, flag: ReactionFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn answers(&self, trigger: ReactionTrigger) -> bool {
        self.triggers.contains(&trigger)
    }

    /// Resource actually spent; a bare `CostsSpellSlot` flag means level 1
    pub fn required_resource(&self) -> ReactionResource {
        match (&self.resource, self.has_flag(ReactionFlag::CostsSpellSlot)) {
            (ReactionResource::None, true) => ReactionResource::SpellSlot { min_level: 1 },
            (resource, _) => resource.clone(),
        }
    }
}

/// Resource guess for records that predate the explicit field
///
/// Matches the reaction id and action id against known spell names.
pub fn infer_resource(id: &str, action_id: Option<&str>) -> ReactionResource {
    let names = [Some(id), action_id];
    let mentions = |needle: &str| {
        names
            .iter()
            .flatten()
            .any(|n| n.to_ascii_lowercase().contains(needle))
    };
    if mentions("counterspell") {
        ReactionResource::SpellSlot { min_level: 3 }
    } else if mentions("shield") || mentions("hellish_rebuke") {
        ReactionResource::SpellSlot { min_level: 1 }
    } else {
        ReactionResource::None
    }
}
