//! RuleEvent: the record every subsystem publishes on the bus

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::core::types::CombatantId;

/// Event type tag used for subscription routing
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RuleEventType {
    DamageTaken,
    HealingReceived,
    StatusApplied,
    StatusRemoved,
    StatusTicked,
    TurnStarted,
    TurnEnded,
    RoundEnded,
    ReactionUsed,
    ReactionPrompted,
    CombatantDied,
    CombatantMoved,
    AttackDeclared,
    SpellCast,
    SavingThrowRolled,
    ConcentrationStarted,
    ConcentrationBroken,
    Custom(String),
}

impl RuleEventType {
    /// Parse the names used in data files ("TurnEnded", "custom:foo")
    pub fn parse(raw: &str) -> RuleEventType {
        let trimmed = raw.trim();
        match trimmed.to_ascii_lowercase().as_str() {
            "damagetaken" | "damage_taken" => RuleEventType::DamageTaken,
            "healingreceived" | "healing_received" => RuleEventType::HealingReceived,
            "statusapplied" | "status_applied" => RuleEventType::StatusApplied,
            "statusremoved" | "status_removed" => RuleEventType::StatusRemoved,
            "statusticked" | "status_ticked" => RuleEventType::StatusTicked,
            "turnstarted" | "turn_started" => RuleEventType::TurnStarted,
            "turnended" | "turn_ended" => RuleEventType::TurnEnded,
            "roundended" | "round_ended" => RuleEventType::RoundEnded,
            "reactionused" | "reaction_used" => RuleEventType::ReactionUsed,
            "reactionprompted" | "reaction_prompted" => RuleEventType::ReactionPrompted,
            "combatantdied" | "combatant_died" => RuleEventType::CombatantDied,
            "combatantmoved" | "combatant_moved" => RuleEventType::CombatantMoved,
            "attackdeclared" | "attack_declared" => RuleEventType::AttackDeclared,
            "spellcast" | "spell_cast" => RuleEventType::SpellCast,
            "savingthrowrolled" | "saving_throw_rolled" => RuleEventType::SavingThrowRolled,
            "concentrationstarted" | "concentration_started" => {
                RuleEventType::ConcentrationStarted
            }
            "concentrationbroken" | "concentration_broken" => RuleEventType::ConcentrationBroken,
            _ => {
                let name = trimmed
                    .strip_prefix("custom:")
                    .or_else(|| trimmed.strip_prefix("Custom:"))
                    .unwrap_or(trimmed);
                RuleEventType::Custom(name.to_string())
            }
        }
    }
}

impl fmt::Display for RuleEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleEventType::Custom(name) => write!(f, "Custom({})", name),
            other => write!(f, "{:?}", other),
        }
    }
}

/// Open payload value carried in `RuleEvent::data`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum EventValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl EventValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            EventValue::Int(v) => Some(*v as f64),
            EventValue::Float(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            EventValue::Int(v) => Some(*v),
            EventValue::Float(v) => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            EventValue::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            EventValue::Text(v) => Some(v.as_str()),
            _ => None,
        }
    }
}

impl From<bool> for EventValue {
    fn from(v: bool) -> Self {
        EventValue::Bool(v)
    }
}

impl From<i64> for EventValue {
    fn from(v: i64) -> Self {
        EventValue::Int(v)
    }
}

impl From<i32> for EventValue {
    fn from(v: i32) -> Self {
        EventValue::Int(v as i64)
    }
}

impl From<u64> for EventValue {
    fn from(v: u64) -> Self {
        EventValue::Int(v as i64)
    }
}

impl From<f64> for EventValue {
    fn from(v: f64) -> Self {
        EventValue::Float(v)
    }
}

impl From<&str> for EventValue {
    fn from(v: &str) -> Self {
        EventValue::Text(v.to_string())
    }
}

impl From<String> for EventValue {
    fn from(v: String) -> Self {
        EventValue::Text(v)
    }
}

/// Well-known payload keys
pub mod keys {
    pub const STATUS_ID: &str = "status_id";
    pub const INSTANCE_ID: &str = "instance_id";
    pub const HP_BEFORE: &str = "hp_before";
    pub const HP_AFTER: &str = "hp_after";
    pub const DAMAGE_TYPE: &str = "damage_type";
    pub const REACTION_ID: &str = "reaction_id";
    pub const CAN_CANCEL: &str = "canCancel";
    pub const ACTION_ID: &str = "action_id";
    pub const REASON: &str = "reason";
    pub const SUCCESS: &str = "success";
    pub const DC: &str = "dc";
    pub const PROMPT_ID: &str = "prompt_id";
}

/// A rules event. Identity fields are fixed at construction; handlers may
/// only adjust the numeric result and the cancellation flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvent {
    pub event_id: u64,
    pub event_type: RuleEventType,
    pub source_id: Option<CombatantId>,
    pub target_id: Option<CombatantId>,
    pub value: f64,
    pub final_value: f64,
    pub modifier_total: f64,
    pub tags: BTreeSet<String>,
    pub data: BTreeMap<String, EventValue>,
    pub is_cancellable: bool,
    is_cancelled: bool,
}

impl RuleEvent {
    pub fn new(event_type: RuleEventType) -> Self {
        Self {
            event_id: 0,
            event_type,
            source_id: None,
            target_id: None,
            value: 0.0,
            final_value: 0.0,
            modifier_total: 0.0,
            tags: BTreeSet::new(),
            data: BTreeMap::new(),
            is_cancellable: false,
            is_cancelled: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<CombatantId>) -> Self {
        self.source_id = Some(source.into());
        self
    }

    pub fn with_source_opt(mut self, source: Option<CombatantId>) -> Self {
        self.source_id = source;
        self
    }

    pub fn with_target(mut self, target: impl Into<CombatantId>) -> Self {
        self.target_id = Some(target.into());
        self
    }

    /// Sets both `value` and `final_value`
    pub fn with_value(mut self, value: f64) -> Self {
        self.value = value;
        self.final_value = value;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.is_cancellable = true;
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.is_cancelled
    }

    /// Cancel the event. Returns false when the event is not cancellable.
    pub fn cancel(&mut self) -> bool {
        if !self.is_cancellable {
            return false;
        }
        self.is_cancelled = true;
        true
    }

    /// Add to the running modifier total; `final_value` follows it
    pub fn add_modifier(&mut self, delta: f64) {
        self.modifier_total += delta;
        self.final_value += delta;
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(EventValue::as_f64)
    }

    pub fn data_str(&self, key: &str) -> Option<&str> {
        self.data.get(key).and_then(EventValue::as_str)
    }

    pub fn data_bool(&self, key: &str) -> Option<bool> {
        self.data.get(key).and_then(EventValue::as_bool)
    }

    /// True when the event names this combatant as source or target
    pub fn involves(&self, combatant: &CombatantId) -> bool {
        self.source_id.as_ref() == Some(combatant) || self.target_id.as_ref() == Some(combatant)
    }
}
