//! The trigger window a reaction is evaluated against

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::definition::ReactionTrigger;
use crate::core::types::{CombatantId, Vec2};
use crate::events::{EventValue, RuleEvent};

/// Key written by `DamageMultiplier` effects
pub const DAMAGE_MULTIPLIER: &str = "damageMultiplier";
/// Key written when a reaction cancelled the trigger
pub const CANCELLED_BY: &str = "cancelledBy";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReactionContext {
    pub trigger: ReactionTrigger,
    /// Whoever caused the trigger (the attacker, the caster, the mover)
    pub trigger_source: Option<CombatantId>,
    /// Whoever the triggering action is aimed at
    pub affected: Option<CombatantId>,
    /// Where the trigger happened; range checks are skipped without it
    pub position: Option<Vec2>,
    pub damage: f64,
    /// Whether the triggering attack would hit, when known
    pub would_hit: Option<bool>,
    pub action_id: Option<String>,
    pub is_cancellable: bool,
    pub cancelled: bool,
    /// Sum of roll adjustments made by reactions
    pub roll_modifier: f64,
    pub data: BTreeMap<String, EventValue>,
}

impl ReactionContext {
    pub fn new(trigger: ReactionTrigger) -> Self {
        Self {
            trigger,
            trigger_source: None,
            affected: None,
            position: None,
            damage: 0.0,
            would_hit: None,
            action_id: None,
            is_cancellable: false,
            cancelled: false,
            roll_modifier: 0.0,
            data: BTreeMap::new(),
        }
    }

    /// Context for a trigger raised by a bus event
    pub fn from_event(trigger: ReactionTrigger, event: &RuleEvent) -> Self {
        let mut ctx = Self::new(trigger);
        ctx.trigger_source = event.source_id.clone();
        ctx.affected = event.target_id.clone();
        ctx.damage = event.final_value;
        ctx.is_cancellable = event.is_cancellable;
        ctx.action_id = event.data_str(crate::events::keys::ACTION_ID).map(str::to_string);
        ctx
    }

    pub fn from_source(mut self, source: impl Into<CombatantId>) -> Self {
        self.trigger_source = Some(source.into());
        self
    }

    pub fn affecting(mut self, target: impl Into<CombatantId>) -> Self {
        self.affected = Some(target.into());
        self
    }

    pub fn at(mut self, x: f32, y: f32) -> Self {
        self.position = Some(Vec2::new(x, y));
        self
    }

    pub fn with_damage(mut self, damage: f64) -> Self {
        self.damage = damage;
        self
    }

    pub fn would_hit(mut self, hit: bool) -> Self {
        self.would_hit = Some(hit);
        self
    }

    pub fn with_action(mut self, action_id: impl Into<String>) -> Self {
        self.action_id = Some(action_id.into());
        self
    }

    pub fn cancellable(mut self) -> Self {
        self.is_cancellable = true;
        self
    }

    pub fn data_f64(&self, key: &str) -> Option<f64> {
        self.data.get(key).and_then(EventValue::as_f64)
    }

    /// Damage after any multiplier a reaction recorded
    pub fn effective_damage(&self) -> f64 {
        self.damage * self.data_f64(DAMAGE_MULTIPLIER).unwrap_or(1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RuleEventType;

    #[test]
    fn test_from_event_copies_identity() {
        let mut event = RuleEvent::new(RuleEventType::DamageTaken)
            .with_source("ogre")
            .with_target("rogue")
            .with_value(12.0)
            .cancellable();
        event.final_value = 12.0;
        let ctx = ReactionContext::from_event(ReactionTrigger::YouTakeDamage, &event);
        assert_eq!(ctx.trigger_source, Some("ogre".into()));
        assert_eq!(ctx.affected, Some("rogue".into()));
        assert_eq!(ctx.damage, 12.0);
        assert!(ctx.is_cancellable);
    }

    #[test]
    fn test_effective_damage() {
        let mut ctx = ReactionContext::new(ReactionTrigger::YouTakeDamage).with_damage(9.0);
        assert_eq!(ctx.effective_damage(), 9.0);
        ctx.data.insert(DAMAGE_MULTIPLIER.into(), EventValue::Float(0.5));
        assert_eq!(ctx.effective_damage(), 4.5);
    }
}
