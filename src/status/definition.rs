//! Status definitions: immutable templates registered once

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::core::types::Ability;
use crate::events::RuleEventType;
use crate::rules::ModifierSpec;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DurationType {
    Permanent,
    /// Counts down at the end of the holder's turns
    Turns,
    /// Counts down at the end of each round
    Rounds,
    /// Lasts until `remove_on_event` involves the holder
    UntilEvent,
}

/// What happens when a status is applied to a target that already has it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StackingBehavior {
    /// Remove the old instance, create a new one
    Replace,
    /// Reset remaining duration, keep the instance
    Refresh,
    /// Add to remaining duration
    Extend,
    /// Increment stacks up to the max, refresh duration
    Stack,
    /// One instance per source
    Unique,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TriggerPhase {
    OnApply,
    OnMove,
    OnCast,
    OnAttack,
    OnDamageTaken,
    OnHealReceived,
    OnTurnStart,
    OnTurnEnd,
    OnRemove,
}

impl TriggerPhase {
    pub fn parse(raw: &str) -> Option<TriggerPhase> {
        let lowered = raw.trim().to_ascii_lowercase().replace('_', "");
        let phase = match lowered.as_str() {
            "onapply" => TriggerPhase::OnApply,
            "onmove" => TriggerPhase::OnMove,
            "oncast" => TriggerPhase::OnCast,
            "onattack" => TriggerPhase::OnAttack,
            "ondamagetaken" => TriggerPhase::OnDamageTaken,
            "onhealreceived" => TriggerPhase::OnHealReceived,
            "onturnstart" => TriggerPhase::OnTurnStart,
            "onturnend" => TriggerPhase::OnTurnEnd,
            "onremove" => TriggerPhase::OnRemove,
            _ => return None,
        };
        Some(phase)
    }
}

/// Effect run by a tick or a trigger phase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StatusEffectAction {
    /// Damage the holder; scales with stacks
    DealDamage {
        amount: i32,
        damage_type: Option<String>,
    },
    /// Heal the holder; scales with stacks
    Heal { amount: i32 },
    /// Apply another status to the holder, or to the status source
    ApplyStatus {
        status_id: String,
        duration: Option<i32>,
        on_source: bool,
    },
    RemoveStatus { status_id: String },
    RemoveSelf,
    /// Dispatch a `Custom` event naming the holder
    Custom { event: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatSave {
    pub ability: Ability,
    /// None falls back to the configured default DC
    pub dc: Option<i32>,
}

/// Mechanical flags read by the engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum StatusFlag {
    /// Beneficial; never escaped by repeat saves
    Buff,
    /// Breaks concentration when applied
    Incapacitating,
    /// Removed when the holder takes damage
    RemoveOnDamage,
    /// Removed when the holder moves
    BreaksOnMove,
}

impl StatusFlag {
    pub fn parse(raw: &str) -> Option<StatusFlag> {
        match raw.trim().to_ascii_lowercase().replace('_', "").as_str() {
            "buff" => Some(StatusFlag::Buff),
            "incapacitating" => Some(StatusFlag::Incapacitating),
            "removeondamage" => Some(StatusFlag::RemoveOnDamage),
            "breaksonmove" => Some(StatusFlag::BreaksOnMove),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusDefinition {
    pub id: String,
    pub name: String,
    pub description: String,
    pub duration_type: DurationType,
    pub default_duration: i32,
    pub max_stacks: u32,
    pub stacking: StackingBehavior,
    pub modifiers: Vec<ModifierSpec>,
    pub tick_effects: Vec<StatusEffectAction>,
    pub trigger_effects: BTreeMap<TriggerPhase, Vec<StatusEffectAction>>,
    pub blocked_actions: Vec<String>,
    pub granted_actions: Vec<String>,
    pub repeat_save: Option<RepeatSave>,
    pub remove_on_attack: bool,
    /// Attacks before removal when `remove_on_attack` is set (0 counts as 1)
    pub remove_on_attack_count: u32,
    pub flags: BTreeSet<StatusFlag>,
    /// Group tags addressed by `group:<tag>` removal
    pub groups: BTreeSet<String>,
    pub remove_on_event: Option<RuleEventType>,
    /// Descriptive only
    pub tags: BTreeSet<String>,
}

impl StatusDefinition {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            description: String::new(),
            duration_type: DurationType::Turns,
            default_duration: 1,
            max_stacks: 1,
            stacking: StackingBehavior::Refresh,
            modifiers: Vec::new(),
            tick_effects: Vec::new(),
            trigger_effects: BTreeMap::new(),
            blocked_actions: Vec::new(),
            granted_actions: Vec::new(),
            repeat_save: None,
            remove_on_attack: false,
            remove_on_attack_count: 0,
            flags: BTreeSet::new(),
            groups: BTreeSet::new(),
            remove_on_event: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn described(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn lasting(mut self, duration_type: DurationType, duration: i32) -> Self {
        self.duration_type = duration_type;
        self.default_duration = duration;
        self
    }

    pub fn permanent(self) -> Self {
        self.lasting(DurationType::Permanent, 0)
    }

    pub fn until(mut self, event: RuleEventType) -> Self {
        self.duration_type = DurationType::UntilEvent;
        self.default_duration = 0;
        self.remove_on_event = Some(event);
        self
    }

    pub fn stacking(mut self, stacking: StackingBehavior, max_stacks: u32) -> Self {
        self.stacking = stacking;
        self.max_stacks = max_stacks.max(1);
        self
    }

    pub fn with_modifier(mut self, modifier: ModifierSpec) -> Self {
        self.modifiers.push(modifier);
        self
    }

    pub fn with_tick(mut self, effect: StatusEffectAction) -> Self {
        self.tick_effects.push(effect);
        self
    }

    pub fn on(mut self, phase: TriggerPhase, effect: StatusEffectAction) -> Self {
        self.trigger_effects.entry(phase).or_default().push(effect);
        self
    }

    pub fn blocks(mut self, action_id: impl Into<String>) -> Self {
        self.blocked_actions.push(action_id.into());
        self
    }

    pub fn grants(mut self, action_id: impl Into<String>) -> Self {
        self.granted_actions.push(action_id.into());
        self
    }

    pub fn with_repeat_save(mut self, ability: Ability, dc: Option<i32>) -> Self {
        self.repeat_save = Some(RepeatSave { ability, dc });
        self
    }

    pub fn removed_after_attacks(mut self, count: u32) -> Self {
        self.remove_on_attack = true;
        self.remove_on_attack_count = count;
        self
    }

    pub fn with_flag(mut self, flag: StatusFlag) -> Self {
        self.flags.insert(flag);
        self
    }

    pub fn in_group(mut self, group: impl Into<String>) -> Self {
        self.groups.insert(group.into().to_ascii_lowercase());
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn has_flag(&self, flag: StatusFlag) -> bool {
        self.flags.contains(&flag)
    }

    pub fn is_buff(&self) -> bool {
        self.has_flag(StatusFlag::Buff)
    }

    pub fn in_group_named(&self, group: &str) -> bool {
        self.groups.contains(&group.to_ascii_lowercase())
    }

    pub fn effects_for(&self, phase: TriggerPhase) -> &[StatusEffectAction] {
        self.trigger_effects
            .get(&phase)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Attacks the holder may make before `remove_on_attack` fires
    pub fn attack_allowance(&self) -> u32 {
        if self.remove_on_attack {
            self.remove_on_attack_count.max(1)
        } else {
            0
        }
    }
}
