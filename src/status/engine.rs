//! Status engine: per-combatant active instances and their lifecycle
//!
//! All borrows of the instance table are released before anything is
//! dispatched, so effects may re-enter `apply`/`remove` freely. In-flight
//! sets make cyclic apply/remove chains terminate.

use ahash::{AHashMap, AHashSet};
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};

use tracing::{debug, warn};

use super::definition::{
    DurationType, StackingBehavior, StatusDefinition, StatusEffectAction, StatusFlag, TriggerPhase,
};
use super::immunity::is_immune;
use super::instance::{ImportMode, StatusInstance, StatusSnapshot};
use crate::combat::{apply_damage, apply_healing, CombatantResolver};
use crate::core::config::RulesConfig;
use crate::core::types::{CombatClock, CombatantId};
use crate::events::{keys, EventBus, RuleEvent, RuleEventType};
use crate::rules::{RulesEngine, SaveRequest, StatusQuery};

/// Bus owner name for every subscription this engine makes
pub const OWNER: &str = "status_engine";

/// Status bookkeeping runs after cancellers (low priorities) had their say
pub const STATUS_PRIORITY: i32 = 50;

/// Snapshot instance id to the id the instance was restored under
pub type InstanceRemap = AHashMap<u64, u64>;

/// Optional arguments of `apply_with`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApplyOptions {
    pub duration: Option<i32>,
    pub stacks: Option<u32>,
    pub save_dc: Option<i32>,
}

impl ApplyOptions {
    pub fn duration(duration: i32) -> Self {
        Self {
            duration: Some(duration),
            ..Self::default()
        }
    }

    pub fn with_stacks(mut self, stacks: u32) -> Self {
        self.stacks = Some(stacks);
        self
    }

    pub fn with_save_dc(mut self, dc: i32) -> Self {
        self.save_dc = Some(dc);
        self
    }
}

pub struct StatusEngine {
    definitions: RefCell<AHashMap<String, Rc<StatusDefinition>>>,
    active: RefCell<AHashMap<CombatantId, Vec<StatusInstance>>>,
    next_instance: Cell<u64>,
    rules: Rc<RulesEngine>,
    bus: Rc<EventBus>,
    clock: Rc<CombatClock>,
    default_repeat_save_dc: i32,
    applying: RefCell<AHashSet<(CombatantId, String)>>,
    removing: RefCell<AHashSet<u64>>,
}

impl StatusEngine {
    /// Build the engine, register it as the rules engine's status source
    /// and subscribe it to the bus
    pub fn new(
        rules: Rc<RulesEngine>,
        bus: Rc<EventBus>,
        clock: Rc<CombatClock>,
        config: &RulesConfig,
    ) -> Rc<Self> {
        let engine = Rc::new(Self {
            definitions: RefCell::new(AHashMap::new()),
            active: RefCell::new(AHashMap::new()),
            next_instance: Cell::new(1),
            rules,
            bus,
            clock,
            default_repeat_save_dc: config.default_repeat_save_dc,
            applying: RefCell::new(AHashSet::new()),
            removing: RefCell::new(AHashSet::new()),
        });
        let query: Weak<dyn StatusQuery> = Rc::downgrade(&engine) as Weak<dyn StatusQuery>;
        engine.rules.set_status_query(query);
        Self::attach(&engine);
        engine
    }

    fn attach(engine: &Rc<Self>) {
        Self::route(engine, RuleEventType::AttackDeclared, Self::on_attack_declared);
        Self::route(engine, RuleEventType::CombatantMoved, Self::on_moved);
        Self::route(engine, RuleEventType::SpellCast, Self::on_spell_cast);
        Self::route(engine, RuleEventType::DamageTaken, Self::on_damage_taken);
        Self::route(engine, RuleEventType::HealingReceived, Self::on_healing_received);

        let weak = Rc::downgrade(engine);
        engine.bus.subscribe_all(STATUS_PRIORITY, OWNER, move |event| {
            if let Some(engine) = weak.upgrade() {
                engine.on_any_event(event);
            }
            Ok(())
        });
    }

    fn route(engine: &Rc<Self>, event_type: RuleEventType, handler: fn(&StatusEngine, &RuleEvent)) {
        let weak = Rc::downgrade(engine);
        engine
            .bus
            .subscribe(event_type, STATUS_PRIORITY, OWNER, move |event| {
                if let Some(engine) = weak.upgrade() {
                    handler(engine.as_ref(), event);
                }
                Ok(())
            });
    }

    /// Drop every bus subscription this engine made
    pub fn detach(&self) -> usize {
        self.bus.unsubscribe_owner(OWNER)
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    /// Register a definition; a later registration with the same id wins
    pub fn register(&self, definition: StatusDefinition) {
        let key = definition.id.to_ascii_lowercase();
        debug!(target: "rules::status", id = %definition.id, "Registered status");
        self.definitions.borrow_mut().insert(key, Rc::new(definition));
    }

    pub fn definition(&self, status_id: &str) -> Option<Rc<StatusDefinition>> {
        self.definitions
            .borrow()
            .get(&status_id.trim().to_ascii_lowercase())
            .cloned()
    }

    pub fn definition_ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .definitions
            .borrow()
            .values()
            .map(|d| d.id.clone())
            .collect();
        ids.sort();
        ids
    }

    fn combatants(&self) -> Option<&dyn CombatantResolver> {
        self.rules.combatant_resolver().map(|r| r.as_ref())
    }

    fn next_id(&self) -> u64 {
        let id = self.next_instance.get();
        self.next_instance.set(id + 1);
        id
    }

    // ------------------------------------------------------------------
    // Apply
    // ------------------------------------------------------------------

    pub fn apply(
        &self,
        status_id: &str,
        source: Option<&CombatantId>,
        target: &CombatantId,
        duration: Option<i32>,
    ) -> Option<StatusInstance> {
        self.apply_with(
            status_id,
            source,
            target,
            ApplyOptions {
                duration,
                ..ApplyOptions::default()
            },
        )
    }

    /// Apply a status. `None` when the id is unknown or the target is immune.
    pub fn apply_with(
        &self,
        status_id: &str,
        source: Option<&CombatantId>,
        target: &CombatantId,
        options: ApplyOptions,
    ) -> Option<StatusInstance> {
        let Some(def) = self.definition(status_id) else {
            warn!(target: "rules::status", status = status_id, target_id = %target, "Unknown status, ignoring apply");
            return None;
        };

        if let Some(combatant) = self.rules.combatant(target) {
            if is_immune(&combatant.condition_immunities, &def.id) {
                debug!(target: "rules::status", status = %def.id, target_id = %target, "Target is immune");
                return None;
            }
        }

        let guard = (target.clone(), def.id.clone());
        if self.applying.borrow().contains(&guard) {
            debug!(target: "rules::status", status = %def.id, target_id = %target, "Reentrant apply ignored");
            return self.find_existing(target, &def, source);
        }

        self.applying.borrow_mut().insert(guard.clone());
        let result = self.apply_definition(&def, source, target, &options);
        self.applying.borrow_mut().remove(&guard);
        result
    }

    fn apply_definition(
        &self,
        def: &Rc<StatusDefinition>,
        source: Option<&CombatantId>,
        target: &CombatantId,
        options: &ApplyOptions,
    ) -> Option<StatusInstance> {
        let duration = options.duration.unwrap_or(def.default_duration);
        let stacks = options.stacks.unwrap_or(1).max(1);

        if let Some(existing) = self.find_existing(target, def, source) {
            let id = existing.instance_id;
            match def.stacking {
                StackingBehavior::Replace => {
                    self.remove_internal(target, id, "replaced");
                }
                StackingBehavior::Refresh | StackingBehavior::Unique => {
                    return self.modify(target, id, |i| i.remaining_duration = duration);
                }
                StackingBehavior::Extend => {
                    return self.modify(target, id, |i| i.remaining_duration += duration);
                }
                StackingBehavior::Stack => {
                    let max = def.max_stacks.max(1);
                    let updated = self.modify(target, id, |i| {
                        i.stacks = (i.stacks + stacks).min(max);
                        i.remaining_duration = duration;
                    })?;
                    self.rules
                        .modifiers()
                        .remove_by_source(target, &updated.modifier_source());
                    self.register_modifiers(def, &updated);
                    debug!(
                        target: "rules::status",
                        status = %def.id,
                        target_id = %target,
                        stacks = updated.stacks,
                        "Status stacked"
                    );
                    self.dispatch_applied(def, &updated);
                    return Some(updated);
                }
            }
        }

        let instance = StatusInstance {
            instance_id: self.next_id(),
            definition_id: def.id.clone(),
            source_id: source.cloned(),
            target_id: target.clone(),
            remaining_duration: duration,
            stacks: stacks.min(def.max_stacks.max(1)),
            remaining_attack_count: def.attack_allowance(),
            save_dc_override: options.save_dc,
            applied_at: self.clock.now(),
        };
        self.insert_instance(def, instance.clone());

        debug!(
            target: "rules::status",
            status = %def.id,
            instance = instance.instance_id,
            target_id = %target,
            duration,
            "Status applied"
        );

        self.execute_effects(&instance, def.effects_for(TriggerPhase::OnApply));
        self.dispatch_applied(def, &instance);
        Some(instance)
    }

    fn insert_instance(&self, def: &StatusDefinition, instance: StatusInstance) {
        self.register_modifiers(def, &instance);
        self.active
            .borrow_mut()
            .entry(instance.target_id.clone())
            .or_default()
            .push(instance);
    }

    fn register_modifiers(&self, def: &StatusDefinition, instance: &StatusInstance) {
        let source = instance.modifier_source();
        for (index, spec) in def.modifiers.iter().enumerate() {
            let modifier = spec.instantiate(format!("{}:{}", source, index), source.clone(), instance.stacks);
            self.rules.modifiers().add(&instance.target_id, modifier);
        }
    }

    fn dispatch_applied(&self, def: &StatusDefinition, instance: &StatusInstance) {
        let mut event = RuleEvent::new(RuleEventType::StatusApplied)
            .with_source_opt(instance.source_id.clone())
            .with_target(instance.target_id.clone())
            .with_value(instance.stacks as f64)
            .with_tags(def.tags.iter().cloned())
            .with_data(keys::STATUS_ID, def.id.as_str())
            .with_data(keys::INSTANCE_ID, instance.instance_id);
        if def.has_flag(StatusFlag::Incapacitating) {
            event = event.with_tag("incapacitating");
        }
        self.bus.dispatch(&mut event);
    }

    fn find_existing(
        &self,
        target: &CombatantId,
        def: &StatusDefinition,
        source: Option<&CombatantId>,
    ) -> Option<StatusInstance> {
        self.active.borrow().get(target).and_then(|list| {
            list.iter()
                .find(|i| {
                    i.definition_id == def.id
                        && (def.stacking != StackingBehavior::Unique || i.source_id.as_ref() == source)
                })
                .cloned()
        })
    }

    fn modify<F>(&self, target: &CombatantId, instance_id: u64, f: F) -> Option<StatusInstance>
    where
        F: FnOnce(&mut StatusInstance),
    {
        let mut active = self.active.borrow_mut();
        let instance = active
            .get_mut(target)?
            .iter_mut()
            .find(|i| i.instance_id == instance_id)?;
        f(instance);
        Some(instance.clone())
    }

    // ------------------------------------------------------------------
    // Remove
    // ------------------------------------------------------------------

    /// Remove a status by id, or a whole family with `group:<tag>`
    ///
    /// Returns false when nothing was removed.
    pub fn remove(&self, target: &CombatantId, status_id: &str) -> bool {
        let wanted = status_id.trim().to_ascii_lowercase();
        let ids: Vec<u64> = match wanted.strip_prefix("group:") {
            Some(group) => self
                .active_statuses(target)
                .into_iter()
                .filter(|i| {
                    self.definition(&i.definition_id)
                        .is_some_and(|d| d.in_group_named(group))
                })
                .map(|i| i.instance_id)
                .collect(),
            None => self
                .active_statuses(target)
                .into_iter()
                .filter(|i| i.definition_id.eq_ignore_ascii_case(&wanted))
                .map(|i| i.instance_id)
                .collect(),
        };

        let mut removed = false;
        for id in ids {
            removed |= self.remove_internal(target, id, "removed");
        }
        removed
    }

    pub fn remove_instance(&self, instance: &StatusInstance) -> bool {
        self.remove_internal(&instance.target_id, instance.instance_id, "removed")
    }

    pub fn remove_instance_id(&self, target: &CombatantId, instance_id: u64) -> bool {
        self.remove_internal(target, instance_id, "removed")
    }

    fn remove_internal(&self, target: &CombatantId, instance_id: u64, reason: &str) -> bool {
        if !self.removing.borrow_mut().insert(instance_id) {
            return false;
        }

        let taken = {
            let mut active = self.active.borrow_mut();
            let taken = active.get_mut(target).and_then(|list| {
                let index = list.iter().position(|i| i.instance_id == instance_id)?;
                Some(list.remove(index))
            });
            if active.get(target).is_some_and(|list| list.is_empty()) {
                active.remove(target);
            }
            taken
        };

        let Some(instance) = taken else {
            self.removing.borrow_mut().remove(&instance_id);
            return false;
        };

        self.rules
            .modifiers()
            .remove_by_source(target, &instance.modifier_source());

        debug!(
            target: "rules::status",
            status = %instance.definition_id,
            instance = instance_id,
            target_id = %target,
            reason,
            "Status removed"
        );

        if let Some(def) = self.definition(&instance.definition_id) {
            self.execute_effects(&instance, def.effects_for(TriggerPhase::OnRemove));
        }

        self.bus.dispatch(
            &mut RuleEvent::new(RuleEventType::StatusRemoved)
                .with_source_opt(instance.source_id.clone())
                .with_target(target.clone())
                .with_data(keys::STATUS_ID, instance.definition_id.as_str())
                .with_data(keys::INSTANCE_ID, instance_id)
                .with_data(keys::REASON, reason),
        );

        self.removing.borrow_mut().remove(&instance_id);
        true
    }

    /// Remove everything a combatant holds (leaving combat)
    pub fn clear_combatant(&self, target: &CombatantId) -> usize {
        self.active_statuses(target)
            .into_iter()
            .filter(|i| self.remove_internal(target, i.instance_id, "cleared"))
            .count()
    }

    // ------------------------------------------------------------------
    // Effects
    // ------------------------------------------------------------------

    fn execute_effects(&self, instance: &StatusInstance, effects: &[StatusEffectAction]) {
        for effect in effects {
            self.execute_effect(instance, effect);
        }
    }

    fn execute_effect(&self, instance: &StatusInstance, effect: &StatusEffectAction) {
        let stacks = instance.stacks.max(1) as i32;
        match effect {
            StatusEffectAction::DealDamage { amount, damage_type } => {
                apply_damage(
                    self.combatants(),
                    &self.bus,
                    instance.source_id.as_ref(),
                    &instance.target_id,
                    amount * stacks,
                    damage_type.as_deref(),
                );
            }
            StatusEffectAction::Heal { amount } => {
                apply_healing(
                    self.combatants(),
                    &self.bus,
                    instance.source_id.as_ref(),
                    &instance.target_id,
                    amount * stacks,
                );
            }
            StatusEffectAction::ApplyStatus {
                status_id,
                duration,
                on_source,
            } => {
                let recipient = if *on_source {
                    instance.source_id.clone()
                } else {
                    Some(instance.target_id.clone())
                };
                match recipient {
                    Some(recipient) => {
                        self.apply(status_id, instance.source_id.as_ref(), &recipient, *duration);
                    }
                    None => warn!(
                        target: "rules::status",
                        status = %status_id,
                        "Sourceless status cannot apply to its source"
                    ),
                }
            }
            StatusEffectAction::RemoveStatus { status_id } => {
                self.remove(&instance.target_id, status_id);
            }
            StatusEffectAction::RemoveSelf => {
                self.remove_internal(&instance.target_id, instance.instance_id, "effect");
            }
            StatusEffectAction::Custom { event } => {
                self.bus.dispatch(
                    &mut RuleEvent::new(RuleEventType::Custom(event.clone()))
                        .with_source_opt(instance.source_id.clone())
                        .with_target(instance.target_id.clone())
                        .with_data(keys::STATUS_ID, instance.definition_id.as_str())
                        .with_data(keys::INSTANCE_ID, instance.instance_id),
                );
            }
        }
    }

    /// Run a trigger phase for every status a combatant holds
    fn fire_phase(&self, combatant: &CombatantId, phase: TriggerPhase) {
        for instance in self.active_statuses(combatant) {
            if !self.is_active_instance(combatant, instance.instance_id) {
                continue;
            }
            if let Some(def) = self.definition(&instance.definition_id) {
                self.execute_effects(&instance, def.effects_for(phase));
            }
        }
    }

    fn remove_flagged(&self, combatant: &CombatantId, flag: StatusFlag, reason: &str) {
        for instance in self.active_statuses(combatant) {
            if self
                .definition(&instance.definition_id)
                .is_some_and(|d| d.has_flag(flag))
            {
                self.remove_internal(combatant, instance.instance_id, reason);
            }
        }
    }

    // ------------------------------------------------------------------
    // Bus handlers
    // ------------------------------------------------------------------

    fn actor_of(event: &RuleEvent) -> Option<&CombatantId> {
        event.source_id.as_ref().or(event.target_id.as_ref())
    }

    fn on_attack_declared(&self, event: &RuleEvent) {
        let Some(attacker) = Self::actor_of(event).cloned() else {
            return;
        };
        self.fire_phase(&attacker, TriggerPhase::OnAttack);

        for instance in self.active_statuses(&attacker) {
            let Some(def) = self.definition(&instance.definition_id) else {
                continue;
            };
            if !def.remove_on_attack {
                continue;
            }
            let left = self.modify(&attacker, instance.instance_id, |i| {
                i.remaining_attack_count = i.remaining_attack_count.saturating_sub(1);
            });
            if left.is_some_and(|i| i.remaining_attack_count == 0) {
                self.remove_internal(&attacker, instance.instance_id, "attack");
            }
        }
    }

    fn on_moved(&self, event: &RuleEvent) {
        let Some(mover) = Self::actor_of(event).cloned() else {
            return;
        };
        self.fire_phase(&mover, TriggerPhase::OnMove);
        self.remove_flagged(&mover, StatusFlag::BreaksOnMove, "moved");
    }

    fn on_spell_cast(&self, event: &RuleEvent) {
        if let Some(caster) = Self::actor_of(event).cloned() {
            self.fire_phase(&caster, TriggerPhase::OnCast);
        }
    }

    fn on_damage_taken(&self, event: &RuleEvent) {
        let Some(target) = event.target_id.clone() else {
            return;
        };
        if event.final_value <= 0.0 || event.is_cancelled() {
            return;
        }
        self.fire_phase(&target, TriggerPhase::OnDamageTaken);
        self.remove_flagged(&target, StatusFlag::RemoveOnDamage, "damaged");
    }

    fn on_healing_received(&self, event: &RuleEvent) {
        if let Some(target) = event.target_id.clone() {
            self.fire_phase(&target, TriggerPhase::OnHealReceived);
        }
    }

    /// `UntilEvent` statuses end when their event involves the holder
    fn on_any_event(&self, event: &RuleEvent) {
        let own_instance = event
            .data
            .get(keys::INSTANCE_ID)
            .and_then(|v| v.as_i64());
        let holders = [event.source_id.clone(), event.target_id.clone()];
        for holder in holders.iter().flatten() {
            for instance in self.active_statuses(holder) {
                if own_instance == Some(instance.instance_id as i64) {
                    continue;
                }
                let ends_here = self.definition(&instance.definition_id).is_some_and(|d| {
                    d.duration_type == DurationType::UntilEvent
                        && d.remove_on_event.as_ref() == Some(&event.event_type)
                });
                if ends_here {
                    self.remove_internal(holder, instance.instance_id, "event");
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Turn flow
    // ------------------------------------------------------------------

    /// Fire `OnTurnStart` effects for a combatant
    pub fn process_turn_start(&self, combatant: &CombatantId) {
        self.fire_phase(combatant, TriggerPhase::OnTurnStart);
    }

    /// End-of-turn processing in two ordered phases
    ///
    /// 1. Repeat saves for every non-buff instance that carries one; a
    ///    success removes the instance before it can tick.
    /// 2. `OnTurnEnd` effects for what remains. `Turns` instances also
    ///    tick, then count down and expire at zero.
    pub fn process_turn_end(&self, combatant: &CombatantId) {
        for instance in self.active_statuses(combatant) {
            let Some(def) = self.definition(&instance.definition_id) else {
                continue;
            };
            let Some(save) = def.repeat_save else {
                continue;
            };
            if def.is_buff() || !self.is_active_instance(combatant, instance.instance_id) {
                continue;
            }
            let dc = instance
                .save_dc_override
                .or(save.dc)
                .unwrap_or(self.default_repeat_save_dc);
            let result = self.rules.roll_saving_throw(
                &SaveRequest::new(combatant.clone(), save.ability, dc)
                    .from_source(instance.source_id.clone())
                    .with_tag("repeat_save")
                    .with_tag(def.id.clone()),
            );
            if result.is_success {
                debug!(target: "rules::status", status = %def.id, target_id = %combatant, dc, "Escaped with repeat save");
                self.remove_internal(combatant, instance.instance_id, "save");
            }
        }

        let mut expired = Vec::new();
        for instance in self.active_statuses(combatant) {
            let Some(def) = self.definition(&instance.definition_id) else {
                continue;
            };
            if !self.is_active_instance(combatant, instance.instance_id) {
                continue;
            }

            let per_turn = def.duration_type == DurationType::Turns;
            if per_turn && !def.tick_effects.is_empty() {
                self.execute_effects(&instance, &def.tick_effects);
                self.bus.dispatch(
                    &mut RuleEvent::new(RuleEventType::StatusTicked)
                        .with_source_opt(instance.source_id.clone())
                        .with_target(combatant.clone())
                        .with_value(instance.stacks as f64)
                        .with_data(keys::STATUS_ID, def.id.as_str())
                        .with_data(keys::INSTANCE_ID, instance.instance_id),
                );
            }
            self.execute_effects(&instance, def.effects_for(TriggerPhase::OnTurnEnd));

            if per_turn {
                let left = self.modify(combatant, instance.instance_id, |i| {
                    i.remaining_duration -= 1;
                });
                if left.is_some_and(|i| i.remaining_duration <= 0) {
                    expired.push(instance.instance_id);
                }
            }
        }

        for id in expired {
            self.remove_internal(combatant, id, "expired");
        }
    }

    /// Count down `Rounds` durations for everyone
    pub fn process_round_end(&self) {
        let mut holders: Vec<CombatantId> = self.active.borrow().keys().cloned().collect();
        holders.sort();

        for holder in holders {
            let mut expired = Vec::new();
            for instance in self.active_statuses(&holder) {
                let rounds = self
                    .definition(&instance.definition_id)
                    .is_some_and(|d| d.duration_type == DurationType::Rounds);
                if !rounds {
                    continue;
                }
                let left = self.modify(&holder, instance.instance_id, |i| {
                    i.remaining_duration -= 1;
                });
                if left.is_some_and(|i| i.remaining_duration <= 0) {
                    expired.push(instance.instance_id);
                }
            }
            for id in expired {
                self.remove_internal(&holder, id, "expired");
            }
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    /// Active instances of a combatant, oldest first
    pub fn active_statuses(&self, combatant: &CombatantId) -> Vec<StatusInstance> {
        self.active
            .borrow()
            .get(combatant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_status(&self, combatant: &CombatantId, status_id: &str) -> bool {
        self.active.borrow().get(combatant).is_some_and(|list| {
            list.iter()
                .any(|i| i.definition_id.eq_ignore_ascii_case(status_id.trim()))
        })
    }

    pub fn instance(&self, combatant: &CombatantId, instance_id: u64) -> Option<StatusInstance> {
        self.active
            .borrow()
            .get(combatant)
            .and_then(|list| list.iter().find(|i| i.instance_id == instance_id).cloned())
    }

    fn is_active_instance(&self, combatant: &CombatantId, instance_id: u64) -> bool {
        self.instance(combatant, instance_id).is_some()
    }

    pub fn is_action_blocked(&self, combatant: &CombatantId, action_id: &str) -> bool {
        self.blocked_actions(combatant)
            .iter()
            .any(|a| a.eq_ignore_ascii_case(action_id))
    }

    pub fn blocked_actions(&self, combatant: &CombatantId) -> Vec<String> {
        self.collect_actions(combatant, |d| &d.blocked_actions)
    }

    /// Actions currently granted by active statuses; removal revokes them
    pub fn granted_actions(&self, combatant: &CombatantId) -> Vec<String> {
        self.collect_actions(combatant, |d| &d.granted_actions)
    }

    fn collect_actions<F>(&self, combatant: &CombatantId, pick: F) -> Vec<String>
    where
        F: Fn(&StatusDefinition) -> &Vec<String>,
    {
        let mut actions: Vec<String> = Vec::new();
        for instance in self.active_statuses(combatant) {
            if let Some(def) = self.definition(&instance.definition_id) {
                for action in pick(&def) {
                    if !actions.contains(action) {
                        actions.push(action.clone());
                    }
                }
            }
        }
        actions
    }

    /// Instances created by `source`, optionally of one status id
    pub fn instances_from_source(&self, source: &CombatantId, status_id: Option<&str>) -> Vec<StatusInstance> {
        let mut found: Vec<StatusInstance> = self
            .active
            .borrow()
            .values()
            .flatten()
            .filter(|i| i.source_id.as_ref() == Some(source))
            .filter(|i| status_id.map_or(true, |s| i.definition_id.eq_ignore_ascii_case(s)))
            .cloned()
            .collect();
        found.sort_by_key(|i| i.instance_id);
        found
    }

    pub fn instance_count(&self) -> usize {
        self.active.borrow().values().map(Vec::len).sum()
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    /// Every active instance, ordered by instance id
    pub fn export_state(&self) -> Vec<StatusSnapshot> {
        let mut all: Vec<StatusInstance> = self.active.borrow().values().flatten().cloned().collect();
        all.sort_by_key(|i| i.instance_id);
        all.iter().map(StatusInstance::snapshot).collect()
    }

    /// Rebuild instances from snapshots; returns how many were restored
    pub fn import_state(&self, snapshots: &[StatusSnapshot], mode: ImportMode) -> usize {
        self.import_state_remapped(snapshots, mode).0
    }

    /// `import_state` that also reports where each snapshot id landed
    ///
    /// Replay always mints fresh instance ids and a silent import does so on
    /// collisions, so anything holding exported ids must go through the map.
    pub fn import_state_remapped(
        &self,
        snapshots: &[StatusSnapshot],
        mode: ImportMode,
    ) -> (usize, InstanceRemap) {
        let mut restored = 0;
        let mut remap = InstanceRemap::new();
        for snapshot in snapshots {
            let Some(def) = self.definition(&snapshot.status_definition_id) else {
                warn!(
                    target: "rules::status",
                    status = %snapshot.status_definition_id,
                    "Unknown status in snapshot, skipping"
                );
                continue;
            };
            let landed = match mode {
                ImportMode::Silent => Some(self.import_silent(&def, snapshot)),
                ImportMode::Replay => self
                    .apply_with(
                        &def.id,
                        snapshot.source_id.as_ref(),
                        &snapshot.target_id,
                        ApplyOptions {
                            duration: Some(snapshot.remaining_duration),
                            stacks: Some(snapshot.stack_count),
                            save_dc: snapshot.save_dc_override,
                        },
                    )
                    .map(|i| i.instance_id),
            };
            if let Some(instance_id) = landed {
                remap.insert(snapshot.id, instance_id);
                restored += 1;
            }
        }
        debug!(target: "rules::status", restored, ?mode, "Imported statuses");
        (restored, remap)
    }

    fn import_silent(&self, def: &StatusDefinition, snapshot: &StatusSnapshot) -> u64 {
        let source = snapshot.source_id.as_ref();
        if let Some(existing) = self.find_existing(&snapshot.target_id, def, source) {
            // Imported state wins over whatever is live
            self.rules
                .modifiers()
                .remove_by_source(&snapshot.target_id, &existing.modifier_source());
            if let Some(list) = self.active.borrow_mut().get_mut(&snapshot.target_id) {
                list.retain(|i| i.instance_id != existing.instance_id);
            }
        }

        let taken = self.instance_id_taken(snapshot.id);
        let instance_id = if snapshot.id == 0 || taken {
            self.next_id()
        } else {
            snapshot.id
        };
        if instance_id >= self.next_instance.get() {
            self.next_instance.set(instance_id + 1);
        }

        let instance = StatusInstance {
            instance_id,
            definition_id: def.id.clone(),
            source_id: snapshot.source_id.clone(),
            target_id: snapshot.target_id.clone(),
            remaining_duration: snapshot.remaining_duration,
            stacks: snapshot.stack_count.clamp(1, def.max_stacks.max(1)),
            remaining_attack_count: snapshot
                .remaining_attack_count
                .unwrap_or_else(|| def.attack_allowance()),
            save_dc_override: snapshot.save_dc_override,
            applied_at: snapshot.applied_at,
        };
        self.insert_instance(def, instance);
        instance_id
    }

    fn instance_id_taken(&self, instance_id: u64) -> bool {
        self.active
            .borrow()
            .values()
            .flatten()
            .any(|i| i.instance_id == instance_id)
    }
}

impl StatusQuery for StatusEngine {
    fn active_status_ids(&self, combatant: &CombatantId) -> Vec<String> {
        self.active
            .borrow()
            .get(combatant)
            .map(|list| list.iter().map(|i| i.definition_id.clone()).collect())
            .unwrap_or_default()
    }
}
