//! Reaction engine: grants, eligibility, prompts and use

use ahash::AHashMap;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, VecDeque};
use std::rc::Rc;

use serde::{Deserialize, Serialize};
use tracing::{debug, error, trace, warn};

use super::alias::{AliasTable, ReactionId};
use super::context::{ReactionContext, CANCELLED_BY, DAMAGE_MULTIPLIER};
use super::definition::{AiPolicy, ReactionDefinition, ReactionEffect, ReactionFlag, ReactionResource};
use super::prompt::{OfferOutcome, ReactionDecider, ReactionPrompt};
use crate::combat::{apply_damage, Combatant};
use crate::core::config::RulesConfig;
use crate::core::error::{Result, RulesError};
use crate::core::rng::SessionRng;
use crate::core::types::{CombatClock, CombatantId};
use crate::events::{keys, EventBus, EventValue, RuleEvent, RuleEventType};
use crate::resolution::ResolutionStack;
use crate::rules::RulesEngine;
use crate::status::StatusEngine;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QueuedKind {
    Attack,
    Spell,
}

/// Follow-up action a reaction asked for; the turn controller runs it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueuedAction {
    pub reactor: CombatantId,
    pub action_id: String,
    pub kind: QueuedKind,
    pub target: Option<CombatantId>,
    pub reaction: String,
}

pub struct ReactionEngine {
    definitions: RefCell<AHashMap<ReactionId, Rc<ReactionDefinition>>>,
    aliases: RefCell<AliasTable>,
    grants: RefCell<AHashMap<CombatantId, Vec<ReactionId>>>,
    /// Budgets of combatants the resolver does not know
    budgets: RefCell<AHashMap<CombatantId, u32>>,
    prompts: RefCell<BTreeMap<u64, ReactionPrompt>>,
    next_prompt: Cell<u64>,
    queued: RefCell<VecDeque<QueuedAction>>,
    rules: Rc<RulesEngine>,
    bus: Rc<EventBus>,
    clock: Rc<CombatClock>,
    statuses: Option<Rc<StatusEngine>>,
    stack: Option<Rc<ResolutionStack>>,
    rng: Option<Rc<SessionRng>>,
    strict_grants: bool,
    budget_per_round: u32,
    prompt_time_limit_secs: f32,
}

impl ReactionEngine {
    pub fn new(
        rules: Rc<RulesEngine>,
        bus: Rc<EventBus>,
        clock: Rc<CombatClock>,
        config: &RulesConfig,
    ) -> Self {
        Self {
            definitions: RefCell::new(AHashMap::new()),
            aliases: RefCell::new(AliasTable::standard()),
            grants: RefCell::new(AHashMap::new()),
            budgets: RefCell::new(AHashMap::new()),
            prompts: RefCell::new(BTreeMap::new()),
            next_prompt: Cell::new(1),
            queued: RefCell::new(VecDeque::new()),
            rules,
            bus,
            clock,
            statuses: None,
            stack: None,
            rng: None,
            strict_grants: config.strict_reaction_grants,
            budget_per_round: config.reaction_budget_per_round,
            prompt_time_limit_secs: config.prompt_time_limit_secs,
        }
    }

    /// Status engine used by `ApplyBoost` effects
    pub fn with_statuses(mut self, statuses: Rc<StatusEngine>) -> Self {
        self.statuses = Some(statuses);
        self
    }

    /// Stack that `CancelTrigger`/`ModifyRoll` effects act on
    pub fn with_stack(mut self, stack: Rc<ResolutionStack>) -> Self {
        self.stack = Some(stack);
        self
    }

    /// RNG for the `Random` AI policy
    pub fn with_rng(mut self, rng: Rc<SessionRng>) -> Self {
        self.rng = Some(rng);
        self
    }

    pub fn strict(mut self, strict: bool) -> Self {
        self.strict_grants = strict;
        self
    }

    // ------------------------------------------------------------------
    // Registry
    // ------------------------------------------------------------------

    pub fn add_alias(&self, legacy: &str, canonical: &str) {
        self.aliases.borrow_mut().add(legacy, canonical);
    }

    pub fn canonical(&self, raw: &str) -> ReactionId {
        self.aliases.borrow().resolve(raw)
    }

    /// Register under the canonical id; a second registration of the same
    /// canonical id is rejected
    pub fn register(&self, mut definition: ReactionDefinition) -> Result<ReactionId> {
        let id = self.canonical(&definition.id);
        if self.definitions.borrow().contains_key(&id) {
            error!(
                target: "rules::reactions",
                id = %id,
                given = %definition.id,
                "Duplicate reaction registration"
            );
            return Err(RulesError::DuplicateReaction(id.to_string()));
        }
        definition.id = id.as_str().to_string();
        debug!(target: "rules::reactions", id = %id, priority = definition.priority, "Registered reaction");
        self.definitions
            .borrow_mut()
            .insert(id.clone(), Rc::new(definition));
        Ok(id)
    }

    pub fn definition(&self, raw: &str) -> Option<Rc<ReactionDefinition>> {
        let id = self.canonical(raw);
        self.definitions.borrow().get(&id).cloned()
    }

    pub fn reaction_ids(&self) -> Vec<ReactionId> {
        let mut ids: Vec<ReactionId> = self.definitions.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    // ------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------

    /// Give a combatant a reaction. `Ok(false)` when it was already held or
    /// the id is unknown outside strict mode.
    pub fn grant(&self, combatant: &CombatantId, raw: &str) -> Result<bool> {
        let id = self.canonical(raw);
        if !self.definitions.borrow().contains_key(&id) {
            if self.strict_grants {
                return Err(RulesError::UnknownReaction(id.to_string()));
            }
            warn!(target: "rules::reactions", id = %id, combatant = %combatant, "Unknown reaction, grant ignored");
            return Ok(false);
        }

        let mut grants = self.grants.borrow_mut();
        let held = grants.entry(combatant.clone()).or_default();
        if held.contains(&id) {
            return Ok(false);
        }
        debug!(target: "rules::reactions", id = %id, combatant = %combatant, "Granted");
        held.push(id);
        Ok(true)
    }

    pub fn revoke(&self, combatant: &CombatantId, raw: &str) -> bool {
        let id = self.canonical(raw);
        let mut grants = self.grants.borrow_mut();
        let Some(held) = grants.get_mut(combatant) else {
            return false;
        };
        let before = held.len();
        held.retain(|g| *g != id);
        held.len() != before
    }

    /// Held reactions in grant order
    pub fn grants_of(&self, combatant: &CombatantId) -> Vec<ReactionId> {
        self.grants
            .borrow()
            .get(combatant)
            .cloned()
            .unwrap_or_default()
    }

    pub fn holds(&self, combatant: &CombatantId, raw: &str) -> bool {
        let id = self.canonical(raw);
        self.grants
            .borrow()
            .get(combatant)
            .is_some_and(|held| held.contains(&id))
    }

    /// Combatants holding any grant, sorted
    pub fn granted_combatants(&self) -> Vec<CombatantId> {
        let mut ids: Vec<CombatantId> = self
            .grants
            .borrow()
            .iter()
            .filter(|(_, held)| !held.is_empty())
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Forget a combatant leaving combat; open prompts for it are dropped
    pub fn clear_combatant(&self, combatant: &CombatantId) {
        self.grants.borrow_mut().remove(combatant);
        self.budgets.borrow_mut().remove(combatant);
        self.prompts
            .borrow_mut()
            .retain(|_, p| p.is_resolved || p.reactor_id != *combatant);
    }

    /// Drop every unresolved prompt and queued action; returns how many
    pub fn clear_pending(&self) -> usize {
        let mut prompts = self.prompts.borrow_mut();
        let open = prompts.len();
        prompts.retain(|_, p| p.is_resolved);
        let dropped = open - prompts.len();
        let queued = self.queued.borrow_mut().drain(..).count();
        dropped + queued
    }

    // ------------------------------------------------------------------
    // Budget and resources
    // ------------------------------------------------------------------

    /// Reactions left this round
    pub fn budget(&self, combatant: &CombatantId) -> u32 {
        match self.rules.combatant(combatant) {
            Some(c) => c.reactions_available,
            None => self
                .budgets
                .borrow()
                .get(combatant)
                .copied()
                .unwrap_or(self.budget_per_round),
        }
    }

    fn spend_budget(&self, combatant: &CombatantId) -> bool {
        if let Some(resolver) = self.rules.combatant_resolver() {
            let mut spent = false;
            let known = resolver.update(combatant, &mut |c| {
                if c.reactions_available > 0 {
                    c.reactions_available -= 1;
                    spent = true;
                }
            });
            if known {
                return spent;
            }
        }
        let mut budgets = self.budgets.borrow_mut();
        let left = budgets
            .entry(combatant.clone())
            .or_insert(self.budget_per_round);
        if *left == 0 {
            return false;
        }
        *left -= 1;
        true
    }

    /// Restore a combatant's budget (start of its turn)
    pub fn reset_budget(&self, combatant: &CombatantId) {
        let per_round = self.budget_per_round;
        let known = self
            .rules
            .combatant_resolver()
            .is_some_and(|r| r.update(combatant, &mut |c| c.reactions_available = per_round));
        if !known {
            self.budgets.borrow_mut().insert(combatant.clone(), per_round);
        }
    }

    pub fn reset_all_budgets(&self) {
        let mut ids = self.granted_combatants();
        ids.extend(self.budgets.borrow().keys().cloned());
        ids.sort();
        ids.dedup();
        for id in ids {
            self.reset_budget(&id);
        }
    }

    fn has_resource(combatant: Option<&Combatant>, resource: &ReactionResource) -> bool {
        match resource {
            ReactionResource::None => true,
            ReactionResource::SpellSlot { min_level } => {
                combatant.is_some_and(|c| c.available_slot(*min_level).is_some())
            }
            ReactionResource::ClassResource { name, amount } => {
                combatant.is_some_and(|c| c.resource(name) >= *amount)
            }
        }
    }

    fn consume_resource(&self, combatant: &CombatantId, resource: &ReactionResource) -> bool {
        let Some(resolver) = self.rules.combatant_resolver() else {
            return matches!(resource, ReactionResource::None);
        };
        let mut paid = false;
        match resource {
            ReactionResource::None => return true,
            ReactionResource::SpellSlot { min_level } => {
                resolver.update(combatant, &mut |c| {
                    if let Some(level) = c.consume_spell_slot(*min_level) {
                        debug!(target: "rules::reactions", combatant = %combatant, level, "Spell slot spent");
                        paid = true;
                    }
                });
            }
            ReactionResource::ClassResource { name, amount } => {
                resolver.update(combatant, &mut |c| {
                    paid = c.consume_resource(name, *amount);
                });
            }
        }
        paid
    }

    // ------------------------------------------------------------------
    // Eligibility
    // ------------------------------------------------------------------

    /// Why a reactor may not take a reaction right now, if it may not
    fn denial(
        &self,
        reactor: &CombatantId,
        def: &ReactionDefinition,
        ctx: &ReactionContext,
    ) -> Option<&'static str> {
        let combatant = self.rules.combatant(reactor);
        if combatant.as_ref().is_some_and(|c| !c.can_act()) {
            return Some("inactive");
        }
        if self.budget(reactor) == 0 {
            return Some("no reaction left");
        }
        if !def.answers(ctx.trigger) {
            return Some("trigger mismatch");
        }
        if def.has_flag(ReactionFlag::NotSelf) && ctx.trigger_source.as_ref() == Some(reactor) {
            return Some("own action");
        }
        if def.range > 0.0 {
            if let (Some(c), Some(position)) = (&combatant, ctx.position) {
                if c.position.distance(&position) > def.range {
                    return Some("out of range");
                }
            }
        }
        if def.has_flag(ReactionFlag::RequiresHit) && ctx.would_hit != Some(true) {
            return Some("attack would miss");
        }
        if !Self::has_resource(combatant.as_ref(), &def.required_resource()) {
            return Some("missing resource");
        }
        if self.rules.conditions_of(reactor, false).incapacitated {
            return Some("incapacitated");
        }
        None
    }

    /// Every (reactor, reaction) that may answer `ctx`, lowest priority
    /// first; ties keep candidate order, then grant order
    pub fn eligible_reactors(
        &self,
        ctx: &ReactionContext,
        candidates: &[CombatantId],
    ) -> Vec<(CombatantId, Rc<ReactionDefinition>)> {
        let mut eligible = Vec::new();
        for reactor in candidates {
            for id in self.grants_of(reactor) {
                let Some(def) = self.definitions.borrow().get(&id).cloned() else {
                    continue;
                };
                match self.denial(reactor, &def, ctx) {
                    None => eligible.push((reactor.clone(), def)),
                    Some(reason) => trace!(
                        target: "rules::reactions",
                        reactor = %reactor,
                        reaction = %id,
                        reason,
                        "Not eligible"
                    ),
                }
            }
        }
        eligible.sort_by_key(|(_, def)| def.priority);
        eligible
    }

    /// `eligible_reactors` over trigger windows that opened together
    ///
    /// Each entry carries the index of its window. The result is one
    /// priority order across all windows; ties keep window order.
    pub fn eligible_across(
        &self,
        windows: &[(ReactionContext, Vec<CombatantId>)],
    ) -> Vec<(usize, CombatantId, Rc<ReactionDefinition>)> {
        let mut merged: Vec<(usize, CombatantId, Rc<ReactionDefinition>)> = windows
            .iter()
            .enumerate()
            .flat_map(|(window, (ctx, candidates))| {
                self.eligible_reactors(ctx, candidates)
                    .into_iter()
                    .map(move |(reactor, def)| (window, reactor, def))
            })
            .collect();
        merged.sort_by_key(|(_, _, def)| def.priority);
        merged
    }

    // ------------------------------------------------------------------
    // Use
    // ------------------------------------------------------------------

    /// Commit a reaction: re-checks budget and resource, pays for it,
    /// announces it and runs its effects against `ctx`
    pub fn use_reaction(&self, reactor: &CombatantId, raw: &str, ctx: &mut ReactionContext) -> bool {
        let Some(def) = self.definition(raw) else {
            warn!(target: "rules::reactions", id = raw, "Unknown reaction, use ignored");
            return false;
        };
        if !self.holds(reactor, &def.id) {
            debug!(target: "rules::reactions", reactor = %reactor, reaction = %def.id, "Reaction not granted");
            return false;
        }

        let combatant = self.rules.combatant(reactor);
        if combatant.as_ref().is_some_and(|c| !c.can_act())
            || self.rules.conditions_of(reactor, false).incapacitated
        {
            debug!(target: "rules::reactions", reactor = %reactor, "Reactor cannot act");
            return false;
        }
        if self.budget(reactor) == 0 {
            debug!(target: "rules::reactions", reactor = %reactor, "No reaction left");
            return false;
        }
        let resource = def.required_resource();
        if !Self::has_resource(combatant.as_ref(), &resource) {
            debug!(target: "rules::reactions", reactor = %reactor, reaction = %def.id, "Missing resource");
            return false;
        }

        if !self.spend_budget(reactor) || !self.consume_resource(reactor, &resource) {
            warn!(target: "rules::reactions", reactor = %reactor, reaction = %def.id, "Payment failed");
            return false;
        }

        debug!(
            target: "rules::reactions",
            reactor = %reactor,
            reaction = %def.id,
            trigger = ?ctx.trigger,
            "Reaction used"
        );

        let mut event = RuleEvent::new(RuleEventType::ReactionUsed)
            .with_source(reactor.clone())
            .with_value(ctx.damage)
            .with_tags(def.tags.iter().cloned())
            .with_data(keys::REACTION_ID, def.id.as_str())
            .with_data(keys::CAN_CANCEL, def.can_cancel);
        event.target_id = ctx.trigger_source.clone();
        if let Some(action) = &def.action_id {
            event = event.with_data(keys::ACTION_ID, action.as_str());
        }
        self.bus.dispatch(&mut event);

        for effect in &def.effects {
            self.execute_effect(reactor, &def, effect, ctx);
        }
        true
    }

    fn execute_effect(
        &self,
        reactor: &CombatantId,
        def: &ReactionDefinition,
        effect: &ReactionEffect,
        ctx: &mut ReactionContext,
    ) {
        match effect {
            ReactionEffect::ApplyBoost { status_id, duration } => match &self.statuses {
                Some(statuses) => {
                    statuses.apply(status_id, Some(reactor), reactor, *duration);
                }
                None => warn!(target: "rules::reactions", status = %status_id, "No status engine for boost"),
            },
            ReactionEffect::CancelTrigger => {
                if !def.can_cancel || !ctx.is_cancellable {
                    debug!(target: "rules::reactions", reaction = %def.id, "Trigger not cancellable");
                    return;
                }
                ctx.cancelled = true;
                ctx.data
                    .insert(CANCELLED_BY.to_string(), EventValue::from(def.id.as_str()));
                if let Some(stack) = &self.stack {
                    stack.cancel_current();
                }
            }
            ReactionEffect::DamageMultiplier { multiplier } => {
                let current = ctx.data_f64(DAMAGE_MULTIPLIER).unwrap_or(1.0);
                ctx.data.insert(
                    DAMAGE_MULTIPLIER.to_string(),
                    EventValue::Float(current * multiplier),
                );
            }
            ReactionEffect::QueueAttack { action_id } => {
                self.queue(reactor, def, action_id, QueuedKind::Attack, ctx);
            }
            ReactionEffect::CastSpell { action_id } => {
                self.queue(reactor, def, action_id, QueuedKind::Spell, ctx);
            }
            ReactionEffect::ModifyRoll { delta } => {
                ctx.roll_modifier += delta;
                if let Some(stack) = &self.stack {
                    stack.modify_current(format!("reaction:{}", def.id), *delta);
                }
            }
            ReactionEffect::DealDamage { amount, damage_type } => {
                let Some(target) = ctx.trigger_source.clone() else {
                    warn!(target: "rules::reactions", reaction = %def.id, "No trigger source to damage");
                    return;
                };
                apply_damage(
                    self.rules.combatant_resolver().map(|r| r.as_ref()),
                    &self.bus,
                    Some(reactor),
                    &target,
                    *amount,
                    damage_type.as_deref(),
                );
            }
        }
    }

    fn queue(
        &self,
        reactor: &CombatantId,
        def: &ReactionDefinition,
        action_id: &str,
        kind: QueuedKind,
        ctx: &ReactionContext,
    ) {
        self.queued.borrow_mut().push_back(QueuedAction {
            reactor: reactor.clone(),
            action_id: action_id.to_string(),
            kind,
            target: ctx.trigger_source.clone(),
            reaction: def.id.clone(),
        });
    }

    /// Take every queued follow-up action, oldest first
    pub fn drain_queued_actions(&self) -> Vec<QueuedAction> {
        self.queued.borrow_mut().drain(..).collect()
    }

    pub fn queued_len(&self) -> usize {
        self.queued.borrow().len()
    }

    // ------------------------------------------------------------------
    // Decisions
    // ------------------------------------------------------------------

    /// AI policy hook
    pub fn should_ai_use(
        &self,
        _reactor: &CombatantId,
        def: &ReactionDefinition,
        ctx: &ReactionContext,
    ) -> bool {
        match &def.ai_policy {
            AiPolicy::Always => true,
            AiPolicy::Never => false,
            AiPolicy::DamageThreshold { min_damage } => ctx.damage >= *min_damage,
            AiPolicy::PriorityTargets { targets } => [&ctx.trigger_source, &ctx.affected]
                .into_iter()
                .flatten()
                .any(|id| targets.contains(id)),
            AiPolicy::Random { chance } => self.rng.as_ref().is_some_and(|rng| rng.chance(*chance)),
        }
    }

    /// Decider answering through `should_ai_use`
    pub fn policy_decider(&self) -> PolicyDecider<'_> {
        PolicyDecider { engine: self }
    }

    /// Open a prompt for a human decision
    pub fn create_prompt(
        &self,
        reactor: &CombatantId,
        raw: &str,
        ctx: &ReactionContext,
        time_limit_secs: Option<f32>,
    ) -> Option<ReactionPrompt> {
        let Some(def) = self.definition(raw) else {
            warn!(target: "rules::reactions", id = raw, "Unknown reaction, no prompt");
            return None;
        };
        let prompt_id = self.next_prompt.get();
        self.next_prompt.set(prompt_id + 1);

        let prompt = ReactionPrompt {
            prompt_id,
            reactor_id: reactor.clone(),
            reaction: self.canonical(&def.id),
            context: ctx.clone(),
            time_limit_secs: time_limit_secs.unwrap_or(self.prompt_time_limit_secs),
            created_at: self.clock.now(),
            is_resolved: false,
            was_used: false,
        };
        self.prompts.borrow_mut().insert(prompt_id, prompt.clone());
        debug!(target: "rules::reactions", prompt = prompt_id, reactor = %reactor, reaction = %def.id, "Prompt opened");

        let mut event = RuleEvent::new(RuleEventType::ReactionPrompted)
            .with_source(reactor.clone())
            .with_data(keys::PROMPT_ID, prompt_id)
            .with_data(keys::REACTION_ID, def.id.as_str());
        event.target_id = ctx.trigger_source.clone();
        self.bus.dispatch(&mut event);

        Some(prompt)
    }

    /// Answer a prompt. `None` when it is unknown or already resolved.
    pub fn resolve_prompt(&self, prompt_id: u64, accept: bool) -> Option<ReactionPrompt> {
        let (reactor, reaction, mut context) = {
            let mut prompts = self.prompts.borrow_mut();
            let prompt = prompts.get_mut(&prompt_id)?;
            if prompt.is_resolved {
                return None;
            }
            prompt.is_resolved = true;
            (
                prompt.reactor_id.clone(),
                prompt.reaction.clone(),
                prompt.context.clone(),
            )
        };

        let used = accept && self.use_reaction(&reactor, reaction.as_str(), &mut context);
        debug!(target: "rules::reactions", prompt = prompt_id, accept, used, "Prompt resolved");

        let mut prompts = self.prompts.borrow_mut();
        let prompt = prompts.get_mut(&prompt_id)?;
        prompt.was_used = used;
        prompt.context = context;
        Some(prompt.clone())
    }

    pub fn prompt(&self, prompt_id: u64) -> Option<ReactionPrompt> {
        self.prompts.borrow().get(&prompt_id).cloned()
    }

    pub fn pending_prompts(&self) -> Vec<ReactionPrompt> {
        self.prompts
            .borrow()
            .values()
            .filter(|p| !p.is_resolved)
            .cloned()
            .collect()
    }

    /// Walk eligible reactors in priority order and let `decider` answer
    ///
    /// Stops once a reaction cancels the trigger. Reactors that already
    /// spent their budget earlier in the walk are skipped.
    pub fn offer(
        &self,
        ctx: &mut ReactionContext,
        candidates: &[CombatantId],
        decider: &dyn ReactionDecider,
    ) -> OfferOutcome {
        let mut outcome = OfferOutcome::default();
        for (reactor, def) in self.eligible_reactors(ctx, candidates) {
            if ctx.cancelled {
                break;
            }
            self.answer(reactor, &def, ctx, decider, &mut outcome);
        }
        outcome
    }

    /// `offer` across simultaneous windows in one global priority order
    ///
    /// A cancelled window takes no further answers. Budget spent answering
    /// one window is gone for the others.
    pub fn offer_across(
        &self,
        windows: &mut [(ReactionContext, Vec<CombatantId>)],
        decider: &dyn ReactionDecider,
    ) -> OfferOutcome {
        let mut outcome = OfferOutcome::default();
        for (window, reactor, def) in self.eligible_across(windows) {
            let ctx = &mut windows[window].0;
            if ctx.cancelled {
                continue;
            }
            self.answer(reactor, &def, ctx, decider, &mut outcome);
        }
        outcome
    }

    fn answer(
        &self,
        reactor: CombatantId,
        def: &ReactionDefinition,
        ctx: &mut ReactionContext,
        decider: &dyn ReactionDecider,
        outcome: &mut OfferOutcome,
    ) {
        if self.denial(&reactor, def, ctx).is_some() {
            return;
        }
        let id = self.canonical(&def.id);
        match decider.decide(&reactor, def, ctx) {
            Some(true) => {
                if self.use_reaction(&reactor, &def.id, ctx) {
                    outcome.used.push((reactor, id));
                }
            }
            Some(false) => outcome.declined.push((reactor, id)),
            None => {
                if let Some(prompt) = self.create_prompt(&reactor, &def.id, ctx, None) {
                    outcome.prompted.push(prompt.prompt_id);
                }
            }
        }
    }
}

pub struct PolicyDecider<'a> {
    engine: &'a ReactionEngine,
}

impl ReactionDecider for PolicyDecider<'_> {
    fn decide(
        &self,
        reactor: &CombatantId,
        reaction: &ReactionDefinition,
        context: &ReactionContext,
    ) -> Option<bool> {
        Some(self.engine.should_ai_use(reactor, reaction, context))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{CombatantResolver, Roster};
    use crate::events::EventLog;
    use crate::reactions::{FixedAnswer, ReactionTrigger};
    use crate::rules::{ModifierRegistry, ScriptedResolver};

    struct Fixture {
        engine: ReactionEngine,
        roster: Rc<Roster>,
        log: Rc<EventLog>,
    }

    fn fixture() -> Fixture {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(EventLog::new(64));
        EventLog::attach(&log, &bus);
        let roster = Rc::new(Roster::new());
        let rules = Rc::new(
            RulesEngine::new(Rc::new(ScriptedResolver::always(10)), Rc::new(ModifierRegistry::new()))
                .with_combatants(roster.clone()),
        );
        let engine = ReactionEngine::new(rules, bus, Rc::new(CombatClock::new()), &RulesConfig::default());
        Fixture { engine, roster, log }
    }

    fn attacked() -> ReactionContext {
        ReactionContext::new(ReactionTrigger::YouAreAttacked)
            .from_source("orc")
            .affecting("wizard")
            .would_hit(true)
    }

    #[test]
    fn test_duplicate_canonical_registration_fails() {
        let f = fixture();
        f.engine
            .register(ReactionDefinition::new("opportunity_attack"))
            .unwrap();
        let err = f
            .engine
            .register(ReactionDefinition::new("Attack_Of_Opportunity"))
            .unwrap_err();
        assert!(matches!(err, RulesError::DuplicateReaction(id) if id == "opportunity_attack"));
    }

    #[test]
    fn test_grant_unknown_is_soft_unless_strict() {
        let f = fixture();
        let wizard = CombatantId::from("wizard");
        assert!(!f.engine.grant(&wizard, "nope").unwrap());
        let strict = f.engine.strict(true);
        assert!(matches!(strict.grant(&wizard, "nope"), Err(RulesError::UnknownReaction(_))));
    }

    #[test]
    fn test_grant_through_alias() {
        let f = fixture();
        f.engine.register(ReactionDefinition::new("shield")).unwrap();
        let wizard = CombatantId::from("wizard");
        assert!(f.engine.grant(&wizard, "Shield_Spell").unwrap());
        assert!(!f.engine.grant(&wizard, "shield").unwrap());
        assert_eq!(f.engine.grants_of(&wizard), vec![f.engine.canonical("shield")]);
        assert!(f.engine.revoke(&wizard, "reaction_shield"));
        assert!(f.engine.grants_of(&wizard).is_empty());
    }

    #[test]
    fn test_requires_hit_and_resource() {
        let f = fixture();
        f.roster.insert(Combatant::new("wizard", 20));
        f.engine
            .register(
                ReactionDefinition::new("shield")
                    .on(ReactionTrigger::YouAreAttacked)
                    .with_flag(ReactionFlag::RequiresHit)
                    .costs(ReactionResource::SpellSlot { min_level: 1 }),
            )
            .unwrap();
        let wizard = CombatantId::from("wizard");
        f.engine.grant(&wizard, "shield").unwrap();

        assert!(f.engine.eligible_reactors(&attacked(), &[wizard.clone()]).is_empty());

        f.roster.insert(Combatant::new("wizard", 20).with_spell_slots(1, 1));
        assert_eq!(f.engine.eligible_reactors(&attacked(), &[wizard.clone()]).len(), 1);

        let miss = attacked().would_hit(false);
        assert!(f.engine.eligible_reactors(&miss, &[wizard]).is_empty());
    }

    #[test]
    fn test_use_spends_budget_and_slot() {
        let f = fixture();
        f.roster
            .insert(Combatant::new("wizard", 20).with_spell_slots(1, 2));
        f.engine
            .register(
                ReactionDefinition::new("shield")
                    .on(ReactionTrigger::YouAreAttacked)
                    .costs(ReactionResource::SpellSlot { min_level: 1 }),
            )
            .unwrap();
        let wizard = CombatantId::from("wizard");
        f.engine.grant(&wizard, "shield").unwrap();

        let mut ctx = attacked();
        assert!(f.engine.use_reaction(&wizard, "shield", &mut ctx));
        assert!(!f.engine.use_reaction(&wizard, "shield", &mut ctx));
        let wizard_now = f.roster.combatant(&wizard).unwrap();
        assert_eq!(wizard_now.spell_slots[0], 1);
        assert_eq!(wizard_now.reactions_available, 0);

        let used = f.log.of_type(&RuleEventType::ReactionUsed);
        assert_eq!(used.len(), 1);
        assert_eq!(used[0].data_bool(keys::CAN_CANCEL), Some(false));
        assert_eq!(used[0].target_id, Some("orc".into()));

        f.engine.reset_budget(&wizard);
        assert_eq!(f.engine.budget(&wizard), 1);
    }

    #[test]
    fn test_windows_merge_into_one_priority_order() {
        let f = fixture();
        f.engine
            .register(
                ReactionDefinition::new("parry")
                    .on(ReactionTrigger::YouAreAttacked)
                    .with_priority(20),
            )
            .unwrap();
        f.engine
            .register(
                ReactionDefinition::new("deflect_spell")
                    .on(ReactionTrigger::SpellCastNearby)
                    .with_priority(5)
                    .cancels()
                    .with_effect(ReactionEffect::CancelTrigger),
            )
            .unwrap();
        let wizard = CombatantId::from("wizard");
        f.engine.grant(&wizard, "parry").unwrap();
        f.engine.grant(&wizard, "deflect_spell").unwrap();

        let spell = ReactionContext::new(ReactionTrigger::SpellCastNearby)
            .from_source("orc")
            .cancellable();
        let mut windows = vec![(attacked(), vec![wizard.clone()]), (spell, vec![wizard.clone()])];
        let order: Vec<(usize, i32)> = f
            .engine
            .eligible_across(&windows)
            .iter()
            .map(|(window, _, def)| (*window, def.priority))
            .collect();
        assert_eq!(order, vec![(1, 5), (0, 20)]);

        let outcome = f.engine.offer_across(&mut windows, &FixedAnswer(Some(true)));
        assert_eq!(outcome.used, vec![(wizard.clone(), f.engine.canonical("deflect_spell"))]);
        assert!(windows[1].0.cancelled);
        assert_eq!(f.engine.budget(&wizard), 0);
    }

    #[test]
    fn test_unknown_combatant_uses_fallback_budget() {
        let f = fixture();
        f.engine
            .register(ReactionDefinition::new("parry").on(ReactionTrigger::YouAreAttacked))
            .unwrap();
        let ghost = CombatantId::from("ghost");
        f.engine.grant(&ghost, "parry").unwrap();
        assert!(f.engine.use_reaction(&ghost, "parry", &mut attacked()));
        assert_eq!(f.engine.budget(&ghost), 0);
        f.engine.reset_all_budgets();
        assert_eq!(f.engine.budget(&ghost), 1);
    }

    #[test]
    fn test_not_self_flag() {
        let f = fixture();
        f.engine
            .register(
                ReactionDefinition::new("counterspell")
                    .on(ReactionTrigger::SpellCastNearby)
                    .with_flag(ReactionFlag::NotSelf),
            )
            .unwrap();
        let wizard = CombatantId::from("wizard");
        f.engine.grant(&wizard, "counterspell").unwrap();
        let own = ReactionContext::new(ReactionTrigger::SpellCastNearby).from_source("wizard");
        assert!(f.engine.eligible_reactors(&own, &[wizard.clone()]).is_empty());
        let other = ReactionContext::new(ReactionTrigger::SpellCastNearby).from_source("lich");
        assert_eq!(f.engine.eligible_reactors(&other, &[wizard]).len(), 1);
    }

    #[test]
    fn test_range_check() {
        let f = fixture();
        f.roster.insert(Combatant::new("guard", 20).at(0.0, 0.0));
        f.engine
            .register(
                ReactionDefinition::new("opportunity_attack")
                    .on(ReactionTrigger::EnemyLeavesReach)
                    .with_range(1.5),
            )
            .unwrap();
        let guard = CombatantId::from("guard");
        f.engine.grant(&guard, "opportunity_attack").unwrap();
        let near = ReactionContext::new(ReactionTrigger::EnemyLeavesReach).at(1.0, 1.0);
        let far = ReactionContext::new(ReactionTrigger::EnemyLeavesReach).at(5.0, 0.0);
        assert_eq!(f.engine.eligible_reactors(&near, &[guard.clone()]).len(), 1);
        assert!(f.engine.eligible_reactors(&far, &[guard]).is_empty());
    }

    #[test]
    fn test_damage_multiplier_written_to_context() {
        let f = fixture();
        f.engine
            .register(
                ReactionDefinition::new("uncanny_dodge")
                    .on(ReactionTrigger::YouAreHit)
                    .with_effect(ReactionEffect::DamageMultiplier { multiplier: 0.5 }),
            )
            .unwrap();
        let rogue = CombatantId::from("rogue");
        f.engine.grant(&rogue, "uncanny_dodge").unwrap();
        let mut ctx = ReactionContext::new(ReactionTrigger::YouAreHit).with_damage(14.0);
        assert!(f.engine.use_reaction(&rogue, "uncanny_dodge", &mut ctx));
        assert_eq!(ctx.data_f64(DAMAGE_MULTIPLIER), Some(0.5));
        assert_eq!(ctx.effective_damage(), 7.0);
    }

    #[test]
    fn test_cancel_requires_cancellable_trigger() {
        let f = fixture();
        f.engine
            .register(
                ReactionDefinition::new("counterspell")
                    .on(ReactionTrigger::SpellCastNearby)
                    .cancels()
                    .with_effect(ReactionEffect::CancelTrigger),
            )
            .unwrap();
        let mage = CombatantId::from("mage");
        f.engine.grant(&mage, "counterspell").unwrap();

        let mut fixed = ReactionContext::new(ReactionTrigger::SpellCastNearby);
        assert!(f.engine.use_reaction(&mage, "counterspell", &mut fixed));
        assert!(!fixed.cancelled);

        f.engine.reset_budget(&mage);
        let mut open = ReactionContext::new(ReactionTrigger::SpellCastNearby).cancellable();
        assert!(f.engine.use_reaction(&mage, "counterspell", &mut open));
        assert!(open.cancelled);
    }

    #[test]
    fn test_queue_attack_is_drained() {
        let f = fixture();
        f.engine
            .register(
                ReactionDefinition::new("opportunity_attack")
                    .on(ReactionTrigger::EnemyLeavesReach)
                    .with_effect(ReactionEffect::QueueAttack {
                        action_id: "melee_attack".into(),
                    }),
            )
            .unwrap();
        let guard = CombatantId::from("guard");
        f.engine.grant(&guard, "opportunity_attack").unwrap();
        let mut ctx = ReactionContext::new(ReactionTrigger::EnemyLeavesReach).from_source("rogue");
        f.engine.use_reaction(&guard, "opportunity_attack", &mut ctx);
        let queued = f.engine.drain_queued_actions();
        assert_eq!(queued.len(), 1);
        assert_eq!(queued[0].target, Some("rogue".into()));
        assert_eq!(queued[0].kind, QueuedKind::Attack);
        assert_eq!(f.engine.queued_len(), 0);
    }

    #[test]
    fn test_prompt_lifecycle() {
        let f = fixture();
        f.engine
            .register(ReactionDefinition::new("parry").on(ReactionTrigger::YouAreAttacked))
            .unwrap();
        let knight = CombatantId::from("knight");
        f.engine.grant(&knight, "parry").unwrap();

        let mut ctx = attacked();
        let outcome = f.engine.offer(&mut ctx, &[knight.clone()], &FixedAnswer(None));
        assert!(outcome.is_pending());
        assert_eq!(f.engine.pending_prompts().len(), 1);
        assert_eq!(f.log.count(&RuleEventType::ReactionPrompted), 1);

        let id = outcome.prompted[0];
        let resolved = f.engine.resolve_prompt(id, true).unwrap();
        assert!(resolved.is_resolved && resolved.was_used);
        assert!(f.engine.resolve_prompt(id, true).is_none());
        assert!(f.engine.pending_prompts().is_empty());
    }

    #[test]
    fn test_ai_policies() {
        let f = fixture();
        let reactor = CombatantId::from("x");
        let ctx = attacked().with_damage(8.0);
        let threshold = ReactionDefinition::new("a").with_policy(AiPolicy::DamageThreshold { min_damage: 10.0 });
        assert!(!f.engine.should_ai_use(&reactor, &threshold, &ctx));
        let targets = ReactionDefinition::new("b").with_policy(AiPolicy::PriorityTargets {
            targets: vec!["orc".into()],
        });
        assert!(f.engine.should_ai_use(&reactor, &targets, &ctx));
        let never = ReactionDefinition::new("c").with_policy(AiPolicy::Never);
        assert!(!f.engine.should_ai_use(&reactor, &never, &ctx));
        let random = ReactionDefinition::new("d").with_policy(AiPolicy::Random { chance: 1.0 });
        assert!(!f.engine.should_ai_use(&reactor, &random, &ctx));
    }
}
