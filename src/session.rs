//! One encounter: every engine wired to a shared bus, roster, clock and RNG
//!
//! The session owns turn flow and the reaction windows around attacks,
//! spells and movement. Engines stay usable on their own; the session is
//! the glue a host game would otherwise write.

use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::rc::Rc;
use tracing::{debug, info};

use crate::combat::{apply_damage, apply_healing, Combatant, CombatantResolver, Feat, HpChange, Roster};
use crate::concentration::{BreakReason, ConcentrationEngine, ConcentrationInfo, LinkedEffect};
use crate::core::config::RulesConfig;
use crate::core::error::{Result, RulesError};
use crate::core::rng::SessionRng;
use crate::core::types::{Ability, CombatClock, CombatantId, Tick, Vec2};
use crate::data::DataPack;
use crate::events::{keys, EventBus, EventLog, RuleEvent, RuleEventType};
use crate::reactions::{
    OfferOutcome, QueuedAction, ReactionContext, ReactionDecider, ReactionEngine, ReactionId,
    ReactionTrigger,
};
use crate::resolution::ResolutionStack;
use crate::rules::{
    AttackOutcome, AttackRequest, DamageRequest, DiceResolver, MageSlayerProvider,
    ModifierRegistry, Resolver, RulesEngine, SaveRequest, WarCasterProvider,
};
use crate::status::{ApplyOptions, ImportMode, StatusEngine, StatusInstance, StatusSnapshot};

/// Distance at which a melee combatant threatens its neighbours
pub const MELEE_REACH: f32 = 1.5;

/// A spell as the caster declares it
#[derive(Debug, Clone, PartialEq)]
pub struct SpellCast {
    pub caster: CombatantId,
    pub spell_id: String,
    /// 0 for cantrips
    pub slot_level: u8,
    pub target: Option<CombatantId>,
    /// Status applied to the target when the spell lands
    pub status_id: Option<String>,
    pub duration: Option<i32>,
    pub concentration: bool,
    /// Target save that negates the status
    pub save: Option<(Ability, i32)>,
}

impl SpellCast {
    pub fn new(caster: impl Into<CombatantId>, spell_id: impl Into<String>) -> Self {
        Self {
            caster: caster.into(),
            spell_id: spell_id.into(),
            slot_level: 0,
            target: None,
            status_id: None,
            duration: None,
            concentration: false,
            save: None,
        }
    }

    pub fn at_level(mut self, level: u8) -> Self {
        self.slot_level = level;
        self
    }

    pub fn targeting(mut self, target: impl Into<CombatantId>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn applying(mut self, status_id: impl Into<String>, duration: Option<i32>) -> Self {
        self.status_id = Some(status_id.into());
        self.duration = duration;
        self
    }

    pub fn concentrating(mut self) -> Self {
        self.concentration = true;
        self
    }

    pub fn with_save(mut self, ability: Ability, dc: i32) -> Self {
        self.save = Some((ability, dc));
        self
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpellReport {
    /// False when no slot of the required level was left
    pub cast: bool,
    pub countered_by: Option<CombatantId>,
    pub saved: bool,
    pub status: Option<StatusInstance>,
    pub concentration: Option<ConcentrationInfo>,
    pub reactions: Vec<(CombatantId, ReactionId)>,
}

impl SpellReport {
    pub fn countered(&self) -> bool {
        self.countered_by.is_some()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttackReport {
    /// None when the attack was cancelled before the roll
    pub outcome: Option<AttackOutcome>,
    pub cancelled: bool,
    pub damage: Option<HpChange>,
    pub reactions: Vec<(CombatantId, ReactionId)>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MoveReport {
    pub moved: bool,
    /// Where the mover ended up
    pub position: Vec2,
    /// Stopped early by a Sentinel's opportunity attack
    pub stopped: bool,
    pub reactions: Vec<(CombatantId, ReactionId)>,
}

/// Exported encounter state
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    pub round: u32,
    pub tick: Tick,
    #[serde(default)]
    pub combatants: Vec<Combatant>,
    pub statuses: Vec<StatusSnapshot>,
    pub concentration: Vec<ConcentrationInfo>,
}

impl SessionSnapshot {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

pub struct CombatSession {
    config: RulesConfig,
    bus: Rc<EventBus>,
    roster: Rc<Roster>,
    clock: Rc<CombatClock>,
    rng: Rc<SessionRng>,
    rules: Rc<RulesEngine>,
    statuses: Rc<StatusEngine>,
    reactions: Rc<ReactionEngine>,
    stack: Rc<ResolutionStack>,
    concentration: Rc<ConcentrationEngine>,
    log: Rc<EventLog>,
    decider: RefCell<Option<Rc<dyn ReactionDecider>>>,
}

impl CombatSession {
    /// Session rolling real dice from the configured (or a random) seed
    pub fn new(config: RulesConfig) -> Result<Self> {
        let seed = config.rng_seed.unwrap_or_else(rand::random);
        let rng = Rc::new(SessionRng::from_seed(seed));
        let resolver: Rc<dyn Resolver> = Rc::new(DiceResolver::new(Rc::clone(&rng)));
        Self::build(config, rng, resolver)
    }

    /// Session rolling through a caller-supplied resolver
    pub fn with_resolver(config: RulesConfig, resolver: Rc<dyn Resolver>) -> Result<Self> {
        let rng = Rc::new(SessionRng::from_seed(config.rng_seed.unwrap_or(0)));
        Self::build(config, rng, resolver)
    }

    fn build(config: RulesConfig, rng: Rc<SessionRng>, resolver: Rc<dyn Resolver>) -> Result<Self> {
        config.validate().map_err(RulesError::InvalidConfig)?;

        let bus = Rc::new(EventBus::with_max_depth(config.max_event_depth));
        let roster = Rc::new(Roster::new());
        let clock = Rc::new(CombatClock::new());

        let combatants: Rc<dyn CombatantResolver> = Rc::clone(&roster) as Rc<dyn CombatantResolver>;
        let rules = Rc::new(
            RulesEngine::new(resolver, Rc::new(ModifierRegistry::new()))
                .with_combatants(combatants)
                .with_bus(Rc::clone(&bus)),
        );
        rules.add_provider(Rc::new(WarCasterProvider));
        rules.add_provider(Rc::new(MageSlayerProvider));

        let statuses = StatusEngine::new(Rc::clone(&rules), Rc::clone(&bus), Rc::clone(&clock), &config);
        let stack = Rc::new(ResolutionStack::with_max_depth(config.max_resolution_depth));
        let reactions = Rc::new(
            ReactionEngine::new(Rc::clone(&rules), Rc::clone(&bus), Rc::clone(&clock), &config)
                .with_statuses(Rc::clone(&statuses))
                .with_stack(Rc::clone(&stack))
                .with_rng(Rc::clone(&rng)),
        );
        let concentration = ConcentrationEngine::new(
            Rc::clone(&rules),
            Rc::clone(&statuses),
            Rc::clone(&bus),
            Rc::clone(&clock),
            &config,
        );

        let log = Rc::new(EventLog::new(config.event_log_capacity));
        EventLog::attach(&log, &bus);

        info!(target: "rules::session", seed = rng.seed(), "Combat session ready");

        Ok(Self {
            config,
            bus,
            roster,
            clock,
            rng,
            rules,
            statuses,
            reactions,
            stack,
            concentration,
            log,
            decider: RefCell::new(None),
        })
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    pub fn config(&self) -> &RulesConfig {
        &self.config
    }

    pub fn bus(&self) -> &Rc<EventBus> {
        &self.bus
    }

    pub fn roster(&self) -> &Rc<Roster> {
        &self.roster
    }

    pub fn clock(&self) -> &Rc<CombatClock> {
        &self.clock
    }

    pub fn rng(&self) -> &Rc<SessionRng> {
        &self.rng
    }

    pub fn rules(&self) -> &Rc<RulesEngine> {
        &self.rules
    }

    pub fn statuses(&self) -> &Rc<StatusEngine> {
        &self.statuses
    }

    pub fn reactions(&self) -> &Rc<ReactionEngine> {
        &self.reactions
    }

    pub fn stack(&self) -> &Rc<ResolutionStack> {
        &self.stack
    }

    pub fn concentration(&self) -> &Rc<ConcentrationEngine> {
        &self.concentration
    }

    pub fn log(&self) -> &Rc<EventLog> {
        &self.log
    }

    // ------------------------------------------------------------------
    // Setup
    // ------------------------------------------------------------------

    pub fn add_combatant(&self, combatant: Combatant) {
        debug!(target: "rules::session", id = %combatant.id, faction = %combatant.faction, "Combatant joined");
        self.roster.insert(combatant);
    }

    pub fn combatant(&self, id: &CombatantId) -> Option<Combatant> {
        self.roster.combatant(id)
    }

    /// Install a data pack into the status and reaction registries
    pub fn load_pack(&self, pack: &DataPack) -> Result<usize> {
        pack.install(&self.statuses, &self.reactions)
    }

    /// Grant several reactions; unknown ids follow the strictness setting
    pub fn grant_reactions(&self, id: &CombatantId, reactions: &[&str]) -> Result<usize> {
        let mut granted = 0;
        for reaction in reactions {
            if self.reactions.grant(id, reaction)? {
                granted += 1;
            }
        }
        Ok(granted)
    }

    /// Who answers reaction offers; `None` restores the AI policies
    pub fn set_decider(&self, decider: Option<Rc<dyn ReactionDecider>>) {
        *self.decider.borrow_mut() = decider;
    }

    // ------------------------------------------------------------------
    // Turn flow
    // ------------------------------------------------------------------

    pub fn begin_turn(&self, id: &CombatantId) {
        let tick = self.clock.advance();
        self.reactions.reset_budget(id);
        debug!(target: "rules::session", combatant = %id, tick, "Turn started");
        self.bus.dispatch(
            &mut RuleEvent::new(RuleEventType::TurnStarted)
                .with_source(id.clone())
                .with_target(id.clone())
                .with_value(self.clock.round() as f64),
        );
        self.statuses.process_turn_start(id);
    }

    pub fn end_turn(&self, id: &CombatantId) {
        self.statuses.process_turn_end(id);
        self.bus.dispatch(
            &mut RuleEvent::new(RuleEventType::TurnEnded)
                .with_source(id.clone())
                .with_target(id.clone())
                .with_value(self.clock.round() as f64),
        );
    }

    /// Round-based durations tick here; returns the new round number
    pub fn end_round(&self) -> u32 {
        self.statuses.process_round_end();
        self.bus
            .dispatch(&mut RuleEvent::new(RuleEventType::RoundEnded).with_value(self.clock.round() as f64));
        self.clock.next_round()
    }

    /// Resolve whatever is left on the stack, then drop concentration,
    /// statuses and reaction state; returns statuses cleared
    pub fn end_combat(&self) -> usize {
        let drained = self.stack.resolve_all().len();
        let broken = self.concentration.end_all(BreakReason::CombatEnded);
        let ids = self.roster.ids();
        let cleared: usize = ids.iter().map(|id| self.statuses.clear_combatant(id)).sum();
        for id in &ids {
            self.reactions.clear_combatant(id);
        }
        let pending = self.reactions.clear_pending();
        info!(target: "rules::session", drained, broken, cleared, pending, "Combat ended");
        cleared
    }

    // ------------------------------------------------------------------
    // Damage and healing
    // ------------------------------------------------------------------

    /// Damage `target`, then open the took-damage reaction windows
    pub fn deal_damage(
        &self,
        source: Option<&CombatantId>,
        target: &CombatantId,
        amount: i32,
        damage_type: Option<&str>,
    ) -> HpChange {
        let resolver: &dyn CombatantResolver = &*self.roster;
        let change = apply_damage(Some(resolver), &self.bus, source, target, amount, damage_type);
        if change.applied <= 0 {
            return change;
        }

        let mut ctx = ReactionContext::new(ReactionTrigger::YouTakeDamage)
            .affecting(target.clone())
            .with_damage(change.applied as f64);
        ctx.trigger_source = source.cloned();
        ctx.position = source.and_then(|s| self.position_of(s));
        self.offer(&mut ctx, std::slice::from_ref(target));

        let allies = self.allies_of(target);
        if !allies.is_empty() {
            ctx.trigger = ReactionTrigger::AllyTakesDamage;
            self.offer(&mut ctx, &allies);
        }
        change
    }

    pub fn heal(&self, source: Option<&CombatantId>, target: &CombatantId, amount: i32) -> HpChange {
        let resolver: &dyn CombatantResolver = &*self.roster;
        apply_healing(Some(resolver), &self.bus, source, target, amount)
    }

    // ------------------------------------------------------------------
    // Attacks
    // ------------------------------------------------------------------

    /// Resolve one attack with its reaction windows
    ///
    /// Order: declaration on the bus, attack roll, `YouAreAttacked` /
    /// `AllyAttacked` windows (which may raise AC or adjust the roll),
    /// damage roll, `YouAreHit` window (which may scale the damage), then
    /// damage application.
    pub fn declare_attack(
        &self,
        request: &AttackRequest,
        damage: &DamageRequest,
        damage_type: Option<&str>,
    ) -> Result<AttackReport> {
        let mut report = AttackReport::default();
        let mut declared = RuleEvent::new(RuleEventType::AttackDeclared)
            .with_source(request.attacker.clone())
            .with_target(request.target.clone())
            .with_tags(request.tags.iter().cloned())
            .cancellable();
        let item = self.stack.push(
            "attack",
            request.attacker.clone(),
            Some(request.target.clone()),
            Some(declared.clone()),
        )?;

        self.bus.dispatch(&mut declared);
        if declared.is_cancelled() {
            self.stack.cancel_item(item.item_id);
            report.cancelled = true;
            self.stack.pop();
            return Ok(report);
        }

        let mut outcome = self.rules.roll_attack(request);
        let mut ctx = ReactionContext::from_event(ReactionTrigger::YouAreAttacked, &declared)
            .would_hit(outcome.hit);
        ctx.position = self.position_of(&request.attacker);
        let used = self.offer(&mut ctx, std::slice::from_ref(&request.target));
        report.reactions.extend(used.used);

        let allies = self.allies_of(&request.target);
        if !ctx.cancelled && !allies.is_empty() {
            ctx.trigger = ReactionTrigger::AllyAttacked;
            let used = self.offer(&mut ctx, &allies);
            report.reactions.extend(used.used);
        }

        if ctx.cancelled || self.stack.item(item.item_id).is_some_and(|i| i.is_cancelled) {
            report.cancelled = true;
            report.outcome = Some(outcome);
            self.stack.pop();
            return Ok(report);
        }

        // Reactions may have changed AC or the roll itself
        if !report.reactions.is_empty() {
            outcome.total += ctx.roll_modifier.round() as i32;
            outcome.target_ac = self.rules.armor_class(&request.target, &request.tags);
            if outcome.natural_roll != 20 && outcome.natural_roll != 1 {
                outcome.hit = outcome.total >= outcome.target_ac;
            }
            outcome.critical &= outcome.hit;
        }
        report.outcome = Some(outcome);

        if outcome.hit {
            let mut damage = damage.clone();
            damage.critical = outcome.critical;
            let rolled = self.rules.roll_damage(&damage);

            let mut hit_ctx = ReactionContext::from_event(ReactionTrigger::YouAreHit, &declared)
                .would_hit(true)
                .with_damage(rolled as f64);
            hit_ctx.position = ctx.position;
            let used = self.offer(&mut hit_ctx, std::slice::from_ref(&request.target));
            report.reactions.extend(used.used);

            if hit_ctx.cancelled {
                report.cancelled = true;
            } else {
                let amount = hit_ctx.effective_damage().floor() as i32;
                report.damage =
                    Some(self.deal_damage(Some(&request.attacker), &request.target, amount, damage_type));
            }
        }

        self.stack.pop();
        Ok(report)
    }

    // ------------------------------------------------------------------
    // Spells
    // ------------------------------------------------------------------

    /// Cast a spell: pay the slot, open the counterspell window, then land
    /// the effect and start concentration
    pub fn cast_spell(&self, cast: &SpellCast) -> Result<SpellReport> {
        let mut report = SpellReport::default();

        if cast.slot_level > 0 {
            let mut paid = false;
            self.roster.update(&cast.caster, &mut |c| {
                paid = c.consume_spell_slot(cast.slot_level).is_some();
            });
            if !paid {
                debug!(target: "rules::session", caster = %cast.caster, spell = %cast.spell_id, "No slot left");
                return Ok(report);
            }
        }
        report.cast = true;

        let mut event = RuleEvent::new(RuleEventType::SpellCast)
            .with_source(cast.caster.clone())
            .with_value(cast.slot_level as f64)
            .with_data(keys::ACTION_ID, cast.spell_id.as_str())
            .with_tag("spell")
            .cancellable();
        event.target_id = cast.target.clone();
        let item = self.stack.push(
            "spell",
            cast.caster.clone(),
            cast.target.clone(),
            Some(event.clone()),
        )?;

        let mut ctx = ReactionContext::from_event(ReactionTrigger::SpellCastNearby, &event);
        ctx.position = self.position_of(&cast.caster);
        let hostiles = self.hostiles_of(&cast.caster);
        let outcome = self.offer(&mut ctx, &hostiles);
        report.reactions.extend(outcome.used.iter().cloned());

        if ctx.cancelled || self.stack.item(item.item_id).is_some_and(|i| i.is_cancelled) {
            report.countered_by = outcome.used.last().map(|(reactor, _)| reactor.clone());
            info!(
                target: "rules::session",
                caster = %cast.caster,
                spell = %cast.spell_id,
                by = ?report.countered_by,
                "Spell countered"
            );
            self.stack.pop();
            return Ok(report);
        }

        if let Some(target) = cast.target.as_ref().filter(|t| **t != cast.caster) {
            let mut targeted = ReactionContext::from_event(ReactionTrigger::YouAreTargetedBySpell, &event);
            targeted.position = ctx.position;
            let used = self.offer(&mut targeted, std::slice::from_ref(target));
            report.reactions.extend(used.used);
        }

        self.bus.dispatch(&mut event);

        if cast.concentration {
            self.concentration.break_concentration(&cast.caster, BreakReason::Replaced);
        }

        if let (Some(status_id), Some(target)) = (&cast.status_id, &cast.target) {
            report.saved = match cast.save {
                Some((ability, dc)) => self.resolve_spell_save(cast, target, ability, dc),
                None => false,
            };
            if !report.saved {
                report.status = self.statuses.apply_with(
                    status_id,
                    Some(&cast.caster),
                    target,
                    ApplyOptions {
                        duration: cast.duration,
                        save_dc: cast.save.map(|(_, dc)| dc),
                        ..ApplyOptions::default()
                    },
                );
            }
        }

        let lands = report.status.is_some() || cast.status_id.is_none();
        if cast.concentration && lands {
            let mut info = ConcentrationInfo::new(
                cast.caster.clone(),
                cast.spell_id.clone(),
                cast.status_id.clone().unwrap_or_default(),
            );
            if let Some(target) = &cast.target {
                info = info.targeting(target.clone());
            }
            if let Some(instance) = &report.status {
                info = info.linked(LinkedEffect::status(
                    instance.definition_id.clone(),
                    instance.target_id.clone(),
                    instance.instance_id,
                ));
            }
            report.concentration = Some(self.concentration.start(info));
        }

        self.stack.pop();
        Ok(report)
    }

    /// Target's save against a spell, with the `YouFailSave` window
    fn resolve_spell_save(&self, cast: &SpellCast, target: &CombatantId, ability: Ability, dc: i32) -> bool {
        let request = SaveRequest::new(target.clone(), ability, dc)
            .from_source(Some(cast.caster.clone()))
            .with_tag("spell")
            .with_tag(cast.spell_id.clone());
        let result = self.rules.roll_saving_throw(&request);
        if result.is_success {
            return true;
        }

        let mut ctx = ReactionContext::new(ReactionTrigger::YouFailSave)
            .from_source(cast.caster.clone())
            .affecting(target.clone())
            .with_action(cast.spell_id.clone());
        ctx.position = self.position_of(&cast.caster);
        self.offer(&mut ctx, std::slice::from_ref(target));
        result.final_value + ctx.roll_modifier.round() as i32 >= dc && result.natural_roll != 0
    }

    // ------------------------------------------------------------------
    // Movement
    // ------------------------------------------------------------------

    /// Move a combatant, opening reach windows for hostiles it passes
    pub fn move_combatant(&self, id: &CombatantId, to: Vec2) -> MoveReport {
        let mut report = MoveReport::default();
        let Some(mover) = self.roster.combatant(id) else {
            return report;
        };
        report.position = mover.position;
        if !mover.can_act() || self.rules.conditions_of(id, false).speed_zero {
            debug!(target: "rules::session", combatant = %id, "Cannot move");
            return report;
        }

        let from = mover.position;
        let hostiles: Vec<Combatant> = self
            .hostiles_of(id)
            .iter()
            .filter_map(|h| self.roster.combatant(h))
            .collect();

        let leaving: Vec<CombatantId> = hostiles
            .iter()
            .filter(|h| h.position.distance(&from) <= MELEE_REACH && h.position.distance(&to) > MELEE_REACH)
            .map(|h| h.id.clone())
            .collect();
        let mut destination = to;
        if !leaving.is_empty() {
            let mut ctx = ReactionContext::new(ReactionTrigger::EnemyLeavesReach)
                .from_source(id.clone())
                .affecting(id.clone())
                .at(from.x, from.y)
                .cancellable();
            let outcome = self.offer(&mut ctx, &leaving);
            let sentinel = outcome
                .used
                .iter()
                .any(|(reactor, _)| self.roster.combatant(reactor).is_some_and(|c| c.has_feat(Feat::Sentinel)));
            report.reactions.extend(outcome.used);
            if sentinel || ctx.cancelled {
                report.stopped = true;
                destination = from;
            }
        }

        let entering: Vec<CombatantId> = hostiles
            .iter()
            .filter(|h| h.position.distance(&from) > MELEE_REACH && h.position.distance(&destination) <= MELEE_REACH)
            .map(|h| h.id.clone())
            .collect();
        if !entering.is_empty() {
            let mut ctx = ReactionContext::new(ReactionTrigger::EnemyEntersReach)
                .from_source(id.clone())
                .affecting(id.clone())
                .at(destination.x, destination.y);
            report.reactions.extend(self.offer(&mut ctx, &entering).used);
        }

        if destination != from {
            self.roster.update(id, &mut |c| c.position = destination);
            report.moved = true;
            self.bus.dispatch(
                &mut RuleEvent::new(RuleEventType::CombatantMoved)
                    .with_source(id.clone())
                    .with_value(from.distance(&destination) as f64),
            );
        }
        report.position = destination;
        report
    }

    /// Attacks and spells queued by reactions, for the host to resolve
    pub fn drain_queued_actions(&self) -> Vec<QueuedAction> {
        self.reactions.drain_queued_actions()
    }

    /// Offer trigger windows that opened together, lowest priority first
    /// across all of them, through the session's decider
    pub fn offer_windows(&self, windows: &mut [(ReactionContext, Vec<CombatantId>)]) -> OfferOutcome {
        let decider = self.decider.borrow().clone();
        match decider {
            Some(decider) => self.reactions.offer_across(windows, decider.as_ref()),
            None => self.reactions.offer_across(windows, &self.reactions.policy_decider()),
        }
    }

    // ------------------------------------------------------------------
    // Snapshots
    // ------------------------------------------------------------------

    pub fn export_state(&self) -> SessionSnapshot {
        SessionSnapshot {
            round: self.clock.round(),
            tick: self.clock.now(),
            combatants: self.roster.all(),
            statuses: self.statuses.export_state(),
            concentration: self.concentration.export_state(),
        }
    }

    /// Load a snapshot into this (normally fresh) session
    ///
    /// Combatants are restored first so that replayed applies see them.
    pub fn import_state(&self, snapshot: &SessionSnapshot, mode: ImportMode) -> usize {
        self.clock.restore(snapshot.tick, snapshot.round);
        for combatant in &snapshot.combatants {
            self.roster.insert(combatant.clone());
        }
        let (statuses, remap) = self.statuses.import_state_remapped(&snapshot.statuses, mode);
        let concentration = self
            .concentration
            .import_state_remapped(&snapshot.concentration, mode, &remap);
        info!(target: "rules::session", statuses, concentration, ?mode, "Snapshot imported");
        statuses + concentration
    }

    // ------------------------------------------------------------------
    // Helpers
    // ------------------------------------------------------------------

    fn offer(&self, ctx: &mut ReactionContext, candidates: &[CombatantId]) -> OfferOutcome {
        let decider = self.decider.borrow().clone();
        match decider {
            Some(decider) => self.reactions.offer(ctx, candidates, decider.as_ref()),
            None => self.reactions.offer(ctx, candidates, &self.reactions.policy_decider()),
        }
    }

    fn position_of(&self, id: &CombatantId) -> Option<Vec2> {
        self.roster.combatant(id).map(|c| c.position)
    }

    fn hostiles_of(&self, id: &CombatantId) -> Vec<CombatantId> {
        let Some(me) = self.roster.combatant(id) else {
            return Vec::new();
        };
        self.roster
            .all()
            .into_iter()
            .filter(|c| c.id != me.id && c.is_hostile_to(&me))
            .map(|c| c.id)
            .collect()
    }

    fn allies_of(&self, id: &CombatantId) -> Vec<CombatantId> {
        let Some(me) = self.roster.combatant(id) else {
            return Vec::new();
        };
        self.roster
            .all()
            .into_iter()
            .filter(|c| c.id != me.id && !c.is_hostile_to(&me))
            .map(|c| c.id)
            .collect()
    }
}
