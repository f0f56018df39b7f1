//! Concentration engine
//!
//! At most one concentration per combatant. Breaks come from the bus
//! (damage, prone, incapacitation, death) or from callers; each break tears
//! down the linked statuses and surfaces before announcing itself.

use ahash::{AHashMap, AHashSet};
use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, warn};

use super::info::{BreakReason, ConcentrationInfo, LinkedEffect};
use crate::conditions::{condition_of, is_incapacitated, ConditionType};
use crate::core::config::RulesConfig;
use crate::core::types::{Ability, CombatClock, CombatantId};
use crate::events::{keys, EventBus, RuleEvent, RuleEventType};
use crate::rules::{RulesEngine, SaveRequest, CONCENTRATION_TAG};
use crate::status::{ImportMode, InstanceRemap, StatusEngine, StatusFlag};

pub const OWNER: &str = "concentration_engine";

/// Runs after status bookkeeping for the same event
pub const CONCENTRATION_PRIORITY: i32 = 60;

/// Actions whose surfaces are found by creator when no surface id was linked
pub const SURFACE_ACTIONS: &[&str] = &[
    "cloud_of_daggers",
    "cloudkill",
    "darkness",
    "entangle",
    "fog_cloud",
    "hunger_of_hadar",
    "moonbeam",
    "silence",
    "spike_growth",
    "spirit_guardians",
    "stinking_cloud",
    "wall_of_fire",
    "web",
];

/// Battlefield surface layer, owned by the host
pub trait SurfaceRemover {
    /// Remove one surface; false when it no longer exists
    fn remove_surface(&self, surface_id: &str) -> bool;

    /// Remove every surface `creator` made with `action_id`
    fn remove_surfaces_by(&self, creator: &CombatantId, action_id: &str) -> usize;
}

pub struct ConcentrationEngine {
    active: RefCell<AHashMap<CombatantId, ConcentrationInfo>>,
    breaking: RefCell<AHashSet<CombatantId>>,
    surfaces: RefCell<Option<Rc<dyn SurfaceRemover>>>,
    rules: Rc<RulesEngine>,
    statuses: Rc<StatusEngine>,
    bus: Rc<EventBus>,
    clock: Rc<CombatClock>,
    min_dc: i32,
    prone_dc: i32,
}

impl ConcentrationEngine {
    pub fn new(
        rules: Rc<RulesEngine>,
        statuses: Rc<StatusEngine>,
        bus: Rc<EventBus>,
        clock: Rc<CombatClock>,
        config: &RulesConfig,
    ) -> Rc<Self> {
        let engine = Rc::new(Self {
            active: RefCell::new(AHashMap::new()),
            breaking: RefCell::new(AHashSet::new()),
            surfaces: RefCell::new(None),
            rules,
            statuses,
            bus,
            clock,
            min_dc: config.concentration_min_dc,
            prone_dc: config.prone_concentration_dc,
        });
        Self::attach(&engine);
        engine
    }

    /// Wire the break triggers onto the bus
    pub fn attach(engine: &Rc<Self>) {
        let bus = Rc::clone(&engine.bus);
        bus.unsubscribe_owner(OWNER);

        let weak = Rc::downgrade(engine);
        bus.subscribe(RuleEventType::DamageTaken, CONCENTRATION_PRIORITY, OWNER, move |event| {
            if let Some(engine) = weak.upgrade() {
                engine.on_damage_taken(event);
            }
            Ok(())
        });

        let weak = Rc::downgrade(engine);
        bus.subscribe(RuleEventType::StatusApplied, CONCENTRATION_PRIORITY, OWNER, move |event| {
            if let Some(engine) = weak.upgrade() {
                engine.on_status_applied(event);
            }
            Ok(())
        });

        let weak = Rc::downgrade(engine);
        bus.subscribe(RuleEventType::CombatantDied, CONCENTRATION_PRIORITY, OWNER, move |event| {
            if let Some(engine) = weak.upgrade() {
                if let Some(dead) = event.target_id.clone() {
                    engine.break_concentration(&dead, BreakReason::Death);
                }
            }
            Ok(())
        });
    }

    pub fn detach(&self) -> usize {
        self.bus.unsubscribe_owner(OWNER)
    }

    pub fn set_surface_remover(&self, remover: Rc<dyn SurfaceRemover>) {
        *self.surfaces.borrow_mut() = Some(remover);
    }

    // ------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------

    /// Begin concentrating, breaking whatever came before
    ///
    /// With no explicit links, instances of `status_id` the combatant
    /// sourced are captured as linked effects.
    pub fn start(&self, mut info: ConcentrationInfo) -> ConcentrationInfo {
        let combatant = info.combatant_id.clone();
        if self.is_concentrating(&combatant) {
            self.break_concentration(&combatant, BreakReason::Replaced);
        }

        if info.linked_effects.is_empty() && !info.status_id.is_empty() {
            info.linked_effects = self
                .statuses
                .instances_from_source(&combatant, Some(&info.status_id))
                .into_iter()
                .map(|i| LinkedEffect::status(i.definition_id, i.target_id, i.instance_id))
                .collect();
        }
        info.started_at = self.clock.now();

        debug!(
            target: "rules::concentration",
            combatant = %combatant,
            action = %info.action_id,
            linked = info.linked_effects.len(),
            "Concentration started"
        );
        self.active.borrow_mut().insert(combatant.clone(), info.clone());
        self.dispatch_started(&info);
        info
    }

    /// Tie another effect to a running concentration
    pub fn link(&self, combatant: &CombatantId, effect: LinkedEffect) -> bool {
        match self.active.borrow_mut().get_mut(combatant) {
            Some(info) => {
                info.linked_effects.push(effect);
                true
            }
            None => false,
        }
    }

    /// Break concentration; false when the combatant was not concentrating
    pub fn break_concentration(&self, combatant: &CombatantId, reason: BreakReason) -> bool {
        if !self.breaking.borrow_mut().insert(combatant.clone()) {
            return false;
        }
        let taken = self.active.borrow_mut().remove(combatant);
        let Some(info) = taken else {
            self.breaking.borrow_mut().remove(combatant);
            return false;
        };

        debug!(
            target: "rules::concentration",
            combatant = %combatant,
            action = %info.action_id,
            %reason,
            "Concentration broken"
        );

        self.remove_linked_statuses(&info);
        self.remove_linked_surfaces(&info);

        let mut event = RuleEvent::new(RuleEventType::ConcentrationBroken)
            .with_source(combatant.clone())
            .with_data(keys::ACTION_ID, info.action_id.as_str())
            .with_data(keys::STATUS_ID, info.status_id.as_str())
            .with_data(keys::REASON, reason.as_str());
        event.target_id = info.target_id.clone();
        self.bus.dispatch(&mut event);

        self.breaking.borrow_mut().remove(combatant);
        true
    }

    /// Drop concentration by choice
    pub fn end(&self, combatant: &CombatantId) -> bool {
        self.break_concentration(combatant, BreakReason::Voluntary)
    }

    /// Break every concentration (end of combat)
    pub fn end_all(&self, reason: BreakReason) -> usize {
        self.concentrating_combatants()
            .iter()
            .filter(|c| self.break_concentration(c, reason))
            .count()
    }

    fn remove_linked_statuses(&self, info: &ConcentrationInfo) {
        let caster = &info.combatant_id;
        let status_links: Vec<&LinkedEffect> = info
            .linked_effects
            .iter()
            .filter(|l| !l.status_id.is_empty() || l.status_instance_id.is_some())
            .collect();

        if status_links.is_empty() {
            if info.status_id.is_empty() {
                return;
            }
            for instance in self.statuses.instances_from_source(caster, Some(&info.status_id)) {
                self.statuses.remove_instance(&instance);
            }
            return;
        }

        for link in status_links {
            match link.status_instance_id {
                Some(instance_id) => {
                    self.statuses.remove_instance_id(&link.target_id, instance_id);
                }
                None => {
                    for instance in self.statuses.instances_from_source(caster, Some(&link.status_id)) {
                        if instance.target_id == link.target_id {
                            self.statuses.remove_instance(&instance);
                        }
                    }
                }
            }
        }
    }

    fn remove_linked_surfaces(&self, info: &ConcentrationInfo) {
        let remover = self.surfaces.borrow().clone();
        let surface_ids: Vec<&str> = info
            .linked_effects
            .iter()
            .filter_map(|l| l.surface_instance_id.as_deref())
            .collect();

        let Some(remover) = remover else {
            if !surface_ids.is_empty() {
                warn!(target: "rules::concentration", combatant = %info.combatant_id, "No surface remover for linked surfaces");
            }
            return;
        };

        if !surface_ids.is_empty() {
            for surface in surface_ids {
                remover.remove_surface(surface);
            }
            return;
        }

        let action = info.action_id.to_ascii_lowercase();
        if SURFACE_ACTIONS.contains(&action.as_str()) {
            let removed = remover.remove_surfaces_by(&info.combatant_id, &action);
            debug!(target: "rules::concentration", action = %action, removed, "Removed surfaces by creator");
        }
    }

    fn dispatch_started(&self, info: &ConcentrationInfo) {
        let mut event = RuleEvent::new(RuleEventType::ConcentrationStarted)
            .with_source(info.combatant_id.clone())
            .with_data(keys::ACTION_ID, info.action_id.as_str())
            .with_data(keys::STATUS_ID, info.status_id.as_str());
        event.target_id = info.target_id.clone();
        self.bus.dispatch(&mut event);
    }

    // ------------------------------------------------------------------
    // Break triggers
    // ------------------------------------------------------------------

    fn on_damage_taken(&self, event: &RuleEvent) {
        let Some(target) = event.target_id.clone() else {
            return;
        };
        if !self.is_concentrating(&target) || event.final_value <= 0.0 || event.is_cancelled() {
            return;
        }

        let hp_after = event
            .data
            .get(keys::HP_AFTER)
            .and_then(|v| v.as_i64())
            .or_else(|| self.rules.combatant(&target).map(|c| c.hp as i64));
        if hp_after.is_some_and(|hp| hp <= 0) {
            self.break_concentration(&target, BreakReason::Damage);
            return;
        }

        let damage = event.final_value as i32;
        let dc = self.min_dc.max(damage / 2);
        if !self.concentration_save(&target, dc, event.source_id.clone()) {
            self.break_concentration(&target, BreakReason::Damage);
        }
    }

    fn on_status_applied(&self, event: &RuleEvent) {
        let Some(target) = event.target_id.clone() else {
            return;
        };
        if !self.is_concentrating(&target) {
            return;
        }
        let Some(status_id) = event.data_str(keys::STATUS_ID).map(str::to_string) else {
            return;
        };

        let flagged = self
            .statuses
            .definition(&status_id)
            .is_some_and(|d| d.has_flag(StatusFlag::Incapacitating));
        if flagged || event.has_tag("incapacitating") || is_incapacitated([status_id.as_str()]) {
            self.break_concentration(&target, BreakReason::Incapacitated);
            return;
        }

        if condition_of(&status_id) == Some(ConditionType::Prone)
            && !self.concentration_save(&target, self.prone_dc, event.source_id.clone())
        {
            self.break_concentration(&target, BreakReason::Prone);
        }
    }

    /// Constitution save through the normal save pipeline
    fn concentration_save(&self, combatant: &CombatantId, dc: i32, source: Option<CombatantId>) -> bool {
        let result = self.rules.roll_saving_throw(
            &SaveRequest::new(combatant.clone(), Ability::Constitution, dc)
                .from_source(source)
                .with_tag(CONCENTRATION_TAG),
        );
        debug!(
            target: "rules::concentration",
            combatant = %combatant,
            dc,
            total = result.final_value,
            success = result.is_success,
            "Concentration save"
        );
        result.is_success
    }

    // ------------------------------------------------------------------
    // Queries and snapshots
    // ------------------------------------------------------------------

    pub fn is_concentrating(&self, combatant: &CombatantId) -> bool {
        self.active.borrow().contains_key(combatant)
    }

    pub fn info(&self, combatant: &CombatantId) -> Option<ConcentrationInfo> {
        self.active.borrow().get(combatant).cloned()
    }

    pub fn concentrating_combatants(&self) -> Vec<CombatantId> {
        let mut ids: Vec<CombatantId> = self.active.borrow().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a combatant without tearing anything down
    pub fn clear_combatant(&self, combatant: &CombatantId) {
        self.active.borrow_mut().remove(combatant);
    }

    /// Every concentration, ordered by combatant
    pub fn export_state(&self) -> Vec<ConcentrationInfo> {
        self.concentrating_combatants()
            .iter()
            .filter_map(|c| self.info(c))
            .collect()
    }

    /// Restore concentrations as exported, status links included
    pub fn import_state(&self, infos: &[ConcentrationInfo], mode: ImportMode) -> usize {
        self.restore(infos.iter().cloned(), mode)
    }

    /// Restore concentrations whose statuses were re-imported under new ids
    ///
    /// Status links follow `remap`; a link to an instance that was not
    /// restored is dropped.
    pub fn import_state_remapped(
        &self,
        infos: &[ConcentrationInfo],
        mode: ImportMode,
        remap: &InstanceRemap,
    ) -> usize {
        let relinked = infos.iter().map(|info| {
            let mut info = info.clone();
            info.linked_effects.retain_mut(|link| match link.status_instance_id {
                Some(old) => match remap.get(&old) {
                    Some(&new) => {
                        link.status_instance_id = Some(new);
                        true
                    }
                    None => false,
                },
                None => true,
            });
            info
        });
        self.restore(relinked, mode)
    }

    fn restore(&self, infos: impl Iterator<Item = ConcentrationInfo>, mode: ImportMode) -> usize {
        let mut restored = 0;
        for info in infos {
            restored += 1;
            match mode {
                ImportMode::Silent => {
                    self.active
                        .borrow_mut()
                        .insert(info.combatant_id.clone(), info);
                }
                ImportMode::Replay => {
                    let started_at = info.started_at;
                    let combatant = info.combatant_id.clone();
                    self.start(info);
                    if let Some(stored) = self.active.borrow_mut().get_mut(&combatant) {
                        stored.started_at = started_at;
                    }
                }
            }
        }
        debug!(target: "rules::concentration", restored, ?mode, "Imported concentration");
        restored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{apply_damage, Combatant, Feat, Roster};
    use crate::events::EventLog;
    use crate::rules::{ModifierRegistry, ScriptedResolver, WarCasterProvider};
    use crate::status::{DurationType, StatusDefinition};
    use std::cell::Cell;

    struct Fixture {
        engine: Rc<ConcentrationEngine>,
        statuses: Rc<StatusEngine>,
        roster: Rc<Roster>,
        resolver: Rc<ScriptedResolver>,
        bus: Rc<EventBus>,
        log: Rc<EventLog>,
    }

    fn fixture() -> Fixture {
        let config = RulesConfig::default();
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(EventLog::new(128));
        EventLog::attach(&log, &bus);
        let roster = Rc::new(Roster::new());
        roster.insert(Combatant::new("cleric", 20));
        roster.insert(Combatant::new("fighter", 30));
        let resolver = Rc::new(ScriptedResolver::always(10));
        let rules = Rc::new(
            RulesEngine::new(resolver.clone(), Rc::new(ModifierRegistry::new()))
                .with_combatants(roster.clone()),
        );
        rules.add_provider(Rc::new(WarCasterProvider));
        let clock = Rc::new(CombatClock::new());
        let statuses = StatusEngine::new(rules.clone(), bus.clone(), clock.clone(), &config);
        statuses.register(StatusDefinition::new("blessed").lasting(DurationType::Rounds, 10));
        statuses.register(StatusDefinition::new("prone").permanent());
        statuses.register(StatusDefinition::new("stunned").lasting(DurationType::Turns, 1));
        let engine = ConcentrationEngine::new(rules, statuses.clone(), bus.clone(), clock, &config);
        Fixture {
            engine,
            statuses,
            roster,
            resolver,
            bus,
            log,
        }
    }

    fn cleric() -> CombatantId {
        "cleric".into()
    }

    fn bless(f: &Fixture) {
        let fighter = CombatantId::from("fighter");
        f.statuses.apply("blessed", Some(&cleric()), &fighter, None);
        f.engine.start(ConcentrationInfo::new("cleric", "bless", "blessed"));
    }

    #[test]
    fn test_start_captures_links() {
        let f = fixture();
        bless(&f);
        let info = f.engine.info(&cleric()).unwrap();
        assert_eq!(info.linked_effects.len(), 1);
        assert_eq!(info.linked_effects[0].target_id, "fighter".into());
        assert_eq!(f.log.count(&RuleEventType::ConcentrationStarted), 1);
    }

    #[test]
    fn test_second_start_replaces_first() {
        let f = fixture();
        bless(&f);
        f.engine.start(ConcentrationInfo::new("cleric", "spirit_guardians", ""));
        assert_eq!(f.engine.concentrating_combatants().len(), 1);
        assert_eq!(f.engine.info(&cleric()).unwrap().action_id, "spirit_guardians");
        assert!(!f.statuses.has_status(&"fighter".into(), "blessed"));
        let broken = f.log.of_type(&RuleEventType::ConcentrationBroken);
        assert_eq!(broken[0].data_str(keys::REASON), Some("replaced"));
    }

    #[test]
    fn test_break_when_not_concentrating() {
        let f = fixture();
        assert!(!f.engine.end(&cleric()));
    }

    #[test]
    fn test_damage_save_dc_floor() {
        let f = fixture();
        bless(&f);
        // 8 damage: DC 10, a natural 10 with +0 holds
        f.resolver.push_d20(10);
        apply_damage(Some(f.roster.as_ref()), &f.bus, None, &cleric(), 8, None);
        assert!(f.engine.is_concentrating(&cleric()));

        // Small hits keep the floor DC; a 9 fails
        f.resolver.push_d20(9);
        apply_damage(Some(f.roster.as_ref()), &f.bus, None, &cleric(), 2, None);
        assert!(!f.engine.is_concentrating(&cleric()));
    }

    #[test]
    fn test_dropping_to_zero_breaks_without_save() {
        let f = fixture();
        bless(&f);
        f.resolver.push_d20(20);
        apply_damage(Some(f.roster.as_ref()), &f.bus, None, &cleric(), 25, None);
        assert!(!f.engine.is_concentrating(&cleric()));
        assert_eq!(f.resolver.remaining_d20s(), 1);
    }

    #[test]
    fn test_war_caster_rolls_with_advantage() {
        let f = fixture();
        f.roster
            .insert(Combatant::new("cleric", 40).with_feat(Feat::WarCaster));
        bless(&f);
        f.resolver.push_d20(3);
        f.resolver.push_d20(15);
        apply_damage(Some(f.roster.as_ref()), &f.bus, None, &cleric(), 6, None);
        assert!(f.engine.is_concentrating(&cleric()));
    }

    #[test]
    fn test_prone_forces_save() {
        let f = fixture();
        bless(&f);
        f.resolver.push_d20(4);
        f.statuses.apply("prone", None, &cleric(), None);
        assert!(!f.engine.is_concentrating(&cleric()));
        let broken = f.log.of_type(&RuleEventType::ConcentrationBroken);
        assert_eq!(broken[0].data_str(keys::REASON), Some("prone"));
    }

    #[test]
    fn test_incapacitation_breaks_without_save() {
        let f = fixture();
        bless(&f);
        f.resolver.push_d20(20);
        f.statuses.apply("stunned", None, &cleric(), None);
        assert!(!f.engine.is_concentrating(&cleric()));
        assert_eq!(f.resolver.remaining_d20s(), 1);
    }

    struct CountingSurfaces {
        by_id: Cell<usize>,
        by_creator: Cell<usize>,
    }

    impl SurfaceRemover for CountingSurfaces {
        fn remove_surface(&self, _surface_id: &str) -> bool {
            self.by_id.set(self.by_id.get() + 1);
            true
        }

        fn remove_surfaces_by(&self, _creator: &CombatantId, _action_id: &str) -> usize {
            self.by_creator.set(self.by_creator.get() + 1);
            1
        }
    }

    #[test]
    fn test_surface_teardown() {
        let f = fixture();
        let surfaces = Rc::new(CountingSurfaces {
            by_id: Cell::new(0),
            by_creator: Cell::new(0),
        });
        f.engine.set_surface_remover(surfaces.clone());

        f.engine.start(
            ConcentrationInfo::new("cleric", "wall_of_fire", "")
                .linked(LinkedEffect::surface("surface-1", "cleric")),
        );
        f.engine.end(&cleric());
        assert_eq!(surfaces.by_id.get(), 1);

        f.engine.start(ConcentrationInfo::new("cleric", "Moonbeam", ""));
        f.engine.end(&cleric());
        assert_eq!(surfaces.by_creator.get(), 1);

        f.engine.start(ConcentrationInfo::new("cleric", "hold_person", ""));
        f.engine.end(&cleric());
        assert_eq!(surfaces.by_creator.get(), 1);
    }

    #[test]
    fn test_silent_import_round_trip() {
        let f = fixture();
        bless(&f);
        let snapshot = f.engine.export_state();
        f.engine.clear_combatant(&cleric());
        f.log.clear();
        f.engine.import_state(&snapshot, ImportMode::Silent);
        assert!(f.log.is_empty());
        assert_eq!(f.engine.export_state(), snapshot);
    }
}
