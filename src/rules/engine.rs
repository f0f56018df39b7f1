//! Roll composition
//!
//! Every roll the core makes goes through here: base bonuses from the
//! combatant resolver, registered status modifiers, the condition table and
//! rule-window providers are folded into one `QueryInput`, then handed to
//! the `Resolver`.

use std::cell::RefCell;
use std::collections::BTreeSet;
use std::rc::{Rc, Weak};

use tracing::debug;

use super::modifiers::{ModifierRegistry, ModifierTarget, RollModifiers};
use super::query::{params, QueryInput, QueryResult, QueryType};
use super::resolver::Resolver;
use super::windows::{RuleProvider, RuleWindow, WindowContext};
use crate::combat::{Combatant, CombatantResolver};
use crate::conditions::{aggregate, AggregateEffects};
use crate::core::types::{Ability, CombatantId};
use crate::events::{keys, EventBus, RuleEvent, RuleEventType};

/// Read access to active status ids, implemented by the status engine
pub trait StatusQuery {
    fn active_status_ids(&self, combatant: &CombatantId) -> Vec<String>;
}

#[derive(Debug, Clone, PartialEq)]
pub struct SaveRequest {
    pub combatant: CombatantId,
    pub ability: Ability,
    pub dc: i32,
    /// Whoever forced the save (damage dealer, spell caster)
    pub source: Option<CombatantId>,
    pub tags: BTreeSet<String>,
}

impl SaveRequest {
    pub fn new(combatant: impl Into<CombatantId>, ability: Ability, dc: i32) -> Self {
        Self {
            combatant: combatant.into(),
            ability,
            dc,
            source: None,
            tags: BTreeSet::new(),
        }
    }

    pub fn from_source(mut self, source: Option<CombatantId>) -> Self {
        self.source = source;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttackRequest {
    pub attacker: CombatantId,
    pub target: CombatantId,
    pub is_melee: bool,
    /// Ability modifier, proficiency and weapon bonus chosen by the caller
    pub attack_bonus: i32,
    pub tags: BTreeSet<String>,
}

impl AttackRequest {
    pub fn melee(attacker: impl Into<CombatantId>, target: impl Into<CombatantId>, attack_bonus: i32) -> Self {
        Self::new(attacker, target, true, attack_bonus)
    }

    pub fn ranged(attacker: impl Into<CombatantId>, target: impl Into<CombatantId>, attack_bonus: i32) -> Self {
        Self::new(attacker, target, false, attack_bonus)
    }

    fn new(attacker: impl Into<CombatantId>, target: impl Into<CombatantId>, is_melee: bool, attack_bonus: i32) -> Self {
        let tags = [if is_melee { "melee" } else { "ranged" }, "attack"]
            .into_iter()
            .map(String::from)
            .collect();
        Self {
            attacker: attacker.into(),
            target: target.into(),
            is_melee,
            attack_bonus,
            tags,
        }
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AttackOutcome {
    pub hit: bool,
    pub critical: bool,
    pub natural_roll: u32,
    pub total: i32,
    pub target_ac: i32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageRequest {
    pub attacker: Option<CombatantId>,
    pub target: CombatantId,
    pub dice_count: u32,
    pub dice_sides: u32,
    pub bonus: i32,
    pub critical: bool,
    pub tags: BTreeSet<String>,
}

impl DamageRequest {
    pub fn new(target: impl Into<CombatantId>, dice_count: u32, dice_sides: u32, bonus: i32) -> Self {
        Self {
            attacker: None,
            target: target.into(),
            dice_count,
            dice_sides,
            bonus,
            critical: false,
            tags: BTreeSet::new(),
        }
    }

    pub fn by(mut self, attacker: impl Into<CombatantId>) -> Self {
        self.attacker = Some(attacker.into());
        self
    }

    pub fn critical(mut self, critical: bool) -> Self {
        self.critical = critical;
        self
    }

    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }
}

pub struct RulesEngine {
    resolver: Rc<dyn Resolver>,
    combatants: Option<Rc<dyn CombatantResolver>>,
    modifiers: Rc<ModifierRegistry>,
    providers: RefCell<Vec<Rc<dyn RuleProvider>>>,
    statuses: RefCell<Option<Weak<dyn StatusQuery>>>,
    bus: Option<Rc<EventBus>>,
}

impl RulesEngine {
    pub fn new(resolver: Rc<dyn Resolver>, modifiers: Rc<ModifierRegistry>) -> Self {
        Self {
            resolver,
            combatants: None,
            modifiers,
            providers: RefCell::new(Vec::new()),
            statuses: RefCell::new(None),
            bus: None,
        }
    }

    pub fn with_combatants(mut self, combatants: Rc<dyn CombatantResolver>) -> Self {
        self.combatants = Some(combatants);
        self
    }

    /// Announce every saving throw as `SavingThrowRolled`
    pub fn with_bus(mut self, bus: Rc<EventBus>) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn add_provider(&self, provider: Rc<dyn RuleProvider>) {
        self.providers.borrow_mut().push(provider);
    }

    /// Attach the source of active status ids (held weakly)
    pub fn set_status_query(&self, statuses: Weak<dyn StatusQuery>) {
        *self.statuses.borrow_mut() = Some(statuses);
    }

    pub fn modifiers(&self) -> &Rc<ModifierRegistry> {
        &self.modifiers
    }

    pub fn resolver(&self) -> &Rc<dyn Resolver> {
        &self.resolver
    }

    pub fn combatant(&self, id: &CombatantId) -> Option<Combatant> {
        self.combatants.as_ref().and_then(|c| c.combatant(id))
    }

    pub fn combatant_resolver(&self) -> Option<&Rc<dyn CombatantResolver>> {
        self.combatants.as_ref()
    }

    fn active_status_ids(&self, id: &CombatantId) -> Vec<String> {
        let statuses = self.statuses.borrow().as_ref().and_then(Weak::upgrade);
        statuses
            .map(|s| s.active_status_ids(id))
            .unwrap_or_default()
    }

    /// Condition summary for `id` against an attack of the given reach
    pub fn conditions_of(&self, id: &CombatantId, is_melee_attack: bool) -> AggregateEffects {
        aggregate(self.active_status_ids(id), is_melee_attack)
    }

    fn run_window(
        &self,
        window: RuleWindow,
        roller: Option<&Combatant>,
        other: Option<&Combatant>,
        tags: &BTreeSet<String>,
        modifiers: &mut RollModifiers,
    ) {
        let providers: Vec<Rc<dyn RuleProvider>> = self
            .providers
            .borrow()
            .iter()
            .filter(|p| p.windows().contains(&window))
            .cloned()
            .collect();
        let mut ctx = WindowContext {
            window,
            roller,
            other,
            tags,
            modifiers,
        };
        for provider in providers {
            provider.apply(&mut ctx);
        }
    }

    fn collect(&self, id: &CombatantId, roll: ModifierTarget, tags: &BTreeSet<String>, into: &mut RollModifiers) {
        for modifier in self.modifiers.applicable(id, roll, tags) {
            into.add(&modifier);
        }
    }

    /// Base armor class plus every active AC modifier; 10 for unknown ids
    pub fn armor_class(&self, id: &CombatantId, tags: &BTreeSet<String>) -> i32 {
        let mut armor = RollModifiers::default();
        self.collect(id, ModifierTarget::ArmorClass, tags, &mut armor);
        self.combatant(id).map_or(10, |c| c.armor_class) + armor.flat.round() as i32
    }

    /// Saving throw with every modifier source composed before rolling
    pub fn roll_saving_throw(&self, request: &SaveRequest) -> QueryResult {
        let roller = self.combatant(&request.combatant);
        let other = request.source.as_ref().and_then(|s| self.combatant(s));
        let base = roller
            .as_ref()
            .map_or(0, |c| c.save_bonus(request.ability));

        let mut modifiers = RollModifiers::default();
        self.collect(
            &request.combatant,
            ModifierTarget::SavingThrow(Some(request.ability)),
            &request.tags,
            &mut modifiers,
        );

        let conditions = self.conditions_of(&request.combatant, false);
        if conditions.auto_fail_str_dex_saves
            && matches!(request.ability, Ability::Strength | Ability::Dexterity)
        {
            modifiers.auto_fail = true;
        }

        self.run_window(
            RuleWindow::BeforeSavingThrow,
            roller.as_ref(),
            other.as_ref(),
            &request.tags,
            &mut modifiers,
        );

        let input = QueryInput {
            query_type: QueryType::SavingThrow,
            dc: request.dc,
            base_value: base,
            target: Some(request.combatant.clone()),
            source: request.source.clone(),
            tags: request.tags.clone(),
            parameters: Default::default(),
            modifiers,
        };
        let result = self.resolver.roll_save(&input);

        debug!(
            target: "rules::saves",
            combatant = %request.combatant,
            ability = request.ability.short_name(),
            dc = request.dc,
            natural = result.natural_roll,
            total = result.final_value,
            success = result.is_success,
            "Saving throw"
        );

        if let Some(bus) = &self.bus {
            let mut event = RuleEvent::new(RuleEventType::SavingThrowRolled)
                .with_source_opt(request.source.clone())
                .with_target(request.combatant.clone())
                .with_value(result.final_value as f64)
                .with_tags(request.tags.iter().cloned())
                .with_data(keys::DC, request.dc)
                .with_data(keys::SUCCESS, result.is_success);
            bus.dispatch(&mut event);
        }

        result
    }

    pub fn roll_attack(&self, request: &AttackRequest) -> AttackOutcome {
        let attacker = self.combatant(&request.attacker);
        let target = self.combatant(&request.target);

        let mut modifiers = RollModifiers::default();
        self.collect(&request.attacker, ModifierTarget::AttackRoll, &request.tags, &mut modifiers);
        self.collect(&request.target, ModifierTarget::IncomingAttack, &request.tags, &mut modifiers);

        let own = self.conditions_of(&request.attacker, request.is_melee);
        if own.advantage_on_own_attacks {
            modifiers.grant_advantage("condition");
        }
        if own.disadvantage_on_own_attacks {
            modifiers.impose_disadvantage("condition");
        }
        let theirs = self.conditions_of(&request.target, request.is_melee);
        if theirs.attackers_have_advantage {
            modifiers.grant_advantage("target_condition");
        }
        if theirs.attackers_have_disadvantage {
            modifiers.impose_disadvantage("target_condition");
        }

        let target_ac = self.armor_class(&request.target, &request.tags);

        self.run_window(
            RuleWindow::BeforeAttackRoll,
            attacker.as_ref(),
            target.as_ref(),
            &request.tags,
            &mut modifiers,
        );

        let input = QueryInput {
            query_type: QueryType::AttackRoll,
            dc: target_ac,
            base_value: request.attack_bonus,
            target: Some(request.target.clone()),
            source: Some(request.attacker.clone()),
            tags: request.tags.clone(),
            parameters: Default::default(),
            modifiers,
        };
        let result = self.resolver.roll_d20(&input);
        let critical = result.is_success
            && (result.is_natural_20() || theirs.attacks_against_auto_crit);

        debug!(
            target: "rules::attacks",
            attacker = %request.attacker,
            target_id = %request.target,
            natural = result.natural_roll,
            total = result.final_value,
            target_ac,
            hit = result.is_success,
            critical,
            "Attack roll"
        );

        AttackOutcome {
            hit: result.is_success,
            critical,
            natural_roll: result.natural_roll,
            total: result.final_value,
            target_ac,
        }
    }

    /// Damage after dealt/taken modifiers and blanket resistance
    pub fn roll_damage(&self, request: &DamageRequest) -> i32 {
        let attacker = request.attacker.as_ref().and_then(|a| self.combatant(a));
        let target = self.combatant(&request.target);

        let mut modifiers = RollModifiers::default();
        if let Some(attacker_id) = &request.attacker {
            self.collect(attacker_id, ModifierTarget::DamageDealt, &request.tags, &mut modifiers);
        }
        self.collect(&request.target, ModifierTarget::DamageTaken, &request.tags, &mut modifiers);

        if self.conditions_of(&request.target, false).resistance_to_all_damage {
            modifiers.multiplier *= 0.5;
        }

        self.run_window(
            RuleWindow::BeforeDamage,
            attacker.as_ref(),
            target.as_ref(),
            &request.tags,
            &mut modifiers,
        );

        let dice_count = if request.critical {
            request.dice_count * 2
        } else {
            request.dice_count
        };
        let input = QueryInput {
            query_type: QueryType::DamageRoll,
            dc: 0,
            base_value: request.bonus,
            target: Some(request.target.clone()),
            source: request.attacker.clone(),
            tags: request.tags.clone(),
            parameters: [
                (params::DICE_COUNT.to_string(), dice_count as i32),
                (params::DICE_SIDES.to_string(), request.dice_sides as i32),
            ]
            .into_iter()
            .collect(),
            modifiers,
        };
        self.resolver.roll_damage(&input).final_value
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Feat, Roster};
    use crate::rules::modifiers::ModifierSpec;
    use crate::rules::resolver::ScriptedResolver;
    use crate::rules::windows::{MageSlayerProvider, WarCasterProvider, CONCENTRATION_TAG};
    use crate::events::EventLog;

    struct FixedStatuses(Vec<(CombatantId, Vec<String>)>);

    impl StatusQuery for FixedStatuses {
        fn active_status_ids(&self, combatant: &CombatantId) -> Vec<String> {
            self.0
                .iter()
                .find(|(id, _)| id == combatant)
                .map(|(_, ids)| ids.clone())
                .unwrap_or_default()
        }
    }

    fn engine(d20s: Vec<u32>, roster: Roster) -> (RulesEngine, Rc<ScriptedResolver>) {
        let resolver = Rc::new(ScriptedResolver::new(d20s));
        let engine = RulesEngine::new(resolver.clone(), Rc::new(ModifierRegistry::new()))
            .with_combatants(Rc::new(roster));
        (engine, resolver)
    }

    #[test]
    fn test_save_uses_ability_and_proficiency() {
        let roster = Roster::new();
        roster.insert(
            Combatant::new("wizard", 20)
                .with_ability(Ability::Constitution, 14)
                .with_save_proficiency(Ability::Constitution),
        );
        let (engine, _) = engine(vec![9], roster);
        let result = engine.roll_saving_throw(&SaveRequest::new("wizard", Ability::Constitution, 13));
        assert_eq!(result.final_value, 13);
        assert!(result.is_success);
    }

    #[test]
    fn test_missing_resolver_defaults_bonus_to_zero() {
        let resolver = Rc::new(ScriptedResolver::new(vec![12]));
        let engine = RulesEngine::new(resolver, Rc::new(ModifierRegistry::new()));
        let result = engine.roll_saving_throw(&SaveRequest::new("nobody", Ability::Wisdom, 13));
        assert_eq!(result.final_value, 12);
        assert!(!result.is_success);
    }

    #[test]
    fn test_paralyzed_auto_fails_dex_saves() {
        let (engine, resolver) = engine(vec![20], Roster::new());
        let statuses: Rc<dyn StatusQuery> = Rc::new(FixedStatuses(vec![(
            "victim".into(),
            vec!["hold_person".into()],
        )]));
        engine.set_status_query(Rc::downgrade(&statuses));
        let result = engine.roll_saving_throw(&SaveRequest::new("victim", Ability::Dexterity, 5));
        assert!(!result.is_success);
        assert_eq!(resolver.remaining_d20s(), 1);
        // Wisdom is unaffected
        assert!(engine
            .roll_saving_throw(&SaveRequest::new("victim", Ability::Wisdom, 5))
            .is_success);
    }

    #[test]
    fn test_feats_compose_on_concentration_saves() {
        let roster = Roster::new();
        roster.insert(Combatant::new("caster", 20).with_feat(Feat::WarCaster));
        roster.insert(Combatant::new("slayer", 30).with_feat(Feat::MageSlayer));
        let (engine, resolver) = engine(vec![3, 18], roster);
        engine.add_provider(Rc::new(WarCasterProvider));

        let request = SaveRequest::new("caster", Ability::Constitution, 10).with_tag(CONCENTRATION_TAG);
        let result = engine.roll_saving_throw(&request);
        assert_eq!(result.natural_roll, 18);

        engine.add_provider(Rc::new(MageSlayerProvider));
        resolver.push_d20(7);
        resolver.push_d20(19);
        let from_slayer = request.clone().from_source(Some("slayer".into()));
        // Advantage and disadvantage cancel: single roll
        assert_eq!(engine.roll_saving_throw(&from_slayer).natural_roll, 7);
        assert_eq!(resolver.remaining_d20s(), 1);
    }

    #[test]
    fn test_conditional_status_modifier() {
        let (engine, resolver) = engine(vec![15, 4, 15], Roster::new());
        let spec = ModifierSpec::disadvantage(ModifierTarget::AttackRoll).when(
            crate::rules::ContextPredicate::AnyTag(vec!["ranged".into(), "spell".into()]),
        );
        engine
            .modifiers()
            .add(&"archer".into(), spec.instantiate("m", "threatened#1", 1));

        let melee = engine.roll_attack(&AttackRequest::melee("archer", "orc", 0));
        assert_eq!(melee.natural_roll, 15);
        let ranged = engine.roll_attack(&AttackRequest::ranged("archer", "orc", 0));
        assert_eq!(ranged.natural_roll, 4);
        assert_eq!(resolver.remaining_d20s(), 0);
    }

    #[test]
    fn test_melee_hit_on_paralyzed_is_critical() {
        let roster = Roster::new();
        roster.insert(Combatant::new("orc", 15).with_armor_class(12));
        let (engine, _) = engine(vec![11, 5], roster);
        let statuses: Rc<dyn StatusQuery> =
            Rc::new(FixedStatuses(vec![("orc".into(), vec!["paralyzed".into()])]));
        engine.set_status_query(Rc::downgrade(&statuses));
        let outcome = engine.roll_attack(&AttackRequest::melee("fighter", "orc", 3));
        // Advantage from the target's condition keeps 11
        assert_eq!(outcome.natural_roll, 11);
        assert!(outcome.hit);
        assert!(outcome.critical);
        assert_eq!(outcome.target_ac, 12);
    }

    #[test]
    fn test_petrified_halves_damage_and_crit_doubles_dice() {
        let resolver = Rc::new(ScriptedResolver::new(vec![]).with_dice([6, 6, 6, 6]));
        let engine = RulesEngine::new(resolver, Rc::new(ModifierRegistry::new()));
        let statuses: Rc<dyn StatusQuery> =
            Rc::new(FixedStatuses(vec![("statue".into(), vec!["petrified".into()])]));
        engine.set_status_query(Rc::downgrade(&statuses));
        let damage = engine.roll_damage(&DamageRequest::new("statue", 2, 6, 0).critical(true));
        assert_eq!(damage, 12);
    }

    #[test]
    fn test_saves_are_announced_on_bus() {
        let bus = Rc::new(EventBus::new());
        let log = Rc::new(EventLog::new(8));
        EventLog::attach(&log, &bus);
        let resolver = Rc::new(ScriptedResolver::always(15));
        let engine = RulesEngine::new(resolver, Rc::new(ModifierRegistry::new())).with_bus(bus);
        engine.roll_saving_throw(&SaveRequest::new("rogue", Ability::Dexterity, 12));
        let saves = log.of_type(&RuleEventType::SavingThrowRolled);
        assert_eq!(saves.len(), 1);
        assert_eq!(saves[0].data_bool(keys::SUCCESS), Some(true));
    }
}
