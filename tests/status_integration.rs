//! Status engine integration tests
//!
//! Statuses driven through a full session: turn flow, stacking, immunity,
//! repeat saves and snapshot round trips.

use std::rc::Rc;

use skirmish_rules::combat::Combatant;
use skirmish_rules::core::config::RulesConfig;
use skirmish_rules::core::types::CombatantId;
use skirmish_rules::data::core_pack;
use skirmish_rules::events::RuleEventType;
use skirmish_rules::rules::{AttackRequest, DamageRequest, Resolver, ScriptedResolver};
use skirmish_rules::status::{
    DurationType, ImportMode, StackingBehavior, StatusDefinition, StatusEffectAction,
};
use skirmish_rules::CombatSession;

fn session(d20: u32) -> CombatSession {
    let resolver: Rc<dyn Resolver> = Rc::new(ScriptedResolver::always(d20));
    let session = CombatSession::with_resolver(RulesConfig::default(), resolver).unwrap();
    session.load_pack(&core_pack().unwrap()).unwrap();
    session
}

fn id(raw: &str) -> CombatantId {
    CombatantId::new(raw)
}

#[test]
fn test_stack_caps_and_refreshes() {
    let s = session(10);
    s.add_combatant(Combatant::new("troll", 80));
    s.statuses().register(
        StatusDefinition::new("venom")
            .lasting(DurationType::Turns, 4)
            .stacking(StackingBehavior::Stack, 3),
    );

    for n in 1..=5u32 {
        s.statuses().apply("venom", None, &id("troll"), None);
        let active = s.statuses().active_statuses(&id("troll"));
        assert_eq!(active.len(), 1, "stacking never creates a second instance");
        assert_eq!(active[0].stacks, n.min(3));
        assert_eq!(active[0].remaining_duration, 4);

        // Burn a turn so the refresh is observable
        s.end_turn(&id("troll"));
    }
}

#[test]
fn test_immunity_blocks_paralysis() {
    let s = session(10);
    s.add_combatant(Combatant::new("golem", 60).with_immunity("Paralyzed"));
    s.statuses().apply("blessed", None, &id("golem"), None);
    let before = s.statuses().active_statuses(&id("golem"));

    assert!(s.statuses().apply("paralyzed", None, &id("golem"), None).is_none());
    assert!(s.statuses().apply("hold_person", None, &id("golem"), None).is_none());
    assert_eq!(s.statuses().active_statuses(&id("golem")), before);
    assert_eq!(s.log().count(&RuleEventType::StatusApplied), 1);
}

#[test]
fn test_unknown_status_is_ignored() {
    let s = session(10);
    s.add_combatant(Combatant::new("hero", 20));
    assert!(s.statuses().apply("petrified_by_gaze", None, &id("hero"), None).is_none());
    assert!(!s.statuses().remove(&id("hero"), "petrified_by_gaze"));
}

#[test]
fn test_repeat_save_ends_hold_person() {
    let s = session(20);
    s.add_combatant(Combatant::new("bandit", 20));
    s.statuses().apply("hold_person", Some(&id("cleric")), &id("bandit"), None);

    s.begin_turn(&id("bandit"));
    s.end_turn(&id("bandit"));

    assert!(!s.statuses().has_status(&id("bandit"), "hold_person"));
    let saves = s.log().of_type(&RuleEventType::SavingThrowRolled);
    assert_eq!(saves.len(), 1);
    assert!(saves[0].has_tag("repeat_save"));
}

#[test]
fn test_failed_repeat_save_keeps_status_and_ticks_down() {
    let s = session(1);
    s.add_combatant(Combatant::new("bandit", 20));
    s.statuses().apply("hold_person", Some(&id("cleric")), &id("bandit"), None);

    s.end_turn(&id("bandit"));

    let active = s.statuses().active_statuses(&id("bandit"));
    assert_eq!(active.len(), 1);
    assert_eq!(active[0].remaining_duration, 9);
}

#[test]
fn test_burning_ticks_then_expires() {
    let s = session(10);
    s.add_combatant(Combatant::new("scarecrow", 30));
    s.statuses().apply("burning", None, &id("scarecrow"), None);

    for _ in 0..3 {
        s.begin_turn(&id("scarecrow"));
        s.end_turn(&id("scarecrow"));
    }

    assert_eq!(s.combatant(&id("scarecrow")).unwrap().hp, 24);
    assert!(!s.statuses().has_status(&id("scarecrow"), "burning"));
    assert_eq!(s.log().count(&RuleEventType::StatusTicked), 3);
    assert_eq!(s.log().count(&RuleEventType::StatusRemoved), 1);
}

#[test]
fn test_shield_boost_ends_at_turn_start() {
    let s = session(10);
    s.add_combatant(Combatant::new("wizard", 12).with_armor_class(12));
    s.statuses().apply("shield_boost", None, &id("wizard"), None);
    assert_eq!(s.rules().armor_class(&id("wizard"), &Default::default()), 17);

    s.begin_turn(&id("wizard"));
    assert!(!s.statuses().has_status(&id("wizard"), "shield_boost"));
    assert_eq!(s.rules().armor_class(&id("wizard"), &Default::default()), 12);
}

#[test]
fn test_hidden_breaks_on_attack() {
    let s = session(15);
    s.add_combatant(Combatant::new("rogue", 20).with_faction("party"));
    s.add_combatant(Combatant::new("guard", 20).with_faction("city"));
    s.statuses().apply("hidden", None, &id("rogue"), None);

    s.declare_attack(
        &AttackRequest::ranged("rogue", "guard", 4),
        &DamageRequest::new("guard", 1, 6, 2).by("rogue"),
        Some("piercing"),
    )
    .unwrap();

    assert!(!s.statuses().has_status(&id("rogue"), "hidden"));
}

#[test]
fn test_group_removal() {
    let s = session(10);
    s.add_combatant(Combatant::new("monk", 30));
    s.statuses().apply("paralyzed", None, &id("monk"), None);
    s.statuses().apply("hold_person", None, &id("monk"), None);
    s.statuses().apply("blessed", None, &id("monk"), None);

    assert!(s.statuses().remove(&id("monk"), "group:paralysis"));
    let left: Vec<String> = s
        .statuses()
        .active_statuses(&id("monk"))
        .into_iter()
        .map(|i| i.definition_id)
        .collect();
    assert_eq!(left, vec!["blessed".to_string()]);
}

#[test]
fn test_regeneration_ends_on_damage() {
    let s = session(10);
    s.add_combatant(Combatant::new("troll", 40));
    s.statuses().apply("regenerating", None, &id("troll"), None);
    s.deal_damage(None, &id("troll"), 10, Some("fire"));
    assert!(!s.statuses().has_status(&id("troll"), "regenerating"));
}

#[test]
fn test_tick_effect_chain_applies_other_status() {
    let s = session(10);
    s.add_combatant(Combatant::new("druid", 25));
    s.statuses().register(
        StatusDefinition::new("smouldering")
            .lasting(DurationType::Turns, 1)
            .with_tick(StatusEffectAction::ApplyStatus {
                status_id: "burning".into(),
                duration: Some(2),
                on_source: false,
            }),
    );
    s.statuses().apply("smouldering", None, &id("druid"), None);
    s.end_turn(&id("druid"));

    assert!(!s.statuses().has_status(&id("druid"), "smouldering"));
    let burning = s.statuses().active_statuses(&id("druid"));
    assert_eq!(burning.len(), 1);
    assert_eq!(burning[0].remaining_duration, 2);
}

#[test]
fn test_round_status_does_not_tick_at_turn_end() {
    let s = session(10);
    s.add_combatant(Combatant::new("orc", 30));
    s.statuses().register(
        StatusDefinition::new("fog_burn")
            .lasting(DurationType::Rounds, 10)
            .with_tick(StatusEffectAction::DealDamage {
                amount: 3,
                damage_type: Some("acid".into()),
            }),
    );
    s.statuses().apply("fog_burn", None, &id("orc"), None);

    for _ in 0..2 {
        s.begin_turn(&id("orc"));
        s.end_turn(&id("orc"));
    }

    assert_eq!(s.combatant(&id("orc")).unwrap().hp, 30);
    assert_eq!(s.log().count(&RuleEventType::StatusTicked), 0);
    assert_eq!(s.statuses().active_statuses(&id("orc"))[0].remaining_duration, 10);
}

#[test]
fn test_silent_round_trip_matches_and_stays_quiet() {
    let s = session(1);
    s.add_combatant(Combatant::new("a", 30));
    s.add_combatant(Combatant::new("b", 30));
    s.statuses().apply("burning", None, &id("a"), None);
    s.statuses().apply("burning", None, &id("a"), None);
    s.statuses().apply("poisoned", Some(&id("b")), &id("a"), Some(7));
    s.statuses().apply("blessed", None, &id("b"), None);
    s.end_turn(&id("a"));

    let exported = s.statuses().export_state();

    let fresh = session(10);
    fresh.add_combatant(Combatant::new("a", 30));
    fresh.add_combatant(Combatant::new("b", 30));
    assert_eq!(fresh.statuses().import_state(&exported, ImportMode::Silent), exported.len());

    assert_eq!(fresh.statuses().export_state(), exported);
    assert_eq!(fresh.log().count(&RuleEventType::StatusApplied), 0);
    assert_eq!(fresh.rules().armor_class(&id("a"), &Default::default()), 10);
}

#[test]
fn test_replay_import_fires_events() {
    let s = session(10);
    s.add_combatant(Combatant::new("a", 30));
    s.statuses().apply("blessed", None, &id("a"), None);
    let exported = s.statuses().export_state();

    let fresh = session(10);
    fresh.add_combatant(Combatant::new("a", 30));
    fresh.statuses().import_state(&exported, ImportMode::Replay);
    assert_eq!(fresh.log().count(&RuleEventType::StatusApplied), 1);
    assert!(fresh.statuses().has_status(&id("a"), "blessed"));
}
