//! Data pack integration tests
//!
//! Packs loaded from disk, layered over the core pack and installed into a
//! session.

use std::fs;
use std::path::PathBuf;
use std::rc::Rc;

use skirmish_rules::combat::Combatant;
use skirmish_rules::core::config::RulesConfig;
use skirmish_rules::core::error::RulesError;
use skirmish_rules::core::types::CombatantId;
use skirmish_rules::data::{core_pack, DataPack, RecordKind};
use skirmish_rules::rules::{AttackRequest, DamageRequest, Resolver, ScriptedResolver};
use skirmish_rules::status::DurationType;
use skirmish_rules::CombatSession;

const HOMEBREW: &str = r#"
[[status]]
id = "warded"
display_name = "Warded"
duration = "Rounds(2)"
tags = "Buff;magic"
boosts = "AC(2)"

[[status]]
id = "blessed"
duration = "Rounds(1)"
stacking = "Refresh"
tags = "Buff"
boosts = "Attack(1)"

[[status]]
id = "cursed"
boosts = "AC(-1"

[[reaction]]
id = "riposte"
display_name = "Riposte"
triggers = "YouAreAttacked"
priority = 15
tags = "NotSelf;melee"
functors = ["ModifyRoll(-2)"]
"#;

fn scratch_dir(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("skirmish_rules_{}_{}", name, std::process::id()));
    let _ = fs::remove_dir_all(&dir);
    fs::create_dir_all(&dir).unwrap();
    dir
}

fn session(d20: u32) -> CombatSession {
    let resolver: Rc<dyn Resolver> = Rc::new(ScriptedResolver::always(d20));
    CombatSession::with_resolver(RulesConfig::default(), resolver).unwrap()
}

fn id(raw: &str) -> CombatantId {
    CombatantId::new(raw)
}

#[test]
fn test_load_file_keeps_good_records() {
    let dir = scratch_dir("file");
    let path = dir.join("homebrew.toml");
    fs::write(&path, HOMEBREW).unwrap();

    let pack = DataPack::load(&path).unwrap();
    assert_eq!(pack.statuses.len(), 2);
    assert_eq!(pack.reactions.len(), 1);
    assert_eq!(pack.skipped.len(), 1);
    assert_eq!(pack.skipped[0].id, "cursed");
    assert_eq!(pack.skipped[0].kind, RecordKind::Status);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_load_dir_merges_in_name_order() {
    let dir = scratch_dir("dir");
    fs::write(dir.join("10_core.toml"), "[[status]]\nid = \"marked\"\nduration = \"Turns(1)\"\n").unwrap();
    fs::write(dir.join("20_override.toml"), "[[status]]\nid = \"marked\"\nduration = \"Turns(4)\"\n").unwrap();
    fs::write(dir.join("notes.txt"), "not a pack").unwrap();

    let pack = DataPack::load_dir(&dir).unwrap();
    assert_eq!(pack.statuses.len(), 2);
    let marked = pack.status("marked").unwrap();
    assert_eq!(marked.duration_type, DurationType::Turns);
    assert_eq!(marked.default_duration, 4);

    let _ = fs::remove_dir_all(&dir);
}

#[test]
fn test_missing_file_is_an_io_error() {
    let path = std::env::temp_dir().join("skirmish_rules_does_not_exist.toml");
    assert!(matches!(DataPack::load(&path), Err(RulesError::IoError(_))));
}

#[test]
fn test_layered_pack_overrides_core_status() {
    let mut pack = core_pack().unwrap();
    pack.merge(DataPack::from_toml_str(HOMEBREW).unwrap());

    let s = session(10);
    s.load_pack(&pack).unwrap();
    let blessed = s.statuses().definition("blessed").unwrap();
    assert_eq!(blessed.default_duration, 1);

    s.add_combatant(Combatant::new("paladin", 30).with_armor_class(16));
    s.statuses().apply("warded", None, &id("paladin"), None);
    assert_eq!(s.rules().armor_class(&id("paladin"), &Default::default()), 18);
}

#[test]
fn test_duplicate_reaction_across_packs_fails_install() {
    let mut pack = core_pack().unwrap();
    pack.merge(
        DataPack::from_toml_str(
            "[[reaction]]\nid = \"Shield\"\ntriggers = \"YouAreAttacked\"\nfunctors = [\"ApplyBoost(shield_boost)\"]\n",
        )
        .unwrap(),
    );

    let s = session(10);
    assert!(matches!(s.load_pack(&pack), Err(RulesError::DuplicateReaction(_))));
}

#[test]
fn test_loaded_reaction_fires_in_session() {
    let mut pack = core_pack().unwrap();
    pack.merge(DataPack::from_toml_str(HOMEBREW).unwrap());
    let s = session(11);
    s.load_pack(&pack).unwrap();

    s.add_combatant(Combatant::new("duelist", 25).with_faction("party").with_armor_class(13));
    s.add_combatant(Combatant::new("brigand", 20).with_faction("bandits"));
    s.grant_reactions(&id("duelist"), &["riposte"]).unwrap();

    // 11 + 2 = 13 would hit AC 13; riposte takes 2 off
    let report = s
        .declare_attack(
            &AttackRequest::melee("brigand", "duelist", 2),
            &DamageRequest::new("duelist", 1, 6, 1).by("brigand"),
            Some("slashing"),
        )
        .unwrap();
    assert_eq!(report.reactions.len(), 1);
    assert!(!report.outcome.unwrap().hit);
    assert_eq!(s.combatant(&id("duelist")).unwrap().hp, 25);
}
