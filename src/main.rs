//! Skirmish Sim
//!
//! Runs a short scripted encounter through the rules core and prints the
//! event log and the final snapshot.

use clap::Parser;
use serde::Serialize;
use std::path::PathBuf;

use skirmish_rules::combat::{Combatant, Feat};
use skirmish_rules::core::config::RulesConfig;
use skirmish_rules::core::error::Result;
use skirmish_rules::core::types::{Ability, CombatantId, Vec2};
use skirmish_rules::data::{core_pack, DataPack};
use skirmish_rules::rules::{AttackRequest, DamageRequest};
use skirmish_rules::{CombatSession, SessionSnapshot, SpellCast};

/// Skirmish Sim - scripted encounter over the rules core
#[derive(Parser, Debug)]
#[command(name = "skirmish-sim")]
#[command(about = "Run a scripted encounter and dump the event log and snapshot")]
struct Args {
    /// Rules config (TOML); defaults apply when omitted
    #[arg(long)]
    config: Option<PathBuf>,

    /// Extra data pack (TOML) loaded on top of the core pack
    #[arg(long)]
    pack: Option<PathBuf>,

    /// Random seed for deterministic runs
    #[arg(long)]
    seed: Option<u64>,

    /// Rounds to play
    #[arg(long, default_value_t = 3)]
    rounds: u32,

    /// Output format: json or text
    #[arg(long, default_value = "text")]
    format: String,
}

#[derive(Serialize)]
struct SimOutput {
    seed: u64,
    events: Vec<String>,
    snapshot: SessionSnapshot,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("skirmish_rules=info")),
        )
        .init();

    let args = Args::parse();

    let mut config = match &args.config {
        Some(path) => RulesConfig::load(path)?,
        None => RulesConfig::default(),
    };
    if args.seed.is_some() {
        config.rng_seed = args.seed;
    }

    let session = CombatSession::new(config)?;
    let mut pack = core_pack()?;
    if let Some(path) = &args.pack {
        pack.merge(DataPack::load(path)?);
    }
    for skipped in &pack.skipped {
        tracing::warn!(id = %skipped.id, reason = %skipped.reason, "Skipped record");
    }
    session.load_pack(&pack)?;

    run_encounter(&session, args.rounds)?;

    let output = SimOutput {
        seed: session.rng().seed(),
        events: session
            .log()
            .events()
            .iter()
            .map(|e| {
                let source = e.source_id.as_ref().map_or("-", |s| s.as_str());
                let target = e.target_id.as_ref().map_or("-", |t| t.as_str());
                format!("#{} {} {} -> {} ({})", e.event_id, e.event_type, source, target, e.final_value)
            })
            .collect(),
        snapshot: session.export_state(),
    };

    match args.format.as_str() {
        "json" => println!("{}", serde_json::to_string_pretty(&output)?),
        _ => {
            println!("=== SKIRMISH SIM (seed {}) ===", output.seed);
            for line in &output.events {
                println!("  {}", line);
            }
            println!();
            println!("{}", output.snapshot.to_json()?);
        }
    }
    Ok(())
}

/// A cleric holds an ogre while a wizard and an archer trade blows with it
fn run_encounter(session: &CombatSession, rounds: u32) -> Result<()> {
    let cleric = CombatantId::new("cleric");
    let wizard = CombatantId::new("wizard");
    let ogre = CombatantId::new("ogre");

    session.add_combatant(
        Combatant::new("cleric", 27)
            .with_name("Cleric")
            .with_faction("party")
            .with_armor_class(18)
            .with_ability(Ability::Wisdom, 16)
            .with_ability(Ability::Constitution, 14)
            .with_spell_slots(1, 4)
            .with_spell_slots(2, 3)
            .with_feat(Feat::WarCaster)
            .at(0.0, 0.0),
    );
    session.add_combatant(
        Combatant::new("wizard", 18)
            .with_name("Wizard")
            .with_faction("party")
            .with_armor_class(12)
            .with_ability(Ability::Intelligence, 17)
            .with_spell_slots(1, 4)
            .with_spell_slots(3, 2)
            .at(3.0, 0.0),
    );
    session.add_combatant(
        Combatant::new("ogre", 59)
            .with_name("Ogre")
            .with_faction("monsters")
            .with_armor_class(11)
            .with_ability(Ability::Strength, 19)
            .at(1.0, 0.0),
    );

    session.grant_reactions(&wizard, &["shield", "counterspell"])?;
    session.grant_reactions(&ogre, &["opportunity_attack"])?;

    for _ in 0..rounds {
        session.begin_turn(&cleric);
        if !session.concentration().is_concentrating(&cleric) {
            session.cast_spell(
                &SpellCast::new("cleric", "hold_person")
                    .at_level(2)
                    .targeting("ogre")
                    .applying("hold_person", None)
                    .concentrating()
                    .with_save(Ability::Wisdom, 13),
            )?;
        }
        session.end_turn(&cleric);

        session.begin_turn(&wizard);
        session.move_combatant(&wizard, Vec2::new(6.0, 0.0));
        session.declare_attack(
            &AttackRequest::ranged("wizard", "ogre", 5).with_tag("spell"),
            &DamageRequest::new("ogre", 1, 10, 0).by("wizard"),
            Some("fire"),
        )?;
        session.end_turn(&wizard);

        session.begin_turn(&ogre);
        let ogre_can_act = session.combatant(&ogre).is_some_and(|o| o.can_act())
            && !session.rules().conditions_of(&ogre, false).incapacitated;
        if ogre_can_act {
            session.declare_attack(
                &AttackRequest::melee("ogre", "cleric", 6),
                &DamageRequest::new("cleric", 2, 8, 4).by("ogre"),
                Some("bludgeoning"),
            )?;
        }
        session.end_turn(&ogre);

        session.end_round();
    }

    let queued = session.drain_queued_actions();
    tracing::info!(queued = queued.len(), "Encounter finished");
    Ok(())
}
