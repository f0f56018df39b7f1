//! Rule windows: hooks that adjust a roll before it is made
//!
//! Feats and similar static rules plug in here instead of being hard-coded
//! into the engine that asked for the roll.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use super::modifiers::RollModifiers;
use crate::combat::{Combatant, Feat};

/// Tag carried by concentration saves
pub const CONCENTRATION_TAG: &str = "concentration";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RuleWindow {
    BeforeAttackRoll,
    BeforeSavingThrow,
    BeforeDamage,
}

/// The roll being prepared, as seen by providers
pub struct WindowContext<'a> {
    pub window: RuleWindow,
    /// The combatant rolling (attacker, or the one saving)
    pub roller: Option<&'a Combatant>,
    /// The other party (attack target, or whoever caused the save)
    pub other: Option<&'a Combatant>,
    pub tags: &'a BTreeSet<String>,
    pub modifiers: &'a mut RollModifiers,
}

pub trait RuleProvider {
    fn id(&self) -> &str;

    /// Windows this provider listens to
    fn windows(&self) -> &[RuleWindow];

    fn apply(&self, ctx: &mut WindowContext<'_>);
}

/// Advantage on concentration saves for War Caster holders
#[derive(Debug, Default)]
pub struct WarCasterProvider;

impl RuleProvider for WarCasterProvider {
    fn id(&self) -> &str {
        "war_caster"
    }

    fn windows(&self) -> &[RuleWindow] {
        &[RuleWindow::BeforeSavingThrow]
    }

    fn apply(&self, ctx: &mut WindowContext<'_>) {
        if !ctx.tags.contains(CONCENTRATION_TAG) {
            return;
        }
        if ctx.roller.is_some_and(|c| c.has_feat(Feat::WarCaster)) {
            ctx.modifiers.grant_advantage(self.id());
        }
    }
}

/// Disadvantage on concentration saves forced by a Mage Slayer's damage
#[derive(Debug, Default)]
pub struct MageSlayerProvider;

impl RuleProvider for MageSlayerProvider {
    fn id(&self) -> &str {
        "mage_slayer"
    }

    fn windows(&self) -> &[RuleWindow] {
        &[RuleWindow::BeforeSavingThrow]
    }

    fn apply(&self, ctx: &mut WindowContext<'_>) {
        if !ctx.tags.contains(CONCENTRATION_TAG) {
            return;
        }
        if ctx.other.is_some_and(|c| c.has_feat(Feat::MageSlayer)) {
            ctx.modifiers.impose_disadvantage(self.id());
        }
    }
}
