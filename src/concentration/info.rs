//! Concentration records

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::types::{CombatantId, Tick};

/// A status instance or battlefield surface that ends with the concentration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LinkedEffect {
    pub status_id: String,
    pub target_id: CombatantId,
    #[serde(default)]
    pub status_instance_id: Option<u64>,
    #[serde(default)]
    pub surface_instance_id: Option<String>,
}

impl LinkedEffect {
    pub fn status(status_id: impl Into<String>, target: impl Into<CombatantId>, instance_id: u64) -> Self {
        Self {
            status_id: status_id.into(),
            target_id: target.into(),
            status_instance_id: Some(instance_id),
            surface_instance_id: None,
        }
    }

    pub fn surface(surface_id: impl Into<String>, owner: impl Into<CombatantId>) -> Self {
        Self {
            status_id: String::new(),
            target_id: owner.into(),
            status_instance_id: None,
            surface_instance_id: Some(surface_id.into()),
        }
    }
}

/// One combatant's ongoing concentration; doubles as its snapshot form
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConcentrationInfo {
    pub combatant_id: CombatantId,
    pub action_id: String,
    /// Status the effect applies; empty for pure surface effects
    pub status_id: String,
    pub target_id: Option<CombatantId>,
    #[serde(default)]
    pub started_at: Tick,
    #[serde(default)]
    pub linked_effects: Vec<LinkedEffect>,
}

impl ConcentrationInfo {
    pub fn new(
        combatant: impl Into<CombatantId>,
        action_id: impl Into<String>,
        status_id: impl Into<String>,
    ) -> Self {
        Self {
            combatant_id: combatant.into(),
            action_id: action_id.into(),
            status_id: status_id.into(),
            target_id: None,
            started_at: 0,
            linked_effects: Vec::new(),
        }
    }

    pub fn targeting(mut self, target: impl Into<CombatantId>) -> Self {
        self.target_id = Some(target.into());
        self
    }

    pub fn linked(mut self, effect: LinkedEffect) -> Self {
        self.linked_effects.push(effect);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BreakReason {
    /// Failed the damage save, or dropped to zero
    Damage,
    /// Failed the save forced by being knocked prone
    Prone,
    Incapacitated,
    Death,
    /// Started concentrating on something else
    Replaced,
    Voluntary,
    CombatEnded,
}

impl BreakReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            BreakReason::Damage => "damage",
            BreakReason::Prone => "prone",
            BreakReason::Incapacitated => "incapacitated",
            BreakReason::Death => "death",
            BreakReason::Replaced => "replaced",
            BreakReason::Voluntary => "voluntary",
            BreakReason::CombatEnded => "combat_ended",
        }
    }
}

impl fmt::Display for BreakReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
