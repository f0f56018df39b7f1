//! Runtime status records and their snapshot form

use serde::{Deserialize, Serialize};

use crate::core::types::{CombatantId, Tick};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusInstance {
    pub instance_id: u64,
    pub definition_id: String,
    pub source_id: Option<CombatantId>,
    pub target_id: CombatantId,
    pub remaining_duration: i32,
    pub stacks: u32,
    pub remaining_attack_count: u32,
    pub save_dc_override: Option<i32>,
    pub applied_at: Tick,
}

impl StatusInstance {
    /// Registry key of the modifiers this instance owns
    pub fn modifier_source(&self) -> String {
        format!("status:{}", self.instance_id)
    }

    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            id: self.instance_id,
            status_definition_id: self.definition_id.clone(),
            source_id: self.source_id.clone(),
            target_id: self.target_id.clone(),
            remaining_duration: self.remaining_duration,
            stack_count: self.stacks,
            remaining_attack_count: Some(self.remaining_attack_count),
            save_dc_override: self.save_dc_override,
            applied_at: self.applied_at,
        }
    }
}

/// Exported form of one status instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub id: u64,
    pub status_definition_id: String,
    pub source_id: Option<CombatantId>,
    pub target_id: CombatantId,
    pub remaining_duration: i32,
    pub stack_count: u32,
    #[serde(default)]
    pub remaining_attack_count: Option<u32>,
    #[serde(default)]
    pub save_dc_override: Option<i32>,
    #[serde(default)]
    pub applied_at: Tick,
}

/// How `import_state` rebuilds instances
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ImportMode {
    /// Restore state without firing any event or trigger effect
    Silent,
    /// Re-apply through the normal path, firing everything
    Replay,
}
