//! Load definition packs from TOML and register them into the engines

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, warn};

use super::record::DefinitionRecord;
use crate::core::error::{Result, RulesError};
use crate::reactions::{ReactionDefinition, ReactionEngine};
use crate::status::{StatusDefinition, StatusEngine};

const CORE_PACK: &str = include_str!("core_pack.toml");

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordKind {
    Status,
    Reaction,
}

/// A record that failed to convert and was left out of the pack
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkippedRecord {
    pub id: String,
    pub kind: RecordKind,
    pub reason: String,
}

#[derive(Debug, Default, Deserialize)]
struct PackFile {
    #[serde(default)]
    status: Vec<toml::Value>,
    #[serde(default)]
    reaction: Vec<toml::Value>,
}

/// Converted definitions, ready to install
#[derive(Debug, Clone, Default)]
pub struct DataPack {
    pub statuses: Vec<StatusDefinition>,
    pub reactions: Vec<ReactionDefinition>,
    pub skipped: Vec<SkippedRecord>,
}

impl DataPack {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a pack; bad records are skipped, bad TOML is an error
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let file: PackFile = toml::from_str(content)?;
        let mut pack = DataPack::new();

        for value in file.status {
            match decode(value, RecordKind::Status) {
                Ok(record) => pack.add_status_record(&record),
                Err(skipped) => pack.skip(skipped),
            }
        }
        for value in file.reaction {
            match decode(value, RecordKind::Reaction) {
                Ok(record) => pack.add_reaction_record(&record),
                Err(skipped) => pack.skip(skipped),
            }
        }

        debug!(
            target: "rules::data",
            statuses = pack.statuses.len(),
            reactions = pack.reactions.len(),
            skipped = pack.skipped.len(),
            "Parsed data pack"
        );
        Ok(pack)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Every `*.toml` file in `dir`, merged in file-name order
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let mut paths: Vec<_> = fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        paths.sort();

        let mut pack = DataPack::new();
        for path in paths {
            pack.merge(Self::load(&path)?);
        }
        Ok(pack)
    }

    pub fn add_status_record(&mut self, record: &DefinitionRecord) {
        match record.to_status() {
            Ok(definition) => self.statuses.push(definition),
            Err(err) => self.skip(skipped_from(record, RecordKind::Status, err)),
        }
    }

    pub fn add_reaction_record(&mut self, record: &DefinitionRecord) {
        match record.to_reaction() {
            Ok(definition) => self.reactions.push(definition),
            Err(err) => self.skip(skipped_from(record, RecordKind::Reaction, err)),
        }
    }

    fn skip(&mut self, skipped: SkippedRecord) {
        warn!(
            target: "rules::data",
            id = %skipped.id,
            kind = ?skipped.kind,
            reason = %skipped.reason,
            "Skipping malformed record"
        );
        self.skipped.push(skipped);
    }

    /// Later packs win for statuses; reaction duplicates fail at install
    pub fn merge(&mut self, other: DataPack) {
        self.statuses.extend(other.statuses);
        self.reactions.extend(other.reactions);
        self.skipped.extend(other.skipped);
    }

    pub fn skipped_ids(&self) -> Vec<&str> {
        self.skipped.iter().map(|s| s.id.as_str()).collect()
    }

    pub fn status(&self, id: &str) -> Option<&StatusDefinition> {
        self.statuses.iter().rev().find(|d| d.id.eq_ignore_ascii_case(id))
    }

    pub fn reaction(&self, id: &str) -> Option<&ReactionDefinition> {
        self.reactions.iter().find(|d| d.id.eq_ignore_ascii_case(id))
    }

    /// Register everything; returns the number of definitions installed
    pub fn install(&self, statuses: &StatusEngine, reactions: &ReactionEngine) -> Result<usize> {
        for definition in &self.statuses {
            statuses.register(definition.clone());
        }
        for definition in &self.reactions {
            reactions.register(definition.clone())?;
        }
        Ok(self.statuses.len() + self.reactions.len())
    }
}

fn decode(value: toml::Value, kind: RecordKind) -> std::result::Result<DefinitionRecord, SkippedRecord> {
    let id = value
        .get("id")
        .and_then(|v| v.as_str())
        .unwrap_or("<unnamed>")
        .to_string();
    value.try_into::<DefinitionRecord>().map_err(|e| SkippedRecord {
        id,
        kind,
        reason: e.to_string(),
    })
}

fn skipped_from(record: &DefinitionRecord, kind: RecordKind, err: RulesError) -> SkippedRecord {
    let reason = match err {
        RulesError::MalformedRecord { reason, .. } => reason,
        other => other.to_string(),
    };
    let id = if record.id.trim().is_empty() {
        "<unnamed>".to_string()
    } else {
        record.id.clone()
    };
    SkippedRecord { id, kind, reason }
}

/// The standard statuses and reactions shipped with the crate
pub fn core_pack() -> Result<DataPack> {
    DataPack::from_toml_str(CORE_PACK)
}
