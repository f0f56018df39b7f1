//! Legacy reaction ids and their canonical forms

use ahash::AHashMap;
use serde::Serialize;
use std::fmt;

/// A reaction id that has been through the alias table
///
/// Only `AliasTable::resolve` builds these, so holding one means the id is
/// canonical.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct ReactionId(String);

impl ReactionId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<str> for ReactionId {
    fn eq(&self, other: &str) -> bool {
        self.0 == other
    }
}

impl PartialEq<&str> for ReactionId {
    fn eq(&self, other: &&str) -> bool {
        self.0 == *other
    }
}

fn normalize(raw: &str) -> String {
    raw.trim().to_ascii_lowercase().replace([' ', '-'], "_")
}

/// Bidirectional legacy <-> canonical map, case-insensitive on input
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    to_canonical: AHashMap<String, String>,
    to_legacy: AHashMap<String, Vec<String>>,
}

impl AliasTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Aliases carried by older data packs
    pub fn standard() -> Self {
        let mut table = Self::new();
        for (legacy, canonical) in [
            ("attack_of_opportunity", "opportunity_attack"),
            ("aoo", "opportunity_attack"),
            ("opportunityattack", "opportunity_attack"),
            ("reaction_counterspell", "counterspell"),
            ("counter_spell", "counterspell"),
            ("shield_spell", "shield"),
            ("reaction_shield", "shield"),
            ("uncannydodge", "uncanny_dodge"),
            ("hellishrebuke", "hellish_rebuke"),
        ] {
            table.add(legacy, canonical);
        }
        table
    }

    pub fn add(&mut self, legacy: &str, canonical: &str) {
        let legacy = normalize(legacy);
        let canonical = normalize(canonical);
        if legacy == canonical {
            return;
        }
        let reverse = self.to_legacy.entry(canonical.clone()).or_default();
        if !reverse.contains(&legacy) {
            reverse.push(legacy.clone());
        }
        self.to_canonical.insert(legacy, canonical);
    }

    /// Canonical id for any spelling
    pub fn resolve(&self, raw: &str) -> ReactionId {
        let key = normalize(raw);
        match self.to_canonical.get(&key) {
            Some(canonical) => ReactionId(canonical.clone()),
            None => ReactionId(key),
        }
    }

    pub fn is_alias(&self, raw: &str) -> bool {
        self.to_canonical.contains_key(&normalize(raw))
    }

    /// Legacy spellings known for a canonical id
    pub fn legacy_names(&self, canonical: &ReactionId) -> Vec<String> {
        self.to_legacy
            .get(canonical.as_str())
            .cloned()
            .unwrap_or_default()
    }
}
