//! Rules configuration with documented constants
//!
//! All tunable numbers are collected here with explanations of their purpose
//! and how they interact with each other.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::core::error::{Result, RulesError};

/// Configuration for the rules engines of one combat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    // === RESOLUTION STACK ===
    /// Maximum nesting of interrupted actions
    ///
    /// Reaction chains that re-trigger each other stop here with a hard
    /// error instead of recursing forever.
    pub max_resolution_depth: usize,

    // === EVENT BUS ===
    /// Maximum nesting of reentrant dispatches
    ///
    /// A status whose removal re-applies itself would otherwise recurse
    /// without bound. Dispatches deeper than this are refused and logged.
    pub max_event_depth: usize,

    /// Number of dispatched events kept by the event log
    pub event_log_capacity: usize,

    // === STATUS ENGINE ===
    /// DC used by repeat saves whose definition gives no explicit DC
    pub default_repeat_save_dc: i32,

    // === CONCENTRATION ===
    /// Floor for the damage concentration save (DC = max(this, damage / 2))
    pub concentration_min_dc: i32,

    /// Fixed DC of the save forced by being knocked prone
    pub prone_concentration_dc: i32,

    // === REACTIONS ===
    /// Reject grants of unregistered reaction ids instead of ignoring them
    ///
    /// Meant for development and tests where a typo should fail fast.
    pub strict_reaction_grants: bool,

    /// Seconds a human decision-maker gets to answer a reaction prompt
    pub prompt_time_limit_secs: f32,

    /// Reactions available to each combatant per round
    pub reaction_budget_per_round: u32,

    // === DETERMINISM ===
    /// Seed for the session RNG (None = fixed default seed 0)
    pub rng_seed: Option<u64>,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            max_resolution_depth: 10,
            max_event_depth: 64,
            event_log_capacity: 256,
            default_repeat_save_dc: 13,
            concentration_min_dc: 10,
            prone_concentration_dc: 10,
            strict_reaction_grants: false,
            prompt_time_limit_secs: 30.0,
            reaction_budget_per_round: 1,
            rng_seed: None,
        }
    }
}

impl RulesConfig {
    /// Create a new config with default values
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a config from TOML text; missing keys keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: RulesConfig = toml::from_str(content)?;
        config.validate().map_err(RulesError::InvalidConfig)?;
        Ok(config)
    }

    /// Load a config file from disk
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Validate configuration for internal consistency
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_resolution_depth == 0 {
            return Err("max_resolution_depth must be at least 1".into());
        }

        if self.max_event_depth < self.max_resolution_depth {
            return Err(format!(
                "max_event_depth ({}) should be >= max_resolution_depth ({})",
                self.max_event_depth, self.max_resolution_depth
            ));
        }

        if self.concentration_min_dc <= 0 || self.prone_concentration_dc <= 0 {
            return Err("Concentration DCs must be positive".into());
        }

        if self.prompt_time_limit_secs < 0.0 {
            return Err("prompt_time_limit_secs cannot be negative".into());
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = RulesConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.max_resolution_depth, 10);
        assert_eq!(config.default_repeat_save_dc, 13);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = RulesConfig::from_toml_str("strict_reaction_grants = true\nrng_seed = 7\n")
            .expect("valid toml");
        assert!(config.strict_reaction_grants);
        assert_eq!(config.rng_seed, Some(7));
        assert_eq!(config.concentration_min_dc, 10);
    }

    #[test]
    fn test_zero_depth_rejected() {
        let result = RulesConfig::from_toml_str("max_resolution_depth = 0\n");
        assert!(matches!(result, Err(RulesError::InvalidConfig(_))));
    }

    #[test]
    fn test_event_depth_must_cover_stack_depth() {
        let config = RulesConfig {
            max_event_depth: 4,
            ..RulesConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
