use thiserror::Error;

#[derive(Error, Debug)]
pub enum RulesError {
    #[error("Duplicate reaction registration: {0}")]
    DuplicateReaction(String),

    #[error("Unknown reaction: {0}")]
    UnknownReaction(String),

    #[error("Malformed record '{id}': {reason}")]
    MalformedRecord { id: String, reason: String },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Resolution stack overflow at depth {depth} (max {max_depth})")]
    StackOverflow { depth: usize, max_depth: usize },

    #[error("Handler failed: {0}")]
    Handler(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("Serialization error: {0}")]
    SerdeError(#[from] serde_json::Error),
}

impl RulesError {
    pub fn malformed(id: impl Into<String>, reason: impl Into<String>) -> Self {
        RulesError::MalformedRecord {
            id: id.into(),
            reason: reason.into(),
        }
    }

    /// Invariant-guard failures signal an engine bug rather than bad content
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, RulesError::StackOverflow { .. })
    }
}

pub type Result<T> = std::result::Result<T, RulesError>;
