//! Reaction engine: interrupts offered at trigger windows

pub mod alias;
pub mod context;
pub mod definition;
pub mod engine;
pub mod prompt;

pub use alias::{AliasTable, ReactionId};
pub use context::{ReactionContext, CANCELLED_BY, DAMAGE_MULTIPLIER};
pub use definition::{
    infer_resource, AiPolicy, ReactionDefinition, ReactionEffect, ReactionFlag, ReactionResource,
    ReactionTrigger,
};
pub use engine::{PolicyDecider, QueuedAction, QueuedKind, ReactionEngine};
pub use prompt::{FixedAnswer, OfferOutcome, ReactionDecider, ReactionPrompt};
