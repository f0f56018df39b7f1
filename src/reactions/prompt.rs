//! Deferred reaction decisions

use serde::{Deserialize, Serialize};

use super::alias::ReactionId;
use super::context::ReactionContext;
use super::definition::ReactionDefinition;
use crate::core::types::{CombatantId, Tick};

/// A reaction offered to a human; terminal once resolved
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReactionPrompt {
    pub prompt_id: u64,
    pub reactor_id: CombatantId,
    pub reaction: ReactionId,
    pub context: ReactionContext,
    pub time_limit_secs: f32,
    pub created_at: Tick,
    pub is_resolved: bool,
    pub was_used: bool,
}

/// Answers whether an eligible reactor takes a reaction
///
/// `None` defers the decision: the engine opens a prompt and the caller
/// pauses the turn until `resolve_prompt` is called.
pub trait ReactionDecider {
    fn decide(
        &self,
        reactor: &CombatantId,
        reaction: &ReactionDefinition,
        context: &ReactionContext,
    ) -> Option<bool>;
}

impl<F> ReactionDecider for F
where
    F: Fn(&CombatantId, &ReactionDefinition, &ReactionContext) -> Option<bool>,
{
    fn decide(
        &self,
        reactor: &CombatantId,
        reaction: &ReactionDefinition,
        context: &ReactionContext,
    ) -> Option<bool> {
        self(reactor, reaction, context)
    }
}

/// Gives the same answer to every offer; `FixedAnswer(None)` prompts everyone
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FixedAnswer(pub Option<bool>);

impl ReactionDecider for FixedAnswer {
    fn decide(&self, _: &CombatantId, _: &ReactionDefinition, _: &ReactionContext) -> Option<bool> {
        self.0
    }
}

/// What `offer` did with the eligible reactors
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OfferOutcome {
    pub used: Vec<(CombatantId, ReactionId)>,
    pub declined: Vec<(CombatantId, ReactionId)>,
    pub prompted: Vec<u64>,
}

impl OfferOutcome {
    pub fn is_pending(&self) -> bool {
        !self.prompted.is_empty()
    }
}
