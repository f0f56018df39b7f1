//! Condition mechanics table
//!
//! Static mapping from condition identity to mechanical flags, plus the
//! aggregation used by roll resolution and reaction eligibility.

pub mod aggregate;
pub mod mechanics;

pub use aggregate::{aggregate, is_incapacitated, AggregateEffects};
pub use mechanics::{condition_of, mechanics_of, ConditionMechanics, ConditionType};
