//! Skirmish Rules - deterministic rules core for turn-based tactical combat
//!
//! Statuses, reactions, the resolution stack and concentration, all driven
//! by one event bus.

pub mod combat;
pub mod concentration;
pub mod conditions;
pub mod core;
pub mod data;
pub mod events;
pub mod reactions;
pub mod resolution;
pub mod rules;
pub mod session;
pub mod status;

pub use session::{AttackReport, CombatSession, MoveReport, SessionSnapshot, SpellCast, SpellReport};
