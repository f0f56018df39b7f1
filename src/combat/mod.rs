//! Combatant model and the host resolver callback

pub mod combatant;
pub mod damage;
pub mod roster;

pub use combatant::{Combatant, Feat};
pub use damage::{apply_damage, apply_healing, HpChange};
pub use roster::{CombatantResolver, Roster};
