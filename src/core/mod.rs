pub mod config;
pub mod error;
pub mod rng;
pub mod types;

pub use config::RulesConfig;
pub use error::{Result, RulesError};
pub use rng::SessionRng;
pub use types::{Ability, CombatClock, CombatantId, Tick, Vec2};
