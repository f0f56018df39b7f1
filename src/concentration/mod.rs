//! Concentration: one sustained effect per combatant

pub mod engine;
pub mod info;

pub use engine::{ConcentrationEngine, SurfaceRemover, CONCENTRATION_PRIORITY, SURFACE_ACTIONS};
pub use info::{BreakReason, ConcentrationInfo, LinkedEffect};
