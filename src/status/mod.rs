//! Status effects: definitions, live instances and the engine driving them

pub mod definition;
pub mod engine;
pub mod immunity;
pub mod instance;

pub use definition::{
    DurationType, RepeatSave, StackingBehavior, StatusDefinition, StatusEffectAction, StatusFlag,
    TriggerPhase,
};
pub use engine::{ApplyOptions, InstanceRemap, StatusEngine};
pub use immunity::is_immune;
pub use instance::{ImportMode, StatusInstance, StatusSnapshot};
