//! Modifier pipeline and the dice resolver contract

pub mod engine;
pub mod modifiers;
pub mod query;
pub mod resolver;
pub mod windows;

pub use engine::{
    AttackOutcome, AttackRequest, DamageRequest, RulesEngine, SaveRequest, StatusQuery,
};
pub use modifiers::{
    ContextPredicate, Modifier, ModifierKind, ModifierRegistry, ModifierSpec, ModifierTarget,
    RollModifiers,
};
pub use query::{QueryInput, QueryResult, QueryType};
pub use resolver::{DiceResolver, Resolver, ScriptedResolver};
pub use windows::{
    MageSlayerProvider, RuleProvider, RuleWindow, WarCasterProvider, WindowContext,
    CONCENTRATION_TAG,
};
