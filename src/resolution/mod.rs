//! Bounded stack of interrupted actions

pub mod stack;

pub use stack::{ResolutionStack, StackItem};
