//! Typed publish/subscribe for rules events

pub mod bus;
pub mod log;
pub mod rule_event;

pub use bus::{EventBus, Handler, SubscriptionId};
pub use log::EventLog;
pub use rule_event::{keys, EventValue, RuleEvent, RuleEventType};
