//! Priority-ordered synchronous event bus
//!
//! Handlers run in the caller's thread, ascending by priority, ties in
//! registration order. The subscription table is never borrowed while a
//! handler runs, so handlers may dispatch further events, subscribe or
//! unsubscribe. A handler that fails or panics is logged and counted; the
//! remaining handlers still run.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use tracing::{error, trace};

use super::rule_event::{RuleEvent, RuleEventType};
use crate::core::error::Result;

/// Handler invoked with the event being dispatched
pub type Handler = Rc<dyn Fn(&mut RuleEvent) -> Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

#[derive(Debug, Clone, PartialEq, Eq)]
enum EventFilter {
    Only(RuleEventType),
    Any,
}

impl EventFilter {
    fn matches(&self, event_type: &RuleEventType) -> bool {
        match self {
            EventFilter::Only(wanted) => wanted == event_type,
            EventFilter::Any => true,
        }
    }
}

struct Subscription {
    id: SubscriptionId,
    filter: EventFilter,
    priority: i32,
    owner: String,
    handler: Handler,
}

pub struct EventBus {
    subscriptions: RefCell<Vec<Subscription>>,
    next_subscription: Cell<u64>,
    next_event: Cell<u64>,
    depth: Cell<usize>,
    max_depth: usize,
    failures: Cell<u64>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_max_depth(64)
    }

    /// Creates a bus refusing dispatches nested deeper than `max_depth`
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            subscriptions: RefCell::new(Vec::new()),
            next_subscription: Cell::new(1),
            next_event: Cell::new(1),
            depth: Cell::new(0),
            max_depth,
            failures: Cell::new(0),
        }
    }

    /// Subscribe a handler to one event type
    pub fn subscribe<F>(
        &self,
        event_type: RuleEventType,
        priority: i32,
        owner: &str,
        handler: F,
    ) -> SubscriptionId
    where
        F: Fn(&mut RuleEvent) -> Result<()> + 'static,
    {
        self.insert(EventFilter::Only(event_type), priority, owner, Rc::new(handler))
    }

    /// Subscribe a handler to every event type
    pub fn subscribe_all<F>(&self, priority: i32, owner: &str, handler: F) -> SubscriptionId
    where
        F: Fn(&mut RuleEvent) -> Result<()> + 'static,
    {
        self.insert(EventFilter::Any, priority, owner, Rc::new(handler))
    }

    fn insert(
        &self,
        filter: EventFilter,
        priority: i32,
        owner: &str,
        handler: Handler,
    ) -> SubscriptionId {
        let id = SubscriptionId(self.next_subscription.get());
        self.next_subscription.set(id.0 + 1);
        self.subscriptions.borrow_mut().push(Subscription {
            id,
            filter,
            priority,
            owner: owner.to_string(),
            handler,
        });
        id
    }

    /// Remove one subscription. Returns false if it was not present.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Remove every subscription registered under `owner`
    pub fn unsubscribe_owner(&self, owner: &str) -> usize {
        let mut subs = self.subscriptions.borrow_mut();
        let before = subs.len();
        subs.retain(|s| s.owner != owner);
        before - subs.len()
    }

    pub fn is_subscribed(&self, id: SubscriptionId) -> bool {
        self.subscriptions.borrow().iter().any(|s| s.id == id)
    }

    /// Number of subscriptions that would receive this event type
    pub fn subscriber_count(&self, event_type: &RuleEventType) -> usize {
        self.subscriptions
            .borrow()
            .iter()
            .filter(|s| s.filter.matches(event_type))
            .count()
    }

    /// Total number of handler errors observed since creation
    pub fn handler_failures(&self) -> u64 {
        self.failures.get()
    }

    /// Current reentrant dispatch depth (0 outside of any dispatch)
    pub fn depth(&self) -> usize {
        self.depth.get()
    }

    /// Dispatch an event to all matching subscribers
    pub fn dispatch(&self, event: &mut RuleEvent) {
        if event.event_id == 0 {
            event.event_id = self.next_event.get();
            self.next_event.set(event.event_id + 1);
        }

        let depth = self.depth.get();
        if depth >= self.max_depth {
            error!(
                target: "rules::events",
                event = %event.event_type,
                depth,
                "Dispatch depth limit reached, dropping event"
            );
            return;
        }

        let mut matching: Vec<(i32, SubscriptionId, String, Handler)> = self
            .subscriptions
            .borrow()
            .iter()
            .filter(|s| s.filter.matches(&event.event_type))
            .map(|s| (s.priority, s.id, s.owner.clone(), Rc::clone(&s.handler)))
            .collect();
        matching.sort_by_key(|(priority, id, _, _)| (*priority, *id));

        trace!(
            target: "rules::events",
            event = %event.event_type,
            handlers = matching.len(),
            depth,
            "Dispatching"
        );

        self.depth.set(depth + 1);
        for (_, id, owner, handler) in matching {
            // Unsubscribed by an earlier handler of this same dispatch
            if !self.is_subscribed(id) {
                continue;
            }
            let failure = match panic::catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(Ok(())) => None,
                Ok(Err(e)) => Some(e.to_string()),
                Err(payload) => Some(panic_message(payload.as_ref())),
            };
            if let Some(reason) = failure {
                self.failures.set(self.failures.get() + 1);
                error!(
                    target: "rules::events",
                    event = %event.event_type,
                    owner = %owner,
                    error = %reason,
                    "Event handler failed, continuing"
                );
            }
        }
        self.depth.set(depth);
    }

    /// Dispatch an owned event and hand back its final state
    pub fn publish(&self, mut event: RuleEvent) -> RuleEvent {
        self.dispatch(&mut event);
        event
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        format!("panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<String>() {
        format!("panicked: {}", message)
    } else {
        "panicked".to_string()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::RulesError;

    fn recorder() -> Rc<RefCell<Vec<&'static str>>> {
        Rc::new(RefCell::new(Vec::new()))
    }

    #[test]
    fn test_priority_order_ascending() {
        let bus = EventBus::new();
        let seen = recorder();
        for (priority, name) in [(20, "late"), (5, "early"), (10, "middle")] {
            let seen = Rc::clone(&seen);
            bus.subscribe(RuleEventType::TurnEnded, priority, "test", move |_| {
                seen.borrow_mut().push(name);
                Ok(())
            });
        }
        bus.publish(RuleEvent::new(RuleEventType::TurnEnded));
        assert_eq!(*seen.borrow(), vec!["early", "middle", "late"]);
    }

    #[test]
    fn test_ties_fire_in_registration_order() {
        let bus = EventBus::new();
        let seen = recorder();
        for name in ["first", "second", "third"] {
            let seen = Rc::clone(&seen);
            bus.subscribe(RuleEventType::TurnEnded, 0, "test", move |_| {
                seen.borrow_mut().push(name);
                Ok(())
            });
        }
        bus.publish(RuleEvent::new(RuleEventType::TurnEnded));
        assert_eq!(*seen.borrow(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_failing_handler_does_not_stop_dispatch() {
        let bus = EventBus::new();
        let seen = recorder();
        bus.subscribe(RuleEventType::DamageTaken, 0, "broken", |_| {
            Err(RulesError::Handler("boom".into()))
        });
        let s = Rc::clone(&seen);
        bus.subscribe(RuleEventType::DamageTaken, 1, "healthy", move |_| {
            s.borrow_mut().push("ran");
            Ok(())
        });
        bus.publish(RuleEvent::new(RuleEventType::DamageTaken));
        assert_eq!(*seen.borrow(), vec!["ran"]);
        assert_eq!(bus.handler_failures(), 1);
    }

    #[test]
    fn test_panicking_handler_is_contained() {
        let bus = EventBus::new();
        let seen = recorder();
        bus.subscribe(RuleEventType::DamageTaken, 0, "panicky", |event| {
            event.final_value = 99.0;
            panic!("handler bug");
        });
        let s = Rc::clone(&seen);
        bus.subscribe(RuleEventType::DamageTaken, 1, "healthy", move |event| {
            assert_eq!(event.final_value, 99.0);
            s.borrow_mut().push("ran");
            Ok(())
        });

        bus.publish(RuleEvent::new(RuleEventType::DamageTaken));
        bus.publish(RuleEvent::new(RuleEventType::DamageTaken));
        assert_eq!(*seen.borrow(), vec!["ran", "ran"]);
        assert_eq!(bus.handler_failures(), 2);
    }

    #[test]
    fn test_later_handlers_observe_mutation() {
        let bus = EventBus::new();
        bus.subscribe(RuleEventType::DamageTaken, 0, "halve", |event| {
            event.final_value /= 2.0;
            Ok(())
        });
        bus.subscribe(RuleEventType::DamageTaken, 1, "cancel", |event| {
            if event.final_value < 10.0 {
                event.cancel();
            }
            Ok(())
        });
        let event = bus.publish(
            RuleEvent::new(RuleEventType::DamageTaken)
                .with_value(16.0)
                .cancellable(),
        );
        assert_eq!(event.final_value, 8.0);
        assert!(event.is_cancelled());
    }

    #[test]
    fn test_unsubscribe_owner_bulk() {
        let bus = EventBus::new();
        bus.subscribe(RuleEventType::TurnEnded, 0, "status", |_| Ok(()));
        bus.subscribe(RuleEventType::DamageTaken, 0, "status", |_| Ok(()));
        let kept = bus.subscribe(RuleEventType::TurnEnded, 0, "other", |_| Ok(()));
        assert_eq!(bus.unsubscribe_owner("status"), 2);
        assert_eq!(bus.subscriber_count(&RuleEventType::TurnEnded), 1);
        assert!(bus.is_subscribed(kept));
        assert!(bus.unsubscribe(kept));
        assert!(!bus.unsubscribe(kept));
    }

    #[test]
    fn test_reentrant_dispatch_and_depth_guard() {
        let bus = Rc::new(EventBus::with_max_depth(3));
        let count = Rc::new(Cell::new(0u32));
        let weak = Rc::downgrade(&bus);
        let c = Rc::clone(&count);
        bus.subscribe(RuleEventType::Custom("loop".into()), 0, "loop", move |_| {
            c.set(c.get() + 1);
            if let Some(bus) = weak.upgrade() {
                bus.publish(RuleEvent::new(RuleEventType::Custom("loop".into())));
            }
            Ok(())
        });
        bus.publish(RuleEvent::new(RuleEventType::Custom("loop".into())));
        assert_eq!(count.get(), 3);
        assert_eq!(bus.depth(), 0);
    }

    #[test]
    fn test_handler_unsubscribed_mid_dispatch_is_skipped() {
        let bus = Rc::new(EventBus::new());
        let seen = recorder();
        let victim = Rc::new(Cell::new(SubscriptionId(0)));
        let weak = Rc::downgrade(&bus);
        let v = Rc::clone(&victim);
        bus.subscribe(RuleEventType::TurnEnded, 0, "killer", move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.unsubscribe(v.get());
            }
            Ok(())
        });
        let s = Rc::clone(&seen);
        victim.set(bus.subscribe(RuleEventType::TurnEnded, 1, "victim", move |_| {
            s.borrow_mut().push("victim");
            Ok(())
        }));
        bus.publish(RuleEvent::new(RuleEventType::TurnEnded));
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_event_ids_assigned() {
        let bus = EventBus::new();
        let a = bus.publish(RuleEvent::new(RuleEventType::TurnEnded));
        let b = bus.publish(RuleEvent::new(RuleEventType::TurnEnded));
        assert!(a.event_id > 0);
        assert_eq!(b.event_id, a.event_id + 1);
    }
}
