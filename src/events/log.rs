//! Bounded history of dispatched events for UI snapshots and replays

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::bus::{EventBus, SubscriptionId};
use super::rule_event::{RuleEvent, RuleEventType};

/// Records every event after all other handlers have seen it
#[derive(Debug)]
pub struct EventLog {
    entries: RefCell<VecDeque<RuleEvent>>,
    capacity: usize,
}

impl EventLog {
    pub const OWNER: &'static str = "event_log";

    pub fn new(capacity: usize) -> Self {
        Self {
            entries: RefCell::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
        }
    }

    /// Subscribe the log to every event type at the lowest priority
    pub fn attach(log: &Rc<EventLog>, bus: &EventBus) -> SubscriptionId {
        let log = Rc::clone(log);
        bus.subscribe_all(i32::MAX, Self::OWNER, move |event| {
            log.record(event.clone());
            Ok(())
        })
    }

    pub fn record(&self, event: RuleEvent) {
        if self.capacity == 0 {
            return;
        }
        let mut entries = self.entries.borrow_mut();
        if entries.len() >= self.capacity {
            entries.pop_front(); // Remove oldest
        }
        entries.push_back(event);
    }

    pub fn len(&self) -> usize {
        self.entries.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.borrow().is_empty()
    }

    pub fn events(&self) -> Vec<RuleEvent> {
        self.entries.borrow().iter().cloned().collect()
    }

    pub fn of_type(&self, event_type: &RuleEventType) -> Vec<RuleEvent> {
        self.entries
            .borrow()
            .iter()
            .filter(|e| &e.event_type == event_type)
            .cloned()
            .collect()
    }

    pub fn count(&self, event_type: &RuleEventType) -> usize {
        self.entries
            .borrow()
            .iter()
            .filter(|e| &e.event_type == event_type)
            .count()
    }

    pub fn clear(&self) {
        self.entries.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_ring() {
        let log = EventLog::new(2);
        log.record(RuleEvent::new(RuleEventType::TurnStarted));
        log.record(RuleEvent::new(RuleEventType::TurnEnded));
        log.record(RuleEvent::new(RuleEventType::RoundEnded));
        assert_eq!(log.len(), 2);
        assert_eq!(log.events()[0].event_type, RuleEventType::TurnEnded);
    }

    #[test]
    fn test_log_sees_final_state() {
        let bus = EventBus::new();
        let log = Rc::new(EventLog::new(8));
        EventLog::attach(&log, &bus);
        bus.subscribe(RuleEventType::DamageTaken, 0, "halve", |event| {
            event.final_value /= 2.0;
            Ok(())
        });
        bus.publish(RuleEvent::new(RuleEventType::DamageTaken).with_value(10.0));
        let recorded = log.of_type(&RuleEventType::DamageTaken);
        assert_eq!(recorded.len(), 1);
        assert_eq!(recorded[0].final_value, 5.0);
    }
}
