//! Resolution stack: actions currently being interrupted
//!
//! Depth is capped; a push past the cap is an engine bug (reactions that
//! keep re-triggering each other) and fails without touching the stack.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::core::error::{Result, RulesError};
use crate::core::types::CombatantId;
use crate::events::{EventValue, RuleEvent};

/// One action mid-resolution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StackItem {
    pub item_id: u64,
    pub action_type: String,
    pub event: Option<RuleEvent>,
    pub trigger_context: BTreeMap<String, EventValue>,
    pub source_id: CombatantId,
    pub target_id: Option<CombatantId>,
    pub is_cancelled: bool,
    /// Named adjustments recorded by interrupts
    pub modifiers: BTreeMap<String, f64>,
    /// 1 for the bottom item
    pub depth: usize,
}

impl StackItem {
    /// Items without an event carry nothing that forbids cancelling them
    pub fn is_cancellable(&self) -> bool {
        self.event.as_ref().map_or(true, |e| e.is_cancellable)
    }

    pub fn modifier_total(&self) -> f64 {
        self.modifiers.values().sum()
    }

    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<EventValue>) -> Self {
        self.trigger_context.insert(key.into(), value.into());
        self
    }
}

type Completion = Box<dyn FnOnce(&StackItem)>;

pub struct ResolutionStack {
    items: RefCell<Vec<StackItem>>,
    completions: RefCell<BTreeMap<u64, Vec<Completion>>>,
    next_item: Cell<u64>,
    max_depth: usize,
}

impl ResolutionStack {
    pub const DEFAULT_MAX_DEPTH: usize = 10;

    pub fn new() -> Self {
        Self::with_max_depth(Self::DEFAULT_MAX_DEPTH)
    }

    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            items: RefCell::new(Vec::new()),
            completions: RefCell::new(BTreeMap::new()),
            next_item: Cell::new(1),
            max_depth,
        }
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    pub fn depth(&self) -> usize {
        self.items.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.borrow().is_empty()
    }

    /// Start resolving an action on top of whatever is being interrupted
    pub fn push(
        &self,
        action_type: impl Into<String>,
        source: impl Into<CombatantId>,
        target: Option<CombatantId>,
        event: Option<RuleEvent>,
    ) -> Result<StackItem> {
        let depth = self.depth();
        if depth >= self.max_depth {
            let action_type = action_type.into();
            error!(
                target: "rules::stack",
                action = %action_type,
                depth,
                max_depth = self.max_depth,
                "Resolution stack overflow"
            );
            return Err(RulesError::StackOverflow {
                depth,
                max_depth: self.max_depth,
            });
        }

        let item_id = self.next_item.get();
        self.next_item.set(item_id + 1);
        let item = StackItem {
            item_id,
            action_type: action_type.into(),
            event,
            trigger_context: BTreeMap::new(),
            source_id: source.into(),
            target_id: target,
            is_cancelled: false,
            modifiers: BTreeMap::new(),
            depth: depth + 1,
        };
        debug!(
            target: "rules::stack",
            item = item_id,
            action = %item.action_type,
            depth = item.depth,
            "Pushed"
        );
        self.items.borrow_mut().push(item.clone());
        Ok(item)
    }

    /// Register a callback run when `item_id` is popped
    pub fn on_complete<F>(&self, item_id: u64, callback: F) -> bool
    where
        F: FnOnce(&StackItem) + 'static,
    {
        if !self.contains(item_id) {
            return false;
        }
        self.completions
            .borrow_mut()
            .entry(item_id)
            .or_default()
            .push(Box::new(callback));
        true
    }

    /// Finish the top item, running its completion callbacks
    ///
    /// Callbacks run after the item has left the stack, so they may push.
    pub fn pop(&self) -> Option<StackItem> {
        let item = self.items.borrow_mut().pop()?;
        let callbacks = self
            .completions
            .borrow_mut()
            .remove(&item.item_id)
            .unwrap_or_default();
        debug!(
            target: "rules::stack",
            item = item.item_id,
            cancelled = item.is_cancelled,
            callbacks = callbacks.len(),
            "Popped"
        );
        for callback in callbacks {
            callback(&item);
        }
        Some(item)
    }

    pub fn current(&self) -> Option<StackItem> {
        self.items.borrow().last().cloned()
    }

    pub fn item(&self, item_id: u64) -> Option<StackItem> {
        self.items
            .borrow()
            .iter()
            .find(|i| i.item_id == item_id)
            .cloned()
    }

    pub fn contains(&self, item_id: u64) -> bool {
        self.items.borrow().iter().any(|i| i.item_id == item_id)
    }

    /// Bottom first
    pub fn items(&self) -> Vec<StackItem> {
        self.items.borrow().clone()
    }

    pub fn cancel_current(&self) -> bool {
        match self.current() {
            Some(item) => self.cancel_item(item.item_id),
            None => false,
        }
    }

    /// Cancel an item and its event; false when either forbids it
    pub fn cancel_item(&self, item_id: u64) -> bool {
        let mut items = self.items.borrow_mut();
        let Some(item) = items.iter_mut().find(|i| i.item_id == item_id) else {
            return false;
        };
        if !item.is_cancellable() {
            debug!(target: "rules::stack", item = item_id, "Item is not cancellable");
            return false;
        }
        if let Some(event) = item.event.as_mut() {
            event.cancel();
        }
        item.is_cancelled = true;
        debug!(target: "rules::stack", item = item_id, "Cancelled");
        true
    }

    /// Record a named adjustment on the top item and fold it into its event
    pub fn modify_current(&self, key: impl Into<String>, value: f64) -> bool {
        let mut items = self.items.borrow_mut();
        let Some(item) = items.last_mut() else {
            return false;
        };
        *item.modifiers.entry(key.into()).or_insert(0.0) += value;
        if let Some(event) = item.event.as_mut() {
            event.add_modifier(value);
        }
        true
    }

    /// Drain everything, top first; returns the drained items
    pub fn resolve_all(&self) -> Vec<StackItem> {
        let mut drained = Vec::new();
        while let Some(item) = self.pop() {
            drained.push(item);
        }
        if !drained.is_empty() {
            debug!(target: "rules::stack", drained = drained.len(), "Stack drained");
        }
        drained
    }
}

impl Default for ResolutionStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::RuleEventType;
    use std::rc::Rc;

    #[test]
    fn test_push_assigns_depth() {
        let stack = ResolutionStack::new();
        let a = stack.push("attack", "fighter", Some("orc".into()), None).unwrap();
        let b = stack.push("shield", "orc", None, None).unwrap();
        assert_eq!(a.depth, 1);
        assert_eq!(b.depth, 2);
        assert_eq!(stack.current().map(|i| i.item_id), Some(b.item_id));
    }

    #[test]
    fn test_overflow_leaves_stack_untouched() {
        let stack = ResolutionStack::with_max_depth(2);
        stack.push("a", "x", None, None).unwrap();
        stack.push("b", "x", None, None).unwrap();
        let before = stack.items();
        let err = stack.push("c", "x", None, None).unwrap_err();
        assert!(matches!(err, RulesError::StackOverflow { depth: 2, max_depth: 2 }));
        assert!(err.is_invariant_violation());
        assert_eq!(stack.items(), before);
    }

    #[test]
    fn test_empty_pop_is_none() {
        let stack = ResolutionStack::new();
        assert!(stack.pop().is_none());
        assert!(!stack.cancel_current());
        assert!(!stack.modify_current("x", 1.0));
    }

    #[test]
    fn test_cancel_respects_event_flag() {
        let stack = ResolutionStack::new();
        let fixed = RuleEvent::new(RuleEventType::SpellCast);
        stack.push("spell", "wizard", None, Some(fixed)).unwrap();
        assert!(!stack.cancel_current());
        assert!(!stack.current().unwrap().is_cancelled);

        let open = RuleEvent::new(RuleEventType::SpellCast).cancellable();
        stack.push("spell", "wizard", None, Some(open)).unwrap();
        assert!(stack.cancel_current());
        let top = stack.current().unwrap();
        assert!(top.is_cancelled);
        assert!(top.event.unwrap().is_cancelled());
    }

    #[test]
    fn test_item_without_event_is_cancellable() {
        let stack = ResolutionStack::new();
        let item = stack.push("move", "rogue", None, None).unwrap();
        stack.push("opportunity_attack", "ogre", None, None).unwrap();
        assert!(stack.cancel_item(item.item_id));
        assert!(stack.item(item.item_id).unwrap().is_cancelled);
        assert!(!stack.current().unwrap().is_cancelled);
    }

    #[test]
    fn test_modify_current_folds_into_event() {
        let stack = ResolutionStack::new();
        let mut event = RuleEvent::new(RuleEventType::AttackDeclared).with_value(17.0);
        event.final_value = 17.0;
        stack.push("attack", "orc", Some("wizard".into()), Some(event)).unwrap();
        stack.modify_current("shield", -5.0);
        stack.modify_current("shield", -1.0);
        let top = stack.current().unwrap();
        assert_eq!(top.modifiers["shield"], -6.0);
        assert_eq!(top.event.unwrap().final_value, 11.0);
    }

    #[test]
    fn test_pop_runs_callbacks_and_resolve_all_drains() {
        let stack = Rc::new(ResolutionStack::new());
        let seen = Rc::new(RefCell::new(Vec::new()));
        let a = stack.push("a", "x", None, None).unwrap();
        let b = stack.push("b", "x", None, None).unwrap();
        for id in [a.item_id, b.item_id] {
            let seen = Rc::clone(&seen);
            stack.on_complete(id, move |item| seen.borrow_mut().push(item.action_type.clone()));
        }
        let drained = stack.resolve_all();
        assert_eq!(drained.len(), 2);
        assert!(stack.is_empty());
        assert_eq!(*seen.borrow(), vec!["b".to_string(), "a".to_string()]);
    }
}
