//! Host-side combatant lookup

use std::cell::RefCell;
use std::collections::BTreeMap;

use super::combatant::Combatant;
use crate::core::types::CombatantId;

/// Lookup injected by the host game
///
/// Engines only ever see cloned views; all writes go through `update` so the
/// host stays the owner of combatant state.
pub trait CombatantResolver {
    fn combatant(&self, id: &CombatantId) -> Option<Combatant>;

    /// Mutate a combatant in place. Returns false if it does not exist.
    fn update(&self, id: &CombatantId, f: &mut dyn FnMut(&mut Combatant)) -> bool;

    fn ids(&self) -> Vec<CombatantId>;
}

/// Simple in-memory resolver, ordered by id
#[derive(Debug, Default)]
pub struct Roster {
    combatants: RefCell<BTreeMap<CombatantId, Combatant>>,
}

impl Roster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, combatant: Combatant) {
        self.combatants
            .borrow_mut()
            .insert(combatant.id.clone(), combatant);
    }

    pub fn remove(&self, id: &CombatantId) -> Option<Combatant> {
        self.combatants.borrow_mut().remove(id)
    }

    pub fn len(&self) -> usize {
        self.combatants.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.combatants.borrow().is_empty()
    }

    /// All combatants, cloned
    pub fn all(&self) -> Vec<Combatant> {
        self.combatants.borrow().values().cloned().collect()
    }
}

impl CombatantResolver for Roster {
    fn combatant(&self, id: &CombatantId) -> Option<Combatant> {
        self.combatants.borrow().get(id).cloned()
    }

    fn update(&self, id: &CombatantId, f: &mut dyn FnMut(&mut Combatant)) -> bool {
        match self.combatants.borrow_mut().get_mut(id) {
            Some(combatant) => {
                f(combatant);
                true
            }
            None => false,
        }
    }

    fn ids(&self) -> Vec<CombatantId> {
        self.combatants.borrow().keys().cloned().collect()
    }
}
