//! HP mutation helpers that announce themselves on the bus

use tracing::debug;

use super::roster::CombatantResolver;
use crate::core::types::CombatantId;
use crate::events::{keys, EventBus, RuleEvent, RuleEventType};

/// What actually happened to a combatant's hit points
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HpChange {
    /// Amount requested by the caller
    pub raw: i32,
    /// Amount that reached hit points (after temp hp for damage, after the
    /// max hp cap for healing)
    pub applied: i32,
    pub hp_before: i32,
    pub hp_after: i32,
    /// Crossed from above zero to zero or below
    pub dropped: bool,
}

/// Damage a combatant: temp hp absorbs first, then hit points
///
/// Dispatches `DamageTaken` (value = raw, final value = damage after temp
/// hp) and `CombatantDied` when the target crosses to zero or below. A
/// target the resolver does not know still gets the event, with the raw
/// amount as its final value.
///
/// `DamageTaken` reports damage that has already landed. It cannot be
/// cancelled and handler writes to its final value are not read back.
pub fn apply_damage(
    resolver: Option<&dyn CombatantResolver>,
    bus: &EventBus,
    source: Option<&CombatantId>,
    target: &CombatantId,
    amount: i32,
    damage_type: Option<&str>,
) -> HpChange {
    let raw = amount.max(0);
    let mut change = HpChange {
        raw,
        applied: raw,
        hp_before: 0,
        hp_after: 0,
        dropped: false,
    };
    if raw == 0 {
        return change;
    }

    let known = resolver.is_some_and(|r| {
        r.update(target, &mut |c| {
            let absorbed = c.temp_hp.min(raw);
            c.temp_hp -= absorbed;
            change.applied = raw - absorbed;
            change.hp_before = c.hp;
            c.hp -= change.applied;
            change.hp_after = c.hp;
            change.dropped = change.hp_before > 0 && c.hp <= 0;
            if change.dropped {
                c.is_active = false;
            }
        })
    });

    debug!(
        target: "rules::combat",
        target_id = %target,
        raw,
        applied = change.applied,
        hp_after = change.hp_after,
        "Damage applied"
    );

    let mut event = RuleEvent::new(RuleEventType::DamageTaken)
        .with_source_opt(source.cloned())
        .with_target(target.clone())
        .with_value(raw as f64);
    event.final_value = change.applied as f64;
    if known {
        event = event
            .with_data(keys::HP_BEFORE, change.hp_before)
            .with_data(keys::HP_AFTER, change.hp_after);
    }
    if let Some(damage_type) = damage_type {
        event = event
            .with_data(keys::DAMAGE_TYPE, damage_type)
            .with_tag(damage_type);
    }
    bus.dispatch(&mut event);

    if change.dropped {
        bus.dispatch(
            &mut RuleEvent::new(RuleEventType::CombatantDied)
                .with_source_opt(source.cloned())
                .with_target(target.clone())
                .with_value(change.hp_after as f64),
        );
    }

    change
}

/// Heal a combatant up to max hp
///
/// A combatant brought back above zero becomes active again.
pub fn apply_healing(
    resolver: Option<&dyn CombatantResolver>,
    bus: &EventBus,
    source: Option<&CombatantId>,
    target: &CombatantId,
    amount: i32,
) -> HpChange {
    let raw = amount.max(0);
    let mut change = HpChange {
        raw,
        applied: raw,
        hp_before: 0,
        hp_after: 0,
        dropped: false,
    };
    if raw == 0 {
        return change;
    }

    let known = resolver.is_some_and(|r| {
        r.update(target, &mut |c| {
            change.hp_before = c.hp;
            let healed = (c.hp.max(0) + raw).min(c.max_hp);
            change.applied = (healed - c.hp.max(0)).max(0);
            c.hp = healed.max(c.hp);
            change.hp_after = c.hp;
            if c.hp > 0 {
                c.is_active = true;
            }
        })
    });

    let mut event = RuleEvent::new(RuleEventType::HealingReceived)
        .with_source_opt(source.cloned())
        .with_target(target.clone())
        .with_value(raw as f64);
    event.final_value = change.applied as f64;
    if known {
        event = event
            .with_data(keys::HP_BEFORE, change.hp_before)
            .with_data(keys::HP_AFTER, change.hp_after);
    }
    bus.dispatch(&mut event);

    change
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{Combatant, Roster};
    use crate::events::EventLog;
    use std::rc::Rc;

    fn setup() -> (Roster, EventBus, Rc<EventLog>) {
        let roster = Roster::new();
        roster.insert(Combatant::new("cleric", 10));
        let bus = EventBus::new();
        let log = Rc::new(EventLog::new(32));
        EventLog::attach(&log, &bus);
        (roster, bus, log)
    }

    #[test]
    fn test_temp_hp_absorbs_first() {
        let (roster, bus, log) = setup();
        roster.update(&"cleric".into(), &mut |c| c.temp_hp = 4);
        let change = apply_damage(Some(&roster), &bus, None, &"cleric".into(), 6, Some("fire"));
        assert_eq!(change.applied, 2);
        assert_eq!(change.hp_after, 8);
        let events = log.of_type(&RuleEventType::DamageTaken);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].value, 6.0);
        assert_eq!(events[0].final_value, 2.0);
        assert!(events[0].has_tag("fire"));
    }

    #[test]
    fn test_damage_taken_is_a_notification() {
        let (roster, bus, log) = setup();
        let refused = Rc::new(std::cell::Cell::new(false));
        let flag = Rc::clone(&refused);
        bus.subscribe(RuleEventType::DamageTaken, 0, "ward", move |event| {
            flag.set(!event.cancel());
            event.final_value = 0.0;
            Ok(())
        });

        let change = apply_damage(Some(&roster), &bus, None, &"cleric".into(), 4, None);
        assert!(refused.get());
        assert_eq!(change.hp_after, 6);
        assert_eq!(roster.combatant(&"cleric".into()).map(|c| c.hp), Some(6));
        let events = log.of_type(&RuleEventType::DamageTaken);
        assert!(!events[0].is_cancellable);
        assert!(!events[0].is_cancelled());
    }

    #[test]
    fn test_overflow_damage_goes_negative_and_dies() {
        let (roster, bus, log) = setup();
        let change = apply_damage(Some(&roster), &bus, None, &"cleric".into(), 60, None);
        assert_eq!(change.hp_after, -50);
        assert!(change.dropped);
        assert_eq!(log.count(&RuleEventType::CombatantDied), 1);
        assert!(!roster.combatant(&"cleric".into()).is_some_and(|c| c.is_active));

        // Already down: no second death event
        apply_damage(Some(&roster), &bus, None, &"cleric".into(), 5, None);
        assert_eq!(log.count(&RuleEventType::CombatantDied), 1);
    }

    #[test]
    fn test_healing_caps_at_max_and_revives() {
        let (roster, bus, _log) = setup();
        roster.update(&"cleric".into(), &mut |c| {
            c.hp = -3;
            c.is_active = false;
        });
        let change = apply_healing(Some(&roster), &bus, None, &"cleric".into(), 25);
        assert_eq!(change.hp_after, 10);
        assert!(roster.combatant(&"cleric".into()).is_some_and(|c| c.is_active));
    }

    #[test]
    fn test_unknown_target_still_dispatches() {
        let (_roster, bus, log) = setup();
        let change = apply_damage(None, &bus, None, &"ghost".into(), 7, None);
        assert_eq!(change.applied, 7);
        assert!(!change.dropped);
        assert_eq!(log.count(&RuleEventType::DamageTaken), 1);
    }

    #[test]
    fn test_zero_damage_is_silent() {
        let (roster, bus, log) = setup();
        apply_damage(Some(&roster), &bus, None, &"cleric".into(), 0, None);
        assert!(log.is_empty());
    }
}
