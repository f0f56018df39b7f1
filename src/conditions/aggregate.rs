//! Folding active conditions into one summary

use serde::{Deserialize, Serialize};

use super::mechanics::{condition_of, mechanics_of, ConditionType};

/// Combined effect of every condition on one combatant
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEffects {
    pub conditions: Vec<ConditionType>,
    pub advantage_on_own_attacks: bool,
    pub disadvantage_on_own_attacks: bool,
    pub attackers_have_advantage: bool,
    pub attackers_have_disadvantage: bool,
    pub auto_fail_str_dex_saves: bool,
    pub incapacitated: bool,
    pub speed_zero: bool,
    pub attacks_against_auto_crit: bool,
    pub resistance_to_all_damage: bool,
}

impl AggregateEffects {
    pub fn has(&self, condition: ConditionType) -> bool {
        self.conditions.contains(&condition)
    }

    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty()
    }
}

/// Fold the mechanics of every active status that maps to a condition
///
/// `is_melee_attack` describes the attack being made *against* the holder;
/// it decides Prone's split and melee auto-crits.
pub fn aggregate<I, S>(active_status_ids: I, is_melee_attack: bool) -> AggregateEffects
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut out = AggregateEffects::default();

    for status_id in active_status_ids {
        let Some(condition) = condition_of(status_id.as_ref()) else {
            continue;
        };
        if out.conditions.contains(&condition) {
            continue;
        }
        out.conditions.push(condition);

        let m = mechanics_of(condition);
        out.advantage_on_own_attacks |= m.advantage_on_own_attacks;
        out.disadvantage_on_own_attacks |= m.disadvantage_on_own_attacks;
        out.attackers_have_advantage |= m.attackers_have_advantage;
        out.attackers_have_disadvantage |= m.attackers_have_disadvantage;
        out.auto_fail_str_dex_saves |= m.auto_fail_str_dex_saves;
        out.incapacitated |= m.incapacitated;
        out.speed_zero |= m.speed_zero;
        out.attacks_against_auto_crit |= m.melee_attacks_auto_crit && is_melee_attack;
        out.resistance_to_all_damage |= m.resistance_to_all_damage;

        if condition == ConditionType::Prone {
            if is_melee_attack {
                out.attackers_have_advantage = true;
            } else {
                out.attackers_have_disadvantage = true;
            }
        }
    }

    out.conditions.sort();
    out
}

/// Shorthand: does any active status incapacitate its holder?
pub fn is_incapacitated<I, S>(active_status_ids: I) -> bool
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    aggregate(active_status_ids, true).incapacitated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prone_directional_split() {
        let melee = aggregate(["prone"], true);
        assert!(melee.attackers_have_advantage);
        assert!(!melee.attackers_have_disadvantage);

        let ranged = aggregate(["prone"], false);
        assert!(!ranged.attackers_have_advantage);
        assert!(ranged.attackers_have_disadvantage);
    }

    #[test]
    fn test_unknown_ids_have_no_effect() {
        let effects = aggregate(["bless", "haste"], true);
        assert_eq!(effects, AggregateEffects::default());
        assert!(effects.is_empty());
    }

    #[test]
    fn test_fold_multiple_conditions() {
        let effects = aggregate(["hold_person", "poisoned", "petrified"], false);
        assert!(effects.incapacitated);
        assert!(effects.auto_fail_str_dex_saves);
        assert!(effects.disadvantage_on_own_attacks);
        assert!(effects.resistance_to_all_damage);
        // Paralysis crits only on melee
        assert!(!effects.attacks_against_auto_crit);
        assert!(effects.has(ConditionType::Paralyzed));
        assert_eq!(effects.conditions.len(), 3);
    }

    #[test]
    fn test_melee_auto_crit() {
        assert!(aggregate(["paralyzed"], true).attacks_against_auto_crit);
        assert!(aggregate(["unconscious"], true).attacks_against_auto_crit);
        assert!(!aggregate(["stunned"], true).attacks_against_auto_crit);
    }

    #[test]
    fn test_duplicate_aliases_fold_once() {
        let effects = aggregate(["paralyzed", "hold_person"], true);
        assert_eq!(effects.conditions, vec![ConditionType::Paralyzed]);
    }

    #[test]
    fn test_is_incapacitated() {
        assert!(is_incapacitated(["stunned"]));
        assert!(!is_incapacitated(["prone", "blinded"]));
        assert!(!is_incapacitated(Vec::<String>::new()));
    }
}
