//! Condition identities and their fixed mechanical flags
//!
//! Pure lookup tables. Nothing here is mutated at runtime.

use serde::{Deserialize, Serialize};

/// Closed set of tabletop conditions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ConditionType {
    Blinded,
    Charmed,
    Deafened,
    Frightened,
    Grappled,
    Incapacitated,
    Invisible,
    Paralyzed,
    Petrified,
    Poisoned,
    Prone,
    Restrained,
    Stunned,
    Unconscious,
    Frozen,
}

impl ConditionType {
    pub fn all() -> &'static [ConditionType] {
        &[
            ConditionType::Blinded,
            ConditionType::Charmed,
            ConditionType::Deafened,
            ConditionType::Frightened,
            ConditionType::Grappled,
            ConditionType::Incapacitated,
            ConditionType::Invisible,
            ConditionType::Paralyzed,
            ConditionType::Petrified,
            ConditionType::Poisoned,
            ConditionType::Prone,
            ConditionType::Restrained,
            ConditionType::Stunned,
            ConditionType::Unconscious,
            ConditionType::Frozen,
        ]
    }
}

/// Mechanical flags of one condition
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionMechanics {
    /// The affected creature's own attack rolls have advantage
    pub advantage_on_own_attacks: bool,
    /// The affected creature's own attack rolls have disadvantage
    pub disadvantage_on_own_attacks: bool,
    /// Attack rolls against the creature have advantage
    pub attackers_have_advantage: bool,
    /// Attack rolls against the creature have disadvantage
    pub attackers_have_disadvantage: bool,
    /// Strength and Dexterity saving throws fail automatically
    pub auto_fail_str_dex_saves: bool,
    /// Cannot take actions or reactions
    pub incapacitated: bool,
    /// Speed becomes 0
    pub speed_zero: bool,
    /// Melee hits against the creature are critical hits
    pub melee_attacks_auto_crit: bool,
    /// Resistance to all damage
    pub resistance_to_all_damage: bool,
}

/// Mechanics table
pub const fn mechanics_of(condition: ConditionType) -> ConditionMechanics {
    const NONE: ConditionMechanics = ConditionMechanics {
        advantage_on_own_attacks: false,
        disadvantage_on_own_attacks: false,
        attackers_have_advantage: false,
        attackers_have_disadvantage: false,
        auto_fail_str_dex_saves: false,
        incapacitated: false,
        speed_zero: false,
        melee_attacks_auto_crit: false,
        resistance_to_all_damage: false,
    };

    match condition {
        ConditionType::Blinded => ConditionMechanics {
            disadvantage_on_own_attacks: true,
            attackers_have_advantage: true,
            ..NONE
        },
        ConditionType::Charmed | ConditionType::Deafened => NONE,
        ConditionType::Frightened | ConditionType::Poisoned => ConditionMechanics {
            disadvantage_on_own_attacks: true,
            ..NONE
        },
        ConditionType::Grappled => ConditionMechanics {
            speed_zero: true,
            ..NONE
        },
        ConditionType::Incapacitated => ConditionMechanics {
            incapacitated: true,
            ..NONE
        },
        ConditionType::Invisible => ConditionMechanics {
            advantage_on_own_attacks: true,
            attackers_have_disadvantage: true,
            ..NONE
        },
        ConditionType::Paralyzed | ConditionType::Unconscious => ConditionMechanics {
            attackers_have_advantage: true,
            auto_fail_str_dex_saves: true,
            incapacitated: true,
            speed_zero: true,
            melee_attacks_auto_crit: true,
            ..NONE
        },
        ConditionType::Petrified => ConditionMechanics {
            attackers_have_advantage: true,
            auto_fail_str_dex_saves: true,
            incapacitated: true,
            speed_zero: true,
            resistance_to_all_damage: true,
            ..NONE
        },
        // Attacker advantage/disadvantage for Prone depends on attack range
        // and is resolved in `aggregate`.
        ConditionType::Prone => ConditionMechanics {
            disadvantage_on_own_attacks: true,
            ..NONE
        },
        ConditionType::Restrained => ConditionMechanics {
            disadvantage_on_own_attacks: true,
            attackers_have_advantage: true,
            speed_zero: true,
            ..NONE
        },
        ConditionType::Stunned | ConditionType::Frozen => ConditionMechanics {
            attackers_have_advantage: true,
            auto_fail_str_dex_saves: true,
            incapacitated: true,
            speed_zero: true,
            ..NONE
        },
    }
}

/// Status id aliases, lowercase
const STATUS_ALIASES: &[(&str, ConditionType)] = &[
    ("blinded", ConditionType::Blinded),
    ("blind", ConditionType::Blinded),
    ("darkness_blinded", ConditionType::Blinded),
    ("charmed", ConditionType::Charmed),
    ("charm_person", ConditionType::Charmed),
    ("deafened", ConditionType::Deafened),
    ("frightened", ConditionType::Frightened),
    ("feared", ConditionType::Frightened),
    ("grappled", ConditionType::Grappled),
    ("incapacitated", ConditionType::Incapacitated),
    ("invisible", ConditionType::Invisible),
    ("greater_invisibility", ConditionType::Invisible),
    ("paralyzed", ConditionType::Paralyzed),
    ("hold_person", ConditionType::Paralyzed),
    ("hold_monster", ConditionType::Paralyzed),
    ("petrified", ConditionType::Petrified),
    ("poisoned", ConditionType::Poisoned),
    ("prone", ConditionType::Prone),
    ("knocked_down", ConditionType::Prone),
    ("restrained", ConditionType::Restrained),
    ("webbed", ConditionType::Restrained),
    ("entangled", ConditionType::Restrained),
    ("stunned", ConditionType::Stunned),
    ("unconscious", ConditionType::Unconscious),
    ("asleep", ConditionType::Unconscious),
    ("sleeping", ConditionType::Unconscious),
    ("downed", ConditionType::Unconscious),
    ("frozen", ConditionType::Frozen),
];

/// Map a status id to its condition identity, if it has one
pub fn condition_of(status_id: &str) -> Option<ConditionType> {
    let lowered = status_id.trim().to_ascii_lowercase();
    STATUS_ALIASES
        .iter()
        .find(|(alias, _)| *alias == lowered)
        .map(|(_, condition)| *condition)
}
