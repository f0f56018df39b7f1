//! Condition immunity → status group table

use crate::conditions::condition_of;

/// Immunity name (lowercase) and every status id it blocks
const IMMUNITY_GROUPS: &[(&str, &[&str])] = &[
    ("paralyzed", &["paralyzed", "hold_person", "hold_monster"]),
    ("poisoned", &["poisoned", "poison", "stinking_cloud", "ray_of_sickness"]),
    ("charmed", &["charmed", "charm_person", "charm_monster", "hypnotic_pattern"]),
    ("frightened", &["frightened", "feared", "fear", "cause_fear"]),
    ("prone", &["prone", "knocked_down"]),
    ("unconscious", &["unconscious", "asleep", "sleeping", "sleep"]),
    ("sleep", &["asleep", "sleeping", "sleep"]),
    ("petrified", &["petrified", "flesh_to_stone"]),
    ("stunned", &["stunned", "stunning_strike"]),
    ("blinded", &["blinded", "blind", "blindness", "darkness_blinded"]),
    ("deafened", &["deafened", "deafness"]),
    ("grappled", &["grappled"]),
    ("restrained", &["restrained", "webbed", "entangled"]),
    ("frozen", &["frozen"]),
];

/// Does any of `immunities` block `status_id`?
///
/// Matches case-insensitively on the explicit group table, on the status id
/// itself, and on shared condition identity.
pub fn is_immune<S: AsRef<str>>(immunities: &[S], status_id: &str) -> bool {
    let status = status_id.trim().to_ascii_lowercase();
    let status_condition = condition_of(&status);

    immunities.iter().any(|immunity| {
        let immunity = immunity.as_ref().trim().to_ascii_lowercase();
        if immunity == status {
            return true;
        }
        let in_group = IMMUNITY_GROUPS
            .iter()
            .find(|(name, _)| *name == immunity)
            .is_some_and(|(_, members)| members.contains(&status.as_str()));
        if in_group {
            return true;
        }
        status_condition.is_some() && condition_of(&immunity) == status_condition
    })
}
