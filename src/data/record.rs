//! Raw definition records and their conversion into engine definitions

use serde::{Deserialize, Serialize};

use super::grammar::{normalize, parse_calls, parse_functors, parse_words, Call, Functor};
use crate::core::error::{Result, RulesError};
use crate::core::types::{Ability, CombatantId};
use crate::events::RuleEventType;
use crate::reactions::{
    infer_resource, AiPolicy, ReactionDefinition, ReactionEffect, ReactionFlag, ReactionResource,
    ReactionTrigger,
};
use crate::rules::{ContextPredicate, ModifierKind, ModifierSpec, ModifierTarget};
use crate::status::{DurationType, StackingBehavior, StatusDefinition, StatusEffectAction, StatusFlag, TriggerPhase};

/// One `[[status]]` or `[[reaction]]` entry as written in a pack
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DefinitionRecord {
    pub id: String,
    #[serde(default, alias = "name")]
    pub display_name: String,
    #[serde(default)]
    pub description: String,
    /// Statuses: `Turns(3)`, `Rounds(10)`, `Permanent`, `UntilEvent(AttackDeclared)`.
    /// Reactions: trigger names separated by `;`.
    #[serde(default, alias = "duration", alias = "triggers")]
    pub duration_or_trigger_hints: String,
    /// `Stack(5)`, `Refresh`, `Replace`, `Extend`, `Unique`
    #[serde(default, alias = "stacking")]
    pub stacking_hints: String,
    #[serde(default, alias = "tags")]
    pub tag_string: String,
    #[serde(default, alias = "boosts")]
    pub boost_string: String,
    #[serde(default, alias = "functors")]
    pub functor_strings: Vec<String>,

    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default)]
    pub range: Option<f32>,
    #[serde(default)]
    pub can_cancel: bool,
    #[serde(default)]
    pub can_modify: bool,
    #[serde(default)]
    pub action_id: Option<String>,
    /// `None`, `SpellSlot(3)`, `ClassResource(ki,1)`; inferred when absent
    #[serde(default)]
    pub resource: Option<String>,
    /// `Always`, `Never`, `DamageThreshold(10)`, `PriorityTargets(a,b)`, `Random(0.5)`
    #[serde(default)]
    pub ai_policy: Option<String>,
}

impl DefinitionRecord {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    fn display_name_or_id(&self) -> String {
        if self.display_name.trim().is_empty() {
            self.id.clone()
        } else {
            self.display_name.clone()
        }
    }

    fn malformed(&self, reason: impl Into<String>) -> RulesError {
        RulesError::malformed(self.id.clone(), reason)
    }

    /// Build an immutable status definition
    pub fn to_status(&self) -> Result<StatusDefinition> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(self.malformed("missing id"));
        }

        let mut def = StatusDefinition::new(id)
            .named(self.display_name_or_id())
            .described(self.description.clone());

        def = apply_duration(def, &self.duration_or_trigger_hints).map_err(|r| self.malformed(r))?;
        def = apply_stacking(def, &self.stacking_hints).map_err(|r| self.malformed(r))?;

        for word in parse_words(&self.tag_string).map_err(|r| self.malformed(r))? {
            def = match StatusFlag::parse(word) {
                Some(flag) => def.with_flag(flag),
                None => def.with_tag(word),
            };
        }

        for call in parse_calls(&self.boost_string).map_err(|r| self.malformed(r))? {
            let modifier = boost_modifier(&call).map_err(|r| self.malformed(r))?;
            def = def.with_modifier(modifier);
        }

        for raw in &self.functor_strings {
            for functor in parse_functors(raw).map_err(|r| self.malformed(r))? {
                def = apply_status_functor(def, &functor).map_err(|r| self.malformed(r))?;
            }
        }

        Ok(def)
    }

    /// Build a reaction definition; the id is canonicalised at registration
    pub fn to_reaction(&self) -> Result<ReactionDefinition> {
        let id = self.id.trim();
        if id.is_empty() {
            return Err(self.malformed("missing id"));
        }

        let mut def = ReactionDefinition::new(id)
            .named(self.display_name_or_id())
            .with_priority(self.priority.unwrap_or(10))
            .with_range(self.range.unwrap_or(0.0));
        def.description = self.description.clone();
        if self.can_cancel {
            def = def.cancels();
        }
        if self.can_modify {
            def = def.modifies();
        }
        if let Some(action_id) = &self.action_id {
            def = def.with_action(action_id.trim());
        }

        for word in parse_words(&self.duration_or_trigger_hints).map_err(|r| self.malformed(r))? {
            let trigger = ReactionTrigger::parse(word)
                .ok_or_else(|| self.malformed(format!("unknown trigger '{}'", word)))?;
            def = def.on(trigger);
        }
        if def.triggers.is_empty() {
            return Err(self.malformed("reaction has no trigger"));
        }

        for word in parse_words(&self.tag_string).map_err(|r| self.malformed(r))? {
            def = match ReactionFlag::parse(word) {
                Some(flag) => def.with_flag(flag),
                None => def.with_tag(word),
            };
        }

        def.resource = match self.resource.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => parse_resource(raw).map_err(|r| self.malformed(r))?,
            _ => infer_resource(id, self.action_id.as_deref()),
        };

        if let Some(raw) = self.ai_policy.as_deref() {
            def = def.with_policy(parse_policy(raw).map_err(|r| self.malformed(r))?);
        }

        for raw in &self.functor_strings {
            for functor in parse_functors(raw).map_err(|r| self.malformed(r))? {
                if let Some(phase) = functor.phase {
                    return Err(self.malformed(format!(
                        "reaction effects take no phase, found '{}'",
                        phase
                    )));
                }
                def = def.with_effect(reaction_effect(&functor.call).map_err(|r| self.malformed(r))?);
            }
        }

        Ok(def)
    }
}

fn apply_duration(
    def: StatusDefinition,
    hint: &str,
) -> std::result::Result<StatusDefinition, String> {
    let calls = parse_calls(hint)?;
    let Some(call) = calls.first() else {
        return Ok(def);
    };
    if calls.len() > 1 {
        return Err(format!("duration '{}' has more than one term", hint));
    }
    if let Ok(turns) = call.name.parse::<i32>() {
        return Ok(def.lasting(DurationType::Turns, turns));
    }
    match normalize(call.name).as_str() {
        "permanent" => Ok(def.permanent()),
        "turns" => Ok(def.lasting(DurationType::Turns, call.int_opt(0)?.unwrap_or(1))),
        "rounds" => Ok(def.lasting(DurationType::Rounds, call.int_opt(0)?.unwrap_or(1))),
        "untilevent" => Ok(def.until(RuleEventType::parse(call.required(0)?))),
        other => Err(format!("unknown duration '{}'", other)),
    }
}

fn apply_stacking(
    def: StatusDefinition,
    hint: &str,
) -> std::result::Result<StatusDefinition, String> {
    let calls = parse_calls(hint)?;
    let Some(call) = calls.first() else {
        return Ok(def);
    };
    let max = call.int_opt(0)?.unwrap_or(1).max(1) as u32;
    let behavior = match normalize(call.name).as_str() {
        "replace" => StackingBehavior::Replace,
        "refresh" => StackingBehavior::Refresh,
        "extend" => StackingBehavior::Extend,
        "stack" => StackingBehavior::Stack,
        "unique" => StackingBehavior::Unique,
        other => return Err(format!("unknown stacking '{}'", other)),
    };
    Ok(def.stacking(behavior, max))
}

fn parse_target(raw: &str) -> std::result::Result<ModifierTarget, String> {
    let (head, ability) = match raw.split_once(':') {
        Some((head, ability)) => (head, Some(ability)),
        None => (raw, None),
    };
    let target = match normalize(head).as_str() {
        "attack" | "attackroll" => ModifierTarget::AttackRoll,
        "incomingattack" | "attackedby" => ModifierTarget::IncomingAttack,
        "save" | "savingthrow" => {
            let ability = match ability {
                Some(a) => Some(Ability::parse(a).ok_or_else(|| format!("unknown ability '{}'", a))?),
                None => None,
            };
            ModifierTarget::SavingThrow(ability)
        }
        "check" | "abilitycheck" => ModifierTarget::AbilityCheck,
        "ac" | "armorclass" => ModifierTarget::ArmorClass,
        "damage" | "damagedealt" => ModifierTarget::DamageDealt,
        "damagetaken" => ModifierTarget::DamageTaken,
        "speed" | "movement" => ModifierTarget::Speed,
        _ => return Err(format!("unknown modifier target '{}'", raw)),
    };
    Ok(target)
}

/// `ranged|spell` matches any listed tag; `!melee` requires absence
fn parse_predicate(raw: &str) -> Option<ContextPredicate> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Some(tag) = raw.strip_prefix('!') {
        return Some(ContextPredicate::LacksTag(tag.trim().to_string()));
    }
    let tags: Vec<String> = raw
        .split('|')
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect();
    match tags.len() {
        0 => None,
        1 => tags.into_iter().next().map(ContextPredicate::HasTag),
        _ => Some(ContextPredicate::AnyTag(tags)),
    }
}

/// Trailing `stack=N` argument
fn split_per_stack<'a>(args: &[&'a str]) -> (Vec<&'a str>, f64) {
    let mut per_stack = 0.0;
    let mut rest = Vec::with_capacity(args.len());
    for arg in args {
        match arg.strip_prefix("stack=").and_then(|v| v.trim().parse::<f64>().ok()) {
            Some(value) => per_stack = value,
            None => rest.push(*arg),
        }
    }
    (rest, per_stack)
}

fn flat_boost(call: &Call<'_>, target: ModifierTarget) -> std::result::Result<ModifierSpec, String> {
    let (args, per_stack) = split_per_stack(&call.args);
    let value = Call { name: call.name, args }.number(0)?;
    Ok(ModifierSpec::flat(target, value).per_stack(per_stack))
}

fn boost_modifier(call: &Call<'_>) -> std::result::Result<ModifierSpec, String> {
    let with_condition = |spec: ModifierSpec, raw: Option<&str>| match raw.and_then(parse_predicate) {
        Some(predicate) => spec.when(predicate),
        None => spec,
    };

    match normalize(call.name).as_str() {
        "ac" | "armorclass" => flat_boost(call, ModifierTarget::ArmorClass),
        "attack" | "attackroll" => flat_boost(call, ModifierTarget::AttackRoll),
        "check" | "abilitycheck" => flat_boost(call, ModifierTarget::AbilityCheck),
        "damage" | "damagedealt" => flat_boost(call, ModifierTarget::DamageDealt),
        "damagetaken" => flat_boost(call, ModifierTarget::DamageTaken),
        "speed" => flat_boost(call, ModifierTarget::Speed),
        "save" | "savingthrow" => {
            let (args, per_stack) = split_per_stack(&call.args);
            match args.as_slice() {
                [value] => {
                    let value = value
                        .parse::<f64>()
                        .map_err(|_| format!("{}: '{}' is not a number", call.name, value))?;
                    Ok(ModifierSpec::flat(ModifierTarget::SavingThrow(None), value).per_stack(per_stack))
                }
                [ability, value] => {
                    let ability = Ability::parse(ability)
                        .ok_or_else(|| format!("unknown ability '{}'", ability))?;
                    let value = value
                        .parse::<f64>()
                        .map_err(|_| format!("{}: '{}' is not a number", call.name, value))?;
                    Ok(ModifierSpec::flat(ModifierTarget::SavingThrow(Some(ability)), value)
                        .per_stack(per_stack))
                }
                _ => Err(format!("{} expects (value) or (ability, value)", call.name)),
            }
        }
        "advantage" => {
            let target = parse_target(call.required(0)?)?;
            Ok(with_condition(ModifierSpec::advantage(target), call.arg(1)))
        }
        "disadvantage" => {
            let target = parse_target(call.required(0)?)?;
            Ok(with_condition(ModifierSpec::disadvantage(target), call.arg(1)))
        }
        "autofail" => {
            let target = parse_target(call.required(0)?)?;
            Ok(ModifierSpec::new(target, ModifierKind::AutoFail, 0.0))
        }
        "resistance" | "vulnerability" | "immunity" => {
            let factor = match normalize(call.name).as_str() {
                "resistance" => 0.5,
                "vulnerability" => 2.0,
                _ => 0.0,
            };
            let spec = ModifierSpec::new(ModifierTarget::DamageTaken, ModifierKind::Multiplier, factor);
            let damage_type = call.arg(0).filter(|t| !t.eq_ignore_ascii_case("all"));
            Ok(with_condition(spec, damage_type))
        }
        _ => Err(format!("unknown boost '{}'", call.name)),
    }
}

fn status_effect(call: &Call<'_>) -> std::result::Result<StatusEffectAction, String> {
    let effect = match normalize(call.name).as_str() {
        "dealdamage" | "damage" => StatusEffectAction::DealDamage {
            amount: call.number(0)? as i32,
            damage_type: call.arg(1).map(str::to_string),
        },
        "heal" => StatusEffectAction::Heal {
            amount: call.number(0)? as i32,
        },
        "applystatus" => {
            let on_source = call.args.iter().skip(1).any(|a| a.eq_ignore_ascii_case("source"));
            let duration = call
                .args
                .iter()
                .skip(1)
                .find_map(|a| a.parse::<i32>().ok());
            StatusEffectAction::ApplyStatus {
                status_id: call.required(0)?.to_string(),
                duration,
                on_source,
            }
        }
        "removestatus" => StatusEffectAction::RemoveStatus {
            status_id: call.required(0)?.to_string(),
        },
        "removeself" => StatusEffectAction::RemoveSelf,
        "custom" | "fireevent" => StatusEffectAction::Custom {
            event: call.required(0)?.to_string(),
        },
        _ => return Err(format!("unknown status effect '{}'", call.name)),
    };
    Ok(effect)
}

fn apply_status_functor(
    def: StatusDefinition,
    functor: &Functor<'_>,
) -> std::result::Result<StatusDefinition, String> {
    let call = &functor.call;
    if let Some(phase) = functor.phase {
        let effect = status_effect(call)?;
        if matches!(normalize(phase).as_str(), "tick" | "ontick") {
            return Ok(def.with_tick(effect));
        }
        let phase = TriggerPhase::parse(phase).ok_or_else(|| format!("unknown phase '{}'", phase))?;
        return Ok(def.on(phase, effect));
    }

    if let Some(flag) = StatusFlag::parse(call.name) {
        return Ok(def.with_flag(flag));
    }

    let mut def = def;
    match normalize(call.name).as_str() {
        "repeatsave" => {
            let raw = call.required(0)?;
            let ability = Ability::parse(raw).ok_or_else(|| format!("unknown ability '{}'", raw))?;
            def = def.with_repeat_save(ability, call.int_opt(1)?);
        }
        "removeonattack" => {
            def = def.removed_after_attacks(call.int_opt(0)?.unwrap_or(1).max(0) as u32);
        }
        "removeonevent" => {
            def.remove_on_event = Some(RuleEventType::parse(call.required(0)?));
        }
        "block" | "blockaction" => {
            for action in &call.args {
                def = def.blocks(*action);
            }
        }
        "grant" | "grantaction" => {
            for action in &call.args {
                def = def.grants(*action);
            }
        }
        "group" => {
            for group in &call.args {
                def = def.in_group(*group);
            }
        }
        "flag" => {
            for raw in &call.args {
                let flag = StatusFlag::parse(raw).ok_or_else(|| format!("unknown flag '{}'", raw))?;
                def = def.with_flag(flag);
            }
        }
        _ => {
            return Err(format!(
                "'{}' needs a phase prefix or is not a known functor",
                call.name
            ))
        }
    }
    Ok(def)
}

fn parse_resource(raw: &str) -> std::result::Result<ReactionResource, String> {
    let calls = parse_calls(raw)?;
    let Some(call) = calls.first() else {
        return Ok(ReactionResource::None);
    };
    match normalize(call.name).as_str() {
        "none" => Ok(ReactionResource::None),
        "spellslot" => {
            let level = call.int_opt(0)?.unwrap_or(1).clamp(1, 9) as u8;
            Ok(ReactionResource::SpellSlot { min_level: level })
        }
        "classresource" => Ok(ReactionResource::ClassResource {
            name: call.required(0)?.to_string(),
            amount: call.int_opt(1)?.unwrap_or(1).max(1) as u32,
        }),
        _ => Err(format!("unknown resource '{}'", call.name)),
    }
}

fn parse_policy(raw: &str) -> std::result::Result<AiPolicy, String> {
    let calls = parse_calls(raw)?;
    let Some(call) = calls.first() else {
        return Ok(AiPolicy::Always);
    };
    match normalize(call.name).as_str() {
        "always" => Ok(AiPolicy::Always),
        "never" => Ok(AiPolicy::Never),
        "damagethreshold" => Ok(AiPolicy::DamageThreshold {
            min_damage: call.number(0)?,
        }),
        "prioritytargets" => Ok(AiPolicy::PriorityTargets {
            targets: call.args.iter().map(|t| CombatantId::new(*t)).collect(),
        }),
        "random" => Ok(AiPolicy::Random {
            chance: call.number(0)?.clamp(0.0, 1.0),
        }),
        _ => Err(format!("unknown ai policy '{}'", call.name)),
    }
}

fn reaction_effect(call: &Call<'_>) -> std::result::Result<ReactionEffect, String> {
    let effect = match normalize(call.name).as_str() {
        "applyboost" | "applystatus" => ReactionEffect::ApplyBoost {
            status_id: call.required(0)?.to_string(),
            duration: call.int_opt(1)?,
        },
        "canceltrigger" | "cancel" => ReactionEffect::CancelTrigger,
        "damagemultiplier" => ReactionEffect::DamageMultiplier {
            multiplier: call.number(0)?,
        },
        "queueattack" => ReactionEffect::QueueAttack {
            action_id: call.required(0)?.to_string(),
        },
        "castspell" => ReactionEffect::CastSpell {
            action_id: call.required(0)?.to_string(),
        },
        "modifyroll" => ReactionEffect::ModifyRoll {
            delta: call.number(0)?,
        },
        "dealdamage" => ReactionEffect::DealDamage {
            amount: call.number(0)? as i32,
            damage_type: call.arg(1).map(str::to_string),
        },
        _ => return Err(format!("unknown reaction effect '{}'", call.name)),
    };
    Ok(effect)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status_record(id: &str) -> DefinitionRecord {
        DefinitionRecord {
            display_name: id.to_uppercase(),
            ..DefinitionRecord::new(id)
        }
    }

    #[test]
    fn test_status_from_hints() {
        let record = DefinitionRecord {
            duration_or_trigger_hints: "Turns(3)".into(),
            stacking_hints: "Stack(5)".into(),
            tag_string: "fire;RemoveOnDamage".into(),
            boost_string: "AC(-1);Disadvantage(AttackRoll,ranged|spell)".into(),
            functor_strings: vec!["Tick:DealDamage(2,fire)".into(), "OnRemove:Custom(smoke)".into()],
            ..status_record("burning")
        };
        let def = record.to_status().unwrap();
        assert_eq!(def.name, "BURNING");
        assert_eq!(def.duration_type, DurationType::Turns);
        assert_eq!(def.default_duration, 3);
        assert_eq!(def.stacking, StackingBehavior::Stack);
        assert_eq!(def.max_stacks, 5);
        assert!(def.has_flag(StatusFlag::RemoveOnDamage));
        assert!(def.tags.contains("fire"));
        assert_eq!(def.modifiers.len(), 2);
        assert_eq!(
            def.modifiers[1].condition,
            Some(ContextPredicate::AnyTag(vec!["ranged".into(), "spell".into()]))
        );
        assert_eq!(def.tick_effects.len(), 1);
        assert_eq!(def.effects_for(TriggerPhase::OnRemove).len(), 1);
    }

    #[test]
    fn test_repeat_save_and_attack_limit() {
        let record = DefinitionRecord {
            duration_or_trigger_hints: "Rounds(10)".into(),
            functor_strings: vec!["RepeatSave(WIS,14);RemoveOnAttack(1);Block(cast_spell,dash)".into()],
            ..status_record("hold_person")
        };
        let def = record.to_status().unwrap();
        let save = def.repeat_save.unwrap();
        assert_eq!(save.ability, Ability::Wisdom);
        assert_eq!(save.dc, Some(14));
        assert_eq!(def.attack_allowance(), 1);
        assert_eq!(def.blocked_actions, vec!["cast_spell".to_string(), "dash".to_string()]);
    }

    #[test]
    fn test_bare_number_duration_and_save_boost() {
        let record = DefinitionRecord {
            duration_or_trigger_hints: "2".into(),
            boost_string: "Save(DEX,2);Save(1,stack=1)".into(),
            ..status_record("nimble")
        };
        let def = record.to_status().unwrap();
        assert_eq!(def.default_duration, 2);
        assert_eq!(def.modifiers[0].target, ModifierTarget::SavingThrow(Some(Ability::Dexterity)));
        assert_eq!(def.modifiers[1].per_stack, 1.0);
    }

    #[test]
    fn test_malformed_status_reports_id() {
        let record = DefinitionRecord {
            boost_string: "Wings(3)".into(),
            ..status_record("angelic")
        };
        match record.to_status() {
            Err(RulesError::MalformedRecord { id, reason }) => {
                assert_eq!(id, "angelic");
                assert!(reason.contains("Wings"));
            }
            other => panic!("expected malformed record, got {:?}", other),
        }
        let unphased = DefinitionRecord {
            functor_strings: vec!["DealDamage(3)".into()],
            ..status_record("unphased")
        };
        assert!(unphased.to_status().is_err());
    }

    #[test]
    fn test_reaction_from_record() {
        let record = DefinitionRecord {
            duration_or_trigger_hints: "YouAreAttacked".into(),
            tag_string: "requires_hit;spell".into(),
            functor_strings: vec!["ApplyBoost(shield_boost,1)".into()],
            priority: Some(20),
            can_modify: true,
            action_id: Some("shield".into()),
            ..DefinitionRecord::new("shield")
        };
        let def = record.to_reaction().unwrap();
        assert_eq!(def.priority, 20);
        assert!(def.answers(ReactionTrigger::YouAreAttacked));
        assert!(def.has_flag(ReactionFlag::RequiresHit));
        assert!(def.tags.contains("spell"));
        assert_eq!(def.resource, ReactionResource::SpellSlot { min_level: 1 });
        assert_eq!(def.effects.len(), 1);
    }

    #[test]
    fn test_reaction_explicit_resource_and_policy() {
        let record = DefinitionRecord {
            duration_or_trigger_hints: "YouTakeDamage".into(),
            resource: Some("ClassResource(reaction_ki,1)".into()),
            ai_policy: Some("DamageThreshold(8)".into()),
            functor_strings: vec!["DamageMultiplier(0.5)".into()],
            ..DefinitionRecord::new("deflect")
        };
        let def = record.to_reaction().unwrap();
        assert_eq!(
            def.resource,
            ReactionResource::ClassResource {
                name: "reaction_ki".into(),
                amount: 1
            }
        );
        assert_eq!(def.ai_policy, AiPolicy::DamageThreshold { min_damage: 8.0 });
    }

    #[test]
    fn test_reaction_without_trigger_is_malformed() {
        assert!(DefinitionRecord::new("nothing").to_reaction().is_err());
        let bad = DefinitionRecord {
            duration_or_trigger_hints: "WhenBored".into(),
            ..DefinitionRecord::new("idle")
        };
        assert!(bad.to_reaction().is_err());
    }
}
