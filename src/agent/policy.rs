//! 决策引擎：按优先级排列的规则表，第一条命中的规则产出本 tick 唯一的动作
//!
//! 顺序：毒圈逃离 → 医疗设施 → 危急回血/逃跑 → EP 不足休息 → 打怪 → 组队 PvP → 探索。
//! 每个决策附带一句人类可读的理由，只用于日志与服务端展示。

use rand::RngCore;

use super::movement::{MovementPlanner, RegionView};
use super::profile::PolicyProfile;
use crate::api::types::{SelfState, VisibleAgent};
use crate::api::{Action, ItemCategory, Snapshot, TargetType};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rule {
    DeathzoneEscape,
    MedicalFacility,
    CriticalHealth,
    LowEnergy,
    MonsterHunt,
    TeamAmbush,
    Explore,
}

impl Rule {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::DeathzoneEscape => "deathzone_escape",
            Self::MedicalFacility => "medical_facility",
            Self::CriticalHealth => "critical_health",
            Self::LowEnergy => "low_energy",
            Self::MonsterHunt => "monster_hunt",
            Self::TeamAmbush => "team_ambush",
            Self::Explore => "explore",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Decision {
    pub rule: Rule,
    pub action: Action,
    pub reason: String,
}

/// 一次决策的只读输入
pub struct DecisionContext<'a> {
    pub snapshot: &'a Snapshot,
    pub profile: &'a PolicyProfile,
    pub team_prefix: Option<&'a str>,
}

type RuleFn = fn(&DecisionContext<'_>, &mut MovementPlanner, &mut dyn RngCore) -> Option<Decision>;

const RULES: [(Rule, RuleFn); 7] = [
    (Rule::DeathzoneEscape, deathzone_escape),
    (Rule::MedicalFacility, medical_facility),
    (Rule::CriticalHealth, critical_health),
    (Rule::LowEnergy, low_energy),
    (Rule::MonsterHunt, monster_hunt),
    (Rule::TeamAmbush, team_ambush),
    (Rule::Explore, explore),
];

/// 自上而下评估规则表；探索规则总会命中，因此总能得到一个动作
pub fn decide(
    ctx: &DecisionContext<'_>,
    planner: &mut MovementPlanner,
    rng: &mut dyn RngCore,
) -> Decision {
    for (rule, eval) in RULES {
        if let Some(decision) = eval(ctx, planner, rng) {
            tracing::debug!(rule = rule.as_str(), "Rule matched");
            return decision;
        }
    }
    Decision {
        rule: Rule::Explore,
        action: Action::Rest,
        reason: "Nothing to do, resting".into(),
    }
}

fn move_or_rest(
    ctx: &DecisionContext<'_>,
    planner: &mut MovementPlanner,
    rng: &mut dyn RngCore,
    rule: Rule,
    moving: &str,
    trapped: &str,
) -> Decision {
    let view = RegionView::from_snapshot(ctx.snapshot);
    match planner.next_move(&view, rng) {
        Some(planned) => Decision {
            rule,
            reason: format!("{moving} -> {}", planned.target),
            action: Action::Move {
                region_id: planned.target,
            },
        },
        None => Decision {
            rule,
            action: Action::Rest,
            reason: trapped.to_string(),
        },
    }
}

fn deathzone_escape(
    ctx: &DecisionContext<'_>,
    planner: &mut MovementPlanner,
    rng: &mut dyn RngCore,
) -> Option<Decision> {
    ctx.snapshot.in_deathzone().then(|| {
        move_or_rest(
            ctx,
            planner,
            rng,
            Rule::DeathzoneEscape,
            "In deathzone, escaping",
            "Trapped in deathzone with no exits, resting",
        )
    })
}

fn medical_facility(
    ctx: &DecisionContext<'_>,
    _: &mut MovementPlanner,
    _: &mut dyn RngCore,
) -> Option<Decision> {
    let me = &ctx.snapshot.me;
    let p = ctx.profile;
    if me.ep >= p.attack_ep_cost || me.ep < p.interact_ep_cost || me.hp >= p.medical_hp_threshold {
        return None;
    }
    let facility = ctx
        .snapshot
        .current_region
        .facilities
        .iter()
        .find(|f| f.is_medical() && f.is_usable())?;
    Some(Decision {
        rule: Rule::MedicalFacility,
        action: Action::Interact {
            interactable_id: facility.id.clone(),
        },
        reason: format!("HP {} and low EP, using medical facility", me.hp),
    })
}

fn critical_health(
    ctx: &DecisionContext<'_>,
    planner: &mut MovementPlanner,
    rng: &mut dyn RngCore,
) -> Option<Decision> {
    let me = &ctx.snapshot.me;
    if me.hp >= ctx.profile.critical_hp {
        return None;
    }
    let potion = me
        .inventory
        .iter()
        .find(|i| i.category == ItemCategory::Recovery);
    if let Some(potion) = potion.filter(|_| me.ep >= ctx.profile.use_item_ep_cost) {
        return Some(Decision {
            rule: Rule::CriticalHealth,
            action: Action::UseItem {
                item_id: potion.id.clone(),
            },
            reason: format!("HP critical ({}), using {}", me.hp, potion.name),
        });
    }
    Some(move_or_rest(
        ctx,
        planner,
        rng,
        Rule::CriticalHealth,
        "HP critical, fleeing",
        "HP critical and nowhere to flee, resting",
    ))
}

fn low_energy(
    ctx: &DecisionContext<'_>,
    _: &mut MovementPlanner,
    _: &mut dyn RngCore,
) -> Option<Decision> {
    let ep = ctx.snapshot.me.ep;
    (ep < ctx.profile.cheapest_ep_cost()).then(|| Decision {
        rule: Rule::LowEnergy,
        action: Action::Rest,
        reason: format!("EP {ep} too low, resting"),
    })
}

fn monster_hunt(
    ctx: &DecisionContext<'_>,
    _: &mut MovementPlanner,
    _: &mut dyn RngCore,
) -> Option<Decision> {
    if ctx.snapshot.me.ep < ctx.profile.attack_ep_cost {
        return None;
    }
    let armed = ctx.snapshot.equipped_weapon().is_some();
    let weakest = |tough: bool| {
        ctx.snapshot
            .monsters_here()
            .filter(|m| ctx.profile.is_tough(&m.name) == tough)
            .min_by_key(|m| m.hp)
    };
    let target = weakest(false).or_else(|| if armed { weakest(true) } else { None })?;
    Some(Decision {
        rule: Rule::MonsterHunt,
        action: Action::Attack {
            target_id: target.id.clone(),
            target_type: TargetType::Monster,
        },
        reason: format!("Attacking {} (HP {})", target.name, target.hp),
    })
}

/// PvP 目标评分：缺失血量与可见货币加分，击杀回合数与对方威胁扣分
pub fn pvp_score(
    me: &SelfState,
    weapon_power: f64,
    target: &VisibleAgent,
    profile: &PolicyProfile,
) -> f64 {
    let missing_hp = f64::from((target.max_hp - target.hp).max(0));
    let currency: f64 = target
        .inventory
        .iter()
        .filter(|i| i.category == ItemCategory::Currency)
        .map(|i| i.currency_value())
        .sum();
    let my_damage = (f64::from(me.atk) + weapon_power - f64::from(target.def)).max(1.0);
    let turns_to_kill = (f64::from(target.hp.max(1)) / my_damage).ceil();
    let their_weapon = target
        .equipped_weapon
        .as_ref()
        .or_else(|| target.inventory.iter().find(|i| i.is_weapon() && i.is_equipped))
        .map(|w| w.power())
        .unwrap_or(0.0);
    let threat = (f64::from(target.atk) + their_weapon - f64::from(me.def)).max(1.0);

    missing_hp * profile.pvp_missing_hp_weight + currency * profile.pvp_currency_weight
        - turns_to_kill * profile.pvp_turns_to_kill_penalty
        - threat * profile.pvp_threat_penalty
}

fn team_ambush(
    ctx: &DecisionContext<'_>,
    _: &mut MovementPlanner,
    _: &mut dyn RngCore,
) -> Option<Decision> {
    let prefix = ctx.team_prefix?;
    let snapshot = ctx.snapshot;
    let me = &snapshot.me;
    let p = ctx.profile;
    if me.ep < p.attack_ep_cost || me.hp < p.pvp_min_hp {
        return None;
    }
    let weapon_power = snapshot.equipped_weapon()?.power();

    let (mates, others): (Vec<&VisibleAgent>, Vec<&VisibleAgent>) =
        snapshot.agents_here().partition(|a| a.name.starts_with(prefix));
    if mates.is_empty() || others.is_empty() {
        return None;
    }

    let (target, score) = others
        .iter()
        .map(|a| (*a, pvp_score(me, weapon_power, a, p)))
        .max_by(|a, b| a.1.total_cmp(&b.1))?;
    if score < p.pvp_score_threshold {
        tracing::debug!(target_name = %target.name, score, "PvP target below threshold");
        return None;
    }
    Some(Decision {
        rule: Rule::TeamAmbush,
        action: Action::Attack {
            target_id: target.id.clone(),
            target_type: TargetType::Agent,
        },
        reason: format!(
            "With {} teammate(s), attacking {} (score {:.1})",
            mates.len(),
            target.name,
            score
        ),
    })
}

fn explore(
    ctx: &DecisionContext<'_>,
    planner: &mut MovementPlanner,
    rng: &mut dyn RngCore,
) -> Option<Decision> {
    Some(move_or_rest(
        ctx,
        planner,
        rng,
        Rule::Explore,
        "Exploring",
        "No exits, resting",
    ))
}
