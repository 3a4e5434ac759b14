//! 决策阈值档案与档案注册表
//!
//! 注册表（名字 → PolicyProfile）只在构造智能体时读取一次，之后每个智能体持有自己的副本。

use std::collections::HashMap;

use serde::Deserialize;

/// 决策引擎使用的阈值与权重
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(default)]
pub struct PolicyProfile {
    /// 低于此 HP 视为危急：用药或逃跑
    pub critical_hp: i32,
    /// 低于此 HP 且附近有可用医疗设施时去交互
    pub medical_hp_threshold: i32,
    pub attack_ep_cost: i32,
    pub interact_ep_cost: i32,
    pub use_item_ep_cost: i32,
    /// 只在装备武器时才打的怪物（名字包含匹配，忽略大小写）
    pub tough_monsters: Vec<String>,
    /// PvP 前自身 HP 下限
    pub pvp_min_hp: i32,
    /// PvP 目标得分阈值
    pub pvp_score_threshold: f64,
    pub pvp_missing_hp_weight: f64,
    pub pvp_currency_weight: f64,
    /// 每多一回合击杀所需时间的扣分
    pub pvp_turns_to_kill_penalty: f64,
    /// 目标每点预估伤害的扣分
    pub pvp_threat_penalty: f64,
    /// 队友名字前缀；未设置时从自身名字推断
    pub team_prefix: Option<String>,
    /// 每 tick 最多执行的免费动作数
    pub max_free_actions: usize,
}

impl Default for PolicyProfile {
    fn default() -> Self {
        Self {
            critical_hp: 30,
            medical_hp_threshold: 60,
            attack_ep_cost: 2,
            interact_ep_cost: 1,
            use_item_ep_cost: 1,
            tough_monsters: vec!["bear".into()],
            pvp_min_hp: 50,
            pvp_score_threshold: 10.0,
            pvp_missing_hp_weight: 0.5,
            pvp_currency_weight: 0.2,
            pvp_turns_to_kill_penalty: 3.0,
            pvp_threat_penalty: 0.5,
            team_prefix: None,
            max_free_actions: 8,
        }
    }
}

impl PolicyProfile {
    /// 最便宜的耗 EP 动作
    pub fn cheapest_ep_cost(&self) -> i32 {
        self.attack_ep_cost
            .min(self.interact_ep_cost)
            .min(self.use_item_ep_cost)
    }

    pub fn is_tough(&self, monster_name: &str) -> bool {
        let name = monster_name.to_lowercase();
        self.tough_monsters
            .iter()
            .any(|t| name.contains(&t.to_lowercase()))
    }

    /// 队友前缀：显式配置优先，否则取名字去掉末尾编号与分隔符，如 "Bee-3" → "Bee"
    pub fn team_prefix_for(&self, own_name: &str) -> Option<String> {
        if let Some(prefix) = self.team_prefix.as_deref().filter(|p| !p.is_empty()) {
            return Some(prefix.to_string());
        }
        let trimmed = own_name
            .trim_end_matches(|c: char| c.is_ascii_digit())
            .trim_end_matches(['-', '_', ' ', '#']);
        (!trimmed.is_empty() && trimmed.len() < own_name.len()).then(|| trimmed.to_string())
    }
}

/// 名字 → 档案
#[derive(Debug, Clone, Default)]
pub struct ProfileRegistry {
    default: PolicyProfile,
    profiles: HashMap<String, PolicyProfile>,
}

impl ProfileRegistry {
    pub fn new(default: PolicyProfile, profiles: HashMap<String, PolicyProfile>) -> Self {
        Self { default, profiles }
    }

    /// 按名字取档案；名字未知时退回默认档案
    pub fn resolve(&self, name: Option<&str>) -> PolicyProfile {
        match name {
            Some(name) => self.profiles.get(name).cloned().unwrap_or_else(|| {
                tracing::warn!(profile = %name, "Unknown policy profile, using default");
                self.default.clone()
            }),
            None => self.default.clone(),
        }
    }
}
