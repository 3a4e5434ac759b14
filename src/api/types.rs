//! 远端游戏 API 的数据模型
//!
//! 字段一律宽松反序列化（缺省值 + 别名），服务端多给少给字段都不应让一个 tick 失败。

use serde::{Deserialize, Serialize};

/// 对局状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GameStatus {
    #[default]
    Waiting,
    Running,
    Finished,
    Ended,
    Closed,
    #[serde(other)]
    Unknown,
}

impl GameStatus {
    /// finished / ended / closed 视为对局已结束
    pub fn is_over(self) -> bool {
        matches!(self, Self::Finished | Self::Ended | Self::Closed)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Running => "running",
            Self::Finished => "finished",
            Self::Ended => "ended",
            Self::Closed => "closed",
            Self::Unknown => "unknown",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameSummary {
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub status: GameStatus,
}

/// 对局完整状态（恢复时按名字查找自己的条目）
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameState {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub status: GameStatus,
    #[serde(default)]
    pub agents: Vec<AgentEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentEntry {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default = "default_true")]
    pub is_alive: bool,
}

/// 注册成功的返回
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    pub id: String,
    #[serde(default)]
    pub game_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemCategory {
    Weapon,
    Recovery,
    Currency,
    #[default]
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default, alias = "type")]
    pub type_id: Option<String>,
    #[serde(default)]
    pub category: ItemCategory,
    #[serde(default)]
    pub atk_bonus: Option<f64>,
    #[serde(default)]
    pub attack: Option<f64>,
    #[serde(default)]
    pub power: Option<f64>,
    #[serde(default)]
    pub damage: Option<f64>,
    #[serde(default)]
    pub amount: Option<f64>,
    #[serde(default)]
    pub value: Option<f64>,
    #[serde(default)]
    pub is_equipped: bool,
}

impl Item {
    /// 攻击力：atkBonus / attack / power / damage 中第一个非空值
    pub fn power(&self) -> f64 {
        self.atk_bonus
            .or(self.attack)
            .or(self.power)
            .or(self.damage)
            .unwrap_or(0.0)
    }

    pub fn is_weapon(&self) -> bool {
        self.category == ItemCategory::Weapon
    }

    /// 地图类道具（使用后揭示全图）
    pub fn is_map(&self) -> bool {
        let type_id = self.type_id.as_deref().unwrap_or_default().to_lowercase();
        type_id == "map" || type_id.ends_with("_map") || self.name.to_lowercase().contains("map")
    }

    /// 货币面值（amount / value，缺省按 1 计）
    pub fn currency_value(&self) -> f64 {
        self.amount.or(self.value).unwrap_or(1.0)
    }
}

/// 区域内可交互设施
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Facility {
    pub id: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub is_used: bool,
}

impl Facility {
    pub fn is_medical(&self) -> bool {
        self.kind.to_lowercase().contains("medical")
    }

    pub fn is_usable(&self) -> bool {
        !self.is_used
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Region {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub connections: Vec<String>,
    #[serde(default, alias = "isDeathzone")]
    pub is_death_zone: bool,
    #[serde(default, alias = "interactables")]
    pub facilities: Vec<Facility>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SelfState {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hp: i32,
    #[serde(default = "default_max_hp")]
    pub max_hp: i32,
    #[serde(default)]
    pub ep: i32,
    #[serde(default)]
    pub max_ep: i32,
    #[serde(default)]
    pub atk: i32,
    #[serde(default)]
    pub def: i32,
    #[serde(default)]
    pub region_id: String,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub equipped_weapon: Option<Item>,
    #[serde(default = "default_true")]
    pub is_alive: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Monster {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hp: i32,
    #[serde(default)]
    pub atk: i32,
    #[serde(default)]
    pub def: i32,
    #[serde(default)]
    pub region_id: Option<String>,
}

/// 视野内的其它智能体
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleAgent {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub hp: i32,
    #[serde(default = "default_max_hp")]
    pub max_hp: i32,
    #[serde(default)]
    pub atk: i32,
    #[serde(default)]
    pub def: i32,
    #[serde(default)]
    pub region_id: Option<String>,
    #[serde(default = "default_true")]
    pub is_alive: bool,
    #[serde(default)]
    pub inventory: Vec<Item>,
    #[serde(default)]
    pub equipped_weapon: Option<Item>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VisibleItem {
    pub region_id: String,
    pub item: Item,
}

/// 即将成为毒圈的区域：服务端可能给 id 字符串，也可能给对象
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum RegionRef {
    Id(String),
    Region { id: String },
}

impl RegionRef {
    pub fn id(&self) -> &str {
        match self {
            Self::Id(id) | Self::Region { id } => id,
        }
    }
}

/// 单个智能体的视野快照，每 tick 重新拉取
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot {
    #[serde(rename = "self")]
    pub me: SelfState,
    pub current_region: Region,
    #[serde(default)]
    pub visible_regions: Vec<Region>,
    #[serde(default)]
    pub visible_items: Vec<VisibleItem>,
    #[serde(default)]
    pub visible_monsters: Vec<Monster>,
    #[serde(default)]
    pub visible_agents: Vec<VisibleAgent>,
    #[serde(default)]
    pub pending_deathzones: Vec<RegionRef>,
    #[serde(default)]
    pub game_status: Option<GameStatus>,
}

impl Snapshot {
    pub fn in_deathzone(&self) -> bool {
        self.current_region.is_death_zone
    }

    pub fn pending_ids(&self) -> impl Iterator<Item = &str> {
        self.pending_deathzones.iter().map(RegionRef::id)
    }

    /// 当前装备武器（equippedWeapon 优先，否则背包中标记为已装备的武器）
    pub fn equipped_weapon(&self) -> Option<&Item> {
        self.me
            .equipped_weapon
            .as_ref()
            .or_else(|| self.me.inventory.iter().find(|i| i.is_weapon() && i.is_equipped))
    }

    pub fn equipped_power(&self) -> f64 {
        self.equipped_weapon().map(Item::power).unwrap_or(0.0)
    }

    pub fn is_equipped(&self, item_id: &str) -> bool {
        self.equipped_weapon().is_some_and(|w| w.id == item_id)
            || self
                .me
                .inventory
                .iter()
                .any(|i| i.id == item_id && i.is_equipped)
    }

    /// 当前区域地面上的物品
    pub fn items_here(&self) -> impl Iterator<Item = &Item> {
        let here = self.current_region.id.as_str();
        self.visible_items
            .iter()
            .filter(move |v| v.region_id == here)
            .map(|v| &v.item)
    }

    pub fn monsters_here(&self) -> impl Iterator<Item = &Monster> {
        let here = self.current_region.id.as_str();
        self.visible_monsters
            .iter()
            .filter(move |m| m.region_id.as_deref().map_or(true, |r| r == here))
    }

    /// 同区域、存活、非自己的其它智能体
    pub fn agents_here(&self) -> impl Iterator<Item = &VisibleAgent> {
        let here = self.current_region.id.as_str();
        let me = self.me.id.as_str();
        self.visible_agents.iter().filter(move |a| {
            a.is_alive && a.id != me && a.region_id.as_deref().map_or(true, |r| r == here)
        })
    }

    /// 视野中标记为毒圈的区域 id（含当前区域）
    pub fn visible_deathzone_ids(&self) -> impl Iterator<Item = &str> {
        self.visible_regions
            .iter()
            .chain(std::iter::once(&self.current_region))
            .filter(|r| r.is_death_zone)
            .map(|r| r.id.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetType {
    Agent,
    Monster,
}

/// 每 tick 提交的动作（按 type 打标签）
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Action {
    Move {
        #[serde(rename = "regionId")]
        region_id: String,
    },
    Attack {
        #[serde(rename = "targetId")]
        target_id: String,
        #[serde(rename = "targetType")]
        target_type: TargetType,
    },
    UseItem {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    Pickup {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    Drop {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    Equip {
        #[serde(rename = "itemId")]
        item_id: String,
    },
    Interact {
        #[serde(rename = "interactableId")]
        interactable_id: String,
    },
    Rest,
}

impl Action {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Move { .. } => "move",
            Self::Attack { .. } => "attack",
            Self::UseItem { .. } => "use_item",
            Self::Pickup { .. } => "pickup",
            Self::Drop { .. } => "drop",
            Self::Equip { .. } => "equip",
            Self::Interact { .. } => "interact",
            Self::Rest => "rest",
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_hp() -> i32 {
    100
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_item_power_uses_first_present_field() {
        let item: Item = serde_json::from_value(json!({
            "id": "w1", "category": "weapon", "attack": 7, "damage": 12
        }))
        .unwrap();
        assert_eq!(item.power(), 7.0);

        let item: Item = serde_json::from_value(json!({"id": "w2", "category": "weapon"})).unwrap();
        assert_eq!(item.power(), 0.0);
    }

    #[test]
    fn test_unknown_category_and_status_are_tolerated() {
        let item: Item = serde_json::from_value(json!({"id": "x", "category": "trap"})).unwrap();
        assert_eq!(item.category, ItemCategory::Other);
        let game: GameSummary =
            serde_json::from_value(json!({"id": "g", "status": "paused"})).unwrap();
        assert_eq!(game.status, GameStatus::Unknown);
    }

    #[test]
    fn test_action_wire_format() {
        let action = Action::Attack {
            target_id: "m1".into(),
            target_type: TargetType::Monster,
        };
        assert_eq!(
            serde_json::to_value(&action).unwrap(),
            json!({"type": "attack", "targetId": "m1", "targetType": "monster"})
        );
        assert_eq!(serde_json::to_value(Action::Rest).unwrap(), json!({"type": "rest"}));
        assert_eq!(
            serde_json::to_value(Action::UseItem { item_id: "i".into() }).unwrap(),
            json!({"type": "use_item", "itemId": "i"})
        );
    }

    #[test]
    fn test_snapshot_pending_accepts_ids_and_objects() {
        let snapshot: Snapshot = serde_json::from_value(json!({
            "self": {"id": "me", "hp": 80, "ep": 5, "regionId": "r1"},
            "currentRegion": {"id": "r1", "connections": ["r2"]},
            "pendingDeathzones": ["r2", {"id": "r3", "name": "Dock"}],
            "gameStatus": "running"
        }))
        .unwrap();
        assert_eq!(snapshot.pending_ids().collect::<Vec<_>>(), vec!["r2", "r3"]);
        assert!(snapshot.me.is_alive);
        assert_eq!(snapshot.game_status, Some(GameStatus::Running));
    }
}
