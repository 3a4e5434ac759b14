//! 状态投影：每个智能体对外暴露的轻量状态
//!
//! 循环内部持有完整的成员关系与规划状态；监管器与仪表盘只看 AgentStatus（通过 watch 通道推送）。

use chrono::{DateTime, Utc};
use serde::Serialize;

/// 成员关系状态机的阶段
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryState {
    #[default]
    Unregistered,
    Searching,
    Registering,
    Recovering,
    Active,
    Dead,
}

impl RecoveryState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::Searching => "searching",
            Self::Registering => "registering",
            Self::Recovering => "recovering",
            Self::Active => "active",
            Self::Dead => "dead",
        }
    }
}

/// 外部可见的智能体状态
#[derive(Clone, Debug, Serialize)]
pub struct AgentStatus {
    pub slot: u32,
    pub name: String,
    pub running: bool,
    pub state: RecoveryState,
    pub game_id: Option<String>,
    pub agent_id: Option<String>,
    pub hp: Option<i32>,
    pub ep: Option<i32>,
    pub region: Option<String>,
    pub last_action: Option<String>,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AgentStatus {
    pub fn new(slot: u32, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
            running: false,
            state: RecoveryState::Unregistered,
            game_id: None,
            agent_id: None,
            hp: None,
            ep: None,
            region: None,
            last_action: None,
            last_error: None,
            updated_at: Utc::now(),
        }
    }

    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}
