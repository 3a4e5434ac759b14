//! 对战状态卡片：解析对战载荷并渲染为若干行日志

use serde::Deserialize;
use serde_json::Value;

/// 平局阈值：双方得分差绝对值小于该值
const DRAW_MARGIN: f64 = 0.3;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct BattlePayload {
    pub battle: Battle,
    pub rounds: Vec<Round>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Battle {
    pub id: String,
    pub battle_number: Option<Value>,
    pub agent_a: Fighter,
    pub agent_b: Fighter,
    pub topic: Option<String>,
    pub status: String,
    pub current_round: f64,
    pub total_rounds: Option<Value>,
    pub winner_id: Option<String>,
}

impl Battle {
    pub fn status_lower(&self) -> String {
        self.status.to_lowercase()
    }

    pub fn is_completed(&self) -> bool {
        self.status_lower() == "completed"
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Fighter {
    pub id: String,
    pub display_name: Option<String>,
    pub rating: Option<Value>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Round {
    pub agent_a_message: Option<RoundMessage>,
    pub agent_b_message: Option<RoundMessage>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RoundMessage {
    pub wit_score: Option<Value>,
}

/// 单回合得分：缺失、无法解析、或数值
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Wit {
    Missing,
    Invalid,
    Score(f64),
}

impl Wit {
    fn parse(message: Option<&RoundMessage>) -> Self {
        match message.and_then(|m| m.wit_score.as_ref()) {
            None | Some(Value::Null) => Self::Missing,
            Some(Value::Number(n)) => n.as_f64().map_or(Self::Invalid, Self::Score),
            Some(Value::String(s)) => s.trim().parse().map_or(Self::Invalid, Self::Score),
            Some(_) => Self::Invalid,
        }
    }

    fn label(self) -> String {
        match self {
            Self::Score(v) => format!("{v:.2}"),
            _ => "?".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundMark {
    Win,
    Loss,
    Draw,
    Pending,
}

impl RoundMark {
    pub fn icon(self) -> &'static str {
        match self {
            Self::Win => "🟢",
            Self::Loss => "🔴",
            Self::Draw => "⚪",
            Self::Pending => "…",
        }
    }
}

/// 回合标记：任一方缺分为 pending；无法解析按平局显示
pub fn round_mark(mine: Wit, theirs: Wit) -> RoundMark {
    match (mine, theirs) {
        (Wit::Missing, _) | (_, Wit::Missing) => RoundMark::Pending,
        (Wit::Score(m), Wit::Score(o)) => {
            let diff = m - o;
            if diff.abs() < DRAW_MARGIN {
                RoundMark::Draw
            } else if diff > 0.0 {
                RoundMark::Win
            } else {
                RoundMark::Loss
            }
        }
        _ => RoundMark::Draw,
    }
}

fn show(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => "?".to_string(),
        Some(other) => other.to_string(),
    }
}

impl BattlePayload {
    /// 从自己的视角取 (我方, 对方)
    fn sides(&self, agent_id: &str) -> (&Fighter, &Fighter, bool) {
        let battle = &self.battle;
        if battle.agent_a.id == agent_id {
            (&battle.agent_a, &battle.agent_b, true)
        } else {
            (&battle.agent_b, &battle.agent_a, false)
        }
    }

    /// 每回合 (我方得分, 对方得分)
    pub fn scores(&self, agent_id: &str) -> Vec<(Wit, Wit)> {
        let (_, _, mine_is_a) = self.sides(agent_id);
        self.rounds
            .iter()
            .map(|r| {
                let a = Wit::parse(r.agent_a_message.as_ref());
                let b = Wit::parse(r.agent_b_message.as_ref());
                if mine_is_a {
                    (a, b)
                } else {
                    (b, a)
                }
            })
            .collect()
    }

    pub fn render(&self, agent_id: &str) -> Vec<String> {
        let battle = &self.battle;
        let (me, opp, _) = self.sides(agent_id);
        let name = |f: &Fighter| f.display_name.clone().unwrap_or_else(|| "???".to_string());

        let mut lines = vec![
            format!("==== MOLT ARENA BATTLE #{} ====", show(battle.battle_number.as_ref())),
            format!(
                "{} ({}) vs {} ({})",
                name(me),
                show(me.rating.as_ref()),
                name(opp),
                show(opp.rating.as_ref())
            ),
            format!("Topic : {}", battle.topic.as_deref().unwrap_or("-")),
            format!(
                "Status: {}",
                if battle.status.is_empty() { "UNKNOWN".to_string() } else { battle.status.to_uppercase() }
            ),
            format!("Round : {}/{}", battle.current_round, show(battle.total_rounds.as_ref())),
        ];

        let scores = self.scores(agent_id);
        if scores.is_empty() {
            lines.push("Waiting for first round...".to_string());
            return lines;
        }
        let icons: Vec<&str> = scores.iter().map(|(m, o)| round_mark(*m, *o).icon()).collect();
        lines.push(format!("Rounds: {}", icons.join(" ")));
        if scores.iter().any(|(m, _)| matches!(m, Wit::Score(_))) {
            let row = |pick: fn(&(Wit, Wit)) -> Wit| {
                scores
                    .iter()
                    .map(|s| format!("{:>4}", pick(s).label()))
                    .collect::<Vec<_>>()
                    .join(" ")
            };
            lines.push(format!("You : {}", row(|s| s.0)));
            lines.push(format!("Opp : {}", row(|s| s.1)));
        }
        lines
    }
}
