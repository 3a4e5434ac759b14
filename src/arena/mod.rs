//! 竞技场观战器：创建对战 → 轮询状态 → 渲染卡片 → 报告胜负 → 冷却后再来
//!
//! 创建对战走弹性请求层（429 / 500 / 网络错误重试）；轮询只尝试一次，失败等待后再轮询。

pub mod card;

use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

use crate::api::{ApiRequest, ResilientClient, RetryPolicy, Transport};
use crate::core::clock::Sleeper;
pub use card::{BattlePayload, RoundMark, Wit};

#[derive(Debug, Clone)]
pub struct ArenaSettings {
    pub agent_id: String,
    pub rounds: u32,
    pub language: String,
    pub visibility: String,
    /// 两场对战之间的冷却
    pub cooldown: Duration,
    /// 创建失败后的等待
    pub create_failure_wait: Duration,
    /// 轮询失败后的等待
    pub poll_failure_wait: Duration,
    /// 轮询间隔 = poll_base + 当前回合 × per_round
    pub poll_base: Duration,
    pub per_round: Duration,
    pub create_timeout: Duration,
    pub poll_timeout: Duration,
}

impl Default for ArenaSettings {
    fn default() -> Self {
        Self {
            agent_id: String::new(),
            rounds: 5,
            language: "en".to_string(),
            visibility: "public".to_string(),
            cooldown: Duration::from_secs(60),
            create_failure_wait: Duration::from_secs(30),
            poll_failure_wait: Duration::from_secs(10),
            poll_base: Duration::from_secs(10),
            per_round: Duration::from_millis(1500),
            create_timeout: Duration::from_secs(15),
            poll_timeout: Duration::from_secs(12),
        }
    }
}

const MAX_SCALED_ROUND: f64 = 100.0;

impl ArenaSettings {
    /// 基础间隔 + 每回合增量；回合数按 [0, MAX_SCALED_ROUND] 截断
    pub fn poll_delay(&self, current_round: f64) -> Duration {
        let round = current_round.max(0.0).min(MAX_SCALED_ROUND);
        self.poll_base + self.per_round.mul_f64(round)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BattleResult {
    Victory,
    Defeat,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BattleOutcome {
    NotCreated,
    Finished { battle_id: String, result: BattleResult },
    Cancelled,
}

pub struct ArenaWatcher {
    client: ResilientClient,
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    settings: ArenaSettings,
    cancel: CancellationToken,
}

impl ArenaWatcher {
    pub fn new(
        transport: Arc<dyn Transport>,
        sleeper: Arc<dyn Sleeper>,
        policy: RetryPolicy,
        settings: ArenaSettings,
        cancel: CancellationToken,
    ) -> Self {
        let client = ResilientClient::new(transport.clone(), sleeper.clone(), policy);
        Self {
            client,
            transport,
            sleeper,
            settings,
            cancel,
        }
    }

    /// 创建对战，返回对战 id
    pub async fn create_battle(&self) -> Option<String> {
        let body = json!({
            "agent1Id": self.settings.agent_id,
            "rounds": self.settings.rounds,
            "language": self.settings.language,
            "visibility": self.settings.visibility,
        });
        let request =
            ApiRequest::post("/deploy/battle", body).with_timeout(self.settings.create_timeout);
        match self.client.execute(&request).await {
            Ok(value) if value.get("success").and_then(Value::as_bool) == Some(true) => {
                let id = value.pointer("/battle/id").and_then(Value::as_str)?;
                tracing::info!(battle = %id, "Battle created");
                Some(id.to_string())
            }
            Ok(value) => {
                tracing::warn!(response = %value, "Battle creation not confirmed");
                None
            }
            Err(e) => {
                tracing::warn!(error = %e, "Battle creation failed");
                None
            }
        }
    }

    /// 单次轮询，不重试
    pub async fn poll_battle(&self, battle_id: &str) -> Option<BattlePayload> {
        let request = ApiRequest::get(format!("/battles/{battle_id}"))
            .with_timeout(self.settings.poll_timeout);
        let response = match self.transport.send(&request).await {
            Ok(response) if (200..300).contains(&response.status) => response,
            Ok(response) => {
                tracing::warn!(battle = %battle_id, status = response.status, "Battle status unavailable");
                return None;
            }
            Err(e) => {
                tracing::warn!(battle = %battle_id, "Battle status request failed: {}", e);
                return None;
            }
        };
        serde_json::from_str(&response.body)
            .map_err(|e| tracing::warn!(battle = %battle_id, "Malformed battle status: {}", e))
            .ok()
    }

    /// 观战直到结束；取消时返回 None
    pub async fn watch_battle(&self, battle_id: &str) -> Option<BattleResult> {
        let mut last_status: Option<String> = None;
        let mut last_rounds = 0usize;
        let mut last_round: Option<f64> = None;

        while !self.cancel.is_cancelled() {
            let Some(payload) = self.poll_battle(battle_id).await else {
                self.sleeper.sleep(self.settings.poll_failure_wait).await;
                continue;
            };
            let battle = &payload.battle;
            let status = battle.status_lower();

            let changed = payload.rounds.len() > last_rounds
                || last_status.as_deref() != Some(status.as_str())
                || last_round != Some(battle.current_round);
            if changed {
                for line in payload.render(&self.settings.agent_id) {
                    tracing::info!(battle = %battle_id, "{}", line);
                }
                last_rounds = payload.rounds.len();
                last_status = Some(status.clone());
                last_round = Some(battle.current_round);
            }

            if battle.is_completed() {
                let result = if battle.winner_id.as_deref() == Some(self.settings.agent_id.as_str()) {
                    tracing::info!(battle = %battle_id, "VICTORY");
                    BattleResult::Victory
                } else {
                    tracing::info!(battle = %battle_id, "DEFEAT");
                    BattleResult::Defeat
                };
                return Some(result);
            }

            self.sleeper
                .sleep(self.settings.poll_delay(battle.current_round))
                .await;
        }
        None
    }

    /// 一场完整的对战：创建并观战到结束
    pub async fn run_battle(&self) -> BattleOutcome {
        let Some(battle_id) = self.create_battle().await else {
            return BattleOutcome::NotCreated;
        };
        match self.watch_battle(&battle_id).await {
            Some(result) => BattleOutcome::Finished { battle_id, result },
            None => BattleOutcome::Cancelled,
        }
    }

    /// 循环对战直到取消
    pub async fn run(&self) {
        tracing::info!(
            agent = %self.settings.agent_id,
            cooldown_secs = self.settings.cooldown.as_secs(),
            "Arena watcher started"
        );
        while !self.cancel.is_cancelled() {
            match self.run_battle().await {
                BattleOutcome::NotCreated => {
                    tracing::warn!(
                        "Could not create battle, waiting {}s",
                        self.settings.create_failure_wait.as_secs()
                    );
                    self.sleeper.sleep(self.settings.create_failure_wait).await;
                }
                BattleOutcome::Finished { .. } => {
                    if self.cancel.is_cancelled() {
                        break;
                    }
                    tracing::info!(
                        "Battle finished, cooling down {}s",
                        self.settings.cooldown.as_secs()
                    );
                    self.sleeper.sleep(self.settings.cooldown).await;
                }
                BattleOutcome::Cancelled => break,
            }
        }
        tracing::info!("Arena watcher stopped");
    }
}
