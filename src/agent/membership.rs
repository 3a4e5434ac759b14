//! 成员关系状态机：找到或恢复自己在某个对局中的席位
//!
//! Unregistered → Searching → (Registering | Recovering) → Active → Dead → Searching。
//! 搜索失败不是致命错误：达到上限后让出，下一轮循环重新进入 Searching。

use std::time::Duration;

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::api::{GameClient, GameStatus, RequestError};
use crate::core::clock::Sleeper;
use crate::core::feed::AgentLog;
use crate::core::state::RecoveryState;

/// 冲突载荷中可能携带对局 id 的位置
const CONFLICT_GAME_ID_PATHS: [&str; 5] = [
    "/error/gameId",
    "/error/currentGameId",
    "/gameId",
    "/currentGameId",
    "/data/gameId",
];

#[derive(Debug, Clone)]
pub struct MembershipSettings {
    /// 没有等待中的对局时的轮询间隔
    pub poll_interval: Duration,
    /// 每轮最多搜索次数
    pub max_search_attempts: u32,
}

impl Default for MembershipSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(15),
            max_search_attempts: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JoinOutcome {
    Joined {
        game_id: String,
        agent_id: String,
        recovered: bool,
        /// 与上一次记住的对局不同（规划状态需要清空）
        new_game: bool,
    },
    /// 本轮没找到可加入的对局
    Yielded,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct Membership {
    name: String,
    state: RecoveryState,
    agent_id: Option<String>,
    game_id: Option<String>,
    settings: MembershipSettings,
}

/// 是否为“账号已在对局中”的冲突
pub fn is_conflict(err: &RequestError) -> bool {
    if err.status() == Some(409) {
        return true;
    }
    let code = err
        .body()
        .and_then(|b| b.pointer("/error/code").or_else(|| b.get("code")))
        .and_then(Value::as_str)
        .map(str::to_lowercase);
    let message = err.server_message().map(|m| m.to_lowercase());
    code.into_iter()
        .chain(message)
        .any(|text| text.contains("already"))
}

/// 冲突载荷里携带的对局 id
pub fn conflict_game_id(err: &RequestError) -> Option<String> {
    let body = err.body()?;
    CONFLICT_GAME_ID_PATHS
        .iter()
        .filter_map(|path| body.pointer(path))
        .find_map(|v| v.as_str().filter(|s| !s.is_empty()))
        .map(str::to_string)
}

impl Membership {
    pub fn new(name: impl Into<String>, settings: MembershipSettings) -> Self {
        Self {
            name: name.into(),
            state: RecoveryState::Unregistered,
            agent_id: None,
            game_id: None,
            settings,
        }
    }

    /// 启动时带入上次记住的对局 id，首次建立成员关系时先尝试恢复
    pub fn with_last_game(mut self, game_id: Option<String>) -> Self {
        self.game_id = game_id;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> RecoveryState {
        self.state
    }

    pub fn agent_id(&self) -> Option<&str> {
        self.agent_id.as_deref()
    }

    pub fn game_id(&self) -> Option<&str> {
        self.game_id.as_deref()
    }

    /// 当前持有有效席位
    pub fn is_active(&self) -> bool {
        self.state == RecoveryState::Active && self.agent_id.is_some()
    }

    /// 对局结束：丢弃 agent id，回到搜索
    pub fn leave_session(&mut self) {
        self.agent_id = None;
        self.state = RecoveryState::Searching;
    }

    pub fn mark_dead(&mut self) {
        self.agent_id = None;
        self.state = RecoveryState::Dead;
    }

    fn adopt(&mut self, game_id: String, agent_id: String, recovered: bool) -> JoinOutcome {
        let new_game = self.game_id.as_deref() != Some(game_id.as_str());
        self.game_id = Some(game_id.clone());
        self.agent_id = Some(agent_id.clone());
        self.state = RecoveryState::Active;
        JoinOutcome::Joined {
            game_id,
            agent_id,
            recovered,
            new_game,
        }
    }

    /// 在指定对局中按名字找回自己的 agent id；对局已结束时拒绝
    pub async fn recover(
        &mut self,
        client: &dyn GameClient,
        game_id: &str,
        log: &AgentLog,
    ) -> Option<JoinOutcome> {
        self.state = RecoveryState::Recovering;
        let state = match client.game_state(game_id).await {
            Ok(state) => state,
            Err(e) => {
                tracing::warn!(slot = log.slot(), game = %game_id, error = %e, "Recovery lookup failed");
                return None;
            }
        };
        if state.status.is_over() {
            log.info(format!("Game {game_id} is {}, not recovering", state.status.as_str()));
            return None;
        }
        let entry = state
            .agents
            .into_iter()
            .find(|a| a.name == self.name && a.is_alive)?;
        log.info(format!("Recovered agent {} in game {game_id}", entry.id));
        Some(self.adopt(game_id.to_string(), entry.id, true))
    }

    /// 建立成员关系：恢复（若有记住的对局）→ 搜索等待中的对局 → 注册；冲突时转入恢复
    pub async fn establish(
        &mut self,
        client: &dyn GameClient,
        sleeper: &dyn Sleeper,
        cancel: &CancellationToken,
        log: &AgentLog,
    ) -> JoinOutcome {
        if self.state == RecoveryState::Unregistered {
            if let Some(last) = self.game_id.clone() {
                if let Some(joined) = self.recover(client, &last, log).await {
                    return joined;
                }
            }
        }

        let max_attempts = self.settings.max_search_attempts.max(1);
        for attempt in 1..=max_attempts {
            if cancel.is_cancelled() {
                return JoinOutcome::Cancelled;
            }
            self.state = RecoveryState::Searching;

            let games = match client.list_games(GameStatus::Waiting).await {
                Ok(games) => games,
                Err(e) => {
                    tracing::warn!(slot = log.slot(), error = %e, "Listing waiting games failed");
                    Vec::new()
                }
            };

            match games.first() {
                Some(game) => {
                    if let Some(joined) = self.try_register(client, &game.id, log).await {
                        return joined;
                    }
                }
                None => {
                    tracing::debug!(slot = log.slot(), attempt, "No waiting games");
                }
            }

            self.state = RecoveryState::Searching;
            if attempt < max_attempts {
                sleeper.sleep(self.settings.poll_interval).await;
            }
        }

        log.warn(format!("No game joined after {max_attempts} attempts, yielding"));
        JoinOutcome::Yielded
    }

    async fn try_register(
        &mut self,
        client: &dyn GameClient,
        game_id: &str,
        log: &AgentLog,
    ) -> Option<JoinOutcome> {
        self.state = RecoveryState::Registering;
        match client.register(game_id, &self.name).await {
            Ok(registration) => {
                let joined_game = registration.game_id.unwrap_or_else(|| game_id.to_string());
                log.info(format!("Registered as {} in game {joined_game}", registration.id));
                Some(self.adopt(joined_game, registration.id, false))
            }
            Err(e) if is_conflict(&e) => {
                let target = conflict_game_id(&e).or_else(|| self.game_id.clone());
                log.warn(format!(
                    "Already in a game ({}), recovering",
                    target.as_deref().unwrap_or("unknown")
                ));
                match target {
                    Some(target) => self.recover(client, &target, log).await,
                    None => None,
                }
            }
            Err(e) => {
                log.warn(format!("Registration in {game_id} failed: {e}"));
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::api::types::{AgentEntry, GameState, GameSummary, Registration};
    use crate::api::MockGameClient;
    use crate::core::clock::RecordingSleeper;
    use crate::core::feed::LogFeed;

    fn waiting(id: &str) -> GameSummary {
        GameSummary {
            id: id.into(),
            name: None,
            status: GameStatus::Waiting,
        }
    }

    fn game(id: &str, status: GameStatus, agents: &[(&str, &str)]) -> GameState {
        GameState {
            id: id.into(),
            status,
            agents: agents
                .iter()
                .map(|(aid, name)| AgentEntry {
                    id: aid.to_string(),
                    name: name.to_string(),
                    is_alive: true,
                })
                .collect(),
        }
    }

    fn settings(attempts: u32) -> MembershipSettings {
        MembershipSettings {
            poll_interval: Duration::from_secs(15),
            max_search_attempts: attempts,
        }
    }

    fn log() -> AgentLog {
        LogFeed::new(16).for_slot(1)
    }

    #[tokio::test]
    async fn test_registers_into_first_waiting_game() {
        let client = MockGameClient::new();
        client.push_games(Ok(vec![waiting("g1"), waiting("g2")]));
        client.push_registration(Ok(Registration {
            id: "a1".into(),
            game_id: None,
        }));
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(3));

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                game_id: "g1".into(),
                agent_id: "a1".into(),
                recovered: false,
                new_game: true,
            }
        );
        assert!(membership.is_active());
        assert!(client.calls().contains(&"register:g1:Bee-1".to_string()));
        assert!(sleeper.recorded().is_empty());
    }

    #[tokio::test]
    async fn test_polls_then_yields_when_no_games() {
        let client = MockGameClient::new();
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(3));

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert_eq!(outcome, JoinOutcome::Yielded);
        assert_eq!(sleeper.recorded_secs(), vec![15.0, 15.0]);
        assert_eq!(membership.state(), RecoveryState::Searching);
        assert!(!membership.is_active());
    }

    #[tokio::test]
    async fn test_conflict_recovers_with_payload_game_id_over_stale_one() {
        let client = MockGameClient::new();
        client.push_games(Ok(vec![waiting("g1")]));
        client.push_registration(Err(RequestError::Rejected {
            status: 409,
            body: json!({"success": false, "error": {"code": "ALREADY_IN_GAME", "gameId": "g9"}}),
        }));
        client.insert_game_state(game("g9", GameStatus::Running, &[("x", "Other"), ("a9", "Bee-1")]));
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(2)).with_last_game(Some("stale".into()));

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert_eq!(
            outcome,
            JoinOutcome::Joined {
                game_id: "g9".into(),
                agent_id: "a9".into(),
                recovered: true,
                new_game: true,
            }
        );
        let lookups: Vec<String> = client
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("game_state:"))
            .collect();
        assert_eq!(lookups, vec!["game_state:stale", "game_state:g9"]);
    }

    #[tokio::test]
    async fn test_conflict_without_payload_id_uses_last_known_game() {
        let client = MockGameClient::new();
        client.push_games(Ok(vec![waiting("g1")]));
        client.push_registration(Err(RequestError::Rejected {
            status: 400,
            body: json!({"success": false, "error": "Agent already registered in a game"}),
        }));
        client.insert_game_state(game("g5", GameStatus::Running, &[("a5", "Bee-1")]));
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(2)).with_last_game(Some("g5".into()));
        membership.leave_session();

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert!(matches!(
            outcome,
            JoinOutcome::Joined { ref agent_id, recovered: true, new_game: false, .. } if agent_id == "a5"
        ));
    }

    #[tokio::test]
    async fn test_recovery_refuses_finished_game() {
        let client = MockGameClient::new();
        client.insert_game_state(game("g2", GameStatus::Finished, &[("a2", "Bee-1")]));
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(1)).with_last_game(Some("g2".into()));

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert_eq!(outcome, JoinOutcome::Yielded);
        assert!(client.calls().contains(&"list_games:waiting".to_string()));
    }

    #[tokio::test]
    async fn test_startup_recovery_skips_search() {
        let client = MockGameClient::new();
        client.insert_game_state(game("g2", GameStatus::Running, &[("a2", "Bee-1")]));
        let sleeper = RecordingSleeper::new();
        let mut membership = Membership::new("Bee-1", settings(3)).with_last_game(Some("g2".into()));

        let outcome = membership
            .establish(&client, &sleeper, &CancellationToken::new(), &log())
            .await;

        assert!(matches!(outcome, JoinOutcome::Joined { recovered: true, new_game: false, .. }));
        assert!(!client.calls().iter().any(|c| c.starts_with("list_games")));
    }

    #[tokio::test]
    async fn test_cancelled_before_search() {
        let client = MockGameClient::new();
        let sleeper = RecordingSleeper::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut membership = Membership::new("Bee-1", settings(3));

        let outcome = membership.establish(&client, &sleeper, &cancel, &log()).await;
        assert_eq!(outcome, JoinOutcome::Cancelled);
        assert!(client.calls().is_empty());
    }

    #[test]
    fn test_conflict_detection() {
        let by_status = RequestError::Rejected { status: 409, body: json!({}) };
        assert!(is_conflict(&by_status));
        let by_code = RequestError::Rejected {
            status: 400,
            body: json!({"error": {"code": "AGENT_ALREADY_IN_GAME", "currentGameId": "g3"}}),
        };
        assert!(is_conflict(&by_code));
        assert_eq!(conflict_game_id(&by_code).as_deref(), Some("g3"));
        let unrelated = RequestError::Rejected {
            status: 400,
            body: json!({"error": {"message": "Game is full"}}),
        };
        assert!(!is_conflict(&unrelated));
        assert!(!is_conflict(&RequestError::ServerExhausted { attempts: 5 }));
    }

    #[test]
    fn test_death_and_leave_drop_agent_id() {
        let mut membership = Membership::new("Bee-1", settings(1));
        membership.adopt("g1".into(), "a1".into(), false);
        membership.mark_dead();
        assert_eq!(membership.state(), RecoveryState::Dead);
        assert_eq!(membership.agent_id(), None);
        assert_eq!(membership.game_id(), Some("g1"));

        membership.adopt("g1".into(), "a1".into(), false);
        membership.leave_session();
        assert_eq!(membership.state(), RecoveryState::Searching);
        assert!(!membership.is_active());
    }
}
