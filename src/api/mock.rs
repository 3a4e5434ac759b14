//! Mock 实现（用于测试，无需网络）
//!
//! - MockTransport：按脚本依次返回 (状态码, 载荷) 或网络错误，并记录收到的请求
//! - MockGameClient：按脚本返回对局列表、注册结果、状态快照，并记录提交的动作

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::{json, Value};

use super::client::{ApiRequest, RawResponse, Transport};
use super::game::GameClient;
use super::types::{Action, GameState, GameStatus, GameSummary, Registration, Snapshot};
use super::RequestError;

fn lock<T>(m: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Default)]
pub struct MockTransport {
    script: Mutex<VecDeque<Result<RawResponse, String>>>,
    requests: Mutex<Vec<ApiRequest>>,
}

impl MockTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, status: u16, body: &str) {
        lock(&self.script).push_back(Ok(RawResponse {
            status,
            body: body.to_string(),
        }));
    }

    pub fn push_transport_error(&self, message: &str) {
        lock(&self.script).push_back(Err(message.to_string()));
    }

    pub fn requests(&self) -> Vec<ApiRequest> {
        lock(&self.requests).clone()
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, String> {
        lock(&self.requests).push(request.clone());
        lock(&self.script)
            .pop_front()
            .unwrap_or_else(|| Err("no scripted response".to_string()))
    }
}

type SubmitHook = Box<dyn Fn(&Action) + Send + Sync>;

/// 脚本化的游戏客户端
///
/// 快照队列只剩一个时会重复返回它，便于多次刷新。
#[derive(Default)]
pub struct MockGameClient {
    games: Mutex<VecDeque<Result<Vec<GameSummary>, RequestError>>>,
    registrations: Mutex<VecDeque<Result<Registration, RequestError>>>,
    game_states: Mutex<HashMap<String, GameState>>,
    snapshots: Mutex<VecDeque<Result<Snapshot, RequestError>>>,
    action_results: Mutex<VecDeque<Result<Value, RequestError>>>,
    submitted: Mutex<Vec<Action>>,
    calls: Mutex<Vec<String>>,
    submit_hook: Mutex<Option<SubmitHook>>,
}

impl MockGameClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_games(&self, games: Result<Vec<GameSummary>, RequestError>) {
        lock(&self.games).push_back(games);
    }

    pub fn push_registration(&self, result: Result<Registration, RequestError>) {
        lock(&self.registrations).push_back(result);
    }

    pub fn insert_game_state(&self, state: GameState) {
        lock(&self.game_states).insert(state.id.clone(), state);
    }

    pub fn push_snapshot(&self, snapshot: Result<Snapshot, RequestError>) {
        lock(&self.snapshots).push_back(snapshot);
    }

    pub fn push_action_result(&self, result: Result<Value, RequestError>) {
        lock(&self.action_results).push_back(result);
    }

    /// 每次提交动作时回调（例如在测试中触发停止）
    pub fn on_submit(&self, hook: impl Fn(&Action) + Send + Sync + 'static) {
        *lock(&self.submit_hook) = Some(Box::new(hook));
    }

    pub fn submitted(&self) -> Vec<Action> {
        lock(&self.submitted).clone()
    }

    /// 调用记录，如 "register:g1"、"game_state:g9"
    pub fn calls(&self) -> Vec<String> {
        lock(&self.calls).clone()
    }

    fn record(&self, call: String) {
        lock(&self.calls).push(call);
    }
}

fn not_found() -> RequestError {
    RequestError::Rejected {
        status: 404,
        body: json!({"success": false, "error": "not found"}),
    }
}

#[async_trait]
impl GameClient for MockGameClient {
    async fn list_games(&self, status: GameStatus) -> Result<Vec<GameSummary>, RequestError> {
        self.record(format!("list_games:{}", status.as_str()));
        lock(&self.games).pop_front().unwrap_or_else(|| Ok(Vec::new()))
    }

    async fn register(&self, game_id: &str, name: &str) -> Result<Registration, RequestError> {
        self.record(format!("register:{game_id}:{name}"));
        lock(&self.registrations)
            .pop_front()
            .unwrap_or_else(|| Err(not_found()))
    }

    async fn game_state(&self, game_id: &str) -> Result<GameState, RequestError> {
        self.record(format!("game_state:{game_id}"));
        lock(&self.game_states)
            .get(game_id)
            .cloned()
            .ok_or_else(not_found)
    }

    async fn agent_state(&self, game_id: &str, agent_id: &str) -> Result<Snapshot, RequestError> {
        self.record(format!("agent_state:{game_id}:{agent_id}"));
        let mut snapshots = lock(&self.snapshots);
        if snapshots.len() > 1 {
            return snapshots.pop_front().unwrap_or_else(|| Err(not_found()));
        }
        snapshots.front().cloned().unwrap_or_else(|| Err(not_found()))
    }

    async fn submit_action(
        &self,
        game_id: &str,
        agent_id: &str,
        action: &Action,
        _reasoning: Option<&str>,
    ) -> Result<Value, RequestError> {
        self.record(format!("submit:{game_id}:{agent_id}:{}", action.kind()));
        lock(&self.submitted).push(action.clone());
        if let Some(hook) = lock(&self.submit_hook).as_ref() {
            hook(action);
        }
        lock(&self.action_results)
            .pop_front()
            .unwrap_or_else(|| Ok(json!({"success": true})))
    }
}
