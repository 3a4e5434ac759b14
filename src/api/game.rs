//! 游戏 API：列出对局、注册、查询对局/智能体状态、提交动作
//!
//! GameClient 是核心逻辑依赖的接缝；GameApi 为基于 ResilientClient 的 HTTP 实现，
//! 测试中以 MockGameClient 替代。

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use super::client::{ApiRequest, ResilientClient};
use super::types::{Action, GameState, GameStatus, GameSummary, Registration, Snapshot};
use super::RequestError;

#[async_trait]
pub trait GameClient: Send + Sync {
    async fn list_games(&self, status: GameStatus) -> Result<Vec<GameSummary>, RequestError>;

    async fn register(&self, game_id: &str, name: &str) -> Result<Registration, RequestError>;

    async fn game_state(&self, game_id: &str) -> Result<GameState, RequestError>;

    async fn agent_state(&self, game_id: &str, agent_id: &str) -> Result<Snapshot, RequestError>;

    /// 提交动作；reasoning 仅供服务端展示，不影响结算
    async fn submit_action(
        &self,
        game_id: &str,
        agent_id: &str,
        action: &Action,
        reasoning: Option<&str>,
    ) -> Result<Value, RequestError>;
}

/// HTTP 实现
pub struct GameApi {
    client: ResilientClient,
    timeout: Duration,
}

impl GameApi {
    pub fn new(client: ResilientClient, timeout: Duration) -> Self {
        Self { client, timeout }
    }

    async fn fetch<T: DeserializeOwned>(&self, request: ApiRequest) -> Result<T, RequestError> {
        let value = self.client.execute(&request.with_timeout(self.timeout)).await?;
        decode(unwrap_data(value))
    }
}

/// 响应若带 data 字段则取其内容
fn unwrap_data(value: Value) -> Value {
    match value {
        Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    }
}

fn decode<T: DeserializeOwned>(value: Value) -> Result<T, RequestError> {
    serde_json::from_value(value).map_err(|e| RequestError::Decode(e.to_string()))
}

#[async_trait]
impl GameClient for GameApi {
    async fn list_games(&self, status: GameStatus) -> Result<Vec<GameSummary>, RequestError> {
        let request = ApiRequest::get(format!("/games?status={}", status.as_str()))
            .with_timeout(self.timeout);
        let value = unwrap_data(self.client.execute(&request).await?);
        // 兼容 { games: [...] } 与直接数组两种形态
        let list = match value {
            Value::Object(mut map) => map.remove("games").unwrap_or(Value::Array(Vec::new())),
            other => other,
        };
        decode(list)
    }

    async fn register(&self, game_id: &str, name: &str) -> Result<Registration, RequestError> {
        self.fetch(ApiRequest::post(
            format!("/games/{game_id}/agents/register"),
            json!({ "name": name }),
        ))
        .await
    }

    async fn game_state(&self, game_id: &str) -> Result<GameState, RequestError> {
        self.fetch(ApiRequest::get(format!("/games/{game_id}"))).await
    }

    async fn agent_state(&self, game_id: &str, agent_id: &str) -> Result<Snapshot, RequestError> {
        self.fetch(ApiRequest::get(format!(
            "/games/{game_id}/agents/{agent_id}/state"
        )))
        .await
    }

    async fn submit_action(
        &self,
        game_id: &str,
        agent_id: &str,
        action: &Action,
        reasoning: Option<&str>,
    ) -> Result<Value, RequestError> {
        let mut body = json!({ "action": action });
        if let Some(reasoning) = reasoning {
            body["thought"] = json!({ "reasoning": reasoning });
        }
        let request = ApiRequest::post(format!("/games/{game_id}/agents/{agent_id}/action"), body)
            .with_timeout(self.timeout);
        self.client.execute(&request).await.map(unwrap_data)
    }
}
