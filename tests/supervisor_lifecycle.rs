//! 监管器集成测试：启动、加入对局、提交动作、停止后不再提交

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use moltbot::agent::ProfileRegistry;
use moltbot::api::types::{GameSummary, Registration};
use moltbot::api::{GameClient, GameStatus, MockGameClient, Snapshot};
use moltbot::config::AgentConfig;
use moltbot::core::{
    AgentError, AgentSupervisor, ClientFactory, RecordingSleeper, RecoveryState,
    SupervisorSettings,
};
use serde_json::json;
use tokio::sync::broadcast::error::RecvError;

struct SharedFactory(Arc<MockGameClient>);

impl ClientFactory for SharedFactory {
    fn client(&self, _credential: &str) -> Result<Arc<dyn GameClient>, AgentError> {
        Ok(self.0.clone())
    }
}

fn scripted_client() -> Arc<MockGameClient> {
    let client = Arc::new(MockGameClient::new());
    client.push_games(Ok(vec![GameSummary {
        id: "g1".into(),
        name: None,
        status: GameStatus::Waiting,
    }]));
    client.push_registration(Ok(Registration {
        id: "a1".into(),
        game_id: None,
    }));
    let snapshot: Snapshot = serde_json::from_value(json!({
        "self": {"id": "a1", "name": "Bee-1", "hp": 80, "ep": 10, "regionId": "r1"},
        "currentRegion": {"id": "r1", "connections": ["r2", "r3"]},
        "gameStatus": "running"
    }))
    .unwrap();
    client.push_snapshot(Ok(snapshot));
    client
}

fn supervisor(client: Arc<MockGameClient>) -> AgentSupervisor {
    AgentSupervisor::new(
        Arc::new(SharedFactory(client)),
        Arc::new(RecordingSleeper::new()),
        ProfileRegistry::default(),
        SupervisorSettings::default(),
    )
}

async fn wait_until_stopped(supervisor: &AgentSupervisor, slot: u32) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while supervisor.is_running(slot).await {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("agent should stop");
}

#[tokio::test]
async fn test_agent_acts_and_stops_cleanly() {
    let client = scripted_client();
    let supervisor = supervisor(client.clone());
    let mut feed = supervisor.subscribe();

    supervisor
        .load_credentials(HashMap::from([(1, "key-1".to_string())]))
        .await;
    supervisor.start(AgentConfig::new(1, "Bee-1")).await.unwrap();

    let acted = tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match feed.recv().await {
                Ok(event) if event.slot == 1 && event.message.starts_with("move:") => break true,
                Ok(_) | Err(RecvError::Lagged(_)) => continue,
                Err(RecvError::Closed) => break false,
            }
        }
    })
    .await
    .expect("agent should act");
    assert!(acted);

    supervisor.stop(1).await.unwrap();
    wait_until_stopped(&supervisor, 1).await;

    let submitted = client.submitted().len();
    assert!(submitted >= 1);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(client.submitted().len(), submitted);

    let status = supervisor.status(1).await.unwrap();
    assert!(!status.running);
    assert_eq!(status.game_id.as_deref(), Some("g1"));
    assert_eq!(status.state, RecoveryState::Active);
    assert!(client.calls().contains(&"register:g1:Bee-1".to_string()));
}

#[tokio::test]
async fn test_missing_credential_leaves_other_agents_running() {
    let client = scripted_client();
    let supervisor = supervisor(client);
    supervisor
        .load_credentials(HashMap::from([(1, "key-1".to_string())]))
        .await;

    supervisor.start(AgentConfig::new(1, "Bee-1")).await.unwrap();
    let err = supervisor.start(AgentConfig::new(2, "Bee-2")).await.unwrap_err();
    assert!(matches!(err, AgentError::MissingCredential(2)));
    assert!(supervisor.is_running(1).await);

    let statuses = supervisor.statuses().await;
    assert_eq!(statuses.len(), 1);
    assert_eq!(statuses[0].slot, 1);

    supervisor.shutdown().await;
    assert!(supervisor.statuses().await.is_empty());
}

#[tokio::test]
async fn test_restart_after_stop() {
    let client = scripted_client();
    let supervisor = supervisor(client);
    let config = AgentConfig {
        credential: Some("inline-key".into()),
        ..AgentConfig::new(3, "Bee-3")
    };

    supervisor.start(config.clone()).await.unwrap();
    supervisor.stop(3).await.unwrap();
    wait_until_stopped(&supervisor, 3).await;

    supervisor.start(config).await.unwrap();
    assert!(supervisor.is_running(3).await);
    supervisor.shutdown().await;
}
