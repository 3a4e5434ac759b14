//! 智能体监管器：按槽位启动、停止、查询智能体
//!
//! 每个智能体一个 tokio 任务，持有根 CancellationToken 的子 token；停止单个槽位只取消它自己的子 token，
//! 整体关闭取消根 token。监管器不持有任何智能体的可变状态，只读取其 watch 状态投影。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use tokio::sync::{broadcast, watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::clock::Sleeper;
use super::error::AgentError;
use super::feed::{FeedEvent, LogFeed};
use super::state::AgentStatus;
use crate::agent::{AgentRunner, LoopTiming, Membership, MembershipSettings, ProfileRegistry, RunnerDeps};
use crate::api::{GameApi, GameClient, ReqwestTransport, ResilientClient, RetryPolicy};
use crate::config::AgentConfig;

/// 按凭证构造游戏客户端
pub trait ClientFactory: Send + Sync {
    fn client(&self, credential: &str) -> Result<Arc<dyn GameClient>, AgentError>;
}

/// HTTP 实现：每个凭证一个 reqwest 客户端，共享重试策略与 Sleeper
pub struct HttpClientFactory {
    base_url: String,
    user_agent: String,
    timeout: Duration,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
}

impl HttpClientFactory {
    pub fn new(
        base_url: impl Into<String>,
        user_agent: impl Into<String>,
        timeout: Duration,
        policy: RetryPolicy,
        sleeper: Arc<dyn Sleeper>,
    ) -> Self {
        Self {
            base_url: base_url.into(),
            user_agent: user_agent.into(),
            timeout,
            policy,
            sleeper,
        }
    }
}

impl ClientFactory for HttpClientFactory {
    fn client(&self, credential: &str) -> Result<Arc<dyn GameClient>, AgentError> {
        let transport = ReqwestTransport::new(&self.base_url, Some(credential), &self.user_agent)?;
        let client = ResilientClient::new(Arc::new(transport), self.sleeper.clone(), self.policy.clone());
        Ok(Arc::new(GameApi::new(client, self.timeout)))
    }
}

#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    pub membership: MembershipSettings,
    pub timing: LoopTiming,
    /// 关闭时等待每个任务结束的上限，超时则中止
    pub shutdown_grace: Duration,
    pub feed_capacity: usize,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            membership: MembershipSettings::default(),
            timing: LoopTiming::default(),
            shutdown_grace: Duration::from_secs(10),
            feed_capacity: 256,
        }
    }
}

struct AgentHandle {
    status: watch::Receiver<AgentStatus>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

pub struct AgentSupervisor {
    factory: Arc<dyn ClientFactory>,
    sleeper: Arc<dyn Sleeper>,
    profiles: ProfileRegistry,
    settings: SupervisorSettings,
    feed: LogFeed,
    root: CancellationToken,
    credentials: RwLock<HashMap<u32, String>>,
    agents: Mutex<HashMap<u32, AgentHandle>>,
}

impl AgentSupervisor {
    pub fn new(
        factory: Arc<dyn ClientFactory>,
        sleeper: Arc<dyn Sleeper>,
        profiles: ProfileRegistry,
        settings: SupervisorSettings,
    ) -> Self {
        let feed = LogFeed::new(settings.feed_capacity);
        Self {
            factory,
            sleeper,
            profiles,
            settings,
            feed,
            root: CancellationToken::new(),
            credentials: RwLock::new(HashMap::new()),
            agents: Mutex::new(HashMap::new()),
        }
    }

    /// 订阅全部智能体的日志流（按槽位打标）
    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.feed.subscribe()
    }

    /// 凭证加载钩子：合并新凭证，返回凭证发生变化的槽位。运行中的智能体在下次启动时才使用新凭证。
    pub async fn load_credentials(&self, credentials: HashMap<u32, String>) -> Vec<u32> {
        let mut current = self.credentials.write().await;
        let mut changed = Vec::new();
        for (slot, key) in credentials {
            if current.get(&slot) != Some(&key) {
                current.insert(slot, key);
                changed.push(slot);
            }
        }
        changed.sort_unstable();
        if !changed.is_empty() {
            tracing::info!(slots = ?changed, "Credentials updated");
        }
        changed
    }

    pub async fn has_credential(&self, slot: u32) -> bool {
        self.credentials.read().await.contains_key(&slot)
    }

    /// 启动一个智能体；缺少凭证时不启动，其它槽位不受影响
    pub async fn start(&self, config: AgentConfig) -> Result<(), AgentError> {
        let slot = config.slot;
        if config.name.trim().is_empty() {
            return Err(AgentError::Config(format!("agent in slot {slot} has no name")));
        }
        let mut agents = self.agents.lock().await;
        if agents.get(&slot).is_some_and(|h| !h.task.is_finished()) {
            return Err(AgentError::AlreadyRunning(slot));
        }

        let log = self.feed.for_slot(slot);
        let credential = match config.credential.clone().filter(|c| !c.trim().is_empty()) {
            Some(credential) => credential,
            None => match self.credentials.read().await.get(&slot).cloned() {
                Some(credential) => credential,
                None => {
                    log.warn(format!("No credential for {}, not starting", config.name));
                    return Err(AgentError::MissingCredential(slot));
                }
            },
        };

        let client = self.factory.client(&credential)?;
        let cancel = self.root.child_token();
        let membership = Membership::new(config.name.clone(), self.settings.membership.clone())
            .with_last_game(config.last_game.clone());
        let profile = self.profiles.resolve(config.profile.as_deref());
        let (runner, status) = AgentRunner::new(
            slot,
            membership,
            profile,
            self.settings.timing.clone(),
            RunnerDeps {
                client,
                sleeper: self.sleeper.clone(),
                log,
                cancel: cancel.clone(),
            },
        );

        let task = tokio::spawn(runner.run());
        tracing::info!(slot, name = %config.name, "Agent task spawned");
        agents.insert(slot, AgentHandle { status, cancel, task });
        Ok(())
    }

    /// 请求停止：协作式，当前请求或等待结束后生效
    pub async fn stop(&self, slot: u32) -> Result<(), AgentError> {
        let agents = self.agents.lock().await;
        let handle = agents.get(&slot).ok_or(AgentError::UnknownSlot(slot))?;
        handle.cancel.cancel();
        tracing::info!(slot, "Stop requested");
        Ok(())
    }

    pub async fn is_running(&self, slot: u32) -> bool {
        self.agents
            .lock()
            .await
            .get(&slot)
            .is_some_and(|h| !h.task.is_finished())
    }

    pub async fn status(&self, slot: u32) -> Option<AgentStatus> {
        self.agents
            .lock()
            .await
            .get(&slot)
            .map(|h| h.status.borrow().clone())
    }

    /// 所有已启动过的智能体状态，按槽位排序
    pub async fn statuses(&self) -> Vec<AgentStatus> {
        let agents = self.agents.lock().await;
        let mut statuses: Vec<AgentStatus> =
            agents.values().map(|h| h.status.borrow().clone()).collect();
        statuses.sort_by_key(|s| s.slot);
        statuses
    }

    /// 取消全部智能体并等待其任务结束；超过宽限期的任务被中止
    pub async fn shutdown(&self) {
        self.root.cancel();
        let handles: Vec<(u32, AgentHandle)> = self.agents.lock().await.drain().collect();
        tracing::info!("Waiting for {} agent task(s) to stop", handles.len());
        let grace = self.settings.shutdown_grace;
        let waits = handles.into_iter().map(|(slot, handle)| async move {
            let abort = handle.task.abort_handle();
            if tokio::time::timeout(grace, handle.task).await.is_err() {
                tracing::warn!(slot, "Agent did not stop in time, aborting");
                abort.abort();
            }
        });
        join_all(waits).await;
    }
}
