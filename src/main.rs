//! moltbot - 多智能体自动对局
//!
//! 入口：初始化日志、加载配置与凭证、按槽位启动智能体，收到关闭信号后等待所有智能体退出。
//! 用法：`moltbot [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use moltbot::config::{load_config, load_credentials_file, AgentConfig};
use moltbot::core::{
    AgentError, AgentSupervisor, AgentsCleanup, HttpClientFactory, ShutdownCoordinator,
    ShutdownManager, Sleeper, SupervisorSettings, TokioSleeper,
};
use moltbot::observability;
use tokio_util::sync::CancellationToken;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let cfg = load_config(config_path).context("Failed to load config")?;
    if cfg.agents.is_empty() {
        tracing::warn!("No [[agents]] configured, nothing to run");
    }

    let sleeper: Arc<dyn Sleeper> = Arc::new(TokioSleeper);
    let factory = Arc::new(HttpClientFactory::new(
        cfg.api.base_url.clone(),
        cfg.api.user_agent.clone(),
        cfg.api.request_timeout(),
        cfg.api.retry.policy(),
        sleeper.clone(),
    ));
    let supervisor = Arc::new(AgentSupervisor::new(
        factory,
        sleeper,
        cfg.policy.registry(),
        SupervisorSettings {
            membership: cfg.membership.settings(),
            timing: cfg.app.loop_timing(),
            feed_capacity: cfg.app.feed_capacity,
            ..SupervisorSettings::default()
        },
    ));

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    if let Some(path) = &cfg.app.credentials_file {
        match load_credentials_file(path) {
            Ok(credentials) => {
                supervisor.load_credentials(credentials).await;
            }
            Err(e) => tracing::warn!(path = %path.display(), "Credentials file not loaded: {}", e),
        }
    }
    start_pending(&supervisor, &cfg.agents).await;

    if let Some(path) = cfg.app.credentials_file.clone() {
        tokio::spawn(watch_credentials(
            path,
            Duration::from_secs(cfg.app.credentials_poll_secs.max(1)),
            supervisor.clone(),
            cfg.agents.clone(),
            shutdown.token(),
        ));
    }

    tracing::info!("moltbot running with {} configured agent(s)", cfg.agents.len());
    shutdown.wait_for_shutdown().await;
    tracing::info!(reason = ?shutdown.reason(), "Stopping agents");

    let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(15));
    coordinator.register(AgentsCleanup::new(supervisor.clone()));
    coordinator.run_cleanup().await;

    Ok(())
}

/// 启动所有尚未运行的智能体；缺少凭证的槽位等凭证文件更新后再启动
async fn start_pending(supervisor: &AgentSupervisor, agents: &[AgentConfig]) {
    for agent in agents {
        if supervisor.is_running(agent.slot).await {
            continue;
        }
        match supervisor.start(agent.clone()).await {
            Ok(()) => {}
            Err(AgentError::MissingCredential(slot)) => {
                tracing::warn!(slot, "No credential yet, agent not started");
            }
            Err(e) => tracing::error!(slot = agent.slot, "Failed to start agent: {}", e),
        }
    }
}

/// 轮询凭证文件，凭证变化时交给监管器并补启动等待中的智能体
async fn watch_credentials(
    path: PathBuf,
    every: Duration,
    supervisor: Arc<AgentSupervisor>,
    agents: Vec<AgentConfig>,
    cancel: CancellationToken,
) {
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(every) => {}
        }
        match load_credentials_file(&path) {
            Ok(credentials) => {
                if !supervisor.load_credentials(credentials).await.is_empty() {
                    start_pending(&supervisor, &agents).await;
                }
            }
            Err(e) => tracing::debug!(path = %path.display(), "Credentials file unreadable: {}", e),
        }
    }
}
