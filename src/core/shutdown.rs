//! 进程级关闭：信号监听与收尾步骤
//!
//! Ctrl+C 或 SIGTERM 取消根 token；主循环醒来后按注册顺序执行收尾步骤，每步有独立时限。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::supervisor::AgentSupervisor;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    Interrupt,
    Terminate,
    /// 程序内部主动结束
    Requested,
}

/// 关闭信号；首次触发的原因被保留
#[derive(Default)]
pub struct ShutdownManager {
    token: CancellationToken,
    reason: Mutex<Option<ShutdownReason>>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn shutdown(&self, reason: ShutdownReason) {
        if let Ok(mut slot) = self.reason.lock() {
            if slot.is_none() {
                tracing::info!(?reason, "Shutdown triggered");
                *slot = Some(reason);
            }
        }
        self.token.cancel();
    }

    pub fn reason(&self) -> Option<ShutdownReason> {
        self.reason.lock().ok().and_then(|r| *r)
    }

    pub fn is_shutdown(&self) -> bool {
        self.token.is_cancelled()
    }

    pub async fn wait_for_shutdown(&self) {
        self.token.cancelled().await;
    }

    /// 后台任务等待 Ctrl+C 或 SIGTERM（非 unix 仅 Ctrl+C）
    pub fn install_signal_handlers(self: &Arc<Self>) {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let reason = tokio::select! {
                r = tokio::signal::ctrl_c() => match r {
                    Ok(()) => ShutdownReason::Interrupt,
                    Err(e) => {
                        tracing::warn!("Ctrl+C handler unavailable: {}", e);
                        return;
                    }
                },
                _ = terminate() => ShutdownReason::Terminate,
                _ = manager.wait_for_shutdown() => return,
            };
            manager.shutdown(reason);
        });
    }
}

#[cfg(unix)]
async fn terminate() {
    use tokio::signal::unix::{signal, SignalKind};
    match signal(SignalKind::terminate()) {
        Ok(mut sigterm) => {
            sigterm.recv().await;
        }
        Err(e) => {
            tracing::warn!("SIGTERM handler unavailable: {}", e);
            std::future::pending::<()>().await;
        }
    }
}

#[cfg(not(unix))]
async fn terminate() {
    std::future::pending::<()>().await;
}

/// 一个收尾步骤
#[async_trait::async_trait]
pub trait ShutdownCleanup: Send + Sync {
    fn name(&self) -> &'static str;

    async fn cleanup(&self) -> anyhow::Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    Done,
    Failed(String),
    TimedOut,
}

pub struct ShutdownCoordinator {
    steps: Vec<Box<dyn ShutdownCleanup>>,
    step_timeout: Duration,
}

impl ShutdownCoordinator {
    pub fn new(step_timeout: Duration) -> Self {
        Self {
            steps: Vec::new(),
            step_timeout,
        }
    }

    pub fn register<T: ShutdownCleanup + 'static>(&mut self, step: T) {
        self.steps.push(Box::new(step));
    }

    /// 顺序执行；单步失败或超时不影响后续步骤
    pub async fn run_cleanup(&self) -> Vec<(&'static str, CleanupOutcome)> {
        let mut report = Vec::with_capacity(self.steps.len());
        for step in &self.steps {
            let outcome = match tokio::time::timeout(self.step_timeout, step.cleanup()).await {
                Ok(Ok(())) => CleanupOutcome::Done,
                Ok(Err(e)) => CleanupOutcome::Failed(e.to_string()),
                Err(_) => CleanupOutcome::TimedOut,
            };
            match &outcome {
                CleanupOutcome::Done => tracing::info!(step = step.name(), "Cleanup done"),
                CleanupOutcome::Failed(e) => tracing::warn!(step = step.name(), "Cleanup failed: {}", e),
                CleanupOutcome::TimedOut => tracing::warn!(
                    step = step.name(),
                    "Cleanup timed out after {:?}",
                    self.step_timeout
                ),
            }
            report.push((step.name(), outcome));
        }
        report
    }
}

/// 停止全部智能体
pub struct AgentsCleanup {
    supervisor: Arc<AgentSupervisor>,
}

impl AgentsCleanup {
    pub fn new(supervisor: Arc<AgentSupervisor>) -> Self {
        Self { supervisor }
    }
}

#[async_trait::async_trait]
impl ShutdownCleanup for AgentsCleanup {
    fn name(&self) -> &'static str {
        "agents"
    }

    async fn cleanup(&self) -> anyhow::Result<()> {
        self.supervisor.shutdown().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::agent::ProfileRegistry;
    use crate::api::{GameClient, MockGameClient};
    use crate::config::AgentConfig;
    use crate::core::clock::RecordingSleeper;
    use crate::core::error::AgentError;
    use crate::core::supervisor::{ClientFactory, SupervisorSettings};

    #[test]
    fn test_first_reason_wins() {
        let manager = ShutdownManager::new();
        let token = manager.token();
        assert!(manager.reason().is_none());
        manager.shutdown(ShutdownReason::Terminate);
        manager.shutdown(ShutdownReason::Interrupt);
        assert!(token.is_cancelled());
        assert!(manager.is_shutdown());
        assert_eq!(manager.reason(), Some(ShutdownReason::Terminate));
    }

    struct Stuck;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Stuck {
        fn name(&self) -> &'static str {
            "stuck"
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            std::future::pending::<()>().await;
            Ok(())
        }
    }

    struct Broken;

    #[async_trait::async_trait]
    impl ShutdownCleanup for Broken {
        fn name(&self) -> &'static str {
            "broken"
        }

        async fn cleanup(&self) -> anyhow::Result<()> {
            anyhow::bail!("disk gone")
        }
    }

    #[tokio::test]
    async fn test_failing_steps_do_not_block_later_ones() {
        let mut coordinator = ShutdownCoordinator::new(Duration::from_millis(20));
        coordinator.register(Stuck);
        coordinator.register(Broken);
        let report = coordinator.run_cleanup().await;
        assert_eq!(
            report,
            vec![
                ("stuck", CleanupOutcome::TimedOut),
                ("broken", CleanupOutcome::Failed("disk gone".into())),
            ]
        );
    }

    struct MockFactory;

    impl ClientFactory for MockFactory {
        fn client(&self, _credential: &str) -> Result<Arc<dyn GameClient>, AgentError> {
            Ok(Arc::new(MockGameClient::new()))
        }
    }

    #[tokio::test]
    async fn test_agents_cleanup_stops_running_agents() {
        let supervisor = Arc::new(AgentSupervisor::new(
            Arc::new(MockFactory),
            Arc::new(RecordingSleeper::new()),
            ProfileRegistry::default(),
            SupervisorSettings::default(),
        ));
        supervisor
            .load_credentials(HashMap::from([(1, "k".to_string())]))
            .await;
        supervisor.start(AgentConfig::new(1, "Bee-1")).await.unwrap();

        let mut coordinator = ShutdownCoordinator::new(Duration::from_secs(15));
        coordinator.register(AgentsCleanup::new(supervisor.clone()));
        let report = coordinator.run_cleanup().await;

        assert_eq!(report, vec![("agents", CleanupOutcome::Done)]);
        assert!(!supervisor.is_running(1).await);
        assert!(supervisor.statuses().await.is_empty());
    }
}
