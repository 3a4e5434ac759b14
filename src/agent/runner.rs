//! 单个智能体的主循环
//!
//! 每个智能体一个 tokio 任务，任务内严格串行：成员关系 → 拉取快照 → 免费动作 → 决策 → 提交。
//! 停止是协作式的：在循环边界、免费动作前、提交前检查 CancellationToken，已发出的请求与等待会先完成。

use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use super::inventory::{run_free_actions, FreeActionContext};
use super::membership::{JoinOutcome, Membership};
use super::movement::MovementPlanner;
use super::policy::{self, DecisionContext};
use super::profile::PolicyProfile;
use crate::api::{Action, GameClient, GameStatus, RequestError, Snapshot};
use crate::core::clock::Sleeper;
use crate::core::feed::AgentLog;
use crate::core::state::AgentStatus;

#[derive(Debug, Clone)]
pub struct LoopTiming {
    /// 两次动作之间的间隔
    pub tick_interval: Duration,
    /// 对局仍在 waiting 时的轮询间隔
    pub waiting_poll: Duration,
    /// 循环出错后的退避
    pub error_backoff: Duration,
}

impl Default for LoopTiming {
    fn default() -> Self {
        Self {
            tick_interval: Duration::from_secs(60),
            waiting_poll: Duration::from_secs(15),
            error_backoff: Duration::from_secs(5),
        }
    }
}

/// 一个 tick 的结果，决定下一次等待多久
#[derive(Debug, Clone, PartialEq)]
pub enum TickOutcome {
    Acted(Action),
    /// 动作被服务端拒绝（如 EP 不足），按正常间隔继续
    ActionRejected(Action),
    Joined { game_id: String },
    /// 本轮没找到对局
    Yielded,
    /// 对局尚未开始，保留成员关系
    Waiting,
    /// 对局已结束，丢弃成员关系
    Left,
    Died,
    Stopped,
}

/// 运行时依赖
#[derive(Clone)]
pub struct RunnerDeps {
    pub client: Arc<dyn GameClient>,
    pub sleeper: Arc<dyn Sleeper>,
    pub log: AgentLog,
    pub cancel: CancellationToken,
}

pub struct AgentRunner {
    slot: u32,
    membership: Membership,
    planner: MovementPlanner,
    profile: PolicyProfile,
    team_prefix: Option<String>,
    timing: LoopTiming,
    rng: StdRng,
    deps: RunnerDeps,
    status: watch::Sender<AgentStatus>,
}

impl AgentRunner {
    pub fn new(
        slot: u32,
        membership: Membership,
        profile: PolicyProfile,
        timing: LoopTiming,
        deps: RunnerDeps,
    ) -> (Self, watch::Receiver<AgentStatus>) {
        let team_prefix = profile.team_prefix_for(membership.name());
        let (status, status_rx) = watch::channel(AgentStatus::new(slot, membership.name()));
        let runner = Self {
            slot,
            membership,
            planner: MovementPlanner::new(),
            profile,
            team_prefix,
            timing,
            rng: StdRng::from_entropy(),
            deps,
            status,
        };
        (runner, status_rx)
    }

    /// 固定随机种子（测试用）
    pub fn with_rng(mut self, rng: StdRng) -> Self {
        self.rng = rng;
        self
    }

    pub fn membership(&self) -> &Membership {
        &self.membership
    }

    fn publish(&self, update: impl FnOnce(&mut AgentStatus)) {
        let state = self.membership.state();
        let game_id = self.membership.game_id().map(str::to_string);
        let agent_id = self.membership.agent_id().map(str::to_string);
        self.status.send_modify(|status| {
            status.state = state;
            status.game_id = game_id;
            status.agent_id = agent_id;
            update(status);
            status.touch();
        });
    }

    /// 循环直到被取消；单个 tick 的失败只会带来退避，不会结束循环
    pub async fn run(mut self) {
        let cancel = self.deps.cancel.clone();
        self.publish(|s| s.running = true);
        self.deps.log.info(format!("Agent {} started", self.membership.name()));

        while !cancel.is_cancelled() {
            let delay = match self.tick().await {
                Ok(TickOutcome::Stopped) => break,
                Ok(TickOutcome::Acted(_)) | Ok(TickOutcome::ActionRejected(_)) => {
                    self.timing.tick_interval
                }
                Ok(TickOutcome::Waiting) | Ok(TickOutcome::Yielded) => self.timing.waiting_poll,
                Ok(TickOutcome::Joined { .. }) | Ok(TickOutcome::Left) | Ok(TickOutcome::Died) => {
                    Duration::ZERO
                }
                Err(e) => {
                    self.deps.log.error(format!("Tick failed: {e}"));
                    let message = e.to_string();
                    self.publish(|s| s.last_error = Some(message));
                    self.timing.error_backoff
                }
            };
            if cancel.is_cancelled() {
                break;
            }
            if !delay.is_zero() {
                self.deps.sleeper.sleep(delay).await;
            }
        }

        self.publish(|s| s.running = false);
        self.deps.log.info(format!("Agent {} stopped", self.membership.name()));
    }

    /// 执行一个 tick
    pub async fn tick(&mut self) -> Result<TickOutcome, RequestError> {
        let deps = self.deps.clone();
        if deps.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped);
        }

        if !self.membership.is_active() {
            let outcome = self
                .membership
                .establish(deps.client.as_ref(), deps.sleeper.as_ref(), &deps.cancel, &deps.log)
                .await;
            self.publish(|_| {});
            return Ok(match outcome {
                JoinOutcome::Joined {
                    game_id, new_game, ..
                } => {
                    if new_game {
                        self.planner.reset();
                    }
                    TickOutcome::Joined { game_id }
                }
                JoinOutcome::Yielded => TickOutcome::Yielded,
                JoinOutcome::Cancelled => TickOutcome::Stopped,
            });
        }

        let (Some(game_id), Some(agent_id)) = (
            self.membership.game_id().map(str::to_string),
            self.membership.agent_id().map(str::to_string),
        ) else {
            return Ok(TickOutcome::Yielded);
        };

        let snapshot = match deps.client.agent_state(&game_id, &agent_id).await {
            Ok(snapshot) => snapshot,
            Err(e) if is_gone(&e) => return Ok(self.session_gone(&game_id)),
            Err(e) => return Err(e),
        };
        if let Some(outcome) = self.check_session(&snapshot, &game_id) {
            return Ok(outcome);
        }
        self.publish_vitals(&snapshot);

        if deps.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped);
        }
        let report = match run_free_actions(
            &FreeActionContext {
                client: deps.client.as_ref(),
                game_id: &game_id,
                agent_id: &agent_id,
                cancel: &deps.cancel,
                max_actions: self.profile.max_free_actions,
            },
            snapshot,
        )
        .await
        {
            Ok(report) => report,
            Err(e) if is_gone(&e) => return Ok(self.session_gone(&game_id)),
            Err(e) => return Err(e),
        };
        let snapshot = report.snapshot;

        let decision = policy::decide(
            &DecisionContext {
                snapshot: &snapshot,
                profile: &self.profile,
                team_prefix: self.team_prefix.as_deref(),
            },
            &mut self.planner,
            &mut self.rng,
        );

        if deps.cancel.is_cancelled() {
            return Ok(TickOutcome::Stopped);
        }
        tracing::info!(
            slot = self.slot,
            game = %game_id,
            agent = %agent_id,
            rule = decision.rule.as_str(),
            action = decision.action.kind(),
            "{}",
            decision.reason
        );
        let kind = decision.action.kind();
        match deps
            .client
            .submit_action(&game_id, &agent_id, &decision.action, Some(&decision.reason))
            .await
        {
            Ok(_) => {
                deps.log.info(format!("{kind}: {}", decision.reason));
                self.publish(|s| {
                    s.last_action = Some(kind.to_string());
                    s.last_error = None;
                });
                Ok(TickOutcome::Acted(decision.action))
            }
            Err(e) if is_gone(&e) => Ok(self.session_gone(&game_id)),
            Err(RequestError::Rejected { status, .. }) => {
                deps.log.warn(format!("{kind} rejected (HTTP {status})"));
                Ok(TickOutcome::ActionRejected(decision.action))
            }
            Err(e) => Err(e),
        }
    }

    /// 对局或智能体在服务端已不存在：放弃成员关系，下个 tick 重新搜索
    fn session_gone(&mut self, game_id: &str) -> TickOutcome {
        self.deps
            .log
            .warn(format!("Game {game_id} is gone (HTTP 404), searching again"));
        self.membership.leave_session();
        self.publish(|_| {});
        TickOutcome::Left
    }

    /// 对局结束、自身死亡、对局未开始的处理
    fn check_session(&mut self, snapshot: &Snapshot, game_id: &str) -> Option<TickOutcome> {
        let status = snapshot.game_status.unwrap_or(GameStatus::Running);
        if status.is_over() {
            self.deps
                .log
                .info(format!("Game {game_id} is {}, searching again", status.as_str()));
            self.membership.leave_session();
            self.publish(|_| {});
            return Some(TickOutcome::Left);
        }
        if !snapshot.me.is_alive {
            self.deps.log.warn(format!("Died in game {game_id}"));
            self.membership.mark_dead();
            self.publish(|s| s.hp = Some(0));
            return Some(TickOutcome::Died);
        }
        if status == GameStatus::Waiting {
            tracing::debug!(slot = self.slot, game = %game_id, "Game not started yet");
            return Some(TickOutcome::Waiting);
        }
        None
    }

    fn publish_vitals(&self, snapshot: &Snapshot) {
        let hp = snapshot.me.hp;
        let ep = snapshot.me.ep;
        let region = snapshot.current_region.id.clone();
        self.publish(|s| {
            s.hp = Some(hp);
            s.ep = Some(ep);
            s.region = Some(region);
        });
    }
}

fn is_gone(err: &RequestError) -> bool {
    err.status() == Some(404)
}
