//! 移动规划：毒圈规避的选路
//!
//! 相邻区域分为 safe / risky：已永久规避、视野中标记为毒圈、或在待扩散名单中即为 risky。
//! 选择顺序：回退上一区域（若干净）→ 随机 safe → 随机 risky → 随机任意相邻区域。
//! 每次选出目标后，previous 记为**当前**区域，使下一 tick 可以回退。

use std::collections::HashSet;

use rand::seq::SliceRandom;
use rand::Rng;

use crate::api::Snapshot;

/// 规划所需的区域视图（从快照借用）
#[derive(Debug, Clone)]
pub struct RegionView<'a> {
    pub current: &'a str,
    pub current_is_deathzone: bool,
    pub connections: &'a [String],
    /// 视野中标记为毒圈的区域
    pub deathzones: HashSet<&'a str>,
    /// 即将成为毒圈的区域
    pub pending: HashSet<&'a str>,
}

impl<'a> RegionView<'a> {
    pub fn from_snapshot(snapshot: &'a Snapshot) -> Self {
        Self {
            current: &snapshot.current_region.id,
            current_is_deathzone: snapshot.in_deathzone(),
            connections: &snapshot.current_region.connections,
            deathzones: snapshot.visible_deathzone_ids().collect(),
            pending: snapshot.pending_ids().collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveKind {
    /// 身处毒圈，退回来时的干净区域
    EscapeBacktrack,
    Backtrack,
    Safe,
    /// 无 safe 可选，被迫进入当前有风险的区域
    Risky,
    /// 所有相邻区域都已永久规避
    LastResort,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlannedMove {
    pub target: String,
    pub kind: MoveKind,
}

/// 每个智能体独有的规划状态：永久规避集合（只增不减）与上一区域
#[derive(Debug, Clone, Default)]
pub struct MovementPlanner {
    avoided: HashSet<String>,
    previous: Option<String>,
}

impl MovementPlanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn avoided(&self) -> &HashSet<String> {
        &self.avoided
    }

    pub fn previous(&self) -> Option<&str> {
        self.previous.as_deref()
    }

    /// 换到新的对局时清空
    pub fn reset(&mut self) {
        self.avoided.clear();
        self.previous = None;
    }

    fn is_risky(&self, view: &RegionView<'_>, id: &str) -> bool {
        self.avoided.contains(id) || view.deathzones.contains(id) || view.pending.contains(id)
    }

    fn backtrack_target(&self, view: &RegionView<'_>) -> Option<String> {
        let previous = self.previous.as_deref()?;
        (view.connections.iter().any(|c| c == previous) && !self.is_risky(view, previous))
            .then(|| previous.to_string())
    }

    /// 选出下一步目标；仅当没有任何相邻区域时返回 None
    pub fn next_move<R: Rng + ?Sized>(
        &mut self,
        view: &RegionView<'_>,
        rng: &mut R,
    ) -> Option<PlannedMove> {
        if view.connections.is_empty() {
            return None;
        }

        if view.current_is_deathzone {
            self.avoided.insert(view.current.to_string());
            self.avoided
                .extend(view.pending.iter().map(|id| id.to_string()));
        }

        let planned = self.select(view, rng);
        self.remember_hazards(view);
        self.previous = Some(view.current.to_string());
        Some(planned)
    }

    fn select<R: Rng + ?Sized>(&self, view: &RegionView<'_>, rng: &mut R) -> PlannedMove {
        if let Some(target) = self.backtrack_target(view) {
            let kind = if view.current_is_deathzone {
                tracing::info!(region = %target, "Escaping deathzone by backtracking");
                MoveKind::EscapeBacktrack
            } else {
                MoveKind::Backtrack
            };
            return PlannedMove { target, kind };
        }

        let (risky, safe): (Vec<&String>, Vec<&String>) = view
            .connections
            .iter()
            .partition(|c| self.is_risky(view, c));

        if let Some(target) = safe.choose(rng) {
            return PlannedMove {
                target: (*target).clone(),
                kind: MoveKind::Safe,
            };
        }

        // 只在尚未永久规避的 risky 出口中选（本次才看到的毒圈或待扩散区域）；
        // 全部已规避时交给最后的任意相邻区域
        let fresh: Vec<&String> = risky
            .iter()
            .copied()
            .filter(|c| !self.avoided.contains(c.as_str()))
            .collect();
        if let Some(target) = fresh.choose(rng) {
            if fresh.len() <= 2 {
                tracing::warn!(options = fresh.len(), region = %target, "Only a few risky exits left, forcing move");
            } else {
                tracing::warn!(region = %target, "No safe exit, taking risky move");
            }
            return PlannedMove {
                target: (*target).clone(),
                kind: MoveKind::Risky,
            };
        }

        let target = view
            .connections
            .choose(rng)
            .cloned()
            .unwrap_or_else(|| view.current.to_string());
        tracing::warn!(region = %target, "Every exit is avoided, moving at random");
        PlannedMove {
            target,
            kind: MoveKind::LastResort,
        }
    }

    /// 视野中见过的毒圈与待扩散区域一律永久规避
    fn remember_hazards(&mut self, view: &RegionView<'_>) {
        for id in view.deathzones.iter().chain(view.pending.iter()) {
            if !self.avoided.contains(*id) {
                self.avoided.insert(id.to_string());
            }
        }
    }
}
