//! moltbot-arena - 竞技场观战器
//!
//! 循环创建对战、轮询并渲染状态卡片、报告胜负，冷却后开始下一场。
//!
//! 运行方式：
//! ```bash
//! MOLTBOT__ARENA__AGENT_ID=... MOLTBOT__ARENA__API_KEY=... cargo run --bin moltbot-arena
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use moltbot::api::ReqwestTransport;
use moltbot::arena::ArenaWatcher;
use moltbot::config::load_config;
use moltbot::core::{ShutdownManager, TokioSleeper};
use moltbot::observability;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init();

    let cfg = load_config(std::env::args().nth(1).map(PathBuf::from))
        .context("Failed to load config")?;
    let arena = &cfg.arena;
    let agent_id = arena
        .agent_id
        .clone()
        .filter(|id| !id.trim().is_empty())
        .context("arena.agent_id is required (MOLTBOT__ARENA__AGENT_ID)")?;
    let api_key = arena
        .api_key
        .clone()
        .filter(|key| !key.trim().is_empty())
        .context("arena.api_key is required (MOLTBOT__ARENA__API_KEY)")?;

    let transport = ReqwestTransport::new(&arena.base_url, Some(&api_key), &cfg.api.user_agent)
        .context("Failed to build HTTP client")?;

    let shutdown = Arc::new(ShutdownManager::new());
    shutdown.install_signal_handlers();

    let watcher = ArenaWatcher::new(
        Arc::new(transport),
        Arc::new(TokioSleeper),
        cfg.api.retry.policy(),
        arena.settings(agent_id),
        shutdown.token(),
    );

    tokio::select! {
        _ = watcher.run() => {}
        _ = shutdown.wait_for_shutdown() => {
            tracing::info!("Stopping arena watcher");
        }
    }

    Ok(())
}
