//! 日志流：所有智能体共享一条广播通道，按槽位打标
//!
//! 发送是尽力而为：没有订阅者或订阅者落后时丢弃，不阻塞智能体循环。

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FeedLevel {
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize)]
pub struct FeedEvent {
    pub slot: u32,
    pub at: DateTime<Utc>,
    pub level: FeedLevel,
    pub message: String,
}

#[derive(Clone, Debug)]
pub struct LogFeed {
    tx: broadcast::Sender<FeedEvent>,
}

impl LogFeed {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FeedEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: FeedEvent) {
        let _ = self.tx.send(event);
    }

    /// 绑定槽位的写入端
    pub fn for_slot(&self, slot: u32) -> AgentLog {
        AgentLog {
            slot,
            feed: self.clone(),
        }
    }
}

impl Default for LogFeed {
    fn default() -> Self {
        Self::new(256)
    }
}

/// 单个智能体的日志写入端：同时写 tracing 与广播流
#[derive(Clone, Debug)]
pub struct AgentLog {
    slot: u32,
    feed: LogFeed,
}

impl AgentLog {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    fn emit(&self, level: FeedLevel, message: String) {
        self.feed.publish(FeedEvent {
            slot: self.slot,
            at: Utc::now(),
            level,
            message,
        });
    }

    pub fn info(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::info!(slot = self.slot, "{}", message);
        self.emit(FeedLevel::Info, message);
    }

    pub fn warn(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::warn!(slot = self.slot, "{}", message);
        self.emit(FeedLevel::Warn, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        let message = message.into();
        tracing::error!(slot = self.slot, "{}", message);
        self.emit(FeedLevel::Error, message);
    }
}
