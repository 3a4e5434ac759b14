//! 远端游戏 API：弹性请求层、重试策略、数据模型与客户端

pub mod client;
pub mod error;
pub mod game;
pub mod mock;
pub mod retry;
pub mod types;

pub use client::{ApiRequest, Method, RawResponse, ReqwestTransport, ResilientClient, Transport};
pub use error::RequestError;
pub use game::{GameApi, GameClient};
pub use mock::{MockGameClient, MockTransport};
pub use retry::{server_error_backoff, Decision, RetryPolicy, RetryReason};
pub use types::{
    Action, GameState, GameStatus, GameSummary, Item, ItemCategory, Region, Snapshot, TargetType,
};
