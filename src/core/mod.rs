//! 核心层：错误、时钟、日志流、状态投影、智能体监管与优雅关闭

pub mod clock;
pub mod error;
pub mod feed;
pub mod shutdown;
pub mod state;
pub mod supervisor;

pub use clock::{RecordingSleeper, Sleeper, TokioSleeper};
pub use error::AgentError;
pub use feed::{AgentLog, FeedEvent, FeedLevel, LogFeed};
pub use shutdown::{
    AgentsCleanup, CleanupOutcome, ShutdownCleanup, ShutdownCoordinator, ShutdownManager,
    ShutdownReason,
};
pub use state::{AgentStatus, RecoveryState};
pub use supervisor::{AgentSupervisor, ClientFactory, HttpClientFactory, SupervisorSettings};
