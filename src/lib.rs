//! moltbot - 远端生存对战游戏的自主智能体
//!
//! 模块划分：
//! - **api**: 弹性请求层（重试策略、传输、执行器）、游戏 API 客户端与数据模型
//! - **agent**: 成员关系状态机、移动规划、免费动作、决策规则、单智能体主循环
//! - **core**: 错误、时钟、日志流、状态投影、智能体监管、优雅关闭
//! - **config**: 应用配置加载（TOML + 环境变量）与凭证文件
//! - **observability**: tracing 初始化
//! - **arena**: 竞技场观战器

pub mod agent;
pub mod api;
pub mod arena;
pub mod config;
pub mod core;
pub mod observability;

pub use agent::{AgentRunner, PolicyProfile};
pub use crate::core::{AgentError, AgentSupervisor};
