//! 智能体层错误类型
//!
//! 请求层的瞬时失败（429 / 500 / 网络）在 RequestError 内部已重试；此处只描述监管器与循环需要区分的情况。

use thiserror::Error;

use crate::api::RequestError;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Request failed: {0}")]
    Request(#[from] RequestError),

    /// 槽位没有可用凭证，智能体不会启动
    #[error("No credential for slot {0}")]
    MissingCredential(u32),

    #[error("Agent in slot {0} is already running")]
    AlreadyRunning(u32),

    #[error("Unknown agent slot {0}")]
    UnknownSlot(u32),

    #[error("Decode error: {0}")]
    Decode(String),

    #[error("Config error: {0}")]
    Config(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err: AgentError = RequestError::ServerExhausted { attempts: 5 }.into();
        assert!(matches!(err, AgentError::Request(_)));
        assert_eq!(err.to_string(), "Request failed: Server error persisted after 5 attempts");
        assert_eq!(
            AgentError::AlreadyRunning(3).to_string(),
            "Agent in slot 3 is already running"
        );
    }
}
