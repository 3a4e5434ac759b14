//! 请求层错误：只暴露调用方需要区分的失败类型
//!
//! 429 / 500 / 网络错误在请求层内部重试；只有耗尽重试或业务拒绝才会以 RequestError 浮出。

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone)]
pub enum RequestError {
    /// 服务端明确拒绝（非 2xx，或 2xx 但 success=false），body 为原始载荷
    #[error("Request rejected with HTTP {status}")]
    Rejected { status: u16, body: Value },

    #[error("Server error persisted after {attempts} attempts")]
    ServerExhausted { attempts: u32 },

    #[error("Transport failure after {attempts} attempts: {message}")]
    Transport { attempts: u32, message: String },

    #[error("Malformed response: {0}")]
    Decode(String),

    #[error("Invalid client setup: {0}")]
    Setup(String),
}

impl RequestError {
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Rejected { status, .. } => Some(*status),
            Self::ServerExhausted { .. } => Some(500),
            _ => None,
        }
    }

    /// 被拒绝时的原始载荷
    pub fn body(&self) -> Option<&Value> {
        match self {
            Self::Rejected { body, .. } => Some(body),
            _ => None,
        }
    }

    /// 载荷中的错误描述（error.message / message / error 字符串）
    pub fn server_message(&self) -> Option<String> {
        let body = self.body()?;
        body.pointer("/error/message")
            .or_else(|| body.get("message"))
            .or_else(|| body.get("error").filter(|e| e.is_string()))
            .and_then(Value::as_str)
            .map(str::to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_prefers_nested_error() {
        let err = RequestError::Rejected {
            status: 400,
            body: json!({"success": false, "error": {"message": "Not enough EP"}}),
        };
        assert_eq!(err.server_message().as_deref(), Some("Not enough EP"));
        assert_eq!(err.status(), Some(400));
    }

    #[test]
    fn test_server_message_flat_string() {
        let err = RequestError::Rejected {
            status: 404,
            body: json!({"error": "Game not found"}),
        };
        assert_eq!(err.server_message().as_deref(), Some("Game not found"));
    }
}
