//! 重试策略：(状态码, 载荷, 已发生的 500 次数) → 决策
//!
//! 纯函数，不做 IO，不等待；执行器据此决定是返回、失败还是等待后重发同一请求。
//! - 2xx：success=false 视为业务拒绝，不重试
//! - 429：按载荷 retryAfter 等待（缺省 30 秒），不限次数
//! - 500：第 n 次等待 5·n^1.5 秒，第 max 次直接失败
//! - 其它：立即失败

use std::time::Duration;

use serde_json::Value;

use super::RequestError;

/// 重试策略常量
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// 500 最多尝试次数（含首次）
    pub max_server_error_attempts: u32,
    /// 429 载荷缺少/无法解析 retryAfter 时的等待
    pub default_retry_after: Duration,
    /// 网络错误后的固定等待
    pub network_retry_delay: Duration,
    /// 网络错误最多重试次数（不含首次）
    pub max_network_retries: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_server_error_attempts: 5,
            default_retry_after: Duration::from_secs(30),
            network_retry_delay: Duration::from_secs(8),
            max_network_retries: 3,
        }
    }
}

/// 单次响应后的处理决策
#[derive(Debug, Clone)]
pub enum Decision {
    Accept(Value),
    Fail(RequestError),
    Retry { delay: Duration, reason: RetryReason },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RetryReason {
    RateLimited,
    /// 第 attempt 次 500
    ServerError { attempt: u32 },
}

impl RetryPolicy {
    /// server_errors_so_far：此前已收到的连续 500 次数
    pub fn decide(&self, status: u16, body: &str, server_errors_so_far: u32) -> Decision {
        match status {
            200..=299 => accept_success(status, body),
            429 => Decision::Retry {
                delay: parse_retry_after(body).unwrap_or(self.default_retry_after),
                reason: RetryReason::RateLimited,
            },
            500 => {
                let attempt = server_errors_so_far + 1;
                if attempt >= self.max_server_error_attempts {
                    Decision::Fail(RequestError::ServerExhausted { attempts: attempt })
                } else {
                    Decision::Retry {
                        delay: server_error_backoff(attempt),
                        reason: RetryReason::ServerError { attempt },
                    }
                }
            }
            _ => Decision::Fail(RequestError::Rejected {
                status,
                body: parse_body(body),
            }),
        }
    }
}

/// 第 attempt 次 500 后的退避：5 * attempt^1.5 秒
pub fn server_error_backoff(attempt: u32) -> Duration {
    Duration::from_secs_f64(5.0 * f64::from(attempt).powf(1.5))
}

/// 从 429 载荷读取 retryAfter（秒），支持数字与数字字符串
pub fn parse_retry_after(body: &str) -> Option<Duration> {
    let value: Value = serde_json::from_str(body).ok()?;
    let raw = value.get("retryAfter")?;
    let secs = match raw {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        _ => return None,
    };
    if secs < 0.0 {
        return None;
    }
    // 超出 Duration 范围（含 inf / NaN）视为无法解析
    Duration::try_from_secs_f64(secs).ok()
}

fn accept_success(status: u16, body: &str) -> Decision {
    if body.trim().is_empty() {
        return Decision::Accept(Value::Null);
    }
    match serde_json::from_str::<Value>(body) {
        Ok(value) if value.get("success").and_then(Value::as_bool) == Some(false) => {
            Decision::Fail(RequestError::Rejected { status, body: value })
        }
        Ok(value) => Decision::Accept(value),
        Err(e) => Decision::Fail(RequestError::Decode(e.to_string())),
    }
}

/// 非 JSON 载荷按字符串保留，便于日志定位
fn parse_body(body: &str) -> Value {
    serde_json::from_str(body).unwrap_or_else(|_| Value::String(body.chars().take(200).collect()))
}
