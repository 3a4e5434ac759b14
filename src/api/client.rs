//! 弹性请求层：Transport 负责一次 HTTP 往返，ResilientClient 按 RetryPolicy 重试
//!
//! 所有等待经由注入的 Sleeper，只挂起当前智能体自己的任务。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use reqwest::Client;
use serde_json::Value;

use super::retry::{Decision, RetryPolicy, RetryReason};
use super::RequestError;
use crate::core::clock::Sleeper;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// 请求描述：方法、相对端点、JSON 体、超时
#[derive(Debug, Clone, PartialEq)]
pub struct ApiRequest {
    pub method: Method,
    pub endpoint: String,
    pub body: Option<Value>,
    pub timeout: Duration,
}

impl ApiRequest {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            body: None,
            timeout: Duration::from_secs(15),
        }
    }

    pub fn post(endpoint: impl Into<String>, body: Value) -> Self {
        Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            body: Some(body),
            timeout: Duration::from_secs(15),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// 一次往返的原始结果
#[derive(Debug, Clone)]
pub struct RawResponse {
    pub status: u16,
    pub body: String,
}

/// 单次 HTTP 往返；Err 表示网络/传输层失败（没有拿到状态码）
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, String>;
}

/// reqwest 实现：固定 base_url，带 Bearer 凭据与 User-Agent
pub struct ReqwestTransport {
    client: Client,
    base_url: String,
}

impl ReqwestTransport {
    pub fn new(
        base_url: &str,
        credential: Option<&str>,
        user_agent: &str,
    ) -> Result<Self, RequestError> {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        if let Some(credential) = credential {
            let value = HeaderValue::from_str(&format!("Bearer {}", credential.trim()))
                .map_err(|e| RequestError::Setup(format!("invalid credential header: {e}")))?;
            headers.insert(AUTHORIZATION, value);
        }
        let client = Client::builder()
            .user_agent(user_agent)
            .default_headers(headers)
            .build()
            .map_err(|e| RequestError::Setup(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &ApiRequest) -> Result<RawResponse, String> {
        let url = format!("{}{}", self.base_url, request.endpoint);
        let builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        let builder = match &request.body {
            Some(body) => builder.json(body),
            None => builder,
        };
        let resp = builder
            .timeout(request.timeout)
            .send()
            .await
            .map_err(|e| format!("Request failed: {}", e))?;
        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| format!("Read body: {}", e))?;
        Ok(RawResponse { status, body })
    }
}

/// 按策略重试的请求执行器
#[derive(Clone)]
pub struct ResilientClient {
    transport: Arc<dyn Transport>,
    sleeper: Arc<dyn Sleeper>,
    policy: RetryPolicy,
}

impl ResilientClient {
    pub fn new(transport: Arc<dyn Transport>, sleeper: Arc<dyn Sleeper>, policy: RetryPolicy) -> Self {
        Self {
            transport,
            sleeper,
            policy,
        }
    }

    /// 执行请求直到成功、业务拒绝或重试耗尽
    pub async fn execute(&self, request: &ApiRequest) -> Result<Value, RequestError> {
        let mut server_errors = 0u32;
        let mut network_failures = 0u32;

        loop {
            let response = match self.transport.send(request).await {
                Ok(response) => response,
                Err(message) => {
                    network_failures += 1;
                    if network_failures > self.policy.max_network_retries {
                        return Err(RequestError::Transport {
                            attempts: network_failures,
                            message,
                        });
                    }
                    tracing::warn!(
                        endpoint = %request.endpoint,
                        attempt = network_failures,
                        "{} -> retrying in {:?}",
                        message,
                        self.policy.network_retry_delay
                    );
                    self.sleeper.sleep(self.policy.network_retry_delay).await;
                    continue;
                }
            };

            match self
                .policy
                .decide(response.status, &response.body, server_errors)
            {
                Decision::Accept(value) => return Ok(value),
                Decision::Fail(err) => {
                    tracing::debug!(endpoint = %request.endpoint, "Request failed: {}", err);
                    return Err(err);
                }
                Decision::Retry { delay, reason } => {
                    match reason {
                        RetryReason::RateLimited => {
                            tracing::info!(
                                endpoint = %request.endpoint,
                                "Rate limited (429), waiting {:.1}s",
                                delay.as_secs_f64()
                            );
                        }
                        RetryReason::ServerError { attempt } => {
                            server_errors = attempt;
                            tracing::warn!(
                                endpoint = %request.endpoint,
                                "Server error 500 (attempt {}/{}), waiting {:.1}s",
                                attempt,
                                self.policy.max_server_error_attempts,
                                delay.as_secs_f64()
                            );
                        }
                    }
                    self.sleeper.sleep(delay).await;
                }
            }
        }
    }
}
