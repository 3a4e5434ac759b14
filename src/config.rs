//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `MOLTBOT__*` 覆盖（双下划线表示嵌套，如 `MOLTBOT__API__BASE_URL=...`）。
//! 凭证不写在主配置里，而是放在独立的凭证文件中（见 [`load_credentials_file`]），由主程序轮询。

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::agent::{LoopTiming, MembershipSettings, PolicyProfile, ProfileRegistry};
use crate::api::RetryPolicy;
use crate::arena::ArenaSettings;
use crate::core::AgentError;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub api: ApiSection,
    pub membership: MembershipSection,
    pub policy: PolicySection,
    /// [[agents]]：每个槽位一个智能体
    pub agents: Vec<AgentConfig>,
    pub arena: ArenaSection,
}

/// [app] 段：循环节奏与凭证文件
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 两次动作之间的间隔（秒）
    pub tick_interval_secs: f64,
    /// 对局仍在 waiting 时的轮询间隔（秒）
    pub waiting_poll_secs: f64,
    /// 循环出错后的退避（秒）
    pub error_backoff_secs: f64,
    /// 凭证文件（TOML）；未设置时只使用 [[agents]] 中的 credential
    pub credentials_file: Option<PathBuf>,
    /// 凭证文件轮询间隔（秒）
    pub credentials_poll_secs: u64,
    /// 日志广播通道容量
    pub feed_capacity: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            tick_interval_secs: 60.0,
            waiting_poll_secs: 15.0,
            error_backoff_secs: 5.0,
            credentials_file: None,
            credentials_poll_secs: 30,
            feed_capacity: 256,
        }
    }
}

impl AppSection {
    pub fn loop_timing(&self) -> LoopTiming {
        LoopTiming {
            tick_interval: secs(self.tick_interval_secs),
            waiting_poll: secs(self.waiting_poll_secs),
            error_backoff: secs(self.error_backoff_secs),
        }
    }
}

/// [api] 段：服务端地址、超时与重试常量
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiSection {
    pub base_url: String,
    pub user_agent: String,
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetrySection,
}

impl Default for ApiSection {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3000/api".to_string(),
            user_agent: concat!("moltbot/", env!("CARGO_PKG_VERSION")).to_string(),
            request_timeout_secs: 15,
            retry: RetrySection::default(),
        }
    }
}

impl ApiSection {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// [api.retry] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySection {
    pub max_server_error_attempts: u32,
    pub default_retry_after_secs: f64,
    pub network_retry_delay_secs: f64,
    pub max_network_retries: u32,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_server_error_attempts: 5,
            default_retry_after_secs: 30.0,
            network_retry_delay_secs: 8.0,
            max_network_retries: 3,
        }
    }
}

impl RetrySection {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_server_error_attempts: self.max_server_error_attempts.max(1),
            default_retry_after: secs(self.default_retry_after_secs),
            network_retry_delay: secs(self.network_retry_delay_secs),
            max_network_retries: self.max_network_retries,
        }
    }
}

/// [membership] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MembershipSection {
    pub poll_interval_secs: f64,
    pub max_search_attempts: u32,
}

impl Default for MembershipSection {
    fn default() -> Self {
        Self {
            poll_interval_secs: 15.0,
            max_search_attempts: 20,
        }
    }
}

impl MembershipSection {
    pub fn settings(&self) -> MembershipSettings {
        MembershipSettings {
            poll_interval: secs(self.poll_interval_secs),
            max_search_attempts: self.max_search_attempts,
        }
    }
}

/// [policy] 段：默认档案 + [policy.profiles.<name>] 命名档案
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
pub struct PolicySection {
    #[serde(flatten)]
    pub default: PolicyProfile,
    pub profiles: HashMap<String, PolicyProfile>,
}

impl PolicySection {
    pub fn registry(&self) -> ProfileRegistry {
        ProfileRegistry::new(self.default.clone(), self.profiles.clone())
    }
}

/// [[agents]] 条目
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct AgentConfig {
    pub slot: u32,
    pub name: String,
    /// 直接写在配置里的凭证；通常留空，由凭证文件提供
    #[serde(default)]
    pub credential: Option<String>,
    /// 使用的命名档案
    #[serde(default)]
    pub profile: Option<String>,
    /// 上次所在对局，启动时先尝试恢复
    #[serde(default)]
    pub last_game: Option<String>,
}

impl AgentConfig {
    pub fn new(slot: u32, name: impl Into<String>) -> Self {
        Self {
            slot,
            name: name.into(),
            credential: None,
            profile: None,
            last_game: None,
        }
    }
}

/// [arena] 段：竞技场观战器
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ArenaSection {
    pub base_url: String,
    pub agent_id: Option<String>,
    pub api_key: Option<String>,
    pub cooldown_secs: u64,
    pub rounds: u32,
    pub language: String,
    pub visibility: String,
}

impl Default for ArenaSection {
    fn default() -> Self {
        Self {
            base_url: "https://moltarena.crosstoken.io/api".to_string(),
            agent_id: None,
            api_key: None,
            cooldown_secs: 60,
            rounds: 5,
            language: "en".to_string(),
            visibility: "public".to_string(),
        }
    }
}

impl ArenaSection {
    pub fn settings(&self, agent_id: String) -> ArenaSettings {
        ArenaSettings {
            agent_id,
            rounds: self.rounds,
            language: self.language.clone(),
            visibility: self.visibility.clone(),
            cooldown: Duration::from_secs(self.cooldown_secs),
            ..ArenaSettings::default()
        }
    }
}

fn secs(value: f64) -> Duration {
    Duration::try_from_secs_f64(value).unwrap_or(Duration::ZERO)
}

/// 从 config 目录加载配置，环境变量 MOLTBOT__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 MOLTBOT__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    for name in ["config/default", "../config/default", "default"] {
        if Path::new(&format!("{name}.toml")).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(path) = config_path.filter(|p| p.exists()) {
        builder = builder.add_source(config::File::from(path).required(false));
    }

    builder = builder.add_source(
        config::Environment::with_prefix("MOLTBOT")
            .separator("__")
            .try_parsing(true),
    );

    builder.build()?.try_deserialize()
}

/// 凭证文件格式：
///
/// ```toml
/// [[credential]]
/// slot = 1
/// api_key = "..."
/// ```
#[derive(Debug, Deserialize, Default)]
struct CredentialsFile {
    #[serde(default)]
    credential: Vec<CredentialEntry>,
}

#[derive(Debug, Deserialize)]
struct CredentialEntry {
    slot: u32,
    api_key: String,
}

/// 解析凭证文件内容为 槽位 → 凭证；空白凭证被忽略
pub fn parse_credentials(content: &str) -> Result<HashMap<u32, String>, AgentError> {
    let file: CredentialsFile =
        toml::from_str(content).map_err(|e| AgentError::Decode(format!("credentials file: {e}")))?;
    Ok(file
        .credential
        .into_iter()
        .filter(|c| !c.api_key.trim().is_empty())
        .map(|c| (c.slot, c.api_key.trim().to_string()))
        .collect())
}

/// 读取凭证文件
pub fn load_credentials_file(path: &Path) -> anyhow::Result<HashMap<u32, String>> {
    let content = std::fs::read_to_string(path)?;
    Ok(parse_credentials(&content)?)
}
