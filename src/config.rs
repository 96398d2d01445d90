//! 配置模块 - Agent 运行参数
//!
//! 读取优先级（后者覆盖前者）：
//! 1. 内置默认值
//! 2. JSON 配置文件：`--config <path>`，否则 `CAPTURE_RELAY_CONFIG`，
//!    否则 `~/.config/capture-relay/config.json`（存在时）
//! 3. 环境变量 `CAPTURE_RELAY_*`
//!
//! 配置在构造时显式传给各个组件，不存在全局可变状态。

use std::fmt::Display;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::capture::glob_matcher;
use crate::error::ConfigError;

/// 默认服务器地址
pub const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:8000";

/// 默认分块大小：1 MiB
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// 每个分块的默认尝试次数
pub const DEFAULT_RETRY_BUDGET: u32 = 3;

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CAPTURE_RELAY_";

/// 配置文件路径环境变量
pub const CONFIG_PATH_ENV: &str = "CAPTURE_RELAY_CONFIG";

/// Agent 配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    /// 收集服务器基础 URL
    pub server_url: String,
    /// 截图输出目录
    pub artifact_dir: PathBuf,
    /// 截图文件名通配符（支持 `*` 与 `?`）
    pub artifact_pattern: String,
    /// 分块大小（字节）
    pub chunk_size: usize,
    /// 每个分块的最大尝试次数
    pub retry_budget: u32,
    /// 触发轮询间隔（毫秒）
    pub poll_interval_ms: u64,
    /// 单次轮询请求超时（毫秒）
    pub poll_timeout_ms: u64,
    /// 定时捕获间隔（毫秒）
    pub capture_interval_ms: u64,
    /// 捕获后等待截图写盘的时间（毫秒）
    pub settle_delay_ms: u64,
    /// 单个分块请求超时（毫秒）
    pub upload_timeout_ms: u64,
    /// 触发截图的外部程序
    pub capture_program: String,
    /// 计划任务名称
    pub capture_task: String,
    /// 轮询响应中表示截图的 action
    pub capture_action: String,
    /// 转发日志中的 source 字段
    pub log_source: String,
    /// 日志转发队列容量
    pub log_queue_capacity: usize,
    /// 是否转发日志到服务器
    pub forward_logs: bool,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            server_url: DEFAULT_SERVER_URL.to_string(),
            artifact_dir: std::env::temp_dir(),
            artifact_pattern: "screenshot_*.png".to_string(),
            chunk_size: DEFAULT_CHUNK_SIZE,
            retry_budget: DEFAULT_RETRY_BUDGET,
            poll_interval_ms: 5_000,
            poll_timeout_ms: 10_000,
            capture_interval_ms: 2_000,
            settle_delay_ms: 1_000,
            upload_timeout_ms: 30_000,
            capture_program: "schtasks".to_string(),
            capture_task: "RunXboxBarGameWidgets".to_string(),
            capture_action: "take_screenshot".to_string(),
            log_source: "capture-relay".to_string(),
            log_queue_capacity: 256,
            forward_logs: true,
        }
    }
}

impl AgentConfig {
    /// 从配置文件与进程环境加载并校验
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        Self::resolve(explicit, default_config_path(), |var| std::env::var(var).ok())
    }

    /// 按优先级合并各来源；`env` 便于测试时注入环境
    pub fn resolve<F>(
        explicit: Option<&Path>,
        fallback: Option<PathBuf>,
        env: F,
    ) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let file = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => env(CONFIG_PATH_ENV)
                .filter(|p| !p.is_empty())
                .map(PathBuf::from)
                .or_else(|| fallback.filter(|p| p.exists())),
        };

        let mut config = match file {
            Some(path) => {
                debug!(path = %path.display(), "Loading config file");
                Self::from_file(&path)?
            }
            None => Self::default(),
        };

        config.apply_env(env)?;
        config.validate()?;
        Ok(config)
    }

    /// 读取 JSON 配置文件，缺失字段使用默认值
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// 应用 `CAPTURE_RELAY_*` 环境变量覆盖
    pub fn apply_env<F>(&mut self, env: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| env(&format!("{ENV_PREFIX}{name}")).filter(|v| !v.is_empty());

        if let Some(v) = get("SERVER_URL") {
            self.server_url = v;
        }
        if let Some(v) = get("ARTIFACT_DIR") {
            self.artifact_dir = PathBuf::from(v);
        }
        if let Some(v) = get("ARTIFACT_PATTERN") {
            self.artifact_pattern = v;
        }
        if let Some(v) = get("CAPTURE_PROGRAM") {
            self.capture_program = v;
        }
        if let Some(v) = get("CAPTURE_TASK") {
            self.capture_task = v;
        }
        if let Some(v) = get("CAPTURE_ACTION") {
            self.capture_action = v;
        }
        if let Some(v) = get("LOG_SOURCE") {
            self.log_source = v;
        }

        set_parsed(&get, "CHUNK_SIZE", &mut self.chunk_size)?;
        set_parsed(&get, "RETRY_BUDGET", &mut self.retry_budget)?;
        set_parsed(&get, "POLL_INTERVAL_MS", &mut self.poll_interval_ms)?;
        set_parsed(&get, "POLL_TIMEOUT_MS", &mut self.poll_timeout_ms)?;
        set_parsed(&get, "CAPTURE_INTERVAL_MS", &mut self.capture_interval_ms)?;
        set_parsed(&get, "SETTLE_DELAY_MS", &mut self.settle_delay_ms)?;
        set_parsed(&get, "UPLOAD_TIMEOUT_MS", &mut self.upload_timeout_ms)?;
        set_parsed(&get, "LOG_QUEUE_CAPACITY", &mut self.log_queue_capacity)?;

        if let Some(v) = get("FORWARD_LOGS") {
            self.forward_logs = parse_bool(&v).ok_or_else(|| ConfigError::Env {
                var: format!("{ENV_PREFIX}FORWARD_LOGS"),
                value: v.clone(),
                reason: "expected true/false".to_string(),
            })?;
        }

        Ok(())
    }

    /// 校验取值范围
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.base_url()?;

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than zero"));
        }
        if self.retry_budget == 0 {
            return Err(invalid("retry_budget", "must allow at least one attempt"));
        }
        if self.poll_interval_ms == 0 {
            return Err(invalid("poll_interval_ms", "must be greater than zero"));
        }
        if self.poll_timeout_ms == 0 {
            return Err(invalid("poll_timeout_ms", "must be greater than zero"));
        }
        if self.capture_interval_ms == 0 {
            return Err(invalid("capture_interval_ms", "must be greater than zero"));
        }
        if self.upload_timeout_ms == 0 {
            return Err(invalid("upload_timeout_ms", "must be greater than zero"));
        }
        if self.log_queue_capacity == 0 {
            return Err(invalid("log_queue_capacity", "must be greater than zero"));
        }
        if self.capture_program.trim().is_empty() {
            return Err(invalid("capture_program", "must not be empty"));
        }
        glob_matcher(&self.artifact_pattern)
            .map_err(|e| invalid("artifact_pattern", e.to_string()))?;

        Ok(())
    }

    /// 解析后的服务器基础 URL（仅支持 http/https）
    pub fn base_url(&self) -> Result<Url, ConfigError> {
        let url = Url::parse(&self.server_url).map_err(|e| invalid("server_url", e.to_string()))?;
        match url.scheme() {
            "http" | "https" if !url.cannot_be_a_base() => Ok(url),
            scheme => Err(invalid(
                "server_url",
                format!("unsupported scheme `{scheme}`, expected http or https"),
            )),
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn capture_interval(&self) -> Duration {
        Duration::from_millis(self.capture_interval_ms)
    }

    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    pub fn upload_timeout(&self) -> Duration {
        Duration::from_millis(self.upload_timeout_ms)
    }
}

/// 在基础 URL 后追加路径段（自动编码文件名等特殊字符）
pub fn endpoint_url(base: &Url, segments: &[&str]) -> Option<Url> {
    let mut url = base.clone();
    {
        let mut path = url.path_segments_mut().ok()?;
        path.pop_if_empty();
        path.extend(segments.iter().copied());
    }
    Some(url)
}

/// 配置目录 `~/.config/capture-relay`
pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("capture-relay")
}

/// 默认配置文件路径
pub fn default_config_path() -> Option<PathBuf> {
    Some(config_dir().join("config.json"))
}

fn set_parsed<G, T>(get: &G, name: &str, slot: &mut T) -> Result<(), ConfigError>
where
    G: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: Display,
{
    if let Some(value) = get(name) {
        *slot = value.trim().parse().map_err(|e: T::Err| ConfigError::Env {
            var: format!("{ENV_PREFIX}{name}"),
            value: value.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn invalid(field: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        field,
        reason: reason.into(),
    }
}
