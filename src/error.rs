//! 错误类型 - 捕获周期、分块传输、触发轮询与日志转发
//!
//! 只有 `CycleError` 会到达编排器；`PollError` 与 `LogForwardError`
//! 在产生处被吞掉，只留下日志。

use std::path::PathBuf;

use thiserror::Error;

use crate::lifecycle::AgentRunState;
use crate::transfer::ContentRange;

/// 单次传输请求（一个分块 / 一条日志）的失败原因
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("server responded with status {status}")]
    Status { status: u16 },

    #[error("invalid endpoint url: {0}")]
    Url(String),
}

impl TransportError {
    /// 由非 2xx 状态码构造
    pub fn status(status: u16) -> Self {
        Self::Status { status }
    }
}

/// 分块上传失败
#[derive(Debug, Error)]
pub enum TransferError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// 文件在上传期间被截断
    #[error("short read at offset {offset}: expected {expected} bytes, got {actual}")]
    ShortRead { offset: u64, expected: u64, actual: u64 },

    /// 某个分块用完了重试次数
    #[error("chunk {range} failed after {attempts} attempts: {source}")]
    ChunkExhausted {
        range: ContentRange,
        attempts: u32,
        #[source]
        source: TransportError,
    },

    #[error("artifact path has no file name: {}", .0.display())]
    InvalidPath(PathBuf),
}

impl TransferError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// 一次捕获周期中止的原因
#[derive(Debug, Error)]
pub enum CycleError {
    #[error("capture task failed (exit code {code:?}): {stderr}")]
    CaptureInvocation { code: Option<i32>, stderr: String },

    #[error("no artifact matching {pattern} in {}", dir.display())]
    ArtifactNotFound { dir: PathBuf, pattern: String },

    #[error(transparent)]
    Transfer(#[from] TransferError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// 触发检查失败（总是在轮询循环内恢复）
#[derive(Debug, Error)]
pub enum PollError {
    #[error("poll request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("poll endpoint returned status {0}")]
    Status(u16),

    #[error("malformed trigger response: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("invalid endpoint url: {0}")]
    Url(String),
}

/// 日志转发失败（从不传给调用方）
#[derive(Debug, Error)]
pub enum LogForwardError {
    #[error("log queue is full, record dropped")]
    QueueFull,

    #[error("log forwarder is closed")]
    Closed,

    #[error("failed to start log forwarder: {0}")]
    Spawn(#[from] std::io::Error),

    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// 配置加载 / 校验错误
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid value {value:?} for {var}: {reason}")]
    Env {
        var: String,
        value: String,
        reason: String,
    },

    #[error("invalid config field `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// 生命周期状态转换错误
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("agent is already {0}")]
    AlreadyRunning(AgentRunState),

    #[error("agent is not running (state: {0})")]
    NotRunning(AgentRunState),

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: std::io::Error,
    },
}
