//! 日志转发 - 尽力而为地把日志复制到远端
//!
//! 调用方只做一次 `try_send`：队列满或已关闭时直接丢弃，
//! 从不阻塞、从不把错误传回调用方。投递由单独的后台线程完成。

mod layer;
mod record;
mod sink;

pub use layer::ForwardingLayer;
pub use record::{LogLevel, LogRecord};
pub use sink::{HttpLogSink, LogSink};

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread;

use tracing::debug;

use crate::config::AgentConfig;
use crate::error::LogForwardError;

/// 本模块自身的 tracing target，不会被再次转发
pub(crate) const FORWARDER_TARGET: &str = module_path!();

/// 日志转发句柄（可克隆，所有克隆共享同一队列与后台线程）
#[derive(Debug, Clone)]
pub struct LogForwarder {
    tx: SyncSender<LogRecord>,
    source: Arc<str>,
    dropped: Arc<AtomicU64>,
}

impl LogForwarder {
    /// 启动后台投递线程
    pub fn spawn<S: LogSink>(
        sink: S,
        capacity: usize,
        source: impl Into<String>,
    ) -> Result<Self, LogForwardError> {
        let (tx, rx) = mpsc::sync_channel(capacity.max(1));
        thread::Builder::new()
            .name("log-forwarder".to_string())
            .spawn(move || deliver_loop(rx, sink))?;

        Ok(Self {
            tx,
            source: Arc::from(source.into()),
            dropped: Arc::new(AtomicU64::new(0)),
        })
    }

    /// 按配置创建 HTTP 转发器
    pub fn from_config(config: &AgentConfig) -> Result<Self, LogForwardError> {
        let sink = HttpLogSink::new(config)?;
        Self::spawn(sink, config.log_queue_capacity, config.log_source.clone())
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// 入队一条记录；失败只表示这条记录被丢弃
    pub fn try_forward(&self, record: LogRecord) -> Result<(), LogForwardError> {
        match self.tx.try_send(record) {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(LogForwardError::QueueFull)
            }
            Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(LogForwardError::Closed)
            }
        }
    }

    /// 以本转发器的 source 转发一条消息，结果被忽略
    pub fn forward(&self, level: LogLevel, message: impl Into<String>) {
        let _ = self.try_forward(LogRecord::new(level, message, &*self.source));
    }

    pub fn info(&self, message: impl Into<String>) {
        self.forward(LogLevel::Info, message);
    }

    pub fn warning(&self, message: impl Into<String>) {
        self.forward(LogLevel::Warning, message);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.forward(LogLevel::Error, message);
    }

    /// 因队列满或关闭而丢弃的记录数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

fn deliver_loop<S: LogSink>(rx: Receiver<LogRecord>, sink: S) {
    // 所有发送端释放后退出
    for record in rx {
        if let Err(e) = sink.deliver(&record) {
            debug!(target: FORWARDER_TARGET, error = %e, "Log forwarding failed");
        }
    }
}
