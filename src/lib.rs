//! Capture Relay - 定时/按需截图并通过可续传分块上传转发到收集服务器

pub mod cancel;
pub mod capture;
pub mod config;
pub mod daemon;
pub mod error;
pub mod lifecycle;
pub mod log_forward;
pub mod orchestrator;
pub mod transfer;
pub mod trigger;

pub use cancel::CancelToken;
pub use capture::{ArtifactLocator, CaptureTrigger, ScheduledTaskTrigger};
pub use config::AgentConfig;
pub use daemon::{AgentDaemon, InstanceLock};
pub use error::{
    ConfigError, CycleError, LifecycleError, LogForwardError, PollError, TransferError,
    TransportError,
};
pub use lifecycle::{AgentLifecycle, AgentRunState, RunSummary};
pub use log_forward::{ForwardingLayer, HttpLogSink, LogForwarder, LogLevel, LogRecord, LogSink};
pub use orchestrator::{CaptureCycle, CaptureOrchestrator, CycleOutcome};
pub use transfer::{
    ArtifactUploader, ChunkTransport, ChunkedUploader, ContentRange, HttpChunkTransport,
    UploadProgress, UploadReport,
};
pub use trigger::{HttpTriggerSource, PollStats, TriggerPoller, TriggerResponse, TriggerSource};
