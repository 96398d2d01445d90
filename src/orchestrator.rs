//! 捕获编排 - 触发截图、定位文件、上传、清理
//!
//! 每一步的失败都只结束当前周期，不影响之后的周期。

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, error, info, warn};

use crate::capture::{remove_artifact, ArtifactLocator, CaptureTrigger, ScheduledTaskTrigger};
use crate::config::AgentConfig;
use crate::error::{CycleError, TransferError};
use crate::transfer::{ArtifactUploader, ChunkedUploader, HttpChunkTransport, UploadReport};

/// 一个捕获周期的结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 上传成功，本地文件已清理
    Uploaded { file_name: String, bytes: u64 },
    /// 没有找到可上传的截图
    NoArtifact,
    /// 外部截图调用失败
    CaptureFailed,
    /// 上传失败，截图保留到下个周期
    UploadFailed,
}

/// 可被定时器与轮询线程调用的捕获周期
pub trait CaptureCycle: Send + Sync {
    fn run_cycle(&self) -> CycleOutcome;
}

/// 捕获编排器
pub struct CaptureOrchestrator {
    trigger: Arc<dyn CaptureTrigger>,
    locator: ArtifactLocator,
    uploader: Arc<dyn ArtifactUploader>,
    settle_delay: Duration,
}

impl CaptureOrchestrator {
    pub fn new(
        trigger: Arc<dyn CaptureTrigger>,
        locator: ArtifactLocator,
        uploader: Arc<dyn ArtifactUploader>,
        settle_delay: Duration,
    ) -> Self {
        Self {
            trigger,
            locator,
            uploader,
            settle_delay,
        }
    }

    /// 按配置组装：计划任务触发 + HTTP 分块上传
    pub fn from_config(config: &AgentConfig) -> Result<Self> {
        let trigger = Arc::new(ScheduledTaskTrigger::from_config(config));
        let locator = ArtifactLocator::new(&config.artifact_dir, &config.artifact_pattern)
            .context("Invalid artifact pattern")?;
        let transport =
            HttpChunkTransport::new(config).context("Failed to create upload transport")?;
        let uploader = ChunkedUploader::from_config(config, Arc::new(transport)).with_progress(
            Box::new(|p| {
                debug!(
                    chunk = p.chunk_index,
                    total = p.total_chunks,
                    percent = %format!("{:.1}", p.percent),
                    "Upload progress"
                );
            }),
        );

        Ok(Self::new(
            trigger,
            locator,
            Arc::new(uploader),
            config.settle_delay(),
        ))
    }

    pub fn locator(&self) -> &ArtifactLocator {
        &self.locator
    }

    /// 执行一个周期；所有错误都在内部记录，不向外传播
    pub fn run_cycle(&self) -> CycleOutcome {
        debug!(trigger = self.trigger.name(), "Starting capture cycle");

        let path = match self.capture_and_locate() {
            Ok(path) => path,
            Err(e @ CycleError::CaptureInvocation { .. }) => {
                error!(error = %e, "Capture request failed, skipping upload");
                return CycleOutcome::CaptureFailed;
            }
            Err(e @ CycleError::ArtifactNotFound { .. }) => {
                warn!(error = %e, "No screenshot found");
                return CycleOutcome::NoArtifact;
            }
            Err(e) => {
                error!(error = %e, "Failed to enumerate screenshots");
                return CycleOutcome::NoArtifact;
            }
        };

        match self.upload(&path) {
            Ok(report) => {
                info!(
                    file = %report.file_name,
                    bytes = report.total_size,
                    "Screenshot uploaded and deleted"
                );
                CycleOutcome::Uploaded {
                    file_name: report.file_name,
                    bytes: report.total_size,
                }
            }
            // 另一个周期已上传并删除了同一文件
            Err(CycleError::Transfer(TransferError::Io { source, .. }))
                if source.kind() == io::ErrorKind::NotFound =>
            {
                info!(path = %path.display(), "Screenshot already taken by another cycle");
                CycleOutcome::NoArtifact
            }
            Err(e) => {
                error!(
                    path = %path.display(),
                    error = %e,
                    "Screenshot upload failed, keeping it for the next cycle"
                );
                CycleOutcome::UploadFailed
            }
        }
    }

    fn capture_and_locate(&self) -> Result<PathBuf, CycleError> {
        self.trigger.request_capture()?;

        if !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        let latest = self.locator.find_latest()?;
        let path = latest.ok_or_else(|| CycleError::ArtifactNotFound {
            dir: self.locator.dir().to_path_buf(),
            pattern: self.locator.pattern().to_string(),
        })?;

        info!(path = %path.display(), "Found screenshot");
        Ok(path)
    }

    fn upload(&self, path: &std::path::Path) -> Result<UploadReport, CycleError> {
        let report = self.uploader.upload(path)?;

        // 上传器通常已删除；文件已不在也算成功
        if !report.deleted {
            if let Err(e) = remove_artifact(path) {
                warn!(path = %path.display(), error = %e, "Failed to delete uploaded screenshot");
            }
        }

        Ok(report)
    }
}

impl CaptureCycle for CaptureOrchestrator {
    fn run_cycle(&self) -> CycleOutcome {
        CaptureOrchestrator::run_cycle(self)
    }
}
