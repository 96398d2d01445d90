//! 分块上传器 - 按块读取、逐块重试、成功后删除本地文件

use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use super::chunk::{ChunkAttempt, ContentRange, UploadJob, UploadProgress};
use super::transport::ChunkTransport;
use crate::capture::remove_artifact;
use crate::config::AgentConfig;
use crate::error::TransferError;

/// 进度回调
pub type ProgressCallback = Box<dyn Fn(&UploadProgress) + Send + Sync>;

/// 上传结果
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadReport {
    pub file_name: String,
    pub total_size: u64,
    pub chunks: usize,
    /// 所有分块累计的重试次数
    pub retries: u32,
    /// 本地文件是否已删除
    pub deleted: bool,
}

/// 整个截图文件的上传方式
///
/// 成功时实现方应删除本地文件；失败时保留，留给下一个周期。
pub trait ArtifactUploader: Send + Sync {
    fn upload(&self, path: &Path) -> Result<UploadReport, TransferError>;
}

/// 分块上传器
///
/// 每次调用都从偏移 0 开始；不会跨调用续传。
pub struct ChunkedUploader {
    transport: Arc<dyn ChunkTransport>,
    chunk_size: usize,
    retry_budget: u32,
    progress: Option<ProgressCallback>,
}

impl ChunkedUploader {
    pub fn new(transport: Arc<dyn ChunkTransport>, chunk_size: usize, retry_budget: u32) -> Self {
        Self {
            transport,
            chunk_size,
            retry_budget: retry_budget.max(1),
            progress: None,
        }
    }

    pub fn from_config(config: &AgentConfig, transport: Arc<dyn ChunkTransport>) -> Self {
        Self::new(transport, config.chunk_size, config.retry_budget)
    }

    /// 注册进度回调
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    pub fn upload(&self, path: &Path) -> Result<UploadReport, TransferError> {
        let job = UploadJob::from_path(path, self.chunk_size)?;
        let chunks = job.chunks();
        let total_chunks = chunks.len();

        if total_chunks == 0 {
            warn!(file = %job.destination_name, "Artifact is empty, nothing to send");
        }
        debug!(
            file = %job.destination_name,
            size = job.total_size,
            chunks = total_chunks,
            "Starting chunked upload"
        );

        let mut retries = 0;
        {
            let mut file = File::open(path).map_err(|e| TransferError::io(path, e))?;
            for (index, range) in chunks.iter().enumerate() {
                let body = read_chunk(&mut file, range, path)?;
                retries += self.send_with_retry(&job.destination_name, range, &body)?;

                if let Some(callback) = &self.progress {
                    callback(&UploadProgress::after(index + 1, total_chunks, range));
                }
            }
        }

        let deleted = match remove_artifact(path) {
            Ok(_) => true,
            Err(e) => {
                warn!(file = %job.destination_name, error = %e, "Uploaded artifact could not be deleted");
                false
            }
        };

        info!(
            file = %job.destination_name,
            size = job.total_size,
            chunks = total_chunks,
            retries,
            "Upload complete"
        );

        Ok(UploadReport {
            file_name: job.destination_name,
            total_size: job.total_size,
            chunks: total_chunks,
            retries,
            deleted,
        })
    }

    /// 发送单个分块，返回本块的重试次数
    fn send_with_retry(
        &self,
        file_name: &str,
        range: &ContentRange,
        body: &[u8],
    ) -> Result<u32, TransferError> {
        let mut attempt = ChunkAttempt::new(*range, self.retry_budget);
        let mut retries = 0;

        loop {
            match self.transport.send_chunk(file_name, range, body) {
                Ok(()) => return Ok(retries),
                Err(e) => {
                    if !attempt.consume() {
                        return Err(TransferError::ChunkExhausted {
                            range: *range,
                            attempts: self.retry_budget,
                            source: e,
                        });
                    }
                    retries += 1;
                    warn!(
                        file = %file_name,
                        range = %range,
                        remaining = attempt.attempts_remaining,
                        error = %e,
                        "Chunk upload failed, retrying"
                    );
                }
            }
        }
    }
}

impl ArtifactUploader for ChunkedUploader {
    fn upload(&self, path: &Path) -> Result<UploadReport, TransferError> {
        ChunkedUploader::upload(self, path)
    }
}

/// 按绝对偏移读取整块；读不满说明文件被截断
fn read_chunk(file: &mut File, range: &ContentRange, path: &Path) -> Result<Vec<u8>, TransferError> {
    file.seek(SeekFrom::Start(range.start))
        .map_err(|e| TransferError::io(path, e))?;

    let mut buf = Vec::with_capacity(range.length as usize);
    let read = file
        .by_ref()
        .take(range.length)
        .read_to_end(&mut buf)
        .map_err(|e| TransferError::io(path, e))? as u64;

    if read < range.length {
        return Err(TransferError::ShortRead {
            offset: range.start,
            expected: range.length,
            actual: read,
        });
    }

    Ok(buf)
}
