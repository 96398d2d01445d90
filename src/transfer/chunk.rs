//! 分块规划 - 上传任务、字节范围与重试状态

use std::fmt;
use std::path::{Path, PathBuf};

use crate::config::DEFAULT_CHUNK_SIZE;
use crate::error::TransferError;

/// 一个分块的字节范围，对应 `Content-Range: bytes start-end/total`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContentRange {
    pub start: u64,
    pub length: u64,
    pub total: u64,
}

impl ContentRange {
    /// 最后一个字节的偏移（含）
    pub fn end(&self) -> u64 {
        self.start + self.length.saturating_sub(1)
    }

    /// 请求头取值
    pub fn header_value(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ContentRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bytes {}-{}/{}", self.start, self.end(), self.total)
    }
}

/// 把 `[0, total_size)` 切分为连续、不重叠的分块
///
/// 最后一块可能更短；`total_size == 0` 时不产生分块。
/// `chunk_size` 为 0 时使用 [`DEFAULT_CHUNK_SIZE`]。
pub fn plan_chunks(total_size: u64, chunk_size: usize) -> Vec<ContentRange> {
    let step = effective_chunk_size(chunk_size) as u64;
    let mut chunks = Vec::with_capacity(total_size.div_ceil(step) as usize);
    let mut offset = 0;

    while offset < total_size {
        let length = step.min(total_size - offset);
        chunks.push(ContentRange {
            start: offset,
            length,
            total: total_size,
        });
        offset += length;
    }

    chunks
}

pub(crate) fn effective_chunk_size(chunk_size: usize) -> usize {
    if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    }
}

/// 单个截图的上传任务，每次上传新建、用完即弃
#[derive(Debug, Clone)]
pub struct UploadJob {
    pub source_path: PathBuf,
    pub total_size: u64,
    pub destination_name: String,
    pub chunk_size: usize,
}

impl UploadJob {
    /// 读取文件大小并以文件名作为目标名
    pub fn from_path(path: &Path, chunk_size: usize) -> Result<Self, TransferError> {
        let destination_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| TransferError::InvalidPath(path.to_path_buf()))?
            .to_string();
        let metadata = std::fs::metadata(path).map_err(|e| TransferError::io(path, e))?;

        Ok(Self {
            source_path: path.to_path_buf(),
            total_size: metadata.len(),
            destination_name,
            chunk_size: effective_chunk_size(chunk_size),
        })
    }

    pub fn chunks(&self) -> Vec<ContentRange> {
        plan_chunks(self.total_size, self.chunk_size)
    }
}

/// 分块的发送状态
#[derive(Debug, Clone, Copy)]
pub struct ChunkAttempt {
    pub range: ContentRange,
    pub attempts_remaining: u32,
}

impl ChunkAttempt {
    pub fn new(range: ContentRange, budget: u32) -> Self {
        Self {
            range,
            attempts_remaining: budget,
        }
    }

    /// 消耗一次尝试，返回是否还能再试
    pub fn consume(&mut self) -> bool {
        self.attempts_remaining = self.attempts_remaining.saturating_sub(1);
        self.attempts_remaining > 0
    }
}

/// 上传进度（每个分块成功后上报）
#[derive(Debug, Clone, PartialEq)]
pub struct UploadProgress {
    /// 从 1 开始
    pub chunk_index: usize,
    pub total_chunks: usize,
    pub percent: f64,
}

impl UploadProgress {
    pub(crate) fn after(chunk_index: usize, total_chunks: usize, range: &ContentRange) -> Self {
        let sent = range.start + range.length;
        let percent = if range.total == 0 {
            100.0
        } else {
            sent as f64 * 100.0 / range.total as f64
        };
        Self {
            chunk_index,
            total_chunks,
            percent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_covers(total: u64, chunk_size: usize) {
        let chunks = plan_chunks(total, chunk_size);
        let expected = total.div_ceil(chunk_size as u64) as usize;
        assert_eq!(chunks.len(), expected, "total={total} chunk={chunk_size}");

        let mut next = 0;
        for c in &chunks {
            assert_eq!(c.start, next, "gap or overlap at {next}");
            assert!(c.length > 0 && c.length <= chunk_size as u64);
            assert!(c.start + c.length <= total);
            assert_eq!(c.total, total);
            next = c.start + c.length;
        }
        assert_eq!(next, total);
    }

    #[test]
    fn test_plan_covers_range_exactly() {
        for total in [1u64, 2, 3, 7, 10, 1023, 1024, 1025, 4096, 10_000] {
            for chunk_size in [1usize, 3, 4, 1024] {
                assert_covers(total, chunk_size);
            }
        }
    }

    #[test]
    fn test_empty_file_has_no_chunks() {
        assert!(plan_chunks(0, 1024).is_empty());
    }

    #[test]
    fn test_zero_chunk_size_uses_default() {
        let chunks = plan_chunks(DEFAULT_CHUNK_SIZE as u64 + 1, 0);
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].length, 1);
    }

    #[test]
    fn test_content_range_format() {
        let chunks = plan_chunks(10, 4);
        let headers: Vec<String> = chunks.iter().map(|c| c.header_value()).collect();
        assert_eq!(headers, ["bytes 0-3/10", "bytes 4-7/10", "bytes 8-9/10"]);
    }

    #[test]
    fn test_chunk_attempt_budget() {
        let range = plan_chunks(4, 4)[0];
        let mut attempt = ChunkAttempt::new(range, 3);
        assert!(attempt.consume());
        assert!(attempt.consume());
        assert!(!attempt.consume());
        assert_eq!(attempt.attempts_remaining, 0);
    }

    #[test]
    fn test_progress_percent() {
        let chunks = plan_chunks(10, 4);
        let p = UploadProgress::after(2, 3, &chunks[1]);
        assert_eq!(p.chunk_index, 2);
        assert!((p.percent - 80.0).abs() < f64::EPSILON);
        let last = UploadProgress::after(3, 3, &chunks[2]);
        assert!((last.percent - 100.0).abs() < f64::EPSILON);
    }
}
