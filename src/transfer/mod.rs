//! 分块传输 - 可重试、按字节范围寻址的截图上传
//!
//! 每个分块携带 `Content-Range: bytes {start}-{end}/{total}`，
//! 服务器按范围写入，因此重复发送同一分块是安全的。

mod chunk;
mod transport;
mod uploader;

pub use chunk::{plan_chunks, ChunkAttempt, ContentRange, UploadJob, UploadProgress};
pub use transport::{ChunkTransport, HttpChunkTransport};
pub use uploader::{ArtifactUploader, ChunkedUploader, ProgressCallback, UploadReport};
