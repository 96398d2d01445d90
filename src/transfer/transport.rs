//! 分块传输通道 - 把单个分块发送到收集服务器

use reqwest::blocking::Client;
use reqwest::header::{CONTENT_RANGE, CONTENT_TYPE};
use reqwest::Url;
use tracing::trace;

use super::chunk::ContentRange;
use crate::config::{endpoint_url, AgentConfig};
use crate::error::TransportError;

/// 分块发送通道
///
/// 服务器按字节范围幂等地接收分块，同一分块重复发送是安全的。
pub trait ChunkTransport: Send + Sync {
    fn send_chunk(
        &self,
        file_name: &str,
        range: &ContentRange,
        body: &[u8],
    ) -> Result<(), TransportError>;
}

/// HTTP 分块通道：`POST {base}/upload/{file_name}`
#[derive(Debug, Clone)]
pub struct HttpChunkTransport {
    client: Client,
    base_url: Url,
}

impl HttpChunkTransport {
    pub fn new(config: &AgentConfig) -> Result<Self, TransportError> {
        let base_url = config
            .base_url()
            .map_err(|e| TransportError::Url(e.to_string()))?;
        let client = Client::builder().timeout(config.upload_timeout()).build()?;
        Ok(Self { client, base_url })
    }

    /// 上传地址，文件名会被编码为单个路径段
    pub fn upload_url(&self, file_name: &str) -> Result<Url, TransportError> {
        endpoint_url(&self.base_url, &["upload", file_name])
            .ok_or_else(|| TransportError::Url(self.base_url.to_string()))
    }
}

impl ChunkTransport for HttpChunkTransport {
    fn send_chunk(
        &self,
        file_name: &str,
        range: &ContentRange,
        body: &[u8],
    ) -> Result<(), TransportError> {
        let url = self.upload_url(file_name)?;
        trace!(url = %url, range = %range, "Posting chunk");

        let response = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/octet-stream")
            .header(CONTENT_RANGE, range.header_value())
            .body(body.to_vec())
            .send()?;

        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(TransportError::status(status.as_u16()))
        }
    }
}
