//! 日志接收端 - 把单条记录投递到远端

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::Url;

use super::record::LogRecord;
use crate::config::{endpoint_url, AgentConfig};
use crate::error::{LogForwardError, TransportError};

/// 日志投递超时
const LOG_TIMEOUT: Duration = Duration::from_secs(5);

/// 日志接收端，由转发线程独占
pub trait LogSink: Send + 'static {
    fn deliver(&self, record: &LogRecord) -> Result<(), LogForwardError>;
}

/// HTTP 日志接收端：`POST {base}/api/logs`，忽略响应内容
#[derive(Debug, Clone)]
pub struct HttpLogSink {
    client: Client,
    url: Url,
}

impl HttpLogSink {
    pub fn new(config: &AgentConfig) -> Result<Self, TransportError> {
        let base = config
            .base_url()
            .map_err(|e| TransportError::Url(e.to_string()))?;
        let url = endpoint_url(&base, &["api", "logs"])
            .ok_or_else(|| TransportError::Url(base.to_string()))?;
        let client = Client::builder().timeout(LOG_TIMEOUT).build()?;
        Ok(Self { client, url })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

impl LogSink for HttpLogSink {
    fn deliver(&self, record: &LogRecord) -> Result<(), LogForwardError> {
        self.client
            .post(self.url.clone())
            .json(record)
            .send()
            .map_err(TransportError::from)?;
        Ok(())
    }
}
