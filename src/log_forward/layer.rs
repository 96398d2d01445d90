//! tracing Layer - 把本 crate 的 INFO 及以上事件交给转发器

use std::fmt::{self, Write as _};

use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::Context;
use tracing_subscriber::Layer;

use super::record::LogLevel;
use super::{LogForwarder, FORWARDER_TARGET};

/// 默认转发的 target 前缀（库与二进制）
const DEFAULT_TARGETS: [&str; 2] = ["capture_relay", "crelay"];

/// 转发 Layer
pub struct ForwardingLayer {
    forwarder: LogForwarder,
    targets: Vec<String>,
}

impl ForwardingLayer {
    pub fn new(forwarder: LogForwarder) -> Self {
        Self {
            forwarder,
            targets: DEFAULT_TARGETS.iter().map(|t| t.to_string()).collect(),
        }
    }

    /// 替换需要转发的 target 前缀
    pub fn with_targets<I, T>(mut self, targets: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.targets = targets.into_iter().map(Into::into).collect();
        self
    }

    fn accepts(&self, target: &str) -> bool {
        !target.starts_with(FORWARDER_TARGET)
            && self.targets.iter().any(|t| target.starts_with(t.as_str()))
    }
}

impl<S: Subscriber> Layer<S> for ForwardingLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        let Some(level) = LogLevel::from_tracing(metadata.level()) else {
            return;
        };
        if !self.accepts(metadata.target()) {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);
        self.forwarder.forward(level, visitor.finish());
    }
}

/// 拼接 `message key=value ...`
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: String,
}

impl MessageVisitor {
    fn push_field(&mut self, name: &str, value: fmt::Arguments<'_>) {
        if !self.fields.is_empty() {
            self.fields.push(' ');
        }
        let _ = write!(self.fields, "{name}={value}");
    }

    fn finish(self) -> String {
        match (self.message.is_empty(), self.fields.is_empty()) {
            (_, true) => self.message,
            (true, false) => self.fields,
            (false, false) => format!("{} {}", self.message, self.fields),
        }
    }
}

impl Visit for MessageVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.push_field(field.name(), format_args!("{value}"));
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            self.push_field(field.name(), format_args!("{value:?}"));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::LogForwardError;
    use crate::log_forward::{LogRecord, LogSink};
    use std::sync::mpsc;
    use std::sync::Mutex;
    use std::time::Duration;
    use tracing_subscriber::layer::SubscriberExt;

    struct ChannelSink(Mutex<mpsc::Sender<LogRecord>>);

    impl LogSink for ChannelSink {
        fn deliver(&self, record: &LogRecord) -> Result<(), LogForwardError> {
            let _ = self.0.lock().unwrap().send(record.clone());
            Ok(())
        }
    }

    #[test]
    fn test_layer_forwards_crate_events_only() {
        let (tx, rx) = mpsc::channel();
        let forwarder = LogForwarder::spawn(ChannelSink(Mutex::new(tx)), 16, "relay").unwrap();
        let subscriber = tracing_subscriber::registry().with(ForwardingLayer::new(forwarder));

        tracing::subscriber::with_default(subscriber, || {
            tracing::info!(target: "capture_relay::orchestrator", file = "a.png", size = 3, "Upload complete");
            tracing::debug!(target: "capture_relay::orchestrator", "too verbose");
            tracing::warn!(target: "hyper::client", "foreign event");
            tracing::warn!(target: "capture_relay::log_forward", "own failure");
            tracing::error!(target: "crelay", "Agent stopped with error");
        });

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.level, LogLevel::Info);
        assert_eq!(first.message, "Upload complete file=a.png size=3");
        assert_eq!(first.source, "relay");

        let second = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(second.level, LogLevel::Error);
        assert_eq!(second.message, "Agent stopped with error");

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
    }

    #[test]
    fn test_custom_targets() {
        let (tx, rx) = mpsc::channel();
        let forwarder = LogForwarder::spawn(ChannelSink(Mutex::new(tx)), 16, "relay").unwrap();
        let layer = ForwardingLayer::new(forwarder).with_targets(["netwatch"]);
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            tracing::warn!(target: "capture_relay::trigger", "not selected");
            tracing::warn!(target: "netwatch::net", "selected");
        });

        let record = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(record.message, "selected");
        assert_eq!(record.level, LogLevel::Warning);
    }
}
