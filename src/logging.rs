use chrono::Local;
use log::{Level, LevelFilter, Metadata, Record, SetLoggerError};
use serde::Serialize;
use tokio::sync::mpsc;

#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct LogMessage {
    pub level: String,
    pub target: String,
    pub message: String,
    pub timestamp: String,
}

/// Writes log lines to stderr and hands a copy to whoever displays them
pub struct EventLogger {
    level: LevelFilter,
    sink: Option<mpsc::UnboundedSender<LogMessage>>,
}

impl EventLogger {
    pub fn new(level: LevelFilter, sink: Option<mpsc::UnboundedSender<LogMessage>>) -> Self {
        Self { level, sink }
    }

    /// Installs the logger globally. Fails if a logger is already set.
    pub fn init(
        level: LevelFilter,
        sink: Option<mpsc::UnboundedSender<LogMessage>>,
    ) -> Result<(), SetLoggerError> {
        log::set_boxed_logger(Box::new(Self::new(level, sink)))
            .map(|()| log::set_max_level(level))
    }

    fn message(record: &Record) -> LogMessage {
        LogMessage {
            level: record.level().to_string(),
            target: record.target().to_string(),
            message: record.args().to_string(),
            timestamp: Local::now().to_rfc3339(),
        }
    }
}

impl log::Log for EventLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let message = Self::message(record);
        eprintln!(
            "{} [{}] {}",
            Local::now().format("%H:%M:%S%.3f"),
            record.level(),
            message.message
        );

        // Forwarding is best effort; warnings and errors always reach stderr above.
        if let Some(sink) = &self.sink {
            if record.level() <= Level::Info {
                let _ = sink.send(message);
            }
        }
    }

    fn flush(&self) {}
}

/// Installs [`EventLogger`], or `env_logger` if that fails
pub fn init_logging(level: LevelFilter, sink: Option<mpsc::UnboundedSender<LogMessage>>) {
    if EventLogger::init(level, sink).is_err() {
        let _ = env_logger::builder().filter_level(level).try_init();
    }
}

/// One JSON line in the `{"event", "data"}` shape device events use
pub fn json_line(message: &LogMessage) -> serde_json::Result<String> {
    serde_json::to_string(&serde_json::json!({ "event": "log", "data": message }))
}

/// Prints forwarded messages to stdout until every sender is gone
pub async fn print_json_lines(mut messages: mpsc::UnboundedReceiver<LogMessage>) {
    while let Some(message) = messages.recv().await {
        match json_line(&message) {
            Ok(line) => println!("{}", line),
            Err(e) => eprintln!("Failed to serialize log message: {}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use log::Log;

    #[test]
    fn test_forwards_enabled_records() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let logger = EventLogger::new(LevelFilter::Info, Some(tx));

        logger.log(
            &Record::builder()
                .level(Level::Warn)
                .target("oneputt")
                .args(format_args!("battery low"))
                .build(),
        );
        logger.log(
            &Record::builder()
                .level(Level::Debug)
                .args(format_args!("noise"))
                .build(),
        );

        let message = rx.try_recv().unwrap();
        assert_eq!(message.level, "WARN");
        assert_eq!(message.target, "oneputt");
        assert_eq!(message.message, "battery low");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_json_line_matches_event_shape() {
        let message = LogMessage {
            level: "INFO".into(),
            target: "oneputt_bridge_lib::core::controller".into(),
            message: "Putting device connected".into(),
            timestamp: "2026-10-19T10:00:00+00:00".into(),
        };
        let value: serde_json::Value = serde_json::from_str(&json_line(&message).unwrap()).unwrap();
        assert_eq!(value["event"], "log");
        assert_eq!(value["data"]["level"], "INFO");
        assert_eq!(value["data"]["message"], "Putting device connected");
    }
}
