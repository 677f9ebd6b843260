//! Leveled diagnostics for an interpreter instance
//!
//! Every [`Script`](crate::Script) owns one [`Logger`]. The runtime reports
//! coroutine transitions at trace level, debugger actions at debug level,
//! rejected cross-thread entries as warnings and errors that escape to the
//! host as errors.

use std::fmt;
use std::str::FromStr;

use chrono::Local;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Default line template
pub const DEFAULT_LOG_FORMAT: &str = "[{level}] {timestamp} - {message}";

/// Log level for filtering messages
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace = 0,
    Debug = 1,
    Info = 2,
    #[default]
    Warn = 3,
    Error = 4,
}

impl LogLevel {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            LogLevel::Trace => "TRACE",
            LogLevel::Debug => "DEBUG",
            LogLevel::Info => "INFO",
            LogLevel::Warn => "WARN",
            LogLevel::Error => "ERROR",
        }
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            _ => Err(format!(
                "invalid log level '{s}', expected: trace, debug, info, warn, or error"
            )),
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Output target for log lines
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogSink {
    #[default]
    Stderr,
    Stdout,
    /// Keep lines in memory, see [`Logger::captured`]
    Capture,
    /// Discard everything
    Off,
}

/// A leveled logger with a line template
pub struct Logger {
    level: LogLevel,
    sink: LogSink,
    format: String,
    captured: Mutex<Vec<String>>,
}

impl Logger {
    #[must_use]
    pub fn new(level: LogLevel, sink: LogSink) -> Self {
        Self {
            level,
            sink,
            format: DEFAULT_LOG_FORMAT.to_string(),
            captured: Mutex::new(Vec::new()),
        }
    }

    /// Replace the line template (`{level}`, `{timestamp}`, `{message}`)
    #[must_use]
    pub fn with_format(mut self, format: impl Into<String>) -> Self {
        self.format = format.into();
        self
    }

    #[must_use]
    pub fn level(&self) -> LogLevel {
        self.level
    }

    #[must_use]
    pub fn enabled(&self, level: LogLevel) -> bool {
        self.sink != LogSink::Off && level >= self.level
    }

    /// Write a message with optional `key=value` context
    pub fn log(&self, level: LogLevel, message: &str, context: &[(&str, String)]) {
        if !self.enabled(level) {
            return;
        }
        let line = format_log_message(&self.format, level, message, context);
        match self.sink {
            LogSink::Stderr => eprintln!("{line}"),
            LogSink::Stdout => println!("{line}"),
            LogSink::Capture => self.captured.lock().push(line),
            LogSink::Off => {}
        }
    }

    pub fn trace(&self, message: &str, context: &[(&str, String)]) {
        self.log(LogLevel::Trace, message, context);
    }

    pub fn debug(&self, message: &str, context: &[(&str, String)]) {
        self.log(LogLevel::Debug, message, context);
    }

    pub fn info(&self, message: &str, context: &[(&str, String)]) {
        self.log(LogLevel::Info, message, context);
    }

    pub fn warn(&self, message: &str, context: &[(&str, String)]) {
        self.log(LogLevel::Warn, message, context);
    }

    pub fn error(&self, message: &str, context: &[(&str, String)]) {
        self.log(LogLevel::Error, message, context);
    }

    /// Lines kept by the `Capture` sink
    #[must_use]
    pub fn captured(&self) -> Vec<String> {
        self.captured.lock().clone()
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(LogLevel::default(), LogSink::default())
    }
}

impl fmt::Debug for Logger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Logger")
            .field("level", &self.level)
            .field("sink", &self.sink)
            .finish_non_exhaustive()
    }
}

fn format_log_message(
    format: &str,
    level: LogLevel,
    message: &str,
    context: &[(&str, String)],
) -> String {
    let timestamp = Local::now().format("%Y-%m-%dT%H:%M:%S%.3f%:z").to_string();

    let mut result = format
        .replace("{level}", level.as_str())
        .replace("{timestamp}", &timestamp)
        .replace("{message}", message);

    if !context.is_empty() {
        let pairs: Vec<String> = context.iter().map(|(k, v)| format!("{k}={v}")).collect();
        result.push_str(&format!(" {{{}}}", pairs.join(", ")));
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels_filter_messages() {
        let logger = Logger::new(LogLevel::Info, LogSink::Capture);
        logger.debug("hidden", &[]);
        logger.info("shown", &[]);
        logger.error("also shown", &[]);

        let lines = logger.captured();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("[INFO] "));
        assert!(lines[0].ends_with(" - shown"));
    }

    #[test]
    fn context_is_appended() {
        let logger = Logger::new(LogLevel::Trace, LogSink::Capture).with_format("{level}: {message}");
        logger.trace("resumed", &[("coroutine", "3".to_string())]);
        assert_eq!(logger.captured(), vec!["TRACE: resumed {coroutine=3}"]);
    }

    #[test]
    fn off_sink_disables_everything() {
        let logger = Logger::new(LogLevel::Trace, LogSink::Off);
        assert!(!logger.enabled(LogLevel::Error));
    }

    #[test]
    fn level_parsing() {
        assert_eq!("WARNING".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert!("loud".parse::<LogLevel>().is_err());
    }
}
