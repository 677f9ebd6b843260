//! Interpreter configuration

use serde::{Deserialize, Serialize};

use crate::diagnostics::{LogLevel, LogSink};

/// Options of a [`Script`](crate::Script) instance
///
/// Missing fields take their defaults when loaded from JSON:
///
/// ```ignore
/// let options = ScriptOptions::from_json(r#"{ "max_call_depth": 64 }"#)?;
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScriptOptions {
    /// Auto-yield counter given to new coroutines (0 = never preempt)
    pub default_auto_yield_counter: u64,

    /// Call depth at which a stack overflow is raised
    pub max_call_depth: usize,

    /// Compile a `Debug` hook point before every statement
    pub emit_debug_instructions: bool,

    /// Breakpoints and stepping work on whole source lines
    pub line_based_breakpoints: bool,

    pub log_level: LogLevel,

    pub log_sink: LogSink,
}

impl Default for ScriptOptions {
    fn default() -> Self {
        Self {
            default_auto_yield_counter: 0,
            max_call_depth: 200,
            emit_debug_instructions: true,
            line_based_breakpoints: true,
            log_level: LogLevel::Warn,
            log_sink: LogSink::Stderr,
        }
    }
}

impl ScriptOptions {
    /// Parse options from a JSON document
    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Serialize to a pretty-printed JSON document
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    #[must_use]
    pub fn with_auto_yield_counter(mut self, counter: u64) -> Self {
        self.default_auto_yield_counter = counter;
        self
    }

    #[must_use]
    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    #[must_use]
    pub fn with_debug_instructions(mut self, enabled: bool) -> Self {
        self.emit_debug_instructions = enabled;
        self
    }

    #[must_use]
    pub fn with_line_based_breakpoints(mut self, enabled: bool) -> Self {
        self.line_based_breakpoints = enabled;
        self
    }

    #[must_use]
    pub fn with_logging(mut self, level: LogLevel, sink: LogSink) -> Self {
        self.log_level = level;
        self.log_sink = sink;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_defaults() {
        let options = ScriptOptions::from_json(r#"{ "max_call_depth": 64 }"#).unwrap();
        assert_eq!(options.max_call_depth, 64);
        assert!(options.emit_debug_instructions);
        assert_eq!(options.default_auto_yield_counter, 0);
    }

    #[test]
    fn enums_use_lowercase_names() {
        let options =
            ScriptOptions::from_json(r#"{ "log_level": "trace", "log_sink": "capture" }"#).unwrap();
        assert_eq!(options.log_level, LogLevel::Trace);
        assert_eq!(options.log_sink, LogSink::Capture);
    }

    #[test]
    fn json_round_trip() {
        let options = ScriptOptions::default().with_auto_yield_counter(10);
        let text = options.to_json().unwrap();
        assert_eq!(ScriptOptions::from_json(&text).unwrap(), options);
    }

    #[test]
    fn unknown_values_are_rejected() {
        assert!(ScriptOptions::from_json(r#"{ "log_level": "loud" }"#).is_err());
    }
}
