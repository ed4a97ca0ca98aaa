use std::io::{stderr, stdout, Write};
use std::str::FromStr;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use humantime::format_rfc3339_millis;
use serde_json::{json, Map, Value};

const MEMORY_LOG_LIMIT: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
    Fatal,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
            LogLevel::Fatal => "fatal",
        }
    }
}

impl FromStr for LogLevel {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            "fatal" => Ok(LogLevel::Fatal),
            other => Err(anyhow!("unsupported log level: {other}")),
        }
    }
}

pub fn current_timestamp() -> String {
    format_rfc3339_millis(std::time::SystemTime::now()).to_string()
}

/// Destination for finished log entries.
pub trait LogSink: Send + Sync {
    fn write(&self, entry: &Map<String, Value>);
}

/// Writes one JSON line per entry; error and fatal go to stderr.
#[derive(Debug, Default, Clone, Copy)]
pub struct StdioSink;

impl LogSink for StdioSink {
    fn write(&self, entry: &Map<String, Value>) {
        if let Ok(serialized) = serde_json::to_string(entry) {
            let level = entry
                .get("level")
                .and_then(Value::as_str)
                .unwrap_or("info");
            if matches!(level, "error" | "fatal") {
                let _ = writeln!(stderr(), "{serialized}");
            } else {
                let _ = writeln!(stdout(), "{serialized}");
            }
        }
    }
}

#[derive(Default)]
struct MemoryBuffer {
    entries: Vec<Value>,
    truncated: bool,
}

/// Captures entries in memory, mostly for tests.
#[derive(Default, Clone)]
pub struct MemorySink {
    inner: Arc<Mutex<MemoryBuffer>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<Value> {
        self.inner
            .lock()
            .map(|buffer| buffer.entries.clone())
            .unwrap_or_default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.entries()
            .iter()
            .filter_map(|entry| entry.get("message").and_then(Value::as_str))
            .map(str::to_string)
            .collect()
    }
}

impl LogSink for MemorySink {
    fn write(&self, entry: &Map<String, Value>) {
        let Ok(mut buffer) = self.inner.lock() else {
            return;
        };
        if buffer.entries.len() >= MEMORY_LOG_LIMIT {
            if !buffer.truncated {
                buffer.entries.push(json!({
                    "level": "warn",
                    "message": "Log buffer truncated",
                    "tags": { "component": "kernel", "reason": "log-overflow" }
                }));
                buffer.truncated = true;
            }
            return;
        }
        buffer.entries.push(Value::Object(entry.clone()));
    }
}

/// Structured logger with scope tags.
#[derive(Clone)]
pub struct Logger {
    sink: Arc<dyn LogSink>,
    min_level: LogLevel,
    tags: Map<String, Value>,
}

impl Default for Logger {
    fn default() -> Self {
        Self::new(Arc::new(StdioSink), LogLevel::Info)
    }
}

impl Logger {
    pub fn new(sink: Arc<dyn LogSink>, min_level: LogLevel) -> Self {
        Self {
            sink,
            min_level,
            tags: Map::new(),
        }
    }

    /// A logger that records everything into `sink`.
    pub fn capturing(sink: MemorySink) -> Self {
        Self::new(Arc::new(sink), LogLevel::Trace)
    }

    /// Child logger with `tags` merged over the current ones. Only scalar
    /// tag values are kept.
    pub fn with_tags(&self, tags: Value) -> Self {
        let mut merged = self.tags.clone();
        if let Value::Object(extra) = tags {
            for (key, val) in extra {
                if matches!(val, Value::String(_) | Value::Number(_) | Value::Bool(_)) {
                    merged.insert(key, val);
                }
            }
        }
        Self {
            sink: self.sink.clone(),
            min_level: self.min_level,
            tags: merged,
        }
    }

    pub fn enabled(&self, level: LogLevel) -> bool {
        level >= self.min_level
    }

    pub fn log(&self, level: LogLevel, message: &str, data: Option<Value>) {
        if !self.enabled(level) || message.is_empty() {
            return;
        }
        let mut entry = Map::new();
        entry.insert("level".to_string(), Value::String(level.as_str().to_string()));
        entry.insert("message".to_string(), Value::String(message.to_string()));
        if let Some(data @ Value::Object(_)) = data {
            entry.insert("data".to_string(), data);
        }
        if !self.tags.is_empty() {
            entry.insert("tags".to_string(), Value::Object(self.tags.clone()));
        }
        entry.insert("timestamp".to_string(), Value::String(current_timestamp()));
        self.sink.write(&entry);
    }

    pub fn error_with(&self, message: &str, err: &anyhow::Error) {
        if !self.enabled(LogLevel::Error) {
            return;
        }
        let mut entry = Map::new();
        entry.insert("level".to_string(), Value::String("error".to_string()));
        entry.insert("message".to_string(), Value::String(message.to_string()));
        entry.insert("error".to_string(), json!({ "message": err.to_string() }));
        if !self.tags.is_empty() {
            entry.insert("tags".to_string(), Value::Object(self.tags.clone()));
        }
        entry.insert("timestamp".to_string(), Value::String(current_timestamp()));
        self.sink.write(&entry);
    }

    pub fn debug(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Debug, message, data);
    }

    pub fn info(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Info, message, data);
    }

    pub fn warn(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Warn, message, data);
    }

    pub fn error(&self, message: &str, data: Option<Value>) {
        self.log(LogLevel::Error, message, data);
    }
}
