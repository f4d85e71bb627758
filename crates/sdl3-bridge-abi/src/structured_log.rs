//! Structured JSONL logging for the bridge.
//!
//! Provides:
//! - [`LogEntry`]: one JSON object per line with required + optional fields.
//! - [`LogEmitter`]: writes entries to a file, stderr, or a shared buffer,
//!   dropping those below its threshold.
//! - [`log_with`]: the process-wide emitter, configured from
//!   `SDL3_BRIDGE_LOG` / `SDL3_BRIDGE_LOG_FILE`. Entries are only built when
//!   their level passes the threshold.
//! - [`validate_log_line`]: schema check for a single line.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;
use sdl3_bridge_membrane::Token;
use sdl3_bridge_membrane::config::{LogLevel, bridge_config};
use serde::{Deserialize, Serialize};

/// Severity of a log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Level {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl From<Level> for LogLevel {
    fn from(level: Level) -> Self {
        match level {
            Level::Error => Self::Error,
            Level::Warn => Self::Warn,
            Level::Info => Self::Info,
            Level::Debug => Self::Debug,
            Level::Trace => Self::Trace,
        }
    }
}

/// Canonical structured log entry.
///
/// Required fields: `timestamp`, `trace_id`, `level`, `event`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: String,
    pub trace_id: String,
    pub level: Level,
    pub event: String,

    /// Native entry point or trampoline involved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_blocks: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outstanding_bytes: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl LogEntry {
    /// Entry with required fields only; the emitter fills `trace_id`.
    #[must_use]
    pub fn new(level: Level, event: impl Into<String>) -> Self {
        Self {
            timestamp: now_utc(),
            trace_id: String::new(),
            level,
            event: event.into(),
            symbol: None,
            token: None,
            addr: None,
            size: None,
            outstanding_blocks: None,
            outstanding_bytes: None,
            message: None,
            details: None,
        }
    }

    #[must_use]
    pub fn with_symbol(mut self, symbol: impl Into<String>) -> Self {
        self.symbol = Some(symbol.into());
        self
    }

    #[must_use]
    pub fn with_token(mut self, token: Token) -> Self {
        self.token = Some(token.to_string());
        self
    }

    #[must_use]
    pub fn with_addr(mut self, addr: usize) -> Self {
        self.addr = Some(format!("{addr:#x}"));
        self
    }

    #[must_use]
    pub fn with_size(mut self, size: usize) -> Self {
        self.size = Some(size);
        self
    }

    /// Blocks/bytes still held by native code.
    #[must_use]
    pub fn with_outstanding(mut self, blocks: usize, bytes: usize) -> Self {
        self.outstanding_blocks = Some(blocks);
        self.outstanding_bytes = Some(bytes);
        self
    }

    #[must_use]
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    #[must_use]
    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// Serialize to a single JSONL line (no trailing newline).
    pub fn to_jsonl(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Cloneable in-memory sink, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

impl SharedBuffer {
    /// Everything written so far, as UTF-8.
    #[must_use]
    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl Write for SharedBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// JSONL writer with a level threshold and sequential trace ids.
pub struct LogEmitter {
    writer: Box<dyn Write + Send>,
    threshold: LogLevel,
    seq: u64,
    run_id: String,
}

impl LogEmitter {
    /// Append to a file (created if missing).
    pub fn to_file(path: &Path, threshold: LogLevel) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self::with_writer(Box::new(file), threshold))
    }

    /// Write to stderr.
    #[must_use]
    pub fn to_stderr(threshold: LogLevel) -> Self {
        Self::with_writer(Box::new(std::io::stderr()), threshold)
    }

    /// Write to an in-memory buffer; the returned handle reads it back.
    #[must_use]
    pub fn to_buffer(threshold: LogLevel) -> (Self, SharedBuffer) {
        let buffer = SharedBuffer::default();
        (
            Self::with_writer(Box::new(buffer.clone()), threshold),
            buffer,
        )
    }

    fn with_writer(writer: Box<dyn Write + Send>, threshold: LogLevel) -> Self {
        Self {
            writer,
            threshold,
            seq: 0,
            run_id: format!("sdl3-bridge::{}", std::process::id()),
        }
    }

    /// True when entries at `level` are written.
    #[must_use]
    pub fn enabled(&self, level: Level) -> bool {
        self.threshold.enables(level.into())
    }

    fn next_trace_id(&mut self) -> String {
        self.seq += 1;
        format!("{}::{:06}", self.run_id, self.seq)
    }

    /// Write `entry` if it passes the threshold. Returns whether it was written.
    pub fn emit(&mut self, mut entry: LogEntry) -> std::io::Result<bool> {
        if !self.enabled(entry.level) {
            return Ok(false);
        }
        if entry.trace_id.is_empty() {
            entry.trace_id = self.next_trace_id();
        }
        let line = serde_json::to_string(&entry).map_err(std::io::Error::other)?;
        writeln!(self.writer, "{line}")?;
        Ok(true)
    }

    /// Flush the underlying writer.
    pub fn flush(&mut self) -> std::io::Result<()> {
        self.writer.flush()
    }
}

static GLOBAL_EMITTER: OnceLock<Option<Mutex<LogEmitter>>> = OnceLock::new();

fn global_emitter() -> Option<&'static Mutex<LogEmitter>> {
    GLOBAL_EMITTER
        .get_or_init(|| {
            let config = bridge_config();
            if config.log_level == LogLevel::Off {
                return None;
            }
            let emitter = match &config.log_file {
                Some(path) => LogEmitter::to_file(path, config.log_level)
                    .unwrap_or_else(|_| LogEmitter::to_stderr(config.log_level)),
                None => LogEmitter::to_stderr(config.log_level),
            };
            Some(Mutex::new(emitter))
        })
        .as_ref()
}

/// Emit through the process-wide emitter. `build` runs only when `level` is enabled.
///
/// Write failures are dropped; logging never fails a bridge operation.
pub fn log_with(level: Level, build: impl FnOnce() -> LogEntry) {
    let Some(emitter) = global_emitter() else {
        return;
    };
    let mut emitter = emitter.lock();
    if emitter.enabled(level) {
        let _ = emitter.emit(build());
    }
}

/// Validate one JSONL line against the entry schema.
pub fn validate_log_line(line: &str) -> Result<LogEntry, String> {
    let value: serde_json::Value =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON: {e}"))?;
    for field in ["timestamp", "trace_id", "level", "event"] {
        match value.get(field) {
            Some(serde_json::Value::String(s)) if !s.is_empty() => {}
            Some(_) => return Err(format!("field `{field}` must be a non-empty string")),
            None => return Err(format!("missing required field `{field}`")),
        }
    }
    serde_json::from_value(value).map_err(|e| format!("schema mismatch: {e}"))
}

/// RFC 3339 UTC timestamp with millisecond precision.
fn now_utc() -> String {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = elapsed.as_secs();
    let (year, month, day) = civil_from_days((secs / 86_400) as i64);
    format!(
        "{year:04}-{month:02}-{day:02}T{:02}:{:02}:{:02}.{:03}Z",
        (secs % 86_400) / 3_600,
        (secs % 3_600) / 60,
        secs % 60,
        elapsed.subsec_millis(),
    )
}

/// Days since 1970-01-01 to (year, month, day), proleptic Gregorian.
fn civil_from_days(days: i64) -> (i64, u32, u32) {
    let z = days + 719_468;
    let era = z.div_euclid(146_097);
    let doe = z.rem_euclid(146_097);
    let yoe = (doe - doe / 1_460 + doe / 36_524 - doe / 146_096) / 365;
    let doy = doe - (365 * yoe + yoe / 4 - yoe / 100);
    let mp = (5 * doy + 2) / 153;
    let day = (doy - (153 * mp + 2) / 5 + 1) as u32;
    let month = (if mp < 10 { mp + 3 } else { mp - 9 }) as u32;
    let year = yoe + era * 400 + i64::from(month <= 2);
    (year, month, day)
}
