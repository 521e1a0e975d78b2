//! Experiment logging.
//!
//! The training loop and the completion client report structured key-value
//! records (regret, return, query latency, ...) to a [`RunLogger`]. Records
//! are only emitted when the logger carries a run identifier, so a logger
//! without one acts as a switch that turns experiment logging off.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Map, Value};

/// An ordered set of key-value fields.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct LogRecord(Map<String, Value>);

impl LogRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.0.insert(key.to_string(), value.into());
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Numeric field, if present and numeric.
    pub fn get_f64(&self, key: &str) -> Option<f64> {
        self.0.get(key).and_then(Value::as_f64)
    }

    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }
}

/// Reproducibility metadata for the start of a run: command line, working
/// directory, wall-clock time and host.
pub fn run_metadata(run_id: &str) -> LogRecord {
    let command_line: Vec<String> = std::env::args().collect();
    let cwd = std::env::current_dir()
        .map(|d| d.display().to_string())
        .unwrap_or_default();
    let hostname = std::env::var("HOSTNAME")
        .ok()
        .or_else(|| std::fs::read_to_string("/etc/hostname").ok())
        .map(|h| h.trim().to_string())
        .unwrap_or_default();

    LogRecord::new()
        .with("run ID", run_id)
        .with(
            "reproducibility",
            json!({
                "command_line": command_line.join(" "),
                "time": Utc::now().to_rfc3339(),
                "cwd": cwd,
            }),
        )
        .with("hostname", hostname)
}

/// Sink for experiment records.
pub trait RunLogger: Send + Sync {
    /// The run identifier; `None` disables logging.
    fn run_id(&self) -> Option<&str>;

    /// Write a record. Callers check [`RunLogger::run_id`] first.
    fn log(&self, record: &LogRecord) -> Result<()>;

    /// Write `record` only if a run identifier is set.
    fn log_if_enabled(&self, record: &LogRecord) -> Result<()> {
        if self.run_id().is_some() {
            self.log(record)?;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tracing
// ---------------------------------------------------------------------------

/// Emits every record as a `tracing` event.
#[derive(Debug, Clone, Default)]
pub struct TracingLogger {
    run_id: Option<String>,
}

impl TracingLogger {
    pub fn new(run_id: Option<String>) -> Self {
        Self { run_id }
    }
}

impl RunLogger for TracingLogger {
    fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn log(&self, record: &LogRecord) -> Result<()> {
        let fields = serde_json::to_string(record).context("failed to serialise log record")?;
        tracing::info!(run_id = ?self.run_id, %fields, "run log");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// JSON lines file
// ---------------------------------------------------------------------------

/// Appends every record, timestamped, as one JSON object per line.
#[derive(Debug)]
pub struct JsonlLogger {
    run_id: Option<String>,
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl JsonlLogger {
    /// Open (or create) `path` for appending.
    pub fn open(path: impl AsRef<Path>, run_id: Option<String>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("failed to open run log {}", path.display()))?;
        Ok(Self {
            run_id,
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl RunLogger for JsonlLogger {
    fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn log(&self, record: &LogRecord) -> Result<()> {
        let mut line = record.fields().clone();
        line.insert("timestamp".into(), Value::String(Utc::now().to_rfc3339()));
        let text = serde_json::to_string(&line)?;

        let mut writer = self
            .writer
            .lock()
            .map_err(|_| anyhow::anyhow!("run log writer lock poisoned"))?;
        writeln!(writer, "{text}")?;
        writer.flush()?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In memory
// ---------------------------------------------------------------------------

/// Keeps every record in memory.
#[derive(Debug, Default)]
pub struct MemoryLogger {
    run_id: Option<String>,
    records: Mutex<Vec<LogRecord>>,
}

impl MemoryLogger {
    pub fn new(run_id: Option<String>) -> Self {
        Self {
            run_id,
            records: Mutex::new(Vec::new()),
        }
    }

    /// A snapshot of the records logged so far.
    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .map(|records| records.clone())
            .unwrap_or_default()
    }
}

impl RunLogger for MemoryLogger {
    fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    fn log(&self, record: &LogRecord) -> Result<()> {
        self.records
            .lock()
            .map_err(|_| anyhow::anyhow!("memory logger lock poisoned"))?
            .push(record.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_builder() {
        let record = LogRecord::new()
            .with("episode", 3)
            .with("regret", 0.25)
            .with("run ID", "abc");
        assert_eq!(record.get_f64("regret"), Some(0.25));
        assert_eq!(record.get("run ID"), Some(&Value::from("abc")));
        assert_eq!(record.fields().len(), 3);
        assert!(record.get("missing").is_none());
    }

    #[test]
    fn test_disabled_without_run_id() {
        let logger = MemoryLogger::new(None);
        logger
            .log_if_enabled(&LogRecord::new().with("step", 1))
            .unwrap();
        assert!(logger.records().is_empty());

        let logger = MemoryLogger::new(Some("run".into()));
        logger
            .log_if_enabled(&LogRecord::new().with("step", 1))
            .unwrap();
        assert_eq!(logger.records().len(), 1);
    }

    #[test]
    fn test_jsonl_logger_appends_lines() {
        let path = std::env::temp_dir().join(format!("textrl_log_{}.jsonl", uuid::Uuid::new_v4()));
        let logger = JsonlLogger::open(&path, Some("run-1".into())).unwrap();
        logger.log(&LogRecord::new().with("step", 1)).unwrap();
        logger.log(&LogRecord::new().with("step", 2)).unwrap();

        let text = std::fs::read_to_string(logger.path()).unwrap();
        let lines: Vec<Value> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[1]["step"], 2);
        assert!(lines[0]["timestamp"].is_string());

        std::fs::remove_file(&path).ok();
    }

    #[test]
    fn test_run_metadata_fields() {
        let record = run_metadata("run-9");
        assert_eq!(record.get("run ID"), Some(&Value::from("run-9")));
        assert!(record.get("hostname").is_some_and(Value::is_string));

        let reproducibility = record.get("reproducibility").unwrap();
        assert!(reproducibility["command_line"].is_string());
        assert!(reproducibility["cwd"].as_str().is_some_and(|cwd| !cwd.is_empty()));
        assert!(reproducibility["time"]
            .as_str()
            .is_some_and(|t| chrono::DateTime::parse_from_rfc3339(t).is_ok()));
    }
}
