//! Append-only JSONL record of link traffic.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{SecondsFormat, Utc};
use serde_json::{Map, Value};
use tracing::warn;

#[derive(Debug, Clone)]
/// One JSON object per line: session start/end, every send, every receive.
pub struct TrafficLog {
    path: PathBuf,
    file: Arc<Mutex<std::fs::File>>,
}

impl TrafficLog {
    /// Opens `path` for appending, creating parent directories.
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        Ok(Self {
            path,
            file: Arc::new(Mutex::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes one JSON line.
    pub fn append(&self, value: &Value) -> std::io::Result<()> {
        let line = serde_json::to_string(value)?;
        let mut file = self
            .file
            .lock()
            .map_err(|_| std::io::Error::other("traffic log mutex is poisoned"))?;
        writeln!(file, "{line}")?;
        file.flush()
    }

    /// Appends `{"timestamp", "event", ...fields}`; write failures are logged
    /// and otherwise ignored so they never fail a call.
    pub(crate) fn record(&self, event: &str, fields: Value) {
        let mut entry = Map::new();
        entry.insert(
            "timestamp".to_string(),
            Value::String(Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        entry.insert("event".to_string(), Value::String(event.to_string()));
        if let Value::Object(fields) = fields {
            entry.extend(fields);
        }
        if let Err(error) = self.append(&Value::Object(entry)) {
            warn!(path = %self.path.display(), %error, "failed to append traffic log entry");
        }
    }
}
