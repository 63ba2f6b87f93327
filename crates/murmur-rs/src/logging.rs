//! Daily log-file tracing layer.
//!
//! Events are appended to `<dir>/murmur_<YYYYMMDD>.log` as
//! `<time> - <target> - <LEVEL> - <message {fields}>`. A new file is opened
//! when the local date changes. Nothing is written to stdout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Local};
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;

use crate::error::{MurmurError, Result};

struct OpenLog {
    date: String,
    file: File,
}

/// A [`tracing_subscriber::Layer`] that appends events to a daily log file.
pub struct FileLogLayer {
    dir: PathBuf,
    max_level: Level,
    current: Mutex<Option<OpenLog>>,
}

impl FileLogLayer {
    /// Create the layer, creating `dir` if needed. Events more verbose than
    /// `max_level` are dropped.
    pub fn new(dir: impl Into<PathBuf>, max_level: Level) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)
            .map_err(|e| MurmurError::storage("Failed to create log dir", e))?;
        Ok(Self {
            dir,
            max_level,
            current: Mutex::new(None),
        })
    }

    /// Log file for a `YYYYMMDD` date stamp.
    pub fn log_path(&self, date: &str) -> PathBuf {
        self.dir.join(format!("murmur_{date}.log"))
    }

    fn append(&self, now: &DateTime<Local>, line: &str) {
        let date = now.format("%Y%m%d").to_string();
        let mut current = self.current.lock().unwrap_or_else(|e| e.into_inner());

        if current.as_ref().is_none_or(|open| open.date != date) {
            let opened = OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path(&date));
            // Logging must never take the process down; drop the line.
            let Ok(file) = opened else {
                return;
            };
            *current = Some(OpenLog { date, file });
        }
        if let Some(open) = current.as_mut() {
            let _ = writeln!(open.file, "{line}");
        }
    }
}

/// Render one log line.
pub fn format_line(time: &DateTime<Local>, target: &str, level: &Level, message: &str) -> String {
    format!(
        "{} - {target} - {level} - {message}",
        time.format("%Y-%m-%d %H:%M:%S,%3f")
    )
}

impl<S: Subscriber + for<'a> LookupSpan<'a>> Layer<S> for FileLogLayer {
    fn on_event(
        &self,
        event: &tracing::Event<'_>,
        _ctx: tracing_subscriber::layer::Context<'_, S>,
    ) {
        let metadata = event.metadata();
        if *metadata.level() > self.max_level {
            return;
        }

        let mut visitor = MessageVisitor::default();
        event.record(&mut visitor);

        let mut message = visitor.message;
        if !visitor.fields.is_empty() {
            let extras: Vec<String> = visitor
                .fields
                .iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect();
            if message.is_empty() {
                message = extras.join(" ");
            } else {
                message = format!("{message} {{{}}}", extras.join(", "));
            }
        }

        let now = Local::now();
        let line = format_line(&now, metadata.target(), metadata.level(), &message);
        self.append(&now, &line);
    }
}

/// Collects the `message` field and any structured fields of an event.
#[derive(Default)]
struct MessageVisitor {
    message: String,
    fields: Vec<(String, String)>,
}

impl tracing::field::Visit for MessageVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        let rendered = format!("{value:?}");
        if field.name() == "message" {
            self.message = rendered;
        } else {
            self.fields.push((field.name().to_string(), rendered));
        }
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.push((field.name().to_string(), value.to_string()));
        }
    }
}

/// Install the file layer as the global subscriber.
pub fn init(log_dir: &Path, max_level: Level) -> Result<()> {
    let layer = FileLogLayer::new(log_dir, max_level)?;
    tracing_subscriber::registry()
        .with(layer)
        .try_init()
        .map_err(|e| MurmurError::InvalidConfig(format!("failed to install logger: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tracing::{debug, info, warn};

    fn read_today(layer_dir: &Path) -> String {
        let date = Local::now().format("%Y%m%d").to_string();
        std::fs::read_to_string(layer_dir.join(format!("murmur_{date}.log"))).unwrap_or_default()
    }

    #[test]
    fn format_line_layout() {
        let time = Local.with_ymd_and_hms(2024, 3, 1, 9, 5, 7).unwrap();
        assert_eq!(
            format_line(&time, "murmur_rs::store", &Level::WARN, "disk full"),
            "2024-03-01 09:05:07,000 - murmur_rs::store - WARN - disk full"
        );
    }

    #[test]
    fn writes_events_with_fields() {
        let dir = tempfile::tempdir().unwrap();
        let layer = FileLogLayer::new(dir.path(), Level::INFO).unwrap();
        let subscriber = tracing_subscriber::registry().with(layer);

        tracing::subscriber::with_default(subscriber, || {
            info!(conversation_id = "cv-1", "Started new conversation");
            warn!("Skipping malformed conversation");
            debug!("too verbose");
        });

        let contents = read_today(dir.path());
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(" - INFO - Started new conversation {conversation_id=cv-1}"));
        assert!(lines[1].contains(" - WARN - Skipping malformed conversation"));
        assert!(!contents.contains("too verbose"));
    }

    #[test]
    fn creates_log_dir() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("logs");
        let layer = FileLogLayer::new(&nested, Level::DEBUG).unwrap();
        assert!(nested.is_dir());
        assert_eq!(layer.log_path("20240301"), nested.join("murmur_20240301.log"));
    }
}
