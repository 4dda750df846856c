//! Batch indexing progress.
//!
//! Progress goes to **stderr** so stdout stays parseable for scripts.

use indexkit_core::batch::BatchContext;
use std::io::Write;

/// A single progress event of a batch run.
#[derive(Clone, Debug)]
pub enum IndexProgressEvent {
    /// Tracking is being (re)built for a datasource. Total unknown.
    Tracking { index: String, datasource: String },
    /// `n` of `total` pending items handled.
    Indexing { index: String, n: u64, total: u64 },
}

impl IndexProgressEvent {
    pub fn from_batch(index: &str, context: &BatchContext) -> Self {
        IndexProgressEvent::Indexing {
            index: index.to_string(),
            n: context.progress as u64,
            total: context.max.unwrap_or(context.progress) as u64,
        }
    }
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: IndexProgressEvent);
}

/// Human-friendly progress: "index main  indexing  1,234 / 5,000 items".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: IndexProgressEvent) {
        let line = match &event {
            IndexProgressEvent::Tracking { index, datasource } => {
                format!("index {}  tracking {}...\n", index, datasource)
            }
            IndexProgressEvent::Indexing { index, n, total } => format!(
                "index {}  indexing  {} / {} items\n",
                index,
                format_number(*n),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// One JSON object per line.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: IndexProgressEvent) {
        let obj = match &event {
            IndexProgressEvent::Tracking { index, datasource } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "tracking",
                "datasource": datasource
            }),
            IndexProgressEvent::Indexing { index, n, total } => serde_json::json!({
                "event": "progress",
                "index": index,
                "phase": "indexing",
                "n": n,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: IndexProgressEvent) {}
}

pub fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw {
            "off" => Ok(ProgressMode::Off),
            "human" => Ok(ProgressMode::Human),
            "json" => Ok(ProgressMode::Json),
            other => anyhow::bail!("Unknown progress mode '{}' (expected off, human or json)", other),
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
