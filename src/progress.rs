//! Classification progress reporting.
//!
//! Progress goes to **stderr** so `fbi` stdout stays parseable.

use serde::Serialize;
use std::io::Write;
use std::sync::Arc;

/// A single progress event emitted by the prediction pipeline.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "phase", rename_all = "lowercase")]
pub enum ClassifyProgress {
    /// A batch was handed to the worker pool.
    Queued { batch: u64, items: usize, total: u64 },
    /// One item finished, successfully or not.
    Classified { done: u64, failed: u64, total: u64 },
}

pub trait ProgressReporter: Send + Sync {
    fn report(&self, event: &ClassifyProgress);
}

/// `classify  queued batch 3 (100 items, 1,204 pending)` style lines.
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: &ClassifyProgress) {
        let line = match event {
            ClassifyProgress::Queued { batch, items, total } => format!(
                "classify  queued batch {} ({} items, {} pending)\n",
                batch,
                items,
                group_thousands(*total)
            ),
            ClassifyProgress::Classified { done, failed, total } => format!(
                "classify  {} / {} done, {} failed\n",
                group_thousands(*done),
                group_thousands(*total),
                failed
            ),
        };
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(line.as_bytes());
        let _ = err.flush();
    }
}

/// One JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: &ClassifyProgress) {
        let obj = serde_json::json!({ "event": "progress", "detail": event });
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut err = std::io::stderr().lock();
            let _ = writeln!(err, "{}", line);
            let _ = err.flush();
        }
    }
}

pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: &ClassifyProgress) {}
}

fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
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

    pub fn reporter(&self) -> Arc<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Arc::new(NoProgress),
            ProgressMode::Human => Arc::new(StderrProgress),
            ProgressMode::Json => Arc::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_group_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(123_456), "123,456");
        assert_eq!(group_thousands(1_234_567), "1,234,567");
    }

    #[test]
    fn test_event_json_shape() {
        let v = serde_json::to_value(ClassifyProgress::Classified { done: 3, failed: 1, total: 10 }).unwrap();
        assert_eq!(v["phase"], "classified");
        assert_eq!(v["done"], 3);
        assert_eq!(v["failed"], 1);
    }
}
