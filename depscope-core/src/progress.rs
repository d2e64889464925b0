//! Progress reporting for fetch runs.
//!
//! The CLI uses `IndicatifReporter` for a progress bar over fetch units.
//! Library callers can use `NoopReporter` or provide their own implementation.

use std::sync::atomic::{AtomicU64, Ordering};

use indicatif::{ProgressBar, ProgressStyle};

/// Trait for reporting progress of a batch of fetch units.
pub trait ProgressReporter: Send + Sync {
    /// Begin a new batch with an optional total unit count.
    fn start(&self, task: &str, total: Option<u64>);

    /// Record finished units (successful or not).
    fn advance(&self, amount: u64);

    /// A unit is about to be retried.
    fn retrying(&self, unit: &str, attempt: u32) {
        let _ = (unit, attempt);
    }

    /// Mark the batch as finished.
    fn finish(&self);

    /// Display an informational message.
    fn message(&self, msg: &str);
}

/// No-op reporter for library callers that don't need progress output.
#[derive(Debug, Default)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn start(&self, _task: &str, _total: Option<u64>) {}
    fn advance(&self, _amount: u64) {}
    fn finish(&self) {}
    fn message(&self, _msg: &str) {}
}

/// Reporter backed by an `indicatif` progress bar for CLI use.
#[derive(Debug)]
pub struct IndicatifReporter {
    bar: ProgressBar,
    completed: AtomicU64,
    retries: AtomicU64,
}

impl Default for IndicatifReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl IndicatifReporter {
    pub fn new() -> Self {
        Self {
            bar: ProgressBar::new(0),
            completed: AtomicU64::new(0),
            retries: AtomicU64::new(0),
        }
    }

    /// A reporter that draws nothing, for quiet runs and tests.
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            ..Self::new()
        }
    }

    pub fn completed(&self) -> u64 {
        self.completed.load(Ordering::Relaxed)
    }

    pub fn retries(&self) -> u64 {
        self.retries.load(Ordering::Relaxed)
    }
}

impl ProgressReporter for IndicatifReporter {
    fn start(&self, task: &str, total: Option<u64>) {
        self.completed.store(0, Ordering::Relaxed);
        self.retries.store(0, Ordering::Relaxed);
        let template = if total.is_some() {
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len} ({eta})"
        } else {
            "{spinner:.green} {msg} {pos} units"
        };
        if let Ok(style) = ProgressStyle::with_template(template) {
            self.bar.set_style(style.progress_chars("=> "));
        }
        self.bar.set_length(total.unwrap_or(0));
        self.bar.set_message(task.to_string());
        self.bar.reset();
    }

    fn advance(&self, amount: u64) {
        self.completed.fetch_add(amount, Ordering::Relaxed);
        self.bar.inc(amount);
    }

    fn retrying(&self, unit: &str, attempt: u32) {
        self.retries.fetch_add(1, Ordering::Relaxed);
        self.bar.set_message(format!("retrying {unit} (attempt {attempt})"));
    }

    fn finish(&self) {
        self.bar.finish_and_clear();
    }

    fn message(&self, msg: &str) {
        self.bar.println(msg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn noop_reporter_is_silent() {
        let reporter = NoopReporter;
        reporter.start("test", Some(100));
        reporter.advance(50);
        reporter.retrying("page 3", 2);
        reporter.message("hello");
        reporter.finish();
    }

    #[test]
    fn indicatif_reporter_counts() {
        let reporter = IndicatifReporter::hidden();
        reporter.start("registry pages", Some(10));
        reporter.advance(5);
        reporter.retrying("page 3", 2);
        reporter.advance(5);
        assert_eq!(reporter.completed(), 10);
        assert_eq!(reporter.retries(), 1);
        reporter.finish();

        reporter.start("requirements", None);
        assert_eq!(reporter.completed(), 0);
        reporter.finish();
    }
}
