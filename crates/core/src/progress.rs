//! Progress reporting for upload runs.
//!
//! The orchestrator drives a [`ProgressReporter`] through two channels of
//! events: per-file events (start, bytes, done) and an aggregate files counter.
//! Reporters decide how, and how often, to render them. [`NoopReporter`]
//! satisfies the same contract for dry runs and tests.

use crate::model::{FinalOutcome, ProgressState, UploadTask};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Sink for upload progress events.
///
/// `on_file_bytes` is called once per chunk, so implementations must keep it
/// cheap and throttle any rendering themselves.
pub trait ProgressReporter: Send {
    /// A file is about to be uploaded (or simulated)
    fn on_file_start(&mut self, task: &UploadTask);

    /// `bytes_sent_delta` more bytes of the current file were sent
    fn on_file_bytes(&mut self, task: &UploadTask, bytes_sent_delta: u64);

    /// The file reached its final outcome
    fn on_file_done(&mut self, task: &UploadTask, outcome: &FinalOutcome);

    /// Aggregate counter changed
    fn on_overall_update(&mut self, files_done: usize, files_total: usize);

    /// Attempt `attempt` failed and another one follows after `delay`
    fn on_retry(&mut self, _task: &UploadTask, _attempt: u32, _max_attempts: u32, _delay: Duration, _reason: &str) {}

    /// The run is over, release any terminal resources
    fn finish(&mut self) {}
}

/// Reporter that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl ProgressReporter for NoopReporter {
    fn on_file_start(&mut self, _task: &UploadTask) {}
    fn on_file_bytes(&mut self, _task: &UploadTask, _bytes_sent_delta: u64) {}
    fn on_file_done(&mut self, _task: &UploadTask, _outcome: &FinalOutcome) {}
    fn on_overall_update(&mut self, _files_done: usize, _files_total: usize) {}
}

impl ProgressState {
    fn start_file(&mut self, size: u64) {
        self.current_file_bytes_sent = 0;
        self.current_file_bytes_total = size;
    }

    fn add_bytes(&mut self, delta: u64) {
        self.current_file_bytes_sent = self.current_file_bytes_sent.saturating_add(delta);
    }

    fn set_overall(&mut self, files_done: usize, files_total: usize) {
        self.files_done = files_done;
        self.files_total = files_total;
    }
}

/// Two stacked indicatif bars: files overall, bytes of the current file
pub struct TerminalReporter {
    multi: MultiProgress,
    overall: ProgressBar,
    file: Option<ProgressBar>,
    state: ProgressState,
}

impl TerminalReporter {
    pub fn new() -> Self {
        let multi = MultiProgress::new();

        let overall = multi.add(ProgressBar::new(0));
        overall.set_style(
            ProgressStyle::with_template("{prefix:.bold} [{bar:30.green/white}] {pos}/{len} files ({elapsed})")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        overall.set_prefix("Uploading files");

        Self {
            multi,
            overall,
            file: None,
            state: ProgressState::default(),
        }
    }

    /// Exact counters, independent of what was drawn
    pub fn state(&self) -> ProgressState {
        self.state
    }

    fn file_style() -> ProgressStyle {
        ProgressStyle::with_template(
            "{spinner:.green} {msg} [{bar:30.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta})",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
    }
}

impl Default for TerminalReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressReporter for TerminalReporter {
    fn on_file_start(&mut self, task: &UploadTask) {
        self.state.start_file(task.size);

        if let Some(old) = self.file.take() {
            old.finish_and_clear();
        }
        let bar = self.multi.add(ProgressBar::new(task.size));
        bar.set_style(Self::file_style());
        bar.set_message(task.relative_name.clone());
        self.file = Some(bar);
    }

    fn on_file_bytes(&mut self, _task: &UploadTask, bytes_sent_delta: u64) {
        self.state.add_bytes(bytes_sent_delta);
        if let Some(bar) = &self.file {
            bar.inc(bytes_sent_delta);
        }
    }

    fn on_file_done(&mut self, task: &UploadTask, outcome: &FinalOutcome) {
        if let Some(bar) = self.file.take() {
            bar.finish_and_clear();
        }
        if let FinalOutcome::Failed(reason) = outcome {
            let _ = self
                .multi
                .println(format!("✗ {}: {}", task.relative_name, reason));
        }
    }

    fn on_overall_update(&mut self, files_done: usize, files_total: usize) {
        self.state.set_overall(files_done, files_total);
        self.overall.set_length(files_total as u64);
        self.overall.set_position(files_done as u64);
    }

    fn on_retry(&mut self, task: &UploadTask, attempt: u32, max_attempts: u32, delay: Duration, reason: &str) {
        self.state.start_file(task.size);
        if let Some(bar) = &self.file {
            bar.set_position(0);
            bar.set_message(format!(
                "{} [{}/{}] retrying in {:.1}s: {}",
                task.relative_name,
                attempt + 1,
                max_attempts,
                delay.as_secs_f64(),
                reason
            ));
        }
    }

    fn finish(&mut self) {
        if let Some(bar) = self.file.take() {
            bar.finish_and_clear();
        }
        self.overall.finish();
    }
}

/// Headless reporter writing `tracing` events.
///
/// Byte progress is logged at most once per `interval` or every
/// `byte_threshold` bytes, whichever comes first. Counts stay exact.
pub struct LogReporter {
    state: ProgressState,
    interval: Duration,
    byte_threshold: u64,
    last_emit: Instant,
    bytes_since_emit: u64,
    emitted: usize,
}

impl LogReporter {
    pub fn new(interval: Duration, byte_threshold: u64) -> Self {
        Self {
            state: ProgressState::default(),
            interval,
            byte_threshold: byte_threshold.max(1),
            last_emit: Instant::now(),
            bytes_since_emit: 0,
            emitted: 0,
        }
    }

    pub fn state(&self) -> ProgressState {
        self.state
    }
}

impl Default for LogReporter {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), 64 * 1024 * 1024)
    }
}

impl ProgressReporter for LogReporter {
    fn on_file_start(&mut self, task: &UploadTask) {
        self.state.start_file(task.size);
        self.bytes_since_emit = 0;
        self.last_emit = Instant::now();
        tracing::info!(file = %task.relative_name, size = task.size, "upload started");
    }

    fn on_file_bytes(&mut self, task: &UploadTask, bytes_sent_delta: u64) {
        self.state.add_bytes(bytes_sent_delta);
        self.bytes_since_emit = self.bytes_since_emit.saturating_add(bytes_sent_delta);

        if self.bytes_since_emit >= self.byte_threshold || self.last_emit.elapsed() >= self.interval {
            self.bytes_since_emit = 0;
            self.last_emit = Instant::now();
            self.emitted += 1;
            tracing::info!(
                file = %task.relative_name,
                sent = self.state.current_file_bytes_sent,
                total = self.state.current_file_bytes_total,
                "upload progress"
            );
        }
    }

    fn on_file_done(&mut self, task: &UploadTask, outcome: &FinalOutcome) {
        match outcome {
            FinalOutcome::Success => {
                tracing::info!(file = %task.relative_name, "upload finished")
            }
            FinalOutcome::Failed(reason) => {
                tracing::warn!(file = %task.relative_name, %reason, "upload failed")
            }
        }
    }

    fn on_overall_update(&mut self, files_done: usize, files_total: usize) {
        self.state.set_overall(files_done, files_total);
        tracing::info!(files_done, files_total, "overall progress");
    }

    fn on_retry(&mut self, task: &UploadTask, attempt: u32, max_attempts: u32, delay: Duration, reason: &str) {
        self.state.start_file(task.size);
        self.bytes_since_emit = 0;
        tracing::warn!(
            file = %task.relative_name,
            attempt,
            max_attempts,
            delay_ms = delay.as_millis() as u64,
            %reason,
            "retrying upload"
        );
    }
}
