//! Sequential upload pipeline with per-file retries

use crate::client::UploadClient;
use crate::config::RunConfig;
use crate::error::Result;
use crate::model::{AttemptOutcome, FinalOutcome, RunSummary, UploadAttempt, UploadResult, UploadTask};
use crate::progress::ProgressReporter;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Reason recorded for the task in flight when a run is interrupted
pub const CANCELLED_REASON: &str = "cancelled";

/// Uploads tasks one after another through an [`UploadClient`].
///
/// A file that fails never stops the run: its failure is recorded and the
/// next file is attempted. Only enumeration errors abort `run`.
pub struct UploadOrchestrator<C> {
    client: C,
    config: RunConfig,
    cancel: CancellationToken,
}

impl<C: UploadClient> UploadOrchestrator<C> {
    pub fn new(client: C, config: RunConfig) -> Self {
        Self {
            client,
            config,
            cancel: CancellationToken::new(),
        }
    }

    /// Use an externally owned cancellation token
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Token that interrupts the run when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    /// Upload every task and summarise the outcome.
    ///
    /// Tasks are collected before the first transfer so totals are known up
    /// front; the first enumeration error is returned as is.
    pub async fn run<I>(&self, tasks: I, reporter: &mut dyn ProgressReporter) -> Result<RunSummary>
    where
        I: IntoIterator<Item = Result<UploadTask>>,
    {
        let tasks = tasks.into_iter().collect::<Result<Vec<_>>>()?;
        let files_total = tasks.len();

        info!(
            files = files_total,
            deposit = %self.config.target.deposit_id,
            base_url = %self.config.target.base_url,
            dry_run = self.config.dry_run,
            "starting upload run"
        );

        reporter.on_overall_update(0, files_total);

        let mut results = Vec::with_capacity(files_total);
        for task in &tasks {
            if self.cancel.is_cancelled() {
                break;
            }

            reporter.on_file_start(task);
            let result = if self.config.dry_run {
                info!(file = %task.relative_name, size = task.size, "dry run, not uploading");
                UploadResult {
                    task: task.clone(),
                    final_outcome: FinalOutcome::Success,
                    attempts_made: 0,
                }
            } else {
                self.upload_with_retry(task, reporter).await
            };
            reporter.on_file_done(task, &result.final_outcome);

            results.push(result);
            reporter.on_overall_update(results.len(), files_total);
        }

        reporter.finish();

        let cancelled = self.cancel.is_cancelled();
        let skipped = files_total - results.len();
        let summary = RunSummary::from_results(results, cancelled, skipped);

        info!(
            succeeded = summary.succeeded,
            failed = summary.failed,
            skipped = summary.skipped,
            cancelled = summary.cancelled,
            "upload run finished"
        );

        Ok(summary)
    }

    /// Attempt a task until it succeeds, fails fatally, runs out of
    /// attempts or the run is cancelled during a backoff wait.
    async fn upload_with_retry(&self, task: &UploadTask, reporter: &mut dyn ProgressReporter) -> UploadResult {
        let max_attempts = self.config.backoff.max_attempts();
        let mut attempt_number = 0;

        loop {
            attempt_number += 1;

            let outcome = {
                let mut on_chunk = |delta: u64| reporter.on_file_bytes(task, delta);
                match self.client.upload(task, &self.config.target, &mut on_chunk).await {
                    Ok(()) => AttemptOutcome::Success,
                    Err(failure) if failure.is_retryable() => AttemptOutcome::RetryableFailure(failure.reason),
                    Err(failure) => AttemptOutcome::FatalFailure(failure.reason),
                }
            };

            let attempt = UploadAttempt {
                task,
                attempt_number,
                outcome,
            };
            debug!(
                file = %attempt.task.relative_name,
                attempt = attempt.attempt_number,
                outcome = ?attempt.outcome,
                "upload attempt finished"
            );

            let final_outcome = match attempt.outcome {
                AttemptOutcome::Success => FinalOutcome::Success,
                AttemptOutcome::FatalFailure(reason) => {
                    warn!(file = %task.relative_name, %reason, "upload failed, not retrying");
                    FinalOutcome::Failed(reason)
                }
                AttemptOutcome::RetryableFailure(reason) if attempt_number >= max_attempts => {
                    warn!(
                        file = %task.relative_name,
                        attempts = attempt_number,
                        %reason,
                        "upload failed, attempts exhausted"
                    );
                    FinalOutcome::Failed(format!("{} (after {} attempts)", reason, attempt_number))
                }
                AttemptOutcome::RetryableFailure(reason) => {
                    let delay = self.config.backoff.next_delay(attempt_number);
                    reporter.on_retry(task, attempt_number, max_attempts, delay, &reason);

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => continue,
                        _ = self.cancel.cancelled() => {
                            warn!(file = %task.relative_name, %reason, "cancelled while waiting to retry");
                            FinalOutcome::Failed(format!("{} (last error: {})", CANCELLED_REASON, reason))
                        }
                    }
                }
            };

            return UploadResult {
                task: task.clone(),
                final_outcome,
                attempts_made: attempt_number,
            };
        }
    }
}
