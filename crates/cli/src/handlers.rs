//! Command handlers for the zenodo-upload CLI

use anyhow::{Context, Result};
use console::style;
use dialoguer::Password;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tabled::{Table, Tabled};
use tokio_util::sync::CancellationToken;
use zenodo_upload_core::{
    validate_config, ConfigFile, Error, FileEnumerator, LogReporter, ProgressReporter, RunConfig,
    RunSummary, TerminalReporter, UploadOrchestrator, UploadTask, ZenodoClient,
};

/// Parsed command line, detached from clap
#[derive(Debug)]
pub struct UploadArgs {
    pub directory: PathBuf,
    pub access_token: Option<String>,
    pub record_id: String,
    pub dry_run: bool,
    pub max_attempts: Option<u32>,
    pub chunk_size_kb: Option<usize>,
    pub quiet: bool,
}

/// Handle the upload command
pub async fn handle_upload(args: UploadArgs, mut config: ConfigFile) -> Result<ExitCode> {
    if let Some(max_attempts) = args.max_attempts {
        config.retry.max_attempts = max_attempts;
    }
    if let Some(chunk_size_kb) = args.chunk_size_kb {
        config.upload.chunk_size_kb = chunk_size_kb;
    }
    validate_config(&config)?;

    if args.dry_run {
        println!("Dry run without actually uploading...");
    } else {
        println!("Uploading files to Zenodo...");
    }

    let enumerator = FileEnumerator::new(&args.directory)?;
    let root = enumerator.root().to_path_buf();
    let tasks = enumerator.collect::<zenodo_upload_core::Result<Vec<UploadTask>>>()?;

    if tasks.is_empty() {
        println!("No files found in the specified directory.");
        return Ok(ExitCode::SUCCESS);
    }

    println!("Found {} files to upload:", tasks.len());
    for task in &tasks {
        println!("  - {} ({})", display_relative(&task.path, &root), format_bytes(task.size));
    }

    let access_token = match args.access_token {
        Some(token) => token,
        None => prompt_access_token()?,
    };

    let run_config = RunConfig::new(&config, args.record_id, access_token, args.dry_run)?;
    let client = ZenodoClient::from_config(&config.upload)?;

    let cancel = CancellationToken::new();
    spawn_interrupt_handler(cancel.clone());

    let orchestrator = UploadOrchestrator::new(client, run_config).with_cancellation(cancel);

    let mut reporter: Box<dyn ProgressReporter> = if args.quiet {
        Box::new(LogReporter::default())
    } else {
        Box::new(TerminalReporter::new())
    };

    let summary = orchestrator
        .run(tasks.into_iter().map(Ok), reporter.as_mut())
        .await?;

    print_summary(&summary, args.dry_run);

    if summary.is_success() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

/// Ask for the token without echoing it
fn prompt_access_token() -> Result<String> {
    if !console::user_attended() {
        return Err(Error::MissingToken).context("Pass --access-token or set ZENODO_ACCESS_TOKEN");
    }

    let token = Password::new()
        .with_prompt("Zenodo access token")
        .interact()?;

    Ok(token)
}

/// Cancel the run on Ctrl-C; a second Ctrl-C falls back to the default handler
fn spawn_interrupt_handler(cancel: CancellationToken) {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, finishing the current step");
            eprintln!("Interrupted, stopping after the current step...");
            cancel.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
}

fn print_summary(summary: &RunSummary, dry_run: bool) {
    println!();

    if summary.cancelled {
        println!(
            "{} Upload interrupted: {} uploaded, {} failed, {} not attempted",
            style("⚠️").yellow(),
            summary.succeeded,
            summary.failed,
            summary.skipped
        );
    } else if dry_run {
        println!("Dry run completed. No files were actually uploaded.");
    } else if summary.failed == 0 {
        println!("{} Upload completed successfully!", style("✅").green());
    } else {
        println!(
            "{} {} of {} files failed to upload",
            style("❌").red(),
            summary.failed,
            summary.total_files
        );
    }

    if summary.failed > 0 {
        #[derive(Tabled)]
        struct FailureRow {
            file: String,
            attempts: u32,
            reason: String,
        }

        let rows: Vec<FailureRow> = summary
            .failures()
            .map(|r| FailureRow {
                file: r.task.relative_name.clone(),
                attempts: r.attempts_made,
                reason: r.final_outcome.to_string(),
            })
            .collect();

        eprintln!();
        eprintln!("{}", Table::new(rows));
    }
}

/// Path relative to the walk root, for listings
fn display_relative(path: &Path, root: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

/// Format bytes to human-readable size
fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_index = 0;

    while size >= 1024.0 && unit_index < UNITS.len() - 1 {
        size /= 1024.0;
        unit_index += 1;
    }

    if unit_index == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", size, UNITS[unit_index])
    }
}
