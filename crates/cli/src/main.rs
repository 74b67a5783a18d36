use anyhow::Result;
use clap::Parser;
use color_eyre::config::HookBuilder;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;
use zenodo_upload_core::{load_config, load_config_from};

mod handlers;

/// zenodo-upload - Upload files to Zenodo with retrying and progress bars
#[derive(Parser, Debug)]
#[command(name = "zenodo-upload")]
#[command(version)]
#[command(about = "Upload every file of a directory to a Zenodo deposit", long_about = None)]
struct Cli {
    /// Directory whose files are uploaded (searched recursively)
    #[arg(default_value = ".")]
    directory: PathBuf,

    /// Zenodo access token (prompted if absent)
    #[arg(short = 'p', long, env = "ZENODO_ACCESS_TOKEN", hide_env_values = true)]
    access_token: Option<String>,

    /// Zenodo record ID to upload files to
    #[arg(long = "record-id", visible_aliases = ["deposit-id", "to"])]
    record_id: String,

    /// Perform a dry run against the sandbox without uploading
    #[arg(long)]
    dry_run: bool,

    /// Attempts per file before giving up (overrides the config file)
    #[arg(long)]
    max_attempts: Option<u32>,

    /// Upload chunk size in KiB (overrides the config file)
    #[arg(long, value_name = "KIB")]
    chunk_size: Option<usize>,

    /// Log progress instead of drawing progress bars
    #[arg(short, long)]
    quiet: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Configuration file (default: ~/.config/zenodo-upload/config.toml)
    #[arg(long, value_name = "PATH")]
    config: Option<PathBuf>,
}

/// Install the tracing subscriber; `RUST_LOG` wins over flags and config
fn init_tracing(verbose: u8, configured_level: &str) {
    let level = match verbose {
        0 => configured_level,
        1 => "info",
        2 => "debug",
        _ => "trace",
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Setup error handling
    if let Err(e) = HookBuilder::default().install() {
        eprintln!("Warning: Failed to install error handler: {}", e);
    }

    // Parse CLI arguments
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };

    init_tracing(cli.verbose, &config.logging.level);

    let args = handlers::UploadArgs {
        directory: cli.directory,
        access_token: cli.access_token,
        record_id: cli.record_id,
        dry_run: cli.dry_run,
        max_attempts: cli.max_attempts,
        chunk_size_kb: cli.chunk_size,
        quiet: cli.quiet,
    };

    handlers::handle_upload(args, config).await
}
