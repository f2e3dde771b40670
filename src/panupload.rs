use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use pan_upload::pan::{UploadRequest, UploadStatus};
use pan_upload::{Config, Uploader, handle_upload};

#[derive(Parser, Debug)]
#[command(
    name = "panupload",
    version = env!("CARGO_PKG_VERSION"),
    author = "Tyr Chen <tyr.chen@gmail.com>",
    about = "Upload a file to Baidu Pan, skipping the transfer when the content already exists",
    long_about = "Fingerprints a local file and first tries a rapid (dedup) upload. If the service does not \
                  already hold identical content, the file is sent in sequential chunks and assembled remotely. \
                  Configure via .env file with a Baidu access token.",
    after_help = "Examples:\n  \
                  panupload ./video.mp4                          # Upload into PAN_REMOTE_DIR\n  \
                  panupload ./video.mp4 -d /apps/archive          # Upload into another directory\n  \
                  panupload ./video.mp4 --identifier abc --json   # Print a JSON reply for scripting\n\n\
                  Configuration (.env):\n  \
                  BAIDU_ACCESS_TOKEN=121.xxxx\n  \
                  PAN_REMOTE_DIR=/apps/yt-download\n  \
                  PAN_CHUNK_SIZE_MB=4"
)]
struct Cli {
    /// File to upload
    path: PathBuf,

    /// Remote directory (overrides PAN_REMOTE_DIR for this upload)
    #[arg(long, short = 'd')]
    remote_dir: Option<String>,

    /// Identifier echoed back in the reply (defaults to the file stem)
    #[arg(long)]
    identifier: Option<String>,

    /// Print the reply as JSON instead of styled text
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file early to get LOG_LEVEL
    dotenv::dotenv().ok();

    let log_level = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "info".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .or_else(|_| tracing_subscriber::EnvFilter::try_new(&log_level))
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .with_level(true)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    info!("Pan Upload Tool v{}", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(dir) = cli.remote_dir.as_deref() {
        config = config.with_remote_dir(dir)?;
    }

    let uploader = Uploader::new(config.access_token.clone(), config.upload_settings());

    let identifier = match cli.identifier {
        Some(id) => id,
        None => cli
            .path
            .file_stem()
            .context("Failed to get file stem")?
            .to_string_lossy()
            .to_string(),
    };

    let cancel = CancellationToken::new();
    let ctrl_c_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, cancelling upload");
            ctrl_c_token.cancel();
        }
    });

    if !cli.json {
        println!(
            "{}",
            style(format!(
                "📦 Target: {}",
                config.remote_dir.trim_end_matches('/')
            ))
            .cyan()
            .bold()
        );
    }

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{bar:40.cyan/blue}] {pos:>3}% {msg}")
            .context("Invalid progress bar template")?
            .progress_chars("#>-"),
    );
    pb.set_message(cli.path.display().to_string());

    let progress_bar = pb.clone();
    let mut on_progress = move |percent: u8| progress_bar.set_position(percent as u64);

    let reply = handle_upload(
        &uploader,
        UploadRequest {
            identifier,
            local_path: cli.path.clone(),
        },
        Some(&mut on_progress),
        &cancel,
    )
    .await;

    pb.finish_and_clear();

    if cli.json {
        println!("{}", serde_json::to_string(&reply)?);
    } else {
        match reply.status {
            UploadStatus::Success => {
                println!(
                    "{} {} ({})",
                    style("✓").green(),
                    style(reply.remote_path.as_deref().unwrap_or_default()).green(),
                    style(&reply.message).dim()
                );
                if let Some(fs_id) = &reply.remote_file_id {
                    println!("  {} {}", style("fs_id").blue(), style(fs_id).dim());
                }
            }
            UploadStatus::Error => {
                println!(
                    "{} {} - {}",
                    style("✗").red(),
                    style(cli.path.display()).red(),
                    style(&reply.message).red()
                );
                if !reply.suggestions.is_empty() {
                    println!("\n{}", style("Possible solutions:").yellow());
                    for (i, hint) in reply.suggestions.iter().enumerate() {
                        println!("  {}. {}", i + 1, hint);
                    }
                }
            }
        }
    }

    if reply.status == UploadStatus::Error {
        std::process::exit(1);
    }

    Ok(())
}
