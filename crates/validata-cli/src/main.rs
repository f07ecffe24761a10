use std::path::PathBuf;
use std::time::Duration;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::filter::LevelFilter;
use validata_core::IDENTITY_SERVICES_PATH;

mod commands;
mod shutdown;

#[derive(Parser)]
#[command(name = "validata", version)]
#[command(about = "Generates Apple identity validation data by calling into identityservicesd")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Periodically generate validation data and submit it to a server
    Run {
        /// URL to submit validation data to
        #[arg(long)]
        url: String,
        /// Bearer token to include when submitting
        #[arg(long)]
        token: Option<String>,
        /// Seconds between submissions
        #[arg(long, default_value_t = 300)]
        interval: u64,
        /// Path to the identityservicesd binary
        #[arg(long, default_value = IDENTITY_SERVICES_PATH)]
        binary: PathBuf,
    },
    /// Generate one validation data payload and print it as base64
    Once {
        /// Path to the identityservicesd binary
        #[arg(long, default_value = IDENTITY_SERVICES_PATH)]
        binary: PathBuf,
    },
    /// Inspect a binary: architectures, signature matches, derived offsets
    Offsets {
        /// Path to a universal or thin Mach-O binary
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // `once` owns stdout for the payload; keep the log channel quiet there.
    let default_level = match cli.command {
        Command::Once { .. } => LevelFilter::WARN,
        _ => LevelFilter::INFO,
    };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Command::Run {
            url,
            token,
            interval,
            binary,
        } => commands::run::run(&url, token, Duration::from_secs(interval), &binary),
        Command::Once { binary } => commands::run::once(&binary),
        Command::Offsets { path } => commands::offsets::run(&path),
    }
}
