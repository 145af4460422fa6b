//! Camcord CLI: drive the capture engine without a phone.
//!
//! Usage:
//!   camcord simulate [OPTIONS]   Record against the simulated camera
//!   camcord check                Check configuration and the MP4 writer

use std::path::PathBuf;

use camcord_common::config::{AppConfig, LoggingConfig};
use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "camcord",
    about = "Camera capture and hardware encode pipeline",
    version,
    author
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run open, record and stop against the simulated backend
    Simulate {
        /// Encoded frames to produce while recording
        #[arg(long, default_value = "30")]
        frames: usize,

        /// Requested preview width
        #[arg(long, default_value = "1440")]
        width: u32,

        /// Requested preview height
        #[arg(long, default_value = "1080")]
        height: u32,

        /// Container path (defaults to the configured output directory)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check configuration and MP4 writer capabilities
    Check {
        /// Write the effective configuration back to the config file
        #[arg(long)]
        write_config: bool,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = AppConfig::load();

    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.clone()
    };
    camcord_common::logging::init_logging(&LoggingConfig {
        level,
        json: cli.json_logs || config.logging.json,
        file: config.logging.file.clone(),
    });

    match cli.command {
        Commands::Simulate {
            frames,
            width,
            height,
            output,
        } => commands::simulate::run(&config, frames, width, height, output).await,
        Commands::Check { write_config } => commands::check::run(&config, write_config),
    }
}
