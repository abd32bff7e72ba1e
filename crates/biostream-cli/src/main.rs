//! biostream - pull JPEG frames off a biometric capture device

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use biostream_core::{Modality, StreamConfig};

mod commands;
mod output;

#[derive(Debug, Parser)]
#[command(name = "biostream", version, about)]
struct Cli {
    /// Config file (defaults to the user config dir)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Debug logging when RUST_LOG is unset
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Stream live frames from the device configured for a modality
    Stream {
        #[arg(short, long, value_parser = parse_modality)]
        modality: Modality,

        /// Directory frames are written to
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        /// Stop after this many frames
        #[arg(long, value_name = "N")]
        max_frames: Option<u64>,
    },
    /// Split a recorded MJPEG stream into JPEG files
    Extract {
        #[arg(short, long, value_name = "FILE")]
        input: PathBuf,

        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,

        #[arg(long, value_name = "N")]
        max_frames: Option<u64>,
    },
}

fn parse_modality(value: &str) -> std::result::Result<Modality, String> {
    value.parse()
}

fn init_tracing(verbose: bool) {
    let fallback = if verbose {
        "biostream=debug,biostream_core=debug"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(fallback));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let config = StreamConfig::load_or_default(cli.config.as_deref())?;

    match cli.command {
        Command::Stream {
            modality,
            output,
            max_frames,
        } => commands::stream(config, modality, &output, max_frames).await,
        Command::Extract {
            input,
            output,
            max_frames,
        } => commands::extract(&config, &input, &output, max_frames).await,
    }
}
