#![cfg_attr(not(target_os = "macos"), allow(dead_code))]

mod args;
mod config;
mod meter;
mod project;
mod stop;

#[cfg(target_os = "macos")]
mod devices;
#[cfg(target_os = "macos")]
mod record;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use args::RecordArgs;

#[derive(Parser)]
#[command(version, about = "Record the screen, camera and audio on macOS")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Config file to read recording defaults from
    #[arg(long, global = true)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start a recording and finish the project when it stops
    Record(RecordArgs),
    /// List displays, cameras and microphones
    Devices,
    /// Print the config location and the effective defaults
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "reel=debug" } else { "reel=info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Record(args) => record(args, cli.config).await,
        Commands::Devices => list_devices(),
        Commands::Config => {
            let path = cli.config.clone().or_else(config::default_path);
            let options = config::load(cli.config.as_deref())?;

            if let Some(path) = path {
                eprintln!("{}", path.display());
            }
            println!(
                "{}",
                serde_json::to_string_pretty(&options).context("Serializing config")?
            );
            Ok(())
        }
    }
}

#[cfg(target_os = "macos")]
async fn record(args: RecordArgs, config: Option<PathBuf>) -> anyhow::Result<()> {
    record::run(args, config).await
}

#[cfg(not(target_os = "macos"))]
async fn record(_args: RecordArgs, _config: Option<PathBuf>) -> anyhow::Result<()> {
    anyhow::bail!("Recording is only supported on macOS")
}

#[cfg(target_os = "macos")]
fn list_devices() -> anyhow::Result<()> {
    devices::list()
}

#[cfg(not(target_os = "macos"))]
fn list_devices() -> anyhow::Result<()> {
    anyhow::bail!("Device listing is only supported on macOS")
}
