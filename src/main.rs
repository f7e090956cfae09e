mod app;
mod cache;
mod commands;
mod config;
mod envelope;
mod logging;
mod services;
mod upstream;

use clap::Parser;
use color_eyre::Result;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "orbitcache")]
#[command(about = "Cached aggregation of ISS telemetry, astronomy events and JWST imagery")]
#[command(version)]
struct Args {
  /// Path to config file (default: $XDG_CONFIG_HOME/orbitcache/config.yaml)
  #[arg(short, long, global = true)]
  config: Option<PathBuf>,

  #[command(subcommand)]
  command: commands::Command,
}

#[tokio::main]
async fn main() -> Result<()> {
  color_eyre::install()?;

  let args = Args::parse();

  // Load configuration
  let config = config::Config::load(args.config.as_deref())?;

  // Keep the guard alive so buffered log lines reach the file
  let _guard = logging::init_logging(&config.logging.dir, "orbitcache", &config.logging.level)?;

  let app = app::App::new(config)?;
  let output = app.run(args.command).await?;
  println!("{}", serde_json::to_string_pretty(&output)?);

  Ok(())
}
