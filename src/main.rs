//! AutoPkg CLI: recipe-driven software packaging automation.

use clap::Parser;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(
    name = "autopkg",
    version,
    about = "Recipe-driven automation runner: resolve recipe chains, run processor pipelines"
)]
struct Cli {
    /// Verbose logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Preferences file (default: ./autopkg.toml if present)
    #[arg(long, global = true)]
    prefs: Option<PathBuf>,

    #[command(subcommand)]
    command: autopkg::cli::Commands,
}

fn main() {
    let cli = Cli::parse();

    let log_level = match cli.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(cli.verbose >= 2)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = autopkg::cli::dispatch(cli.command, cli.prefs.as_deref()) {
        eprintln!("error: {}", e);
        std::process::exit(e.exit_code());
    }
}
