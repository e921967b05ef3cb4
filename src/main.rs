//! layered-config command-line tool
//!
//! Resolves configurations against a schema document, lists the command-line
//! keys a schema accepts and prints schemas.

use anyhow::Result;
use clap::Parser;
use layered_config::cli::{self, Cli};
use std::fs::OpenOptions;
use tracing_subscriber::{EnvFilter, FmtSubscriber};

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let output = cli::run(&cli.command)?;
    if output.ends_with('\n') {
        print!("{}", output);
    } else {
        println!("{}", output);
    }
    Ok(())
}

/// Install the global subscriber selected by `--log`. `RUST_LOG` takes
/// precedence over `--verbose` when set.
fn init_logging(cli: &Cli) -> Result<()> {
    let filter = || {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(if cli.verbose { "debug" } else { "info" }))
    };
    match cli.log.as_str() {
        "0" | "off" => {
            // No logging
        }
        "1" | "stdout" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stdout)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        "2" | "stderr" => {
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(std::io::stderr)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
        filename => {
            // Log to file (append mode)
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(filename)?;
            let subscriber = FmtSubscriber::builder()
                .with_env_filter(filter())
                .with_writer(file)
                .with_ansi(false)
                .finish();
            tracing::subscriber::set_global_default(subscriber)?;
        }
    }
    Ok(())
}
