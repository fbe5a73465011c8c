//! Crash-resilient batch processing.
//!
//! `batchkeeper start` supervises a crash-prone host process and relaunches
//! it until every item in the source folder is done or has exhausted its
//! crash budget. Progress lives in a JSON ledger next to the config.

use std::path::PathBuf;

use anyhow::Result;
use batchkeeper::exit_codes;
use batchkeeper::host::run_host;
use batchkeeper::io::config::DEFAULT_CONFIG_FILE;
use batchkeeper::io::init::{InitOptions, init_config};
use batchkeeper::logging;
use batchkeeper::start::{start_batch, stop_batch};
use batchkeeper::status::{collect_status, render_text};
use chrono::Utc;
use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "batchkeeper",
    version,
    about = "Crash-resilient batch orchestration"
)]
struct Cli {
    /// Batch config file; relative paths inside it resolve against its directory.
    #[arg(long, global = true, default_value = DEFAULT_CONFIG_FILE)]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Write a default config file.
    Init {
        /// Overwrite an existing config.
        #[arg(short, long)]
        force: bool,
    },
    /// Create the sentinel and supervise the host until the batch is finished.
    Start,
    /// Remove the sentinel so the watchdog stops after the current item.
    Stop,
    /// Print per-status counts, crash totals and failed items.
    Status {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },
    /// Process the batch in this process (launched by `start`).
    Host,
}

fn main() {
    logging::init();
    if let Err(err) = run() {
        eprintln!("{err:#}");
        std::process::exit(exit_codes::for_error(&err));
    }
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Init { force } => {
            let paths = init_config(&cli.config, &InitOptions { force })?;
            println!("wrote {}", paths.config_path.display());
        }
        Command::Start => {
            let outcome = start_batch(&cli.config)?;
            println!("launches: {}, stop: {:?}", outcome.launches, outcome.stop);
        }
        Command::Stop => {
            if stop_batch(&cli.config)? {
                println!("stop requested");
            } else {
                println!("no sentinel present; nothing to stop");
            }
        }
        Command::Status { json } => {
            let report = collect_status(&cli.config, Utc::now())?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                print!("{}", render_text(&report));
            }
        }
        Command::Host => {
            run_host(&cli.config)?;
        }
    }
    Ok(())
}
