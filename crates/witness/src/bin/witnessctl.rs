// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! `witnessctl` administers the witness database: registering logs and
//! managing their verifier keys.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use witness::WitnessDb;

/// Administrative CLI for the witness database.
#[derive(Parser)]
#[command(name = "witnessctl", version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new log at size zero.
    AddLog {
        #[arg(long, default_value = "witness.db")]
        db: PathBuf,
        /// Origin line of the log.
        #[arg(long)]
        origin: String,
    },
    /// Add a verifier key for a registered log.
    AddKey {
        #[arg(long, default_value = "witness.db")]
        db: PathBuf,
        /// Origin line of the log.
        #[arg(long)]
        origin: String,
        /// Encoded verifier key (<name>+<id>+<base64 keydata>).
        #[arg(long)]
        key: String,
    },
    /// Remove a verifier key from a log.
    DelKey {
        #[arg(long, default_value = "witness.db")]
        db: PathBuf,
        /// Origin line of the log.
        #[arg(long)]
        origin: String,
        /// Encoded verifier key to remove.
        #[arg(long)]
        key: String,
    },
    /// Print every registered log as one JSON object per line.
    ListLogs {
        #[arg(long, default_value = "witness.db")]
        db: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    // Route the library crates' `log` records into tracing. Logs go to
    // stderr; stdout is reserved for command output.
    tracing_log::LogTracer::init().context("installing log bridge")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("installing tracing subscriber")?;

    match Cli::parse().command {
        Commands::AddLog { db, origin } => {
            open(&db)?
                .add_log(&origin)
                .with_context(|| format!("adding log {origin}"))?;
            println!("added log {origin}");
        }
        Commands::AddKey { db, origin, key } => {
            open(&db)?
                .add_key(&origin, &key)
                .with_context(|| format!("adding key to log {origin}"))?;
            println!("added key to log {origin}");
        }
        Commands::DelKey { db, origin, key } => {
            let deleted = open(&db)?
                .del_key(&origin, &key)
                .with_context(|| format!("deleting key from log {origin}"))?;
            anyhow::ensure!(deleted, "no matching key for log {origin}");
            println!("deleted key from log {origin}");
        }
        Commands::ListLogs { db } => {
            for log in open(&db)?.list_logs().context("listing logs")? {
                println!("{}", serde_json::to_string(&log)?);
            }
        }
    }
    Ok(())
}

fn open(db: &PathBuf) -> anyhow::Result<WitnessDb> {
    WitnessDb::open(db).context("opening database")
}
