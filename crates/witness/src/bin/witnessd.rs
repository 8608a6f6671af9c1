// Copyright (c) 2025 Cloudflare, Inc.
// Licensed under the BSD-3-Clause license found in the LICENSE file or at https://opensource.org/licenses/BSD-3-Clause

//! `witnessd` serves the cosigning witness over HTTP.

use anyhow::Context;
use clap::Parser;
use signed_note::KeyName;
use std::path::PathBuf;
use std::sync::Arc;
use tlog_checkpoint::{CosignatureV1Signer, SystemClock};
use tracing_subscriber::EnvFilter;
use witness::signer::{check_fingerprint, fingerprint, load_signing_key};
use witness::{http, Witness, WitnessDb};

/// Transparency log cosigning witness.
#[derive(Parser)]
#[command(name = "witnessd", version)]
struct Args {
    /// URL-like name (e.g. example.com/witness) of this witness.
    #[arg(long, env = "WITNESS_NAME")]
    name: String,

    /// Path to the SQLite database.
    #[arg(long, default_value = "witness.db", env = "WITNESS_DB")]
    db: PathBuf,

    /// Path to a file holding the hex-encoded 32-byte Ed25519 seed.
    #[arg(long, env = "WITNESS_KEY")]
    key: PathBuf,

    /// Expected fingerprint of the witness public key, either
    /// SHA256:<base64> or the bare hex digest.
    #[arg(long)]
    fingerprint: Option<String>,

    /// Address to listen on for HTTP requests.
    #[arg(long, default_value = "localhost:7380")]
    listen: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Route the library crates' `log` records into tracing, then install
    // the subscriber; RUST_LOG filters both.
    tracing_log::LogTracer::init().context("installing log bridge")?;
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("installing tracing subscriber")?;
    let args = Args::parse();

    let key = load_signing_key(&args.key).context("loading witness key")?;
    match &args.fingerprint {
        Some(expected) => check_fingerprint(&key.verifying_key(), expected)
            .context("verifying witness key fingerprint")?,
        None => tracing::warn!(
            "no --fingerprint configured; witness key is {}",
            fingerprint(&key.verifying_key())
        ),
    }

    let name = KeyName::new(args.name).context("invalid witness name")?;
    let db = Arc::new(WitnessDb::open(&args.db).context("opening database")?);
    let signer = CosignatureV1Signer::new(name, Box::new(key), Box::new(SystemClock));
    let witness = Arc::new(Witness::new(db, signer));
    tracing::info!("verifier key: {}", witness.verifier_key());

    let listener = tokio::net::TcpListener::bind(&args.listen)
        .await
        .with_context(|| format!("binding {}", args.listen))?;
    tracing::info!("listening on {}", args.listen);
    axum::serve(listener, http::router(witness))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    tracing::info!("shutting down");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        tracing::error!("listening for shutdown signal: {err}");
    }
}
