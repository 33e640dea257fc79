// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
mod cli;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing::info;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use cli::{Cli, Commands};
use foreman_core::{DefaultProviderFactory, Engine};
use foreman_events::{EventBus, EventRouter};
use foreman_store::{SecretCipher, Store};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match &cli.command {
        Commands::ShowConfig => {
            let config = foreman_config::load(cli.config.as_deref())?;
            println!("{}", serde_yaml::to_string(&config).unwrap_or_default());
            Ok(())
        }
        Commands::Serve { db, workers } => {
            let mut config = foreman_config::load(cli.config.as_deref())?;
            if let Some(db) = db {
                config.database = Some(db.display().to_string());
            }
            if let Some(workers) = workers {
                config.reconciler.workers = *workers;
            }
            serve(config).await
        }
    }
}

async fn serve(config: foreman_config::Config) -> anyhow::Result<()> {
    let db_path = PathBuf::from(config.database_path());
    let store = Store::open(&db_path)
        .with_context(|| format!("opening database at {}", db_path.display()))?;

    let cipher = match std::env::var(&config.secrets.key_env) {
        Ok(hex_key) => SecretCipher::from_hex(&hex_key)
            .with_context(|| format!("parsing {}", config.secrets.key_env))?,
        // No key configured: provider credentials cannot be decrypted, but
        // the engine still runs (useful for inspection and dry setups).
        Err(_) => {
            tracing::warn!(
                env = %config.secrets.key_env,
                "secret key env not set; generated an ephemeral key"
            );
            SecretCipher::generate()
        }
    };

    let bus = Arc::new(EventBus::new(config.reconciler.event_queue_capacity, 4));
    let router = EventRouter::new();
    let factory = Arc::new(DefaultProviderFactory { cipher });
    let engine = Engine::new(store, Arc::clone(&bus), router.clone(), config, factory);
    engine.start();

    info!(db = %db_path.display(), "foreman serving; ctrl-c to stop");
    tokio::signal::ctrl_c().await.context("waiting for ctrl-c")?;
    info!("shutdown requested; draining work queue");

    engine.shutdown().await;
    router.close();
    bus.close();
    Ok(())
}

fn init_logging(verbose: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { "debug" } else { "info" })
    });
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();
}
