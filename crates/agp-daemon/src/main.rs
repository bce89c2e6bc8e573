// SPDX-License-Identifier: MIT OR Apache-2.0
#![deny(unsafe_code)]
use agp_config::ServerConfig;
use agp_daemon::{build_app, build_state, spawn_worker};
use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "agp-daemon", version, about = "Agent Gateway Protocol daemon")]
struct Args {
    /// Bind address, overrides `AGP_BIND_ADDRESS`.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = ServerConfig::from_env().context("load configuration")?;
    if let Some(bind) = args.bind {
        config.bind_address = bind;
    }

    let filter = EnvFilter::new(&config.log_level);
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if config.json_logs {
        subscriber.json().init();
    } else {
        subscriber.init();
    }

    let state = build_state(config).await.context("build daemon state")?;
    let bind_address = state.config.bind_address.clone();
    let _worker = spawn_worker(&state);

    let app = build_app(state);

    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("bind {bind_address}"))?;
    info!(bind = %bind_address, "agp-daemon listening");

    axum::serve(listener, app).await.context("serve")
}
