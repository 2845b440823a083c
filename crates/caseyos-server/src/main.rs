//! CaseyOS gateway binary: config, database, background runtime, HTTP.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;

use caseyos_core::config::Config;
use caseyos_core::connector::ConnectorRegistry;
use caseyos_core::runtime;
use caseyos_core::storage::{self, auto_approval};
use caseyos_core::workflow::orchestrate::WorkflowEnv;
use caseyos_server::state::AppState;

/// CaseyOS: autonomous outbound sales command center.
#[derive(Parser, Debug)]
#[command(name = "caseyos-server", version)]
struct Args {
    /// Path to the TOML config file. Falls back to env-only configuration
    /// when the file does not exist.
    #[arg(long, default_value = "caseyos.toml")]
    config: String,

    /// Override the bind host.
    #[arg(long)]
    host: Option<String>,

    /// Override the bind port.
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,caseyos_core=info,caseyos_server=info".into()),
        )
        .init();

    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        Config::load(&args.config).context("loading config file")?
    } else {
        tracing::info!(path = %args.config, "No config file, using env-only configuration");
        Config::from_env().context("building config from environment")?
    };
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    let db = storage::init_db(&config.database.path)
        .await
        .context("initializing database")?;
    auto_approval::seed_default_rules(&db)
        .await
        .context("seeding auto-approval rules")?;

    // The sandbox registry is the draft-only deployment; provider-backed
    // registries are wired in by the hosting environment.
    let registry = ConnectorRegistry::sandbox();

    let env = WorkflowEnv {
        db: db.clone(),
        registry: registry.clone(),
        config: config.clone(),
        memory: None,
    };

    let fleet = runtime::start(&env);

    let state = Arc::new(AppState {
        db,
        config: config.clone(),
        registry,
    });
    let router = caseyos_server::build_router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    tracing::info!(
        addr = %addr,
        draft_only = config.sending.mode_draft_only,
        real_sends = config.sending.allow_real_sends,
        "CaseyOS gateway listening"
    );

    let cancel = fleet.cancel_token();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                cancel.cancelled().await;
            })
            .await
    });

    // Blocks until Ctrl+C / SIGTERM, then cancels the shared token, which
    // stops the workers, the monitor, and the HTTP server together.
    fleet.run_until_shutdown().await;
    server.await.context("joining server task")?.context("server error")?;

    Ok(())
}
