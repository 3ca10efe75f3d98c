use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::watch;
use tracing::info;

use tarsy_audit::AuditStore;
use tarsy_core::timestamp::now_us;
use tarsy_mcp::McpServerRegistry;
use tarsyd::registry::{builtin_agents, builtin_chains, builtin_mcp_servers, AgentRegistry, ChainRegistry};
use tarsyd::{config, shutdown, telemetry};

/// Tarsy daemon — chain-driven alert investigation with auditable agents.
#[derive(Parser, Debug)]
#[command(name = "tarsyd", version, about)]
struct Cli {
    /// User chains file (YAML); overrides AGENT_CONFIG_PATH.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Increase log verbosity (debug level).
    #[arg(short, long)]
    verbose: bool,

    /// Validate configuration and exit.
    #[arg(long)]
    validate: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // -----------------------------------------------------------------------
    // 1. Environment settings and the chains file
    // -----------------------------------------------------------------------
    let mut settings = config::settings_from_env().context("loading settings")?;
    if let Some(path) = cli.config {
        settings.chains_config_path = Some(path);
    }

    let chains_file = match &settings.chains_config_path {
        Some(path) => config::load_chains_file(path).context("loading chains file")?,
        None => Default::default(),
    };

    // -----------------------------------------------------------------------
    // 2. Registries, with strict uniqueness and reference checks
    // -----------------------------------------------------------------------
    let mut mcp_servers = builtin_mcp_servers();
    mcp_servers.extend(chains_file.to_mcp_server_configs());
    let mcp_registry = Arc::new(McpServerRegistry::new(mcp_servers));

    let agents = Arc::new(
        AgentRegistry::build(builtin_agents(), chains_file.to_agent_configs())
            .context("building agent registry")?,
    );
    let chains = Arc::new(
        ChainRegistry::build(
            builtin_chains(),
            chains_file.to_chain_definitions(),
            &agents,
            &mcp_registry,
        )
        .context("building chain registry")?,
    );

    if cli.validate {
        println!(
            "configuration is valid: {} chains, {} agents, {} MCP servers",
            chains.len(),
            agents.len(),
            mcp_registry.len()
        );
        return Ok(());
    }

    // -----------------------------------------------------------------------
    // 3. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cli.verbose);
    info!(
        chains = chains.len(),
        agents = agents.len(),
        mcp_servers = mcp_registry.len(),
        alert_types = ?chains.alert_types(),
        "tarsyd starting"
    );

    // -----------------------------------------------------------------------
    // 4. Audit store: open, schema-check, retention sweep
    // -----------------------------------------------------------------------
    let store = AuditStore::open(Path::new(&settings.history_db_url))
        .await
        .context("opening audit store")?;
    let horizon_us = now_us() - i64::from(settings.history_retention_days) * 86_400_000_000;
    let purged = store
        .purge_sessions_older_than(horizon_us)
        .await
        .context("retention sweep")?;
    if purged > 0 {
        info!(purged, retention_days = settings.history_retention_days, "purged expired sessions");
    }

    // -----------------------------------------------------------------------
    // 5. The edge mounts here: it wires AlertService with its LLM provider
    //    adapters, MCP transport, and runbook fetcher, registers the
    //    audit/dashboard hooks on the bus, and serves the
    //    submission/query/progress APIs. This binary stands the core up and
    //    waits for shutdown.
    // -----------------------------------------------------------------------
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    tokio::spawn(shutdown::signal_listener(shutdown_tx));

    info!("core ready; waiting for shutdown signal");
    while !*shutdown_rx.borrow() {
        if shutdown_rx.changed().await.is_err() {
            break;
        }
    }

    info!("tarsyd stopped");
    Ok(())
}
