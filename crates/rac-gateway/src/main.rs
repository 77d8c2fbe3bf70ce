//! # rac-gateway
//!
//! Gateway binary: loads settings and the catalog, then serves browser
//! clients and worker instances until Ctrl-C.

#![deny(unsafe_code)]

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use rac_broker::{Catalog, InMemoryDirectory, TokenStore};
use rac_logging::LogFormat;
use rac_server::config::session_config;
use rac_server::{RacServer, ServerConfig};
use rac_settings::GatewaySettings;
use tracing::{info, warn};

/// RAC rendezvous-and-relay gateway.
#[derive(Parser, Debug)]
#[command(name = "rac-gateway", about = "RAC rendezvous-and-relay gateway")]
struct Cli {
    /// Settings file (default `~/.rac/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind (overrides settings, 0 for auto-assign).
    #[arg(long)]
    port: Option<u16>,

    /// Catalog of providers, endpoints, outposts and tokens.
    #[arg(long)]
    catalog: Option<PathBuf>,

    /// Log filter, e.g. `info` or `rac_broker=debug,info`.
    #[arg(long)]
    log_level: Option<String>,

    /// Log output format: `compact` or `json`.
    #[arg(long, value_parser = parse_log_format)]
    log_format: Option<LogFormat>,
}

fn parse_log_format(s: &str) -> Result<LogFormat, String> {
    LogFormat::parse(s).ok_or_else(|| format!("unknown log format {s:?}"))
}

impl Cli {
    /// Command-line flags win over file and environment.
    fn apply(&self, settings: &mut GatewaySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(catalog) = &self.catalog {
            settings.catalog_path = Some(catalog.to_string_lossy().into_owned());
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if let Some(format) = self.log_format {
            settings.logging.format = format;
        }
    }
}

fn load_catalog(path: Option<&str>) -> Result<Catalog> {
    let Some(path) = path else {
        warn!("no catalog configured, starting empty");
        return Ok(Catalog::default());
    };
    let catalog = Catalog::load(Path::new(path))
        .with_context(|| format!("Failed to load catalog: {path}"))?;
    info!(
        providers = catalog.providers.len(),
        endpoints = catalog.endpoints.len(),
        outposts = catalog.outposts.len(),
        tokens = catalog.tokens.len(),
        "catalog loaded"
    );
    Ok(catalog)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Cli::parse();

    let settings_path = args.config.clone().unwrap_or_else(rac_settings::settings_path);
    let mut settings = rac_settings::load_settings_from_path(&settings_path)
        .with_context(|| format!("Failed to load settings: {}", settings_path.display()))?;
    args.apply(&mut settings);
    settings.validate().context("Invalid settings")?;

    rac_logging::init_subscriber(&settings.logging.level, settings.logging.format);

    let catalog = load_catalog(settings.catalog_path.as_deref())?;
    let tokens = Arc::new(TokenStore::from_catalog(&catalog));
    let directory = Arc::new(InMemoryDirectory::from_catalog(&catalog));

    let metrics = rac_server::metrics::install_recorder()
        .context("Failed to install metrics recorder")?;
    let server = RacServer::new(
        ServerConfig::from_settings(&settings),
        session_config(&settings),
        tokens,
        directory,
    )
    .with_metrics(metrics);

    let handle = server.listen().await.context("Failed to bind server")?;
    info!("RAC gateway listening on http://{}", handle.addr);

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl-c")?;

    info!("Shutting down...");
    handle.shutdown(None).await;
    info!("Shutdown complete");
    Ok(())
}
