//! vssd - VSS datapoint gateway daemon
//!
//! Serves JSON-RPC over WebSocket in front of a datapoint store.
//!
//! Usage:
//!   vssd [OPTIONS] [config.toml]
//!
//! Without a config file the gateway runs on port 8080 against an
//! in-memory time-series store and the built-in datapoint catalog.

mod config;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use vss_core::{DatapointCatalog, HandlerFactory, MessageSink};
use vss_handlers::{
    DocumentHandlerFactory, MemoryDocumentStore, MemoryTimeseriesStore, TimeseriesHandlerFactory,
};
use vss_router::{create_router, Connections, Dispatcher};

use crate::config::{GatewayConfig, StoreKind};

const BUILTIN_CATALOG: &str = include_str!("../config/vss_data_points.yaml");

#[derive(Parser)]
#[command(name = "vssd")]
#[command(version, about = "VSS datapoint gateway (JSON-RPC over WebSocket)")]
struct Cli {
    /// Gateway config file (TOML)
    config: Option<PathBuf>,

    /// Listen port
    #[arg(short, long, env = "VSS_PORT")]
    port: Option<u16>,

    /// Storage backend, overrides `store.kind`
    #[arg(long, value_enum, env = "HANDLER_TYPE")]
    handler: Option<StoreKind>,

    /// VSS datapoint catalog (.yaml, .yml or .json)
    #[arg(short, long, env = "VSS_DATAPOINTS")]
    datapoints: Option<PathBuf>,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_json);

    tracing::info!("Starting vssd (VSS datapoint gateway)");

    let config = match cli.config.as_deref() {
        Some(path) => {
            tracing::info!("Loading config from: {}", path.display());
            GatewayConfig::load_from(path)?
        }
        None => GatewayConfig::default(),
    }
    .merge_with_args(cli.port, cli.handler, cli.datapoints);

    let catalog = load_catalog(&config)?;
    tracing::info!(datapoints = catalog.len(), "Datapoint catalog ready");

    let connections = Arc::new(Connections::new());
    let factory = create_factory(&config, catalog, connections.clone());

    let dispatcher = Arc::new(
        Dispatcher::new(connections, factory.clone()).with_request_timeout(config.request_timeout()),
    );
    let app = create_router(dispatcher);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    tracing::info!(store = ?config.store.kind, "Listening on ws://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    factory.shutdown();
    tracing::info!("vssd stopped");
    Ok(())
}

fn init_logging(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "vssd=info,vss_router=info,vss_handlers=debug,vss_core=info".into()
    });

    tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(fmt::layer))
        .init();
}

fn load_catalog(config: &GatewayConfig) -> Result<DatapointCatalog> {
    let id_field = &config.store.id_field;
    match &config.store.datapoints {
        Some(path) => {
            tracing::info!("Loading datapoints from: {}", path.display());
            Ok(DatapointCatalog::load(path, id_field)?)
        }
        None => {
            tracing::info!("No datapoints file configured, using built-in catalog");
            DatapointCatalog::from_yaml_str(BUILTIN_CATALOG, id_field)
                .context("Built-in datapoint catalog is invalid")
        }
    }
}

fn create_factory(
    config: &GatewayConfig,
    catalog: DatapointCatalog,
    connections: Arc<Connections>,
) -> Arc<dyn HandlerFactory> {
    let sink: Arc<dyn MessageSink> = connections;
    match config.store.kind {
        StoreKind::Document => {
            let store = Arc::new(MemoryDocumentStore::new(catalog));
            Arc::new(DocumentHandlerFactory::new(store, sink))
        }
        StoreKind::Timeseries => {
            let store = Arc::new(MemoryTimeseriesStore::new(catalog));
            Arc::new(TimeseriesHandlerFactory::new(
                store,
                sink,
                config.poll_interval(),
            ))
        }
    }
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => tracing::info!("Shutdown requested"),
        Err(e) => tracing::error!(error = %e, "Failed to listen for Ctrl-C"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_catalog_loads() {
        let catalog = load_catalog(&GatewayConfig::default()).unwrap();
        assert!(catalog.contains("Vehicle_CurrentLocation_Latitude"));
        assert!(catalog.contains(vss_core::DEFAULT_ID_FIELD));
    }

    #[test]
    fn test_cli_flags() {
        let cli = Cli::parse_from([
            "vssd",
            "gateway.toml",
            "--port",
            "9001",
            "--handler",
            "document",
            "--log-json",
        ]);
        assert_eq!(cli.config, Some(PathBuf::from("gateway.toml")));
        assert_eq!(cli.port, Some(9001));
        assert_eq!(cli.handler, Some(StoreKind::Document));
        assert!(cli.log_json);
    }

    #[test]
    fn test_unsupported_catalog_extension() {
        let config = GatewayConfig::default().merge_with_args(
            None,
            None,
            Some(PathBuf::from("points.csv")),
        );
        assert!(load_catalog(&config).is_err());
    }
}
