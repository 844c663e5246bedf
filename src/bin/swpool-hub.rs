// SPDX-License-Identifier: MPL-2.0
// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! `swpool-hub`: serves the pool hub over WebSockets.

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use clap::Parser;
use swpool_hub::config::{
    ConfigPublisher, ConfigStore, DefaultConfigStore, FileConfigStore, ServiceSettings,
};
use swpool_hub::{Hub, HubServer, TraceCollector};
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// Real-time hub between a pool sensor device and browser clients
#[derive(Parser)]
#[command(name = "swpool-hub")]
#[command(version)]
struct Cli {
    /// Service settings file (JSON)
    #[arg(short, long, value_name = "FILE", env = "SWPOOL_HUB_SETTINGS")]
    settings: Option<PathBuf>,

    /// Persisted pool configuration file (JSON); defaults are used and
    /// changes are not persisted when omitted
    #[arg(short, long, value_name = "FILE", env = "SWPOOL_HUB_POOL_CONFIG")]
    pool_config: Option<PathBuf>,

    /// Address to listen on, overriding the settings file
    #[arg(short, long, value_name = "ADDR")]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let settings = match cli.settings.as_deref() {
        Some(path) => match ServiceSettings::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                eprintln!("Failed to load settings: {e}");
                process::exit(1);
            }
        },
        None => ServiceSettings::default(),
    };

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&settings.log_filter));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting swpool-hub v{}", env!("CARGO_PKG_VERSION"));

    if let Err(e) = run(cli, settings).await {
        error!("swpool-hub failed: {e}");
        process::exit(1);
    }

    info!("Shutdown complete");
}

async fn run(cli: Cli, settings: ServiceSettings) -> Result<(), Box<dyn std::error::Error>> {
    let store: Arc<dyn ConfigStore> = match cli.pool_config {
        Some(path) => Arc::new(FileConfigStore::new(path)),
        None => Arc::new(DefaultConfigStore),
    };
    let pool = store.load()?;
    let config = settings.hub_config(pool.device_config(settings.collect_metrics_time));

    let (hub, traces) = Hub::new(config);
    let collector = TraceCollector::spawn(traces);
    let hub_task = hub.run();

    let bind = cli.bind.unwrap_or_else(|| settings.bind_address.clone());
    let listener = TcpListener::bind(&bind).await?;
    let publisher = ConfigPublisher::new(store, hub.clone(), settings.collect_metrics_time);
    let server = HubServer::new(hub.clone(), settings.session_ttl()).with_config(publisher);
    let server = tokio::spawn(server.serve(listener));

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    server.abort();
    hub.stop().await;
    if let Some(task) = hub_task {
        task.await?;
    }
    collector.await?;
    Ok(())
}
