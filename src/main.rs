use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::sync::mpsc;
use tracing::info;

use stratus::config::{Config, LogFormat};
use stratus::k8s::{Object, ResourceStore};
use stratus::reconciler::{ObjectEvent, Reconciler};
use stratus::xds::{server, SnapshotCache};
use stratus::{Error, Result, APP_NAME, VERSION};

#[derive(Debug, Parser)]
#[command(name = "stratus", version, about = "Envoy ingress control plane")]
struct Cli {
    /// Address the ADS gRPC server binds to
    #[arg(long, env = "STRATUS_LISTEN_ADDR")]
    listen_addr: Option<String>,

    /// Rebuild holdoff in milliseconds
    #[arg(long, env = "STRATUS_HOLDOFF_MS")]
    holdoff_ms: Option<u64>,

    /// Maximum rebuild delay in milliseconds
    #[arg(long, env = "STRATUS_MAX_HOLDOFF_MS")]
    max_holdoff_ms: Option<u64>,

    /// Default log level when RUST_LOG is unset
    #[arg(long, env = "STRATUS_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log output format: text or json
    #[arg(long, env = "STRATUS_LOG_FORMAT")]
    log_format: Option<String>,

    /// YAML file of objects to seed the store with at startup
    #[arg(long)]
    resources: Option<PathBuf>,
}

impl Cli {
    fn build_config(&self) -> Result<Config> {
        let mut config = Config::default();
        if let Some(addr) = &self.listen_addr {
            config.xds.listen_addr = addr.clone();
        }
        if let Some(holdoff) = self.holdoff_ms {
            config.xds.holdoff_ms = holdoff;
        }
        if let Some(max_holdoff) = self.max_holdoff_ms {
            config.xds.max_holdoff_ms = max_holdoff;
        }
        if let Some(level) = &self.log_level {
            config.log.level = level.clone();
        }
        if let Some(format) = &self.log_format {
            config.log.format = match format.as_str() {
                "text" => LogFormat::Text,
                "json" => LogFormat::Json,
                other => {
                    return Err(Error::config(format!("unknown log format '{}'", other)));
                }
            };
        }
        config.validate()?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.build_config()?;
    stratus::observability::init_tracing(&config.log);

    info!(version = VERSION, "Starting {}", APP_NAME);

    let store = Arc::new(ResourceStore::new());
    if let Some(path) = &cli.resources {
        let seeded = seed_store(&store, path)?;
        info!(objects = seeded, file = %path.display(), "Seeded resource store");
    }

    let cache = Arc::new(SnapshotCache::new());
    let reconciler = Reconciler::new(Arc::clone(&store), Arc::clone(&cache), &config.xds);

    // The watch feeding this channel lives outside the control plane; the
    // sender is held here so the reconciler stays alive for the process.
    let (events_tx, events_rx) = mpsc::channel::<ObjectEvent>(256);
    let reconciler_handle = tokio::spawn(reconciler.run(events_rx));

    server::serve(&config.xds, cache, shutdown_signal()).await?;

    drop(events_tx);
    let _ = reconciler_handle.await;
    info!("Shutdown complete");
    Ok(())
}

fn seed_store(store: &ResourceStore, path: &PathBuf) -> Result<usize> {
    let raw = std::fs::read_to_string(path)?;
    let objects: Vec<Object> = serde_yaml::from_str(&raw)?;

    let count = objects.len();
    for object in objects {
        store.upsert(object);
    }
    Ok(count)
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        return;
    }
    info!("Shutdown signal received");
}
