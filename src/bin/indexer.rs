use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use token_tracker::checkpoint::CheckpointStore;
use token_tracker::config::{
    Config, ConfigLayer, HttpLayer, StorageLayer, TrackerLayer, merge_layers,
};
use token_tracker::http::{self, ApiState};
use token_tracker::query::QueryService;
use token_tracker::rpc::RpcClient;
use token_tracker::signal::ShutdownSignals;
use token_tracker::source::RpcEventSource;
use token_tracker::store::StoreRegistry;
use token_tracker::tracker::{ShutdownOutcome, Tracker};
use tokio::net::TcpListener;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "indexer")]
#[command(about = "Track ERC20 transfers and serve them over HTTP", long_about = None)]
struct Args {
    /// YAML configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    #[arg(long)]
    http_addr: Option<String>,

    /// May be repeated; endpoints are rotated on failure
    #[arg(long = "jsonrpc-endpoint")]
    jsonrpc_endpoints: Vec<String>,

    #[arg(long)]
    checkpoint_path: Option<String>,

    #[arg(long)]
    storage_backend: Option<String>,

    #[arg(long)]
    db_endpoint: Option<String>,

    #[arg(long)]
    batch_size: Option<u64>,

    #[arg(long)]
    progress: Option<bool>,

    #[arg(long)]
    shutdown_timeout_secs: Option<u64>,
}

impl Args {
    fn layer(&self) -> ConfigLayer {
        ConfigLayer {
            http: HttpLayer {
                addr: self.http_addr.clone(),
            },
            tracker: TrackerLayer {
                endpoints: (!self.jsonrpc_endpoints.is_empty())
                    .then(|| self.jsonrpc_endpoints.clone()),
                checkpoint_path: self.checkpoint_path.clone(),
                batch_size: self.batch_size,
                progress: self.progress,
                ..TrackerLayer::default()
            },
            storage: StorageLayer {
                backend: self.storage_backend.clone(),
                endpoint: self.db_endpoint.clone(),
            },
            shutdown_timeout_secs: self.shutdown_timeout_secs,
        }
    }
}

fn load_config(args: &Args) -> Result<Config> {
    let mut layers = Vec::new();
    if let Some(path) = &args.config {
        layers.push(ConfigLayer::from_yaml_file(path)?);
    }
    layers.push(ConfigLayer::from_env()?);
    layers.push(args.layer());

    let config = merge_layers(Config::default(), &layers);
    config.validate()?;
    Ok(config)
}

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let code = match run(Args::parse()).await {
        Ok(code) => code,
        Err(e) => {
            error!("Indexer failed: {:#}", e);
            1
        }
    };
    std::process::exit(code);
}

async fn run(args: Args) -> Result<i32> {
    info!("Starting ERC20 transfer tracker");

    let config = load_config(&args)?;
    info!(
        "Configuration loaded: {} RPC endpoint(s), storage backend '{}'",
        config.tracker.endpoints.len(),
        config.storage.backend
    );

    let mut signals = ShutdownSignals::register().context("failed to install signal handlers")?;

    let store = StoreRegistry::with_builtin().build(&config.storage)?;
    let client = RpcClient::new(&config.tracker.endpoints)?;
    let checkpoint = Arc::new(CheckpointStore::open(&config.tracker.checkpoint_path)?);
    let listener = TcpListener::bind(&config.http.addr)
        .await
        .with_context(|| format!("failed to bind {}", config.http.addr))?;

    let source = RpcEventSource::from_config(client, checkpoint, &config.tracker);
    let mut tracker = Tracker::start(source, store.clone(), config.tracker.queue_capacity);

    let http_cancel = CancellationToken::new();
    let api = ApiState::new(QueryService::new(store), tracker.state());
    let server = tokio::spawn(http::serve(listener, api, http_cancel.clone()));

    tokio::select! {
        signal = signals.recv() => info!("Received {}, shutting down", signal),
        _ = tracker.stopped() => warn!("Ingestion stopped, shutting down"),
    }

    let timeout = config.shutdown_timeout();
    let deadline = Instant::now() + timeout;
    let shutdown = async {
        http_cancel.cancel();
        if tokio::time::timeout_at(deadline, server).await.is_err() {
            warn!("HTTP server did not stop within {:?}", timeout);
        }
        tracker.shutdown_by(deadline).await
    };

    tokio::select! {
        result = shutdown => match result {
            Ok(ShutdownOutcome::Graceful) => {
                info!("Shutdown complete");
                Ok(0)
            }
            Ok(ShutdownOutcome::TimedOut) => {
                error!("Shutdown timed out after {:?}", timeout);
                Ok(1)
            }
            Err(e) => {
                error!("Shutdown finished with error: {}", e);
                Ok(1)
            }
        },
        signal = signals.recv() => {
            warn!("Received {} during shutdown, exiting immediately", signal);
            Ok(1)
        }
    }
}
