//! mnemo — memory service for conversational agents.
//! Stores exchanges, ranks them by tf-idf similarity, assembles bounded
//! context blocks for the next agent call.

use std::sync::Arc;

use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use mnemo::corpus::CorpusStats;
use mnemo::store::{FileBackend, MemoryBackend, MemoryStore, StorageBackend};
use mnemo::{AppState, MemoryConfig};

#[derive(Parser)]
#[command(name = "mnemo", version, about = "Conversational memory service for AI agents")]
struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "3930", env = "MNEMO_PORT")]
    port: u16,

    /// Data directory for per-user records (":memory:" for no persistence)
    #[arg(short, long, default_value = "mnemo-data", env = "MNEMO_DATA")]
    data: String,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = Args::parse();
    let config = MemoryConfig::from_env();

    let backend: Arc<dyn StorageBackend> = if args.data == ":memory:" {
        Arc::new(MemoryBackend::new())
    } else {
        Arc::new(FileBackend::new(&args.data).expect("failed to prepare data directory"))
    };
    let corpus = Arc::new(CorpusStats::new());
    let store =
        MemoryStore::open(backend, corpus, config.clone()).expect("failed to open memory store");

    let state = AppState {
        store: Arc::new(store),
        started_at: std::time::Instant::now(),
    };
    let app = mnemo::api::router(state);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        port = args.port,
        data = %args.data,
        threshold = config.similarity_threshold,
        k = config.default_k,
        char_budget = config.char_budget,
        "mnemo starting"
    );

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("server error");
}

async fn shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("failed to register SIGTERM handler");
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = sigterm.recv() => {}
    }
    info!("shutting down");
}
