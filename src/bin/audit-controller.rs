mod cli;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result};
use axum::Router;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use clap::Parser;
use kube::Client;
use tokio::sync::{Mutex, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::info;

use constraint_audit::audit::AuditLoop;
use constraint_audit::discovery::EventEmitter;
use constraint_audit::engine::{AugmentedObject, EngineError, EngineResult, EvaluationEngine};
use constraint_audit::exclude::{ExclusionEntry, ProcessExcluder};
use constraint_audit::kube_discovery::{KubeConstraintCatalog, KubeDiscovery};
use constraint_audit::kube_events::KubeEventEmitter;
use constraint_audit::kube_store::KubeObjectStore;
use constraint_audit::stats::{self, StatsReporter};
use constraint_audit::watched::WatchedKindSet;

use cli::Cli;

/// Placeholder for the evaluation engine.
/// Always finds zero violations — the seam a real policy compiler plugs
/// into via [`EvaluationEngine`].
struct NullEngine;

impl EvaluationEngine for NullEngine {
    async fn audit(&self) -> Result<Vec<EngineResult>, EngineError> {
        Ok(Vec::new())
    }

    async fn review(&self, _object: AugmentedObject) -> Result<Vec<EngineResult>, EngineError> {
        Ok(Vec::new())
    }
}

struct ServerState {
    ready: Mutex<bool>,
}

fn build_router(state: Arc<ServerState>) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(|| async { (StatusCode::OK, "OK") }))
        .route("/readyz", get(move || ready_handler(state.clone())))
}

async fn ready_handler(state: Arc<ServerState>) -> impl IntoResponse {
    if *state.ready.lock().await {
        (StatusCode::OK, "READY")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
    }
}

async fn metrics_handler() -> impl IntoResponse {
    (StatusCode::OK, stats::render())
}

async fn serve_metrics(
    state: Arc<ServerState>,
    mut shutdown: broadcast::Receiver<()>,
    addr: SocketAddr,
) -> Result<()> {
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind metrics server on {addr}"))?;

    info!(addr = %addr, "audit_metrics_server_started");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;

    Ok(())
}

/// Default audit-time namespace exclusions: the control plane's own
/// bookkeeping namespaces never get evaluated.
fn default_exclusions() -> Vec<ExclusionEntry> {
    vec![ExclusionEntry {
        namespaces: vec!["kube-system".to_string(), "kube-public".to_string(), "kube-node-lease".to_string()],
        tags: vec!["audit".to_string()],
    }]
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .json()
        .init();

    let cli = Cli::parse();

    info!("audit_controller_starting");

    let client = Client::try_default().await.context("failed to load kubeconfig")?;
    match client.apiserver_version().await {
        Ok(v) => info!(major = %v.major, minor = %v.minor, "cluster_connection_established"),
        Err(e) => anyhow::bail!("cannot reach cluster: {e}"),
    }

    let store = Arc::new(KubeObjectStore::new(client.clone()));
    let engine = Arc::new(NullEngine);
    let discovery = Arc::new(KubeDiscovery::new(client.clone()));
    let emitter = Arc::new(KubeEventEmitter::new(client.clone()));
    let excluder = Arc::new(ProcessExcluder::new());
    excluder.add(&default_exclusions());
    let watched = Arc::new(WatchedKindSet::new());
    let catalog = Arc::new(KubeConstraintCatalog::new(client.clone(), cli.constraint_api_group.clone()));
    let stats_reporter = StatsReporter::new();

    let state = Arc::new(ServerState { ready: Mutex::new(false) });
    let (shutdown_tx, _) = broadcast::channel::<()>(1);

    let addr: SocketAddr = cli.metrics_addr.parse().context("invalid --metrics-addr")?;
    let http_shutdown = shutdown_tx.subscribe();
    let http_state = state.clone();
    let http_handle = tokio::spawn(async move { serve_metrics(http_state, http_shutdown, addr).await });

    let cancel = CancellationToken::new();

    if let Some(_interval) = cli.audit.interval() {
        *state.ready.lock().await = true;

        let audit_loop = AuditLoop::new(store, engine, discovery, emitter, excluder, watched, catalog, cli.audit, stats_reporter);

        let run_cancel = cancel.clone();
        let run_handle = tokio::spawn(async move { audit_loop.run(run_cancel).await });

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown_signal_received");
            }
        }

        cancel.cancel();
        let _ = run_handle.await;
    } else {
        info!("audit_loop_disabled_audit_interval_zero");
        *state.ready.lock().await = true;
        tokio::signal::ctrl_c().await.ok();
    }

    let _ = shutdown_tx.send(());
    let _ = http_handle.await?;

    info!("audit_controller_stopped");
    Ok(())
}
