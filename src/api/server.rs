//! Process bootstrap: wires the singletons, mounts the router, runs the
//! worker pool, and handles graceful shutdown.

use std::sync::Arc;
use std::time::Duration;

use axum::extract::DefaultBodyLimit;
use axum::middleware;
use axum::{Router, routing::get, routing::post};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use super::request_id::propagate_request_id;
use super::services;
use super::sse;
use super::state::AppState;
use crate::agent::AgentClient;
use crate::config::Config;
use crate::executor::JobExecutor;
use crate::ledger::JobStore;
use crate::observability::Metrics;
use crate::orchestrator::Orchestrator;
use crate::queue::{WorkBroker, WorkQueue, spawn_workers};
use crate::skills::SkillRegistry;
use crate::workspace::WorkspaceManager;

type AnyError = Box<dyn std::error::Error + Send + Sync + 'static>;

const PRUNE_INTERVAL: Duration = Duration::from_secs(6 * 60 * 60);

/// Run the HTTP façade, optionally with the in-process worker pool
/// (`serve` runs both; `api` runs the façade alone).
pub async fn run(config: Config, with_workers: bool) -> Result<(), AnyError> {
    let config = Arc::new(config);
    let (state, receivers, queue) = build_state(config.clone())?;

    if with_workers {
        let executor = Arc::new(JobExecutor::new(
            state.store.clone(),
            state.workspaces.clone(),
            state.agent.clone(),
            state.skills.clone(),
            config.limits.clone(),
            config.identity.clone(),
            state.metrics.clone(),
        ));
        spawn_workers(
            receivers,
            queue,
            executor,
            config.queue.clone(),
            config.limits.hard_deadline_secs,
        );
        // Tickets left over from a previous process are picked up now; the
        // claim check skips any job that already moved on.
        if let Err(err) = state.orchestrator.redeliver_pending().await {
            warn!(error = %err, "Ticket redelivery failed");
        }
    } else {
        drop(receivers);
    }

    spawn_pruner(&state);

    let app = router(state.clone());
    let listener = TcpListener::bind(config.server.bind_addr).await?;
    info!(address = %config.server.bind_addr, "agentbox API listening");

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Err(err) = state.store.persist() {
        warn!(error = %err, "Final ledger persist failed");
    }
    Ok(())
}

/// Worker-only process: no HTTP surface, just the pool draining the queue.
pub async fn run_worker(config: Config) -> Result<(), AnyError> {
    let config = Arc::new(config);
    let (state, receivers, queue) = build_state(config.clone())?;

    let executor = Arc::new(JobExecutor::new(
        state.store.clone(),
        state.workspaces.clone(),
        state.agent.clone(),
        state.skills.clone(),
        config.limits.clone(),
        config.identity.clone(),
        state.metrics.clone(),
    ));
    spawn_workers(
        receivers,
        queue,
        executor,
        config.queue.clone(),
        config.limits.hard_deadline_secs,
    );
    if let Err(err) = state.orchestrator.redeliver_pending().await {
        warn!(error = %err, "Ticket redelivery failed");
    }

    info!("agentbox worker pool running");
    shutdown_signal().await;
    state.store.persist()?;
    Ok(())
}

/// Construct the process-scope singletons and the application state.
pub fn build_state(
    config: Arc<Config>,
) -> Result<
    (
        AppState,
        Vec<tokio::sync::mpsc::Receiver<crate::queue::WorkTicket>>,
        Arc<WorkQueue>,
    ),
    AnyError,
> {
    let store = Arc::new(JobStore::open(&config.server.ledger_path)?);
    let queue = Arc::new(WorkQueue::open(&config.server.queue_path)?);
    let workspaces = Arc::new(WorkspaceManager::new(
        &config.server.data_root,
        config.limits.max_upload_bytes,
    ));
    let agent = Arc::new(AgentClient::new(&config.agent)?);
    let skills = Arc::new(SkillRegistry::with_defaults());
    let metrics = Arc::new(Metrics::new());

    let (broker, receivers) =
        WorkBroker::new(queue.clone(), config.queue.workers, config.queue.channel_size);
    let broker = Arc::new(broker);

    let orchestrator = Arc::new(Orchestrator::new(
        store.clone(),
        workspaces.clone(),
        skills.clone(),
        agent.clone(),
        broker,
        config.clone(),
        metrics.clone(),
    ));

    let state = AppState {
        config,
        store,
        orchestrator,
        skills,
        agent,
        workspaces,
        metrics,
    };
    Ok((state, receivers, queue))
}

/// The full route table.
pub fn router(state: AppState) -> Router {
    // Multipart bodies carry whole uploads; leave generous headroom above
    // the per-file cap, which is enforced precisely in the workspace layer.
    let body_limit = (state.config.limits.max_upload_bytes.as_usize() * 4).max(8 * 1024 * 1024);

    Router::new()
        .route("/api/v1/jobs", post(services::create_job).get(services::list_jobs))
        .route("/api/v1/jobs/{job_id}", get(services::get_job))
        .route("/api/v1/jobs/{job_id}/start", post(services::start_job))
        .route("/api/v1/jobs/{job_id}/abort", post(services::abort_job))
        .route("/api/v1/jobs/{job_id}/events", get(sse::job_events))
        .route("/api/v1/jobs/{job_id}/artifacts", get(services::list_artifacts))
        .route("/api/v1/jobs/{job_id}/download", get(services::download_bundle))
        .route(
            "/api/v1/jobs/{job_id}/artifacts/{artifact_id}/download",
            get(services::download_artifact),
        )
        .route("/api/v1/skills", get(services::list_skills))
        .route("/api/v1/skills/{code}", get(services::get_skill))
        .route("/health", get(services::health))
        .route("/operators/metrics", get(services::metrics))
        .with_state(state)
        .layer(middleware::from_fn(propagate_request_id))
        .layer(DefaultBodyLimit::max(body_limit))
        .layer(TraceLayer::new_for_http())
}

fn spawn_pruner(state: &AppState) {
    let store = state.store.clone();
    let ttl_days = state.config.retention.job_ttl_days;
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(PRUNE_INTERVAL);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            let store = store.clone();
            let result =
                tokio::task::spawn_blocking(move || store.prune_expired(ttl_days)).await;
            match result {
                Ok(Ok(stats)) if stats.jobs_removed > 0 => {
                    info!(removed = stats.jobs_removed, "Retention prune complete");
                }
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(error = %err, "Retention prune failed"),
                Err(err) => warn!(error = %err, "Retention prune panicked"),
            }
        }
    });
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            warn!(error = %err, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(err) => warn!(error = %err, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
