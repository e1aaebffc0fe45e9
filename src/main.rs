// src/main.rs
// Entry point: load configuration, assemble application state, start the
// background conversation-store cleaner, and serve the HTTP edge.
//
// Startup failures (missing required environment, unreachable store) exit
// non-zero before any request is served, per spec.md §6; runtime failures
// never exit the process — they surface as an `error` SSE event or an
// HTTP 500, handled entirely inside the request path.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use qa_orchestrator::config::QaConfig;
use qa_orchestrator::join_graph::{JoinGraph, StaticJoinGraphSource};
use qa_orchestrator::state::AppState;
use qa_orchestrator::{api, metrics};

/// How often the background cleaner sweeps for expired threads.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60 * 60);
/// How old a thread's last activity must be before it is dropped (spec.md
/// §3's default; not one of the closed config knobs in spec.md §6, so it
/// is fixed rather than env-tunable).
const CONVERSATION_TTL: chrono::Duration = chrono::Duration::hours(24);

fn init_tracing(json: bool, level: &str) {
    let filter = EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = QaConfig::from_env();
    init_tracing(config.logging.json, &config.logging.level);

    info!("starting qa-orchestrator");

    metrics::init_metrics();

    // The NL-to-SQL translator and its schema graph are external
    // collaborators (spec.md §1 Non-goal); without one wired in, the
    // classifier sees an empty business-entity vocabulary and the SQL
    // backend reports itself unavailable rather than failing startup.
    let join_graph_source = Arc::new(StaticJoinGraphSource(JoinGraph::empty()));

    let state = match AppState::new(config, join_graph_source).await {
        Ok(state) => state,
        Err(e) => {
            error!("failed to initialize application state: {e:#}");
            std::process::exit(1);
        }
    };

    spawn_cleanup_task(state.clone());

    let bind_address = state.config.bind_address();
    let router = api::http::router(state);

    info!("listening on {bind_address}");
    let listener = match tokio::net::TcpListener::bind(&bind_address).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("failed to bind {bind_address}: {e}");
            std::process::exit(1);
        }
    };

    axum::serve(listener, router).await?;
    Ok(())
}

/// Background sweep deleting threads whose last checkpoint activity
/// predates the TTL, per spec.md §3/§4.3. Failures are logged and the
/// loop continues — a single bad sweep must never take the process down.
fn spawn_cleanup_task(state: AppState) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CLEANUP_INTERVAL);
        loop {
            interval.tick().await;
            match state.store.cleanup_older_than(CONVERSATION_TTL).await {
                Ok(removed) if removed > 0 => info!(removed, "cleaned up expired conversation threads"),
                Ok(_) => {}
                Err(e) => warn!("conversation store cleanup failed: {e}"),
            }
        }
    });
}
