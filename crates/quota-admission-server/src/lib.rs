//! Process wiring for the quota admission webhook: tracing/metrics setup,
//! the Kubernetes client, the Policy Cache, the Watch Manager Directory, and
//! the HTTP server. `main.rs` is a thin shim around `run`.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use kube::Client;
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

pub mod admission;
pub mod admission_review;
pub mod api;
pub mod cli;
pub mod config;
pub mod directory;
pub mod errors;
pub mod metrics;
pub mod tenant_client;
pub mod validation;
pub mod waiter;
pub mod watch_manager;

pub use config::Config;
use quota_admission_policy::expression::{ExpressionEngine, RhaiExpressionEngine};
use quota_admission_policy::PolicyCache;

use admission::AdmissionPipeline;
use api::ApiState;
use directory::Directory;
use tenant_client::TenantClientCache;

/// Brings the admission webhook up: tracing, optional metrics exporter, the
/// root Kubernetes client, every component named in the system overview, and
/// finally the HTTP server itself. Runs until the listener errors out.
pub async fn run(config: Config) -> Result<()> {
    setup_tracing(&config.log_level, &config.log_fmt)?;

    if config.metrics_enabled
        && let Err(err) = metrics::setup_metrics(&config.otlp_endpoint)
    {
        tracing::error!(error = %err, "failed to set up metrics exporter, continuing without metrics");
    }

    let kube_config = kube::Config::infer()
        .await
        .context("could not infer a Kubernetes client configuration")?;
    let root_client = Client::try_from(kube_config.clone())
        .map_err(|e| anyhow!("could not build a Kubernetes client: {e}"))?;

    let policy_cache = PolicyCache::create_and_run(root_client.clone(), None);
    let engine: Arc<dyn ExpressionEngine> = Arc::new(RhaiExpressionEngine::new());
    let tenant_clients = TenantClientCache::new(root_client, kube_config);
    let directory = Directory::new(
        tenant_clients.clone(),
        config.max_waiters,
        config.watch_manager_ttl,
        config.retry,
        config.watch_startup_timeout,
    );

    let pipeline = Arc::new(AdmissionPipeline::new(
        policy_cache.clone(),
        directory,
        tenant_clients,
        engine,
        config.default_wait_timeout,
    ));

    let router = api::build_router(ApiState { pipeline, policy_cache });

    let listener = TcpListener::bind(config.addr)
        .await
        .with_context(|| format!("could not bind to {}", config.addr))?;
    info!(address = %config.addr, "quota admission webhook listening");
    axum::serve(listener, router)
        .await
        .context("admission webhook server error")?;

    Ok(())
}

/// Mirrors the teacher's `setup_tracing`: `EnvFilter`-driven level, text or
/// JSON output, noise suppression for chatty transitive dependencies.
fn setup_tracing(log_level: &str, log_fmt: &str) -> Result<()> {
    let filter_layer = EnvFilter::new(log_level)
        .add_directive("h2=off".parse().unwrap())
        .add_directive("hyper=off".parse().unwrap())
        .add_directive("tower=off".parse().unwrap());

    match log_fmt {
        "json" => tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer().json())
            .init(),
        _ => tracing_subscriber::registry()
            .with(filter_layer)
            .with(fmt::layer())
            .init(),
    };

    Ok(())
}
