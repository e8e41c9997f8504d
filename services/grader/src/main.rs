mod bulk;
mod config;
mod extract;
mod invocation;
mod persist;
mod pipeline;
mod provider;
mod provider_openai;
mod routes_grading;
mod routes_rubrics;
mod rubric_generation;
mod state;
mod types;

#[cfg(test)]
mod testing;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use blobstore::FsObjectStore;
use rubric::FileRubricStore;

use crate::config::AppConfig;
use crate::provider::LLMProvider;
use crate::provider_openai::OpenAiCompatProvider;
use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cfg = AppConfig::from_env()?;

    // --- Model provider ---
    let provider = OpenAiCompatProvider::new(
        cfg.llm_base_url.clone(),
        cfg.llm_model.clone(),
        cfg.llm_api_key.clone(),
        cfg.llm_http_timeout,
    )
    .context("Failed to build model provider")?;

    // A cold model endpoint is not fatal; items fail individually instead.
    match provider.ping().await {
        Ok(()) => info!(base_url = %cfg.llm_base_url, model = %cfg.llm_model, "model provider: ok"),
        Err(e) => warn!(base_url = %cfg.llm_base_url, error = %format!("{e:#}"), "model provider unreachable"),
    }

    // --- Stores ---
    let rubrics = FileRubricStore::new(&cfg.rubrics_dir);
    let objects = FsObjectStore::new(&cfg.object_store_dir);
    info!(
        rubrics_dir = %cfg.rubrics_dir.display(),
        object_store_dir = %cfg.object_store_dir.display(),
        output_bucket = %cfg.output_bucket,
        id_field = cfg.id_field.name(),
        "stores ready"
    );

    let addr = cfg.bind_addr.clone();
    let app_state = Arc::new(AppState::new(cfg, Arc::new(provider), Arc::new(rubrics), Arc::new(objects)));

    let app = Router::new()
        .route(
            "/grade",
            post(routes_grading::grade).options(routes_grading::grade),
        )
        .route(
            "/generate-rubric",
            post(routes_rubrics::generate).options(routes_rubrics::generate),
        )
        .route("/health", get(routes_grading::health))
        .layer(TraceLayer::new_for_http())
        .with_state(app_state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("grader listening on http://{addr}");
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
