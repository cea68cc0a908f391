use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::NaiveDate;
use serde::Deserialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use marketmood_core::config::{Policy, Settings};
use marketmood_core::domain::portfolio::PortfolioClassification;
use marketmood_core::domain::sentiment::SentimentResult;
use marketmood_core::domain::tracking::TrackingRecord;
use marketmood_core::llm::anthropic::AnthropicClient;
use marketmood_core::news::HttpNewsClient;
use marketmood_core::pipeline::{
    Analyzer, BatchOptions, BatchSummary, DispatchMode, Dispatcher, PipelineError,
};
use marketmood_core::storage::queue::PgWorkQueue;
use marketmood_core::storage::results::PgResultStore;
use marketmood_core::storage::tracking::PgTrackingStore;
use marketmood_core::storage::{ResultStore, TrackingStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let ctx = match build_context(&settings).await {
        Ok(ctx) => Some(Arc::new(ctx)),
        Err(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %e, "context init failed; starting API in degraded mode");
            None
        }
    };

    let state = AppState { ctx };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/analyze", post(post_analyze))
        .route("/batch", post(post_batch))
        .route("/results/:as_of_date/:security_id", get(get_result))
        .route("/classification/:as_of_date", get(get_classification))
        .route("/tracking/:as_of_date", get(get_tracking))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(3000);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));

    tracing::info!(%addr, "api listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

struct ApiContext {
    analyzer: Arc<Analyzer>,
    dispatcher: Dispatcher,
    results: Arc<PgResultStore>,
    tracking: Arc<PgTrackingStore>,
    universe: Vec<String>,
    policy: Policy,
}

#[derive(Clone)]
struct AppState {
    ctx: Option<Arc<ApiContext>>,
}

async fn build_context(settings: &Settings) -> anyhow::Result<ApiContext> {
    let policy = Policy::from_env()?;

    let db_url = settings.require_database_url()?;
    let pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await?;
    marketmood_core::storage::migrate(&pool).await?;

    let results = Arc::new(PgResultStore::new(pool.clone(), &policy.results_prefix));
    let tracking = Arc::new(PgTrackingStore::new(pool.clone()));
    let queue = Arc::new(PgWorkQueue::new(pool, policy.max_delivery_count));

    let news = Arc::new(HttpNewsClient::from_settings(settings)?);
    let model = Arc::new(AnthropicClient::from_settings(settings)?);
    let analyzer = Arc::new(Analyzer::new(
        news,
        model,
        results.clone(),
        tracking.clone(),
        policy.clone(),
    ));
    let dispatcher = Dispatcher::new(analyzer.clone(), queue);

    let universe = marketmood_core::universe::load_universe_from_settings(settings).await?;

    Ok(ApiContext {
        analyzer,
        dispatcher,
        results,
        tracking,
        universe,
        policy,
    })
}

#[derive(Debug, Deserialize)]
struct AnalyzeBody {
    security_id: String,
    as_of_date: Option<String>,
    #[serde(default)]
    force: bool,
}

async fn post_analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeBody>,
) -> Result<Json<SentimentResult>, StatusCode> {
    let Some(ctx) = &state.ctx else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date = resolve_date(body.as_of_date.as_deref())?;
    let security_id = body.security_id.trim();
    if security_id.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let outcome = ctx
        .analyzer
        .analyze(security_id, as_of_date, body.force)
        .await
        .map_err(pipeline_error_status)?;

    Ok(Json(outcome.result))
}

#[derive(Debug, Deserialize)]
struct BatchBody {
    as_of_date: Option<String>,
    mode: Option<String>,
    max_items: Option<usize>,
    #[serde(default)]
    force: bool,
}

async fn post_batch(
    State(state): State<AppState>,
    Json(body): Json<BatchBody>,
) -> Result<Json<BatchSummary>, StatusCode> {
    let Some(ctx) = &state.ctx else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date = resolve_date(body.as_of_date.as_deref())?;
    let mode = match body.mode.as_deref() {
        Some(s) => DispatchMode::parse(s).map_err(|_| StatusCode::BAD_REQUEST)?,
        None => DispatchMode::Queued,
    };

    let options = BatchOptions {
        concurrency: ctx.policy.direct_concurrency,
        max_items: body.max_items,
        force: body.force,
    };

    let summary = ctx
        .dispatcher
        .dispatch_all(&ctx.universe, as_of_date, mode, &options)
        .await;

    Ok(Json(summary))
}

async fn get_result(
    State(state): State<AppState>,
    Path((as_of_date, security_id)): Path<(String, String)>,
) -> Result<Json<SentimentResult>, StatusCode> {
    let Some(ctx) = &state.ctx else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date = parse_date(&as_of_date)?;
    let result = ctx
        .results
        .get(&security_id, as_of_date)
        .await
        .map_err(internal_error)?
        .ok_or(StatusCode::NOT_FOUND)?;

    Ok(Json(result))
}

async fn get_classification(
    State(state): State<AppState>,
    Path(as_of_date): Path<String>,
) -> Result<Json<PortfolioClassification>, StatusCode> {
    let Some(ctx) = &state.ctx else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date = parse_date(&as_of_date)?;
    let classification = marketmood_core::pipeline::classify(
        ctx.results.as_ref(),
        as_of_date,
        &ctx.universe,
        &ctx.policy.classify,
    )
    .await
    .map_err(internal_error)?;

    Ok(Json(classification))
}

async fn get_tracking(
    State(state): State<AppState>,
    Path(as_of_date): Path<String>,
) -> Result<Json<Vec<TrackingRecord>>, StatusCode> {
    let Some(ctx) = &state.ctx else {
        return Err(StatusCode::SERVICE_UNAVAILABLE);
    };

    let as_of_date = parse_date(&as_of_date)?;
    let records = ctx
        .tracking
        .list_for_date(as_of_date)
        .await
        .map_err(internal_error)?;

    Ok(Json(records))
}

fn parse_date(s: &str) -> Result<NaiveDate, StatusCode> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| StatusCode::BAD_REQUEST)
}

fn resolve_date(arg: Option<&str>) -> Result<NaiveDate, StatusCode> {
    match arg {
        Some(s) => parse_date(s),
        None => marketmood_core::time::resolve_as_of_date(None, chrono::Utc::now())
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR),
    }
}

fn internal_error(e: anyhow::Error) -> StatusCode {
    sentry_anyhow::capture_anyhow(&e);
    StatusCode::INTERNAL_SERVER_ERROR
}

fn pipeline_error_status(err: PipelineError) -> StatusCode {
    sentry_anyhow::capture_anyhow(&anyhow::Error::new(err.clone()));
    match err {
        // Upstream collaborators failed us.
        PipelineError::SourceUnavailable { .. } | PipelineError::ModelFailure { .. } => {
            StatusCode::BAD_GATEWAY
        }
        PipelineError::StoreFailure { .. } | PipelineError::IdempotencyCheckFailure { .. } => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
