use std::sync::Arc;

use anyhow::Context;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use tradingpal_core::analysis::ThresholdAnalyzer;
use tradingpal_core::domain::change_log::ChangeLogEntry;
use tradingpal_core::domain::entry::PortfolioEntry;
use tradingpal_core::domain::snapshot::{Snapshot, View};
use tradingpal_core::domain::update::EntryUpdate;
use tradingpal_core::pricing::{HttpPriceProvider, PriceError, PriceInfo};
use tradingpal_core::refresh::{IndustryTable, RefreshOptions};
use tradingpal_core::service::{assemble, Components, PortfolioService};
use tradingpal_core::storage::portfolio::PgPortfolioStore;
use tradingpal_core::time::MarketSessionTracker;
use tradingpal_core::CoreError;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let settings = tradingpal_core::config::Settings::from_env()?;
    let _sentry_guard = init_sentry(&settings);

    tracing_subscriber::registry()
        .with(EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer())
        .init();

    let res = run(settings).await;
    if let Err(e) = &res {
        sentry_anyhow::capture_anyhow(e);
        tracing::error!(error = %e, "api failed");
    }
    res
}

async fn run(settings: tradingpal_core::config::Settings) -> anyhow::Result<()> {
    let db_url = settings.require_database_url()?;
    let store = PgPortfolioStore::connect(db_url)
        .await
        .context("portfolio store unavailable")?;

    let options = RefreshOptions::from_env()?;
    let (service, scheduler) = assemble(Components {
        store: Arc::new(store),
        prices: Arc::new(HttpPriceProvider::from_settings(&settings)?),
        analyzer: Arc::new(ThresholdAnalyzer::from_env()),
        sessions: Arc::new(MarketSessionTracker::default()),
        industries: IndustryTable::default(),
        options,
    });

    let entries = service
        .entries()
        .await
        .context("initial portfolio load failed")?;
    tracing::info!(entries = entries.len(), "portfolio loaded");

    let (stop_tx, stop_rx) = tokio::sync::watch::channel(false);
    let refresher = tokio::spawn(scheduler.run(stop_rx));

    let state = AppState {
        service: Arc::new(service),
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .route("/tradingpal/getAllStocks", get(get_all_stocks))
        .route("/tradingpal/getStocksToBuy", get(get_stocks_to_buy))
        .route("/tradingpal/getStocksToSell", get(get_stocks_to_sell))
        .route("/tradingpal/refresh", put(refresh))
        .route("/tradingpal/lock", post(lock))
        .route("/tradingpal/unlock", post(unlock))
        .route("/tradingpal/updateStock", post(update_stock))
        .route("/tradingpal/deleteStock", post(delete_stock))
        .route("/tradingpal/getTickerValue", get(get_ticker_value))
        .route("/tradingpal/getFirstChangeLogItem", get(get_first_change))
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

    let _ = stop_tx.send(true);
    let _ = refresher.await;
    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

#[derive(Clone)]
struct AppState {
    service: Arc<PortfolioService>,
}

fn status_of(err: CoreError) -> StatusCode {
    match err {
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::AlreadyLocked(_) | CoreError::TokenMismatch(_) => StatusCode::FORBIDDEN,
        CoreError::LockRequired(_) | CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::StoreUnavailable(e) => {
            sentry_anyhow::capture_anyhow(&e);
            tracing::error!(error = %format!("{e:#}"), "store unavailable");
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

async fn get_all_stocks(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.service.snapshot(View::All))
}

async fn get_stocks_to_buy(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.service.snapshot(View::ToBuy))
}

async fn get_stocks_to_sell(State(state): State<AppState>) -> Json<Snapshot> {
    Json(state.service.snapshot(View::ToSell))
}

#[derive(Debug, Deserialize)]
struct RefreshParams {
    #[serde(default)]
    quick: bool,
}

async fn refresh(State(state): State<AppState>, Query(params): Query<RefreshParams>) -> StatusCode {
    state.service.force_refresh(params.quick);
    StatusCode::ACCEPTED
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    ticker: String,
}

async fn lock(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<serde_json::Value>, StatusCode> {
    let token = state
        .service
        .acquire_lock(&req.ticker)
        .await
        .map_err(status_of)?;
    Ok(Json(json!({ "lockKey": token })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyedRequest {
    ticker: String,
    lock_key: Option<i64>,
}

async fn unlock(
    State(state): State<AppState>,
    Json(req): Json<KeyedRequest>,
) -> Result<StatusCode, StatusCode> {
    let token = req.lock_key.ok_or(StatusCode::BAD_REQUEST)?;
    state
        .service
        .release_lock(&req.ticker, token)
        .await
        .map_err(status_of)?;
    Ok(StatusCode::OK)
}

async fn update_stock(
    State(state): State<AppState>,
    Json(update): Json<EntryUpdate>,
) -> Result<Json<PortfolioEntry>, StatusCode> {
    let entry = state
        .service
        .apply_update(&update, true)
        .await
        .map_err(status_of)?;
    Ok(Json(entry))
}

async fn delete_stock(
    State(state): State<AppState>,
    Json(req): Json<KeyedRequest>,
) -> Result<StatusCode, StatusCode> {
    state
        .service
        .delete_entry(&req.ticker, req.lock_key)
        .await
        .map_err(status_of)?;
    Ok(StatusCode::OK)
}

#[derive(Debug, Deserialize)]
struct TickerValueParams {
    ticker: String,
    currency: Option<String>,
}

async fn get_ticker_value(
    State(state): State<AppState>,
    Query(params): Query<TickerValueParams>,
) -> Result<Json<PriceInfo>, StatusCode> {
    let currency = params.currency.as_deref().unwrap_or("SEK");
    match state.service.ticker_value(&params.ticker, currency).await {
        Ok(info) => Ok(Json(info)),
        Err(PriceError::NotFound(_)) => Err(StatusCode::NOT_FOUND),
        Err(e @ PriceError::Upstream { .. }) => {
            tracing::warn!(error = %e, "ticker value lookup failed");
            Err(StatusCode::BAD_GATEWAY)
        }
    }
}

async fn get_first_change(State(state): State<AppState>) -> Json<Option<ChangeLogEntry>> {
    Json(state.service.take_first_change())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

fn init_sentry(settings: &tradingpal_core::config::Settings) -> Option<sentry::ClientInitGuard> {
    let dsn = settings.sentry_dsn.as_deref()?;
    Some(sentry::init((
        dsn,
        sentry::ClientOptions {
            release: sentry::release_name!(),
            ..Default::default()
        },
    )))
}
