use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    routing::{get, post},
};
use chrono::Utc;
use serde_json::{Value, json};
use tracing::{info, warn};

use giveline_core::error::CoreError;
use giveline_core::fees::FeeConfig;
use giveline_core::storage::Store;
use giveline_engine::{
    DecisionEngine, ProviderEvent, RefundSweeper, SettlementEngine, begin_checkout,
};
use giveline_platform::{
    CreateDonationRequest, CreateDonationResponse, DecisionView, RedisBus, ServiceConfig,
    SubmitDecisionRequest, VerifyDonationRequest, connect_database,
};
use giveline_provider::{HttpPaymentProvider, signature};
use giveline_store::PgStore;

const SIGNATURE_HEADER: &str = "x-giveline-signature";

#[derive(Clone)]
struct AppState {
    store: Arc<dyn Store>,
    settlement: SettlementEngine,
    decisions: DecisionEngine,
    sweeper: Arc<RefundSweeper>,
    fee_config: FeeConfig,
    webhook_secret: String,
    scheduler_secret: String,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "giveline_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let fee_config = config.fee_config()?;
    let pool = connect_database(&config.database_url).await?;
    let pg = PgStore::new(pool);
    pg.migrate().await?;
    let store: Arc<dyn Store> = Arc::new(pg);

    let redis = RedisBus::connect(&config.redis_url)?;
    let dispatcher = Arc::new(redis);
    let provider = Arc::new(
        HttpPaymentProvider::new(&config.provider_api_url, &config.provider_secret_key)
            .map_err(|err| anyhow::anyhow!("provider client init failed: {err}"))?,
    );

    let settlement = SettlementEngine::new(store.clone(), provider.clone(), dispatcher.clone());
    let decisions = DecisionEngine::new(store.clone(), provider.clone(), dispatcher.clone());
    let sweeper = Arc::new(RefundSweeper::new(
        store.clone(),
        dispatcher,
        decisions.clone(),
        config.decision_window(),
        config.refund_grace_period(),
    ));

    let state = AppState {
        store,
        settlement,
        decisions,
        sweeper,
        fee_config,
        webhook_secret: config.webhook_secret.clone(),
        scheduler_secret: config.scheduler_secret.clone(),
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/donations", post(create_donation))
        .route("/donations/verify", post(verify_donation))
        .route("/webhooks/payments", post(handle_payment_webhook))
        .route("/refunds/decisions", post(submit_refund_decision))
        .route("/jobs/refund-sweep", post(run_refund_sweep))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn create_donation(
    State(state): State<AppState>,
    Json(payload): Json<CreateDonationRequest>,
) -> Result<Json<CreateDonationResponse>, (StatusCode, String)> {
    let (donation, session) = begin_checkout(
        state.store.as_ref(),
        &state.fee_config,
        payload.campaign_id,
        payload.donor_id,
        payload.amount,
        &payload.currency,
        &payload.provider_source_id,
    )
    .await
    .map_err(error_response)?;

    Ok(Json(CreateDonationResponse {
        donation_id: donation.id,
        session_id: session.id,
        fees: session.fees,
    }))
}

async fn verify_donation(
    State(state): State<AppState>,
    Json(payload): Json<VerifyDonationRequest>,
) -> Result<Json<giveline_engine::VerifyResponse>, (StatusCode, String)> {
    let response = state
        .settlement
        .verify(payload.donation_id)
        .await
        .map_err(error_response)?;
    Ok(Json(response))
}

/// Raw-body handler: the signature covers the exact bytes on the wire, so
/// the payload is verified before any JSON parsing.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<Value>, (StatusCode, String)> {
    let presented = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok())
        .ok_or((
            StatusCode::UNAUTHORIZED,
            "missing webhook signature".to_string(),
        ))?;
    if !signature::verify(&state.webhook_secret, &body, presented) {
        warn!("webhook rejected: signature mismatch");
        return Err((
            StatusCode::UNAUTHORIZED,
            "invalid webhook signature".to_string(),
        ));
    }

    let raw: Value = serde_json::from_slice(&body)
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("malformed payload: {err}")))?;
    let event: ProviderEvent = serde_json::from_value(raw.clone())
        .map_err(|err| (StatusCode::BAD_REQUEST, format!("malformed event: {err}")))?;

    let outcome = state
        .settlement
        .handle_provider_event(&event, raw)
        .await
        .map_err(error_response)?;

    Ok(Json(json!({
        "received": true,
        "duplicate": outcome == giveline_engine::WebhookOutcome::Duplicate,
        "message": outcome.message(),
    })))
}

async fn submit_refund_decision(
    State(state): State<AppState>,
    Json(payload): Json<SubmitDecisionRequest>,
) -> Result<Json<DecisionView>, (StatusCode, String)> {
    let decision = state
        .decisions
        .submit_decision(
            payload.decision_id,
            payload.donor_id,
            payload.decision_type,
            payload.redirect_campaign_id,
        )
        .await
        .map_err(error_response)?;
    Ok(Json(decision.into()))
}

async fn run_refund_sweep(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<giveline_engine::SweepSummary>, (StatusCode, String)> {
    let authorized = headers
        .get(axum::http::header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .is_some_and(|token| token == state.scheduler_secret);
    if !authorized {
        return Err((
            StatusCode::FORBIDDEN,
            "scheduler credential required".to_string(),
        ));
    }

    let summary = state
        .sweeper
        .run(Utc::now())
        .await
        .map_err(error_response)?;
    Ok(Json(summary))
}

fn error_response(err: CoreError) -> (StatusCode, String) {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::Forbidden(_) => StatusCode::FORBIDDEN,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Provider { .. } => StatusCode::BAD_GATEWAY,
        CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}
