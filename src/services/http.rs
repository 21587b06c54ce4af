use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::{mpsc, oneshot};
use tower_http::trace::TraceLayer;

use super::deposits::DepositServiceRequest;
use super::profiles::ProfileRequest;
use crate::models::deposits::NewDeposit;

mod profiles;
mod webhooks;

#[derive(Clone)]
struct AppState {
    deposit_channel: mpsc::Sender<DepositServiceRequest>,
    profile_channel: mpsc::Sender<ProfileRequest>,
}

#[derive(Serialize)]
struct DepositResponse {
    id: String,
    payment_id: String,
    pay_address: Option<String>,
    expires_at: DateTime<Utc>,
}

async fn request_new_deposit(
    State(state): State<AppState>,
    Json(req): Json<NewDeposit>,
) -> impl IntoResponse {
    let (deposit_tx, deposit_rx) = oneshot::channel();

    let tx_result = state
        .deposit_channel
        .send(DepositServiceRequest::NewDeposit {
            user_id: req.user_id,
            amount: req.amount,
            currency: req.currency,
            provider: req.provider,
            response: deposit_tx,
        })
        .await;

    if let Err(e) = tx_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to process request: {}", e)})),
        );
    }

    match deposit_rx.await {
        Ok(Ok(deposit)) => {
            let response = DepositResponse {
                id: deposit.id,
                payment_id: deposit.payment_id,
                pay_address: deposit.pay_address,
                expires_at: deposit.expires_at,
            };
            (StatusCode::CREATED, Json(json!(response)))
        }
        Ok(Err(_service_error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": "Internal server error."})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"description": format!("Failed to receive response: {}", e)})),
        ),
    }
}

pub async fn start_http_server(
    deposit_channel: mpsc::Sender<DepositServiceRequest>,
    profile_channel: mpsc::Sender<ProfileRequest>,
    listen: &str,
) -> Result<(), anyhow::Error> {
    let app_state = AppState {
        deposit_channel,
        profile_channel,
    };

    let app = Router::new()
        .route("/deposit", post(request_new_deposit))
        .route("/webhooks/nowpay", post(webhooks::nowpay_webhook))
        .route("/webhooks/cryptex", post(webhooks::cryptex_webhook))
        .route("/user", post(profiles::create_profile))
        .route("/user/{user_id}", get(profiles::get_profile))
        .route("/health", get(|| async { "OK" }))
        .with_state(app_state)
        .layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(listen).await?;
    println!("Listening on {}", listener.local_addr()?);

    axum::serve(listener, app).await?;

    Ok(())
}
