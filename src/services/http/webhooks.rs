use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    Json,
};
use serde_json::json;
use tokio::sync::oneshot;

use crate::models::deposits::GatewayProvider;
use crate::services::deposits::{DepositServiceRequest, WebhookOutcome};

pub async fn nowpay_webhook(
    State(state): State<super::AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = header_value(&headers, "x-nowpay-sig");

    handle_webhook(state, GatewayProvider::Nowpay, signature, body).await
}

pub async fn cryptex_webhook(
    State(state): State<super::AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let signature = header_value(&headers, "sign");

    handle_webhook(state, GatewayProvider::Cryptex, signature, body).await
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(String::from)
}

async fn handle_webhook(
    state: super::AppState,
    provider: GatewayProvider,
    signature: Option<String>,
    body: Bytes,
) -> (StatusCode, Json<serde_json::Value>) {
    let payload: serde_json::Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(_) => {
            return (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Malformed payload"})),
            )
        }
    };

    let (webhook_tx, webhook_rx) = oneshot::channel();

    let tx_result = state
        .deposit_channel
        .send(DepositServiceRequest::GatewayWebhook {
            provider,
            payload,
            signature,
            response: webhook_tx,
        })
        .await;

    if let Err(e) = tx_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Failed to process request: {}", e)})),
        );
    }

    match webhook_rx.await {
        Ok(Ok(outcome)) => match outcome {
            WebhookOutcome::Processed { .. }
            | WebhookOutcome::UnknownPayment
            | WebhookOutcome::AlreadyExpired => {
                (StatusCode::OK, Json(json!({"success": true})))
            }
            WebhookOutcome::InvalidSignature => (
                StatusCode::UNAUTHORIZED,
                Json(json!({"error": "Invalid signature"})),
            ),
            WebhookOutcome::MalformedPayload => (
                StatusCode::BAD_REQUEST,
                Json(json!({"error": "Malformed payload"})),
            ),
        },
        Ok(Err(service_error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": service_error.to_string()})),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({"error": format!("Failed to receive response: {}", e)})),
        ),
    }
}
