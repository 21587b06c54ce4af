use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tokio::sync::oneshot;

use crate::models::profiles::NewProfile;
use crate::services::profiles::ProfileRequest;

pub async fn create_profile(
    State(state): State<super::AppState>,
    Json(req): Json<NewProfile>,
) -> impl IntoResponse {
    let (profile_tx, profile_rx) = oneshot::channel();

    let tx_result = state
        .profile_channel
        .send(ProfileRequest::CreateProfile {
            user_id: req.user_id,
            response: profile_tx,
        })
        .await;

    if let Err(e) = tx_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "details": e.to_string()
            })),
        );
    }

    match profile_rx.await {
        Ok(Ok(profile)) => (
            StatusCode::CREATED,
            Json(json!({
                "id": profile.id,
                "user_id": profile.user_id,
                "balance": profile.balance
            })),
        ),
        Ok(Err(service_error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Database error",
                "details": service_error.to_string()
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "details": e.to_string()
            })),
        ),
    }
}

pub async fn get_profile(
    State(state): State<super::AppState>,
    Path(user_id): Path<String>,
) -> impl IntoResponse {
    let (profile_tx, profile_rx) = oneshot::channel();

    let tx_result = state
        .profile_channel
        .send(ProfileRequest::GetProfile {
            user_id,
            response: profile_tx,
        })
        .await;

    if let Err(e) = tx_result {
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "details": e.to_string()
            })),
        );
    }

    match profile_rx.await {
        Ok(Ok(Some(profile))) => (
            StatusCode::OK,
            Json(json!({
                "user_id": profile.user_id,
                "balance": profile.balance,
                "created_at": profile.created_at
            })),
        ),
        Ok(Ok(None)) => (
            StatusCode::NOT_FOUND,
            Json(json!({"error": "User not found"})),
        ),
        Ok(Err(service_error)) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Database error",
                "details": service_error.to_string()
            })),
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({
                "error": "Internal server error",
                "details": e.to_string()
            })),
        ),
    }
}
