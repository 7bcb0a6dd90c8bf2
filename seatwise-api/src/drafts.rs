use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post, put};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;
use uuid::Uuid;

use seatwise_core::draft::{DraftPatch, PaymentProvider};
use seatwise_checkout::PaymentSelection;

use crate::error::AppError;
use crate::session::SessionToken;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route(
            "/v1/drafts/{draft_id}",
            get(get_draft).patch(patch_draft).delete(cancel_draft),
        )
        .route("/v1/drafts/{draft_id}/extend", post(extend_draft))
        .route("/v1/drafts/{draft_id}/payment", put(select_payment))
}

async fn get_draft(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(draft_id): Path<Uuid>,
) -> Result<Response, AppError> {
    let draft = state.drafts.get(draft_id, &token).await?;
    Ok(Json(draft).into_response())
}

async fn patch_draft(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(draft_id): Path<Uuid>,
    Json(patch): Json<DraftPatch>,
) -> Result<Response, AppError> {
    let draft = state.drafts.patch(draft_id, &token, &patch).await?;
    Ok(Json(draft).into_response())
}

#[derive(Debug, Deserialize)]
struct ExtendRequest {
    extra_seconds: u64,
}

async fn extend_draft(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(draft_id): Path<Uuid>,
    Json(req): Json<ExtendRequest>,
) -> Result<Response, AppError> {
    let draft = state
        .drafts
        .extend(draft_id, &token, req.extra_seconds)
        .await?;
    Ok(Json(draft).into_response())
}

async fn cancel_draft(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(draft_id): Path<Uuid>,
) -> Result<Response, AppError> {
    state.drafts.cancel(draft_id, &token).await?;
    Ok(Json(json!({ "cancelled": true })).into_response())
}

#[derive(Debug, Deserialize)]
struct SelectPaymentRequest {
    provider: PaymentProvider,
}

async fn select_payment(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Path(draft_id): Path<Uuid>,
    Json(req): Json<SelectPaymentRequest>,
) -> Result<Response, AppError> {
    let selection = state
        .payments
        .select_payment(draft_id, &token, req.provider)
        .await?;

    let body = match selection {
        PaymentSelection::Completed { booking } => json!({
            "status": "paid",
            "booking": booking,
        }),
        PaymentSelection::GatewayPending {
            order_code,
            expires_at,
        } => json!({
            "status": "paying",
            "order_code": order_code,
            "expires_at": expires_at,
        }),
    };
    Ok(Json(body).into_response())
}
