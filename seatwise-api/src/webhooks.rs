use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use serde_json::{json, Value};
use tracing::{info, warn};

use seatwise_core::payment;
use seatwise_checkout::WebhookDisposition;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payment", post(payment_webhook))
}

/// Gateway callback. Signature failures are the only 4xx; every recognized
/// delivery is acknowledged with 200 so the gateway stops retrying, and the
/// body says what the reconciliation did.
async fn payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<Value>,
) -> Result<Response, AppError> {
    if !state.verifier.verify(&payload) {
        warn!("rejected webhook with bad signature");
        return Ok((
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "error": "invalid signature" })),
        )
            .into_response());
    }

    let Some(event) = payment::normalize(&payload) else {
        // No order identifier anywhere in the payload. Ack it; retrying
        // cannot make it matchable.
        info!("acknowledged webhook without order code");
        return Ok(Json(json!({ "ok": true, "result": "unmatched" })).into_response());
    };

    let disposition = match state.payments.handle_event(&event).await {
        Ok(d) => d,
        // A lapsed hold at finalize time is a domain outcome, not a delivery
        // problem; ack so the gateway does not hammer us with retries.
        Err(e) if e.is_user_recoverable() => {
            warn!(order_code = %event.order_code, error = %e, "webhook finalize refused");
            return Ok(
                Json(json!({ "ok": false, "result": "refused", "error": e.to_string() }))
                    .into_response(),
            );
        }
        Err(e) => return Err(e.into()),
    };

    let body = match disposition {
        WebhookDisposition::Completed { booking_id } => {
            json!({ "ok": true, "result": "completed", "booking_id": booking_id })
        }
        WebhookDisposition::Replayed { booking_id } => {
            json!({ "ok": true, "result": "replayed", "booking_id": booking_id })
        }
        WebhookDisposition::Released { draft_id } => {
            json!({ "ok": true, "result": "released", "draft_id": draft_id })
        }
        WebhookDisposition::Ignored { reason } => {
            json!({ "ok": true, "result": "ignored", "reason": reason })
        }
    };
    Ok(Json(body).into_response())
}
