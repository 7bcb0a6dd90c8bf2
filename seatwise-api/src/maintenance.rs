use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use chrono::Utc;
use serde_json::json;

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/maintenance/sweep", post(sweep))
}

/// On-demand run of the overdue-draft sweep, for operators and tests. The
/// background sweeper runs the same code on a timer.
async fn sweep(State(state): State<AppState>) -> Result<Response, AppError> {
    let expired = state.drafts.sweep_expired(Utc::now()).await?;
    Ok(Json(json!({ "expired": expired })).into_response())
}
