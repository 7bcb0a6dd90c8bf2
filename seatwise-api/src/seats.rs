use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::json;

use seatwise_core::lock::{SeatState, TripSeats};
use seatwise_checkout::LockResult;

use crate::error::AppError;
use crate::session::{AuthUser, SessionToken};
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/trips/{trip_id}/seats/status", get(seat_status))
        .route("/v1/checkout/lock", post(lock_seats))
        .route("/v1/checkout/release", post(release_seats))
}

#[derive(Debug, Deserialize)]
struct LockRequest {
    trips: Vec<TripSeats>,
    ttl_seconds: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct ReleaseRequest {
    trip_id: i64,
    seat_ids: Vec<i64>,
}

#[derive(Debug, Default, Deserialize)]
struct SeatStatusQuery {
    /// Comma-separated seat ids. Absent means every locked or booked seat.
    seat_ids: Option<String>,
}

async fn seat_status(
    State(state): State<AppState>,
    Path(trip_id): Path<i64>,
    Query(query): Query<SeatStatusQuery>,
) -> Result<Response, AppError> {
    let mut map = state.seat_flow.seat_map(trip_id).await?;

    let mut seats: Vec<(i64, SeatState)> = match query.seat_ids {
        // An explicit list gets an answer per requested seat, available
        // included.
        Some(raw) => raw
            .split(',')
            .filter_map(|s| s.trim().parse::<i64>().ok())
            .map(|seat_id| {
                let st = map.remove(&seat_id).unwrap_or(SeatState::Available);
                (seat_id, st)
            })
            .collect(),
        None => map.into_iter().collect(),
    };
    seats.sort_by_key(|(seat_id, _)| *seat_id);

    let seats: Vec<_> = seats
        .into_iter()
        .map(|(seat_id, st)| {
            let mut entry = serde_json::to_value(st).unwrap_or_default();
            entry["seat_id"] = json!(seat_id);
            entry
        })
        .collect();

    Ok(Json(json!({ "trip_id": trip_id, "seats": seats })).into_response())
}

async fn lock_seats(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    AuthUser(user_id): AuthUser,
    Json(req): Json<LockRequest>,
) -> Result<Response, AppError> {
    let result = state
        .seat_flow
        .lock(req.trips, &token, user_id, req.ttl_seconds)
        .await?;

    // Refusals come back as values so the client gets the offending seat
    // rather than a bare status code.
    let response = match result {
        LockResult::Granted {
            drafts,
            expires_at,
            ttl_seconds,
        } => (
            StatusCode::OK,
            Json(json!({
                "success": true,
                "lock_expires_at": expires_at,
                "ttl_seconds": ttl_seconds,
                "drafts": drafts,
            })),
        ),
        LockResult::SeatConflict { trip_id, seat_id } => (
            StatusCode::CONFLICT,
            Json(json!({
                "success": false,
                "code": "seat_conflict",
                "trip_id": trip_id,
                "seat_id": seat_id,
            })),
        ),
        LockResult::QuotaExceeded { trip_id, max } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "success": false,
                "code": "quota_exceeded",
                "trip_id": trip_id,
                "max": max,
            })),
        ),
    };
    Ok(response.into_response())
}

async fn release_seats(
    State(state): State<AppState>,
    SessionToken(token): SessionToken,
    Json(req): Json<ReleaseRequest>,
) -> Result<Response, AppError> {
    let outcome = state
        .seat_flow
        .release(req.trip_id, req.seat_ids, &token)
        .await?;
    Ok(Json(json!({
        "released": outcome.released,
        "failed": outcome.failed,
    }))
    .into_response())
}
