use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use seatwise_core::draft::DraftStatus;
use seatwise_core::SeatFlowError;

/// Transport-level error. Domain errors map onto the HTTP taxonomy here and
/// nowhere else; handlers just use `?`.
#[derive(Debug)]
pub enum AppError {
    Unauthorized(String),
    Domain(SeatFlowError),
}

impl From<SeatFlowError> for AppError {
    fn from(err: SeatFlowError) -> Self {
        Self::Domain(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            AppError::Unauthorized(msg) => (
                StatusCode::UNAUTHORIZED,
                json!({ "error": msg, "code": "unauthorized" }),
            ),
            AppError::Domain(err) => domain_response(err),
        };
        (status, Json(body)).into_response()
    }
}

fn domain_response(err: SeatFlowError) -> (StatusCode, serde_json::Value) {
    let message = err.to_string();
    match err {
        SeatFlowError::Conflict { trip_id, seat_id } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "code": "seat_conflict",
                "trip_id": trip_id,
                "seat_id": seat_id,
            }),
        ),
        SeatFlowError::QuotaExceeded { trip_id, max } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            json!({
                "error": message,
                "code": "quota_exceeded",
                "trip_id": trip_id,
                "max": max,
            }),
        ),
        SeatFlowError::Validation(msg) => (
            StatusCode::BAD_REQUEST,
            json!({ "error": msg, "code": "validation" }),
        ),
        SeatFlowError::NotFound(_) => (
            StatusCode::NOT_FOUND,
            json!({ "error": message, "code": "not_found" }),
        ),
        SeatFlowError::InvalidState { status, .. } => {
            // Expired drafts get their own code so clients can distinguish
            // "too late, start over" from other state conflicts.
            let code = if status == DraftStatus::Expired {
                "draft_expired"
            } else {
                "invalid_state"
            };
            (
                StatusCode::CONFLICT,
                json!({ "error": message, "code": code, "status": status }),
            )
        }
        SeatFlowError::HoldLapsed { trip_id, seat_id } => (
            StatusCode::CONFLICT,
            json!({
                "error": message,
                "code": "hold_lapsed",
                "trip_id": trip_id,
                "seat_id": seat_id,
            }),
        ),
        SeatFlowError::ExternalDependency(msg) => {
            tracing::error!("upstream dependency failure: {}", msg);
            (
                StatusCode::BAD_GATEWAY,
                json!({ "error": "upstream dependency failure", "code": "upstream" }),
            )
        }
        SeatFlowError::InvariantViolation(msg) => {
            tracing::error!("invariant violation: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal server error", "code": "internal" }),
            )
        }
        SeatFlowError::Backend(msg) => {
            tracing::error!("backend error: {}", msg);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "error": "internal server error", "code": "internal" }),
            )
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn status_of(err: SeatFlowError) -> StatusCode {
        domain_response(err).0
    }

    #[test]
    fn taxonomy_maps_to_expected_status_codes() {
        assert_eq!(
            status_of(SeatFlowError::Conflict {
                trip_id: 1,
                seat_id: 2
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SeatFlowError::QuotaExceeded { trip_id: 1, max: 6 }),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            status_of(SeatFlowError::Validation("bad".into())),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            status_of(SeatFlowError::NotFound("draft x".into())),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(SeatFlowError::HoldLapsed {
                trip_id: 1,
                seat_id: 2
            }),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SeatFlowError::ExternalDependency("gw".into())),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            status_of(SeatFlowError::InvariantViolation("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            status_of(SeatFlowError::Backend("x".into())),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn expired_draft_gets_a_distinct_code() {
        let (status, body) = domain_response(SeatFlowError::InvalidState {
            draft_id: Uuid::new_v4(),
            status: DraftStatus::Expired,
            action: "pay",
        });
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["code"], "draft_expired");

        let (_, body) = domain_response(SeatFlowError::InvalidState {
            draft_id: Uuid::new_v4(),
            status: DraftStatus::Cancelled,
            action: "pay",
        });
        assert_eq!(body["code"], "invalid_state");
    }

    #[test]
    fn internal_errors_hide_details_from_the_body() {
        let (_, body) = domain_response(SeatFlowError::Backend("connection refused".into()));
        assert_eq!(body["error"], "internal server error");
    }
}
