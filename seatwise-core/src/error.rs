use uuid::Uuid;

use crate::draft::DraftStatus;

/// Error taxonomy shared by every layer. Lock/release/renew report per-seat
/// results as structured outcome values instead; these variants cover the
/// cases where an operation as a whole cannot proceed.
#[derive(Debug, thiserror::Error)]
pub enum SeatFlowError {
    #[error("seat {seat_id} on trip {trip_id} is held or booked by another session")]
    Conflict { trip_id: i64, seat_id: i64 },

    #[error("session already holds the maximum of {max} seats for trip {trip_id}")]
    QuotaExceeded { trip_id: i64, max: u32 },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{0} not found")]
    NotFound(String),

    #[error("draft {draft_id} is {status}, cannot {action}")]
    InvalidState {
        draft_id: Uuid,
        status: DraftStatus,
        action: &'static str,
    },

    #[error("hold on seat {seat_id} for trip {trip_id} has lapsed")]
    HoldLapsed { trip_id: i64, seat_id: i64 },

    #[error("payment gateway error: {0}")]
    ExternalDependency(String),

    /// Affected-row-count mismatch or a similar broken guarantee during
    /// finalize. The surrounding transaction must roll back completely.
    #[error("invariant violation: {0}")]
    InvariantViolation(String),

    #[error("backend error: {0}")]
    Backend(String),
}

impl SeatFlowError {
    pub fn backend(err: impl std::fmt::Display) -> Self {
        Self::Backend(err.to_string())
    }

    /// True for the user-recoverable cases a client can act on directly.
    pub fn is_user_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Conflict { .. } | Self::QuotaExceeded { .. } | Self::HoldLapsed { .. }
        )
    }
}

pub type SeatFlowResult<T> = Result<T, SeatFlowError>;
