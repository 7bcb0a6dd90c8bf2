use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::{info, warn};

use seatwise_core::draft::DraftCheckout;
use seatwise_core::lock::{LockOutcome, ReleaseOutcome, SeatLockStore, SeatState, TripSeats};
use seatwise_core::{SeatFlowError, SeatFlowResult};
use seatwise_store::app_config::BusinessRules;
use seatwise_store::booking_repo::BookingRepository;
use seatwise_store::events::TOPIC_SEAT_RELEASED;
use seatwise_store::{DbClient, EventProducer};

use crate::drafts::DraftCheckoutService;

const MIN_HOLD_SECONDS: u64 = 30;
const MAX_HOLD_SECONDS: u64 = 1800;

/// Outcome of a lock attempt. Refusals are ordinary values so the transport
/// layer can render seat-level detail without unwinding through errors.
#[derive(Debug)]
pub enum LockResult {
    Granted {
        drafts: Vec<DraftCheckout>,
        expires_at: DateTime<Utc>,
        ttl_seconds: u64,
    },
    SeatConflict {
        trip_id: i64,
        seat_id: i64,
    },
    QuotaExceeded {
        trip_id: i64,
        max: u32,
    },
}

/// Front door of the reservation flow: acquires and releases seat holds and
/// keeps the draft aggregates in sync with what the lock store granted.
pub struct SeatFlowService {
    db: DbClient,
    store: Arc<dyn SeatLockStore>,
    drafts: Arc<DraftCheckoutService>,
    producer: Arc<EventProducer>,
    rules: BusinessRules,
}

impl SeatFlowService {
    pub fn new(
        db: DbClient,
        store: Arc<dyn SeatLockStore>,
        drafts: Arc<DraftCheckoutService>,
        producer: Arc<EventProducer>,
        rules: BusinessRules,
    ) -> Self {
        Self {
            db,
            store,
            drafts,
            producer,
            rules,
        }
    }

    /// Acquire every requested seat across every trip, or nothing. On success
    /// each trip gets an open draft resynced to exactly the granted seats.
    pub async fn lock(
        &self,
        mut trips: Vec<TripSeats>,
        session_token: &str,
        user_id: Option<i64>,
        ttl_override: Option<u64>,
    ) -> SeatFlowResult<LockResult> {
        for trip in &mut trips {
            trip.normalize();
        }
        trips.retain(|t| !t.seat_ids.is_empty());
        if trips.is_empty() {
            return Err(SeatFlowError::Validation(
                "at least one seat must be requested".into(),
            ));
        }

        let ttl = ttl_override
            .unwrap_or(self.rules.seat_hold_seconds)
            .clamp(MIN_HOLD_SECONDS, MAX_HOLD_SECONDS);

        // Durably sold seats never reach the lock store; refuse up front so a
        // stale client sees the booked seat named.
        for trip in &trips {
            let sold =
                BookingRepository::booked_seats(&self.db.pool, trip.trip_id, &trip.seat_ids)
                    .await
                    .map_err(SeatFlowError::backend)?;
            if let Some(&seat_id) = sold.first() {
                return Ok(LockResult::SeatConflict {
                    trip_id: trip.trip_id,
                    seat_id,
                });
            }
        }

        let outcome = self
            .store
            .lock_all(&trips, session_token, ttl, self.rules.max_seats_per_session)
            .await?;

        match outcome {
            LockOutcome::Acquired { expires_at } => {
                let mut drafts = Vec::with_capacity(trips.len());
                for trip in &trips {
                    let draft = self
                        .drafts
                        .start_from_locked_seats(
                            trip.trip_id,
                            &trip.seat_ids,
                            session_token,
                            user_id,
                            ttl,
                        )
                        .await?;
                    drafts.push(draft);
                }
                info!(
                    trips = trips.len(),
                    ttl_seconds = ttl,
                    "seat lock granted"
                );
                Ok(LockResult::Granted {
                    drafts,
                    expires_at,
                    ttl_seconds: ttl,
                })
            }
            LockOutcome::SeatConflict { trip_id, seat_id } => {
                Ok(LockResult::SeatConflict { trip_id, seat_id })
            }
            LockOutcome::QuotaExceeded { trip_id, max } => {
                Ok(LockResult::QuotaExceeded { trip_id, max })
            }
        }
    }

    /// Voluntarily drop holds. Foreign or lapsed seats are reported back in
    /// `failed`, never errored.
    pub async fn release(
        &self,
        trip_id: i64,
        seat_ids: Vec<i64>,
        session_token: &str,
    ) -> SeatFlowResult<ReleaseOutcome> {
        let mut wrapper = TripSeats {
            trip_id,
            seat_ids,
            leg: None,
        };
        wrapper.normalize();
        if wrapper.seat_ids.is_empty() {
            return Ok(ReleaseOutcome::default());
        }

        let outcome = self
            .store
            .release(trip_id, &wrapper.seat_ids, session_token)
            .await?;

        if !outcome.released.is_empty() {
            self.publish_released(trip_id, &outcome.released).await;
        }
        Ok(outcome)
    }

    /// Seat states for a trip: the durable booked overlay merged with live
    /// holds and their remaining TTLs. Seats absent from both are available.
    pub async fn seat_map(&self, trip_id: i64) -> SeatFlowResult<HashMap<i64, SeatState>> {
        let booked = BookingRepository::all_booked_seats(&self.db.pool, trip_id)
            .await
            .map_err(SeatFlowError::backend)?;
        let ttls = self.store.locked_ttls(trip_id).await?;

        let mut map = HashMap::with_capacity(booked.len() + ttls.len());
        for (seat_id, ttl_remaining) in ttls {
            map.insert(seat_id, SeatState::Locked { ttl_remaining });
        }
        // Booked wins when a stale lock entry still shadows a sold seat.
        for seat_id in booked {
            map.insert(seat_id, SeatState::Booked);
        }
        Ok(map)
    }

    async fn publish_released(&self, trip_id: i64, seat_ids: &[i64]) {
        let payload = json!({ "trip_id": trip_id, "seat_ids": seat_ids }).to_string();
        if let Err(e) = self
            .producer
            .publish(TOPIC_SEAT_RELEASED, &trip_id.to_string(), &payload)
            .await
        {
            warn!(trip_id, error = %e, "failed to publish seat.released");
        }
    }
}
