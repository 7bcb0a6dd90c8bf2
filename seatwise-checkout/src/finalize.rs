use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde_json::json;
use sqlx::{Postgres, Transaction};
use tracing::{info, warn};
use uuid::Uuid;

use seatwise_core::booking::{Booking, BookingItem};
use seatwise_core::draft::DraftCheckout;
use seatwise_core::lock::SeatLockStore;
use seatwise_core::{SeatFlowError, SeatFlowResult};
use seatwise_store::booking_repo::BookingRepository;
use seatwise_store::draft_repo::DraftRepository;
use seatwise_store::events::TOPIC_BOOKING_CONFIRMED;
use seatwise_store::EventProducer;

const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
const CODE_LEN: usize = 6;
const CODE_ATTEMPTS: usize = 5;

/// Converts a paid-for draft into a durable booking. The critical section
/// runs inside the caller's transaction so the payment-path row lock on the
/// draft covers the whole conversion.
pub struct BookingService {
    store: Arc<dyn SeatLockStore>,
    producer: Arc<EventProducer>,
}

impl BookingService {
    pub fn new(store: Arc<dyn SeatLockStore>, producer: Arc<EventProducer>) -> Self {
        Self { store, producer }
    }

    /// Finalize a draft into a booking within `tx`. Re-asserts every seat
    /// hold first, then inserts the booking and flips the durable seat
    /// markers. A marker that was already booked aborts the whole
    /// transaction; partial sales must be impossible.
    pub async fn finalize_in_tx(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        draft: &DraftCheckout,
        now: DateTime<Utc>,
    ) -> SeatFlowResult<Booking> {
        if draft.items.is_empty() {
            return Err(SeatFlowError::Validation(format!(
                "draft {} has no seats to finalize",
                draft.id
            )));
        }

        let seat_ids = draft.seat_ids();
        self.store
            .assert_owned(draft.trip_id, &seat_ids, &draft.session_token)
            .await?;

        let code = Self::unique_code(tx).await?;
        let booking = Booking {
            id: Uuid::new_v4(),
            code,
            trip_id: draft.trip_id,
            user_id: draft.user_id,
            coupon_id: draft.coupon_id,
            total_price: draft.total_price,
            discount_amount: draft.discount_amount,
            origin_location_id: draft.pickup_location_id,
            destination_location_id: draft.dropoff_location_id,
            pickup_address: draft.pickup_address.clone(),
            dropoff_address: draft.dropoff_address.clone(),
            payment_intent_id: draft.payment_intent_id.clone(),
            paid_at: now,
            items: draft
                .items
                .iter()
                .map(|i| BookingItem {
                    seat_id: i.seat_id,
                    price: i.price,
                    seat_label: i.seat_label.clone(),
                })
                .collect(),
        };

        BookingRepository::insert_booking(tx, &booking)
            .await
            .map_err(SeatFlowError::backend)?;

        BookingRepository::seed_markers(tx, draft.trip_id, &seat_ids)
            .await
            .map_err(SeatFlowError::backend)?;
        let flipped =
            BookingRepository::mark_booked(tx, draft.trip_id, &seat_ids, draft.user_id, now)
                .await
                .map_err(SeatFlowError::backend)?;
        if flipped != seat_ids.len() as u64 {
            return Err(SeatFlowError::InvariantViolation(format!(
                "expected to book {} seats on trip {}, flipped {}",
                seat_ids.len(),
                draft.trip_id,
                flipped
            )));
        }

        DraftRepository::mark_paid(tx, draft.id, booking.id, now)
            .await
            .map_err(SeatFlowError::backend)?;

        Ok(booking)
    }

    /// Cleanup after the finalize transaction committed: drop the now-moot
    /// holds and announce the sale. Both are best-effort; the booking already
    /// exists durably.
    pub async fn post_commit(&self, booking: &Booking, session_token: &str) {
        let seat_ids: Vec<i64> = booking.items.iter().map(|i| i.seat_id).collect();
        if let Err(e) = self
            .store
            .release_after_booked(booking.trip_id, &seat_ids, session_token)
            .await
        {
            warn!(booking = %booking.code, error = %e, "failed to clear holds after booking");
        }

        let payload = json!({
            "booking_id": booking.id,
            "code": booking.code,
            "trip_id": booking.trip_id,
            "seat_ids": seat_ids,
            "total_price": booking.total_price,
        })
        .to_string();
        if let Err(e) = self
            .producer
            .publish(TOPIC_BOOKING_CONFIRMED, &booking.code, &payload)
            .await
        {
            warn!(booking = %booking.code, error = %e, "failed to publish booking.confirmed");
        }
        info!(booking = %booking.code, trip_id = booking.trip_id, "booking confirmed");
    }

    /// Short human-readable code, collision-checked against existing rows.
    /// After a handful of misses a uuid fragment guarantees uniqueness.
    async fn unique_code(tx: &mut Transaction<'_, Postgres>) -> SeatFlowResult<String> {
        for _ in 0..CODE_ATTEMPTS {
            let code = Self::random_code();
            if !BookingRepository::code_exists(tx, &code)
                .await
                .map_err(SeatFlowError::backend)?
            {
                return Ok(code);
            }
        }
        Ok(format!("BK{}", Uuid::new_v4().simple()))
    }

    fn random_code() -> String {
        let mut rng = rand::thread_rng();
        let suffix: String = (0..CODE_LEN)
            .map(|_| CODE_ALPHABET[rng.gen_range(0..CODE_ALPHABET.len())] as char)
            .collect();
        format!("BK{suffix}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn random_codes_use_the_restricted_alphabet() {
        for _ in 0..50 {
            let code = BookingService::random_code();
            assert_eq!(code.len(), 2 + CODE_LEN);
            assert!(code.starts_with("BK"));
            assert!(code[2..].bytes().all(|b| CODE_ALPHABET.contains(&b)));
        }
    }
}
