use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use seatwise_core::booking::{Booking, BookingItem};

pub struct BookingRepository;

impl BookingRepository {
    /// Seats of a trip already durably sold, out of the given candidates.
    pub async fn booked_seats(
        pool: &PgPool,
        trip_id: i64,
        seat_ids: &[i64],
    ) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT seat_id FROM trip_seat_statuses \
             WHERE trip_id = $1 AND seat_id = ANY($2) AND is_booked = TRUE",
        )
        .bind(trip_id)
        .bind(seat_ids)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Every booked seat of a trip, for the seat-map overlay.
    pub async fn all_booked_seats(pool: &PgPool, trip_id: i64) -> Result<Vec<i64>, sqlx::Error> {
        let rows: Vec<(i64,)> = sqlx::query_as(
            "SELECT seat_id FROM trip_seat_statuses WHERE trip_id = $1 AND is_booked = TRUE",
        )
        .bind(trip_id)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|r| r.0).collect())
    }

    /// Seed marker rows so the unique (trip_id, seat_id) constraint has a row
    /// to bite on, then leave flipping to `mark_booked`.
    pub async fn seed_markers(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: i64,
        seat_ids: &[i64],
    ) -> Result<(), sqlx::Error> {
        for &seat_id in seat_ids {
            sqlx::query(
                "INSERT INTO trip_seat_statuses (trip_id, seat_id, is_booked) \
                 VALUES ($1, $2, FALSE) \
                 ON CONFLICT (trip_id, seat_id) DO NOTHING",
            )
            .bind(trip_id)
            .bind(seat_id)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Flip markers to booked, only where not already booked. Returns the
    /// affected-row count; the caller compares it to the requested seat count
    /// and aborts the transaction on a mismatch.
    pub async fn mark_booked(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: i64,
        seat_ids: &[i64],
        booked_by: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE trip_seat_statuses \
             SET is_booked = TRUE, booked_by = $3, booked_at = $4, updated_at = NOW() \
             WHERE trip_id = $1 AND seat_id = ANY($2) AND is_booked = FALSE",
        )
        .bind(trip_id)
        .bind(seat_ids)
        .bind(booked_by)
        .bind(now)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn code_exists(
        tx: &mut Transaction<'_, Postgres>,
        code: &str,
    ) -> Result<bool, sqlx::Error> {
        // EXISTS always yields exactly one BOOL row, so the decode type is
        // fixed whether or not the code collides.
        let (exists,): (bool,) =
            sqlx::query_as("SELECT EXISTS(SELECT 1 FROM bookings WHERE code = $1)")
                .bind(code)
                .fetch_one(&mut **tx)
                .await?;
        Ok(exists)
    }

    pub async fn insert_booking(
        tx: &mut Transaction<'_, Postgres>,
        booking: &Booking,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO bookings (id, code, trip_id, user_id, coupon_id, total_price, \
                 discount_amount, status, origin_location_id, destination_location_id, \
                 pickup_address, dropoff_address, payment_intent_id, paid_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, 'paid', $8, $9, $10, $11, $12, $13)",
        )
        .bind(booking.id)
        .bind(&booking.code)
        .bind(booking.trip_id)
        .bind(booking.user_id)
        .bind(booking.coupon_id)
        .bind(booking.total_price)
        .bind(booking.discount_amount)
        .bind(booking.origin_location_id)
        .bind(booking.destination_location_id)
        .bind(&booking.pickup_address)
        .bind(&booking.dropoff_address)
        .bind(&booking.payment_intent_id)
        .bind(booking.paid_at)
        .execute(&mut **tx)
        .await?;

        for item in &booking.items {
            sqlx::query(
                "INSERT INTO booking_items (booking_id, seat_id, price, seat_label) \
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(booking.id)
            .bind(item.seat_id)
            .bind(item.price)
            .bind(&item.seat_label)
            .execute(&mut **tx)
            .await?;
        }
        Ok(())
    }

    /// Unit fare for a trip. Fare algorithms are out of scope; this is the
    /// single price lookup the draft snapshot freezes.
    pub async fn trip_unit_price(pool: &PgPool, trip_id: i64) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> =
            sqlx::query_as("SELECT unit_price FROM trips WHERE id = $1")
                .bind(trip_id)
                .fetch_optional(pool)
                .await?;
        Ok(row.map(|r| r.0))
    }

    pub async fn seat_labels(
        pool: &PgPool,
        seat_ids: &[i64],
    ) -> Result<Vec<(i64, String)>, sqlx::Error> {
        sqlx::query_as("SELECT id, label FROM seats WHERE id = ANY($1)")
            .bind(seat_ids)
            .fetch_all(pool)
            .await
    }

    pub async fn fetch_items(
        pool: &PgPool,
        booking_id: Uuid,
    ) -> Result<Vec<BookingItem>, sqlx::Error> {
        let rows: Vec<(i64, i64, String)> = sqlx::query_as(
            "SELECT seat_id, price, seat_label FROM booking_items \
             WHERE booking_id = $1 ORDER BY seat_id",
        )
        .bind(booking_id)
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(seat_id, price, seat_label)| BookingItem {
                seat_id,
                price,
                seat_label,
            })
            .collect())
    }
}
