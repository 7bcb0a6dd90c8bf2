use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use seatwise_core::draft::{DraftCheckout, DraftItem, DraftPatch, DraftStatus, PaymentProvider};

/// Raw row shape; conversion to the domain aggregate attaches items and
/// parses enums.
#[derive(sqlx::FromRow)]
pub struct DraftRow {
    pub id: Uuid,
    pub trip_id: i64,
    pub session_token: String,
    pub user_id: Option<i64>,
    pub status: String,
    pub total_price: i64,
    pub discount_amount: i64,
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub passenger_email: Option<String>,
    pub pickup_location_id: Option<i64>,
    pub dropoff_location_id: Option<i64>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub coupon_id: Option<i64>,
    pub notes: Option<String>,
    pub payment_provider: Option<String>,
    pub payment_intent_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub booking_id: Option<Uuid>,
}

#[derive(sqlx::FromRow)]
struct ItemRow {
    seat_id: i64,
    price: i64,
    seat_label: String,
}

impl DraftRow {
    pub fn into_draft(self, items: Vec<DraftItem>) -> DraftCheckout {
        DraftCheckout {
            id: self.id,
            trip_id: self.trip_id,
            session_token: self.session_token,
            user_id: self.user_id,
            // Unknown strings cannot appear: the column is written only from
            // DraftStatus::as_str.
            status: DraftStatus::parse(&self.status).unwrap_or(DraftStatus::Expired),
            total_price: self.total_price,
            discount_amount: self.discount_amount,
            passenger_name: self.passenger_name,
            passenger_phone: self.passenger_phone,
            passenger_email: self.passenger_email,
            pickup_location_id: self.pickup_location_id,
            dropoff_location_id: self.dropoff_location_id,
            pickup_address: self.pickup_address,
            dropoff_address: self.dropoff_address,
            coupon_id: self.coupon_id,
            notes: self.notes,
            payment_provider: self.payment_provider.as_deref().and_then(PaymentProvider::parse),
            payment_intent_id: self.payment_intent_id,
            expires_at: self.expires_at,
            completed_at: self.completed_at,
            booking_id: self.booking_id,
            items,
        }
    }
}

const DRAFT_COLUMNS: &str = "id, trip_id, session_token, user_id, status, total_price, \
     discount_amount, passenger_name, passenger_phone, passenger_email, \
     pickup_location_id, dropoff_location_id, pickup_address, dropoff_address, \
     coupon_id, notes, payment_provider, payment_intent_id, expires_at, \
     completed_at, booking_id";

pub struct DraftRepository;

impl DraftRepository {
    /// The open draft for (trip, session), row-locked for the rest of the
    /// transaction. At most one can exist.
    pub async fn find_open_for_update(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: i64,
        session_token: &str,
    ) -> Result<Option<DraftRow>, sqlx::Error> {
        sqlx::query_as::<_, DraftRow>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_checkouts \
             WHERE trip_id = $1 AND session_token = $2 AND status IN ('pending', 'paying') \
             FOR UPDATE"
        ))
        .bind(trip_id)
        .bind(session_token)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn insert(
        tx: &mut Transaction<'_, Postgres>,
        trip_id: i64,
        session_token: &str,
        user_id: Option<i64>,
        expires_at: DateTime<Utc>,
    ) -> Result<DraftRow, sqlx::Error> {
        sqlx::query_as::<_, DraftRow>(&format!(
            "INSERT INTO draft_checkouts (id, trip_id, session_token, user_id, status, \
                 total_price, discount_amount, expires_at) \
             VALUES ($1, $2, $3, $4, 'pending', 0, 0, $5) \
             RETURNING {DRAFT_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(trip_id)
        .bind(session_token)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&mut **tx)
        .await
    }

    /// Resync totals and expiry on an existing open draft. user_id is only
    /// filled in, never overwritten.
    pub async fn refresh(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        user_id: Option<i64>,
        total_price: i64,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts \
             SET user_id = COALESCE(user_id, $2), total_price = $3, expires_at = $4, \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(draft_id)
        .bind(user_id)
        .bind(total_price)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn delete_stale_items(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        keep_seat_ids: &[i64],
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM draft_checkout_items \
             WHERE draft_checkout_id = $1 AND NOT (seat_id = ANY($2))",
        )
        .bind(draft_id)
        .bind(keep_seat_ids)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    pub async fn upsert_item(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        item: &DraftItem,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO draft_checkout_items (draft_checkout_id, seat_id, price, seat_label) \
             VALUES ($1, $2, $3, $4) \
             ON CONFLICT (draft_checkout_id, seat_id) \
             DO UPDATE SET price = EXCLUDED.price, seat_label = EXCLUDED.seat_label",
        )
        .bind(draft_id)
        .bind(item.seat_id)
        .bind(item.price)
        .bind(&item.seat_label)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn items(
        pool: &PgPool,
        draft_id: Uuid,
    ) -> Result<Vec<DraftItem>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT seat_id, price, seat_label FROM draft_checkout_items \
             WHERE draft_checkout_id = $1 ORDER BY seat_id",
        )
        .bind(draft_id)
        .fetch_all(pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| DraftItem {
                seat_id: r.seat_id,
                price: r.price,
                seat_label: r.seat_label,
            })
            .collect())
    }

    pub async fn items_in_tx(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
    ) -> Result<Vec<DraftItem>, sqlx::Error> {
        let rows = sqlx::query_as::<_, ItemRow>(
            "SELECT seat_id, price, seat_label FROM draft_checkout_items \
             WHERE draft_checkout_id = $1 ORDER BY seat_id",
        )
        .bind(draft_id)
        .fetch_all(&mut **tx)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| DraftItem {
                seat_id: r.seat_id,
                price: r.price,
                seat_label: r.seat_label,
            })
            .collect())
    }

    pub async fn fetch(pool: &PgPool, draft_id: Uuid) -> Result<Option<DraftCheckout>, sqlx::Error> {
        let row = sqlx::query_as::<_, DraftRow>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_checkouts WHERE id = $1"
        ))
        .bind(draft_id)
        .fetch_optional(pool)
        .await?;

        match row {
            Some(row) => {
                let items = Self::items(pool, row.id).await?;
                Ok(Some(row.into_draft(items)))
            }
            None => Ok(None),
        }
    }

    /// Row-lock a draft by id regardless of status; the caller decides how to
    /// report a terminal state.
    pub async fn lock_by_id(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
    ) -> Result<Option<DraftRow>, sqlx::Error> {
        sqlx::query_as::<_, DraftRow>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_checkouts WHERE id = $1 FOR UPDATE"
        ))
        .bind(draft_id)
        .fetch_optional(&mut **tx)
        .await
    }

    /// Row-lock the draft a gateway order code points at. Serializes
    /// concurrent webhook deliveries for the same draft.
    pub async fn lock_by_intent(
        tx: &mut Transaction<'_, Postgres>,
        order_code: &str,
    ) -> Result<Option<DraftRow>, sqlx::Error> {
        sqlx::query_as::<_, DraftRow>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_checkouts \
             WHERE payment_provider = 'gateway' AND payment_intent_id = $1 \
             FOR UPDATE"
        ))
        .bind(order_code)
        .fetch_optional(&mut **tx)
        .await
    }

    pub async fn apply_patch(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        patch: &DraftPatch,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts SET \
                 passenger_name = COALESCE($2, passenger_name), \
                 passenger_phone = COALESCE($3, passenger_phone), \
                 passenger_email = COALESCE($4, passenger_email), \
                 pickup_location_id = COALESCE($5, pickup_location_id), \
                 dropoff_location_id = COALESCE($6, dropoff_location_id), \
                 pickup_address = COALESCE($7, pickup_address), \
                 dropoff_address = COALESCE($8, dropoff_address), \
                 coupon_id = COALESCE($9, coupon_id), \
                 notes = COALESCE($10, notes), \
                 discount_amount = COALESCE($11, discount_amount), \
                 updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(draft_id)
        .bind(&patch.passenger_name)
        .bind(&patch.passenger_phone)
        .bind(&patch.passenger_email)
        .bind(patch.pickup_location_id)
        .bind(patch.dropoff_location_id)
        .bind(&patch.pickup_address)
        .bind(&patch.dropoff_address)
        .bind(patch.coupon_id)
        .bind(&patch.notes)
        .bind(patch.discount_amount)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn set_payment(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        provider: PaymentProvider,
        intent_id: Option<&str>,
        status: DraftStatus,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts \
             SET payment_provider = $2, payment_intent_id = $3, status = $4, \
                 expires_at = $5, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(draft_id)
        .bind(provider.as_str())
        .bind(intent_id)
        .bind(status.as_str())
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_paid(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        booking_id: Uuid,
        completed_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts \
             SET status = 'paid', booking_id = $2, completed_at = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(draft_id)
        .bind(booking_id)
        .bind(completed_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn mark_status(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        status: DraftStatus,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts SET status = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(draft_id)
        .bind(status.as_str())
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    pub async fn extend(
        tx: &mut Transaction<'_, Postgres>,
        draft_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE draft_checkouts SET expires_at = $2, updated_at = NOW() WHERE id = $1",
        )
        .bind(draft_id)
        .bind(expires_at)
        .execute(&mut **tx)
        .await?;
        Ok(())
    }

    /// Open drafts past their deadline, row-locked and skipping rows another
    /// sweep already claimed.
    pub async fn lock_overdue(
        tx: &mut Transaction<'_, Postgres>,
        now: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<DraftRow>, sqlx::Error> {
        sqlx::query_as::<_, DraftRow>(&format!(
            "SELECT {DRAFT_COLUMNS} FROM draft_checkouts \
             WHERE status IN ('pending', 'paying') AND expires_at <= $1 \
             ORDER BY expires_at \
             LIMIT $2 \
             FOR UPDATE SKIP LOCKED"
        ))
        .bind(now)
        .bind(limit)
        .fetch_all(&mut **tx)
        .await
    }
}
