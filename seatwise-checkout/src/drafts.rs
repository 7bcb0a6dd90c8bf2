use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use seatwise_core::draft::{DraftCheckout, DraftItem, DraftPatch, DraftStatus};
use seatwise_core::lock::SeatLockStore;
use seatwise_core::{SeatFlowError, SeatFlowResult};
use seatwise_store::booking_repo::BookingRepository;
use seatwise_store::draft_repo::{DraftRepository, DraftRow};
use seatwise_store::events::TOPIC_SEAT_RELEASED;
use seatwise_store::{DbClient, EventProducer};

const SWEEP_BATCH: i64 = 100;
const MIN_DRAFT_SECONDS: i64 = 30;

/// Manages the durable draft aggregate that mirrors a lock session: creation
/// and resync when seats are locked, client edits, deadline extension, and
/// the two terminal paths (cancel, expiry sweep).
pub struct DraftCheckoutService {
    db: DbClient,
    store: Arc<dyn SeatLockStore>,
    producer: Arc<EventProducer>,
}

impl DraftCheckoutService {
    pub fn new(db: DbClient, store: Arc<dyn SeatLockStore>, producer: Arc<EventProducer>) -> Self {
        Self {
            db,
            store,
            producer,
        }
    }

    /// Create or resync the open draft for (trip, session) to exactly the
    /// granted seats, freezing the price and label snapshot per item.
    pub async fn start_from_locked_seats(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        session_token: &str,
        user_id: Option<i64>,
        ttl_seconds: u64,
    ) -> SeatFlowResult<DraftCheckout> {
        let unit_price = BookingRepository::trip_unit_price(&self.db.pool, trip_id)
            .await
            .map_err(SeatFlowError::backend)?
            .ok_or_else(|| SeatFlowError::NotFound(format!("trip {trip_id}")))?;

        let labels = BookingRepository::seat_labels(&self.db.pool, seat_ids)
            .await
            .map_err(SeatFlowError::backend)?;
        let items: Vec<DraftItem> = seat_ids
            .iter()
            .map(|&seat_id| DraftItem {
                seat_id,
                price: unit_price,
                seat_label: labels
                    .iter()
                    .find(|(id, _)| *id == seat_id)
                    .map(|(_, l)| l.clone())
                    .unwrap_or_else(|| format!("S{seat_id}")),
            })
            .collect();
        let total_price: i64 = items.iter().map(|i| i.price).sum();

        let expires_at =
            Utc::now() + Duration::seconds((ttl_seconds as i64).max(MIN_DRAFT_SECONDS));

        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;

        let row = match DraftRepository::find_open_for_update(&mut tx, trip_id, session_token)
            .await
            .map_err(SeatFlowError::backend)?
        {
            Some(row) => row,
            None => DraftRepository::insert(&mut tx, trip_id, session_token, user_id, expires_at)
                .await
                .map_err(SeatFlowError::backend)?,
        };

        DraftRepository::refresh(&mut tx, row.id, user_id, total_price, expires_at)
            .await
            .map_err(SeatFlowError::backend)?;
        DraftRepository::delete_stale_items(&mut tx, row.id, seat_ids)
            .await
            .map_err(SeatFlowError::backend)?;
        for item in &items {
            DraftRepository::upsert_item(&mut tx, row.id, item)
                .await
                .map_err(SeatFlowError::backend)?;
        }

        tx.commit().await.map_err(SeatFlowError::backend)?;

        self.fetch(row.id).await
    }

    pub async fn fetch(&self, draft_id: Uuid) -> SeatFlowResult<DraftCheckout> {
        DraftRepository::fetch(&self.db.pool, draft_id)
            .await
            .map_err(SeatFlowError::backend)?
            .ok_or_else(|| SeatFlowError::NotFound(format!("draft {draft_id}")))
    }

    /// Merge client-supplied passenger and trip details into an open draft.
    pub async fn patch(
        &self,
        draft_id: Uuid,
        session_token: &str,
        patch: &DraftPatch,
    ) -> SeatFlowResult<DraftCheckout> {
        if patch.is_empty() {
            return self.get(draft_id, session_token).await;
        }

        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;
        let row = Self::lock_owned_open(&mut tx, draft_id, session_token, "update").await?;
        DraftRepository::apply_patch(&mut tx, row.id, patch)
            .await
            .map_err(SeatFlowError::backend)?;
        tx.commit().await.map_err(SeatFlowError::backend)?;

        self.fetch(draft_id).await
    }

    /// Push the deadline out and renew the underlying holds in lockstep. The
    /// renew is advisory; finalize re-checks ownership regardless.
    pub async fn extend(
        &self,
        draft_id: Uuid,
        session_token: &str,
        extra_seconds: u64,
    ) -> SeatFlowResult<DraftCheckout> {
        let now = Utc::now();
        let extra = Duration::seconds(extra_seconds as i64);

        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;
        let row = Self::lock_owned_open(&mut tx, draft_id, session_token, "extend").await?;
        let new_deadline = row.expires_at.max(now) + extra;
        DraftRepository::extend(&mut tx, row.id, new_deadline)
            .await
            .map_err(SeatFlowError::backend)?;
        let items = DraftRepository::items_in_tx(&mut tx, row.id)
            .await
            .map_err(SeatFlowError::backend)?;
        let trip_id = row.trip_id;
        tx.commit().await.map_err(SeatFlowError::backend)?;

        let seat_ids: Vec<i64> = items.iter().map(|i| i.seat_id).collect();
        let hold = (new_deadline - now).num_seconds().max(MIN_DRAFT_SECONDS) as u64;
        let renewed = self
            .store
            .renew(trip_id, &seat_ids, session_token, hold)
            .await?;
        if renewed.len() != seat_ids.len() {
            warn!(
                %draft_id,
                requested = seat_ids.len(),
                renewed = renewed.len(),
                "some holds were not renewable during extend"
            );
        }

        self.fetch(draft_id).await
    }

    /// User-initiated abandon: terminal `cancelled`, holds released, seat map
    /// notified.
    pub async fn cancel(&self, draft_id: Uuid, session_token: &str) -> SeatFlowResult<()> {
        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;
        let row = Self::lock_owned_open(&mut tx, draft_id, session_token, "cancel").await?;
        let items = DraftRepository::items_in_tx(&mut tx, row.id)
            .await
            .map_err(SeatFlowError::backend)?;
        DraftRepository::mark_status(&mut tx, row.id, DraftStatus::Cancelled)
            .await
            .map_err(SeatFlowError::backend)?;
        let trip_id = row.trip_id;
        tx.commit().await.map_err(SeatFlowError::backend)?;

        let seat_ids: Vec<i64> = items.iter().map(|i| i.seat_id).collect();
        self.release_and_notify(trip_id, &seat_ids, session_token)
            .await;
        info!(%draft_id, trip_id, "draft cancelled");
        Ok(())
    }

    /// Fallback reconciliation: expire open drafts past their deadline and
    /// release whatever holds they still map to. Returns the number expired.
    /// SKIP LOCKED keeps concurrent sweeps from double-claiming rows.
    pub async fn sweep_expired(&self, now: DateTime<Utc>) -> SeatFlowResult<u64> {
        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;
        let overdue = DraftRepository::lock_overdue(&mut tx, now, SWEEP_BATCH)
            .await
            .map_err(SeatFlowError::backend)?;

        let mut released: Vec<(i64, String, Vec<i64>)> = Vec::with_capacity(overdue.len());
        for row in &overdue {
            let items = DraftRepository::items_in_tx(&mut tx, row.id)
                .await
                .map_err(SeatFlowError::backend)?;
            DraftRepository::mark_status(&mut tx, row.id, DraftStatus::Expired)
                .await
                .map_err(SeatFlowError::backend)?;
            released.push((
                row.trip_id,
                row.session_token.clone(),
                items.iter().map(|i| i.seat_id).collect(),
            ));
        }
        tx.commit().await.map_err(SeatFlowError::backend)?;

        for (trip_id, token, seat_ids) in &released {
            self.release_and_notify(*trip_id, seat_ids, token).await;
        }
        if !released.is_empty() {
            info!(count = released.len(), "expired overdue drafts");
        }
        Ok(released.len() as u64)
    }

    /// Fetch a draft the caller owns; foreign drafts look like missing ones.
    pub async fn get(
        &self,
        draft_id: Uuid,
        session_token: &str,
    ) -> SeatFlowResult<DraftCheckout> {
        let draft = self.fetch(draft_id).await?;
        if draft.session_token != session_token {
            return Err(SeatFlowError::NotFound(format!("draft {draft_id}")));
        }
        Ok(draft)
    }

    /// Row-lock a draft, require ownership and an open status. A lapsed
    /// deadline on a pending draft reports as expired even before the sweep
    /// has run.
    pub(crate) async fn lock_owned_open(
        tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
        draft_id: Uuid,
        session_token: &str,
        action: &'static str,
    ) -> SeatFlowResult<DraftRow> {
        let row = DraftRepository::lock_by_id(tx, draft_id)
            .await
            .map_err(SeatFlowError::backend)?
            .ok_or_else(|| SeatFlowError::NotFound(format!("draft {draft_id}")))?;
        if row.session_token != session_token {
            return Err(SeatFlowError::NotFound(format!("draft {draft_id}")));
        }
        let status = DraftStatus::parse(&row.status).unwrap_or(DraftStatus::Expired);
        if !status.is_open() {
            return Err(SeatFlowError::InvalidState {
                draft_id,
                status,
                action,
            });
        }
        if row.expires_at <= Utc::now() {
            return Err(SeatFlowError::InvalidState {
                draft_id,
                status: DraftStatus::Expired,
                action,
            });
        }
        Ok(row)
    }

    async fn release_and_notify(&self, trip_id: i64, seat_ids: &[i64], token: &str) {
        if seat_ids.is_empty() {
            return;
        }
        match self.store.release(trip_id, seat_ids, token).await {
            Ok(outcome) if !outcome.released.is_empty() => {
                let payload =
                    json!({ "trip_id": trip_id, "seat_ids": outcome.released }).to_string();
                if let Err(e) = self
                    .producer
                    .publish(TOPIC_SEAT_RELEASED, &trip_id.to_string(), &payload)
                    .await
                {
                    warn!(trip_id, error = %e, "failed to publish seat.released");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(trip_id, error = %e, "failed to release holds"),
        }
    }
}
