use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::json;
use tracing::{info, warn};
use uuid::Uuid;

use seatwise_core::booking::Booking;
use seatwise_core::draft::{DraftStatus, PaymentProvider};
use seatwise_core::lock::SeatLockStore;
use seatwise_core::payment::{PaymentEvent, PaymentEventKind};
use seatwise_core::{SeatFlowError, SeatFlowResult};
use seatwise_store::app_config::BusinessRules;
use seatwise_store::draft_repo::DraftRepository;
use seatwise_store::events::TOPIC_SEAT_RELEASED;
use seatwise_store::{DbClient, EventProducer};

use crate::drafts::DraftCheckoutService;
use crate::finalize::BookingService;
use crate::gateway::WebhookVerifier;

/// What selecting a payment method resolved to.
#[derive(Debug)]
pub enum PaymentSelection {
    /// Cash settles immediately; the booking exists.
    Completed { booking: Booking },
    /// Gateway payment pending; the client redirects with this order code
    /// and the holds now last until `expires_at`.
    GatewayPending {
        order_code: String,
        expires_at: DateTime<Utc>,
    },
}

/// How a gateway webhook delivery was reconciled. Every variant acknowledges;
/// the gateway must never be driven into a retry loop by domain outcomes.
#[derive(Debug, PartialEq, Eq)]
pub enum WebhookDisposition {
    Completed { booking_id: Uuid },
    /// Replay of a delivery already processed; same booking id returned.
    Replayed { booking_id: Uuid },
    /// Terminal failure; the draft was closed and its seats released.
    Released { draft_id: Uuid },
    Ignored { reason: &'static str },
}

/// Drives a draft from "seats held" to "paid" along either payment path, and
/// reconciles asynchronous gateway events against draft state.
pub struct PaymentFlow {
    db: DbClient,
    store: Arc<dyn SeatLockStore>,
    booking: Arc<BookingService>,
    producer: Arc<EventProducer>,
    verifier: WebhookVerifier,
    rules: BusinessRules,
}

impl PaymentFlow {
    pub fn new(
        db: DbClient,
        store: Arc<dyn SeatLockStore>,
        booking: Arc<BookingService>,
        producer: Arc<EventProducer>,
        verifier: WebhookVerifier,
        rules: BusinessRules,
    ) -> Self {
        Self {
            db,
            store,
            booking,
            producer,
            verifier,
            rules,
        }
    }

    /// Commit an open draft to a payment method. Cash finalizes on the spot;
    /// gateway stamps an order code, moves the draft to `paying` and widens
    /// both the draft deadline and the seat holds to the payment window.
    pub async fn select_payment(
        &self,
        draft_id: Uuid,
        session_token: &str,
        provider: PaymentProvider,
    ) -> SeatFlowResult<PaymentSelection> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;
        let row =
            DraftCheckoutService::lock_owned_open(&mut tx, draft_id, session_token, "pay").await?;
        let items = DraftRepository::items_in_tx(&mut tx, row.id)
            .await
            .map_err(SeatFlowError::backend)?;

        match provider {
            PaymentProvider::Cash => {
                DraftRepository::set_payment(
                    &mut tx,
                    row.id,
                    PaymentProvider::Cash,
                    None,
                    DraftStatus::Pending,
                    row.expires_at,
                )
                .await
                .map_err(SeatFlowError::backend)?;

                let mut draft = row.into_draft(items);
                draft.payment_provider = Some(PaymentProvider::Cash);
                draft.payment_intent_id = None;

                let booking = self.booking.finalize_in_tx(&mut tx, &draft, now).await?;
                tx.commit().await.map_err(SeatFlowError::backend)?;

                self.booking.post_commit(&booking, session_token).await;
                Ok(PaymentSelection::Completed { booking })
            }
            PaymentProvider::Gateway => {
                let order_code = self.verifier.new_order_code();
                let expires_at =
                    now + Duration::seconds(self.rules.payment_hold_seconds as i64);
                DraftRepository::set_payment(
                    &mut tx,
                    row.id,
                    PaymentProvider::Gateway,
                    Some(&order_code),
                    DraftStatus::Paying,
                    expires_at,
                )
                .await
                .map_err(SeatFlowError::backend)?;
                let trip_id = row.trip_id;
                tx.commit().await.map_err(SeatFlowError::backend)?;

                // Holds track the widened deadline; advisory, finalize
                // re-checks ownership when the webhook lands.
                let seat_ids: Vec<i64> = items.iter().map(|i| i.seat_id).collect();
                self.store
                    .renew(
                        trip_id,
                        &seat_ids,
                        session_token,
                        self.rules.payment_hold_seconds,
                    )
                    .await?;

                info!(%draft_id, order_code, "draft entered payment window");
                Ok(PaymentSelection::GatewayPending {
                    order_code,
                    expires_at,
                })
            }
        }
    }

    /// Reconcile one gateway event against draft state. Idempotent under
    /// replays and late deliveries: the draft row lock serializes concurrent
    /// deliveries and the decision ladder makes re-runs no-ops.
    pub async fn handle_event(&self, event: &PaymentEvent) -> SeatFlowResult<WebhookDisposition> {
        let now = Utc::now();
        let mut tx = self.db.pool.begin().await.map_err(SeatFlowError::backend)?;

        let Some(row) = DraftRepository::lock_by_intent(&mut tx, &event.order_code)
            .await
            .map_err(SeatFlowError::backend)?
        else {
            return Ok(WebhookDisposition::Ignored {
                reason: "no draft for order code",
            });
        };

        let status = DraftStatus::parse(&row.status).unwrap_or(DraftStatus::Expired);
        match decide(status, row.booking_id, event.kind) {
            ReconcileAction::Replay(booking_id) => {
                Ok(WebhookDisposition::Replayed { booking_id })
            }
            ReconcileAction::Ignore => Ok(WebhookDisposition::Ignored {
                reason: "draft is not awaiting payment",
            }),
            ReconcileAction::Close(terminal) => {
                let items = DraftRepository::items_in_tx(&mut tx, row.id)
                    .await
                    .map_err(SeatFlowError::backend)?;
                DraftRepository::mark_status(&mut tx, row.id, terminal)
                    .await
                    .map_err(SeatFlowError::backend)?;
                tx.commit().await.map_err(SeatFlowError::backend)?;

                let seat_ids: Vec<i64> = items.iter().map(|i| i.seat_id).collect();
                self.release_and_notify(row.trip_id, &seat_ids, &row.session_token)
                    .await;
                info!(draft_id = %row.id, ?terminal, "payment failed, draft closed");
                Ok(WebhookDisposition::Released { draft_id: row.id })
            }
            ReconcileAction::Finalize => {
                let items = DraftRepository::items_in_tx(&mut tx, row.id)
                    .await
                    .map_err(SeatFlowError::backend)?;
                let session_token = row.session_token.clone();
                let draft = row.into_draft(items);

                let booking = self.booking.finalize_in_tx(&mut tx, &draft, now).await?;
                tx.commit().await.map_err(SeatFlowError::backend)?;

                self.booking.post_commit(&booking, &session_token).await;
                Ok(WebhookDisposition::Completed {
                    booking_id: booking.id,
                })
            }
        }
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

/// Pure reconciliation ladder, ordered: replays first, then anything not in
/// the payment window, then the event's own verdict.
#[derive(Debug, PartialEq, Eq)]
enum ReconcileAction {
    Replay(Uuid),
    Ignore,
    Close(DraftStatus),
    Finalize,
}

fn decide(
    status: DraftStatus,
    booking_id: Option<Uuid>,
    kind: PaymentEventKind,
) -> ReconcileAction {
    if status == DraftStatus::Paid {
        return match booking_id {
            Some(id) => ReconcileAction::Replay(id),
            None => ReconcileAction::Ignore,
        };
    }
    if status != DraftStatus::Paying {
        return ReconcileAction::Ignore;
    }
    match kind {
        PaymentEventKind::Succeeded => ReconcileAction::Finalize,
        PaymentEventKind::Expired => ReconcileAction::Close(DraftStatus::Expired),
        PaymentEventKind::Failed | PaymentEventKind::Cancelled => {
            ReconcileAction::Close(DraftStatus::Cancelled)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_success_returns_existing_booking() {
        let id = Uuid::new_v4();
        assert_eq!(
            decide(DraftStatus::Paid, Some(id), PaymentEventKind::Succeeded),
            ReconcileAction::Replay(id)
        );
        // A late failure for an already-paid draft must not unwind the sale.
        assert_eq!(
            decide(DraftStatus::Paid, Some(id), PaymentEventKind::Failed),
            ReconcileAction::Replay(id)
        );
    }

    #[test]
    fn success_in_payment_window_finalizes() {
        assert_eq!(
            decide(DraftStatus::Paying, None, PaymentEventKind::Succeeded),
            ReconcileAction::Finalize
        );
    }

    #[test]
    fn failure_kinds_close_with_matching_terminal() {
        assert_eq!(
            decide(DraftStatus::Paying, None, PaymentEventKind::Failed),
            ReconcileAction::Close(DraftStatus::Cancelled)
        );
        assert_eq!(
            decide(DraftStatus::Paying, None, PaymentEventKind::Cancelled),
            ReconcileAction::Close(DraftStatus::Cancelled)
        );
        assert_eq!(
            decide(DraftStatus::Paying, None, PaymentEventKind::Expired),
            ReconcileAction::Close(DraftStatus::Expired)
        );
    }

    #[test]
    fn events_outside_the_payment_window_are_ignored() {
        for status in [
            DraftStatus::Pending,
            DraftStatus::Cancelled,
            DraftStatus::Expired,
        ] {
            assert_eq!(
                decide(status, None, PaymentEventKind::Succeeded),
                ReconcileAction::Ignore
            );
        }
    }
}
