use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use seatwise_core::lock::SeatLockStore;
use seatwise_store::SeatExpired;

use crate::drafts::DraftCheckoutService;

/// Keeps the two sides of seat state converging after holds lapse.
///
/// The push path reacts to keyspace expiry notifications and trims the lock
/// indices immediately. The sweep path is the safety net: notifications are
/// fire-and-forget and can be dropped, so a periodic pass expires overdue
/// drafts and releases whatever they still held.
pub struct ExpiryReconciler {
    store: Arc<dyn SeatLockStore>,
    drafts: Arc<DraftCheckoutService>,
    sweep_interval: Duration,
}

impl ExpiryReconciler {
    pub fn new(
        store: Arc<dyn SeatLockStore>,
        drafts: Arc<DraftCheckoutService>,
        sweep_interval_seconds: u64,
    ) -> Self {
        Self {
            store,
            drafts,
            sweep_interval: Duration::from_secs(sweep_interval_seconds.max(1)),
        }
    }

    /// Consume lapsed-seat notifications until the channel closes.
    pub async fn run_pruner(self: Arc<Self>, mut rx: mpsc::Receiver<SeatExpired>) {
        info!("seat expiry pruner started");
        while let Some(expired) = rx.recv().await {
            debug!(
                trip_id = expired.trip_id,
                seat_id = expired.seat_id,
                "pruning lapsed seat hold"
            );
            if let Err(e) = self
                .store
                .prune_expired(expired.trip_id, expired.seat_id)
                .await
            {
                error!(
                    trip_id = expired.trip_id,
                    seat_id = expired.seat_id,
                    error = %e,
                    "failed to prune lapsed seat hold"
                );
            }
        }
        info!("seat expiry pruner stopped, notification channel closed");
    }

    /// Periodic overdue-draft sweep; never exits.
    pub async fn run_sweeper(self: Arc<Self>) {
        info!(interval = ?self.sweep_interval, "draft expiry sweeper started");
        let mut ticker = tokio::time::interval(self.sweep_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match self.drafts.sweep_expired(Utc::now()).await {
                Ok(0) => {}
                Ok(count) => info!(count, "sweep expired overdue drafts"),
                Err(e) => error!(error = %e, "draft expiry sweep failed"),
            }
        }
    }
}
