use std::collections::{HashMap, HashSet};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{SeatFlowError, SeatFlowResult};

/// Outbound or return leg of a round trip, when the client tags one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Leg {
    Out,
    Return,
}

/// One trip's worth of a multi-trip lock request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TripSeats {
    pub trip_id: i64,
    pub seat_ids: Vec<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub leg: Option<Leg>,
}

impl TripSeats {
    /// Dedupe and drop non-positive ids; order of first occurrence is kept so
    /// failure reporting stays stable.
    pub fn normalize(&mut self) {
        let mut seen = HashSet::new();
        self.seat_ids.retain(|&id| id > 0 && seen.insert(id));
    }
}

/// Result of an all-or-nothing lock attempt. Either every requested seat is
/// held by the caller afterwards, or nothing was mutated and the first
/// offending seat is named.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockOutcome {
    Acquired { expires_at: DateTime<Utc> },
    SeatConflict { trip_id: i64, seat_id: i64 },
    QuotaExceeded { trip_id: i64, max: u32 },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReleaseOutcome {
    pub released: Vec<i64>,
    /// Foreign-owned or already-gone seats. Reported, not errored.
    pub failed: Vec<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "status")]
pub enum SeatState {
    Available,
    Locked { ttl_remaining: i64 },
    Booked,
}

/// Capability the lock manager needs from the backing store: atomic
/// check-and-mutate with TTL plus set membership. Anything offering
/// server-side atomic execution can implement it; the Redis implementation
/// lives in seatwise-store.
#[async_trait]
pub trait SeatLockStore: Send + Sync {
    /// Acquire every seat across every trip or nothing at all, enforcing the
    /// per-session-per-trip cap. Runs as one serialized critical section.
    async fn lock_all(
        &self,
        trips: &[TripSeats],
        token: &str,
        ttl_seconds: u64,
        max_per_session: u32,
    ) -> SeatFlowResult<LockOutcome>;

    /// Release only entries owned by `token`.
    async fn release(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<ReleaseOutcome>;

    /// Extend owned holds. Advisory: a seat that fails to renew is simply
    /// absent from the returned list, finalize re-checks ownership anyway.
    async fn renew(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
        extend_seconds: u64,
    ) -> SeatFlowResult<Vec<i64>>;

    /// Fail fast if any entry is missing or foreign-owned. Called right
    /// before finalize to close the observe-then-commit race.
    async fn assert_owned(&self, trip_id: i64, seat_ids: &[i64], token: &str)
        -> SeatFlowResult<()>;

    /// Remaining TTL per currently-locked seat of a trip. Prunes index
    /// members whose entry has lapsed (the index is a cache, not
    /// authoritative).
    async fn locked_ttls(&self, trip_id: i64) -> SeatFlowResult<HashMap<i64, i64>>;

    /// Unconditional cleanup after the durable commit flipped the seats to
    /// booked.
    async fn release_after_booked(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<Vec<i64>>;

    /// Drop a single lapsed seat from the indices (push-expiry path).
    async fn prune_expired(&self, trip_id: i64, seat_id: i64) -> SeatFlowResult<()>;
}

/// In-memory implementation backing tests and local runs without Redis. A
/// single mutex gives the same serialized-critical-section semantics the Lua
/// scripts give; entries expire lazily against recorded timestamps.
#[derive(Default)]
pub struct MemorySeatLockStore {
    inner: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    entries: HashMap<(i64, i64), Entry>,
    trip_index: HashMap<i64, HashSet<i64>>,
    session_index: HashMap<(i64, String), HashSet<i64>>,
}

struct Entry {
    token: String,
    expires_at: DateTime<Utc>,
}

impl MemorySeatLockStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Test helper: move every recorded expiry into the past by `seconds`,
    /// simulating elapsed wall-clock time.
    pub fn advance(&self, seconds: i64) {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for entry in state.entries.values_mut() {
            entry.expires_at -= Duration::seconds(seconds);
        }
    }
}

impl MemoryState {
    fn live_owner(&self, trip_id: i64, seat_id: i64, now: DateTime<Utc>) -> Option<&str> {
        self.entries
            .get(&(trip_id, seat_id))
            .filter(|e| e.expires_at > now)
            .map(|e| e.token.as_str())
    }

    fn drop_entry(&mut self, trip_id: i64, seat_id: i64) {
        if let Some(entry) = self.entries.remove(&(trip_id, seat_id)) {
            if let Some(set) = self.trip_index.get_mut(&trip_id) {
                set.remove(&seat_id);
            }
            if let Some(set) = self.session_index.get_mut(&(trip_id, entry.token)) {
                set.remove(&seat_id);
            }
        }
    }

    /// Live seats the session currently holds on one trip.
    fn session_usage(&self, trip_id: i64, token: &str, now: DateTime<Utc>) -> HashSet<i64> {
        self.session_index
            .get(&(trip_id, token.to_string()))
            .map(|seats| {
                seats
                    .iter()
                    .copied()
                    .filter(|&s| self.live_owner(trip_id, s, now) == Some(token))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[async_trait]
impl SeatLockStore for MemorySeatLockStore {
    async fn lock_all(
        &self,
        trips: &[TripSeats],
        token: &str,
        ttl_seconds: u64,
        max_per_session: u32,
    ) -> SeatFlowResult<LockOutcome> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(ttl_seconds as i64);
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        // Phase 1: cap check per trip, no mutation on failure.
        for trip in trips {
            let held = state.session_usage(trip.trip_id, token, now);
            let additional = trip
                .seat_ids
                .iter()
                .filter(|s| !held.contains(s))
                .count();
            if held.len() + additional > max_per_session as usize {
                return Ok(LockOutcome::QuotaExceeded {
                    trip_id: trip.trip_id,
                    max: max_per_session,
                });
            }
        }

        // Phase 2: conflict scan across every requested key.
        for trip in trips {
            for &seat_id in &trip.seat_ids {
                if let Some(owner) = state.live_owner(trip.trip_id, seat_id, now) {
                    if owner != token {
                        return Ok(LockOutcome::SeatConflict {
                            trip_id: trip.trip_id,
                            seat_id,
                        });
                    }
                }
            }
        }

        // Phase 3: acquire or extend everything.
        for trip in trips {
            for &seat_id in &trip.seat_ids {
                state.entries.insert(
                    (trip.trip_id, seat_id),
                    Entry {
                        token: token.to_string(),
                        expires_at,
                    },
                );
                state
                    .trip_index
                    .entry(trip.trip_id)
                    .or_default()
                    .insert(seat_id);
                state
                    .session_index
                    .entry((trip.trip_id, token.to_string()))
                    .or_default()
                    .insert(seat_id);
            }
        }

        Ok(LockOutcome::Acquired { expires_at })
    }

    async fn release(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<ReleaseOutcome> {
        let now = Utc::now();
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = ReleaseOutcome::default();
        for &seat_id in seat_ids {
            if state.live_owner(trip_id, seat_id, now) == Some(token) {
                state.drop_entry(trip_id, seat_id);
                out.released.push(seat_id);
            } else {
                out.failed.push(seat_id);
            }
        }
        Ok(out)
    }

    async fn renew(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
        extend_seconds: u64,
    ) -> SeatFlowResult<Vec<i64>> {
        let now = Utc::now();
        let expires_at = now + Duration::seconds(extend_seconds as i64);
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut renewed = Vec::new();
        for &seat_id in seat_ids {
            if state.live_owner(trip_id, seat_id, now) == Some(token) {
                if let Some(entry) = state.entries.get_mut(&(trip_id, seat_id)) {
                    entry.expires_at = expires_at;
                    renewed.push(seat_id);
                }
            }
        }
        Ok(renewed)
    }

    async fn assert_owned(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<()> {
        let now = Utc::now();
        let state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        for &seat_id in seat_ids {
            match state.live_owner(trip_id, seat_id, now) {
                None => return Err(SeatFlowError::HoldLapsed { trip_id, seat_id }),
                Some(owner) if owner != token => {
                    return Err(SeatFlowError::Conflict { trip_id, seat_id })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn locked_ttls(&self, trip_id: i64) -> SeatFlowResult<HashMap<i64, i64>> {
        let now = Utc::now();
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let members: Vec<i64> = state
            .trip_index
            .get(&trip_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();

        let mut ttls = HashMap::new();
        for seat_id in members {
            match state.entries.get(&(trip_id, seat_id)) {
                Some(entry) if entry.expires_at > now => {
                    ttls.insert(seat_id, (entry.expires_at - now).num_seconds().max(1));
                }
                _ => state.drop_entry(trip_id, seat_id),
            }
        }
        Ok(ttls)
    }

    async fn release_after_booked(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<Vec<i64>> {
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut released = Vec::new();
        for &seat_id in seat_ids {
            if state.entries.contains_key(&(trip_id, seat_id)) {
                state.drop_entry(trip_id, seat_id);
                released.push(seat_id);
            }
            if let Some(set) = state.session_index.get_mut(&(trip_id, token.to_string())) {
                set.remove(&seat_id);
            }
        }
        Ok(released)
    }

    async fn prune_expired(&self, trip_id: i64, seat_id: i64) -> SeatFlowResult<()> {
        let now = Utc::now();
        let mut state = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if state.live_owner(trip_id, seat_id, now).is_none() {
            state.drop_entry(trip_id, seat_id);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trip(trip_id: i64, seat_ids: &[i64]) -> TripSeats {
        TripSeats {
            trip_id,
            seat_ids: seat_ids.to_vec(),
            leg: None,
        }
    }

    #[tokio::test]
    async fn lock_then_conflict_then_release_then_retry() {
        let store = MemorySeatLockStore::new();

        let first = store
            .lock_all(&[trip(100, &[5, 6])], "tok-a", 60, 6)
            .await
            .unwrap();
        assert!(matches!(first, LockOutcome::Acquired { .. }));

        let second = store
            .lock_all(&[trip(100, &[6])], "tok-b", 60, 6)
            .await
            .unwrap();
        assert_eq!(
            second,
            LockOutcome::SeatConflict {
                trip_id: 100,
                seat_id: 6
            }
        );

        let released = store.release(100, &[6], "tok-a").await.unwrap();
        assert_eq!(released.released, vec![6]);

        let retry = store
            .lock_all(&[trip(100, &[6])], "tok-b", 60, 6)
            .await
            .unwrap();
        assert!(matches!(retry, LockOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn all_or_nothing_on_partial_conflict() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(1, &[3])], "other", 60, 6)
            .await
            .unwrap();

        let outcome = store
            .lock_all(&[trip(1, &[1, 2, 3, 4])], "mine", 60, 6)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LockOutcome::SeatConflict {
                trip_id: 1,
                seat_id: 3
            }
        );

        // Nothing was mutated: every non-conflicting seat is still free.
        let ttls = store.locked_ttls(1).await.unwrap();
        assert_eq!(ttls.len(), 1);
        assert!(ttls.contains_key(&3));
    }

    #[tokio::test]
    async fn quota_cap_counts_already_held_seats() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(7, &[1, 2, 3])], "tok", 60, 3)
            .await
            .unwrap();

        let over = store.lock_all(&[trip(7, &[4])], "tok", 60, 3).await.unwrap();
        assert_eq!(over, LockOutcome::QuotaExceeded { trip_id: 7, max: 3 });

        // Re-locking the same seats is a renewal, not additional usage.
        let renewal = store
            .lock_all(&[trip(7, &[1, 2, 3])], "tok", 60, 3)
            .await
            .unwrap();
        assert!(matches!(renewal, LockOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn quota_counts_only_live_holds() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(7, &[1, 2, 3])], "tok", 30, 3)
            .await
            .unwrap();

        // Once the holds lapse the session is back at zero usage; a fresh
        // request must not be refused on stale index members.
        store.advance(31);
        let outcome = store.lock_all(&[trip(7, &[4])], "tok", 30, 3).await.unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn booked_cleanup_clears_every_lock_and_the_session_usage() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(100, &[5, 6])], "tok", 600, 2)
            .await
            .unwrap();

        let released = store.release_after_booked(100, &[5, 6], "tok").await.unwrap();
        assert_eq!(released, vec![5, 6]);

        // Both entries and both index sides are gone: the seats read free and
        // the session's cap usage is back at zero.
        assert!(store.locked_ttls(100).await.unwrap().is_empty());
        let retake = store
            .lock_all(&[trip(100, &[7, 8])], "tok", 600, 2)
            .await
            .unwrap();
        assert!(matches!(retake, LockOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn ttl_lapse_frees_the_seat_and_prunes_the_index() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(100, &[5])], "tok", 30, 6)
            .await
            .unwrap();

        let before = store.locked_ttls(100).await.unwrap();
        assert!(before.get(&5).copied().unwrap_or(0) > 0);

        store.advance(31);
        let after = store.locked_ttls(100).await.unwrap();
        assert!(after.is_empty());

        // A second session can take it over.
        let outcome = store
            .lock_all(&[trip(100, &[5])], "tok-2", 30, 6)
            .await
            .unwrap();
        assert!(matches!(outcome, LockOutcome::Acquired { .. }));
    }

    #[tokio::test]
    async fn release_reports_foreign_and_missing_seats_as_failed() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(9, &[1])], "owner", 60, 6)
            .await
            .unwrap();

        let outcome = store.release(9, &[1, 2], "stranger").await.unwrap();
        assert!(outcome.released.is_empty());
        assert_eq!(outcome.failed, vec![1, 2]);
    }

    #[tokio::test]
    async fn assert_owned_distinguishes_lapsed_from_stolen() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(4, &[8])], "owner", 30, 6)
            .await
            .unwrap();

        assert!(store.assert_owned(4, &[8], "owner").await.is_ok());
        assert!(matches!(
            store.assert_owned(4, &[8], "other").await,
            Err(SeatFlowError::Conflict { .. })
        ));

        store.advance(31);
        assert!(matches!(
            store.assert_owned(4, &[8], "owner").await,
            Err(SeatFlowError::HoldLapsed { .. })
        ));
    }

    #[tokio::test]
    async fn renew_is_advisory_and_skips_lapsed_seats() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(2, &[1, 2])], "tok", 30, 6)
            .await
            .unwrap();
        store.advance(31);

        let renewed = store.renew(2, &[1, 2], "tok", 900).await.unwrap();
        assert!(renewed.is_empty());
    }

    #[tokio::test]
    async fn multi_trip_lock_is_atomic_across_trips() {
        let store = MemorySeatLockStore::new();
        store
            .lock_all(&[trip(20, &[1])], "other", 60, 6)
            .await
            .unwrap();

        let outcome = store
            .lock_all(&[trip(10, &[1, 2]), trip(20, &[1])], "mine", 60, 6)
            .await
            .unwrap();
        assert_eq!(
            outcome,
            LockOutcome::SeatConflict {
                trip_id: 20,
                seat_id: 1
            }
        );
        assert!(store.locked_ttls(10).await.unwrap().is_empty());
    }

    #[test]
    fn normalize_dedupes_and_drops_invalid_ids() {
        let mut t = trip(1, &[3, 3, 0, -1, 5]);
        t.normalize();
        assert_eq!(t.seat_ids, vec![3, 5]);
    }
}
