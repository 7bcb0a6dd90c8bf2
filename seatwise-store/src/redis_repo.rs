use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use futures_util::StreamExt;
use redis::AsyncCommands;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use seatwise_core::error::{SeatFlowError, SeatFlowResult};
use seatwise_core::lock::{LockOutcome, ReleaseOutcome, SeatLockStore, TripSeats};

/// A seat lock that lapsed in the store, parsed from a keyspace expiry
/// notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatExpired {
    pub trip_id: i64,
    pub seat_id: i64,
}

fn seat_key(trip_id: i64, seat_id: i64) -> String {
    format!("trip:{}:seat:{}:lock", trip_id, seat_id)
}

fn trip_set_key(trip_id: i64) -> String {
    format!("trip:{}:locks:s", trip_id)
}

fn session_set_key(trip_id: i64, token: &str) -> String {
    format!("trip:{}:sess:{}:s", trip_id, token)
}

/// KEYS/ARGV layout for the post-booking cleanup script: KEYS starts with the
/// two index sets, then one lock key per seat, paired positionally with the
/// seat-id args.
fn booked_cleanup_layout(trip_id: i64, seat_ids: &[i64], token: &str) -> (Vec<String>, Vec<i64>) {
    let mut keys = vec![trip_set_key(trip_id), session_set_key(trip_id, token)];
    keys.extend(seat_ids.iter().map(|&s| seat_key(trip_id, s)));
    (keys, seat_ids.to_vec())
}

/// Inverse of `seat_key`, used on the keyspace-expiry push path.
fn parse_expired_key(key: &str) -> Option<SeatExpired> {
    let rest = key.strip_prefix("trip:")?;
    let (trip_part, rest) = rest.split_once(":seat:")?;
    let seat_part = rest.strip_suffix(":lock")?;
    Some(SeatExpired {
        trip_id: trip_part.parse().ok()?,
        seat_id: seat_part.parse().ok()?,
    })
}

/// Acquire-all-or-nothing. Three phases, each completing before the next
/// starts, so a failed request mutates nothing:
///   1. per-trip session cap counted over live session-index members only
///      (members whose lock key already lapsed are pruned, not counted),
///   2. foreign-owner scan over every requested seat key,
///   3. SET/EXPIRE every key and update both indices.
/// Returns {1,0,0} on success, {-1,trip,0} on quota, {0,trip,seat} on the
/// first conflict.
const LOCK_SCRIPT: &str = r#"
local token  = ARGV[1]
local ttl    = tonumber(ARGV[2])
local maxPer = tonumber(ARGV[3])
local trips  = cjson.decode(ARGV[4])

for _, trip in ipairs(trips) do
  local sessKey = "trip:" .. trip.trip_id .. ":sess:" .. token .. ":s"
  local live = 0
  for _, seat in ipairs(redis.call("SMEMBERS", sessKey)) do
    if redis.call("EXISTS", "trip:" .. trip.trip_id .. ":seat:" .. seat .. ":lock") == 1 then
      live = live + 1
    else
      redis.call("SREM", sessKey, seat)
    end
  end
  local extra = 0
  for _, seat in ipairs(trip.seat_ids) do
    if redis.call("SISMEMBER", sessKey, seat) == 0 then
      extra = extra + 1
    end
  end
  if live + extra > maxPer then
    return {-1, trip.trip_id, 0}
  end
end

for _, trip in ipairs(trips) do
  for _, seat in ipairs(trip.seat_ids) do
    local owner = redis.call("GET", "trip:" .. trip.trip_id .. ":seat:" .. seat .. ":lock")
    if owner and owner ~= token then
      return {0, trip.trip_id, seat}
    end
  end
end

for _, trip in ipairs(trips) do
  local tripSet = "trip:" .. trip.trip_id .. ":locks:s"
  local sessKey = "trip:" .. trip.trip_id .. ":sess:" .. token .. ":s"
  for _, seat in ipairs(trip.seat_ids) do
    redis.call("SET", "trip:" .. trip.trip_id .. ":seat:" .. seat .. ":lock", token, "EX", ttl)
    redis.call("SADD", tripSet, seat)
    redis.call("SADD", sessKey, seat)
  end
  redis.call("EXPIRE", sessKey, ttl * 2)
end

return {1, 0, 0}
"#;

/// Owner-checked release: only entries held by the caller's token are
/// deleted; everything else lands in the failed list.
const RELEASE_SCRIPT: &str = r#"
local tripSet = KEYS[1]
local sessSet = KEYS[2]
local token   = ARGV[1]

local released = {}
local failed   = {}

for i = 3, #KEYS do
  local seatId = tonumber(ARGV[i - 1])
  local owner  = redis.call("GET", KEYS[i])
  if owner and owner == token then
    redis.call("DEL", KEYS[i])
    redis.call("SREM", tripSet, seatId)
    redis.call("SREM", sessSet, seatId)
    table.insert(released, seatId)
  else
    table.insert(failed, seatId)
  end
end

return {released, failed}
"#;

/// Post-commit cleanup: the seats are durably booked, delete whatever lock
/// entries remain regardless of owner. ARGV[i] is the seat id whose lock key
/// is KEYS[i + 2]; `booked_cleanup_layout` builds both sides.
const RELEASE_BOOKED_SCRIPT: &str = r#"
local tripSet = KEYS[1]
local sessSet = KEYS[2]

local released = {}

for i = 1, #ARGV do
  local seatId = tonumber(ARGV[i])
  if redis.call("DEL", KEYS[i + 2]) == 1 then
    table.insert(released, seatId)
  end
  redis.call("SREM", tripSet, seatId)
  redis.call("SREM", sessSet, seatId)
end

return released
"#;

#[derive(Clone)]
pub struct RedisSeatLockStore {
    client: redis::Client,
    lock_script: redis::Script,
    release_script: redis::Script,
    release_booked_script: redis::Script,
}

impl RedisSeatLockStore {
    pub fn new(connection_string: &str) -> Result<Self, redis::RedisError> {
        let client = redis::Client::open(connection_string)?;
        Ok(Self {
            client,
            lock_script: redis::Script::new(LOCK_SCRIPT),
            release_script: redis::Script::new(RELEASE_SCRIPT),
            release_booked_script: redis::Script::new(RELEASE_BOOKED_SCRIPT),
        })
    }

    async fn conn(&self) -> SeatFlowResult<redis::aio::MultiplexedConnection> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(SeatFlowError::backend)
    }

    /// Forward keyspace expiry notifications for seat lock keys into `tx`.
    /// Requires `notify-keyspace-events` to include `Ex` on the server; the
    /// periodic sweep covers deployments where it does not. Runs until the
    /// receiver side is dropped.
    pub async fn listen_expirations(&self, tx: mpsc::Sender<SeatExpired>) -> SeatFlowResult<()> {
        let mut pubsub = self
            .client
            .get_async_pubsub()
            .await
            .map_err(SeatFlowError::backend)?;
        pubsub
            .psubscribe("__keyevent@*__:expired")
            .await
            .map_err(SeatFlowError::backend)?;
        info!("Subscribed to keyspace expiry notifications");

        let mut stream = pubsub.on_message();
        while let Some(msg) = stream.next().await {
            let key: String = match msg.get_payload() {
                Ok(k) => k,
                Err(e) => {
                    warn!("Unreadable expiry notification: {}", e);
                    continue;
                }
            };
            if let Some(expired) = parse_expired_key(&key) {
                debug!(
                    "Seat lock expired: trip {} seat {}",
                    expired.trip_id, expired.seat_id
                );
                if tx.send(expired).await.is_err() {
                    break;
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SeatLockStore for RedisSeatLockStore {
    async fn lock_all(
        &self,
        trips: &[TripSeats],
        token: &str,
        ttl_seconds: u64,
        max_per_session: u32,
    ) -> SeatFlowResult<LockOutcome> {
        let mut conn = self.conn().await?;
        let payload = serde_json::to_string(trips).map_err(SeatFlowError::backend)?;

        let (status, trip_id, seat_id): (i64, i64, i64) = self
            .lock_script
            .arg(token)
            .arg(ttl_seconds)
            .arg(max_per_session)
            .arg(payload)
            .invoke_async(&mut conn)
            .await
            .map_err(SeatFlowError::backend)?;

        match status {
            1 => Ok(LockOutcome::Acquired {
                expires_at: Utc::now() + Duration::seconds(ttl_seconds as i64),
            }),
            -1 => Ok(LockOutcome::QuotaExceeded {
                trip_id,
                max: max_per_session,
            }),
            _ => Ok(LockOutcome::SeatConflict { trip_id, seat_id }),
        }
    }

    async fn release(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
    ) -> SeatFlowResult<ReleaseOutcome> {
        if seat_ids.is_empty() {
            return Ok(ReleaseOutcome::default());
        }
        let mut conn = self.conn().await?;

        let mut invocation = self.release_script.prepare_invoke();
        invocation.key(trip_set_key(trip_id));
        invocation.key(session_set_key(trip_id, token));
        for &seat_id in seat_ids {
            invocation.key(seat_key(trip_id, seat_id));
        }
        invocation.arg(token);
        for &seat_id in seat_ids {
            invocation.arg(seat_id);
        }

        let (released, failed): (Vec<i64>, Vec<i64>) = invocation
            .invoke_async(&mut conn)
            .await
            .map_err(SeatFlowError::backend)?;
        Ok(ReleaseOutcome { released, failed })
    }

    async fn renew(
        &self,
        trip_id: i64,
        seat_ids: &[i64],
        token: &str,
        extend_seconds: u64,
    ) -> SeatFlowResult<Vec<i64>> {
        // Owner-only read-then-act is safe here: no other party mutates an
        // entry it does not own, and finalize re-asserts ownership anyway.
        let mut conn = self.conn().await?;
        let mut renewed = Vec::new();
        for &seat_id in seat_ids {
            let key = seat_key(trip_id, seat_id);
            let owner: Option<String> =
                conn.get(&key).await.map_err(SeatFlowError::backend)?;
            if owner.as_deref() == Some(token) {
                let _: bool = conn
                    .expire(&key, extend_seconds as i64)
                    .await
                    .map_err(SeatFlowError::backend)?;
                renewed.push(seat_id);
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
        let mut conn = self.conn().await?;
        for &seat_id in seat_ids {
            let owner: Option<String> = conn
                .get(seat_key(trip_id, seat_id))
                .await
                .map_err(SeatFlowError::backend)?;
            match owner {
                None => return Err(SeatFlowError::HoldLapsed { trip_id, seat_id }),
                Some(t) if t != token => {
                    return Err(SeatFlowError::Conflict { trip_id, seat_id })
                }
                Some(_) => {}
            }
        }
        Ok(())
    }

    async fn locked_ttls(&self, trip_id: i64) -> SeatFlowResult<HashMap<i64, i64>> {
        let mut conn = self.conn().await?;
        let members: Vec<i64> = conn
            .smembers(trip_set_key(trip_id))
            .await
            .map_err(SeatFlowError::backend)?;

        let mut ttls = HashMap::new();
        for seat_id in members {
            let ttl: i64 = conn
                .ttl(seat_key(trip_id, seat_id))
                .await
                .map_err(SeatFlowError::backend)?;
            if ttl > 0 {
                ttls.insert(seat_id, ttl);
            } else {
                // The index is a cache; prune members whose entry lapsed.
                let _: i64 = conn
                    .srem(trip_set_key(trip_id), seat_id)
                    .await
                    .map_err(SeatFlowError::backend)?;
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
        if seat_ids.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.conn().await?;

        let (keys, args) = booked_cleanup_layout(trip_id, seat_ids, token);
        let mut invocation = self.release_booked_script.prepare_invoke();
        for key in &keys {
            invocation.key(key.as_str());
        }
        for &seat_id in &args {
            invocation.arg(seat_id);
        }

        invocation
            .invoke_async(&mut conn)
            .await
            .map_err(SeatFlowError::backend)
    }

    async fn prune_expired(&self, trip_id: i64, seat_id: i64) -> SeatFlowResult<()> {
        let mut conn = self.conn().await?;
        let owner: Option<String> = conn
            .get(seat_key(trip_id, seat_id))
            .await
            .map_err(SeatFlowError::backend)?;
        if owner.is_none() {
            let _: i64 = conn
                .srem(trip_set_key(trip_id), seat_id)
                .await
                .map_err(SeatFlowError::backend)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seat_key_roundtrip() {
        let key = seat_key(100, 5);
        assert_eq!(key, "trip:100:seat:5:lock");
        assert_eq!(
            parse_expired_key(&key),
            Some(SeatExpired {
                trip_id: 100,
                seat_id: 5
            })
        );
    }

    #[test]
    fn parse_rejects_foreign_keys() {
        assert_eq!(parse_expired_key("trip:100:locks:s"), None);
        assert_eq!(parse_expired_key("trip:x:seat:5:lock"), None);
        assert_eq!(parse_expired_key("session:abc"), None);
    }

    #[test]
    fn booked_cleanup_pairs_each_seat_arg_with_its_key() {
        let (keys, args) = booked_cleanup_layout(7, &[4, 9, 11], "tok");
        assert_eq!(keys[0], "trip:7:locks:s");
        assert_eq!(keys[1], "trip:7:sess:tok:s");
        assert_eq!(keys.len(), args.len() + 2);
        // The script reads ARGV[i] alongside KEYS[i + 2]; the pairing must
        // hold for every seat, not just the first.
        for (i, &seat_id) in args.iter().enumerate() {
            assert_eq!(keys[i + 2], seat_key(7, seat_id));
        }
    }

    #[test]
    fn lock_payload_serializes_for_cjson() {
        let trips = vec![TripSeats {
            trip_id: 1,
            seat_ids: vec![3, 4],
            leg: None,
        }];
        let payload = serde_json::to_string(&trips).unwrap();
        assert_eq!(payload, r#"[{"trip_id":1,"seat_ids":[3,4]}]"#);
    }
}
