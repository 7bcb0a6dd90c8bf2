use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle of a draft checkout.
///
/// pending -> paying -> paid is the success path; cancelled and expired are
/// the user-initiated and TTL-driven terminals. Only paying -> paid happens
/// without an explicit prior client call (the gateway webhook drives it).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DraftStatus {
    Pending,
    Paying,
    Paid,
    Cancelled,
    Expired,
}

impl DraftStatus {
    /// Open drafts can still be mutated and still hold seats.
    pub fn is_open(self) -> bool {
        matches!(self, Self::Pending | Self::Paying)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paying => "paying",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "paying" => Some(Self::Paying),
            "paid" => Some(Self::Paid),
            "cancelled" => Some(Self::Cancelled),
            "expired" => Some(Self::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for DraftStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentProvider {
    Cash,
    Gateway,
}

impl PaymentProvider {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cash => "cash",
            Self::Gateway => "gateway",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "cash" => Some(Self::Cash),
            "gateway" => Some(Self::Gateway),
            _ => None,
        }
    }
}

/// Durable mirror of a lock session: seats, pricing snapshot, passenger and
/// payment data. At most one open draft exists per (trip_id, session_token).
#[derive(Debug, Clone, Serialize)]
pub struct DraftCheckout {
    pub id: Uuid,
    pub trip_id: i64,
    pub session_token: String,
    pub user_id: Option<i64>,
    pub status: DraftStatus,
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
    pub payment_provider: Option<PaymentProvider>,
    pub payment_intent_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub booking_id: Option<Uuid>,
    pub items: Vec<DraftItem>,
}

impl DraftCheckout {
    pub fn seat_ids(&self) -> Vec<i64> {
        self.items.iter().map(|i| i.seat_id).collect()
    }

    pub fn is_overdue(&self, now: DateTime<Utc>) -> bool {
        self.status.is_open() && self.expires_at <= now
    }
}

/// Price and label are frozen at resync time and never silently recomputed.
#[derive(Debug, Clone, Serialize)]
pub struct DraftItem {
    pub seat_id: i64,
    pub price: i64,
    pub seat_label: String,
}

/// Client-mergeable fields. Anything absent stays untouched.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DraftPatch {
    pub passenger_name: Option<String>,
    pub passenger_phone: Option<String>,
    pub passenger_email: Option<String>,
    pub pickup_location_id: Option<i64>,
    pub dropoff_location_id: Option<i64>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub coupon_id: Option<i64>,
    pub notes: Option<String>,
    pub discount_amount: Option<i64>,
}

impl DraftPatch {
    pub fn is_empty(&self) -> bool {
        self.passenger_name.is_none()
            && self.passenger_phone.is_none()
            && self.passenger_email.is_none()
            && self.pickup_location_id.is_none()
            && self.dropoff_location_id.is_none()
            && self.pickup_address.is_none()
            && self.dropoff_address.is_none()
            && self.coupon_id.is_none()
            && self.notes.is_none()
            && self.discount_amount.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn status_roundtrip() {
        for status in [
            DraftStatus::Pending,
            DraftStatus::Paying,
            DraftStatus::Paid,
            DraftStatus::Cancelled,
            DraftStatus::Expired,
        ] {
            assert_eq!(DraftStatus::parse(status.as_str()), Some(status));
        }
        assert_eq!(DraftStatus::parse("refunded"), None);
    }

    #[test]
    fn only_pending_and_paying_are_open() {
        assert!(DraftStatus::Pending.is_open());
        assert!(DraftStatus::Paying.is_open());
        assert!(!DraftStatus::Paid.is_open());
        assert!(!DraftStatus::Cancelled.is_open());
        assert!(!DraftStatus::Expired.is_open());
    }

    #[test]
    fn overdue_requires_open_status() {
        let now = Utc::now();
        let mut draft = DraftCheckout {
            id: Uuid::new_v4(),
            trip_id: 1,
            session_token: "tok".into(),
            user_id: None,
            status: DraftStatus::Pending,
            total_price: 0,
            discount_amount: 0,
            passenger_name: None,
            passenger_phone: None,
            passenger_email: None,
            pickup_location_id: None,
            dropoff_location_id: None,
            pickup_address: None,
            dropoff_address: None,
            coupon_id: None,
            notes: None,
            payment_provider: None,
            payment_intent_id: None,
            expires_at: now - Duration::seconds(1),
            completed_at: None,
            booking_id: None,
            items: vec![],
        };
        assert!(draft.is_overdue(now));

        draft.status = DraftStatus::Paid;
        assert!(!draft.is_overdue(now));
    }
}
