use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

/// A committed sale. Created exactly once per completed draft and immutable
/// afterwards except for cancellation fields.
#[derive(Debug, Clone, Serialize)]
pub struct Booking {
    pub id: Uuid,
    /// Short human-facing reference, unique, collision-retried at creation.
    pub code: String,
    pub trip_id: i64,
    pub user_id: Option<i64>,
    pub coupon_id: Option<i64>,
    pub total_price: i64,
    pub discount_amount: i64,
    pub origin_location_id: Option<i64>,
    pub destination_location_id: Option<i64>,
    pub pickup_address: Option<String>,
    pub dropoff_address: Option<String>,
    pub payment_intent_id: Option<String>,
    pub paid_at: DateTime<Utc>,
    pub items: Vec<BookingItem>,
}

#[derive(Debug, Clone, Serialize)]
pub struct BookingItem {
    pub seat_id: i64,
    pub price: i64,
    pub seat_label: String,
}
