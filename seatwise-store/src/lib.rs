pub mod app_config;
pub mod booking_repo;
pub mod database;
pub mod draft_repo;
pub mod events;
pub mod redis_repo;

pub use database::DbClient;
pub use events::EventProducer;
pub use redis_repo::{RedisSeatLockStore, SeatExpired};
