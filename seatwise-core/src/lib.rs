pub mod booking;
pub mod draft;
pub mod error;
pub mod lock;
pub mod payment;

pub use error::{SeatFlowError, SeatFlowResult};
