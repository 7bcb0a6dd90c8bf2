pub mod drafts;
pub mod expiry;
pub mod finalize;
pub mod gateway;
pub mod reconcile;
pub mod seat_flow;

pub use drafts::DraftCheckoutService;
pub use expiry::ExpiryReconciler;
pub use finalize::BookingService;
pub use gateway::WebhookVerifier;
pub use reconcile::{PaymentFlow, PaymentSelection, WebhookDisposition};
pub use seat_flow::{LockResult, SeatFlowService};
