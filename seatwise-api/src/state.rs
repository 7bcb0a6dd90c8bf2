use std::sync::Arc;

use seatwise_checkout::{DraftCheckoutService, PaymentFlow, SeatFlowService, WebhookVerifier};

#[derive(Clone)]
pub struct AuthConfig {
    pub secret: String,
}

#[derive(Clone)]
pub struct AppState {
    pub seat_flow: Arc<SeatFlowService>,
    pub drafts: Arc<DraftCheckoutService>,
    pub payments: Arc<PaymentFlow>,
    pub verifier: WebhookVerifier,
    pub auth: AuthConfig,
}
