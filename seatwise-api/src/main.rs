use std::net::SocketAddr;
use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use seatwise_api::state::{AppState, AuthConfig};
use seatwise_checkout::{
    BookingService, DraftCheckoutService, ExpiryReconciler, PaymentFlow, SeatFlowService,
    WebhookVerifier,
};
use seatwise_core::lock::SeatLockStore;
use seatwise_store::{DbClient, EventProducer, RedisSeatLockStore};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "seatwise_api=debug,seatwise_checkout=debug,tower_http=debug".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = seatwise_store::app_config::Config::load().expect("Failed to load config");
    tracing::info!("Starting Seatwise API on port {}", config.server.port);

    let db = DbClient::new(&config.database.url)
        .await
        .expect("Failed to connect to Postgres");
    db.migrate().await.expect("Failed to run migrations");

    let redis_store =
        RedisSeatLockStore::new(&config.redis.url).expect("Failed to connect to Redis");
    let store: Arc<dyn SeatLockStore> = Arc::new(redis_store.clone());

    let producer = Arc::new(
        EventProducer::new(&config.kafka.brokers).expect("Failed to create Kafka producer"),
    );

    let verifier = WebhookVerifier::new(
        config.payment.checksum_key.clone(),
        config.payment.allow_unsigned,
    );

    let drafts = Arc::new(DraftCheckoutService::new(
        db.clone(),
        store.clone(),
        producer.clone(),
    ));
    let booking = Arc::new(BookingService::new(store.clone(), producer.clone()));
    let seat_flow = Arc::new(SeatFlowService::new(
        db.clone(),
        store.clone(),
        drafts.clone(),
        producer.clone(),
        config.business_rules.clone(),
    ));
    let payments = Arc::new(PaymentFlow::new(
        db.clone(),
        store.clone(),
        booking,
        producer.clone(),
        verifier.clone(),
        config.business_rules.clone(),
    ));

    // Push path: Redis keyspace expiry notifications feed the pruner; the
    // periodic sweep catches anything the channel dropped.
    let (expiry_tx, expiry_rx) = tokio::sync::mpsc::channel(1024);
    let listener = redis_store.clone();
    tokio::spawn(async move {
        if let Err(e) = listener.listen_expirations(expiry_tx).await {
            tracing::error!("expiry listener stopped: {}", e);
        }
    });

    let reconciler = Arc::new(ExpiryReconciler::new(
        store.clone(),
        drafts.clone(),
        config.business_rules.draft_sweep_interval_seconds,
    ));
    tokio::spawn(reconciler.clone().run_pruner(expiry_rx));
    tokio::spawn(reconciler.run_sweeper());

    let app_state = AppState {
        seat_flow,
        drafts,
        payments,
        verifier,
        auth: AuthConfig {
            secret: config.auth.jwt_secret.clone(),
        },
    };

    let app = seatwise_api::app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
