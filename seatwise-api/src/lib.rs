use axum::http::Method;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod drafts;
pub mod error;
pub mod maintenance;
pub mod seats;
pub mod session;
pub mod state;
pub mod webhooks;

pub use state::AppState;

pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(tower_http::cors::Any)
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([
            axum::http::header::AUTHORIZATION,
            axum::http::header::CONTENT_TYPE,
            axum::http::HeaderName::from_static(session::SESSION_HEADER),
        ]);

    Router::new()
        .merge(seats::routes())
        .merge(drafts::routes())
        .merge(webhooks::routes())
        .merge(maintenance::routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
