use axum::{
    routing::{get, post},
    Router,
};
use tower_http::trace::TraceLayer;

use crate::config::{apply_security_headers, create_cors_layer};
use crate::handlers::{checkin, checkout, health_check, holds, orders, webhooks};
use crate::state::AppState;

pub fn create_routes(state: AppState) -> Router {
    let include_hsts = state.config.production;
    let cors = create_cors_layer(&state.config.cors_allowed_origins);

    let router = Router::new()
        .route("/health", get(health_check))
        .route("/events/:event_id/availability", get(holds::availability))
        .route("/events/:event_id/holds", post(holds::create_hold))
        .route("/events/:event_id/check-in", post(checkin::check_in))
        .route(
            "/holds/:hold_id",
            get(holds::get_hold).delete(holds::release_hold),
        )
        .route("/holds/:hold_id/checkout", post(checkout::create_checkout))
        .route("/payments/:payment_id/status", get(checkout::payment_status))
        .route("/orders/:order_id", get(orders::get_order))
        .route("/webhooks/:provider", post(webhooks::receive_webhook))
        .with_state(state)
        .layer(TraceLayer::new_for_http());

    apply_security_headers(router, include_hsts).layer(cors)
}
