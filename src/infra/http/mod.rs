//! HTTP surface: ranking, ingestion boundary and health.

mod error;
mod handlers;
mod middleware;
mod viewer;

pub use error::{ApiError, codes};
pub use viewer::{VIEWER_ROLE_HEADER, Viewer};

use std::sync::Arc;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use crate::application::mentions::MentionService;
use crate::application::trending::{TrendingPolicy, TrendingService};

use self::middleware::{log_responses, set_request_context};

#[derive(Clone)]
pub struct HttpState {
    pub trending: Arc<TrendingService>,
    pub mentions: Arc<MentionService>,
    pub policy: TrendingPolicy,
}

pub fn build_router(state: HttpState) -> Router {
    Router::new()
        .route("/trending_tokens", get(handlers::trending_tokens))
        .route("/mentions", post(handlers::record_mention))
        .route("/tickers/{ticker}/network", get(handlers::ticker_network))
        .route("/health", get(handlers::health))
        .fallback(handlers::not_found)
        .with_state(state)
        .layer(axum_middleware::from_fn(log_responses))
        .layer(axum_middleware::from_fn(set_request_context))
}
