//! Coordination endpoint.
//!
//! Exposes the job-queue engine over a small HTTP surface. The transport is
//! deliberately thin: handlers read two identity headers and a JSON body,
//! run the state machine against the run's stores, and answer with one of
//! four status codes workers use to drive their poll loop.
//!
//! ## Submodules
//! - **`protocol`**: request/response DTOs, header names, sentinel bodies.
//! - **`state`**: shared configuration, per-run locks, store constructors.
//! - **`handlers`**: the endpoint state machine.

pub mod handlers;
pub mod protocol;
pub mod state;

use std::sync::Arc;

use axum::Router;
use axum::extract::Extension;
use axum::routing::{get, post};

use protocol::*;
use state::AppState;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route(ENDPOINT_HEALTH, get(handlers::handle_health))
        .route(ENDPOINT_HEARTBEAT, post(handlers::handle_heartbeat))
        .route(ENDPOINT_SEED, post(handlers::handle_seed))
        .route(ENDPOINT_POP, post(handlers::handle_pop))
        .route(
            ENDPOINT_COMPLETE_AND_POP,
            post(handlers::handle_complete_and_pop),
        )
        .route(ENDPOINT_STATS, get(handlers::handle_stats))
        .route(ENDPOINT_SHUTDOWN, post(handlers::handle_shutdown))
        .fallback(handlers::handle_not_found)
        .layer(Extension(state))
}

#[cfg(test)]
mod tests;
