//! devclaim-api: HTTP surface of devclaim.
//!
//! The orchestrator's scheduler calls the two extension routes for every
//! pending workload; the remaining routes are read-only inspection.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/scheduler/filter` | Filter candidate hosts for a workload |
//! | POST | `/api/v1/scheduler/bind` | Commit a workload to a host |
//! | GET | `/api/v1/claims` | List claims |
//! | GET | `/api/v1/devices` | List devices |
//! | GET | `/api/v1/hosts` | List hosts |
//! | GET | `/healthz` | Liveness |
//!
//! Extension routes always answer HTTP 200; failures, including
//! undecodable bodies, are reported in the response's `error` field.

pub mod handlers;
pub mod wire;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use devclaim_scheduler::{Allocator, Binder, FilterConfig};
use devclaim_state::ObjectStore;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<dyn ObjectStore>,
    pub allocator: Allocator,
    pub binder: Binder,
}

impl ApiState {
    pub fn new(store: Arc<dyn ObjectStore>, filter: FilterConfig) -> Self {
        Self {
            allocator: Allocator::new(store.clone(), filter),
            binder: Binder::new(store.clone()),
            store,
        }
    }
}

/// Build the complete API router.
pub fn build_router(store: Arc<dyn ObjectStore>, filter: FilterConfig) -> Router {
    let state = ApiState::new(store, filter);

    let api_routes = Router::new()
        .route("/scheduler/filter", post(handlers::filter))
        .route("/scheduler/bind", post(handlers::bind))
        .route("/claims", get(handlers::list_claims))
        .route("/devices", get(handlers::list_devices))
        .route("/hosts", get(handlers::list_hosts))
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
