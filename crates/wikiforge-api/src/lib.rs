//! wikiforge-api — REST API for WikiForge.
//!
//! Provides axum route handlers for provisioning, tearing down, and
//! inspecting tenant instances.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | POST | `/api/v1/instances` | Provision a new instance |
//! | GET | `/api/v1/instances` | List instances (offset/limit) |
//! | GET | `/api/v1/instances/{id}` | Get instance details |
//! | DELETE | `/api/v1/instances/{id}` | Tear an instance down |
//! | GET | `/healthz` | Liveness probe |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use wikiforge_orchestrator::Orchestrator;

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub orchestrator: Arc<Orchestrator>,
}

/// Build the complete API router.
pub fn build_router(orchestrator: Arc<Orchestrator>) -> Router {
    let state = ApiState { orchestrator };

    let api_routes = Router::new()
        .route(
            "/instances",
            get(handlers::list_instances).post(handlers::provision_instance),
        )
        .route(
            "/instances/{id}",
            get(handlers::get_instance).delete(handlers::teardown_instance),
        )
        .with_state(state);

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/healthz", get(handlers::healthz))
}
