use std::sync::Arc;

use axum::Router;
use axum::routing::get;

use super::health_handler::{healthz, readyz};
use super::ipsec_handler::{get_node, ipsec_status, list_nodes};
use super::metrics_handler::metrics;
use super::state::AppState;

/// Build the agent router.
///
/// Probes and `/metrics` sit at the root, read-only IPsec state under
/// `/api/v1/ipsec`.
pub fn build_router(state: Arc<AppState>) -> Router {
    let probe_routes = Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics));

    let api_routes = Router::new()
        .route("/api/v1/ipsec", get(ipsec_status))
        .route("/api/v1/ipsec/nodes", get(list_nodes))
        .route("/api/v1/ipsec/nodes/{id}", get(get_node));

    probe_routes.merge(api_routes).with_state(state)
}
