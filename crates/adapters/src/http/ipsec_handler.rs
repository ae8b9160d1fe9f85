use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use domain::ipsec::entity::ClusterNode;
use serde::Serialize;

use super::error::ApiError;
use super::state::AppState;

// ── Response DTOs ─────────────────────────────────────────────────

#[derive(Serialize)]
pub struct IpsecStatusResponse {
    pub enabled: bool,
    pub local_key: u8,
    pub tunnel_mode: bool,
    pub endpoint_routes: bool,
    pub node_count: usize,
    pub endpoint_count: usize,
    pub stale_peers: Vec<u16>,
    pub unresolved_tunnel_endpoints: Vec<String>,
}

#[derive(Serialize)]
pub struct NodeResponse {
    pub id: u16,
    pub name: String,
    pub addresses: Vec<String>,
    pub key: u8,
    /// Key index egress traffic to this node is encrypted with.
    pub negotiated_key: u8,
}

// ── Handlers ──────────────────────────────────────────────────────

pub async fn ipsec_status(State(state): State<Arc<AppState>>) -> Json<IpsecStatusResponse> {
    let svc = state.ipsec_service.read().await;
    let engine = svc.engine();
    let settings = svc.settings();

    let mut stale_peers: Vec<u16> = engine.stale_peers().iter().map(|n| n.id).collect();
    stale_peers.sort_unstable();

    Json(IpsecStatusResponse {
        enabled: settings.enabled,
        local_key: svc.local_key().get(),
        tunnel_mode: settings.tunnel_mode,
        endpoint_routes: settings.endpoint_routes,
        node_count: svc.node_count(),
        endpoint_count: svc.endpoint_count(),
        stale_peers,
        unresolved_tunnel_endpoints: engine
            .unresolved_tunnel_endpoints()
            .iter()
            .map(|ep| ep.prefix.to_string())
            .collect(),
    })
}

pub async fn list_nodes(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<NodeResponse>>, ApiError> {
    let svc = state.ipsec_service.read().await;
    let mut nodes = svc
        .engine()
        .nodes()
        .map(|n| node_response(&svc, n))
        .collect::<Result<Vec<_>, _>>()?;
    nodes.sort_unstable_by_key(|n| n.id);
    Ok(Json(nodes))
}

pub async fn get_node(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u16>,
) -> Result<Json<NodeResponse>, ApiError> {
    let svc = state.ipsec_service.read().await;
    let node = svc.engine().node(id).ok_or_else(|| ApiError::NotFound {
        code: "NODE_NOT_FOUND",
        message: format!("node {id} not found"),
    })?;
    Ok(Json(node_response(&svc, node)?))
}

fn node_response(
    svc: &application::ipsec_service_impl::IpsecAppService,
    node: &ClusterNode,
) -> Result<NodeResponse, ApiError> {
    let negotiated = svc.engine().negotiated_key(node.id)?;
    Ok(NodeResponse {
        id: node.id,
        name: node.name.clone(),
        addresses: node.addresses.iter().map(ToString::to_string).collect(),
        key: node.key.get(),
        negotiated_key: negotiated.get(),
    })
}
