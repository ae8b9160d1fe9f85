use std::net::IpAddr;
use std::sync::Arc;

use domain::common::entity::IpNetwork;
use domain::common::error::DomainError;
use domain::ipsec::engine::IpsecEngine;
use domain::ipsec::entity::{ClusterNode, DatapathSettings, KeyEpoch, RemoteEndpoint};
use ebpf_common::ipsec::{NodeValue, RemoteEndpointInfo};
use ports::secondary::ipsec_map_port::IpsecMapPort;
use ports::secondary::metrics_port::MetricsPort;

/// Application-level IPsec service.
///
/// Orchestrates the domain engine, optional eBPF map sync, and metrics updates.
/// Designed to be wrapped in `RwLock` for shared access from the reload task
/// and HTTP handlers.
///
/// Map writes that fail are logged and skipped: the in-memory state stays
/// authoritative and the next mutation retries the full sync.
pub struct IpsecAppService {
    engine: IpsecEngine,
    settings: DatapathSettings,
    map_port: Option<Box<dyn IpsecMapPort + Send>>,
    metrics: Arc<dyn MetricsPort>,
}

impl IpsecAppService {
    pub fn new(
        engine: IpsecEngine,
        map_port: Option<Box<dyn IpsecMapPort + Send>>,
        metrics: Arc<dyn MetricsPort>,
    ) -> Self {
        Self {
            engine,
            settings: DatapathSettings::default(),
            map_port,
            metrics,
        }
    }

    /// Attach the eBPF map port once the program is loaded, and push the
    /// current state into it.
    pub fn set_map_port(&mut self, port: Box<dyn IpsecMapPort + Send>) {
        self.map_port = Some(port);
        self.sync_ebpf_maps();
    }

    pub fn settings(&self) -> &DatapathSettings {
        &self.settings
    }

    pub fn local_key(&self) -> KeyEpoch {
        self.engine.local_key()
    }

    pub fn node_count(&self) -> usize {
        self.engine.node_count()
    }

    pub fn endpoint_count(&self) -> usize {
        self.engine.endpoint_count()
    }

    pub fn engine(&self) -> &IpsecEngine {
        &self.engine
    }

    /// Replace the whole datapath state.
    ///
    /// Nodes and endpoints are validated together before anything is
    /// swapped, so a rejected reload leaves both the engine and the maps
    /// untouched.
    pub fn reload(
        &mut self,
        nodes: Vec<ClusterNode>,
        endpoints: Vec<RemoteEndpoint>,
        key: KeyEpoch,
        settings: DatapathSettings,
    ) -> Result<(), DomainError> {
        IpsecEngine::validate_nodes(&nodes)?;
        IpsecEngine::validate_endpoints(&endpoints)?;

        let previous = self.engine.local_key();
        self.engine.reload_nodes(nodes)?;
        self.engine.reload_endpoints(endpoints)?;
        self.engine.set_local_key(key);
        self.settings = settings;

        self.sync_ebpf_maps();
        if key != previous {
            // A config edit that bumps the key by one generation is a rotation.
            if previous.is_enabled() && key == previous.next() {
                self.metrics.record_key_rotation();
            }
            tracing::info!(from = %previous, to = %key, "local key changed by reload");
        }
        self.update_metrics();
        self.warn_inconsistencies();
        Ok(())
    }

    /// Switch the local key to `key`. Peers are left as they are.
    pub fn set_local_key(&mut self, key: KeyEpoch) {
        let previous = self.engine.local_key();
        self.engine.set_local_key(key);
        self.sync_encrypt_key();
        self.update_metrics();
        tracing::info!(from = %previous, to = %key, "local key index set");
    }

    /// Advance the local key by one generation (15 wraps to 1).
    pub fn rotate_key(&mut self) -> Result<KeyEpoch, DomainError> {
        let previous = self.engine.local_key();
        let key = self.engine.rotate_key()?;
        self.sync_encrypt_key();
        self.metrics.record_key_rotation();
        self.update_metrics();
        tracing::info!(from = %previous, to = %key, "local key rotated");
        Ok(key)
    }

    /// Full sync: config, peers, then the key.
    ///
    /// `ENCRYPT_STATE` is written last so that every peer is installed
    /// before packets start selecting keys against it.
    fn sync_ebpf_maps(&mut self) {
        let Some(ref mut map) = self.map_port else {
            return;
        };

        if let Err(e) = map.set_config(&self.settings.to_ipsec_config()) {
            tracing::warn!("failed to write IPsec config into eBPF map: {e}");
        }

        let nodes = node_entries(self.engine.nodes());
        if let Err(e) = map.load_nodes(&nodes) {
            tracing::warn!("failed to load nodes into eBPF map: {e}");
        }

        let endpoints = endpoint_entries(self.engine.endpoints());
        if let Err(e) = map.load_endpoints(&endpoints) {
            tracing::warn!("failed to load remote endpoints into eBPF map: {e}");
        }

        self.sync_encrypt_key();
    }

    fn sync_encrypt_key(&mut self) {
        let Some(ref mut map) = self.map_port else {
            return;
        };
        let key = self.engine.local_key().get();
        if let Err(e) = map.set_encrypt_key(key) {
            tracing::warn!(key, "failed to write local key into eBPF map: {e}");
        }
    }

    fn update_metrics(&self) {
        self.metrics.set_local_key(self.engine.local_key().get());
        self.metrics
            .set_nodes_loaded(self.engine.node_count() as u64);
        self.metrics
            .set_endpoints_loaded(self.engine.endpoint_count() as u64);
        self.metrics
            .set_stale_peers(self.engine.stale_peers().len() as u64);
    }

    fn warn_inconsistencies(&self) {
        let local = self.engine.local_key();
        for node in self.engine.stale_peers() {
            tracing::warn!(
                node_id = node.id,
                node = %node.name,
                peer_key = %node.key,
                local_key = %local,
                "peer key is more than one rotation away"
            );
        }
        for ep in self.engine.unresolved_tunnel_endpoints() {
            tracing::warn!(
                prefix = %ep.prefix,
                tunnel_endpoint = ?ep.tunnel_endpoint,
                "tunnel endpoint is not a known node address, egress will drop"
            );
        }
    }
}

/// One NODES entry per node address.
fn node_entries<'a>(nodes: impl Iterator<Item = &'a ClusterNode>) -> Vec<(IpAddr, NodeValue)> {
    nodes
        .flat_map(|n| {
            let value = n.to_node_value();
            n.addresses.iter().map(move |addr| (*addr, value))
        })
        .collect()
}

fn endpoint_entries(endpoints: &[RemoteEndpoint]) -> Vec<(IpNetwork, RemoteEndpointInfo)> {
    endpoints
        .iter()
        .map(|ep| (ep.prefix.normalized(), ep.to_endpoint_info()))
        .collect()
}
