use std::collections::{BTreeMap, HashSet};
use std::net::IpAddr;

use ebpf_common::ipsec::{NODES_MAX_ENTRIES, REMOTE_ENDPOINTS_MAX_ENTRIES};
use ebpf_common::key::select_key;

use crate::common::error::DomainError;

use super::entity::{ClusterNode, KeyEpoch, RemoteEndpoint};
use super::error::IpsecError;

/// Userspace model of the IPsec datapath state.
///
/// Holds the local key epoch, the peer nodes and the remote endpoint
/// prefixes. Reloads validate the whole set first and only then swap it
/// in, so a rejected reload leaves the previous state untouched.
#[derive(Debug)]
pub struct IpsecEngine {
    local_key: KeyEpoch,
    nodes: BTreeMap<u16, ClusterNode>,
    endpoints: Vec<RemoteEndpoint>,
}

impl Default for IpsecEngine {
    fn default() -> Self {
        Self::new(KeyEpoch::DISABLED)
    }
}

impl IpsecEngine {
    pub fn new(local_key: KeyEpoch) -> Self {
        Self {
            local_key,
            nodes: BTreeMap::new(),
            endpoints: Vec::new(),
        }
    }

    pub fn local_key(&self) -> KeyEpoch {
        self.local_key
    }

    pub fn set_local_key(&mut self, key: KeyEpoch) {
        self.local_key = key;
    }

    /// Advance the local key by one generation and return it.
    pub fn rotate_key(&mut self) -> Result<KeyEpoch, DomainError> {
        if !self.local_key.is_enabled() {
            return Err(IpsecError::EncryptionDisabled.into());
        }
        self.local_key = self.local_key.next();
        Ok(self.local_key)
    }

    /// Replace all nodes. Rejects zero ids, duplicate ids and addresses
    /// claimed by two nodes.
    pub fn reload_nodes(&mut self, nodes: Vec<ClusterNode>) -> Result<(), DomainError> {
        Self::validate_nodes(&nodes)?;
        self.nodes = nodes.into_iter().map(|n| (n.id, n)).collect();
        Ok(())
    }

    /// Replace all remote endpoints. Rejects invalid prefixes and prefixes
    /// that select the same LPM entry.
    pub fn reload_endpoints(&mut self, endpoints: Vec<RemoteEndpoint>) -> Result<(), DomainError> {
        Self::validate_endpoints(&endpoints)?;
        self.endpoints = endpoints;
        Ok(())
    }

    pub fn validate_nodes(nodes: &[ClusterNode]) -> Result<(), IpsecError> {
        let max = NODES_MAX_ENTRIES as usize;
        if nodes.len() > max {
            return Err(IpsecError::TooManyNodes {
                count: nodes.len(),
                max,
            });
        }

        let mut ids = HashSet::with_capacity(nodes.len());
        let mut addrs: HashSet<IpAddr> = HashSet::new();
        let (mut v4, mut v6) = (0usize, 0usize);
        for node in nodes {
            node.validate()?;
            if !ids.insert(node.id) {
                return Err(IpsecError::DuplicateNodeId { id: node.id });
            }
            for addr in &node.addresses {
                if !addrs.insert(*addr) {
                    return Err(IpsecError::DuplicateAddress {
                        addr: addr.to_string(),
                    });
                }
                if addr.is_ipv4() {
                    v4 += 1;
                } else {
                    v6 += 1;
                }
            }
        }

        // One map entry per address, per family.
        let entries = v4.max(v6);
        if entries > max {
            return Err(IpsecError::TooManyNodes {
                count: entries,
                max,
            });
        }
        Ok(())
    }

    pub fn validate_endpoints(endpoints: &[RemoteEndpoint]) -> Result<(), IpsecError> {
        let max = REMOTE_ENDPOINTS_MAX_ENTRIES as usize;
        if endpoints.len() > max {
            return Err(IpsecError::TooManyEndpoints {
                count: endpoints.len(),
                max,
            });
        }

        let mut prefixes = HashSet::with_capacity(endpoints.len());
        for ep in endpoints {
            ep.validate()?;
            if !prefixes.insert(ep.prefix.normalized()) {
                return Err(IpsecError::DuplicatePrefix {
                    prefix: ep.prefix.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Key the datapath uses towards `node_id`.
    pub fn negotiated_key(&self, node_id: u16) -> Result<KeyEpoch, DomainError> {
        let node = self
            .nodes
            .get(&node_id)
            .ok_or(IpsecError::NodeNotFound { id: node_id })?;
        let key = select_key(self.local_key.as_key_index(), node.key.as_key_index());
        Ok(KeyEpoch::new(key.get())?)
    }

    /// Peers whose key is more than one rotation away from ours.
    ///
    /// The datapath still encrypts with the smaller index for these, which
    /// may be a key the peer no longer has installed.
    pub fn stale_peers(&self) -> Vec<&ClusterNode> {
        if !self.local_key.is_enabled() {
            return Vec::new();
        }
        self.nodes
            .values()
            .filter(|n| !n.key.is_adjacent(self.local_key))
            .collect()
    }

    /// Endpoints whose tunnel endpoint is not the address of a known node.
    /// Egress traffic to these prefixes is dropped for lack of a node id.
    pub fn unresolved_tunnel_endpoints(&self) -> Vec<&RemoteEndpoint> {
        let known: HashSet<&IpAddr> = self
            .nodes
            .values()
            .flat_map(|n| n.addresses.iter())
            .collect();
        self.endpoints
            .iter()
            .filter(|ep| matches!(&ep.tunnel_endpoint, Some(addr) if !known.contains(addr)))
            .collect()
    }

    pub fn node(&self, id: u16) -> Option<&ClusterNode> {
        self.nodes.get(&id)
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ClusterNode> {
        self.nodes.values()
    }

    pub fn endpoints(&self) -> &[RemoteEndpoint] {
        &self.endpoints
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }
}
