use std::net::IpAddr;

use domain::common::entity::IpNetwork;
use domain::common::error::DomainError;
use ebpf_common::ipsec::{IpsecConfig, NodeValue, RemoteEndpointInfo};

/// Secondary port for the tc-ipsec eBPF maps.
///
/// Provides a typed interface to `ENCRYPT_STATE`, `IPSEC_CONFIG`, the
/// `NODES_V4/V6` hash maps and the `REMOTE_ENDPOINTS_V4/V6` LPM tries.
/// Implemented by a map manager in the adapter layer.
pub trait IpsecMapPort: Send + Sync {
    /// Replace the local key index read by every packet.
    fn set_encrypt_key(&mut self, key: u8) -> Result<(), DomainError>;

    /// Replace the datapath configuration.
    fn set_config(&mut self, config: &IpsecConfig) -> Result<(), DomainError>;

    /// Make the node maps hold exactly `entries`, removing anything else.
    fn load_nodes(&mut self, entries: &[(IpAddr, NodeValue)]) -> Result<(), DomainError>;

    /// Make the endpoint tries hold exactly `entries`, removing anything else.
    fn load_endpoints(
        &mut self,
        entries: &[(IpNetwork, RemoteEndpointInfo)],
    ) -> Result<(), DomainError>;

    /// Number of node map entries (both families).
    fn node_count(&self) -> Result<usize, DomainError>;

    /// Number of endpoint trie entries (both families).
    fn endpoint_count(&self) -> Result<usize, DomainError>;
}
