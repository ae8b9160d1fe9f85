use std::fmt;
use std::net::IpAddr;

use serde::{Deserialize, Serialize};

use ebpf_common::ipsec::{
    IPSEC_FLAG_AUX_MARK, IPSEC_FLAG_ENABLED, IPSEC_FLAG_ENDPOINT_ROUTES, IPSEC_FLAG_TUNNEL_MODE,
    IpsecConfig, NodeValue, RemoteEndpointInfo,
};
use ebpf_common::key::{KeyIndex, MAX_KEY_INDEX};

use crate::common::entity::IpNetwork;

use super::error::IpsecError;

// ── Key epoch ───────────────────────────────────────────────────────

/// A node's active key index. 0 disables encryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(into = "u8")]
pub struct KeyEpoch(KeyIndex);

impl KeyEpoch {
    pub const DISABLED: Self = Self(KeyIndex::DISABLED);

    pub fn new(value: u8) -> Result<Self, IpsecError> {
        KeyIndex::new(value)
            .map(Self)
            .ok_or(IpsecError::InvalidKeyIndex { value })
    }

    pub fn get(self) -> u8 {
        self.0.get()
    }

    pub fn is_enabled(self) -> bool {
        self.0.is_enabled()
    }

    /// Following epoch: 1 → 2 → … → 15 → 1. A disabled epoch stays disabled.
    #[must_use]
    pub fn next(self) -> Self {
        Self(self.0.next())
    }

    /// Same generation or one rotation apart.
    pub fn is_adjacent(self, other: Self) -> bool {
        self.0.is_adjacent(other.0)
    }

    pub fn as_key_index(self) -> KeyIndex {
        self.0
    }
}

impl TryFrom<u8> for KeyEpoch {
    type Error = IpsecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<KeyEpoch> for u8 {
    fn from(epoch: KeyEpoch) -> Self {
        epoch.get()
    }
}

impl<'de> Deserialize<'de> for KeyEpoch {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = u8::deserialize(deserializer)?;
        Self::new(value).map_err(|_| {
            serde::de::Error::custom(format!(
                "key index {value} out of range [0, {MAX_KEY_INDEX}]"
            ))
        })
    }
}

impl fmt::Display for KeyEpoch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.get())
    }
}

// ── Cluster node ────────────────────────────────────────────────────

/// A peer node. Each address becomes one NODES map entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterNode {
    pub id: u16,
    pub name: String,
    pub addresses: Vec<IpAddr>,
    pub key: KeyEpoch,
}

impl ClusterNode {
    pub fn validate(&self) -> Result<(), IpsecError> {
        if self.id == 0 {
            return Err(IpsecError::InvalidNodeId {
                name: self.name.clone(),
            });
        }
        if self.name.trim().is_empty() {
            return Err(IpsecError::EmptyNodeName { id: self.id });
        }
        if self.addresses.is_empty() {
            return Err(IpsecError::NoNodeAddresses { id: self.id });
        }
        Ok(())
    }

    pub fn to_node_value(&self) -> NodeValue {
        NodeValue::new(self.id, self.key.get())
    }
}

// ── Remote endpoint ─────────────────────────────────────────────────

/// A remote prefix owned by one security identity, optionally reachable
/// through a tunnel endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteEndpoint {
    pub prefix: IpNetwork,
    pub identity: u32,
    #[serde(default)]
    pub tunnel_endpoint: Option<IpAddr>,
}

impl RemoteEndpoint {
    pub fn validate(&self) -> Result<(), IpsecError> {
        self.prefix.validate()?;
        if let Some(ep) = self.tunnel_endpoint
            && ep.is_unspecified()
        {
            return Err(IpsecError::InvalidTunnelEndpoint {
                prefix: self.prefix.to_string(),
                addr: ep.to_string(),
            });
        }
        Ok(())
    }

    pub fn to_endpoint_info(&self) -> RemoteEndpointInfo {
        match self.tunnel_endpoint {
            None => RemoteEndpointInfo::local(self.identity),
            Some(IpAddr::V4(v4)) => RemoteEndpointInfo::with_tunnel_v4(self.identity, v4.octets()),
            Some(IpAddr::V6(v6)) => RemoteEndpointInfo::with_tunnel_v6(self.identity, v6.octets()),
        }
    }
}

// ── Datapath settings ───────────────────────────────────────────────

/// Settings written to the IPSEC_CONFIG map. Interface indices are
/// resolved from device names by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatapathSettings {
    pub enabled: bool,
    pub tunnel_mode: bool,
    pub endpoint_routes: bool,
    pub use_aux_mark_channel: bool,
    pub net_ifindex: u32,
    pub host_ifindex: u32,
    pub gateway_mac: [u8; 6],
}

impl DatapathSettings {
    pub fn to_ipsec_config(&self) -> IpsecConfig {
        let mut flags = 0;
        if self.enabled {
            flags |= IPSEC_FLAG_ENABLED;
        }
        if self.tunnel_mode {
            flags |= IPSEC_FLAG_TUNNEL_MODE;
        }
        if self.endpoint_routes {
            flags |= IPSEC_FLAG_ENDPOINT_ROUTES;
        }
        if self.use_aux_mark_channel {
            flags |= IPSEC_FLAG_AUX_MARK;
        }
        IpsecConfig {
            net_ifindex: self.net_ifindex,
            host_ifindex: self.host_ifindex,
            gateway_mac: self.gateway_mac,
            flags,
            _pad: 0,
        }
    }
}
