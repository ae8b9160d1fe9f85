use std::net::IpAddr;

use domain::common::entity::IpNetwork;
use domain::ipsec::engine::IpsecEngine;
use domain::ipsec::entity::{ClusterNode, DatapathSettings, KeyEpoch, RemoteEndpoint};
use ebpf_common::ipsec::{NODES_MAX_ENTRIES, REMOTE_ENDPOINTS_MAX_ENTRIES};
use ebpf_common::key::MAX_KEY_INDEX;
use serde::{Deserialize, Serialize};

use super::common::{ConfigError, check_limit, default_true, parse_mac};
use crate::constants::{DEFAULT_HOST_DEVICE, DEFAULT_METRICS_INTERVAL_SECS, DEFAULT_NET_DEVICE};

// ── IPsec section ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IpsecSectionConfig {
    #[serde(default)]
    pub enabled: bool,

    /// Local key index, 1-15 when enabled.
    #[serde(default)]
    pub key_index: u8,

    #[serde(default)]
    pub tunnel_mode: bool,

    #[serde(default)]
    pub endpoint_routes: bool,

    /// Also copy the mark into the auxiliary metadata slot.
    #[serde(default = "default_true")]
    pub use_aux_mark_channel: bool,

    #[serde(default = "default_net_device")]
    pub net_device: String,

    #[serde(default = "default_host_device")]
    pub host_device: String,

    #[serde(default)]
    pub gateway_mac: Option<String>,

    #[serde(default = "default_metrics_interval")]
    pub metrics_interval_secs: u64,

    #[serde(default)]
    pub nodes: Vec<NodeConfig>,

    #[serde(default)]
    pub endpoints: Vec<EndpointConfig>,
}

impl Default for IpsecSectionConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            key_index: 0,
            tunnel_mode: false,
            endpoint_routes: false,
            use_aux_mark_channel: true,
            net_device: default_net_device(),
            host_device: default_host_device(),
            gateway_mac: None,
            metrics_interval_secs: DEFAULT_METRICS_INTERVAL_SECS,
            nodes: Vec::new(),
            endpoints: Vec::new(),
        }
    }
}

fn default_net_device() -> String {
    DEFAULT_NET_DEVICE.to_string()
}

fn default_host_device() -> String {
    DEFAULT_HOST_DEVICE.to_string()
}

fn default_metrics_interval() -> u64 {
    DEFAULT_METRICS_INTERVAL_SECS
}

impl IpsecSectionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.key_index > MAX_KEY_INDEX {
            return Err(ConfigError::validation(
                "ipsec.key_index",
                format!("{} is out of range [0, {MAX_KEY_INDEX}]", self.key_index),
            ));
        }
        if self.enabled && self.key_index == 0 {
            return Err(ConfigError::validation(
                "ipsec.key_index",
                "encryption is enabled but the key index is 0",
            ));
        }
        if self.metrics_interval_secs == 0 {
            return Err(ConfigError::validation(
                "ipsec.metrics_interval_secs",
                "must be greater than 0",
            ));
        }
        if self.enabled && self.net_device.trim().is_empty() {
            return Err(ConfigError::validation(
                "ipsec.net_device",
                "required when ipsec is enabled",
            ));
        }
        if self.enabled && !self.endpoint_routes && self.host_device.trim().is_empty() {
            return Err(ConfigError::validation(
                "ipsec.host_device",
                "required unless endpoint_routes is set",
            ));
        }
        let mac = self.gateway_mac()?;
        // The redirect into net_device rewrites the destination MAC; a zero
        // address makes the stack drop the frame as OTHERHOST.
        if self.enabled && (self.gateway_mac.is_none() || mac == [0; 6]) {
            return Err(ConfigError::validation(
                "ipsec.gateway_mac",
                "required when ipsec is enabled",
            ));
        }

        check_limit("ipsec.nodes", self.nodes.len(), NODES_MAX_ENTRIES as usize)?;
        check_limit(
            "ipsec.endpoints",
            self.endpoints.len(),
            REMOTE_ENDPOINTS_MAX_ENTRIES as usize,
        )?;

        for (idx, node) in self.nodes.iter().enumerate() {
            node.validate(idx)?;
        }
        for (idx, ep) in self.endpoints.iter().enumerate() {
            ep.validate(idx)?;
        }

        // Cross-entry checks (duplicate ids, addresses and prefixes).
        IpsecEngine::validate_nodes(&self.to_domain_nodes()?)
            .map_err(|e| ConfigError::validation("ipsec.nodes", e.to_string()))?;
        IpsecEngine::validate_endpoints(&self.to_domain_endpoints()?)
            .map_err(|e| ConfigError::validation("ipsec.endpoints", e.to_string()))?;
        Ok(())
    }

    pub fn key_epoch(&self) -> Result<KeyEpoch, ConfigError> {
        KeyEpoch::new(self.key_index)
            .map_err(|e| ConfigError::validation("ipsec.key_index", e.to_string()))
    }

    pub fn gateway_mac(&self) -> Result<[u8; 6], ConfigError> {
        match &self.gateway_mac {
            None => Ok([0; 6]),
            Some(s) => parse_mac(s).map_err(|reason| ConfigError::InvalidValue {
                field: "ipsec.gateway_mac".to_string(),
                value: s.clone(),
                expected: format!("a MAC address like 02:00:00:00:00:01 ({reason})"),
            }),
        }
    }

    /// Nodes inherit the local key index unless they set their own.
    pub fn to_domain_nodes(&self) -> Result<Vec<ClusterNode>, ConfigError> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(idx, n)| n.to_domain(idx, self.key_index))
            .collect()
    }

    pub fn to_domain_endpoints(&self) -> Result<Vec<RemoteEndpoint>, ConfigError> {
        self.endpoints
            .iter()
            .enumerate()
            .map(|(idx, ep)| ep.to_domain(idx))
            .collect()
    }

    /// Settings for the `IPSEC_CONFIG` map. Interface indices are
    /// resolved from `net_device`/`host_device` by the caller.
    pub fn datapath_settings(
        &self,
        net_ifindex: u32,
        host_ifindex: u32,
    ) -> Result<DatapathSettings, ConfigError> {
        Ok(DatapathSettings {
            enabled: self.enabled,
            tunnel_mode: self.tunnel_mode,
            endpoint_routes: self.endpoint_routes,
            use_aux_mark_channel: self.use_aux_mark_channel,
            net_ifindex,
            host_ifindex,
            gateway_mac: self.gateway_mac()?,
        })
    }
}

// ── Node entries ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    pub id: u16,
    pub name: String,
    pub addresses: Vec<String>,
    #[serde(default)]
    pub key_index: Option<u8>,
}

impl NodeConfig {
    pub fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        let prefix = format!("ipsec.nodes[{idx}]");
        if self.id == 0 {
            return Err(ConfigError::validation(
                format!("{prefix}.id"),
                "node id 0 is reserved",
            ));
        }
        if self.name.trim().is_empty() {
            return Err(ConfigError::validation(
                format!("{prefix}.name"),
                "must not be empty",
            ));
        }
        if self.addresses.is_empty() {
            return Err(ConfigError::validation(
                format!("{prefix}.addresses"),
                "at least one address is required",
            ));
        }
        for (i, addr) in self.addresses.iter().enumerate() {
            parse_addr(addr, &format!("{prefix}.addresses[{i}]"))?;
        }
        if let Some(key) = self.key_index
            && key > MAX_KEY_INDEX
        {
            return Err(ConfigError::validation(
                format!("{prefix}.key_index"),
                format!("{key} is out of range [0, {MAX_KEY_INDEX}]"),
            ));
        }
        Ok(())
    }

    pub fn to_domain(&self, idx: usize, default_key: u8) -> Result<ClusterNode, ConfigError> {
        let prefix = format!("ipsec.nodes[{idx}]");
        let addresses = self
            .addresses
            .iter()
            .enumerate()
            .map(|(i, a)| parse_addr(a, &format!("{prefix}.addresses[{i}]")))
            .collect::<Result<Vec<_>, _>>()?;
        let key = KeyEpoch::new(self.key_index.unwrap_or(default_key))
            .map_err(|e| ConfigError::validation(format!("{prefix}.key_index"), e.to_string()))?;
        Ok(ClusterNode {
            id: self.id,
            name: self.name.clone(),
            addresses,
            key,
        })
    }
}

// ── Endpoint entries ───────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointConfig {
    pub prefix: String,
    pub identity: u32,
    #[serde(default)]
    pub tunnel_endpoint: Option<String>,
}

impl EndpointConfig {
    pub fn validate(&self, idx: usize) -> Result<(), ConfigError> {
        self.to_domain(idx)?;
        Ok(())
    }

    pub fn to_domain(&self, idx: usize) -> Result<RemoteEndpoint, ConfigError> {
        let prefix_field = format!("ipsec.endpoints[{idx}]");
        let prefix: IpNetwork =
            self.prefix
                .parse()
                .map_err(|reason: String| ConfigError::InvalidValue {
                    field: format!("{prefix_field}.prefix"),
                    value: self.prefix.clone(),
                    expected: format!("a CIDR like 10.244.1.0/24 ({reason})"),
                })?;
        let tunnel_endpoint = self
            .tunnel_endpoint
            .as_deref()
            .map(|a| parse_addr(a, &format!("{prefix_field}.tunnel_endpoint")))
            .transpose()?;
        let ep = RemoteEndpoint {
            prefix,
            identity: self.identity,
            tunnel_endpoint,
        };
        ep.validate()
            .map_err(|e| ConfigError::validation(prefix_field, e.to_string()))?;
        Ok(ep)
    }
}

fn parse_addr(s: &str, field: &str) -> Result<IpAddr, ConfigError> {
    s.trim().parse().map_err(|_| ConfigError::InvalidValue {
        field: field.to_string(),
        value: s.to_string(),
        expected: "an IPv4 or IPv6 address".to_string(),
    })
}
