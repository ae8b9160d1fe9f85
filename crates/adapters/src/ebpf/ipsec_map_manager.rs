use std::collections::HashSet;
use std::net::IpAddr;

use aya::Ebpf;
use aya::maps::lpm_trie::{Key, LpmTrie};
use aya::maps::{Array, HashMap, MapData};
use domain::common::entity::IpNetwork;
use domain::common::error::DomainError;
use ebpf_common::ipsec::{EncryptConfig, IpsecConfig, NodeValue, RemoteEndpointInfo};
use ports::secondary::ipsec_map_port::IpsecMapPort;
use tracing::info;

/// Manages the tc-ipsec maps: `ENCRYPT_STATE`, `IPSEC_CONFIG`,
/// `NODES_V4/V6` and `REMOTE_ENDPOINTS_V4/V6`.
///
/// Bulk loads insert the new entries before pruning stale ones, so a
/// lookup racing with a reload sees either the old or the new value for a
/// key, never a gap. All writes go through `&mut self`.
pub struct IpsecMapManager {
    encrypt_state: Array<MapData, EncryptConfig>,
    config: Array<MapData, IpsecConfig>,
    nodes_v4: HashMap<MapData, [u8; 4], NodeValue>,
    nodes_v6: HashMap<MapData, [u8; 16], NodeValue>,
    endpoints_v4: LpmTrie<MapData, [u8; 4], RemoteEndpointInfo>,
    endpoints_v6: LpmTrie<MapData, [u8; 16], RemoteEndpointInfo>,
    cached_node_count: usize,
    cached_endpoint_count: usize,
}

impl IpsecMapManager {
    /// Take ownership of every IPsec map from the loaded object.
    pub fn new(ebpf: &mut Ebpf) -> Result<Self, anyhow::Error> {
        let encrypt_state = Array::try_from(take(ebpf, "ENCRYPT_STATE")?)?;
        let config = Array::try_from(take(ebpf, "IPSEC_CONFIG")?)?;
        let nodes_v4 = HashMap::try_from(take(ebpf, "NODES_V4")?)?;
        let nodes_v6 = HashMap::try_from(take(ebpf, "NODES_V6")?)?;
        let endpoints_v4 = LpmTrie::try_from(take(ebpf, "REMOTE_ENDPOINTS_V4")?)?;
        let endpoints_v6 = LpmTrie::try_from(take(ebpf, "REMOTE_ENDPOINTS_V6")?)?;
        info!("IPsec maps acquired");
        Ok(Self {
            encrypt_state,
            config,
            nodes_v4,
            nodes_v6,
            endpoints_v4,
            endpoints_v6,
            cached_node_count: 0,
            cached_endpoint_count: 0,
        })
    }
}

fn take(ebpf: &mut Ebpf, name: &str) -> Result<aya::maps::Map, anyhow::Error> {
    ebpf.take_map(name)
        .ok_or_else(|| anyhow::anyhow!("map '{name}' not found in eBPF object"))
}

fn map_error(what: &str) -> impl Fn(aya::maps::MapError) -> DomainError + '_ {
    move |e| DomainError::EngineError(format!("{what} failed: {e}"))
}

impl IpsecMapPort for IpsecMapManager {
    fn set_encrypt_key(&mut self, key: u8) -> Result<(), DomainError> {
        self.encrypt_state
            .set(0, EncryptConfig::new(key), 0)
            .map_err(map_error("ENCRYPT_STATE write"))?;
        info!(key, "local key index written");
        Ok(())
    }

    fn set_config(&mut self, config: &IpsecConfig) -> Result<(), DomainError> {
        self.config
            .set(0, *config, 0)
            .map_err(map_error("IPSEC_CONFIG write"))
    }

    fn load_nodes(&mut self, entries: &[(IpAddr, NodeValue)]) -> Result<(), DomainError> {
        let mut keep_v4 = HashSet::new();
        let mut keep_v6 = HashSet::new();

        for (addr, value) in entries {
            match addr {
                IpAddr::V4(v4) => {
                    let key = v4.octets();
                    self.nodes_v4
                        .insert(key, value, 0)
                        .map_err(map_error("NODES_V4 insert"))?;
                    keep_v4.insert(key);
                }
                IpAddr::V6(v6) => {
                    let key = v6.octets();
                    self.nodes_v6
                        .insert(key, value, 0)
                        .map_err(map_error("NODES_V6 insert"))?;
                    keep_v6.insert(key);
                }
            }
        }

        let stale_v4: Vec<[u8; 4]> = self
            .nodes_v4
            .keys()
            .filter_map(Result::ok)
            .filter(|k| !keep_v4.contains(k))
            .collect();
        for key in &stale_v4 {
            self.nodes_v4
                .remove(key)
                .map_err(map_error("NODES_V4 remove"))?;
        }
        let stale_v6: Vec<[u8; 16]> = self
            .nodes_v6
            .keys()
            .filter_map(Result::ok)
            .filter(|k| !keep_v6.contains(k))
            .collect();
        for key in &stale_v6 {
            self.nodes_v6
                .remove(key)
                .map_err(map_error("NODES_V6 remove"))?;
        }

        self.cached_node_count = keep_v4.len() + keep_v6.len();
        info!(
            v4_count = keep_v4.len(),
            v6_count = keep_v6.len(),
            removed = stale_v4.len() + stale_v6.len(),
            "node maps loaded"
        );
        Ok(())
    }

    fn load_endpoints(
        &mut self,
        entries: &[(IpNetwork, RemoteEndpointInfo)],
    ) -> Result<(), DomainError> {
        let mut keep_v4: HashSet<(u32, [u8; 4])> = HashSet::new();
        let mut keep_v6: HashSet<(u32, [u8; 16])> = HashSet::new();

        for (prefix, info) in entries {
            match *prefix {
                IpNetwork::V4 { addr, prefix_len } => {
                    let prefix_len = u32::from(prefix_len);
                    self.endpoints_v4
                        .insert(&Key::new(prefix_len, addr), info, 0)
                        .map_err(map_error("REMOTE_ENDPOINTS_V4 insert"))?;
                    keep_v4.insert((prefix_len, addr));
                }
                IpNetwork::V6 { addr, prefix_len } => {
                    let prefix_len = u32::from(prefix_len);
                    self.endpoints_v6
                        .insert(&Key::new(prefix_len, addr), info, 0)
                        .map_err(map_error("REMOTE_ENDPOINTS_V6 insert"))?;
                    keep_v6.insert((prefix_len, addr));
                }
            }
        }

        let stale_v4: Vec<Key<[u8; 4]>> = self
            .endpoints_v4
            .keys()
            .filter_map(Result::ok)
            .filter(|k| !keep_v4.contains(&(k.prefix_len(), k.data())))
            .collect();
        for key in &stale_v4 {
            self.endpoints_v4
                .remove(key)
                .map_err(map_error("REMOTE_ENDPOINTS_V4 remove"))?;
        }
        let stale_v6: Vec<Key<[u8; 16]>> = self
            .endpoints_v6
            .keys()
            .filter_map(Result::ok)
            .filter(|k| !keep_v6.contains(&(k.prefix_len(), k.data())))
            .collect();
        for key in &stale_v6 {
            self.endpoints_v6
                .remove(key)
                .map_err(map_error("REMOTE_ENDPOINTS_V6 remove"))?;
        }

        self.cached_endpoint_count = keep_v4.len() + keep_v6.len();
        info!(
            v4_count = keep_v4.len(),
            v6_count = keep_v6.len(),
            removed = stale_v4.len() + stale_v6.len(),
            "remote endpoint tries loaded"
        );
        Ok(())
    }

    fn node_count(&self) -> Result<usize, DomainError> {
        Ok(self.cached_node_count)
    }

    fn endpoint_count(&self) -> Result<usize, DomainError> {
        Ok(self.cached_endpoint_count)
    }
}
