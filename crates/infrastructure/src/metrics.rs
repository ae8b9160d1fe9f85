use ports::secondary::metrics_port::{ConfigMetrics, EventMetrics, IpsecMetrics, ProgramMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct OutcomeLabels {
    pub direction: String,
    pub outcome: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ProgramLabels {
    pub program: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReloadLabels {
    pub component: String,
    pub result: String,
}

// ── Agent metrics registry ──────────────────────────────────────────

/// Prometheus metrics registry for the agent.
///
/// All metric families use interior mutability (atomics), so recording
/// only requires `&self`. Wrap in `Arc` for multi-task sharing.
pub struct AgentMetrics {
    registry: Registry,
    pub datapath_packets_total: Family<OutcomeLabels, Counter>,
    pub drops_total: Family<ReasonLabels, Counter>,
    pub nodes_loaded: Gauge,
    pub endpoints_loaded: Gauge,
    pub local_key: Gauge,
    pub key_rotations_total: Counter,
    pub stale_peers: Gauge,
    pub ebpf_program_status: Family<ProgramLabels, Gauge>,
    pub config_reloads_total: Family<ReloadLabels, Counter>,
    pub events_dropped_total: Family<ReasonLabels, Counter>,
}

impl AgentMetrics {
    /// Create a new registry with all metrics under the `xfrmgate` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("xfrmgate");

        let datapath_packets_total = Family::<OutcomeLabels, Counter>::default();
        registry.register(
            "datapath_packets",
            "Packets classified by the tc-ipsec program, by direction and outcome",
            datapath_packets_total.clone(),
        );

        let drops_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "drops",
            "Drop notifications received from the datapath, by reason",
            drops_total.clone(),
        );

        let nodes_loaded = Gauge::default();
        registry.register(
            "nodes_loaded",
            "Peer nodes installed in the node map",
            nodes_loaded.clone(),
        );

        let endpoints_loaded = Gauge::default();
        registry.register(
            "endpoints_loaded",
            "Remote endpoint prefixes installed in the endpoint trie",
            endpoints_loaded.clone(),
        );

        let local_key = Gauge::default();
        registry.register(
            "local_key_index",
            "Local IPsec key index (0 = encryption disabled)",
            local_key.clone(),
        );

        let key_rotations_total = Counter::default();
        registry.register(
            "key_rotations",
            "Local key rotations",
            key_rotations_total.clone(),
        );

        let stale_peers = Gauge::default();
        registry.register(
            "stale_peers",
            "Peers whose key index is more than one rotation away",
            stale_peers.clone(),
        );

        let ebpf_program_status = Family::<ProgramLabels, Gauge>::default();
        registry.register(
            "ebpf_program_status",
            "eBPF program load status (1=loaded, 0=failed)",
            ebpf_program_status.clone(),
        );

        let config_reloads_total = Family::<ReloadLabels, Counter>::default();
        registry.register(
            "config_reloads",
            "Configuration reload attempts",
            config_reloads_total.clone(),
        );

        let events_dropped_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "events_dropped",
            "Drop notifications lost before reaching userspace",
            events_dropped_total.clone(),
        );

        Self {
            registry,
            datapath_packets_total,
            drops_total,
            nodes_loaded,
            endpoints_loaded,
            local_key,
            key_rotations_total,
            stale_peers,
            ebpf_program_status,
            config_reloads_total,
            events_dropped_total,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for AgentMetrics {
    fn default() -> Self {
        Self::new()
    }
}

fn gauge_value(count: u64) -> i64 {
    count.try_into().unwrap_or(i64::MAX)
}

// ── Sub-trait implementations ──────────────────────────────────────

impl IpsecMetrics for AgentMetrics {
    fn set_local_key(&self, key: u8) {
        self.local_key.set(i64::from(key));
    }

    fn set_nodes_loaded(&self, count: u64) {
        self.nodes_loaded.set(gauge_value(count));
    }

    fn set_endpoints_loaded(&self, count: u64) {
        self.endpoints_loaded.set(gauge_value(count));
    }

    fn record_datapath_outcome(&self, direction: &str, outcome: &str, count: u64) {
        self.datapath_packets_total
            .get_or_create(&OutcomeLabels {
                direction: direction.to_string(),
                outcome: outcome.to_string(),
            })
            .inc_by(count);
    }

    fn record_drop(&self, reason: &str) {
        self.drops_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }

    fn record_key_rotation(&self) {
        self.key_rotations_total.inc();
    }

    fn set_stale_peers(&self, count: u64) {
        self.stale_peers.set(gauge_value(count));
    }
}

impl ProgramMetrics for AgentMetrics {
    fn set_ebpf_program_status(&self, program: &str, loaded: bool) {
        self.ebpf_program_status
            .get_or_create(&ProgramLabels {
                program: program.to_string(),
            })
            .set(i64::from(loaded));
    }
}

impl ConfigMetrics for AgentMetrics {
    fn record_config_reload(&self, component: &str, result: &str) {
        self.config_reloads_total
            .get_or_create(&ReloadLabels {
                component: component.to_string(),
                result: result.to_string(),
            })
            .inc();
    }
}

impl EventMetrics for AgentMetrics {
    fn record_event_dropped(&self, reason: &str) {
        self.events_dropped_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}
