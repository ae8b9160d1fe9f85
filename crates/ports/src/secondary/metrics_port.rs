// Focused sub-traits for recording Prometheus metrics.
//
// All methods take `&self`; implementations use atomics from
// `prometheus-client`. Defaults are no-ops so test mocks only override
// what the service under test records.

// ── IPsec datapath metrics ─────────────────────────────────────────

pub trait IpsecMetrics: Send + Sync {
    /// Set the local key index gauge.
    fn set_local_key(&self, _key: u8) {}

    /// Set the number of peer nodes loaded into the datapath.
    fn set_nodes_loaded(&self, _count: u64) {}

    /// Set the number of remote endpoint prefixes loaded.
    fn set_endpoints_loaded(&self, _count: u64) {}

    /// Add `count` packets to the outcome counter for a direction
    /// (`egress`/`ingress`) and outcome (`pass`, `redirect_encrypt`, ...).
    fn record_datapath_outcome(&self, _direction: &str, _outcome: &str, _count: u64) {}

    /// Record one drop notification by reason label.
    fn record_drop(&self, _reason: &str) {}

    /// Increment the key rotations counter.
    fn record_key_rotation(&self) {}

    /// Set the number of peers more than one key generation away.
    fn set_stale_peers(&self, _count: u64) {}
}

// ── eBPF program metrics ───────────────────────────────────────────

pub trait ProgramMetrics: Send + Sync {
    /// Set the load status of an eBPF program (true=loaded, false=failed).
    fn set_ebpf_program_status(&self, _program: &str, _loaded: bool) {}
}

// ── Configuration metrics ──────────────────────────────────────────

pub trait ConfigMetrics: Send + Sync {
    /// Record a configuration reload attempt (success or failure).
    fn record_config_reload(&self, _component: &str, _result: &str) {}
}

// ── Event pipeline metrics ─────────────────────────────────────────

pub trait EventMetrics: Send + Sync {
    /// Record a dropped event with a reason label.
    fn record_event_dropped(&self, _reason: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port. Services accept `Arc<dyn MetricsPort>`.
pub trait MetricsPort: IpsecMetrics + ProgramMetrics + ConfigMetrics + EventMetrics {}

impl<T> MetricsPort for T where T: IpsecMetrics + ProgramMetrics + ConfigMetrics + EventMetrics {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU64, Ordering};

    #[derive(Default)]
    struct CountingMetrics {
        drops: AtomicU64,
    }

    impl IpsecMetrics for CountingMetrics {
        fn record_drop(&self, _reason: &str) {
            self.drops.fetch_add(1, Ordering::Relaxed);
        }
    }
    impl ProgramMetrics for CountingMetrics {}
    impl ConfigMetrics for CountingMetrics {}
    impl EventMetrics for CountingMetrics {}

    #[test]
    fn blanket_impl_and_defaults() {
        let concrete = Arc::new(CountingMetrics::default());
        let metrics: Arc<dyn MetricsPort> = concrete.clone();
        metrics.record_drop("no_node_id");
        metrics.record_key_rotation();
        metrics.set_ebpf_program_status("tc-ipsec", true);
        assert_eq!(concrete.drops.load(Ordering::Relaxed), 1);
    }
}
