use std::time::Duration;

// ── Network defaults ───────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/xfrmgate/config.yaml";
pub const DEFAULT_METRICS_PORT: u16 = 9090;
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";

// ── Channel capacities ─────────────────────────────────────────────

pub const DROP_EVENT_CHANNEL_CAPACITY: usize = 4_096;

// ── Timeouts and intervals ─────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
pub const DEFAULT_METRICS_INTERVAL_SECS: u64 = 10;
pub const CONFIG_WATCH_DEBOUNCE: Duration = Duration::from_millis(500);

// ── eBPF ──────────────────────────────────────────────────────────

/// Name of the compiled classifier object inside the program directory.
pub const TC_IPSEC_PROGRAM: &str = "tc-ipsec";
pub const TC_IPSEC_EGRESS: &str = "tc_ipsec_egress";
pub const TC_IPSEC_INGRESS: &str = "tc_ipsec_ingress";

/// Default directory containing compiled eBPF program binaries.
pub const DEFAULT_EBPF_PROGRAM_DIR: &str = "/usr/local/lib/xfrmgate";

/// Fall-back for local development (relative to the workspace root).
pub const DEFAULT_EBPF_PROGRAM_DIR_DEV: &str = "target/bpfel-unknown-none/release";

// ── Devices ────────────────────────────────────────────────────────

pub const DEFAULT_NET_DEVICE: &str = "cilium_net";
pub const DEFAULT_HOST_DEVICE: &str = "cilium_host";
