use std::sync::Arc;
use std::time::Duration;

use adapters::ebpf::MetricsReader;
use ebpf_common::ipsec::{
    IPSEC_METRIC_COUNT, IPSEC_METRIC_DECRYPT_MARKED, IPSEC_METRIC_DROP_INVALID,
    IPSEC_METRIC_DROP_INVALID_REDIRECT, IPSEC_METRIC_DROP_NO_NODE_ID,
    IPSEC_METRIC_DROP_UNSUPPORTED_L2, IPSEC_METRIC_DROP_WRITE_ERROR, IPSEC_METRIC_EGRESS_PASS,
    IPSEC_METRIC_EGRESS_SEEN, IPSEC_METRIC_EVENTS_DROPPED, IPSEC_METRIC_INGRESS_PASS,
    IPSEC_METRIC_INGRESS_PULL_FAILED, IPSEC_METRIC_INGRESS_SEEN, IPSEC_METRIC_REDIRECT_DECRYPT,
    IPSEC_METRIC_REDIRECT_ENCRYPT,
};
use ports::secondary::metrics_port::MetricsPort;
use tokio_util::sync::CancellationToken;

/// `IPSEC_METRICS` index → (direction, outcome) labels.
///
/// Drop counters are shared by both hooks, hence direction `any`.
const OUTCOME_LABELS: &[(u32, &str, &str)] = &[
    (IPSEC_METRIC_EGRESS_SEEN, "egress", "seen"),
    (IPSEC_METRIC_EGRESS_PASS, "egress", "pass"),
    (IPSEC_METRIC_REDIRECT_ENCRYPT, "egress", "redirect_encrypt"),
    (IPSEC_METRIC_INGRESS_SEEN, "ingress", "seen"),
    (IPSEC_METRIC_INGRESS_PASS, "ingress", "pass"),
    (IPSEC_METRIC_DECRYPT_MARKED, "ingress", "decrypt_marked"),
    (IPSEC_METRIC_REDIRECT_DECRYPT, "ingress", "redirect_decrypt"),
    (IPSEC_METRIC_DROP_INVALID, "any", "drop_invalid"),
    (IPSEC_METRIC_DROP_WRITE_ERROR, "any", "drop_write_error"),
    (IPSEC_METRIC_DROP_UNSUPPORTED_L2, "any", "drop_unsupported_l2"),
    (IPSEC_METRIC_DROP_NO_NODE_ID, "any", "drop_no_node_id"),
    (IPSEC_METRIC_DROP_INVALID_REDIRECT, "any", "drop_invalid_redirect"),
    (IPSEC_METRIC_EVENTS_DROPPED, "any", "events_dropped"),
    (IPSEC_METRIC_INGRESS_PULL_FAILED, "ingress", "pull_failed"),
];

/// Turns cumulative kernel counters into increments.
///
/// A value lower than the previous one means the program was reloaded;
/// the new value is then counted in full.
#[derive(Debug, Default)]
pub struct CounterDeltas {
    last: [u64; IPSEC_METRIC_COUNT as usize],
}

impl CounterDeltas {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, index: u32, value: u64) -> u64 {
        let Some(slot) = self.last.get_mut(index as usize) else {
            return 0;
        };
        let delta = value.checked_sub(*slot).unwrap_or(value);
        *slot = value;
        delta
    }
}

/// Periodically read `IPSEC_METRICS` and feed the increments into the
/// `datapath_packets_total` family.
pub async fn run_kernel_metrics_loop(
    reader: MetricsReader,
    metrics: Arc<dyn MetricsPort>,
    interval: Duration,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(interval);
    let mut deltas = CounterDeltas::new();

    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        for &(index, direction, outcome) in OUTCOME_LABELS {
            match reader.read_metric(index) {
                Ok(value) => {
                    let delta = deltas.observe(index, value);
                    if delta > 0 {
                        metrics.record_datapath_outcome(direction, outcome, delta);
                    }
                }
                Err(e) => {
                    tracing::debug!(
                        map = reader.map_name(),
                        index,
                        error = %e,
                        "kernel metric read failed"
                    );
                }
            }
        }
    }

    tracing::debug!("kernel metrics loop stopped");
}
