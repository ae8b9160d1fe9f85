use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::sync::Arc;

use ebpf_common::datapath::DropReason;
use ebpf_common::ipsec::{DIRECTION_INGRESS, DROP_EVENT_FLAG_IPV6, DropEvent};
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Consumes drop notifications read from the `IPSEC_EVENTS` ring buffer.
///
/// Each event is logged with structured fields and counted by reason.
/// Uses `tokio::select!` for cancellation awareness and drains whatever is
/// already queued before exiting.
pub struct DropPipeline {
    metrics: Arc<dyn MetricsPort>,
}

impl DropPipeline {
    pub fn new(metrics: Arc<dyn MetricsPort>) -> Self {
        Self { metrics }
    }

    pub async fn run(self, mut rx: mpsc::Receiver<DropEvent>, cancel_token: CancellationToken) {
        let mut count: u64 = 0;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    while let Ok(event) = rx.try_recv() {
                        count += 1;
                        self.handle(&event);
                    }
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(event) => {
                            count += 1;
                            self.handle(&event);
                        }
                        None => break,
                    }
                }
            }
        }

        tracing::info!(total_drops = count, "drop pipeline stopped");
    }

    pub fn handle(&self, event: &DropEvent) {
        let reason = reason_label(event.reason);
        let (src, dst) = event_addrs(event);
        let direction = if event.direction == DIRECTION_INGRESS {
            "ingress"
        } else {
            "egress"
        };

        tracing::warn!(
            reason,
            code = event.code,
            direction,
            %src,
            %dst,
            protocol = event.protocol,
            mark = format_args!("{:#010x}", event.mark),
            ifindex = event.ifindex,
            "ipsec datapath dropped packet"
        );
        self.metrics.record_drop(reason);
    }
}

fn reason_label(raw: u8) -> &'static str {
    DropReason::from_u8(raw).map_or("unknown", DropReason::as_str)
}

/// Source and destination carried by a drop event.
pub fn event_addrs(event: &DropEvent) -> (IpAddr, IpAddr) {
    if event.flags & DROP_EVENT_FLAG_IPV6 != 0 {
        (
            IpAddr::V6(Ipv6Addr::from(event.src_addr)),
            IpAddr::V6(Ipv6Addr::from(event.dst_addr)),
        )
    } else {
        (
            IpAddr::V4(v4_prefix(&event.src_addr)),
            IpAddr::V4(v4_prefix(&event.dst_addr)),
        )
    }
}

fn v4_prefix(bytes: &[u8; 16]) -> Ipv4Addr {
    Ipv4Addr::new(bytes[0], bytes[1], bytes[2], bytes[3])
}

#[cfg(test)]
mod tests {
    use super::*;
    use ebpf_common::ipsec::DIRECTION_EGRESS;
    use ports::secondary::metrics_port::{
        ConfigMetrics, EventMetrics, IpsecMetrics, ProgramMetrics,
    };
    use std::sync::Mutex;

    #[derive(Default)]
    struct TestMetrics {
        reasons: Mutex<Vec<String>>,
    }

    impl IpsecMetrics for TestMetrics {
        fn record_drop(&self, reason: &str) {
            self.reasons.lock().unwrap().push(reason.to_string());
        }
    }
    impl ProgramMetrics for TestMetrics {}
    impl ConfigMetrics for TestMetrics {}
    impl EventMetrics for TestMetrics {}

    fn drop_event(reason: DropReason) -> DropEvent {
        let mut src_addr = [0u8; 16];
        src_addr[..4].copy_from_slice(&[10, 244, 0, 5]);
        let mut dst_addr = [0u8; 16];
        dst_addr[..4].copy_from_slice(&[10, 244, 1, 9]);
        DropEvent {
            src_addr,
            dst_addr,
            reason: reason as u8,
            code: reason.code(),
            direction: DIRECTION_EGRESS,
            protocol: 6,
            ..Default::default()
        }
    }

    #[test]
    fn decodes_v4_and_v6_addresses() {
        let ev = drop_event(DropReason::NoNodeId);
        let (src, dst) = event_addrs(&ev);
        assert_eq!(src, "10.244.0.5".parse::<IpAddr>().unwrap());
        assert_eq!(dst, "10.244.1.9".parse::<IpAddr>().unwrap());

        let v6 = DropEvent {
            src_addr: "fd00::5".parse::<Ipv6Addr>().unwrap().octets(),
            dst_addr: "fd00::9".parse::<Ipv6Addr>().unwrap().octets(),
            flags: DROP_EVENT_FLAG_IPV6,
            ..Default::default()
        };
        let (src, dst) = event_addrs(&v6);
        assert_eq!(src, "fd00::5".parse::<IpAddr>().unwrap());
        assert_eq!(dst, "fd00::9".parse::<IpAddr>().unwrap());
    }

    #[test]
    fn unknown_reason_is_labelled() {
        assert_eq!(reason_label(0), "unknown");
        assert_eq!(reason_label(200), "unknown");
        assert_eq!(reason_label(DropReason::InvalidRedirect as u8), "invalid_redirect");
    }

    #[tokio::test]
    async fn run_drains_on_cancellation() {
        let metrics = Arc::new(TestMetrics::default());
        let pipeline = DropPipeline::new(Arc::clone(&metrics) as Arc<dyn MetricsPort>);
        let (tx, rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        tx.send(drop_event(DropReason::NoNodeId)).await.unwrap();
        tx.send(drop_event(DropReason::WriteError)).await.unwrap();
        cancel.cancel();

        pipeline.run(rx, cancel).await;

        let reasons = metrics.reasons.lock().unwrap();
        assert_eq!(*reasons, vec!["no_node_id", "write_error"]);
    }

    #[tokio::test]
    async fn run_exits_on_channel_close() {
        let metrics = Arc::new(TestMetrics::default());
        let pipeline = DropPipeline::new(Arc::clone(&metrics) as Arc<dyn MetricsPort>);
        let (tx, rx) = mpsc::channel::<DropEvent>(4);
        drop(tx);
        pipeline.run(rx, CancellationToken::new()).await;
        assert!(metrics.reasons.lock().unwrap().is_empty());
    }
}
