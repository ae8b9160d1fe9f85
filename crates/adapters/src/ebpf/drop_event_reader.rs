#![allow(unsafe_code)] // RingBuf records are decoded with read_unaligned

use std::sync::Arc;

use aya::Ebpf;
use aya::maps::{MapData, RingBuf};
use ebpf_common::ipsec::DropEvent;
use ports::secondary::metrics_port::MetricsPort;
use tokio::io::unix::AsyncFd;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

/// Reads drop notifications from the `IPSEC_EVENTS` `RingBuf`.
///
/// Uses `AsyncFd` for epoll-based wakeups and drains every available
/// record per wakeup. On a full channel the event is discarded and counted.
pub struct DropEventReader {
    ring_buf: AsyncFd<RingBuf<MapData>>,
    metrics: Arc<dyn MetricsPort>,
}

impl DropEventReader {
    pub fn new(ebpf: &mut Ebpf, metrics: Arc<dyn MetricsPort>) -> Result<Self, anyhow::Error> {
        let map = ebpf
            .take_map("IPSEC_EVENTS")
            .ok_or_else(|| anyhow::anyhow!("map 'IPSEC_EVENTS' not found in eBPF object"))?;
        let ring_buf = RingBuf::try_from(map)?;
        let async_fd = AsyncFd::with_interest(ring_buf, tokio::io::Interest::READABLE)?;
        info!("IPSEC_EVENTS RingBuf reader initialized");
        Ok(Self {
            ring_buf: async_fd,
            metrics,
        })
    }

    /// Forward decoded events to `tx` until cancelled or the ring buffer
    /// fails.
    pub async fn run(self, tx: mpsc::Sender<DropEvent>, cancel: CancellationToken) {
        let mut async_fd = self.ring_buf;

        loop {
            let mut guard = tokio::select! {
                () = cancel.cancelled() => break,
                ready = async_fd.readable_mut() => match ready {
                    Ok(guard) => guard,
                    Err(e) => {
                        error!("RingBuf readable error: {e}");
                        break;
                    }
                },
            };

            let rb = guard.get_inner_mut();
            while let Some(item) = rb.next() {
                let Some(event) = parse_drop_event(&item) else {
                    debug!(len = item.len(), "short IPSEC_EVENTS record skipped");
                    continue;
                };
                if tx.try_send(event).is_err() {
                    self.metrics.record_event_dropped("channel_full");
                }
            }

            guard.clear_ready();
        }

        info!("drop event reader stopped");
    }
}

/// Decode one ring buffer record. Returns `None` for short records.
pub fn parse_drop_event(bytes: &[u8]) -> Option<DropEvent> {
    if bytes.len() < std::mem::size_of::<DropEvent>() {
        return None;
    }
    // SAFETY: DropEvent is #[repr(C)], every bit pattern is valid for its
    // integer fields, and the length was checked above.
    Some(unsafe { std::ptr::read_unaligned(bytes.as_ptr().cast::<DropEvent>()) })
}
