use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::time::Instant;

use application::ipsec_service_impl::IpsecAppService;
use infrastructure::metrics::AgentMetrics;
use tokio::sync::RwLock;

/// Shared application state for the HTTP server.
///
/// Passed to Axum handlers via `State(Arc<AppState>)`.
pub struct AppState {
    pub metrics: Arc<AgentMetrics>,
    pub ebpf_loaded: Arc<AtomicBool>,
    pub ipsec_service: Arc<RwLock<IpsecAppService>>,
    pub start_time: Instant,
    pub version: &'static str,
}

impl AppState {
    pub fn new(
        metrics: Arc<AgentMetrics>,
        ebpf_loaded: Arc<AtomicBool>,
        ipsec_service: Arc<RwLock<IpsecAppService>>,
    ) -> Self {
        Self {
            metrics,
            ebpf_loaded,
            ipsec_service,
            start_time: Instant::now(),
            version: env!("CARGO_PKG_VERSION"),
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use domain::ipsec::engine::IpsecEngine;
    use ports::secondary::metrics_port::MetricsPort;
    use ports::test_utils::NoopMetrics;

    pub fn test_state(ebpf_loaded: bool, service: IpsecAppService) -> Arc<AppState> {
        Arc::new(AppState::new(
            Arc::new(AgentMetrics::new()),
            Arc::new(AtomicBool::new(ebpf_loaded)),
            Arc::new(RwLock::new(service)),
        ))
    }

    pub fn empty_service() -> IpsecAppService {
        let noop: Arc<dyn MetricsPort> = Arc::new(NoopMetrics);
        IpsecAppService::new(IpsecEngine::default(), None, noop)
    }
}
