use crate::secondary::metrics_port::{ConfigMetrics, EventMetrics, IpsecMetrics, ProgramMetrics};

/// No-op implementation of all metrics sub-traits for use in tests.
pub struct NoopMetrics;

impl IpsecMetrics for NoopMetrics {}
impl ProgramMetrics for NoopMetrics {}
impl ConfigMetrics for NoopMetrics {}
impl EventMetrics for NoopMetrics {}
