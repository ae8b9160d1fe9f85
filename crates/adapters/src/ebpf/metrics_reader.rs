use aya::Ebpf;
use aya::maps::{MapData, PerCpuArray, PerCpuValues};
use ebpf_common::ipsec::IPSEC_METRIC_COUNT;
use tracing::info;

/// Reads the per-CPU outcome counters of `IPSEC_METRICS`.
///
/// Each index stores a u64 counter per CPU; reads sum them. Values are
/// cumulative since the program was loaded.
pub struct MetricsReader {
    metrics_map: PerCpuArray<MapData, u64>,
    map_name: String,
}

impl MetricsReader {
    /// Take ownership of a named `PerCpuArray<u64>` map.
    pub fn new(ebpf: &mut Ebpf, map_name: &str) -> Result<Self, anyhow::Error> {
        let map = ebpf
            .take_map(map_name)
            .ok_or_else(|| anyhow::anyhow!("map '{map_name}' not found in eBPF object"))?;
        let metrics_map = PerCpuArray::try_from(map)?;
        info!(map_name, "PerCpuArray metrics map acquired");
        Ok(Self {
            metrics_map,
            map_name: map_name.to_string(),
        })
    }

    /// Read the metric at `index`, summing values across all CPUs.
    pub fn read_metric(&self, index: u32) -> Result<u64, anyhow::Error> {
        if index >= IPSEC_METRIC_COUNT {
            anyhow::bail!("{} index {index} out of range", self.map_name);
        }
        let values: PerCpuValues<u64> = self
            .metrics_map
            .get(&index, 0)
            .map_err(|e| anyhow::anyhow!("{} get index={index} failed: {e}", self.map_name))?;
        Ok(values.iter().sum())
    }

    pub fn map_name(&self) -> &str {
        &self.map_name
    }
}
