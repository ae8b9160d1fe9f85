pub mod ipsec_map_port;
pub mod metrics_port;
