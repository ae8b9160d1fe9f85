mod drop_event_reader;
mod ipsec_map_manager;
mod loader;
mod metrics_reader;

pub use drop_event_reader::{DropEventReader, parse_drop_event};
pub use ipsec_map_manager::IpsecMapManager;
pub use loader::EbpfLoader;
pub use metrics_reader::MetricsReader;
