#![no_main]

use libfuzzer_sys::fuzz_target;

use infrastructure::config::AgentConfig;

// Arbitrary YAML through AgentConfig::from_yaml, which deserializes and
// validates. Must return Ok or Err, never panic.
fuzz_target!(|data: &[u8]| {
    let Ok(yaml) = std::str::from_utf8(data) else {
        return;
    };
    if yaml.len() > 64 * 1024 {
        return;
    }
    if let Ok(config) = AgentConfig::from_yaml(yaml) {
        // A config that validated must convert cleanly.
        let ipsec = &config.ipsec;
        assert!(ipsec.to_domain_nodes().is_ok());
        assert!(ipsec.to_domain_endpoints().is_ok());
        assert!(ipsec.key_epoch().is_ok());
    }
});
