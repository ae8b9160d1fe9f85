use std::path::Path;

use ebpf_common::key::{KeyIndex, MAX_KEY_INDEX, select_key};
use infrastructure::config::AgentConfig;

/// `validate`: load the config and print what it would install.
pub fn cmd_validate(config_path: &str) -> anyhow::Result<()> {
    let config = AgentConfig::load(Path::new(config_path))
        .map_err(|e| anyhow::anyhow!("{config_path}: {e}"))?;
    println!("{config_path}: OK");
    print!("{}", config_summary(&config));
    Ok(())
}

/// `select-key`: print the key index both sides end up using.
pub fn cmd_select_key(local: u8, peer: u8) -> anyhow::Result<()> {
    println!("{}", negotiated_key(local, peer)?);
    Ok(())
}

fn parse_key(name: &str, raw: u8) -> anyhow::Result<KeyIndex> {
    KeyIndex::new(raw)
        .ok_or_else(|| anyhow::anyhow!("{name} key {raw} is out of range [0, {MAX_KEY_INDEX}]"))
}

pub(crate) fn negotiated_key(local: u8, peer: u8) -> anyhow::Result<u8> {
    let local = parse_key("local", local)?;
    let peer = parse_key("peer", peer)?;
    Ok(select_key(local, peer).get())
}

pub(crate) fn config_summary(config: &AgentConfig) -> String {
    let ipsec = &config.ipsec;
    let mut out = String::new();
    out.push_str(&format!("  interfaces:  {}\n", config.agent.interfaces.join(", ")));
    out.push_str(&format!(
        "  ipsec:       {}\n",
        if ipsec.enabled { "enabled" } else { "disabled" }
    ));
    out.push_str(&format!("  key index:   {}\n", ipsec.key_index));
    out.push_str(&format!(
        "  mode:        {}{}\n",
        if ipsec.tunnel_mode { "tunnel" } else { "native" },
        if ipsec.endpoint_routes {
            ", endpoint routes"
        } else {
            ""
        }
    ));
    out.push_str(&format!("  nodes:       {}\n", ipsec.nodes.len()));
    out.push_str(&format!("  endpoints:   {}\n", ipsec.endpoints.len()));
    out
}
