//! Shared parsing helpers and error types used across config modules.

use std::path::Path;

use tracing::warn;

// ── Config errors ──────────────────────────────────────────────────

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error reading config: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(String),

    #[error("validation error: {field}: {message}")]
    Validation { field: String, message: String },

    #[error("invalid value '{value}' for field '{field}': expected {expected}")]
    InvalidValue {
        field: String,
        value: String,
        expected: String,
    },
}

impl From<serde_yaml_ng::Error> for ConfigError {
    fn from(e: serde_yaml_ng::Error) -> Self {
        Self::Yaml(e.to_string())
    }
}

impl ConfigError {
    pub(super) fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

// ── Shared serde defaults ──────────────────────────────────────────

pub(super) fn default_true() -> bool {
    true
}

// ── Parsing helpers ────────────────────────────────────────────────

/// Parse a colon-separated MAC address (`"02:00:00:00:00:01"`).
pub fn parse_mac(s: &str) -> Result<[u8; 6], String> {
    let mut mac = [0u8; 6];
    let mut parts = s.split(':');
    for byte in &mut mac {
        let part = parts
            .next()
            .ok_or_else(|| format!("'{s}' has fewer than 6 octets"))?;
        if part.len() != 2 {
            return Err(format!("octet '{part}' must be two hex digits"));
        }
        *byte = u8::from_str_radix(part, 16).map_err(|_| format!("invalid octet '{part}'"))?;
    }
    if parts.next().is_some() {
        return Err(format!("'{s}' has more than 6 octets"));
    }
    Ok(mac)
}

/// Log a warning if a file is world-writable (Unix only).
#[cfg(unix)]
pub(super) fn warn_if_world_writable(path: &Path, label: &str) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(metadata) = std::fs::metadata(path) {
        let mode = metadata.permissions().mode();
        if mode & 0o002 != 0 {
            warn!(
                path = %path.display(),
                mode = format!("{mode:04o}"),
                "{label} is world-writable, anyone can change the key index",
            );
        }
    }
}

#[cfg(not(unix))]
pub(super) fn warn_if_world_writable(_path: &Path, _label: &str) {}

/// Enforce a maximum count on a config collection.
pub(super) fn check_limit(field: &str, count: usize, max: usize) -> Result<(), ConfigError> {
    if count > max {
        return Err(ConfigError::validation(
            field,
            format!("count {count} exceeds maximum {max}"),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_mac_valid() {
        assert_eq!(
            parse_mac("02:00:00:00:00:01").unwrap(),
            [0x02, 0, 0, 0, 0, 0x01]
        );
        assert_eq!(
            parse_mac("aa:BB:cc:DD:ee:FF").unwrap(),
            [0xaa, 0xbb, 0xcc, 0xdd, 0xee, 0xff]
        );
    }

    #[test]
    fn parse_mac_invalid() {
        assert!(parse_mac("").is_err());
        assert!(parse_mac("02:00:00:00:00").is_err());
        assert!(parse_mac("02:00:00:00:00:01:02").is_err());
        assert!(parse_mac("02:00:00:00:00:zz").is_err());
        assert!(parse_mac("2:00:00:00:00:01").is_err());
    }

    #[test]
    fn check_limit_boundary() {
        assert!(check_limit("ipsec.nodes", 10, 10).is_ok());
        let err = check_limit("ipsec.nodes", 11, 10).unwrap_err();
        assert!(err.to_string().contains("ipsec.nodes"));
    }
}
