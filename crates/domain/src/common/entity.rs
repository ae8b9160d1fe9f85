use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::ipsec::error::IpsecError;

// ── IP Network ──────────────────────────────────────────────────────

/// Address prefix (IPv4 or IPv6). Addresses are kept in network byte
/// order, which is also the LPM trie key layout.
///
/// Serialized as CIDR text (`10.244.1.0/24`, `fd00::/64`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum IpNetwork {
    V4 { addr: [u8; 4], prefix_len: u8 },
    V6 { addr: [u8; 16], prefix_len: u8 },
}

impl IpNetwork {
    pub fn prefix_len(&self) -> u8 {
        match *self {
            Self::V4 { prefix_len, .. } | Self::V6 { prefix_len, .. } => prefix_len,
        }
    }

    pub fn is_v6(&self) -> bool {
        matches!(self, Self::V6 { .. })
    }

    pub fn validate(&self) -> Result<(), IpsecError> {
        let max = if self.is_v6() { 128 } else { 32 };
        if self.prefix_len() > max {
            return Err(IpsecError::InvalidPrefix {
                prefix_len: self.prefix_len(),
            });
        }
        Ok(())
    }

    /// Copy with the host bits cleared. Two prefixes that differ only in
    /// host bits select the same LPM entry.
    pub fn normalized(&self) -> Self {
        match *self {
            Self::V4 { addr, prefix_len } => Self::V4 {
                addr: mask_bytes(addr, prefix_len),
                prefix_len,
            },
            Self::V6 { addr, prefix_len } => Self::V6 {
                addr: mask_bytes(addr, prefix_len),
                prefix_len,
            },
        }
    }

    pub fn contains(&self, ip: &IpAddr) -> bool {
        match (self, ip) {
            (Self::V4 { addr, prefix_len }, IpAddr::V4(v4)) => {
                mask_bytes(*addr, *prefix_len) == mask_bytes(v4.octets(), *prefix_len)
            }
            (Self::V6 { addr, prefix_len }, IpAddr::V6(v6)) => {
                mask_bytes(*addr, *prefix_len) == mask_bytes(v6.octets(), *prefix_len)
            }
            _ => false,
        }
    }
}

fn mask_bytes<const N: usize>(mut addr: [u8; N], prefix_len: u8) -> [u8; N] {
    let prefix_len = usize::from(prefix_len).min(N * 8);
    let full_bytes = prefix_len / 8;
    let remaining_bits = prefix_len % 8;
    for (i, byte) in addr.iter_mut().enumerate() {
        if i < full_bytes {
            continue;
        }
        if i == full_bytes && remaining_bits > 0 {
            *byte &= !0u8 << (8 - remaining_bits);
        } else {
            *byte = 0;
        }
    }
    addr
}

impl fmt::Display for IpNetwork {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::V4 { addr, prefix_len } => {
                write!(f, "{}/{prefix_len}", std::net::Ipv4Addr::from(addr))
            }
            Self::V6 { addr, prefix_len } => {
                write!(f, "{}/{prefix_len}", std::net::Ipv6Addr::from(addr))
            }
        }
    }
}

impl FromStr for IpNetwork {
    type Err = String;

    /// Parse `addr/len`. A bare address is a host prefix (/32 or /128).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr_part, len_part) = match s.split_once('/') {
            Some((a, l)) => (a, Some(l)),
            None => (s, None),
        };
        let addr: IpAddr = addr_part
            .trim()
            .parse()
            .map_err(|e| format!("invalid address '{addr_part}': {e}"))?;
        let prefix_len = match len_part {
            Some(l) => l
                .trim()
                .parse::<u8>()
                .map_err(|e| format!("invalid prefix length '{l}': {e}"))?,
            None if addr.is_ipv4() => 32,
            None => 128,
        };
        let net = match addr {
            IpAddr::V4(v4) => Self::V4 {
                addr: v4.octets(),
                prefix_len,
            },
            IpAddr::V6(v6) => Self::V6 {
                addr: v6.octets(),
                prefix_len,
            },
        };
        net.validate().map_err(|e| e.to_string())?;
        Ok(net)
    }
}

impl TryFrom<String> for IpNetwork {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<IpNetwork> for String {
    fn from(net: IpNetwork) -> Self {
        net.to_string()
    }
}
