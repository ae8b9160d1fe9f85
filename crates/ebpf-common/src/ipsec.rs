//! Map value layouts shared by tc-ipsec and the userspace map manager.
//!
//! Maps: ENCRYPT_STATE (Array, 1), IPSEC_CONFIG (Array, 1),
//! REMOTE_ENDPOINTS_V4/V6 (LpmTrie), NODES_V4/V6 (HashMap),
//! IPSEC_METRICS (PerCpuArray), IPSEC_EVENTS (RingBuf).

/// Maximum entries in each NODES map. Node ids are 16 bits and 0 is
/// reserved.
pub const NODES_MAX_ENTRIES: u32 = 65_535;

/// Maximum entries in each REMOTE_ENDPOINTS LPM trie.
pub const REMOTE_ENDPOINTS_MAX_ENTRIES: u32 = 65_536;

/// Ring buffer size for drop notifications (must be a power of two).
pub const IPSEC_EVENTS_RINGBUF_SIZE: u32 = 256 * 1024;

// ── Metric indices (PerCpuArray) ─────────────────────────────────────

pub const IPSEC_METRIC_EGRESS_SEEN: u32 = 0;
pub const IPSEC_METRIC_EGRESS_PASS: u32 = 1;
pub const IPSEC_METRIC_REDIRECT_ENCRYPT: u32 = 2;
pub const IPSEC_METRIC_INGRESS_SEEN: u32 = 3;
pub const IPSEC_METRIC_INGRESS_PASS: u32 = 4;
pub const IPSEC_METRIC_DECRYPT_MARKED: u32 = 5;
pub const IPSEC_METRIC_REDIRECT_DECRYPT: u32 = 6;
pub const IPSEC_METRIC_DROP_INVALID: u32 = 7;
pub const IPSEC_METRIC_DROP_WRITE_ERROR: u32 = 8;
pub const IPSEC_METRIC_DROP_UNSUPPORTED_L2: u32 = 9;
pub const IPSEC_METRIC_DROP_NO_NODE_ID: u32 = 10;
pub const IPSEC_METRIC_DROP_INVALID_REDIRECT: u32 = 11;
pub const IPSEC_METRIC_EVENTS_DROPPED: u32 = 12;
/// `bpf_skb_pull_data` failed on ingress; the packet was still classified.
pub const IPSEC_METRIC_INGRESS_PULL_FAILED: u32 = 13;
pub const IPSEC_METRIC_COUNT: u32 = 16;

// ── IpsecConfig flags ────────────────────────────────────────────────

pub const IPSEC_FLAG_ENABLED: u8 = 0x01;
pub const IPSEC_FLAG_TUNNEL_MODE: u8 = 0x02;
pub const IPSEC_FLAG_ENDPOINT_ROUTES: u8 = 0x04;
/// Duplicate the encrypt mark into the skb control block. Some kernels
/// drop `skb->mark` across same-namespace redirects.
pub const IPSEC_FLAG_AUX_MARK: u8 = 0x08;

// ── RemoteEndpointInfo flags ─────────────────────────────────────────

pub const ENDPOINT_FLAG_HAS_TUNNEL_EP: u8 = 0x01;
pub const ENDPOINT_FLAG_IPV6_TUNNEL_EP: u8 = 0x02;

// ── DropEvent ────────────────────────────────────────────────────────

pub const DIRECTION_EGRESS: u8 = 0;
pub const DIRECTION_INGRESS: u8 = 1;

/// Flag bit: addresses in the event are IPv6.
pub const DROP_EVENT_FLAG_IPV6: u8 = 0x01;

// ── ENCRYPT_STATE value (4 bytes) ───────────────────────────────────

/// Local key epoch. Index 0 of ENCRYPT_STATE; absent means 0.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EncryptConfig {
    pub encrypt_key: u8,
    pub _pad: [u8; 3],
}

impl EncryptConfig {
    pub const fn new(encrypt_key: u8) -> Self {
        Self {
            encrypt_key,
            _pad: [0; 3],
        }
    }
}

// ── IPSEC_CONFIG value (16 bytes) ───────────────────────────────────

/// Datapath configuration written once at startup and on reload.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IpsecConfig {
    /// Device whose ingress runs the XFRM encrypt hooks.
    pub net_ifindex: u32,
    /// Device decrypted traffic is redirected to.
    pub host_ifindex: u32,
    /// Destination MAC written before redirecting to `net_ifindex`.
    pub gateway_mac: [u8; 6],
    /// `IPSEC_FLAG_*` bits.
    pub flags: u8,
    pub _pad: u8,
}

impl IpsecConfig {
    #[inline]
    pub const fn has_flag(&self, flag: u8) -> bool {
        self.flags & flag != 0
    }

    #[inline]
    pub const fn is_enabled(&self) -> bool {
        self.has_flag(IPSEC_FLAG_ENABLED)
    }
}

// ── NODES value (4 bytes) ───────────────────────────────────────────

/// Node entry keyed by any of the node's addresses.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct NodeValue {
    pub id: u16,
    /// The node's advertised key index.
    pub spi: u8,
    pub _pad: u8,
}

impl NodeValue {
    pub const fn new(id: u16, spi: u8) -> Self {
        Self { id, spi, _pad: 0 }
    }
}

// ── REMOTE_ENDPOINTS value (24 bytes) ───────────────────────────────

/// Metadata for a remote prefix.
///
/// `tunnel_endpoint` is in network byte order: the first 4 bytes for IPv4
/// (rest zero), all 16 for IPv6.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RemoteEndpointInfo {
    pub sec_identity: u32,
    pub tunnel_endpoint: [u8; 16],
    /// `ENDPOINT_FLAG_*` bits.
    pub flags: u8,
    pub _pad: [u8; 3],
}

impl RemoteEndpointInfo {
    /// Endpoint without a tunnel endpoint.
    pub const fn local(sec_identity: u32) -> Self {
        Self {
            sec_identity,
            tunnel_endpoint: [0; 16],
            flags: 0,
            _pad: [0; 3],
        }
    }

    pub const fn with_tunnel_v4(sec_identity: u32, ep: [u8; 4]) -> Self {
        let mut tunnel_endpoint = [0u8; 16];
        tunnel_endpoint[0] = ep[0];
        tunnel_endpoint[1] = ep[1];
        tunnel_endpoint[2] = ep[2];
        tunnel_endpoint[3] = ep[3];
        Self {
            sec_identity,
            tunnel_endpoint,
            flags: ENDPOINT_FLAG_HAS_TUNNEL_EP,
            _pad: [0; 3],
        }
    }

    pub const fn with_tunnel_v6(sec_identity: u32, ep: [u8; 16]) -> Self {
        Self {
            sec_identity,
            tunnel_endpoint: ep,
            flags: ENDPOINT_FLAG_HAS_TUNNEL_EP | ENDPOINT_FLAG_IPV6_TUNNEL_EP,
            _pad: [0; 3],
        }
    }

    #[inline]
    pub const fn has_tunnel_endpoint(&self) -> bool {
        self.flags & ENDPOINT_FLAG_HAS_TUNNEL_EP != 0
    }

    #[inline]
    pub const fn is_ipv6_tunnel_endpoint(&self) -> bool {
        self.flags & ENDPOINT_FLAG_IPV6_TUNNEL_EP != 0
    }
}

// ── IPSEC_EVENTS entry (56 bytes) ───────────────────────────────────

/// Drop notification emitted through IPSEC_EVENTS.
///
/// Addresses follow the `tunnel_endpoint` convention of
/// [`RemoteEndpointInfo`]; `DROP_EVENT_FLAG_IPV6` tells them apart.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DropEvent {
    pub timestamp_ns: u64,
    pub src_addr: [u8; 16],
    pub dst_addr: [u8; 16],
    /// Packet mark at the time of the drop.
    pub mark: u32,
    pub ifindex: u32,
    pub protocol: u8,
    /// `DropReason` discriminant.
    pub reason: u8,
    /// Kernel ABI drop code (`DropReason::code`).
    pub code: u8,
    /// `DIRECTION_EGRESS` or `DIRECTION_INGRESS`.
    pub direction: u8,
    pub flags: u8,
    pub _pad: [u8; 3],
}

// ── Pod impls ────────────────────────────────────────────────────────

// SAFETY: all types below are #[repr(C)], Copy, 'static, and contain only
// primitive fields with explicit padding.
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for EncryptConfig {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for IpsecConfig {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for NodeValue {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for RemoteEndpointInfo {}
#[cfg(feature = "userspace")]
unsafe impl aya::Pod for DropEvent {}
