//! Per-packet IPsec redirect and decrypt decisions.
//!
//! The dispatchers here are generic over the packet and the lookup tables so
//! the same code runs inside the tc-ipsec classifier (backed by `TcContext`
//! and eBPF maps) and in userspace tests. Every entry point terminates in a
//! [`PacketDisposition`] without loops or recursion.

use crate::identity::SecurityIdentity;
use crate::ipsec::{
    DIRECTION_INGRESS, IPSEC_FLAG_AUX_MARK, IPSEC_FLAG_ENDPOINT_ROUTES, IPSEC_FLAG_TUNNEL_MODE,
    IPSEC_METRIC_DROP_INVALID, IPSEC_METRIC_DROP_INVALID_REDIRECT,
    IPSEC_METRIC_DROP_NO_NODE_ID, IPSEC_METRIC_DROP_UNSUPPORTED_L2,
    IPSEC_METRIC_DROP_WRITE_ERROR, IPSEC_METRIC_EGRESS_PASS, IPSEC_METRIC_INGRESS_PASS,
    IPSEC_METRIC_REDIRECT_DECRYPT, IPSEC_METRIC_REDIRECT_ENCRYPT, IpsecConfig, NodeValue,
    RemoteEndpointInfo,
};
use crate::key::{KeyIndex, select_key};
use crate::mark::{
    EncryptionMark, NODE_ID_UNKNOWN, NodeId, identity_from_mark, is_decrypt_mark,
    is_overlay_encrypted, is_overlay_mark,
};

pub const ETH_P_IP: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;
/// Values below this are 802.3 lengths, not ethertypes.
pub const ETH_P_802_3_MIN: u16 = 0x0600;

pub const IPPROTO_TCP: u8 = 6;
pub const IPPROTO_UDP: u8 = 17;
pub const IPPROTO_ESP: u8 = 50;

// ── Addresses ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddrFamily {
    V4,
    V6,
}

impl AddrFamily {
    /// `None` for supported framings that carry neither IPv4 nor IPv6.
    #[inline]
    pub const fn from_ethertype(ethertype: u16) -> Option<Self> {
        match ethertype {
            ETH_P_IP => Some(Self::V4),
            ETH_P_IPV6 => Some(Self::V6),
            _ => None,
        }
    }
}

/// IP address in network byte order, usable directly as an LPM or hash key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NetAddr {
    V4([u8; 4]),
    V6([u8; 16]),
}

impl NetAddr {
    #[inline]
    pub const fn family(&self) -> AddrFamily {
        match self {
            Self::V4(_) => AddrFamily::V4,
            Self::V6(_) => AddrFamily::V6,
        }
    }

    /// Tunnel endpoint stored in a remote endpoint entry.
    #[inline]
    pub fn tunnel_endpoint_of(info: &RemoteEndpointInfo) -> Self {
        if info.is_ipv6_tunnel_endpoint() {
            Self::V6(info.tunnel_endpoint)
        } else {
            let ep = &info.tunnel_endpoint;
            Self::V4([ep[0], ep[1], ep[2], ep[3]])
        }
    }

    /// 16-byte form used in `DropEvent` (IPv4 in the first 4 bytes).
    #[inline]
    pub fn to_bytes16(&self) -> [u8; 16] {
        match self {
            Self::V4(a) => {
                let mut out = [0u8; 16];
                out[..4].copy_from_slice(a);
                out
            }
            Self::V6(a) => *a,
        }
    }
}

/// The fields of an IPv4 or IPv6 header the dispatchers need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IpHeader {
    /// IPv4 protocol or IPv6 next header.
    pub protocol: u8,
    pub saddr: NetAddr,
    pub daddr: NetAddr,
}

// ── Collaborators ────────────────────────────────────────────────────

/// Packet access and mutation primitives.
pub trait DatapathPacket {
    /// L2 protocol in host byte order.
    fn ethertype(&self) -> u16;

    /// Bounds-checked read of the network header. `Err` when the packet is
    /// truncated.
    fn load_ip_header(&self, family: AddrFamily) -> Result<IpHeader, ()>;

    fn mark(&self) -> u32;

    fn set_mark(&mut self, mark: u32);

    /// Copy of the mark in the control block, for kernels that lose the
    /// mark across same-namespace redirects.
    fn set_aux_mark(&mut self, mark: u32);

    /// Stash the source identity for the post-transform program.
    fn set_identity_meta(&mut self, identity: u32);

    fn store_eth_daddr(&mut self, mac: &[u8; 6]) -> Result<(), ()>;

    /// Returns `true` when the redirect was accepted.
    fn redirect(&mut self, ifindex: u32, ingress: bool) -> bool;

    /// Relabel the packet as destined to this host.
    fn set_host_packet_type(&mut self) -> Result<(), ()>;
}

pub trait EndpointResolver {
    fn lookup_endpoint(&self, addr: &NetAddr) -> Option<RemoteEndpointInfo>;
}

pub trait NodeResolver {
    fn lookup_node(&self, addr: &NetAddr) -> Option<NodeValue>;

    /// Non-zero node id for `addr`.
    fn node_id(&self, addr: &NetAddr) -> Option<NodeId> {
        match self.lookup_node(addr) {
            Some(node) if node.id != NODE_ID_UNKNOWN => Some(node.id),
            _ => None,
        }
    }
}

pub trait KeyEpochStore {
    /// Local key index, 0 when unset.
    fn local_key(&self) -> KeyIndex;
}

// ── Configuration snapshot ───────────────────────────────────────────

/// Read-only configuration for one invocation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DatapathConfig {
    pub local_key: KeyIndex,
    pub tunnel_mode: bool,
    pub endpoint_routes: bool,
    pub use_aux_mark: bool,
    pub net_ifindex: u32,
    pub host_ifindex: u32,
    pub gateway_mac: [u8; 6],
}

impl DatapathConfig {
    pub fn from_maps<K: KeyEpochStore>(keys: &K, cfg: &IpsecConfig) -> Self {
        Self {
            local_key: keys.local_key(),
            tunnel_mode: cfg.has_flag(IPSEC_FLAG_TUNNEL_MODE),
            endpoint_routes: cfg.has_flag(IPSEC_FLAG_ENDPOINT_ROUTES),
            use_aux_mark: cfg.has_flag(IPSEC_FLAG_AUX_MARK),
            net_ifindex: cfg.net_ifindex,
            host_ifindex: cfg.host_ifindex,
            gateway_mac: cfg.gateway_mac,
        }
    }
}

// ── Outcomes ─────────────────────────────────────────────────────────

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// Truncated or malformed header on egress.
    Invalid = 1,
    /// A packet rewrite primitive failed.
    WriteError = 2,
    /// 802.3 framing or otherwise unusable L2.
    UnsupportedL2 = 3,
    /// No node id for an address that needs one.
    NoNodeId = 4,
    /// The redirect helper did not accept the packet.
    InvalidRedirect = 5,
}

impl DropReason {
    pub const ALL: [Self; 5] = [
        Self::Invalid,
        Self::WriteError,
        Self::UnsupportedL2,
        Self::NoNodeId,
        Self::InvalidRedirect,
    ];

    /// Kernel ABI drop code.
    #[inline]
    pub const fn code(self) -> u8 {
        match self {
            Self::Invalid | Self::InvalidRedirect => 134,
            Self::WriteError => 141,
            Self::UnsupportedL2 => 166,
            Self::NoNodeId => 197,
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Invalid => "invalid",
            Self::WriteError => "write_error",
            Self::UnsupportedL2 => "unsupported_l2",
            Self::NoNodeId => "no_node_id",
            Self::InvalidRedirect => "invalid_redirect",
        }
    }

    pub const fn from_u8(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Invalid),
            2 => Some(Self::WriteError),
            3 => Some(Self::UnsupportedL2),
            4 => Some(Self::NoNodeId),
            5 => Some(Self::InvalidRedirect),
            _ => None,
        }
    }

    pub const fn metric_index(self) -> u32 {
        match self {
            Self::Invalid => IPSEC_METRIC_DROP_INVALID,
            Self::WriteError => IPSEC_METRIC_DROP_WRITE_ERROR,
            Self::UnsupportedL2 => IPSEC_METRIC_DROP_UNSUPPORTED_L2,
            Self::NoNodeId => IPSEC_METRIC_DROP_NO_NODE_ID,
            Self::InvalidRedirect => IPSEC_METRIC_DROP_INVALID_REDIRECT,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketDisposition {
    /// Continue through the stack unmodified (the mark may have changed).
    Pass,
    /// Redirected to the ingress of the XFRM device.
    RedirectEncrypt { ifindex: u32 },
    /// Decrypted traffic redirected to the host device.
    RedirectDecrypt { ifindex: u32 },
    Drop(DropReason),
}

impl PacketDisposition {
    /// IPSEC_METRICS slot counting this outcome.
    pub const fn metric_index(self, direction: u8) -> u32 {
        match self {
            Self::Pass if direction == DIRECTION_INGRESS => IPSEC_METRIC_INGRESS_PASS,
            Self::Pass => IPSEC_METRIC_EGRESS_PASS,
            Self::RedirectEncrypt { .. } => IPSEC_METRIC_REDIRECT_ENCRYPT,
            Self::RedirectDecrypt { .. } => IPSEC_METRIC_REDIRECT_DECRYPT,
            Self::Drop(reason) => reason.metric_index(),
        }
    }
}

// ── Redirect policy ──────────────────────────────────────────────────

/// Whether traffic between two identities must be redirected for
/// encryption.
///
/// Exempt: already ESP, anything to or from the host, traffic leaving the
/// cluster, and node-to-node traffic (API server included). Checks run
/// cheapest-first and short-circuit.
#[inline]
pub const fn redirect_ok(src: SecurityIdentity, dst: SecurityIdentity, protocol: u8) -> bool {
    if protocol == IPPROTO_ESP {
        return false;
    }
    if src.is_host() || dst.is_host() {
        return false;
    }
    if !dst.is_cluster_member() || !src.is_cluster_member() {
        return false;
    }
    if dst.is_remote_node() || src.is_remote_node() {
        return false;
    }
    true
}

// ── Egress ───────────────────────────────────────────────────────────

pub struct EncryptDispatcher<'a, E, N> {
    config: &'a DatapathConfig,
    endpoints: &'a E,
    nodes: &'a N,
}

impl<'a, E: EndpointResolver, N: NodeResolver> EncryptDispatcher<'a, E, N> {
    pub fn new(config: &'a DatapathConfig, endpoints: &'a E, nodes: &'a N) -> Self {
        Self {
            config,
            endpoints,
            nodes,
        }
    }

    /// Mark and redirect an outbound packet that needs encryption.
    ///
    /// `src_identity` is the sender's identity when the caller already knows
    /// it, `SecurityIdentity::UNKNOWN` otherwise.
    pub fn classify_and_mark_egress<P: DatapathPacket>(
        &self,
        pkt: &mut P,
        src_identity: SecurityIdentity,
    ) -> PacketDisposition {
        let ethertype = pkt.ethertype();
        if ethertype < ETH_P_802_3_MIN {
            return PacketDisposition::Drop(DropReason::UnsupportedL2);
        }

        // Encrypted before encapsulation by the overlay program.
        if self.config.tunnel_mode && is_overlay_encrypted(pkt.mark()) {
            return PacketDisposition::Pass;
        }

        let Some(family) = AddrFamily::from_ethertype(ethertype) else {
            return PacketDisposition::Pass;
        };
        let Ok(ip) = pkt.load_ip_header(family) else {
            return PacketDisposition::Drop(DropReason::Invalid);
        };

        // Encapsulated overlay traffic: the outer destination is already the
        // peer's tunnel endpoint and the identity travels in the mark.
        if self.config.tunnel_mode && is_overlay_mark(pkt.mark()) {
            let identity = SecurityIdentity(identity_from_mark(pkt.mark()));
            return self.mark_and_redirect(pkt, &ip.daddr, identity);
        }

        let dst = self.endpoints.lookup_endpoint(&ip.daddr);

        let src_identity = if src_identity.is_unknown() {
            match self.endpoints.lookup_endpoint(&ip.saddr) {
                Some(src) => SecurityIdentity(src.sec_identity),
                None => return PacketDisposition::Pass,
            }
        } else {
            src_identity
        };

        let Some(dst) = dst else {
            return PacketDisposition::Pass;
        };
        if !dst.has_tunnel_endpoint() {
            return PacketDisposition::Pass;
        }

        if !redirect_ok(src_identity, SecurityIdentity(dst.sec_identity), ip.protocol) {
            return PacketDisposition::Pass;
        }

        let tunnel_ep = NetAddr::tunnel_endpoint_of(&dst);
        self.mark_and_redirect(pkt, &tunnel_ep, src_identity)
    }

    fn mark_and_redirect<P: DatapathPacket>(
        &self,
        pkt: &mut P,
        tunnel_ep: &NetAddr,
        src_identity: SecurityIdentity,
    ) -> PacketDisposition {
        let node = match self.nodes.lookup_node(tunnel_ep) {
            Some(node) if node.id != NODE_ID_UNKNOWN => node,
            _ => return PacketDisposition::Drop(DropReason::NoNodeId),
        };

        let key = select_key(self.config.local_key, KeyIndex::from_bits(node.spi));
        let mark = EncryptionMark::encrypt(key, node.id).raw();

        pkt.set_identity_meta(src_identity.get());
        if self.config.use_aux_mark {
            pkt.set_aux_mark(mark);
        }
        pkt.set_mark(mark);

        if pkt.store_eth_daddr(&self.config.gateway_mac).is_err() {
            return PacketDisposition::Drop(DropReason::WriteError);
        }
        if !pkt.redirect(self.config.net_ifindex, true) {
            return PacketDisposition::Drop(DropReason::InvalidRedirect);
        }
        PacketDisposition::RedirectEncrypt {
            ifindex: self.config.net_ifindex,
        }
    }
}

// ── Ingress ──────────────────────────────────────────────────────────

pub struct DecryptDispatcher<'a, N> {
    config: &'a DatapathConfig,
    nodes: &'a N,
}

impl<'a, N: NodeResolver> DecryptDispatcher<'a, N> {
    pub fn new(config: &'a DatapathConfig, nodes: &'a N) -> Self {
        Self { config, nodes }
    }

    /// Tag inbound ESP for the transform, or hand decrypted traffic back to
    /// the host.
    pub fn classify_ingress<P: DatapathPacket>(&self, pkt: &mut P) -> PacketDisposition {
        let decrypted = is_decrypt_mark(pkt.mark());

        let Some(family) = AddrFamily::from_ethertype(pkt.ethertype()) else {
            return PacketDisposition::Pass;
        };
        let Ok(ip) = pkt.load_ip_header(family) else {
            pkt.set_mark(0);
            return PacketDisposition::Pass;
        };

        if decrypted {
            pkt.set_mark(0);
            if self.config.endpoint_routes {
                return PacketDisposition::Pass;
            }
            if !pkt.redirect(self.config.host_ifindex, false) {
                return PacketDisposition::Drop(DropReason::InvalidRedirect);
            }
            return PacketDisposition::RedirectDecrypt {
                ifindex: self.config.host_ifindex,
            };
        }

        if ip.protocol != IPPROTO_ESP {
            return PacketDisposition::Pass;
        }

        let Some(node_id) = self.nodes.node_id(&ip.saddr) else {
            return PacketDisposition::Drop(DropReason::NoNodeId);
        };
        pkt.set_mark(EncryptionMark::decrypt(node_id).raw());

        // eth_type_trans may have classified this as OTHERHOST, which the IP
        // stack discards before XFRM sees it.
        if pkt.set_host_packet_type().is_err() {
            return PacketDisposition::Drop(DropReason::WriteError);
        }
        PacketDisposition::Pass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::{IDENTITY_FIRST_USER, IDENTITY_WORLD};
    use crate::mark::{MARK_MAGIC_OVERLAY, MARK_MAGIC_OVERLAY_ENCRYPTED};

    const NET_IFINDEX: u32 = 11;
    const HOST_IFINDEX: u32 = 12;
    const GW_MAC: [u8; 6] = [0x02, 0, 0, 0, 0, 0x01];

    const POD_A: [u8; 4] = [10, 244, 0, 5];
    const POD_B: [u8; 4] = [10, 244, 1, 9];
    const NODE_B: [u8; 4] = [10, 0, 1, 7];
    const EXTERNAL: [u8; 4] = [93, 184, 216, 34];

    const ID_A: u32 = IDENTITY_FIRST_USER + 1;
    const ID_B: u32 = IDENTITY_FIRST_USER + 2;

    struct MockPacket {
        ethertype: u16,
        header: Option<IpHeader>,
        mark: u32,
        aux_mark: Option<u32>,
        identity_meta: Option<u32>,
        eth_daddr: [u8; 6],
        store_fails: bool,
        redirect_fails: bool,
        relabel_fails: bool,
        redirected: Option<(u32, bool)>,
        host_type: bool,
    }

    impl MockPacket {
        fn v4(protocol: u8, saddr: [u8; 4], daddr: [u8; 4]) -> Self {
            Self {
                ethertype: ETH_P_IP,
                header: Some(IpHeader {
                    protocol,
                    saddr: NetAddr::V4(saddr),
                    daddr: NetAddr::V4(daddr),
                }),
                mark: 0,
                aux_mark: None,
                identity_meta: None,
                eth_daddr: [0xaa; 6],
                store_fails: false,
                redirect_fails: false,
                relabel_fails: false,
                redirected: None,
                host_type: false,
            }
        }

        fn truncated(ethertype: u16) -> Self {
            let mut pkt = Self::v4(IPPROTO_TCP, POD_A, POD_B);
            pkt.ethertype = ethertype;
            pkt.header = None;
            pkt
        }
    }

    impl DatapathPacket for MockPacket {
        fn ethertype(&self) -> u16 {
            self.ethertype
        }
        fn load_ip_header(&self, family: AddrFamily) -> Result<IpHeader, ()> {
            match self.header {
                Some(h) if h.daddr.family() == family => Ok(h),
                _ => Err(()),
            }
        }
        fn mark(&self) -> u32 {
            self.mark
        }
        fn set_mark(&mut self, mark: u32) {
            self.mark = mark;
        }
        fn set_aux_mark(&mut self, mark: u32) {
            self.aux_mark = Some(mark);
        }
        fn set_identity_meta(&mut self, identity: u32) {
            self.identity_meta = Some(identity);
        }
        fn store_eth_daddr(&mut self, mac: &[u8; 6]) -> Result<(), ()> {
            if self.store_fails {
                return Err(());
            }
            self.eth_daddr = *mac;
            Ok(())
        }
        fn redirect(&mut self, ifindex: u32, ingress: bool) -> bool {
            if self.redirect_fails {
                return false;
            }
            self.redirected = Some((ifindex, ingress));
            true
        }
        fn set_host_packet_type(&mut self) -> Result<(), ()> {
            if self.relabel_fails {
                return Err(());
            }
            self.host_type = true;
            Ok(())
        }
    }

    struct Endpoints<'a>(&'a [(NetAddr, RemoteEndpointInfo)]);

    impl EndpointResolver for Endpoints<'_> {
        fn lookup_endpoint(&self, addr: &NetAddr) -> Option<RemoteEndpointInfo> {
            self.0.iter().find(|(a, _)| a == addr).map(|(_, info)| *info)
        }
    }

    struct Nodes<'a>(&'a [(NetAddr, NodeValue)]);

    impl NodeResolver for Nodes<'_> {
        fn lookup_node(&self, addr: &NetAddr) -> Option<NodeValue> {
            self.0.iter().find(|(a, _)| a == addr).map(|(_, n)| *n)
        }
    }

    struct FixedKey(u8);

    impl KeyEpochStore for FixedKey {
        fn local_key(&self) -> KeyIndex {
            KeyIndex::from_bits(self.0)
        }
    }

    fn config(local_key: u8) -> DatapathConfig {
        DatapathConfig {
            local_key: KeyIndex::from_bits(local_key),
            tunnel_mode: false,
            endpoint_routes: false,
            use_aux_mark: true,
            net_ifindex: NET_IFINDEX,
            host_ifindex: HOST_IFINDEX,
            gateway_mac: GW_MAC,
        }
    }

    fn endpoints() -> [(NetAddr, RemoteEndpointInfo); 3] {
        [
            (NetAddr::V4(POD_A), RemoteEndpointInfo::local(ID_A)),
            (
                NetAddr::V4(POD_B),
                RemoteEndpointInfo::with_tunnel_v4(ID_B, NODE_B),
            ),
            (
                NetAddr::V4(EXTERNAL),
                RemoteEndpointInfo::with_tunnel_v4(IDENTITY_WORLD, NODE_B),
            ),
        ]
    }

    fn nodes(spi: u8) -> [(NetAddr, NodeValue); 1] {
        [(NetAddr::V4(NODE_B), NodeValue::new(7, spi))]
    }

    fn id(raw: u32) -> SecurityIdentity {
        SecurityIdentity(raw)
    }

    // ── redirect_ok ──────────────────────────────────────────────────

    #[test]
    fn redirect_ok_rejects_esp_for_all_identities() {
        for src in [0, 1, 2, 6, 7, ID_A, 0x0100_0001] {
            for dst in [0, 1, 2, 6, 7, ID_B, 0x0100_0001] {
                assert!(!redirect_ok(id(src), id(dst), IPPROTO_ESP));
            }
        }
    }

    #[test]
    fn redirect_ok_rejects_host() {
        assert!(!redirect_ok(SecurityIdentity::HOST, id(ID_B), IPPROTO_TCP));
        assert!(!redirect_ok(id(ID_A), SecurityIdentity::HOST, IPPROTO_TCP));
    }

    #[test]
    fn redirect_ok_rejects_non_cluster_and_remote_nodes() {
        assert!(!redirect_ok(id(ID_A), SecurityIdentity::WORLD, IPPROTO_TCP));
        assert!(!redirect_ok(SecurityIdentity::WORLD, id(ID_B), IPPROTO_TCP));
        assert!(!redirect_ok(id(ID_A), id(0x0100_0003), IPPROTO_UDP));
        assert!(!redirect_ok(id(ID_A), SecurityIdentity::REMOTE_NODE, IPPROTO_TCP));
        assert!(!redirect_ok(SecurityIdentity::KUBE_APISERVER, id(ID_B), IPPROTO_TCP));
    }

    #[test]
    fn redirect_ok_accepts_workload_pair() {
        assert!(redirect_ok(id(ID_A), id(ID_B), IPPROTO_TCP));
        assert!(redirect_ok(id(ID_A), id(ID_B), IPPROTO_UDP));
    }

    // ── egress ───────────────────────────────────────────────────────

    #[test]
    fn egress_workload_pair_is_redirected_for_encryption() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(4);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        let disp = dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A));

        assert_eq!(disp, PacketDisposition::RedirectEncrypt { ifindex: NET_IFINDEX });
        let mark = EncryptionMark::from_raw(pkt.mark);
        assert_eq!(mark.key(), Some(KeyIndex::from_bits(3)));
        assert_eq!(mark.node_id(), Some(7));
        assert_eq!(pkt.aux_mark, Some(pkt.mark));
        assert_eq!(pkt.identity_meta, Some(ID_A));
        assert_eq!(pkt.eth_daddr, GW_MAC);
        assert_eq!(pkt.redirected, Some((NET_IFINDEX, true)));
    }

    #[test]
    fn egress_rollover_selects_sentinel() {
        let cfg = config(15);
        let eps = endpoints();
        let nds = nodes(1);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A));
        assert_eq!(
            EncryptionMark::from_raw(pkt.mark).key(),
            Some(KeyIndex::MAX)
        );
    }

    #[test]
    fn egress_aux_mark_is_optional() {
        let mut cfg = config(3);
        cfg.use_aux_mark = false;
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A));
        assert!(pkt.aux_mark.is_none());
        assert!(EncryptionMark::from_raw(pkt.mark).is_encrypt());
    }

    #[test]
    fn egress_unknown_source_is_resolved() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_UDP, POD_A, POD_B);
        let disp = dispatcher.classify_and_mark_egress(&mut pkt, SecurityIdentity::UNKNOWN);
        assert_eq!(disp, PacketDisposition::RedirectEncrypt { ifindex: NET_IFINDEX });
        assert_eq!(pkt.identity_meta, Some(ID_A));
    }

    #[test]
    fn egress_unresolvable_source_passes() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, [192, 168, 9, 9], POD_B);
        let disp = dispatcher.classify_and_mark_egress(&mut pkt, SecurityIdentity::UNKNOWN);
        assert_eq!(disp, PacketDisposition::Pass);
        assert_eq!(pkt.mark, 0);
        assert!(pkt.redirected.is_none());
    }

    #[test]
    fn egress_without_tunnel_endpoint_passes() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        // POD_A has no tunnel endpoint; unknown destinations pass too.
        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_B, POD_A);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_B)),
            PacketDisposition::Pass
        );
        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, [172, 16, 0, 1]);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
    }

    #[test]
    fn egress_policy_rejection_passes_unmodified() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, EXTERNAL);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
        let mut pkt = MockPacket::v4(IPPROTO_ESP, POD_A, POD_B);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, SecurityIdentity::HOST),
            PacketDisposition::Pass
        );
        assert_eq!(pkt.mark, 0);
        assert_eq!(pkt.eth_daddr, [0xaa; 6]);
    }

    #[test]
    fn egress_unsupported_l2_drops() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        pkt.ethertype = 0x05DC;
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::UnsupportedL2)
        );
    }

    #[test]
    fn egress_non_ip_ethertype_passes() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        // ARP
        let mut pkt = MockPacket::truncated(0x0806);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
    }

    #[test]
    fn egress_truncated_header_drops_invalid() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::truncated(ETH_P_IP);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::Invalid)
        );
    }

    #[test]
    fn egress_missing_node_drops_no_node_id() {
        let cfg = config(3);
        let eps = endpoints();
        let (eps, nds) = (Endpoints(&eps), Nodes(&[]));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::NoNodeId)
        );

        let zero = [(NetAddr::V4(NODE_B), NodeValue::new(0, 3))];
        let nds = Nodes(&zero);
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);
        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::NoNodeId)
        );
    }

    #[test]
    fn egress_rewrite_and_redirect_failures_drop() {
        let cfg = config(3);
        let eps = endpoints();
        let nds = nodes(3);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        pkt.store_fails = true;
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::WriteError)
        );

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        pkt.redirect_fails = true;
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Drop(DropReason::InvalidRedirect)
        );
    }

    #[test]
    fn egress_tunnel_mode_overlay_uses_outer_destination() {
        let mut cfg = config(5);
        cfg.tunnel_mode = true;
        let nds = nodes(5);
        let (eps, nds) = (Endpoints(&[]), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        // Outer header: node A -> node B; identity 0x01_2345 in the mark.
        let mut pkt = MockPacket::v4(IPPROTO_UDP, [10, 0, 0, 1], NODE_B);
        pkt.mark = 0x2345_0000 | MARK_MAGIC_OVERLAY | 0x01;
        let disp = dispatcher.classify_and_mark_egress(&mut pkt, SecurityIdentity::UNKNOWN);

        assert_eq!(disp, PacketDisposition::RedirectEncrypt { ifindex: NET_IFINDEX });
        assert_eq!(pkt.identity_meta, Some(0x0001_2345));
        assert_eq!(EncryptionMark::from_raw(pkt.mark).node_id(), Some(7));
    }

    #[test]
    fn egress_tunnel_mode_skips_already_encrypted_overlay() {
        let mut cfg = config(5);
        cfg.tunnel_mode = true;
        let nds = nodes(5);
        let (eps, nds) = (Endpoints(&[]), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_UDP, [10, 0, 0, 1], NODE_B);
        pkt.mark = MARK_MAGIC_OVERLAY_ENCRYPTED;
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
        assert_eq!(pkt.mark, MARK_MAGIC_OVERLAY_ENCRYPTED);
    }

    #[test]
    fn egress_overlay_mark_ignored_outside_tunnel_mode() {
        let cfg = config(5);
        let eps = endpoints();
        let nds = nodes(5);
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        // Goes through the endpoint lookup; NODE_B is not an endpoint.
        let mut pkt = MockPacket::v4(IPPROTO_UDP, POD_A, NODE_B);
        pkt.mark = MARK_MAGIC_OVERLAY_ENCRYPTED;
        assert_eq!(
            dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A)),
            PacketDisposition::Pass
        );
    }

    #[test]
    fn egress_ipv6_tunnel_endpoint() {
        let pod6 = {
            let mut a = [0u8; 16];
            a[0] = 0xfd;
            a[15] = 9;
            a
        };
        let node6 = {
            let mut a = [0u8; 16];
            a[0] = 0xfd;
            a[1] = 0x01;
            a[15] = 7;
            a
        };
        let cfg = config(2);
        let eps = [(
            NetAddr::V6(pod6),
            RemoteEndpointInfo::with_tunnel_v6(ID_B, node6),
        )];
        let nds = [(NetAddr::V6(node6), NodeValue::new(9, 3))];
        let (eps, nds) = (Endpoints(&eps), Nodes(&nds));
        let dispatcher = EncryptDispatcher::new(&cfg, &eps, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_A, POD_B);
        pkt.ethertype = ETH_P_IPV6;
        pkt.header = Some(IpHeader {
            protocol: IPPROTO_TCP,
            saddr: NetAddr::V6([0xfd; 16]),
            daddr: NetAddr::V6(pod6),
        });
        let disp = dispatcher.classify_and_mark_egress(&mut pkt, id(ID_A));
        assert_eq!(disp, PacketDisposition::RedirectEncrypt { ifindex: NET_IFINDEX });
        let mark = EncryptionMark::from_raw(pkt.mark);
        assert_eq!(mark.key(), Some(KeyIndex::from_bits(2)));
        assert_eq!(mark.node_id(), Some(9));
    }

    // ── ingress ──────────────────────────────────────────────────────

    #[test]
    fn ingress_esp_from_known_node_is_tagged() {
        let cfg = config(3);
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_ESP, NODE_B, [10, 0, 0, 1]);
        assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
        let mark = EncryptionMark::from_raw(pkt.mark);
        assert!(mark.is_decrypt());
        assert_eq!(mark.node_id(), Some(7));
        assert!(pkt.host_type);
        assert!(pkt.redirected.is_none());
    }

    #[test]
    fn ingress_esp_from_unknown_node_drops() {
        let cfg = config(3);
        let nds = Nodes(&[]);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_ESP, [10, 9, 9, 9], [10, 0, 0, 1]);
        assert_eq!(
            dispatcher.classify_ingress(&mut pkt),
            PacketDisposition::Drop(DropReason::NoNodeId)
        );
        assert_eq!(pkt.mark, 0);
    }

    #[test]
    fn ingress_non_esp_passes_untouched() {
        let cfg = config(3);
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, NODE_B, [10, 0, 0, 1]);
        pkt.mark = 0x0000_0A00;
        assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
        assert_eq!(pkt.mark, 0x0000_0A00);
        assert!(!pkt.host_type);
    }

    #[test]
    fn ingress_decrypted_is_redirected_to_host() {
        let cfg = config(3);
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_B, POD_A);
        pkt.mark = EncryptionMark::decrypt(7).raw();
        assert_eq!(
            dispatcher.classify_ingress(&mut pkt),
            PacketDisposition::RedirectDecrypt { ifindex: HOST_IFINDEX }
        );
        assert_eq!(pkt.mark, 0);
        assert_eq!(pkt.redirected, Some((HOST_IFINDEX, false)));
    }

    #[test]
    fn ingress_decrypted_with_endpoint_routes_passes() {
        let mut cfg = config(3);
        cfg.endpoint_routes = true;
        let nds = Nodes(&[]);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_B, POD_A);
        pkt.mark = EncryptionMark::decrypt(7).raw();
        assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
        assert_eq!(pkt.mark, 0);
        assert!(pkt.redirected.is_none());
    }

    #[test]
    fn ingress_decrypted_redirect_failure_drops() {
        let cfg = config(3);
        let nds = Nodes(&[]);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_TCP, POD_B, POD_A);
        pkt.mark = EncryptionMark::decrypt(7).raw();
        pkt.redirect_fails = true;
        assert_eq!(
            dispatcher.classify_ingress(&mut pkt),
            PacketDisposition::Drop(DropReason::InvalidRedirect)
        );
    }

    #[test]
    fn ingress_parse_failure_clears_mark_and_passes() {
        let cfg = config(3);
        let nds = Nodes(&[]);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::truncated(ETH_P_IP);
        pkt.mark = EncryptionMark::decrypt(7).raw();
        assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
        assert_eq!(pkt.mark, 0);
    }

    #[test]
    fn ingress_relabel_failure_drops() {
        let cfg = config(3);
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = MockPacket::v4(IPPROTO_ESP, NODE_B, [10, 0, 0, 1]);
        pkt.relabel_fails = true;
        assert_eq!(
            dispatcher.classify_ingress(&mut pkt),
            PacketDisposition::Drop(DropReason::WriteError)
        );
    }

    const NODE_B6: [u8; 16] = [0xfd, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 7];
    const LOCAL6: [u8; 16] = [0xfd, 0x01, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];

    fn esp_v6(saddr: [u8; 16]) -> MockPacket {
        let mut pkt = MockPacket::v4(IPPROTO_ESP, NODE_B, [10, 0, 0, 1]);
        pkt.ethertype = ETH_P_IPV6;
        pkt.header = Some(IpHeader {
            protocol: IPPROTO_ESP,
            saddr: NetAddr::V6(saddr),
            daddr: NetAddr::V6(LOCAL6),
        });
        pkt
    }

    #[test]
    fn ingress_ipv6_esp_from_known_node_is_tagged() {
        let cfg = config(3);
        let nds = [(NetAddr::V6(NODE_B6), NodeValue::new(9, 3))];
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = esp_v6(NODE_B6);
        assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
        let mark = EncryptionMark::from_raw(pkt.mark);
        assert!(mark.is_decrypt());
        assert_eq!(mark.node_id(), Some(9));
        assert!(pkt.host_type);
        assert!(pkt.redirected.is_none());
    }

    #[test]
    fn ingress_ipv6_esp_from_unknown_node_drops() {
        let cfg = config(3);
        // Same node known only by its IPv4 address.
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        let mut pkt = esp_v6(NODE_B6);
        assert_eq!(
            dispatcher.classify_ingress(&mut pkt),
            PacketDisposition::Drop(DropReason::NoNodeId)
        );
        assert_eq!(pkt.mark, 0);
        assert!(!pkt.host_type);
    }

    #[test]
    fn ingress_non_ip_ethertypes_pass_with_mark_intact() {
        let cfg = config(3);
        let nds = nodes(3);
        let nds = Nodes(&nds);
        let dispatcher = DecryptDispatcher::new(&cfg, &nds);

        // ARP, then an 802.3 length field.
        for ethertype in [0x0806, 0x0042] {
            let mut pkt = MockPacket::v4(IPPROTO_ESP, NODE_B, [10, 0, 0, 1]);
            pkt.ethertype = ethertype;
            pkt.mark = EncryptionMark::decrypt(7).raw();
            assert_eq!(dispatcher.classify_ingress(&mut pkt), PacketDisposition::Pass);
            assert_eq!(pkt.mark, EncryptionMark::decrypt(7).raw());
            assert!(pkt.redirected.is_none());
            assert!(!pkt.host_type);
        }
    }

    // ── misc ─────────────────────────────────────────────────────────

    #[test]
    fn config_from_maps_reads_flags() {
        let raw = IpsecConfig {
            net_ifindex: 4,
            host_ifindex: 5,
            gateway_mac: GW_MAC,
            flags: IPSEC_FLAG_TUNNEL_MODE | IPSEC_FLAG_AUX_MARK,
            _pad: 0,
        };
        let cfg = DatapathConfig::from_maps(&FixedKey(0x1F), &raw);
        assert_eq!(cfg.local_key, KeyIndex::MAX);
        assert!(cfg.tunnel_mode);
        assert!(!cfg.endpoint_routes);
        assert!(cfg.use_aux_mark);
        assert_eq!(cfg.net_ifindex, 4);
        assert_eq!(cfg.host_ifindex, 5);
    }

    #[test]
    fn drop_reason_codes() {
        assert_eq!(DropReason::Invalid.code(), 134);
        assert_eq!(DropReason::WriteError.code(), 141);
        assert_eq!(DropReason::UnsupportedL2.code(), 166);
        assert_eq!(DropReason::NoNodeId.code(), 197);
        assert_eq!(DropReason::InvalidRedirect.code(), 134);
        for reason in DropReason::ALL {
            assert_eq!(DropReason::from_u8(reason as u8), Some(reason));
        }
        assert_eq!(DropReason::from_u8(0), None);
        assert_eq!(DropReason::from_u8(6), None);
    }

    #[test]
    fn disposition_metric_index_depends_on_direction() {
        use crate::ipsec::DIRECTION_EGRESS;
        assert_eq!(
            PacketDisposition::Pass.metric_index(DIRECTION_EGRESS),
            IPSEC_METRIC_EGRESS_PASS
        );
        assert_eq!(
            PacketDisposition::Pass.metric_index(DIRECTION_INGRESS),
            IPSEC_METRIC_INGRESS_PASS
        );
        assert_eq!(
            PacketDisposition::Drop(DropReason::NoNodeId).metric_index(DIRECTION_INGRESS),
            IPSEC_METRIC_DROP_NO_NODE_ID
        );
    }

    #[test]
    fn net_addr_bytes16() {
        assert_eq!(
            NetAddr::V4([1, 2, 3, 4]).to_bytes16(),
            [1, 2, 3, 4, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]
        );
        assert_eq!(
            NetAddr::tunnel_endpoint_of(&RemoteEndpointInfo::with_tunnel_v4(1, NODE_B)),
            NetAddr::V4(NODE_B)
        );
    }
}
