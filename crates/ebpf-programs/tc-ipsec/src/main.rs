#![no_std]
#![no_main]

use aya_ebpf::{
    bindings::{TC_ACT_OK, TC_ACT_REDIRECT, TC_ACT_SHOT},
    helpers::{bpf_ktime_get_boot_ns, bpf_redirect, bpf_skb_change_type},
    macros::{classifier, map},
    maps::{
        Array, HashMap, PerCpuArray, RingBuf,
        lpm_trie::{Key, LpmTrie},
    },
    programs::TcContext,
};
use aya_log_ebpf::debug;
use core::mem;
use ebpf_common::{
    datapath::{
        AddrFamily, DatapathConfig, DatapathPacket, DecryptDispatcher, DropReason,
        EncryptDispatcher, EndpointResolver, IpHeader, KeyEpochStore, NetAddr, NodeResolver,
        PacketDisposition,
    },
    identity::SecurityIdentity,
    ipsec::{
        DIRECTION_EGRESS, DIRECTION_INGRESS, DROP_EVENT_FLAG_IPV6, DropEvent, EncryptConfig,
        IPSEC_EVENTS_RINGBUF_SIZE, IPSEC_METRIC_COUNT, IPSEC_METRIC_DECRYPT_MARKED,
        IPSEC_METRIC_EGRESS_SEEN, IPSEC_METRIC_EVENTS_DROPPED, IPSEC_METRIC_INGRESS_PULL_FAILED,
        IPSEC_METRIC_INGRESS_SEEN, IpsecConfig, NODES_MAX_ENTRIES, NodeValue,
        REMOTE_ENDPOINTS_MAX_ENTRIES, RemoteEndpointInfo,
    },
    key::KeyIndex,
    mark::is_decrypt_mark,
};
use network_types::{eth::EthHdr, ip::Ipv4Hdr};

// ── Constants ───────────────────────────────────────────────────────

const IPV6_HDR_LEN: usize = 40;

/// `BPF_F_INGRESS` for `bpf_redirect`.
const BPF_F_INGRESS: u64 = 1;

/// `PACKET_HOST` for `bpf_skb_change_type`.
const PACKET_HOST: u32 = 0;

/// skb->cb slots used to carry state across the XFRM transform.
const CB_ENCRYPT_MAGIC: usize = 0;
const CB_ENCRYPT_IDENTITY: usize = 1;

/// IPv6 fixed header (40 bytes).
#[repr(C)]
struct Ipv6Hdr {
    _vtcfl: u32,
    _payload_len: u16,
    next_hdr: u8,
    _hop_limit: u8,
    src_addr: [u8; 16],
    dst_addr: [u8; 16],
}

// ── Maps ────────────────────────────────────────────────────────────

/// Local key epoch (index 0). Replaced atomically by userspace.
#[map]
static ENCRYPT_STATE: Array<EncryptConfig> = Array::with_max_entries(1, 0);

/// Datapath configuration (index 0). Absent or disabled → pass everything.
#[map]
static IPSEC_CONFIG: Array<IpsecConfig> = Array::with_max_entries(1, 0);

/// Remote prefix → endpoint metadata. Keys in network byte order.
#[map]
static REMOTE_ENDPOINTS_V4: LpmTrie<[u8; 4], RemoteEndpointInfo> =
    LpmTrie::with_max_entries(REMOTE_ENDPOINTS_MAX_ENTRIES, 0);

#[map]
static REMOTE_ENDPOINTS_V6: LpmTrie<[u8; 16], RemoteEndpointInfo> =
    LpmTrie::with_max_entries(REMOTE_ENDPOINTS_MAX_ENTRIES, 0);

/// Node address → node id and advertised key.
#[map]
static NODES_V4: HashMap<[u8; 4], NodeValue> = HashMap::with_max_entries(NODES_MAX_ENTRIES, 0);

#[map]
static NODES_V6: HashMap<[u8; 16], NodeValue> = HashMap::with_max_entries(NODES_MAX_ENTRIES, 0);

/// Per-CPU outcome counters, indexed by `IPSEC_METRIC_*`.
#[map]
static IPSEC_METRICS: PerCpuArray<u64> = PerCpuArray::with_max_entries(IPSEC_METRIC_COUNT, 0);

/// Drop notifications for userspace.
#[map]
static IPSEC_EVENTS: RingBuf = RingBuf::with_byte_size(IPSEC_EVENTS_RINGBUF_SIZE, 0);

// ── Backpressure ────────────────────────────────────────────────────

/// Skip emission when more than 75% of the ring buffer is unread.
const BACKPRESSURE_THRESHOLD: u64 = IPSEC_EVENTS_RINGBUF_SIZE as u64 * 3 / 4;

/// `BPF_RB_AVAIL_DATA` flag for `bpf_ringbuf_query`.
const BPF_RB_AVAIL_DATA: u64 = 0;

#[inline(always)]
fn ringbuf_has_backpressure() -> bool {
    IPSEC_EVENTS.query(BPF_RB_AVAIL_DATA) > BACKPRESSURE_THRESHOLD
}

// ── Entry points ────────────────────────────────────────────────────

/// Egress classifier: redirect traffic that must be encrypted to the
/// ingress of the XFRM device.
#[classifier]
pub fn tc_ipsec_egress(mut ctx: TcContext) -> i32 {
    let Some(config) = load_config() else {
        return TC_ACT_OK;
    };
    increment_metric(IPSEC_METRIC_EGRESS_SEEN);

    let mut pkt = TcPacket { ctx: &mut ctx };
    let disposition = EncryptDispatcher::new(&config, &MapEndpoints, &MapNodes)
        .classify_and_mark_egress(&mut pkt, SecurityIdentity::UNKNOWN);
    finish(&mut pkt, disposition, DIRECTION_EGRESS)
}

/// Ingress classifier: tag ESP for the transform and hand decrypted
/// traffic back to the host.
#[classifier]
pub fn tc_ipsec_ingress(mut ctx: TcContext) -> i32 {
    let Some(config) = load_config() else {
        return TC_ACT_OK;
    };
    increment_metric(IPSEC_METRIC_INGRESS_SEEN);

    // Linearize the headers. On failure classification still runs and a
    // short header shows up as a bounds-check miss.
    if let Err(ret) = ctx.pull_data((EthHdr::LEN + IPV6_HDR_LEN) as u32) {
        increment_metric(IPSEC_METRIC_INGRESS_PULL_FAILED);
        debug!(&ctx, "ipsec ingress pull_data failed ret={}", ret);
    }

    let mut pkt = TcPacket { ctx: &mut ctx };
    let disposition = DecryptDispatcher::new(&config, &MapNodes).classify_ingress(&mut pkt);
    finish(&mut pkt, disposition, DIRECTION_INGRESS)
}

#[inline(always)]
fn load_config() -> Option<DatapathConfig> {
    let cfg = IPSEC_CONFIG.get(0)?;
    if !cfg.is_enabled() {
        return None;
    }
    Some(DatapathConfig::from_maps(&MapKeyStore, cfg))
}

/// Count the outcome, report drops and map the disposition to a TC verdict.
#[inline(always)]
fn finish(pkt: &mut TcPacket<'_>, disposition: PacketDisposition, direction: u8) -> i32 {
    increment_metric(disposition.metric_index(direction));

    match disposition {
        PacketDisposition::Pass => {
            if direction == DIRECTION_INGRESS && is_decrypt_mark(pkt.mark()) {
                increment_metric(IPSEC_METRIC_DECRYPT_MARKED);
            }
            TC_ACT_OK
        }
        PacketDisposition::RedirectEncrypt { .. } | PacketDisposition::RedirectDecrypt { .. } => {
            TC_ACT_REDIRECT
        }
        PacketDisposition::Drop(reason) => {
            let ctx: &TcContext = pkt.ctx;
            debug!(
                ctx,
                "ipsec drop reason={} code={}",
                reason as u8,
                reason.code()
            );
            emit_drop_event(pkt, reason, direction);
            TC_ACT_SHOT
        }
    }
}

// ── Packet adapter ──────────────────────────────────────────────────

struct TcPacket<'a> {
    ctx: &'a mut TcContext,
}

impl DatapathPacket for TcPacket<'_> {
    /// `skb->protocol`, not the frame's type field. 802.3 frames carry
    /// `ETH_P_802_3`/`ETH_P_802_2` here, which fall below the ethertype range.
    /// Header loads still assume an Ethernet frame, so both classifiers are
    /// only attached to Ethernet devices.
    #[inline(always)]
    fn ethertype(&self) -> u16 {
        u16::from_be(unsafe { (*self.ctx.skb.skb).protocol } as u16)
    }

    #[inline(always)]
    fn load_ip_header(&self, family: AddrFamily) -> Result<IpHeader, ()> {
        match family {
            AddrFamily::V4 => {
                let ip4: *const Ipv4Hdr = unsafe { ptr_at(self.ctx, EthHdr::LEN)? };
                Ok(IpHeader {
                    protocol: unsafe { (*ip4).proto } as u8,
                    saddr: NetAddr::V4(unsafe { (*ip4).src_addr }),
                    daddr: NetAddr::V4(unsafe { (*ip4).dst_addr }),
                })
            }
            AddrFamily::V6 => {
                let ip6: *const Ipv6Hdr = unsafe { ptr_at(self.ctx, EthHdr::LEN)? };
                Ok(IpHeader {
                    protocol: unsafe { (*ip6).next_hdr },
                    saddr: NetAddr::V6(unsafe { (*ip6).src_addr }),
                    daddr: NetAddr::V6(unsafe { (*ip6).dst_addr }),
                })
            }
        }
    }

    #[inline(always)]
    fn mark(&self) -> u32 {
        unsafe { (*self.ctx.skb.skb).mark }
    }

    #[inline(always)]
    fn set_mark(&mut self, mark: u32) {
        self.ctx.set_mark(mark);
    }

    #[inline(always)]
    fn set_aux_mark(&mut self, mark: u32) {
        unsafe { (*self.ctx.skb.skb).cb[CB_ENCRYPT_MAGIC] = mark };
    }

    #[inline(always)]
    fn set_identity_meta(&mut self, identity: u32) {
        unsafe { (*self.ctx.skb.skb).cb[CB_ENCRYPT_IDENTITY] = identity };
    }

    #[inline(always)]
    fn store_eth_daddr(&mut self, mac: &[u8; 6]) -> Result<(), ()> {
        self.ctx.store(0, mac, 0).map_err(|_| ())
    }

    #[inline(always)]
    fn redirect(&mut self, ifindex: u32, ingress: bool) -> bool {
        let flags = if ingress { BPF_F_INGRESS } else { 0 };
        let ret = unsafe { bpf_redirect(ifindex, flags) };
        ret == TC_ACT_REDIRECT as i64
    }

    #[inline(always)]
    fn set_host_packet_type(&mut self) -> Result<(), ()> {
        let ret = unsafe { bpf_skb_change_type(self.ctx.skb.skb as *mut _, PACKET_HOST) };
        if ret == 0 { Ok(()) } else { Err(()) }
    }
}

// ── Map-backed resolvers ────────────────────────────────────────────

struct MapKeyStore;

impl KeyEpochStore for MapKeyStore {
    #[inline(always)]
    fn local_key(&self) -> KeyIndex {
        match ENCRYPT_STATE.get(0) {
            Some(cfg) => KeyIndex::from_bits(cfg.encrypt_key),
            None => KeyIndex::DISABLED,
        }
    }
}

struct MapEndpoints;

impl EndpointResolver for MapEndpoints {
    #[inline(always)]
    fn lookup_endpoint(&self, addr: &NetAddr) -> Option<RemoteEndpointInfo> {
        match addr {
            NetAddr::V4(a) => REMOTE_ENDPOINTS_V4.get(&Key::new(32, *a)).copied(),
            NetAddr::V6(a) => REMOTE_ENDPOINTS_V6.get(&Key::new(128, *a)).copied(),
        }
    }
}

struct MapNodes;

impl NodeResolver for MapNodes {
    #[inline(always)]
    fn lookup_node(&self, addr: &NetAddr) -> Option<NodeValue> {
        match addr {
            NetAddr::V4(a) => unsafe { NODES_V4.get(a) }.copied(),
            NetAddr::V6(a) => unsafe { NODES_V6.get(a) }.copied(),
        }
    }
}

// ── Helpers ─────────────────────────────────────────────────────────

/// Bounds-checked pointer access. Every packet read must be validated
/// against data_end for the verifier.
#[inline(always)]
unsafe fn ptr_at<T>(ctx: &TcContext, offset: usize) -> Result<*const T, ()> {
    let start = ctx.data();
    let end = ctx.data_end();
    let len = mem::size_of::<T>();
    if start + offset + len > end {
        return Err(());
    }
    Ok((start + offset) as *const T)
}

#[inline(always)]
fn increment_metric(index: u32) {
    if let Some(counter) = IPSEC_METRICS.get_ptr_mut(index) {
        unsafe {
            *counter += 1;
        }
    }
}

/// Emit a DropEvent. Never blocks: under backpressure or when the buffer
/// is full the event is counted as dropped instead.
#[inline(always)]
fn emit_drop_event(pkt: &TcPacket<'_>, reason: DropReason, direction: u8) {
    if ringbuf_has_backpressure() {
        increment_metric(IPSEC_METRIC_EVENTS_DROPPED);
        return;
    }

    let header = AddrFamily::from_ethertype(pkt.ethertype())
        .and_then(|family| pkt.load_ip_header(family).ok());

    if let Some(mut entry) = IPSEC_EVENTS.reserve::<DropEvent>(0) {
        let ptr = entry.as_mut_ptr();
        unsafe {
            (*ptr).timestamp_ns = bpf_ktime_get_boot_ns();
            match header {
                Some(ip) => {
                    (*ptr).src_addr = ip.saddr.to_bytes16();
                    (*ptr).dst_addr = ip.daddr.to_bytes16();
                    (*ptr).protocol = ip.protocol;
                    (*ptr).flags = match ip.saddr {
                        NetAddr::V6(_) => DROP_EVENT_FLAG_IPV6,
                        NetAddr::V4(_) => 0,
                    };
                }
                None => {
                    (*ptr).src_addr = [0; 16];
                    (*ptr).dst_addr = [0; 16];
                    (*ptr).protocol = 0;
                    (*ptr).flags = 0;
                }
            }
            (*ptr).mark = pkt.mark();
            (*ptr).ifindex = (*pkt.ctx.skb.skb).ifindex;
            (*ptr).reason = reason as u8;
            (*ptr).code = reason.code();
            (*ptr).direction = direction;
            (*ptr)._pad = [0; 3];
        }
        entry.submit(0);
    } else {
        increment_metric(IPSEC_METRIC_EVENTS_DROPPED);
    }
}

#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}
