#![no_main]

use libfuzzer_sys::fuzz_target;

use ebpf_common::datapath::{
    AddrFamily, DatapathConfig, DatapathPacket, DecryptDispatcher, EncryptDispatcher,
    EndpointResolver, IpHeader, NetAddr, NodeResolver, PacketDisposition,
};
use ebpf_common::identity::SecurityIdentity;
use ebpf_common::ipsec::{NodeValue, RemoteEndpointInfo};
use ebpf_common::key::{KeyIndex, select_key};
use ebpf_common::mark::{EncryptionMark, is_decrypt_mark};

const NET_IFINDEX: u32 = 11;
const HOST_IFINDEX: u32 = 12;

// Input layout (24 bytes):
//   0..2   ethertype          2..6   mark
//   6      behaviour flags    7      IP protocol
//   8..12  saddr             12..16  daddr
//   16     local key          17     peer key
//   18..20 peer node id      20..24  endpoint identity

const F_HEADER_OK: u8 = 0x01;
const F_ETH_WRITE_OK: u8 = 0x02;
const F_REDIRECT_OK: u8 = 0x04;
const F_PKTTYPE_OK: u8 = 0x08;
const F_TUNNEL_MODE: u8 = 0x10;
const F_ENDPOINT_ROUTES: u8 = 0x20;
const F_AUX_MARK: u8 = 0x40;
const F_HAS_ENDPOINT: u8 = 0x80;

struct FuzzPacket {
    ethertype: u16,
    mark: u32,
    flags: u8,
    header: IpHeader,
    aux_mark: Option<u32>,
    redirected_to: Option<(u32, bool)>,
}

impl DatapathPacket for FuzzPacket {
    fn ethertype(&self) -> u16 {
        self.ethertype
    }
    fn load_ip_header(&self, family: AddrFamily) -> Result<IpHeader, ()> {
        if self.flags & F_HEADER_OK != 0 && family == AddrFamily::V4 {
            Ok(self.header)
        } else {
            Err(())
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
    fn set_identity_meta(&mut self, _identity: u32) {}
    fn store_eth_daddr(&mut self, _mac: &[u8; 6]) -> Result<(), ()> {
        if self.flags & F_ETH_WRITE_OK != 0 {
            Ok(())
        } else {
            Err(())
        }
    }
    fn redirect(&mut self, ifindex: u32, ingress: bool) -> bool {
        if self.flags & F_REDIRECT_OK == 0 {
            return false;
        }
        self.redirected_to = Some((ifindex, ingress));
        true
    }
    fn set_host_packet_type(&mut self) -> Result<(), ()> {
        if self.flags & F_PKTTYPE_OK != 0 {
            Ok(())
        } else {
            Err(())
        }
    }
}

/// Every address resolves to the same endpoint when one is configured.
struct OneEndpoint(Option<RemoteEndpointInfo>);

impl EndpointResolver for OneEndpoint {
    fn lookup_endpoint(&self, _addr: &NetAddr) -> Option<RemoteEndpointInfo> {
        self.0
    }
}

struct OneNode(NodeValue);

impl NodeResolver for OneNode {
    fn lookup_node(&self, _addr: &NetAddr) -> Option<NodeValue> {
        Some(self.0)
    }
}

fn v4(b: &[u8]) -> NetAddr {
    NetAddr::V4([b[0], b[1], b[2], b[3]])
}

fuzz_target!(|data: &[u8]| {
    if data.len() < 24 {
        return;
    }
    let flags = data[6];
    let header = IpHeader {
        protocol: data[7],
        saddr: v4(&data[8..12]),
        daddr: v4(&data[12..16]),
    };
    let packet = || FuzzPacket {
        ethertype: u16::from_be_bytes([data[0], data[1]]),
        mark: u32::from_ne_bytes([data[2], data[3], data[4], data[5]]),
        flags,
        header,
        aux_mark: None,
        redirected_to: None,
    };

    let config = DatapathConfig {
        local_key: KeyIndex::from_bits(data[16]),
        tunnel_mode: flags & F_TUNNEL_MODE != 0,
        endpoint_routes: flags & F_ENDPOINT_ROUTES != 0,
        use_aux_mark: flags & F_AUX_MARK != 0,
        net_ifindex: NET_IFINDEX,
        host_ifindex: HOST_IFINDEX,
        gateway_mac: [0x02, 0, 0, 0, 0, 0x01],
    };
    let node = NodeValue::new(u16::from_le_bytes([data[18], data[19]]), data[17]);
    let identity = u32::from_le_bytes([data[20], data[21], data[22], data[23]]);
    let endpoints = OneEndpoint(
        (flags & F_HAS_ENDPOINT != 0)
            .then(|| RemoteEndpointInfo::with_tunnel_v4(identity, [10, 0, 1, 7])),
    );
    let nodes = OneNode(node);

    // Egress
    let mut pkt = packet();
    let original_mark = pkt.mark;
    let disposition = EncryptDispatcher::new(&config, &endpoints, &nodes)
        .classify_and_mark_egress(&mut pkt, SecurityIdentity::UNKNOWN);
    match disposition {
        PacketDisposition::RedirectEncrypt { ifindex } => {
            assert_eq!(ifindex, NET_IFINDEX);
            assert_eq!(pkt.redirected_to, Some((NET_IFINDEX, true)));
            let mark = EncryptionMark::from_raw(pkt.mark);
            assert!(mark.is_encrypt());
            assert_ne!(node.id, 0);
            assert_eq!(mark.node_id(), Some(node.id));
            let expected = select_key(config.local_key, KeyIndex::from_bits(node.spi));
            assert_eq!(mark.key(), Some(expected));
            if config.use_aux_mark {
                assert_eq!(pkt.aux_mark, Some(pkt.mark));
            }
        }
        PacketDisposition::Pass => {
            assert_eq!(pkt.mark, original_mark);
            assert!(pkt.redirected_to.is_none());
        }
        PacketDisposition::Drop(_) => {}
        PacketDisposition::RedirectDecrypt { .. } => panic!("egress produced a decrypt redirect"),
    }

    // Ingress
    let mut pkt = packet();
    let was_decrypted = is_decrypt_mark(pkt.mark);
    let disposition = DecryptDispatcher::new(&config, &nodes).classify_ingress(&mut pkt);
    match disposition {
        PacketDisposition::RedirectDecrypt { ifindex } => {
            assert!(was_decrypted);
            assert!(!config.endpoint_routes);
            assert_eq!(ifindex, HOST_IFINDEX);
            assert_eq!(pkt.redirected_to, Some((HOST_IFINDEX, false)));
            assert_eq!(pkt.mark, 0);
        }
        PacketDisposition::RedirectEncrypt { .. } => panic!("ingress produced an encrypt redirect"),
        PacketDisposition::Pass | PacketDisposition::Drop(_) => {
            assert!(pkt.redirected_to.is_none());
        }
    }
});
