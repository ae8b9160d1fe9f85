#![no_main]

use libfuzzer_sys::fuzz_target;

use ebpf_common::key::{KeyIndex, select_key};
use ebpf_common::mark::{EncryptionMark, is_decrypt_mark, is_overlay_mark};

fuzz_target!(|data: &[u8]| {
    if data.len() < 6 {
        return;
    }
    let raw = u32::from_ne_bytes([data[0], data[1], data[2], data[3]]);
    let mark = EncryptionMark::from_raw(raw);

    // At most one classification holds.
    assert!(!(mark.is_encrypt() && mark.is_decrypt()));
    assert!(!(mark.is_encrypt() && is_overlay_mark(raw)));
    assert_eq!(mark.is_decrypt(), is_decrypt_mark(raw));

    assert_eq!(mark.key().is_some(), mark.is_encrypt());
    assert_eq!(
        mark.node_id().is_some(),
        mark.is_encrypt() || mark.is_decrypt()
    );

    // Re-encoding reproduces everything except the unused low byte.
    if let (Some(key), Some(node)) = (mark.key(), mark.node_id()) {
        let again = EncryptionMark::encrypt(key, node);
        assert_eq!(again.raw(), raw & 0xFFFF_FF00);
    }
    if mark.is_decrypt()
        && let Some(node) = mark.node_id()
    {
        let again = EncryptionMark::decrypt(node);
        assert_eq!(again.node_id(), Some(node));
        assert!(again.is_decrypt());
    }

    // Negotiation stays within the key space and is 0 when either side is.
    let local = KeyIndex::from_bits(data[4]);
    let peer = KeyIndex::from_bits(data[5]);
    let chosen = select_key(local, peer);
    assert!(chosen.get() <= KeyIndex::MAX.get());
    if !local.is_enabled() || !peer.is_enabled() {
        assert!(!chosen.is_enabled());
    } else {
        assert!(chosen == local || chosen == peer);
    }
});
