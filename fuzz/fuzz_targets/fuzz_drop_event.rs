#![no_main]

use libfuzzer_sys::fuzz_target;

use application::drop_pipeline::event_addrs;
use ebpf_common::datapath::DropReason;
use ebpf_common::ipsec::{DROP_EVENT_FLAG_IPV6, DropEvent};

fuzz_target!(|data: &[u8]| {
    if data.len() < core::mem::size_of::<DropEvent>() {
        return;
    }

    // SAFETY: length checked above and DropEvent is plain old data.
    let event: DropEvent = unsafe { core::ptr::read_unaligned(data.as_ptr().cast()) };

    if let Some(reason) = DropReason::from_u8(event.reason) {
        assert_eq!(DropReason::from_u8(reason as u8), Some(reason));
        let _ = reason.code();
        let _ = reason.as_str();
    }

    let (src, dst) = event_addrs(&event);
    let ipv6 = event.flags & DROP_EVENT_FLAG_IPV6 != 0;
    assert_eq!(src.is_ipv6(), ipv6);
    assert_eq!(dst.is_ipv6(), ipv6);

    let _ = format!("{event:?}");
});
