#![cfg_attr(target_arch = "bpf", no_std)]
#![cfg_attr(target_arch = "bpf", no_main)]

use core::sync::atomic::AtomicU64;

use aya_ebpf::bindings::xdp_action;
use aya_ebpf::macros::{map, xdp};
use aya_ebpf::maps::HashMap;
use aya_ebpf::programs::XdpContext;
use xdp_drop_common::{
    AddressKey, BPF_NOEXIST, DropCounters, Frame, MAX_TARGETS, Membership, Verdict, classify,
};

/// Source addresses to drop. Filled by userspace before attach.
#[map(name = "targets")]
static TARGETS: HashMap<AddressKey, u8> =
    HashMap::<AddressKey, u8>::with_max_entries(MAX_TARGETS, 0);

/// Frames dropped per source address.
#[map(name = "dropped")]
static DROPPED: HashMap<AddressKey, u64> =
    HashMap::<AddressKey, u64>::with_max_entries(MAX_TARGETS, 0);

#[xdp]
pub fn xdp_drop(ctx: XdpContext) -> u32 {
    match classify(&XdpFrame(&ctx), &TargetTable, &DropTable) {
        Verdict::Drop => xdp_action::XDP_DROP,
        Verdict::Pass => xdp_action::XDP_PASS,
    }
}

struct XdpFrame<'a>(&'a XdpContext);

impl Frame for XdpFrame<'_> {
    #[inline(always)]
    fn len(&self) -> usize {
        self.0.data_end().saturating_sub(self.0.data())
    }

    #[inline(always)]
    fn read_bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let start = self.0.data();
        let end = self.0.data_end();
        if start + offset + N > end {
            return None;
        }
        Some(unsafe { core::ptr::read_unaligned((start + offset) as *const [u8; N]) })
    }
}

struct TargetTable;

impl Membership for TargetTable {
    #[inline(always)]
    fn is_target(&self, key: &AddressKey) -> bool {
        match unsafe { TARGETS.get(key) } {
            Some(flag) => *flag != 0,
            None => false,
        }
    }
}

struct DropTable;

impl DropCounters for DropTable {
    #[inline(always)]
    fn counter(&self, key: &AddressKey) -> Option<&AtomicU64> {
        // Map values are 8-byte aligned and live as long as the entry, which
        // the program never deletes.
        DROPPED
            .get_ptr_mut(key)
            .map(|ptr| unsafe { AtomicU64::from_ptr(ptr) })
    }

    #[inline(always)]
    fn create(&self, key: &AddressKey, initial: u64) -> bool {
        DROPPED.insert(key, &initial, BPF_NOEXIST).is_ok()
    }
}

#[cfg(target_arch = "bpf")]
#[panic_handler]
fn panic(_info: &core::panic::PanicInfo) -> ! {
    loop {}
}

#[cfg(not(target_arch = "bpf"))]
fn main() {
    panic!("xdp-drop-ebpf is an eBPF object; build it for bpfel-unknown-none and load it with xdp-drop");
}

#[link_section = "license"]
#[used]
#[no_mangle]
static LICENSE: [u8; 4] = *b"GPL\0";
