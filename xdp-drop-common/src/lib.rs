#![cfg_attr(not(test), no_std)]

// Types shared between the userspace control plane and the XDP program.
// Keep this crate `no_std` friendly so it can be used from eBPF code.

use core::net::{IpAddr, Ipv4Addr, Ipv6Addr};

pub mod classify;
#[cfg(any(test, feature = "test-util"))]
pub mod testing;

pub use classify::{Cursor, DropCounters, Frame, Membership, Verdict, classify, record_drop};

/// AF_INET, as stored in `AddressKey::family`.
pub const FAMILY_IPV4: u8 = 2;
/// AF_INET6, as stored in `AddressKey::family`.
pub const FAMILY_IPV6: u8 = 10;

/// Membership table value meaning "drop frames from this source".
pub const TARGET_DROP: u8 = 1;

/// Capacity of both shared tables.
pub const MAX_TARGETS: u32 = 256;

/// `BPF_NOEXIST`: only create the entry if it is absent.
pub const BPF_NOEXIST: u64 = 1;

pub const TARGETS_MAP: &str = "targets";
pub const DROPPED_MAP: &str = "dropped";
pub const XDP_PROGRAM: &str = "xdp_drop";

/// Source address of a frame, as used for matching and counting.
///
/// The layout is shared bit-for-bit with the kernel hash maps, so every
/// byte (including `pad` and the unused tail of `addr` for IPv4) must be
/// zeroed by the constructors.
#[repr(C)]
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq, Hash, Ord, PartialOrd)]
pub struct AddressKey {
    pub family: u8,
    pub pad: [u8; 3],
    /// Network byte order. IPv4 uses the first four bytes.
    pub addr: [u8; 16],
}

impl AddressKey {
    #[inline(always)]
    pub const fn ipv4(octets: [u8; 4]) -> Self {
        Self {
            family: FAMILY_IPV4,
            pad: [0; 3],
            addr: [
                octets[0], octets[1], octets[2], octets[3], 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0,
            ],
        }
    }

    #[inline(always)]
    pub const fn ipv6(octets: [u8; 16]) -> Self {
        Self {
            family: FAMILY_IPV6,
            pad: [0; 3],
            addr: octets,
        }
    }

    /// Converts back to an address for display. `None` for an unknown family.
    pub fn to_ip(&self) -> Option<IpAddr> {
        match self.family {
            FAMILY_IPV4 => {
                let [a, b, c, d, ..] = self.addr;
                Some(IpAddr::V4(Ipv4Addr::new(a, b, c, d)))
            }
            FAMILY_IPV6 => Some(IpAddr::V6(Ipv6Addr::from(self.addr))),
            _ => None,
        }
    }
}

impl From<IpAddr> for AddressKey {
    fn from(addr: IpAddr) -> Self {
        match addr {
            IpAddr::V4(v4) => Self::ipv4(v4.octets()),
            IpAddr::V6(v6) => Self::ipv6(v6.octets()),
        }
    }
}

// With the `user` feature the crate implements `aya::Pod` for the key so it
// can be used with aya's typed map APIs. The eBPF side never enables it.
#[cfg(feature = "user")]
mod user_impls {
    extern crate aya;

    use super::AddressKey;
    use aya::Pod;

    unsafe impl Pod for AddressKey {}
}
