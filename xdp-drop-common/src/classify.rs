//! Per-frame drop decision.
//!
//! Runs unchanged inside the XDP program and in host tests. Every header
//! field goes through [`Frame::read_bytes`], which checks the read against
//! the end of the frame first, and there are no loops, so the verifier can
//! follow every path.

use core::sync::atomic::{AtomicU64, Ordering};

use crate::AddressKey;

pub const ETH_HDR_LEN: usize = 14;
pub const ETH_TYPE_OFFSET: usize = 12;
pub const IPV4_MIN_HDR_LEN: usize = 20;
pub const IPV4_SRC_OFFSET: usize = 12;
pub const IPV6_HDR_LEN: usize = 40;
pub const IPV6_SRC_OFFSET: usize = 8;

pub const ETH_P_IPV4: u16 = 0x0800;
pub const ETH_P_IPV6: u16 = 0x86DD;

#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum Verdict {
    Pass,
    Drop,
}

/// A received frame: a byte span of known length.
pub trait Frame {
    fn len(&self) -> usize;

    /// Copies `N` bytes starting at `offset`, or `None` if any of them lies
    /// past the end of the frame.
    fn read_bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]>;
}

impl Frame for [u8] {
    fn len(&self) -> usize {
        <[u8]>::len(self)
    }

    fn read_bytes<const N: usize>(&self, offset: usize) -> Option<[u8; N]> {
        let end = offset.checked_add(N)?;
        self.get(offset..end)?.try_into().ok()
    }
}

/// Read side of the membership table.
pub trait Membership {
    fn is_target(&self, key: &AddressKey) -> bool;
}

/// Write side of the drop counter table.
pub trait DropCounters {
    /// Existing counter for `key`, if any.
    fn counter(&self, key: &AddressKey) -> Option<&AtomicU64>;

    /// Creates the entry with `initial` only if it is absent. Returns false
    /// when the entry already exists or the table refuses the insert.
    fn create(&self, key: &AddressKey, initial: u64) -> bool;
}

/// Read position within a frame with explicit remaining-length tracking.
pub struct Cursor<'a, F: ?Sized> {
    frame: &'a F,
    offset: usize,
}

impl<'a, F: Frame + ?Sized> Cursor<'a, F> {
    #[inline(always)]
    pub fn new(frame: &'a F) -> Self {
        Self { frame, offset: 0 }
    }

    #[inline(always)]
    pub fn offset(&self) -> usize {
        self.offset
    }

    #[inline(always)]
    pub fn remaining(&self) -> usize {
        self.frame.len().saturating_sub(self.offset)
    }

    /// Reads `N` bytes at `at` relative to the cursor.
    #[inline(always)]
    pub fn peek<const N: usize>(&self, at: usize) -> Option<[u8; N]> {
        self.frame.read_bytes(self.offset.checked_add(at)?)
    }

    /// Moves past `n` bytes, refusing to move beyond the end of the frame.
    #[inline(always)]
    pub fn advance(&mut self, n: usize) -> Option<()> {
        if self.remaining() < n {
            return None;
        }
        self.offset += n;
        Some(())
    }
}

/// Decides whether to drop `frame`, recording the drop in `dropped`.
#[inline(always)]
pub fn classify<F, M, C>(frame: &F, targets: &M, dropped: &C) -> Verdict
where
    F: Frame + ?Sized,
    M: Membership,
    C: DropCounters,
{
    let key = match source_key(frame) {
        Ok(key) => key,
        Err(verdict) => return verdict,
    };
    if targets.is_target(&key) {
        record_drop(dropped, &key);
        Verdict::Drop
    } else {
        Verdict::Pass
    }
}

/// Extracts the source address, or the fixed verdict for frames that cannot
/// be classified.
#[inline(always)]
pub fn source_key<F: Frame + ?Sized>(frame: &F) -> Result<AddressKey, Verdict> {
    let mut cursor = Cursor::new(frame);

    // Not even a link-layer header: malformed.
    if cursor.remaining() < ETH_HDR_LEN {
        return Err(Verdict::Drop);
    }
    // Too short for IP. Could be ARP or similar, leave it to the kernel.
    if cursor.remaining() < ETH_HDR_LEN + IPV4_MIN_HDR_LEN {
        return Err(Verdict::Pass);
    }

    let ether_type = u16::from_be_bytes(cursor.peek(ETH_TYPE_OFFSET).ok_or(Verdict::Drop)?);
    cursor.advance(ETH_HDR_LEN).ok_or(Verdict::Drop)?;

    match ether_type {
        ETH_P_IPV4 => ipv4_source(&cursor),
        ETH_P_IPV6 => ipv6_source(&cursor),
        _ => Err(Verdict::Pass),
    }
}

#[inline(always)]
fn ipv4_source<F: Frame + ?Sized>(ip: &Cursor<'_, F>) -> Result<AddressKey, Verdict> {
    let [version_ihl] = ip.peek::<1>(0).ok_or(Verdict::Drop)?;
    let header_len = usize::from(version_ihl & 0x0f) * 4;
    if header_len < IPV4_MIN_HDR_LEN || ip.remaining() < header_len {
        return Err(Verdict::Drop);
    }
    let src = ip.peek::<4>(IPV4_SRC_OFFSET).ok_or(Verdict::Drop)?;
    Ok(AddressKey::ipv4(src))
}

#[inline(always)]
fn ipv6_source<F: Frame + ?Sized>(ip: &Cursor<'_, F>) -> Result<AddressKey, Verdict> {
    if ip.remaining() < IPV6_HDR_LEN {
        return Err(Verdict::Drop);
    }
    let src = ip.peek::<16>(IPV6_SRC_OFFSET).ok_or(Verdict::Drop)?;
    Ok(AddressKey::ipv6(src))
}

/// Adds one drop for `key`, creating the counter on first use.
///
/// Two contexts can race on the first drop for a key. The loser of the
/// `create` race falls through to the increment, so both drops are counted.
#[inline(always)]
pub fn record_drop<C: DropCounters>(dropped: &C, key: &AddressKey) {
    if let Some(counter) = dropped.counter(key) {
        counter.fetch_add(1, Ordering::Relaxed);
        return;
    }
    if dropped.create(key, 1) {
        return;
    }
    if let Some(counter) = dropped.counter(key) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}
