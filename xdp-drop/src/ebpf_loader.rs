use std::{ffi::CString, io, path::Path};

use anyhow::{Context, Result, anyhow};
use aya::maps::{HashMap, MapData};
use aya::programs::xdp::XdpLinkId;
use aya::programs::{Xdp, XdpFlags};
use aya::{Ebpf, EbpfLoader};
use clap::ValueEnum;
use log::{debug, info};

use xdp_drop_common::{AddressKey, DROPPED_MAP, TARGETS_MAP, XDP_PROGRAM};

pub type TargetMap = HashMap<MapData, AddressKey, u8>;
pub type DroppedMap = HashMap<MapData, AddressKey, u64>;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum XdpMode {
    Skb,
    Driver,
    Hw,
}

fn xdp_flags(mode: XdpMode) -> XdpFlags {
    match mode {
        XdpMode::Skb => XdpFlags::SKB_MODE,
        XdpMode::Driver => XdpFlags::DRV_MODE,
        XdpMode::Hw => XdpFlags::HW_MODE,
    }
}

/// A network interface resolved once at startup.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Interface {
    pub name: String,
    pub index: u32,
}

impl Interface {
    pub fn lookup(name: &str) -> Result<Self> {
        let ifname = CString::new(name)
            .with_context(|| format!("invalid interface name {name:?}"))?;
        let index = unsafe { libc::if_nametoindex(ifname.as_ptr()) };
        if index == 0 {
            return Err(io::Error::last_os_error())
                .with_context(|| format!("invalid interface specified: {name}"));
        }
        Ok(Self {
            name: name.to_string(),
            index,
        })
    }
}

/// Loads the compiled classifier object. Maps are created by the kernel at
/// this point, the program itself is loaded on attach.
pub fn load_program(path: &Path) -> Result<Ebpf> {
    raise_memlock_limit();
    EbpfLoader::new()
        .load_file(path)
        .with_context(|| format!("failed to load eBPF object at {}", path.display()))
}

// Kernels before 5.11 charge BPF maps against RLIMIT_MEMLOCK.
fn raise_memlock_limit() {
    let rlim = libc::rlimit {
        rlim_cur: libc::RLIM_INFINITY,
        rlim_max: libc::RLIM_INFINITY,
    };
    let ret = unsafe { libc::setrlimit(libc::RLIMIT_MEMLOCK, &rlim) };
    if ret != 0 {
        debug!("remove limit on locked memory failed, ret is: {ret}");
    }
}

pub fn take_target_map(bpf: &mut Ebpf) -> Result<TargetMap> {
    let map = bpf
        .take_map(TARGETS_MAP)
        .with_context(|| format!("map {TARGETS_MAP} not found"))?;
    TargetMap::try_from(map).with_context(|| format!("map {TARGETS_MAP} has unexpected type"))
}

pub fn take_dropped_map(bpf: &mut Ebpf) -> Result<DroppedMap> {
    let map = bpf
        .take_map(DROPPED_MAP)
        .with_context(|| format!("map {DROPPED_MAP} not found"))?;
    DroppedMap::try_from(map).with_context(|| format!("map {DROPPED_MAP} has unexpected type"))
}

fn xdp_program(bpf: &mut Ebpf) -> Result<&mut Xdp> {
    bpf.program_mut(XDP_PROGRAM)
        .with_context(|| format!("program {XDP_PROGRAM} not found"))?
        .try_into()
        .context("xdp program has wrong type")
}

pub fn attach_xdp(bpf: &mut Ebpf, iface: &Interface, mode: XdpMode) -> Result<XdpLinkId> {
    let program = xdp_program(bpf)?;
    program.load().context("failed to load xdp program")?;
    let link = program
        .attach_to_if_index(iface.index, xdp_flags(mode))
        .with_context(|| format!("failed to attach xdp on {}", iface.name))?;
    info!(
        "attached {XDP_PROGRAM} to {} (index {}, mode {mode:?})",
        iface.name, iface.index
    );
    Ok(link)
}

pub fn detach_xdp(bpf: &mut Ebpf, iface: &Interface, link: XdpLinkId) -> Result<()> {
    xdp_program(bpf)?
        .detach(link)
        .map_err(|err| anyhow!("failed to detach xdp from {}: {err}", iface.name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn xdp_mode_flags() {
        // XdpFlags doesn't implement PartialEq, so compare the underlying bits
        assert_eq!(xdp_flags(XdpMode::Skb).bits(), XdpFlags::SKB_MODE.bits());
        assert_eq!(xdp_flags(XdpMode::Driver).bits(), XdpFlags::DRV_MODE.bits());
        assert_eq!(xdp_flags(XdpMode::Hw).bits(), XdpFlags::HW_MODE.bits());
    }

    #[test]
    fn loopback_interface_resolves() {
        let iface = Interface::lookup("lo").unwrap();
        assert_eq!(iface.name, "lo");
        assert!(iface.index > 0);
    }

    #[test]
    fn unknown_interface_is_rejected() {
        let err = Interface::lookup("xdpdrop-nope0").unwrap_err();
        assert!(err.to_string().contains("xdpdrop-nope0"));
    }

    #[test]
    fn interface_name_with_nul_is_rejected() {
        assert!(Interface::lookup("eth\00").is_err());
    }

    #[test]
    fn missing_object_is_reported_with_path() {
        let err = load_program(Path::new("/nonexistent/xdp-drop.o")).unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/xdp-drop.o"));
    }
}
