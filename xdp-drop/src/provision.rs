use std::{future::Future, io, net::IpAddr};

use anyhow::{Result, anyhow};
use aya::maps::MapError;
use log::{debug, info, warn};
use tokio::net::lookup_host;

use xdp_drop_common::{AddressKey, BPF_NOEXIST, TARGET_DROP};

use crate::ebpf_loader::TargetMap;

/// Turns one address specification into zero or more addresses.
///
/// Failures are reported by returning nothing; the provisioner moves on.
pub trait Resolver {
    fn resolve(&self, spec: &str) -> impl Future<Output = Vec<IpAddr>> + Send;
}

/// Literal addresses are taken as is, anything else goes to the system
/// resolver.
pub struct SystemResolver;

impl Resolver for SystemResolver {
    async fn resolve(&self, spec: &str) -> Vec<IpAddr> {
        if let Ok(addr) = spec.parse::<IpAddr>() {
            return vec![addr];
        }
        match lookup_host((spec, 0)).await {
            Ok(addrs) => {
                let mut resolved = Vec::new();
                // getaddrinfo repeats each address once per socket type.
                for addr in addrs.map(|sa| sa.ip()) {
                    if !resolved.contains(&addr) {
                        resolved.push(addr);
                    }
                }
                resolved
            }
            Err(err) => {
                warn!("failed to resolve {spec}: {err}");
                Vec::new()
            }
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Insert {
    Added,
    AlreadyPresent,
}

/// Write side of the membership table.
pub trait TargetTable {
    /// Inserts `key` with the drop flag unless it is already present. An
    /// existing entry keeps its value.
    fn insert_if_absent(&mut self, key: AddressKey) -> Result<Insert>;
}

impl TargetTable for TargetMap {
    fn insert_if_absent(&mut self, key: AddressKey) -> Result<Insert> {
        match self.insert(key, TARGET_DROP, BPF_NOEXIST) {
            Ok(()) => Ok(Insert::Added),
            Err(MapError::SyscallError(err)) if err.io_error.kind() == io::ErrorKind::AlreadyExists => {
                Ok(Insert::AlreadyPresent)
            }
            Err(err) => Err(anyhow!("failed to insert into targets map: {err}")),
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct ProvisionSummary {
    pub specs: usize,
    pub unresolved: usize,
    pub added: usize,
    pub duplicates: usize,
    pub failed: usize,
}

/// Resolves every specification and inserts the resulting keys.
///
/// A specification that resolves to nothing, or a key the table refuses, is
/// logged and skipped. Only the first insert of a key takes effect.
pub async fn provision<R, T>(specs: &[String], resolver: &R, table: &mut T) -> ProvisionSummary
where
    R: Resolver,
    T: TargetTable,
{
    let mut summary = ProvisionSummary {
        specs: specs.len(),
        ..ProvisionSummary::default()
    };

    for spec in specs {
        let addrs = resolver.resolve(spec).await;
        if addrs.is_empty() {
            warn!("no addresses for {spec}, skipping");
            summary.unresolved += 1;
            continue;
        }

        for addr in addrs {
            match table.insert_if_absent(AddressKey::from(addr)) {
                Ok(Insert::Added) => {
                    info!("blocking address: {addr}");
                    summary.added += 1;
                }
                Ok(Insert::AlreadyPresent) => {
                    debug!("{addr} from {spec} is already blocked");
                    summary.duplicates += 1;
                }
                Err(err) => {
                    warn!("skipping {addr} from {spec}: {err:#}");
                    summary.failed += 1;
                }
            }
        }
    }

    info!(
        "provisioned {} addresses from {} specifications ({} unresolved, {} duplicate, {} failed)",
        summary.added, summary.specs, summary.unresolved, summary.duplicates, summary.failed
    );
    summary
}
