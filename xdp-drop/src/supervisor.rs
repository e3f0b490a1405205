use std::{mem, path::PathBuf, time::Duration};

use anyhow::{Context, Result};
use aya::Ebpf;
use aya::programs::xdp::XdpLinkId;
use log::{error, info};
use tokio::signal::unix::{Signal, SignalKind, signal};
use tokio::time::{self, MissedTickBehavior};

use crate::ebpf_loader::{self, DroppedMap, Interface, XdpMode};
use crate::provision::{self, SystemResolver};
use crate::report::{self, ReportFormat};
use crate::targets;

#[derive(Clone, Debug)]
pub struct SupervisorOptions {
    pub program: PathBuf,
    pub iface: String,
    pub addresses: PathBuf,
    pub xdp_mode: XdpMode,
    pub report_interval: Duration,
    pub report_format: ReportFormat,
}

/// Attachment state of the classifier.
#[derive(Debug)]
enum Lifecycle<L> {
    Unattached,
    Attached(L),
    Detached,
}

impl<L> Lifecycle<L> {
    fn attached(&mut self, link: L) {
        *self = Lifecycle::Attached(link);
    }

    /// Moves to `Detached` and hands out the link at most once.
    fn begin_detach(&mut self) -> Option<L> {
        match mem::replace(self, Lifecycle::Detached) {
            Lifecycle::Attached(link) => Some(link),
            Lifecycle::Unattached | Lifecycle::Detached => None,
        }
    }
}

/// SIGINT and SIGTERM, registered once at startup so a signal that arrives
/// before the polling loop starts is not lost.
struct ShutdownSignal {
    interrupt: Signal,
    terminate: Signal,
}

impl ShutdownSignal {
    fn register() -> Result<Self> {
        Ok(Self {
            interrupt: signal(SignalKind::interrupt()).context("failed to listen for SIGINT")?,
            terminate: signal(SignalKind::terminate()).context("failed to listen for SIGTERM")?,
        })
    }

    async fn recv(&mut self) -> &'static str {
        tokio::select! {
            _ = self.interrupt.recv() => "SIGINT",
            _ = self.terminate.recv() => "SIGTERM",
        }
    }
}

/// Process-wide state: set up once at startup and torn down once.
pub struct Supervisor {
    bpf: Ebpf,
    iface: Interface,
    mode: XdpMode,
    dropped: DroppedMap,
    lifecycle: Lifecycle<XdpLinkId>,
}

impl Supervisor {
    pub fn attach(&mut self) -> Result<()> {
        let link = ebpf_loader::attach_xdp(&mut self.bpf, &self.iface, self.mode)?;
        self.lifecycle.attached(link);
        Ok(())
    }

    /// Detaches the classifier. Only the first call after a successful attach
    /// talks to the kernel; later calls do nothing.
    pub fn detach(&mut self) -> Result<()> {
        let Some(link) = self.lifecycle.begin_detach() else {
            return Ok(());
        };
        ebpf_loader::detach_xdp(&mut self.bpf, &self.iface, link)?;
        info!("detached XDP program from {}", self.iface.name);
        Ok(())
    }

    async fn poll(&self, interval: Duration, format: ReportFormat, shutdown: &mut ShutdownSignal) {
        let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                name = shutdown.recv() => {
                    info!("received {name}, detaching from {}", self.iface.name);
                    return;
                }
                _ = ticker.tick() => report::print_report(&self.dropped, format),
            }
        }
    }
}

impl Drop for Supervisor {
    fn drop(&mut self) {
        if let Err(err) = self.detach() {
            error!("{err:#}");
        }
    }
}

/// Loads, provisions, attaches, reports until signalled, then detaches.
pub async fn run(opts: SupervisorOptions) -> Result<()> {
    let mut shutdown = ShutdownSignal::register()?;
    let iface = Interface::lookup(&opts.iface)?;

    let mut bpf = ebpf_loader::load_program(&opts.program)?;
    info!("loaded {}", opts.program.display());
    let mut target_map = ebpf_loader::take_target_map(&mut bpf)?;
    let dropped = ebpf_loader::take_dropped_map(&mut bpf)?;

    // Fill the deny set before any frame reaches the classifier.
    let specs = targets::read_specifications(&opts.addresses)
        .with_context(|| format!("failed to read addresses from {}", opts.addresses.display()))?;
    provision::provision(&specs, &SystemResolver, &mut target_map).await;

    let mut supervisor = Supervisor {
        bpf,
        iface,
        mode: opts.xdp_mode,
        dropped,
        lifecycle: Lifecycle::Unattached,
    };
    supervisor.attach()?;

    supervisor
        .poll(opts.report_interval, opts.report_format, &mut shutdown)
        .await;

    supervisor.detach()
}
