use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;

use anyhow::Result;
use clap::Parser;

mod ebpf_loader;
mod provision;
mod report;
#[cfg(test)]
mod scenarios;
mod supervisor;
mod targets;

use ebpf_loader::XdpMode;
use report::ReportFormat;

const MAX_REPORT_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Parser)]
#[command(name = "xdp-drop")]
#[command(about = "Drop ingress traffic from listed source addresses with XDP", long_about = None)]
struct Cli {
    /// Compiled XDP object to load
    #[arg(long, value_name = "PATH", env = "XDP_DROP_PROGRAM_FILEPATH")]
    program: PathBuf,
    /// Network interface to attach to
    #[arg(long, value_name = "IFACE", env = "XDP_DROP_INTERFACE_NAME")]
    iface: String,
    /// File with one hostname or IP address per line
    #[arg(long, value_name = "PATH", env = "XDP_DROP_ADDRESS_LIST_FILEPATH")]
    addresses: PathBuf,
    /// XDP attach mode
    #[arg(long, value_enum, default_value_t = XdpMode::Skb, env = "XDP_DROP_MODE")]
    xdp_mode: XdpMode,
    /// Seconds between drop counter reports
    #[arg(
        long,
        default_value_t = 2,
        env = "XDP_DROP_REPORT_INTERVAL_SECS",
        value_parser = clap::value_parser!(u64).range(1..=MAX_REPORT_INTERVAL_SECS)
    )]
    report_interval_secs: u64,
    /// Output format of drop counter reports
    #[arg(long, value_enum, default_value_t = ReportFormat::Text, env = "XDP_DROP_REPORT_FORMAT")]
    report_format: ReportFormat,
}

impl Cli {
    fn into_options(self) -> supervisor::SupervisorOptions {
        supervisor::SupervisorOptions {
            program: self.program,
            iface: self.iface,
            addresses: self.addresses,
            xdp_mode: self.xdp_mode,
            report_interval: Duration::from_secs(self.report_interval_secs),
            report_format: self.report_format,
        }
    }
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(err) = run().await {
        eprintln!("xdp-drop error: {err:?}");
        exit(1);
    }
}

async fn run() -> Result<()> {
    let opts = Cli::parse().into_options();
    supervisor::run(opts).await
}
