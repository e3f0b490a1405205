use std::borrow::Borrow;

use aya::maps::{HashMap, MapData};
use chrono::{DateTime, SecondsFormat, Utc};
use clap::ValueEnum;
use log::warn;
use serde_json::json;

use xdp_drop_common::AddressKey;

#[derive(Clone, Copy, Debug, Eq, PartialEq, ValueEnum)]
pub enum ReportFormat {
    /// `total dropped for <address>: <count>`
    Text,
    /// One JSON object per address
    Json,
}

/// Reads every counter currently in the table.
///
/// Each call walks the kernel map from its first key again. Counters only
/// grow and are never removed, so a value read mid-update is merely stale.
pub fn snapshot<T: Borrow<MapData>>(table: &HashMap<T, AddressKey, u64>) -> Vec<(AddressKey, u64)> {
    let mut entries = Vec::new();
    for item in table.iter() {
        match item {
            Ok(entry) => entries.push(entry),
            Err(err) => {
                warn!("failed to read drop counters: {err}");
                break;
            }
        }
    }
    entries
}

/// Formats one report line per counter. Keys that don't convert to an
/// address are logged and left out.
pub fn render(
    entries: &[(AddressKey, u64)],
    format: ReportFormat,
    now: DateTime<Utc>,
) -> Vec<String> {
    let timestamp = now.to_rfc3339_opts(SecondsFormat::Secs, true);
    entries
        .iter()
        .filter_map(|(key, count)| {
            let Some(addr) = key.to_ip() else {
                warn!(
                    "error converting address to human readable format (family {})",
                    key.family
                );
                return None;
            };
            Some(match format {
                ReportFormat::Text => format!("total dropped for {addr}: {count}"),
                ReportFormat::Json => json!({
                    "timestamp": timestamp,
                    "address": addr.to_string(),
                    "dropped": count,
                })
                .to_string(),
            })
        })
        .collect()
}

pub fn print_report<T: Borrow<MapData>>(table: &HashMap<T, AddressKey, u64>, format: ReportFormat) {
    for line in render(&snapshot(table), format, Utc::now()) {
        println!("{line}");
    }
}
