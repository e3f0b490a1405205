//! Address file to verdict, with in-memory tables standing in for the
//! kernel maps.

use std::{
    collections::HashMap,
    fs,
    net::{IpAddr, Ipv4Addr},
};

use xdp_drop_common::testing::MemoryCounters;
use xdp_drop_common::{AddressKey, Membership, Verdict, classify};

use crate::provision::{
    provision,
    tests::{MemoryTargets, StaticResolver},
};
use crate::targets::{read_specifications, tests::temp_file};

impl Membership for MemoryTargets {
    fn is_target(&self, key: &AddressKey) -> bool {
        self.entries.get(key).is_some_and(|flag| *flag != 0)
    }
}

async fn provisioned(contents: &str, resolver: &StaticResolver) -> MemoryTargets {
    let path = temp_file(contents);
    let specs = read_specifications(&path).unwrap();
    fs::remove_file(path).ok();
    let mut table = MemoryTargets::default();
    provision(&specs, resolver, &mut table).await;
    table
}

fn ipv4_frame(src: Ipv4Addr) -> Vec<u8> {
    let mut frame = vec![0u8; 14 + 20];
    frame[12..14].copy_from_slice(&0x0800u16.to_be_bytes());
    frame[14] = 0x45;
    frame[14 + 12..14 + 16].copy_from_slice(&src.octets());
    frame
}

#[tokio::test]
async fn listed_ipv4_source_is_dropped_and_counted() {
    let targets = provisioned("10.0.0.5\n", &StaticResolver::default()).await;
    let counters = MemoryCounters::default();
    let frame = ipv4_frame(Ipv4Addr::new(10, 0, 0, 5));
    let key = AddressKey::ipv4([10, 0, 0, 5]);

    assert_eq!(classify(&frame[..], &targets, &counters), Verdict::Drop);
    assert_eq!(counters.get(&key), Some(1));
    assert_eq!(classify(&frame[..], &targets, &counters), Verdict::Drop);
    assert_eq!(counters.get(&key), Some(2));
}

#[tokio::test]
async fn unlisted_source_passes_without_counters() {
    let targets = provisioned("2001:db8::1\n", &StaticResolver::default()).await;
    let counters = MemoryCounters::default();
    let frame = ipv4_frame(Ipv4Addr::new(10, 0, 0, 5));

    assert_eq!(classify(&frame[..], &targets, &counters), Verdict::Pass);
    assert!(counters.is_empty());
}

#[tokio::test]
async fn dual_stack_hostname_yields_two_keys() {
    let v4: IpAddr = "198.51.100.7".parse().unwrap();
    let v6: IpAddr = "2001:db8::7".parse().unwrap();
    let resolver = StaticResolver(HashMap::from([("blocked.example", vec![v4, v6])]));
    let targets = provisioned("blocked.example\n", &resolver).await;

    assert!(targets.is_target(&AddressKey::from(v4)));
    assert!(targets.is_target(&AddressKey::from(v6)));
    assert_eq!(targets.entries.len(), 2);
}

#[tokio::test]
async fn non_ip_frame_passes() {
    let targets = provisioned("10.0.0.5\n", &StaticResolver::default()).await;
    let counters = MemoryCounters::default();
    let mut frame = ipv4_frame(Ipv4Addr::new(10, 0, 0, 5));
    frame[12..14].copy_from_slice(&0x0806u16.to_be_bytes());

    assert_eq!(classify(&frame[..], &targets, &counters), Verdict::Pass);
    assert!(counters.is_empty());
}
