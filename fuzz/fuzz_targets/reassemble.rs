//! Fuzz target for the reassembler
//!
//! Feeds sequences of arbitrary packets to one table and checks that nothing
//! panics and that the table never holds more flows than it allows.

#![no_main]

use arbitrary::Arbitrary;
use ipfrag_core::{DeathRow, FragTable, Packet, TableConfig, reassemble_ipv4, reassemble_ipv6};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Arrival {
    ipv6: bool,
    tick: u8,
    bytes: Vec<u8>,
}

fuzz_target!(|arrivals: Vec<Arrival>| {
    let config = TableConfig::new(4, 2, 8, 16);
    let Ok(mut table) = FragTable::new(config.clone()) else {
        return;
    };
    let mut dr = DeathRow::for_table(&config);
    let mut now = 0u64;

    for arrival in arrivals {
        now += u64::from(arrival.tick);
        let packet = Packet::from_bytes(arrival.bytes);
        let result = if arrival.ipv6 {
            reassemble_ipv6(&mut table, &mut dr, packet, now)
        } else {
            reassemble_ipv4(&mut table, &mut dr, packet, now)
        };
        if let Ok(Some(datagram)) = result {
            assert!(datagram.len() <= u16::MAX as usize + 40);
        }
        assert!(table.active_entries() <= config.max_entries);
        dr.drain(ipfrag_core::DEFAULT_PREFETCH);
        table.evict_expired(&mut dr, now);
        dr.drain(ipfrag_core::DEFAULT_PREFETCH);
    }

    table.destroy();
});
