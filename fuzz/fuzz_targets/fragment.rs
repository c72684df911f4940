//! Fuzz target for the fragmenters
//!
//! Arbitrary datagrams must either fragment cleanly or fail without leaking
//! pool buffers.

#![no_main]

use arbitrary::Arbitrary;
use ipfrag_core::{BufferPool, Packet, fragment_ipv4, fragment_ipv6};
use libfuzzer_sys::fuzz_target;

#[derive(Debug, Arbitrary)]
struct Input {
    ipv6: bool,
    units: u8,
    capacity: u8,
    pool_size: u8,
    bytes: Vec<u8>,
}

fuzz_target!(|input: Input| {
    // Fragment payloads must be a positive multiple of 8 bytes.
    let units = usize::from(input.units.max(1));
    let header_pool = BufferPool::new("header", usize::from(input.pool_size));
    let payload_pool = BufferPool::new("payload", usize::from(input.pool_size));
    let packet = Packet::from_bytes(input.bytes);
    let mut out = Vec::new();

    let capacity = usize::from(input.capacity);

    let result = if input.ipv6 {
        let mtu = 48 + units * 8;
        fragment_ipv6(&packet, mtu, 1, capacity, &header_pool, &payload_pool, &mut out)
    } else {
        let header_len = packet.head().first().map_or(20, |b| usize::from(b & 0x0F) * 4);
        let mtu = header_len + units * 8;
        fragment_ipv4(&packet, mtu, capacity, &header_pool, &payload_pool, &mut out)
    };

    match result {
        Ok(count) => assert_eq!(count, out.len()),
        Err(_) => assert!(out.is_empty()),
    }
    drop(out);
    assert_eq!(header_pool.in_use(), 0);
    assert_eq!(payload_pool.in_use(), 0);
});
