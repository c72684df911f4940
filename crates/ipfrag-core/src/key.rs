//! Flow identity and bucket hashing.

use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr};

/// Seed for the bucket hash
const PRIME_VALUE: u32 = 0xEAAD_8405;

/// Golden ratio constant of the jhash family
const JHASH_GOLDEN_RATIO: u32 = 0xDEAD_BEEF;

/// Source/destination pair of a flow, tagged by address family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FlowAddrs {
    /// IPv4 pair
    V4 {
        /// Source address
        src: Ipv4Addr,
        /// Destination address
        dst: Ipv4Addr,
    },
    /// IPv6 pair
    V6 {
        /// Source address
        src: Ipv6Addr,
        /// Destination address
        dst: Ipv6Addr,
    },
}

/// Identity of a datagram under reassembly
///
/// The identification is 16 bits wide for IPv4 and 32 bits for IPv6.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FlowKey {
    addrs: FlowAddrs,
    id: u32,
}

impl FlowKey {
    /// IPv4 flow key
    pub fn v4(src: Ipv4Addr, dst: Ipv4Addr, id: u16) -> Self {
        Self {
            addrs: FlowAddrs::V4 { src, dst },
            id: u32::from(id),
        }
    }

    /// IPv6 flow key
    pub fn v6(src: Ipv6Addr, dst: Ipv6Addr, id: u32) -> Self {
        Self {
            addrs: FlowAddrs::V6 { src, dst },
            id,
        }
    }

    /// Address pair
    pub fn addrs(&self) -> &FlowAddrs {
        &self.addrs
    }

    /// Identification number
    pub fn id(&self) -> u32 {
        self.id
    }

    /// True for IPv6 flows
    pub fn is_v6(&self) -> bool {
        matches!(self.addrs, FlowAddrs::V6 { .. })
    }

    /// Two bucket signatures for the two-way associative lookup
    pub fn signatures(&self) -> (u32, u32) {
        let v = match &self.addrs {
            FlowAddrs::V4 { src, dst } => jhash_3words(
                u32::from_be_bytes(src.octets()),
                u32::from_be_bytes(dst.octets()),
                self.id,
                PRIME_VALUE,
            ),
            FlowAddrs::V6 { src, dst } => {
                let mut w = [0u32; 8];
                for (i, chunk) in src.octets().chunks_exact(4).enumerate() {
                    w[i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                for (i, chunk) in dst.octets().chunks_exact(4).enumerate() {
                    w[4 + i] = u32::from_be_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                }
                let v = jhash_3words(w[0], w[1], w[2], PRIME_VALUE);
                let v = jhash_3words(w[3], w[4], w[5], v);
                jhash_3words(w[6], w[7], self.id, v)
            }
        };
        (v, v.wrapping_shl(7).wrapping_add(v >> 14))
    }

    /// Worker index for sharding flows across `shards` tables
    ///
    /// Every fragment of one datagram maps to the same shard.
    ///
    /// # Panics
    ///
    /// Panics if `shards` is zero.
    pub fn shard(&self, shards: usize) -> usize {
        assert!(shards > 0, "shard count must be greater than 0");
        let (v, _) = self.signatures();
        // High half: bucket selection already consumes the low bits.
        (v.rotate_right(16) as usize) % shards
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.addrs {
            FlowAddrs::V4 { src, dst } => write!(f, "<{src} -> {dst}, id {:#x}>", self.id),
            FlowAddrs::V6 { src, dst } => write!(f, "<{src} -> {dst}, id {:#x}>", self.id),
        }
    }
}

/// Final avalanche of the jhash (lookup3) family
#[inline]
fn jhash_final(mut a: u32, mut b: u32, mut c: u32) -> u32 {
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(14));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(11));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(25));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(16));
    a ^= c;
    a = a.wrapping_sub(c.rotate_left(4));
    b ^= a;
    b = b.wrapping_sub(a.rotate_left(14));
    c ^= b;
    c = c.wrapping_sub(b.rotate_left(24));
    c
}

/// Hash three words with a seed
#[inline]
pub fn jhash_3words(a: u32, b: u32, c: u32, initval: u32) -> u32 {
    let seed = JHASH_GOLDEN_RATIO.wrapping_add(initval);
    jhash_final(
        a.wrapping_add(12).wrapping_add(seed),
        b.wrapping_add(12).wrapping_add(seed),
        c.wrapping_add(12).wrapping_add(seed),
    )
}
