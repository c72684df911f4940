//! # IPFRAG Core
//!
//! IP datagram fragmentation and reassembly engine.
//!
//! This crate provides:
//! - Zero-copy fragmentation of IPv4 and IPv6 datagrams
//! - A two-way set-associative flow table with LRU ordering and aging
//! - The per-flow reassembly state machine
//! - Deferred (batched) release of dropped buffers
//! - Error types and handling
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │               reassemble_ipv4 / reassemble_ipv6                 │
//! │   (header validation, padding trim, non-fragment pass-through)  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                          FragTable                              │
//! │   (two-bucket lookup, LRU, aging, per-flow state machine)       │
//! ├─────────────────────────────────────────────────────────────────┤
//! │                  DeathRow        BufferPool                     │
//! │   (batched release of dropped buffers, allocation accounting)   │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! A table and its death row belong to one worker; shard flows between
//! workers with [`FlowKey::shard`].
//!
//! ## Example
//!
//! ```
//! use ipfrag_core::{BufferPool, DeathRow, FragTable, Packet, TableConfig};
//! use ipfrag_core::{fragment_ipv4, reassemble_ipv4};
//!
//! let mut raw = vec![0u8; 20];
//! raw[0] = 0x45;
//! raw[2..4].copy_from_slice(&3020u16.to_be_bytes());
//! raw.resize(3020, 0xAB);
//! let datagram = Packet::from_bytes(raw);
//!
//! let direct = BufferPool::new("direct", 64);
//! let indirect = BufferPool::new("indirect", 64);
//! let mut fragments = Vec::new();
//! fragment_ipv4(&datagram, 1500, 4, &direct, &indirect, &mut fragments).unwrap();
//! assert_eq!(fragments.len(), 3);
//!
//! let config = TableConfig::new(64, 4, 128, 1_000_000);
//! let mut dr = DeathRow::for_table(&config);
//! let mut table = FragTable::new(config).unwrap();
//!
//! let mut result = None;
//! for fragment in fragments {
//!     result = reassemble_ipv4(&mut table, &mut dr, fragment, 0).unwrap();
//! }
//! assert_eq!(result.unwrap().len(), 3020);
//! dr.drain(4);
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod buffer;
pub mod clock;
pub mod config;
pub mod death_row;
pub mod entry;
pub mod error;
pub mod fragment;
pub mod header;
pub mod key;
pub mod reassembly;
pub mod table;

pub use buffer::{BufferPool, Packet, PoolStats, Segment, SegmentData};
pub use clock::{Clock, ManualClock, TickClock};
pub use config::{DEFAULT_MAX_FRAGMENTS, TableConfig};
pub use death_row::DeathRow;
pub use entry::{FlowState, FragEntry};
pub use error::{ConfigError, Error, FragError, HeaderError, ReassembleError};
pub use fragment::{fragment_ipv4, fragment_ipv6};
pub use header::{Ipv4Header, Ipv6Header, is_fragmented};
pub use key::{FlowAddrs, FlowKey};
pub use reassembly::{reassemble_ipv4, reassemble_ipv6};
pub use table::{EntryId, FragTable, TableStats};

/// Default prefetch window for [`DeathRow::drain`]
pub const DEFAULT_PREFETCH: usize = 3;
