//! Two-way set-associative flow table with LRU ordering and aging.
//!
//! Each key hashes to two buckets of `bucket_entries` slots; a lookup probes
//! both in interleaved order, remembering the first free slot and the first
//! stale slot it passes. Active flows form an intrusive LRU list threaded
//! through the slot arena, so the oldest flow is always at the head.

use std::fmt;
use std::ops::AddAssign;

use tracing::{debug, info, trace, warn};

use crate::buffer::Packet;
use crate::config::TableConfig;
use crate::death_row::DeathRow;
use crate::entry::FragEntry;
use crate::error::{ConfigError, ReassembleError};
use crate::key::FlowKey;

/// Handle to a table slot returned by [`FragTable::find`]
///
/// Only valid until the next table operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntryId(usize);

impl EntryId {
    /// Slot index within the table
    pub fn index(&self) -> usize {
        self.0
    }
}

/// Table statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TableStats {
    /// Lookups performed
    pub lookups: u64,
    /// Flows created
    pub adds: u64,
    /// Flows deleted by aging or eviction
    pub deletes: u64,
    /// Stale flows reused in place for the same key
    pub reuses: u64,
    /// Lookups that found no slot
    pub failures: u64,
    /// Failures caused by the active-entry limit
    pub capacity_failures: u64,
}

impl fmt::Display for TableStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "find/insert count:       {}", self.lookups)?;
        writeln!(f, "add count:               {}", self.adds)?;
        writeln!(f, "delete count:            {}", self.deletes)?;
        writeln!(f, "reuse count:             {}", self.reuses)?;
        writeln!(f, "total add failures:      {}", self.failures)?;
        write!(f, "add no-space failures:   {}", self.capacity_failures)
    }
}

impl AddAssign for TableStats {
    fn add_assign(&mut self, other: Self) {
        self.lookups += other.lookups;
        self.adds += other.adds;
        self.deletes += other.deletes;
        self.reuses += other.reuses;
        self.failures += other.failures;
        self.capacity_failures += other.capacity_failures;
    }
}

/// Result of probing both buckets for a key
#[derive(Debug, Default)]
struct Probe {
    found: Option<usize>,
    free: Option<usize>,
    stale: Option<usize>,
}

/// Fragment table
#[derive(Debug)]
pub struct FragTable {
    entries: Box<[FragEntry]>,
    config: TableConfig,
    entry_mask: usize,
    use_entries: usize,
    last: Option<usize>,
    lru_head: Option<usize>,
    lru_tail: Option<usize>,
    stats: TableStats,
}

impl FragTable {
    /// Create a table
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid.
    pub fn new(config: TableConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let table_size = config.table_size();
        let entries: Box<[FragEntry]> = (0..table_size)
            .map(|_| FragEntry::new(config.max_fragments))
            .collect();

        info!(
            buckets = config.bucket_count,
            bucket_entries = config.bucket_entries,
            table_size,
            max_entries = config.max_entries,
            max_fragments = config.max_fragments,
            max_retention_ticks = config.max_retention_ticks,
            "fragment table created"
        );

        Ok(Self {
            entries,
            entry_mask: (table_size - 1) & !(config.bucket_entries - 1),
            config,
            use_entries: 0,
            last: None,
            lru_head: None,
            lru_tail: None,
            stats: TableStats::default(),
        })
    }

    /// Create a table from its geometry with default fragment slots
    ///
    /// # Errors
    ///
    /// Returns an error if the geometry is invalid.
    pub fn create(
        bucket_count: usize,
        bucket_entries: usize,
        max_entries: usize,
        max_retention_ticks: u64,
    ) -> Result<Self, ConfigError> {
        Self::new(TableConfig::new(
            bucket_count,
            bucket_entries,
            max_entries,
            max_retention_ticks,
        ))
    }

    /// Table configuration
    pub fn config(&self) -> &TableConfig {
        &self.config
    }

    /// Slots allocated
    pub fn table_size(&self) -> usize {
        self.entries.len()
    }

    /// Flows currently collecting fragments
    pub fn active_entries(&self) -> usize {
        self.use_entries
    }

    /// Snapshot of the statistics counters
    pub fn statistics(&self) -> TableStats {
        self.stats
    }

    /// Inspect a slot
    pub fn entry(&self, id: EntryId) -> &FragEntry {
        &self.entries[id.0]
    }

    /// First slot index of each of the key's two buckets
    pub(crate) fn buckets(&self, key: &FlowKey) -> (usize, usize) {
        let (sig1, sig2) = key.signatures();
        (sig1 as usize & self.entry_mask, sig2 as usize & self.entry_mask)
    }

    fn probe(&self, key: &FlowKey, now: u64) -> Probe {
        let mut probe = Probe::default();

        if let Some(last) = self.last {
            if self.entries[last].key.as_ref() == Some(key) {
                probe.found = Some(last);
                return probe;
            }
        }

        let (p1, p2) = self.buckets(key);
        let max_retention = self.config.max_retention_ticks;
        for i in 0..self.config.bucket_entries {
            for idx in [p1 + i, p2 + i] {
                let entry = &self.entries[idx];
                match &entry.key {
                    Some(k) if k == key => {
                        probe.found = Some(idx);
                        return probe;
                    }
                    None => {
                        if probe.free.is_none() {
                            probe.free = Some(idx);
                        }
                    }
                    Some(_) if entry.is_stale(now, max_retention) => {
                        if probe.stale.is_none() {
                            probe.stale = Some(idx);
                        }
                    }
                    Some(_) => {}
                }
            }
        }

        probe
    }

    /// Find the flow for `key`, creating it if absent
    ///
    /// An existing but stale flow is restarted in place. A new flow takes a
    /// stale slot in either bucket first, then a free one; at the active
    /// entry limit a free slot is only usable after evicting a stale LRU
    /// head. Buffers of every flow deleted or restarted here go to `dr`.
    ///
    /// # Errors
    ///
    /// Returns [`ReassembleError::TableFull`] if no slot can hold the flow.
    pub fn find(
        &mut self,
        dr: &mut DeathRow,
        key: &FlowKey,
        now: u64,
    ) -> Result<EntryId, ReassembleError> {
        self.stats.lookups += 1;
        let max_retention = self.config.max_retention_ticks;
        let probe = self.probe(key, now);

        let slot = match probe.found {
            Some(idx) => {
                if self.entries[idx].is_stale(now, max_retention) {
                    self.reuse(dr, idx, now);
                }
                Some(idx)
            }
            None => {
                let mut free = probe.free;
                if let Some(stale) = probe.stale {
                    self.delete(dr, stale);
                    free = Some(stale);
                } else if free.is_some() && self.use_entries >= self.config.max_entries {
                    match self.lru_head {
                        Some(head) if self.entries[head].is_stale(now, max_retention) => {
                            self.delete(dr, head);
                        }
                        _ => {
                            free = None;
                            self.stats.capacity_failures += 1;
                        }
                    }
                }

                if let Some(idx) = free {
                    self.add(idx, *key, now);
                }
                free
            }
        };

        self.last = slot;
        match slot {
            Some(idx) => Ok(EntryId(idx)),
            None => {
                self.stats.failures += 1;
                warn!(%key, active = self.use_entries, "no room for new flow");
                Err(ReassembleError::TableFull)
            }
        }
    }

    /// Feed a fragment to the flow returned by [`find`](Self::find)
    ///
    /// A flow that completes or is invalidated leaves the table immediately.
    ///
    /// # Errors
    ///
    /// Returns the protocol violation that dropped the flow; its buffers and
    /// `packet` are on `dr`.
    pub fn process(
        &mut self,
        dr: &mut DeathRow,
        id: EntryId,
        packet: Packet,
        ofs: u32,
        len: u32,
        more_frags: bool,
    ) -> Result<Option<Packet>, ReassembleError> {
        let idx = id.0;
        if self.entries[idx].is_vacant() {
            dr.stash(packet);
            return Err(ReassembleError::InvalidFragmentSet);
        }

        let result = self.entries[idx].process(dr, packet, ofs, len, more_frags);
        if self.entries[idx].is_vacant() {
            self.lru_unlink(idx);
            self.use_entries -= 1;
        }
        result
    }

    /// Delete stale flows from the LRU head until a fresh one is reached
    ///
    /// Stops early when `dr` could not absorb another flow's buffers.
    /// Returns the number of flows deleted.
    pub fn evict_expired(&mut self, dr: &mut DeathRow, now: u64) -> usize {
        let max_retention = self.config.max_retention_ticks;
        let mut evicted = 0;

        while let Some(head) = self.lru_head {
            if !self.entries[head].is_stale(now, max_retention) {
                break;
            }
            if dr.remaining() < self.entries[head].fragment_count() {
                break;
            }
            self.delete(dr, head);
            evicted += 1;
        }

        if evicted > 0 {
            debug!(evicted, active = self.use_entries, "expired flows evicted");
        }
        evicted
    }

    /// Tear down the table, releasing every held buffer immediately
    pub fn destroy(mut self) -> TableStats {
        let mut released = 0usize;
        for entry in self.entries.iter_mut() {
            for slot in entry.frags.iter_mut() {
                if slot.packet.take().is_some() {
                    released += 1;
                }
            }
        }
        info!(
            active = self.use_entries,
            released, "fragment table destroyed"
        );
        self.stats
    }

    fn add(&mut self, idx: usize, key: FlowKey, now: u64) {
        let entry = &mut self.entries[idx];
        entry.key = Some(key);
        entry.reset(now);
        self.lru_push_back(idx);
        self.use_entries += 1;
        self.stats.adds += 1;
        trace!(%key, slot = idx, "flow added");
    }

    fn delete(&mut self, dr: &mut DeathRow, idx: usize) {
        let entry = &mut self.entries[idx];
        entry.release_into(dr);
        entry.key = None;
        self.lru_unlink(idx);
        self.use_entries -= 1;
        self.stats.deletes += 1;
        if self.last == Some(idx) {
            self.last = None;
        }
    }

    fn reuse(&mut self, dr: &mut DeathRow, idx: usize, now: u64) {
        let entry = &mut self.entries[idx];
        entry.release_into(dr);
        entry.reset(now);
        self.lru_unlink(idx);
        self.lru_push_back(idx);
        self.stats.reuses += 1;
        trace!(slot = idx, "stale flow restarted");
    }

    fn lru_push_back(&mut self, idx: usize) {
        self.entries[idx].lru_prev = self.lru_tail;
        self.entries[idx].lru_next = None;
        match self.lru_tail {
            Some(tail) => self.entries[tail].lru_next = Some(idx),
            None => self.lru_head = Some(idx),
        }
        self.lru_tail = Some(idx);
    }

    fn lru_unlink(&mut self, idx: usize) {
        let prev = self.entries[idx].lru_prev.take();
        let next = self.entries[idx].lru_next.take();
        match prev {
            Some(p) => self.entries[p].lru_next = next,
            None => self.lru_head = next,
        }
        match next {
            Some(n) => self.entries[n].lru_prev = prev,
            None => self.lru_tail = prev,
        }
    }

    #[cfg(test)]
    fn lru_keys(&self) -> Vec<FlowKey> {
        let mut keys = Vec::new();
        let mut cursor = self.lru_head;
        while let Some(idx) = cursor {
            if let Some(key) = self.entries[idx].key {
                keys.push(key);
            }
            cursor = self.entries[idx].lru_next;
        }
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use std::net::Ipv4Addr;

    fn key(id: u16) -> FlowKey {
        FlowKey::v4(Ipv4Addr::new(10, 0, 0, 1), Ipv4Addr::new(10, 0, 0, 2), id)
    }

    fn small_table(max_entries: usize, retention: u64) -> FragTable {
        FragTable::create(1, 4, max_entries, retention).unwrap()
    }

    #[test]
    fn test_create_geometry() {
        let table = FragTable::create(3, 4, 8, 100).unwrap();
        assert_eq!(table.table_size(), 16);
        assert_eq!(table.entry_mask, 0b1100);
        assert_eq!(table.active_entries(), 0);

        assert!(matches!(
            FragTable::create(4, 3, 8, 100),
            Err(ConfigError::NotPowerOfTwo(3))
        ));
    }

    #[test]
    fn test_find_creates_then_returns_same_slot() {
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        let a = table.find(&mut dr, &key(1), 0).unwrap();
        assert_eq!(table.active_entries(), 1);
        assert_eq!(table.entry(a).key(), Some(&key(1)));

        let b = table.find(&mut dr, &key(1), 10).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.active_entries(), 1);

        let stats = table.statistics();
        assert_eq!(stats.lookups, 2);
        assert_eq!(stats.adds, 1);
    }

    #[test]
    fn test_table_full() {
        // One bucket of 4 slots: both signatures land in it
        let mut table = small_table(4, 1000);
        let mut dr = DeathRow::new(16);

        for id in 0..4 {
            table.find(&mut dr, &key(id), 0).unwrap();
        }
        let err = table.find(&mut dr, &key(99), 10).unwrap_err();
        assert_eq!(err, ReassembleError::TableFull);
        assert_eq!(table.statistics().failures, 1);
        assert_eq!(table.active_entries(), 4);
    }

    #[test]
    fn test_stale_slot_is_taken_over() {
        let pool = BufferPool::new("direct", 8);
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        for id in 0..4 {
            let e = table.find(&mut dr, &key(id), 0).unwrap();
            let packet = Packet::from_segment(pool.alloc(16).unwrap());
            table.process(&mut dr, e, packet, 8, 8, true).unwrap();
        }

        // All four are stale at t=101; the newcomer evicts one of them
        let id = table.find(&mut dr, &key(50), 101).unwrap();
        assert_eq!(table.entry(id).key(), Some(&key(50)));
        assert_eq!(table.entry(id).start(), 101);
        assert_eq!(table.active_entries(), 4);
        assert_eq!(table.statistics().deletes, 1);
        assert_eq!(dr.len(), 1);
    }

    #[test]
    fn test_stale_exact_match_is_reused() {
        let pool = BufferPool::new("direct", 8);
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        let e = table.find(&mut dr, &key(1), 0).unwrap();
        let packet = Packet::from_segment(pool.alloc(16).unwrap());
        table.process(&mut dr, e, packet, 8, 8, true).unwrap();
        table.find(&mut dr, &key(2), 50).unwrap();

        let again = table.find(&mut dr, &key(1), 200).unwrap();
        assert_eq!(again, e);
        let entry = table.entry(again);
        assert_eq!(entry.start(), 200);
        assert_eq!(entry.received(), 0);
        assert_eq!(entry.fragment_count(), 0);
        assert_eq!(table.statistics().reuses, 1);
        assert_eq!(dr.len(), 1);

        // Reused flow moved to the LRU tail
        assert_eq!(table.lru_keys(), vec![key(2), key(1)]);
    }

    #[test]
    fn test_capacity_evicts_stale_lru_head() {
        // Plenty of slots, but only two active flows allowed
        let mut table = FragTable::create(64, 4, 2, 100).unwrap();
        let mut dr = DeathRow::new(16);

        let first = key(1);
        table.find(&mut dr, &first, 0).unwrap();
        let first_slot = table.probe(&first, 0).found.unwrap();

        // Second and third flows must not share buckets with the first,
        // otherwise the first would be evicted as a bucket-local stale slot
        let (f1, f2) = table.buckets(&first);
        let disjoint: Vec<FlowKey> = (2..u16::MAX)
            .map(key)
            .filter(|k| {
                let (b1, b2) = table.buckets(k);
                ![f1, f2].contains(&b1) && ![f1, f2].contains(&b2)
            })
            .take(2)
            .collect();

        table.find(&mut dr, &disjoint[0], 150).unwrap();
        assert_eq!(table.active_entries(), 2);

        // At the limit, first is the stale LRU head and gets evicted
        table.find(&mut dr, &disjoint[1], 160).unwrap();
        assert_eq!(table.active_entries(), 2);
        assert!(table.entries[first_slot].is_vacant());
        assert_eq!(table.lru_keys(), vec![disjoint[0], disjoint[1]]);

        // Now the head is fresh: a fourth flow is refused
        let fourth = (2..u16::MAX)
            .map(key)
            .find(|k| !disjoint.contains(k))
            .unwrap();
        let err = table.find(&mut dr, &fourth, 170).unwrap_err();
        assert_eq!(err, ReassembleError::TableFull);
        let stats = table.statistics();
        assert_eq!(stats.capacity_failures, 1);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_last_lookup_cache() {
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        let e = table.find(&mut dr, &key(7), 0).unwrap();
        assert_eq!(table.last, Some(e.index()));
        assert_eq!(table.probe(&key(7), 0).found, Some(e.index()));

        table.find(&mut dr, &key(8), 0).unwrap();
        assert_ne!(table.last, Some(e.index()));
        assert_eq!(table.find(&mut dr, &key(7), 1).unwrap(), e);
    }

    #[test]
    fn test_process_vacates_and_unlinks() {
        let pool = BufferPool::new("direct", 8);
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        table.find(&mut dr, &key(1), 0).unwrap();
        table.find(&mut dr, &key(2), 0).unwrap();

        let e = table.find(&mut dr, &key(1), 0).unwrap();
        let first = Packet::from_segment(pool.alloc(16).unwrap());
        table.process(&mut dr, e, first, 0, 8, true).unwrap();
        let dup = Packet::from_segment(pool.alloc(16).unwrap());
        let err = table.process(&mut dr, e, dup, 0, 8, true).unwrap_err();

        assert_eq!(err, ReassembleError::DuplicateFirst);
        assert_eq!(table.active_entries(), 1);
        assert_eq!(table.lru_keys(), vec![key(2)]);
        assert_eq!(dr.len(), 2);

        // A stale handle is refused and its packet parked
        let late = Packet::from_segment(pool.alloc(16).unwrap());
        let err = table.process(&mut dr, e, late, 8, 8, true).unwrap_err();
        assert_eq!(err, ReassembleError::InvalidFragmentSet);
        assert_eq!(dr.len(), 3);
    }

    #[test]
    fn test_evict_expired() {
        let pool = BufferPool::new("direct", 16);
        let mut table = FragTable::create(16, 4, 16, 100).unwrap();
        let mut dr = DeathRow::new(32);

        for (id, t) in [(1, 0), (2, 10), (3, 100)] {
            let e = table.find(&mut dr, &key(id), t).unwrap();
            let packet = Packet::from_segment(pool.alloc(16).unwrap());
            table.process(&mut dr, e, packet, 8, 8, true).unwrap();
        }

        assert_eq!(table.evict_expired(&mut dr, 150), 2);
        assert_eq!(table.active_entries(), 1);
        assert_eq!(table.lru_keys(), vec![key(3)]);
        assert_eq!(dr.len(), 2);

        assert_eq!(table.evict_expired(&mut dr, 180), 0);
    }

    #[test]
    fn test_evict_expired_respects_death_row_room() {
        let pool = BufferPool::new("direct", 16);
        let mut table = FragTable::create(16, 4, 16, 10).unwrap();
        let mut dr = DeathRow::new(1);

        for id in 1..=2 {
            let e = table.find(&mut dr, &key(id), 0).unwrap();
            let packet = Packet::from_segment(pool.alloc(16).unwrap());
            table.process(&mut dr, e, packet, 8, 8, true).unwrap();
        }

        assert_eq!(table.evict_expired(&mut dr, 100), 1);
        assert!(dr.is_full());
        assert_eq!(table.active_entries(), 1);
        assert_eq!(dr.overflows(), 0);
    }

    #[test]
    fn test_destroy_releases_buffers() {
        let pool = BufferPool::new("direct", 16);
        let mut table = small_table(4, 100);
        let mut dr = DeathRow::new(16);

        let e = table.find(&mut dr, &key(1), 0).unwrap();
        let packet = Packet::from_segment(pool.alloc(16).unwrap());
        table.process(&mut dr, e, packet, 8, 8, true).unwrap();
        assert_eq!(pool.in_use(), 1);

        let stats = table.destroy();
        assert_eq!(stats.adds, 1);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_stats_display() {
        let stats = TableStats {
            lookups: 3,
            failures: 1,
            ..TableStats::default()
        };
        let dump = stats.to_string();
        assert!(dump.contains("find/insert count:       3"));
        assert!(dump.contains("total add failures:      1"));
    }
}
