//! Deferred release of dropped packet buffers.
//!
//! The reassembly path never frees buffers inline: invalidated and evicted
//! fragments are parked here and released in one batch by the caller between
//! processing bursts.

use std::hint::black_box;

use tracing::error;

use crate::buffer::Packet;
use crate::config::TableConfig;

/// Bounded list of buffers awaiting release
///
/// Capacity is the caller's responsibility: it must cover the worst case of
/// every flow invalidated within one burst (see
/// [`TableConfig::death_row_capacity`]). The list never grows.
#[derive(Debug)]
pub struct DeathRow {
    row: Vec<Packet>,
    capacity: usize,
    overflows: u64,
}

impl DeathRow {
    /// Create a death row holding up to `capacity` buffers
    ///
    /// # Panics
    ///
    /// Panics if capacity is 0.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            row: Vec::with_capacity(capacity),
            capacity,
            overflows: 0,
        }
    }

    /// Death row sized for one burst on a table with `config`
    pub fn for_table(config: &TableConfig) -> Self {
        Self::new(config.death_row_capacity())
    }

    /// Park a buffer for release
    ///
    /// Returns `Err(packet)` if the list is full.
    pub fn push(&mut self, packet: Packet) -> Result<(), Packet> {
        if self.row.len() >= self.capacity {
            return Err(packet);
        }
        self.row.push(packet);
        Ok(())
    }

    /// Park a buffer, releasing it inline if the list is full
    pub(crate) fn stash(&mut self, packet: Packet) {
        if let Err(packet) = self.push(packet) {
            self.overflows += 1;
            error!(
                capacity = self.capacity,
                overflows = self.overflows,
                "death row full, releasing buffer inline"
            );
            drop(packet);
        }
    }

    /// Buffers waiting for release
    pub fn len(&self) -> usize {
        self.row.len()
    }

    /// True if nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.row.is_empty()
    }

    /// True if another push would fail
    pub fn is_full(&self) -> bool {
        self.row.len() >= self.capacity
    }

    /// Maximum buffers held
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Free room
    pub fn remaining(&self) -> usize {
        self.capacity - self.row.len()
    }

    /// Times a buffer had to be released inline because the list was full
    pub fn overflows(&self) -> u64 {
        self.overflows
    }

    /// Release every parked buffer back to its pool
    ///
    /// `prefetch` is how many buffers ahead of the one being released are
    /// touched first, so their headers are warm by the time they are freed.
    /// Returns the number of buffers released.
    pub fn drain(&mut self, prefetch: usize) -> usize {
        let count = self.row.len();
        let ahead = prefetch.min(count);

        let mut pending = self.row.drain(..);
        for packet in &pending.as_slice()[..ahead] {
            warm(packet);
        }
        while let Some(packet) = pending.next() {
            if ahead > 0 {
                if let Some(next) = pending.as_slice().get(ahead - 1) {
                    warm(next);
                }
            }
            drop(packet);
        }

        count
    }
}

#[inline]
fn warm(packet: &Packet) {
    black_box(packet.head().first());
}
