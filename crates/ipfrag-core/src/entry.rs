//! Per-flow assembly state and the fragment insertion state machine.

use tracing::debug;

use crate::buffer::Packet;
use crate::death_row::DeathRow;
use crate::error::ReassembleError;
use crate::key::FlowKey;
use crate::reassembly;

/// Slot reserved for the fragment at offset 0
pub(crate) const FIRST_FRAG_IDX: usize = 0;

/// Slot reserved for the fragment with more-fragments clear
pub(crate) const LAST_FRAG_IDX: usize = 1;

/// First slot for middle fragments
pub(crate) const MIN_FRAG_IDX: usize = 2;

/// One stored fragment
#[derive(Debug, Default)]
pub(crate) struct FragSlot {
    /// Byte offset within the datagram payload
    pub(crate) ofs: u32,
    /// Payload bytes carried
    pub(crate) len: u32,
    /// Fragment buffer, L3 header still attached
    pub(crate) packet: Option<Packet>,
}

/// Assembly progress of a flow
///
/// A flow whose bytes reach the expected total is reassembled or dropped in
/// the same call, so it goes straight from `Collecting` back to `Vacant`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    /// Slot holds no flow
    Vacant,
    /// Fragments still missing (or total size not yet known)
    Collecting,
}

/// Assembly state of one flow
#[derive(Debug)]
pub struct FragEntry {
    pub(crate) key: Option<FlowKey>,
    pub(crate) start: u64,
    pub(crate) total_size: Option<u32>,
    pub(crate) frag_size: u32,
    pub(crate) last_idx: usize,
    pub(crate) frags: Box<[FragSlot]>,
    pub(crate) lru_prev: Option<usize>,
    pub(crate) lru_next: Option<usize>,
}

impl FragEntry {
    pub(crate) fn new(max_fragments: usize) -> Self {
        Self {
            key: None,
            start: 0,
            total_size: None,
            frag_size: 0,
            last_idx: MIN_FRAG_IDX,
            frags: (0..max_fragments).map(|_| FragSlot::default()).collect(),
            lru_prev: None,
            lru_next: None,
        }
    }

    /// Flow identity, `None` if the slot is vacant
    pub fn key(&self) -> Option<&FlowKey> {
        self.key.as_ref()
    }

    /// True if the slot holds no flow
    pub fn is_vacant(&self) -> bool {
        self.key.is_none()
    }

    /// Creation tick
    pub fn start(&self) -> u64 {
        self.start
    }

    /// Expected payload size, known once the last fragment arrived
    pub fn total_size(&self) -> Option<u32> {
        self.total_size
    }

    /// Payload bytes received so far
    pub fn received(&self) -> u32 {
        self.frag_size
    }

    /// Fragments currently held
    pub fn fragment_count(&self) -> usize {
        self.frags.iter().filter(|s| s.packet.is_some()).count()
    }

    /// Assembly progress
    pub fn state(&self) -> FlowState {
        if self.key.is_some() {
            FlowState::Collecting
        } else {
            FlowState::Vacant
        }
    }

    pub(crate) fn is_stale(&self, now: u64, max_retention: u64) -> bool {
        now.saturating_sub(self.start) > max_retention
    }

    /// Clear assembly progress; slots must already be empty
    pub(crate) fn reset(&mut self, now: u64) {
        debug_assert_eq!(self.fragment_count(), 0);
        self.start = now;
        self.total_size = None;
        self.frag_size = 0;
        self.last_idx = MIN_FRAG_IDX;
    }

    /// Move every held buffer to the death row
    pub(crate) fn release_into(&mut self, dr: &mut DeathRow) {
        for slot in self.frags.iter_mut() {
            if let Some(packet) = slot.packet.take() {
                dr.stash(packet);
            }
            slot.ofs = 0;
            slot.len = 0;
        }
    }

    fn slot_geometry(&self, idx: usize) -> (u32, u32) {
        let slot = &self.frags[idx];
        (slot.ofs, slot.len)
    }

    fn log_invalid(&self, reason: &ReassembleError) {
        if let Some(key) = &self.key {
            debug!(
                %key,
                %reason,
                total_size = ?self.total_size,
                frag_size = self.frag_size,
                last_idx = self.last_idx,
                first = ?self.slot_geometry(FIRST_FRAG_IDX),
                last = ?self.slot_geometry(LAST_FRAG_IDX),
                "invalid fragmented packet"
            );
        }
    }

    /// Drop the flow: all held buffers (and `extra`, if any) go to the death row
    fn invalidate(
        &mut self,
        dr: &mut DeathRow,
        extra: Option<Packet>,
        reason: ReassembleError,
    ) -> ReassembleError {
        self.log_invalid(&reason);
        self.release_into(dr);
        if let Some(packet) = extra {
            dr.stash(packet);
        }
        self.key = None;
        reason
    }

    /// Store one fragment and reassemble once coverage is complete
    ///
    /// Returns `Ok(None)` while fragments are missing and the reassembled
    /// datagram once the flow completes. Any error drops the whole flow
    /// together with `packet`; the entry is vacant afterwards, as it is after
    /// a successful reassembly.
    pub(crate) fn process(
        &mut self,
        dr: &mut DeathRow,
        packet: Packet,
        ofs: u32,
        len: u32,
        more_frags: bool,
    ) -> Result<Option<Packet>, ReassembleError> {
        let idx = if ofs == 0 {
            if self.frags[FIRST_FRAG_IDX].packet.is_some() {
                return Err(self.invalidate(dr, Some(packet), ReassembleError::DuplicateFirst));
            }
            FIRST_FRAG_IDX
        } else if !more_frags {
            if self.frags[LAST_FRAG_IDX].packet.is_some() {
                return Err(self.invalidate(dr, Some(packet), ReassembleError::DuplicateLast));
            }
            self.total_size = Some(ofs + len);
            LAST_FRAG_IDX
        } else if self.last_idx < self.frags.len() {
            self.last_idx += 1;
            self.last_idx - 1
        } else {
            let max = self.frags.len();
            return Err(self.invalidate(dr, Some(packet), ReassembleError::TooManyFragments(max)));
        };

        let slot = &mut self.frags[idx];
        slot.ofs = ofs;
        slot.len = len;
        slot.packet = Some(packet);
        self.frag_size = self.frag_size.saturating_add(len);

        match self.total_size {
            None => Ok(None),
            Some(total) if self.frag_size < total => Ok(None),
            Some(total)
                if self.frag_size == total && self.frags[FIRST_FRAG_IDX].packet.is_some() =>
            {
                match reassembly::reconstruct(self, dr, total) {
                    Ok(datagram) => {
                        self.key = None;
                        Ok(Some(datagram))
                    }
                    Err(err) => Err(self.invalidate(dr, None, err)),
                }
            }
            Some(_) => Err(self.invalidate(dr, None, ReassembleError::InvalidFragmentSet)),
        }
    }
}
