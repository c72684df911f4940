//! Packet buffers: owning and borrowing segments, segment chains, bounded pools.
//!
//! A [`Packet`] is a chain of [`Segment`]s. Each segment is a window over
//! shared `Arc<[u8]>` storage and is tagged by ownership:
//!
//! - **Owned**: the storage was allocated for this segment (a received frame,
//!   or a freshly built header). Only an owned segment whose storage is not
//!   shared may be written to.
//! - **Borrowed**: a read-only view into another segment's storage, created by
//!   [`BufferPool::attach`]. No bytes are copied.
//!
//! Segments taken from a [`BufferPool`] hold a lease on it; the lease is
//! returned when the segment is dropped, so "releasing" a buffer back to its
//! allocator is simply dropping it.

use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use crate::error::FragError;

/// Byte storage behind a segment, tagged by ownership
#[derive(Debug, Clone)]
pub enum SegmentData {
    /// Storage allocated for this segment
    Owned {
        /// Backing bytes
        bytes: Arc<[u8]>,
        /// Visible window into `bytes`
        window: Range<usize>,
    },
    /// View into storage owned by another segment
    Borrowed {
        /// Storage of the segment this view was attached to
        source: Arc<[u8]>,
        /// Visible window into `source`
        window: Range<usize>,
    },
}

impl SegmentData {
    fn storage(&self) -> &Arc<[u8]> {
        match self {
            Self::Owned { bytes, .. } => bytes,
            Self::Borrowed { source, .. } => source,
        }
    }

    fn window(&self) -> &Range<usize> {
        match self {
            Self::Owned { window, .. } | Self::Borrowed { window, .. } => window,
        }
    }

    fn window_mut(&mut self) -> &mut Range<usize> {
        match self {
            Self::Owned { window, .. } | Self::Borrowed { window, .. } => window,
        }
    }
}

/// One link of a packet chain
#[derive(Debug)]
pub struct Segment {
    data: SegmentData,
    lease: Option<Lease>,
}

impl Segment {
    /// Wrap caller-provided bytes as an owned segment (not pool-accounted)
    pub fn owned(bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Arc<[u8]> = Arc::from(bytes.into().into_boxed_slice());
        let window = 0..bytes.len();
        Self {
            data: SegmentData::Owned { bytes, window },
            lease: None,
        }
    }

    /// Visible bytes
    pub fn data(&self) -> &[u8] {
        &self.data.storage()[self.data.window().clone()]
    }

    /// Number of visible bytes
    pub fn len(&self) -> usize {
        self.data.window().len()
    }

    /// True if no bytes are visible
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True for segments that own their storage
    pub fn is_owned(&self) -> bool {
        matches!(self.data, SegmentData::Owned { .. })
    }

    /// True if this segment holds a lease on a [`BufferPool`]
    pub fn is_pooled(&self) -> bool {
        self.lease.is_some()
    }

    /// Ownership-tagged storage
    pub fn kind(&self) -> &SegmentData {
        &self.data
    }

    /// Mutable access to the visible bytes.
    ///
    /// Returns `None` for borrowed segments and for owned segments whose
    /// storage is still referenced by attached views.
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            SegmentData::Owned { bytes, window } => {
                Arc::get_mut(bytes).map(|b| &mut b[window.clone()])
            }
            SegmentData::Borrowed { .. } => None,
        }
    }

    /// Drop `n` bytes from the front of the window
    pub fn advance(&mut self, n: usize) {
        let window = self.data.window_mut();
        window.start = window.start.saturating_add(n).min(window.end);
    }

    /// Shorten the window to `len` bytes
    pub fn truncate(&mut self, len: usize) {
        let window = self.data.window_mut();
        if len < window.len() {
            window.end = window.start + len;
        }
    }

    /// Borrowed view of `range` (relative to the visible window)
    fn view(&self, range: Range<usize>, lease: Option<Lease>) -> Self {
        let base = self.data.window().start;
        Self {
            data: SegmentData::Borrowed {
                source: Arc::clone(self.data.storage()),
                window: base + range.start..base + range.end,
            },
            lease,
        }
    }

    /// Replace a shared segment by a private owned copy of its window
    fn unshare(&mut self) {
        let copy = Segment::owned(self.data());
        // Dropping the old segment returns its lease.
        *self = copy;
    }
}

/// Segment chain forming one datagram
#[derive(Debug, Default)]
pub struct Packet {
    segments: Vec<Segment>,
    l3_len: usize,
    needs_checksum: bool,
}

impl Packet {
    /// Create an empty packet
    pub fn new() -> Self {
        Self::default()
    }

    /// Single-segment packet over caller-provided bytes
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self::from_segment(Segment::owned(bytes))
    }

    /// Single-segment packet
    pub fn from_segment(segment: Segment) -> Self {
        Self {
            segments: vec![segment],
            ..Self::default()
        }
    }

    /// Multi-segment packet
    pub fn from_segments(segments: Vec<Segment>) -> Self {
        Self {
            segments,
            ..Self::default()
        }
    }

    /// Append a segment to the chain
    pub fn push(&mut self, segment: Segment) {
        self.segments.push(segment);
    }

    /// Chain another packet's segments after this one's
    pub fn append(&mut self, mut other: Packet) {
        self.segments.append(&mut other.segments);
    }

    /// Total visible bytes across the chain
    pub fn len(&self) -> usize {
        self.segments.iter().map(Segment::len).sum()
    }

    /// True if the chain holds no bytes
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Segments in chain order
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Number of segments in the chain
    pub fn segment_count(&self) -> usize {
        self.segments.len()
    }

    /// Bytes of the first segment (empty for an empty chain)
    pub fn head(&self) -> &[u8] {
        self.segments.first().map(Segment::data).unwrap_or(&[])
    }

    /// Writable first `len` bytes of the chain.
    ///
    /// If the first segment is borrowed or its storage is shared, only that
    /// segment is copied into private storage first. Returns `None` if the
    /// first segment is shorter than `len`.
    pub fn head_mut(&mut self, len: usize) -> Option<&mut [u8]> {
        let first = self.segments.first_mut()?;
        if first.len() < len {
            return None;
        }
        if first.data_mut().is_none() {
            first.unshare();
        }
        first.data_mut().map(|d| &mut d[..len])
    }

    /// Strip `n` bytes from the front of the chain.
    ///
    /// Emptied segments stay in the chain with zero length.
    pub fn adj(&mut self, mut n: usize) {
        for segment in &mut self.segments {
            if n == 0 {
                break;
            }
            let take = n.min(segment.len());
            segment.advance(take);
            n -= take;
        }
    }

    /// Cut the chain down to `len` bytes, dropping trailing segments
    pub fn truncate(&mut self, len: usize) {
        let mut remaining = len;
        let mut keep = 0;
        for segment in &mut self.segments {
            if remaining == 0 {
                break;
            }
            segment.truncate(remaining);
            remaining -= segment.len();
            keep += 1;
        }
        self.segments.truncate(keep.max(1).min(self.segments.len()));
        if len == 0 {
            if let Some(first) = self.segments.first_mut() {
                first.truncate(0);
            }
        }
    }

    /// Copy the chain into contiguous bytes
    pub fn to_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.len());
        for segment in &self.segments {
            out.extend_from_slice(segment.data());
        }
        out
    }

    /// Length of the L3 header at the start of the chain
    pub fn l3_len(&self) -> usize {
        self.l3_len
    }

    /// Record the L3 header length
    pub fn set_l3_len(&mut self, len: usize) {
        self.l3_len = len;
    }

    /// True if the output path must recompute the IP header checksum
    pub fn needs_checksum(&self) -> bool {
        self.needs_checksum
    }

    /// Flag the packet for checksum recomputation on output
    pub fn mark_checksum(&mut self) {
        self.needs_checksum = true;
    }
}

/// Allocation-count lease on a pool
#[derive(Debug)]
struct Lease {
    pool: Arc<PoolShared>,
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.in_use.fetch_sub(1, Ordering::AcqRel);
        self.pool.released.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug)]
struct PoolShared {
    name: String,
    capacity: usize,
    in_use: AtomicUsize,
    allocated: AtomicU64,
    released: AtomicU64,
    failures: AtomicU64,
}

/// Bounded buffer pool
///
/// Hands out owning buffers ([`alloc`](Self::alloc)) and borrowing views
/// ([`attach`](Self::attach)), each counting against `capacity`. Pools are
/// cheap to clone and may be shared between workers.
///
/// # Example
///
/// ```
/// use ipfrag_core::buffer::BufferPool;
///
/// let pool = BufferPool::new("direct", 2);
/// let a = pool.alloc(20).unwrap();
/// let _b = pool.attach(&a, 0..8).unwrap();
/// assert!(pool.alloc(20).is_err());
/// drop(a);
/// assert_eq!(pool.available(), 1);
/// ```
#[derive(Debug, Clone)]
pub struct BufferPool {
    shared: Arc<PoolShared>,
}

/// Pool counters snapshot
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Buffers currently out on lease
    pub in_use: usize,
    /// Successful allocations and attaches
    pub allocated: u64,
    /// Buffers returned
    pub released: u64,
    /// Requests refused for lack of capacity
    pub failures: u64,
}

impl BufferPool {
    /// Create a pool allowing `capacity` buffers out at once
    pub fn new(name: impl Into<String>, capacity: usize) -> Self {
        Self {
            shared: Arc::new(PoolShared {
                name: name.into(),
                capacity,
                in_use: AtomicUsize::new(0),
                allocated: AtomicU64::new(0),
                released: AtomicU64::new(0),
                failures: AtomicU64::new(0),
            }),
        }
    }

    fn acquire(&self) -> Result<Lease, FragError> {
        let shared = &self.shared;
        let mut current = shared.in_use.load(Ordering::Acquire);
        loop {
            if current >= shared.capacity {
                shared.failures.fetch_add(1, Ordering::Relaxed);
                return Err(FragError::OutOfMemory(shared.name.clone()));
            }
            match shared.in_use.compare_exchange_weak(
                current,
                current + 1,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }
        shared.allocated.fetch_add(1, Ordering::Relaxed);
        Ok(Lease {
            pool: Arc::clone(shared),
        })
    }

    /// Allocate a zeroed owning buffer of `len` bytes
    pub fn alloc(&self, len: usize) -> Result<Segment, FragError> {
        let lease = self.acquire()?;
        let bytes: Arc<[u8]> = Arc::from(vec![0u8; len].into_boxed_slice());
        Ok(Segment {
            data: SegmentData::Owned {
                bytes,
                window: 0..len,
            },
            lease: Some(lease),
        })
    }

    /// Allocate an owning buffer initialized with `bytes`
    pub fn alloc_copy(&self, bytes: &[u8]) -> Result<Segment, FragError> {
        let lease = self.acquire()?;
        let storage: Arc<[u8]> = Arc::from(bytes);
        Ok(Segment {
            data: SegmentData::Owned {
                window: 0..storage.len(),
                bytes: storage,
            },
            lease: Some(lease),
        })
    }

    /// Attach a borrowing view of `range` within `source`'s visible bytes
    ///
    /// # Panics
    ///
    /// Panics if `range` falls outside `source`.
    pub fn attach(&self, source: &Segment, range: Range<usize>) -> Result<Segment, FragError> {
        assert!(
            range.start <= range.end && range.end <= source.len(),
            "attach range {range:?} outside segment of {} bytes",
            source.len()
        );
        let lease = self.acquire()?;
        Ok(source.view(range, Some(lease)))
    }

    /// Pool name
    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Maximum buffers out at once
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Buffers currently out on lease
    pub fn in_use(&self) -> usize {
        self.shared.in_use.load(Ordering::Acquire)
    }

    /// Buffers that can still be handed out
    pub fn available(&self) -> usize {
        self.capacity().saturating_sub(self.in_use())
    }

    /// Counter snapshot
    pub fn stats(&self) -> PoolStats {
        let shared = &self.shared;
        PoolStats {
            in_use: shared.in_use.load(Ordering::Acquire),
            allocated: shared.allocated.load(Ordering::Relaxed),
            released: shared.released.load(Ordering::Relaxed),
            failures: shared.failures.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_owned_segment_basics() {
        let mut seg = Segment::owned(vec![1u8, 2, 3, 4, 5]);
        assert!(seg.is_owned());
        assert!(!seg.is_pooled());
        assert_eq!(seg.len(), 5);

        seg.advance(2);
        assert_eq!(seg.data(), &[3, 4, 5]);
        seg.truncate(1);
        assert_eq!(seg.data(), &[3]);

        seg.data_mut().unwrap()[0] = 9;
        assert_eq!(seg.data(), &[9]);
    }

    #[test]
    fn test_attach_is_zero_copy() {
        let pool = BufferPool::new("indirect", 4);
        let source = Segment::owned((0u8..100).collect::<Vec<_>>());

        let view = pool.attach(&source, 10..20).unwrap();
        assert!(!view.is_owned());
        assert_eq!(view.data(), &(10u8..20).collect::<Vec<_>>()[..]);

        // Same storage, not a copy
        match (source.kind(), view.kind()) {
            (SegmentData::Owned { bytes, .. }, SegmentData::Borrowed { source: src, .. }) => {
                assert!(Arc::ptr_eq(bytes, src));
            }
            _ => panic!("unexpected segment kinds"),
        }
    }

    #[test]
    fn test_shared_owned_segment_is_read_only() {
        let pool = BufferPool::new("indirect", 4);
        let mut source = Segment::owned(vec![0u8; 16]);
        let view = pool.attach(&source, 0..4).unwrap();

        assert!(source.data_mut().is_none());
        drop(view);
        assert!(source.data_mut().is_some());
    }

    #[test]
    fn test_pool_exhaustion_and_release() {
        let pool = BufferPool::new("direct", 2);
        let a = pool.alloc(20).unwrap();
        let b = pool.alloc(20).unwrap();
        assert_eq!(pool.available(), 0);

        let err = pool.alloc(20).unwrap_err();
        assert_eq!(err, FragError::OutOfMemory("direct".to_string()));

        drop(a);
        drop(b);
        let stats = pool.stats();
        assert_eq!(stats.in_use, 0);
        assert_eq!(stats.allocated, 2);
        assert_eq!(stats.released, 2);
        assert_eq!(stats.failures, 1);
    }

    #[test]
    fn test_packet_chain_ops() {
        let mut pkt = Packet::from_bytes(vec![1u8, 2, 3]);
        pkt.push(Segment::owned(vec![4u8, 5]));
        pkt.append(Packet::from_bytes(vec![6u8, 7, 8]));

        assert_eq!(pkt.segment_count(), 3);
        assert_eq!(pkt.len(), 8);
        assert_eq!(pkt.to_vec(), vec![1, 2, 3, 4, 5, 6, 7, 8]);

        pkt.adj(4);
        assert_eq!(pkt.to_vec(), vec![5, 6, 7, 8]);
        assert_eq!(pkt.segment_count(), 3);

        pkt.truncate(2);
        assert_eq!(pkt.to_vec(), vec![5, 6]);
        assert_eq!(pkt.segment_count(), 3);

        pkt.truncate(1);
        assert_eq!(pkt.to_vec(), vec![5]);
        assert_eq!(pkt.segment_count(), 2);
    }

    #[test]
    fn test_head_mut_unshares_borrowed_head() {
        let pool = BufferPool::new("indirect", 2);
        let source = Segment::owned(vec![7u8; 8]);
        let view = pool.attach(&source, 0..8).unwrap();
        let mut pkt = Packet::from_segment(view);
        assert_eq!(pool.in_use(), 1);

        let head = pkt.head_mut(4).unwrap();
        head[0] = 1;

        // Copy-on-write returned the lease and left the source untouched
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pkt.to_vec(), vec![1, 7, 7, 7, 7, 7, 7, 7]);
        assert_eq!(source.data(), &[7u8; 8]);
        assert!(pkt.head_mut(9).is_none());
    }
}
