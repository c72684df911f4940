//! Error types for the IPFRAG engine.

use thiserror::Error;

/// Top-level engine errors
#[derive(Debug, Error)]
pub enum Error {
    /// Header parsing error
    #[error("header error: {0}")]
    Header(#[from] HeaderError),

    /// Fragmentation error
    #[error("fragmentation error: {0}")]
    Fragment(#[from] FragError),

    /// Reassembly error
    #[error("reassembly error: {0}")]
    Reassemble(#[from] ReassembleError),

    /// Configuration error
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
}

/// Header-level errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum HeaderError {
    /// Buffer too short to hold the header
    #[error("header too short: expected at least {expected}, got {actual}")]
    TooShort {
        /// Expected minimum size
        expected: usize,
        /// Actual size available
        actual: usize,
    },

    /// Version nibble does not match the expected IP version
    #[error("unexpected IP version: {0}")]
    BadVersion(u8),

    /// IHL below the 20-byte minimum
    #[error("invalid header length: {0} bytes")]
    BadHeaderLength(usize),

    /// Total/payload length inconsistent with the header or the buffer
    #[error("invalid total length: header says {declared}, buffer holds {actual}")]
    BadTotalLength {
        /// Length declared in the header
        declared: usize,
        /// Bytes actually present
        actual: usize,
    },

    /// IPv6 packet does not carry a fragment header directly after the base header
    #[error("no IPv6 fragment header")]
    NoFragmentHeader,
}

/// Fragmentation errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FragError {
    /// Input carries the don't-fragment flag
    #[error("fragmentation disabled by DF flag")]
    FragmentationDisabled,

    /// Output capacity cannot hold every fragment
    #[error("output too small: {capacity} fragments of {fragment_size} bytes cannot carry {payload} bytes")]
    OutputTooSmall {
        /// Number of output slots offered
        capacity: usize,
        /// Payload bytes per fragment
        fragment_size: usize,
        /// Payload bytes to carry
        payload: usize,
    },

    /// Fragments would end past what the 16-bit length and 13-bit offset
    /// fields can describe
    #[error("datagram too large: fragments would end at byte {0}, limit is 65535")]
    DatagramTooLarge(usize),

    /// A buffer pool ran dry while building a fragment
    #[error("out of memory in pool '{0}'")]
    OutOfMemory(String),

    /// IPv6 input carries extension headers in its unfragmentable part
    #[error("unsupported IPv6 extension header: {0}")]
    UnsupportedExtensionHeaders(u8),

    /// Input header could not be parsed
    #[error(transparent)]
    Malformed(#[from] HeaderError),
}

/// Reassembly errors
///
/// Every variant means the arriving fragment was dropped; protocol violations
/// additionally drop the whole in-progress flow.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReassembleError {
    /// No free or stale slot for a new flow
    #[error("fragment table full")]
    TableFull,

    /// Second fragment claiming offset 0
    #[error("duplicate first fragment")]
    DuplicateFirst,

    /// Second fragment with the more-fragments flag clear
    #[error("duplicate last fragment")]
    DuplicateLast,

    /// More fragments than an entry can hold
    #[error("too many fragments (max {0})")]
    TooManyFragments(usize),

    /// Fragments do not cover the datagram contiguously
    #[error("invalid fragment set")]
    InvalidFragmentSet,

    /// Fragment header could not be parsed
    #[error(transparent)]
    Malformed(#[from] HeaderError),
}

/// Configuration errors
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A field that must be non-zero is zero
    #[error("{0} must be greater than 0")]
    Zero(&'static str),

    /// Bucket associativity is not a power of two
    #[error("bucket entries must be a power of two, got {0}")]
    NotPowerOfTwo(usize),

    /// More active entries requested than the table holds
    #[error("max entries {max_entries} exceeds table size {table_size}")]
    TooManyEntries {
        /// Requested active-entry limit
        max_entries: usize,
        /// Slots actually allocated
        table_size: usize,
    },

    /// Table would exceed the supported size
    #[error("table size {0} exceeds the supported maximum")]
    TableTooLarge(usize),

    /// Fragment slots per entry outside the supported range
    #[error("max fragments must be between {min} and {max}, got {actual}")]
    MaxFragments {
        /// Smallest supported value
        min: usize,
        /// Largest supported value
        max: usize,
        /// Requested value
        actual: usize,
    },
}

/// Result alias for engine operations
pub type Result<T> = std::result::Result<T, Error>;
