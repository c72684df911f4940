//! Fragment table configuration.

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default fragment slots per datagram
pub const DEFAULT_MAX_FRAGMENTS: usize = 4;

/// First and last fragment slots are always reserved
pub const MIN_FRAGMENTS: usize = 2;

/// Upper bound on fragment slots per datagram
pub const MAX_FRAGMENTS: usize = 64;

/// Largest supported number of table slots
pub const MAX_TABLE_SIZE: usize = 1 << 24;

/// Flows a death row must absorb per processing burst
pub const DEATH_ROW_FLOWS: usize = 32;

/// Fragment table geometry and limits
///
/// Loaded from configuration files with missing fields taking defaults:
///
/// ```
/// use ipfrag_core::TableConfig;
///
/// let config = TableConfig::new(64, 4, 128, 1_000);
/// assert!(config.validate().is_ok());
/// assert_eq!(config.table_size(), 256);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TableConfig {
    /// Number of hash buckets
    pub bucket_count: usize,
    /// Slots per bucket (associativity), a power of two
    pub bucket_entries: usize,
    /// Maximum simultaneously active flows
    pub max_entries: usize,
    /// Flow lifetime in clock ticks before it counts as stale
    pub max_retention_ticks: u64,
    /// Fragment slots per datagram
    pub max_fragments: usize,
}

impl Default for TableConfig {
    fn default() -> Self {
        Self {
            bucket_count: 4096,
            bucket_entries: 16,
            max_entries: 4096,
            max_retention_ticks: 1_000_000_000, // 1s of TickClock::new() ticks
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }
}

impl TableConfig {
    /// Geometry with the default fragment slot count
    pub fn new(
        bucket_count: usize,
        bucket_entries: usize,
        max_entries: usize,
        max_retention_ticks: u64,
    ) -> Self {
        Self {
            bucket_count,
            bucket_entries,
            max_entries,
            max_retention_ticks,
            max_fragments: DEFAULT_MAX_FRAGMENTS,
        }
    }

    /// Override the fragment slot count
    #[must_use]
    pub fn with_max_fragments(mut self, max_fragments: usize) -> Self {
        self.max_fragments = max_fragments;
        self
    }

    /// Slots actually allocated: buckets × entries rounded up to a power of two
    ///
    /// Saturates at `usize::MAX` on overflow; [`validate`](Self::validate)
    /// rejects such geometries.
    pub fn table_size(&self) -> usize {
        self.bucket_count
            .checked_mul(self.bucket_entries)
            .and_then(usize::checked_next_power_of_two)
            .unwrap_or(usize::MAX)
    }

    /// Death row capacity that absorbs a full burst of invalidated flows
    pub fn death_row_capacity(&self) -> usize {
        DEATH_ROW_FLOWS * (self.max_fragments + 1)
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket_count == 0 {
            return Err(ConfigError::Zero("bucket_count"));
        }
        if self.bucket_entries == 0 {
            return Err(ConfigError::Zero("bucket_entries"));
        }
        if !self.bucket_entries.is_power_of_two() {
            return Err(ConfigError::NotPowerOfTwo(self.bucket_entries));
        }
        if self.max_entries == 0 {
            return Err(ConfigError::Zero("max_entries"));
        }

        let table_size = self.table_size();
        if table_size > MAX_TABLE_SIZE {
            return Err(ConfigError::TableTooLarge(table_size));
        }
        if self.max_entries > table_size {
            return Err(ConfigError::TooManyEntries {
                max_entries: self.max_entries,
                table_size,
            });
        }

        if !(MIN_FRAGMENTS..=MAX_FRAGMENTS).contains(&self.max_fragments) {
            return Err(ConfigError::MaxFragments {
                min: MIN_FRAGMENTS,
                max: MAX_FRAGMENTS,
                actual: self.max_fragments,
            });
        }

        Ok(())
    }
}
