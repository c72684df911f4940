//! Configuration system for IPFRAG CLI.

use ipfrag_core::TableConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Smallest MTU every IPv4 link must support
const MIN_MTU: usize = 68;

/// Largest payload an IPv4 datagram with a 20-byte header can carry
const MAX_PAYLOAD: usize = 65535 - 20;

/// IPFRAG configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct Config {
    /// Reassembly table geometry
    pub table: TableConfig,
    /// Fragmentation parameters
    pub fragment: FragmentConfig,
    /// Buffer pool sizes
    pub pools: PoolConfig,
    /// Simulation parameters
    pub simulate: SimulateConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Fragmentation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FragmentConfig {
    /// Link MTU in bytes
    #[serde(default = "default_mtu")]
    pub mtu: usize,
    /// Maximum fragments produced per datagram
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,
}

/// Buffer pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Header buffers out at once
    #[serde(default = "default_pool_capacity")]
    pub header_capacity: usize,
    /// Payload views out at once
    #[serde(default = "default_pool_capacity")]
    pub payload_capacity: usize,
}

/// Simulation configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulateConfig {
    /// Datagrams to generate
    #[serde(default = "default_flows")]
    pub flows: usize,
    /// Payload bytes per datagram
    #[serde(default = "default_payload_size")]
    pub payload_size: usize,
    /// Probability that a datagram's fragments are shuffled
    #[serde(default = "default_reorder")]
    pub reorder: f64,
    /// Probability that a single fragment is dropped
    #[serde(default)]
    pub loss: f64,
    /// Generate IPv6 datagrams instead of IPv4
    #[serde(default)]
    pub ipv6: bool,
    /// Worker threads (0 = one per CPU)
    #[serde(default)]
    pub shards: usize,
    /// Queue capacity per worker
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Flow lifetime override in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retention_ms: Option<u64>,
    /// Random seed for reproducible runs
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values

fn default_mtu() -> usize {
    1500
}

fn default_output_capacity() -> usize {
    64
}

fn default_pool_capacity() -> usize {
    64 * 1024
}

fn default_flows() -> usize {
    10_000
}

fn default_payload_size() -> usize {
    4000
}

fn default_reorder() -> f64 {
    0.5
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for FragmentConfig {
    fn default() -> Self {
        Self {
            mtu: default_mtu(),
            output_capacity: default_output_capacity(),
        }
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            header_capacity: default_pool_capacity(),
            payload_capacity: default_pool_capacity(),
        }
    }
}

impl Default for SimulateConfig {
    fn default() -> Self {
        Self {
            flows: default_flows(),
            payload_size: default_payload_size(),
            reorder: default_reorder(),
            loss: 0.0,
            ipv6: false,
            shards: 0,
            queue_capacity: default_queue_capacity(),
            retention_ms: None,
            seed: None,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl Config {
    /// Load configuration from file
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Get default config path
    #[must_use]
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("ipfrag/config.toml")
    }

    /// Load config from the default path if present, defaults otherwise
    ///
    /// # Errors
    ///
    /// Returns an error if an existing file cannot be read or parsed.
    pub fn load_or_default() -> anyhow::Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Number of simulation workers, resolving 0 to the CPU count
    #[must_use]
    pub fn worker_count(&self) -> usize {
        if self.simulate.shards == 0 {
            num_cpus::get()
        } else {
            self.simulate.shards
        }
    }

    /// Validate configuration
    ///
    /// # Errors
    ///
    /// Returns an error if configuration is invalid.
    pub fn validate(&self) -> anyhow::Result<()> {
        self.table.validate()?;

        if self.fragment.mtu < MIN_MTU || self.fragment.mtu > 65535 {
            anyhow::bail!("MTU must be between {} and 65535", MIN_MTU);
        }
        if self.fragment.output_capacity == 0 {
            anyhow::bail!("Output capacity must be greater than 0");
        }

        if self.pools.header_capacity == 0 || self.pools.payload_capacity == 0 {
            anyhow::bail!("Pool capacities must be greater than 0");
        }

        let sim = &self.simulate;
        if sim.flows == 0 {
            anyhow::bail!("Flow count must be greater than 0");
        }
        if sim.payload_size == 0 || sim.payload_size > MAX_PAYLOAD {
            anyhow::bail!("Payload size must be between 1 and {} bytes", MAX_PAYLOAD);
        }
        for (name, p) in [("reorder", sim.reorder), ("loss", sim.loss)] {
            if !(0.0..=1.0).contains(&p) {
                anyhow::bail!("Invalid {} probability: {}. Must be within 0.0..=1.0", name, p);
            }
        }
        if sim.shards > 1024 {
            anyhow::bail!("Shard count must be at most 1024");
        }
        if sim.queue_capacity == 0 {
            anyhow::bail!("Queue capacity must be greater than 0");
        }

        let valid_log_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_log_levels.contains(&self.logging.level.to_lowercase().as_str()) {
            anyhow::bail!(
                "Invalid log level: {}. Must be one of: {}",
                self.logging.level,
                valid_log_levels.join(", ")
            );
        }

        Ok(())
    }
}
