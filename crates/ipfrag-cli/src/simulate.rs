//! Sharded reassembly simulation.
//!
//! The generator thread builds synthetic datagrams, fragments them, reorders
//! and drops fragments, and routes each fragment to the shard owning its flow.
//! Every shard runs its own fragment table and death row on a dedicated
//! thread fed by a bounded channel.

use crate::config::Config;
use crate::progress::SimulationProgress;
use crate::synth;
use anyhow::{Context, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use ipfrag_core::header::{IPV4_HDR_LEN, IPV6_FRAG_HDR_LEN, IPV6_HDR_LEN};
use ipfrag_core::{
    BufferPool, Clock, DEFAULT_PREFETCH, DeathRow, FragTable, Packet, PoolStats, ReassembleError,
    TableStats, TickClock, fragment_ipv4, fragment_ipv6, reassemble_ipv4, reassemble_ipv6,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use std::fmt;
use std::ops::AddAssign;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Fragments processed between death row drains
///
/// Matches the flow count the death row is sized for.
const BURST: usize = 32;

/// Work item for a shard
#[derive(Debug)]
pub enum Task {
    /// Reassemble a received fragment
    Fragment(Packet),
    /// Shutdown the shard
    Shutdown,
}

/// Reassembly failures by kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ErrorCounts {
    /// No slot for a new flow
    pub table_full: u64,
    /// Duplicate first or last fragment
    pub duplicates: u64,
    /// Flow exceeded its fragment slots
    pub too_many: u64,
    /// Fragments did not cover the datagram
    pub invalid: u64,
    /// Unparseable fragment headers
    pub malformed: u64,
}

impl ErrorCounts {
    fn record(&mut self, err: &ReassembleError) {
        match err {
            ReassembleError::TableFull => self.table_full += 1,
            ReassembleError::DuplicateFirst | ReassembleError::DuplicateLast => {
                self.duplicates += 1
            }
            ReassembleError::TooManyFragments(_) => self.too_many += 1,
            ReassembleError::InvalidFragmentSet => self.invalid += 1,
            ReassembleError::Malformed(_) => self.malformed += 1,
        }
    }

    /// Sum of every failure kind
    pub fn total(&self) -> u64 {
        self.table_full + self.duplicates + self.too_many + self.invalid + self.malformed
    }
}

impl AddAssign for ErrorCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.table_full += rhs.table_full;
        self.duplicates += rhs.duplicates;
        self.too_many += rhs.too_many;
        self.invalid += rhs.invalid;
        self.malformed += rhs.malformed;
    }
}

/// Per-shard outcome
#[derive(Debug, Clone, Default)]
pub struct WorkerReport {
    /// Fragments received
    pub fragments: u64,
    /// Datagrams reassembled with the expected payload
    pub completed: u64,
    /// Datagrams reassembled with an unexpected payload
    pub corrupted: u64,
    /// Bytes of reassembled datagrams
    pub bytes: u64,
    /// Reassembly failures
    pub errors: ErrorCounts,
    /// Flows deleted by aging
    pub expired: u64,
    /// Flows still in progress at shutdown
    pub incomplete: u64,
    /// Buffers released through the death row
    pub released: u64,
    /// Death row overflows
    pub overflows: u64,
    /// Fragment table counters
    pub table: TableStats,
}

impl AddAssign for WorkerReport {
    fn add_assign(&mut self, rhs: Self) {
        self.fragments += rhs.fragments;
        self.completed += rhs.completed;
        self.corrupted += rhs.corrupted;
        self.bytes += rhs.bytes;
        self.errors += rhs.errors;
        self.expired += rhs.expired;
        self.incomplete += rhs.incomplete;
        self.released += rhs.released;
        self.overflows += rhs.overflows;
        self.table += rhs.table;
    }
}

/// Whole-run outcome
#[derive(Debug, Clone, Default)]
pub struct SimulationReport {
    /// Datagrams generated
    pub datagrams: u64,
    /// Datagrams the fragmenter refused
    pub fragment_failures: u64,
    /// Fragments handed to shards
    pub fragments_sent: u64,
    /// Fragments dropped by simulated loss
    pub fragments_lost: u64,
    /// Wall time of the run
    pub elapsed: Duration,
    /// Header pool counters at the end of the run
    pub header_pool: PoolStats,
    /// Payload pool counters at the end of the run
    pub payload_pool: PoolStats,
    /// Per-shard reports, indexed by shard
    pub shards: Vec<WorkerReport>,
}

impl SimulationReport {
    /// Every shard's report summed
    pub fn totals(&self) -> WorkerReport {
        let mut total = WorkerReport::default();
        for shard in &self.shards {
            total += shard.clone();
        }
        total
    }
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let total = self.totals();
        writeln!(f, "datagrams generated:     {}", self.datagrams)?;
        writeln!(f, "fragmenter failures:     {}", self.fragment_failures)?;
        writeln!(f, "fragments sent:          {}", self.fragments_sent)?;
        writeln!(f, "fragments lost:          {}", self.fragments_lost)?;
        writeln!(f, "reassembled:             {}", total.completed)?;
        writeln!(f, "corrupted:               {}", total.corrupted)?;
        writeln!(f, "expired flows:           {}", total.expired)?;
        writeln!(f, "incomplete flows:        {}", total.incomplete)?;
        writeln!(
            f,
            "reassembly errors:       {} (table full {}, duplicate {}, too many {}, invalid {}, malformed {})",
            total.errors.total(),
            total.errors.table_full,
            total.errors.duplicates,
            total.errors.too_many,
            total.errors.invalid,
            total.errors.malformed
        )?;
        writeln!(f, "death row released:      {}", total.released)?;
        writeln!(f, "death row overflows:     {}", total.overflows)?;
        write!(f, "{}", total.table)
    }
}

/// Largest MTU not above `mtu` whose per-fragment payload is a multiple of 8
///
/// # Errors
///
/// Returns an error if `mtu` leaves no room for payload after `header_len`.
pub fn aligned_mtu(mtu: usize, header_len: usize) -> anyhow::Result<usize> {
    let payload = mtu.saturating_sub(header_len) & !7;
    if payload == 0 {
        anyhow::bail!("MTU {} leaves no room for payload after a {}-byte header", mtu, header_len);
    }
    Ok(header_len + payload)
}

/// Fragment header length of the synthetic datagrams
pub fn fragment_header_len(ipv6: bool) -> usize {
    if ipv6 {
        IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN
    } else {
        IPV4_HDR_LEN
    }
}

/// Run a simulation described by `config`
///
/// # Errors
///
/// Returns an error if a shard cannot be created or stops early.
pub fn run(config: &Config, progress: &SimulationProgress) -> anyhow::Result<SimulationReport> {
    let sim = &config.simulate;
    let shards = config.worker_count();

    let mut table_config = config.table.clone();
    if let Some(ms) = sim.retention_ms {
        table_config.max_retention_ticks = TickClock::new().ticks_for(Duration::from_millis(ms));
    }
    let mtu = aligned_mtu(config.fragment.mtu, fragment_header_len(sim.ipv6))?;
    if mtu != config.fragment.mtu {
        debug!(configured = config.fragment.mtu, mtu, "MTU aligned to 8-byte fragment payloads");
    }

    info!(
        shards,
        flows = sim.flows,
        payload = sim.payload_size,
        mtu,
        ipv6 = sim.ipv6,
        "Starting simulation"
    );

    let mut senders = Vec::with_capacity(shards);
    let mut handles = Vec::with_capacity(shards);
    for id in 0..shards {
        let (tx, rx) = bounded(sim.queue_capacity);
        let shard = Shard {
            id,
            table: FragTable::new(table_config.clone())
                .with_context(|| format!("creating table for shard {id}"))?,
            dr: DeathRow::for_table(&table_config),
            clock: TickClock::new(),
            report: WorkerReport::default(),
        };
        let handle = thread::Builder::new()
            .name(format!("ipfrag-shard-{id}"))
            .spawn(move || shard.run(&rx))
            .with_context(|| format!("spawning shard {id}"))?;
        senders.push(tx);
        handles.push(handle);
    }

    let header_pool = BufferPool::new("header", config.pools.header_capacity);
    let payload_pool = BufferPool::new("payload", config.pools.payload_capacity);
    let mut rng = match sim.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };

    let start = Instant::now();
    let mut report = SimulationReport::default();
    let generated = generate(
        config,
        mtu,
        &header_pool,
        &payload_pool,
        &mut rng,
        &senders,
        &mut report,
        progress,
    );

    for tx in &senders {
        let _ = tx.send(Task::Shutdown);
    }
    drop(senders);
    report.shards = join(handles)?;
    generated?;

    report.elapsed = start.elapsed();
    report.header_pool = header_pool.stats();
    report.payload_pool = payload_pool.stats();
    Ok(report)
}

#[allow(clippy::too_many_arguments)]
fn generate(
    config: &Config,
    mtu: usize,
    header_pool: &BufferPool,
    payload_pool: &BufferPool,
    rng: &mut StdRng,
    senders: &[Sender<Task>],
    report: &mut SimulationReport,
    progress: &SimulationProgress,
) -> anyhow::Result<()> {
    let sim = &config.simulate;
    let capacity = config.fragment.output_capacity;
    let mut fragments = Vec::with_capacity(capacity);

    for index in 0..sim.flows {
        let datagram = if sim.ipv6 {
            synth::ipv6_datagram(index, sim.payload_size)
        } else {
            synth::ipv4_datagram(index, sim.payload_size)
        };
        report.datagrams += 1;

        fragments.clear();
        let result = if sim.ipv6 {
            fragment_ipv6(
                &datagram.packet,
                mtu,
                datagram.ipv6_id,
                capacity,
                header_pool,
                payload_pool,
                &mut fragments,
            )
        } else {
            fragment_ipv4(
                &datagram.packet,
                mtu,
                capacity,
                header_pool,
                payload_pool,
                &mut fragments,
            )
        };
        if let Err(err) = result {
            debug!(%err, key = %datagram.key, "fragmentation failed");
            report.fragment_failures += 1;
            progress.inc();
            continue;
        }

        if rng.gen_bool(sim.reorder) {
            fragments.shuffle(rng);
        }

        let shard = datagram.key.shard(senders.len());
        for fragment in fragments.drain(..) {
            if rng.gen_bool(sim.loss) {
                report.fragments_lost += 1;
                continue;
            }
            senders[shard]
                .send(Task::Fragment(fragment))
                .map_err(|_| anyhow!("shard {} stopped accepting fragments", shard))?;
            report.fragments_sent += 1;
        }
        progress.inc();
    }

    Ok(())
}

fn join(handles: Vec<JoinHandle<WorkerReport>>) -> anyhow::Result<Vec<WorkerReport>> {
    handles
        .into_iter()
        .enumerate()
        .map(|(id, handle)| {
            handle
                .join()
                .map_err(|_| anyhow!("shard {} panicked", id))
        })
        .collect()
}

/// One reassembly worker: a table, its death row and a clock
struct Shard {
    id: usize,
    table: FragTable,
    dr: DeathRow,
    clock: TickClock,
    report: WorkerReport,
}

impl Shard {
    fn run(mut self, rx: &Receiver<Task>) -> WorkerReport {
        debug!(shard = self.id, "Shard starting");
        let mut burst = 0;

        loop {
            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Task::Fragment(packet)) => {
                    self.handle(packet);
                    burst += 1;
                    if burst == BURST {
                        self.end_burst();
                        burst = 0;
                    }
                }
                Ok(Task::Shutdown) => {
                    debug!(shard = self.id, "Shard received shutdown signal");
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => {
                    warn!(shard = self.id, "Shard task channel disconnected");
                    break;
                }
                Err(RecvTimeoutError::Timeout) => {
                    self.end_burst();
                    burst = 0;
                }
            }
        }

        self.finish()
    }

    fn handle(&mut self, packet: Packet) {
        self.report.fragments += 1;
        let now = self.clock.now();
        let result = if packet.head().first().map(|b| b >> 4) == Some(6) {
            reassemble_ipv6(&mut self.table, &mut self.dr, packet, now)
        } else {
            reassemble_ipv4(&mut self.table, &mut self.dr, packet, now)
        };

        match result {
            Ok(Some(datagram)) => {
                self.report.bytes += datagram.len() as u64;
                if synth::verify(&datagram) {
                    self.report.completed += 1;
                } else {
                    warn!(
                        shard = self.id,
                        len = datagram.len(),
                        "reassembled datagram has unexpected payload"
                    );
                    self.report.corrupted += 1;
                }
            }
            Ok(None) => {}
            Err(err) => self.report.errors.record(&err),
        }
    }

    fn end_burst(&mut self) {
        self.report.released += self.dr.drain(DEFAULT_PREFETCH) as u64;
        let expired = self.table.evict_expired(&mut self.dr, self.clock.now());
        self.report.expired += expired as u64;
        if expired > 0 {
            self.report.released += self.dr.drain(DEFAULT_PREFETCH) as u64;
        }
    }

    fn finish(mut self) -> WorkerReport {
        self.end_burst();
        self.report.incomplete = self.table.active_entries() as u64;
        self.report.overflows = self.dr.overflows();
        self.report.table = self.table.destroy();

        info!(
            shard = self.id,
            fragments = self.report.fragments,
            completed = self.report.completed,
            errors = self.report.errors.total(),
            incomplete = self.report.incomplete,
            "Shard shutting down"
        );
        self.report
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> Config {
        let mut config = Config::default();
        config.simulate.flows = 200;
        config.simulate.payload_size = 3000;
        config.simulate.shards = 2;
        config.simulate.seed = Some(42);
        config.table.bucket_count = 64;
        config.table.max_entries = 256;
        config
    }

    #[test]
    fn test_aligned_mtu() {
        assert_eq!(aligned_mtu(1500, 20).unwrap(), 1500);
        assert_eq!(aligned_mtu(1500, 48).unwrap(), 1496);
        assert_eq!(aligned_mtu(1499, 20).unwrap(), 1492);
        assert!(aligned_mtu(50, 48).is_err());
        assert!(aligned_mtu(10, 20).is_err());
    }

    #[test]
    fn test_lossless_ipv4_run_reassembles_everything() {
        let config = small_config();
        let report = run(&config, &SimulationProgress::new(200, false)).unwrap();
        let total = report.totals();

        assert_eq!(report.shards.len(), 2);
        assert_eq!(report.datagrams, 200);
        assert_eq!(report.fragments_sent, 600);
        assert_eq!(total.fragments, 600);
        assert_eq!(total.completed, 200);
        assert_eq!(total.corrupted, 0);
        assert_eq!(total.errors.total(), 0);
        assert_eq!(total.incomplete, 0);
        assert_eq!(total.table.adds, 200);
        assert_eq!(report.header_pool.in_use, 0);
        assert_eq!(report.payload_pool.in_use, 0);
    }

    #[test]
    fn test_lossless_ipv6_run_reassembles_everything() {
        let mut config = small_config();
        config.simulate.ipv6 = true;
        config.simulate.reorder = 1.0;
        let report = run(&config, &SimulationProgress::new(200, false)).unwrap();
        let total = report.totals();

        assert_eq!(total.completed, 200);
        assert_eq!(total.corrupted, 0);
        assert_eq!(total.errors.total(), 0);
    }

    #[test]
    fn test_loss_leaves_incomplete_flows() {
        let mut config = small_config();
        config.simulate.loss = 0.5;
        let report = run(&config, &SimulationProgress::new(200, false)).unwrap();
        let total = report.totals();

        assert!(report.fragments_lost > 0);
        assert!(total.completed < 200);
        assert_eq!(total.corrupted, 0);
        assert!(total.completed + total.incomplete <= total.table.adds);
        assert_eq!(report.header_pool.in_use, 0);
    }

    #[test]
    fn test_fragmenter_failures_are_counted() {
        let mut config = small_config();
        config.fragment.output_capacity = 2;
        let report = run(&config, &SimulationProgress::new(200, false)).unwrap();

        assert_eq!(report.fragment_failures, 200);
        assert_eq!(report.fragments_sent, 0);
        assert_eq!(report.totals().completed, 0);
    }

    #[test]
    fn test_error_counts_record() {
        let mut counts = ErrorCounts::default();
        counts.record(&ReassembleError::TableFull);
        counts.record(&ReassembleError::DuplicateFirst);
        counts.record(&ReassembleError::DuplicateLast);
        counts.record(&ReassembleError::TooManyFragments(4));
        assert_eq!(counts.duplicates, 2);
        assert_eq!(counts.total(), 4);
    }

    #[test]
    fn test_report_display() {
        let report = SimulationReport {
            datagrams: 3,
            shards: vec![WorkerReport::default(), WorkerReport::default()],
            ..Default::default()
        };
        let text = report.to_string();
        assert!(text.contains("datagrams generated:     3"));
        assert!(text.contains("find/insert count:"));
    }
}
