//! IPFRAG CLI
//!
//! Fragment layouts and sharded reassembly simulation

mod config;
mod progress;
mod simulate;
mod synth;

use clap::{Parser, Subcommand};
use ipfrag_core::header::{Ipv4Header, Ipv6Header};
use ipfrag_core::{BufferPool, Packet, fragment_ipv4, fragment_ipv6};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use config::Config;
use progress::{SimulationProgress, format_bytes, format_rate};

/// IPFRAG - IP datagram fragmentation and reassembly
#[derive(Parser)]
#[command(name = "ipfrag")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the fragment layout of a synthetic datagram
    Fragment {
        /// Payload size in bytes
        #[arg(short, long, default_value_t = 4000)]
        size: usize,

        /// Link MTU (defaults to the configured MTU)
        #[arg(short, long)]
        mtu: Option<usize>,

        /// Fragment an IPv6 datagram
        #[arg(long)]
        ipv6: bool,
    },

    /// Fragment, shuffle and reassemble synthetic flows on sharded tables
    Simulate {
        /// Datagrams to generate
        #[arg(short, long)]
        flows: Option<usize>,

        /// Payload size in bytes
        #[arg(short, long)]
        size: Option<usize>,

        /// Link MTU
        #[arg(short, long)]
        mtu: Option<usize>,

        /// Probability that a datagram's fragments are shuffled
        #[arg(long)]
        reorder: Option<f64>,

        /// Probability that a fragment is dropped
        #[arg(long)]
        loss: Option<f64>,

        /// Worker threads (0 = one per CPU)
        #[arg(long)]
        shards: Option<usize>,

        /// Flow lifetime in milliseconds
        #[arg(long)]
        retention_ms: Option<u64>,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Generate IPv6 datagrams
        #[arg(long)]
        ipv6: bool,

        /// Hide the progress bar
        #[arg(long)]
        quiet: bool,
    },

    /// Print the effective configuration as TOML
    Config,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Load configuration
    let mut config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::load_or_default()?,
    };

    // Initialize logging
    let level = if cli.verbose {
        "debug".to_string()
    } else {
        config.logging.level.to_lowercase()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level)),
        )
        .init();

    match cli.command {
        Commands::Fragment { size, mtu, ipv6 } => {
            if let Some(mtu) = mtu {
                config.fragment.mtu = mtu;
            }
            config.simulate.payload_size = size;
            config.validate()?;
            show_fragments(&config, ipv6)?;
        }
        Commands::Simulate {
            flows,
            size,
            mtu,
            reorder,
            loss,
            shards,
            retention_ms,
            seed,
            ipv6,
            quiet,
        } => {
            let sim = &mut config.simulate;
            if let Some(flows) = flows {
                sim.flows = flows;
            }
            if let Some(size) = size {
                sim.payload_size = size;
            }
            if let Some(reorder) = reorder {
                sim.reorder = reorder;
            }
            if let Some(loss) = loss {
                sim.loss = loss;
            }
            if let Some(shards) = shards {
                sim.shards = shards;
            }
            if retention_ms.is_some() {
                sim.retention_ms = retention_ms;
            }
            if seed.is_some() {
                sim.seed = seed;
            }
            sim.ipv6 |= ipv6;
            if let Some(mtu) = mtu {
                config.fragment.mtu = mtu;
            }
            config.validate()?;
            run_simulation(&config, quiet)?;
        }
        Commands::Config => {
            config.validate()?;
            print!("{}", toml::to_string_pretty(&config)?);
        }
    }

    Ok(())
}

/// Fragment one synthetic datagram and print every fragment's geometry
fn show_fragments(config: &Config, ipv6: bool) -> anyhow::Result<()> {
    let size = config.simulate.payload_size;
    let header_len = simulate::fragment_header_len(ipv6);
    let mtu = simulate::aligned_mtu(config.fragment.mtu, header_len)?;

    let header_pool = BufferPool::new("header", config.pools.header_capacity);
    let payload_pool = BufferPool::new("payload", config.pools.payload_capacity);
    let capacity = config.fragment.output_capacity;
    let mut fragments = Vec::with_capacity(capacity);

    let datagram = if ipv6 {
        let d = synth::ipv6_datagram(1, size);
        fragment_ipv6(
            &d.packet,
            mtu,
            d.ipv6_id,
            capacity,
            &header_pool,
            &payload_pool,
            &mut fragments,
        )?;
        d
    } else {
        let d = synth::ipv4_datagram(1, size);
        fragment_ipv4(&d.packet, mtu, capacity, &header_pool, &payload_pool, &mut fragments)?;
        d
    };

    println!("Flow:     {}", datagram.key);
    println!(
        "Datagram: {} ({} payload)",
        format_bytes(datagram.packet.len() as u64),
        format_bytes(size as u64)
    );
    if mtu != config.fragment.mtu {
        println!("MTU:      {} (aligned from {})", mtu, config.fragment.mtu);
    } else {
        println!("MTU:      {}", mtu);
    }
    println!();
    println!(
        "{:>5}  {:>8}  {:>6}  {:>8}  {:>8}  MF",
        "#", "offset", "units", "payload", "length"
    );
    for (i, fragment) in fragments.iter().enumerate() {
        let (offset, more, payload) = fragment_geometry(fragment, ipv6)?;
        println!(
            "{:>5}  {:>8}  {:>6}  {:>8}  {:>8}  {}",
            i,
            offset,
            offset / 8,
            payload,
            fragment.len(),
            u8::from(more)
        );
    }

    Ok(())
}

fn fragment_geometry(fragment: &Packet, ipv6: bool) -> anyhow::Result<(usize, bool, usize)> {
    let head = fragment.head();
    if ipv6 {
        let hdr = Ipv6Header::parse(head)?;
        let frag = hdr
            .fragment_header()
            .ok_or_else(|| anyhow::anyhow!("fragment lacks an IPv6 fragment header"))?;
        let payload = fragment.len().saturating_sub(simulate::fragment_header_len(true));
        Ok((frag.offset_bytes(), frag.more_fragments(), payload))
    } else {
        let hdr = Ipv4Header::parse(head)?;
        let payload = fragment.len().saturating_sub(hdr.header_len());
        Ok((hdr.fragment_offset_bytes(), hdr.more_fragments(), payload))
    }
}

fn run_simulation(config: &Config, quiet: bool) -> anyhow::Result<()> {
    let progress = SimulationProgress::new(config.simulate.flows as u64, !quiet);
    let report = simulate::run(config, &progress)?;
    let total = report.totals();

    progress.finish_with_message(format!(
        "Reassembled {}/{} datagrams",
        total.completed, report.datagrams
    ));

    println!();
    println!("Shards:   {}", report.shards.len());
    println!("Elapsed:  {:.2?}", report.elapsed);
    println!(
        "Rate:     {} fragments ({} reassembled)",
        format_rate(report.fragments_sent, report.elapsed),
        format_bytes(total.bytes)
    );
    println!();
    print!("{report}");
    println!();
    println!(
        "Pools:    header {} allocated / {} failed, payload {} allocated / {} failed",
        report.header_pool.allocated,
        report.header_pool.failures,
        report.payload_pool.allocated,
        report.payload_pool.failures
    );

    if total.corrupted > 0 {
        anyhow::bail!("{} reassembled datagrams had corrupted payloads", total.corrupted);
    }
    Ok(())
}
