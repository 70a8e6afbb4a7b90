use anyhow::{anyhow, Context, Result};
use clap::Parser;
use flowmeter::{
    Directionality, FlowConfig, FlowTable, FlowWriter, PacketEvent, PacketWriter, StatsStrategy,
};
use pcap_parser::*;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, error, info, trace, warn};

mod extract;
mod packet_metadata;
mod stats;

use extract::{LinkKind, Skip};
use packet_metadata::{LegacyPacket, PacketMetadata};
use stats::RunStats;

/// Expiry scans run every this many packet events.
const COLLECT_INTERVAL: u64 = 1024;

#[derive(Parser, Debug)]
#[command(name = "pcap-flowmeter")]
#[command(about = "Per-flow traffic accounting of pcap/pcapng traces", long_about = None)]
struct Args {
    /// Capture files, read in order as one continuous trace
    #[arg(short, long, value_name = "FILE", num_args = 1.., required = true)]
    pcap: Vec<PathBuf>,

    /// TOML configuration file
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Write flows to FILE instead of stdout (never overwrites an existing file)
    #[arg(short, long, value_name = "FILE")]
    output: Option<PathBuf>,

    /// Maximum flow lifetime in seconds
    #[arg(long, value_name = "SECS")]
    lifetime: Option<u32>,

    /// Maximum flow inactivity in seconds
    #[arg(long, value_name = "SECS")]
    inactive: Option<u32>,

    /// Rate statistics: exact, approximate or none
    #[arg(long, value_name = "STRATEGY")]
    strategy: Option<StatsStrategy>,

    /// Keep the two directions of a conversation as separate flows
    #[arg(short, long)]
    unidirectional: bool,

    /// Also write one line per packet to FILE (never overwrites an existing file)
    #[arg(long, value_name = "FILE")]
    packets: Option<PathBuf>,

    /// Add average packet and byte rate columns
    #[arg(long)]
    rates: bool,

    /// Write a header line naming the columns
    #[arg(long)]
    header: bool,

    /// print statistics at the end
    #[arg(short, long)]
    stats: bool,
}

fn main() {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if let Err(e) = run(&args) {
        error!("{e:#}");
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    let config = build_config(args)?;
    info!(
        lifetime = config.max_lifetime_secs,
        inactive = config.max_inactive_secs,
        strategy = %config.stats.strategy,
        directionality = %config.directionality,
        "flow accounting configured"
    );

    let out: Box<dyn Write> = match &args.output {
        Some(path) => {
            info!("Writing flows to {:?}", unclobbered_path(path));
            create_output(path)?
        }
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };

    let mut meter = Meter::new(config, out);
    if let Some(path) = &args.packets {
        info!("Writing packets to {:?}", unclobbered_path(path));
        meter = meter.with_packet_output(create_output(path)?);
    }
    if args.header {
        meter.writer.write_header()?;
    }

    let start = std::time::Instant::now();
    for path in &args.pcap {
        info!("Reading PCAP file: {:?}", path);
        meter
            .read_capture(path)
            .with_context(|| format!("failed to process {}", path.display()))?;
    }
    meter.finish()?;
    let stats = &meter.stats;

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Total packets processed: {}, {:.3}M pkt/sec, {} flows written",
        stats.packets_read,
        (stats.packets_read as f64 / elapsed) / 1_000_000.0,
        stats.flows_written
    );
    if args.stats {
        eprint!("{stats}");
    }
    Ok(())
}

/// Configuration file (or defaults), overridden by command line flags.
fn build_config(args: &Args) -> Result<FlowConfig> {
    let mut config = match &args.config {
        Some(path) => FlowConfig::load(path)?,
        None => FlowConfig::default(),
    };

    if let Some(lifetime) = args.lifetime {
        config.max_lifetime_secs = lifetime;
    }
    if let Some(inactive) = args.inactive {
        config.max_inactive_secs = inactive;
    }
    if let Some(strategy) = args.strategy {
        config.stats.strategy = strategy;
    }
    if args.unidirectional {
        config.directionality = Directionality::Unidirectional;
    }
    if args.rates {
        config.rates = true;
    }

    config.validate()?;
    Ok(config)
}

fn create_output(path: &Path) -> Result<Box<dyn Write>> {
    let path = unclobbered_path(path);
    let file = File::create(&path)
        .with_context(|| format!("cannot create output file {}", path.display()))?;
    Ok(Box::new(BufWriter::new(file)))
}

/// `path` if free, otherwise the first free `<stem><n>.<ext>` for n in 1..1000.
fn unclobbered_path(path: &Path) -> PathBuf {
    if !path.exists() {
        return path.to_path_buf();
    }

    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let ext = path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();

    let mut candidate = path.to_path_buf();
    for counter in 1..1000 {
        candidate = path.with_file_name(format!("{stem}{counter}{ext}"));
        if !candidate.exists() {
            break;
        }
    }
    candidate
}

/// Link layer state of the capture file being read.
#[derive(Default)]
struct CaptureState {
    /// pcapng interfaces of the current section, by interface id.
    interfaces: Vec<Option<LinkKind>>,
    legacy_link: Option<LinkKind>,
    nanosecond_precision: bool,
}

/// Drives packets from capture files through the flow table to the writers.
struct Meter<W: Write, P: Write = io::Sink> {
    table: FlowTable,
    writer: FlowWriter<W>,
    packets: Option<PacketWriter<P>>,
    stats: RunStats,
    events: u64,
}

impl<W: Write, P: Write> Meter<W, P> {
    fn new(config: FlowConfig, out: W) -> Self {
        Self {
            writer: FlowWriter::new(out, &config),
            packets: None,
            table: FlowTable::new(config),
            stats: RunStats::new(),
            events: 0,
        }
    }

    fn with_packet_output(mut self, out: P) -> Self {
        self.packets = Some(PacketWriter::new(out, self.table.config()));
        self
    }

    fn read_capture(&mut self, path: &Path) -> Result<()> {
        let file = File::open(path).context("cannot open capture file")?;
        let mut reader =
            create_reader(65536, file).map_err(|e| anyhow!("not a pcap or pcapng file: {e:?}"))?;
        let mut capture = CaptureState::default();

        loop {
            match reader.next() {
                Ok((offset, block)) => {
                    match block {
                        PcapBlockOwned::LegacyHeader(header) => {
                            info!("Legacy PCAP header found");
                            capture.legacy_link = LinkKind::from_linktype(header.network);
                            capture.nanosecond_precision = header.is_nanosecond_precision();
                            if capture.legacy_link.is_none() {
                                warn!(linktype = ?header.network, "unsupported link type");
                            }
                        }
                        PcapBlockOwned::Legacy(block) => {
                            let packet = LegacyPacket {
                                block: &block,
                                nanosecond_precision: capture.nanosecond_precision,
                            };
                            self.account(capture.legacy_link, &packet)?;
                        }
                        PcapBlockOwned::NG(Block::SectionHeader(_shb)) => {
                            info!("PCAPNG Section Header found");
                            capture.interfaces.clear();
                        }
                        PcapBlockOwned::NG(Block::InterfaceDescription(idb)) => {
                            let link = LinkKind::from_linktype(idb.linktype);
                            if link.is_none() {
                                warn!(linktype = ?idb.linktype, "unsupported link type");
                            }
                            capture.interfaces.push(link);
                        }
                        PcapBlockOwned::NG(Block::EnhancedPacket(epb)) => {
                            let link = capture.interfaces.get(epb.if_id as usize).copied().flatten();
                            self.account(link, &epb)?;
                        }
                        PcapBlockOwned::NG(Block::SimplePacket(spb)) => {
                            let link = capture.interfaces.first().copied().flatten();
                            self.account(link, &spb)?;
                        }
                        _ => {
                            // Other block types (interface statistics, etc.)
                        }
                    }
                    reader.consume(offset);
                }
                Err(PcapError::Eof) => break,
                Err(PcapError::Incomplete(_)) => {
                    reader
                        .refill()
                        .map_err(|e| anyhow!("error refilling capture buffer: {e:?}"))?;
                }
                Err(PcapError::UnexpectedEof) => {
                    warn!("capture ends with a truncated block");
                    break;
                }
                Err(e) => return Err(anyhow!("error reading capture: {e:?}")),
            }
        }

        self.stats.files += 1;
        Ok(())
    }

    fn account<M: PacketMetadata>(&mut self, link: Option<LinkKind>, pkt: &M) -> Result<()> {
        self.stats.packets_read += 1;
        self.stats.bytes_read += pkt.origlen() as u64;

        let event = match packet_event(link, pkt) {
            Ok(event) => event,
            Err(reason) => {
                trace!(?reason, "packet skipped");
                self.stats.skip(reason);
                return Ok(());
            }
        };

        match self.table.register_event(&event) {
            Ok(id) => {
                if let Some(packets) = self.packets.as_mut() {
                    let directionality = self.table.config().directionality;
                    packets
                        .write_packet(
                            id,
                            &event.key.canonical_form(directionality),
                            event.key.direction(directionality),
                            event.timestamp,
                            event.byte_length,
                        )
                        .context("cannot write packets")?;
                }
            }
            Err(err) if err.is_fatal() => return Err(err).context("flow table corrupted"),
            Err(err) => {
                debug!(%err, key = %event.key, ts = %event.timestamp, "packet rejected");
                self.stats.rejected += 1;
            }
        }

        self.events += 1;
        if self.events % COLLECT_INTERVAL == 0 && self.table.collect_expired_flows(None) > 0 {
            self.write_evicted()?;
        }
        Ok(())
    }

    fn write_evicted(&mut self) -> Result<()> {
        let flows = self.table.drain_expired_flows();
        let written = self
            .writer
            .write_flows(&flows)
            .context("cannot write flows")?;
        self.stats.flows_written += written as u64;
        Ok(())
    }

    /// Expire what is left and write it out.
    fn finish(&mut self) -> Result<()> {
        self.table.collect_expired_flows(None);
        self.table.expire_all();
        self.write_evicted()?;
        self.writer.flush().context("cannot write flows")?;
        if let Some(packets) = self.packets.as_mut() {
            packets.flush().context("cannot write packets")?;
        }

        self.stats.table = *self.table.stats();
        Ok(())
    }
}

fn packet_event<P: PacketMetadata>(link: Option<LinkKind>, pkt: &P) -> Result<PacketEvent, Skip> {
    let link = link.ok_or(Skip::UnsupportedLink)?;
    let key = extract::flow_key(link, pkt.data())?;
    let timestamp = pkt.timestamp().ok_or(Skip::NoTimestamp)?;
    Ok(PacketEvent::new(key, timestamp, pkt.origlen() as u64))
}
