//! Line-oriented output of evicted flows and of single packets.
//!
//! [`FlowWriter`] writes one line per flow:
//!
//! ```text
//! id  duration_seconds  packet_count  total_bytes  [pkts_per_sec bytes_per_sec]  [pkt_mean pkt_stddev pkt_min pkt_max pkt_median pkt_q.. byte_mean ..]
//! ```
//!
//! Fields are separated by the configured separator. The average rate columns
//! are present when `rates` is set; the rate statistics columns only when a
//! statistics strategy is enabled, with one quantile column per configured
//! probability. Floating point values use the shortest representation that
//! round-trips, so `20.0` is written as `20`.
//!
//! [`PacketWriter`] writes one line per accounted packet, with the flow id,
//! the canonical 5-tuple, the packet direction (`>` or `<`), its length and
//! its capture time as seconds and microseconds.

use std::io::{self, Write};

use crate::{
    config::FlowConfig,
    stats::{SeriesSummary, StatsSnapshot},
    timestamp::Timestamp,
    tracker::{
        flow::FlowRecord,
        flow_key::{Direction, FlowKey},
    },
};

pub struct FlowWriter<W: Write> {
    out: W,
    separator: char,
    with_rates: bool,
    with_stats: bool,
    quantiles: Vec<f64>,
    lines: u64,
}

impl<W: Write> FlowWriter<W> {
    pub fn new(out: W, config: &FlowConfig) -> Self {
        Self {
            out,
            separator: config.separator,
            with_rates: config.rates,
            with_stats: config.stats.is_enabled(),
            quantiles: config.stats.quantiles.clone(),
            lines: 0,
        }
    }

    /// Flow lines written so far; the header does not count.
    #[inline]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Column names, in output order.
    pub fn columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = ["id", "duration_seconds", "packet_count", "total_bytes"]
            .into_iter()
            .map(String::from)
            .collect();

        if self.with_rates {
            columns.push("pkts_per_sec".into());
            columns.push("bytes_per_sec".into());
        }

        if self.with_stats {
            for series in ["pkt", "byte"] {
                for name in ["mean", "stddev", "min", "max", "median"] {
                    columns.push(format!("{series}_{name}"));
                }
                for &p in &self.quantiles {
                    columns.push(format!("{series}_q{}", (p * 1e4).round() / 100.0));
                }
            }
        }
        columns
    }

    pub fn write_header(&mut self) -> io::Result<()> {
        let sep = self.separator.to_string();
        let header = self.columns().join(sep.as_str());
        writeln!(self.out, "{header}")
    }

    pub fn write_flow(&mut self, flow: &FlowRecord) -> io::Result<()> {
        let sep = self.separator;
        write!(
            self.out,
            "{}{sep}{}{sep}{}{sep}{}",
            flow.id(),
            flow.duration(),
            flow.packet_count(),
            flow.total_bytes()
        )?;

        if self.with_rates {
            let duration = flow.duration();
            let (pkts_per_sec, bytes_per_sec) = if duration > 0.0 {
                (
                    flow.packet_count() as f64 / duration,
                    flow.total_bytes() as f64 / duration,
                )
            } else {
                (0.0, 0.0)
            };
            write!(self.out, "{sep}{pkts_per_sec}{sep}{bytes_per_sec}")?;
        }

        if self.with_stats {
            match flow.summary() {
                Some(snapshot) => self.write_snapshot(&snapshot)?,
                // Keep the column count stable for flows built without statistics.
                None => self.write_snapshot(&StatsSnapshot::default())?,
            }
        }

        writeln!(self.out)?;
        self.lines += 1;
        Ok(())
    }

    /// Write every flow of `flows` and return how many were written.
    pub fn write_flows<'a, I>(&mut self, flows: I) -> io::Result<usize>
    where
        I: IntoIterator<Item = &'a FlowRecord>,
    {
        let mut written = 0;
        for flow in flows {
            self.write_flow(flow)?;
            written += 1;
        }
        Ok(written)
    }

    fn write_snapshot(&mut self, snapshot: &StatsSnapshot) -> io::Result<()> {
        self.write_series(&snapshot.packets)?;
        self.write_series(&snapshot.bytes)
    }

    fn write_series(&mut self, series: &SeriesSummary) -> io::Result<()> {
        let sep = self.separator;
        write!(
            self.out,
            "{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}",
            series.mean, series.stddev, series.min, series.max, series.median
        )?;
        for &p in &self.quantiles {
            write!(self.out, "{sep}{}", series.quantile(p).unwrap_or(0.0))?;
        }
        Ok(())
    }

    #[inline]
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

pub struct PacketWriter<W: Write> {
    out: W,
    separator: char,
    lines: u64,
}

impl<W: Write> PacketWriter<W> {
    pub fn new(out: W, config: &FlowConfig) -> Self {
        Self {
            out,
            separator: config.separator,
            lines: 0,
        }
    }

    #[inline]
    pub fn lines(&self) -> u64 {
        self.lines
    }

    /// Write the packet line of flow `id`. `key` is the flow's canonical key;
    /// `direction` tells whether the packet travelled along it.
    pub fn write_packet(
        &mut self,
        id: u64,
        key: &FlowKey,
        direction: Direction,
        ts: Timestamp,
        byte_length: u64,
    ) -> io::Result<()> {
        let sep = self.separator;
        writeln!(
            self.out,
            "{id}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{}{sep}{direction}{sep}{byte_length}{sep}{}{sep}{}",
            key.src_ip,
            key.dst_ip,
            key.protocol.0,
            key.src_port,
            key.dst_port,
            ts.secs(),
            ts.subsec_micros()
        )?;
        self.lines += 1;
        Ok(())
    }

    #[inline]
    pub fn flush(&mut self) -> io::Result<()> {
        self.out.flush()
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::StatsStrategy,
        stats::{FlowStats, StatsParams},
        tracker::flow::Termination,
        tracker::flow_key::IpProto,
    };
    use std::net::Ipv4Addr;

    fn flow(config: &FlowConfig) -> FlowRecord {
        let key = FlowKey::new(
            Ipv4Addr::new(10, 1, 1, 1),
            Ipv4Addr::new(10, 2, 2, 2),
            IpProto::UDP,
            4000,
            53,
        );
        let params = StatsParams::from_flow_config(config);
        let start = Timestamp::from_secs_micros(1_600_000_000, 0);
        let mut flow = FlowRecord::new(3, key, start, 100, FlowStats::new(&params));
        flow.register_packet(Timestamp::from_secs_micros(1_600_000_010, 0), 200)
            .unwrap();
        flow.register_packet(Timestamp::from_secs_micros(1_600_000_020, 0), 300)
            .unwrap();
        flow.mark_expired(Termination::Shutdown);
        flow
    }

    fn render(config: &FlowConfig, header: bool) -> String {
        let mut writer = FlowWriter::new(Vec::new(), config);
        if header {
            writer.write_header().unwrap();
        }
        writer.write_flow(&flow(config)).unwrap();
        assert_eq!(writer.lines(), 1);
        String::from_utf8(writer.into_inner()).unwrap()
    }

    #[test]
    fn test_basic_line() {
        let mut config = FlowConfig::default();
        config.stats.strategy = StatsStrategy::Disabled;
        assert_eq!(render(&config, false), "3\t20\t3\t600\n");
    }

    #[test]
    fn test_custom_separator() {
        let mut config = FlowConfig::default();
        config.stats.strategy = StatsStrategy::Disabled;
        config.separator = ',';
        assert_eq!(render(&config, true), "id,duration_seconds,packet_count,total_bytes\n3,20,3,600\n");
    }

    #[test]
    fn test_rate_columns() {
        let mut config = FlowConfig::default();
        config.stats.strategy = StatsStrategy::Disabled;
        config.rates = true;
        assert_eq!(
            render(&config, true),
            "id\tduration_seconds\tpacket_count\ttotal_bytes\tpkts_per_sec\tbytes_per_sec\n\
             3\t20\t3\t600\t0.15\t30\n"
        );
    }

    #[test]
    fn test_rates_of_single_packet_flow_are_zero() {
        let mut config = FlowConfig::default();
        config.stats.strategy = StatsStrategy::Disabled;
        config.rates = true;
        let key = FlowKey::new(Ipv4Addr::LOCALHOST, Ipv4Addr::LOCALHOST, IpProto::ICMP, 0, 0);
        let start = Timestamp::from_secs_micros(1_600_000_000, 0);
        let flow = FlowRecord::new(0, key, start, 84, FlowStats::Disabled);

        let mut writer = FlowWriter::new(Vec::new(), &config);
        writer.write_flow(&flow).unwrap();
        assert_eq!(String::from_utf8(writer.into_inner()).unwrap(), "0\t0\t1\t84\t0\t0\n");
    }

    #[test]
    fn test_packet_lines() {
        let config = FlowConfig::default();
        let sent = FlowKey::new(
            Ipv4Addr::new(10, 2, 2, 2),
            Ipv4Addr::new(10, 1, 1, 1),
            IpProto::UDP,
            53,
            4000,
        );
        let key = sent.canonical_form(config.directionality);
        let direction = sent.direction(config.directionality);

        let mut writer = PacketWriter::new(Vec::new(), &config);
        writer
            .write_packet(7, &key, direction, Timestamp::from_secs_micros(1_600_000_000, 1_500), 120)
            .unwrap();
        writer
            .write_packet(7, &key, Direction::Forward, Timestamp::from_secs_micros(1_600_000_001, 0), 60)
            .unwrap();
        assert_eq!(writer.lines(), 2);
        assert_eq!(
            String::from_utf8(writer.into_inner()).unwrap(),
            "7\t10.1.1.1\t10.2.2.2\t17\t4000\t53\t<\t120\t1600000000\t1500\n\
             7\t10.1.1.1\t10.2.2.2\t17\t4000\t53\t>\t60\t1600000001\t0\n"
        );
    }

    #[test]
    fn test_header_columns() {
        let config = FlowConfig::default();
        let writer = FlowWriter::new(io::sink(), &config);
        let columns = writer.columns();

        assert_eq!(columns.len(), 4 + 2 * (5 + 5));
        assert_eq!(columns[4], "pkt_mean");
        assert_eq!(columns[9], "pkt_q10");
        assert_eq!(columns[13], "pkt_q90");
        assert_eq!(columns[14], "byte_mean");
        assert_eq!(columns[23], "byte_q90");
    }

    #[test]
    fn test_stats_columns() {
        let config = FlowConfig::default();
        let output = render(&config, true);
        let lines: Vec<&str> = output.lines().collect();
        assert_eq!(lines.len(), 2);

        let header: Vec<&str> = lines[0].split('\t').collect();
        let fields: Vec<&str> = lines[1].split('\t').collect();
        assert_eq!(header.len(), fields.len());
        assert_eq!(&fields[..4], &["3", "20", "3", "600"]);

        // 21 seconds with one packet at 0, 10 and 20.
        let pkt_max: f64 = fields[7].parse().unwrap();
        let byte_max: f64 = fields[17].parse().unwrap();
        let pkt_mean: f64 = fields[4].parse().unwrap();
        assert_eq!(pkt_max, 1.0);
        assert_eq!(byte_max, 300.0);
        assert!((pkt_mean - 3.0 / 21.0).abs() < 1e-12);
    }
}
