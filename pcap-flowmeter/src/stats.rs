use std::fmt::Display;

use flowmeter::TableStats;

use crate::extract::Skip;

/// Counters of one run, printed with `--stats`.
#[derive(Default, Debug, Clone)]
pub struct RunStats {
    pub files: u64,
    pub packets_read: u64,
    pub bytes_read: u64,

    // Packets that never reached the flow table
    pub truncated: u64,
    pub not_ip: u64,
    pub unsupported_link: u64,
    pub no_timestamp: u64,

    /// Packets refused by the flow table (out of the statistics window).
    pub rejected: u64,

    pub flows_written: u64,

    /// Flow table counters, copied in at the end of the run.
    pub table: TableStats,
}

impl RunStats {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn skip(&mut self, reason: Skip) {
        match reason {
            Skip::Truncated => self.truncated += 1,
            Skip::NotIp => self.not_ip += 1,
            Skip::UnsupportedLink => self.unsupported_link += 1,
            Skip::NoTimestamp => self.no_timestamp += 1,
        }
    }

    pub fn total_skipped(&self) -> u64 {
        self.truncated + self.not_ip + self.unsupported_link + self.no_timestamp
    }
}

impl Display for RunStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Flow Statistics ===")?;
        writeln!(f)?;

        writeln!(f, "--- Input ---")?;
        writeln!(f, "Capture files: {}", self.files)?;
        writeln!(f, "Packets read: {}", self.packets_read)?;
        writeln!(f, "Bytes read: {}", self.bytes_read)?;
        writeln!(f)?;

        writeln!(f, "--- Accounting ---")?;
        writeln!(f, "Packets accounted: {}", self.table.packets)?;
        writeln!(f, "Bytes accounted: {}", self.table.bytes)?;
        writeln!(f, "Rejected (out of window): {}", self.rejected)?;
        writeln!(f, "Skipped: {}", self.total_skipped())?;
        if self.total_skipped() > 0 {
            writeln!(f, "  Truncated: {}", self.truncated)?;
            writeln!(f, "  Not IP: {}", self.not_ip)?;
            writeln!(f, "  Unsupported link type: {}", self.unsupported_link)?;
            writeln!(f, "  No timestamp: {}", self.no_timestamp)?;
        }
        writeln!(f)?;

        writeln!(f, "--- Flows ---")?;
        writeln!(f, "Flows created: {}", self.table.flows_created)?;
        writeln!(f, "Flows evicted: {}", self.table.flows_evicted)?;
        writeln!(f, "Flows written: {}", self.flows_written)?;
        writeln!(f, "Expiry scans: {}", self.table.scans)?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_skip_counters() {
        let mut stats = RunStats::new();
        stats.skip(Skip::NotIp);
        stats.skip(Skip::NotIp);
        stats.skip(Skip::Truncated);
        assert_eq!(stats.not_ip, 2);
        assert_eq!(stats.total_skipped(), 3);

        let report = stats.to_string();
        assert!(report.contains("Skipped: 3"));
        assert!(report.contains("  Not IP: 2"));
    }

    #[test]
    fn test_report_hides_empty_skip_detail() {
        let report = RunStats::new().to_string();
        assert!(report.contains("Skipped: 0"));
        assert!(!report.contains("Truncated"));
    }
}
