use std::{borrow::Cow, fmt::Display};

use serde::{Deserialize, Serialize};
use tracing::trace;

use crate::{
    config::Timeouts,
    error::FlowError,
    stats::{FlowStats, StatsSnapshot},
    timestamp::Timestamp,
    tracker::flow_key::FlowKey,
};

/// Why a flow stopped accepting packets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// The flow reached the maximum lifetime since its first packet.
    Lifetime,

    /// No packet was seen for the maximum inactivity time.
    Inactivity,

    /// The capture ended, or the owner flushed the table.
    Shutdown,
}

impl Display for Termination {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Termination::Lifetime => write!(f, "lifetime"),
            Termination::Inactivity => write!(f, "inactivity"),
            Termination::Shutdown => write!(f, "shutdown"),
        }
    }
}

/// Accounting state of one flow.
///
/// Created by the flow table on the first packet of a key, updated through
/// [`register_packet`](Self::register_packet) and frozen by
/// [`mark_expired`](Self::mark_expired). Once expired a record never accepts
/// another packet.
#[derive(Debug, Clone)]
pub struct FlowRecord {
    id: u64,
    key: FlowKey,

    /// Timestamp of the first packet in the flow.
    first_ts: Timestamp,

    /// Timestamp of the latest packet in the flow.
    last_ts: Timestamp,

    packet_count: u64,
    total_bytes: u64,

    termination: Option<Termination>,
    stats: FlowStats,

    /// Summary computed when the flow expired.
    summary: Option<StatsSnapshot>,
}

impl FlowRecord {
    /// Start a flow from its first packet.
    pub fn new(
        id: u64,
        key: FlowKey,
        first_ts: Timestamp,
        first_byte_length: u64,
        mut stats: FlowStats,
    ) -> Self {
        let recorded = stats.record(0, first_byte_length);
        debug_assert!(recorded.is_ok(), "second 0 is always inside the window");

        Self {
            id,
            key,
            first_ts,
            last_ts: first_ts,
            packet_count: 1,
            total_bytes: first_byte_length,
            termination: None,
            stats,
            summary: None,
        }
    }

    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    #[inline]
    pub fn key(&self) -> &FlowKey {
        &self.key
    }

    #[inline]
    pub fn first_ts(&self) -> Timestamp {
        self.first_ts
    }

    #[inline]
    pub fn last_ts(&self) -> Timestamp {
        self.last_ts
    }

    #[inline]
    pub fn packet_count(&self) -> u64 {
        self.packet_count
    }

    #[inline]
    pub fn total_bytes(&self) -> u64 {
        self.total_bytes
    }

    #[inline]
    pub fn is_marked_expired(&self) -> bool {
        self.termination.is_some()
    }

    #[inline]
    pub fn termination(&self) -> Option<Termination> {
        self.termination
    }

    /// Seconds between the first and the latest packet.
    #[inline]
    pub fn duration(&self) -> f64 {
        (self.last_ts - self.first_ts).as_secs_f64()
    }

    /// Which expiry rule, if any, applies at `at_time` (the latest packet time
    /// when `None`). The lifetime cap is checked before the inactivity cap.
    pub fn expiry(&self, at_time: Option<Timestamp>, timeouts: &Timeouts) -> Option<Termination> {
        if self.termination.is_some() {
            return self.termination;
        }

        let at = at_time.unwrap_or(self.last_ts);
        if at - self.first_ts >= timeouts.max_lifetime {
            Some(Termination::Lifetime)
        } else if at - self.last_ts >= timeouts.max_inactive {
            Some(Termination::Inactivity)
        } else {
            None
        }
    }

    #[inline]
    pub fn is_expired(&self, at_time: Option<Timestamp>, timeouts: &Timeouts) -> bool {
        self.expiry(at_time, timeouts).is_some()
    }

    /// Account one packet to this flow.
    ///
    /// A rejected packet leaves the record unchanged.
    pub fn register_packet(&mut self, ts: Timestamp, byte_length: u64) -> Result<(), FlowError> {
        if self.termination.is_some() {
            return Err(FlowError::ExpiredFlowWrite { id: self.id });
        }

        let elapsed = (ts - self.first_ts).whole_secs();
        let index = u32::try_from(elapsed).map_err(|_| FlowError::OutOfRangeBucket {
            index: elapsed,
            len: self.stats.window(),
        })?;
        self.stats.record(index, byte_length)?;

        self.last_ts = self.last_ts.max(ts);
        self.packet_count += 1;
        self.total_bytes += byte_length;

        trace!(
            id = self.id,
            second = index,
            packets = self.packet_count,
            bytes = self.total_bytes,
            "packet accounted"
        );
        Ok(())
    }

    /// Freeze the flow: no further packets are accepted and its statistics
    /// are summarised. Only the first call has an effect.
    pub fn mark_expired(&mut self, reason: Termination) {
        if self.termination.is_some() {
            return;
        }
        self.termination = Some(reason);
        self.summary = self.stats.finalize();
    }

    /// Rate statistics: the frozen summary once expired, a live view before.
    /// `None` when statistics are disabled.
    pub fn summary(&self) -> Option<Cow<'_, StatsSnapshot>> {
        if self.termination.is_some() {
            self.summary.as_ref().map(Cow::Borrowed)
        } else {
            self.stats.snapshot().map(Cow::Owned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FlowConfig, StatsConfig, StatsStrategy};
    use crate::stats::StatsParams;
    use crate::tracker::flow_key::IpProto;
    use std::net::Ipv4Addr;

    fn ts(secs: f64) -> Timestamp {
        Timestamp::from_secs_f64(1_000_000.0 + secs)
    }

    fn record(strategy: StatsStrategy) -> FlowRecord {
        let config = StatsConfig {
            strategy,
            ..Default::default()
        };
        let key = FlowKey::new(
            Ipv4Addr::new(10, 0, 0, 1),
            Ipv4Addr::new(10, 0, 0, 2),
            IpProto::UDP,
            5353,
            53,
        );
        FlowRecord::new(7, key, ts(0.0), 100, FlowStats::new(&StatsParams::new(&config, 3600)))
    }

    #[test]
    fn test_new_counts_first_packet() {
        let flow = record(StatsStrategy::Exact);
        assert_eq!(flow.id(), 7);
        assert_eq!(flow.packet_count(), 1);
        assert_eq!(flow.total_bytes(), 100);
        assert_eq!(flow.first_ts(), flow.last_ts());
        assert_eq!(flow.duration(), 0.0);
        assert!(!flow.is_marked_expired());
        assert_eq!(flow.summary().unwrap().seconds, 1);
    }

    #[test]
    fn test_register_packet() {
        let mut flow = record(StatsStrategy::Exact);
        flow.register_packet(ts(10.0), 200).unwrap();
        flow.register_packet(ts(20.5), 300).unwrap();

        assert_eq!(flow.packet_count(), 3);
        assert_eq!(flow.total_bytes(), 600);
        assert!((flow.duration() - 20.5).abs() < 1e-6);
        assert_eq!(flow.summary().unwrap().seconds, 21);
    }

    #[test]
    fn test_packet_before_first_is_rejected() {
        let mut flow = record(StatsStrategy::Exact);
        let err = flow.register_packet(ts(-0.5), 10).unwrap_err();
        assert_eq!(err, FlowError::OutOfRangeBucket { index: -1, len: 3600 });
        assert_eq!(flow.packet_count(), 1);
        assert_eq!(flow.total_bytes(), 100);
        assert_eq!(flow.last_ts(), flow.first_ts());
    }

    #[test]
    fn test_late_packet_keeps_last_ts() {
        let mut flow = record(StatsStrategy::Exact);
        flow.register_packet(ts(5.0), 10).unwrap();
        flow.register_packet(ts(3.0), 10).unwrap();
        assert_eq!(flow.last_ts(), ts(5.0));
        assert_eq!(flow.packet_count(), 3);
    }

    #[test]
    fn test_expiry_rules() {
        let timeouts = FlowConfig::default().timeouts();
        let mut flow = record(StatsStrategy::Disabled);

        assert!(!flow.is_expired(None, &timeouts));
        assert!(!flow.is_expired(Some(ts(59.9)), &timeouts));
        assert_eq!(flow.expiry(Some(ts(60.0)), &timeouts), Some(Termination::Inactivity));

        // Keep the flow active up to its lifetime cap.
        for i in 1..=72 {
            flow.register_packet(ts(i as f64 * 50.0), 1).unwrap();
        }
        assert!(!flow.is_expired(Some(ts(3599.0)), &timeouts));
        assert_eq!(flow.expiry(Some(ts(3600.0)), &timeouts), Some(Termination::Lifetime));
        assert_eq!(flow.expiry(None, &timeouts), Some(Termination::Lifetime));
    }

    #[test]
    fn test_mark_expired_is_idempotent_and_final() {
        let mut flow = record(StatsStrategy::Exact);
        flow.register_packet(ts(5.0), 50).unwrap();

        flow.mark_expired(Termination::Inactivity);
        let first = flow.summary().unwrap().into_owned();
        flow.mark_expired(Termination::Shutdown);

        assert_eq!(flow.termination(), Some(Termination::Inactivity));
        assert_eq!(flow.summary().unwrap().into_owned(), first);
        assert!(flow.is_expired(Some(ts(6.0)), &Timeouts::default()));
        assert_eq!(
            flow.register_packet(ts(6.0), 1),
            Err(FlowError::ExpiredFlowWrite { id: 7 })
        );
        assert_eq!(flow.packet_count(), 2);
    }

    #[test]
    fn test_disabled_stats_has_no_summary() {
        let mut flow = record(StatsStrategy::Disabled);
        flow.mark_expired(Termination::Shutdown);
        assert!(flow.summary().is_none());
    }
}
