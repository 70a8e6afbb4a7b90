use ahash::RandomState;
use hashlink::LinkedHashMap;
use serde::Serialize;
use tracing::debug;

use crate::{
    config::{FlowConfig, Timeouts},
    error::FlowError,
    event::PacketEvent,
    stats::{FlowStats, StatsParams},
    timestamp::Timestamp,
};

pub mod flow;
pub mod flow_key;

use flow::{FlowRecord, Termination};
use flow_key::{Direction, FlowKey};

/// Counters kept by a [`FlowTable`] over its whole life.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TableStats {
    /// Packets accounted to a flow.
    pub packets: u64,
    /// Bytes accounted to a flow.
    pub bytes: u64,
    pub flows_created: u64,
    pub flows_evicted: u64,
    /// Full-table expiry scans actually performed.
    pub scans: u64,
    /// Packets refused with an error.
    pub rejected: u64,
}

/// Live flows keyed by their canonical [`FlowKey`], plus the buffer of flows
/// evicted and not yet drained.
///
/// Records are kept in creation order. A key goes from absent to live on its
/// first packet and from live to evicted once it expires; a later packet for
/// the same key starts a new flow with a new id.
pub struct FlowTable {
    records: LinkedHashMap<FlowKey, FlowRecord, RandomState>,
    evicted: Vec<FlowRecord>,

    next_id: u64,
    /// Latest packet time accepted by the table.
    last_observed_ts: Option<Timestamp>,
    /// A packet was accepted since the last expiry scan.
    dirty: bool,

    config: FlowConfig,
    timeouts: Timeouts,
    params: StatsParams,
    stats: TableStats,
}

impl FlowTable {
    #[inline]
    pub fn new(config: FlowConfig) -> Self {
        Self::with_capacity(config, 0)
    }

    pub fn with_capacity(config: FlowConfig, capacity: usize) -> Self {
        FlowTable {
            records: LinkedHashMap::with_capacity_and_hasher(capacity, RandomState::new()),
            evicted: Vec::new(),
            next_id: 0,
            last_observed_ts: None,
            dirty: false,
            timeouts: config.timeouts(),
            params: StatsParams::from_flow_config(&config),
            config,
            stats: TableStats::default(),
        }
    }

    /// Account a packet and return the id of the flow it belongs to.
    ///
    /// A live flow that has expired by `ts` is evicted first, and the packet
    /// opens a new flow. On error nothing in the table changes except the
    /// `rejected` counter.
    pub fn register_packet(
        &mut self,
        key: FlowKey,
        ts: Timestamp,
        byte_length: u64,
    ) -> Result<u64, FlowError> {
        let key = key.canonical_form(self.config.directionality);

        let id = match self.account(key, ts, byte_length) {
            Ok(id) => id,
            Err(err) => {
                self.stats.rejected += 1;
                return Err(err);
            }
        };

        self.last_observed_ts = self.last_observed_ts.max(Some(ts));
        self.dirty = true;
        self.stats.packets += 1;
        self.stats.bytes += byte_length;
        Ok(id)
    }

    #[inline]
    pub fn register_event(&mut self, event: &PacketEvent) -> Result<u64, FlowError> {
        self.register_packet(event.key, event.timestamp, event.byte_length)
    }

    fn account(&mut self, key: FlowKey, ts: Timestamp, byte_length: u64) -> Result<u64, FlowError> {
        let reason = match self.records.get_mut(&key) {
            None => None,
            Some(flow) => match flow.expiry(Some(ts), &self.timeouts) {
                None => return flow.register_packet(ts, byte_length).map(|()| flow.id()),
                reason => reason,
            },
        };

        // The expired flow leaves the map, so the insert below cannot collide.
        if let Some(reason) = reason {
            self.evict(&key, reason);
        }
        self.create(key, ts, byte_length)
    }

    fn create(&mut self, key: FlowKey, ts: Timestamp, byte_length: u64) -> Result<u64, FlowError> {
        if let Some(existing) = self.records.get(&key) {
            return Err(FlowError::DuplicateKeyInvariantViolation { id: existing.id() });
        }

        let id = self.next_id;
        let flow = FlowRecord::new(id, key, ts, byte_length, FlowStats::new(&self.params));
        self.records.insert(key, flow);
        self.next_id += 1;
        self.stats.flows_created += 1;

        debug!(id, %key, "flow created");
        Ok(id)
    }

    fn evict(&mut self, key: &FlowKey, reason: Termination) {
        if let Some(mut flow) = self.records.remove(key) {
            flow.mark_expired(reason);
            debug!(
                id = flow.id(),
                %reason,
                packets = flow.packet_count(),
                bytes = flow.total_bytes(),
                "flow evicted"
            );
            self.evicted.push(flow);
            self.stats.flows_evicted += 1;
        }
    }

    /// Move every flow expired at `at_time` to the eviction buffer and return
    /// the buffer size.
    ///
    /// Without `at_time` the latest accepted packet time is used, and the scan
    /// is skipped altogether when no packet arrived since the previous one.
    pub fn collect_expired_flows(&mut self, at_time: Option<Timestamp>) -> usize {
        if at_time.is_none() && !self.dirty {
            return self.evicted.len();
        }

        let at = at_time.or(self.last_observed_ts);
        let expired: Vec<(FlowKey, Termination)> = self
            .records
            .iter()
            .filter_map(|(key, flow)| flow.expiry(at, &self.timeouts).map(|reason| (*key, reason)))
            .collect();

        for (key, reason) in &expired {
            self.evict(key, *reason);
        }

        self.dirty = false;
        self.stats.scans += 1;
        debug!(
            at = ?at,
            expired = expired.len(),
            live = self.records.len(),
            "expiry scan"
        );
        self.evicted.len()
    }

    /// Take the evicted flows out of the table, in eviction order.
    #[inline]
    pub fn drain_expired_flows(&mut self) -> Vec<FlowRecord> {
        std::mem::take(&mut self.evicted)
    }

    /// Evict every live flow regardless of its timestamps, e.g. at the end of
    /// a capture. Returns the buffer size.
    pub fn expire_all(&mut self) -> usize {
        let keys: Vec<FlowKey> = self.records.keys().copied().collect();
        for key in &keys {
            self.evict(key, Termination::Shutdown);
        }
        self.dirty = false;
        self.evicted.len()
    }

    /// Live flows, oldest first.
    pub fn snapshot_all_live(&self) -> impl Iterator<Item = &FlowRecord> {
        self.records.values()
    }

    /// Orientation of a packet carrying `key` with respect to its flow's key.
    #[inline]
    pub fn direction(&self, key: &FlowKey) -> Direction {
        key.direction(self.config.directionality)
    }

    /// The live flow for `key`, after canonicalization.
    #[inline]
    pub fn get(&self, key: &FlowKey) -> Option<&FlowRecord> {
        self.records
            .get(&key.canonical_form(self.config.directionality))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    #[inline]
    pub fn evicted_len(&self) -> usize {
        self.evicted.len()
    }

    #[inline]
    pub fn stats(&self) -> &TableStats {
        &self.stats
    }

    #[inline]
    pub fn config(&self) -> &FlowConfig {
        &self.config
    }

    #[inline]
    pub fn last_observed_ts(&self) -> Option<Timestamp> {
        self.last_observed_ts
    }
}
