//! Flow accounting.
//!
//! Packets are grouped into flows by their 5-tuple. Each flow keeps packet and
//! byte counters together with per-second rate statistics, and is evicted from
//! the [`FlowTable`] once it exceeds its maximum lifetime or stays idle for
//! too long. Evicted flows are drained by the caller and usually written out
//! with a [`FlowWriter`].
//!
//! ```
//! use flowmeter::{FlowConfig, FlowKey, FlowTable, IpProto, Timestamp};
//! use std::net::Ipv4Addr;
//!
//! let mut table = FlowTable::new(FlowConfig::default());
//! let key = FlowKey::new(
//!     Ipv4Addr::new(10, 0, 0, 1),
//!     Ipv4Addr::new(10, 0, 0, 2),
//!     IpProto::TCP,
//!     40000,
//!     80,
//! );
//!
//! let id = table.register_packet(key, Timestamp::from_secs_micros(100, 0), 60).unwrap();
//! assert_eq!(table.register_packet(key.flip(), Timestamp::from_secs_micros(101, 0), 1500), Ok(id));
//!
//! table.collect_expired_flows(Some(Timestamp::from_secs_micros(200, 0)));
//! let flows = table.drain_expired_flows();
//! assert_eq!(flows[0].packet_count(), 2);
//! ```

pub mod config;
pub mod error;
pub mod event;
pub mod export;
pub mod stats;
pub mod timestamp;
pub mod tracker;

pub use config::{Directionality, FlowConfig, StatsConfig, StatsStrategy, Timeouts};
pub use error::{ConfigError, FlowError};
pub use event::PacketEvent;
pub use export::{FlowWriter, PacketWriter};
pub use stats::{FlowStats, SeriesSummary, StatisticsEngine, StatsParams, StatsSnapshot};
pub use timestamp::{Interval, Timestamp};
pub use tracker::{
    flow::{FlowRecord, Termination},
    flow_key::{Direction, FlowKey, IpProto},
    FlowTable, TableStats,
};
