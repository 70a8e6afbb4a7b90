use serde::{Deserialize, Serialize};

use crate::{timestamp::Timestamp, tracker::flow_key::FlowKey};

/// One observed packet, as delivered to the flow table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketEvent {
    pub key: FlowKey,
    pub timestamp: Timestamp,
    /// Length of the packet on the wire.
    pub byte_length: u64,
}

impl PacketEvent {
    #[inline]
    pub fn new(key: FlowKey, timestamp: Timestamp, byte_length: u64) -> Self {
        Self {
            key,
            timestamp,
            byte_length,
        }
    }
}
