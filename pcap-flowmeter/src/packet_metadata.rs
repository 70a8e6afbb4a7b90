use flowmeter::Timestamp;
use pcap_parser::{EnhancedPacketBlock, LegacyPcapBlock, SimplePacketBlock};

/// Common view over the packet blocks of legacy pcap and pcapng files.
pub trait PacketMetadata {
    /// Length of the packet on the wire.
    fn origlen(&self) -> u32;
    fn data(&self) -> &[u8];
    /// Capture time, when the block carries one.
    fn timestamp(&self) -> Option<Timestamp>;
}

/// A legacy pcap record, with the timestamp resolution announced by the file header.
pub struct LegacyPacket<'a, 'b> {
    pub block: &'b LegacyPcapBlock<'a>,
    pub nanosecond_precision: bool,
}

impl PacketMetadata for LegacyPacket<'_, '_> {
    #[inline]
    fn timestamp(&self) -> Option<Timestamp> {
        let secs = self.block.ts_sec as u64;
        Some(if self.nanosecond_precision {
            Timestamp::from_secs_nanos(secs, self.block.ts_usec)
        } else {
            Timestamp::from_secs_micros(secs, self.block.ts_usec)
        })
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.block.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.block.data
    }
}

impl PacketMetadata for EnhancedPacketBlock<'_> {
    #[inline]
    fn timestamp(&self) -> Option<Timestamp> {
        let raw_ts = ((self.ts_high as u64) << 32) | (self.ts_low as u64);

        // Interface resolution is not tracked: a value that reads as seconds
        // between 1973 and 2096 once divided by 1e9 is taken as nanoseconds,
        // anything else as microseconds.
        if (100_000_000..=4_000_000_000).contains(&(raw_ts / 1_000_000_000)) {
            Some(Timestamp::from_nanos(raw_ts))
        } else {
            Some(Timestamp::from_nanos(raw_ts.saturating_mul(1000)))
        }
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }
}

impl PacketMetadata for SimplePacketBlock<'_> {
    #[inline]
    fn timestamp(&self) -> Option<Timestamp> {
        None
    }

    #[inline]
    fn origlen(&self) -> u32 {
        self.origlen
    }

    #[inline]
    fn data(&self) -> &[u8] {
        self.data
    }
}
