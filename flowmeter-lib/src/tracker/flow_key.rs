use serde::{Deserialize, Serialize};
use std::{
    fmt,
    net::{IpAddr, Ipv4Addr},
};

use crate::config::Directionality;

/// IP protocol number (the `protocol` field of IPv4, `next header` of IPv6).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IpProto(pub u8);

impl IpProto {
    pub const ICMP: IpProto = IpProto(1);
    pub const TCP: IpProto = IpProto(6);
    pub const UDP: IpProto = IpProto(17);
    pub const ICMPV6: IpProto = IpProto(58);
    pub const SCTP: IpProto = IpProto(132);

    /// Protocols whose first four transport bytes are the source and destination ports.
    #[inline]
    pub fn has_ports(&self) -> bool {
        matches!(*self, IpProto::TCP | IpProto::UDP | IpProto::SCTP)
    }
}

impl From<u8> for IpProto {
    fn from(value: u8) -> Self {
        IpProto(value)
    }
}

impl fmt::Display for IpProto {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            IpProto::ICMP => write!(f, "icmp"),
            IpProto::TCP => write!(f, "tcp"),
            IpProto::UDP => write!(f, "udp"),
            IpProto::ICMPV6 => write!(f, "icmpv6"),
            IpProto::SCTP => write!(f, "sctp"),
            IpProto(n) => write!(f, "{n}"),
        }
    }
}

/// Orientation of a packet relative to the canonical key of its flow.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Same endpoints order as the canonical key.
    Forward,
    Reverse,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Forward => write!(f, ">"),
            Direction::Reverse => write!(f, "<"),
        }
    }
}

/// Flow identifier built from a packet's 5-tuple.
///
/// A key is a plain value: it is never mutated after construction and only
/// serves as the lookup key of the flow table. Whether both directions of a
/// conversation share a key is decided by [`FlowKey::canonical_form`].
#[derive(Hash, Eq, PartialEq, Ord, PartialOrd, Debug, Copy, Clone, Serialize, Deserialize)]
pub struct FlowKey {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub protocol: IpProto,
    pub src_port: u16,
    pub dst_port: u16,
}

impl Default for FlowKey {
    fn default() -> Self {
        Self {
            src_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            dst_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            protocol: IpProto::default(),
            src_port: 0,
            dst_port: 0,
        }
    }
}

impl FlowKey {
    #[inline]
    pub fn new(
        src_ip: impl Into<IpAddr>,
        dst_ip: impl Into<IpAddr>,
        protocol: impl Into<IpProto>,
        src_port: u16,
        dst_port: u16,
    ) -> Self {
        Self {
            src_ip: src_ip.into(),
            dst_ip: dst_ip.into(),
            protocol: protocol.into(),
            src_port,
            dst_port,
        }
    }

    /// Swap the source and destination endpoints.
    #[inline]
    pub fn flip(&self) -> Self {
        Self {
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            protocol: self.protocol,
            src_port: self.dst_port,
            dst_port: self.src_port,
        }
    }

    /// Source and destination endpoints are identical.
    #[inline]
    pub fn is_symmetric(&self) -> bool {
        self.src_ip == self.dst_ip && self.src_port == self.dst_port
    }

    /// The key the flow table indexes this packet under.
    ///
    /// With [`Directionality::Bidirectional`] the `(address, port)` endpoints are
    /// ordered so that a key and its [`flip`](Self::flip) canonicalize to the same
    /// value. With [`Directionality::Unidirectional`] the key is returned as is.
    #[inline]
    pub fn canonical_form(&self, directionality: Directionality) -> Self {
        match directionality {
            Directionality::Unidirectional => *self,
            Directionality::Bidirectional => {
                if (self.src_ip, self.src_port) <= (self.dst_ip, self.dst_port) {
                    *self
                } else {
                    self.flip()
                }
            }
        }
    }

    /// Whether this key travels along or against its canonical form.
    #[inline]
    pub fn direction(&self, directionality: Directionality) -> Direction {
        if self.canonical_form(directionality) == *self {
            Direction::Forward
        } else {
            Direction::Reverse
        }
    }
}

impl fmt::Display for FlowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.src_ip, self.dst_ip) {
            (IpAddr::V6(src), IpAddr::V6(dst)) => write!(
                f,
                "[{}]:{} -> [{}]:{} ({})",
                src, self.src_port, dst, self.dst_port, self.protocol
            ),
            _ => write!(
                f,
                "{}:{} -> {}:{} ({})",
                self.src_ip, self.src_port, self.dst_ip, self.dst_port, self.protocol
            ),
        }
    }
}
