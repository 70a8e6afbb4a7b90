use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use flowmeter::{FlowKey, IpProto};
use pcap_parser::Linktype;

const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const ETHERTYPE_QINQ: u16 = 0x88A8;
const ETHERTYPE_QINQ_OLD: u16 = 0x9100;

const ETHERNET_HEADER_LEN: usize = 14;
const SLL_HEADER_LEN: usize = 16;
const NULL_HEADER_LEN: usize = 4;

/// Link layer framing of the packets of one capture interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    Ethernet,
    /// Linux cooked capture.
    Sll,
    /// BSD loopback, 4-byte address family in host order.
    Null,
    /// Bare IPv4 or IPv6 packet, told apart by the version nibble.
    Raw,
}

impl LinkKind {
    pub fn from_linktype(linktype: Linktype) -> Option<Self> {
        match linktype {
            Linktype::ETHERNET => Some(LinkKind::Ethernet),
            Linktype::LINUX_SLL => Some(LinkKind::Sll),
            Linktype::NULL | Linktype::LOOP => Some(LinkKind::Null),
            Linktype::RAW | Linktype::IPV4 | Linktype::IPV6 => Some(LinkKind::Raw),
            _ => None,
        }
    }
}

/// Why no flow key could be read from a packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Skip {
    /// The packet ends before the headers that carry the 5-tuple.
    Truncated,
    /// Neither IPv4 nor IPv6 (ARP, LLDP, ...).
    NotIp,
    /// The interface link type is not supported.
    UnsupportedLink,
    /// The block carries no capture time.
    NoTimestamp,
}

#[inline]
fn be16(data: &[u8], offset: usize) -> Option<u16> {
    data.get(offset..offset + 2)
        .map(|b| u16::from_be_bytes([b[0], b[1]]))
}

/// Extract the 5-tuple of a captured frame.
///
/// Ports are read for protocols that carry them (TCP, UDP, SCTP) and are `0`
/// otherwise, or for non-initial fragments.
pub fn flow_key(link: LinkKind, data: &[u8]) -> Result<FlowKey, Skip> {
    match link {
        LinkKind::Ethernet => ethernet(data),
        LinkKind::Sll => {
            let proto = be16(data, 14).ok_or(Skip::Truncated)?;
            network(proto, data.get(SLL_HEADER_LEN..).ok_or(Skip::Truncated)?)
        }
        LinkKind::Null => raw(data.get(NULL_HEADER_LEN..).ok_or(Skip::Truncated)?),
        LinkKind::Raw => raw(data),
    }
}

fn ethernet(data: &[u8]) -> Result<FlowKey, Skip> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(Skip::Truncated);
    }

    // EtherType at 12, then any number of stacked 4-byte VLAN tags.
    let mut offset = 12;
    let mut eth_type = be16(data, offset).ok_or(Skip::Truncated)?;
    while matches!(eth_type, ETHERTYPE_VLAN | ETHERTYPE_QINQ | ETHERTYPE_QINQ_OLD) {
        offset += 4;
        eth_type = be16(data, offset).ok_or(Skip::Truncated)?;
    }

    network(eth_type, &data[offset + 2..])
}

fn raw(data: &[u8]) -> Result<FlowKey, Skip> {
    match data.first().map(|b| b >> 4) {
        Some(4) => ipv4(data),
        Some(6) => ipv6(data),
        Some(_) => Err(Skip::NotIp),
        None => Err(Skip::Truncated),
    }
}

fn network(eth_type: u16, data: &[u8]) -> Result<FlowKey, Skip> {
    match eth_type {
        ETHERTYPE_IPV4 => ipv4(data),
        ETHERTYPE_IPV6 => ipv6(data),
        _ => Err(Skip::NotIp),
    }
}

fn ipv4(data: &[u8]) -> Result<FlowKey, Skip> {
    if data.len() < 20 {
        return Err(Skip::Truncated);
    }
    let ver_ihl = data[0];
    if ver_ihl >> 4 != 4 {
        return Err(Skip::NotIp);
    }
    let header_len = ((ver_ihl & 0x0F) as usize) * 4;
    if header_len < 20 {
        return Err(Skip::NotIp);
    }

    let protocol = IpProto(data[9]);
    let src = Ipv4Addr::new(data[12], data[13], data[14], data[15]);
    let dst = Ipv4Addr::new(data[16], data[17], data[18], data[19]);

    let fragment_offset = be16(data, 6).ok_or(Skip::Truncated)? & 0x1FFF;
    let (src_port, dst_port) = if fragment_offset == 0 {
        ports(protocol, data.get(header_len..).unwrap_or_default())?
    } else {
        (0, 0)
    };

    Ok(FlowKey::new(src, dst, protocol, src_port, dst_port))
}

fn ipv6(data: &[u8]) -> Result<FlowKey, Skip> {
    if data.len() < 40 {
        return Err(Skip::Truncated);
    }

    let mut octets = [0u8; 16];
    octets.copy_from_slice(&data[8..24]);
    let src = IpAddr::V6(Ipv6Addr::from(octets));
    octets.copy_from_slice(&data[24..40]);
    let dst = IpAddr::V6(Ipv6Addr::from(octets));

    // Walk extension headers down to the upper-layer protocol.
    let mut next_header = data[6];
    let mut offset = 40;
    let mut first_fragment = true;
    for _ in 0..8 {
        match next_header {
            // Hop-by-hop, routing, destination options.
            0 | 43 | 60 => {
                let len = data.get(offset + 1).ok_or(Skip::Truncated)?;
                next_header = data[offset];
                offset += (*len as usize + 1) * 8;
            }
            // Fragment.
            44 => {
                let frag = be16(data, offset + 2).ok_or(Skip::Truncated)?;
                first_fragment = frag >> 3 == 0;
                next_header = data[offset];
                offset += 8;
            }
            _ => break,
        }
    }

    let protocol = IpProto(next_header);
    let (src_port, dst_port) = if first_fragment {
        ports(protocol, data.get(offset..).unwrap_or_default())?
    } else {
        (0, 0)
    };

    Ok(FlowKey::new(src, dst, protocol, src_port, dst_port))
}

fn ports(protocol: IpProto, transport: &[u8]) -> Result<(u16, u16), Skip> {
    if !protocol.has_ports() {
        return Ok((0, 0));
    }
    match (be16(transport, 0), be16(transport, 2)) {
        (Some(src), Some(dst)) => Ok((src, dst)),
        _ => Err(Skip::Truncated),
    }
}
