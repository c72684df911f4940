//! Synthetic datagrams with verifiable payloads.

use ipfrag_core::FlowKey;
use ipfrag_core::Packet;
use ipfrag_core::header::{IPV4_HDR_LEN, IPV6_HDR_LEN, Ipv4Header, Ipv6Header};
use std::net::{Ipv4Addr, Ipv6Addr};

const IPPROTO_UDP: u8 = 17;
const DEFAULT_TTL: u8 = 64;

/// Byte at `index` of the payload seeded by `seed`
fn pattern_byte(seed: u32, index: usize) -> u8 {
    (seed as usize).wrapping_mul(31).wrapping_add(index) as u8
}

fn fill_payload(buf: &mut Vec<u8>, seed: u32, len: usize) {
    buf.extend((0..len).map(|i| pattern_byte(seed, i)));
}

/// Source address of the `index`th synthetic IPv4 flow
pub fn ipv4_source(index: usize) -> Ipv4Addr {
    Ipv4Addr::from(0x0A00_0000 | (index as u32 >> 16 & 0x00FF_FFFF))
}

/// Destination of every synthetic IPv4 flow
pub const IPV4_DESTINATION: Ipv4Addr = Ipv4Addr::new(192, 0, 2, 1);

/// Source address of the `index`th synthetic IPv6 flow
pub fn ipv6_source(index: usize) -> Ipv6Addr {
    Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, (index >> 16) as u16, index as u16)
}

/// Destination of every synthetic IPv6 flow
pub const IPV6_DESTINATION: Ipv6Addr = Ipv6Addr::new(0x2001, 0xdb8, 0xffff, 0, 0, 0, 0, 1);

/// A synthetic datagram and the flow key its fragments will carry
pub struct Datagram {
    /// Whole unfragmented datagram
    pub packet: Packet,
    /// Reassembly key of its fragments
    pub key: FlowKey,
    /// IPv6 fragment identification (unused for IPv4)
    pub ipv6_id: u32,
}

/// IPv4/UDP datagram for flow `index`
///
/// The identification is the low 16 bits of `index`; the upper bits pick the
/// source address so identities stay unique.
pub fn ipv4_datagram(index: usize, payload_len: usize) -> Datagram {
    let src = ipv4_source(index);
    let id = index as u16;
    let total = IPV4_HDR_LEN + payload_len;

    let mut raw = Vec::with_capacity(total);
    raw.extend_from_slice(&[0x45, 0]);
    raw.extend_from_slice(&(total as u16).to_be_bytes());
    raw.extend_from_slice(&id.to_be_bytes());
    raw.extend_from_slice(&[0, 0, DEFAULT_TTL, IPPROTO_UDP, 0, 0]);
    raw.extend_from_slice(&src.octets());
    raw.extend_from_slice(&IPV4_DESTINATION.octets());
    fill_payload(&mut raw, index as u32, payload_len);

    Datagram {
        packet: Packet::from_bytes(raw),
        key: FlowKey::v4(src, IPV4_DESTINATION, id),
        ipv6_id: 0,
    }
}

/// IPv6/UDP datagram for flow `index`
pub fn ipv6_datagram(index: usize, payload_len: usize) -> Datagram {
    let src = ipv6_source(index);
    let id = index as u32;

    let mut raw = Vec::with_capacity(IPV6_HDR_LEN + payload_len);
    raw.extend_from_slice(&[0x60, 0, 0, 0]);
    raw.extend_from_slice(&(payload_len as u16).to_be_bytes());
    raw.extend_from_slice(&[IPPROTO_UDP, DEFAULT_TTL]);
    raw.extend_from_slice(&src.octets());
    raw.extend_from_slice(&IPV6_DESTINATION.octets());
    fill_payload(&mut raw, id, payload_len);

    Datagram {
        packet: Packet::from_bytes(raw),
        key: FlowKey::v6(src, IPV6_DESTINATION, id),
        ipv6_id: id,
    }
}

/// Check that a reassembled datagram carries the payload its flow was built with
pub fn verify(datagram: &Packet) -> bool {
    let bytes = datagram.to_vec();
    let (seed, header_len, payload_len) = match bytes.first().map(|b| b >> 4) {
        Some(4) => match Ipv4Header::parse(&bytes) {
            Ok(hdr) if !hdr.is_fragment() => {
                let host = u32::from(hdr.src()) & 0x00FF_FFFF;
                let index = (host << 16) | u32::from(hdr.identification());
                let len = usize::from(hdr.total_length()).saturating_sub(hdr.header_len());
                (index, hdr.header_len(), len)
            }
            _ => return false,
        },
        Some(6) => match Ipv6Header::parse(&bytes) {
            Ok(hdr) if hdr.fragment_header().is_none() => {
                let octets = hdr.src().octets();
                let index = u32::from_be_bytes([octets[12], octets[13], octets[14], octets[15]]);
                (index, IPV6_HDR_LEN, usize::from(hdr.payload_length()))
            }
            _ => return false,
        },
        _ => return false,
    };

    bytes.len() == header_len + payload_len
        && bytes[header_len..]
            .iter()
            .enumerate()
            .all(|(i, &b)| b == pattern_byte(seed, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_datagram_layout() {
        let d = ipv4_datagram(0x1_0005, 100);
        let bytes = d.packet.to_vec();
        let hdr = Ipv4Header::parse(&bytes).unwrap();

        assert_eq!(hdr.total_length(), 120);
        assert_eq!(hdr.identification(), 5);
        assert_eq!(hdr.src(), Ipv4Addr::new(10, 0, 0, 1));
        assert!(!hdr.is_fragment());
        assert_eq!(d.key, FlowKey::v4(hdr.src(), hdr.dst(), 5));
        assert!(verify(&d.packet));
    }

    #[test]
    fn test_ipv6_datagram_layout() {
        let d = ipv6_datagram(0x2_0001, 64);
        let bytes = d.packet.to_vec();
        let hdr = Ipv6Header::parse(&bytes).unwrap();

        assert_eq!(hdr.payload_length(), 64);
        assert_eq!(hdr.next_header(), IPPROTO_UDP);
        assert_eq!(d.ipv6_id, 0x2_0001);
        assert_eq!(bytes.len(), IPV6_HDR_LEN + 64);
        assert!(verify(&d.packet));
    }

    #[test]
    fn test_distinct_flows_get_distinct_keys() {
        let a = ipv4_datagram(7, 8);
        let b = ipv4_datagram(7 + 65536, 8);
        assert_ne!(a.key, b.key);
    }

    #[test]
    fn test_verify_detects_corruption() {
        let d = ipv4_datagram(3, 32);
        let mut bytes = d.packet.to_vec();
        bytes[IPV4_HDR_LEN + 10] ^= 0xFF;
        assert!(!verify(&Packet::from_bytes(bytes.clone())));

        bytes.truncate(IPV4_HDR_LEN + 16);
        assert!(!verify(&Packet::from_bytes(bytes)));
        assert!(!verify(&Packet::from_bytes(vec![0x70; 40])));
    }
}
