//! Datagram reassembly.
//!
//! [`reassemble_ipv4`] and [`reassemble_ipv6`] take ownership of every
//! packet they are given. A packet comes back out either unchanged (it was
//! not a fragment) or as the last piece of a completed datagram; otherwise it
//! is held by the table or parked on the death row.

use tracing::debug;

use crate::buffer::Packet;
use crate::config::MAX_FRAGMENTS;
use crate::death_row::DeathRow;
use crate::entry::{FIRST_FRAG_IDX, FragEntry};
use crate::error::{HeaderError, ReassembleError};
use crate::header::{
    IPPROTO_FRAGMENT, IPV4_HDR_DF_FLAG, IPV6_FRAG_HDR_LEN, IPV6_HDR_LEN, Ipv4Header,
    Ipv4HeaderMut, Ipv6Header, set_ipv6_next_header, set_ipv6_payload_length,
};
use crate::key::FlowKey;
use crate::table::FragTable;

/// Fragment geometry extracted from an L3 header
#[derive(Debug, Clone, Copy)]
struct FragmentInfo {
    key: FlowKey,
    ofs: u32,
    len: u32,
    more: bool,
}

/// Outcome of header inspection
#[derive(Debug)]
struct Classified {
    /// Bytes of the datagram proper; anything beyond is link padding
    datagram_len: usize,
    l3_len: usize,
    fragment: Option<FragmentInfo>,
}

fn classify_ipv4(packet: &Packet) -> Result<Classified, HeaderError> {
    let hdr = Ipv4Header::parse(packet.head())?;
    let l3_len = hdr.header_len();
    let datagram_len = usize::from(hdr.total_length());
    if datagram_len < l3_len || datagram_len > packet.len() {
        return Err(HeaderError::BadTotalLength {
            declared: datagram_len,
            actual: packet.len(),
        });
    }

    let fragment = hdr.is_fragment().then(|| FragmentInfo {
        key: FlowKey::v4(hdr.src(), hdr.dst(), hdr.identification()),
        ofs: hdr.fragment_offset_bytes() as u32,
        len: (datagram_len - l3_len) as u32,
        more: hdr.more_fragments(),
    });

    Ok(Classified {
        datagram_len,
        l3_len,
        fragment,
    })
}

fn classify_ipv6(packet: &Packet) -> Result<Classified, HeaderError> {
    let hdr = Ipv6Header::parse(packet.head())?;
    let datagram_len = IPV6_HDR_LEN + usize::from(hdr.payload_length());
    if datagram_len > packet.len() {
        return Err(HeaderError::BadTotalLength {
            declared: datagram_len,
            actual: packet.len(),
        });
    }

    let Some(frag_hdr) = hdr.fragment_header() else {
        if hdr.next_header() == IPPROTO_FRAGMENT {
            return Err(HeaderError::TooShort {
                expected: IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN,
                actual: packet.head().len(),
            });
        }
        return Ok(Classified {
            datagram_len,
            l3_len: IPV6_HDR_LEN,
            fragment: None,
        });
    };

    let l3_len = IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN;
    if datagram_len < l3_len {
        return Err(HeaderError::BadTotalLength {
            declared: datagram_len,
            actual: packet.len(),
        });
    }

    Ok(Classified {
        datagram_len,
        l3_len,
        fragment: Some(FragmentInfo {
            key: FlowKey::v6(hdr.src(), hdr.dst(), frag_hdr.identification()),
            ofs: frag_hdr.offset_bytes() as u32,
            len: (datagram_len - l3_len) as u32,
            more: frag_hdr.more_fragments(),
        }),
    })
}

/// Shared tail of both entry points
fn submit(
    table: &mut FragTable,
    dr: &mut DeathRow,
    mut packet: Packet,
    now: u64,
    classified: Classified,
) -> Result<Option<Packet>, ReassembleError> {
    packet.truncate(classified.datagram_len);
    packet.set_l3_len(classified.l3_len);

    let Some(frag) = classified.fragment else {
        return Ok(Some(packet));
    };

    let id = match table.find(dr, &frag.key, now) {
        Ok(id) => id,
        Err(err) => {
            dr.stash(packet);
            return Err(err);
        }
    };
    table.process(dr, id, packet, frag.ofs, frag.len, frag.more)
}

/// Feed one IPv4 packet to the reassembly table
///
/// Returns `Ok(Some(_))` with the packet itself if it is not a fragment, or
/// with the reassembled datagram if this fragment completed it, and `Ok(None)`
/// while the datagram is still incomplete. Trailing bytes beyond the header's
/// total length are trimmed first. The reassembled datagram's header carries
/// the combined total length, only the DF flag, and a zeroed checksum flagged
/// for recomputation ([`Packet::needs_checksum`]).
///
/// # Errors
///
/// Malformed headers, a full table, and protocol violations. In every case
/// the packet has been moved to `dr`, along with the rest of its flow if the
/// flow was dropped.
pub fn reassemble_ipv4(
    table: &mut FragTable,
    dr: &mut DeathRow,
    packet: Packet,
    now: u64,
) -> Result<Option<Packet>, ReassembleError> {
    match classify_ipv4(&packet) {
        Ok(classified) => submit(table, dr, packet, now, classified),
        Err(err) => {
            debug!(%err, len = packet.len(), "malformed IPv4 packet");
            dr.stash(packet);
            Err(err.into())
        }
    }
}

/// Feed one IPv6 packet to the reassembly table
///
/// Only a fragment header directly following the base header is
/// recognized. The reassembled datagram has the fragment header removed, the
/// base header's next-header taken from it and the payload length set to the
/// reassembled size. An atomic fragment (offset 0, no more fragments) is
/// unwrapped without touching the table.
///
/// # Errors
///
/// As [`reassemble_ipv4`].
pub fn reassemble_ipv6(
    table: &mut FragTable,
    dr: &mut DeathRow,
    mut packet: Packet,
    now: u64,
) -> Result<Option<Packet>, ReassembleError> {
    let classified = match classify_ipv6(&packet) {
        Ok(classified) => classified,
        Err(err) => {
            debug!(%err, len = packet.len(), "malformed IPv6 packet");
            dr.stash(packet);
            return Err(err.into());
        }
    };

    if let Some(frag) = classified.fragment.filter(|f| f.ofs == 0 && !f.more) {
        packet.truncate(classified.datagram_len);
        packet.set_l3_len(classified.l3_len);
        return match strip_ipv6_fragment_header(&mut packet, frag.len) {
            Ok(()) => Ok(Some(packet)),
            Err(err) => {
                dr.stash(packet);
                Err(err)
            }
        };
    }

    submit(table, dr, packet, now, classified)
}

/// Chain the entry's fragments into one datagram
///
/// Fragments must tile `[0, total)` exactly. On a coverage failure the
/// fragments stay in the entry; once chaining starts, a failure parks the
/// partially built datagram on `dr`.
pub(crate) fn reconstruct(
    entry: &mut FragEntry,
    dr: &mut DeathRow,
    total: u32,
) -> Result<Packet, ReassembleError> {
    let is_v6 = entry.key.is_some_and(|k| k.is_v6());

    let mut slots = [0usize; MAX_FRAGMENTS];
    let mut held = 0;
    for (i, slot) in entry.frags.iter().enumerate() {
        if slot.packet.is_some() && held < MAX_FRAGMENTS {
            slots[held] = i;
            held += 1;
        }
    }
    let order = &mut slots[..held];
    order.sort_unstable_by_key(|&i| entry.frags[i].ofs);

    if order.first() != Some(&FIRST_FRAG_IDX) {
        return Err(ReassembleError::InvalidFragmentSet);
    }
    let mut covered = 0u32;
    for &i in order.iter() {
        let slot = &entry.frags[i];
        if slot.ofs != covered {
            return Err(ReassembleError::InvalidFragmentSet);
        }
        covered += slot.len;
    }
    if covered != total {
        return Err(ReassembleError::InvalidFragmentSet);
    }

    let Some(mut datagram) = entry.frags[FIRST_FRAG_IDX].packet.take() else {
        return Err(ReassembleError::InvalidFragmentSet);
    };
    for &i in &order[1..] {
        if let Some(mut fragment) = entry.frags[i].packet.take() {
            let l3_len = fragment.l3_len();
            fragment.adj(l3_len);
            datagram.append(fragment);
        }
    }

    let rewritten = if is_v6 {
        strip_ipv6_fragment_header(&mut datagram, total)
    } else {
        rewrite_ipv4_header(&mut datagram, total)
    };
    match rewritten {
        Ok(()) => Ok(datagram),
        Err(err) => {
            dr.stash(datagram);
            Err(err)
        }
    }
}

fn rewrite_ipv4_header(datagram: &mut Packet, payload: u32) -> Result<(), ReassembleError> {
    let l3_len = datagram.l3_len();
    let total_length = u16::try_from(l3_len + payload as usize)
        .map_err(|_| ReassembleError::InvalidFragmentSet)?;
    let flag_offset = Ipv4Header::parse(datagram.head())?.flag_offset();

    let head = datagram
        .head_mut(l3_len)
        .ok_or(ReassembleError::InvalidFragmentSet)?;
    let mut hdr = Ipv4HeaderMut::new(head);
    hdr.set_total_length(total_length);
    hdr.set_flag_offset(flag_offset & IPV4_HDR_DF_FLAG);
    hdr.clear_checksum();

    datagram.mark_checksum();
    Ok(())
}

fn strip_ipv6_fragment_header(datagram: &mut Packet, payload: u32) -> Result<(), ReassembleError> {
    let payload_length =
        u16::try_from(payload).map_err(|_| ReassembleError::InvalidFragmentSet)?;
    let next_header = Ipv6Header::parse(datagram.head())?
        .fragment_header()
        .ok_or(HeaderError::NoFragmentHeader)?
        .next_header();

    // Slide the base header over the fragment header
    let head = datagram
        .head_mut(IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN)
        .ok_or(ReassembleError::InvalidFragmentSet)?;
    head.copy_within(..IPV6_HDR_LEN, IPV6_FRAG_HDR_LEN);
    datagram.adj(IPV6_FRAG_HDR_LEN);

    let head = datagram
        .head_mut(IPV6_HDR_LEN)
        .ok_or(ReassembleError::InvalidFragmentSet)?;
    set_ipv6_payload_length(head, payload_length);
    set_ipv6_next_header(head, next_header);

    datagram.set_l3_len(IPV6_HDR_LEN);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::BufferPool;
    use crate::config::TableConfig;
    use crate::header::{IPV4_HDR_MF_FLAG, write_ipv6_fragment_header};
    use std::net::Ipv6Addr;

    const UDP: u8 = 17;

    fn payload(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i % 251) as u8).collect()
    }

    fn ipv4_raw(id: u16, flags: u16, ofs: usize, body: &[u8]) -> Vec<u8> {
        let mut raw = vec![0u8; 20];
        raw[0] = 0x45;
        raw[2..4].copy_from_slice(&((20 + body.len()) as u16).to_be_bytes());
        raw[4..6].copy_from_slice(&id.to_be_bytes());
        raw[6..8].copy_from_slice(&(flags | (ofs / 8) as u16).to_be_bytes());
        raw[8] = 64;
        raw[9] = UDP;
        raw[10..12].copy_from_slice(&[0xAB, 0xCD]);
        raw[12..16].copy_from_slice(&[10, 0, 0, 1]);
        raw[16..20].copy_from_slice(&[10, 0, 0, 2]);
        raw.extend_from_slice(body);
        raw
    }

    fn ipv4_fragment(id: u16, ofs: usize, more: bool, body: &[u8]) -> Packet {
        let flags = if more { IPV4_HDR_MF_FLAG } else { 0 };
        Packet::from_bytes(ipv4_raw(id, flags, ofs, body))
    }

    fn ipv6_fragment(id: u32, ofs: usize, more: bool, body: &[u8]) -> Packet {
        let mut raw = vec![0u8; IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN];
        raw[0] = 0x60;
        raw[4..6].copy_from_slice(&((IPV6_FRAG_HDR_LEN + body.len()) as u16).to_be_bytes());
        raw[6] = IPPROTO_FRAGMENT;
        raw[7] = 64;
        raw[8..24].copy_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1).octets());
        raw[24..40].copy_from_slice(&Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 2).octets());
        write_ipv6_fragment_header(&mut raw[IPV6_HDR_LEN..], UDP, ofs, more, id);
        raw.extend_from_slice(body);
        Packet::from_bytes(raw)
    }

    fn table() -> (FragTable, DeathRow) {
        let config = TableConfig::new(16, 4, 32, 1_000);
        let dr = DeathRow::for_table(&config);
        (FragTable::new(config).unwrap(), dr)
    }

    #[test]
    fn test_reassemble_ipv4_in_order() {
        let (mut table, mut dr) = table();
        let data = payload(24);

        let first = ipv4_fragment(7, 0, true, &data[..8]);
        let middle = ipv4_fragment(7, 8, true, &data[8..16]);
        let last = ipv4_fragment(7, 16, false, &data[16..]);

        assert!(reassemble_ipv4(&mut table, &mut dr, first, 0).unwrap().is_none());
        assert!(reassemble_ipv4(&mut table, &mut dr, middle, 1).unwrap().is_none());
        let datagram = reassemble_ipv4(&mut table, &mut dr, last, 2).unwrap().unwrap();

        let bytes = datagram.to_vec();
        let hdr = Ipv4Header::parse(&bytes).unwrap();
        assert_eq!(hdr.total_length(), 44);
        assert_eq!(hdr.flag_offset(), 0);
        assert_eq!(hdr.checksum(), 0);
        assert_eq!(hdr.identification(), 7);
        assert_eq!(&bytes[20..], &data[..]);
        assert!(datagram.needs_checksum());
        assert_eq!(datagram.l3_len(), 20);

        assert_eq!(table.active_entries(), 0);
        assert!(dr.is_empty());
    }

    #[test]
    fn test_reassemble_ipv4_out_of_order_keeps_df() {
        let (mut table, mut dr) = table();
        let data = payload(32);
        let df = IPV4_HDR_DF_FLAG;

        let mut fragments = vec![
            Packet::from_bytes(ipv4_raw(9, df, 24, &data[24..])),
            Packet::from_bytes(ipv4_raw(9, df | IPV4_HDR_MF_FLAG, 8, &data[8..24])),
            Packet::from_bytes(ipv4_raw(9, df | IPV4_HDR_MF_FLAG, 0, &data[..8])),
        ];
        let last = fragments.pop().unwrap();
        for fragment in fragments {
            assert!(reassemble_ipv4(&mut table, &mut dr, fragment, 0).unwrap().is_none());
        }
        let datagram = reassemble_ipv4(&mut table, &mut dr, last, 0).unwrap().unwrap();

        let bytes = datagram.to_vec();
        assert_eq!(Ipv4Header::parse(&bytes).unwrap().flag_offset(), df);
        assert_eq!(&bytes[20..], &data[..]);
    }

    #[test]
    fn test_reassemble_with_every_slot_used() {
        let config = TableConfig::new(16, 4, 32, 1_000).with_max_fragments(MAX_FRAGMENTS);
        let mut table = FragTable::new(config.clone()).unwrap();
        let mut dr = DeathRow::for_table(&config);
        let data = payload(MAX_FRAGMENTS * 8);

        let mut result = None;
        for i in (0..MAX_FRAGMENTS).rev() {
            let body = &data[i * 8..(i + 1) * 8];
            let fragment = ipv4_fragment(3, i * 8, i + 1 < MAX_FRAGMENTS, body);
            result = reassemble_ipv4(&mut table, &mut dr, fragment, 0).unwrap();
            assert_eq!(result.is_some(), i == 0);
        }

        let bytes = result.unwrap().to_vec();
        assert_eq!(&bytes[20..], &data[..]);
        assert_eq!(table.active_entries(), 0);
    }

    #[test]
    fn test_non_fragment_passes_through_trimmed() {
        let (mut table, mut dr) = table();
        let mut raw = ipv4_raw(1, 0, 0, &payload(10));
        raw.extend_from_slice(&[0u8; 6]);

        let out = reassemble_ipv4(&mut table, &mut dr, Packet::from_bytes(raw), 0)
            .unwrap()
            .unwrap();
        assert_eq!(out.len(), 30);
        assert_eq!(out.l3_len(), 20);
        assert!(!out.needs_checksum());
        assert_eq!(table.statistics().lookups, 0);
    }

    #[test]
    fn test_link_padding_trimmed_before_storage() {
        let (mut table, mut dr) = table();
        let data = payload(16);

        let mut padded = ipv4_raw(3, IPV4_HDR_MF_FLAG, 0, &data[..8]);
        padded.extend_from_slice(&[0xEE; 18]);
        reassemble_ipv4(&mut table, &mut dr, Packet::from_bytes(padded), 0).unwrap();

        let last = ipv4_fragment(3, 8, false, &data[8..]);
        let datagram = reassemble_ipv4(&mut table, &mut dr, last, 0).unwrap().unwrap();
        assert_eq!(&datagram.to_vec()[20..], &data[..]);
    }

    #[test]
    fn test_malformed_goes_to_death_row() {
        let (mut table, mut dr) = table();

        let err = reassemble_ipv4(&mut table, &mut dr, Packet::from_bytes(vec![0x45; 10]), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            ReassembleError::Malformed(HeaderError::TooShort { .. })
        ));

        // Total length larger than the buffer
        let mut raw = ipv4_raw(1, IPV4_HDR_MF_FLAG, 0, &payload(8));
        raw.truncate(24);
        let err = reassemble_ipv4(&mut table, &mut dr, Packet::from_bytes(raw), 0).unwrap_err();
        assert!(matches!(
            err,
            ReassembleError::Malformed(HeaderError::BadTotalLength { declared: 28, .. })
        ));

        let err = reassemble_ipv6(&mut table, &mut dr, ipv4_fragment(1, 0, true, &[0; 40]), 0)
            .unwrap_err();
        assert_eq!(err, ReassembleError::Malformed(HeaderError::BadVersion(4)));

        assert_eq!(dr.len(), 3);
    }

    #[test]
    fn test_duplicate_first_parks_flow() {
        let pool = BufferPool::new("rx", 16);
        let (mut table, mut dr) = table();
        let data = payload(24);

        let rx = |bytes: Vec<u8>| Packet::from_segment(pool.alloc_copy(&bytes).unwrap());

        let first = rx(ipv4_raw(5, IPV4_HDR_MF_FLAG, 0, &data[..8]));
        let middle = rx(ipv4_raw(5, IPV4_HDR_MF_FLAG, 8, &data[8..16]));
        let again = rx(ipv4_raw(5, IPV4_HDR_MF_FLAG, 0, &data[..8]));

        reassemble_ipv4(&mut table, &mut dr, first, 0).unwrap();
        reassemble_ipv4(&mut table, &mut dr, middle, 0).unwrap();
        let err = reassemble_ipv4(&mut table, &mut dr, again, 0).unwrap_err();

        assert_eq!(err, ReassembleError::DuplicateFirst);
        assert_eq!(dr.len(), 3);
        assert_eq!(table.active_entries(), 0);
        assert_eq!(pool.in_use(), 3);

        dr.drain(4);
        assert_eq!(pool.in_use(), 0);
    }

    #[test]
    fn test_gap_with_matching_byte_count_is_invalid() {
        let (mut table, mut dr) = table();
        let data = payload(32);

        // [0,16) and [8,16) overlap, [16,24) is missing; byte count still matches
        reassemble_ipv4(&mut table, &mut dr, ipv4_fragment(4, 0, true, &data[..16]), 0).unwrap();
        reassemble_ipv4(&mut table, &mut dr, ipv4_fragment(4, 8, true, &data[8..16]), 0).unwrap();
        let err = reassemble_ipv4(&mut table, &mut dr, ipv4_fragment(4, 24, false, &data[24..]), 0)
            .unwrap_err();

        assert_eq!(err, ReassembleError::InvalidFragmentSet);
        assert_eq!(dr.len(), 3);
        assert_eq!(table.active_entries(), 0);
    }

    #[test]
    fn test_oversized_datagram_is_invalid() {
        let (mut table, mut dr) = table();
        let data = payload(65536);

        let first = ipv4_fragment(2, 0, true, &data[..65512]);
        let last = ipv4_fragment(2, 65512, false, &data[65512..]);

        reassemble_ipv4(&mut table, &mut dr, first, 0).unwrap();
        let err = reassemble_ipv4(&mut table, &mut dr, last, 0).unwrap_err();

        assert_eq!(err, ReassembleError::InvalidFragmentSet);
        assert_eq!(table.active_entries(), 0);
    }

    #[test]
    fn test_table_full_parks_packet() {
        let config = TableConfig::new(1, 1, 1, 1_000);
        let mut table = FragTable::new(config.clone()).unwrap();
        let mut dr = DeathRow::for_table(&config);

        reassemble_ipv4(&mut table, &mut dr, ipv4_fragment(1, 0, true, &[0; 8]), 0).unwrap();
        let err = reassemble_ipv4(&mut table, &mut dr, ipv4_fragment(2, 0, true, &[0; 8]), 0)
            .unwrap_err();
        assert_eq!(err, ReassembleError::TableFull);
        assert_eq!(dr.len(), 1);
    }

    #[test]
    fn test_identity_reusable_after_completion() {
        let (mut table, mut dr) = table();
        for round in 0..3u64 {
            let last = ipv4_fragment(11, 8, false, &[1; 8]);
            let first = ipv4_fragment(11, 0, true, &[2; 8]);
            reassemble_ipv4(&mut table, &mut dr, last, round).unwrap();
            let datagram = reassemble_ipv4(&mut table, &mut dr, first, round).unwrap().unwrap();
            assert_eq!(datagram.len(), 36);
        }
        assert_eq!(table.statistics().adds, 3);
        assert!(dr.is_empty());
    }

    #[test]
    fn test_reassemble_ipv6() {
        let (mut table, mut dr) = table();
        let data = payload(40);

        let last = ipv6_fragment(0xdead_beef, 24, false, &data[24..]);
        let first = ipv6_fragment(0xdead_beef, 0, true, &data[..24]);

        assert!(reassemble_ipv6(&mut table, &mut dr, last, 0).unwrap().is_none());
        let datagram = reassemble_ipv6(&mut table, &mut dr, first, 0).unwrap().unwrap();

        let bytes = datagram.to_vec();
        let hdr = Ipv6Header::parse(&bytes).unwrap();
        assert_eq!(hdr.payload_length(), 40);
        assert_eq!(hdr.next_header(), UDP);
        assert_eq!(hdr.src(), Ipv6Addr::new(0x2001, 0xdb8, 0, 0, 0, 0, 0, 1));
        assert!(hdr.fragment_header().is_none());
        assert_eq!(&bytes[IPV6_HDR_LEN..], &data[..]);
        assert_eq!(datagram.l3_len(), IPV6_HDR_LEN);
        assert_eq!(table.active_entries(), 0);
    }

    #[test]
    fn test_ipv6_atomic_fragment_unwrapped() {
        let (mut table, mut dr) = table();
        let data = payload(12);

        let out = reassemble_ipv6(&mut table, &mut dr, ipv6_fragment(1, 0, false, &data), 0)
            .unwrap()
            .unwrap();
        let bytes = out.to_vec();
        assert_eq!(bytes.len(), IPV6_HDR_LEN + 12);
        assert_eq!(Ipv6Header::parse(&bytes).unwrap().next_header(), UDP);
        assert_eq!(table.statistics().lookups, 0);
    }

    #[test]
    fn test_ipv6_non_fragment_passes_through() {
        let (mut table, mut dr) = table();
        let mut raw = vec![0u8; IPV6_HDR_LEN + 4];
        raw[0] = 0x60;
        raw[5] = 4;
        raw[6] = UDP;

        let out = reassemble_ipv6(&mut table, &mut dr, Packet::from_bytes(raw.clone()), 0)
            .unwrap()
            .unwrap();
        assert_eq!(out.to_vec(), raw);

        // Fragment header announced but cut off
        raw[6] = IPPROTO_FRAGMENT;
        let err = reassemble_ipv6(&mut table, &mut dr, Packet::from_bytes(raw), 0).unwrap_err();
        assert!(matches!(
            err,
            ReassembleError::Malformed(HeaderError::TooShort { .. })
        ));
    }

    #[test]
    fn test_fragment_header_fields() {
        let packet = ipv6_fragment(0x0102_0304, 1448, true, &[0; 8]);
        let bytes = packet.to_vec();
        let frag = Ipv6Header::parse(&bytes).unwrap().fragment_header().unwrap();
        assert_eq!(frag.offset_bytes(), 1448);
        assert!(frag.more_fragments());
        assert_eq!(frag.identification(), 0x0102_0304);
        assert_eq!(frag.next_header(), UDP);
    }
}
