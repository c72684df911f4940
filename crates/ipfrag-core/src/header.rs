//! IPv4 header and IPv6 fragment-extension accessors.
//!
//! Zero-copy views over the start of a packet. All multi-byte fields are
//! big-endian (network byte order).

use std::net::{Ipv4Addr, Ipv6Addr};

use crate::error::HeaderError;

/// Minimum IPv4 header size (no options)
pub const IPV4_HDR_LEN: usize = 20;

/// Don't-fragment flag in the flags/offset word
pub const IPV4_HDR_DF_FLAG: u16 = 0x4000;

/// More-fragments flag in the flags/offset word
pub const IPV4_HDR_MF_FLAG: u16 = 0x2000;

/// Fragment offset bits in the flags/offset word
pub const IPV4_HDR_OFFSET_MASK: u16 = 0x1FFF;

/// Fragment offsets are expressed in units of this many bytes
pub const FRAG_OFFSET_UNITS: usize = 8;

/// Fixed IPv6 header size
pub const IPV6_HDR_LEN: usize = 40;

/// IPv6 fragment extension header size
pub const IPV6_FRAG_HDR_LEN: usize = 8;

/// Next-header value of the IPv6 fragment extension header
pub const IPPROTO_FRAGMENT: u8 = 44;

/// Next-header values that belong to the unfragmentable part of an IPv6 packet
pub const IPV6_UNFRAGMENTABLE_EXT: [u8; 3] = [0, 43, 60];

/// Largest datagram the 16-bit length fields can describe
pub const MAX_DATAGRAM_LEN: usize = u16::MAX as usize;

fn be16(raw: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([raw[at], raw[at + 1]])
}

fn put_be16(raw: &mut [u8], at: usize, value: u16) {
    raw[at..at + 2].copy_from_slice(&value.to_be_bytes());
}

/// Read-only IPv4 header view
#[derive(Debug, Clone, Copy)]
pub struct Ipv4Header<'a> {
    raw: &'a [u8],
}

impl<'a> Ipv4Header<'a> {
    /// Parse an IPv4 header from the start of `data`
    pub fn parse(data: &'a [u8]) -> Result<Self, HeaderError> {
        if data.len() < IPV4_HDR_LEN {
            return Err(HeaderError::TooShort {
                expected: IPV4_HDR_LEN,
                actual: data.len(),
            });
        }

        let version = data[0] >> 4;
        if version != 4 {
            return Err(HeaderError::BadVersion(version));
        }

        let header_len = usize::from(data[0] & 0x0F) * 4;
        if header_len < IPV4_HDR_LEN {
            return Err(HeaderError::BadHeaderLength(header_len));
        }
        if data.len() < header_len {
            return Err(HeaderError::TooShort {
                expected: header_len,
                actual: data.len(),
            });
        }

        Ok(Self {
            raw: &data[..header_len],
        })
    }

    /// Header length in bytes, options included
    pub fn header_len(&self) -> usize {
        self.raw.len()
    }

    /// Raw header bytes
    pub fn as_bytes(&self) -> &'a [u8] {
        self.raw
    }

    /// Total datagram length (header + payload)
    pub fn total_length(&self) -> u16 {
        be16(self.raw, 2)
    }

    /// Identification field
    pub fn identification(&self) -> u16 {
        be16(self.raw, 4)
    }

    /// Raw flags/offset word
    pub fn flag_offset(&self) -> u16 {
        be16(self.raw, 6)
    }

    /// Don't-fragment flag
    pub fn dont_fragment(&self) -> bool {
        self.flag_offset() & IPV4_HDR_DF_FLAG != 0
    }

    /// More-fragments flag
    pub fn more_fragments(&self) -> bool {
        self.flag_offset() & IPV4_HDR_MF_FLAG != 0
    }

    /// Fragment offset in 8-byte units
    pub fn fragment_offset(&self) -> u16 {
        self.flag_offset() & IPV4_HDR_OFFSET_MASK
    }

    /// Fragment offset in bytes
    pub fn fragment_offset_bytes(&self) -> usize {
        usize::from(self.fragment_offset()) * FRAG_OFFSET_UNITS
    }

    /// True unless both the more-fragments flag and the offset are zero
    pub fn is_fragment(&self) -> bool {
        is_fragmented(self.flag_offset())
    }

    /// Upper-layer protocol
    pub fn protocol(&self) -> u8 {
        self.raw[9]
    }

    /// Header checksum field
    pub fn checksum(&self) -> u16 {
        be16(self.raw, 10)
    }

    /// Source address
    pub fn src(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.raw[12], self.raw[13], self.raw[14], self.raw[15])
    }

    /// Destination address
    pub fn dst(&self) -> Ipv4Addr {
        Ipv4Addr::new(self.raw[16], self.raw[17], self.raw[18], self.raw[19])
    }
}

/// True unless both the more-fragments flag and the offset are zero
pub fn is_fragmented(flag_offset: u16) -> bool {
    flag_offset & (IPV4_HDR_MF_FLAG | IPV4_HDR_OFFSET_MASK) != 0
}

/// Writable IPv4 header view
///
/// The caller guarantees `raw` holds at least [`IPV4_HDR_LEN`] bytes.
#[derive(Debug)]
pub struct Ipv4HeaderMut<'a> {
    raw: &'a mut [u8],
}

impl<'a> Ipv4HeaderMut<'a> {
    /// Wrap a buffer already validated by [`Ipv4Header::parse`]
    pub fn new(raw: &'a mut [u8]) -> Self {
        debug_assert!(raw.len() >= IPV4_HDR_LEN);
        Self { raw }
    }

    /// Set the total length
    pub fn set_total_length(&mut self, len: u16) {
        put_be16(self.raw, 2, len);
    }

    /// Set the identification field
    pub fn set_identification(&mut self, id: u16) {
        put_be16(self.raw, 4, id);
    }

    /// Set the raw flags/offset word
    pub fn set_flag_offset(&mut self, value: u16) {
        put_be16(self.raw, 6, value);
    }

    /// Zero the checksum field (recomputed downstream)
    pub fn clear_checksum(&mut self) {
        put_be16(self.raw, 10, 0);
    }
}

/// Read-only IPv6 base header view
#[derive(Debug, Clone, Copy)]
pub struct Ipv6Header<'a> {
    raw: &'a [u8],
}

impl<'a> Ipv6Header<'a> {
    /// Parse the fixed IPv6 header from the start of `data`
    pub fn parse(data: &'a [u8]) -> Result<Self, HeaderError> {
        if data.len() < IPV6_HDR_LEN {
            return Err(HeaderError::TooShort {
                expected: IPV6_HDR_LEN,
                actual: data.len(),
            });
        }
        let version = data[0] >> 4;
        if version != 6 {
            return Err(HeaderError::BadVersion(version));
        }
        Ok(Self { raw: data })
    }

    /// Raw bytes of the fixed header
    pub fn as_bytes(&self) -> &'a [u8] {
        &self.raw[..IPV6_HDR_LEN]
    }

    /// Payload length (everything after the fixed header)
    pub fn payload_length(&self) -> u16 {
        be16(self.raw, 4)
    }

    /// Next-header field
    pub fn next_header(&self) -> u8 {
        self.raw[6]
    }

    /// Source address
    pub fn src(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.raw[8..24]);
        Ipv6Addr::from(octets)
    }

    /// Destination address
    pub fn dst(&self) -> Ipv6Addr {
        let mut octets = [0u8; 16];
        octets.copy_from_slice(&self.raw[24..40]);
        Ipv6Addr::from(octets)
    }

    /// Fragment extension header directly following the base header, if any
    pub fn fragment_header(&self) -> Option<Ipv6FragmentHeader<'a>> {
        if self.next_header() != IPPROTO_FRAGMENT {
            return None;
        }
        let end = IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN;
        self.raw.get(IPV6_HDR_LEN..end).map(|raw| Ipv6FragmentHeader { raw })
    }
}

/// IPv6 fragment extension header view
#[derive(Debug, Clone, Copy)]
pub struct Ipv6FragmentHeader<'a> {
    raw: &'a [u8],
}

impl Ipv6FragmentHeader<'_> {
    /// Next header of the fragmentable part
    pub fn next_header(&self) -> u8 {
        self.raw[0]
    }

    /// Fragment offset in bytes
    pub fn offset_bytes(&self) -> usize {
        usize::from(be16(self.raw, 2) & 0xFFF8)
    }

    /// More-fragments flag
    pub fn more_fragments(&self) -> bool {
        be16(self.raw, 2) & 0x0001 != 0
    }

    /// Identification
    pub fn identification(&self) -> u32 {
        u32::from_be_bytes([self.raw[4], self.raw[5], self.raw[6], self.raw[7]])
    }
}

/// Write an IPv6 fragment extension header into the first 8 bytes of `buf`
pub fn write_ipv6_fragment_header(
    buf: &mut [u8],
    next_header: u8,
    offset_bytes: usize,
    more_fragments: bool,
    identification: u32,
) {
    debug_assert_eq!(offset_bytes % FRAG_OFFSET_UNITS, 0);
    buf[0] = next_header;
    buf[1] = 0;
    let frag_data = (offset_bytes as u16 & 0xFFF8) | u16::from(more_fragments);
    put_be16(buf, 2, frag_data);
    buf[4..8].copy_from_slice(&identification.to_be_bytes());
}

/// Set the payload length of an IPv6 base header in `buf`
pub fn set_ipv6_payload_length(buf: &mut [u8], len: u16) {
    put_be16(buf, 4, len);
}

/// Set the next-header field of an IPv6 base header in `buf`
pub fn set_ipv6_next_header(buf: &mut [u8], next_header: u8) {
    buf[6] = next_header;
}
