//! Datagram fragmentation.
//!
//! Each output fragment is a fresh header buffer from the header pool followed
//! by borrowed views into the input's segments, taken from the payload pool.
//! Payload bytes are never copied.

use tracing::debug;

use crate::buffer::{BufferPool, Packet, Segment};
use crate::error::FragError;
use crate::header::{
    FRAG_OFFSET_UNITS, IPPROTO_FRAGMENT, IPV4_HDR_MF_FLAG, IPV4_HDR_OFFSET_MASK,
    IPV6_FRAG_HDR_LEN, IPV6_HDR_LEN, IPV6_UNFRAGMENTABLE_EXT, Ipv4Header, Ipv4HeaderMut,
    Ipv6Header, set_ipv6_next_header, set_ipv6_payload_length, write_ipv6_fragment_header,
};

/// Read position over the payload part of a segment chain
struct PayloadCursor<'a> {
    segments: &'a [Segment],
    seg: usize,
    pos: usize,
}

impl<'a> PayloadCursor<'a> {
    fn new(segments: &'a [Segment], start: usize) -> Self {
        let mut cursor = Self {
            segments,
            seg: 0,
            pos: start,
        };
        cursor.skip_exhausted();
        cursor
    }

    fn skip_exhausted(&mut self) {
        while self.seg < self.segments.len() && self.pos >= self.segments[self.seg].len() {
            self.pos -= self.segments[self.seg].len();
            self.seg += 1;
        }
    }

    /// Attach the next `len` payload bytes to `fragment`
    fn fill(
        &mut self,
        pool: &BufferPool,
        fragment: &mut Packet,
        mut len: usize,
    ) -> Result<(), FragError> {
        while len > 0 && self.seg < self.segments.len() {
            let segment = &self.segments[self.seg];
            let take = len.min(segment.len() - self.pos);
            fragment.push(pool.attach(segment, self.pos..self.pos + take)?);
            self.pos += take;
            len -= take;
            self.skip_exhausted();
        }
        Ok(())
    }
}

/// Payload bytes per fragment for `mtu` and an L3 header of `header_len`
///
/// # Panics
///
/// Panics unless the result is a positive multiple of 8.
fn payload_per_fragment(mtu: usize, header_len: usize) -> usize {
    let frag_size = mtu.saturating_sub(header_len);
    assert!(
        frag_size > 0 && frag_size % FRAG_OFFSET_UNITS == 0,
        "MTU {mtu} leaves {frag_size} payload bytes per fragment; need a positive multiple of 8"
    );
    frag_size
}

/// Largest IP datagram the 16-bit length fields allow
const MAX_DATAGRAM: usize = u16::MAX as usize;

fn check_size(end: usize) -> Result<(), FragError> {
    if end > MAX_DATAGRAM {
        return Err(FragError::DatagramTooLarge(end));
    }
    Ok(())
}

fn check_capacity(
    output_capacity: usize,
    frag_size: usize,
    payload: usize,
) -> Result<(), FragError> {
    if output_capacity == 0 || output_capacity.saturating_mul(frag_size) < payload {
        return Err(FragError::OutputTooSmall {
            capacity: output_capacity,
            fragment_size: frag_size,
            payload,
        });
    }
    Ok(())
}

/// Per-fragment layout handed to the header writer
#[derive(Debug, Clone, Copy)]
struct Piece {
    /// Byte offset of this fragment's payload within the input payload
    offset: usize,
    len: usize,
    last: bool,
}

/// Emit fragments into `out`, rolling `out` back on failure
#[allow(clippy::too_many_arguments)]
fn emit(
    input: &Packet,
    prototype: &[u8],
    payload_start: usize,
    frag_size: usize,
    header_pool: &BufferPool,
    payload_pool: &BufferPool,
    out: &mut Vec<Packet>,
    mut write_header: impl FnMut(&mut [u8], Piece),
    checksum: bool,
) -> Result<usize, FragError> {
    let payload = input.len() - payload_start;
    let start = out.len();
    let mut cursor = PayloadCursor::new(input.segments(), payload_start);
    let mut scratch = prototype.to_vec();
    let mut offset = 0;

    loop {
        let len = frag_size.min(payload - offset);
        let piece = Piece {
            offset,
            len,
            last: offset + len >= payload,
        };
        scratch.copy_from_slice(prototype);
        write_header(&mut scratch, piece);

        let built = header_pool.alloc_copy(&scratch).and_then(|head| {
            let mut fragment = Packet::from_segment(head);
            cursor.fill(payload_pool, &mut fragment, len)?;
            Ok(fragment)
        });
        let mut fragment = match built {
            Ok(fragment) => fragment,
            Err(err) => {
                debug!(
                    %err,
                    built = out.len() - start,
                    "fragmentation failed, releasing partial output"
                );
                out.truncate(start);
                return Err(err);
            }
        };

        fragment.set_l3_len(prototype.len());
        if checksum {
            fragment.mark_checksum();
        }
        out.push(fragment);

        offset += len;
        if piece.last {
            return Ok(out.len() - start);
        }
    }
}

/// Split an IPv4 datagram into fragments of at most `mtu` bytes
///
/// `input`'s first segment must hold the complete header, options included;
/// options are copied into every fragment. If `input` is itself a fragment,
/// its offset carries over and its more-fragments flag is kept on the last
/// output fragment. Produced fragments are appended to `out` and their count
/// returned; on error `out` is left as it was.
///
/// # Errors
///
/// - [`FragError::FragmentationDisabled`] if DF is set
/// - [`FragError::DatagramTooLarge`] if the payload, placed at the input's
///   own fragment offset, would end past byte 65535
/// - [`FragError::OutputTooSmall`] if `output_capacity` fragments cannot carry
///   the payload
/// - [`FragError::OutOfMemory`] if either pool runs dry
/// - [`FragError::Malformed`] if the header cannot be parsed
///
/// # Panics
///
/// Panics if `mtu` minus the header length is not a positive multiple of 8.
pub fn fragment_ipv4(
    input: &Packet,
    mtu: usize,
    output_capacity: usize,
    header_pool: &BufferPool,
    payload_pool: &BufferPool,
    out: &mut Vec<Packet>,
) -> Result<usize, FragError> {
    let hdr = Ipv4Header::parse(input.head())?;
    if hdr.dont_fragment() {
        return Err(FragError::FragmentationDisabled);
    }

    let header_len = hdr.header_len();
    let frag_size = payload_per_fragment(mtu, header_len);
    let payload = input.len() - header_len;
    let base_offset = usize::from(hdr.fragment_offset()) * FRAG_OFFSET_UNITS;
    check_size(header_len + base_offset + payload)?;
    check_capacity(output_capacity, frag_size, payload)?;

    let keep_more = hdr.more_fragments();

    emit(
        input,
        hdr.as_bytes(),
        header_len,
        frag_size,
        header_pool,
        payload_pool,
        out,
        |buf, piece| {
            let units = ((base_offset + piece.offset) / FRAG_OFFSET_UNITS) as u16;
            let mut flag_offset = units & IPV4_HDR_OFFSET_MASK;
            if !piece.last || keep_more {
                flag_offset |= IPV4_HDR_MF_FLAG;
            }
            let mut hdr = Ipv4HeaderMut::new(buf);
            hdr.set_total_length((header_len + piece.len) as u16);
            hdr.set_flag_offset(flag_offset);
            hdr.clear_checksum();
        },
        true,
    )
}

/// Split an IPv6 datagram into fragments of at most `mtu` bytes
///
/// Every fragment is the base header, a fragment extension header carrying
/// `identification`, and payload. Same output contract as
/// [`fragment_ipv4`].
///
/// # Errors
///
/// - [`FragError::UnsupportedExtensionHeaders`] if the base header is followed
///   by hop-by-hop, routing, destination options or fragment headers
/// - [`FragError::DatagramTooLarge`] if the payload plus the fragment header
///   exceeds 65535 bytes
/// - otherwise as [`fragment_ipv4`], minus the DF check
///
/// # Panics
///
/// Panics if `mtu` minus 48 is not a positive multiple of 8.
pub fn fragment_ipv6(
    input: &Packet,
    mtu: usize,
    identification: u32,
    output_capacity: usize,
    header_pool: &BufferPool,
    payload_pool: &BufferPool,
    out: &mut Vec<Packet>,
) -> Result<usize, FragError> {
    let hdr = Ipv6Header::parse(input.head())?;
    let next_header = hdr.next_header();
    if IPV6_UNFRAGMENTABLE_EXT.contains(&next_header) || next_header == IPPROTO_FRAGMENT {
        return Err(FragError::UnsupportedExtensionHeaders(next_header));
    }

    let header_len = IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN;
    let frag_size = payload_per_fragment(mtu, header_len);
    let payload = input.len() - IPV6_HDR_LEN;
    check_size(IPV6_FRAG_HDR_LEN + payload)?;
    check_capacity(output_capacity, frag_size, payload)?;

    let mut prototype = [0u8; IPV6_HDR_LEN + IPV6_FRAG_HDR_LEN];
    prototype[..IPV6_HDR_LEN].copy_from_slice(hdr.as_bytes());
    set_ipv6_next_header(&mut prototype, IPPROTO_FRAGMENT);

    emit(
        input,
        &prototype,
        IPV6_HDR_LEN,
        frag_size,
        header_pool,
        payload_pool,
        out,
        |buf, piece| {
            set_ipv6_payload_length(buf, (IPV6_FRAG_HDR_LEN + piece.len) as u16);
            write_ipv6_fragment_header(
                &mut buf[IPV6_HDR_LEN..],
                next_header,
                piece.offset,
                !piece.last,
                identification,
            );
        },
        false,
    )
}
