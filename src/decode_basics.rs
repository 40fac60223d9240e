use serde::Serialize;

use crate::types::{MacAddr, ParseError, ETHERTYPE_GOOSE, ETHERTYPE_SV, TPID_VLAN};

/// Protocol family of a received frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtoKind {
    Goose,
    Sv,
    Other,
}

/// Outcome of the EtherType sniff on a raw frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classified {
    NonBus,
    Sv { appid: u16 },
    Goose { appid: u16 },
}

impl Classified {
    pub fn kind(&self) -> ProtoKind {
        match self {
            Classified::NonBus => ProtoKind::Other,
            Classified::Sv { .. } => ProtoKind::Sv,
            Classified::Goose { .. } => ProtoKind::Goose,
        }
    }

    pub fn appid(&self) -> Option<u16> {
        match self {
            Classified::NonBus => None,
            Classified::Sv { appid } | Classified::Goose { appid } => Some(*appid),
        }
    }
}

/// Ethernet and IEC 61850 link header in front of a GOOSE or SV APDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EthernetHeader {
    pub dst_addr: MacAddr,
    pub src_addr: MacAddr,
    /// Tag Control Information (VLAN-ID and priority), if tagged
    pub tci: Option<u16>,
    pub ether_type: u16,
    pub appid: u16,
    /// Length field of the link header, APPID through end of APDU
    pub length: u16,
    /// Position of the first APDU byte (after Reserved 2)
    pub pdu_offset: usize,
}

#[inline]
fn read_u16(buffer: &[u8], pos: usize) -> Option<u16> {
    let bytes = buffer.get(pos..pos + 2)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

/// Position of the EtherType field: 16 behind an 802.1Q tag, 12 otherwise.
#[inline]
fn ether_type_offset(buffer: &[u8]) -> Option<usize> {
    match read_u16(buffer, 12)? {
        TPID_VLAN => Some(16),
        _ => Some(12),
    }
}

/// Classifies a frame by EtherType and extracts its APPID.
///
/// Never panics. A buffer too short to hold the EtherType and APPID for
/// its layout is reported as [`Classified::NonBus`].
pub fn classify(frame: &[u8]) -> Classified {
    let Some(offset) = ether_type_offset(frame) else {
        return Classified::NonBus;
    };
    let (Some(ether_type), Some(appid)) = (read_u16(frame, offset), read_u16(frame, offset + 2))
    else {
        return Classified::NonBus;
    };

    match ether_type {
        ETHERTYPE_SV => Classified::Sv { appid },
        ETHERTYPE_GOOSE => Classified::Goose { appid },
        _ => Classified::NonBus,
    }
}

/// Decodes the Ethernet header up to and including Reserved 2.
///
/// # Returns
/// The decoded header, or [`ParseError::TooShort`] when the buffer ends
/// inside the header.
pub fn decode_ethernet_header(buffer: &[u8]) -> Result<EthernetHeader, ParseError> {
    let too_short = ParseError::TooShort { len: buffer.len() };
    let offset = ether_type_offset(buffer).ok_or(too_short)?;
    // EtherType + APPID + Length + Reserved 1 + Reserved 2
    if buffer.len() < offset + 10 {
        return Err(too_short);
    }

    let tci = if offset == 16 {
        read_u16(buffer, 14)
    } else {
        None
    };

    Ok(EthernetHeader {
        dst_addr: MacAddr::from_slice(&buffer[0..6]).ok_or(too_short)?,
        src_addr: MacAddr::from_slice(&buffer[6..12]).ok_or(too_short)?,
        tci,
        ether_type: read_u16(buffer, offset).ok_or(too_short)?,
        appid: read_u16(buffer, offset + 2).ok_or(too_short)?,
        length: read_u16(buffer, offset + 4).ok_or(too_short)?,
        pdu_offset: offset + 10,
    })
}

/// Decodes a BER definite length starting at `buffer_index`.
///
/// Short form (`< 0x80`) is the length itself. Long form `0x8N` is followed
/// by N big-endian length bytes, N in 1..=4.
///
/// # Returns
/// `(length, consumed)` where `consumed` counts the length octets read.
pub fn decode_length(buffer: &[u8], buffer_index: usize) -> Result<(usize, usize), ParseError> {
    let first = *buffer
        .get(buffer_index)
        .ok_or(ParseError::Truncated { offset: buffer_index })?;

    if first & 0x80 == 0 {
        return Ok((first as usize, 1));
    }

    let num_len_bytes = (first & 0x7f) as usize;
    if num_len_bytes == 0 || num_len_bytes > 4 {
        return Err(ParseError::BadLength { offset: buffer_index });
    }
    let bytes = buffer
        .get(buffer_index + 1..buffer_index + 1 + num_len_bytes)
        .ok_or(ParseError::Truncated { offset: buffer_index })?;

    let length = bytes.iter().fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok((length, 1 + num_len_bytes))
}

/// Decodes a tag and its BER length at `buffer_index`, writing both into
/// the provided references.
///
/// # Returns
/// The position of the first value byte.
pub fn decode_tag_length(
    tag: &mut u8,
    length: &mut usize,
    buffer: &[u8],
    buffer_index: usize,
) -> Result<usize, ParseError> {
    *tag = *buffer
        .get(buffer_index)
        .ok_or(ParseError::Truncated { offset: buffer_index })?;
    let (len, consumed) = decode_length(buffer, buffer_index + 1)?;
    *length = len;
    Ok(buffer_index + 1 + consumed)
}

/// Like [`decode_tag_length`] but requires `expected` as the tag.
pub fn expect_tag_length(
    expected: u8,
    length: &mut usize,
    buffer: &[u8],
    buffer_index: usize,
) -> Result<usize, ParseError> {
    let mut tag = 0u8;
    let pos = decode_tag_length(&mut tag, length, buffer, buffer_index)?;
    if tag != expected {
        return Err(ParseError::UnexpectedTag {
            expected,
            found: tag,
            offset: buffer_index,
        });
    }
    Ok(pos)
}

/// Returns the end of a value starting at `value_start`, checked against `bound`.
#[inline]
pub fn value_end(
    element_start: usize,
    value_start: usize,
    length: usize,
    bound: usize,
) -> Result<usize, ParseError> {
    match value_start.checked_add(length) {
        Some(end) if end <= bound => Ok(end),
        _ => Err(ParseError::Truncated {
            offset: element_start,
        }),
    }
}

/// Decodes a big-endian unsigned integer of `length` bytes, zero-extended.
///
/// Up to four bytes are accepted, or five when the first one is the
/// `0x00` that BER puts in front of values with the top bit set.
/// An empty value decodes as zero.
pub fn decode_unsigned(buffer: &[u8], buffer_index: usize, length: usize) -> Result<u32, ParseError> {
    let bytes = buffer
        .get(buffer_index..buffer_index + length)
        .ok_or(ParseError::Truncated { offset: buffer_index })?;

    let bytes = match bytes {
        [0x00, rest @ ..] if rest.len() == 4 => rest,
        _ if length > 4 => {
            return Err(ParseError::BadInteger {
                offset: buffer_index,
                len: length,
            })
        }
        _ => bytes,
    };

    Ok(bytes.iter().fold(0u32, |acc, b| (acc << 8) | *b as u32))
}

/// Walks the TLVs inside a constructed element without interpreting them.
///
/// Every nested element must end inside `start..end`.
pub fn skip_nested(buffer: &[u8], start: usize, end: usize) -> Result<(), ParseError> {
    let mut pos = start;
    let mut tag = 0u8;
    let mut length = 0usize;
    while pos < end {
        let value_start = decode_tag_length(&mut tag, &mut length, &buffer[..end], pos)?;
        pos = value_end(pos, value_start, length, end)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn goose_header(vlan: bool) -> Vec<u8> {
        let mut buffer: Vec<u8> = vec![
            // Destination MAC: 01:0c:cd:01:00:01
            0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01, // Source MAC: 00:1a:b6:03:2f:1c
            0x00, 0x1a, 0xb6, 0x03, 0x2f, 0x1c,
        ];
        if vlan {
            // TPID 0x8100, TCI priority 4, VLAN 0
            buffer.extend_from_slice(&[0x81, 0x00, 0x80, 0x00]);
        }
        buffer.extend_from_slice(&[
            // EtherType: 0x88b8 (GOOSE)
            0x88, 0xb8, // APPID: 0x1001
            0x10, 0x01, // Length: 0x008c (140 bytes)
            0x00, 0x8c, // Reserved1, Reserved2
            0x00, 0x00, 0x00, 0x00,
        ]);
        buffer
    }

    #[test]
    fn test_decode_ethernet_header_without_vlan() {
        let buffer = goose_header(false);
        let header = decode_ethernet_header(&buffer).unwrap();

        assert_eq!(header.dst_addr.octets(), [0x01, 0x0c, 0xcd, 0x01, 0x00, 0x01]);
        assert_eq!(header.src_addr.octets(), [0x00, 0x1a, 0xb6, 0x03, 0x2f, 0x1c]);
        assert_eq!(header.tci, None);
        assert_eq!(header.ether_type, ETHERTYPE_GOOSE);
        assert_eq!(header.appid, 0x1001);
        assert_eq!(header.length, 0x8c);
        assert_eq!(header.pdu_offset, 22);
    }

    #[test]
    fn test_decode_ethernet_header_with_vlan() {
        let buffer = goose_header(true);
        let header = decode_ethernet_header(&buffer).unwrap();

        assert_eq!(header.tci, Some(0x8000));
        assert_eq!(header.ether_type, ETHERTYPE_GOOSE);
        assert_eq!(header.appid, 0x1001);
        assert_eq!(header.pdu_offset, 26);
    }

    #[test]
    fn test_decode_ethernet_header_truncated() {
        let buffer = goose_header(true);
        assert_eq!(
            decode_ethernet_header(&buffer[..20]),
            Err(ParseError::TooShort { len: 20 })
        );
    }

    #[test]
    fn test_classify() {
        assert_eq!(classify(&goose_header(false)), Classified::Goose { appid: 0x1001 });
        assert_eq!(classify(&goose_header(true)), Classified::Goose { appid: 0x1001 });

        let mut sv = goose_header(true);
        sv[17] = 0xba;
        assert_eq!(classify(&sv), Classified::Sv { appid: 0x1001 });
        assert_eq!(classify(&sv).kind(), ProtoKind::Sv);

        let mut ipv4 = goose_header(false);
        ipv4[12] = 0x08;
        ipv4[13] = 0x00;
        assert_eq!(classify(&ipv4), Classified::NonBus);
        assert_eq!(classify(&ipv4).appid(), None);
    }

    #[test]
    fn test_classify_short_buffers() {
        // VLAN tagged GOOSE cut right after the inner EtherType
        let tagged = goose_header(true);
        assert_eq!(classify(&tagged[..18]), Classified::NonBus);
        assert_eq!(classify(&tagged[..20]), Classified::Goose { appid: 0x1001 });

        let untagged = goose_header(false);
        assert_eq!(classify(&untagged[..15]), Classified::NonBus);
        assert_eq!(classify(&untagged[..16]), Classified::Goose { appid: 0x1001 });

        assert_eq!(classify(&[]), Classified::NonBus);
        assert_eq!(classify(&[0x81, 0x00]), Classified::NonBus);
    }

    #[test]
    fn test_decode_length_short_form() {
        assert_eq!(decode_length(&[0x1e], 0), Ok((30, 1)));
        assert_eq!(decode_length(&[0x00], 0), Ok((0, 1)));
        assert_eq!(decode_length(&[0x7f], 0), Ok((127, 1)));
    }

    #[test]
    fn test_decode_length_long_form() {
        assert_eq!(decode_length(&[0x82, 0x01, 0x2c], 0), Ok((300, 3)));
        assert_eq!(decode_length(&[0x81, 0x80], 0), Ok((128, 2)));
        assert_eq!(decode_length(&[0xaa, 0x83, 0x01, 0x00, 0x00], 1), Ok((65536, 4)));
    }

    #[test]
    fn test_decode_length_invalid() {
        // Indefinite form
        assert_eq!(decode_length(&[0x80], 0), Err(ParseError::BadLength { offset: 0 }));
        // Five length bytes
        assert_eq!(
            decode_length(&[0x85, 1, 2, 3, 4, 5], 0),
            Err(ParseError::BadLength { offset: 0 })
        );
        // Missing length bytes
        assert_eq!(
            decode_length(&[0x82, 0x01], 0),
            Err(ParseError::Truncated { offset: 0 })
        );
        assert_eq!(decode_length(&[], 0), Err(ParseError::Truncated { offset: 0 }));
    }

    #[test]
    fn test_decode_tag_length() {
        let buffer = [0x61, 0x81, 0x9a, 0x80];
        let mut tag = 0u8;
        let mut length = 0usize;
        let pos = decode_tag_length(&mut tag, &mut length, &buffer, 0).unwrap();
        assert_eq!(tag, 0x61);
        assert_eq!(length, 0x9a);
        assert_eq!(pos, 3);

        assert_eq!(
            expect_tag_length(0x60, &mut length, &buffer, 0),
            Err(ParseError::UnexpectedTag {
                expected: 0x60,
                found: 0x61,
                offset: 0
            })
        );
    }

    #[test]
    fn test_decode_unsigned() {
        assert_eq!(decode_unsigned(&[0x05], 0, 1), Ok(5));
        assert_eq!(decode_unsigned(&[0x01, 0x00], 0, 2), Ok(256));
        assert_eq!(decode_unsigned(&[0xff, 0xff, 0xff, 0xff], 0, 4), Ok(u32::MAX));
        assert_eq!(decode_unsigned(&[0x00, 0x80, 0x00, 0x00, 0x00], 0, 5), Ok(0x8000_0000));
        assert_eq!(decode_unsigned(&[], 0, 0), Ok(0));
        assert_eq!(
            decode_unsigned(&[0x01, 0x80, 0x00, 0x00, 0x00], 0, 5),
            Err(ParseError::BadInteger { offset: 0, len: 5 })
        );
        assert_eq!(
            decode_unsigned(&[0x01], 0, 2),
            Err(ParseError::Truncated { offset: 0 })
        );
    }

    #[test]
    fn test_skip_nested() {
        // Two booleans inside a structure
        let buffer = [0xa2, 0x06, 0x83, 0x01, 0xff, 0x83, 0x01, 0x00];
        assert_eq!(skip_nested(&buffer, 2, 8), Ok(()));
        // Second element claims more than the container holds
        let broken = [0xa2, 0x06, 0x83, 0x01, 0xff, 0x83, 0x02, 0x00];
        assert_eq!(skip_nested(&broken, 2, 8), Err(ParseError::Truncated { offset: 5 }));
    }
}
