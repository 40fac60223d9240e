use crate::types::{EncodeError, MacAddr, MIN_BUS_FRAME_LEN, TPID_VLAN};

/// IEEE 802.1Q tag written in front of the EtherType.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VlanTag {
    /// Priority code point (0-7)
    pub priority: u8,
    /// VLAN identifier (0-4095)
    pub vlan_id: u16,
}

impl VlanTag {
    pub fn tci(&self) -> u16 {
        ((self.priority as u16 & 0x07) << 13) | (self.vlan_id & 0x0fff)
    }
}

/// Link header of a GOOSE or SV frame, up to the APPID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkHeader {
    pub dst_addr: MacAddr,
    pub src_addr: MacAddr,
    pub vlan: Option<VlanTag>,
    pub appid: u16,
}

/// Returns the number of bytes required to encode the length field in ASN.1 BER format.
///
/// - 1 byte for values < 128 (short form)
/// - 2 bytes for values < 256 (0x81 + 1 byte)
/// - 3 bytes for values < 65536 (0x82 + 2 bytes)
/// - 4 bytes for larger values (0x83 + 3 bytes)
pub fn size_length(value: usize) -> usize {
    if value < 0x80 {
        1
    } else if value < 0x100 {
        2
    } else if value < 0x10000 {
        3
    } else {
        4
    }
}

/// Size of a complete tag, length, value triple with a value of `value_len` bytes.
pub fn size_ber(value_len: usize) -> usize {
    1 + size_length(value_len) + value_len
}

/// Number of value bytes of an unsigned integer in minimal BER form,
/// including the leading zero needed when the top bit is set.
pub fn minimal_unsigned_size(value: u32) -> usize {
    let bytes = value.to_be_bytes();
    let start = bytes.iter().position(|b| *b != 0).unwrap_or(3);
    let size = 4 - start;
    if bytes[start] & 0x80 != 0 {
        size + 1
    } else {
        size
    }
}

fn ensure_capacity(buffer: &[u8], buffer_index: usize, required: usize) -> Result<(), EncodeError> {
    let available = buffer.len().saturating_sub(buffer_index);
    if available < required {
        return Err(EncodeError::BufferTooSmall {
            required,
            available,
        });
    }
    Ok(())
}

/// Encodes an ASN.1 tag and its length field using BER rules.
///
/// # Parameters
/// - `tag`: The ASN.1 tag to write.
/// - `value`: The length value to encode.
/// - `buffer`: The output buffer.
/// - `buffer_index`: The position in the buffer to start writing.
///
/// # Returns
/// Result with the new position in the buffer after writing the tag and length, or EncodeError.
pub fn encode_tag_length(
    tag: u8,
    value: usize,
    buffer: &mut [u8],
    buffer_index: usize,
) -> Result<usize, EncodeError> {
    if value >= 1 << 24 {
        return Err(EncodeError::LengthOutOfRange { value });
    }
    let length_size = size_length(value);
    ensure_capacity(buffer, buffer_index, 1 + length_size)?;

    let mut new_pos = buffer_index;
    buffer[new_pos] = tag;
    new_pos += 1;

    if length_size == 1 {
        buffer[new_pos] = value as u8;
        return Ok(new_pos + 1);
    }

    let num_len_bytes = length_size - 1;
    buffer[new_pos] = 0x80 | num_len_bytes as u8;
    new_pos += 1;
    let bytes = (value as u32).to_be_bytes();
    buffer[new_pos..new_pos + num_len_bytes].copy_from_slice(&bytes[4 - num_len_bytes..]);
    Ok(new_pos + num_len_bytes)
}

/// Encodes an ASN.1 BER element (tag, length, value) into the buffer at the given position.
///
/// # Returns
/// Result with the new position in the buffer after writing, or EncodeError.
pub fn encode_ber(
    tag: u8,
    value: &[u8],
    buffer: &mut [u8],
    buffer_index: usize,
) -> Result<usize, EncodeError> {
    ensure_capacity(buffer, buffer_index, size_ber(value.len()))?;
    let pos = encode_tag_length(tag, value.len(), buffer, buffer_index)?;
    buffer[pos..pos + value.len()].copy_from_slice(value);
    Ok(pos + value.len())
}

/// Encodes a BOOLEAN as 0xff / 0x00.
pub fn encode_boolean(
    tag: u8,
    value: bool,
    buffer: &mut [u8],
    buffer_index: usize,
) -> Result<usize, EncodeError> {
    encode_ber(tag, &[if value { 0xff } else { 0x00 }], buffer, buffer_index)
}

/// Encodes an unsigned integer in minimal BER form, prepending a zero byte
/// when the most significant bit is set.
pub fn encode_unsigned_integer(
    tag: u8,
    value: u32,
    buffer: &mut [u8],
    buffer_index: usize,
) -> Result<usize, EncodeError> {
    let mut bytes = [0u8; 5];
    bytes[1..].copy_from_slice(&value.to_be_bytes());
    let size = minimal_unsigned_size(value);
    encode_ber(tag, &bytes[5 - size..], buffer, buffer_index)
}

/// Size of the link header including Length and both Reserved fields.
pub fn link_header_size(header: &LinkHeader) -> usize {
    let vlan = if header.vlan.is_some() { 4 } else { 0 };
    12 + vlan + 10
}

/// Writes the link header of a GOOSE or SV frame.
///
/// `apdu_len` is the size of the encoded APDU; the Length field is that
/// plus the eight bytes of APPID, Length and the reserved fields.
pub fn encode_link_header(
    header: &LinkHeader,
    ether_type: u16,
    apdu_len: usize,
    buffer: &mut [u8],
) -> Result<usize, EncodeError> {
    let length = u16::try_from(apdu_len + 8).map_err(|_| EncodeError::FrameTooLarge {
        len: apdu_len + 8,
    })?;
    ensure_capacity(buffer, 0, link_header_size(header))?;

    let mut new_pos = 0;
    buffer[new_pos..new_pos + 6].copy_from_slice(&header.dst_addr.octets());
    new_pos += 6;
    buffer[new_pos..new_pos + 6].copy_from_slice(&header.src_addr.octets());
    new_pos += 6;

    if let Some(vlan) = header.vlan {
        buffer[new_pos..new_pos + 2].copy_from_slice(&TPID_VLAN.to_be_bytes());
        buffer[new_pos + 2..new_pos + 4].copy_from_slice(&vlan.tci().to_be_bytes());
        new_pos += 4;
    }

    buffer[new_pos..new_pos + 2].copy_from_slice(&ether_type.to_be_bytes());
    new_pos += 2;
    buffer[new_pos..new_pos + 2].copy_from_slice(&header.appid.to_be_bytes());
    new_pos += 2;
    buffer[new_pos..new_pos + 2].copy_from_slice(&length.to_be_bytes());
    new_pos += 2;
    // Reserved 1 and Reserved 2
    buffer[new_pos..new_pos + 4].fill(0);
    new_pos += 4;

    Ok(new_pos)
}

/// Total buffer size for a frame, padded to the minimum bus frame length.
pub fn padded_frame_size(encoded_len: usize) -> usize {
    encoded_len.max(MIN_BUS_FRAME_LEN)
}
