use crate::encode_basics::*;
use crate::registry::GooseSource;
use crate::types::{EncodeError, MacAddr, UtcTime, ETHERTYPE_GOOSE};

/// Source MAC used by the synthetic publishers.
pub const GENERATOR_MAC: MacAddr = MacAddr::new([0x00, 0x1a, 0xb6, 0x03, 0x2f, 0x1c]);

/// Everything needed to build one GOOSE frame.
#[derive(Debug, Clone, PartialEq)]
pub struct GooseFrame {
    pub header: LinkHeader,
    pub gocb_ref: String,
    /// Milliseconds
    pub time_allowed_to_live: u32,
    pub dataset: String,
    pub go_id: String,
    pub timestamp: UtcTime,
    pub st_num: u32,
    pub sq_num: u32,
    pub simulation: bool,
    pub conf_rev: u32,
    pub nds_com: bool,
    pub num_entries: u32,
    /// Encoded contents of allData
    pub all_data: Vec<u8>,
}

impl GooseFrame {
    /// Frame matching a configured source: one BOOLEAN per dataset entry.
    pub fn for_source(source: &GooseSource) -> Self {
        let all_data = (0..source.num_entries)
            .flat_map(|_| [0x83, 0x01, 0x00])
            .collect();
        GooseFrame {
            header: LinkHeader {
                dst_addr: source.dst_mac,
                src_addr: GENERATOR_MAC,
                vlan: None,
                appid: source.appid,
            },
            gocb_ref: source.gocb_ref.clone(),
            time_allowed_to_live: 2000,
            dataset: source.dataset.clone(),
            go_id: source.go_id.clone(),
            timestamp: UtcTime::default(),
            st_num: 1,
            sq_num: 0,
            simulation: false,
            conf_rev: source.conf_rev,
            nds_com: false,
            num_entries: source.num_entries,
            all_data,
        }
    }
}

/// Returns the number of bytes required for the contents of the GOOSE PDU.
pub fn size_goose_pdu(frame: &GooseFrame) -> usize {
    let unsigned = |value: u32| size_ber(minimal_unsigned_size(value));

    size_ber(frame.gocb_ref.len())
        + unsigned(frame.time_allowed_to_live)
        + size_ber(frame.dataset.len())
        + size_ber(frame.go_id.len())
        + size_ber(8)
        + unsigned(frame.st_num)
        + unsigned(frame.sq_num)
        + size_ber(1)
        + unsigned(frame.conf_rev)
        + size_ber(1)
        + unsigned(frame.num_entries)
        + size_ber(frame.all_data.len())
}

/// Returns `(pdu_length, frame_length)` where `frame_length` is unpadded.
pub fn goose_size(frame: &GooseFrame) -> (usize, usize) {
    let pdu_length = size_goose_pdu(frame);
    let frame_length = link_header_size(&frame.header) + size_ber(pdu_length);
    (pdu_length, frame_length)
}

/// Encodes a GOOSE frame into `buffer`, padding with zeros up to the
/// minimum bus frame length.
///
/// # Returns
/// The number of bytes written, padding included.
pub fn encode_goose_into(frame: &GooseFrame, buffer: &mut [u8]) -> Result<usize, EncodeError> {
    let (pdu_length, frame_length) = goose_size(frame);
    let total = padded_frame_size(frame_length);
    if buffer.len() < total {
        return Err(EncodeError::BufferTooSmall {
            required: total,
            available: buffer.len(),
        });
    }

    let apdu_length = size_ber(pdu_length);
    let mut new_pos = encode_link_header(&frame.header, ETHERTYPE_GOOSE, apdu_length, buffer)?;

    // [61] goosePdu
    new_pos = encode_tag_length(0x61, pdu_length, buffer, new_pos)?;
    // [80] gocbRef
    new_pos = encode_ber(0x80, frame.gocb_ref.as_bytes(), buffer, new_pos)?;
    // [81] timeAllowedToLive
    new_pos = encode_unsigned_integer(0x81, frame.time_allowed_to_live, buffer, new_pos)?;
    // [82] datSet
    new_pos = encode_ber(0x82, frame.dataset.as_bytes(), buffer, new_pos)?;
    // [83] goID
    new_pos = encode_ber(0x83, frame.go_id.as_bytes(), buffer, new_pos)?;
    // [84] t
    new_pos = encode_ber(0x84, &frame.timestamp.to_bytes(), buffer, new_pos)?;
    // [85] stNum
    new_pos = encode_unsigned_integer(0x85, frame.st_num, buffer, new_pos)?;
    // [86] sqNum
    new_pos = encode_unsigned_integer(0x86, frame.sq_num, buffer, new_pos)?;
    // [87] simulation
    new_pos = encode_boolean(0x87, frame.simulation, buffer, new_pos)?;
    // [88] confRev
    new_pos = encode_unsigned_integer(0x88, frame.conf_rev, buffer, new_pos)?;
    // [89] ndsCom
    new_pos = encode_boolean(0x89, frame.nds_com, buffer, new_pos)?;
    // [8a] numDatSetEntries
    new_pos = encode_unsigned_integer(0x8a, frame.num_entries, buffer, new_pos)?;
    // [ab] allData
    new_pos = encode_ber(0xab, &frame.all_data, buffer, new_pos)?;

    buffer[new_pos..total].fill(0);
    Ok(total)
}

pub fn encode_goose(frame: &GooseFrame) -> Result<Vec<u8>, EncodeError> {
    let (_, frame_length) = goose_size(frame);
    let mut buffer = vec![0u8; padded_frame_size(frame_length)];
    let written = encode_goose_into(frame, &mut buffer)?;
    buffer.truncate(written);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_goose::parse_goose;
    use crate::encode_basics::VlanTag;

    #[test]
    fn test_encode_goose_for_source() {
        let source = GooseSource::synthetic(0);
        let mut frame = GooseFrame::for_source(&source);
        frame.st_num = 42;
        frame.sq_num = 200;
        let bytes = encode_goose(&frame).unwrap();

        // Untagged header: EtherType and APPID
        assert_eq!(&bytes[12..16], &[0x88, 0xb8, 0x00, 0x01]);
        // Length field covers APPID through the end of the PDU
        let length = u16::from_be_bytes([bytes[16], bytes[17]]) as usize;
        assert_eq!(length, goose_size(&frame).1 - 14);

        let (passport, state) = parse_goose(&bytes).unwrap();
        assert_eq!(passport.go_id, source.go_id.as_bytes());
        assert_eq!(passport.num_entries, 16);
        assert_eq!(state.st_num, 42);
        assert_eq!(state.sq_num, 200);
        assert_eq!(state.timestamp, Some(UtcTime::default()));
    }

    #[test]
    fn test_encode_goose_pads_short_frames() {
        let mut frame = GooseFrame::for_source(&GooseSource::synthetic(0));
        frame.gocb_ref = "A".into();
        frame.dataset = "B".into();
        frame.go_id = "C".into();
        frame.num_entries = 0;
        frame.all_data.clear();

        let (_, unpadded) = goose_size(&frame);
        assert!(unpadded < 64);
        let bytes = encode_goose(&frame).unwrap();
        assert_eq!(bytes.len(), 64);
        assert!(bytes[unpadded..].iter().all(|b| *b == 0));
        assert!(parse_goose(&bytes).is_ok());
    }

    #[test]
    fn test_encode_goose_long_form_pdu_length() {
        let mut frame = GooseFrame::for_source(&GooseSource::synthetic(0));
        frame.header.vlan = Some(VlanTag {
            priority: 4,
            vlan_id: 0,
        });
        frame.num_entries = 64;
        frame.all_data = vec![0x83, 0x01, 0xff].repeat(64);

        let bytes = encode_goose(&frame).unwrap();
        // 0x61 0x82 xx xx
        assert_eq!(bytes[26], 0x61);
        assert_eq!(bytes[27], 0x82);

        let (passport, _) = parse_goose(&bytes).unwrap();
        assert_eq!(passport.num_entries, 64);
    }

    #[test]
    fn test_encode_goose_into_small_buffer() {
        let frame = GooseFrame::for_source(&GooseSource::synthetic(0));
        let mut buffer = [0u8; 32];
        assert!(matches!(
            encode_goose_into(&frame, &mut buffer),
            Err(EncodeError::BufferTooSmall { available: 32, .. })
        ));
    }
}
