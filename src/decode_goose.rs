use crate::decode_basics::*;
use crate::types::{MacAddr, ParseError, UtcTime, ETHERTYPE_GOOSE, MIN_BUS_FRAME_LEN};

/// Identity of a GOOSE publisher as carried in one frame.
///
/// The references borrow from the frame buffer and are only valid while
/// the frame is being processed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GoosePassport<'a> {
    pub dst_mac: MacAddr,
    pub appid: u16,
    pub num_entries: u32,
    pub conf_rev: u32,
    pub gocb_ref: &'a [u8],
    pub dataset: &'a [u8],
    pub go_id: &'a [u8],
}

/// Per-frame sequencing values of a GOOSE publisher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct GooseState {
    /// Set only when `t` is a well-formed 8 byte UtcTime.
    pub timestamp: Option<UtcTime>,
    pub st_num: u32,
    pub sq_num: u32,
}

/// Returns true if the frame is a GOOSE frame, tagged or untagged.
pub fn is_goose_frame(buffer: &[u8]) -> bool {
    matches!(classify(buffer), Classified::Goose { .. })
}

/// Parses a GOOSE frame into its passport and sequencing state without copying.
///
/// The walk over the PDU is bounded by the declared PDU length and by the
/// end of the buffer, whichever comes first, so Ethernet padding is ignored.
/// `gocbRef`, `datSet` and `goID` are mandatory; everything else keeps its
/// zero value when absent.
///
/// # Errors
/// - framing: frame shorter than 64 bytes or not a GOOSE EtherType
/// - structural: missing `0x61`, broken BER lengths, elements running past the PDU
/// - incomplete: a mandatory reference is missing
pub fn parse_goose(frame: &[u8]) -> Result<(GoosePassport<'_>, GooseState), ParseError> {
    if frame.len() < MIN_BUS_FRAME_LEN {
        return Err(ParseError::TooShort { len: frame.len() });
    }
    let header = decode_ethernet_header(frame)?;
    if header.ether_type != ETHERTYPE_GOOSE {
        return Err(ParseError::WrongEtherType {
            ether_type: header.ether_type,
        });
    }

    let mut pdu_length = 0usize;
    let pdu_start = expect_tag_length(0x61, &mut pdu_length, frame, header.pdu_offset)?;
    let bound = pdu_start.saturating_add(pdu_length).min(frame.len());
    let pdu = &frame[..bound];

    let mut gocb_ref = None;
    let mut dataset = None;
    let mut go_id = None;
    let mut num_entries = 0u32;
    let mut conf_rev = 0u32;
    let mut state = GooseState::default();

    let mut pos = pdu_start;
    let mut tag = 0u8;
    let mut length = 0usize;
    while pos < bound {
        let value_start = decode_tag_length(&mut tag, &mut length, pdu, pos)?;
        let end = value_end(pos, value_start, length, bound)?;
        let value = &pdu[value_start..end];

        match tag {
            0x80 => gocb_ref = Some(value),
            0x82 => dataset = Some(value),
            0x83 => go_id = Some(value),
            0x84 => {
                if let Ok(bytes) = <[u8; 8]>::try_from(value) {
                    state.timestamp = Some(UtcTime::from_bytes(bytes));
                }
            }
            0x85 => state.st_num = decode_unsigned(pdu, value_start, length)?,
            0x86 => state.sq_num = decode_unsigned(pdu, value_start, length)?,
            0x88 => conf_rev = decode_unsigned(pdu, value_start, length)?,
            0x8a => num_entries = decode_unsigned(pdu, value_start, length)?,
            0x30 | 0x31 | 0xa0 | 0xa1 => skip_nested(pdu, value_start, end)?,
            // timeAllowedToLive, simulation, ndsCom, allData and anything unknown
            _ => {}
        }
        pos = end;
    }

    let passport = GoosePassport {
        dst_mac: header.dst_addr,
        appid: header.appid,
        num_entries,
        conf_rev,
        gocb_ref: gocb_ref.ok_or(ParseError::Incomplete { field: "gocbRef" })?,
        dataset: dataset.ok_or(ParseError::Incomplete { field: "datSet" })?,
        go_id: go_id.ok_or(ParseError::Incomplete { field: "goID" })?,
    };
    Ok((passport, state))
}
