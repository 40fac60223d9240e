use crate::decode_basics::*;
use crate::types::{MacAddr, ParseError, ETHERTYPE_SV, MIN_BUS_FRAME_LEN};

/// Identity of a Sampled Values stream as carried in one frame.
///
/// `sv_id` borrows from the frame buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SvPassport<'a> {
    pub dst_mac: MacAddr,
    pub appid: u16,
    pub num_asdu: u16,
    pub conf_rev: u32,
    pub sv_id: &'a [u8],
}

/// Sample counters of one SV frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SvState {
    /// smpCnt of the first ASDU
    pub smp_cnt: u16,
    /// smpCnt of the last ASDU; equal to `smp_cnt` for single-ASDU frames
    pub last_smp_cnt: u16,
}

/// Returns true if the frame is a Sampled Values frame, tagged or untagged.
pub fn is_smv_frame(buffer: &[u8]) -> bool {
    matches!(classify(buffer), Classified::Sv { .. })
}

/// Decodes a tag and a single-byte length inside an ASDU.
///
/// Long-form lengths are not supported at this level and are reported
/// instead of being misread.
fn decode_short_tag_length(
    tag: &mut u8,
    length: &mut usize,
    buffer: &[u8],
    buffer_index: usize,
) -> Result<usize, ParseError> {
    let header = buffer
        .get(buffer_index..buffer_index + 2)
        .ok_or(ParseError::Truncated { offset: buffer_index })?;
    if header[1] & 0x80 != 0 {
        return Err(ParseError::LongFormLength {
            offset: buffer_index + 1,
        });
    }
    *tag = header[0];
    *length = header[1] as usize;
    Ok(buffer_index + 2)
}

/// Fields of one ASDU that matter for identity and sequencing.
#[derive(Default)]
struct AsduFields<'a> {
    sv_id: &'a [u8],
    smp_cnt: u16,
    conf_rev: u32,
}

fn decode_asdu<'a>(buffer: &'a [u8], start: usize, end: usize) -> Result<AsduFields<'a>, ParseError> {
    let mut fields = AsduFields::default();
    let mut pos = start;
    let mut tag = 0u8;
    let mut length = 0usize;

    while pos < end {
        let value_start = decode_short_tag_length(&mut tag, &mut length, buffer, pos)?;
        let element_end = value_end(pos, value_start, length, end)?;

        match tag {
            0x80 => fields.sv_id = &buffer[value_start..element_end],
            0x82 => {
                if length != 2 {
                    return Err(ParseError::BadInteger {
                        offset: value_start,
                        len: length,
                    });
                }
                fields.smp_cnt = decode_unsigned(buffer, value_start, length)? as u16;
            }
            0x83 => {
                if length != 4 {
                    return Err(ParseError::BadInteger {
                        offset: value_start,
                        len: length,
                    });
                }
                fields.conf_rev = decode_unsigned(buffer, value_start, length)?;
            }
            // datSet, refrTm, smpSynch, smpRate, data, smpMod
            _ => {}
        }
        pos = element_end;
    }
    Ok(fields)
}

/// Parses an SV frame into its passport and sample counters without copying.
///
/// `svID`, `confRev` and the first `smpCnt` come from the first ASDU. When
/// the frame carries more than one ASDU the rest are walked only for their
/// `smpCnt`, which ends up in [`SvState::last_smp_cnt`].
///
/// Container headers (`savPdu`, `seqASDU`, `ASDU`) accept any BER length;
/// fields inside an ASDU must use single-byte lengths.
pub fn parse_sv(frame: &[u8]) -> Result<(SvPassport<'_>, SvState), ParseError> {
    if frame.len() < MIN_BUS_FRAME_LEN {
        return Err(ParseError::TooShort { len: frame.len() });
    }
    let header = decode_ethernet_header(frame)?;
    if header.ether_type != ETHERTYPE_SV {
        return Err(ParseError::WrongEtherType {
            ether_type: header.ether_type,
        });
    }

    let mut length = 0usize;
    let pdu_start = expect_tag_length(0x60, &mut length, frame, header.pdu_offset)?;
    let bound = pdu_start.saturating_add(length).min(frame.len());
    let pdu = &frame[..bound];

    let mut pos = pdu_start;
    let mut tag = 0u8;

    // noASDU
    let mut num_asdu = None;
    if pdu.get(pos) == Some(&0x80) {
        let value_start = decode_short_tag_length(&mut tag, &mut length, pdu, pos)?;
        let end = value_end(pos, value_start, length, bound)?;
        let value = decode_unsigned(pdu, value_start, length)?;
        num_asdu = Some(u16::try_from(value).map_err(|_| ParseError::BadInteger {
            offset: value_start,
            len: length,
        })?);
        pos = end;
    }

    // security
    if pdu.get(pos) == Some(&0x81) {
        let value_start = decode_tag_length(&mut tag, &mut length, pdu, pos)?;
        pos = value_end(pos, value_start, length, bound)?;
    }

    let seq_start = expect_tag_length(0xa2, &mut length, pdu, pos)?;
    let seq_end = value_end(pos, seq_start, length, bound)?;

    let mut first: Option<AsduFields<'_>> = None;
    let mut last_smp_cnt = 0u16;
    let mut seen = 0u16;
    pos = seq_start;
    while pos < seq_end {
        let asdu_start = expect_tag_length(0x30, &mut length, &pdu[..seq_end], pos)?;
        let asdu_end = value_end(pos, asdu_start, length, seq_end)?;
        let fields = decode_asdu(pdu, asdu_start, asdu_end)?;
        last_smp_cnt = fields.smp_cnt;
        if first.is_none() {
            first = Some(fields);
        }
        seen = seen.saturating_add(1);
        pos = asdu_end;

        // Later ASDUs only matter when the frame says there are some
        if num_asdu.is_some_and(|n| seen >= n) {
            break;
        }
    }

    let first = first.unwrap_or_default();
    let passport = SvPassport {
        dst_mac: header.dst_addr,
        appid: header.appid,
        num_asdu: num_asdu.unwrap_or(seen),
        conf_rev: first.conf_rev,
        sv_id: first.sv_id,
    };
    let state = SvState {
        smp_cnt: first.smp_cnt,
        last_smp_cnt,
    };
    Ok((passport, state))
}
