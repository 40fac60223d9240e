use crate::encode_basics::*;
use crate::encode_goose::GENERATOR_MAC;
use crate::registry::SvSource;
use crate::types::{EncodeError, ETHERTYPE_SV};

/// Sample rate of single-ASDU streams (80 samples per 50 Hz cycle).
pub const SV80_SAMPLE_RATE: u16 = 4000;
/// Sample rate of 8-ASDU streams (256 samples per 50 Hz cycle).
pub const SV256_SAMPLE_RATE: u16 = 12800;

/// Current and voltage channels of a 9-2LE dataset, value plus quality each.
const SAMPLE_DATA_LEN: usize = 8 * 8;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvAsdu {
    pub sv_id: String,
    pub smp_cnt: u16,
    pub conf_rev: u32,
    pub smp_synch: u8,
    /// Encoded sample block
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SvFrame {
    pub header: LinkHeader,
    pub security: Option<Vec<u8>>,
    pub asdus: Vec<SvAsdu>,
}

impl SvFrame {
    /// Frame matching a configured stream, with consecutive sample counters
    /// starting at `first_smp_cnt` and wrapping at `sample_rate`.
    pub fn for_source(source: &SvSource, first_smp_cnt: u16, sample_rate: u16) -> Self {
        let asdus = (0..source.num_asdu)
            .map(|i| SvAsdu {
                sv_id: source.sv_id.clone(),
                smp_cnt: ((first_smp_cnt as u32 + i as u32) % sample_rate.max(1) as u32) as u16,
                conf_rev: source.conf_rev,
                smp_synch: 2,
                data: vec![0u8; SAMPLE_DATA_LEN],
            })
            .collect();
        SvFrame {
            header: LinkHeader {
                dst_addr: source.dst_mac,
                src_addr: GENERATOR_MAC,
                vlan: None,
                appid: source.appid,
            },
            security: None,
            asdus,
        }
    }
}

/// Sample rate the synthetic generator uses for a stream with `num_asdu` ASDUs.
pub fn sample_rate_for(num_asdu: u16) -> u16 {
    if num_asdu > 1 {
        SV256_SAMPLE_RATE
    } else {
        SV80_SAMPLE_RATE
    }
}

fn asdu_length(asdu: &SvAsdu) -> usize {
    size_ber(asdu.sv_id.len())
        + size_ber(2) // smpCnt
        + size_ber(4) // confRev
        + size_ber(1) // smpSynch
        + size_ber(asdu.data.len())
}

fn pdu_length(frame: &SvFrame) -> usize {
    let seq_length = frame
        .asdus
        .iter()
        .map(|asdu| size_ber(asdu_length(asdu)))
        .sum::<usize>();
    let security = frame.security.as_ref().map_or(0, |s| size_ber(s.len()));
    size_ber(minimal_unsigned_size(frame.asdus.len() as u32)) + security + size_ber(seq_length)
}

/// Returns `(pdu_length, frame_length)` where `frame_length` is unpadded.
pub fn smv_size(frame: &SvFrame) -> (usize, usize) {
    let pdu_length = pdu_length(frame);
    (pdu_length, link_header_size(&frame.header) + size_ber(pdu_length))
}

fn encode_sav_asdu(asdu: &SvAsdu, buffer: &mut [u8], pos: usize) -> Result<usize, EncodeError> {
    let mut new_pos = encode_tag_length(0x30, asdu_length(asdu), buffer, pos)?;
    // [80] svID
    new_pos = encode_ber(0x80, asdu.sv_id.as_bytes(), buffer, new_pos)?;
    // [82] smpCnt, fixed two bytes
    new_pos = encode_ber(0x82, &asdu.smp_cnt.to_be_bytes(), buffer, new_pos)?;
    // [83] confRev, fixed four bytes
    new_pos = encode_ber(0x83, &asdu.conf_rev.to_be_bytes(), buffer, new_pos)?;
    // [85] smpSynch
    new_pos = encode_ber(0x85, &[asdu.smp_synch], buffer, new_pos)?;
    // [87] sample
    encode_ber(0x87, &asdu.data, buffer, new_pos)
}

/// Encodes an SV frame into `buffer`, padded to the minimum bus frame length.
pub fn encode_smv_into(frame: &SvFrame, buffer: &mut [u8]) -> Result<usize, EncodeError> {
    let (pdu_length, frame_length) = smv_size(frame);
    let total = padded_frame_size(frame_length);
    if buffer.len() < total {
        return Err(EncodeError::BufferTooSmall {
            required: total,
            available: buffer.len(),
        });
    }

    let mut new_pos = encode_link_header(&frame.header, ETHERTYPE_SV, size_ber(pdu_length), buffer)?;

    // [60] savPdu
    new_pos = encode_tag_length(0x60, pdu_length, buffer, new_pos)?;
    // [80] noASDU
    new_pos = encode_unsigned_integer(0x80, frame.asdus.len() as u32, buffer, new_pos)?;
    // [81] security
    if let Some(security) = &frame.security {
        new_pos = encode_ber(0x81, security, buffer, new_pos)?;
    }
    // [a2] sequence of ASDU
    let seq_length = frame
        .asdus
        .iter()
        .map(|asdu| size_ber(asdu_length(asdu)))
        .sum::<usize>();
    new_pos = encode_tag_length(0xa2, seq_length, buffer, new_pos)?;
    for asdu in &frame.asdus {
        new_pos = encode_sav_asdu(asdu, buffer, new_pos)?;
    }

    buffer[new_pos..total].fill(0);
    Ok(total)
}

pub fn encode_smv(frame: &SvFrame) -> Result<Vec<u8>, EncodeError> {
    let (_, frame_length) = smv_size(frame);
    let mut buffer = vec![0u8; padded_frame_size(frame_length)];
    let written = encode_smv_into(frame, &mut buffer)?;
    buffer.truncate(written);
    Ok(buffer)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_smv::parse_sv;

    #[test]
    fn test_encode_smv_single_asdu() {
        let source = SvSource::synthetic(0, 1);
        let frame = SvFrame::for_source(&source, 3999, SV80_SAMPLE_RATE);
        let bytes = encode_smv(&frame).unwrap();

        assert_eq!(&bytes[12..16], &[0x88, 0xba, 0x00, 0x01]);
        let (passport, state) = parse_sv(&bytes).unwrap();
        assert_eq!(passport.sv_id, b"SVID0001");
        assert_eq!(passport.num_asdu, 1);
        assert_eq!(passport.conf_rev, 1);
        assert_eq!(state.smp_cnt, 3999);
        assert_eq!(state.last_smp_cnt, 3999);
    }

    #[test]
    fn test_encode_smv_eight_asdus_wrap() {
        let source = SvSource::synthetic(4, 8);
        let frame = SvFrame::for_source(&source, 12796, SV256_SAMPLE_RATE);
        let counters: Vec<u16> = frame.asdus.iter().map(|a| a.smp_cnt).collect();
        assert_eq!(counters, vec![12796, 12797, 12798, 12799, 0, 1, 2, 3]);

        let bytes = encode_smv(&frame).unwrap();
        let (passport, state) = parse_sv(&bytes).unwrap();
        assert_eq!(passport.num_asdu, 8);
        assert_eq!(passport.appid, 5);
        assert_eq!(state.smp_cnt, 12796);
        assert_eq!(state.last_smp_cnt, 3);
    }

    #[test]
    fn test_encode_smv_with_security() {
        let source = SvSource::synthetic(0, 1);
        let mut frame = SvFrame::for_source(&source, 10, SV80_SAMPLE_RATE);
        frame.security = Some(vec![0x11; 12]);

        let bytes = encode_smv(&frame).unwrap();
        let (passport, state) = parse_sv(&bytes).unwrap();
        assert_eq!(passport.sv_id, b"SVID0001");
        assert_eq!(state.smp_cnt, 10);
    }

    #[test]
    fn test_sample_rate_for() {
        assert_eq!(sample_rate_for(1), SV80_SAMPLE_RATE);
        assert_eq!(sample_rate_for(8), SV256_SAMPLE_RATE);
    }
}
