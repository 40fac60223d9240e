//! Per-source sequence integrity.
//!
//! Trackers never reject a frame. They count anomalies and always store
//! the newest counters.

use serde::Serialize;

use crate::decode_goose::GooseState;
use crate::decode_smv::SvState;

/// Last seen stNum/sqNum of a GOOSE publisher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct GooseSequence {
    pub st_num: u32,
    pub sq_num: u32,
    pub errors: u64,
}

impl GooseSequence {
    /// Records a frame. Returns true if it was counted as an anomaly.
    ///
    /// A state number that changed by anything other than +1 is a lost or
    /// reordered state change. A frame repeating both stNum and sqNum of the
    /// previous one is a duplicate.
    pub fn update(&mut self, state: &GooseState) -> bool {
        let jumped = state.st_num != self.st_num && state.st_num != self.st_num.wrapping_add(1);
        let duplicate = state.st_num == self.st_num && state.sq_num == self.sq_num;
        let anomaly = jumped || duplicate;
        if anomaly {
            self.errors += 1;
        }
        self.st_num = state.st_num;
        self.sq_num = state.sq_num;
        anomaly
    }
}

/// Last seen smpCnt of an SV stream.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SvSequence {
    pub smp_cnt: u16,
    pub errors: u64,
}

impl SvSequence {
    /// Records a frame. Returns true if it was counted as an anomaly.
    ///
    /// The first sample must follow the stored one; 0 is always accepted as
    /// the wrap at the sample rate. The last sample of the frame is stored.
    pub fn update(&mut self, state: &SvState) -> bool {
        let anomaly = state.smp_cnt != 0 && state.smp_cnt != self.smp_cnt.wrapping_add(1);
        if anomaly {
            self.errors += 1;
        }
        self.smp_cnt = state.last_smp_cnt;
        anomaly
    }
}
