//! Frame sources feeding the probe.
//!
//! The probe polls an [`RxQueue`] for bursts of frames in pool buffers. The
//! NIC-facing implementation lives in the binary; this module provides a
//! replay queue for prepared frames and a generator for the synthetic
//! test setup.

use tracing::warn;

use crate::encode_goose::{encode_goose_into, GooseFrame};
use crate::encode_smv::{encode_smv_into, sample_rate_for, SvFrame};
use crate::pool::{BufferPool, Frame};
use crate::registry::{GooseSource, SvSource};

/// A burst-oriented receive queue.
pub trait RxQueue {
    /// Receives up to `max` frames into `out`.
    ///
    /// # Returns
    /// The number of frames appended.
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize;

    /// True when the queue will never produce another frame.
    fn is_exhausted(&self) -> bool {
        false
    }
}

/// Replays prepared frames once, in order.
pub struct ReplayQueue {
    pool: BufferPool,
    frames: Vec<Vec<u8>>,
    next: usize,
}

impl ReplayQueue {
    pub fn new(pool: BufferPool, frames: Vec<Vec<u8>>) -> Self {
        ReplayQueue {
            pool,
            frames,
            next: 0,
        }
    }

    pub fn remaining(&self) -> usize {
        self.frames.len() - self.next
    }
}

impl RxQueue for ReplayQueue {
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut count = 0;
        while count < max && self.next < self.frames.len() {
            let Some(frame) = self.pool.alloc_from(&self.frames[self.next]) else {
                break;
            };
            out.push(frame);
            self.next += 1;
            count += 1;
        }
        count
    }

    fn is_exhausted(&self) -> bool {
        self.next >= self.frames.len()
    }
}

struct GooseStream {
    frame: GooseFrame,
}

impl GooseStream {
    /// Every eighth frame is a state change, the others are retransmissions.
    fn advance(&mut self) {
        if self.frame.sq_num >= 7 {
            self.frame.st_num = self.frame.st_num.wrapping_add(1);
            self.frame.sq_num = 0;
        } else {
            self.frame.sq_num += 1;
        }
    }
}

struct SvStream {
    source: SvSource,
    next_smp_cnt: u16,
    sample_rate: u16,
}

impl SvStream {
    fn frame(&self) -> SvFrame {
        SvFrame::for_source(&self.source, self.next_smp_cnt, self.sample_rate)
    }

    fn advance(&mut self) {
        let next = self.next_smp_cnt as u32 + self.source.num_asdu as u32;
        self.next_smp_cnt = (next % self.sample_rate as u32) as u16;
    }
}

/// Produces well-formed traffic for a set of configured sources, cycling
/// through them round-robin with advancing sequence counters.
pub struct TrafficGenerator {
    pool: BufferPool,
    goose: Vec<GooseStream>,
    sv: Vec<SvStream>,
    next: usize,
    remaining: Option<u64>,
    encode_failed: bool,
}

impl TrafficGenerator {
    pub fn new<'a>(
        pool: BufferPool,
        goose: impl IntoIterator<Item = &'a GooseSource>,
        sv: impl IntoIterator<Item = &'a SvSource>,
    ) -> Self {
        TrafficGenerator {
            pool,
            goose: goose
                .into_iter()
                .map(|source| GooseStream {
                    frame: GooseFrame::for_source(source),
                })
                .collect(),
            sv: sv
                .into_iter()
                .map(|source| SvStream {
                    source: source.clone(),
                    next_smp_cnt: 1,
                    sample_rate: sample_rate_for(source.num_asdu),
                })
                .collect(),
            next: 0,
            remaining: None,
            encode_failed: false,
        }
    }

    /// Stops after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.remaining = Some(frames);
        self
    }

    fn streams(&self) -> usize {
        self.goose.len() + self.sv.len()
    }

    fn fill(&mut self, frame: &mut Frame) -> bool {
        let index = self.next % self.streams();
        self.next = self.next.wrapping_add(1);

        let goose_len = self.goose.len();
        let written = if index < goose_len {
            let stream = &mut self.goose[index];
            let written = encode_goose_into(&stream.frame, frame.buffer_mut());
            stream.advance();
            written
        } else {
            let stream = &mut self.sv[index - goose_len];
            let written = encode_smv_into(&stream.frame(), frame.buffer_mut());
            stream.advance();
            written
        };

        match written {
            Ok(len) => {
                frame.set_len(len);
                true
            }
            Err(err) => {
                if !self.encode_failed {
                    self.encode_failed = true;
                    warn!(error = %err, "synthetic frame does not fit the pool buffers");
                }
                false
            }
        }
    }
}

impl RxQueue for TrafficGenerator {
    fn rx_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        if self.streams() == 0 {
            return 0;
        }
        let mut count = 0;
        while count < max && self.remaining != Some(0) {
            let Some(mut frame) = self.pool.alloc() else { break };
            if !self.fill(&mut frame) {
                break;
            }
            out.push(frame);
            count += 1;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= 1;
            }
        }
        count
    }

    fn is_exhausted(&self) -> bool {
        self.streams() == 0 || self.remaining == Some(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode_goose::parse_goose;
    use crate::decode_smv::parse_sv;
    use crate::registry::{goose_registry, sv_registry};

    #[test]
    fn test_replay_queue() {
        let pool = BufferPool::new(2, 128).unwrap();
        let mut queue = ReplayQueue::new(pool.clone(), vec![vec![1; 64], vec![2; 64], vec![3; 64]]);

        let mut out = Vec::new();
        // Only two buffers in the pool
        assert_eq!(queue.rx_burst(&mut out, 8), 2);
        assert_eq!(queue.remaining(), 1);
        assert!(!queue.is_exhausted());

        out.clear();
        assert_eq!(queue.rx_burst(&mut out, 8), 1);
        assert_eq!(out[0].bytes(), &[3; 64][..]);
        assert!(queue.is_exhausted());
    }

    #[test]
    fn test_generator_round_robin() {
        let pool = BufferPool::new(16, 1518).unwrap();
        let goose = goose_registry(2).unwrap();
        let sv = sv_registry(1, 1).unwrap();
        let mut generator = TrafficGenerator::new(pool, goose.iter(), sv.iter()).with_limit(8);

        let mut out = Vec::new();
        assert_eq!(generator.rx_burst(&mut out, 32), 8);
        assert!(generator.is_exhausted());

        let (first, state) = parse_goose(out[0].bytes()).unwrap();
        assert_eq!(first.appid, 1);
        assert_eq!((state.st_num, state.sq_num), (1, 0));
        let (_, state) = parse_goose(out[4].bytes()).unwrap();
        assert_eq!((state.st_num, state.sq_num), (1, 1));

        let (sv80, state) = parse_sv(out[2].bytes()).unwrap();
        assert_eq!((sv80.appid, sv80.num_asdu, state.smp_cnt), (1, 1, 1));
        let (_, state) = parse_sv(out[6].bytes()).unwrap();
        assert_eq!(state.smp_cnt, 2);

        let (sv256, state) = parse_sv(out[7].bytes()).unwrap();
        assert_eq!(sv256.num_asdu, 8);
        assert_eq!((state.smp_cnt, state.last_smp_cnt), (9, 16));
    }

    #[test]
    fn test_generator_state_changes() {
        let mut stream = GooseStream {
            frame: GooseFrame::for_source(&GooseSource::synthetic(0)),
        };
        for _ in 0..8 {
            stream.advance();
        }
        assert_eq!((stream.frame.st_num, stream.frame.sq_num), (2, 0));
    }

    #[test]
    fn test_generator_without_sources() {
        let pool = BufferPool::new(1, 64).unwrap();
        let mut generator = TrafficGenerator::new(pool, [], []);
        let mut out = Vec::new();
        assert_eq!(generator.rx_burst(&mut out, 4), 0);
        assert!(generator.is_exhausted());
    }
}
