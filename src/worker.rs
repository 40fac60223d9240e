//! Fan-out of received frames to worker threads.
//!
//! Frames are spread by APPID so that every frame of a publisher lands on
//! the same worker, in receive order. Each worker owns one bounded
//! single-producer single-consumer ring and its own pipeline.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crossbeam::queue::ArrayQueue;
use serde::Serialize;
use tracing::{debug, warn};

use crate::decode_basics::classify;
use crate::pipeline::{FramePipeline, PipelineContext, BURST_SIZE};
use crate::pool::Frame;
use crate::registry::{GooseSource, SvSource};
use crate::stats::{CycleStat, CycleSummary, ProbeStats};

/// Worker that receives frames of `appid` when `workers` workers run.
///
/// `workers` must be a power of two.
#[inline]
pub fn worker_index(appid: u16, workers: usize) -> usize {
    debug_assert!(workers.is_power_of_two());
    appid as usize & (workers - 1)
}

/// Creates a bounded ring. The two ends are not `Clone`, so there is
/// exactly one producer and one consumer.
pub fn ring(capacity: usize) -> (RingProducer, RingConsumer) {
    let queue = Arc::new(ArrayQueue::new(capacity.max(1)));
    (
        RingProducer {
            queue: Arc::clone(&queue),
        },
        RingConsumer { queue },
    )
}

pub struct RingProducer {
    queue: Arc<ArrayQueue<Frame>>,
}

impl RingProducer {
    /// Enqueues a frame, handing it back when the ring is full.
    #[inline]
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        self.queue.push(frame)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

pub struct RingConsumer {
    queue: Arc<ArrayQueue<Frame>>,
}

impl RingConsumer {
    #[inline]
    pub fn pop(&mut self) -> Option<Frame> {
        self.queue.pop()
    }

    /// Dequeues up to `max` frames into `out`.
    pub fn pop_burst(&mut self, out: &mut Vec<Frame>, max: usize) -> usize {
        let mut count = 0;
        while count < max {
            let Some(frame) = self.queue.pop() else { break };
            out.push(frame);
            count += 1;
        }
        count
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// Spreads received frames over the worker rings.
pub struct Distributor {
    rings: Vec<RingProducer>,
    overflow_reported: Vec<bool>,
    stats: Arc<ProbeStats>,
}

impl Distributor {
    /// `rings.len()` must be a power of two.
    pub fn new(rings: Vec<RingProducer>, stats: Arc<ProbeStats>) -> Self {
        let overflow_reported = vec![false; rings.len()];
        Distributor {
            rings,
            overflow_reported,
            stats,
        }
    }

    pub fn workers(&self) -> usize {
        self.rings.len()
    }

    /// Moves every frame of `frames` to its worker ring.
    ///
    /// Frames without an APPID go to worker 0. A full ring drops the frame,
    /// which releases its buffer.
    pub fn dispatch(&mut self, frames: &mut Vec<Frame>) {
        let workers = self.rings.len();
        for frame in frames.drain(..) {
            let worker = classify(frame.bytes())
                .appid()
                .map_or(0, |appid| worker_index(appid, workers));

            if let Err(frame) = self.rings[worker].push(frame) {
                drop(frame);
                self.stats
                    .distributor
                    .ring_full_drops
                    .fetch_add(1, Ordering::Relaxed);
                if !self.overflow_reported[worker] {
                    self.overflow_reported[worker] = true;
                    warn!(worker, "worker ring full, dropping frames");
                }
            }
        }
    }

    /// True once every ring has been emptied by its worker.
    pub fn is_drained(&self) -> bool {
        self.rings.iter().all(RingProducer::is_empty)
    }
}

/// Final state of a worker after it stopped.
#[derive(Debug, Serialize)]
pub struct WorkerReport {
    pub id: usize,
    pub cycles: CycleSummary,
    pub goose: Vec<GooseSource>,
    pub sv: Vec<SvSource>,
}

/// Polls one ring and runs its frames through a private pipeline.
pub struct Worker {
    id: usize,
    ring: RingConsumer,
    pipeline: FramePipeline,
    context: PipelineContext,
    cycles: CycleStat,
    burst: Vec<Frame>,
}

impl Worker {
    pub fn new(id: usize, ring: RingConsumer, context: PipelineContext) -> Self {
        Worker {
            id,
            ring,
            pipeline: FramePipeline::standard(),
            context,
            cycles: CycleStat::new(),
            burst: Vec::with_capacity(BURST_SIZE),
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Runs one cycle. Returns the number of frames processed.
    pub fn poll_once(&mut self) -> usize {
        let count = self.ring.pop_burst(&mut self.burst, BURST_SIZE);
        if count == 0 {
            self.cycles.record_idle();
            return 0;
        }
        let started = Instant::now();
        self.pipeline.process(self.burst.drain(..), &mut self.context);
        self.cycles.record_busy(started.elapsed());
        count
    }

    /// Busy-polls until `shutdown` is set. The batch in progress when the
    /// flag flips is finished before returning.
    pub fn run(mut self, shutdown: &AtomicBool) -> WorkerReport {
        debug!(
            worker = self.id,
            goose_sources = self.context.goose.len(),
            sv_sources = self.context.sv.len(),
            "worker started"
        );
        while !shutdown.load(Ordering::Acquire) {
            if self.poll_once() == 0 {
                std::hint::spin_loop();
            }
        }
        let cycles = self.cycles.summary();
        debug!(worker = self.id, busy_cycles = cycles.busy_cycles, "worker stopped");

        WorkerReport {
            id: self.id,
            cycles,
            goose: self.context.goose.into_sources(),
            sv: self.context.sv.into_sources(),
        }
    }
}
