//! Counters published by the receive path.
//!
//! Counters are plain relaxed atomics. A snapshot taken while workers run
//! may mix values from different instants; that is fine for monitoring.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::types::ErrorClass;

/// Per-protocol counters of one pipeline.
#[derive(Debug, Default)]
pub struct ProtoCounters {
    pub received: AtomicU64,
    pub tracked: AtomicU64,
    pub unknown: AtomicU64,
    pub sequence_errors: AtomicU64,
    pub framing_errors: AtomicU64,
    pub structural_errors: AtomicU64,
    pub incomplete_errors: AtomicU64,
}

impl ProtoCounters {
    #[inline]
    pub fn record_error(&self, class: ErrorClass) {
        let counter = match class {
            ErrorClass::Framing => &self.framing_errors,
            ErrorClass::Structural => &self.structural_errors,
            ErrorClass::Incomplete => &self.incomplete_errors,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> ProtoSnapshot {
        ProtoSnapshot {
            received: self.received.load(Ordering::Relaxed),
            tracked: self.tracked.load(Ordering::Relaxed),
            unknown: self.unknown.load(Ordering::Relaxed),
            sequence_errors: self.sequence_errors.load(Ordering::Relaxed),
            framing_errors: self.framing_errors.load(Ordering::Relaxed),
            structural_errors: self.structural_errors.load(Ordering::Relaxed),
            incomplete_errors: self.incomplete_errors.load(Ordering::Relaxed),
        }
    }
}

/// Counters of one dispatch pipeline (one per worker, or one inline).
#[derive(Debug, Default)]
pub struct PipelineStats {
    pub goose: ProtoCounters,
    pub sv: ProtoCounters,
    /// Frames that are neither GOOSE nor SV
    pub to_kernel: AtomicU64,
    /// Frames entering the router stage
    pub frames: AtomicU64,
}

impl PipelineStats {
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            goose: self.goose.snapshot(),
            sv: self.sv.snapshot(),
            to_kernel: self.to_kernel.load(Ordering::Relaxed),
            frames: self.frames.load(Ordering::Relaxed),
            ..StatsSnapshot::default()
        }
    }
}

/// Counters of the receiving thread.
#[derive(Debug, Default)]
pub struct DistributorStats {
    /// Frames taken from the receive queue
    pub rx: AtomicU64,
    /// Frames dropped because a worker ring was full
    pub ring_full_drops: AtomicU64,
    /// Receive attempts that found the buffer pool empty
    pub rx_no_buffer: AtomicU64,
}

/// All counters of a running probe.
#[derive(Debug)]
pub struct ProbeStats {
    pub distributor: DistributorStats,
    pipelines: Vec<Arc<PipelineStats>>,
}

impl ProbeStats {
    pub fn new(pipelines: usize) -> Self {
        ProbeStats {
            distributor: DistributorStats::default(),
            pipelines: (0..pipelines.max(1))
                .map(|_| Arc::new(PipelineStats::default()))
                .collect(),
        }
    }

    pub fn pipeline(&self, index: usize) -> Option<&Arc<PipelineStats>> {
        self.pipelines.get(index)
    }

    pub fn pipelines(&self) -> &[Arc<PipelineStats>] {
        &self.pipelines
    }

    /// Sums all pipelines and adds the distributor counters.
    pub fn snapshot(&self) -> StatsSnapshot {
        let mut total = StatsSnapshot::default();
        for pipeline in &self.pipelines {
            total.merge(&pipeline.snapshot());
        }
        total.rx = self.distributor.rx.load(Ordering::Relaxed);
        total.ring_full_drops = self.distributor.ring_full_drops.load(Ordering::Relaxed);
        total.rx_no_buffer = self.distributor.rx_no_buffer.load(Ordering::Relaxed);
        total
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ProtoSnapshot {
    pub received: u64,
    pub tracked: u64,
    pub unknown: u64,
    pub sequence_errors: u64,
    pub framing_errors: u64,
    pub structural_errors: u64,
    pub incomplete_errors: u64,
}

impl ProtoSnapshot {
    pub fn parse_errors(&self) -> u64 {
        self.framing_errors + self.structural_errors + self.incomplete_errors
    }

    fn merge(&mut self, other: &ProtoSnapshot) {
        self.received += other.received;
        self.tracked += other.tracked;
        self.unknown += other.unknown;
        self.sequence_errors += other.sequence_errors;
        self.framing_errors += other.framing_errors;
        self.structural_errors += other.structural_errors;
        self.incomplete_errors += other.incomplete_errors;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub goose: ProtoSnapshot,
    pub sv: ProtoSnapshot,
    pub to_kernel: u64,
    pub frames: u64,
    pub rx: u64,
    pub ring_full_drops: u64,
    pub rx_no_buffer: u64,
}

impl StatsSnapshot {
    pub fn merge(&mut self, other: &StatsSnapshot) {
        self.goose.merge(&other.goose);
        self.sv.merge(&other.sv);
        self.to_kernel += other.to_kernel;
        self.frames += other.frames;
        self.rx += other.rx;
        self.ring_full_drops += other.ring_full_drops;
        self.rx_no_buffer += other.rx_no_buffer;
    }
}

/// Busy/idle accounting of a polling loop.
#[derive(Debug, Clone)]
pub struct CycleStat {
    started: Instant,
    busy: Duration,
    min_batch: Option<Duration>,
    max_batch: Duration,
    busy_cycles: u64,
    idle_cycles: u64,
}

impl CycleStat {
    pub fn new() -> Self {
        CycleStat {
            started: Instant::now(),
            busy: Duration::ZERO,
            min_batch: None,
            max_batch: Duration::ZERO,
            busy_cycles: 0,
            idle_cycles: 0,
        }
    }

    /// Records a cycle that processed at least one frame.
    pub fn record_busy(&mut self, elapsed: Duration) {
        self.busy += elapsed;
        self.busy_cycles += 1;
        self.max_batch = self.max_batch.max(elapsed);
        self.min_batch = Some(self.min_batch.map_or(elapsed, |min| min.min(elapsed)));
    }

    pub fn record_idle(&mut self) {
        self.idle_cycles += 1;
    }

    pub fn summary(&self) -> CycleSummary {
        let wall = self.started.elapsed().as_secs_f64();
        let cycles = self.busy_cycles + self.idle_cycles;
        CycleSummary {
            min_batch_us: self.min_batch.map_or(0, |d| d.as_micros() as u64),
            max_batch_us: self.max_batch.as_micros() as u64,
            busy_cycles: self.busy_cycles,
            idle_cycles: self.idle_cycles,
            load_percent: if wall > 0.0 {
                (self.busy.as_secs_f64() / wall * 100.0).min(100.0)
            } else {
                0.0
            },
            idle_percent: if cycles > 0 {
                self.idle_cycles as f64 / cycles as f64 * 100.0
            } else {
                0.0
            },
        }
    }
}

impl Default for CycleStat {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CycleSummary {
    pub min_batch_us: u64,
    pub max_batch_us: u64,
    pub busy_cycles: u64,
    pub idle_cycles: u64,
    pub load_percent: f64,
    pub idle_percent: f64,
}
