//! The receive probe: owns the registries, the buffer pool and the
//! counters, and runs the receive loop with its workers until shutdown.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{ConfigError, ProbeConfig};
use crate::pipeline::{FramePipeline, PipelineContext, BURST_SIZE};
use crate::pool::{BufferPool, Frame, PoolError};
use crate::registry::{goose_registry, sv_registry, GooseSource, RegistryError, SourceRegistry, SvSource};
use crate::rx::{RxQueue, TrafficGenerator};
use crate::stats::{CycleStat, CycleSummary, ProbeStats, StatsSnapshot};
use crate::worker::{ring, Distributor, Worker, WorkerReport};

#[derive(Debug, Error)]
pub enum ProbeError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("failed to build source registry")]
    Registry(#[from] RegistryError),
    #[error("failed to allocate receive buffers")]
    Pool(#[from] PoolError),
    #[error("failed to spawn worker {id}")]
    Spawn {
        id: usize,
        #[source]
        source: std::io::Error,
    },
    #[error("worker {id} panicked")]
    WorkerPanicked { id: usize },
    #[error("failed to open capture on {interface}")]
    Capture {
        interface: String,
        #[source]
        source: std::io::Error,
    },
}

/// Final state of a probe run.
#[derive(Debug, Serialize)]
pub struct ProbeReport {
    pub stats: StatsSnapshot,
    /// Cycles of the receiving thread
    pub receiver: CycleSummary,
    /// Cycles of each worker, by worker id
    pub workers: Vec<CycleSummary>,
    /// Every GOOSE source, by APPID
    pub goose: Vec<GooseSource>,
    /// Every SV stream, by APPID
    pub sv: Vec<SvSource>,
}

impl ProbeReport {
    pub fn sequence_errors(&self) -> u64 {
        self.stats.goose.sequence_errors + self.stats.sv.sequence_errors
    }
}

pub struct Probe {
    config: ProbeConfig,
    pool: BufferPool,
    stats: Arc<ProbeStats>,
    goose: SourceRegistry<GooseSource>,
    sv: SourceRegistry<SvSource>,
}

impl Probe {
    pub fn new(config: ProbeConfig) -> Result<Self, ProbeError> {
        config.validate()?;
        let goose = goose_registry(config.goose_sources)?;
        let sv = sv_registry(config.sv80_sources, config.sv256_sources)?;
        let pool = BufferPool::new(config.pool_size, config.frame_size)?;
        let stats = Arc::new(ProbeStats::new(config.pipelines()));

        info!(
            goose = goose.len(),
            sv = sv.len(),
            workers = config.workers,
            pool = config.pool_size,
            "probe configured"
        );
        Ok(Probe {
            config,
            pool,
            stats,
            goose,
            sv,
        })
    }

    pub fn config(&self) -> &ProbeConfig {
        &self.config
    }

    /// Pool the receive queue must allocate its frames from.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    pub fn stats(&self) -> Arc<ProbeStats> {
        Arc::clone(&self.stats)
    }

    pub fn goose_sources(&self) -> &SourceRegistry<GooseSource> {
        &self.goose
    }

    pub fn sv_sources(&self) -> &SourceRegistry<SvSource> {
        &self.sv
    }

    /// Generator producing traffic for every configured source.
    pub fn synthetic_traffic(&self) -> TrafficGenerator {
        TrafficGenerator::new(self.pool.clone(), self.goose.iter(), self.sv.iter())
    }

    /// Polls `rx` until `shutdown` is set or the queue is exhausted, then
    /// lets the workers drain their rings and collects the final state.
    pub fn run<Q: RxQueue>(self, rx: &mut Q, shutdown: &AtomicBool) -> Result<ProbeReport, ProbeError> {
        let stats = Arc::clone(&self.stats);
        let (receiver, mut worker_reports) = if self.config.workers == 0 {
            self.run_inline(rx, shutdown)
        } else {
            self.run_workers(rx, shutdown)?
        };

        worker_reports.sort_by_key(|report| report.id);
        let mut report = ProbeReport {
            stats: stats.snapshot(),
            receiver,
            workers: worker_reports.iter().map(|report| report.cycles).collect(),
            goose: Vec::new(),
            sv: Vec::new(),
        };
        for worker in worker_reports {
            report.goose.extend(worker.goose);
            report.sv.extend(worker.sv);
        }
        report.goose.sort_by_key(|source| source.appid);
        report.sv.sort_by_key(|source| source.appid);

        info!(
            rx = report.stats.rx,
            goose = report.stats.goose.received,
            sv = report.stats.sv.received,
            sequence_errors = report.sequence_errors(),
            ring_full_drops = report.stats.ring_full_drops,
            "probe stopped"
        );
        Ok(report)
    }

    fn receive<Q: RxQueue>(&self, rx: &mut Q, burst: &mut Vec<Frame>) -> usize {
        let counters = &self.stats.distributor;
        if self.pool.available() == 0 {
            counters.rx_no_buffer.fetch_add(1, Ordering::Relaxed);
        }
        let count = rx.rx_burst(burst, BURST_SIZE);
        counters.rx.fetch_add(count as u64, Ordering::Relaxed);
        count
    }

    /// Zero workers: the receiving thread runs the pipeline itself.
    fn run_inline<Q: RxQueue>(mut self, rx: &mut Q, shutdown: &AtomicBool) -> (CycleSummary, Vec<WorkerReport>) {
        let stats = self.stats.pipeline(0).cloned().unwrap_or_default();
        let mut pipeline = FramePipeline::standard();
        let mut context = PipelineContext::new(
            std::mem::take(&mut self.goose),
            std::mem::take(&mut self.sv),
            stats,
        );
        let mut cycles = CycleStat::new();
        let mut burst = Vec::with_capacity(BURST_SIZE);
        debug!("processing inline");

        while !shutdown.load(Ordering::Acquire) {
            if self.receive(rx, &mut burst) == 0 {
                cycles.record_idle();
                if rx.is_exhausted() {
                    break;
                }
                std::hint::spin_loop();
                continue;
            }
            let started = Instant::now();
            pipeline.process(burst.drain(..), &mut context);
            cycles.record_busy(started.elapsed());
        }

        let summary = cycles.summary();
        let report = WorkerReport {
            id: 0,
            cycles: summary,
            goose: context.goose.into_sources(),
            sv: context.sv.into_sources(),
        };
        (summary, vec![report])
    }

    fn run_workers<Q: RxQueue>(
        mut self,
        rx: &mut Q,
        shutdown: &AtomicBool,
    ) -> Result<(CycleSummary, Vec<WorkerReport>), ProbeError> {
        let workers = self.config.workers;
        let goose_shards = std::mem::take(&mut self.goose).partition(workers);
        let sv_shards = std::mem::take(&mut self.sv).partition(workers);
        let (producers, consumers): (Vec<_>, Vec<_>) =
            (0..workers).map(|_| ring(self.config.ring_capacity)).unzip();
        let mut distributor = Distributor::new(producers, Arc::clone(&self.stats));
        let stop_workers = AtomicBool::new(false);
        let this = &self;

        thread::scope(|scope| {
            let mut handles = Vec::with_capacity(workers);
            let shards = goose_shards.into_iter().zip(sv_shards).zip(consumers);
            for (id, ((goose, sv), consumer)) in shards.enumerate() {
                let stats = this.stats.pipeline(id).cloned().unwrap_or_default();
                let worker = Worker::new(id, consumer, PipelineContext::new(goose, sv, stats));
                let stop = &stop_workers;
                let spawned = thread::Builder::new()
                    .name(format!("pbus-worker-{id}"))
                    .spawn_scoped(scope, move || worker.run(stop));
                match spawned {
                    Ok(handle) => handles.push((id, handle)),
                    Err(source) => {
                        // Release the workers already running so the scope can end
                        stop_workers.store(true, Ordering::Release);
                        return Err(ProbeError::Spawn { id, source });
                    }
                }
            }
            info!(workers, "workers started");

            let mut cycles = CycleStat::new();
            let mut burst = Vec::with_capacity(BURST_SIZE);
            while !shutdown.load(Ordering::Acquire) {
                if this.receive(rx, &mut burst) == 0 {
                    cycles.record_idle();
                    if rx.is_exhausted() {
                        break;
                    }
                    std::hint::spin_loop();
                    continue;
                }
                let started = Instant::now();
                distributor.dispatch(&mut burst);
                cycles.record_busy(started.elapsed());
            }

            // Frames already handed to a ring are processed before the workers stop
            while !distributor.is_drained() && !handles.iter().any(|(_, handle)| handle.is_finished()) {
                thread::yield_now();
            }
            stop_workers.store(true, Ordering::Release);

            let mut reports = Vec::with_capacity(workers);
            for (id, handle) in handles {
                reports.push(handle.join().map_err(|_| ProbeError::WorkerPanicked { id })?);
            }
            Ok((cycles.summary(), reports))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rx::ReplayQueue;

    fn config(workers: usize) -> ProbeConfig {
        ProbeConfig {
            goose_sources: 4,
            sv80_sources: 2,
            sv256_sources: 1,
            workers,
            ring_capacity: 256,
            pool_size: 256,
            ..Default::default()
        }
    }

    #[test]
    fn test_invalid_config_rejected() {
        let err = Probe::new(ProbeConfig {
            workers: 3,
            ..Default::default()
        })
        .err()
        .unwrap();
        assert!(matches!(err, ProbeError::Config(ConfigError::Workers(3))));
    }

    #[test]
    fn test_inline_run() {
        let probe = Probe::new(config(0)).unwrap();
        let pool = probe.pool().clone();
        let mut traffic = probe.synthetic_traffic().with_limit(700);
        let report = probe.run(&mut traffic, &AtomicBool::new(false)).unwrap();

        assert_eq!(report.stats.rx, 700);
        assert_eq!(report.stats.frames, 700);
        assert_eq!(report.stats.goose.received, 400);
        assert_eq!(report.stats.goose.tracked, 400);
        assert_eq!(report.stats.sv.tracked, 300);
        assert_eq!(report.sequence_errors(), 0);
        assert_eq!(report.workers.len(), 1);
        assert_eq!(report.goose.len(), 4);
        assert_eq!(report.sv.len(), 3);
        // 100 frames per GOOSE source, a state change every eighth
        assert_eq!(report.goose[0].sequence.st_num, 13);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_worker_run_matches_inline() {
        let probe = Probe::new(config(2)).unwrap();
        let pool = probe.pool().clone();
        let mut traffic = probe.synthetic_traffic().with_limit(700);
        let report = probe.run(&mut traffic, &AtomicBool::new(false)).unwrap();

        assert_eq!(report.workers.len(), 2);
        assert_eq!(report.stats.rx, 700);
        assert_eq!(report.stats.frames + report.stats.ring_full_drops, 700);
        assert_eq!(report.sequence_errors(), 0);
        let appids: Vec<u16> = report.goose.iter().map(|s| s.appid).collect();
        assert_eq!(appids, vec![1, 2, 3, 4]);
        assert_eq!(pool.available(), pool.capacity());
    }

    #[test]
    fn test_shutdown_before_start() {
        let probe = Probe::new(config(1)).unwrap();
        let mut queue = ReplayQueue::new(probe.pool().clone(), vec![vec![0u8; 64]; 4]);
        let report = probe.run(&mut queue, &AtomicBool::new(true)).unwrap();
        assert_eq!(report.stats.rx, 0);
        assert_eq!(queue.remaining(), 4);
    }

    #[test]
    fn test_non_bus_frames_reach_worker_zero() {
        let probe = Probe::new(config(2)).unwrap();
        let mut queue = ReplayQueue::new(probe.pool().clone(), vec![vec![0u8; 64]; 10]);
        let stats = probe.stats();
        let report = probe.run(&mut queue, &AtomicBool::new(false)).unwrap();

        assert_eq!(report.stats.to_kernel, 10);
        assert_eq!(stats.pipelines()[0].snapshot().to_kernel, 10);
        assert_eq!(stats.pipelines()[1].snapshot().to_kernel, 0);
    }
}
