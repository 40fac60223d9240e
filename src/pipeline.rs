//! Staged per-cycle frame processing.
//!
//! Each cycle the router stage sorts the input batch into one batch per
//! protocol, then the protocol stages parse, correlate and release their
//! frames. Stages run strictly in the order they were registered.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use crate::decode_basics::{classify, ProtoKind};
use crate::decode_goose::parse_goose;
use crate::decode_smv::parse_sv;
use crate::pool::Frame;
use crate::registry::{GooseSource, SourceRegistry, SvSource};
use crate::stats::PipelineStats;

/// Frames handled per cycle.
pub const BURST_SIZE: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StageId {
    Router,
    Goose,
    Sv,
    Other,
}

impl StageId {
    pub const ALL: [StageId; 4] = [StageId::Router, StageId::Goose, StageId::Sv, StageId::Other];

    fn index(self) -> usize {
        self as usize
    }

    fn for_kind(kind: ProtoKind) -> Self {
        match kind {
            ProtoKind::Goose => StageId::Goose,
            ProtoKind::Sv => StageId::Sv,
            ProtoKind::Other => StageId::Other,
        }
    }
}

/// Fixed-capacity batch of frames owned by one stage.
#[derive(Debug)]
pub struct PipelineBatch {
    frames: Vec<Frame>,
}

impl PipelineBatch {
    pub fn new() -> Self {
        PipelineBatch {
            frames: Vec::with_capacity(BURST_SIZE),
        }
    }

    /// Adds a frame, handing it back if the batch is full.
    pub fn push(&mut self, frame: Frame) -> Result<(), Frame> {
        if self.frames.len() >= BURST_SIZE {
            return Err(frame);
        }
        self.frames.push(frame);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.frames.len() >= BURST_SIZE
    }

    pub fn frames(&self) -> &[Frame] {
        &self.frames
    }
}

impl Default for PipelineBatch {
    fn default() -> Self {
        Self::new()
    }
}

/// One batch per stage.
#[derive(Debug, Default)]
pub struct PipelineMatrix {
    batches: [PipelineBatch; 4],
}

impl PipelineMatrix {
    pub fn batch(&self, stage: StageId) -> &PipelineBatch {
        &self.batches[stage.index()]
    }

    pub fn batch_mut(&mut self, stage: StageId) -> &mut PipelineBatch {
        &mut self.batches[stage.index()]
    }

    /// Frames currently held by any stage.
    pub fn pending(&self) -> usize {
        self.batches.iter().map(PipelineBatch::len).sum()
    }

    /// Takes the frames of a stage out, leaving an empty batch behind.
    fn take(&mut self, stage: StageId) -> Vec<Frame> {
        std::mem::take(&mut self.batch_mut(stage).frames)
    }

    /// Returns a drained vector to a stage so its allocation is reused.
    fn restore(&mut self, stage: StageId, mut frames: Vec<Frame>) {
        frames.clear();
        self.batch_mut(stage).frames = frames;
    }
}

/// State a pipeline works on: its registry shards and its counters.
pub struct PipelineContext {
    pub goose: SourceRegistry<GooseSource>,
    pub sv: SourceRegistry<SvSource>,
    pub stats: Arc<PipelineStats>,
}

impl PipelineContext {
    pub fn new(
        goose: SourceRegistry<GooseSource>,
        sv: SourceRegistry<SvSource>,
        stats: Arc<PipelineStats>,
    ) -> Self {
        PipelineContext { goose, sv, stats }
    }
}

pub type Stage = fn(&mut PipelineMatrix, &mut PipelineContext);

/// Sorts the router batch into the protocol batches.
pub fn route_stage(matrix: &mut PipelineMatrix, ctx: &mut PipelineContext) {
    let mut input = matrix.take(StageId::Router);
    ctx.stats
        .frames
        .fetch_add(input.len() as u64, Ordering::Relaxed);

    for frame in input.drain(..) {
        let target = StageId::for_kind(classify(frame.bytes()).kind());
        // Downstream batches hold at most what the router held
        if let Err(frame) = matrix.batch_mut(target).push(frame) {
            drop(frame);
        }
    }
    matrix.restore(StageId::Router, input);
}

/// Parses GOOSE frames and updates the matching sources.
pub fn goose_stage(matrix: &mut PipelineMatrix, ctx: &mut PipelineContext) {
    let mut frames = matrix.take(StageId::Goose);
    let counters = &ctx.stats.goose;

    for frame in frames.drain(..) {
        counters.received.fetch_add(1, Ordering::Relaxed);
        match parse_goose(frame.bytes()) {
            Ok((passport, state)) => match ctx.goose.lookup(&passport) {
                Some(source) => {
                    counters.tracked.fetch_add(1, Ordering::Relaxed);
                    if source.update(&state) {
                        counters.sequence_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    counters.unknown.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(err) => counters.record_error(err.class()),
        }
    }
    matrix.restore(StageId::Goose, frames);
}

/// Parses SV frames and updates the matching streams.
pub fn sv_stage(matrix: &mut PipelineMatrix, ctx: &mut PipelineContext) {
    let mut frames = matrix.take(StageId::Sv);
    let counters = &ctx.stats.sv;

    for frame in frames.drain(..) {
        counters.received.fetch_add(1, Ordering::Relaxed);
        match parse_sv(frame.bytes()) {
            Ok((passport, state)) => match ctx.sv.lookup(&passport) {
                Some(source) => {
                    counters.tracked.fetch_add(1, Ordering::Relaxed);
                    if source.update(&state) {
                        counters.sequence_errors.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    counters.unknown.fetch_add(1, Ordering::Relaxed);
                }
            },
            Err(err) => counters.record_error(err.class()),
        }
    }
    matrix.restore(StageId::Sv, frames);
}

/// Hands everything else back. The probe has no kernel path, so the
/// frames are counted and released.
pub fn other_stage(matrix: &mut PipelineMatrix, ctx: &mut PipelineContext) {
    let frames = matrix.take(StageId::Other);
    ctx.stats
        .to_kernel
        .fetch_add(frames.len() as u64, Ordering::Relaxed);
    matrix.restore(StageId::Other, frames);
}

/// Ordered chain of stages plus the batches they work on.
pub struct FramePipeline {
    stages: Vec<(StageId, Stage)>,
    matrix: PipelineMatrix,
}

impl FramePipeline {
    /// Router, GOOSE, SV, Other.
    pub fn standard() -> Self {
        Self::from_stages(vec![
            (StageId::Router, route_stage as Stage),
            (StageId::Goose, goose_stage),
            (StageId::Sv, sv_stage),
            (StageId::Other, other_stage),
        ])
    }

    pub fn from_stages(stages: Vec<(StageId, Stage)>) -> Self {
        FramePipeline {
            stages,
            matrix: PipelineMatrix::default(),
        }
    }

    pub fn stage_ids(&self) -> Vec<StageId> {
        self.stages.iter().map(|(id, _)| *id).collect()
    }

    pub fn matrix(&self) -> &PipelineMatrix {
        &self.matrix
    }

    /// Batch the router reads from.
    pub fn input(&mut self) -> &mut PipelineBatch {
        self.matrix.batch_mut(StageId::Router)
    }

    /// Runs every stage once, in order.
    pub fn run(&mut self, ctx: &mut PipelineContext) {
        for (_, stage) in &self.stages {
            stage(&mut self.matrix, ctx);
        }
    }

    /// Feeds frames through the pipeline one burst at a time.
    ///
    /// # Returns
    /// The number of frames consumed.
    pub fn process<I>(&mut self, frames: I, ctx: &mut PipelineContext) -> usize
    where
        I: IntoIterator<Item = Frame>,
    {
        let mut count = 0;
        let mut frames = frames.into_iter().peekable();
        while frames.peek().is_some() {
            while !self.input().is_full() {
                let Some(frame) = frames.next() else { break };
                // Cannot fail: the batch is not full
                let _ = self.input().push(frame);
                count += 1;
            }
            self.run(ctx);
        }
        count
    }
}
