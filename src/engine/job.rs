use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

use crate::accel::context::AcceleratorContext;
use crate::accel::device::{Accelerator, DeviceCaps, DeviceError, OverlayParams};
use crate::accel::gate::AdmissionPermit;
use crate::accel::pool::{BufferPool, BufferPoolOpts, BufferPoolStats};
use crate::composition::model::{CompositionRequest, SourceId, scrolled_y};
use crate::composition::validate::{NormalizedRequest, validate};
use crate::encode::sink::{EncodeSink, SinkConfig};
use crate::foundation::core::{Frame, FrameIndex};
use crate::foundation::error::{StratumError, StratumResult};
use crate::pipeline::builder::build;
use crate::pipeline::stage::{BufferDesc, BufferRef, PipelineStage, StagePlan};
use crate::source::adapter::{FrameSource, FrameStatus};

/// Lifecycle of a [`CompositionJob`].
///
/// `Pending -> Validated -> Built -> Running -> {Completed | Failed | Cancelled}`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Validated,
    Built,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Built => "built",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Cooperative cancellation flag, checked between ticks.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// What happens to already-encoded output when a job does not complete.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialOutput {
    /// Finalize the sink with the frames encoded so far.
    #[default]
    Retain,
    /// Abort the sink, discarding its output.
    Discard,
}

/// Options for [`CompositionJob::run`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RunOpts {
    pub partial_output: PartialOutput,
}

/// Timing and buffer counters for one job.
#[derive(Clone, Copy, Debug, Default, PartialEq, serde::Serialize)]
pub struct JobStats {
    /// Validation, build and admission.
    pub prepare_secs: f64,
    /// Tick loop wall time, including sink calls.
    pub execute_secs: f64,
    /// Time spent inside the sink.
    pub encode_secs: f64,
    /// Produced frames per second of execute time.
    pub frames_per_sec: f64,
    /// Device allocations made by the job's pool.
    pub buffer_allocations: u64,
    /// Borrows served from recycled buffers.
    pub buffer_recycles: u64,
    /// Device-wide high-water mark at the end of the job.
    pub peak_device_bytes: u64,
}

/// Terminal status of a job driven by [`CompositionJob::run`].
#[derive(Debug)]
pub struct JobReport {
    pub job_id: u64,
    pub state: JobState,
    pub total_frames: u64,
    pub frames_produced: u64,
    pub frames_encoded: u64,
    /// The failure that ended the job, if any.
    pub error: Option<StratumError>,
    pub stats: JobStats,
}

/// A composition request bound to live frame sources.
///
/// Created by [`crate::Engine::submit`], which takes it through validation, build and admission.
/// Dropping a job at any point releases whatever it holds.
pub struct CompositionJob<A: Accelerator> {
    id: u64,
    ctx: Arc<AcceleratorContext<A>>,
    request: CompositionRequest,
    sources: Vec<Box<dyn FrameSource>>,
    cancel: CancelToken,
    pool_opts: BufferPoolOpts,
    state: JobState,
    normalized: Option<NormalizedRequest>,
    plan: Option<StagePlan>,
    permit: Option<AdmissionPermit>,
    created: Instant,
}

impl<A: Accelerator> CompositionJob<A> {
    /// A `Pending` job. `sources[k]` feeds `SourceId(k)`: background first, then layers in
    /// declaration order.
    pub fn new(
        ctx: Arc<AcceleratorContext<A>>,
        request: CompositionRequest,
        sources: Vec<Box<dyn FrameSource>>,
        pool_opts: BufferPoolOpts,
    ) -> Self {
        let id = ctx.next_job_id();
        Self {
            id,
            ctx,
            request,
            sources,
            cancel: CancelToken::new(),
            pool_opts,
            state: JobState::Pending,
            normalized: None,
            plan: None,
            permit: None,
            created: Instant::now(),
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn request(&self) -> &CompositionRequest {
        &self.request
    }

    pub fn normalized(&self) -> Option<&NormalizedRequest> {
        self.normalized.as_ref()
    }

    pub fn plan(&self) -> Option<&StagePlan> {
        self.plan.as_ref()
    }

    /// Output frame count, once validated.
    pub fn total_frames(&self) -> Option<u64> {
        self.normalized.as_ref().map(|n| n.total_frames)
    }

    /// A handle that cancels this job from any thread.
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    fn expect_state(&self, expected: JobState, action: &str) -> StratumResult<()> {
        if self.state != expected {
            return Err(StratumError::pipeline_init(format!(
                "job {} cannot {action} while {}",
                self.id, self.state
            )));
        }
        Ok(())
    }

    /// `Pending -> Validated`.
    pub fn validate(&mut self) -> StratumResult<&NormalizedRequest> {
        self.expect_state(JobState::Pending, "validate")?;
        let normalized = validate(&self.request)?;
        self.state = JobState::Validated;
        tracing::debug!(job = self.id, "job validated");
        Ok(self.normalized.insert(normalized))
    }

    /// `Validated -> Built`. Checks the plan against device capabilities and the bound sources.
    pub fn build(&mut self) -> StratumResult<&StagePlan> {
        self.expect_state(JobState::Validated, "build")?;
        let normalized = self
            .normalized
            .as_ref()
            .ok_or_else(|| StratumError::pipeline_init("job has no normalized request"))?;
        let plan = build(normalized);
        check_realizable(&self.ctx.caps(), &plan)?;
        check_sources(normalized, &self.sources)?;
        self.state = JobState::Built;
        tracing::debug!(
            job = self.id,
            stages = plan.len(),
            fingerprint = %plan.fingerprint(),
            "job built"
        );
        Ok(self.plan.insert(plan))
    }

    /// Take a device slot from the admission gate, blocking or failing per its policy.
    pub fn admit(&mut self) -> StratumResult<()> {
        self.expect_state(JobState::Built, "be admitted")?;
        if self.permit.is_none() {
            self.permit = Some(self.ctx.admit()?);
        }
        Ok(())
    }

    /// Start the tick loop. The job is consumed; frames are produced lazily by the stream.
    pub fn execute(mut self) -> StratumResult<FrameStream<A>> {
        self.admit()?;
        let (Some(normalized), Some(plan), Some(permit)) =
            (self.normalized.take(), self.plan.take(), self.permit.take())
        else {
            return Err(StratumError::pipeline_init("job is not ready to execute"));
        };
        let pool = BufferPool::new(Arc::clone(&self.ctx), self.pool_opts);
        let labels = plan.stages().iter().map(ToString::to_string).collect();
        let staging = normalized
            .sources()
            .map(|s| Frame::solid(s.resolution, [0, 0, 0, 0]))
            .collect::<Vec<_>>();
        Ok(FrameStream {
            id: self.id,
            state: JobState::Built,
            fetched: vec![false; staging.len()],
            slots: (0..plan.buffer_count()).map(|_| None).collect(),
            staging,
            labels,
            pool: Some(pool),
            pool_stats: BufferPoolStats::default(),
            permit: Some(permit),
            sources: std::mem::take(&mut self.sources),
            cancel: self.cancel.clone(),
            ctx: Arc::clone(&self.ctx),
            prepare_secs: self.created.elapsed().as_secs_f64(),
            started: None,
            execute_secs: 0.0,
            next: 0,
            normalized,
            plan,
        })
    }

    /// Drive the job to a terminal state, pushing every frame into `sink`.
    ///
    /// Errors are reported in the returned [`JobReport`]. On cancellation or failure the sink is
    /// finalized or aborted per `opts.partial_output`.
    #[tracing::instrument(skip_all, fields(job = self.id))]
    pub fn run(self, sink: &mut dyn EncodeSink, opts: RunOpts) -> JobReport {
        let id = self.id;
        let total_frames = self.total_frames().unwrap_or(0);
        let ctx = Arc::clone(&self.ctx);
        let mut stream = match self.execute() {
            Ok(stream) => stream,
            Err(e) => {
                return JobReport {
                    job_id: id,
                    state: JobState::Failed,
                    total_frames,
                    frames_produced: 0,
                    frames_encoded: 0,
                    error: Some(e),
                    stats: JobStats::default(),
                };
            }
        };

        let n = &stream.normalized;
        let cfg = SinkConfig {
            width: n.resolution.width,
            height: n.resolution.height,
            fps: n.fps,
            codec: n.codec,
            total_frames,
        };
        let mut error = None;
        let mut encoded = 0u64;
        let mut encode_secs = 0.0;
        stream.start();
        match sink.begin(cfg) {
            Ok(()) => {
                while let Some(item) = stream.next() {
                    let frame = match item {
                        Ok(frame) => frame,
                        Err(e) => {
                            error = Some(e);
                            break;
                        }
                    };
                    let t = Instant::now();
                    let res = sink.consume(FrameIndex(encoded), &frame);
                    encode_secs += t.elapsed().as_secs_f64();
                    if let Err(e) = res {
                        tracing::warn!(frame = encoded, error = %e, "sink rejected frame");
                        stream.finish(JobState::Failed);
                        error = Some(e);
                        break;
                    }
                    encoded += 1;
                }
            }
            Err(e) => {
                stream.finish(JobState::Failed);
                error = Some(e);
            }
        }

        // A sink can reject the last frame after the stream has already completed.
        let mut state = if error.is_some() {
            JobState::Failed
        } else {
            stream.state()
        };
        let finalize = match state {
            JobState::Completed => sink.end(),
            _ if opts.partial_output == PartialOutput::Retain && encoded > 0 => sink.end(),
            _ => sink.abort(),
        };
        if let Err(e) = finalize {
            tracing::warn!(error = %e, "sink finalization failed");
            if error.is_none() {
                error = Some(e);
            }
            if state == JobState::Completed {
                state = JobState::Failed;
            }
        }

        let prepare_secs = stream.prepare_secs;
        let execute_secs = stream.execute_secs;
        let pool = stream.pool_stats;
        let frames_produced = stream.frames_produced();
        drop(stream);
        let stats = JobStats {
            prepare_secs,
            execute_secs,
            encode_secs,
            frames_per_sec: if execute_secs > 0.0 {
                frames_produced as f64 / execute_secs
            } else {
                0.0
            },
            buffer_allocations: pool.misses,
            buffer_recycles: pool.hits,
            peak_device_bytes: ctx.stats().peak_bytes,
        };
        tracing::info!(
            %state,
            frames_produced,
            frames_encoded = encoded,
            fps = stats.frames_per_sec,
            "job finished"
        );
        JobReport {
            job_id: id,
            state,
            total_frames,
            frames_produced,
            frames_encoded: encoded,
            error,
            stats,
        }
    }
}

impl<A: Accelerator> fmt::Debug for CompositionJob<A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositionJob")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("sources", &self.sources.len())
            .finish_non_exhaustive()
    }
}

fn check_realizable(caps: &DeviceCaps, plan: &StagePlan) -> StratumResult<()> {
    if let Some(max) = caps.max_overlays
        && plan.overlay_count() > max
    {
        return Err(StratumError::pipeline_init(format!(
            "{} overlay stages exceed device '{}' limit of {max}",
            plan.overlay_count(),
            caps.name
        )));
    }
    for i in 0..plan.buffer_count() {
        let Some(desc) = plan.buffer_desc(BufferRef(i as u32)) else {
            continue;
        };
        if !caps.formats.contains(&desc.format) {
            return Err(StratumError::pipeline_init(format!(
                "device '{}' cannot hold {} buffers",
                caps.name, desc.format
            )));
        }
        if let Some(max) = caps.max_resolution
            && (desc.resolution.width > max.width || desc.resolution.height > max.height)
        {
            return Err(StratumError::pipeline_init(format!(
                "buffer {} exceeds device '{}' maximum {max}",
                desc.resolution, caps.name
            )));
        }
    }
    Ok(())
}

fn check_sources(
    normalized: &NormalizedRequest,
    sources: &[Box<dyn FrameSource>],
) -> StratumResult<()> {
    let expected = normalized.layers.len() + 1;
    if sources.len() != expected {
        return Err(StratumError::pipeline_init(format!(
            "{} frame sources bound, composition needs {expected}",
            sources.len()
        )));
    }
    for (source, adapter) in normalized.sources().zip(sources) {
        if adapter.resolution() != source.resolution {
            return Err(StratumError::pipeline_init(format!(
                "adapter for {} '{}' delivers {}, expected {}",
                source.id,
                source.source.name,
                adapter.resolution(),
                source.resolution
            )));
        }
    }
    Ok(())
}

/// Lazy, finite sequence of composited frames for one job.
///
/// Yields `total_frames` frames, or stops early at the first error (yielded once) or at a
/// cancellation observed between ticks. Every device buffer the job holds is released as soon as
/// the stream reaches a terminal state or is dropped.
pub struct FrameStream<A: Accelerator> {
    id: u64,
    state: JobState,
    ctx: Arc<AcceleratorContext<A>>,
    normalized: NormalizedRequest,
    plan: StagePlan,
    labels: Vec<String>,
    sources: Vec<Box<dyn FrameSource>>,
    staging: Vec<Frame>,
    fetched: Vec<bool>,
    slots: Vec<Option<A::Memory>>,
    pool: Option<BufferPool<A>>,
    pool_stats: BufferPoolStats,
    permit: Option<AdmissionPermit>,
    cancel: CancelToken,
    prepare_secs: f64,
    started: Option<Instant>,
    execute_secs: f64,
    next: u64,
}

impl<A: Accelerator> FrameStream<A> {
    pub fn job_id(&self) -> u64 {
        self.id
    }

    pub fn state(&self) -> JobState {
        self.state
    }

    pub fn total_frames(&self) -> u64 {
        self.normalized.total_frames
    }

    /// Frames downloaded so far.
    pub fn frames_produced(&self) -> u64 {
        self.next
    }

    pub fn plan(&self) -> &StagePlan {
        &self.plan
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Pool counters; final once the stream is terminal.
    pub fn pool_stats(&self) -> BufferPoolStats {
        match &self.pool {
            Some(pool) => pool.stats(),
            None => self.pool_stats,
        }
    }

    pub fn prepare_secs(&self) -> f64 {
        self.prepare_secs
    }

    /// `Built -> Running`. No-op once running.
    fn start(&mut self) {
        if self.state == JobState::Built {
            self.state = JobState::Running;
            self.started = Some(Instant::now());
            tracing::debug!(job = self.id, total = self.normalized.total_frames, "job running");
        }
    }

    /// Move to a terminal state and release every held resource. No-op once terminal.
    fn finish(&mut self, state: JobState) {
        if self.state.is_terminal() {
            return;
        }
        if let Some(started) = self.started {
            self.execute_secs = started.elapsed().as_secs_f64();
        }
        self.release_all();
        self.state = state;
        match state {
            JobState::Failed => tracing::warn!(job = self.id, frame = self.next, "job failed"),
            _ => tracing::info!(job = self.id, frames = self.next, %state, "job stopped"),
        }
    }

    fn release_all(&mut self) {
        if let Some(mut pool) = self.pool.take() {
            for (i, slot) in self.slots.iter_mut().enumerate() {
                if let Some(mem) = slot.take()
                    && let Some(desc) = self.plan.buffer_desc(BufferRef(i as u32))
                {
                    pool.release(desc, mem);
                }
            }
            pool.drain();
            self.pool_stats = pool.stats();
            tracing::debug!(job = self.id, pool = ?self.pool_stats, "job buffers released");
        }
        self.permit = None;
    }

    fn tick(&mut self, frame: u64) -> StratumResult<Frame> {
        let device = self.ctx.device();
        let pool = self
            .pool
            .as_mut()
            .ok_or_else(|| StratumError::stage_execution(frame, "tick", "buffer pool released"))?;
        self.fetched.fill(false);
        let mut output = None;

        for (si, stage) in self.plan.stages().iter().enumerate() {
            let label = self.labels[si].as_str();
            let dev_err = |e: DeviceError| {
                StratumError::stage_execution(frame, label, e.to_string())
            };
            match *stage {
                PipelineStage::Upload { source, dst } => {
                    fetch(
                        &self.normalized,
                        &mut self.sources,
                        &mut self.staging,
                        &mut self.fetched,
                        source,
                        frame,
                        label,
                    )?;
                    let desc = buffer_desc(&self.plan, dst, frame, label)?;
                    let mut mem = pool.borrow(desc, label)?;
                    let uploaded = device.upload(&self.staging[source.index()], desc, &mut mem);
                    self.slots[dst.index()] = Some(mem);
                    uploaded.map_err(dev_err)?;
                }
                PipelineStage::ConvertAlpha { source } => {
                    fetch(
                        &self.normalized,
                        &mut self.sources,
                        &mut self.staging,
                        &mut self.fetched,
                        source,
                        frame,
                        label,
                    )?;
                    device
                        .convert_alpha(&mut self.staging[source.index()])
                        .map_err(dev_err)?;
                }
                PipelineStage::Overlay {
                    accumulator,
                    layer,
                    out,
                    x,
                    y,
                    opacity,
                    scroll,
                    margins,
                } => {
                    let out_desc = buffer_desc(&self.plan, out, frame, label)?;
                    let layer_desc = buffer_desc(&self.plan, layer, frame, label)?;
                    let mut out_mem = pool.borrow(out_desc, label)?;
                    let (Some(acc_mem), Some(layer_mem)) = (
                        self.slots[accumulator.index()].as_ref(),
                        self.slots[layer.index()].as_ref(),
                    ) else {
                        pool.release(out_desc, out_mem);
                        return Err(StratumError::stage_execution(
                            frame,
                            label,
                            "overlay input buffer is not resident",
                        ));
                    };
                    let params = OverlayParams {
                        x,
                        y: scrolled_y(y, scroll.as_ref(), frame),
                        opacity,
                        layer_format: layer_desc.format,
                        resolution: out_desc.resolution,
                        margins,
                    };
                    let done = device.overlay(params, acc_mem, layer_mem, &mut out_mem);
                    self.slots[out.index()] = Some(out_mem);
                    done.map_err(dev_err)?;
                }
                PipelineStage::Download { accumulator } => {
                    let desc = buffer_desc(&self.plan, accumulator, frame, label)?;
                    let mem = self.slots[accumulator.index()].as_ref().ok_or_else(|| {
                        StratumError::stage_execution(frame, label, "accumulator is not resident")
                    })?;
                    output = Some(device.download(mem, desc).map_err(dev_err)?);
                }
            }

            for buf in self.plan.released_after(si) {
                if let Some(mem) = self.slots[buf.index()].take()
                    && let Some(desc) = self.plan.buffer_desc(buf)
                {
                    pool.release(desc, mem);
                }
            }
        }

        output.ok_or_else(|| {
            StratumError::stage_execution(frame, "tick", "stage plan produced no download")
        })
    }
}

fn buffer_desc(
    plan: &StagePlan,
    buf: BufferRef,
    frame: u64,
    label: &str,
) -> StratumResult<BufferDesc> {
    plan.buffer_desc(buf).ok_or_else(|| {
        StratumError::stage_execution(frame, label, format!("unknown buffer {buf}"))
    })
}

/// Stage source `id` for output frame `frame`, once per tick.
fn fetch(
    normalized: &NormalizedRequest,
    sources: &mut [Box<dyn FrameSource>],
    staging: &mut [Frame],
    fetched: &mut [bool],
    id: SourceId,
    frame: u64,
    label: &str,
) -> StratumResult<()> {
    let idx = id.index();
    if fetched[idx] {
        return Ok(());
    }
    let source = normalized.source(id).ok_or_else(|| {
        StratumError::stage_execution(frame, label, format!("unknown source {id}"))
    })?;
    let src_index = source.source_frame_index(frame);
    let status = sources[idx]
        .read_frame(src_index, &mut staging[idx])
        .map_err(|e| StratumError::stage_execution(frame, label, e.to_string()))?;
    if status == FrameStatus::EndOfSource {
        return Err(StratumError::stage_execution(
            frame,
            label,
            format!(
                "source '{}' ended before frame {src_index}",
                source.source.name
            ),
        ));
    }
    let staged = &staging[idx];
    if staged.resolution() != source.resolution || staged.data.len() != staged.expected_len() {
        return Err(StratumError::stage_execution(
            frame,
            label,
            format!(
                "source '{}' delivered {} ({} bytes), expected {}",
                source.source.name,
                staged.resolution(),
                staged.data.len(),
                source.resolution
            ),
        ));
    }
    fetched[idx] = true;
    Ok(())
}

impl<A: Accelerator> Iterator for FrameStream<A> {
    type Item = StratumResult<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.state.is_terminal() {
            return None;
        }
        if self.next >= self.normalized.total_frames {
            self.finish(JobState::Completed);
            return None;
        }
        if self.cancel.is_cancelled() {
            self.finish(JobState::Cancelled);
            return None;
        }
        self.start();

        let frame = self.next;
        match self.tick(frame) {
            Ok(out) => {
                self.next += 1;
                if self.next == self.normalized.total_frames {
                    self.finish(JobState::Completed);
                }
                Some(Ok(out))
            }
            Err(e) => {
                tracing::warn!(job = self.id, frame, error = %e, "tick failed");
                self.finish(JobState::Failed);
                Some(Err(e))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.state.is_terminal() {
            return (0, Some(0));
        }
        let left = self.normalized.total_frames.saturating_sub(self.next);
        (0, usize::try_from(left).ok())
    }
}

impl<A: Accelerator> Drop for FrameStream<A> {
    fn drop(&mut self) {
        self.finish(JobState::Cancelled);
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/job.rs"]
mod tests;
