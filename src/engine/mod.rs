//! Job admission and the per-frame tick loop.

pub mod job;

use std::sync::Arc;

use crate::accel::context::{AcceleratorContext, DeviceStats};
use crate::accel::device::Accelerator;
use crate::accel::gate::AdmissionPolicy;
use crate::accel::pool::BufferPoolOpts;
use crate::composition::model::CompositionRequest;
use crate::composition::validate::validate;
use crate::foundation::error::StratumResult;
use crate::source::adapter::{FrameSource, open_source};

pub use job::{
    CancelToken, CompositionJob, FrameStream, JobReport, JobState, JobStats, PartialOutput,
    RunOpts,
};

/// Engine-wide settings.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EngineOpts {
    /// Jobs allowed to hold device resources at once.
    pub max_concurrent_jobs: usize,
    /// What a submission does when every slot is taken.
    pub admission: AdmissionPolicy,
    /// Per-job buffer pool limits.
    pub pool: BufferPoolOpts,
}

impl Default for EngineOpts {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            admission: AdmissionPolicy::Block,
            pool: BufferPoolOpts::default(),
        }
    }
}

/// Owns one accelerator and admits composition jobs onto it.
///
/// Cheap to share: clone the [`Arc`] from [`Engine::context`] or wrap the engine itself.
pub struct Engine<A: Accelerator> {
    ctx: Arc<AcceleratorContext<A>>,
    opts: EngineOpts,
}

impl<A: Accelerator> Engine<A> {
    pub fn new(device: A, opts: EngineOpts) -> Self {
        Self {
            ctx: Arc::new(AcceleratorContext::new(
                device,
                opts.max_concurrent_jobs,
                opts.admission,
            )),
            opts,
        }
    }

    pub fn opts(&self) -> &EngineOpts {
        &self.opts
    }

    pub fn context(&self) -> &Arc<AcceleratorContext<A>> {
        &self.ctx
    }

    pub fn stats(&self) -> DeviceStats {
        self.ctx.stats()
    }

    /// Validate, build and admit a job bound to caller-supplied adapters.
    ///
    /// `sources[0]` feeds the background and `sources[k + 1]` feeds `request.layers[k]`. Every
    /// rejection is returned here, before the job touches device memory; with
    /// [`AdmissionPolicy::Block`] this call waits for a free job slot.
    #[tracing::instrument(skip_all, fields(layers = request.layers.len()))]
    pub fn submit(
        &self,
        request: CompositionRequest,
        sources: Vec<Box<dyn FrameSource>>,
    ) -> StratumResult<CompositionJob<A>> {
        let mut job = CompositionJob::new(Arc::clone(&self.ctx), request, sources, self.opts.pool);
        job.validate()?;
        job.build()?;
        job.admit()?;
        tracing::info!(job = job.id(), total_frames = job.total_frames(), "job admitted");
        Ok(job)
    }

    /// Like [`Engine::submit`], opening the default adapter for every source.
    ///
    /// The request is validated before any media is opened.
    pub fn submit_with_default_sources(
        &self,
        request: CompositionRequest,
    ) -> StratumResult<CompositionJob<A>> {
        let normalized = validate(&request)?;
        let sources = normalized
            .sources()
            .map(|s| open_source(&s.source, normalized.resolution))
            .collect::<StratumResult<Vec<_>>>()?;
        self.submit(request, sources)
    }
}

impl<A: Accelerator> std::fmt::Debug for Engine<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine")
            .field("ctx", &self.ctx)
            .field("opts", &self.opts)
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/engine/engine.rs"]
mod tests;
