use super::*;
use crate::accel::cpu::{CpuAccelerator, CpuAcceleratorOpts};
use crate::accel::gate::AdmissionPolicy;
use crate::composition::model::{Layer, ScrollMotion};
use crate::encode::sink::InMemorySink;
use crate::foundation::core::{Fps, Margins, Resolution};
use crate::foundation::error::ErrorKind;
use crate::source::adapter::{MemoryVideoSource, SolidColorSource};
use crate::source::media::{MediaSource, SourceLocator};

const RES: Resolution = Resolution {
    width: 8,
    height: 8,
};

fn ctx_with(opts: CpuAcceleratorOpts) -> Arc<AcceleratorContext<CpuAccelerator>> {
    Arc::new(AcceleratorContext::new(
        CpuAccelerator::new(opts).unwrap(),
        1,
        AdmissionPolicy::Reject,
    ))
}

fn ctx() -> Arc<AcceleratorContext<CpuAccelerator>> {
    ctx_with(CpuAcceleratorOpts::default())
}

/// Five frames at 10 fps over a red plate with one blue video layer.
fn request(video_frames: u64) -> CompositionRequest {
    let fps = Fps::new(10, 1).unwrap();
    let layer = MediaSource::video(
        "clip",
        SourceLocator::Stream {
            handle: "clip".to_string(),
        },
        RES,
        fps,
        video_frames,
    );
    CompositionRequest::new(MediaSource::color("bg", [255, 0, 0, 255], RES), RES, fps, 0.5)
        .with_layer(Layer::new(layer, 2, 2, 1))
}

fn sources(video_frames: u64) -> Vec<Box<dyn FrameSource>> {
    vec![
        Box::new(SolidColorSource::new(RES, [255, 0, 0, 255])),
        Box::new(
            MemoryVideoSource::generate(RES, video_frames, |i| [0, 0, 40 * i as u8, 255]).unwrap(),
        ),
    ]
}

fn built(ctx: &Arc<AcceleratorContext<CpuAccelerator>>) -> CompositionJob<CpuAccelerator> {
    let mut job = CompositionJob::new(
        Arc::clone(ctx),
        request(5),
        sources(5),
        BufferPoolOpts::default(),
    );
    job.validate().unwrap();
    job.build().unwrap();
    job
}

#[test]
fn job_walks_prepare_states_in_order() {
    let ctx = ctx();
    let mut job = CompositionJob::new(
        Arc::clone(&ctx),
        request(5),
        sources(5),
        BufferPoolOpts::default(),
    );
    assert_eq!(job.state(), JobState::Pending);
    assert!(job.build().is_err());

    assert_eq!(job.validate().unwrap().total_frames, 5);
    assert_eq!(job.state(), JobState::Validated);
    assert!(job.validate().is_err());

    assert_eq!(job.build().unwrap().overlay_count(), 1);
    assert_eq!(job.state(), JobState::Built);
    assert_eq!(ctx.stats().allocations, 0);
}

#[test]
fn build_rejects_plans_beyond_device_caps() {
    let ctx = ctx_with(CpuAcceleratorOpts {
        max_overlays: Some(0),
        ..CpuAcceleratorOpts::default()
    });
    let mut job = CompositionJob::new(
        Arc::clone(&ctx),
        request(5),
        sources(5),
        BufferPoolOpts::default(),
    );
    job.validate().unwrap();
    let err = job.build().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::PipelineInit);
    assert_eq!(job.state(), JobState::Validated);
}

#[test]
fn build_rejects_mismatched_adapters() {
    let ctx = ctx();
    let mut short = CompositionJob::new(
        Arc::clone(&ctx),
        request(5),
        sources(5).into_iter().take(1).collect(),
        BufferPoolOpts::default(),
    );
    short.validate().unwrap();
    assert_eq!(short.build().unwrap_err().kind(), ErrorKind::PipelineInit);

    let mut wrong_size = sources(5);
    wrong_size[0] = Box::new(SolidColorSource::new(Resolution::new(4, 4), [0; 4]));
    let mut job = CompositionJob::new(
        Arc::clone(&ctx),
        request(5),
        wrong_size,
        BufferPoolOpts::default(),
    );
    job.validate().unwrap();
    let err = job.build().unwrap_err();
    assert!(err.to_string().contains("4x4"), "{err}");
}

#[test]
fn stream_yields_every_frame_then_completes() {
    let ctx = ctx();
    let mut stream = built(&ctx).execute().unwrap();
    assert_eq!(stream.state(), JobState::Built);

    let frames = stream.by_ref().collect::<StratumResult<Vec<_>>>().unwrap();
    assert_eq!(frames.len(), 5);
    assert_eq!(stream.state(), JobState::Completed);
    assert_eq!(stream.frames_produced(), 5);

    // Background outside the layer rect, layer content inside it.
    assert_eq!(frames[3].pixel(0, 0), Some([255, 0, 0, 255]));
    assert_eq!(frames[3].pixel(2, 2), Some([0, 0, 120, 255]));
    assert_eq!(frames[3].pixel(7, 7), Some([0, 0, 120, 255]));

    let st = ctx.stats();
    assert_eq!(st.live_buffers, 0);
    assert_eq!(st.live_bytes, 0);
    assert_eq!(ctx.gate().active(), 0);
    assert!(stream.pool_stats().hits > 0);
    assert!(stream.next().is_none());
}

#[test]
fn stream_completes_on_its_last_frame() {
    let ctx = ctx();
    let mut stream = built(&ctx).execute().unwrap();
    for _ in 0..stream.total_frames() {
        assert!(stream.next().unwrap().is_ok());
    }

    assert_eq!(stream.state(), JobState::Completed);
    assert_eq!(ctx.stats().live_buffers, 0);
    assert_eq!(ctx.gate().active(), 0);
    drop(stream);
    assert_eq!(ctx.stats().allocations, ctx.stats().frees);
}

#[test]
fn exhausted_source_fails_the_job() {
    let ctx = ctx();
    let mut sources = sources(5);
    sources[1] = Box::new(MemoryVideoSource::generate(RES, 2, |_| [0, 0, 255, 255]).unwrap());
    let mut job = CompositionJob::new(
        Arc::clone(&ctx),
        request(5),
        sources,
        BufferPoolOpts::default(),
    );
    job.validate().unwrap();
    job.build().unwrap();
    let mut stream = job.execute().unwrap();

    assert!(stream.next().unwrap().is_ok());
    assert!(stream.next().unwrap().is_ok());
    let err = stream.next().unwrap().unwrap_err();
    match &err {
        StratumError::StageExecution { frame, stage, .. } => {
            assert_eq!(*frame, 2);
            assert_eq!(stage, "Upload(ol1 -> b1)");
        }
        other => panic!("unexpected error: {other:?}"),
    }
    assert_eq!(stream.state(), JobState::Failed);
    assert!(stream.next().is_none());
    assert_eq!(ctx.stats().live_buffers, 0);
    assert_eq!(ctx.gate().active(), 0);
}

#[test]
fn cancel_stops_between_ticks() {
    let ctx = ctx();
    let mut stream = built(&ctx).execute().unwrap();
    let token = stream.cancel_token();

    assert!(stream.next().unwrap().is_ok());
    token.cancel();
    assert!(stream.next().is_none());
    assert_eq!(stream.state(), JobState::Cancelled);
    assert_eq!(stream.frames_produced(), 1);
    assert_eq!(ctx.stats().live_buffers, 0);
}

#[test]
fn dropping_a_running_stream_releases_the_device() {
    let ctx = ctx();
    {
        let mut stream = built(&ctx).execute().unwrap();
        assert!(stream.next().unwrap().is_ok());
        assert_eq!(ctx.gate().active(), 1);
    }
    assert_eq!(ctx.gate().active(), 0);
    assert_eq!(ctx.stats().live_buffers, 0);
}

#[test]
fn run_encodes_every_frame() {
    let ctx = ctx();
    let mut sink = InMemorySink::new();
    let report = built(&ctx).run(&mut sink, RunOpts::default());

    assert_eq!(report.state, JobState::Completed);
    assert!(report.error.is_none());
    assert_eq!(report.frames_encoded, 5);
    assert_eq!(report.total_frames, 5);
    assert!(sink.is_finished());
    assert_eq!(sink.config().unwrap().total_frames, 5);
    assert_eq!(sink.frames().len(), 5);
    assert!(report.stats.buffer_allocations > 0);
}

struct CancelAfter {
    inner: InMemorySink,
    token: CancelToken,
    after: usize,
}

impl EncodeSink for CancelAfter {
    fn begin(&mut self, cfg: SinkConfig) -> StratumResult<()> {
        self.inner.begin(cfg)
    }

    fn consume(&mut self, idx: FrameIndex, frame: &Frame) -> StratumResult<()> {
        self.inner.consume(idx, frame)?;
        if self.inner.frames().len() == self.after {
            self.token.cancel();
        }
        Ok(())
    }

    fn end(&mut self) -> StratumResult<()> {
        self.inner.end()
    }

    fn abort(&mut self) -> StratumResult<()> {
        self.inner.abort()
    }
}

#[test]
fn cancelled_run_retains_or_discards_partial_output() {
    for (partial, finished) in [(PartialOutput::Retain, true), (PartialOutput::Discard, false)] {
        let ctx = ctx();
        let job = built(&ctx);
        let mut sink = CancelAfter {
            inner: InMemorySink::new(),
            token: job.cancel_token(),
            after: 2,
        };
        let report = job.run(
            &mut sink,
            RunOpts {
                partial_output: partial,
            },
        );
        assert_eq!(report.state, JobState::Cancelled);
        assert!(report.error.is_none());
        assert_eq!(report.frames_encoded, 2);
        assert_eq!(sink.inner.is_finished(), finished);
        assert_eq!(sink.inner.is_aborted(), !finished);
        assert_eq!(ctx.stats().live_buffers, 0);
    }
}

#[test]
fn cancel_token_is_shared() {
    let a = CancelToken::new();
    let b = a.clone();
    assert!(!b.is_cancelled());
    a.cancel();
    assert!(b.is_cancelled());
}

/// Sink that fails `begin`, or rejects the frame at `reject_at`.
#[derive(Default)]
struct StrictSink {
    refuse_begin: bool,
    reject_at: Option<u64>,
    ended: bool,
    aborted: bool,
}

impl EncodeSink for StrictSink {
    fn begin(&mut self, _cfg: SinkConfig) -> StratumResult<()> {
        if self.refuse_begin {
            return Err(StratumError::encoding("encoder failed to start"));
        }
        Ok(())
    }

    fn consume(&mut self, idx: FrameIndex, _frame: &Frame) -> StratumResult<()> {
        if self.reject_at == Some(idx.0) {
            return Err(StratumError::encoding("encoder rejected frame"));
        }
        Ok(())
    }

    fn end(&mut self) -> StratumResult<()> {
        self.ended = true;
        Ok(())
    }

    fn abort(&mut self) -> StratumResult<()> {
        self.aborted = true;
        Ok(())
    }
}

#[test]
fn sink_that_cannot_start_fails_the_run() {
    let ctx = ctx();
    let mut sink = StrictSink {
        refuse_begin: true,
        ..StrictSink::default()
    };
    let report = built(&ctx).run(&mut sink, RunOpts::default());

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.error.as_ref().map(StratumError::kind), Some(ErrorKind::Encoding));
    assert_eq!(report.frames_produced, 0);
    assert!(sink.aborted);
    assert_eq!(ctx.gate().active(), 0);
    assert_eq!(ctx.stats().live_buffers, 0);
}

#[test]
fn rejected_last_frame_fails_a_completed_stream() {
    let ctx = ctx();
    let mut sink = StrictSink {
        reject_at: Some(4),
        ..StrictSink::default()
    };
    let report = built(&ctx).run(
        &mut sink,
        RunOpts {
            partial_output: PartialOutput::Discard,
        },
    );

    assert_eq!(report.state, JobState::Failed);
    assert_eq!(report.frames_produced, 5);
    assert_eq!(report.frames_encoded, 4);
    assert!(sink.aborted);
    assert!(!sink.ended);
}

#[test]
fn scrolling_layer_moves_inside_its_margins() {
    let ctx = ctx();
    let fps = Fps::new(10, 1).unwrap();
    let bg = MediaSource::color("bg", [255, 0, 0, 255], RES);
    let req = CompositionRequest::new(bg, RES, fps, 0.6).with_layer(
        Layer::new(MediaSource::color("roll", [0, 0, 255, 255], RES), 0, 0, 1)
            .with_scroll(ScrollMotion::new(1, 2, 5))
            .with_margins(Margins::new(1, 0)),
    );
    let sources: Vec<Box<dyn FrameSource>> = vec![
        Box::new(SolidColorSource::new(RES, [255, 0, 0, 255])),
        Box::new(SolidColorSource::new(RES, [0, 0, 255, 255])),
    ];
    let mut job = CompositionJob::new(Arc::clone(&ctx), req, sources, BufferPoolOpts::default());
    job.validate().unwrap();
    job.build().unwrap();
    let frames = job
        .execute()
        .unwrap()
        .collect::<StratumResult<Vec<_>>>()
        .unwrap();

    // Lowest layer row per frame: offsets 0, 0, 2, 4, 5, 5.
    let bottom = frames
        .iter()
        .map(|f| (0..8).rev().find(|&y| f.pixel(3, y) == Some([0, 0, 255, 255])))
        .collect::<Vec<_>>();
    assert_eq!(
        bottom,
        vec![Some(7), Some(7), Some(5), Some(3), Some(2), Some(2)]
    );
    for f in &frames {
        assert_eq!(f.pixel(3, 0), Some([255, 0, 0, 255]));
    }
}
