use super::*;
use crate::accel::cpu::CpuAccelerator;
use crate::composition::model::Layer;
use crate::foundation::core::{Fps, Resolution};
use crate::foundation::error::{ErrorKind, MismatchAttribute};
use crate::source::adapter::SolidColorSource;
use crate::source::media::MediaSource;

fn res() -> Resolution {
    Resolution::new(16, 16)
}

fn request() -> CompositionRequest {
    CompositionRequest::new(
        MediaSource::color("bg", [0, 0, 0, 255], res()),
        res(),
        Fps::new(30, 1).unwrap(),
        0.1,
    )
    .with_layer(Layer::new(
        MediaSource::color("dot", [255, 255, 255, 255], Resolution::new(4, 4)).with_fit(
            crate::source::media::FitMode::Stretch,
        ),
        1,
        1,
        1,
    ))
}

fn engine(policy: AdmissionPolicy) -> Engine<CpuAccelerator> {
    Engine::new(
        CpuAccelerator::default(),
        EngineOpts {
            max_concurrent_jobs: 1,
            admission: policy,
            ..EngineOpts::default()
        },
    )
}

#[test]
fn default_opts_allow_two_blocking_jobs() {
    let opts = EngineOpts::default();
    assert_eq!(opts.max_concurrent_jobs, 2);
    assert_eq!(opts.admission, AdmissionPolicy::Block);

    let parsed: EngineOpts = serde_json::from_str(r#"{"admission":"reject"}"#).unwrap();
    assert_eq!(parsed.admission, AdmissionPolicy::Reject);
    assert_eq!(parsed.max_concurrent_jobs, 2);
}

#[test]
fn submit_with_default_sources_returns_built_job() {
    let engine = engine(AdmissionPolicy::Reject);
    let job = engine.submit_with_default_sources(request()).unwrap();
    assert_eq!(job.state(), JobState::Built);
    assert_eq!(job.total_frames(), Some(3));
    assert_eq!(engine.context().gate().active(), 1);

    drop(job);
    assert_eq!(engine.context().gate().active(), 0);
}

#[test]
fn invalid_requests_are_rejected_without_allocating() {
    let engine = engine(AdmissionPolicy::Reject);
    let mut req = request();
    req.layers[0].source.fit = None;

    let err = engine.submit_with_default_sources(req).unwrap_err();
    let v = err.as_validation().unwrap();
    assert_eq!(v.attribute, MismatchAttribute::Resolution);
    assert_eq!(engine.stats().allocations, 0);
    assert_eq!(engine.context().gate().active(), 0);
}

#[test]
fn saturated_engine_rejects_when_policy_says_so() {
    let engine = engine(AdmissionPolicy::Reject);
    let first = engine.submit_with_default_sources(request()).unwrap();
    let err = engine.submit_with_default_sources(request()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Resource);

    let report = first.run(&mut crate::encode::sink::FrameCounterSink::new(), RunOpts::default());
    assert_eq!(report.state, JobState::Completed);
    assert!(engine.submit_with_default_sources(request()).is_ok());
}

#[test]
fn submit_accepts_caller_adapters() {
    let engine = engine(AdmissionPolicy::Block);
    let sources: Vec<Box<dyn FrameSource>> = vec![
        Box::new(SolidColorSource::new(res(), [0, 0, 0, 255])),
        Box::new(SolidColorSource::new(res(), [0, 255, 0, 255])),
    ];
    let stream = engine.submit(request(), sources).unwrap().execute().unwrap();
    let frames = stream.collect::<StratumResult<Vec<_>>>().unwrap();
    assert_eq!(frames.len(), 3);
    assert_eq!(frames[0].pixel(0, 0), Some([0, 0, 0, 255]));
    assert_eq!(frames[0].pixel(1, 1), Some([0, 255, 0, 255]));
    assert_eq!(engine.stats().live_buffers, 0);
}
