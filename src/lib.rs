//! Stratum composites a background and z-ordered overlay layers into a fixed-size video.
//!
//! The flow is request-oriented:
//!
//! - Describe the output with a [`CompositionRequest`] and check it with [`validate`]
//! - Turn the normalized request into a typed [`StagePlan`] with [`build`]
//! - Submit it to an [`Engine`] and drive the resulting job into an [`EncodeSink`]
#![forbid(unsafe_code)]

mod foundation;

/// Device backends, admission control and buffer recycling.
pub mod accel;
/// Composition requests and validation.
pub mod composition;
/// Codec selection and frame sinks.
pub mod encode;
/// Job lifecycle and the per-frame tick loop.
pub mod engine;
/// Stage plans.
pub mod pipeline;
/// Media descriptors and frame adapters.
pub mod source;

pub use crate::foundation::core::{Fps, Frame, FrameIndex, Margins, PixelFormat, Resolution};
pub use crate::foundation::error::{
    ErrorKind, MismatchAttribute, SourceRole, StratumError, StratumResult, ValidationError,
};

pub use crate::accel::context::{AcceleratorContext, DeviceStats};
pub use crate::accel::cpu::{CpuAccelerator, CpuAcceleratorOpts};
pub use crate::accel::device::{Accelerator, DeviceCaps, DeviceError, OverlayParams};
pub use crate::accel::gate::AdmissionPolicy;
pub use crate::accel::pool::{BufferPoolOpts, BufferPoolStats};
pub use crate::composition::model::{CompositionRequest, Layer, ScrollMotion, SourceId};
pub use crate::composition::validate::{NormalizedRequest, validate};
pub use crate::encode::codec::OutputCodec;
pub use crate::encode::ffmpeg::{FfmpegSink, FfmpegSinkOpts};
pub use crate::encode::sink::{EncodeSink, FrameCounterSink, InMemorySink, SinkConfig};
pub use crate::engine::{
    CancelToken, CompositionJob, Engine, EngineOpts, FrameStream, JobReport, JobState, JobStats,
    PartialOutput, RunOpts,
};
pub use crate::pipeline::builder::build;
pub use crate::pipeline::stage::{BufferDesc, BufferRef, PipelineStage, StagePlan};
pub use crate::source::adapter::{
    FrameSource, FrameStatus, ImageSource, MemoryVideoSource, SolidColorSource, open_source,
};
pub use crate::source::ffmpeg::{MediaProbe, probe_media};
pub use crate::source::media::{FitMode, MediaSource, SourceDuration, SourceKind, SourceLocator};
