use std::path::Path;

use anyhow::Context as _;

use crate::foundation::core::{Frame, PixelFormat, Resolution};
use crate::foundation::error::{StratumError, StratumResult};
use crate::source::fit::fit_image;
use crate::source::media::{FitMode, MediaSource, SourceKind, SourceLocator};

/// Outcome of one adapter read.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameStatus {
    /// The destination frame holds the requested frame.
    Ready,
    /// The source has no frame at the requested index.
    EndOfSource,
}

/// Narrow boundary between decoded media and the engine.
///
/// Given a source frame index, fill `dst` with one straight-alpha RGBA8 frame at the adapter's
/// resolution. Adapters are read sequentially by one job's tick loop; loop and repeat mapping
/// happens before the call, so `index` is already in source space.
pub trait FrameSource: Send {
    /// Resolution of the frames this adapter delivers.
    fn resolution(&self) -> Resolution;

    fn read_frame(&mut self, index: u64, dst: &mut Frame) -> StratumResult<FrameStatus>;
}

/// Overwrite `dst` with straight RGBA8 `data` at `res`, reusing its allocation.
pub(crate) fn fill_frame(dst: &mut Frame, res: Resolution, data: &[u8]) {
    dst.width = res.width;
    dst.height = res.height;
    dst.format = PixelFormat::Rgba8;
    dst.data.clear();
    dst.data.extend_from_slice(data);
}

/// A constant color plate.
#[derive(Clone, Debug)]
pub struct SolidColorSource {
    res: Resolution,
    rgba: [u8; 4],
    plate: Vec<u8>,
}

impl SolidColorSource {
    pub fn new(res: Resolution, rgba: [u8; 4]) -> Self {
        Self {
            res,
            rgba,
            plate: Frame::solid(res, rgba).data,
        }
    }

    pub fn rgba(&self) -> [u8; 4] {
        self.rgba
    }
}

impl FrameSource for SolidColorSource {
    fn resolution(&self) -> Resolution {
        self.res
    }

    fn read_frame(&mut self, _index: u64, dst: &mut Frame) -> StratumResult<FrameStatus> {
        fill_frame(dst, self.res, &self.plate);
        Ok(FrameStatus::Ready)
    }
}

/// A still image, decoded and fitted once, then repeated for every index.
#[derive(Clone, Debug)]
pub struct ImageSource {
    res: Resolution,
    data: Vec<u8>,
}

impl ImageSource {
    /// Decode the image at `path`, fitting it to `target` when `fit` is set.
    pub fn open(path: &Path, target: Resolution, fit: Option<FitMode>) -> StratumResult<Self> {
        let img = image::open(path)
            .with_context(|| format!("decode image '{}'", path.display()))?
            .to_rgba8();
        Ok(Self::from_image(img, target, fit))
    }

    pub fn from_image(img: image::RgbaImage, target: Resolution, fit: Option<FitMode>) -> Self {
        let img = match fit {
            Some(mode) => fit_image(img, target, mode),
            None => img,
        };
        let (width, height) = img.dimensions();
        Self {
            res: Resolution::new(width, height),
            data: img.into_raw(),
        }
    }
}

impl FrameSource for ImageSource {
    fn resolution(&self) -> Resolution {
        self.res
    }

    fn read_frame(&mut self, _index: u64, dst: &mut Frame) -> StratumResult<FrameStatus> {
        fill_frame(dst, self.res, &self.data);
        Ok(FrameStatus::Ready)
    }
}

/// Pre-decoded frames held in memory.
#[derive(Clone, Debug)]
pub struct MemoryVideoSource {
    res: Resolution,
    frames: Vec<Frame>,
}

impl MemoryVideoSource {
    /// All frames must share one resolution.
    pub fn new(frames: Vec<Frame>) -> StratumResult<Self> {
        let res = frames
            .first()
            .map(Frame::resolution)
            .ok_or_else(|| StratumError::pipeline_init("memory video source has no frames"))?;
        if let Some((i, f)) = frames
            .iter()
            .enumerate()
            .find(|(_, f)| f.resolution() != res || f.data.len() != f.expected_len())
        {
            return Err(StratumError::pipeline_init(format!(
                "memory video frame {i} is {} ({} bytes), expected {res}",
                f.resolution(),
                f.data.len()
            )));
        }
        Ok(Self { res, frames })
    }

    /// `count` frames produced by `f(index)`.
    pub fn generate(
        res: Resolution,
        count: u64,
        mut f: impl FnMut(u64) -> [u8; 4],
    ) -> StratumResult<Self> {
        Self::new((0..count).map(|i| Frame::solid(res, f(i))).collect())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

impl FrameSource for MemoryVideoSource {
    fn resolution(&self) -> Resolution {
        self.res
    }

    fn read_frame(&mut self, index: u64, dst: &mut Frame) -> StratumResult<FrameStatus> {
        let Some(frame) = usize::try_from(index).ok().and_then(|i| self.frames.get(i)) else {
            return Ok(FrameStatus::EndOfSource);
        };
        fill_frame(dst, self.res, &frame.data);
        Ok(FrameStatus::Ready)
    }
}

/// Build the default adapter for `source`, delivering frames at `target` when it asks for a fit.
#[tracing::instrument(skip(source), fields(source = %source.name))]
pub fn open_source(
    source: &MediaSource,
    target: Resolution,
) -> StratumResult<Box<dyn FrameSource>> {
    let res = if source.fit.is_some() {
        target
    } else {
        source.native_resolution()
    };
    match (&source.locator, source.kind) {
        (SourceLocator::Color { rgba }, _) => Ok(Box::new(SolidColorSource::new(res, *rgba))),
        (SourceLocator::File { path }, SourceKind::StaticImage) => {
            Ok(Box::new(ImageSource::open(path, target, source.fit)?))
        }
        (SourceLocator::File { path }, SourceKind::MotionVideo) => {
            open_video_file(path, source, res)
        }
        (SourceLocator::Stream { handle }, _) => Err(StratumError::pipeline_init(format!(
            "stream source '{}' (handle '{handle}') needs a caller-supplied adapter",
            source.name
        ))),
    }
}

#[cfg(feature = "media-ffmpeg")]
fn open_video_file(
    path: &Path,
    source: &MediaSource,
    res: Resolution,
) -> StratumResult<Box<dyn FrameSource>> {
    Ok(Box::new(crate::source::ffmpeg::FfmpegVideoSource::new(
        path, res, source.fit,
    )?))
}

#[cfg(not(feature = "media-ffmpeg"))]
fn open_video_file(
    path: &Path,
    source: &MediaSource,
    _res: Resolution,
) -> StratumResult<Box<dyn FrameSource>> {
    Err(StratumError::pipeline_init(format!(
        "video source '{}' ({}) requires the 'media-ffmpeg' feature",
        source.name,
        path.display()
    )))
}

#[cfg(test)]
#[path = "../../tests/unit/source/adapter.rs"]
mod tests;
