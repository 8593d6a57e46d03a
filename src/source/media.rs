use std::path::PathBuf;

use crate::foundation::core::{Fps, Resolution};

/// Where a source's pixels come from.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SourceLocator {
    /// Image or video file on disk.
    File {
        /// File path.
        path: PathBuf,
    },
    /// Constant color plate (straight-alpha RGBA8).
    Color {
        /// Plate color.
        rgba: [u8; 4],
    },
    /// Caller-bound stream; the caller supplies the adapter.
    Stream {
        /// Opaque handle understood by the caller.
        handle: String,
    },
}

/// Declared media kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// One picture, repeated for as long as needed.
    #[serde(rename = "image")]
    StaticImage,
    /// A finite sequence of frames.
    #[serde(rename = "video")]
    MotionVideo,
}

/// Declared source duration.
#[derive(Clone, Copy, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceDuration {
    /// Exact frame count at the source's native rate.
    Frames(u64),
    /// Duration in seconds at the source's native rate.
    Seconds(f64),
    /// Repeat indefinitely. Only meaningful for static images.
    Loop,
}

/// Native pixel layout tag, informational. Adapters always emit [`crate::PixelFormat::Rgba8`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NativeFormat {
    Rgb8,
    #[default]
    Rgba8,
    Yuv420p,
    Nv12,
}

/// How an adapter maps native resolution onto the target resolution.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FitMode {
    /// Resize to the exact target, ignoring aspect ratio.
    Stretch,
    /// Scale to fit inside the target preserving aspect ratio, centered on opaque black.
    Contain,
    /// Crop from the top-left corner; pad with opaque black when smaller.
    CropTopLeft,
}

/// One media input. Treated as immutable once handed to the engine.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MediaSource {
    /// Human-readable name, used in diagnostics.
    pub name: String,
    pub locator: SourceLocator,
    pub kind: SourceKind,
    /// Native width in pixels.
    pub width: u32,
    /// Native height in pixels.
    pub height: u32,
    /// Native frame rate. Static images adopt the target rate and may omit it.
    #[serde(default)]
    pub fps: Option<Fps>,
    /// Declared duration. Required for images; videos declare their content length.
    #[serde(default)]
    pub duration: Option<SourceDuration>,
    #[serde(default)]
    pub native_format: NativeFormat,
    /// Whether the source carries meaningful alpha.
    #[serde(default)]
    pub alpha: bool,
    /// Resize policy applied by the adapter. `None` means native resolution is authoritative.
    #[serde(default)]
    pub fit: Option<FitMode>,
    /// Repeat a video from its first frame when it runs out.
    #[serde(default)]
    pub looping: bool,
}

impl MediaSource {
    /// A static image file with an explicit loop duration.
    pub fn image(name: impl Into<String>, path: impl Into<PathBuf>, res: Resolution) -> Self {
        Self {
            name: name.into(),
            locator: SourceLocator::File { path: path.into() },
            kind: SourceKind::StaticImage,
            width: res.width,
            height: res.height,
            fps: None,
            duration: Some(SourceDuration::Loop),
            native_format: NativeFormat::Rgba8,
            alpha: false,
            fit: None,
            looping: false,
        }
    }

    /// A solid color plate covering `res`.
    pub fn color(name: impl Into<String>, rgba: [u8; 4], res: Resolution) -> Self {
        Self {
            name: name.into(),
            locator: SourceLocator::Color { rgba },
            kind: SourceKind::StaticImage,
            width: res.width,
            height: res.height,
            fps: None,
            duration: Some(SourceDuration::Loop),
            native_format: NativeFormat::Rgba8,
            alpha: rgba[3] != 255,
            fit: None,
            looping: false,
        }
    }

    /// A motion video with a known frame count.
    pub fn video(
        name: impl Into<String>,
        locator: SourceLocator,
        res: Resolution,
        fps: Fps,
        frames: u64,
    ) -> Self {
        Self {
            name: name.into(),
            locator,
            kind: SourceKind::MotionVideo,
            width: res.width,
            height: res.height,
            fps: Some(fps),
            duration: Some(SourceDuration::Frames(frames)),
            native_format: NativeFormat::Yuv420p,
            alpha: false,
            fit: None,
            looping: false,
        }
    }

    pub fn with_alpha(mut self, alpha: bool) -> Self {
        self.alpha = alpha;
        self
    }

    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = Some(fit);
        self
    }

    pub fn with_looping(mut self, looping: bool) -> Self {
        self.looping = looping;
        self
    }

    pub fn native_resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    pub fn is_static(&self) -> bool {
        self.kind == SourceKind::StaticImage
    }
}
