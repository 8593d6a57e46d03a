use std::path::{Path, PathBuf};

use crate::foundation::core::{Fps, Resolution};
use crate::foundation::error::{StratumError, StratumResult};
use crate::source::media::{MediaSource, SourceDuration, SourceLocator};

/// Stream metadata reported by `ffprobe`.
#[derive(Clone, Debug, PartialEq)]
pub struct MediaProbe {
    pub path: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fps: Option<Fps>,
    /// Frame count, when the container reports one.
    pub frames: Option<u64>,
    pub duration_secs: Option<f64>,
    pub has_audio: bool,
}

impl MediaProbe {
    /// A motion-video [`MediaSource`] described by this probe.
    pub fn to_media_source(&self, name: impl Into<String>) -> StratumResult<MediaSource> {
        let fps = self.fps.ok_or_else(|| {
            StratumError::pipeline_init(format!(
                "'{}' has no usable frame rate",
                self.path.display()
            ))
        })?;
        let mut source = MediaSource::video(
            name,
            SourceLocator::File {
                path: self.path.clone(),
            },
            Resolution::new(self.width, self.height),
            fps,
            self.frames.unwrap_or(0),
        );
        source.duration = match (self.frames, self.duration_secs) {
            (Some(n), _) => Some(SourceDuration::Frames(n)),
            (None, Some(s)) => Some(SourceDuration::Seconds(s)),
            (None, None) => None,
        };
        Ok(source)
    }
}

/// Parse an ffprobe rate such as `"60/1"` or `"30000/1001"`.
pub(crate) fn parse_rate(s: &str) -> Option<Fps> {
    let (num, den) = s.split_once('/')?;
    Fps::new(num.trim().parse().ok()?, den.trim().parse().ok()?).ok()
}

/// Probe a media file through `ffprobe`.
#[cfg(feature = "media-ffmpeg")]
pub fn probe_media(path: &Path) -> StratumResult<MediaProbe> {
    #[derive(serde::Deserialize)]
    struct ProbeStream {
        codec_type: Option<String>,
        width: Option<u32>,
        height: Option<u32>,
        r_frame_rate: Option<String>,
        nb_frames: Option<String>,
        duration: Option<String>,
    }
    #[derive(serde::Deserialize)]
    struct ProbeOut {
        streams: Vec<ProbeStream>,
    }

    let out = std::process::Command::new("ffprobe")
        .args(["-v", "error", "-print_format", "json", "-show_streams"])
        .arg(path)
        .output()
        .map_err(|e| StratumError::pipeline_init(format!("failed to run ffprobe: {e}")))?;
    if !out.status.success() {
        return Err(StratumError::pipeline_init(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let parsed: ProbeOut = serde_json::from_slice(&out.stdout)
        .map_err(|e| StratumError::serde(format!("ffprobe json parse failed: {e}")))?;
    let video = parsed
        .streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or_else(|| StratumError::pipeline_init("no video stream found"))?;
    let (Some(width), Some(height)) = (video.width, video.height) else {
        return Err(StratumError::pipeline_init(
            "missing video dimensions from ffprobe",
        ));
    };

    Ok(MediaProbe {
        path: path.to_path_buf(),
        width,
        height,
        fps: video.r_frame_rate.as_deref().and_then(parse_rate),
        frames: video.nb_frames.as_deref().and_then(|n| n.parse().ok()),
        duration_secs: video.duration.as_deref().and_then(|d| d.parse().ok()),
        has_audio: parsed
            .streams
            .iter()
            .any(|s| s.codec_type.as_deref() == Some("audio")),
    })
}

/// Probe a media file through `ffprobe`.
///
/// Returns an error when the `media-ffmpeg` feature is disabled.
#[cfg(not(feature = "media-ffmpeg"))]
pub fn probe_media(_path: &Path) -> StratumResult<MediaProbe> {
    Err(StratumError::pipeline_init(
        "probing video files requires the 'media-ffmpeg' feature",
    ))
}

#[cfg(feature = "media-ffmpeg")]
pub use decode::FfmpegVideoSource;

#[cfg(feature = "media-ffmpeg")]
mod decode {
    use std::io::{ErrorKind, Read as _};
    use std::path::{Path, PathBuf};
    use std::process::{Child, ChildStdout, Command, Stdio};

    use crate::foundation::core::{Frame, PixelFormat, Resolution};
    use crate::foundation::error::{StratumError, StratumResult};
    use crate::source::adapter::{FrameSource, FrameStatus};
    use crate::source::fit::ffmpeg_filter;
    use crate::source::media::FitMode;

    /// Sequential RGBA decode of a video file through the system `ffmpeg`.
    ///
    /// Frames stream from one decoder process. Reading backwards (looping) restarts it.
    pub struct FfmpegVideoSource {
        path: PathBuf,
        res: Resolution,
        fit: Option<FitMode>,
        child: Option<Child>,
        stdout: Option<ChildStdout>,
        next: u64,
        skip: Vec<u8>,
    }

    impl FfmpegVideoSource {
        pub fn new(path: &Path, res: Resolution, fit: Option<FitMode>) -> StratumResult<Self> {
            if res.is_empty() {
                return Err(StratumError::pipeline_init(format!(
                    "video '{}' has empty resolution {res}",
                    path.display()
                )));
            }
            Ok(Self {
                path: path.to_path_buf(),
                res,
                fit,
                child: None,
                stdout: None,
                next: 0,
                skip: Vec::new(),
            })
        }

        fn frame_len(&self) -> usize {
            self.res.pixel_count() * 4
        }

        fn spawn(&mut self) -> StratumResult<()> {
            self.stop();
            let mut cmd = Command::new("ffmpeg");
            cmd.args(["-v", "error", "-i"]).arg(&self.path);
            if let Some(mode) = self.fit {
                cmd.args(["-vf", &ffmpeg_filter(self.res, mode)]);
            }
            cmd.args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::null());
            tracing::debug!(path = %self.path.display(), "starting ffmpeg video decode");

            let mut child = cmd.spawn().map_err(|e| {
                StratumError::pipeline_init(format!("failed to run ffmpeg for video decode: {e}"))
            })?;
            self.stdout = child.stdout.take();
            self.child = Some(child);
            self.next = 0;
            Ok(())
        }

        fn stop(&mut self) {
            self.stdout = None;
            if let Some(mut child) = self.child.take() {
                let _ = child.kill();
                let _ = child.wait();
            }
        }

        fn read_into(&mut self, dst: &mut Vec<u8>) -> StratumResult<bool> {
            let len = self.frame_len();
            let stdout = self
                .stdout
                .as_mut()
                .ok_or_else(|| StratumError::pipeline_init("ffmpeg decoder not running"))?;
            dst.resize(len, 0);
            match stdout.read_exact(&mut dst[..len]) {
                Ok(()) => {
                    self.next += 1;
                    Ok(true)
                }
                Err(e) if e.kind() == ErrorKind::UnexpectedEof => Ok(false),
                Err(e) => Err(StratumError::pipeline_init(format!(
                    "ffmpeg video decode read failed for '{}': {e}",
                    self.path.display()
                ))),
            }
        }
    }

    impl FrameSource for FfmpegVideoSource {
        fn resolution(&self) -> Resolution {
            self.res
        }

        fn read_frame(&mut self, index: u64, dst: &mut Frame) -> StratumResult<FrameStatus> {
            if self.stdout.is_none() || index < self.next {
                self.spawn()?;
            }
            let mut skip = std::mem::take(&mut self.skip);
            while self.next < index {
                if !self.read_into(&mut skip)? {
                    self.skip = skip;
                    return Ok(FrameStatus::EndOfSource);
                }
            }
            self.skip = skip;

            dst.width = self.res.width;
            dst.height = self.res.height;
            dst.format = PixelFormat::Rgba8;
            if self.read_into(&mut dst.data)? {
                Ok(FrameStatus::Ready)
            } else {
                Ok(FrameStatus::EndOfSource)
            }
        }
    }

    impl Drop for FfmpegVideoSource {
        fn drop(&mut self) {
            self.stop();
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/source/ffmpeg.rs"]
mod tests;
