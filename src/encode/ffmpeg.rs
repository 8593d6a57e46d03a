use std::io::{Read as _, Write as _};
use std::path::{Path, PathBuf};
use std::process::{Child, ChildStdin, Command, Stdio};
use std::thread::JoinHandle;

use crate::encode::codec::OutputCodec;
use crate::encode::sink::{EncodeSink, FrameOrder, SinkConfig};
use crate::foundation::core::{Frame, FrameIndex, PixelFormat};
use crate::foundation::error::{StratumError, StratumResult};
use crate::foundation::math::mul_div255_u16;

/// Options for [`FfmpegSink`] MP4 output.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FfmpegSinkOpts {
    /// Output MP4 file path.
    pub out_path: PathBuf,
    /// Overwrite the output file if it already exists.
    pub overwrite: bool,
    /// Overrides the codec requested by the composition.
    pub codec: Option<OutputCodec>,
    /// Audio file muxed into the output (`aac`, trimmed to the video).
    pub audio_path: Option<PathBuf>,
}

impl FfmpegSinkOpts {
    pub fn new(out_path: impl Into<PathBuf>) -> Self {
        Self {
            out_path: out_path.into(),
            overwrite: true,
            codec: None,
            audio_path: None,
        }
    }
}

/// Sink that spawns the system `ffmpeg` and streams raw RGBA frames to its stdin.
pub struct FfmpegSink {
    opts: FfmpegSinkOpts,

    child: Option<Child>,
    stdin: Option<ChildStdin>,
    stderr_drain: Option<JoinHandle<std::io::Result<Vec<u8>>>>,

    scratch: Vec<u8>,
    cfg: Option<SinkConfig>,
    order: FrameOrder,
}

impl FfmpegSink {
    pub fn new(opts: FfmpegSinkOpts) -> Self {
        Self {
            opts,
            child: None,
            stdin: None,
            stderr_drain: None,
            scratch: Vec::new(),
            cfg: None,
            order: FrameOrder::default(),
        }
    }

    pub fn out_path(&self) -> &Path {
        &self.opts.out_path
    }

    fn command(&self, cfg: &SinkConfig, codec: OutputCodec) -> Command {
        let mut cmd = Command::new("ffmpeg");
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::null())
            .stderr(Stdio::piped());
        cmd.arg(if self.opts.overwrite { "-y" } else { "-n" });
        cmd.args([
            "-loglevel",
            "error",
            "-f",
            "rawvideo",
            "-pix_fmt",
            "rgba",
            "-s",
            &format!("{}x{}", cfg.width, cfg.height),
            "-r",
            &format!("{}/{}", cfg.fps.num, cfg.fps.den),
            "-i",
            "pipe:0",
        ]);
        match self.opts.audio_path.as_ref() {
            Some(audio) => {
                cmd.arg("-i").arg(audio);
                cmd.args(["-map", "0:v:0", "-map", "1:a:0"]);
                cmd.args(codec.video_args());
                cmd.args(["-c:a", "aac", "-b:a", "192k", "-shortest"]);
            }
            None => {
                cmd.arg("-an");
                cmd.args(codec.video_args());
            }
        }
        cmd.arg(&self.opts.out_path);
        cmd
    }

    fn join_stderr(&mut self) -> StratumResult<Vec<u8>> {
        match self.stderr_drain.take() {
            Some(handle) => handle
                .join()
                .map_err(|_| StratumError::encoding("ffmpeg stderr drain thread panicked"))?
                .map_err(|e| StratumError::encoding(format!("ffmpeg stderr read failed: {e}"))),
            None => Ok(Vec::new()),
        }
    }
}

impl EncodeSink for FfmpegSink {
    fn begin(&mut self, cfg: SinkConfig) -> StratumResult<()> {
        if cfg.width == 0 || cfg.height == 0 {
            return Err(StratumError::encoding(
                "ffmpeg sink width/height must be non-zero",
            ));
        }
        if !cfg.width.is_multiple_of(2) || !cfg.height.is_multiple_of(2) {
            return Err(StratumError::encoding(
                "ffmpeg sink width/height must be even (required for yuv420p mp4 output)",
            ));
        }
        ensure_parent_dir(&self.opts.out_path)?;
        if !self.opts.overwrite && self.opts.out_path.exists() {
            return Err(StratumError::encoding(format!(
                "output file '{}' already exists",
                self.opts.out_path.display()
            )));
        }
        if let Some(audio) = self.opts.audio_path.as_ref()
            && !audio.exists()
        {
            return Err(StratumError::encoding(format!(
                "audio file '{}' does not exist",
                audio.display()
            )));
        }
        if !is_ffmpeg_on_path() {
            return Err(StratumError::encoding(
                "ffmpeg is required for MP4 encoding, but was not found on PATH",
            ));
        }

        let codec = self.opts.codec.unwrap_or(cfg.codec).resolve();
        let mut cmd = self.command(&cfg, codec);
        tracing::debug!(?cmd, %codec, "spawning ffmpeg encoder");

        let mut child = cmd.spawn().map_err(|e| {
            StratumError::encoding(format!(
                "failed to spawn ffmpeg (is it installed and on PATH?): {e}"
            ))
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| StratumError::encoding("failed to open ffmpeg stdin"))?;
        let mut stderr = child
            .stderr
            .take()
            .ok_or_else(|| StratumError::encoding("failed to open ffmpeg stderr"))?;
        let stderr_drain = std::thread::spawn(move || {
            let mut bytes = Vec::new();
            stderr.read_to_end(&mut bytes)?;
            Ok(bytes)
        });

        self.scratch = vec![0u8; cfg.resolution().pixel_count() * 4];
        self.child = Some(child);
        self.stdin = Some(stdin);
        self.stderr_drain = Some(stderr_drain);
        self.cfg = Some(cfg);
        self.order.reset();
        Ok(())
    }

    fn consume(&mut self, idx: FrameIndex, frame: &Frame) -> StratumResult<()> {
        self.order.check(self.cfg.as_ref(), idx, frame)?;
        flatten_to_opaque_rgba8(&mut self.scratch, &frame.data, frame.format)?;

        let Some(stdin) = self.stdin.as_mut() else {
            return Err(StratumError::encoding("ffmpeg sink is already finalized"));
        };
        stdin.write_all(&self.scratch).map_err(|e| {
            StratumError::encoding(format!("failed to write frame to ffmpeg stdin: {e}"))
        })
    }

    fn end(&mut self) -> StratumResult<()> {
        drop(self.stdin.take());
        let mut child = self
            .child
            .take()
            .ok_or_else(|| StratumError::encoding("ffmpeg sink not started"))?;
        let status = child.wait().map_err(|e| {
            StratumError::encoding(format!("failed to wait for ffmpeg to finish: {e}"))
        })?;
        let stderr = self.join_stderr()?;
        self.cfg = None;

        if !status.success() {
            return Err(StratumError::encoding(format!(
                "ffmpeg exited with status {}: {}",
                status,
                String::from_utf8_lossy(&stderr).trim()
            )));
        }
        tracing::debug!(out = %self.opts.out_path.display(), "ffmpeg encoder finished");
        Ok(())
    }

    fn abort(&mut self) -> StratumResult<()> {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            // The process may already have exited on its own.
            let _ = child.kill();
            let _ = child.wait();
        }
        let _ = self.join_stderr();
        self.cfg = None;
        if self.opts.out_path.exists() {
            use anyhow::Context as _;
            std::fs::remove_file(&self.opts.out_path).with_context(|| {
                format!(
                    "failed to remove partial output '{}'",
                    self.opts.out_path.display()
                )
            })?;
        }
        tracing::info!(out = %self.opts.out_path.display(), "partial output discarded");
        Ok(())
    }
}

impl Drop for FfmpegSink {
    fn drop(&mut self) {
        drop(self.stdin.take());
        if let Some(mut child) = self.child.take() {
            let _ = child.kill();
            let _ = child.wait();
        }
    }
}

/// Write `src` as opaque straight RGBA8 over black.
fn flatten_to_opaque_rgba8(dst: &mut [u8], src: &[u8], format: PixelFormat) -> StratumResult<()> {
    if dst.len() != src.len() || !dst.len().is_multiple_of(4) {
        return Err(StratumError::encoding(
            "flatten_to_opaque_rgba8 expects equal-length rgba8 buffers",
        ));
    }
    for (d, s) in dst.chunks_exact_mut(4).zip(src.chunks_exact(4)) {
        let a = u16::from(s[3]);
        if a == 255 || format == PixelFormat::Rgba8Premul {
            d[..3].copy_from_slice(&s[..3]);
        } else {
            for i in 0..3 {
                d[i] = mul_div255_u16(u16::from(s[i]), a) as u8;
            }
        }
        d[3] = 255;
    }
    Ok(())
}

/// Ensure the parent directory of `path` exists.
pub fn ensure_parent_dir(path: &Path) -> StratumResult<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        use anyhow::Context as _;
        std::fs::create_dir_all(parent)
            .with_context(|| format!("failed to create output directory '{}'", parent.display()))?;
    }
    Ok(())
}

/// Return `true` when `ffmpeg` can be invoked from `PATH`.
pub fn is_ffmpeg_on_path() -> bool {
    Command::new("ffmpeg")
        .arg("-version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

#[cfg(test)]
#[path = "../../tests/unit/encode/ffmpeg.rs"]
mod tests;
