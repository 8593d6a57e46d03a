use std::fmt;

/// Env var that forces the software encoder regardless of the requested codec.
pub const NO_GPU_ENV: &str = "NO_GPU";

/// Video codec for the encoded output.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputCodec {
    /// NVIDIA hardware H.264.
    #[serde(rename = "h264_nvenc")]
    H264Nvenc,
    /// Software H.264.
    #[default]
    Libx264,
}

impl OutputCodec {
    /// The ffmpeg encoder name.
    pub fn ffmpeg_name(self) -> &'static str {
        match self {
            Self::H264Nvenc => "h264_nvenc",
            Self::Libx264 => "libx264",
        }
    }

    pub fn is_hardware(self) -> bool {
        matches!(self, Self::H264Nvenc)
    }

    /// Codec actually used on this host.
    ///
    /// Hardware encoding falls back to `libx264` when `NO_GPU` is set or the platform has no
    /// NVENC driver support.
    pub fn resolve(self) -> Self {
        self.resolve_with(std::env::var_os(NO_GPU_ENV).is_some(), nvenc_platform())
    }

    pub(crate) fn resolve_with(self, no_gpu: bool, nvenc_platform: bool) -> Self {
        match self {
            Self::H264Nvenc if no_gpu || !nvenc_platform => {
                tracing::info!(no_gpu, "hardware encoder unavailable, using libx264");
                Self::Libx264
            }
            other => other,
        }
    }

    /// Output-side encoder arguments (`-c:v` onwards, excluding audio).
    pub fn video_args(self) -> Vec<&'static str> {
        let mut args = vec!["-c:v", self.ffmpeg_name()];
        match self {
            Self::H264Nvenc => args.extend([
                "-preset", "p4", "-rc", "vbr", "-cq", "25", "-b:v", "10M",
            ]),
            Self::Libx264 => args.extend([
                "-preset", "medium", "-crf", "18", "-b:v", "10M", "-maxrate", "15M", "-bufsize",
                "20M",
            ]),
        }
        args.extend([
            "-pix_fmt",
            "yuv420p",
            "-movflags",
            "+faststart",
            "-bf",
            "3",
            "-g",
            "60",
        ]);
        args
    }
}

impl fmt::Display for OutputCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.ffmpeg_name())
    }
}

fn nvenc_platform() -> bool {
    cfg!(any(target_os = "linux", target_os = "windows"))
}

#[cfg(test)]
#[path = "../../tests/unit/encode/codec.rs"]
mod tests;
