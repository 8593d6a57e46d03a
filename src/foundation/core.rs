use std::fmt;

use crate::foundation::error::{MismatchAttribute, SourceRole, StratumResult, ValidationError};

/// Absolute 0-based output frame index.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct FrameIndex(pub u64);

/// Frames-per-second represented as a rational `num/den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Fps {
    /// Numerator (frames).
    pub num: u32,
    /// Denominator (seconds), must be non-zero.
    pub den: u32,
}

impl Fps {
    /// Create a validated FPS value.
    pub fn new(num: u32, den: u32) -> StratumResult<Self> {
        let fps = Self { num, den };
        fps.check()?;
        Ok(fps)
    }

    pub(crate) fn check(self) -> StratumResult<()> {
        if self.num == 0 || self.den == 0 {
            return Err(ValidationError::new(
                SourceRole::Request,
                MismatchAttribute::Target,
                format!("fps must have non-zero num/den, got {self}"),
            )
            .into());
        }
        Ok(())
    }

    /// Convert to floating-point FPS.
    pub fn as_f64(self) -> f64 {
        f64::from(self.num) / f64::from(self.den)
    }

    /// Duration of one frame in seconds.
    pub fn frame_duration_secs(self) -> f64 {
        f64::from(self.den) / f64::from(self.num)
    }

    /// Convert frame count to seconds.
    pub fn frames_to_secs(self, frames: u64) -> f64 {
        (frames as f64) * self.frame_duration_secs()
    }

    /// Convert seconds to a frame count, rounding to the nearest frame.
    ///
    /// Rounding (not flooring) keeps decimal durations like `0.7s @ 30fps` at 21 frames despite
    /// binary float error.
    pub fn secs_to_frames(self, secs: f64) -> u64 {
        (secs * self.as_f64()).round().max(0.0) as u64
    }

    /// Exact rational comparison (`30/1 == 60/2`).
    pub fn same_rate(self, other: Fps) -> bool {
        u64::from(self.num) * u64::from(other.den) == u64::from(other.num) * u64::from(self.den)
    }
}

impl fmt::Display for Fps {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.den == 1 {
            write!(f, "{}", self.num)
        } else {
            write!(f, "{}/{}", self.num, self.den)
        }
    }
}

/// Frame dimensions in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct Resolution {
    /// Width in pixels.
    pub width: u32,
    /// Height in pixels.
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixel_count(self) -> usize {
        (self.width as usize).saturating_mul(self.height as usize)
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Rows at the top and bottom of the canvas a layer may not draw into.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Margins {
    pub top: u32,
    pub bottom: u32,
}

impl Margins {
    pub fn new(top: u32, bottom: u32) -> Self {
        Self { top, bottom }
    }

    pub fn is_zero(&self) -> bool {
        self.top == 0 && self.bottom == 0
    }

    /// Half-open row band `[start, end)` left visible on a canvas `height` rows tall.
    pub fn visible_rows(self, height: u32) -> (u32, u32) {
        let start = self.top.min(height);
        let end = height.saturating_sub(self.bottom).max(start);
        (start, end)
    }
}

/// Pixel layout of a frame or device buffer.
///
/// All layouts are 4 bytes per pixel, tightly packed, row-major.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelFormat {
    /// Straight-alpha RGBA8. The engine's uniform host format.
    Rgba8,
    /// Premultiplied RGBA8, produced by alpha conversion for alpha-bearing layers.
    Rgba8Premul,
}

impl PixelFormat {
    pub fn bytes_per_pixel(self) -> usize {
        4
    }

    pub fn has_alpha(self) -> bool {
        matches!(self, Self::Rgba8Premul)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rgba8 => "rgba8",
            Self::Rgba8Premul => "rgba8-premul",
        })
    }
}

/// One host-readable frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Frame {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel layout of `data`.
    pub format: PixelFormat,
    /// Tightly packed, row-major pixel bytes.
    pub data: Vec<u8>,
}

impl Frame {
    /// Build a frame filled with one straight-alpha RGBA8 color.
    pub fn solid(res: Resolution, rgba: [u8; 4]) -> Self {
        let mut data = Vec::with_capacity(res.pixel_count() * 4);
        for _ in 0..res.pixel_count() {
            data.extend_from_slice(&rgba);
        }
        Self {
            width: res.width,
            height: res.height,
            format: PixelFormat::Rgba8,
            data,
        }
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Expected byte length for this frame's dimensions and format.
    pub fn expected_len(&self) -> usize {
        self.resolution().pixel_count() * self.format.bytes_per_pixel()
    }

    /// Read one pixel; `None` when out of bounds.
    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 4]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let i = ((y as usize) * (self.width as usize) + (x as usize)) * 4;
        let px = self.data.get(i..i + 4)?;
        Some([px[0], px[1], px[2], px[3]])
    }
}

#[cfg(test)]
#[path = "../../tests/unit/foundation/core.rs"]
mod tests;
