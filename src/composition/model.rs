use std::fmt;
use std::path::Path;

use anyhow::Context as _;

use crate::encode::codec::OutputCodec;
use crate::foundation::core::{Fps, Margins, Resolution};
use crate::foundation::error::{StratumError, StratumResult};
use crate::source::media::MediaSource;

/// Logical id of a source within one request.
///
/// `SourceId(0)` is always the background; `SourceId(k + 1)` is `layers[k]` in declaration order.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct SourceId(pub u32);

impl SourceId {
    pub const BACKGROUND: SourceId = SourceId(0);

    pub fn for_layer(index: usize) -> Self {
        Self(index as u32 + 1)
    }

    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn is_background(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for SourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_background() {
            f.write_str("bg")
        } else {
            write!(f, "ol{}", self.0)
        }
    }
}

fn default_opacity() -> f32 {
    1.0
}

/// Vertical roll of a layer that is taller in content than it is on screen.
///
/// The layer holds at its placement until `start_frame`, then moves up `px_per_frame` whole
/// pixels per output frame until it has travelled `distance` pixels, and holds there.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScrollMotion {
    pub start_frame: u64,
    pub px_per_frame: u32,
    pub distance: u32,
}

impl ScrollMotion {
    /// Hold before and after the roll, in seconds.
    pub const HOLD_SECS: f64 = 2.0;
    /// Shortest roll, in seconds.
    pub const MIN_ROLL_SECS: f64 = 8.0;

    pub fn new(start_frame: u64, px_per_frame: u32, distance: u32) -> Self {
        Self {
            start_frame,
            px_per_frame,
            distance,
        }
    }

    /// Roll `distance` pixels at roughly `roll_px` pixels per frame, after a hold.
    ///
    /// The roll lasts at least [`Self::MIN_ROLL_SECS`]; the per-frame step is a whole number of
    /// pixels, at least one.
    pub fn roll(distance: u32, roll_px: f64, fps: Fps) -> Self {
        let step = if roll_px.is_finite() && roll_px >= 1.0 {
            roll_px as u64
        } else {
            1
        };
        let steps = u64::from(distance).div_ceil(step);
        let min_frames = fps.secs_to_frames(Self::MIN_ROLL_SECS);
        let roll_frames = steps.max(min_frames).max(1);
        let px_per_frame = (u64::from(distance) / roll_frames).max(1);
        Self {
            start_frame: fps.secs_to_frames(Self::HOLD_SECS),
            px_per_frame: u32::try_from(px_per_frame).unwrap_or(u32::MAX),
            distance,
        }
    }

    /// Pixels travelled by output frame `frame`.
    pub fn offset_at(&self, frame: u64) -> u32 {
        let moved = frame
            .saturating_sub(self.start_frame)
            .saturating_mul(u64::from(self.px_per_frame));
        moved.min(u64::from(self.distance)) as u32
    }

    /// First frame at which the layer has reached its final position.
    pub fn end_frame(&self) -> u64 {
        if self.px_per_frame == 0 {
            return self.start_frame;
        }
        self.start_frame + u64::from(self.distance).div_ceil(u64::from(self.px_per_frame))
    }

    /// Output frames for the whole roll including the trailing hold.
    pub fn total_frames(&self, fps: Fps) -> u64 {
        self.end_frame() + fps.secs_to_frames(Self::HOLD_SECS)
    }
}

/// An overlay layer: a source placed at `(x, y)` with a unique z-order.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Layer {
    pub source: MediaSource,
    /// Horizontal placement offset in target pixels. May be negative.
    #[serde(default)]
    pub x: i32,
    /// Vertical placement offset in target pixels. May be negative.
    #[serde(default)]
    pub y: i32,
    /// Compositing order; higher is on top. Unique within a request.
    pub z: i32,
    /// Overrides `source.alpha` when set.
    #[serde(default)]
    pub alpha: Option<bool>,
    /// Layer weight in `[0, 1]`.
    #[serde(default = "default_opacity")]
    pub opacity: f32,
    /// Time-varying vertical offset, applied on top of `y`.
    #[serde(default)]
    pub scroll: Option<ScrollMotion>,
    /// Canvas rows the layer never covers.
    #[serde(default)]
    pub margins: Margins,
}

impl Layer {
    pub fn new(source: MediaSource, x: i32, y: i32, z: i32) -> Self {
        Self {
            source,
            x,
            y,
            z,
            alpha: None,
            opacity: 1.0,
            scroll: None,
            margins: Margins::default(),
        }
    }

    pub fn with_alpha(mut self, alpha: bool) -> Self {
        self.alpha = Some(alpha);
        self
    }

    pub fn with_opacity(mut self, opacity: f32) -> Self {
        self.opacity = opacity;
        self
    }

    pub fn with_scroll(mut self, scroll: ScrollMotion) -> Self {
        self.scroll = Some(scroll);
        self
    }

    pub fn with_margins(mut self, margins: Margins) -> Self {
        self.margins = margins;
        self
    }

    /// Effective alpha flag: the layer override, else the source's flag.
    pub fn is_alpha(&self) -> bool {
        self.alpha.unwrap_or(self.source.alpha)
    }
}

pub(crate) fn scrolled_y(y: i32, scroll: Option<&ScrollMotion>, frame: u64) -> i32 {
    match scroll {
        Some(m) => y.saturating_sub_unsigned(m.offset_at(frame)),
        None => y,
    }
}

/// Caller-facing composition description.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CompositionRequest {
    pub background: MediaSource,
    #[serde(default)]
    pub layers: Vec<Layer>,
    /// Target output width in pixels.
    pub width: u32,
    /// Target output height in pixels.
    pub height: u32,
    pub fps: Fps,
    /// Target duration in seconds.
    pub duration_secs: f64,
    #[serde(default)]
    pub codec: OutputCodec,
}

impl CompositionRequest {
    pub fn new(background: MediaSource, target: Resolution, fps: Fps, duration_secs: f64) -> Self {
        Self {
            background,
            layers: Vec::new(),
            width: target.width,
            height: target.height,
            fps,
            duration_secs,
            codec: OutputCodec::default(),
        }
    }

    pub fn with_layer(mut self, layer: Layer) -> Self {
        self.layers.push(layer);
        self
    }

    pub fn with_codec(mut self, codec: OutputCodec) -> Self {
        self.codec = codec;
        self
    }

    pub fn target_resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Number of output frames (`duration_secs * fps`, rounded).
    pub fn target_frames(&self) -> u64 {
        self.fps.secs_to_frames(self.duration_secs)
    }

    /// Media source for a logical id, if it exists.
    pub fn source(&self, id: SourceId) -> Option<&MediaSource> {
        if id.is_background() {
            Some(&self.background)
        } else {
            self.layers.get(id.index() - 1).map(|l| &l.source)
        }
    }

    /// Number of sources (background plus layers).
    pub fn source_count(&self) -> usize {
        self.layers.len() + 1
    }

    pub fn from_json_str(s: &str) -> StratumResult<Self> {
        serde_json::from_str(s).map_err(|e| StratumError::serde(e.to_string()))
    }

    pub fn from_path(path: impl AsRef<Path>) -> StratumResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read composition request '{}'", path.display()))?;
        Self::from_json_str(&text)
    }

    pub fn to_json_pretty(&self) -> StratumResult<String> {
        serde_json::to_string_pretty(self).map_err(|e| StratumError::serde(e.to_string()))
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composition/model.rs"]
mod tests;
