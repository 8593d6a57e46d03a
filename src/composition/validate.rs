use std::collections::HashMap;

use crate::composition::model::{CompositionRequest, Layer, ScrollMotion, SourceId};
use crate::encode::codec::OutputCodec;
use crate::foundation::core::{Fps, Margins, Resolution};
use crate::foundation::error::{MismatchAttribute, SourceRole, StratumResult, ValidationError};
use crate::source::media::{MediaSource, SourceDuration, SourceKind};

/// A source resolved against the request targets.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedSource {
    pub id: SourceId,
    pub source: MediaSource,
    /// Resolution the adapter will deliver (always the target).
    pub resolution: Resolution,
    /// Rate the adapter will deliver (always the target).
    pub fps: Fps,
    /// Distinct frames the source provides; `None` for static images.
    pub source_frames: Option<u64>,
    /// How many times the source content is repeated to cover the target duration.
    pub repeat: u64,
}

impl NormalizedSource {
    /// Source frame index that feeds output frame `i`.
    pub fn source_frame_index(&self, i: u64) -> u64 {
        match self.source_frames {
            None => 0,
            Some(n) if self.source.looping && n > 0 => i % n,
            Some(_) => i,
        }
    }
}

/// A layer resolved against the request targets.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedLayer {
    pub source: NormalizedSource,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    /// Effective alpha flag (layer override or source flag).
    pub alpha: bool,
    pub opacity: f32,
    pub scroll: Option<ScrollMotion>,
    pub margins: Margins,
}

/// Output of [`validate`]: the request with every source resolved.
///
/// Layers stay in declaration order; ordering by z is the builder's job.
#[derive(Clone, Debug, PartialEq)]
pub struct NormalizedRequest {
    pub resolution: Resolution,
    pub fps: Fps,
    /// Output frame count (`duration * fps`).
    pub total_frames: u64,
    pub codec: OutputCodec,
    pub background: NormalizedSource,
    pub layers: Vec<NormalizedLayer>,
}

impl NormalizedRequest {
    pub fn source(&self, id: SourceId) -> Option<&NormalizedSource> {
        if id.is_background() {
            Some(&self.background)
        } else {
            self.layers.get(id.index() - 1).map(|l| &l.source)
        }
    }

    pub fn sources(&self) -> impl Iterator<Item = &NormalizedSource> {
        std::iter::once(&self.background).chain(self.layers.iter().map(|l| &l.source))
    }
}

/// Check a request for consistency before any device resource is touched.
///
/// Every source must normalize to the target resolution and frame rate, every source must cover
/// the target duration (static images always do, by repetition) and layer z-orders must be
/// distinct. Pure: no I/O, no device access.
#[tracing::instrument(skip(request), fields(layers = request.layers.len()))]
pub fn validate(request: &CompositionRequest) -> StratumResult<NormalizedRequest> {
    let target = request.target_resolution();
    let fps = request.fps;
    if target.is_empty() {
        return Err(target_err(format!(
            "target resolution must be non-zero, got {target}"
        )));
    }
    fps.check()?;
    if !request.duration_secs.is_finite() || request.duration_secs <= 0.0 {
        return Err(target_err(format!(
            "target duration must be a positive number of seconds, got {}",
            request.duration_secs
        )));
    }
    let total_frames = request.target_frames();
    if total_frames == 0 {
        return Err(target_err(format!(
            "target duration {}s is shorter than one frame at {fps} fps",
            request.duration_secs
        )));
    }

    let background = normalize_source(
        SourceId::BACKGROUND,
        SourceRole::Background,
        &request.background,
        target,
        fps,
        total_frames,
    )?;

    let mut seen_z = HashMap::<i32, usize>::new();
    let mut layers = Vec::with_capacity(request.layers.len());
    for (index, layer) in request.layers.iter().enumerate() {
        let role = layer_role(index, layer);
        let source = normalize_source(
            SourceId::for_layer(index),
            role.clone(),
            &layer.source,
            target,
            fps,
            total_frames,
        )?;
        if !layer.opacity.is_finite() || !(0.0..=1.0).contains(&layer.opacity) {
            return Err(ValidationError::new(
                role,
                MismatchAttribute::Target,
                format!("opacity must be within [0, 1], got {}", layer.opacity),
            )
            .into());
        }
        if let Some(m) = layer.scroll
            && m.px_per_frame == 0
            && m.distance > 0
        {
            return Err(ValidationError::new(
                role,
                MismatchAttribute::Target,
                format!("scroll over {}px needs a step of at least 1px", m.distance),
            )
            .into());
        }
        let (first, last) = layer.margins.visible_rows(target.height);
        if first >= last {
            return Err(ValidationError::new(
                role,
                MismatchAttribute::Target,
                format!(
                    "margins {}+{} leave no visible rows in {target}",
                    layer.margins.top, layer.margins.bottom
                ),
            )
            .into());
        }
        if let Some(prev) = seen_z.insert(layer.z, index) {
            return Err(ValidationError::new(
                role,
                MismatchAttribute::ZOrder,
                format!("z-order {} already used by layer #{prev}", layer.z),
            )
            .into());
        }
        layers.push(NormalizedLayer {
            source,
            x: layer.x,
            y: layer.y,
            z: layer.z,
            alpha: layer.is_alpha(),
            opacity: layer.opacity,
            scroll: layer.scroll,
            margins: layer.margins,
        });
    }

    tracing::debug!(%target, %fps, total_frames, "composition request validated");
    Ok(NormalizedRequest {
        resolution: target,
        fps,
        total_frames,
        codec: request.codec,
        background,
        layers,
    })
}

fn layer_role(index: usize, layer: &Layer) -> SourceRole {
    SourceRole::Layer {
        index,
        name: layer.source.name.clone(),
    }
}

fn target_err(detail: String) -> crate::StratumError {
    ValidationError::new(SourceRole::Request, MismatchAttribute::Target, detail).into()
}

fn normalize_source(
    id: SourceId,
    role: SourceRole,
    source: &MediaSource,
    target: Resolution,
    fps: Fps,
    total_frames: u64,
) -> StratumResult<NormalizedSource> {
    let native = source.native_resolution();
    let resolution = if source.fit.is_some() && !native.is_empty() {
        target
    } else {
        native
    };
    if resolution != target {
        return Err(ValidationError::new(
            role,
            MismatchAttribute::Resolution,
            format!("expected {target}, got {resolution}"),
        )
        .into());
    }

    match source.kind {
        SourceKind::StaticImage => {
            let bad = match source.duration {
                None => Some("static image requires an explicit duration or loop".to_string()),
                Some(SourceDuration::Seconds(s)) if !s.is_finite() || s <= 0.0 => {
                    Some(format!("image duration must be positive, got {s}s"))
                }
                Some(SourceDuration::Frames(0)) => {
                    Some("image duration must cover at least one frame".to_string())
                }
                Some(_) => None,
            };
            if let Some(detail) = bad {
                return Err(ValidationError::new(role, MismatchAttribute::Duration, detail).into());
            }
            Ok(NormalizedSource {
                id,
                source: source.clone(),
                resolution,
                fps,
                source_frames: None,
                repeat: total_frames,
            })
        }
        SourceKind::MotionVideo => {
            let native_fps = source.fps.ok_or_else(|| {
                ValidationError::new(
                    role.clone(),
                    MismatchAttribute::FrameRate,
                    "video source is missing its native frame rate",
                )
            })?;
            if native_fps.num == 0 || native_fps.den == 0 || !native_fps.same_rate(fps) {
                return Err(ValidationError::new(
                    role,
                    MismatchAttribute::FrameRate,
                    format!("expected {fps} fps, got {native_fps} fps"),
                )
                .into());
            }

            let frames = match source.duration {
                Some(SourceDuration::Frames(n)) => n,
                Some(SourceDuration::Seconds(s)) if s.is_finite() && s > 0.0 => {
                    native_fps.secs_to_frames(s)
                }
                Some(SourceDuration::Seconds(s)) => {
                    return Err(ValidationError::new(
                        role,
                        MismatchAttribute::Duration,
                        format!("video duration must be positive, got {s}s"),
                    )
                    .into());
                }
                Some(SourceDuration::Loop) | None => {
                    return Err(ValidationError::new(
                        role,
                        MismatchAttribute::Duration,
                        "video source must declare its content length (frames or seconds)",
                    )
                    .into());
                }
            };
            if frames == 0 {
                return Err(ValidationError::new(
                    role,
                    MismatchAttribute::Duration,
                    "video source has no frames",
                )
                .into());
            }

            let repeat = if source.looping {
                total_frames.div_ceil(frames)
            } else if frames < total_frames {
                return Err(ValidationError::new(
                    role,
                    MismatchAttribute::Duration,
                    format!("covers {frames} frames, target needs {total_frames}"),
                )
                .into());
            } else {
                1
            };

            Ok(NormalizedSource {
                id,
                source: source.clone(),
                resolution,
                fps,
                source_frames: Some(frames),
                repeat,
            })
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/composition/validate.rs"]
mod tests;
