use std::fmt;

use xxhash_rust::xxh3::Xxh3;

use crate::composition::model::{ScrollMotion, SourceId};
use crate::foundation::core::{Margins, PixelFormat, Resolution};

const XXH3_SEED: u64 = 0x5f3a_91c2_7e04_b6d9;

/// Logical buffer id within one stage plan. Never a physical pointer.
#[derive(
    Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize,
)]
pub struct BufferRef(pub u32);

impl BufferRef {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BufferRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "b{}", self.0)
    }
}

/// Shape of a device buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct BufferDesc {
    pub resolution: Resolution,
    pub format: PixelFormat,
}

impl BufferDesc {
    pub fn new(resolution: Resolution, format: PixelFormat) -> Self {
        Self { resolution, format }
    }

    pub fn byte_len(self) -> u64 {
        (self.resolution.pixel_count() as u64)
            .saturating_mul(self.format.bytes_per_pixel() as u64)
    }
}

/// One operation in the per-frame compositing chain.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PipelineStage {
    /// Host-to-device transfer of one source frame into `dst`.
    Upload { source: SourceId, dst: BufferRef },
    /// Convert a staged host frame to premultiplied alpha ahead of its upload.
    ConvertAlpha { source: SourceId },
    /// Composite `layer` onto `accumulator` at `(x, y)`, writing a fresh `out` buffer.
    ///
    /// With `scroll` set, `y` is the placement before the roll starts; the executor resolves the
    /// offset for each frame.
    Overlay {
        accumulator: BufferRef,
        layer: BufferRef,
        out: BufferRef,
        x: i32,
        y: i32,
        opacity: f32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        scroll: Option<ScrollMotion>,
        #[serde(default, skip_serializing_if = "Margins::is_zero")]
        margins: Margins,
    },
    /// Device-to-host transfer of the final accumulator.
    Download { accumulator: BufferRef },
}

impl PipelineStage {
    pub fn kind(&self) -> StageKind {
        match self {
            Self::Upload { .. } => StageKind::Upload,
            Self::ConvertAlpha { .. } => StageKind::ConvertAlpha,
            Self::Overlay { .. } => StageKind::Overlay,
            Self::Download { .. } => StageKind::Download,
        }
    }

    /// Buffers this stage reads.
    pub fn reads(&self) -> Vec<BufferRef> {
        match *self {
            Self::Overlay {
                accumulator, layer, ..
            } => vec![accumulator, layer],
            Self::Download { accumulator } => vec![accumulator],
            Self::Upload { .. } | Self::ConvertAlpha { .. } => Vec::new(),
        }
    }

    /// Buffer this stage writes, if any.
    pub fn writes(&self) -> Option<BufferRef> {
        match *self {
            Self::Upload { dst, .. } => Some(dst),
            Self::Overlay { out, .. } => Some(out),
            Self::ConvertAlpha { .. } | Self::Download { .. } => None,
        }
    }
}

impl fmt::Display for PipelineStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Upload { source, dst } => write!(f, "Upload({source} -> {dst})"),
            Self::ConvertAlpha { source } => write!(f, "ConvertAlpha({source})"),
            Self::Overlay {
                accumulator,
                layer,
                out,
                x,
                y,
                scroll,
                ..
            } => match scroll {
                Some(m) => write!(
                    f,
                    "Overlay({accumulator},{layer},{x},{y}-{}px/f@{} -> {out})",
                    m.px_per_frame, m.start_frame
                ),
                None => write!(f, "Overlay({accumulator},{layer},{x},{y} -> {out})"),
            },
            Self::Download { accumulator } => write!(f, "Download({accumulator})"),
        }
    }
}

/// Fieldless stage tag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum StageKind {
    Upload,
    ConvertAlpha,
    Overlay,
    Download,
}

/// Stable structural fingerprint of a stage plan.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct PlanFingerprint {
    pub hi: u64,
    pub lo: u64,
}

impl fmt::Display for PlanFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}{:016x}", self.hi, self.lo)
    }
}

/// Immutable, replayable stage sequence for one composition.
///
/// Built once per job and replayed for every output frame.
#[derive(Clone, Debug, PartialEq, serde::Serialize)]
pub struct StagePlan {
    pub(crate) stages: Vec<PipelineStage>,
    /// Descriptor per [`BufferRef`], indexed by `BufferRef::index`.
    pub(crate) buffers: Vec<BufferDesc>,
    /// Index of the last stage reading each buffer.
    #[serde(skip)]
    pub(crate) last_use: Vec<usize>,
}

impl StagePlan {
    pub fn stages(&self) -> &[PipelineStage] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn buffer_desc(&self, buf: BufferRef) -> Option<BufferDesc> {
        self.buffers.get(buf.index()).copied()
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of `Overlay` stages.
    pub fn overlay_count(&self) -> usize {
        self.count(StageKind::Overlay)
    }

    pub fn count(&self, kind: StageKind) -> usize {
        self.stages.iter().filter(|s| s.kind() == kind).count()
    }

    /// Buffers whose last reader is stage `stage_idx`.
    pub fn released_after(&self, stage_idx: usize) -> impl Iterator<Item = BufferRef> + '_ {
        self.last_use
            .iter()
            .enumerate()
            .filter(move |&(_, &last)| last == stage_idx)
            .map(|(b, _)| BufferRef(b as u32))
    }

    pub fn fingerprint(&self) -> PlanFingerprint {
        let mut h = Xxh3::with_seed(XXH3_SEED);
        for stage in &self.stages {
            match *stage {
                PipelineStage::Upload { source, dst } => {
                    h.update(&[0]);
                    h.update(&source.0.to_le_bytes());
                    h.update(&dst.0.to_le_bytes());
                }
                PipelineStage::ConvertAlpha { source } => {
                    h.update(&[1]);
                    h.update(&source.0.to_le_bytes());
                }
                PipelineStage::Overlay {
                    accumulator,
                    layer,
                    out,
                    x,
                    y,
                    opacity,
                    scroll,
                    margins,
                } => {
                    h.update(&[2]);
                    h.update(&accumulator.0.to_le_bytes());
                    h.update(&layer.0.to_le_bytes());
                    h.update(&out.0.to_le_bytes());
                    h.update(&x.to_le_bytes());
                    h.update(&y.to_le_bytes());
                    h.update(&opacity.to_bits().to_le_bytes());
                    if let Some(m) = scroll {
                        h.update(&m.start_frame.to_le_bytes());
                        h.update(&m.px_per_frame.to_le_bytes());
                        h.update(&m.distance.to_le_bytes());
                    }
                    h.update(&margins.top.to_le_bytes());
                    h.update(&margins.bottom.to_le_bytes());
                }
                PipelineStage::Download { accumulator } => {
                    h.update(&[3]);
                    h.update(&accumulator.0.to_le_bytes());
                }
            }
        }
        for desc in &self.buffers {
            h.update(&desc.resolution.width.to_le_bytes());
            h.update(&desc.resolution.height.to_le_bytes());
            h.update(&[u8::from(desc.format.has_alpha())]);
        }
        let v = h.digest128();
        PlanFingerprint {
            hi: (v >> 64) as u64,
            lo: v as u64,
        }
    }
}
