use crate::composition::model::SourceId;
use crate::composition::validate::{NormalizedLayer, NormalizedRequest};
use crate::foundation::core::{PixelFormat, Resolution};
use crate::pipeline::stage::{BufferDesc, BufferRef, PipelineStage, StagePlan};

/// Build the stage sequence for a validated request.
///
/// A left fold over layers in ascending z-order, seeded with the background upload:
///
/// ```text
/// Upload(bg)
/// [ConvertAlpha(l)] Upload(l) Overlay(acc, l, x, y)   for each layer l
/// Download(acc)
/// ```
///
/// The chain is strictly linear, so a higher z always lands on top. Pure: the same input always
/// yields the same plan, with the same logical buffer ids.
#[tracing::instrument(skip(normalized), fields(layers = normalized.layers.len()))]
pub fn build(normalized: &NormalizedRequest) -> StagePlan {
    let mut ordered: Vec<&NormalizedLayer> = normalized.layers.iter().collect();
    ordered.sort_by_key(|l| l.z);

    let mut b = PlanBuilder::new(normalized.resolution);
    let seed = b.upload(SourceId::BACKGROUND, PixelFormat::Rgba8);
    let acc = ordered
        .into_iter()
        .fold(seed, |acc, layer| b.push_layer(acc, layer));
    b.push(PipelineStage::Download { accumulator: acc });

    let plan = b.finish();
    tracing::debug!(
        stages = plan.len(),
        buffers = plan.buffer_count(),
        fingerprint = %plan.fingerprint(),
        "stage plan built"
    );
    plan
}

struct PlanBuilder {
    resolution: Resolution,
    stages: Vec<PipelineStage>,
    buffers: Vec<BufferDesc>,
}

impl PlanBuilder {
    fn new(resolution: Resolution) -> Self {
        Self {
            resolution,
            stages: Vec::new(),
            buffers: Vec::new(),
        }
    }

    fn alloc(&mut self, format: PixelFormat) -> BufferRef {
        let id = BufferRef(self.buffers.len() as u32);
        self.buffers.push(BufferDesc::new(self.resolution, format));
        id
    }

    fn push(&mut self, stage: PipelineStage) {
        self.stages.push(stage);
    }

    fn upload(&mut self, source: SourceId, format: PixelFormat) -> BufferRef {
        let dst = self.alloc(format);
        self.push(PipelineStage::Upload { source, dst });
        dst
    }

    fn push_layer(&mut self, acc: BufferRef, layer: &NormalizedLayer) -> BufferRef {
        let source = layer.source.id;
        let format = if layer.alpha {
            self.push(PipelineStage::ConvertAlpha { source });
            PixelFormat::Rgba8Premul
        } else {
            PixelFormat::Rgba8
        };
        let layer_buf = self.upload(source, format);
        let out = self.alloc(PixelFormat::Rgba8);
        self.push(PipelineStage::Overlay {
            accumulator: acc,
            layer: layer_buf,
            out,
            x: layer.x,
            y: layer.y,
            opacity: layer.opacity,
            scroll: layer.scroll,
            margins: layer.margins,
        });
        out
    }

    fn finish(self) -> StagePlan {
        let mut last_use = vec![0usize; self.buffers.len()];
        for (i, stage) in self.stages.iter().enumerate() {
            if let Some(w) = stage.writes() {
                last_use[w.index()] = last_use[w.index()].max(i);
            }
            for r in stage.reads() {
                last_use[r.index()] = last_use[r.index()].max(i);
            }
        }
        StagePlan {
            stages: self.stages,
            buffers: self.buffers,
            last_use,
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/pipeline/builder.rs"]
mod tests;
