use crate::encode::codec::OutputCodec;
use crate::foundation::core::{Fps, Frame, FrameIndex, Resolution};
use crate::foundation::error::{StratumError, StratumResult};

/// Configuration handed to an [`EncodeSink`] before the first frame.
#[derive(Clone, Debug, PartialEq)]
pub struct SinkConfig {
    /// Output width in pixels.
    pub width: u32,
    /// Output height in pixels.
    pub height: u32,
    /// Output frames-per-second.
    pub fps: Fps,
    /// Codec requested by the composition.
    pub codec: OutputCodec,
    /// Number of frames the job will produce.
    pub total_frames: u64,
}

impl SinkConfig {
    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }
}

/// Consumer of composited frames.
///
/// Ordering contract: `consume` is called with strictly increasing, gapless `FrameIndex` values
/// starting at 0. Frames already consumed are never retracted.
pub trait EncodeSink: Send {
    /// Called once before any frame.
    fn begin(&mut self, cfg: SinkConfig) -> StratumResult<()>;
    /// Accept one frame. Rejections surface as encoding errors and abort the job.
    fn consume(&mut self, idx: FrameIndex, frame: &Frame) -> StratumResult<()>;
    /// Finalize the output after the last frame.
    fn end(&mut self) -> StratumResult<()>;
    /// Drop partial output. Called instead of `end` when the caller discards a cancelled or
    /// failed job's output.
    fn abort(&mut self) -> StratumResult<()> {
        Ok(())
    }
}

/// Checks frames against the sink configuration and the ordering contract.
#[derive(Debug, Default)]
pub(crate) struct FrameOrder {
    next: u64,
}

impl FrameOrder {
    pub(crate) fn reset(&mut self) {
        self.next = 0;
    }

    pub(crate) fn check(
        &mut self,
        cfg: Option<&SinkConfig>,
        idx: FrameIndex,
        frame: &Frame,
    ) -> StratumResult<()> {
        let cfg = cfg.ok_or_else(|| StratumError::encoding("sink not started"))?;
        if idx.0 != self.next {
            return Err(StratumError::encoding(format!(
                "out-of-order frame: got index {}, expected {}",
                idx.0, self.next
            )));
        }
        if frame.width != cfg.width || frame.height != cfg.height {
            return Err(StratumError::encoding(format!(
                "frame size mismatch: got {}x{}, expected {}x{}",
                frame.width, frame.height, cfg.width, cfg.height
            )));
        }
        if frame.data.len() != frame.expected_len() {
            return Err(StratumError::encoding(
                "frame.data size mismatch with width*height*4",
            ));
        }
        self.next += 1;
        Ok(())
    }
}

/// In-memory sink for tests and debugging.
#[derive(Debug, Default)]
pub struct InMemorySink {
    cfg: Option<SinkConfig>,
    order: FrameOrder,
    frames: Vec<(FrameIndex, Frame)>,
    finished: bool,
    aborted: bool,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Configuration captured in `begin`, if any.
    pub fn config(&self) -> Option<&SinkConfig> {
        self.cfg.as_ref()
    }

    /// Captured frames, in index order.
    pub fn frames(&self) -> &[(FrameIndex, Frame)] {
        &self.frames
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted
    }
}

impl EncodeSink for InMemorySink {
    fn begin(&mut self, cfg: SinkConfig) -> StratumResult<()> {
        self.cfg = Some(cfg);
        self.order.reset();
        self.frames.clear();
        self.finished = false;
        self.aborted = false;
        Ok(())
    }

    fn consume(&mut self, idx: FrameIndex, frame: &Frame) -> StratumResult<()> {
        self.order.check(self.cfg.as_ref(), idx, frame)?;
        self.frames.push((idx, frame.clone()));
        Ok(())
    }

    fn end(&mut self) -> StratumResult<()> {
        self.finished = true;
        Ok(())
    }

    fn abort(&mut self) -> StratumResult<()> {
        self.frames.clear();
        self.aborted = true;
        Ok(())
    }
}

/// Sink that validates and counts frames without keeping them.
///
/// Useful for long dry runs where retaining every frame would be prohibitive.
#[derive(Debug, Default)]
pub struct FrameCounterSink {
    cfg: Option<SinkConfig>,
    order: FrameOrder,
    count: u64,
    last: Option<Frame>,
    finished: bool,
}

impl FrameCounterSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self) -> u64 {
        self.count
    }

    /// The most recently consumed frame.
    pub fn last_frame(&self) -> Option<&Frame> {
        self.last.as_ref()
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }
}

impl EncodeSink for FrameCounterSink {
    fn begin(&mut self, cfg: SinkConfig) -> StratumResult<()> {
        self.cfg = Some(cfg);
        self.order.reset();
        self.count = 0;
        self.last = None;
        self.finished = false;
        Ok(())
    }

    fn consume(&mut self, idx: FrameIndex, frame: &Frame) -> StratumResult<()> {
        self.order.check(self.cfg.as_ref(), idx, frame)?;
        self.count += 1;
        match self.last.as_mut() {
            Some(last) => last.clone_from(frame),
            None => self.last = Some(frame.clone()),
        }
        Ok(())
    }

    fn end(&mut self) -> StratumResult<()> {
        self.finished = true;
        Ok(())
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/sink.rs"]
mod tests;
