use crate::foundation::core::{Frame, Margins, PixelFormat, Resolution};
use crate::foundation::math::mul_div255_u8;
use crate::pipeline::stage::BufferDesc;

/// Failure reported by a device backend.
#[derive(thiserror::Error, Clone, Debug, PartialEq, Eq)]
pub enum DeviceError {
    #[error("out of device memory: requested {requested} bytes, {available} available")]
    OutOfMemory { requested: u64, available: u64 },
    #[error("device context lost: {0}")]
    ContextLost(String),
    #[error("unsupported operation: {0}")]
    Unsupported(String),
    #[error("malformed buffer: {0}")]
    Malformed(String),
}

/// What a backend can realize. Checked once per job, before the first tick.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceCaps {
    pub name: String,
    /// Maximum overlay stages per plan; `None` means unbounded.
    pub max_overlays: Option<usize>,
    /// Largest buffer the device accepts; `None` means unbounded.
    pub max_resolution: Option<Resolution>,
    /// Buffer formats the device can hold.
    pub formats: Vec<PixelFormat>,
}

/// Parameters for one overlay execution.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct OverlayParams {
    pub x: i32,
    pub y: i32,
    pub opacity: f32,
    /// Format of the layer buffer; premultiplied layers blend, opaque layers occlude.
    pub layer_format: PixelFormat,
    pub resolution: Resolution,
    /// Output rows the layer must leave untouched.
    pub margins: Margins,
}

/// A compute device holding frame buffers.
///
/// Implementations must be shareable across jobs; the engine guarantees that no two stages ever
/// write the same buffer concurrently, so per-buffer operations need no internal locking.
pub trait Accelerator: Send + Sync + 'static {
    /// Device-resident memory handle.
    type Memory: Send + 'static;

    fn caps(&self) -> DeviceCaps;

    /// Allocate memory for one buffer of `desc`.
    fn alloc(&self, desc: BufferDesc) -> Result<Self::Memory, DeviceError>;

    /// Return memory to the device.
    fn free(&self, desc: BufferDesc, mem: Self::Memory);

    /// Host-to-device copy. Opaque (`Rgba8`) uploads discard the alpha channel.
    fn upload(
        &self,
        host: &Frame,
        desc: BufferDesc,
        dst: &mut Self::Memory,
    ) -> Result<(), DeviceError>;

    /// Composite `layer` over `acc` into `out`. `out` never aliases either input.
    fn overlay(
        &self,
        params: OverlayParams,
        acc: &Self::Memory,
        layer: &Self::Memory,
        out: &mut Self::Memory,
    ) -> Result<(), DeviceError>;

    /// Device-to-host copy.
    fn download(&self, src: &Self::Memory, desc: BufferDesc) -> Result<Frame, DeviceError>;

    /// Convert a staged host frame to premultiplied alpha before upload.
    fn convert_alpha(&self, frame: &mut Frame) -> Result<(), DeviceError> {
        premultiply_frame(frame)
    }
}

/// Straight RGBA8 to premultiplied RGBA8, in place.
pub fn premultiply_frame(frame: &mut Frame) -> Result<(), DeviceError> {
    match frame.format {
        PixelFormat::Rgba8Premul => Ok(()),
        PixelFormat::Rgba8 => {
            if frame.data.len() != frame.expected_len() {
                return Err(DeviceError::Malformed(format!(
                    "frame data is {} bytes, expected {} for {}",
                    frame.data.len(),
                    frame.expected_len(),
                    frame.resolution()
                )));
            }
            premultiply_rgba8_in_place(&mut frame.data);
            frame.format = PixelFormat::Rgba8Premul;
            Ok(())
        }
    }
}

fn premultiply_rgba8_in_place(rgba: &mut [u8]) {
    for px in rgba.chunks_exact_mut(4) {
        let a = u16::from(px[3]);
        for c in &mut px[..3] {
            *c = mul_div255_u8(u16::from(*c), a);
        }
    }
}

#[cfg(test)]
#[path = "../../tests/unit/accel/device.rs"]
mod tests;
