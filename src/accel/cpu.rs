use std::sync::atomic::{AtomicU64, Ordering};

use crate::accel::blend::composite_into;
use crate::accel::device::{Accelerator, DeviceCaps, DeviceError, OverlayParams};
use crate::foundation::core::{Frame, PixelFormat};
use crate::foundation::error::{StratumError, StratumResult};
use crate::foundation::math::opacity_weight;
use crate::pipeline::stage::BufferDesc;

/// Options for [`CpuAccelerator`].
#[derive(Clone, Debug, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CpuAcceleratorOpts {
    /// Simulated device memory; allocations beyond it fail with out-of-memory. `None` is unbounded.
    pub memory_limit_bytes: Option<u64>,
    /// Maximum overlay stages per plan. `None` is unbounded.
    pub max_overlays: Option<usize>,
    /// Worker threads for row-parallel compositing. `None` uses the global rayon pool.
    pub threads: Option<usize>,
}

/// Host-memory reference backend.
///
/// Buffers are plain byte vectors; overlays run row-parallel on rayon.
pub struct CpuAccelerator {
    opts: CpuAcceleratorOpts,
    used: AtomicU64,
    pool: Option<rayon::ThreadPool>,
}

impl CpuAccelerator {
    pub fn new(opts: CpuAcceleratorOpts) -> StratumResult<Self> {
        let pool = opts.threads.map(build_thread_pool).transpose()?;
        Ok(Self {
            opts,
            used: AtomicU64::new(0),
            pool,
        })
    }

    pub fn opts(&self) -> &CpuAcceleratorOpts {
        &self.opts
    }

    /// Bytes currently held by live buffers.
    pub fn used_bytes(&self) -> u64 {
        self.used.load(Ordering::Relaxed)
    }

    fn run<R: Send>(&self, f: impl FnOnce() -> R + Send) -> R {
        match &self.pool {
            Some(pool) => pool.install(f),
            None => f(),
        }
    }
}

impl Default for CpuAccelerator {
    fn default() -> Self {
        Self {
            opts: CpuAcceleratorOpts::default(),
            used: AtomicU64::new(0),
            pool: None,
        }
    }
}

impl Accelerator for CpuAccelerator {
    type Memory = Vec<u8>;

    fn caps(&self) -> DeviceCaps {
        DeviceCaps {
            name: "cpu".to_string(),
            max_overlays: self.opts.max_overlays,
            max_resolution: None,
            formats: vec![PixelFormat::Rgba8, PixelFormat::Rgba8Premul],
        }
    }

    fn alloc(&self, desc: BufferDesc) -> Result<Vec<u8>, DeviceError> {
        let bytes = desc.byte_len();
        if let Some(limit) = self.opts.memory_limit_bytes {
            let reserved = self
                .used
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |used| {
                    used.checked_add(bytes).filter(|&next| next <= limit)
                });
            if let Err(used) = reserved {
                return Err(DeviceError::OutOfMemory {
                    requested: bytes,
                    available: limit.saturating_sub(used),
                });
            }
        } else {
            self.used.fetch_add(bytes, Ordering::AcqRel);
        }
        Ok(vec![0u8; bytes as usize])
    }

    fn free(&self, desc: BufferDesc, mem: Vec<u8>) {
        drop(mem);
        self.used.fetch_sub(desc.byte_len(), Ordering::AcqRel);
    }

    fn upload(&self, host: &Frame, desc: BufferDesc, dst: &mut Vec<u8>) -> Result<(), DeviceError> {
        if host.resolution() != desc.resolution {
            return Err(DeviceError::Malformed(format!(
                "host frame is {}, buffer is {}",
                host.resolution(),
                desc.resolution
            )));
        }
        if host.data.len() != dst.len() {
            return Err(DeviceError::Malformed(format!(
                "host frame is {} bytes, buffer is {}",
                host.data.len(),
                dst.len()
            )));
        }
        match desc.format {
            PixelFormat::Rgba8 => {
                dst.copy_from_slice(&host.data);
                for px in dst.chunks_exact_mut(4) {
                    px[3] = 255;
                }
            }
            PixelFormat::Rgba8Premul => {
                if host.format != PixelFormat::Rgba8Premul {
                    return Err(DeviceError::Malformed(
                        "premultiplied buffer requires an alpha-converted host frame".to_string(),
                    ));
                }
                dst.copy_from_slice(&host.data);
            }
        }
        Ok(())
    }

    fn overlay(
        &self,
        params: OverlayParams,
        acc: &Vec<u8>,
        layer: &Vec<u8>,
        out: &mut Vec<u8>,
    ) -> Result<(), DeviceError> {
        let expected = params.resolution.pixel_count() * 4;
        if acc.len() != expected || layer.len() != expected || out.len() != expected {
            return Err(DeviceError::Malformed(format!(
                "overlay buffers must be {expected} bytes for {}",
                params.resolution
            )));
        }
        out.copy_from_slice(acc);
        let op = opacity_weight(params.opacity);
        let occlude = !params.layer_format.has_alpha() && op == 255;
        self.run(|| {
            composite_into(
                out,
                layer,
                params.resolution,
                (params.x, params.y),
                params.margins.visible_rows(params.resolution.height),
                op,
                occlude,
            )
        });
        Ok(())
    }

    fn download(&self, src: &Vec<u8>, desc: BufferDesc) -> Result<Frame, DeviceError> {
        if src.len() as u64 != desc.byte_len() {
            return Err(DeviceError::Malformed(format!(
                "buffer is {} bytes, expected {}",
                src.len(),
                desc.byte_len()
            )));
        }
        Ok(Frame {
            width: desc.resolution.width,
            height: desc.resolution.height,
            format: desc.format,
            data: src.clone(),
        })
    }
}

fn build_thread_pool(threads: usize) -> StratumResult<rayon::ThreadPool> {
    if threads == 0 {
        return Err(StratumError::pipeline_init(
            "cpu accelerator 'threads' must be >= 1 when set",
        ));
    }
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build()
        .map_err(|e| StratumError::pipeline_init(format!("failed to build rayon thread pool: {e}")))
}

#[cfg(test)]
#[path = "../../tests/unit/accel/cpu.rs"]
mod tests;
