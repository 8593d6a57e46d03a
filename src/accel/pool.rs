use std::collections::HashMap;
use std::sync::Arc;

use crate::accel::context::AcceleratorContext;
use crate::accel::device::Accelerator;
use crate::foundation::error::StratumResult;
use crate::pipeline::stage::BufferDesc;

/// Retention limits for a [`BufferPool`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BufferPoolOpts {
    /// Maximum bytes retained across all buckets.
    pub max_pool_bytes: u64,
    /// Maximum retained buffers per `(resolution, format)` bucket.
    pub max_buffers_per_bucket: usize,
}

impl Default for BufferPoolOpts {
    fn default() -> Self {
        Self {
            max_pool_bytes: 256 * 1024 * 1024,
            max_buffers_per_bucket: 8,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct BufferPoolStats {
    pub retained_buffers: usize,
    pub retained_bytes: u64,
    /// Borrows served from a retained buffer.
    pub hits: u64,
    /// Borrows that had to allocate from the device.
    pub misses: u64,
    /// Releases that went back to the device because a cap was hit.
    pub dropped_on_release: u64,
}

/// Per-job recycling allocator for device buffers.
///
/// Keyed by [`BufferDesc`]. Buffers released after their last use in one tick are reused by the
/// next tick, so steady-state ticks allocate nothing. Everything retained is returned to the
/// device when the pool is drained or dropped.
pub struct BufferPool<A: Accelerator> {
    ctx: Arc<AcceleratorContext<A>>,
    opts: BufferPoolOpts,
    stats: BufferPoolStats,
    buckets: HashMap<BufferDesc, Vec<A::Memory>>,
}

impl<A: Accelerator> BufferPool<A> {
    pub fn new(ctx: Arc<AcceleratorContext<A>>, opts: BufferPoolOpts) -> Self {
        Self {
            ctx,
            opts,
            stats: BufferPoolStats::default(),
            buckets: HashMap::new(),
        }
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.stats
    }

    /// Take a buffer of `desc`, allocating on a miss. `stage` names the requester in errors.
    pub fn borrow(&mut self, desc: BufferDesc, stage: &str) -> StratumResult<A::Memory> {
        if let Some(mem) = self.buckets.get_mut(&desc).and_then(Vec::pop) {
            self.stats.hits += 1;
            self.stats.retained_buffers = self.stats.retained_buffers.saturating_sub(1);
            self.stats.retained_bytes = self.stats.retained_bytes.saturating_sub(desc.byte_len());
            return Ok(mem);
        }
        self.stats.misses += 1;
        self.ctx.alloc(desc, stage)
    }

    /// Hand a buffer back for reuse, or to the device when over a cap.
    pub fn release(&mut self, desc: BufferDesc, mem: A::Memory) {
        let bytes = desc.byte_len();
        let over_bytes = self.stats.retained_bytes.saturating_add(bytes) > self.opts.max_pool_bytes;
        let bucket = self.buckets.entry(desc).or_default();
        if over_bytes || bucket.len() >= self.opts.max_buffers_per_bucket {
            self.stats.dropped_on_release += 1;
            self.ctx.free(desc, mem);
            return;
        }
        bucket.push(mem);
        self.stats.retained_buffers += 1;
        self.stats.retained_bytes += bytes;
    }

    /// Return every retained buffer to the device.
    pub fn drain(&mut self) {
        for (desc, bucket) in self.buckets.drain() {
            for mem in bucket {
                self.ctx.free(desc, mem);
            }
        }
        self.stats.retained_buffers = 0;
        self.stats.retained_bytes = 0;
    }
}

impl<A: Accelerator> Drop for BufferPool<A> {
    fn drop(&mut self) {
        self.drain();
    }
}

#[cfg(test)]
#[path = "../../tests/unit/accel/pool.rs"]
mod tests;
