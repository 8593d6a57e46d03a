use std::sync::atomic::{AtomicU64, Ordering};

use crate::accel::device::{Accelerator, DeviceCaps};
use crate::accel::gate::{AdmissionGate, AdmissionPermit, AdmissionPolicy};
use crate::foundation::error::{StratumError, StratumResult};
use crate::pipeline::stage::BufferDesc;

/// Lock-free device byte counters.
#[derive(Debug, Default)]
struct Accounting {
    live_buffers: AtomicU64,
    live_bytes: AtomicU64,
    peak_bytes: AtomicU64,
    allocations: AtomicU64,
    frees: AtomicU64,
    failed_allocations: AtomicU64,
}

impl Accounting {
    #[inline]
    fn on_alloc(&self, bytes: u64) {
        self.live_buffers.fetch_add(1, Ordering::Relaxed);
        self.allocations.fetch_add(1, Ordering::Relaxed);
        let prev = self.live_bytes.fetch_add(bytes, Ordering::Relaxed);
        self.peak_bytes
            .fetch_max(prev.saturating_add(bytes), Ordering::Relaxed);
    }

    #[inline]
    fn on_free(&self, bytes: u64) {
        self.live_buffers.fetch_sub(1, Ordering::Relaxed);
        self.live_bytes.fetch_sub(bytes, Ordering::Relaxed);
        self.frees.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time device usage across all jobs sharing one context.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, serde::Serialize)]
pub struct DeviceStats {
    /// Buffers currently allocated.
    pub live_buffers: u64,
    /// Bytes currently allocated.
    pub live_bytes: u64,
    /// High-water mark of `live_bytes`.
    pub peak_bytes: u64,
    pub allocations: u64,
    pub frees: u64,
    pub failed_allocations: u64,
}

/// Long-lived device context shared by every job of an engine.
///
/// Owns the backend, counts every buffer that passes through it and holds the admission gate
/// bounding concurrent jobs.
pub struct AcceleratorContext<A: Accelerator> {
    device: A,
    gate: AdmissionGate,
    accounting: Accounting,
    next_job: AtomicU64,
}

impl<A: Accelerator> AcceleratorContext<A> {
    pub fn new(device: A, max_concurrent_jobs: usize, policy: AdmissionPolicy) -> Self {
        let caps = device.caps();
        tracing::info!(
            device = %caps.name,
            max_concurrent_jobs,
            ?policy,
            "accelerator context created"
        );
        Self {
            device,
            gate: AdmissionGate::new(max_concurrent_jobs, policy),
            accounting: Accounting::default(),
            next_job: AtomicU64::new(1),
        }
    }

    #[inline]
    pub fn device(&self) -> &A {
        &self.device
    }

    pub fn caps(&self) -> DeviceCaps {
        self.device.caps()
    }

    pub fn gate(&self) -> &AdmissionGate {
        &self.gate
    }

    pub(crate) fn admit(&self) -> StratumResult<AdmissionPermit> {
        self.gate.acquire()
    }

    pub(crate) fn next_job_id(&self) -> u64 {
        self.next_job.fetch_add(1, Ordering::Relaxed)
    }

    /// Allocate one device buffer, attributing failures to `stage`.
    pub fn alloc(&self, desc: BufferDesc, stage: &str) -> StratumResult<A::Memory> {
        let bytes = desc.byte_len();
        match self.device.alloc(desc) {
            Ok(mem) => {
                self.accounting.on_alloc(bytes);
                Ok(mem)
            }
            Err(e) => {
                self.accounting
                    .failed_allocations
                    .fetch_add(1, Ordering::Relaxed);
                tracing::warn!(stage, bytes, error = %e, "device allocation failed");
                Err(StratumError::resource(stage, bytes, e.to_string()))
            }
        }
    }

    /// Return one device buffer.
    pub fn free(&self, desc: BufferDesc, mem: A::Memory) {
        self.device.free(desc, mem);
        self.accounting.on_free(desc.byte_len());
    }

    pub fn stats(&self) -> DeviceStats {
        let a = &self.accounting;
        DeviceStats {
            live_buffers: a.live_buffers.load(Ordering::Relaxed),
            live_bytes: a.live_bytes.load(Ordering::Relaxed),
            peak_bytes: a.peak_bytes.load(Ordering::Relaxed),
            allocations: a.allocations.load(Ordering::Relaxed),
            frees: a.frees.load(Ordering::Relaxed),
            failed_allocations: a.failed_allocations.load(Ordering::Relaxed),
        }
    }
}

impl<A: Accelerator> std::fmt::Debug for AcceleratorContext<A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AcceleratorContext")
            .field("device", &self.device.caps().name)
            .field("gate", &self.gate)
            .field("stats", &self.stats())
            .finish()
    }
}

#[cfg(test)]
#[path = "../../tests/unit/accel/context.rs"]
mod tests;
