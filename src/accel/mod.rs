//! Device abstraction: the backend trait, the shared context and per-job buffer recycling.

pub(crate) mod blend;
/// Reference host-memory backend.
pub mod cpu;
/// Shared device context with allocation accounting.
pub mod context;
/// Backend trait and capability description.
pub mod device;
/// Job admission control.
pub mod gate;
/// Per-job buffer pool.
pub mod pool;
