use super::*;
use crate::accel::cpu::CpuAccelerator;
use crate::accel::gate::AdmissionPolicy;
use crate::foundation::core::{PixelFormat, Resolution};

fn ctx() -> Arc<AcceleratorContext<CpuAccelerator>> {
    Arc::new(AcceleratorContext::new(
        CpuAccelerator::default(),
        1,
        AdmissionPolicy::Reject,
    ))
}

fn desc(w: u32, h: u32) -> BufferDesc {
    BufferDesc::new(Resolution::new(w, h), PixelFormat::Rgba8)
}

#[test]
fn released_buffers_are_reused() {
    let ctx = ctx();
    let mut pool = BufferPool::new(Arc::clone(&ctx), BufferPoolOpts::default());
    let d = desc(8, 8);

    let a = pool.borrow(d, "upload").unwrap();
    pool.release(d, a);
    let _b = pool.borrow(d, "upload").unwrap();

    let st = pool.stats();
    assert_eq!(st.misses, 1);
    assert_eq!(st.hits, 1);
    assert_eq!(ctx.stats().allocations, 1);
}

#[test]
fn pool_honors_bucket_cap() {
    let ctx = ctx();
    let mut pool = BufferPool::new(
        Arc::clone(&ctx),
        BufferPoolOpts {
            max_pool_bytes: 1 << 30,
            max_buffers_per_bucket: 1,
        },
    );
    let d = desc(8, 8);
    let a = pool.borrow(d, "t").unwrap();
    let b = pool.borrow(d, "t").unwrap();
    pool.release(d, a);
    pool.release(d, b);

    let st = pool.stats();
    assert_eq!(st.retained_buffers, 1);
    assert_eq!(st.dropped_on_release, 1);
    assert_eq!(ctx.stats().live_buffers, 1);
}

#[test]
fn pool_honors_global_byte_cap() {
    let ctx = ctx();
    let d = desc(8, 8);
    let mut pool = BufferPool::new(
        Arc::clone(&ctx),
        BufferPoolOpts {
            max_pool_bytes: d.byte_len(),
            max_buffers_per_bucket: 8,
        },
    );
    let a = pool.borrow(d, "t").unwrap();
    let b = pool.borrow(d, "t").unwrap();
    pool.release(d, a);
    pool.release(d, b);

    let st = pool.stats();
    assert_eq!(st.retained_bytes, d.byte_len());
    assert_eq!(st.retained_buffers, 1);
    assert!(st.dropped_on_release >= 1);
}

#[test]
fn drop_returns_everything_to_the_device() {
    let ctx = ctx();
    {
        let mut pool = BufferPool::new(Arc::clone(&ctx), BufferPoolOpts::default());
        let a = pool.borrow(desc(4, 4), "t").unwrap();
        let b = pool.borrow(desc(2, 2), "t").unwrap();
        pool.release(desc(4, 4), a);
        pool.release(desc(2, 2), b);
        assert_eq!(ctx.stats().live_buffers, 2);
    }
    let st = ctx.stats();
    assert_eq!(st.live_buffers, 0);
    assert_eq!(st.live_bytes, 0);
    assert_eq!(st.frees, 2);
}
