use super::*;

#[test]
fn empty_size_has_no_pool() {
    assert!(FrameBufferPool::new(0, 10, FramePoolOpts::default()).is_none());
    let adaptor = PixelBufferAdaptor::new(Size::ZERO, FramePoolOpts::default());
    assert!(adaptor.pool().is_none());
    assert!(adaptor.allocate_render_buffer().is_none());
    assert!(
        PixelBufferAdaptor::without_pool()
            .allocate_render_buffer()
            .is_none()
    );
}

#[test]
fn dropped_frames_are_recycled() {
    let adaptor = PixelBufferAdaptor::new(Size::new(4.0, 2.0), FramePoolOpts::default());
    let pool = adaptor.pool().unwrap().clone();

    let mut a = adaptor.allocate_render_buffer().unwrap();
    assert_eq!((a.width, a.height, a.data.len()), (4, 2, 32));
    a.fill([9, 9, 9, 9]);
    drop(a);
    assert_eq!(pool.stats().retained, 1);

    let b = adaptor.allocate_render_buffer().unwrap();
    // Recycled storage keeps stale contents.
    assert_eq!(b.pixel(0, 0), Some([9, 9, 9, 9]));
    let st = pool.stats();
    assert_eq!(st.allocated, 1);
    assert_eq!(st.reused, 1);
    assert_eq!(st.retained, 0);
}

#[test]
fn pool_honors_retention_cap() {
    let pool = FrameBufferPool::new(2, 2, FramePoolOpts { max_retained: 1 }).unwrap();
    let a = pool.acquire();
    let b = pool.acquire();
    drop(a);
    drop(b);
    let st = pool.stats();
    assert_eq!(st.retained, 1);
    assert_eq!(st.dropped_on_release, 1);
}

#[test]
fn detached_frames_outlive_pool() {
    let pool = FrameBufferPool::new(2, 2, FramePoolOpts::default()).unwrap();
    let frame = pool.acquire();
    drop(pool);
    assert_eq!(frame.data.len(), 16);
    let owned = frame.into_frame();
    assert_eq!(owned.width, 2);

    let loose = PooledFrame::detached(FrameBuffer::new(1, 1));
    assert_eq!(loose.data.len(), 4);
}
