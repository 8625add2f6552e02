use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::foundation::core::{Size, pixel_dims};
use crate::foundation::time::MediaTime;
use crate::media::pipeline::TrackInput;
use crate::media::sample::FrameBuffer;

/// Pool configuration.
#[derive(Debug, Clone, Copy)]
pub struct FramePoolOpts {
    /// Maximum number of free buffers kept for reuse; extra released buffers are dropped.
    pub max_retained: usize,
}

impl Default for FramePoolOpts {
    fn default() -> Self {
        Self { max_retained: 8 }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct FramePoolStats {
    /// Buffers currently parked in the pool.
    pub retained: usize,
    /// Fresh allocations.
    pub allocated: u64,
    /// Allocations served from a recycled buffer.
    pub reused: u64,
    /// Released buffers dropped because the pool was full.
    pub dropped_on_release: u64,
}

#[derive(Debug)]
struct PoolState {
    free: Vec<Vec<u8>>,
    stats: FramePoolStats,
}

/// Recycling allocator for fixed-size RGBA8 frames.
///
/// Buffers come back through [`PooledFrame`]'s `Drop`. Recycled buffers keep their previous
/// contents.
#[derive(Debug)]
pub struct FrameBufferPool {
    width: u32,
    height: u32,
    opts: FramePoolOpts,
    state: Mutex<PoolState>,
}

impl FrameBufferPool {
    /// Create a pool of `width x height` frames. Returns `None` for an empty frame size.
    pub fn new(width: u32, height: u32, opts: FramePoolOpts) -> Option<Arc<Self>> {
        if width == 0 || height == 0 {
            return None;
        }
        Some(Arc::new(Self {
            width,
            height,
            opts,
            state: Mutex::new(PoolState {
                free: Vec::new(),
                stats: FramePoolStats::default(),
            }),
        }))
    }

    pub fn dims(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn stats(&self) -> FramePoolStats {
        self.state.lock().stats
    }

    /// Take a buffer from the pool, allocating when none is free.
    pub fn acquire(self: &Arc<Self>) -> PooledFrame {
        let recycled = {
            let mut st = self.state.lock();
            let buf = st.free.pop();
            if buf.is_some() {
                st.stats.retained = st.free.len();
                st.stats.reused += 1;
            } else {
                st.stats.allocated += 1;
            }
            buf
        };
        let data =
            recycled.unwrap_or_else(|| vec![0u8; FrameBuffer::byte_len(self.width, self.height)]);
        PooledFrame {
            frame: Some(FrameBuffer {
                width: self.width,
                height: self.height,
                data,
            }),
            pool: Arc::downgrade(self),
        }
    }

    fn release(&self, frame: FrameBuffer) {
        if frame.width != self.width
            || frame.height != self.height
            || frame.data.len() != FrameBuffer::byte_len(self.width, self.height)
        {
            return;
        }
        let mut st = self.state.lock();
        if st.free.len() >= self.opts.max_retained {
            st.stats.dropped_on_release += 1;
            return;
        }
        st.free.push(frame.data);
        st.stats.retained = st.free.len();
    }
}

/// A frame borrowed from a [`FrameBufferPool`]; returns to the pool on drop.
///
/// Dereferences to [`FrameBuffer`]. If the pool is gone the storage is simply freed.
#[derive(Debug)]
pub struct PooledFrame {
    frame: Option<FrameBuffer>,
    pool: Weak<FrameBufferPool>,
}

impl PooledFrame {
    /// Detach the frame from its pool.
    pub fn into_frame(mut self) -> FrameBuffer {
        self.frame.take().unwrap_or_else(|| FrameBuffer::new(0, 0))
    }

    /// Wrap a frame that does not belong to any pool.
    pub fn detached(frame: FrameBuffer) -> Self {
        Self {
            frame: Some(frame),
            pool: Weak::new(),
        }
    }
}

impl Deref for PooledFrame {
    type Target = FrameBuffer;

    fn deref(&self) -> &FrameBuffer {
        // Only `into_frame`/`drop` take the frame, and both consume `self`.
        self.frame.as_ref().unwrap_or(&EMPTY_FRAME)
    }
}

impl DerefMut for PooledFrame {
    fn deref_mut(&mut self) -> &mut FrameBuffer {
        self.frame.get_or_insert_with(|| FrameBuffer::new(0, 0))
    }
}

static EMPTY_FRAME: FrameBuffer = FrameBuffer {
    width: 0,
    height: 0,
    data: Vec::new(),
};

impl Drop for PooledFrame {
    fn drop(&mut self) {
        if let (Some(frame), Some(pool)) = (self.frame.take(), self.pool.upgrade()) {
            pool.release(frame);
        }
    }
}

/// Bridge between the video track input and its recycling pool.
///
/// Lets a frame interceptor render into a buffer compatible with the sink without allocating per
/// frame.
#[derive(Debug, Clone)]
pub struct PixelBufferAdaptor {
    pool: Option<Arc<FrameBufferPool>>,
}

impl PixelBufferAdaptor {
    /// Adaptor whose pool produces `render_size` frames. An empty size leaves it without a pool.
    pub fn new(render_size: Size, opts: FramePoolOpts) -> Self {
        let (w, h) = pixel_dims(render_size);
        Self {
            pool: FrameBufferPool::new(w, h, opts),
        }
    }

    /// Adaptor without a pool; [`PixelBufferAdaptor::allocate_render_buffer`] always fails.
    pub fn without_pool() -> Self {
        Self { pool: None }
    }

    pub fn pool(&self) -> Option<&Arc<FrameBufferPool>> {
        self.pool.as_ref()
    }

    /// Allocate a buffer from the pool, or `None` when no pool is available.
    pub fn allocate_render_buffer(&self) -> Option<PooledFrame> {
        self.pool.as_ref().map(FrameBufferPool::acquire)
    }

    /// Append a pool frame to `input` at `pts`.
    pub fn append(&self, input: &mut dyn TrackInput, frame: PooledFrame, pts: MediaTime) -> bool {
        input.append_frame(frame, pts)
    }
}

#[cfg(test)]
#[path = "../../tests/unit/encode/pool.rs"]
mod tests;
