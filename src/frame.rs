//! Frame ownership and buffer pooling.
//!
//! A `Frame` is owned exclusively by whichever pipeline stage currently holds
//! it; ownership transfers on hand-off through a queue, so there is never
//! concurrent mutation. Detections reference frames by `sequence_id` only.
//!
//! `FramePool` recycles pixel buffers so the capture loop does not allocate
//! per frame at steady state.

use std::time::Instant;

/// One captured video frame. RGB24, row-major, no padding.
#[derive(Debug)]
pub struct Frame {
    pub pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonically increasing, gap-free across reconnects.
    pub sequence_id: u64,
    /// Monotonic capture instant.
    pub captured_at: Instant,
}

impl Frame {
    pub fn byte_len(&self) -> usize {
        self.pixels.len()
    }

    /// Detach the pixel buffer for recycling. The frame is consumed.
    pub fn into_pixels(self) -> Vec<u8> {
        self.pixels
    }
}

/// Fixed-size pool of reusable pixel buffers.
///
/// `acquire` hands out a zero-length buffer with the pool's capacity already
/// reserved; `release` takes buffers back from frames evicted under queue
/// pressure. Buffers of the wrong size (after a resolution change) are
/// discarded rather than kept.
pub struct FramePool {
    free: Vec<Vec<u8>>,
    buffer_capacity: usize,
    max_buffers: usize,
}

impl FramePool {
    pub fn new(width: u32, height: u32, max_buffers: usize) -> Self {
        let buffer_capacity = (width as usize) * (height as usize) * 3;
        Self {
            free: Vec::with_capacity(max_buffers),
            buffer_capacity,
            max_buffers,
        }
    }

    pub fn acquire(&mut self) -> Vec<u8> {
        match self.free.pop() {
            Some(mut buf) => {
                buf.clear();
                buf
            }
            None => Vec::with_capacity(self.buffer_capacity),
        }
    }

    pub fn release(&mut self, buf: Vec<u8>) {
        if self.free.len() < self.max_buffers && buf.capacity() >= self.buffer_capacity {
            self.free.push(buf);
        }
    }

    pub fn free_buffers(&self) -> usize {
        self.free.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_recycles_released_buffers() {
        let mut pool = FramePool::new(4, 4, 2);
        let buf = pool.acquire();
        assert_eq!(buf.capacity(), 4 * 4 * 3);

        let mut full = pool.acquire();
        full.resize(4 * 4 * 3, 7);
        pool.release(full);
        assert_eq!(pool.free_buffers(), 1);

        let recycled = pool.acquire();
        assert!(recycled.is_empty());
        assert!(recycled.capacity() >= 4 * 4 * 3);
    }

    #[test]
    fn pool_caps_retained_buffers() {
        let mut pool = FramePool::new(2, 2, 1);
        pool.release(vec![0u8; 12]);
        pool.release(vec![0u8; 12]);
        assert_eq!(pool.free_buffers(), 1);
    }

    #[test]
    fn pool_discards_undersized_buffers() {
        let mut pool = FramePool::new(4, 4, 4);
        pool.release(vec![0u8; 3]);
        assert_eq!(pool.free_buffers(), 0);
    }
}
