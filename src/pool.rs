//! Fixed pool of receive buffers.
//!
//! A [`Frame`] owns one buffer taken from the pool. Dropping the frame hands
//! the storage back, so every buffer is released exactly once and the
//! number of free buffers can be checked for leaks.

use std::fmt;
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PoolError {
    #[error("buffer pool needs at least one buffer")]
    Empty,
    #[error("buffer size must be non-zero")]
    ZeroBufferSize,
}

struct PoolInner {
    free: ArrayQueue<Box<[u8]>>,
    buffer_size: usize,
    capacity: usize,
}

/// Shared handle to the pool. Cloning shares the same buffers.
#[derive(Clone)]
pub struct BufferPool {
    inner: Arc<PoolInner>,
}

impl BufferPool {
    /// Pre-allocates `capacity` buffers of `buffer_size` bytes each.
    pub fn new(capacity: usize, buffer_size: usize) -> Result<Self, PoolError> {
        if capacity == 0 {
            return Err(PoolError::Empty);
        }
        if buffer_size == 0 {
            return Err(PoolError::ZeroBufferSize);
        }
        let free = ArrayQueue::new(capacity);
        for _ in 0..capacity {
            // Cannot fail: the queue was sized for exactly these buffers
            let _ = free.push(vec![0u8; buffer_size].into_boxed_slice());
        }
        Ok(BufferPool {
            inner: Arc::new(PoolInner {
                free,
                buffer_size,
                capacity,
            }),
        })
    }

    /// Takes a buffer out of the pool, or `None` if all are in use.
    pub fn alloc(&self) -> Option<Frame> {
        let data = self.inner.free.pop()?;
        Some(Frame {
            data,
            len: 0,
            pool: Arc::clone(&self.inner),
        })
    }

    /// Takes a buffer and fills it with a copy of `bytes`, truncated to the
    /// buffer size.
    pub fn alloc_from(&self, bytes: &[u8]) -> Option<Frame> {
        let mut frame = self.alloc()?;
        frame.fill_from(bytes);
        Some(frame)
    }

    pub fn available(&self) -> usize {
        self.inner.free.len()
    }

    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }
}

impl fmt::Debug for BufferPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferPool")
            .field("capacity", &self.inner.capacity)
            .field("available", &self.available())
            .field("buffer_size", &self.inner.buffer_size)
            .finish()
    }
}

/// One received frame in a pool buffer.
pub struct Frame {
    data: Box<[u8]>,
    len: usize,
    pool: Arc<PoolInner>,
}

impl Frame {
    /// Valid bytes of the frame.
    #[inline]
    pub fn bytes(&self) -> &[u8] {
        &self.data[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whole underlying buffer, for receive paths that write in place.
    /// Follow with [`Frame::set_len`].
    pub fn buffer_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Sets the number of valid bytes, clamped to the buffer size.
    pub fn set_len(&mut self, len: usize) {
        self.len = len.min(self.data.len());
    }

    pub fn fill_from(&mut self, bytes: &[u8]) {
        let len = bytes.len().min(self.data.len());
        self.data[..len].copy_from_slice(&bytes[..len]);
        self.len = len;
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame").field("len", &self.len).finish()
    }
}

impl Drop for Frame {
    fn drop(&mut self) {
        let data = std::mem::take(&mut self.data);
        // The queue holds every buffer of the pool, so there is always room
        let _ = self.pool.free.push(data);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alloc_and_release() {
        let pool = BufferPool::new(2, 128).unwrap();
        assert_eq!(pool.available(), 2);

        let a = pool.alloc().unwrap();
        let b = pool.alloc().unwrap();
        assert_eq!(pool.available(), 0);
        assert!(pool.alloc().is_none());

        drop(a);
        assert_eq!(pool.available(), 1);
        drop(b);
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_alloc_from_copies_and_truncates() {
        let pool = BufferPool::new(1, 4).unwrap();
        let frame = pool.alloc_from(&[1, 2, 3, 4, 5, 6]).unwrap();
        assert_eq!(frame.bytes(), &[1, 2, 3, 4]);
        assert_eq!(frame.len(), 4);
    }

    #[test]
    fn test_buffers_are_reused() {
        let pool = BufferPool::new(1, 16).unwrap();
        let frame = pool.alloc_from(&[0xaa; 10]).unwrap();
        drop(frame);

        let mut frame = pool.alloc().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.buffer_mut().len(), 16);
        frame.set_len(100);
        assert_eq!(frame.len(), 16);
    }

    #[test]
    fn test_frames_move_between_threads() {
        let pool = BufferPool::new(8, 64).unwrap();
        let frames: Vec<Frame> = (0..8).filter_map(|i| pool.alloc_from(&[i; 64])).collect();
        assert_eq!(pool.available(), 0);

        std::thread::spawn(move || drop(frames)).join().unwrap();
        assert_eq!(pool.available(), 8);
    }

    #[test]
    fn test_invalid_pool() {
        assert_eq!(BufferPool::new(0, 64).err(), Some(PoolError::Empty));
        assert_eq!(BufferPool::new(4, 0).err(), Some(PoolError::ZeroBufferSize));
    }
}
