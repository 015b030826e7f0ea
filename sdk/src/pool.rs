use {
    parking_lot::Mutex,
    std::{
        mem,
        ops::{Deref, DerefMut},
        sync::Arc,
    },
    zeroize::Zeroize,
};

/// Reusable chunk buffers shared by all streaming operations.
///
/// Buffers are wiped before they go back to the pool because they hold plaintext.
#[derive(Debug)]
pub struct BufferPool {
    idle: Mutex<Vec<Vec<u8>>>,
    capacity: usize,
    max_idle: usize,
}

impl BufferPool {
    /// `capacity` is the initial capacity of new buffers; at most `max_idle` buffers are kept
    /// around between operations.
    #[must_use]
    #[inline]
    pub fn new(capacity: usize, max_idle: usize) -> Self {
        Self {
            idle: Mutex::new(Vec::new()),
            capacity,
            max_idle,
        }
    }

    #[must_use]
    #[inline]
    pub fn get(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .idle
            .lock()
            .pop()
            .unwrap_or_else(|| Vec::with_capacity(self.capacity));
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    #[must_use]
    #[inline]
    pub fn idle_count(&self) -> usize {
        self.idle.lock().len()
    }

    fn put(&self, mut buf: Vec<u8>) {
        buf.zeroize();
        let mut idle = self.idle.lock();
        if idle.len() < self.max_idle {
            idle.push(buf);
        }
    }
}

/// A buffer borrowed from [`BufferPool`]. Goes back to the pool on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: Vec<u8>,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = Vec<u8>;

    #[inline]
    fn deref(&self) -> &Self::Target {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    #[inline]
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    #[inline]
    fn drop(&mut self) {
        self.pool.put(mem::take(&mut self.buf));
    }
}

#[cfg(test)]
#[expect(clippy::default_numeric_fallback, reason = "test")]
mod tests {
    use super::*;

    #[test]
    fn buffers_are_reused_and_wiped() {
        let pool = Arc::new(BufferPool::new(64, 2));
        let mut a = pool.get();
        a.extend_from_slice(b"secret");
        let ptr = a.as_ptr();
        drop(a);
        assert_eq!(pool.idle_count(), 1);
        let b = pool.get();
        assert_eq!(b.as_ptr(), ptr);
        assert!(b.is_empty());
        assert!(b.capacity() >= 64);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_limit() {
        let pool = Arc::new(BufferPool::new(8, 2));
        let buffers: Vec<_> = (0..5).map(|_| pool.get()).collect();
        drop(buffers);
        assert_eq!(pool.idle_count(), 2);
    }
}
