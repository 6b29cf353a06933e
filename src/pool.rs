use tokio::sync::Mutex;

/// MAX_DATAGRAM is the largest UDP payload we ever relay
pub const MAX_DATAGRAM: usize = 65535;

/// Default number of buffers kept on the free list
const DEFAULT_POOL_CAPACITY: usize = 32;

/// BufferPool supplies reusable byte buffers for packet I/O.
///
/// Each forwarding loop acquires one buffer for its lifetime and must
/// release it on every exit path. Released buffers beyond the pool
/// capacity are simply dropped.
pub struct BufferPool {
    /// Free list of idle buffers
    free: Mutex<Vec<Vec<u8>>>,

    /// Maximum number of buffers retained on the free list
    capacity: usize,
}

impl Default for BufferPool {
    fn default() -> Self {
        Self::new()
    }
}

/// BufferPool implementation block
impl BufferPool {
    /// new is a BufferPool constructor using the default capacity
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_POOL_CAPACITY)
    }

    /// with_capacity builds a pool retaining at most `capacity` idle buffers
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::new()),
            capacity,
        }
    }

    /// acquire pops an idle buffer from the pool or allocates a fresh one
    pub async fn acquire(&self) -> Vec<u8> {
        let mut free = self.free.lock().await;

        free.pop().unwrap_or_else(|| vec![0u8; MAX_DATAGRAM])
    }

    /// release returns a buffer to the pool for reuse
    ///
    /// Buffers that were resized and overflow beyond capacity are discarded.
    pub async fn release(&self, buf: Vec<u8>) {
        // Only full-size buffers are worth keeping
        if buf.len() != MAX_DATAGRAM {
            return;
        }

        let mut free = self.free.lock().await;

        if free.len() < self.capacity {
            free.push(buf);
        }
    }

    /// available returns the number of idle buffers on the free list
    pub async fn available(&self) -> usize {
        self.free.lock().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn acquire_allocates_full_size() {
        let pool = BufferPool::new();
        let buf = pool.acquire().await;
        assert_eq!(buf.len(), MAX_DATAGRAM);
        assert_eq!(pool.available().await, 0);
    }

    #[tokio::test]
    async fn release_recycles_buffers() {
        let pool = BufferPool::new();
        let buf = pool.acquire().await;
        pool.release(buf).await;
        assert_eq!(pool.available().await, 1);

        // The recycled buffer is handed back out
        let _buf = pool.acquire().await;
        assert_eq!(pool.available().await, 0);
    }

    #[tokio::test]
    async fn release_discards_resized_buffers() {
        let pool = BufferPool::new();
        let mut buf = pool.acquire().await;
        buf.truncate(16);
        pool.release(buf).await;
        assert_eq!(pool.available().await, 0);
    }

    #[tokio::test]
    async fn release_respects_capacity() {
        let pool = BufferPool::with_capacity(1);
        pool.release(vec![0u8; MAX_DATAGRAM]).await;
        pool.release(vec![0u8; MAX_DATAGRAM]).await;
        assert_eq!(pool.available().await, 1);
    }
}
