//! Commit buffer pooling.

use parking_lot::Mutex;

use super::Buffer;

/// Retained buffers per pool; excess releases are dropped.
const MAX_POOLED: usize = 64;

/// Buffers whose backing allocation exceeds this are not retained.
const MAX_RETAINED_CAPACITY: usize = 1 << 20;

/// A global free-list of commit buffers.
///
/// Transactions acquire one buffer per touched column and return them on
/// commit, rollback, or drop; the drop path is what keeps a panicking user
/// callback from leaking buffers.
#[derive(Default)]
pub(crate) struct BufferPool {
    free: Mutex<Vec<Buffer>>,
}

impl BufferPool {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Takes a buffer from the free list, reset for `column`.
    pub(crate) fn acquire(&self, column: &str) -> Buffer {
        match self.free.lock().pop() {
            Some(mut buf) => {
                buf.reset(column);
                buf
            }
            None => Buffer::new(column),
        }
    }

    /// Returns a buffer to the free list.
    pub(crate) fn release(&self, buf: Buffer) {
        if buf.capacity() > MAX_RETAINED_CAPACITY {
            return;
        }
        let mut free = self.free.lock();
        if free.len() < MAX_POOLED {
            free.push(buf);
        }
    }
}
