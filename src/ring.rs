//! Byte ring buffer for the broadcast log.
//!
//! One writer appends formatted log lines; any number of readers tail the
//! logical stream from their own cursor. The buffer keeps the most recent
//! `capacity` bytes. A reader that falls further behind than that is moved
//! forward to the oldest retained byte instead of being rejected.
//!
//! Readers copy the requested window while holding the read lock, so a
//! slice is always a consistent snapshot and never a half-written region.
use std::sync::Arc;

use parking_lot::RwLock;

/// Default capacity (1 MiB).
pub const DEFAULT_CAPACITY: usize = 1 << 20;

#[derive(Debug)]
struct RingBuffer {
    inner: RwLock<Inner>,
}

#[derive(Debug)]
struct Inner {
    /// Backing storage, addressed by `offset % capacity`.
    buf: Box<[u8]>,
    /// Total bytes ever written. Logical end of the stream.
    written: u64,
}

/// Create a ring buffer and return its single writer and a cloneable reader.
pub fn channel(capacity: usize) -> (RingWriter, RingReader) {
    let ring = Arc::new(RingBuffer {
        inner: RwLock::new(Inner {
            buf: vec![0; capacity.max(1)].into_boxed_slice(),
            written: 0,
        }),
    });
    (
        RingWriter {
            ring: Arc::clone(&ring),
        },
        RingReader { ring },
    )
}

/// Write half. Not `Clone`: there is exactly one producer.
#[derive(Debug)]
pub struct RingWriter {
    ring: Arc<RingBuffer>,
}

/// Read half. Cheap to clone, one per streaming client.
#[derive(Debug, Clone)]
pub struct RingReader {
    ring: Arc<RingBuffer>,
}

/// A contiguous range of the logical stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Slice {
    /// Logical offset of `bytes[0]`.
    pub start: u64,
    pub bytes: Vec<u8>,
}

impl Slice {
    /// Logical offset one past the last byte.
    pub fn end(&self) -> u64 {
        self.start + self.bytes.len() as u64
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl RingWriter {
    /// Append `bytes` to the stream, overwriting the oldest data on wrap.
    ///
    /// A write longer than the capacity keeps only its last `capacity` bytes,
    /// but the write position still advances by the full length.
    pub fn write(&mut self, bytes: &[u8]) {
        if bytes.is_empty() {
            return;
        }
        let mut inner = self.ring.inner.write();
        let cap = inner.buf.len();
        let skip = bytes.len().saturating_sub(cap);
        let data = &bytes[skip..];
        let pos = ((inner.written + skip as u64) % cap as u64) as usize;
        let first = data.len().min(cap - pos);
        inner.buf[pos..pos + first].copy_from_slice(&data[..first]);
        inner.buf[..data.len() - first].copy_from_slice(&data[first..]);
        inner.written += bytes.len() as u64;
    }
}

impl RingReader {
    /// `(total bytes written, bytes currently retrievable)`.
    pub fn snapshot(&self) -> (u64, usize) {
        let inner = self.ring.inner.read();
        let available = inner.written.min(inner.buf.len() as u64) as usize;
        (inner.written, available)
    }

    /// Everything retained from `offset` to the current end.
    ///
    /// Offsets older than the retention window resynchronize to the oldest
    /// retained byte; offsets past the end yield an empty slice at the end.
    pub fn read_from(&self, offset: u64) -> Slice {
        let inner = self.ring.inner.read();
        let cap = inner.buf.len();
        let oldest = inner.written.saturating_sub(cap as u64);
        let start = offset.clamp(oldest, inner.written);
        let len = (inner.written - start) as usize;
        let pos = (start % cap as u64) as usize;
        let first = len.min(cap - pos);

        let mut bytes = Vec::with_capacity(len);
        bytes.extend_from_slice(&inner.buf[pos..pos + first]);
        bytes.extend_from_slice(&inner.buf[..len - first]);
        Slice { start, bytes }
    }

    pub fn capacity(&self) -> usize {
        self.ring.inner.read().buf.len()
    }
}
