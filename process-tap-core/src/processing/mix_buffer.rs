use parking_lot::Mutex;

use crate::models::audio_models::MixBufferStats;

struct MixState {
    buffer: Vec<u8>,
    write_offset: usize,
    read_offset: usize,
    stats: MixBufferStats,
}

/// Shared byte buffer between every capture worker and the render worker.
///
/// Writers append at the write offset; the single reader drains from the read
/// offset. Both offsets rewind to 0 together once the reader catches up, so
/// capacity is reclaimed only when the buffer fully drains.
///
/// Overflow behavior: a write that does not fit is dropped whole. Writers
/// never block on the reader and the buffer never grows.
pub struct MixBuffer {
    state: Mutex<MixState>,
    capacity: usize,
}

impl MixBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            state: Mutex::new(MixState {
                buffer: vec![0; capacity],
                write_offset: 0,
                read_offset: 0,
                stats: MixBufferStats {
                    capacity,
                    ..Default::default()
                },
            }),
            capacity,
        }
    }

    /// Append `bytes`, or drop them if they would reach the end of the buffer.
    ///
    /// Returns whether the bytes were stored.
    pub fn write(&self, bytes: &[u8]) -> bool {
        let mut s = self.state.lock();
        let end = s.write_offset + bytes.len();
        if end >= self.capacity {
            s.stats.dropped_writes += 1;
            s.stats.dropped_bytes += bytes.len() as u64;
            return false;
        }

        let start = s.write_offset;
        s.buffer[start..end].copy_from_slice(bytes);
        s.write_offset = end;
        s.stats.bytes_written += bytes.len() as u64;
        true
    }

    /// Copy up to `dest.len()` unread bytes into `dest` and consume them.
    ///
    /// Returns the number of bytes copied, which may be 0.
    pub fn read_up_to(&self, dest: &mut [u8]) -> usize {
        let mut s = self.state.lock();
        let available = s.write_offset - s.read_offset;
        let to_copy = dest.len().min(available);
        if to_copy == 0 {
            return 0;
        }

        let start = s.read_offset;
        dest[..to_copy].copy_from_slice(&s.buffer[start..start + to_copy]);
        s.read_offset += to_copy;
        s.stats.bytes_read += to_copy as u64;

        // Fully drained: reclaim the whole capacity
        if s.read_offset == s.write_offset {
            s.read_offset = 0;
            s.write_offset = 0;
        }
        to_copy
    }

    /// Bytes written but not yet read.
    pub fn available(&self) -> usize {
        let s = self.state.lock();
        s.write_offset - s.read_offset
    }

    /// Current `(write_offset, read_offset)`.
    pub fn offsets(&self) -> (usize, usize) {
        let s = self.state.lock();
        (s.write_offset, s.read_offset)
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> MixBufferStats {
        let s = self.state.lock();
        MixBufferStats {
            buffered: s.write_offset - s.read_offset,
            ..s.stats
        }
    }

    /// Discard all unread bytes.
    pub fn reset(&self) {
        let mut s = self.state.lock();
        s.write_offset = 0;
        s.read_offset = 0;
    }
}
