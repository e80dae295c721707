use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};
use std::slice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum CircBufError {
    #[error("ring buffer size must be non-zero")]
    ZeroSize,
    #[error("failed to allocate a {0} byte ring buffer")]
    Alloc(usize),
}

/// Fixed size byte ring shared by one producer and one consumer.
///
/// Data is accessed through blocks: `acquire_write_block` hands out the largest contiguous free
/// span (up to a limit) and the producer commits what it actually filled with
/// `WriteBlock::release`. Reading works the same way over the used span. At most one block per
/// direction can be outstanding, so the producer and consumer may run on different threads
/// without further locking.
pub struct CircBuf {
    buf: Box<[UnsafeCell<u8>]>,
    read_pos: AtomicUsize,
    write_pos: AtomicUsize,
    used: AtomicUsize,
    reading: AtomicBool,
    writing: AtomicBool,
}

// SAFETY: the read and write spans handed out never overlap. `used` is updated with release
// ordering only after a block is finished and loaded with acquire ordering before a span is
// computed, and the `reading`/`writing` flags keep a single block per direction.
unsafe impl Sync for CircBuf {}

impl CircBuf {
    pub fn new(size: usize) -> Result<Self, CircBufError> {
        if size == 0 {
            return Err(CircBufError::ZeroSize);
        }
        let mut bytes = Vec::new();
        bytes.try_reserve_exact(size).map_err(|_| CircBufError::Alloc(size))?;
        bytes.resize_with(size, || UnsafeCell::new(0));
        Ok(CircBuf {
            buf: bytes.into_boxed_slice(),
            read_pos: AtomicUsize::new(0),
            write_pos: AtomicUsize::new(0),
            used: AtomicUsize::new(0),
            reading: AtomicBool::new(false),
            writing: AtomicBool::new(false),
        })
    }

    pub fn size(&self) -> usize {
        self.buf.len()
    }

    pub fn used(&self) -> usize {
        self.used.load(Ordering::Acquire)
    }

    pub fn free(&self) -> usize {
        self.size() - self.used()
    }

    /// Drops all buffered data. Must not race with an outstanding block.
    pub fn reset(&self) {
        if self.reading.load(Ordering::Acquire) || self.writing.load(Ordering::Acquire) {
            warn!("ring buffer reset while a block is outstanding");
            debug_assert!(false, "ring buffer reset while a block is outstanding");
            return;
        }
        self.read_pos.store(0, Ordering::Relaxed);
        self.write_pos.store(0, Ordering::Relaxed);
        self.used.store(0, Ordering::Release);
    }

    fn span(&self, pos: usize, len: usize) -> *mut u8 {
        debug_assert!(pos + len <= self.size());
        // SAFETY: `pos` never exceeds the buffer length.
        UnsafeCell::raw_get(unsafe { self.buf.as_ptr().add(pos) })
    }

    /// Hands out up to `max` contiguous free bytes, or `None` if a write block is already out.
    pub fn acquire_write_block(&self, max: usize) -> Option<WriteBlock<'_>> {
        if self.writing.swap(true, Ordering::Acquire) {
            return None;
        }
        let pos = self.write_pos.load(Ordering::Relaxed);
        let len = max.min(self.free()).min(self.size() - pos);
        // SAFETY: [pos, pos + len) lies in the free region, which the consumer never touches.
        let data = unsafe { slice::from_raw_parts_mut(self.span(pos, len), len) };
        Some(WriteBlock { ring: self, pos, data, committed: 0 })
    }

    /// Hands out up to `max` contiguous used bytes, or `None` if a read block is already out.
    pub fn acquire_read_block(&self, max: usize) -> Option<ReadBlock<'_>> {
        if self.reading.swap(true, Ordering::Acquire) {
            return None;
        }
        let pos = self.read_pos.load(Ordering::Relaxed);
        let len = max.min(self.used()).min(self.size() - pos);
        // SAFETY: [pos, pos + len) lies in the used region, which the producer never touches.
        let data = unsafe { slice::from_raw_parts(self.span(pos, len) as *const u8, len) };
        Some(ReadBlock { ring: self, pos, data, consumed: 0 })
    }

    /// Copies as much of `src` as fits, returning the number of bytes stored.
    pub fn write_from(&self, src: &[u8]) -> usize {
        let mut done = 0;
        while done < src.len() {
            let mut block = match self.acquire_write_block(src.len() - done) {
                Some(block) => block,
                None => break,
            };
            let n = block.len();
            if n == 0 {
                break;
            }
            block.copy_from_slice(&src[done..done + n]);
            block.release(n);
            done += n;
        }
        done
    }

    /// Copies buffered data into `dst`, returning the number of bytes taken.
    pub fn read_into(&self, dst: &mut [u8]) -> usize {
        let mut done = 0;
        while done < dst.len() {
            let block = match self.acquire_read_block(dst.len() - done) {
                Some(block) => block,
                None => break,
            };
            let n = block.len();
            if n == 0 {
                break;
            }
            dst[done..done + n].copy_from_slice(&block);
            block.release(n);
            done += n;
        }
        done
    }
}

/// Free span of a `CircBuf`. Dropping it without `release` commits nothing.
pub struct WriteBlock<'a> {
    ring: &'a CircBuf,
    pos: usize,
    data: &'a mut [u8],
    committed: usize,
}

impl WriteBlock<'_> {
    /// Commits the first `len` bytes of the block.
    pub fn release(mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.committed = len.min(self.data.len());
    }
}

impl Deref for WriteBlock<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        &*self.data
    }
}

impl DerefMut for WriteBlock<'_> {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut *self.data
    }
}

impl Drop for WriteBlock<'_> {
    fn drop(&mut self) {
        let ring = self.ring;
        if self.committed > 0 {
            ring.write_pos.store((self.pos + self.committed) % ring.size(), Ordering::Relaxed);
            ring.used.fetch_add(self.committed, Ordering::Release);
        }
        ring.writing.store(false, Ordering::Release);
    }
}

/// Used span of a `CircBuf`. Dropping it without `release` consumes nothing.
pub struct ReadBlock<'a> {
    ring: &'a CircBuf,
    pos: usize,
    data: &'a [u8],
    consumed: usize,
}

impl ReadBlock<'_> {
    /// Consumes the first `len` bytes of the block.
    pub fn release(mut self, len: usize) {
        debug_assert!(len <= self.data.len());
        self.consumed = len.min(self.data.len());
    }
}

impl Deref for ReadBlock<'_> {
    type Target = [u8];
    fn deref(&self) -> &[u8] {
        self.data
    }
}

impl Drop for ReadBlock<'_> {
    fn drop(&mut self) {
        let ring = self.ring;
        if self.consumed > 0 {
            ring.read_pos.store((self.pos + self.consumed) % ring.size(), Ordering::Relaxed);
            ring.used.fetch_sub(self.consumed, Ordering::Release);
        }
        ring.reading.store(false, Ordering::Release);
    }
}
