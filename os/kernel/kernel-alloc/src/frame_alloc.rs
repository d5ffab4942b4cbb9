//! # Physical frame allocator
//!
//! One bit per 4 KiB frame of installed RAM; a set bit means the frame is in
//! use. Allocation always hands out the lowest free frame.

use crate::bitmap::{Bitmap, BitmapError};
use crate::kmalloc::{HeapError, KernelHeap};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::FrameNumber;
use kernel_vmem::FrameAlloc;
use log::{debug, warn};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FrameAllocError {
    #[error("no free physical frame")]
    OutOfMemory,
    #[error("{0} is not allocated")]
    NotAllocated(FrameNumber),
    #[error("{0} is outside installed memory")]
    OutOfRange(FrameNumber),
    #[error(transparent)]
    Bitmap(#[from] BitmapError),
    #[error("cannot place the frame bitmap: {0}")]
    Heap(#[from] HeapError),
}

/// Frame usage snapshot.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct FrameStats {
    pub total: u32,
    pub used: u32,
    pub free: u32,
}

pub struct BitmapFrameAlloc<'a> {
    bitmap: Bitmap<'a>,
}

impl<'a> BitmapFrameAlloc<'a> {
    /// Frames covered by `total_memory_bytes`, capped at the 4 GiB a 20-bit frame number reaches.
    #[must_use]
    pub const fn frames_for(total_memory_bytes: u64) -> u32 {
        let frames = total_memory_bytes / FRAME_SIZE as u64;
        if frames > FrameNumber::MAX.as_u32() as u64 + 1 {
            FrameNumber::MAX.as_u32() + 1
        } else {
            #[allow(clippy::cast_possible_truncation)]
            {
                frames as u32
            }
        }
    }

    /// Track `total_memory_bytes` of RAM in `storage`, all frames free.
    ///
    /// # Errors
    /// [`FrameAllocError::Bitmap`] if there is not a single whole frame or
    /// `storage` is too short.
    pub fn new(total_memory_bytes: u64, storage: &'a mut [u32]) -> Result<Self, FrameAllocError> {
        let mut bitmap = Bitmap::new(Self::frames_for(total_memory_bytes), storage)?;
        bitmap.clear_all();
        debug!("frame allocator tracks {} frames", bitmap.len());
        Ok(Self { bitmap })
    }

    /// Number of frames tracked.
    #[must_use]
    pub const fn total_frames(&self) -> u32 {
        self.bitmap.len()
    }

    /// Lowest free frame, now marked used.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] when every frame is in use.
    pub fn allocate_frame(&mut self) -> Result<FrameNumber, FrameAllocError> {
        let Some(bit) = self.bitmap.find_first_clear() else {
            warn!("out of physical frames");
            return Err(FrameAllocError::OutOfMemory);
        };
        self.bitmap.set(bit);
        Ok(FrameNumber::new(bit))
    }

    /// Lowest run of `count` physically adjacent free frames, now marked used.
    ///
    /// # Errors
    /// [`FrameAllocError::OutOfMemory`] when no such run exists.
    pub fn allocate_contiguous(&mut self, count: u32) -> Result<FrameNumber, FrameAllocError> {
        let Some(start) = self.bitmap.find_clear_run(count) else {
            warn!("no run of {count} free frames");
            return Err(FrameAllocError::OutOfMemory);
        };
        self.bitmap.set_range(start, count);
        Ok(FrameNumber::new(start))
    }

    /// Return `frame` to the pool.
    ///
    /// # Errors
    /// - [`FrameAllocError::OutOfRange`] for a frame beyond installed memory.
    /// - [`FrameAllocError::NotAllocated`] for a frame that is already free.
    ///
    /// Both leave the bitmap untouched.
    pub fn free_frame(&mut self, frame: FrameNumber) -> Result<(), FrameAllocError> {
        if frame.as_u32() >= self.bitmap.len() {
            warn!("free of {frame} beyond installed memory");
            return Err(FrameAllocError::OutOfRange(frame));
        }
        if !self.bitmap.get(frame.as_u32()) {
            warn!("free of {frame} which is not allocated");
            return Err(FrameAllocError::NotAllocated(frame));
        }
        self.bitmap.clear(frame.as_u32());
        Ok(())
    }

    /// Return `count` frames starting at `start`.
    ///
    /// # Errors
    /// As [`free_frame`](Self::free_frame); checked for the whole run before
    /// anything is freed.
    pub fn free_contiguous(&mut self, start: FrameNumber, count: u32) -> Result<(), FrameAllocError> {
        let end = u64::from(start.as_u32()) + u64::from(count);
        if end > u64::from(self.bitmap.len()) {
            return Err(FrameAllocError::OutOfRange(start));
        }
        if let Some(free) = (start.as_u32()..start.as_u32() + count).find(|&f| !self.bitmap.get(f)) {
            return Err(FrameAllocError::NotAllocated(FrameNumber::new(free)));
        }
        self.bitmap.clear_range(start.as_u32(), count);
        Ok(())
    }

    /// Mark every frame overlapping `[start, start + len)` as used.
    ///
    /// The range is clipped to installed memory. Used at boot for the kernel
    /// image, the bootstrap heap and firmware holes.
    pub fn reserve_range(&mut self, start: u64, len: u64) {
        let frame_size = u64::from(FRAME_SIZE);
        let first = start / frame_size;
        let last = start.saturating_add(len).div_ceil(frame_size);
        let limit = u64::from(self.bitmap.len());
        let (first, last) = (first.min(limit), last.min(limit));
        if first < last {
            #[allow(clippy::cast_possible_truncation)]
            self.bitmap.set_range(first as u32, (last - first) as u32);
            debug!("reserved frames {first:#x}..{last:#x}");
        }
    }

    /// Whether `frame` is currently marked used.
    #[must_use]
    pub fn is_allocated(&self, frame: FrameNumber) -> bool {
        frame.as_u32() < self.bitmap.len() && self.bitmap.get(frame.as_u32())
    }

    #[must_use]
    pub fn stats(&self) -> FrameStats {
        let used = self.bitmap.count_set();
        FrameStats {
            total: self.bitmap.len(),
            used,
            free: self.bitmap.len() - used,
        }
    }
}

impl BitmapFrameAlloc<'static> {
    /// Build the allocator with its bitmap placed in the heap's bootstrap arena.
    ///
    /// # Errors
    /// [`FrameAllocError::Heap`] if the arena cannot hold the bitmap.
    pub fn new_in(total_memory_bytes: u64, heap: &mut KernelHeap) -> Result<Self, FrameAllocError> {
        let words = Bitmap::words_for(Self::frames_for(total_memory_bytes));
        let storage = heap.bootstrap_slice(words.max(1), u32::MAX)?;
        Self::new(total_memory_bytes, storage)
    }
}

impl FrameAlloc for BitmapFrameAlloc<'_> {
    #[inline]
    fn alloc_frame(&mut self) -> Option<FrameNumber> {
        self.allocate_frame().ok()
    }

    #[inline]
    fn free_frame(&mut self, frame: FrameNumber) {
        if let Err(e) = BitmapFrameAlloc::free_frame(self, frame) {
            // Already warned about; a bad free leaves the bitmap unchanged.
            debug!("ignoring rejected free: {e}");
        }
    }
}
