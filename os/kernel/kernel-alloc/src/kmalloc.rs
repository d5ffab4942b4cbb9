//! # Kernel heap
//!
//! One contiguous virtual region, used in two phases:
//!
//! ```text
//!  base                                               base + reserved_len
//!   ├── bootstrap arena ──┬── sections ──────────────────┬─ ─ ─ ─ ─ ┤
//!   │ bump, never freed   │ [hdr|payload][hdr|payload].. │ unbacked  │
//!   └─ physically contiguous ┘                      top ┘
//! ```
//!
//! * **Bootstrap** (before paging): a bump allocator over the first
//!   `bootstrap_len` bytes. The arena is physically contiguous from
//!   `phys_base`, so page-aligned allocations know their physical address.
//!   Nothing allocated here is ever freed.
//! * **Free list** (after [`KernelHeap::enable_free_list`]): every allocation
//!   is a *section* carrying a header with a canary, its payload size, a free
//!   flag and the size of the section before it. Sections tile
//!   `[sections_start, top)` without gaps. Allocation is first-fit with
//!   splitting; freeing coalesces with free neighbours, and a free section at
//!   the end gives its space back to `top`. Space past the bootstrap arena is
//!   backed on demand through [`HeapGrowth`].

use core::ptr::{self, NonNull};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{PhysicalAddress, align_up_usize};
use log::{info, warn};

const PAGE: usize = FRAME_SIZE as usize;

/// Alignment of every payload.
pub const HEAP_ALIGN: usize = 16;

/// Smallest payload worth splitting off as a separate section.
const MIN_PAYLOAD: usize = 16;

const CANARY: u32 = 0xCAFE_C0DE;

#[derive(Debug, Copy, Clone)]
#[repr(C, align(16))]
struct SectionHeader {
    canary: u32,
    free: bool,
    size: usize,
    prev_size: usize,
}

const HEADER: usize = size_of::<SectionHeader>();

const _: () = assert!(HEADER.is_multiple_of(HEAP_ALIGN));

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum HeapError {
    #[error("kernel heap exhausted")]
    OutOfMemory,
    #[error("zero-sized allocation")]
    ZeroSize,
    #[error("bootstrap allocations are never freed")]
    BootstrapFree,
    #[error("{0:#x} was not handed out by the kernel heap")]
    ForeignPointer(usize),
    #[error("{0:#x} is already free")]
    DoubleFree(usize),
    #[error("the bootstrap arena is closed")]
    BootstrapClosed,
    #[error("heap offset {0:#x} has no physical backing")]
    Unbacked(usize),
}

/// Backs heap space beyond the bootstrap arena with memory.
pub trait HeapGrowth {
    /// Make `[offset, offset + len)` of the heap usable. Both are page multiples.
    ///
    /// # Errors
    /// [`HeapError::OutOfMemory`] if the space cannot be backed. Nothing of
    /// the range may stay half-backed.
    fn grow(&mut self, offset: usize, len: usize) -> Result<(), HeapError>;

    /// Physical address behind heap byte `offset`.
    fn translate(&self, offset: usize) -> Option<PhysicalAddress>;
}

impl<G: HeapGrowth + ?Sized> HeapGrowth for &mut G {
    #[inline]
    fn grow(&mut self, offset: usize, len: usize) -> Result<(), HeapError> {
        (**self).grow(offset, len)
    }

    #[inline]
    fn translate(&self, offset: usize) -> Option<PhysicalAddress> {
        (**self).translate(offset)
    }
}

/// A heap confined to its bootstrap arena.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoGrowth;

impl HeapGrowth for NoGrowth {
    fn grow(&mut self, _offset: usize, _len: usize) -> Result<(), HeapError> {
        Err(HeapError::OutOfMemory)
    }

    fn translate(&self, _offset: usize) -> Option<PhysicalAddress> {
        None
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum HeapMode {
    Bootstrap,
    FreeList,
}

/// Heap usage snapshot. Sizes are in bytes; `used` and `free` count payloads only.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Default)]
pub struct HeapStats {
    pub reserved: usize,
    pub backed: usize,
    pub bootstrap: usize,
    pub used: usize,
    pub free: usize,
    pub sections: usize,
}

pub struct KernelHeap {
    base: usize,
    phys_base: u32,
    bootstrap_len: usize,
    reserved_len: usize,
    /// Offset of the first byte past the last allocation.
    top: usize,
    /// Bytes from `base` that are backed by memory.
    backed: usize,
    sections_start: usize,
    last: Option<usize>,
    mode: HeapMode,
}

impl KernelHeap {
    /// Take over `[base, base + reserved_len)` as the kernel heap.
    ///
    /// # Safety
    /// - `base` is page aligned and the whole range is reserved for the heap.
    /// - `[base, base + bootstrap_len)` is mapped, writable and physically
    ///   contiguous from `phys_base`.
    /// - `bootstrap_len` and `reserved_len` are page multiples with
    ///   `bootstrap_len <= reserved_len`.
    #[must_use]
    pub const unsafe fn bootstrap(
        base: usize,
        bootstrap_len: usize,
        reserved_len: usize,
        phys_base: u32,
    ) -> Self {
        debug_assert!(base.is_multiple_of(PAGE));
        debug_assert!(bootstrap_len <= reserved_len);
        Self {
            base,
            phys_base,
            bootstrap_len,
            reserved_len,
            top: 0,
            backed: bootstrap_len,
            sections_start: 0,
            last: None,
            mode: HeapMode::Bootstrap,
        }
    }

    #[must_use]
    pub const fn mode(&self) -> HeapMode {
        self.mode
    }

    /// Whether `addr` lies inside memory the heap has handed out so far.
    #[must_use]
    pub const fn contains(&self, addr: usize) -> bool {
        addr >= self.base && addr < self.base + self.top
    }

    fn bump(&mut self, size: usize, align: usize) -> Result<usize, HeapError> {
        if self.mode != HeapMode::Bootstrap {
            return Err(HeapError::BootstrapClosed);
        }
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let off = align_up_usize(self.top, align);
        let end = off.checked_add(size).ok_or(HeapError::OutOfMemory)?;
        if end > self.bootstrap_len {
            warn!("bootstrap heap exhausted: {size} bytes requested, {} left", self.bootstrap_len - self.top);
            return Err(HeapError::OutOfMemory);
        }
        self.top = end;
        Ok(off)
    }

    /// Carve `len` initialized elements out of the bootstrap arena for good.
    ///
    /// # Errors
    /// [`HeapError::BootstrapClosed`] once the free list is enabled,
    /// [`HeapError::OutOfMemory`] if the arena is too small.
    pub fn bootstrap_slice<T: Copy>(
        &mut self,
        len: usize,
        init: T,
    ) -> Result<&'static mut [T], HeapError> {
        let bytes = len.checked_mul(size_of::<T>()).ok_or(HeapError::OutOfMemory)?;
        let off = self.bump(bytes, align_of::<T>().max(HEAP_ALIGN))?;
        let ptr = (self.base + off) as *mut T;
        // SAFETY: the range was just reserved, is mapped and never handed out again.
        unsafe {
            for i in 0..len {
                ptr.add(i).write(init);
            }
            Ok(core::slice::from_raw_parts_mut(ptr, len))
        }
    }

    /// Switch from the bump arena to the section allocator. Idempotent.
    ///
    /// The bootstrap allocations stay where they are; sections start right after them.
    pub fn enable_free_list(&mut self) {
        if self.mode == HeapMode::FreeList {
            return;
        }
        self.sections_start = align_up_usize(self.top, HEAP_ALIGN);
        self.top = self.sections_start;
        self.mode = HeapMode::FreeList;
        info!("kernel heap: free list enabled, {} bootstrap bytes kept", self.sections_start);
    }

    /// Allocate `size` bytes, 16-byte aligned.
    ///
    /// # Errors
    /// [`HeapError::ZeroSize`] or [`HeapError::OutOfMemory`].
    pub fn alloc<G: HeapGrowth + ?Sized>(
        &mut self,
        size: usize,
        grow: &mut G,
    ) -> Result<NonNull<u8>, HeapError> {
        let off = match self.mode {
            HeapMode::Bootstrap => self.bump(size, HEAP_ALIGN)?,
            HeapMode::FreeList => self.alloc_section(size, None, grow)?,
        };
        Ok(self.ptr_at(off))
    }

    /// Allocate `size` bytes on a page boundary and report the physical
    /// address of the first byte.
    ///
    /// Only the first page is guaranteed to be physically contiguous past the
    /// bootstrap arena.
    ///
    /// # Errors
    /// As [`alloc`](Self::alloc), plus [`HeapError::Unbacked`] if the
    /// growth provider cannot translate the page.
    pub fn alloc_aligned<G: HeapGrowth + ?Sized>(
        &mut self,
        size: usize,
        grow: &mut G,
    ) -> Result<(NonNull<u8>, PhysicalAddress), HeapError> {
        let off = match self.mode {
            HeapMode::Bootstrap => self.bump(size, PAGE)?,
            HeapMode::FreeList => self.alloc_section(size, Some(PAGE), grow)?,
        };
        let phys = if off < self.bootstrap_len {
            let off32 = u32::try_from(off).map_err(|_| HeapError::Unbacked(off))?;
            PhysicalAddress::new(self.phys_base + off32)
        } else {
            grow.translate(off).ok_or(HeapError::Unbacked(off))?
        };
        Ok((self.ptr_at(off), phys))
    }

    /// Give an allocation back.
    ///
    /// # Errors
    /// - [`HeapError::BootstrapFree`] for bootstrap allocations.
    /// - [`HeapError::ForeignPointer`] for anything that is not the start of a live section.
    /// - [`HeapError::DoubleFree`] for a section that is already free.
    ///
    /// # Panics
    /// If a section header on the way has been overwritten.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), HeapError> {
        let addr = ptr.as_ptr() as usize;
        if !self.contains(addr) {
            return Err(HeapError::ForeignPointer(addr));
        }
        let payload = addr - self.base;
        if self.mode == HeapMode::Bootstrap || payload < self.sections_start {
            warn!("kfree of bootstrap allocation {addr:#x}");
            return Err(HeapError::BootstrapFree);
        }

        let mut off = self.sections_start;
        let mut h = loop {
            if off >= self.top || off + HEADER > payload {
                warn!("kfree of {addr:#x} which is not a heap allocation");
                return Err(HeapError::ForeignPointer(addr));
            }
            let h = self.section(off);
            if off + HEADER == payload {
                break h;
            }
            off = Self::next_of(off, &h);
        };
        if h.free {
            warn!("double kfree of {addr:#x}");
            return Err(HeapError::DoubleFree(addr));
        }
        h.free = true;

        let next = Self::next_of(off, &h);
        if next < self.top {
            let n = self.section(next);
            if n.free {
                h.size += HEADER + n.size;
                self.retire(next);
            }
        }
        if off != self.sections_start {
            let prev = off - HEADER - h.prev_size;
            let mut p = self.section(prev);
            if p.free {
                p.size += HEADER + h.size;
                self.retire(off);
                off = prev;
                h = p;
            }
        }
        self.store(off, h);
        self.link_next(off, &h);

        if Self::next_of(off, &h) == self.top {
            self.top = off;
            self.last = (off != self.sections_start).then(|| off - HEADER - h.prev_size);
            self.retire(off);
        }
        Ok(())
    }

    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut stats = HeapStats {
            reserved: self.reserved_len,
            backed: self.backed,
            bootstrap: match self.mode {
                HeapMode::Bootstrap => self.top,
                HeapMode::FreeList => self.sections_start,
            },
            ..HeapStats::default()
        };
        if self.mode == HeapMode::FreeList {
            let mut off = self.sections_start;
            while off < self.top {
                let h = self.section(off);
                if h.free {
                    stats.free += h.size;
                } else {
                    stats.used += h.size;
                }
                stats.sections += 1;
                off = Self::next_of(off, &h);
            }
        }
        stats
    }

    fn alloc_section<G: HeapGrowth + ?Sized>(
        &mut self,
        size: usize,
        align: Option<usize>,
        grow: &mut G,
    ) -> Result<usize, HeapError> {
        if size == 0 {
            return Err(HeapError::ZeroSize);
        }
        let need = size
            .checked_add(HEAP_ALIGN - 1)
            .ok_or(HeapError::OutOfMemory)?
            & !(HEAP_ALIGN - 1);

        let mut off = self.sections_start;
        while off < self.top {
            let h = self.section(off);
            if h.free {
                if let Some(at) = self.fit(off, &h, need, align) {
                    return Ok(self.take(at, need));
                }
            }
            off = Self::next_of(off, &h);
        }
        self.carve(need, align, grow)
    }

    /// First payload offset at or after `payload` that satisfies `align` and
    /// leaves room for a padding section in front.
    fn aligned_payload(&self, payload: usize, align: usize) -> usize {
        let mut p = align_up_usize(self.base + payload, align) - self.base;
        if p != payload && p - payload < HEADER + MIN_PAYLOAD {
            p += align;
        }
        p
    }

    /// Header offset of the section to hand out from free section `off`, if it fits.
    fn fit(&mut self, off: usize, h: &SectionHeader, need: usize, align: Option<usize>) -> Option<usize> {
        let payload = off + HEADER;
        let Some(align) = align else {
            return (h.size >= need).then_some(off);
        };
        let p = self.aligned_payload(payload, align);
        if p + need > payload + h.size {
            return None;
        }
        if p == payload {
            return Some(off);
        }
        // Leave the front of the section behind as free padding.
        Some(self.split(off, p - payload - HEADER))
    }

    /// Shrink section `off` to `size` and turn the rest into a new free section.
    fn split(&mut self, off: usize, size: usize) -> usize {
        let mut h = self.section(off);
        debug_assert!(h.size >= size + HEADER + MIN_PAYLOAD);
        let rest = off + HEADER + size;
        let r = SectionHeader {
            canary: CANARY,
            free: true,
            size: h.size - size - HEADER,
            prev_size: size,
        };
        h.size = size;
        self.store(off, h);
        self.store(rest, r);
        self.link_next(rest, &r);
        if self.last == Some(off) {
            self.last = Some(rest);
        }
        rest
    }

    fn take(&mut self, off: usize, need: usize) -> usize {
        let h = self.section(off);
        if h.size >= need + HEADER + MIN_PAYLOAD {
            self.split(off, need);
        }
        let mut h = self.section(off);
        h.free = false;
        self.store(off, h);
        off + HEADER
    }

    /// Append a section at `top`, growing the backed region if needed.
    fn carve<G: HeapGrowth + ?Sized>(
        &mut self,
        need: usize,
        align: Option<usize>,
        grow: &mut G,
    ) -> Result<usize, HeapError> {
        let mut start = self.top;
        let mut padding = None;
        if let Some(align) = align {
            let p = self.aligned_payload(start + HEADER, align);
            if p != start + HEADER {
                padding = Some((start, p - start - 2 * HEADER));
                start = p - HEADER;
            }
        }
        let end = start
            .checked_add(HEADER + need)
            .ok_or(HeapError::OutOfMemory)?;
        self.ensure_backed(end, grow)?;

        if let Some((off, size)) = padding {
            self.push(off, size, true);
        }
        self.push(start, need, false);
        Ok(start + HEADER)
    }

    fn ensure_backed<G: HeapGrowth + ?Sized>(&mut self, end: usize, grow: &mut G) -> Result<(), HeapError> {
        if end > self.reserved_len {
            warn!("kernel heap exhausted: {end:#x} bytes needed, {:#x} reserved", self.reserved_len);
            return Err(HeapError::OutOfMemory);
        }
        if end > self.backed {
            let target = align_up_usize(end, PAGE).min(self.reserved_len);
            grow.grow(self.backed, target - self.backed)?;
            self.backed = target;
        }
        Ok(())
    }

    fn push(&mut self, off: usize, size: usize, free: bool) {
        let prev_size = self.last.map_or(0, |l| self.section(l).size);
        self.store(
            off,
            SectionHeader {
                canary: CANARY,
                free,
                size,
                prev_size,
            },
        );
        self.last = Some(off);
        self.top = off + HEADER + size;
    }

    /// Tell the section after `off` how large `off` now is.
    fn link_next(&self, off: usize, h: &SectionHeader) {
        let next = Self::next_of(off, h);
        if next < self.top {
            let mut n = self.section(next);
            n.prev_size = h.size;
            self.store(next, n);
        }
    }

    const fn next_of(off: usize, h: &SectionHeader) -> usize {
        off + HEADER + h.size
    }

    fn ptr_at(&self, off: usize) -> NonNull<u8> {
        // SAFETY: base is non-null and the heap never wraps.
        unsafe { NonNull::new_unchecked((self.base + off) as *mut u8) }
    }

    fn section(&self, off: usize) -> SectionHeader {
        // SAFETY: `off` is a section start inside the backed region.
        let h = unsafe { ptr::read((self.base + off) as *const SectionHeader) };
        assert!(
            h.canary == CANARY,
            "kernel heap: corrupted section header at {:#x}",
            self.base + off
        );
        h
    }

    fn store(&self, off: usize, h: SectionHeader) {
        // SAFETY: `off` is a section start inside the backed region.
        unsafe { ptr::write((self.base + off) as *mut SectionHeader, h) }
    }

    /// Wipe the canary of a header that is no longer a section start.
    fn retire(&self, off: usize) {
        // SAFETY: as `store`.
        unsafe { ptr::write((self.base + off) as *mut u32, 0) }
    }
}
