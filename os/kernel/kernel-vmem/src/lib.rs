//! # Virtual Memory Support
//!
//! i386 two-level paging for the kernel and its tasks.
//!
//! ## What you get
//! - [`PageEntryBits`]: the shared PDE/PTE bit layout.
//! - [`PageTable`]: a 4 KiB-aligned frame of 1024 entries, used for both levels.
//! - [`AddressSpace`]: one page directory with its page tables. Creates,
//!   maps, unmaps, translates and finally destroys task address spaces
//!   while keeping the kernel range shared.
//! - [`fault`]: the demand-paging decision for `#PF`.
//! - The seams to the rest of the kernel: [`FrameAlloc`] (physical frames),
//!   [`PhysMapper`] (reaching a frame's bytes) and [`DirectoryRegister`]
//!   (loading CR3).
//!
//! ## i386 Virtual Address → Physical Address Walk
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//!
//!  CR3 ──► Page Directory ──► Page Table ──► 4 KiB frame
//!          (1024 PDEs)        (1024 PTEs)
//! ```
//!
//! ## Kernel range
//!
//! `[KERNEL_SPACE_START, KERNEL_SPACE_END)` is mapped identically in every
//! directory. The kernel directory pre-allocates all page tables for that
//! range once; every task directory copies the *directory entries*, so the
//! tables themselves are shared and a kernel mapping added later is visible
//! everywhere without touching any task directory.

#![cfg_attr(not(any(test, doctest, feature = "testing")), no_std)]
#![allow(unsafe_code, clippy::inline_always)]

pub mod address_space;
pub mod fault;
mod page_entry_bits;
mod page_table;

pub use crate::address_space::{AddressSpace, MapFlags, Released};
pub use crate::fault::{FatalFault, FaultOutcome, GrowthRegion, PageFaultError, resolve_fault};
pub use crate::page_entry_bits::PageEntryBits;
pub use crate::page_table::PageTable;

/// Re-export constants as info module.
pub use kernel_info::memory as info;

use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Errors from building or editing an address space.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum VmemError {
    #[error("out of physical frames for paging structures")]
    OutOfMemory,
    #[error("address {0:#010x} is not page aligned")]
    Unaligned(u32),
    #[error("no mapping at {0}")]
    NotMapped(VirtualAddress),
    #[error("{0} lies in the shared kernel range")]
    KernelRange(VirtualAddress),
}

/// Source of physical 4 KiB frames for pages and paging structures.
///
/// Returns `None` on out-of-memory.
pub trait FrameAlloc {
    fn alloc_frame(&mut self) -> Option<FrameNumber>;

    /// Give a frame back. Freeing a frame that is not allocated is a caller bug
    /// the implementation reports but tolerates.
    fn free_frame(&mut self, frame: FrameNumber);
}

impl<A: FrameAlloc + ?Sized> FrameAlloc for &mut A {
    #[inline]
    fn alloc_frame(&mut self) -> Option<FrameNumber> {
        (**self).alloc_frame()
    }

    #[inline]
    fn free_frame(&mut self, frame: FrameNumber) {
        (**self).free_frame(frame);
    }
}

/// Converts physical addresses to usable pointers in the current virtual
/// address space.
///
/// Frames handed out by the frame allocator may lie anywhere in RAM, so the
/// mapper is supplied by the platform layer that knows how physical memory is
/// reached. Tests back "physical memory" with an ordinary buffer.
pub trait PhysMapper {
    /// # Safety
    /// - `pa` must be reachable and writable through the current mappings.
    /// - The mapping must stay valid for `'a`.
    /// - `T` must match the bytes at `pa` and must not alias another live reference.
    unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T;
}

/// Control over the CPU's page-table base register.
pub trait DirectoryRegister {
    /// Install the directory at `root`. Takes effect for every following access.
    ///
    /// # Safety
    /// The directory must map the kernel range identically to the running one,
    /// and the caller must hold off anything that could switch again midway
    /// (interrupts masked).
    unsafe fn load_directory(&self, root: PhysicalAddress);

    /// Drop a stale TLB entry for `va` after editing the live directory.
    fn flush_page(&self, va: VirtualAddress);

    /// Turn paging on.
    ///
    /// # Safety
    /// A directory that maps the currently executing code must be loaded.
    unsafe fn enable_paging(&self);
}

/// The executing CPU's CR3/CR0.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Clone, Copy)]
pub struct Cr3Register;

#[cfg(target_arch = "x86")]
impl DirectoryRegister for Cr3Register {
    unsafe fn load_directory(&self, root: PhysicalAddress) {
        use kernel_registers::StoreRegisterUnsafe;
        let cr3 = kernel_registers::cr3::Cr3::from_directory_phys(root.as_u32());
        unsafe { cr3.store_unsafe() }
    }

    fn flush_page(&self, va: VirtualAddress) {
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) va.as_u32(), options(nostack, preserves_flags));
        }
    }

    unsafe fn enable_paging(&self) {
        use kernel_registers::{LoadRegisterUnsafe, StoreRegisterUnsafe};
        unsafe {
            let cr0 = kernel_registers::cr0::Cr0::load_unsafe();
            cr0.with_paging_enabled().store_unsafe();
        }
    }
}

/// Fill a frame with zeroes.
///
/// # Safety
/// `frame` must be owned by the caller and reachable through `mapper`.
#[inline]
pub unsafe fn zero_frame<M: PhysMapper>(mapper: &M, frame: FrameNumber) {
    let bytes = unsafe { mapper.phys_to_mut::<[u8; FRAME_SIZE as usize]>(frame.base()) };
    bytes.fill(0);
}

/// Copy the contents of `src` into `dst`.
///
/// # Safety
/// Both frames must be reachable through `mapper`, and they must differ.
#[inline]
pub unsafe fn copy_frame<M: PhysMapper>(mapper: &M, src: FrameNumber, dst: FrameNumber) {
    debug_assert_ne!(src, dst);
    let from = unsafe { mapper.phys_to_mut::<[u8; FRAME_SIZE as usize]>(src.base()) };
    let to = unsafe { mapper.phys_to_mut::<[u8; FRAME_SIZE as usize]>(dst.base()) };
    to.copy_from_slice(from);
}

/// Simulated physical memory and frame sources for host tests.
#[cfg(any(test, feature = "testing"))]
pub mod testing {
    use super::*;

    /// A 4 KiB-aligned raw frame. We use this as our "physical RAM" backing store in tests.
    #[repr(align(4096))]
    pub struct Aligned4K(#[allow(dead_code)] [u8; 4096]);

    /// Simulated physical memory: frame `n` is the `n`-th buffer entry.
    pub struct TestPhys {
        frames: Vec<Aligned4K>,
    }

    impl TestPhys {
        pub fn with_frames(n: usize) -> Self {
            let mut v = Vec::with_capacity(n);
            for _ in 0..n {
                v.push(Aligned4K([0u8; 4096]));
            }
            Self { frames: v }
        }
    }

    impl PhysMapper for TestPhys {
        unsafe fn phys_to_mut<'a, T>(&self, pa: PhysicalAddress) -> &'a mut T {
            let idx = pa.frame().as_usize();
            let off = pa.page_offset() as usize;
            let base = (&raw const self.frames[idx]).cast::<u8>().cast_mut();
            // SAFETY: The caller promises `T` matches the bytes in the frame.
            unsafe { &mut *base.add(off).cast::<T>() }
        }
    }

    /// Hands out frames `next..end` in order and remembers what came back.
    pub struct BumpAlloc {
        pub next: u32,
        pub end: u32,
        pub freed: Vec<FrameNumber>,
    }

    impl BumpAlloc {
        pub fn new(start: u32, end: u32) -> Self {
            Self {
                next: start,
                end,
                freed: Vec::new(),
            }
        }

        pub fn outstanding(&self, start: u32) -> usize {
            (self.next - start) as usize - self.freed.len()
        }
    }

    impl FrameAlloc for BumpAlloc {
        fn alloc_frame(&mut self) -> Option<FrameNumber> {
            if self.next >= self.end {
                return None;
            }
            let f = FrameNumber::new(self.next);
            self.next += 1;
            Some(f)
        }

        fn free_frame(&mut self, frame: FrameNumber) {
            assert!(!self.freed.contains(&frame), "double free of {frame}");
            self.freed.push(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn zero_and_copy_frame() {
        let phys = TestPhys::with_frames(4);
        let (a, b) = (FrameNumber::new(1), FrameNumber::new(2));
        unsafe {
            phys.phys_to_mut::<[u8; 4096]>(a.base()).fill(0xAB);
            copy_frame(&phys, a, b);
            assert!(phys.phys_to_mut::<[u8; 4096]>(b.base()).iter().all(|&x| x == 0xAB));
            zero_frame(&phys, a);
            assert!(phys.phys_to_mut::<[u8; 4096]>(a.base()).iter().all(|&x| x == 0));
        }
    }
}
