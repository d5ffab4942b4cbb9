//! # Address Space (i386, directory-rooted)
//!
//! Strongly-typed helpers to build and manipulate a **single** virtual
//! address space: one page directory plus the page tables it links.
//!
//! ## Highlights
//!
//! - [`AddressSpace::new_kernel`] builds the kernel directory and
//!   pre-allocates every page table of the shared kernel range.
//! - [`AddressSpace::new_directory`] builds a task directory that links the
//!   kernel's tables instead of copying them.
//! - [`AddressSpace::map_page`] / [`AddressSpace::unmap_page`] install and
//!   clear one 4 KiB translation. Neither frees the mapped frame.
//! - [`AddressSpace::translate`] walks a VA to its PA.
//! - [`AddressSpace::destroy`] releases user pages and paging structures and
//!   never touches the kernel range.
//!
//! ## Safety
//!
//! - Mutating active mappings requires TLB maintenance (`invlpg` per page or
//!   a CR3 reload); see [`DirectoryRegister`].
//! - The provided [`PhysMapper`] must yield **writable** references to table frames.

use crate::info::{KERNEL_SPACE_END, KERNEL_SPACE_START};
use crate::{DirectoryRegister, FrameAlloc, PageEntryBits, PageTable, PhysMapper, VmemError};
use core::ops::Range;
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};

/// Handle to a single, concrete address space.
pub struct AddressSpace<'m, M: PhysMapper> {
    root: FrameNumber,
    mapper: &'m M,
}

/// Permissions of a leaf mapping.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct MapFlags {
    pub writable: bool,
    pub user: bool,
}

impl MapFlags {
    pub const KERNEL_RW: Self = Self {
        writable: true,
        user: false,
    };

    pub const USER_RW: Self = Self {
        writable: true,
        user: true,
    };

    pub const USER_RO: Self = Self {
        writable: false,
        user: true,
    };
}

/// What [`AddressSpace::destroy`] gave back to the frame allocator.
#[derive(Debug, Default, Copy, Clone, Eq, PartialEq)]
pub struct Released {
    /// Mapped user pages.
    pub pages: usize,
    /// The directory plus every user page table.
    pub structures: usize,
}

/// Directory slots covering the shared kernel range.
#[inline]
#[must_use]
pub const fn kernel_directory_slots() -> Range<usize> {
    VirtualAddress::new(KERNEL_SPACE_START).directory_index()
        ..VirtualAddress::new(KERNEL_SPACE_END).directory_index()
}

/// Whether `va` lies in the shared kernel range.
#[inline]
#[must_use]
pub const fn is_kernel_address(va: VirtualAddress) -> bool {
    va.as_u32() >= KERNEL_SPACE_START && va.as_u32() < KERNEL_SPACE_END
}

/// Whether `va` lies below the kernel range, i.e. belongs to a task.
#[inline]
#[must_use]
pub const fn is_user_address(va: VirtualAddress) -> bool {
    va.as_u32() < KERNEL_SPACE_START
}

impl<'m, M: PhysMapper> AddressSpace<'m, M> {
    /// Build the kernel directory with every kernel-range page table in place.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if the frames run out; nothing stays allocated.
    pub fn new_kernel<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, VmemError> {
        let space = Self::empty(mapper, alloc)?;
        let dir = space.directory_mut();
        for slot in kernel_directory_slots() {
            let Some(table) = alloc.alloc_frame() else {
                // Roll back the tables linked so far, then the directory.
                for linked in kernel_directory_slots().take_while(|s| *s < slot) {
                    alloc.free_frame(dir.get(linked).frame());
                }
                alloc.free_frame(space.root);
                return Err(VmemError::OutOfMemory);
            };
            unsafe { crate::zero_frame(mapper, table) };
            dir.set(slot, PageEntryBits::table_link(table, false));
        }
        log::debug!(
            "kernel directory at {} with {} shared tables",
            space.root,
            kernel_directory_slots().len()
        );
        Ok(space)
    }

    /// Build a task directory sharing `kernel`'s page tables.
    ///
    /// # Errors
    /// [`VmemError::OutOfMemory`] if no frame is left for the directory.
    pub fn new_directory<A: FrameAlloc>(
        mapper: &'m M,
        alloc: &mut A,
        kernel: &AddressSpace<'_, M>,
    ) -> Result<Self, VmemError> {
        let space = Self::empty(mapper, alloc)?;
        let dir = space.directory_mut();
        let kdir = kernel.directory_mut();
        for slot in kernel_directory_slots() {
            dir.set(slot, kdir.get(slot));
        }
        Ok(space)
    }

    fn empty<A: FrameAlloc>(mapper: &'m M, alloc: &mut A) -> Result<Self, VmemError> {
        let root = alloc.alloc_frame().ok_or(VmemError::OutOfMemory)?;
        let space = Self { root, mapper };
        space.directory_mut().zero();
        Ok(space)
    }

    /// Wrap a directory that already exists.
    #[inline]
    pub const fn from_root(mapper: &'m M, root: FrameNumber) -> Self {
        Self { root, mapper }
    }

    /// Frame of the page directory.
    #[inline]
    pub const fn root(&self) -> FrameNumber {
        self.root
    }

    /// Physical address to load into CR3.
    #[inline]
    pub const fn root_address(&self) -> PhysicalAddress {
        self.root.base()
    }

    #[inline]
    pub(crate) const fn mapper(&self) -> &'m M {
        self.mapper
    }

    #[inline]
    fn directory_mut(&self) -> &'m mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(self.root.base()) }
    }

    #[inline]
    fn table_mut(&self, frame: FrameNumber) -> &'m mut PageTable {
        unsafe { self.mapper.phys_to_mut::<PageTable>(frame.base()) }
    }

    /// Map **one** 4 KiB page `va → frame`, overwriting any previous entry.
    ///
    /// A missing page table is allocated and zeroed. The kernel range never
    /// gets new tables here since they would not be shared.
    ///
    /// # Errors
    /// - [`VmemError::Unaligned`] if `va` is not page aligned.
    /// - [`VmemError::KernelRange`] if `va` is in the kernel range and its table is missing.
    /// - [`VmemError::OutOfMemory`] if a page table cannot be allocated.
    pub fn map_page<A: FrameAlloc>(
        &self,
        alloc: &mut A,
        va: VirtualAddress,
        frame: FrameNumber,
        flags: MapFlags,
    ) -> Result<(), VmemError> {
        if !va.is_page_aligned() {
            return Err(VmemError::Unaligned(va.as_u32()));
        }

        let dir = self.directory_mut();
        let mut pde = dir.get(va.directory_index());
        if !pde.present() {
            if is_kernel_address(va) {
                return Err(VmemError::KernelRange(va));
            }
            let table = alloc.alloc_frame().ok_or(VmemError::OutOfMemory)?;
            unsafe { crate::zero_frame(self.mapper, table) };
            pde = PageEntryBits::table_link(table, is_user_address(va));
            dir.set(va.directory_index(), pde);
        }

        let table = self.table_mut(pde.frame());
        table.set(
            va.table_index(),
            PageEntryBits::page(frame, flags.writable, flags.user),
        );
        Ok(())
    }

    /// Clear the translation at `va` and return the frame it pointed at.
    ///
    /// The frame is **not** freed; ownership goes back to the caller.
    ///
    /// # Errors
    /// [`VmemError::NotMapped`] if there is no present entry.
    pub fn unmap_page(&self, va: VirtualAddress) -> Result<FrameNumber, VmemError> {
        let Some(pte) = self.entry(va).filter(PageEntryBits::present) else {
            log::warn!("unmap of {va} which is not mapped");
            return Err(VmemError::NotMapped(va));
        };
        let pde = self.directory_mut().get(va.directory_index());
        self.table_mut(pde.frame())
            .set(va.table_index(), PageEntryBits::new());
        Ok(pte.frame())
    }

    /// The leaf entry for `va`, if its page table exists.
    #[must_use]
    pub fn entry(&self, va: VirtualAddress) -> Option<PageEntryBits> {
        let pde = self.directory_mut().get(va.directory_index());
        if !pde.present() {
            return None;
        }
        Some(self.table_mut(pde.frame()).get(va.table_index()))
    }

    /// Translate `va` to a physical address if mapped.
    #[must_use]
    pub fn translate(&self, va: VirtualAddress) -> Option<PhysicalAddress> {
        let pte = self.entry(va).filter(PageEntryBits::present)?;
        Some(pte.frame().base() + va.page_offset())
    }

    /// Visit every present page below the kernel range, in address order.
    pub fn for_each_user_page(&self, mut f: impl FnMut(VirtualAddress, PageEntryBits)) {
        let dir = self.directory_mut();
        for (di, pde) in dir.present() {
            if di >= kernel_directory_slots().start {
                break;
            }
            for (ti, pte) in self.table_mut(pde.frame()).present() {
                f(VirtualAddress::from_indices(di, ti), pte);
            }
        }
    }

    /// Make this the live address space.
    ///
    /// # Safety
    /// See [`DirectoryRegister::load_directory`].
    #[inline]
    pub unsafe fn activate<R: DirectoryRegister + ?Sized>(&self, reg: &R) {
        unsafe { reg.load_directory(self.root_address()) }
    }

    /// Release every user page, every user page table and the directory.
    ///
    /// Kernel-range tables are shared and left alone. Must not be called on
    /// the live directory.
    pub fn destroy<A: FrameAlloc>(self, alloc: &mut A) -> Released {
        let mut released = Released::default();
        let dir = self.directory_mut();
        let kernel_slots = kernel_directory_slots();
        for (di, pde) in dir.present() {
            if kernel_slots.contains(&di) {
                continue;
            }
            for (_, pte) in self.table_mut(pde.frame()).present() {
                alloc.free_frame(pte.frame());
                released.pages += 1;
            }
            alloc.free_frame(pde.frame());
            released.structures += 1;
        }
        alloc.free_frame(self.root);
        released.structures += 1;
        log::debug!(
            "destroyed directory {}: {} pages, {} structures",
            self.root,
            released.pages,
            released.structures
        );
        released
    }
}
