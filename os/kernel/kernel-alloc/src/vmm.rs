//! Backs kernel heap growth with fresh frames mapped into the shared kernel range.

use crate::kmalloc::{HeapError, HeapGrowth};
use kernel_info::memory::FRAME_SIZE;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::{AddressSpace, FrameAlloc, MapFlags, PhysMapper, VmemError};
use log::{trace, warn};

/// The kernel directory together with a frame source, seen as heap backing.
///
/// Heap byte `offset` lives at `heap_virt + offset`. The kernel range tables
/// are shared, so pages mapped here are visible from every task directory.
pub struct HeapVmm<'s, 'm, M: PhysMapper, A: FrameAlloc> {
    space: &'s AddressSpace<'m, M>,
    frames: A,
    heap_virt: u32,
}

impl<'s, 'm, M: PhysMapper, A: FrameAlloc> HeapVmm<'s, 'm, M, A> {
    pub const fn new(space: &'s AddressSpace<'m, M>, frames: A, heap_virt: u32) -> Self {
        Self {
            space,
            frames,
            heap_virt,
        }
    }

    fn page(&self, offset: usize) -> Option<VirtualAddress> {
        VirtualAddress::new(self.heap_virt).checked_add(u32::try_from(offset).ok()?)
    }

    /// Undo the first `mapped` pages of a failed `grow` at `offset`.
    fn roll_back(&mut self, offset: usize, mapped: usize) {
        for i in 0..mapped {
            let Some(va) = self.page(offset + i * FRAME_SIZE as usize) else {
                continue;
            };
            if let Ok(frame) = self.space.unmap_page(va) {
                self.frames.free_frame(frame);
            }
        }
    }
}

impl<M: PhysMapper, A: FrameAlloc> HeapGrowth for HeapVmm<'_, '_, M, A> {
    fn grow(&mut self, offset: usize, len: usize) -> Result<(), HeapError> {
        let pages = len / FRAME_SIZE as usize;
        for i in 0..pages {
            let Some(va) = self.page(offset + i * FRAME_SIZE as usize) else {
                self.roll_back(offset, i);
                return Err(HeapError::OutOfMemory);
            };
            let Some(frame) = self.frames.alloc_frame() else {
                warn!("kernel heap growth: out of frames after {i} of {pages} pages");
                self.roll_back(offset, i);
                return Err(HeapError::OutOfMemory);
            };
            if let Err(e) = self.space.map_page(&mut self.frames, va, frame, MapFlags::KERNEL_RW) {
                warn!("kernel heap growth: cannot map {va}: {e}");
                self.frames.free_frame(frame);
                self.roll_back(offset, i);
                return Err(match e {
                    VmemError::OutOfMemory => HeapError::OutOfMemory,
                    _ => HeapError::Unbacked(offset + i * FRAME_SIZE as usize),
                });
            }
        }
        trace!("kernel heap grew by {pages} pages at offset {offset:#x}");
        Ok(())
    }

    fn translate(&self, offset: usize) -> Option<PhysicalAddress> {
        self.space.translate(self.page(offset)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kernel_info::memory::KERNEL_SPACE_START;
    use kernel_memory_addresses::FrameNumber;
    use kernel_vmem::testing::{BumpAlloc, TestPhys};

    const HEAP_VIRT: u32 = KERNEL_SPACE_START + 0x0010_0000;

    #[test]
    fn grow_maps_fresh_frames_at_heap_addresses() {
        let phys = TestPhys::with_frames(64);
        let mut frames = BumpAlloc::new(1, 64);
        let kernel = AddressSpace::new_kernel(&phys, &mut frames).unwrap();
        let first = frames.next;

        let mut vmm = HeapVmm::new(&kernel, &mut frames, HEAP_VIRT);
        vmm.grow(0x4_0000, 0x2000).unwrap();
        assert_eq!(
            vmm.translate(0x4_0010),
            Some(FrameNumber::new(first).base() + 0x10)
        );
        assert_eq!(
            vmm.translate(0x4_1000),
            Some(FrameNumber::new(first + 1).base())
        );
        assert_eq!(vmm.translate(0x4_2000), None);
    }

    #[test]
    fn failed_grow_returns_every_frame() {
        let phys = TestPhys::with_frames(64);
        let mut frames = BumpAlloc::new(1, 64);
        let kernel = AddressSpace::new_kernel(&phys, &mut frames).unwrap();
        let start = frames.next;
        frames.end = start + 2;

        let mut vmm = HeapVmm::new(&kernel, &mut frames, HEAP_VIRT);
        assert_eq!(vmm.grow(0, 0x3000), Err(HeapError::OutOfMemory));
        assert_eq!(vmm.translate(0), None);
        assert_eq!(vmm.translate(0x1000), None);
        drop(vmm);
        assert_eq!(frames.outstanding(start), 0);
    }
}
