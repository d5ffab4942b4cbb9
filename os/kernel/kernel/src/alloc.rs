//! `kmalloc` and friends on top of the locked heap and frame allocator.

use crate::{Cpu, Kernel, KernelError};
use core::ptr::NonNull;
use kernel_alloc::{FrameStats, HeapError, HeapGrowth, HeapStats, HeapVmm, KernelHeap};
use kernel_memory_addresses::PhysicalAddress;
use kernel_vmem::PhysMapper;

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Allocate `size` bytes from the kernel heap, 16-byte aligned.
    ///
    /// # Errors
    /// [`HeapError::ZeroSize`] or out of memory.
    pub fn kmalloc(&self, size: usize) -> Result<NonNull<u8>, KernelError> {
        self.with_heap(|heap, growth| heap.alloc(size, growth))
    }

    /// Allocate `size` bytes on a page boundary, together with the physical
    /// address of the first byte.
    ///
    /// # Errors
    /// As [`kmalloc`](Self::kmalloc).
    pub fn kmalloc_aligned(&self, size: usize) -> Result<(NonNull<u8>, PhysicalAddress), KernelError> {
        self.with_heap(|heap, growth| heap.alloc_aligned(size, growth))
    }

    /// Return a [`kmalloc`](Self::kmalloc) allocation.
    ///
    /// # Errors
    /// Foreign pointers, double frees and bootstrap allocations are refused
    /// and leave the heap as it was.
    pub fn kfree(&self, ptr: NonNull<u8>) -> Result<(), KernelError> {
        Ok(self.lock_heap().free(ptr)?)
    }

    #[must_use]
    pub fn heap_stats(&self) -> HeapStats {
        self.lock_heap().stats()
    }

    #[must_use]
    pub fn frame_stats(&self) -> FrameStats {
        self.lock_frames().stats()
    }

    /// Run `f` on the heap with growth backed by the kernel directory.
    fn with_heap<R>(
        &self,
        f: impl FnOnce(&mut KernelHeap, &mut dyn HeapGrowth) -> Result<R, HeapError>,
    ) -> Result<R, KernelError> {
        let mut heap = self.lock_heap();
        let mut frames = self.lock_frames();
        let kernel = self.kernel_space();
        let mut growth = HeapVmm::new(&kernel, &mut *frames, self.heap_virt);
        Ok(f(&mut heap, &mut growth)?)
    }
}
