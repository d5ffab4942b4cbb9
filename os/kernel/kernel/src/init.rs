//! Boot order: heap, frames, kernel directory, paging, free list.

use crate::{Cpu, Kernel, KernelError, Scheduler};
use kernel_alloc::{BitmapFrameAlloc, KernelHeap};
use kernel_info::boot::{BootConfig, BootConfigError};
use kernel_info::memory::{BOOTSTRAP_HEAP_BYTES, FRAME_SIZE, kernel_virt};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress};
use kernel_sync::{IrqGuard, SpinLock};
use kernel_vmem::{AddressSpace, MapFlags, PhysMapper};
use log::info;

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Bring up memory management and an empty task table.
    ///
    /// 1. The heap starts in bootstrap mode on the arena at `heap_start`.
    /// 2. The frame bitmap is carved from that arena and sized to RAM.
    /// 3. Frames below [`BootConfig::reserved_end`] are marked owned.
    /// 4. The kernel directory is built, mapping them at `KERNEL_SPACE_START + pa`.
    /// 5. The directory is loaded and paging switched on.
    /// 6. The heap switches to its free list.
    ///
    /// # Errors
    /// [`KernelError::InvalidBootConfig`] before anything is touched, or an
    /// out-of-memory error if the machine is too small for the paging structures.
    ///
    /// # Safety
    /// - `config` describes this machine, and the bootstrap arena at `heap_start`
    ///   is mapped, writable and backed by `heap_phys` onwards.
    /// - `heap_start` equals [`BootConfig::heap_virt`]. Heap growth maps its
    ///   pages there, and the heap reads and writes through `heap_start`.
    ///   [`BootConfig::validate`] enforces this on x86.
    /// - `[heap_start, heap_start + heap_len)` is otherwise unused.
    /// - `mapper` reaches every frame of installed memory.
    /// - Called once.
    pub unsafe fn boot(config: BootConfig, mapper: M, cpu: C) -> Result<Self, KernelError> {
        config.validate().map_err(KernelError::InvalidBootConfig)?;

        let mut heap = unsafe {
            KernelHeap::bootstrap(
                config.heap_start,
                BOOTSTRAP_HEAP_BYTES,
                config.heap_len,
                config.heap_phys,
            )
        };
        let mut frames = BitmapFrameAlloc::new_in(config.total_memory_bytes, &mut heap)?;
        frames.reserve_range(0, config.reserved_end());

        let reserved_end = u32::try_from(config.reserved_end())
            .map_err(|_| KernelError::InvalidBootConfig(BootConfigError::HeapOutsideKernelSpace))?;
        let kernel_root = {
            let kernel = AddressSpace::new_kernel(&mapper, &mut frames)?;
            for pa in (0..reserved_end).step_by(FRAME_SIZE as usize) {
                kernel.map_page(
                    &mut frames,
                    VirtualAddress::new(kernel_virt(pa)),
                    FrameNumber::containing(PhysicalAddress::new(pa)),
                    MapFlags::KERNEL_RW,
                )?;
            }

            let _irq = IrqGuard::new(&cpu);
            unsafe {
                kernel.activate(&cpu);
                cpu.enable_paging();
            }
            kernel.root()
        };

        heap.enable_free_list();

        let stats = frames.stats();
        info!(
            "memory online: {} frames, {} used, kernel directory at {kernel_root}",
            stats.total, stats.used
        );

        Ok(Self {
            mapper,
            cpu,
            kernel_root,
            heap_virt: config.heap_virt(),
            scheduler: SpinLock::new(Scheduler::new()),
            heap: SpinLock::new(heap),
            frames: SpinLock::new(frames),
        })
    }
}
