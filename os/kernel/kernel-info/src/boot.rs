//! # Kernel Boot Configuration

use crate::memory::{BOOTSTRAP_HEAP_BYTES, FRAME_SIZE, KERNEL_SPACE_END, KERNEL_SPACE_START};

/// What the boot collaborator tells the kernel about the machine.
///
/// The record is consumed once, at boot, to size the frame bitmap and place
/// the bootstrap heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootConfig {
    /// Installed physical memory in bytes. Sizes the frame bitmap.
    pub total_memory_bytes: u64,

    /// Kernel virtual address at which the kernel heap starts.
    pub heap_start: usize,

    /// Physical address backing [`heap_start`](Self::heap_start).
    ///
    /// The first [`BOOTSTRAP_HEAP_BYTES`] of the heap are physically contiguous
    /// from here. Everything below `heap_phys + BOOTSTRAP_HEAP_BYTES` is owned
    /// by the kernel image and the bootstrap heap.
    pub heap_phys: u32,

    /// Virtual bytes reserved for the kernel heap, including the bootstrap arena.
    pub heap_len: usize,
}

/// Reasons a [`BootConfig`] is rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootConfigError {
    /// Less memory than the kernel image and bootstrap heap occupy.
    TooLittleMemory,
    /// `heap_phys` or `heap_start` is not page aligned.
    UnalignedHeap,
    /// The heap reservation is smaller than the bootstrap arena.
    HeapTooSmall,
    /// The heap reservation does not fit into kernel space.
    HeapOutsideKernelSpace,
    /// `heap_start` is not [`BootConfig::heap_virt`], where heap growth maps
    /// its pages.
    HeapNotAtKernelVirt,
}

impl BootConfig {
    /// Physical end (exclusive) of the region owned by the kernel image and bootstrap heap.
    #[must_use]
    pub const fn reserved_end(&self) -> u64 {
        self.heap_phys as u64 + BOOTSTRAP_HEAP_BYTES as u64
    }

    /// Kernel virtual address that page tables use for the heap start.
    #[must_use]
    pub const fn heap_virt(&self) -> u32 {
        KERNEL_SPACE_START + self.heap_phys
    }

    /// Whether the heap is addressed where the page tables put it.
    ///
    /// Always true on hardware. Host tests run the heap on an ordinary buffer
    /// and only simulate the mapping.
    #[must_use]
    pub const fn heap_at_kernel_virt(&self) -> bool {
        self.heap_start == self.heap_virt() as usize
    }

    /// Check the record for internal consistency.
    ///
    /// # Errors
    /// Returns the first violated constraint.
    pub const fn validate(&self) -> Result<(), BootConfigError> {
        let frame = FRAME_SIZE as usize;
        if !self.heap_phys.is_multiple_of(FRAME_SIZE) || !self.heap_start.is_multiple_of(frame) {
            return Err(BootConfigError::UnalignedHeap);
        }
        if self.heap_len < BOOTSTRAP_HEAP_BYTES {
            return Err(BootConfigError::HeapTooSmall);
        }
        if self.total_memory_bytes < self.reserved_end() {
            return Err(BootConfigError::TooLittleMemory);
        }
        let kernel_space = (KERNEL_SPACE_END - KERNEL_SPACE_START) as u64;
        if self.heap_phys as u64 + self.heap_len as u64 > kernel_space {
            return Err(BootConfigError::HeapOutsideKernelSpace);
        }
        #[cfg(target_arch = "x86")]
        if !self.heap_at_kernel_virt() {
            return Err(BootConfigError::HeapNotAtKernelVirt);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const fn config() -> BootConfig {
        BootConfig {
            total_memory_bytes: 4 * 1024 * 1024,
            heap_start: 0xC010_0000,
            heap_phys: 0x0010_0000,
            heap_len: 1024 * 1024,
        }
    }

    #[test]
    fn accepts_consistent_record() {
        assert_eq!(config().validate(), Ok(()));
        assert_eq!(config().heap_virt(), 0xC010_0000);
        assert_eq!(config().reserved_end(), 0x0010_0000 + 256 * 1024);
    }

    #[test]
    fn rejects_memory_smaller_than_kernel() {
        let cfg = BootConfig {
            total_memory_bytes: 0x0010_0000,
            ..config()
        };
        assert_eq!(cfg.validate(), Err(BootConfigError::TooLittleMemory));
    }

    #[test]
    fn rejects_unaligned_heap() {
        let cfg = BootConfig {
            heap_phys: 0x0010_0010,
            ..config()
        };
        assert_eq!(cfg.validate(), Err(BootConfigError::UnalignedHeap));
    }

    #[test]
    fn heap_start_must_match_its_kernel_mapping() {
        assert!(config().heap_at_kernel_virt());
        let cfg = BootConfig {
            heap_start: 0xC020_0000,
            ..config()
        };
        assert!(!cfg.heap_at_kernel_virt());
        #[cfg(target_arch = "x86")]
        assert_eq!(cfg.validate(), Err(BootConfigError::HeapNotAtKernelVirt));
    }

    #[test]
    fn rejects_heap_beyond_kernel_space() {
        let cfg = BootConfig {
            heap_len: 0x0400_0000,
            ..config()
        };
        assert_eq!(cfg.validate(), Err(BootConfigError::HeapOutsideKernelSpace));
    }
}
