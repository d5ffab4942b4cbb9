mod common;

use common::*;
use kernel::{BootConfig, Kernel, KernelError};
use kernel_info::boot::BootConfigError;
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_vmem::testing::TestPhys;

#[test]
fn boot_reserves_the_kernel_and_turns_paging_on() {
    let kernel = boot_kernel();
    let cpu = kernel.cpu();

    assert!(cpu.paging.get());
    assert!(cpu.interrupts.get(), "interrupt state restored after boot");
    assert_eq!(cpu.loads.borrow().as_slice(), [kernel.kernel_space().root_address()]);

    let frames = kernel.frame_stats();
    assert_eq!(frames.total, 1024);
    assert_eq!(frames.used, RESERVED_FRAMES + KERNEL_PAGING_FRAMES);
    assert_eq!(frames.free, frames.total - frames.used);
}

#[test]
fn kernel_image_is_mapped_at_a_fixed_offset() {
    let kernel = boot_kernel();
    let space = kernel.kernel_space();
    assert_eq!(
        space.translate(VirtualAddress::new(0xC001_0123)),
        Some(PhysicalAddress::new(HEAP_PHYS + 0x123))
    );
    assert_eq!(space.translate(VirtualAddress::new(0xC000_0000)), Some(PhysicalAddress::new(0)));
    // First frame past the bootstrap heap is free memory, not mapped.
    assert_eq!(space.translate(VirtualAddress::new(0xC000_0000 + RESERVED_FRAMES * 4096)), None);
}

#[test]
fn heap_leaves_bootstrap_mode() {
    let kernel = boot_kernel();
    let stats = kernel.heap_stats();
    assert_eq!(stats.reserved, HEAP_LEN);
    assert_eq!(stats.backed, 256 * 1024);
    // The frame bitmap: 1024 bits.
    assert!(stats.bootstrap >= 128);
    assert_eq!(stats.used, 0);
}

#[test]
fn invalid_config_is_rejected_before_touching_memory() {
    let cfg = BootConfig {
        heap_len: 4096,
        ..config()
    };
    let result = unsafe { Kernel::boot(cfg, TestPhys::with_frames(4), FakeCpu::new()) };
    assert_eq!(
        result.err(),
        Some(KernelError::InvalidBootConfig(BootConfigError::HeapTooSmall))
    );

    let cfg = BootConfig {
        total_memory_bytes: 64 * 1024,
        ..config()
    };
    let result = unsafe { Kernel::boot(cfg, TestPhys::with_frames(16), FakeCpu::new()) };
    assert_eq!(
        result.err(),
        Some(KernelError::InvalidBootConfig(BootConfigError::TooLittleMemory))
    );
}
