//! Host harness: simulated RAM, a recording CPU and a booted kernel.

#![allow(dead_code)]

use kernel::{BootConfig, Kernel, Pid, Registers, TaskEntry};
use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
use kernel_sync::InterruptFlag;
use kernel_vmem::testing::TestPhys;
use kernel_vmem::{AddressSpace, DirectoryRegister, PhysMapper};
use std::cell::{Cell, RefCell};

pub const TOTAL_MEMORY: u64 = 4 * 1024 * 1024;
pub const HEAP_PHYS: u32 = 0x0001_0000;
pub const HEAP_LEN: usize = 1024 * 1024;
/// Frames owned by the kernel image and the bootstrap heap.
pub const RESERVED_FRAMES: u32 = (HEAP_PHYS + 256 * 1024) / 4096;
/// Kernel directory plus its 16 shared tables.
pub const KERNEL_PAGING_FRAMES: u32 = 17;

pub type TestKernel = Kernel<TestPhys, FakeCpu>;

/// Records what the kernel asks of the CPU.
pub struct FakeCpu {
    pub loads: RefCell<Vec<PhysicalAddress>>,
    pub flushes: RefCell<Vec<VirtualAddress>>,
    pub paging: Cell<bool>,
    pub interrupts: Cell<bool>,
}

impl FakeCpu {
    pub fn new() -> Self {
        Self {
            loads: RefCell::new(Vec::new()),
            flushes: RefCell::new(Vec::new()),
            paging: Cell::new(false),
            interrupts: Cell::new(true),
        }
    }

    pub fn last_load(&self) -> Option<PhysicalAddress> {
        self.loads.borrow().last().copied()
    }
}

impl DirectoryRegister for FakeCpu {
    unsafe fn load_directory(&self, root: PhysicalAddress) {
        assert!(!self.interrupts.get(), "directory switched with interrupts enabled");
        self.loads.borrow_mut().push(root);
    }

    fn flush_page(&self, va: VirtualAddress) {
        self.flushes.borrow_mut().push(va);
    }

    unsafe fn enable_paging(&self) {
        self.paging.set(true);
    }
}

impl InterruptFlag for FakeCpu {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts.get()
    }

    fn disable_interrupts(&self) {
        self.interrupts.set(false);
    }

    fn enable_interrupts(&self) {
        self.interrupts.set(true);
    }
}

#[derive(Clone, Copy)]
#[repr(C, align(4096))]
struct Page([u8; 4096]);

/// A fresh heap arena leaked for the kernel's lifetime.
pub fn config() -> BootConfig {
    let arena: &'static mut [Page] = Vec::leak(vec![Page([0; 4096]); HEAP_LEN / 4096]);
    BootConfig {
        total_memory_bytes: TOTAL_MEMORY,
        heap_start: arena.as_mut_ptr() as usize,
        heap_phys: HEAP_PHYS,
        heap_len: HEAP_LEN,
    }
}

pub fn boot_kernel() -> TestKernel {
    boot_with_config().0
}

pub fn boot_with_config() -> (TestKernel, BootConfig) {
    let cfg = config();
    let phys = TestPhys::with_frames((TOTAL_MEMORY / 4096) as usize);
    let kernel = unsafe { Kernel::boot(cfg, phys, FakeCpu::new()) }.expect("boot");
    (kernel, cfg)
}

/// A user task entered at `eip` with the default heap start.
pub fn user_task(kernel: &TestKernel, name: &str) -> Pid {
    kernel
        .create_task(name, TaskEntry::user(VirtualAddress::new(0x0800_0000)))
        .expect("create task")
}

/// Run one timer tick and return the pid it switched to.
pub fn tick(kernel: &TestKernel) -> Option<Pid> {
    match kernel.on_timer(&Registers::default()) {
        kernel::Dispatch::Task { pid, .. } => Some(pid),
        _ => None,
    }
}

pub fn task_space(kernel: &TestKernel, pid: Pid) -> AddressSpace<'_, TestPhys> {
    let info = kernel.task_info(pid).expect("task exists");
    AddressSpace::from_root(kernel.mapper(), info.directory)
}

/// The 4 KiB behind `va` in `pid`'s address space.
#[allow(clippy::mut_from_ref)]
pub fn page_bytes(kernel: &TestKernel, pid: Pid, va: VirtualAddress) -> &mut [u8; 4096] {
    let pa = task_space(kernel, pid).translate(va.page_base()).expect("mapped");
    unsafe { kernel.mapper().phys_to_mut::<[u8; 4096]>(pa) }
}
