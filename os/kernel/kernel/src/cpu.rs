//! The CPU as the kernel sees it.

use kernel_sync::InterruptFlag;
use kernel_vmem::DirectoryRegister;

/// Page-directory register plus interrupt masking.
pub trait Cpu: DirectoryRegister + InterruptFlag {}

impl<T: DirectoryRegister + InterruptFlag> Cpu for T {}

#[cfg(target_arch = "x86")]
pub use x86::{X86Cpu, YieldToScheduler};

#[cfg(target_arch = "x86")]
mod x86 {
    use kernel_memory_addresses::{PhysicalAddress, VirtualAddress};
    use kernel_sync::{CpuInterrupts, InterruptFlag, Relax};
    use kernel_syscall::{Sysno, syscall3};
    use kernel_vmem::{Cr3Register, DirectoryRegister};

    /// The executing i386 CPU.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct X86Cpu;

    impl DirectoryRegister for X86Cpu {
        unsafe fn load_directory(&self, root: PhysicalAddress) {
            unsafe { Cr3Register.load_directory(root) }
        }

        fn flush_page(&self, va: VirtualAddress) {
            Cr3Register.flush_page(va);
        }

        unsafe fn enable_paging(&self) {
            unsafe { Cr3Register.enable_paging() }
        }
    }

    impl InterruptFlag for X86Cpu {
        fn interrupts_enabled(&self) -> bool {
            CpuInterrupts.interrupts_enabled()
        }

        fn disable_interrupts(&self) {
            CpuInterrupts.disable_interrupts();
        }

        fn enable_interrupts(&self) {
            CpuInterrupts.enable_interrupts();
        }
    }

    /// Relax step for task-context spin locks: give the CPU to the next task.
    ///
    /// On a single core the holder of a contended lock can only make progress
    /// while we are switched out.
    #[derive(Debug, Default, Clone, Copy)]
    pub struct YieldToScheduler;

    impl Relax for YieldToScheduler {
        fn relax(&mut self) {
            // The result is always 0; nothing to act on.
            let _ = unsafe { syscall3(Sysno::SchedYield, 0, 0, 0) };
        }
    }
}
