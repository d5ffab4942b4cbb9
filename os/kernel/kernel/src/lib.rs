//! # Kernel core
//!
//! Memory management and process scheduling for a single-core i386 kernel.
//!
//! ```text
//!  interrupt stub ──► on_timer / on_page_fault / on_syscall
//!                          │
//!               ┌──────────┴──────────┐
//!               ▼                     ▼
//!          Scheduler ◄──────── task memory (sbrk, brk, munmap, faults)
//!               │                     │
//!               ▼                     ▼
//!        AddressSpace (kernel-vmem)   KernelHeap ─► HeapVmm
//!               │                     │
//!               └──────► BitmapFrameAlloc ◄┘
//! ```
//!
//! Everything hangs off one [`Kernel`] value built by [`Kernel::boot`]. The
//! platform layer supplies two collaborators:
//! - a [`PhysMapper`] that reaches arbitrary physical frames, and
//! - a [`Cpu`] that loads page directories and masks interrupts.
//!
//! The interrupt stub saves a [`Registers`] frame, calls one of the entry
//! points and acts on the returned [`Dispatch`].
//!
//! ## Locking
//!
//! Each subsystem sits behind its own [`SpinLock`], taken with interrupts
//! masked. Locks nest in one order only: scheduler, then heap, then frames.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod alloc;
pub mod cpu;
mod error;
mod init;
mod interrupts;
mod process;
pub mod scheduler;
mod syscall;
pub mod task;
mod task_memory;
pub mod tracing;

pub use cpu::Cpu;
#[cfg(target_arch = "x86")]
pub use cpu::{X86Cpu, YieldToScheduler};
pub use error::KernelError;
pub use interrupts::FAULT_EXIT_CODE;
pub use process::WaitOutcome;
pub use scheduler::{Dispatch, Scheduler, SchedulerError, Wakeup};
pub use task::{ExitStatus, Pid, Registers, TaskEntry, TaskInfo, TaskName, TaskState, WaitFor};

pub use kernel_alloc::{FrameStats, HeapStats};
pub use kernel_info::boot::BootConfig;
pub use kernel_vmem::{FaultOutcome, PageFaultError, PhysMapper};

use kernel_alloc::{BitmapFrameAlloc, KernelHeap};
use kernel_info::tasks::TASK_TABLE_CAPACITY;
use kernel_memory_addresses::FrameNumber;
use kernel_sync::{IrqSpinLockGuard, SpinLock};
use kernel_vmem::AddressSpace;

/// The kernel's memory and task state.
pub struct Kernel<M: PhysMapper, C: Cpu> {
    mapper: M,
    cpu: C,
    /// Root of the kernel directory; its kernel-range tables are shared by all tasks.
    kernel_root: FrameNumber,
    /// Page-table address of heap offset 0.
    heap_virt: u32,
    scheduler: SpinLock<Scheduler<TASK_TABLE_CAPACITY>>,
    heap: SpinLock<KernelHeap>,
    frames: SpinLock<BitmapFrameAlloc<'static>>,
}

type Locked<'a, T, C> = IrqSpinLockGuard<'a, T, &'a C>;

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    #[must_use]
    pub const fn cpu(&self) -> &C {
        &self.cpu
    }

    #[must_use]
    pub const fn mapper(&self) -> &M {
        &self.mapper
    }

    /// The kernel page directory.
    #[must_use]
    pub const fn kernel_space(&self) -> AddressSpace<'_, M> {
        AddressSpace::from_root(&self.mapper, self.kernel_root)
    }

    pub(crate) const fn space(&self, root: FrameNumber) -> AddressSpace<'_, M> {
        AddressSpace::from_root(&self.mapper, root)
    }

    pub(crate) fn lock_scheduler(&self) -> Locked<'_, Scheduler<TASK_TABLE_CAPACITY>, C> {
        self.scheduler.lock_irq(&self.cpu)
    }

    pub(crate) fn lock_heap(&self) -> Locked<'_, KernelHeap, C> {
        self.heap.lock_irq(&self.cpu)
    }

    pub(crate) fn lock_frames(&self) -> Locked<'_, BitmapFrameAlloc<'static>, C> {
        self.frames.lock_irq(&self.cpu)
    }
}
