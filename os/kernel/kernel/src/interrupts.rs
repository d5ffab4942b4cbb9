//! Entry points the interrupt stubs call with the saved frame.

use crate::scheduler::Dispatch;
use crate::task::Registers;
use crate::{Cpu, Kernel, KernelError};
use kernel_memory_addresses::VirtualAddress;
use kernel_vmem::{FaultOutcome, PageFaultError, PhysMapper};
use log::{error, warn};

/// Exit code of a task killed by a fatal page fault (`128 + SIGSEGV`).
pub const FAULT_EXIT_CODE: i32 = 139;

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Timer tick: free the stack of a task that exited since the last tick,
    /// then preempt.
    pub fn on_timer(&self, saved: &Registers) -> Dispatch {
        let zombie = self.lock_scheduler().take_zombie_stack();
        if let Some(stack) = zombie {
            self.free_kernel_stack(stack);
        }
        self.schedule(saved)
    }

    /// `#PF` with CR2 in `addr` and the CPU's error code.
    ///
    /// A legitimate growth fault is resolved in place. A fatal fault from user
    /// mode kills the task with [`FAULT_EXIT_CODE`] and dispatches the next one.
    ///
    /// # Errors
    /// [`KernelError::UnhandledKernelFault`] for a fatal fault in kernel mode or
    /// a fault before any task runs. The stub should halt.
    pub fn on_page_fault(
        &self,
        saved: &Registers,
        addr: VirtualAddress,
        error: PageFaultError,
    ) -> Result<Dispatch, KernelError> {
        let Some(pid) = self.current_pid() else {
            error!("page fault at {addr} (eip {:#010x}) with no task running", saved.eip);
            return Err(KernelError::UnhandledKernelFault(addr));
        };
        match self.task_page_fault_cb(pid, addr, error)? {
            FaultOutcome::Resolved => Ok(Dispatch::Stay),
            FaultOutcome::Fatal(reason) if error.user() => {
                warn!(
                    "task {pid}: {reason} at {addr} (eip {:#010x}, error {:#x}), terminating",
                    saved.eip,
                    error.into_bits()
                );
                self.exit_task(pid, FAULT_EXIT_CODE)
            }
            FaultOutcome::Fatal(reason) => {
                error!(
                    "kernel fault in task {pid}: {reason} at {addr} (eip {:#010x})",
                    saved.eip
                );
                Err(KernelError::UnhandledKernelFault(addr))
            }
        }
    }
}
