//! # Tasks
//!
//! A task is one schedulable context: a saved register frame, a page
//! directory, a kernel stack and (for user tasks) a heap and stack layout.

mod memory;
mod name;
mod registers;

pub use memory::TaskMemory;
pub(crate) use memory::BreakError;
pub use name::TaskName;
pub use registers::{
    KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR, Registers, USER_CODE_SELECTOR, USER_DATA_SELECTOR,
};

use core::fmt;
use core::num::NonZeroU32;
use core::ptr::NonNull;
use kernel_info::memory::{TASK_HEAP_START, TASK_STACK_TOP};
use kernel_memory_addresses::{FrameNumber, VirtualAddress};

/// Process identifier. Starts at 1 and is never handed out twice.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[repr(transparent)]
pub struct Pid(NonZeroU32);

impl Pid {
    /// `None` for 0, which never names a task.
    #[must_use]
    pub const fn new(pid: u32) -> Option<Self> {
        match NonZeroU32::new(pid) {
            Some(pid) => Some(Self(pid)),
            None => None,
        }
    }

    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0.get()
    }
}

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskState {
    /// Waiting for its turn.
    Runnable,
    /// Owns the CPU.
    Running,
    /// Owns the CPU and is inside a system call.
    Syscall,
    /// Blocked in `waitpid` until a matching child exits. The scheduler skips it.
    Waiting {
        child: WaitFor,
        /// Where the child's exit code goes, if the caller asked for it.
        status: Option<VirtualAddress>,
    },
}

/// Which children a `waitpid` call accepts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitFor {
    Any,
    Child(Pid),
}

impl WaitFor {
    /// Decode the `pid` argument: a positive value names one child, anything
    /// else accepts any child.
    #[must_use]
    pub const fn from_raw(pid: u32) -> Self {
        match Pid::new(pid) {
            Some(pid) if pid.as_u32().cast_signed() > 0 => Self::Child(pid),
            _ => Self::Any,
        }
    }

    #[must_use]
    pub fn accepts(self, pid: Pid) -> bool {
        match self {
            Self::Any => true,
            Self::Child(child) => child == pid,
        }
    }
}

/// What is left of a task that exited before its parent collected it.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct ExitStatus {
    pub pid: Pid,
    pub parent: Pid,
    pub code: i32,
}

/// Where a new task starts.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum TaskEntry {
    /// Ring 0 at `eip`, running on its kernel stack.
    Kernel { eip: VirtualAddress },
    /// Ring 3 at `eip` with its stack at [`TASK_STACK_TOP`] and its heap at `heap_start`.
    User {
        eip: VirtualAddress,
        heap_start: VirtualAddress,
    },
}

impl TaskEntry {
    /// User entry with the heap at [`TASK_HEAP_START`].
    #[must_use]
    pub const fn user(eip: VirtualAddress) -> Self {
        Self::User {
            eip,
            heap_start: VirtualAddress::new(TASK_HEAP_START),
        }
    }

    pub(crate) const fn heap_start(&self) -> VirtualAddress {
        match self {
            Self::Kernel { .. } => VirtualAddress::new(TASK_HEAP_START),
            Self::User { heap_start, .. } => *heap_start,
        }
    }

    pub(crate) const fn initial_registers(&self, kernel_stack_top: u32) -> Registers {
        match self {
            Self::Kernel { eip } => Registers::kernel(eip.as_u32(), kernel_stack_top),
            Self::User { eip, .. } => Registers::user(eip.as_u32(), TASK_STACK_TOP),
        }
    }
}

/// A task's kernel stack, carved from the kernel heap.
#[derive(Debug)]
pub struct KernelStack {
    base: NonNull<u8>,
    len: usize,
}

// SAFETY: the stack is exclusively owned by its task.
unsafe impl Send for KernelStack {}

impl KernelStack {
    pub(crate) const fn new(base: NonNull<u8>, len: usize) -> Self {
        Self { base, len }
    }

    #[must_use]
    pub const fn base(&self) -> NonNull<u8> {
        self.base
    }

    /// One past the highest byte; the initial `esp0`.
    #[must_use]
    pub fn top(&self) -> usize {
        self.base.as_ptr() as usize + self.len
    }
}

/// One slot of the task table.
#[derive(Debug)]
pub struct Task {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: TaskName,
    /// Saved frame while the task is not running.
    pub regs: Registers,
    pub state: TaskState,
    /// Root of the task's page directory.
    pub directory: FrameNumber,
    pub memory: TaskMemory,
    pub kernel_stack: KernelStack,
}

impl Task {
    #[must_use]
    pub fn info(&self) -> TaskInfo {
        TaskInfo {
            pid: self.pid,
            parent: self.parent,
            name: self.name,
            state: self.state,
            eip: VirtualAddress::new(self.regs.eip),
            directory: self.directory,
            heap_start: self.memory.heap_start(),
            brk: self.memory.brk(),
        }
    }
}

/// Copyable snapshot of a task, for callers outside the scheduler lock.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TaskInfo {
    pub pid: Pid,
    pub parent: Option<Pid>,
    pub name: TaskName,
    pub state: TaskState,
    pub eip: VirtualAddress,
    /// Root of the page directory.
    pub directory: FrameNumber,
    pub heap_start: VirtualAddress,
    pub brk: VirtualAddress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pid_zero_is_not_a_pid() {
        assert!(Pid::new(0).is_none());
        assert_eq!(Pid::new(7).map(Pid::as_u32), Some(7));
        assert_eq!(Pid::new(7).unwrap().to_string(), "7");
    }

    #[test]
    fn entry_picks_stack_by_ring() {
        let user = TaskEntry::user(VirtualAddress::new(0x0804_8000));
        assert_eq!(user.initial_registers(0xC010_2000).user_esp, TASK_STACK_TOP);
        assert_eq!(user.heap_start(), VirtualAddress::new(TASK_HEAP_START));

        let kernel = TaskEntry::Kernel {
            eip: VirtualAddress::new(0xC010_0000),
        };
        assert_eq!(kernel.initial_registers(0xC010_2000).esp, 0xC010_2000);
    }

    #[test]
    fn wait_target_from_the_pid_argument() {
        let five = Pid::new(5).unwrap();
        assert_eq!(WaitFor::from_raw(5), WaitFor::Child(five));
        assert_eq!(WaitFor::from_raw(0), WaitFor::Any);
        assert_eq!(WaitFor::from_raw(u32::MAX), WaitFor::Any);
        assert!(WaitFor::Any.accepts(five));
        assert!(!WaitFor::Child(five).accepts(Pid::new(6).unwrap()));
    }
}
