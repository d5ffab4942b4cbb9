use crate::scheduler::SchedulerError;
use kernel_alloc::{FrameAllocError, HeapError};
use kernel_info::boot::BootConfigError;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::Errno;
use kernel_vmem::VmemError;

/// Everything a kernel operation can fail with.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum KernelError {
    #[error("invalid boot configuration: {0:?}")]
    InvalidBootConfig(BootConfigError),
    #[error(transparent)]
    Frames(#[from] FrameAllocError),
    #[error(transparent)]
    Heap(#[from] HeapError),
    #[error(transparent)]
    Vmem(#[from] VmemError),
    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
    #[error("out of memory")]
    OutOfMemory,
    #[error("no task is running")]
    NoCurrentTask,
    #[error("invalid argument")]
    InvalidArgument,
    #[error("{0} is already mapped")]
    AlreadyMapped(VirtualAddress),
    #[error("{0} is not a writable user word")]
    BadAddress(VirtualAddress),
    #[error("unhandled page fault at {0} in kernel context")]
    UnhandledKernelFault(VirtualAddress),
}

impl KernelError {
    /// What user mode gets to see of this error.
    #[must_use]
    pub const fn errno(&self) -> Errno {
        match self {
            Self::Frames(FrameAllocError::OutOfMemory)
            | Self::Heap(HeapError::OutOfMemory)
            | Self::Vmem(VmemError::OutOfMemory)
            | Self::OutOfMemory => Errno::ENOMEM,
            Self::Scheduler(SchedulerError::TableFull) => Errno::EAGAIN,
            Self::Scheduler(SchedulerError::NoSuchTask(_)) => Errno::ESRCH,
            Self::Scheduler(SchedulerError::NoChild) => Errno::ECHILD,
            Self::NoCurrentTask => Errno::EPERM,
            Self::Vmem(VmemError::NotMapped(_))
            | Self::BadAddress(_)
            | Self::UnhandledKernelFault(_) => Errno::EFAULT,
            Self::InvalidBootConfig(_)
            | Self::Frames(_)
            | Self::Heap(_)
            | Self::Vmem(_)
            | Self::InvalidArgument
            | Self::AlreadyMapped(_) => Errno::EINVAL,
        }
    }
}
