//! # System call ABI
//!
//! User code enters the kernel with `int 0x80`:
//!
//! | Register | In            | Out                                |
//! |----------|---------------|------------------------------------|
//! | `eax`    | call number   | result, or `-1` on failure         |
//! | `ebx`    | argument 0    | errno, `0` on success              |
//! | `ecx`    | argument 1    | preserved                          |
//! | `edx`    | argument 2    | preserved                          |
//!
//! This crate only knows the numbers and the encoding; the handlers live in
//! the kernel.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod errno;
mod sysno;

pub use errno::Errno;
pub use sysno::Sysno;

/// Interrupt vector of the system call gate.
pub const SYSCALL_VECTOR: u8 = 0x80;

/// `waitpid` option: return 0 instead of blocking while the child runs.
pub const WNOHANG: u32 = 1;

/// A decoded system call: number plus the three argument registers.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SyscallRequest {
    pub number: u32,
    pub args: [u32; 3],
}

impl SyscallRequest {
    #[must_use]
    pub const fn from_registers(eax: u32, ebx: u32, ecx: u32, edx: u32) -> Self {
        Self {
            number: eax,
            args: [ebx, ecx, edx],
        }
    }

    /// The call this request names.
    ///
    /// # Errors
    /// [`Errno::EINVAL`] for a number the kernel does not implement.
    pub const fn sysno(&self) -> Result<Sysno, Errno> {
        match Sysno::from_u32(self.number) {
            Some(s) => Ok(s),
            None => Err(Errno::EINVAL),
        }
    }
}

/// Register values a finished call hands back to user mode.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct SyscallReturn {
    pub eax: u32,
    pub ebx: u32,
}

impl SyscallReturn {
    /// Value `eax` holds after a failed call.
    pub const FAILED: u32 = u32::MAX;

    #[must_use]
    pub const fn encode(result: Result<u32, Errno>) -> Self {
        match result {
            Ok(value) => Self { eax: value, ebx: 0 },
            Err(errno) => Self {
                eax: Self::FAILED,
                ebx: errno.code(),
            },
        }
    }

    /// Inverse of [`encode`](Self::encode), as the user-side wrappers see it.
    ///
    /// # Errors
    /// The errno reported in `ebx`.
    pub const fn decode(self) -> Result<u32, Errno> {
        if self.eax == Self::FAILED && self.ebx != 0 {
            Err(Errno::from_code(self.ebx))
        } else {
            Ok(self.eax)
        }
    }
}

/// Issue a system call from the current privilege level.
///
/// # Safety
/// The syscall gate must be installed, and the call's side effects (exit,
/// unmapping memory) must be acceptable to the caller.
#[cfg(target_arch = "x86")]
pub unsafe fn syscall3(sysno: Sysno, a0: u32, a1: u32, a2: u32) -> Result<u32, Errno> {
    let eax: u32;
    let ebx: u32;
    unsafe {
        // ebx is reserved by LLVM; swap it through a scratch register.
        core::arch::asm!(
            "xchg {a0:e}, ebx",
            "int 0x80",
            "xchg {a0:e}, ebx",
            a0 = inout(reg) a0 => ebx,
            inout("eax") sysno as u32 => eax,
            in("ecx") a1,
            in("edx") a2,
        );
    }
    SyscallReturn { eax, ebx }.decode()
}
