/// System call numbers. These follow the Linux i386 table where a call exists there.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash)]
#[repr(u32)]
pub enum Sysno {
    /// Terminate the calling task. Does not return.
    Exit = 1,
    /// Duplicate the calling task. Returns the child pid to the parent and 0 to the child.
    Fork = 2,
    /// Collect an exited child: `waitpid(pid, stat_loc, options)`.
    /// Returns the child's pid and stores its exit code at `stat_loc`.
    WaitPid = 7,
    GetPid = 20,
    /// Set the program break; `0` queries it.
    Brk = 45,
    GetPpid = 64,
    /// Drop the pages of `[addr, addr + len)`.
    Munmap = 91,
    /// Give up the rest of the time slice.
    SchedYield = 158,
}

impl Sysno {
    #[must_use]
    pub const fn from_u32(n: u32) -> Option<Self> {
        Some(match n {
            1 => Self::Exit,
            2 => Self::Fork,
            7 => Self::WaitPid,
            20 => Self::GetPid,
            45 => Self::Brk,
            64 => Self::GetPpid,
            91 => Self::Munmap,
            158 => Self::SchedYield,
            _ => return None,
        })
    }

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Exit => "exit",
            Self::Fork => "fork",
            Self::WaitPid => "waitpid",
            Self::GetPid => "getpid",
            Self::Brk => "brk",
            Self::GetPpid => "getppid",
            Self::Munmap => "munmap",
            Self::SchedYield => "sched_yield",
        }
    }
}

impl core::fmt::Display for Sysno {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}
