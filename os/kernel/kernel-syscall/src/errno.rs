/// Error numbers reported to user mode in `ebx`.
#[derive(Debug, Copy, Clone, Eq, PartialEq, Hash, thiserror::Error)]
#[allow(clippy::upper_case_acronyms)]
pub enum Errno {
    #[error("operation not permitted")]
    EPERM,
    #[error("no such process")]
    ESRCH,
    #[error("no child processes")]
    ECHILD,
    #[error("resource temporarily unavailable")]
    EAGAIN,
    #[error("cannot allocate memory")]
    ENOMEM,
    #[error("bad address")]
    EFAULT,
    #[error("invalid argument")]
    EINVAL,
    #[error("function not implemented")]
    ENOSYS,
    /// A code this kernel does not produce.
    #[error("unknown error {0}")]
    Other(u32),
}

impl Errno {
    #[must_use]
    pub const fn code(self) -> u32 {
        match self {
            Self::EPERM => 1,
            Self::ESRCH => 3,
            Self::ECHILD => 10,
            Self::EAGAIN => 11,
            Self::ENOMEM => 12,
            Self::EFAULT => 14,
            Self::EINVAL => 22,
            Self::ENOSYS => 38,
            Self::Other(code) => code,
        }
    }

    #[must_use]
    pub const fn from_code(code: u32) -> Self {
        match code {
            1 => Self::EPERM,
            3 => Self::ESRCH,
            10 => Self::ECHILD,
            11 => Self::EAGAIN,
            12 => Self::ENOMEM,
            14 => Self::EFAULT,
            22 => Self::EINVAL,
            38 => Self::ENOSYS,
            other => Self::Other(other),
        }
    }
}
