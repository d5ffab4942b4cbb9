use crate::{PAGE_SHIFT, PhysicalAddress};
use core::fmt;

/// Index of a 4 KiB physical frame.
///
/// Frame `n` covers the physical bytes `[n * 4096, (n + 1) * 4096)`. The frame
/// allocator hands these out and page-table entries store them; neither side
/// holds a pointer into the frame.
#[repr(transparent)]
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct FrameNumber(u32);

impl FrameNumber {
    /// Largest frame number representable in a 32-bit physical address space.
    pub const MAX: Self = Self(u32::MAX >> PAGE_SHIFT);

    #[inline]
    #[must_use]
    pub const fn new(n: u32) -> Self {
        debug_assert!(n <= Self::MAX.0);
        Self(n)
    }

    /// The frame containing `pa`.
    #[inline]
    #[must_use]
    pub const fn containing(pa: PhysicalAddress) -> Self {
        Self(pa.as_u32() >> PAGE_SHIFT)
    }

    #[inline]
    #[must_use]
    pub const fn as_u32(self) -> u32 {
        self.0
    }

    #[inline]
    #[must_use]
    pub const fn as_usize(self) -> usize {
        self.0 as usize
    }

    /// Physical address of the first byte in this frame.
    #[inline]
    #[must_use]
    pub const fn base(self) -> PhysicalAddress {
        PhysicalAddress::new(self.0 << PAGE_SHIFT)
    }
}

impl fmt::Debug for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Frame({:#x})", self.0)
    }
}

impl fmt::Display for FrameNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#x}", self.0)
    }
}

impl From<PhysicalAddress> for FrameNumber {
    #[inline]
    fn from(value: PhysicalAddress) -> Self {
        Self::containing(value)
    }
}
