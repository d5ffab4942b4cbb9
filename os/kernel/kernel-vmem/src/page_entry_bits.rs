use bitfield_struct::bitfield;
use kernel_memory_addresses::FrameNumber;

/// A single 32-bit i386 paging entry, directory (PDE) or table (PTE).
///
/// Both levels share one layout when 4 MiB pages are not used:
///
/// | Bits  | Name   | Meaning |
/// |-------|--------|---------|
/// | 0     | `P`    | Present |
/// | 1     | `RW`   | Writable if set |
/// | 2     | `US`   | User-mode accessible if set |
/// | 3     | `PWT`  | Write-through caching |
/// | 4     | `PCD`  | Disable caching |
/// | 5     | `A`    | Accessed (set by the CPU) |
/// | 6     | `D`    | Dirty (PTE only, set by the CPU) |
/// | 7     | `PS`   | 4 MiB page in a PDE; must stay 0 here |
/// | 8     | `G`    | Global (PTE only, needs CR4.PGE) |
/// | 9–11  | avail  | Ignored by hardware |
/// | 12–31 | frame  | Physical frame number |
///
/// Permissions are the intersection over the walk: a PTE marked user is only
/// reachable from ring 3 if its PDE is marked user too.
///
/// ```rust
/// # use kernel_vmem::PageEntryBits;
/// # use kernel_memory_addresses::FrameNumber;
/// let e = PageEntryBits::new()
///     .with_present(true)
///     .with_writable(true)
///     .with_frame(FrameNumber::new(0x123));
/// assert_eq!(e.into_bits(), 0x0012_3003);
/// ```
#[bitfield(u32)]
pub struct PageEntryBits {
    /// Present (P, bit 0).
    pub present: bool,

    /// Writable (RW, bit 1).
    pub writable: bool,

    /// User/Supervisor (US, bit 2).
    pub user: bool,

    /// Page Write-Through (PWT, bit 3).
    pub write_through: bool,

    /// Page Cache Disable (PCD, bit 4).
    pub cache_disabled: bool,

    /// Accessed (A, bit 5).
    pub accessed: bool,

    /// Dirty (D, bit 6).
    pub dirty: bool,

    /// Page Size (PS, bit 7).
    pub large_page: bool,

    /// Global (G, bit 8).
    pub global: bool,

    /// OS-available (bits 9..=11).
    #[bits(3)]
    pub available: u8,

    /// Physical frame number (bits 12..=31).
    #[bits(20)]
    frame_bits: u32,
}

impl PageEntryBits {
    /// The frame this entry points at (table frame for a PDE, page for a PTE).
    #[inline]
    #[must_use]
    pub const fn frame(&self) -> FrameNumber {
        FrameNumber::new(self.frame_bits())
    }

    #[inline]
    #[must_use]
    pub const fn with_frame(self, frame: FrameNumber) -> Self {
        self.with_frame_bits(frame.as_u32())
    }

    /// Directory entry linking a page table.
    ///
    /// User-range links are always present, writable and user so that the
    /// leaf entry alone decides the effective permission.
    #[inline]
    #[must_use]
    pub const fn table_link(table: FrameNumber, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(true)
            .with_user(user)
            .with_frame(table)
    }

    /// Leaf entry mapping one 4 KiB page.
    #[inline]
    #[must_use]
    pub const fn page(frame: FrameNumber, writable: bool, user: bool) -> Self {
        Self::new()
            .with_present(true)
            .with_writable(writable)
            .with_user(user)
            .with_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_link_is_permissive() {
        let e = PageEntryBits::table_link(FrameNumber::new(7), true);
        assert_eq!(e.into_bits(), 0x7007);
        assert_eq!(e.frame(), FrameNumber::new(7));
        assert!(!PageEntryBits::table_link(FrameNumber::new(7), false).user());
    }

    #[test]
    fn read_only_page_clears_rw() {
        let e = PageEntryBits::page(FrameNumber::new(0xFFFFF), false, true);
        assert!(e.present() && e.user() && !e.writable());
        assert_eq!(e.into_bits(), 0xFFFF_F005);
        assert!(!e.large_page());
    }
}
