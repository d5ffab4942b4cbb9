//! # Page-fault resolution
//!
//! `#PF` pushes an error code and leaves the faulting address in CR2. The
//! handler asks [`resolve_fault`] what to do with it:
//!
//! 1. A not-present fault inside one of the task's [`GrowthRegion`]s (heap
//!    below the break, stack window) gets one fresh zeroed page, mapped
//!    writable and user. The access is retried.
//! 2. Everything else is [`FaultOutcome::Fatal`]. Protection faults land here
//!    as well; pages are never shared copy-on-write.

use crate::address_space::{is_user_address, MapFlags};
use crate::{AddressSpace, FrameAlloc, PhysMapper};
use bitfield_struct::bitfield;
use kernel_memory_addresses::VirtualAddress;

/// Error code pushed by the CPU for `#PF`.
#[bitfield(u32)]
pub struct PageFaultError {
    /// Set: protection violation on a present page. Clear: page not present.
    pub present: bool,

    /// The access was a write.
    pub write: bool,

    /// The access came from ring 3.
    pub user: bool,

    /// A reserved bit was set in a paging entry.
    pub reserved_bit: bool,

    /// The access was an instruction fetch.
    pub instruction_fetch: bool,

    #[bits(27)]
    _reserved: u32,
}

/// A half-open range `[start, end)` a task may grow into on demand.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct GrowthRegion {
    pub start: VirtualAddress,
    pub end: VirtualAddress,
}

impl GrowthRegion {
    #[must_use]
    pub const fn new(start: VirtualAddress, end: VirtualAddress) -> Self {
        Self { start, end }
    }

    #[must_use]
    pub const fn contains(&self, va: VirtualAddress) -> bool {
        va.as_u32() >= self.start.as_u32() && va.as_u32() < self.end.as_u32()
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.end.as_u32() <= self.start.as_u32()
    }
}

/// Why a fault cannot be resolved.
#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum FatalFault {
    #[error("protection violation on a present page")]
    Protection,
    #[error("reserved bit set in a paging entry")]
    Reserved,
    #[error("address outside every growth region")]
    OutsideGrowthRegion,
    #[error("fault on a kernel address")]
    KernelAddress,
    #[error("no frame left to back the page")]
    OutOfMemory,
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum FaultOutcome {
    /// A page was mapped; retry the access.
    Resolved,
    /// The faulting context cannot continue.
    Fatal(FatalFault),
}

/// Decide a fault at `addr` in `space`, mapping a page if it is legitimate growth.
pub fn resolve_fault<M: PhysMapper, A: FrameAlloc>(
    space: &AddressSpace<'_, M>,
    alloc: &mut A,
    regions: &[GrowthRegion],
    addr: VirtualAddress,
    error: PageFaultError,
) -> FaultOutcome {
    if error.reserved_bit() {
        return FaultOutcome::Fatal(FatalFault::Reserved);
    }
    if error.present() {
        return FaultOutcome::Fatal(FatalFault::Protection);
    }
    if !is_user_address(addr) {
        return FaultOutcome::Fatal(FatalFault::KernelAddress);
    }
    if !regions.iter().any(|r| r.contains(addr)) {
        return FaultOutcome::Fatal(FatalFault::OutsideGrowthRegion);
    }

    let Some(frame) = alloc.alloc_frame() else {
        return FaultOutcome::Fatal(FatalFault::OutOfMemory);
    };
    unsafe { crate::zero_frame(space.mapper(), frame) };

    let page = addr.page_base();
    if let Err(e) = space.map_page(alloc, page, frame, MapFlags::USER_RW) {
        log::warn!("demand page at {page} failed: {e}");
        alloc.free_frame(frame);
        return FaultOutcome::Fatal(FatalFault::OutOfMemory);
    }
    log::debug!("demand-mapped {page} -> {frame}");
    FaultOutcome::Resolved
}
