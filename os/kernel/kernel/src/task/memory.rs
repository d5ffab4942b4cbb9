//! Per-task user memory layout: a heap growing up from `heap_start` to the
//! break, and a stack window growing down from [`TASK_STACK_TOP`].

use kernel_info::memory::{FRAME_SIZE, TASK_HEAP_LIMIT, TASK_STACK_FLOOR, TASK_STACK_TOP};
use kernel_memory_addresses::{VirtualAddress, align_up};
use kernel_vmem::GrowthRegion;

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct TaskMemory {
    heap_start: VirtualAddress,
    brk: VirtualAddress,
}

impl TaskMemory {
    #[must_use]
    pub const fn new(heap_start: VirtualAddress) -> Self {
        Self {
            heap_start,
            brk: heap_start,
        }
    }

    /// Whether `heap_start` can anchor a task heap.
    #[must_use]
    pub const fn valid_heap_start(heap_start: VirtualAddress) -> bool {
        heap_start.is_page_aligned()
            && heap_start.as_u32() >= FRAME_SIZE
            && heap_start.as_u32() < TASK_HEAP_LIMIT
    }

    #[must_use]
    pub const fn heap_start(&self) -> VirtualAddress {
        self.heap_start
    }

    /// Current program break (first byte past the heap).
    #[must_use]
    pub const fn brk(&self) -> VirtualAddress {
        self.brk
    }

    /// End of the page that holds the last heap byte.
    #[must_use]
    pub const fn heap_end(&self) -> VirtualAddress {
        VirtualAddress::new(align_up(self.brk.as_u32(), FRAME_SIZE))
    }

    /// Regions a not-present fault may demand-page.
    #[must_use]
    pub const fn growth_regions(&self) -> [GrowthRegion; 2] {
        [
            GrowthRegion::new(self.heap_start, self.heap_end()),
            GrowthRegion::new(
                VirtualAddress::new(TASK_STACK_FLOOR),
                VirtualAddress::new(TASK_STACK_TOP),
            ),
        ]
    }

    /// Check a new break against the heap bounds.
    pub(crate) fn check_brk(&self, brk: u64) -> Result<VirtualAddress, BreakError> {
        if brk < u64::from(self.heap_start.as_u32()) {
            return Err(BreakError::BelowStart);
        }
        if brk > u64::from(TASK_HEAP_LIMIT) {
            return Err(BreakError::AboveLimit);
        }
        u32::try_from(brk)
            .map(VirtualAddress::new)
            .map_err(|_| BreakError::AboveLimit)
    }

    pub(crate) const fn set_brk(&mut self, brk: VirtualAddress) {
        self.brk = brk;
    }
}

#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub(crate) enum BreakError {
    BelowStart,
    AboveLimit,
}
