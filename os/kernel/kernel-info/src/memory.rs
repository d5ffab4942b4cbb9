//! # Memory Layout

/// Size of a physical frame / virtual page.
pub const FRAME_SIZE: u32 = 4096;

/// Number of entries in a page directory or page table.
pub const ENTRIES_PER_TABLE: usize = 1024;

/// Bytes covered by a single page directory entry (one page table).
pub const TABLE_SPAN: u32 = FRAME_SIZE * ENTRIES_PER_TABLE as u32;

/// First address of the kernel region shared by every page directory.
pub const KERNEL_SPACE_START: u32 = 0xC000_0000;

/// End (exclusive) of the kernel region shared by every page directory.
///
/// Page tables for this whole range are allocated once at boot so that task
/// directories can share them.
pub const KERNEL_SPACE_END: u32 = 0xC400_0000;

/// Size of the physically contiguous bootstrap arena at the start of the kernel heap.
pub const BOOTSTRAP_HEAP_BYTES: usize = 256 * 1024;

/// Size of the kernel stack allocated for every task.
pub const KERNEL_STACK_SIZE: usize = 8 * 1024;

/// Default start of a user task's heap (`brk` region).
pub const TASK_HEAP_START: u32 = 0x0040_0000;

/// Highest address a user task's stack may use (exclusive).
pub const TASK_STACK_TOP: u32 = KERNEL_SPACE_START;

/// Maximum number of pages a user task's stack may grow to.
pub const TASK_STACK_MAX_PAGES: u32 = 512;

/// Lowest address of the stack window.
pub const TASK_STACK_FLOOR: u32 = TASK_STACK_TOP - TASK_STACK_MAX_PAGES * FRAME_SIZE;

/// Highest address the task heap may reach; one guard page below the stack window.
pub const TASK_HEAP_LIMIT: u32 = TASK_STACK_FLOOR - FRAME_SIZE;

/// Kernel virtual address of physical address `pa`.
#[inline]
#[must_use]
pub const fn kernel_virt(pa: u32) -> u32 {
    KERNEL_SPACE_START + pa
}

const _: () = {
    assert!(KERNEL_SPACE_START.is_multiple_of(TABLE_SPAN));
    assert!(KERNEL_SPACE_END.is_multiple_of(TABLE_SPAN));
    assert!(KERNEL_SPACE_END > KERNEL_SPACE_START);
    assert!(BOOTSTRAP_HEAP_BYTES.is_multiple_of(FRAME_SIZE as usize));
    assert!(KERNEL_STACK_SIZE.is_multiple_of(FRAME_SIZE as usize));
    assert!(TASK_HEAP_START < TASK_HEAP_LIMIT);
    assert!(TASK_STACK_TOP <= KERNEL_SPACE_START);
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stack_window_sits_below_kernel_space() {
        assert_eq!(TASK_STACK_TOP - TASK_STACK_FLOOR, 512 * 4096);
        assert_eq!(TASK_HEAP_LIMIT + FRAME_SIZE, TASK_STACK_FLOOR);
        assert_eq!(kernel_virt(0x0010_0000), 0xC010_0000);
    }

    #[test]
    fn kernel_space_spans_whole_tables() {
        let tables = (KERNEL_SPACE_END - KERNEL_SPACE_START) / TABLE_SPAN;
        assert_eq!(tables, 16);
    }
}
