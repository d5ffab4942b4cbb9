//! # Task Limits

/// Number of slots in the scheduler's task table.
pub const TASK_TABLE_CAPACITY: usize = 16;

/// Maximum length of a task name in bytes.
pub const TASK_NAME_MAX: usize = 64;

const _: () = {
    assert!(TASK_TABLE_CAPACITY > 0);
    assert!(TASK_NAME_MAX > 0);
};
