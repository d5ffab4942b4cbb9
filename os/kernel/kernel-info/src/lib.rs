//! # Kernel Configuration and Boot Interface
//!
//! This crate is the single source of truth for the memory layout constants,
//! task limits and boot handoff record shared by the allocator, paging and
//! scheduling crates.
//!
//! ## Modules
//!
//! ### Memory Layout ([`memory`])
//! * **Kernel space**: the shared upper region every page directory maps identically.
//! * **Task layout**: heap start, stack window and heap limit for user tasks.
//! * **Kernel heap**: size of the bootstrap arena and per-task kernel stacks.
//!
//! ### Task Limits ([`tasks`])
//! * Capacity of the fixed task table and the maximum task name length.
//!
//! ### Boot Configuration ([`boot`])
//! * [`BootConfig`](boot::BootConfig): what the boot collaborator reports about
//!   installed memory and where the kernel heap lives.
//!
//! ## Virtual Memory Layout
//!
//! ```text
//! Virtual Address Space Layout (32-bit):
//!
//! 0x0000_0000          ┌─────────────────────────────────┐
//!                      │      Unmapped (null guard)      │
//! TASK_HEAP_START      ├─────────────────────────────────┤ 0x0040_0000
//!                      │   Task heap (grows up, brk)     │
//! TASK_HEAP_LIMIT      ├─────────────────────────────────┤
//!                      │          Guard page             │
//! TASK_STACK_FLOOR     ├─────────────────────────────────┤
//!                      │   Task stack (grows down)       │
//! TASK_STACK_TOP       ├─────────────────────────────────┤ 0xC000_0000
//! KERNEL_SPACE_START   │  Kernel image + bootstrap heap  │
//!                      │  Kernel heap (grows on demand)  │
//! KERNEL_SPACE_END     ├─────────────────────────────────┤ 0xC400_0000
//!                      │           Unused                │
//! 0xFFFF_FFFF          └─────────────────────────────────┘
//! ```
//!
//! The kernel image and the bootstrap heap sit at a fixed offset: the kernel
//! virtual address of physical address `pa` is `KERNEL_SPACE_START + pa`.
//! Heap pages added later get whatever frame is free; other frames are
//! reached through the platform's physical-memory mapper.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

pub mod boot;
pub mod memory;
pub mod tasks;
