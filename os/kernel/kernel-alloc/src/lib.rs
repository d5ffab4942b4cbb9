//! # Kernel Memory Allocation
//!
//! Physical frames and kernel heap memory.
//!
//! ```text
//! ┌──────────────────────────────┐
//! │ KernelHeap (kmalloc)         │  bootstrap bump arena, then a
//! │                              │  section-tagged free list
//! └──────────────┬───────────────┘
//!                │ grows through HeapGrowth
//! ┌──────────────▼───────────────┐
//! │ HeapVmm                      │  maps fresh frames into the
//! │                              │  shared kernel range
//! └──────────────┬───────────────┘
//!                │
//! ┌──────────────▼───────────────┐
//! │ BitmapFrameAlloc             │  one bit per 4 KiB frame,
//! │   └── Bitmap                 │  lowest free frame first
//! └──────────────────────────────┘
//! ```
//!
//! The frame bitmap itself lives in the bootstrap arena
//! ([`BitmapFrameAlloc::new_in`]), which is why the heap comes up first.
//! Neither type locks; the kernel wraps each in its own spin lock.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod bitmap;
pub mod frame_alloc;
pub mod kmalloc;
pub mod vmm;

pub use bitmap::{Bitmap, BitmapError};
pub use frame_alloc::{BitmapFrameAlloc, FrameAllocError, FrameStats};
pub use kmalloc::{HEAP_ALIGN, HeapError, HeapGrowth, HeapMode, HeapStats, KernelHeap, NoGrowth};
pub use vmm::HeapVmm;
