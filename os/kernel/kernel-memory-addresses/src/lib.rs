//! # Virtual and Physical Memory Address Types (i386)
//!
//! Strongly typed wrappers for the raw 32-bit addresses used by the paging,
//! frame allocation and task code.
//!
//! ## Overview
//!
//! | Type | Meaning |
//! |------|---------|
//! | [`VirtualAddress`] | An address translated by the page tables. |
//! | [`PhysicalAddress`] | An address in physical RAM (or MMIO). |
//! | [`FrameNumber`] | The index of a 4 KiB physical frame (`pa >> 12`). |
//!
//! Frames are referred to by [`FrameNumber`] wherever ownership matters. A page
//! table entry stores the frame number, not a pointer, which keeps "who owns this
//! frame" an explicit relation between the entry and the frame allocator.
//!
//! ## Two-level Split
//!
//! ```text
//! | 31‒22     | 21‒12 | 11‒0   |
//! | Directory | Table | Offset |
//! ```
//!
//! ```rust
//! # use kernel_memory_addresses::*;
//! let va = VirtualAddress::new(0xC040_1234);
//! assert_eq!(va.directory_index(), 0x301);
//! assert_eq!(va.table_index(), 0x001);
//! assert_eq!(va.page_offset(), 0x234);
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(clippy::inline_always)]

mod frame_number;
mod physical_address;
mod virtual_address;

pub use crate::frame_number::FrameNumber;
pub use crate::physical_address::PhysicalAddress;
pub use crate::virtual_address::VirtualAddress;

/// Size of a page / frame in bytes.
pub const PAGE_SIZE: u32 = 4096;

/// `log2(PAGE_SIZE)`.
pub const PAGE_SHIFT: u32 = 12;

/// Align `x` down to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two.
///
/// ```rust
/// # use kernel_memory_addresses::align_down;
/// assert_eq!(align_down(0,    4096), 0);
/// assert_eq!(align_down(4095, 4096), 0);
/// assert_eq!(align_down(8191, 4096), 4096);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_down(x: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    x & !(a - 1)
}

/// Align `x` up to the nearest multiple of `a`.
///
/// `a` must be a non-zero power of two and `x + (a - 1)` must not overflow.
/// Use [`checked_align_up`] near the top of the address space.
///
/// ```rust
/// # use kernel_memory_addresses::align_up;
/// assert_eq!(align_up(0,    4096), 0);
/// assert_eq!(align_up(1,    4096), 4096);
/// assert_eq!(align_up(4097, 4096), 8192);
/// ```
#[inline(always)]
#[must_use]
pub const fn align_up(x: u32, a: u32) -> u32 {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}

/// Like [`align_up`], but returns `None` instead of wrapping past `u32::MAX`.
///
/// ```rust
/// # use kernel_memory_addresses::checked_align_up;
/// assert_eq!(checked_align_up(0xFFFF_F001, 4096), None);
/// assert_eq!(checked_align_up(0xFFFF_E001, 4096), Some(0xFFFF_F000));
/// ```
#[inline]
#[must_use]
pub const fn checked_align_up(x: u32, a: u32) -> Option<u32> {
    debug_assert!(a.is_power_of_two());
    match x.checked_add(a - 1) {
        Some(v) => Some(v & !(a - 1)),
        None => None,
    }
}

/// [`align_up`] for `usize` quantities (heap offsets and byte counts).
#[inline(always)]
#[must_use]
pub const fn align_up_usize(x: usize, a: usize) -> usize {
    debug_assert!(a.is_power_of_two());
    (x + a - 1) & !(a - 1)
}
