//! # Kernel synchronization primitives
//!
//! The kernel runs on a single core; "concurrency" means interleaving task
//! code with interrupt handlers. Two tools cover that:
//!
//! * [`SpinLock`]: exclusive access to a subsystem (frame bitmap, kernel heap,
//!   task table). Contended acquisition calls a [`Relax`] step between
//!   attempts, which lets a caller hand the CPU to the scheduler instead of
//!   burning its time slice.
//! * [`IrqGuard`]: masks interrupts for a critical section and restores the
//!   previous state on drop. The interrupt flag itself is behind the
//!   [`InterruptFlag`] trait so the same code runs on hardware and in tests.

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

pub mod irq;
mod spin_lock;

#[cfg(target_arch = "x86")]
pub use irq::CpuInterrupts;
pub use irq::{InterruptFlag, IrqGuard, IrqSpinLockGuard};
pub use spin_lock::{Relax, Spin, SpinLock, SpinLockGuard};
