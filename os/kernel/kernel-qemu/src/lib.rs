//! # QEMU debug console output
//!
//! Kernel log output for guests running under QEMU. Bytes written to the
//! debug console I/O port show up on the host, which makes this usable from
//! the very first instruction of boot: no heap, no paging and no interrupts
//! are needed.
//!
//! ```text
//! log::info!(..) ──► QemuLogger ──► TraceSink ──► outb 0xE9 ──► -debugcon
//! qemu_trace!(..) ───────────────┘
//! ```
//!
//! Capture the output on the host with:
//!
//! ```bash
//! qemu-system-i386 -kernel xelix.bin -debugcon stdio
//! ```
//!
//! ## Sinks
//!
//! Output goes through the [`TraceSink`] trait. [`DebugconSink`] is the
//! hardware port; it compiles to a no-op on targets other than `x86` and when
//! the `enabled` feature is off. Host tests plug in a capturing sink instead.
//!
//! ## Logger
//!
//! [`QemuLogger`] implements [`log::Log`] on top of a sink and formats every
//! record as `"[LEVEL] target: message\n"`:
//!
//! ```rust,no_run
//! use kernel_qemu::QemuLogger;
//! use log::LevelFilter;
//!
//! static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Debug);
//!
//! LOGGER.install().expect("logger installed twice");
//! log::info!("frame allocator online");
//! ```

#![cfg_attr(not(any(test, doctest)), no_std)]
#![allow(unsafe_code)]

mod logger;

pub use logger::QemuLogger;

use core::fmt::{self, Write};

/// Port watched by QEMU's `-debugcon` device (Bochs `e9` hack).
pub const DEBUGCON_PORT: u16 = 0xE9;

/// Destination for formatted trace output.
pub trait TraceSink: Send + Sync {
    /// Writes pre-formatted arguments. Output is best-effort; errors are dropped.
    fn write_args(&self, args: fmt::Arguments<'_>);
}

/// Writes to [`DEBUGCON_PORT`].
#[derive(Debug, Default, Clone, Copy)]
pub struct DebugconSink;

impl DebugconSink {
    #[allow(clippy::inline_always)]
    #[inline(always)]
    fn putc(c: u8) {
        #[cfg(all(feature = "enabled", target_arch = "x86"))]
        unsafe {
            core::arch::asm!(
                "out dx, al",
                in("dx") DEBUGCON_PORT,
                in("al") c,
                options(nomem, nostack, preserves_flags)
            );
        }
        #[cfg(not(all(feature = "enabled", target_arch = "x86")))]
        let _ = c;
    }
}

/// Byte-level writer used by [`DebugconSink`].
struct PortWriter;

impl Write for PortWriter {
    #[inline]
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for b in s.bytes() {
            DebugconSink::putc(b);
        }
        Ok(())
    }
}

impl TraceSink for DebugconSink {
    #[inline]
    fn write_args(&self, args: fmt::Arguments<'_>) {
        let _ = fmt::write(&mut PortWriter, args);
    }
}

#[doc(hidden)]
#[inline]
pub fn trace_write(args: fmt::Arguments<'_>) {
    DebugconSink.write_args(args);
}

/// Raw output to the debug console, bypassing the logger and its level filter.
///
/// Meant for the paths where `log` may not be usable: before the logger is
/// installed, and inside fatal fault handlers.
#[macro_export]
macro_rules! qemu_trace {
    ($($arg:tt)*) => {{
        $crate::trace_write(core::format_args!($($arg)*));
    }};
}
