//! # Kernel logging

use crate::{Cpu, Kernel};
use kernel_qemu::QemuLogger;
use kernel_vmem::PhysMapper;
use log::{LevelFilter, SetLoggerError, info};

static LOGGER: QemuLogger = QemuLogger::new(LevelFilter::Trace);

/// Route `log` records to the debug console, up to `level`.
///
/// # Errors
/// If a logger is already installed.
pub fn init_logging(level: LevelFilter) -> Result<(), SetLoggerError> {
    LOGGER.install()?;
    log::set_max_level(level);
    Ok(())
}

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// One line each on frame and heap usage.
    pub fn log_memory_summary(&self) {
        let frames = self.frame_stats();
        info!(
            "frames: {} total, {} used, {} free",
            frames.total, frames.used, frames.free
        );
        let heap = self.heap_stats();
        info!(
            "kernel heap: {} of {} bytes backed, {} used in {} sections, {} free",
            heap.backed, heap.reserved, heap.used, heap.sections, heap.free
        );
    }
}
