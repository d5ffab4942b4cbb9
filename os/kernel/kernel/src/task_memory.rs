//! Per-task memory on behalf of system calls and the page-fault handler.

use crate::task::{BreakError, Pid};
use crate::{Cpu, Kernel, KernelError, SchedulerError};
use kernel_info::memory::{FRAME_SIZE, KERNEL_SPACE_START};
use kernel_memory_addresses::{FrameNumber, PhysicalAddress, VirtualAddress, align_up};
use kernel_vmem::address_space::is_user_address;
use kernel_vmem::{FaultOutcome, FrameAlloc, PageFaultError, PhysMapper, resolve_fault};
use log::{debug, trace, warn};

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Move `pid`'s break by `delta` bytes and return the previous break.
    ///
    /// Growth only moves the break; the pages are demand-paged on first touch.
    /// Shrinking unmaps and frees every page that lies wholly above the new break.
    ///
    /// # Errors
    /// - [`KernelError::InvalidArgument`] for a break below the heap start.
    /// - [`KernelError::OutOfMemory`] for a break past the heap limit.
    pub fn task_sbrk(&self, pid: Pid, delta: i32) -> Result<VirtualAddress, KernelError> {
        self.move_break(pid, |old| i64::from(old.as_u32()) + i64::from(delta))
            .map(|(old, _)| old)
    }

    /// `brk(2)`: `addr == 0` queries the break, anything else sets it.
    /// Returns the break now in effect.
    ///
    /// # Errors
    /// As [`task_sbrk`](Self::task_sbrk).
    pub fn task_brk(&self, pid: Pid, addr: u32) -> Result<VirtualAddress, KernelError> {
        if addr == 0 {
            return self.move_break(pid, |old| i64::from(old.as_u32())).map(|(old, _)| old);
        }
        self.move_break(pid, |_| i64::from(addr)).map(|(_, new)| new)
    }

    fn move_break(
        &self,
        pid: Pid,
        target: impl FnOnce(VirtualAddress) -> i64,
    ) -> Result<(VirtualAddress, VirtualAddress), KernelError> {
        let mut sched = self.lock_scheduler();
        let live = sched.current_pid() == Some(pid);
        let task = sched.get_mut(pid).ok_or(SchedulerError::NoSuchTask(pid))?;

        let old = task.memory.brk();
        let requested = target(old);
        if requested == i64::from(old.as_u32()) {
            return Ok((old, old));
        }
        let new = u64::try_from(requested)
            .map_err(|_| KernelError::InvalidArgument)
            .and_then(|brk| {
                task.memory.check_brk(brk).map_err(|e| match e {
                    BreakError::BelowStart => KernelError::InvalidArgument,
                    BreakError::AboveLimit => KernelError::OutOfMemory,
                })
            })?;

        if new < old {
            let start = align_up(new.as_u32(), FRAME_SIZE);
            let end = task.memory.heap_end().as_u32();
            let released = self.release_pages(task.directory, start, end, live);
            debug!("task {pid}: break {old} -> {new}, {released} pages released");
        } else {
            trace!("task {pid}: break {old} -> {new}");
        }
        task.memory.set_brk(new);
        Ok((old, new))
    }

    /// `munmap(2)`: drop every present page in `[addr, addr + len)`.
    ///
    /// # Errors
    /// [`KernelError::InvalidArgument`] for an unaligned `addr`, `len == 0`,
    /// or a range reaching into kernel space.
    pub fn task_munmap(&self, pid: Pid, addr: u32, len: u32) -> Result<(), KernelError> {
        let start = VirtualAddress::new(addr);
        if len == 0 || !start.is_page_aligned() {
            return Err(KernelError::InvalidArgument);
        }
        let end = u64::from(addr) + u64::from(len);
        if end > u64::from(KERNEL_SPACE_START) {
            return Err(KernelError::InvalidArgument);
        }
        // Bounded by KERNEL_SPACE_START, so both fit.
        let end = align_up(u32::try_from(end).map_err(|_| KernelError::InvalidArgument)?, FRAME_SIZE);

        let sched = self.lock_scheduler();
        let live = sched.current_pid() == Some(pid);
        let task = sched.get(pid).ok_or(SchedulerError::NoSuchTask(pid))?;
        let released = self.release_pages(task.directory, addr, end, live);
        debug!("task {pid}: munmap {start}+{len:#x} released {released} pages");
        Ok(())
    }

    /// Unmap and free the present pages in `[start, end)`, page aligned.
    /// Physical address of the 4-byte aligned user word at `addr`, if the
    /// directory at `root` maps it present, writable and user accessible.
    pub(crate) fn user_word(&self, root: FrameNumber, addr: VirtualAddress) -> Option<PhysicalAddress> {
        if !addr.as_u32().is_multiple_of(4) || !is_user_address(addr) {
            return None;
        }
        let space = self.space(root);
        let entry = space.entry(addr)?;
        if !(entry.present() && entry.writable() && entry.user()) {
            return None;
        }
        space.translate(addr)
    }

    /// Write an exit code into a waiting parent's memory.
    pub(crate) fn store_exit_code(&self, root: FrameNumber, addr: VirtualAddress, code: i32) {
        let Some(pa) = self.user_word(root, addr) else {
            warn!("exit status word {addr} is gone, dropping code {code}");
            return;
        };
        // SAFETY: the word is a mapped, aligned user page the kernel reaches through the mapper.
        unsafe { *self.mapper.phys_to_mut::<i32>(pa) = code };
    }

    fn release_pages(&self, root: FrameNumber, start: u32, end: u32, live: bool) -> usize {
        let space = self.space(root);
        let mut frames = self.lock_frames();
        let mut released = 0;
        for page in (start..end).step_by(FRAME_SIZE as usize) {
            let va = VirtualAddress::new(page);
            if !space.entry(va).is_some_and(|e| e.present()) {
                continue;
            }
            if let Ok(frame) = space.unmap_page(va) {
                FrameAlloc::free_frame(&mut *frames, frame);
                if live {
                    self.cpu.flush_page(va);
                }
                released += 1;
            }
        }
        released
    }

    /// Decide a page fault at `addr` in `pid`'s address space.
    ///
    /// The heap (up to the page holding the break) and the stack window are
    /// growth regions; a not-present fault in either gets a fresh zeroed page.
    ///
    /// # Errors
    /// [`SchedulerError::NoSuchTask`].
    pub fn task_page_fault_cb(
        &self,
        pid: Pid,
        addr: VirtualAddress,
        error: PageFaultError,
    ) -> Result<FaultOutcome, KernelError> {
        let sched = self.lock_scheduler();
        let task = sched.get(pid).ok_or(SchedulerError::NoSuchTask(pid))?;
        let regions = task.memory.growth_regions();
        let mut frames = self.lock_frames();
        Ok(resolve_fault(
            &self.space(task.directory),
            &mut *frames,
            &regions,
            addr,
            error,
        ))
    }
}
