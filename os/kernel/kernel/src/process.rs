//! Task lifecycle: create, fork, exit, and the scheduling entry points.

use crate::scheduler::Dispatch;
use crate::syscall::write_result;
use crate::task::{
    ExitStatus, KernelStack, Pid, Registers, Task, TaskEntry, TaskInfo, TaskMemory, TaskName, TaskState, WaitFor,
};
use crate::{Cpu, Kernel, KernelError, SchedulerError};
use kernel_info::memory::KERNEL_STACK_SIZE;
use kernel_memory_addresses::{FrameNumber, VirtualAddress};
use kernel_sync::IrqGuard;
use kernel_vmem::address_space::is_user_address;
use kernel_vmem::{AddressSpace, FrameAlloc, MapFlags, PageEntryBits, PhysMapper, copy_frame, zero_frame};
use log::{debug, info, trace, warn};

/// How a [`Kernel::wait_task`] call ended.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum WaitOutcome {
    /// A child had already exited; its slot is free again.
    Collected(ExitStatus),
    /// Matching children exist but none has exited, and the caller would not block.
    Running,
    /// The caller sleeps until a child exits; resume with this dispatch.
    Blocked(Dispatch),
}

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Create a task with a fresh directory and kernel stack and make it runnable.
    ///
    /// # Errors
    /// - [`SchedulerError::TableFull`] when every slot is taken.
    /// - [`KernelError::InvalidArgument`] for a user heap start that is not a
    ///   page-aligned user address.
    /// - Out of memory for the stack or the directory; nothing is leaked.
    pub fn create_task(&self, name: &str, entry: TaskEntry) -> Result<Pid, KernelError> {
        if let TaskEntry::User { heap_start, .. } = entry
            && !TaskMemory::valid_heap_start(heap_start)
        {
            return Err(KernelError::InvalidArgument);
        }
        let name = TaskName::new(name);
        let memory = TaskMemory::new(entry.heap_start());

        let pid = self.lock_scheduler().spawn(|pid| {
            self.build_task(pid, None, name, memory, |stack| {
                #[allow(clippy::cast_possible_truncation)]
                let top = stack.top() as u32;
                entry.initial_registers(top)
            })
        })?;
        info!("created task {pid} ({name}) at {entry:?}");
        Ok(pid)
    }

    /// Clone `parent` into a new task that resumes from `frame` with `eax = 0`.
    ///
    /// Every present user page is copied into a fresh frame. Returns the
    /// child's pid, which the caller hands to the parent.
    ///
    /// # Errors
    /// - [`SchedulerError::TableFull`] (`EAGAIN`) or out of memory (`ENOMEM`);
    ///   the partial child is torn down again.
    /// - [`KernelError::InvalidArgument`] if `frame` was not taken in user mode.
    pub fn fork_task(&self, parent: Pid, frame: &Registers) -> Result<Pid, KernelError> {
        if !frame.from_user() {
            return Err(KernelError::InvalidArgument);
        }
        let mut sched = self.lock_scheduler();
        let source = sched.get(parent).ok_or(SchedulerError::NoSuchTask(parent))?;
        let (name, memory, source_dir) = (source.name, source.memory, source.directory);

        let mut regs = *frame;
        regs.eax = 0;
        let child = sched.spawn(|pid| {
            let task = self.build_task(pid, Some(parent), name, memory, |_| regs)?;
            match self.copy_user_pages(source_dir, task.directory) {
                Ok(pages) => {
                    debug!("fork of {parent}: copied {pages} pages into {pid}");
                    Ok(task)
                }
                Err(e) => {
                    warn!("fork of {parent} failed: {e}");
                    self.discard(task);
                    Err(e)
                }
            }
        })?;
        info!("task {parent} forked {child}");
        Ok(child)
    }

    /// Kernel stack, directory and initial frame for `pid`.
    fn build_task(
        &self,
        pid: Pid,
        parent: Option<Pid>,
        name: TaskName,
        memory: TaskMemory,
        regs: impl FnOnce(&KernelStack) -> Registers,
    ) -> Result<Task, KernelError> {
        let stack = KernelStack::new(self.kmalloc(KERNEL_STACK_SIZE)?, KERNEL_STACK_SIZE);
        let directory = {
            let mut frames = self.lock_frames();
            AddressSpace::new_directory(&self.mapper, &mut *frames, &self.kernel_space())
                .map(|space| space.root())
        };
        let directory = match directory {
            Ok(root) => root,
            Err(e) => {
                self.free_kernel_stack(stack);
                return Err(e.into());
            }
        };
        Ok(Task {
            pid,
            parent,
            name,
            regs: regs(&stack),
            state: TaskState::Runnable,
            directory,
            memory,
            kernel_stack: stack,
        })
    }

    fn copy_user_pages(&self, from: FrameNumber, to: FrameNumber) -> Result<usize, KernelError> {
        let (source, target) = (self.space(from), self.space(to));
        let mut frames = self.lock_frames();
        let mut copied = 0;
        let mut failure = None;
        source.for_each_user_page(|va, pte| {
            if failure.is_some() {
                return;
            }
            match self.copy_page(&target, &mut *frames, va, pte) {
                Ok(()) => copied += 1,
                Err(e) => failure = Some(e),
            }
        });
        failure.map_or(Ok(copied), Err)
    }

    fn copy_page<A: FrameAlloc>(
        &self,
        target: &AddressSpace<'_, M>,
        frames: &mut A,
        va: VirtualAddress,
        pte: PageEntryBits,
    ) -> Result<(), KernelError> {
        let frame = frames.alloc_frame().ok_or(KernelError::OutOfMemory)?;
        unsafe { copy_frame(&self.mapper, pte.frame(), frame) };
        let flags = if pte.writable() { MapFlags::USER_RW } else { MapFlags::USER_RO };
        if let Err(e) = target.map_page(frames, va, frame, flags) {
            frames.free_frame(frame);
            return Err(e.into());
        }
        Ok(())
    }

    /// Tear down a task that never made it into the table.
    fn discard(&self, task: Task) {
        {
            let mut frames = self.lock_frames();
            self.space(task.directory).destroy(&mut *frames);
        }
        self.free_kernel_stack(task.kernel_stack);
    }

    pub(crate) fn free_kernel_stack(&self, stack: KernelStack) {
        if let Err(e) = self.kfree(stack.base()) {
            warn!("cannot free kernel stack at {:p}: {e}", stack.base());
        }
    }

    /// End `pid` with `code` and release its directory, pages and kernel stack.
    ///
    /// If `pid` is running, the next task (or the idle context) is chosen and
    /// its directory loaded before the old one is destroyed. The old kernel
    /// stack is still in use then and is freed on the next timer tick.
    ///
    /// A parent blocked in `waitpid` for this task receives the pid and `code`
    /// right away; any other parent can collect them later with
    /// [`wait_task`](Self::wait_task).
    ///
    /// # Errors
    /// [`SchedulerError::NoSuchTask`].
    pub fn exit_task(&self, pid: Pid, code: i32) -> Result<Dispatch, KernelError> {
        let mut sched = self.lock_scheduler();
        let was_current = sched.current_pid() == Some(pid);
        let (task, wakeup) = sched.exit(pid, code)?;

        if let Some(wakeup) = wakeup {
            if let Some(addr) = wakeup.status {
                self.store_exit_code(wakeup.directory, addr, code);
            }
            if let Some(parent) = sched.get_mut(wakeup.parent) {
                write_result(&mut parent.regs, Ok(pid.as_u32()));
            }
        }

        let dispatch = if was_current {
            let next = sched.reschedule();
            self.activate_for(&next);
            next
        } else {
            Dispatch::Stay
        };

        let released = {
            let mut frames = self.lock_frames();
            self.space(task.directory).destroy(&mut *frames)
        };
        if was_current {
            if let Some(stale) = sched.defer_stack(task.kernel_stack) {
                self.free_kernel_stack(stale);
            }
        } else {
            self.free_kernel_stack(task.kernel_stack);
        }
        info!(
            "task {pid} ({}) exited with {code}: {} pages and {} paging structures released",
            task.name, released.pages, released.structures
        );
        Ok(dispatch)
    }

    /// `waitpid` for the running task `parent`.
    ///
    /// An already exited child is collected at once and its exit code stored
    /// at `status`. Otherwise `parent` either gets [`WaitOutcome::Running`]
    /// (`no_hang`) or is parked with its frame `saved` until a matching child
    /// exits; [`exit_task`](Self::exit_task) then completes the call.
    ///
    /// # Errors
    /// - [`SchedulerError::NoChild`] (`ECHILD`) if no child matches `child`.
    /// - [`KernelError::BadAddress`] (`EFAULT`) if `status` is not a mapped,
    ///   writable and aligned user word.
    pub fn wait_task(
        &self,
        parent: Pid,
        child: WaitFor,
        status: Option<VirtualAddress>,
        no_hang: bool,
        saved: &Registers,
    ) -> Result<WaitOutcome, KernelError> {
        let mut sched = self.lock_scheduler();
        let directory = sched.get(parent).ok_or(SchedulerError::NoSuchTask(parent))?.directory;
        if let Some(addr) = status
            && self.user_word(directory, addr).is_none()
        {
            return Err(KernelError::BadAddress(addr));
        }

        if let Some(exit) = sched.reap(parent, child)? {
            if let Some(addr) = status {
                self.store_exit_code(directory, addr, exit.code);
            }
            debug!("task {parent} collected {} (exit code {})", exit.pid, exit.code);
            return Ok(WaitOutcome::Collected(exit));
        }
        if no_hang {
            return Ok(WaitOutcome::Running);
        }
        let next = sched.block_current(parent, saved, child, status)?;
        self.activate_for(&next);
        Ok(WaitOutcome::Blocked(next))
    }

    /// Back `va` in `pid`'s directory with a fresh zeroed frame.
    ///
    /// # Errors
    /// - [`KernelError::AlreadyMapped`] if a page is present at `va`.
    /// - [`KernelError::InvalidArgument`] for a kernel address.
    /// - Unaligned `va` or out of memory.
    pub fn map_task_page(&self, pid: Pid, va: VirtualAddress, writable: bool) -> Result<FrameNumber, KernelError> {
        if !is_user_address(va) {
            return Err(KernelError::InvalidArgument);
        }
        let sched = self.lock_scheduler();
        let task = sched.get(pid).ok_or(SchedulerError::NoSuchTask(pid))?;
        let space = self.space(task.directory);
        if space.entry(va).is_some_and(|e| e.present()) {
            return Err(KernelError::AlreadyMapped(va));
        }

        let mut frames = self.lock_frames();
        let frame = frames.allocate_frame()?;
        unsafe { zero_frame(&self.mapper, frame) };
        let flags = if writable { MapFlags::USER_RW } else { MapFlags::USER_RO };
        if let Err(e) = space.map_page(&mut *frames, va, frame, flags) {
            FrameAlloc::free_frame(&mut *frames, frame);
            return Err(e.into());
        }
        trace!("task {pid}: mapped {va} -> {frame}");
        Ok(frame)
    }

    #[must_use]
    pub fn task_info(&self, pid: Pid) -> Option<TaskInfo> {
        self.lock_scheduler().get(pid).map(Task::info)
    }

    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        self.lock_scheduler().current_pid()
    }

    /// Save `saved` for the running task and switch to the next one.
    ///
    /// Returns [`Dispatch::Stay`] while no task exists.
    pub fn schedule(&self, saved: &Registers) -> Dispatch {
        let mut sched = self.lock_scheduler();
        let dispatch = sched.schedule(saved);
        self.activate_for(&dispatch);
        dispatch
    }

    /// Give up the rest of the time slice.
    pub fn yield_now(&self, saved: &Registers) -> Dispatch {
        if let Some(pid) = self.current_pid() {
            trace!("task {pid} yields");
        }
        self.schedule(saved)
    }

    /// Load the directory `dispatch` resumes in.
    fn activate_for(&self, dispatch: &Dispatch) {
        let root = match dispatch {
            Dispatch::Stay => return,
            Dispatch::Task { directory, .. } => *directory,
            Dispatch::Idle { .. } => self.kernel_root,
        };
        let _irq = IrqGuard::new(&self.cpu);
        // SAFETY: every directory shares the kernel range with the kernel directory.
        unsafe { self.space(root).activate(&self.cpu) };
    }
}
