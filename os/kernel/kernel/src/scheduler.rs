//! # Round-robin scheduler
//!
//! A fixed table of task slots visited in slot order. Empty slots are skipped,
//! so a task that exits leaves a gap the next [`Scheduler::spawn`] can reuse.
//! A slot can also hold the [`ExitStatus`] of a child whose parent has not
//! collected it yet; such a slot counts as taken.
//!
//! The scheduler only does bookkeeping. Switching the page directory and
//! returning the chosen frame to the interrupt stub is the caller's job
//! (see [`Dispatch`]).

use crate::task::{ExitStatus, KernelStack, Pid, Registers, Task, TaskState, WaitFor};
use kernel_memory_addresses::{FrameNumber, VirtualAddress};
use log::{debug, trace};

#[derive(Debug, Copy, Clone, Eq, PartialEq, thiserror::Error)]
pub enum SchedulerError {
    #[error("task table is full")]
    TableFull,
    #[error("no task with pid {0}")]
    NoSuchTask(Pid),
    #[error("no child to wait for")]
    NoChild,
}

/// What the interrupt return path has to do next.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum Dispatch {
    /// Resume the interrupted context unchanged.
    Stay,
    /// Switch to `directory` and resume `regs` on the task's kernel stack.
    Task {
        pid: Pid,
        regs: Registers,
        directory: FrameNumber,
        kernel_stack_top: usize,
    },
    /// No task left: go back to the idle context in the kernel directory.
    Idle { regs: Registers },
}

/// A parent released from `waitpid` by a child's exit.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub struct Wakeup {
    pub parent: Pid,
    /// The parent's page directory, for storing the exit code.
    pub directory: FrameNumber,
    pub status: Option<VirtualAddress>,
    pub exit: ExitStatus,
}

#[derive(Debug)]
enum Slot {
    Live(Task),
    Exited(ExitStatus),
}

pub struct Scheduler<const N: usize> {
    slots: [Option<Slot>; N],
    /// Slot of the running task, `None` while idle.
    current: Option<usize>,
    /// Slot the next scan starts after. Survives the current task's exit.
    cursor: usize,
    next_pid: u32,
    idle: Option<Registers>,
    /// Kernel stack of an exited task, freed once execution has left it.
    zombie_stack: Option<KernelStack>,
}

impl<const N: usize> Default for Scheduler<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<const N: usize> Scheduler<N> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: [const { None }; N],
            current: None,
            cursor: N.saturating_sub(1),
            next_pid: 1,
            idle: None,
            zombie_stack: None,
        }
    }

    fn task(&self, slot: usize) -> Option<&Task> {
        match &self.slots[slot] {
            Some(Slot::Live(task)) => Some(task),
            _ => None,
        }
    }

    fn task_mut(&mut self, slot: usize) -> Option<&mut Task> {
        match &mut self.slots[slot] {
            Some(Slot::Live(task)) => Some(task),
            _ => None,
        }
    }

    fn runnable(&self, slot: usize) -> bool {
        self.task(slot)
            .is_some_and(|t| !matches!(t.state, TaskState::Waiting { .. }))
    }

    /// Number of live tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.iter().count()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Allocate a pid and let `build` create the task for it.
    ///
    /// The free slot is checked first, so a full table fails before `build`
    /// acquires anything. A failed `build` does not consume the pid.
    ///
    /// # Errors
    /// [`SchedulerError::TableFull`], or whatever `build` returns.
    pub fn spawn<E: From<SchedulerError>>(
        &mut self,
        build: impl FnOnce(Pid) -> Result<Task, E>,
    ) -> Result<Pid, E> {
        let slot = self.free_slot().ok_or(SchedulerError::TableFull)?;
        let pid = Pid::new(self.next_pid).ok_or(SchedulerError::TableFull)?;
        let task = build(pid)?;
        debug_assert_eq!(task.pid, pid);
        self.next_pid += 1;
        self.slots[slot] = Some(Slot::Live(task));
        debug!("task {pid} placed in slot {slot}");
        Ok(pid)
    }

    fn free_slot(&self) -> Option<usize> {
        self.slots.iter().position(Option::is_none)
    }

    /// Timer tick or yield: store `saved` and pick who runs next.
    ///
    /// The first call before any task ran stores `saved` as the idle context.
    /// While idle with nothing runnable the call is a no-op.
    pub fn schedule(&mut self, saved: &Registers) -> Dispatch {
        if self.current.is_none() && !(0..N).any(|i| self.runnable(i)) {
            return Dispatch::Stay;
        }

        match self.current_mut() {
            Some(task) => {
                task.regs = *saved;
                task.state = TaskState::Runnable;
            }
            None => self.idle = Some(*saved),
        }

        let previous = self.current;
        let dispatch = self.reschedule();
        if previous.is_some() && previous == self.current {
            // Only one task: resume it where it was.
            if let Some(task) = self.current_mut() {
                task.state = TaskState::Running;
            }
            return Dispatch::Stay;
        }
        dispatch
    }

    /// Pick the next runnable task after the cursor without saving anything.
    ///
    /// Used after the current task is gone or blocked. Waiting tasks are
    /// skipped. With nothing runnable this returns the idle context.
    pub fn reschedule(&mut self) -> Dispatch {
        let Some(slot) = (1..=N)
            .map(|step| (self.cursor + step) % N)
            .find(|&i| self.runnable(i))
        else {
            self.current = None;
            trace!("no runnable task, returning to idle");
            return Dispatch::Idle {
                regs: self.idle.unwrap_or_default(),
            };
        };

        self.current = Some(slot);
        self.cursor = slot;
        let Some(task) = self.task_mut(slot) else {
            return Dispatch::Stay;
        };
        task.state = TaskState::Running;
        trace!("switching to task {} ({}) in slot {slot}", task.pid, task.name);
        Dispatch::Task {
            pid: task.pid,
            regs: task.regs,
            directory: task.directory,
            kernel_stack_top: task.kernel_stack.top(),
        }
    }

    /// Take a task out of the table without leaving an exit status.
    ///
    /// Removing the current task leaves nothing current; call
    /// [`reschedule`](Self::reschedule) before returning to any task.
    ///
    /// # Errors
    /// [`SchedulerError::NoSuchTask`].
    pub fn remove(&mut self, pid: Pid) -> Result<Task, SchedulerError> {
        let slot = self.slot_of(pid).ok_or(SchedulerError::NoSuchTask(pid))?;
        if self.current == Some(slot) {
            self.current = None;
        }
        match self.slots[slot].take() {
            Some(Slot::Live(task)) => Ok(task),
            other => {
                self.slots[slot] = other;
                Err(SchedulerError::NoSuchTask(pid))
            }
        }
    }

    /// Remove `pid`, which ended with `code`, and settle its family.
    ///
    /// Live children lose their parent link and exit statuses they never
    /// collected are dropped. If the parent is blocked in a wait that accepts
    /// `pid`, it becomes runnable and the returned [`Wakeup`] says where its
    /// result goes. Otherwise a parent keeps the status in the freed slot.
    ///
    /// # Errors
    /// [`SchedulerError::NoSuchTask`].
    pub fn exit(&mut self, pid: Pid, code: i32) -> Result<(Task, Option<Wakeup>), SchedulerError> {
        let slot = self.slot_of(pid).ok_or(SchedulerError::NoSuchTask(pid))?;
        let task = self.remove(pid)?;

        for entry in &mut self.slots {
            if matches!(entry, Some(Slot::Exited(e)) if e.parent == pid) {
                *entry = None;
            } else if let Some(Slot::Live(child)) = entry
                && child.parent == Some(pid)
            {
                child.parent = None;
            }
        }

        let Some(parent_pid) = task.parent else {
            return Ok((task, None));
        };
        let exit = ExitStatus {
            pid,
            parent: parent_pid,
            code,
        };
        let Some(parent) = self.get_mut(parent_pid) else {
            return Ok((task, None));
        };
        if let TaskState::Waiting { child, status } = parent.state
            && child.accepts(pid)
        {
            parent.state = TaskState::Runnable;
            let wakeup = Wakeup {
                parent: parent_pid,
                directory: parent.directory,
                status,
                exit,
            };
            debug!("task {pid} exited with {code}, waking {parent_pid}");
            return Ok((task, Some(wakeup)));
        }
        self.slots[slot] = Some(Slot::Exited(exit));
        debug!("task {pid} exited with {code}, status kept for {parent_pid}");
        Ok((task, None))
    }

    /// Collect an exit status of a child of `parent` that `child` accepts.
    ///
    /// `Ok(None)` means matching children exist but all of them still run.
    ///
    /// # Errors
    /// [`SchedulerError::NoChild`] if no child, live or exited, matches.
    pub fn reap(&mut self, parent: Pid, child: WaitFor) -> Result<Option<ExitStatus>, SchedulerError> {
        let exited = self.slots.iter().position(|s| {
            matches!(s, Some(Slot::Exited(e)) if e.parent == parent && child.accepts(e.pid))
        });
        if let Some(slot) = exited {
            let Some(Slot::Exited(status)) = self.slots[slot].take() else {
                return Err(SchedulerError::NoChild);
            };
            return Ok(Some(status));
        }
        if self.iter().any(|t| t.parent == Some(parent) && child.accepts(t.pid)) {
            Ok(None)
        } else {
            Err(SchedulerError::NoChild)
        }
    }

    /// Park the running task in `waitpid` with its frame `saved` and pick the
    /// next one.
    ///
    /// # Errors
    /// [`SchedulerError::NoSuchTask`] if `pid` is not the running task.
    pub fn block_current(
        &mut self,
        pid: Pid,
        saved: &Registers,
        child: WaitFor,
        status: Option<VirtualAddress>,
    ) -> Result<Dispatch, SchedulerError> {
        let task = self
            .current_mut()
            .filter(|t| t.pid == pid)
            .ok_or(SchedulerError::NoSuchTask(pid))?;
        task.regs = *saved;
        task.state = TaskState::Waiting { child, status };
        trace!("task {pid} waits for {child:?}");
        self.current = None;
        Ok(self.reschedule())
    }

    fn slot_of(&self, pid: Pid) -> Option<usize> {
        (0..N).find(|&i| self.task(i).is_some_and(|t| t.pid == pid))
    }

    #[must_use]
    pub fn current(&self) -> Option<&Task> {
        self.current.and_then(|i| self.task(i))
    }

    pub fn current_mut(&mut self) -> Option<&mut Task> {
        self.current.and_then(|i| self.task_mut(i))
    }

    #[must_use]
    pub fn current_pid(&self) -> Option<Pid> {
        self.current().map(|t| t.pid)
    }

    #[must_use]
    pub fn get(&self, pid: Pid) -> Option<&Task> {
        self.slot_of(pid).and_then(|i| self.task(i))
    }

    pub fn get_mut(&mut self, pid: Pid) -> Option<&mut Task> {
        self.slot_of(pid).and_then(|i| self.task_mut(i))
    }

    /// Iterate over all live tasks in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Task> {
        self.slots.iter().filter_map(|s| match s {
            Some(Slot::Live(task)) => Some(task),
            _ => None,
        })
    }

    /// Park the kernel stack of the exiting task until the next tick.
    ///
    /// Returns a previously parked stack, which is safe to free now.
    pub fn defer_stack(&mut self, stack: KernelStack) -> Option<KernelStack> {
        self.zombie_stack.replace(stack)
    }

    pub const fn take_zombie_stack(&mut self) -> Option<KernelStack> {
        self.zombie_stack.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskMemory, TaskName};
    use core::ptr::NonNull;

    fn task(pid: Pid, eip: u32) -> Task {
        Task {
            pid,
            parent: None,
            name: TaskName::new("t"),
            regs: Registers::user(eip, 0xBFFF_F000),
            state: TaskState::Runnable,
            directory: FrameNumber::new(pid.as_u32()),
            memory: TaskMemory::new(VirtualAddress::new(0x0040_0000)),
            kernel_stack: KernelStack::new(NonNull::dangling(), 0),
        }
    }

    fn spawn<const N: usize>(s: &mut Scheduler<N>, eip: u32) -> Pid {
        s.spawn(|pid| Ok::<_, SchedulerError>(task(pid, eip))).unwrap()
    }

    fn spawn_child<const N: usize>(s: &mut Scheduler<N>, parent: Pid, eip: u32) -> Pid {
        s.spawn(|pid| {
            let mut t = task(pid, eip);
            t.parent = Some(parent);
            Ok::<_, SchedulerError>(t)
        })
        .unwrap()
    }

    fn dispatched(d: Dispatch) -> Pid {
        match d {
            Dispatch::Task { pid, .. } => pid,
            other => panic!("expected a task, got {other:?}"),
        }
    }

    #[test]
    fn empty_table_stays() {
        let mut s = Scheduler::<4>::new();
        assert_eq!(s.schedule(&Registers::default()), Dispatch::Stay);
    }

    #[test]
    fn round_robin_in_slot_order() {
        let mut s = Scheduler::<4>::new();
        let a = spawn(&mut s, 0xA);
        let b = spawn(&mut s, 0xB);
        let c = spawn(&mut s, 0xC);

        assert_eq!(dispatched(s.schedule(&Registers::default())), a);
        let order: Vec<_> = (0..3)
            .map(|_| dispatched(s.schedule(&Registers::default())))
            .collect();
        assert_eq!(order, [b, c, a]);
    }

    #[test]
    fn exited_slot_is_skipped() {
        let mut s = Scheduler::<4>::new();
        let a = spawn(&mut s, 0xA);
        let b = spawn(&mut s, 0xB);
        let c = spawn(&mut s, 0xC);
        assert_eq!(dispatched(s.schedule(&Registers::default())), a);
        assert_eq!(dispatched(s.schedule(&Registers::default())), b);

        s.remove(b).unwrap();
        assert_eq!(s.current_pid(), None);
        assert_eq!(dispatched(s.reschedule()), c);
        assert_eq!(dispatched(s.schedule(&Registers::default())), a);
        assert_eq!(dispatched(s.schedule(&Registers::default())), c);
    }

    #[test]
    fn saved_frame_is_persisted_into_the_current_slot() {
        let mut s = Scheduler::<4>::new();
        let a = spawn(&mut s, 0xA);
        let _b = spawn(&mut s, 0xB);
        s.schedule(&Registers::default());

        let mut frame = Registers::user(0xA, 0xBFFF_F000);
        frame.eax = 42;
        s.schedule(&frame);
        let t = s.get(a).unwrap();
        assert_eq!(t.regs.eax, 42);
        assert_eq!(t.state, TaskState::Runnable);
    }

    #[test]
    fn single_task_stays_and_idle_comes_back() {
        let mut s = Scheduler::<4>::new();
        let a = spawn(&mut s, 0xA);
        let mut idle = Registers::kernel(0xC010_0000, 0xC020_0000);
        idle.ebx = 7;

        assert_eq!(dispatched(s.schedule(&idle)), a);
        assert_eq!(s.schedule(&Registers::default()), Dispatch::Stay);
        assert_eq!(s.current().unwrap().state, TaskState::Running);

        s.remove(a).unwrap();
        assert_eq!(s.reschedule(), Dispatch::Idle { regs: idle });
    }

    #[test]
    fn table_full_and_pids_never_reused() {
        let mut s = Scheduler::<2>::new();
        let a = spawn(&mut s, 0xA);
        let _b = spawn(&mut s, 0xB);
        let full = s.spawn(|pid| Ok::<_, SchedulerError>(task(pid, 0xC)));
        assert_eq!(full, Err(SchedulerError::TableFull));

        s.remove(a).unwrap();
        let c = spawn(&mut s, 0xC);
        assert_eq!(c.as_u32(), 3);
        assert_eq!(s.remove(a).unwrap_err(), SchedulerError::NoSuchTask(a));
    }

    #[test]
    fn failed_build_keeps_the_pid() {
        let mut s = Scheduler::<2>::new();
        let failed = s.spawn(|_| Err::<Task, _>(SchedulerError::TableFull));
        assert!(failed.is_err());
        assert_eq!(spawn(&mut s, 0xA).as_u32(), 1);
    }

    #[test]
    fn zombie_stack_is_handed_back_once() {
        let mut s = Scheduler::<2>::new();
        assert!(s.defer_stack(KernelStack::new(NonNull::dangling(), 16)).is_none());
        assert!(s.take_zombie_stack().is_some());
        assert!(s.take_zombie_stack().is_none());
    }

    #[test]
    fn exit_status_waits_in_the_slot_until_reaped() {
        let mut s = Scheduler::<2>::new();
        let parent = spawn(&mut s, 0xA);
        let child = spawn_child(&mut s, parent, 0xB);
        assert_eq!(s.reap(parent, WaitFor::Any), Ok(None));

        let (gone, wakeup) = s.exit(child, 3).unwrap();
        assert_eq!(gone.pid, child);
        assert_eq!(wakeup, None);
        assert_eq!(s.len(), 1);
        // The unreaped status still occupies its slot.
        let full = s.spawn(|pid| Ok::<_, SchedulerError>(task(pid, 0xC)));
        assert_eq!(full, Err(SchedulerError::TableFull));

        let status = s.reap(parent, WaitFor::Child(child)).unwrap().unwrap();
        assert_eq!((status.pid, status.parent, status.code), (child, parent, 3));
        assert_eq!(s.reap(parent, WaitFor::Any), Err(SchedulerError::NoChild));
        assert!(s.free_slot().is_some());
    }

    #[test]
    fn waiting_parent_is_skipped_and_woken_by_its_child() {
        let mut s = Scheduler::<4>::new();
        let parent = spawn(&mut s, 0xA);
        let child = spawn_child(&mut s, parent, 0xB);
        assert_eq!(dispatched(s.schedule(&Registers::default())), parent);

        let mut frame = Registers::user(0xA, 0xBFFF_F000);
        frame.eax = 7;
        let status = Some(VirtualAddress::new(0x0800_0000));
        let next = s.block_current(parent, &frame, WaitFor::Any, status).unwrap();
        assert_eq!(dispatched(next), child);
        // Only the child is runnable.
        assert_eq!(s.schedule(&Registers::default()), Dispatch::Stay);

        let (_, wakeup) = s.exit(child, 5).unwrap();
        let wakeup = wakeup.unwrap();
        assert_eq!(wakeup.parent, parent);
        assert_eq!(wakeup.status, status);
        assert_eq!(wakeup.exit.code, 5);
        assert_eq!(s.get(parent).unwrap().state, TaskState::Runnable);

        let Dispatch::Task { pid, regs, .. } = s.reschedule() else {
            panic!("expected the parent");
        };
        assert_eq!(pid, parent);
        assert_eq!(regs.eax, 7);
    }

    #[test]
    fn all_tasks_waiting_means_idle() {
        let mut s = Scheduler::<4>::new();
        let parent = spawn(&mut s, 0xA);
        let _child = spawn_child(&mut s, parent, 0xB);
        s.schedule(&Registers::default());
        s.block_current(parent, &Registers::default(), WaitFor::Any, None).unwrap();
        let child = s.current_pid().unwrap();
        s.block_current(child, &Registers::default(), WaitFor::Any, None).unwrap();

        assert_eq!(s.current_pid(), None);
        assert_eq!(s.schedule(&Registers::default()), Dispatch::Stay);
    }

    #[test]
    fn exiting_parent_orphans_children_and_drops_their_statuses() {
        let mut s = Scheduler::<4>::new();
        let parent = spawn(&mut s, 0xA);
        let done = spawn_child(&mut s, parent, 0xB);
        let running = spawn_child(&mut s, parent, 0xC);
        s.exit(done, 0).unwrap();

        s.exit(parent, 0).unwrap();
        assert_eq!(s.get(running).unwrap().parent, None);
        assert_eq!(s.len(), 1);
        assert_eq!(s.slots.iter().flatten().count(), 1);

        // Nobody collects an orphan's status.
        s.exit(running, 1).unwrap();
        assert!(s.slots.iter().all(Option::is_none));
    }

    #[test]
    fn only_the_running_task_can_block() {
        let mut s = Scheduler::<2>::new();
        let a = spawn(&mut s, 0xA);
        let b = spawn(&mut s, 0xB);
        s.schedule(&Registers::default());
        let err = s.block_current(b, &Registers::default(), WaitFor::Any, None);
        assert_eq!(err, Err(SchedulerError::NoSuchTask(b)));
        assert_eq!(s.current_pid(), Some(a));
    }
}
