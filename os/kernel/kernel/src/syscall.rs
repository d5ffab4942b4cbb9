//! `int 0x80` dispatch.

use crate::process::WaitOutcome;
use crate::scheduler::Dispatch;
use crate::task::{Pid, Registers, TaskState, WaitFor};
use crate::{Cpu, Kernel};
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::{Errno, SyscallRequest, SyscallReturn, Sysno, WNOHANG};
use kernel_vmem::PhysMapper;
use log::{info, trace, warn};

impl<M: PhysMapper, C: Cpu> Kernel<M, C> {
    /// Run the call encoded in `regs` for the current task and write the
    /// result back into `regs` (`eax` value, `ebx` errno).
    ///
    /// `exit`, `sched_yield` and a blocking `waitpid` switch tasks; everything
    /// else returns [`Dispatch::Stay`].
    pub fn on_syscall(&self, regs: &mut Registers) -> Dispatch {
        let request = SyscallRequest::from_registers(regs.eax, regs.ebx, regs.ecx, regs.edx);
        let Some(pid) = self.current_pid() else {
            warn!("syscall {} with no task running", request.number);
            write_result(regs, Err(Errno::EPERM));
            return Dispatch::Stay;
        };

        let sysno = match request.sysno() {
            Ok(sysno) => sysno,
            Err(errno) => {
                warn!("task {pid}: unknown syscall {}", request.number);
                write_result(regs, Err(errno));
                return Dispatch::Stay;
            }
        };
        trace!("task {pid}: {sysno}({:#x}, {:#x}, {:#x})", request.args[0], request.args[1], request.args[2]);

        self.set_state(pid, TaskState::Syscall);
        let [a0, a1, a2] = request.args;
        let result = match sysno {
            Sysno::Exit => {
                let code = a0.cast_signed();
                info!("task {pid}: exit({code})");
                return self.exit_task(pid, code).unwrap_or_else(|e| {
                    warn!("task {pid}: exit failed: {e}");
                    Dispatch::Stay
                });
            }
            Sysno::SchedYield => {
                self.set_state(pid, TaskState::Running);
                write_result(regs, Ok(0));
                return self.yield_now(regs);
            }
            Sysno::Fork => {
                let mut child = *regs;
                write_result(&mut child, Ok(0));
                self.fork_task(pid, &child).map(Pid::as_u32)
            }
            Sysno::WaitPid => {
                let status = (a1 != 0).then_some(VirtualAddress::new(a1));
                match self.wait_task(pid, WaitFor::from_raw(a0), status, a2 & WNOHANG != 0, regs) {
                    Ok(WaitOutcome::Collected(exit)) => Ok(exit.pid.as_u32()),
                    Ok(WaitOutcome::Running) => Ok(0),
                    Ok(WaitOutcome::Blocked(next)) => return next,
                    Err(e) => Err(e),
                }
            }
            Sysno::GetPid => Ok(pid.as_u32()),
            Sysno::GetPpid => Ok(self
                .task_info(pid)
                .and_then(|t| t.parent)
                .map_or(0, Pid::as_u32)),
            Sysno::Brk => self.task_brk(pid, a0).map(|brk| brk.as_u32()),
            Sysno::Munmap => self.task_munmap(pid, a0, a1).map(|()| 0),
        }
        .map_err(|e| e.errno());

        if let Err(errno) = result {
            trace!("task {pid}: {sysno} failed with {errno}");
        }
        write_result(regs, result);
        self.set_state(pid, TaskState::Running);
        Dispatch::Stay
    }

    fn set_state(&self, pid: Pid, state: TaskState) {
        if let Some(task) = self.lock_scheduler().get_mut(pid) {
            task.state = state;
        }
    }
}

pub(crate) fn write_result(regs: &mut Registers, result: Result<u32, Errno>) {
    let ret = SyscallReturn::encode(result);
    regs.eax = ret.eax;
    regs.ebx = ret.ebx;
}
