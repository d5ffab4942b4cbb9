mod common;

use common::*;
use kernel::{Dispatch, FaultOutcome, KernelError, PageFaultError, Registers, SchedulerError, TaskEntry, TaskState};
use kernel_info::tasks::TASK_TABLE_CAPACITY;
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::Errno;

#[test]
fn no_task_means_stay() {
    let kernel = boot_kernel();
    assert_eq!(kernel.on_timer(&Registers::default()), Dispatch::Stay);
    assert_eq!(kernel.current_pid(), None);
}

#[test]
fn timer_rotates_in_slot_order_and_switches_directories() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let b = user_task(&kernel, "b");
    let c = user_task(&kernel, "c");

    assert_eq!(tick(&kernel), Some(a));
    let order: Vec<_> = (0..3).map(|_| tick(&kernel).unwrap()).collect();
    assert_eq!(order, [b, c, a]);

    let a_dir = kernel.task_info(a).unwrap().directory;
    assert_eq!(kernel.cpu().last_load(), Some(a_dir.base()));
    assert_eq!(kernel.task_info(a).unwrap().state, TaskState::Running);
    assert_eq!(kernel.task_info(b).unwrap().state, TaskState::Runnable);
}

#[test]
fn exiting_current_task_skips_its_slot() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let b = user_task(&kernel, "b");
    let c = user_task(&kernel, "c");
    assert_eq!(tick(&kernel), Some(a));
    assert_eq!(tick(&kernel), Some(b));

    let Dispatch::Task { pid, directory, .. } = kernel.exit_task(b, 0).unwrap() else {
        panic!("exit of the running task must dispatch another");
    };
    assert_eq!(pid, c);
    assert_eq!(kernel.cpu().last_load(), Some(directory.base()));
    assert!(kernel.task_info(b).is_none());

    assert_eq!(tick(&kernel), Some(a));
    assert_eq!(tick(&kernel), Some(c));
}

#[test]
fn frame_is_saved_into_the_preempted_task() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let _b = user_task(&kernel, "b");
    tick(&kernel);

    let mut frame = Registers::user(0x0800_1234, 0xBFFF_FF00);
    frame.eax = 99;
    kernel.on_timer(&frame);
    assert_eq!(kernel.task_info(a).unwrap().eip, VirtualAddress::new(0x0800_1234));

    let Dispatch::Task { regs, .. } = kernel.on_timer(&Registers::default()) else {
        panic!("expected a");
    };
    assert_eq!(regs.eax, 99);
}

#[test]
fn last_exit_returns_to_the_idle_context() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let mut idle = Registers::kernel(0xC001_0000, 0xC004_0000);
    idle.esi = 0x1D1E;
    assert!(matches!(kernel.on_timer(&idle), Dispatch::Task { .. }));

    assert_eq!(kernel.exit_task(a, 0).unwrap(), Dispatch::Idle { regs: idle });
    assert_eq!(kernel.cpu().last_load(), Some(kernel.kernel_space().root_address()));
    assert_eq!(kernel.current_pid(), None);
}

#[test]
fn exit_releases_every_frame_of_the_task() {
    let kernel = boot_kernel();
    let baseline = kernel.frame_stats().used;
    let heap_baseline = kernel.heap_stats().used;

    let a = user_task(&kernel, "a");
    for page in [0x0040_0000, 0x0040_1000, 0x0800_0000] {
        kernel.map_task_page(a, VirtualAddress::new(page), true).unwrap();
    }
    // Directory, two page tables, three pages.
    assert_eq!(kernel.frame_stats().used, baseline + 6);

    assert_eq!(kernel.exit_task(a, 0).unwrap(), Dispatch::Stay);
    assert_eq!(kernel.frame_stats().used, baseline);
    assert_eq!(kernel.heap_stats().used, heap_baseline);
}

#[test]
fn kernel_stack_of_an_exited_task_is_freed_on_the_next_tick() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let _b = user_task(&kernel, "b");
    tick(&kernel);
    let with_both = kernel.heap_stats().used;

    kernel.exit_task(a, 0).unwrap();
    assert_eq!(kernel.heap_stats().used, with_both);
    tick(&kernel);
    assert!(kernel.heap_stats().used < with_both);
}

#[test]
fn full_table_fails_cleanly() {
    let kernel = boot_kernel();
    for i in 0..TASK_TABLE_CAPACITY {
        user_task(&kernel, &format!("t{i}"));
    }
    let frames = kernel.frame_stats().used;
    let heap = kernel.heap_stats().used;

    let err = kernel
        .create_task("one too many", TaskEntry::user(VirtualAddress::new(0x0800_0000)))
        .unwrap_err();
    assert_eq!(err, KernelError::Scheduler(SchedulerError::TableFull));
    assert_eq!(err.errno(), Errno::EAGAIN);
    assert_eq!(kernel.frame_stats().used, frames);
    assert_eq!(kernel.heap_stats().used, heap);
}

#[test]
fn directories_are_isolated_but_share_the_kernel() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let b = user_task(&kernel, "b");
    let va = VirtualAddress::new(0x0040_0000);
    kernel.map_task_page(a, va, true).unwrap();

    assert!(task_space(&kernel, a).translate(va).is_some());
    assert!(task_space(&kernel, b).translate(va).is_none());

    // A kernel mapping made after both tasks exist is visible to both.
    let big = kernel.kmalloc(300 * 1024).unwrap();
    let grown = VirtualAddress::new(0xC000_0000 + HEAP_PHYS + 256 * 1024);
    let expected = kernel.kernel_space().translate(grown);
    assert!(expected.is_some());
    assert_eq!(task_space(&kernel, a).translate(grown), expected);
    assert_eq!(task_space(&kernel, b).translate(grown), expected);
    kernel.kfree(big).unwrap();
}

#[test]
fn demand_paging_the_same_address_gives_each_task_its_own_frame() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let b = user_task(&kernel, "b");
    let va = VirtualAddress::new(0x0040_0010);
    let write = PageFaultError::new().with_user(true).with_write(true);

    for pid in [a, b] {
        kernel.task_sbrk(pid, 0x1000).unwrap();
        assert_eq!(kernel.task_page_fault_cb(pid, va, write), Ok(FaultOutcome::Resolved));
    }

    let in_a = task_space(&kernel, a).translate(va).unwrap();
    let in_b = task_space(&kernel, b).translate(va).unwrap();
    assert_ne!(in_a, in_b);

    page_bytes(&kernel, a, va)[0x10] = 0xAA;
    assert_eq!(page_bytes(&kernel, b, va)[0x10], 0);
}

#[test]
fn task_pages_cannot_shadow_kernel_space() {
    let kernel = boot_kernel();
    let a = user_task(&kernel, "a");
    let va = VirtualAddress::new(0x0040_0000);
    kernel.map_task_page(a, va, true).unwrap();
    assert_eq!(kernel.map_task_page(a, va, true), Err(KernelError::AlreadyMapped(va)));
    assert_eq!(
        kernel.map_task_page(a, VirtualAddress::new(0xC010_0000), true),
        Err(KernelError::InvalidArgument)
    );
}

#[test]
fn kernel_tasks_start_on_their_own_stack() {
    let kernel = boot_kernel();
    let k = kernel
        .create_task("kworker", TaskEntry::Kernel { eip: VirtualAddress::new(0xC000_1000) })
        .unwrap();
    let Dispatch::Task { regs, kernel_stack_top, .. } = kernel.on_timer(&Registers::default()) else {
        panic!("expected the kernel task");
    };
    assert_eq!(kernel.current_pid(), Some(k));
    assert_eq!(regs.cs, 0x08);
    assert_eq!(regs.esp, kernel_stack_top as u32);
}

#[test]
fn user_heap_start_must_be_a_page_aligned_user_address() {
    let kernel = boot_kernel();
    let entry = TaskEntry::User {
        eip: VirtualAddress::new(0x0800_0000),
        heap_start: VirtualAddress::new(0x0040_0010),
    };
    assert_eq!(kernel.create_task("bad", entry), Err(KernelError::InvalidArgument));
}
