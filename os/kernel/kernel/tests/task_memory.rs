mod common;

use common::*;
use kernel::{Dispatch, FaultOutcome, KernelError, PageFaultError, Registers};
use kernel_info::memory::{TASK_HEAP_LIMIT, TASK_STACK_FLOOR, TASK_STACK_TOP};
use kernel_memory_addresses::VirtualAddress;
use kernel_syscall::Errno;
use kernel_vmem::FatalFault;

const HEAP: u32 = 0x0040_0000;

fn user_write() -> PageFaultError {
    PageFaultError::new().with_user(true).with_write(true)
}

fn va(addr: u32) -> VirtualAddress {
    VirtualAddress::new(addr)
}

#[test]
fn growth_fault_is_resolved_and_outside_fault_kills_the_task() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    assert_eq!(kernel.task_sbrk(t, 0x10_0000).unwrap(), va(HEAP));
    assert_eq!(tick(&kernel), Some(t));
    let frame = Registers::user(0x0800_0000, TASK_STACK_TOP - 16);

    let used = kernel.frame_stats().used;
    assert_eq!(kernel.on_page_fault(&frame, va(0x0040_0010), user_write()), Ok(Dispatch::Stay));
    // One page plus its page table.
    assert_eq!(kernel.frame_stats().used, used + 2);
    assert!(page_bytes(&kernel, t, va(0x0040_0010)).iter().all(|&b| b == 0));

    let outcome = kernel.on_page_fault(&frame, va(0x0090_0000), user_write()).unwrap();
    assert!(matches!(outcome, Dispatch::Idle { .. }));
    assert!(kernel.task_info(t).is_none());
    assert_eq!(tick(&kernel), None);
}

#[test]
fn heap_region_ends_at_the_page_holding_the_break() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    kernel.task_sbrk(t, 10).unwrap();

    let inside = kernel.task_page_fault_cb(t, va(HEAP + 0xFFF), user_write()).unwrap();
    assert_eq!(inside, FaultOutcome::Resolved);
    let beyond = kernel.task_page_fault_cb(t, va(HEAP + 0x1000), user_write()).unwrap();
    assert_eq!(beyond, FaultOutcome::Fatal(FatalFault::OutsideGrowthRegion));
}

#[test]
fn stack_window_grows_one_page_per_fault() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    let used = kernel.frame_stats().used;

    for addr in [TASK_STACK_TOP - 4, TASK_STACK_FLOOR] {
        let outcome = kernel.task_page_fault_cb(t, va(addr), user_write()).unwrap();
        assert_eq!(outcome, FaultOutcome::Resolved);
    }
    // Two pages sharing one page table.
    assert_eq!(kernel.frame_stats().used, used + 3);

    let below = kernel.task_page_fault_cb(t, va(TASK_STACK_FLOOR - 1), user_write()).unwrap();
    assert_eq!(below, FaultOutcome::Fatal(FatalFault::OutsideGrowthRegion));
}

#[test]
fn protection_faults_are_fatal() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    kernel.task_sbrk(t, 0x1000).unwrap();
    let present = user_write().with_present(true);
    assert_eq!(
        kernel.task_page_fault_cb(t, va(HEAP), present).unwrap(),
        FaultOutcome::Fatal(FatalFault::Protection)
    );
}

#[test]
fn shrinking_the_break_frees_pages_wholly_above_it() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    kernel.task_sbrk(t, 0x3000).unwrap();
    for page in 0..3 {
        kernel.task_page_fault_cb(t, va(HEAP + page * 0x1000), user_write()).unwrap();
    }
    let used = kernel.frame_stats().used;

    assert_eq!(kernel.task_sbrk(t, -0x1800).unwrap(), va(HEAP + 0x3000));
    assert_eq!(kernel.task_info(t).unwrap().brk, va(HEAP + 0x1800));
    assert_eq!(kernel.frame_stats().used, used - 1);

    let space = task_space(&kernel, t);
    assert!(space.translate(va(HEAP + 0x1000)).is_some());
    assert!(space.translate(va(HEAP + 0x2000)).is_none());
    // Not running, so no TLB entry to drop.
    assert!(kernel.cpu().flushes.borrow().is_empty());
}

#[test]
fn shrinking_the_running_task_flushes_the_tlb() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    tick(&kernel);
    kernel.task_sbrk(t, 0x2000).unwrap();
    kernel.task_page_fault_cb(t, va(HEAP + 0x1000), user_write()).unwrap();

    kernel.task_sbrk(t, -0x2000).unwrap();
    assert_eq!(kernel.cpu().flushes.borrow().as_slice(), [va(HEAP + 0x1000)]);
}

#[test]
fn break_stays_between_heap_start_and_limit() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");

    let below = kernel.task_sbrk(t, -1).unwrap_err();
    assert_eq!(below, KernelError::InvalidArgument);
    assert_eq!(below.errno(), Errno::EINVAL);

    let past = kernel.task_brk(t, TASK_HEAP_LIMIT + 1).unwrap_err();
    assert_eq!(past, KernelError::OutOfMemory);
    assert_eq!(past.errno(), Errno::ENOMEM);

    // Failures leave the break alone.
    assert_eq!(kernel.task_brk(t, 0), Ok(va(HEAP)));
    assert_eq!(kernel.task_brk(t, TASK_HEAP_LIMIT), Ok(va(TASK_HEAP_LIMIT)));
}

#[test]
fn brk_queries_and_sets() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    assert_eq!(kernel.task_brk(t, 0), Ok(va(HEAP)));
    assert_eq!(kernel.task_brk(t, HEAP + 0x2345), Ok(va(HEAP + 0x2345)));
    assert_eq!(kernel.task_sbrk(t, 0), Ok(va(HEAP + 0x2345)));
}

#[test]
fn munmap_releases_present_pages_only() {
    let kernel = boot_kernel();
    let t = user_task(&kernel, "t");
    kernel.map_task_page(t, va(0x0800_0000), true).unwrap();
    kernel.map_task_page(t, va(0x0800_2000), true).unwrap();
    let used = kernel.frame_stats().used;

    kernel.task_munmap(t, 0x0800_0000, 0x2001).unwrap();
    assert_eq!(kernel.frame_stats().used, used - 2);
    assert!(task_space(&kernel, t).translate(va(0x0800_2000)).is_none());

    assert_eq!(kernel.task_munmap(t, 0x0800_0010, 0x1000), Err(KernelError::InvalidArgument));
    assert_eq!(kernel.task_munmap(t, 0x0800_0000, 0), Err(KernelError::InvalidArgument));
    assert_eq!(
        kernel.task_munmap(t, TASK_STACK_TOP - 0x1000, 0x2000),
        Err(KernelError::InvalidArgument)
    );
}

#[test]
fn kernel_mode_faults_are_not_handled() {
    let kernel = boot_kernel();
    let frame = Registers::kernel(0xC000_1000, 0xC004_0000);
    let err = PageFaultError::new().with_write(true);
    assert_eq!(
        kernel.on_page_fault(&frame, va(0x0040_0000), err),
        Err(KernelError::UnhandledKernelFault(va(0x0040_0000)))
    );

    let t = user_task(&kernel, "t");
    tick(&kernel);
    assert_eq!(
        kernel.on_page_fault(&frame, va(0xC030_0000), err),
        Err(KernelError::UnhandledKernelFault(va(0xC030_0000)))
    );
    assert!(kernel.task_info(t).is_some(), "a kernel bug does not kill the task");
}
