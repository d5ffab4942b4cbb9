use crate::{SpinLock, SpinLockGuard};
use core::ops::{Deref, DerefMut};

/// Access to the CPU's interrupt-enable flag.
///
/// On hardware this is `IF` in EFLAGS, driven by `cli`/`sti`
/// ([`CpuInterrupts`]). Tests provide a recording implementation.
pub trait InterruptFlag {
    /// Whether maskable interrupts are currently delivered.
    fn interrupts_enabled(&self) -> bool;

    /// Stop delivering maskable interrupts (`cli`).
    fn disable_interrupts(&self);

    /// Resume delivering maskable interrupts (`sti`).
    fn enable_interrupts(&self);
}

impl<F: InterruptFlag + ?Sized> InterruptFlag for &F {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        (**self).interrupts_enabled()
    }

    #[inline]
    fn disable_interrupts(&self) {
        (**self).disable_interrupts();
    }

    #[inline]
    fn enable_interrupts(&self) {
        (**self).enable_interrupts();
    }
}

/// The interrupt flag of the executing i386 CPU.
///
/// # Safety & Privilege
///
/// `cli`/`sti` are only legal at CPL0 (or with sufficient IOPL). Using this
/// from user mode raises `#GP`.
#[cfg(target_arch = "x86")]
#[derive(Debug, Default, Clone, Copy)]
pub struct CpuInterrupts;

#[cfg(target_arch = "x86")]
impl InterruptFlag for CpuInterrupts {
    #[inline]
    fn interrupts_enabled(&self) -> bool {
        use kernel_registers::LoadRegister;
        kernel_registers::eflags::Eflags::load().if_interrupt_enable()
    }

    #[inline]
    fn disable_interrupts(&self) {
        unsafe { core::arch::asm!("cli", options(nomem, nostack, preserves_flags)) }
    }

    #[inline]
    fn enable_interrupts(&self) {
        unsafe { core::arch::asm!("sti", options(nomem, nostack, preserves_flags)) }
    }
}

/// RAII guard that disables interrupts on creation and restores them on drop.
///
/// Interrupts are re-enabled on drop **only** if they were enabled when the
/// guard was created, so guards nest and are safe to take inside a handler
/// that already runs with interrupts masked.
///
/// ```
/// use core::cell::Cell;
/// use kernel_sync::{InterruptFlag, IrqGuard};
///
/// struct Flag(Cell<bool>);
/// impl InterruptFlag for Flag {
///     fn interrupts_enabled(&self) -> bool { self.0.get() }
///     fn disable_interrupts(&self) { self.0.set(false) }
///     fn enable_interrupts(&self) { self.0.set(true) }
/// }
///
/// let flag = Flag(Cell::new(true));
/// {
///     let _g = IrqGuard::new(&flag);
///     assert!(!flag.interrupts_enabled());
/// }
/// assert!(flag.interrupts_enabled());
/// ```
pub struct IrqGuard<F: InterruptFlag> {
    flag: F,
    /// Whether interrupts were enabled when the guard was created.
    were_enabled: bool,
}

impl<F: InterruptFlag> IrqGuard<F> {
    /// Disables interrupts if they are currently enabled and remembers the state.
    #[inline]
    #[must_use]
    pub fn new(flag: F) -> Self {
        let enabled = flag.interrupts_enabled();
        if enabled {
            flag.disable_interrupts();
        }
        Self {
            flag,
            were_enabled: enabled,
        }
    }

    /// Whether this guard will re-enable interrupts on drop.
    #[inline]
    #[must_use]
    pub const fn restores(&self) -> bool {
        self.were_enabled
    }
}

impl<F: InterruptFlag> Drop for IrqGuard<F> {
    fn drop(&mut self) {
        if self.were_enabled {
            self.flag.enable_interrupts();
        }
    }
}

/// A spin lock guard that also keeps interrupts masked while held.
///
/// The lock is released before interrupts are restored, so a handler that
/// fires right after the critical section finds the lock free.
pub struct IrqSpinLockGuard<'a, T, F: InterruptFlag> {
    // Field order matters: the lock guard drops first.
    guard: SpinLockGuard<'a, T>,
    _irq: IrqGuard<F>,
}

impl<T> SpinLock<T> {
    /// Acquires the lock with interrupts disabled for the guard's lifetime.
    #[inline]
    pub fn lock_irq<F: InterruptFlag>(&self, flag: F) -> IrqSpinLockGuard<'_, T, F> {
        let irq = IrqGuard::new(flag);
        let guard = self.lock();
        IrqSpinLockGuard { guard, _irq: irq }
    }
}

impl<T, F: InterruptFlag> Deref for IrqSpinLockGuard<'_, T, F> {
    type Target = T;
    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T, F: InterruptFlag> DerefMut for IrqSpinLockGuard<'_, T, F> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}
