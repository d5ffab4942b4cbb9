use kernel_registers::eflags::Eflags;

/// Ring 0 code segment selector.
pub const KERNEL_CODE_SELECTOR: u32 = 0x08;
/// Ring 0 data segment selector.
pub const KERNEL_DATA_SELECTOR: u32 = 0x10;
/// Ring 3 code segment selector (RPL 3).
pub const USER_CODE_SELECTOR: u32 = 0x1B;
/// Ring 3 data segment selector (RPL 3).
pub const USER_DATA_SELECTOR: u32 = 0x23;

/// Register snapshot as the interrupt stub lays it out on the kernel stack.
///
/// ```text
///  low   gs fs es ds            pushed by the stub
///        edi .. eax             pusha
///        interrupt error_code   pushed by the stub / CPU
///  high  eip cs eflags          pushed by the CPU
///        user_esp ss            only on a ring 3 -> ring 0 transition
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[repr(C)]
pub struct Registers {
    pub gs: u32,
    pub fs: u32,
    pub es: u32,
    pub ds: u32,
    pub edi: u32,
    pub esi: u32,
    pub ebp: u32,
    /// `esp` as saved by `pusha`; not the interrupted stack.
    pub esp: u32,
    pub ebx: u32,
    pub edx: u32,
    pub ecx: u32,
    pub eax: u32,
    pub interrupt: u32,
    pub error_code: u32,
    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub user_esp: u32,
    pub ss: u32,
}

const _: () = assert!(size_of::<Registers>() == 19 * 4);

impl Registers {
    /// Initial frame of a ring 0 task.
    #[must_use]
    pub const fn kernel(eip: u32, stack_top: u32) -> Self {
        Self::with_segments(eip, stack_top, KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR)
    }

    /// Initial frame of a ring 3 task.
    #[must_use]
    pub const fn user(eip: u32, stack_top: u32) -> Self {
        Self::with_segments(eip, stack_top, USER_CODE_SELECTOR, USER_DATA_SELECTOR)
    }

    const fn with_segments(eip: u32, stack_top: u32, code: u32, data: u32) -> Self {
        Self {
            gs: data,
            fs: data,
            es: data,
            ds: data,
            edi: 0,
            esi: 0,
            ebp: 0,
            esp: stack_top,
            ebx: 0,
            edx: 0,
            ecx: 0,
            eax: 0,
            interrupt: 0,
            error_code: 0,
            eip,
            cs: code,
            eflags: Eflags::initial_task().into_bits(),
            user_esp: stack_top,
            ss: data,
        }
    }

    /// Whether the frame was interrupted in ring 3.
    #[must_use]
    pub const fn from_user(&self) -> bool {
        self.cs & 0b11 == 3
    }
}
