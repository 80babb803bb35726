use kernel_memory_addresses::PhysicalAddress;
use kernel_registers::{Cr3, Rflags};

/// Kernel code segment selector.
pub const KERNEL_CS: u64 = 0x08;
/// Kernel data segment selector.
pub const KERNEL_SS: u64 = 0x10;
/// User code segment selector (RPL 3).
pub const USER_CS: u64 = 0x1B;
/// User data segment selector (RPL 3).
pub const USER_SS: u64 = 0x23;

/// Saved register file of a task that is not currently running.
///
/// The layout is fixed because the switch routine addresses the fields by
/// offset. Only the callee-saved registers, `rsp`, `rip`, `rflags` and `cr3`
/// are live across a voluntary switch; the rest carry values a new task
/// starts with (e.g. `rax = 0` in a copied task).
#[repr(C)]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Registers {
    pub rax: u64,
    pub rbx: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rbp: u64,
    pub rsp: u64,
    pub r8: u64,
    pub r9: u64,
    pub r10: u64,
    pub r11: u64,
    pub r12: u64,
    pub r13: u64,
    pub r14: u64,
    pub r15: u64,
    pub rip: u64,
    pub rflags: u64,
    pub cr3: u64,
    pub cs: u64,
    pub ss: u64,
}

impl Registers {
    /// Register file of a task that has never run.
    ///
    /// The task resumes at `trampoline` on `kernel_stack_top` with interrupts
    /// enabled. The trampoline finds the real entry point in `rbx`, the
    /// privilege ring in `r12` and the user stack pointer in `r13`.
    #[must_use]
    pub fn initial(
        trampoline: u64,
        entry: u64,
        ring: u8,
        kernel_stack_top: u64,
        user_stack_top: u64,
        root: PhysicalAddress,
    ) -> Self {
        Self {
            rbx: entry,
            r12: u64::from(ring),
            r13: user_stack_top,
            rsp: kernel_stack_top,
            rip: trampoline,
            rflags: Rflags::task_initial().into_bits(),
            cr3: Cr3::from_root(root).into_bits(),
            cs: KERNEL_CS,
            ss: KERNEL_SS,
            ..Self::default()
        }
    }

    /// Address-space root this register file switches to.
    #[must_use]
    pub fn root(&self) -> PhysicalAddress {
        Cr3::from_bits(self.cr3).root()
    }

    /// Point the register file at another address-space root.
    pub fn set_root(&mut self, root: PhysicalAddress) {
        self.cr3 = Cr3::from_root(root).into_bits();
    }
}
