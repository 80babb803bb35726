//! Saving one register file and resuming another.

use crate::registers::Registers;

/// Low-level context switch.
///
/// [`Scheduler`](crate::Scheduler) decides *which* task runs; an
/// implementation of this trait performs the actual transfer of control.
pub trait ContextSwitch {
    /// Address every new task starts executing at.
    fn trampoline(&self) -> u64;

    /// Store the running context into `from` and resume `to`.
    ///
    /// Returns when some later switch resumes `from`.
    ///
    /// # Safety
    /// `from` must be valid for writes and `to` for reads for the duration of
    /// the call, and `to` must describe a context that can be resumed: a
    /// previously saved one or one built by [`Registers::initial`].
    unsafe fn switch(&mut self, from: *mut Registers, to: *const Registers);
}

/// Host stand-in that records switches instead of performing them.
///
/// After a simulated switch the caller simply keeps running, which lets the
/// test suite drive every task from one thread by acting as whichever task
/// the scheduler reports as current.
#[derive(Debug, Default)]
pub struct SimulatedSwitch {
    switches: usize,
    last_target: Option<Registers>,
}

impl SimulatedSwitch {
    /// Trampoline address reported to new tasks.
    pub const TRAMPOLINE: u64 = 0xFFFF_FFFF_8000_1000;

    #[must_use]
    pub const fn new() -> Self {
        Self {
            switches: 0,
            last_target: None,
        }
    }

    /// Number of switches performed so far.
    #[must_use]
    pub const fn switches(&self) -> usize {
        self.switches
    }

    /// Register file of the most recently resumed context.
    #[must_use]
    pub const fn last_target(&self) -> Option<&Registers> {
        self.last_target.as_ref()
    }
}

impl ContextSwitch for SimulatedSwitch {
    fn trampoline(&self) -> u64 {
        Self::TRAMPOLINE
    }

    unsafe fn switch(&mut self, _from: *mut Registers, to: *const Registers) {
        self.switches += 1;
        // SAFETY: the caller guarantees `to` is readable.
        self.last_target = Some(unsafe { *to });
    }
}

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
pub use bare_metal::X86Switch;

#[cfg(all(target_arch = "x86_64", target_os = "none"))]
mod bare_metal {
    use super::ContextSwitch;
    use crate::registers::{Registers, USER_CS, USER_SS};
    use core::mem::offset_of;

    unsafe extern "C" {
        /// Called on the new task's kernel stack before it runs its entry
        /// point. Releases whatever the switching task held.
        fn kernel_task_started();

        /// Called when a ring-0 task returns from its entry point.
        fn kernel_task_returned() -> !;
    }

    /// Context switch for `x86_64` in long mode.
    #[derive(Debug, Default)]
    pub struct X86Switch;

    impl ContextSwitch for X86Switch {
        fn trampoline(&self) -> u64 {
            task_trampoline as usize as u64
        }

        unsafe fn switch(&mut self, from: *mut Registers, to: *const Registers) {
            // SAFETY: forwarded from the caller.
            unsafe { switch_registers(from, to) }
        }
    }

    /// Saves the callee-saved state of the caller into `*rdi` and resumes
    /// `*rsi`. `cr3` is only reloaded when the root differs so a switch
    /// within one address space keeps the TLB.
    #[unsafe(naked)]
    unsafe extern "sysv64" fn switch_registers(from: *mut Registers, to: *const Registers) {
        core::arch::naked_asm!(
            "mov [rdi + {rbx}], rbx",
            "mov [rdi + {rbp}], rbp",
            "mov [rdi + {r12}], r12",
            "mov [rdi + {r13}], r13",
            "mov [rdi + {r14}], r14",
            "mov [rdi + {r15}], r15",
            "mov [rdi + {rsp}], rsp",
            "lea rax, [rip + 2f]",
            "mov [rdi + {rip}], rax",
            "pushfq",
            "pop qword ptr [rdi + {rflags}]",
            "mov rax, cr3",
            "mov [rdi + {cr3}], rax",
            "mov rcx, [rsi + {cr3}]",
            "cmp rax, rcx",
            "je 3f",
            "mov cr3, rcx",
            "3:",
            "mov rbx, [rsi + {rbx}]",
            "mov rbp, [rsi + {rbp}]",
            "mov r12, [rsi + {r12}]",
            "mov r13, [rsi + {r13}]",
            "mov r14, [rsi + {r14}]",
            "mov r15, [rsi + {r15}]",
            "mov rax, [rsi + {rax}]",
            "mov rsp, [rsi + {rsp}]",
            "push qword ptr [rsi + {rflags}]",
            "popfq",
            "jmp qword ptr [rsi + {rip}]",
            "2:",
            "ret",
            rax = const offset_of!(Registers, rax),
            rbx = const offset_of!(Registers, rbx),
            rbp = const offset_of!(Registers, rbp),
            rsp = const offset_of!(Registers, rsp),
            r12 = const offset_of!(Registers, r12),
            r13 = const offset_of!(Registers, r13),
            r14 = const offset_of!(Registers, r14),
            r15 = const offset_of!(Registers, r15),
            rip = const offset_of!(Registers, rip),
            rflags = const offset_of!(Registers, rflags),
            cr3 = const offset_of!(Registers, cr3),
        );
    }

    /// First code a new task runs. `rbx` holds the entry point, `r12` the
    /// ring and `r13` the user stack top.
    #[unsafe(naked)]
    unsafe extern "sysv64" fn task_trampoline() -> ! {
        core::arch::naked_asm!(
            "call {started}",
            "test r12, r12",
            "jnz 2f",
            "call rbx",
            "call {returned}",
            "2:",
            "push {user_ss}",
            "push r13",
            "push 0x202",
            "push {user_cs}",
            "push rbx",
            "iretq",
            started = sym kernel_task_started,
            returned = sym kernel_task_returned,
            user_ss = const USER_SS,
            user_cs = const USER_CS,
        );
    }
}
