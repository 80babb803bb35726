use bitfield_struct::bitfield;

/// Architectural RFLAGS model for x86-64.
///
/// Bit 1 is fixed to one; reserved bits are padding. New tasks start from
/// [`Rflags::task_initial`], which enables interrupts so the timer can
/// preempt them from their first instruction.
#[bitfield(u64, order = Lsb)]
#[derive(PartialEq, Eq)]
pub struct Rflags {
    /// Carry Flag
    pub cf_carry: bool, // 0

    /// Always 1.
    #[bits(default = true)]
    pub always_one: bool, // 1

    /// Parity Flag
    pub pf_parity: bool, // 2

    #[bits(1)]
    __: u8, // 3

    /// Adjust Flag
    pub af_adjust: bool, // 4

    #[bits(1)]
    __: u8, // 5

    /// Zero Flag
    pub zf_zero: bool, // 6

    /// Sign Flag
    pub sf_sign: bool, // 7

    /// Trap Flag
    pub tf_trap: bool, // 8

    /// Interrupt Enable Flag
    pub if_interrupt_enable: bool, // 9

    /// Direction Flag
    pub df_direction: bool, // 10

    /// Overflow Flag
    pub of_overflow: bool, // 11

    /// I/O Privilege Level
    #[bits(2)]
    pub iopl: u8, // 12–13

    /// Nested Task
    pub nt_nested: bool, // 14

    #[bits(1)]
    __: u8, // 15

    /// Resume Flag
    pub rf_resume: bool, // 16

    #[bits(1)]
    __: u8, // 17 (VM, must be 0 in long mode)

    /// Alignment Check
    pub ac_alignment_check: bool, // 18

    /// Virtual Interrupt Flag
    pub vif_virtual_interrupt: bool, // 19

    /// Virtual Interrupt Pending
    pub vip_virtual_interrupt_pending: bool, // 20

    /// ID Flag: allows toggling CPUID.
    pub id_cpuid: bool, // 21

    #[bits(42)]
    __: u64, // 22–63
}

impl Rflags {
    /// Flags a freshly created task starts with: reserved bit set, IF set.
    #[must_use]
    pub fn task_initial() -> Self {
        Self::new()
            .with_always_one(true)
            .with_if_interrupt_enable(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_initial_enables_interrupts() {
        assert_eq!(Rflags::task_initial().into_bits(), 0x202);
    }
}
