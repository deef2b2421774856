//! Host register naming for the x86-64 backend.

use bitflags::bitflags;

/// General-purpose 64-bit registers, numbered by their encoding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Reg {
    Rax = 0,
    Rcx = 1,
    Rdx = 2,
    Rbx = 3,
    Rsp = 4,
    Rbp = 5,
    Rsi = 6,
    Rdi = 7,
    R8 = 8,
    R9 = 9,
    R10 = 10,
    R11 = 11,
    R12 = 12,
    R13 = 13,
    R14 = 14,
    R15 = 15,
}

impl Reg {
    pub fn index(self) -> u8 {
        self as u8
    }

    /// Low three bits used in ModR/M and SIB fields.
    pub fn low_bits(self) -> u8 {
        self as u8 & 7
    }

    /// Whether encoding this register requires a REX extension bit.
    pub fn is_extended(self) -> bool {
        self as u8 >= 8
    }

    fn from_index(index: u8) -> Self {
        use Reg::*;
        match index {
            0 => Rax,
            1 => Rcx,
            2 => Rdx,
            3 => Rbx,
            4 => Rsp,
            5 => Rbp,
            6 => Rsi,
            7 => Rdi,
            8 => R8,
            9 => R9,
            10 => R10,
            11 => R11,
            12 => R12,
            13 => R13,
            14 => R14,
            15 => R15,
            _ => unreachable!("register index out of range"),
        }
    }
}

/// SSE registers, numbered by their encoding index.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Xmm {
    Xmm0 = 0,
    Xmm1 = 1,
    Xmm2 = 2,
    Xmm3 = 3,
    Xmm4 = 4,
    Xmm5 = 5,
    Xmm6 = 6,
    Xmm7 = 7,
    Xmm8 = 8,
    Xmm9 = 9,
    Xmm10 = 10,
    Xmm11 = 11,
    Xmm12 = 12,
    Xmm13 = 13,
    Xmm14 = 14,
    Xmm15 = 15,
}

impl Xmm {
    pub fn index(self) -> u8 {
        self as u8
    }

    pub fn low_bits(self) -> u8 {
        self as u8 & 7
    }

    pub fn is_extended(self) -> bool {
        self as u8 >= 8
    }
}

bitflags! {
    /// A set of general-purpose registers, one bit per encoding index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct RegSet: u16 {
        const RAX = 1 << 0;
        const RCX = 1 << 1;
        const RDX = 1 << 2;
        const RBX = 1 << 3;
        const RSP = 1 << 4;
        const RBP = 1 << 5;
        const RSI = 1 << 6;
        const RDI = 1 << 7;
        const R8 = 1 << 8;
        const R9 = 1 << 9;
        const R10 = 1 << 10;
        const R11 = 1 << 11;
        const R12 = 1 << 12;
        const R13 = 1 << 13;
        const R14 = 1 << 14;
        const R15 = 1 << 15;
    }
}

impl RegSet {
    /// Registers the System V ABI requires a callee to preserve.
    pub const CALLEE_SAVED: RegSet = RegSet::RBX
        .union(RegSet::RBP)
        .union(RegSet::R12)
        .union(RegSet::R13)
        .union(RegSet::R14)
        .union(RegSet::R15);

    /// Iterate members in ascending encoding order.
    pub fn regs(self) -> impl DoubleEndedIterator<Item = Reg> {
        (0u8..16).filter_map(move |i| {
            if self.bits() & (1 << i) != 0 {
                Some(Reg::from_index(i))
            } else {
                None
            }
        })
    }

    /// Number of registers in the set.
    pub fn len(self) -> usize {
        self.bits().count_ones() as usize
    }

}

impl From<Reg> for RegSet {
    fn from(reg: Reg) -> Self {
        RegSet::from_bits_truncate(1 << reg.index())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encoding_bits() {
        assert_eq!(Reg::Rax.low_bits(), 0);
        assert_eq!(Reg::R12.low_bits(), 4);
        assert!(Reg::R12.is_extended());
        assert!(!Reg::Rsp.is_extended());
        assert!(Xmm::Xmm14.is_extended());
        assert_eq!(Xmm::Xmm14.low_bits(), 6);
    }

    #[test]
    fn test_set_iteration_order() {
        let set = RegSet::R15 | RegSet::RBX | RegSet::RSI;
        let regs: Vec<Reg> = set.regs().collect();
        assert_eq!(regs, vec![Reg::Rbx, Reg::Rsi, Reg::R15]);
        assert_eq!(set.len(), 3);
    }

    #[test]
    fn test_callee_saved_membership() {
        assert!(RegSet::CALLEE_SAVED.contains(RegSet::R13));
        assert!(!RegSet::CALLEE_SAVED.contains(RegSet::RAX));
        assert_eq!(RegSet::CALLEE_SAVED.len(), 6);
    }
}
