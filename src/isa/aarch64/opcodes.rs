//! AArch64 back-end RTL opcodes.
//!
//! Unlike x86-64 there is no generic emit table: A64 is a fixed-width
//! three-operand ISA and every opcode gets an explicit arm in the emission
//! pass.

/// Back-end RTL opcodes for AArch64. Values stay below the allocator's
/// opcode space (high bit clear).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Opcode {
    /// Push a subset of x0-x31 named by the payload bitmask.
    PushGprs,
    /// Pop the same subset, in reverse.
    PopGprs,
    /// Binds an RTL label to the current position.
    Label,
    /// Exit the routine with the payload as exit code when source 0 is
    /// non-zero.
    CondRet,
    /// Exit the routine unconditionally with the payload as exit code.
    Ret,
    LoadImm32,
    LoadImm64,
    ReadGuestRegister32,
    WriteGuestRegister32,
    ReadGuestRegister64,
    WriteGuestRegister64,
    /// Inline (fast-memory) load; payload is the byte count.
    LoadGuestMemory,
    /// 32-bit move between a general and a vector register.
    Fmov32,
    /// 64-bit move between a general and a vector register.
    Fmov64,
    Add32,
    Add64,
    Sub32,
    Sub64,
    /// Unsigned widening 32x32 multiply.
    Umul32,
    Mul32,
    Div32,
    Sqrt32,
    Or32,
    And32,
    And64,
    Xor32,
    /// Logical-immediate forms; the payload holds the constant, which must
    /// be representable.
    Or32Imm,
    And32Imm,
    And64Imm,
    Xor32Imm,
    Shl32Imm,
    Shl32,
    Shr32Imm,
    Shr32,
    Sar32Imm,
    Sar32,
    /// Booleanize: result = (source != 0).
    Test32,
    /// result = source 0 ? source 2 : source 1.
    CondSelect32,
    /// Compare and set: payload is the condition code.
    Cmp,
    Extend32Byte,
    Extend32Word,
    /// Call through source 0 with caller-saved registers preserved.
    CallFramed,
}

impl Opcode {
    /// The raw RTL opcode value.
    pub fn op(self) -> u16 {
        self as u16
    }

    /// Decode a raw opcode value.
    pub fn from_op(op: u16) -> Option<Opcode> {
        ALL.get(op as usize).copied()
    }
}

use Opcode::*;
const ALL: [Opcode; 42] = [
    PushGprs,
    PopGprs,
    Label,
    CondRet,
    Ret,
    LoadImm32,
    LoadImm64,
    ReadGuestRegister32,
    WriteGuestRegister32,
    ReadGuestRegister64,
    WriteGuestRegister64,
    LoadGuestMemory,
    Fmov32,
    Fmov64,
    Add32,
    Add64,
    Sub32,
    Sub64,
    Umul32,
    Mul32,
    Div32,
    Sqrt32,
    Or32,
    And32,
    And64,
    Xor32,
    Or32Imm,
    And32Imm,
    And64Imm,
    Xor32Imm,
    Shl32Imm,
    Shl32,
    Shr32Imm,
    Shr32,
    Sar32Imm,
    Sar32,
    Test32,
    CondSelect32,
    Cmp,
    Extend32Byte,
    Extend32Word,
    CallFramed,
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip() {
        for (i, &op) in ALL.iter().enumerate() {
            assert_eq!(op.op() as usize, i);
            assert_eq!(Opcode::from_op(op.op()), Some(op));
        }
        assert_eq!(Opcode::from_op(ALL.len() as u16), None);
    }
}
