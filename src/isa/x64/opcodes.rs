//! x86-64 back-end RTL opcodes and their emit descriptors.
//!
//! The opcodes map nearly one-to-one onto hardware instructions, which is
//! what lets most of the emission run through a generic table walk. Each
//! descriptor records whether the first operand is an input and/or the
//! output, the operand count, which operands tolerate a memory location,
//! the operand width, and the assembler method to call. Opcodes needing
//! custom logic (labels, calls, branches, guest accesses, immediates,
//! widening moves) carry `EmitKind::Custom` and are handled by explicit
//! match arms in the emission pass.

use crate::isa::x64::asm::{Assembler, Cc, RegMem, ShiftKind, Xmm, XmmMem};
use crate::rtl::RegisterSize;

/// Back-end RTL opcodes for x86-64. Values stay below the allocator's
/// opcode space (high bit clear).
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u16)]
#[allow(missing_docs)]
pub enum Opcode {
    // High level / internal operations.
    /// Marks a position in the RTL stream; emits nothing, binds a label.
    Label,
    /// Push the callee-saved registers named by the payload bitmask.
    PushRegisters,
    /// Pop the callee-saved registers named by the payload bitmask, in
    /// reverse order.
    PopRegisters,
    /// Carve the spill area out of the stack frame and point the spill
    /// base register at it.
    AllocateSpill,
    /// Release the spill area.
    FreeSpill,
    /// Load a 32-bit guest register; payload is the guest register index.
    ReadGuestRegister32,
    ReadGuestRegister64,
    /// Store a 32-bit guest register; payload is the guest register index.
    WriteGuestRegister32,
    WriteGuestRegister64,
    /// Load from guest memory; payload is the byte count. Either inlined
    /// through the fast-memory emitter or a framed helper call.
    LoadGuestMemory,
    /// Call through source 0 with caller-saved registers preserved around
    /// the call; argument registers arrive via operand pins.
    CallFramed,
    /// Return to the caller.
    Ret,

    // Immediate loads.
    LoadByteImm8,
    /// Payload zero-extended into a 64-bit register.
    LoadQwordImm32,
    LoadQwordImm64,

    // Shifts and rotates by cl.
    ShrByte,
    ShrWord,
    ShrDword,
    ShrQword,
    ShlByte,
    ShlWord,
    ShlDword,
    ShlQword,
    SarByte,
    SarWord,
    SarDword,
    SarQword,
    Rol1Byte,
    Rol1Word,
    Rol1Dword,
    Rol1Qword,
    RolByte,
    RolWord,
    RolDword,
    RolQword,
    Ror1Byte,
    Ror1Word,
    Ror1Dword,
    Ror1Qword,
    RorByte,
    RorWord,
    RorDword,
    RorQword,

    // Shifts by constant.
    ShrDwordImm8,
    ShlDwordImm8,
    SarDwordImm8,

    // Bit operations.
    AndByte,
    AndWord,
    AndDword,
    AndQword,
    OrByte,
    OrWord,
    OrDword,
    OrQword,
    XorByte,
    XorWord,
    XorDword,
    XorQword,
    NotByte,
    NotWord,
    NotDword,
    NotQword,

    // Bit operations with constants.
    AndDwordImm32,
    OrDwordImm32,
    XorByteImm8,

    // ALU.
    AddByte,
    AddWord,
    AddDword,
    AddQword,
    SubByte,
    SubWord,
    SubDword,
    SubQword,
    /// One-operand widening unsigned multiply; results pinned to rax/rdx.
    MulByte,
    MulWord,
    MulDword,
    MulQword,
    ImulWord,
    ImulDword,
    ImulQword,

    // ALU with constants.
    AddDwordImm32,
    SubDwordImm32,

    // Sign extension and casting.
    Extend32Byte,
    Extend32Word,
    Zextend32Byte,
    Zextend32Word,
    Extend64Byte,
    Extend64Word,
    Extend64Dword,
    Zextend64Byte,
    Zextend64Word,
    Zextend64Dword,

    // Conditional moves.
    CmovnzWord,
    CmovnzDword,
    CmovnzQword,

    // Conditional byte set.
    Setnz,
    Setz,
    Setl,
    Setle,
    Setb,
    Setbe,

    // Comparison / test.
    TestByte,
    TestWord,
    TestDword,
    TestQword,
    CmpByte,
    CmpWord,
    CmpDword,
    CmpQword,
    TestDwordImm32,
    CmpDwordImm32,

    // Moves.
    MovByte,
    MovWord,
    MovDword,
    MovQword,
    /// GPR <-> XMM transfer, 32-bit.
    MovdDword,
    /// GPR <-> XMM transfer, 64-bit.
    MovdQword,

    // Branches; payload is the label id.
    Jmp,
    Jnz,

    // Scalar float operations.
    AddSs,
    AddSd,
    SubSs,
    SubSd,
    MulSs,
    MulSd,
    DivSs,
    DivSd,
    SqrtSs,
    SqrtSd,

    // Truncating float to integer conversions.
    CvtSsI32,
    CvtSsI64,
    CvtSdI32,
    CvtSdI64,
}

impl Opcode {
    /// The raw RTL opcode value.
    pub fn op(self) -> u16 {
        self as u16
    }
}

/// How the generic emission path invokes the assembler for one opcode.
#[derive(Copy, Clone)]
pub(crate) enum EmitKind {
    /// Handled by an explicit match arm in the emission pass.
    Custom,
    /// One reg-or-mem operand.
    Unary(fn(&mut Assembler, RegisterSize, RegMem)),
    /// Two reg-or-mem operands, destination first.
    Binary(fn(&mut Assembler, RegisterSize, RegMem, RegMem)),
    /// XMM destination and XMM-or-mem source.
    Vector(fn(&mut Assembler, Xmm, XmmMem)),
}

/// Per-opcode constraints consumed by the operand-mode reconciliation in
/// the emission pass.
pub(crate) struct EmitEntry {
    pub opcode: Opcode,
    /// The first operand is used as an input.
    pub first_input: bool,
    /// The first operand is used as an output.
    pub first_output: bool,
    /// Number of operands the native instruction accepts.
    pub operands: u8,
    /// The first operand may be a memory location.
    pub first_memory: bool,
    /// The second operand may be a memory location.
    pub second_memory: bool,
    /// Operation width.
    pub size: RegisterSize,
    pub emit: EmitKind,
}

const fn e(
    opcode: Opcode,
    first_input: bool,
    first_output: bool,
    operands: u8,
    first_memory: bool,
    second_memory: bool,
    size: RegisterSize,
    emit: EmitKind,
) -> EmitEntry {
    EmitEntry {
        opcode,
        first_input,
        first_output,
        operands,
        first_memory,
        second_memory,
        size,
        emit,
    }
}

// Custom-emission entry: constraints unused.
const fn c(opcode: Opcode) -> EmitEntry {
    e(opcode, false, false, 0, false, false, RegisterSize::Byte, EmitKind::Custom)
}

use EmitKind::{Binary, Unary, Vector};
use Opcode::*;
use RegisterSize::{Byte, Dword, Qword, VecSd, VecSs, Word};

#[rustfmt::skip]
pub(crate) static EMIT_TABLE: &[EmitEntry] = &[
    c(Label),
    c(PushRegisters),
    c(PopRegisters),
    c(AllocateSpill),
    c(FreeSpill),
    c(ReadGuestRegister32),
    c(ReadGuestRegister64),
    c(WriteGuestRegister32),
    c(WriteGuestRegister64),
    c(LoadGuestMemory),
    c(CallFramed),
    c(Ret),
    c(LoadByteImm8),
    c(LoadQwordImm32),
    c(LoadQwordImm64),
    c(ShrByte),
    c(ShrWord),
    c(ShrDword),
    c(ShrQword),
    c(ShlByte),
    c(ShlWord),
    c(ShlDword),
    c(ShlQword),
    c(SarByte),
    c(SarWord),
    c(SarDword),
    c(SarQword),
    e(Rol1Byte,  true, true, 1, true, false, Byte,  Unary(|a, s, d| a.shift_1(s, ShiftKind::Rol, d))),
    e(Rol1Word,  true, true, 1, true, false, Word,  Unary(|a, s, d| a.shift_1(s, ShiftKind::Rol, d))),
    e(Rol1Dword, true, true, 1, true, false, Dword, Unary(|a, s, d| a.shift_1(s, ShiftKind::Rol, d))),
    e(Rol1Qword, true, true, 1, true, false, Qword, Unary(|a, s, d| a.shift_1(s, ShiftKind::Rol, d))),
    c(RolByte),
    c(RolWord),
    c(RolDword),
    c(RolQword),
    e(Ror1Byte,  true, true, 1, true, false, Byte,  Unary(|a, s, d| a.shift_1(s, ShiftKind::Ror, d))),
    e(Ror1Word,  true, true, 1, true, false, Word,  Unary(|a, s, d| a.shift_1(s, ShiftKind::Ror, d))),
    e(Ror1Dword, true, true, 1, true, false, Dword, Unary(|a, s, d| a.shift_1(s, ShiftKind::Ror, d))),
    e(Ror1Qword, true, true, 1, true, false, Qword, Unary(|a, s, d| a.shift_1(s, ShiftKind::Ror, d))),
    c(RorByte),
    c(RorWord),
    c(RorDword),
    c(RorQword),
    c(ShrDwordImm8),
    c(ShlDwordImm8),
    c(SarDwordImm8),
    e(AndByte,  true, true, 2, true, true, Byte,  Binary(Assembler::and)),
    e(AndWord,  true, true, 2, true, true, Word,  Binary(Assembler::and)),
    e(AndDword, true, true, 2, true, true, Dword, Binary(Assembler::and)),
    e(AndQword, true, true, 2, true, true, Qword, Binary(Assembler::and)),
    e(OrByte,  true, true, 2, true, true, Byte,  Binary(Assembler::or)),
    e(OrWord,  true, true, 2, true, true, Word,  Binary(Assembler::or)),
    e(OrDword, true, true, 2, true, true, Dword, Binary(Assembler::or)),
    e(OrQword, true, true, 2, true, true, Qword, Binary(Assembler::or)),
    e(XorByte,  true, true, 2, true, true, Byte,  Binary(Assembler::xor)),
    e(XorWord,  true, true, 2, true, true, Word,  Binary(Assembler::xor)),
    e(XorDword, true, true, 2, true, true, Dword, Binary(Assembler::xor)),
    e(XorQword, true, true, 2, true, true, Qword, Binary(Assembler::xor)),
    e(NotByte,  true, true, 1, true, false, Byte,  Unary(Assembler::not)),
    e(NotWord,  true, true, 1, true, false, Word,  Unary(Assembler::not)),
    e(NotDword, true, true, 1, true, false, Dword, Unary(Assembler::not)),
    e(NotQword, true, true, 1, true, false, Qword, Unary(Assembler::not)),
    c(AndDwordImm32),
    c(OrDwordImm32),
    c(XorByteImm8),
    e(AddByte,  true, true, 2, true, true, Byte,  Binary(Assembler::add)),
    e(AddWord,  true, true, 2, true, true, Word,  Binary(Assembler::add)),
    e(AddDword, true, true, 2, true, true, Dword, Binary(Assembler::add)),
    e(AddQword, true, true, 2, true, true, Qword, Binary(Assembler::add)),
    e(SubByte,  true, true, 2, true, true, Byte,  Binary(Assembler::sub)),
    e(SubWord,  true, true, 2, true, true, Word,  Binary(Assembler::sub)),
    e(SubDword, true, true, 2, true, true, Dword, Binary(Assembler::sub)),
    e(SubQword, true, true, 2, true, true, Qword, Binary(Assembler::sub)),
    c(MulByte),
    c(MulWord),
    c(MulDword),
    c(MulQword),
    e(ImulWord,  true, true, 2, false, true, Word,  Binary(Assembler::imul)),
    e(ImulDword, true, true, 2, false, true, Dword, Binary(Assembler::imul)),
    e(ImulQword, true, true, 2, false, true, Qword, Binary(Assembler::imul)),
    c(AddDwordImm32),
    c(SubDwordImm32),
    c(Extend32Byte),
    c(Extend32Word),
    c(Zextend32Byte),
    c(Zextend32Word),
    c(Extend64Byte),
    c(Extend64Word),
    c(Extend64Dword),
    c(Zextend64Byte),
    c(Zextend64Word),
    c(Zextend64Dword),
    e(CmovnzWord,  true, true, 2, false, true, Word,  Binary(|a, s, d, src| a.cmov(s, Cc::Nz, d, src))),
    e(CmovnzDword, true, true, 2, false, true, Dword, Binary(|a, s, d, src| a.cmov(s, Cc::Nz, d, src))),
    e(CmovnzQword, true, true, 2, false, true, Qword, Binary(|a, s, d, src| a.cmov(s, Cc::Nz, d, src))),
    e(Setnz, false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::Nz, d))),
    e(Setz,  false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::Z, d))),
    e(Setl,  false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::L, d))),
    e(Setle, false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::Le, d))),
    e(Setb,  false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::B, d))),
    e(Setbe, false, true, 1, true, false, Byte, Unary(|a, _s, d| a.set(Cc::Be, d))),
    e(TestByte,  true, false, 2, true, true, Byte,  Binary(Assembler::test)),
    e(TestWord,  true, false, 2, true, true, Word,  Binary(Assembler::test)),
    e(TestDword, true, false, 2, true, true, Dword, Binary(Assembler::test)),
    e(TestQword, true, false, 2, true, true, Qword, Binary(Assembler::test)),
    e(CmpByte,  true, false, 2, true, true, Byte,  Binary(Assembler::cmp)),
    e(CmpWord,  true, false, 2, true, true, Word,  Binary(Assembler::cmp)),
    e(CmpDword, true, false, 2, true, true, Dword, Binary(Assembler::cmp)),
    e(CmpQword, true, false, 2, true, true, Qword, Binary(Assembler::cmp)),
    c(TestDwordImm32),
    c(CmpDwordImm32),
    e(MovByte,  false, true, 2, true, true, Byte,  Binary(Assembler::mov)),
    e(MovWord,  false, true, 2, true, true, Word,  Binary(Assembler::mov)),
    e(MovDword, false, true, 2, true, true, Dword, Binary(Assembler::mov)),
    e(MovQword, false, true, 2, true, true, Qword, Binary(Assembler::mov)),
    c(MovdDword),
    c(MovdQword),
    c(Jmp),
    c(Jnz),
    e(AddSs, true, true, 2, false, true, VecSs, Vector(Assembler::addss)),
    e(AddSd, true, true, 2, false, true, VecSd, Vector(Assembler::addsd)),
    e(SubSs, true, true, 2, false, true, VecSs, Vector(Assembler::subss)),
    e(SubSd, true, true, 2, false, true, VecSd, Vector(Assembler::subsd)),
    e(MulSs, true, true, 2, false, true, VecSs, Vector(Assembler::mulss)),
    e(MulSd, true, true, 2, false, true, VecSd, Vector(Assembler::mulsd)),
    e(DivSs, true, true, 2, false, true, VecSs, Vector(Assembler::divss)),
    e(DivSd, true, true, 2, false, true, VecSd, Vector(Assembler::divsd)),
    e(SqrtSs, false, true, 2, false, true, VecSs, Vector(Assembler::sqrtss)),
    e(SqrtSd, false, true, 2, false, true, VecSd, Vector(Assembler::sqrtsd)),
    c(CvtSsI32),
    c(CvtSsI64),
    c(CvtSdI32),
    c(CvtSdI64),
];

/// Look up the emit descriptor for a back-end opcode value.
pub(crate) fn emit_entry(op: u16) -> &'static EmitEntry {
    let entry = &EMIT_TABLE[op as usize];
    debug_assert_eq!(entry.opcode.op(), op, "emit table out of sync");
    entry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_matches_opcode_order() {
        for (i, entry) in EMIT_TABLE.iter().enumerate() {
            assert_eq!(entry.opcode.op() as usize, i, "entry {i} out of order");
        }
        assert_eq!(EMIT_TABLE.len(), Opcode::CvtSdI64.op() as usize + 1);
    }
}
