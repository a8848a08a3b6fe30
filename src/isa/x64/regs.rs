//! x86-64 register definitions and calling-convention constants.
//!
//! Linux and macOS both use the Sys V ABI:
//!
//! - caller-saved: rax, rcx, rdx, rsi, rdi, r8-r11
//! - callee-saved: rbx, rbp, r12-r15
//! - arguments:    rdi, rsi, rdx, rcx, r8, r9
//! - return:       rax

use crate::rtl::{HwRegister, HwRegisterType};

/// A general purpose register, identified by its hardware encoding.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Gpr(u8);

impl Gpr {
    /// Construct from a hardware encoding (0..16).
    pub const fn new(enc: u8) -> Self {
        assert!(enc < 16);
        Self(enc)
    }

    /// The 4-bit hardware encoding.
    pub const fn enc(self) -> u8 {
        self.0
    }

    /// The matching scalar RTL hardware register.
    pub fn hw(self) -> HwRegister {
        HwRegister::new(HwRegisterType::Scalar, self.0.into())
    }

    /// From an assigned scalar RTL hardware register.
    pub fn from_hw(hw: HwRegister) -> Self {
        assert_eq!(hw.ty(), HwRegisterType::Scalar);
        Self::new(hw.index() as u8)
    }
}

/// An XMM register.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct Xmm(u8);

impl Xmm {
    /// Construct from a hardware encoding (0..16).
    pub const fn new(enc: u8) -> Self {
        assert!(enc < 16);
        Self(enc)
    }

    /// The 4-bit hardware encoding.
    pub const fn enc(self) -> u8 {
        self.0
    }

    /// The matching vector RTL hardware register.
    pub fn hw(self) -> HwRegister {
        HwRegister::new(HwRegisterType::Vector, self.0.into())
    }

    /// From an assigned vector RTL hardware register.
    pub fn from_hw(hw: HwRegister) -> Self {
        assert_eq!(hw.ty(), HwRegisterType::Vector);
        Self::new(hw.index() as u8)
    }
}

#[allow(missing_docs)]
pub const RAX: Gpr = Gpr::new(0);
#[allow(missing_docs)]
pub const RCX: Gpr = Gpr::new(1);
#[allow(missing_docs)]
pub const RDX: Gpr = Gpr::new(2);
#[allow(missing_docs)]
pub const RBX: Gpr = Gpr::new(3);
#[allow(missing_docs)]
pub const RSP: Gpr = Gpr::new(4);
#[allow(missing_docs)]
pub const RBP: Gpr = Gpr::new(5);
#[allow(missing_docs)]
pub const RSI: Gpr = Gpr::new(6);
#[allow(missing_docs)]
pub const RDI: Gpr = Gpr::new(7);
#[allow(missing_docs)]
pub const R8: Gpr = Gpr::new(8);
#[allow(missing_docs)]
pub const R9: Gpr = Gpr::new(9);
#[allow(missing_docs)]
pub const R10: Gpr = Gpr::new(10);
#[allow(missing_docs)]
pub const R11: Gpr = Gpr::new(11);
#[allow(missing_docs)]
pub const R12: Gpr = Gpr::new(12);
#[allow(missing_docs)]
pub const R13: Gpr = Gpr::new(13);
#[allow(missing_docs)]
pub const R14: Gpr = Gpr::new(14);
#[allow(missing_docs)]
pub const R15: Gpr = Gpr::new(15);

/// Register holding the guest handle for the lifetime of the routine
/// (first ABI argument, left in place).
pub const GPR_GUEST: Gpr = RDI;

/// Register holding the guest memory base. Callee-saved so helper calls
/// cannot clobber it; only reserved when the block touches guest memory.
pub const GPR_MEMORY_BASE: Gpr = R14;

/// Register holding the guest register file base. Callee-saved.
pub const GPR_REGISTER_BASE: Gpr = R15;

/// Scratch register for operand-mode reconciliation, and the holder of the
/// routine's exit value between an `Exit` test firing and the epilogue.
/// Callee-saved so helper calls made in between cannot clobber the exit
/// value.
pub const GPR_SCRATCH: Gpr = RBX;

/// Vector scratch register.
pub const VEC_SCRATCH: Xmm = Xmm::new(15);

fn bit(reg: Gpr) -> u32 {
    1 << reg.enc()
}

/// Caller-saved GPRs under the Sys V ABI.
pub fn abi_caller_saved() -> u32 {
    bit(RAX) | bit(RCX) | bit(RDX) | bit(RSI) | bit(RDI) | bit(R8) | bit(R9) | bit(R10) | bit(R11)
}

/// Callee-saved GPRs under the Sys V ABI.
pub fn abi_callee_saved() -> u32 {
    bit(RBX) | bit(RBP) | bit(R12) | bit(R13) | bit(R14) | bit(R15)
}

/// Display name of a GPR at its full width.
pub fn gpr_name(reg: Gpr) -> &'static str {
    const NAMES: [&str; 16] = [
        "rax", "rcx", "rdx", "rbx", "rsp", "rbp", "rsi", "rdi", "r8", "r9", "r10", "r11", "r12",
        "r13", "r14", "r15",
    ];
    NAMES[reg.enc() as usize]
}
