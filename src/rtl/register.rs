//! RTL register names and hardware register assignments.

use core::fmt;

/// Native value widths an RTL register can have. The scalar sizes map to
/// the usual integer widths; the vector sizes distinguish scalar/packed
/// single/double floating point.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
pub enum RegisterSize {
    /// 8-bit scalar.
    Byte,
    /// 16-bit scalar.
    Word,
    /// 32-bit scalar.
    Dword,
    /// 64-bit scalar.
    Qword,
    /// Scalar single-precision float.
    VecSs,
    /// Scalar double-precision float.
    VecSd,
    /// Packed single-precision floats.
    VecPs,
    /// Packed double-precision floats.
    VecPd,
}

impl RegisterSize {
    /// Scalar width in bytes. Panics on vector sizes.
    pub fn bytes(self) -> u32 {
        match self {
            RegisterSize::Byte => 1,
            RegisterSize::Word => 2,
            RegisterSize::Dword => 4,
            RegisterSize::Qword => 8,
            _ => panic!("bytes() on vector size {self:?}"),
        }
    }

    /// True for the vector sizes.
    pub fn is_vector(self) -> bool {
        matches!(
            self,
            RegisterSize::VecSs | RegisterSize::VecSd | RegisterSize::VecPs | RegisterSize::VecPd
        )
    }
}

/// A typed SSA name inside an `RtlProgram`, or the null register.
///
/// The null register appears where an operand slot exists only to carry a
/// hardware-side constraint and no value flows through the allocator.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RtlRegister {
    index: u32,
    size: RegisterSize,
}

impl RtlRegister {
    const INVALID: u32 = u32::MAX;

    /// The null register.
    pub fn none() -> Self {
        Self {
            index: Self::INVALID,
            size: RegisterSize::Byte,
        }
    }

    /// A register with the given SSA index. Only `RtlProgram::ssa_allocate`
    /// should mint fresh indices.
    pub fn new(index: u32, size: RegisterSize) -> Self {
        debug_assert!(index != Self::INVALID);
        Self { index, size }
    }

    /// True unless this is the null register.
    pub fn valid(self) -> bool {
        self.index != Self::INVALID
    }

    /// SSA index. Panics on the null register.
    pub fn index(self) -> u32 {
        debug_assert!(self.valid());
        self.index
    }

    /// The register's native size.
    pub fn size(self) -> RegisterSize {
        self.size
    }
}

impl fmt::Display for RtlRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        if self.valid() {
            write!(f, "r{}", self.index)
        } else {
            write!(f, "r-")
        }
    }
}

/// Hardware register classes. The index spaces of the classes are
/// disjoint; `Spill` indexes name stack slots rather than registers.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum HwRegisterType {
    /// A spill slot in the routine's stack frame.
    Spill = 0,
    /// General purpose scalar register.
    Scalar = 1,
    /// Vector (XMM / NEON) register.
    Vector = 2,
}

/// Number of hardware register classes.
pub const MAX_REGISTER_TYPES: usize = 3;

impl HwRegisterType {
    /// All classes, indexable by discriminant.
    pub const ALL: [HwRegisterType; MAX_REGISTER_TYPES] = [
        HwRegisterType::Spill,
        HwRegisterType::Scalar,
        HwRegisterType::Vector,
    ];
}

/// A hardware register assignment: a class plus either a concrete index or
/// the "unassigned" sentinel.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct HwRegister {
    ty: HwRegisterType,
    index: u16,
}

impl HwRegister {
    const UNASSIGNED: u16 = u16::MAX;

    /// An unassigned register of the given class ("any register of type").
    pub fn any(ty: HwRegisterType) -> Self {
        Self {
            ty,
            index: Self::UNASSIGNED,
        }
    }

    /// A concrete register of the given class.
    pub fn new(ty: HwRegisterType, index: u16) -> Self {
        debug_assert!(index != Self::UNASSIGNED);
        Self { ty, index }
    }

    /// The register class.
    pub fn ty(self) -> HwRegisterType {
        self.ty
    }

    /// True once a concrete index has been assigned (or pinned).
    pub fn assigned(self) -> bool {
        self.index != Self::UNASSIGNED
    }

    /// Concrete register index. Panics when unassigned.
    pub fn index(self) -> u16 {
        debug_assert!(self.assigned());
        self.index
    }

    /// True for spill-slot assignments.
    pub fn is_spill(self) -> bool {
        self.ty == HwRegisterType::Spill
    }

    /// Spill slot index. Panics unless this is an assigned spill slot.
    pub fn spill_index(self) -> u16 {
        debug_assert!(self.is_spill());
        self.index()
    }
}

impl fmt::Display for HwRegister {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let class = match self.ty {
            HwRegisterType::Spill => "spill",
            HwRegisterType::Scalar => "gpr",
            HwRegisterType::Vector => "vec",
        };
        if self.assigned() {
            write!(f, "{class}{}", self.index)
        } else {
            write!(f, "{class}?")
        }
    }
}

/// An operand record: an RTL register paired with the hardware constraint
/// the allocator must satisfy for it.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct RegisterAssignment {
    /// The SSA name, or null when the slot is a pure constraint.
    pub rtl: RtlRegister,
    /// Requested or resolved hardware location.
    pub hw: HwRegister,
}

impl RegisterAssignment {
    /// Pair `rtl` with any register of class `ty`.
    pub fn any(rtl: RtlRegister, ty: HwRegisterType) -> Self {
        Self {
            rtl,
            hw: HwRegister::any(ty),
        }
    }

    /// Pin `rtl` to a specific hardware register.
    pub fn pinned(rtl: RtlRegister, hw: HwRegister) -> Self {
        debug_assert!(hw.assigned());
        Self { rtl, hw }
    }

    /// Reserve a specific hardware register without naming a value: the
    /// null register pinned to `hw`. The allocator keeps the register out
    /// of the way but tracks no range for it.
    pub fn fixed(hw: HwRegister) -> Self {
        debug_assert!(hw.assigned());
        Self {
            rtl: RtlRegister::none(),
            hw,
        }
    }
}
