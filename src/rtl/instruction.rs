//! RTL instruction records.

use core::fmt;

use smallvec::SmallVec;

use crate::rtl::register::{HwRegisterType, RegisterAssignment, MAX_REGISTER_TYPES};
use crate::rtl::register_set::RegisterSet;

/// Allocator-internal opcodes. These occupy the high-bit half of the
/// opcode space; everything below `0x8000` belongs to the back-end that
/// built the program.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
#[repr(u16)]
pub enum RtlOpcode {
    /// Register-to-register (or register-to-spill) copy inserted by
    /// `prepare` to lift pinned operands onto trivial moves.
    Move = 0x8000,
    /// A pruned instruction; emitted as nothing.
    None = 0x8001,
}

impl RtlOpcode {
    /// Bit set on every allocator-internal opcode.
    pub const FLAG: u16 = 0x8000;

    /// Decode an allocator-internal opcode value.
    pub fn from_op(op: u16) -> Option<RtlOpcode> {
        match op {
            x if x == RtlOpcode::Move as u16 => Some(RtlOpcode::Move),
            x if x == RtlOpcode::None as u16 => Some(RtlOpcode::None),
            _ => None,
        }
    }
}

bitflags::bitflags! {
    /// Per-instruction behavior bits consumed by the allocator.
    #[derive(Copy, Clone, PartialEq, Eq, Debug)]
    pub struct RtlFlags: u8 {
        /// The first source and the first result want to share a hardware
        /// register (the two-operand x86 ALU pattern). The allocator tries
        /// to coalesce them; emitters insert a move when it could not.
        const DESTRUCTIVE = 1 << 0;
        /// The allocator must snapshot its allocation state immediately
        /// before this instruction's own results become live, so that call
        /// emitters know which caller-saved registers are in use.
        const SAVE_STATE = 1 << 1;
    }
}

/// The allocator state captured at a `SAVE_STATE` instruction: one
/// availability set per register class, with reserved and live registers
/// marked allocated.
#[derive(Clone)]
pub struct SavedState {
    sets: [RegisterSet; MAX_REGISTER_TYPES],
}

impl SavedState {
    /// Capture from the allocator's per-class availability sets.
    pub fn new(sets: [RegisterSet; MAX_REGISTER_TYPES]) -> Self {
        Self { sets }
    }

    /// The availability set for one register class.
    pub fn get(&self, ty: HwRegisterType) -> &RegisterSet {
        &self.sets[ty as usize]
    }
}

/// One RTL instruction: a 16-bit opcode, a 64-bit payload (immediate,
/// label id, or bitmask, interpretation per opcode), and the result /
/// source operand records.
#[derive(Clone)]
pub struct RtlInstruction {
    /// Back-end opcode, or an `RtlOpcode` value.
    pub op: u16,
    /// Opcode-specific payload.
    pub data: u64,
    /// Allocator behavior bits.
    pub flags: RtlFlags,
    /// Allocation snapshot, filled by the allocator when `SAVE_STATE` is
    /// set.
    pub saved_state: Option<Box<SavedState>>,
    results: SmallVec<[RegisterAssignment; 2]>,
    sources: SmallVec<[RegisterAssignment; 4]>,
}

impl RtlInstruction {
    /// Build an instruction.
    pub fn new(
        op: u16,
        data: u64,
        results: &[RegisterAssignment],
        sources: &[RegisterAssignment],
        flags: RtlFlags,
    ) -> Self {
        if flags.contains(RtlFlags::DESTRUCTIVE) {
            debug_assert!(
                !results.is_empty() && !sources.is_empty(),
                "destructive instruction requires a result and a source"
            );
        }
        Self {
            op,
            data,
            flags,
            saved_state: None,
            results: SmallVec::from_slice(results),
            sources: SmallVec::from_slice(sources),
        }
    }

    /// Number of result operands.
    pub fn result_count(&self) -> usize {
        self.results.len()
    }

    /// Number of source operands.
    pub fn source_count(&self) -> usize {
        self.sources.len()
    }

    /// The `i`th result record.
    pub fn result(&self, i: usize) -> &RegisterAssignment {
        &self.results[i]
    }

    /// Mutable access to the `i`th result record.
    pub fn result_mut(&mut self, i: usize) -> &mut RegisterAssignment {
        &mut self.results[i]
    }

    /// The `i`th source record.
    pub fn source(&self, i: usize) -> &RegisterAssignment {
        &self.sources[i]
    }

    /// Mutable access to the `i`th source record.
    pub fn source_mut(&mut self, i: usize) -> &mut RegisterAssignment {
        &mut self.sources[i]
    }

    /// The captured allocation snapshot. Panics if the allocator has not
    /// run or the instruction did not request `SAVE_STATE`.
    pub fn saved_state(&self) -> &SavedState {
        self.saved_state
            .as_deref()
            .expect("instruction carries no allocation snapshot")
    }
}

impl fmt::Debug for RtlInstruction {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "op={:#06x} data={:#x}", self.op, self.data)?;
        for r in &self.results {
            write!(f, " out:{}@{}", r.rtl, r.hw)?;
        }
        for s in &self.sources {
            write!(f, " in:{}@{}", s.rtl, s.hw)?;
        }
        if !self.flags.is_empty() {
            write!(f, " [{:?}]", self.flags)?;
        }
        Ok(())
    }
}
