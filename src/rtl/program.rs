//! The RTL program: instruction blocks plus program-level allocation
//! state.

use crate::rtl::instruction::{RtlFlags, RtlInstruction};
use crate::rtl::register::{
    HwRegisterType, RegisterAssignment, RegisterSize, RtlRegister, MAX_REGISTER_TYPES,
};
use crate::rtl::register_set::RegisterSet;

/// Index of a basic block inside an `RtlProgram`.
pub type BlockHandle = usize;

/// Identifier of an allocated label, later bound to a byte offset by the
/// back-end's emission pass.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct LabelId(pub u16);

/// One extended basic block of RTL instructions.
#[derive(Clone, Debug, Default)]
pub struct RtlBlock {
    name: &'static str,
    instructions: Vec<RtlInstruction>,
}

impl RtlBlock {
    /// The block's diagnostic name.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Append a finished instruction.
    pub fn push(&mut self, instruction: RtlInstruction) {
        self.instructions.push(instruction);
    }

    /// Build and append an instruction in one step.
    pub fn append(
        &mut self,
        op: u16,
        data: u64,
        results: &[RegisterAssignment],
        sources: &[RegisterAssignment],
        flags: RtlFlags,
    ) {
        self.push(RtlInstruction::new(op, data, results, sources, flags));
    }

    /// The instruction sequence.
    pub fn instructions(&self) -> &[RtlInstruction] {
        &self.instructions
    }

    /// Mutable access to the instruction sequence.
    pub fn instructions_mut(&mut self) -> &mut [RtlInstruction] {
        &mut self.instructions
    }

    /// Number of instructions.
    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    /// True when the block holds no instructions.
    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    /// Replace the instruction sequence, returning the previous one.
    pub fn replace_instructions(&mut self, instructions: Vec<RtlInstruction>) -> Vec<RtlInstruction> {
        core::mem::replace(&mut self.instructions, instructions)
    }
}

/// A whole RTL program.
///
/// Today a program holds exactly one extended basic block; the block list
/// exists for later control-flow support. Program-level state covers the
/// monotonic SSA counter, the allocated labels, and (after allocation) the
/// per-class register usage sets consulted by the prologue/epilogue
/// emitters and the spill sizing.
#[derive(Clone, Debug, Default)]
pub struct RtlProgram {
    blocks: Vec<RtlBlock>,
    ssa_count: u32,
    labels: Vec<&'static str>,
    usage: Option<[RegisterSet; MAX_REGISTER_TYPES]>,
}

impl RtlProgram {
    /// An empty program.
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset to the empty state, keeping allocations.
    pub fn clear(&mut self) {
        self.blocks.clear();
        self.ssa_count = 0;
        self.labels.clear();
        self.usage = None;
    }

    /// Allocate a new, empty basic block.
    pub fn allocate_block(&mut self, name: &'static str) -> BlockHandle {
        self.blocks.push(RtlBlock {
            name,
            instructions: Vec::new(),
        });
        self.blocks.len() - 1
    }

    /// Number of blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// A block by handle.
    pub fn block(&self, handle: BlockHandle) -> &RtlBlock {
        &self.blocks[handle]
    }

    /// Mutable access to a block.
    pub fn block_mut(&mut self, handle: BlockHandle) -> &mut RtlBlock {
        &mut self.blocks[handle]
    }

    /// Mint a fresh SSA register of the given size.
    pub fn ssa_allocate(&mut self, size: RegisterSize) -> RtlRegister {
        let index = self.ssa_count;
        self.ssa_count += 1;
        RtlRegister::new(index, size)
    }

    /// Number of SSA registers minted so far.
    pub fn ssa_count(&self) -> u32 {
        self.ssa_count
    }

    /// Allocate a label identifier. Labels are bound to byte offsets by the
    /// emission pass when it reaches the corresponding `LABEL` pseudo
    /// instruction.
    pub fn allocate_label(&mut self, name: &'static str) -> LabelId {
        let id = u16::try_from(self.labels.len()).expect("label space exhausted");
        self.labels.push(name);
        LabelId(id)
    }

    /// Number of labels allocated.
    pub fn label_count(&self) -> usize {
        self.labels.len()
    }

    /// Record the allocator's per-class usage set. Reserved registers and
    /// every register the allocator handed out at least once are marked
    /// allocated.
    pub fn set_register_usage(&mut self, set: RegisterSet) {
        let usage = self.usage.get_or_insert_with(|| {
            [
                RegisterSet::new(HwRegisterType::Spill, 0),
                RegisterSet::new(HwRegisterType::Scalar, 0),
                RegisterSet::new(HwRegisterType::Vector, 0),
            ]
        });
        usage[set.ty() as usize] = set;
    }

    /// The usage set for one register class. Panics before allocation.
    pub fn register_usage(&self, ty: HwRegisterType) -> &RegisterSet {
        &self.usage.as_ref().expect("program not yet allocated")[ty as usize]
    }

    /// Number of spill slots the allocated program needs. Slots are handed
    /// out lowest-first, so this equals one plus the largest spill index
    /// in use.
    pub fn spill_size(&self) -> u32 {
        self.register_usage(HwRegisterType::Spill).allocated_count()
    }
}
