//! x86-64 back-end: lowers guest IR to RTL, allocates registers, and
//! emits Sys V machine code.
//!
//! Register conventions inside an emitted routine:
//!
//! - rdi holds the guest handle for the whole routine (first argument).
//! - r14 holds the guest memory base (moved from rsi in the prologue;
//!   only reserved when the block touches guest memory).
//! - r15 holds the guest register file base (moved from rdx).
//! - rbx is the scratch register and carries the pending exit value.
//! - rbp is the spill base; rsp the stack pointer.
//! - xmm15 is the vector scratch.
//!
//! Everything else is handed to the register allocator.

pub mod asm;
pub mod regs;

mod emit;
mod lower;
mod opcodes;

pub use self::opcodes::Opcode;

use crate::ir::IrProgram;
use crate::isa::{self, LoadHelper, RegisterAddressFn, StoreHelper, TargetIsa};
use crate::regalloc::LinearAllocator;
use crate::result::CodegenResult;
use crate::routine::{Routine, RoutineArch};
use crate::rtl::{HwRegisterType, RegisterSet, RtlProgram};

use self::asm::Assembler;
use self::regs::Gpr;

/// A caller-provided fast-memory emitter: inlines a guest load of `bytes`
/// bytes from the address register into the result register, instead of
/// the helper call.
pub type LoadEmitter = fn(&mut Assembler, usize, Gpr, Gpr);

/// The x86-64 compiler.
pub struct Compiler {
    register_address: Option<RegisterAddressFn>,
    load_helper: LoadHelper,
    store_helper: StoreHelper,
    load_emitter: Option<LoadEmitter>,
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

impl Compiler {
    /// A compiler with the default guest-memory helpers installed.
    pub fn new() -> Self {
        Self {
            register_address: None,
            load_helper: isa::guest_load,
            store_helper: isa::guest_store,
            load_emitter: None,
        }
    }

    /// Install the guest-register address callback.
    pub fn set_register_address(&mut self, callback: RegisterAddressFn) {
        self.register_address = Some(callback);
    }

    /// Install an optional fast-memory load emitter. Loads then inline
    /// instead of calling the load helper.
    pub fn set_load_emitter(&mut self, emitter: Option<LoadEmitter>) {
        self.load_emitter = emitter;
    }

    /// Replace the guest memory helpers.
    pub fn set_memory_helpers(&mut self, load: LoadHelper, store: StoreHelper) {
        self.load_helper = load;
        self.store_helper = store;
    }

    /// Compile a guest IR program to machine code.
    pub fn compile(&mut self, program: IrProgram) -> CodegenResult<Routine> {
        let register_address = self
            .register_address
            .expect("register address callback not configured");

        let lowering = lower::LowerCtx::new(&program, self.store_helper as usize as u64)
            .generate_rtl(self.load_emitter.is_some());

        let allocated = assign_registers(lowering.rtl, lowering.uses_memory);

        let code = emit::EmitCtx::new(
            &allocated,
            register_address,
            self.load_helper as usize as u64,
            self.load_emitter,
        )
        .assemble();

        Ok(Routine::new(code, RoutineArch::X64))
    }
}

/// Run the linear allocator with the x86-64 register pools.
fn assign_registers(rtl: RtlProgram, uses_memory: bool) -> RtlProgram {
    let mut scalar_set = RegisterSet::new(HwRegisterType::Scalar, 16);
    scalar_set.mark_allocated(regs::GPR_GUEST.hw());
    scalar_set.mark_allocated(regs::GPR_REGISTER_BASE.hw());
    scalar_set.mark_allocated(regs::RBP.hw());
    scalar_set.mark_allocated(regs::RSP.hw());
    scalar_set.mark_allocated(regs::GPR_SCRATCH.hw());
    if uses_memory {
        scalar_set.mark_allocated(regs::GPR_MEMORY_BASE.hw());
    }

    let mut vector_set = RegisterSet::new(HwRegisterType::Vector, 16);
    vector_set.mark_allocated(regs::VEC_SCRATCH.hw());

    let mut allocator = LinearAllocator::new();
    allocator.define_register_type(scalar_set);
    allocator.define_register_type(vector_set);
    allocator.allocate(rtl)
}

impl TargetIsa for Compiler {
    fn name(&self) -> &'static str {
        "x64"
    }

    fn set_register_address(&mut self, callback: RegisterAddressFn) {
        Compiler::set_register_address(self, callback);
    }

    fn compile(&mut self, program: IrProgram) -> CodegenResult<Routine> {
        Compiler::compile(self, program)
    }
}
