//! AArch64 back-end: lowers guest IR to RTL, allocates registers, and
//! emits AAPCS64 machine code.
//!
//! Register conventions inside an emitted routine:
//!
//! - x0 holds the guest handle for the whole routine (first argument).
//! - x9 holds the guest memory base (moved from x1 in the prologue).
//! - x10 holds the guest register file base (moved from x2).
//! - x18 (platform register), x29/x30 (frame), sp and the callee-saved
//!   registers are kept away from the allocator.
//!
//! Spill is not supported: blocks whose register pressure exceeds the
//! pool report `CodegenError::SpillUnsupported` and are expected to run
//! in the interpreter instead.

pub mod asm;
pub mod imms;
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
use crate::rtl::{HwRegister, HwRegisterType, RegisterSet, RtlProgram};

/// The AArch64 compiler.
pub struct Compiler {
    register_address: Option<RegisterAddressFn>,
    load_helper: LoadHelper,
    store_helper: StoreHelper,
    use_fastmem: bool,
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
            use_fastmem: false,
        }
    }

    /// Install the guest-register address callback.
    pub fn set_register_address(&mut self, callback: RegisterAddressFn) {
        self.register_address = Some(callback);
    }

    /// Enable the fast-memory path: 1/2/4-byte integer loads become a
    /// direct `ldr` through the memory base instead of a helper call.
    /// Only valid when the whole guest address space is a flat mapping.
    pub fn set_fastmem(&mut self, enabled: bool) {
        self.use_fastmem = enabled;
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

        let lowering = lower::LowerCtx::new(
            &program,
            self.use_fastmem,
            self.load_helper as usize as u64,
            self.store_helper as usize as u64,
        )
        .generate_rtl()?;

        let allocated = assign_registers(lowering.rtl);

        let code = emit::EmitCtx::new(&allocated, register_address).assemble()?;

        Ok(Routine::new(code, RoutineArch::Aarch64))
    }
}

/// Run the linear allocator with the AArch64 register pools.
fn assign_registers(rtl: RtlProgram) -> RtlProgram {
    let mut scalar_set = RegisterSet::new(HwRegisterType::Scalar, 32);

    // x31 is sp; x30 the link register.
    scalar_set.mark_allocated(HwRegister::new(HwRegisterType::Scalar, 31));
    scalar_set.mark_allocated(HwRegister::new(HwRegisterType::Scalar, 30));

    // Keep the callee-saved registers out of the pool entirely rather
    // than tracking their save/restore.
    for num in 0..32 {
        if regs::abi_callee_saved() & (1 << num) != 0 {
            scalar_set.mark_allocated(HwRegister::new(HwRegisterType::Scalar, num));
        }
    }

    // x18 is platform specific; Apple says don't touch.
    scalar_set.mark_allocated(HwRegister::new(HwRegisterType::Scalar, 18));

    // The guest handle and the two base pointers.
    scalar_set.mark_allocated(regs::GPR_GUEST.hw());
    scalar_set.mark_allocated(regs::GPR_MEMORY_BASE.hw());
    scalar_set.mark_allocated(regs::GPR_REGISTER_BASE.hw());

    let vector_set = RegisterSet::new(HwRegisterType::Vector, 32);

    let mut allocator = LinearAllocator::new();
    allocator.define_register_type(scalar_set);
    allocator.define_register_type(vector_set);
    allocator.allocate(rtl)
}

impl TargetIsa for Compiler {
    fn name(&self) -> &'static str {
        "aarch64"
    }

    fn set_register_address(&mut self, callback: RegisterAddressFn) {
        Compiler::set_register_address(self, callback);
    }

    fn compile(&mut self, program: IrProgram) -> CodegenResult<Routine> {
        Compiler::compile(self, program)
    }
}
