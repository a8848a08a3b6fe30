//! RTL: the back-ends' register transfer list form.
//!
//! RTL sits one level below the guest IR and one level above machine code.
//! A program is a sequence of fixed-layout three-address instructions over
//! typed SSA registers; each operand additionally carries a hardware
//! register constraint that the allocator resolves. The low half of the
//! 16-bit opcode space belongs to the back-end that built the program; the
//! high bit marks allocator-internal opcodes (`Move`, `None`).

mod instruction;
mod program;
mod register;
mod register_set;

pub use self::instruction::{RtlFlags, RtlInstruction, RtlOpcode, SavedState};
pub use self::program::{BlockHandle, LabelId, RtlBlock, RtlProgram};
pub use self::register::{
    HwRegister, HwRegisterType, RegisterAssignment, RegisterSize, RtlRegister, MAX_REGISTER_TYPES,
};
pub use self::register_set::RegisterSet;
