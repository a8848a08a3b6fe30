//! Result and error types representing the outcome of compiling a guest
//! block.
//!
//! Invariant violations inside the pipeline (unknown widths, impossible
//! pinnings, malformed RTL) are programmer errors and panic; the variants
//! here are the conditions an embedder is expected to recover from by
//! falling back to its interpreter.

use std::collections::BTreeSet;

/// An error produced while attempting to compile a guest block.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CodegenError {
    /// The block uses guest IR opcodes the back-end does not implement.
    /// The set holds the raw opcode discriminants, collected over the whole
    /// block so one diagnostic covers everything that is missing.
    #[error("unsupported guest IR opcodes: {opcodes:?}")]
    Unsupported {
        /// Raw discriminants of every unimplemented opcode encountered.
        opcodes: BTreeSet<u32>,
    },

    /// Register pressure forced a spill on a back-end without spill
    /// support (AArch64).
    #[error("register allocation spilled on a back-end without spill support")]
    SpillUnsupported,

    /// No back-end exists for the requested target triple.
    #[error("unsupported target: {0}")]
    UnsupportedTarget(String),
}

/// A convenient alias for a `Result` that uses `CodegenError` as the error
/// type.
pub type CodegenResult<T> = Result<T, CodegenError>;
