//! Error types for the shader JIT.
//!
//! All fatal compile-time conditions surface as structured [`CompileError`]
//! values returned from `compile`, so a caller can fall back to an
//! interpreter instead of aborting.

use thiserror::Error;

/// Primary error type for shader compilation.
#[derive(Debug, Error)]
pub enum CompileError {
    /// An `IF`/`IFU` whose body target lies behind the program counter.
    #[error("backwards IF at offset {pc}: destination {dest} precedes it")]
    BackwardsIf { pc: u32, dest: u32 },

    /// A `LOOP` whose end target lies behind the program counter.
    #[error("backwards LOOP at offset {pc}: destination {dest} precedes it")]
    BackwardsLoop { pc: u32, dest: u32 },

    /// A `LOOP` encountered while another `LOOP` body is still open.
    #[error("nested LOOP at offset {pc} is not supported")]
    NestedLoop { pc: u32 },

    /// The input program exceeds the PICA program memory size.
    #[error("program too large: {len} instructions, maximum {max}")]
    ProgramTooLarge { len: usize, max: usize },

    /// The operand-descriptor table exceeds its hardware size.
    #[error("swizzle table too large: {len} entries, maximum {max}")]
    SwizzleTableTooLarge { len: usize, max: usize },

    /// The emitted code exceeds the executable buffer cap.
    #[error("generated code too large: {size} bytes exceeds cap of {cap}")]
    CodeTooLarge { size: usize, cap: usize },

    /// Mapping or protecting the executable buffer failed.
    #[error("executable mapping failed: {0}")]
    ExecMap(#[from] std::io::Error),
}

/// Result type alias for compiler operations.
pub type Result<T> = std::result::Result<T, CompileError>;
