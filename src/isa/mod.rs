//! PICA200 vertex-shader ISA model.
//!
//! Pure data: instruction-word decoding, opcode classification, operand
//! descriptors and register typing. No code generation happens here.

pub mod instruction;
pub mod opcode;
pub mod registers;
pub mod swizzle;

pub use instruction::{Combinator, CompareOp, Instruction};
pub use opcode::{OpCode, OpFamily};
pub use registers::{DestRegister, RegisterType, SourceRegister};
pub use swizzle::{SwizzlePattern, IDENTITY_SELECTOR};

/// Maximum number of instruction words in PICA program memory.
pub const MAX_PROGRAM_LEN: usize = 512;

/// Number of entries in the operand-descriptor table.
pub const MAX_SWIZZLE_PATTERNS: usize = 128;
