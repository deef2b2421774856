//! x86-64 backend: assembler, register naming and executable memory.
//!
//! Nothing in this module knows about PICA; the compiler drives it.

pub mod assembler;
pub mod memory;
pub mod regs;

pub use assembler::{Assembler, Cc, Label, Mem};
pub use memory::ExecutableBuffer;
pub use regs::{Reg, RegSet, Xmm};
