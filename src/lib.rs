//! PICA200 vertex-shader JIT for x86-64.
//!
//! This library translates programs written in the PICA200 vertex-shader
//! instruction set (the GPU of the Nintendo 3DS) into native x86-64 machine
//! code. Each shader program becomes a single compiled function, invoked
//! once per vertex, replacing per-instruction interpretation.
//!
//! # Features
//!
//! - **Full vertex ISA**: arithmetic, comparison, `MOVA` addressing,
//!   structured `if`/`else`, bounded loops, calls and conditional jumps
//! - **PICA arithmetic semantics**: NaN-sanitised multiplies, hardware
//!   `min`/`max` NaN behaviour, approximate `rcp`/`rsq`
//! - **SSE2 baseline**: with `blendps`/`roundps` fast paths on SSE4.1 hosts
//! - **Structured errors**: malformed control flow is reported, not fatal,
//!   so callers can fall back to interpretation
//!
//! # Quick Start
//!
//! ```rust
//! use pica_jit::{compile, Float4, ShaderSetup, UnitState};
//!
//! // mov o0, v0; end — with a full write mask and identity swizzles.
//! let program = [0x4c00_0000, 0x8800_0000];
//! let swizzle = [0x0d86_c36f];
//! let shader = compile(&program, &swizzle)?;
//!
//! let setup = ShaderSetup::new();
//! let mut state = UnitState::new();
//! state.input[0] = Float4::new(1.0, 2.0, 3.0, 4.0);
//! unsafe { shader.run(&setup, &mut state, 0) };
//! assert_eq!(state.output[0], Float4::new(1.0, 2.0, 3.0, 4.0));
//! # Ok::<(), pica_jit::CompileError>(())
//! ```
//!
//! # Architecture
//!
//! The crate is organised leaves-first:
//!
//! - [`isa`]: pure data — instruction decoding, opcodes, swizzle patterns
//! - [`backend`]: a thin x86-64 assembler, labels and executable memory
//! - [`runtime`]: the setup and per-unit state blocks shared with generated
//!   code, plus the `extern "C"` helper trampolines
//! - [`compiler`]: the control-flow pre-pass and the instruction compiler
//!
//! Generated code targets x86-64 System V hosts.

#![warn(unsafe_op_in_unsafe_fn)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::similar_names)]
#![allow(clippy::too_many_lines)]

pub mod backend;
pub mod compiler;
pub mod error;
pub mod isa;
pub mod runtime;

pub use compiler::{
    compile, compile_with_options, CompileReport, CompilerOptions, JitShader,
};
pub use error::{CompileError, Result};
pub use isa::{Instruction, OpCode, MAX_PROGRAM_LEN};
pub use runtime::{Float4, ShaderSetup, UnitState};
