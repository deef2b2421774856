//! The instruction compiler: walks a PICA program and emits native code.
//!
//! One compiled function is produced per shader program. The generated code
//! follows a fixed internal register convention (see the constants below)
//! and is entered through a small prologue that pins the setup and unit
//! state pointers, zeroes the addressing registers, loads the two vector
//! constants and jumps to the requested entry label.

pub mod analyzer;

use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::backend::{Assembler, Cc, ExecutableBuffer, Label, Mem, Reg, RegSet, Xmm};
use crate::error::{CompileError, Result};
use crate::isa::{
    instruction::{Combinator, CompareOp},
    swizzle, Instruction, OpCode, RegisterType, SourceRegister, SwizzlePattern,
    DestRegister, IDENTITY_SELECTOR, MAX_PROGRAM_LEN, MAX_SWIZZLE_PATTERNS,
};
use crate::runtime::{helpers, Float4, ShaderSetup, UnitState};

/// Upper bound on emitted code size.
const MAX_CODE_SIZE: usize = 2 << 20;

// Fixed register roles of the generated code. The first six are callee-saved
// and survive foreign calls; rsi/rdi/r11 are spilled around them.
const SETUP: Reg = Reg::R12;
const STATE: Reg = Reg::R13;
const ADDR0: Reg = Reg::R14;
const ADDR1: Reg = Reg::R15;
const LOOP_OFF: Reg = Reg::Rbx;
const LOOP_COUNT: Reg = Reg::Rbp;
const LOOP_INC: Reg = Reg::R11;
const COND0: Reg = Reg::Rsi;
const COND1: Reg = Reg::Rdi;
const SCRATCH: Reg = Reg::Rax;
const SCRATCH2: Reg = Reg::Rcx;

const SRC1: Xmm = Xmm::Xmm1;
const SRC2: Xmm = Xmm::Xmm2;
const SRC3: Xmm = Xmm::Xmm3;
const XSCRATCH: Xmm = Xmm::Xmm0;
const XSCRATCH2: Xmm = Xmm::Xmm4;
const ONE: Xmm = Xmm::Xmm14;
const NEG_BIT: Xmm = Xmm::Xmm15;

/// Role registers that are caller-saved under System V and therefore spilled
/// around foreign calls.
const CALLER_SAVED_ROLES: RegSet = RegSet::RSI.union(RegSet::RDI).union(RegSet::R11);

// Vector constants loaded at entry and reloaded after foreign calls (all xmm
// registers are caller-saved).
static ONE_VEC: Float4 = Float4::splat(1.0);
static NEG_ZERO_VEC: Float4 = Float4::splat(-0.0);

static UNIMPLEMENTED_MSG: &[u8] = b"unimplemented shader opcode reached\0";

/// Compilation options.
#[derive(Debug, Clone, Default)]
pub struct CompilerOptions {
    sse41: Option<bool>,
}

impl CompilerOptions {
    pub fn new() -> Self {
        CompilerOptions::default()
    }

    /// Force the SSE4.1 fast paths on or off instead of detecting them.
    pub fn with_sse41(mut self, enabled: bool) -> Self {
        self.sse41 = Some(enabled);
        self
    }

    fn resolve_sse41(&self) -> bool {
        self.sse41.unwrap_or_else(detect_sse41)
    }
}

#[cfg(target_arch = "x86_64")]
fn detect_sse41() -> bool {
    std::arch::is_x86_feature_detected!("sse4.1")
}

#[cfg(not(target_arch = "x86_64"))]
fn detect_sse41() -> bool {
    false
}

/// Summary of one compilation, for reporting and diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct CompileReport {
    /// Number of input instruction words.
    pub program_len: usize,
    /// Emitted native code size in bytes.
    pub code_size: usize,
    /// Return points found by the pre-pass.
    pub return_offsets: Vec<u32>,
    /// Whether the SSE4.1 fast paths were used.
    pub sse41: bool,
}

/// A compiled shader: sealed executable code plus the per-offset entry table.
#[derive(Debug)]
pub struct JitShader {
    buffer: ExecutableBuffer,
    entry_points: Vec<usize>,
    return_offsets: Vec<u32>,
    sse41: bool,
}

type Entry = unsafe extern "sysv64" fn(*const ShaderSetup, *mut UnitState, *const u8);

impl JitShader {
    /// Run the shader from `entry_offset`.
    ///
    /// # Panics
    ///
    /// Panics if `entry_offset` is not a valid instruction offset.
    ///
    /// # Safety
    ///
    /// The program this shader was compiled from steers native code: address
    /// registers loaded by `MOVA` become unchecked byte offsets into
    /// `setup`, exactly as on hardware, so the caller must only run programs
    /// whose indexed accesses stay within the uniform space. `setup` must be
    /// the layout the code was compiled against.
    pub unsafe fn run(&self, setup: &ShaderSetup, state: &mut UnitState, entry_offset: usize) {
        assert!(
            entry_offset < self.entry_points.len(),
            "entry offset {} out of range",
            entry_offset
        );
        let base = self.buffer.as_ptr();
        let entry: Entry = unsafe { std::mem::transmute(base) };
        unsafe { entry(setup, state, base.add(self.entry_points[entry_offset])) }
    }

    /// The emitted native code.
    pub fn code(&self) -> &[u8] {
        unsafe { std::slice::from_raw_parts(self.buffer.as_ptr(), self.buffer.len()) }
    }

    /// Native code offset of each instruction label.
    pub fn entry_points(&self) -> &[usize] {
        &self.entry_points
    }

    pub fn report(&self) -> CompileReport {
        CompileReport {
            program_len: self.entry_points.len(),
            code_size: self.buffer.len(),
            return_offsets: self.return_offsets.clone(),
            sse41: self.sse41,
        }
    }
}

/// Compile a shader program with default options.
///
/// `program` holds the raw instruction words (at most [`MAX_PROGRAM_LEN`])
/// and `swizzle_data` the operand-descriptor words referenced by them (at
/// most [`MAX_SWIZZLE_PATTERNS`]).
pub fn compile(program: &[u32], swizzle_data: &[u32]) -> Result<JitShader> {
    compile_with_options(program, swizzle_data, &CompilerOptions::new())
}

/// Compile a shader program.
pub fn compile_with_options(
    program: &[u32],
    swizzle_data: &[u32],
    options: &CompilerOptions,
) -> Result<JitShader> {
    if program.len() > MAX_PROGRAM_LEN {
        return Err(CompileError::ProgramTooLarge {
            len: program.len(),
            max: MAX_PROGRAM_LEN,
        });
    }
    if swizzle_data.len() > MAX_SWIZZLE_PATTERNS {
        return Err(CompileError::SwizzleTableTooLarge {
            len: swizzle_data.len(),
            max: MAX_SWIZZLE_PATTERNS,
        });
    }

    let sse41 = options.resolve_sse41();
    let return_offsets = analyzer::find_return_offsets(program);
    debug!(
        program_len = program.len(),
        return_points = return_offsets.len(),
        sse41,
        "compiling shader"
    );

    let mut compiler = ShaderCompiler {
        asm: Assembler::new(),
        program,
        swizzle_data,
        labels: (0..program.len()).map(|_| Label::new()).collect(),
        return_offsets,
        program_counter: 0,
        looping: false,
        sse41,
    };

    compiler.emit_prologue();
    compiler.compile_block(program.len() as u32)?;

    let ShaderCompiler {
        asm,
        labels,
        return_offsets,
        ..
    } = compiler;
    let code = asm.into_code();
    if code.len() > MAX_CODE_SIZE {
        return Err(CompileError::CodeTooLarge {
            size: code.len(),
            cap: MAX_CODE_SIZE,
        });
    }

    let entry_points = labels
        .iter()
        .map(|label| {
            label
                .location()
                .expect("every instruction label is bound during emission")
        })
        .collect();

    let buffer = ExecutableBuffer::from_code(&code)?;
    debug!(code_size = code.len(), "shader compiled");
    Ok(JitShader {
        buffer,
        entry_points,
        return_offsets,
        sse41,
    })
}

/// Transient per-compilation state.
struct ShaderCompiler<'a> {
    asm: Assembler,
    program: &'a [u32],
    swizzle_data: &'a [u32],
    /// One native label per program offset, bound as emission reaches it.
    labels: Vec<Label>,
    /// Sorted return points from the pre-pass.
    return_offsets: Vec<u32>,
    /// Next instruction offset to emit.
    program_counter: u32,
    /// Set while inside a `LOOP` body; nesting is rejected.
    looping: bool,
    sse41: bool,
}

impl ShaderCompiler<'_> {
    fn swizzle(&self, desc_id: u32) -> SwizzlePattern {
        SwizzlePattern(self.swizzle_data.get(desc_id as usize).copied().unwrap_or(0))
    }

    fn emit_prologue(&mut self) {
        self.asm.push_set(RegSet::CALLEE_SAVED);
        // Six pushes leave rsp ≡ 0 (mod 16) after one more slot; generated
        // code keeps that alignment between instructions.
        self.asm.sub_ri(Reg::Rsp, 8);
        self.asm.mov_rr(SETUP, Reg::Rdi);
        self.asm.mov_rr(STATE, Reg::Rsi);
        self.asm.xor_rr(ADDR0, ADDR0);
        self.asm.xor_rr(ADDR1, ADDR1);
        self.asm.xor_rr(LOOP_OFF, LOOP_OFF);
        self.asm.xor_rr(COND0, COND0);
        self.asm.xor_rr(COND1, COND1);
        self.reload_constants();
        self.asm.jmp_reg(Reg::Rdx);
    }

    fn emit_epilogue(&mut self) {
        self.asm.add_ri(Reg::Rsp, 8);
        self.asm.pop_set(RegSet::CALLEE_SAVED);
        self.asm.ret();
    }

    /// Load the `[1,1,1,1]` and sign-bit constants; also used to repair them
    /// after foreign calls.
    fn reload_constants(&mut self) {
        self.asm.mov_ri64(SCRATCH, &ONE_VEC as *const Float4 as u64);
        self.asm.movaps_rm(ONE, Mem::base(SCRATCH, 0));
        self.asm
            .mov_ri64(SCRATCH, &NEG_ZERO_VEC as *const Float4 as u64);
        self.asm.movaps_rm(NEG_BIT, Mem::base(SCRATCH, 0));
    }

    /// Emit instructions until `end` (exclusive) or the end of the program.
    fn compile_block(&mut self, end: u32) -> Result<()> {
        let end = end.min(self.program.len() as u32);
        while self.program_counter < end {
            self.compile_next_instr()?;
        }
        Ok(())
    }

    fn compile_next_instr(&mut self) -> Result<()> {
        let pc = self.program_counter;
        self.asm.bind(&mut self.labels[pc as usize]);

        if self.return_offsets.binary_search(&pc).is_ok() {
            // A called region may end here: the sentinel below the native
            // return address names the offset the caller expects control
            // back at.
            let mut fall_through = Label::new();
            self.asm.cmp_m32_i32(Mem::base(Reg::Rsp, 8), pc);
            self.asm.jcc_label(Cc::Ne, &mut fall_through);
            self.asm.ret();
            self.asm.bind(&mut fall_through);
        }

        let instr = Instruction(self.program[pc as usize]);
        trace!(pc, instruction = %instr, "lowering");
        self.program_counter += 1;

        match instr.opcode() {
            OpCode::Add => self.compile_add(instr),
            OpCode::Dp3 => self.compile_dp(instr, 3),
            OpCode::Dp4 => self.compile_dp(instr, 4),
            OpCode::Dph | OpCode::Dphi => self.compile_dph(instr),
            OpCode::Ex2 => self.compile_scalar_call(instr, helpers::jit_exp2 as usize),
            OpCode::Lg2 => self.compile_scalar_call(instr, helpers::jit_log2 as usize),
            OpCode::Mul => self.compile_mul(instr),
            OpCode::Sge | OpCode::Sgei => self.compile_set_on_compare(instr, true),
            OpCode::Slt | OpCode::Slti => self.compile_set_on_compare(instr, false),
            OpCode::Flr => self.compile_flr(instr),
            OpCode::Max => self.compile_max_min(instr, true),
            OpCode::Min => self.compile_max_min(instr, false),
            OpCode::Rcp => self.compile_scalar_approx(instr, true),
            OpCode::Rsq => self.compile_scalar_approx(instr, false),
            OpCode::Mova => self.compile_mova(instr),
            OpCode::Mov => self.compile_mov(instr),
            OpCode::Mad | OpCode::Madi => self.compile_mad(instr),
            OpCode::Cmp => self.compile_cmp(instr),
            OpCode::Nop => {}
            OpCode::End => self.emit_epilogue(),
            OpCode::Call => self.compile_call(instr, CallKind::Always),
            OpCode::Callc => self.compile_call(instr, CallKind::OnCondition),
            OpCode::Callu => self.compile_call(instr, CallKind::OnUniform),
            OpCode::Ifc | OpCode::Ifu => return self.compile_if(pc, instr),
            OpCode::Loop => return self.compile_loop(pc, instr),
            OpCode::Jmpc | OpCode::Jmpu => self.compile_jmp(instr),
            OpCode::Unknown(raw) => self.compile_unknown(pc, raw),
        }
        Ok(())
    }

    // --- source loading and writeback ---

    /// Load one source operand into `dest`: base address (plus dynamic
    /// offset for the indexable operand), swizzle, then negation.
    fn load_source(
        &mut self,
        dest: Xmm,
        reg: SourceRegister,
        address_index: u32,
        pattern: SwizzlePattern,
        slot: usize,
    ) {
        let (base, disp) = match reg.register_type() {
            RegisterType::FloatUniform => (
                SETUP,
                ShaderSetup::float_uniform_offset(reg.index() as usize),
            ),
            RegisterType::Input => (STATE, UnitState::input_offset(reg.index() as usize)),
            RegisterType::Temporary => (STATE, UnitState::temporary_offset(reg.index() as usize)),
        };

        let mem = match address_index {
            0 => Mem::base(base, disp),
            1 => Mem::base_index(base, ADDR0, disp),
            2 => Mem::base_index(base, ADDR1, disp),
            3 => Mem::base_index(base, LOOP_OFF, disp),
            _ => unreachable!("address register index is two bits"),
        };
        self.asm.movups_rm(dest, mem);

        let selector = pattern.selector(slot);
        if selector != IDENTITY_SELECTOR {
            self.asm
                .shufps(dest, dest, swizzle::reverse_selector(selector));
        }
        if pattern.negate(slot) {
            self.asm.xorps(dest, NEG_BIT);
        }
    }

    /// Load the sources of a common-family instruction. The wide operand is
    /// the only one eligible for indexed addressing.
    fn load_common_sources(&mut self, instr: Instruction, binary: bool) -> SwizzlePattern {
        let common = instr.common();
        let pattern = self.swizzle(common.operand_desc_id());
        let index = common.address_register_index();
        if instr.opcode().is_inverted() {
            self.load_source(SRC1, common.src1_inverted(), 0, pattern, 0);
            self.load_source(SRC2, common.src2_inverted(), index, pattern, 1);
        } else {
            self.load_source(SRC1, common.src1(), index, pattern, 0);
            if binary {
                self.load_source(SRC2, common.src2(), 0, pattern, 1);
            }
        }
        pattern
    }

    /// Write `src` back under the destination mask.
    fn store_dest(&mut self, dest: DestRegister, src: Xmm, pattern: SwizzlePattern) {
        let disp = match dest {
            DestRegister::Output(i) => UnitState::output_offset(i as usize),
            DestRegister::Temporary(i) => UnitState::temporary_offset(i as usize),
        };
        let mem = Mem::base(STATE, disp);
        let mask = pattern.dest_mask();

        if mask == 0b1111 {
            self.asm.movups_mr(mem, src);
        } else if mask == 0 {
            // Nothing enabled; skip the store entirely.
        } else if self.sse41 {
            self.asm.movups_rm(XSCRATCH, mem);
            self.asm.blendps(XSCRATCH, src, swizzle::blend_mask(mask));
            self.asm.movups_mr(mem, XSCRATCH);
        } else {
            // Interleave source and destination pairs, then pick per
            // component.
            self.asm.movups_rm(XSCRATCH, mem);
            self.asm.movaps(XSCRATCH2, XSCRATCH);
            self.asm.unpcklps(XSCRATCH, src);
            self.asm.unpckhps(XSCRATCH2, src);
            self.asm
                .shufps(XSCRATCH, XSCRATCH2, swizzle::merge_selector(pattern));
            self.asm.movups_mr(mem, XSCRATCH);
        }
    }

    // --- shared arithmetic pieces ---

    /// Multiply `a` by `b` with PICA NaN semantics: ordered inputs whose
    /// product is NaN (zero times infinity) flush to zero, existing NaNs
    /// propagate.
    fn sanitized_mul(&mut self, a: Xmm, b: Xmm) {
        self.asm.movaps(XSCRATCH, a);
        self.asm.cmpps(XSCRATCH, b, 7); // ordered
        self.asm.mulps(a, b);
        self.asm.movaps(XSCRATCH2, a);
        self.asm.cmpps(XSCRATCH2, a, 3); // unordered: NaN lanes of the product
        self.asm.xorps(XSCRATCH, XSCRATCH2);
        self.asm.andps(a, XSCRATCH);
    }

    /// Sum all four lanes of `reg`, broadcasting the result.
    fn horizontal_add(&mut self, reg: Xmm) {
        self.asm.movaps(XSCRATCH, reg);
        self.asm.shufps(XSCRATCH, reg, 0x4e); // swap 64-bit halves
        self.asm.addps(reg, XSCRATCH);
        self.asm.movaps(XSCRATCH, reg);
        self.asm.shufps(XSCRATCH, reg, 0xb1); // swap lane pairs
        self.asm.addps(reg, XSCRATCH);
    }

    /// Force the W lane of `reg` to 1.0.
    fn set_w_to_one(&mut self, reg: Xmm) {
        if self.sse41 {
            self.asm.blendps(reg, ONE, 0b1000);
        } else {
            self.asm.movaps(XSCRATCH, reg);
            self.asm.shufps(XSCRATCH, ONE, 0x0a); // (z, z, 1, 1)
            self.asm.shufps(reg, XSCRATCH, 0x84); // (x, y, z, 1)
        }
    }

    // --- arithmetic opcodes ---

    fn compile_add(&mut self, instr: Instruction) {
        let pattern = self.load_common_sources(instr, true);
        self.asm.addps(SRC1, SRC2);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_mul(&mut self, instr: Instruction) {
        let pattern = self.load_common_sources(instr, true);
        self.sanitized_mul(SRC1, SRC2);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_max_min(&mut self, instr: Instruction, is_max: bool) {
        let pattern = self.load_common_sources(instr, true);
        // maxps/minps return the second operand on NaN, which is exactly the
        // PICA convention.
        if is_max {
            self.asm.maxps(SRC1, SRC2);
        } else {
            self.asm.minps(SRC1, SRC2);
        }
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_dp(&mut self, instr: Instruction, lanes: u32) {
        let pattern = self.load_common_sources(instr, true);
        self.sanitized_mul(SRC1, SRC2);
        if lanes == 3 {
            // Discard the W product by shifting it out before the add; the
            // vacated X lane is zero and cannot perturb the sum.
            self.asm.pslldq(SRC1, 4);
        }
        self.horizontal_add(SRC1);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_dph(&mut self, instr: Instruction) {
        let pattern = self.load_common_sources(instr, true);
        self.set_w_to_one(SRC1);
        self.sanitized_mul(SRC1, SRC2);
        self.horizontal_add(SRC1);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_set_on_compare(&mut self, instr: Instruction, greater_equal: bool) {
        let pattern = self.load_common_sources(instr, true);
        // src1 ≥ src2 is computed as src2 ≤ src1 so that NaN lanes come out
        // false either way.
        let result = if greater_equal {
            self.asm.cmpps(SRC2, SRC1, 2); // le, swapped operands
            SRC2
        } else {
            self.asm.cmpps(SRC1, SRC2, 1); // lt
            SRC1
        };
        self.asm.andps(result, ONE);
        self.store_dest(instr.common().dest(), result, pattern);
    }

    fn compile_flr(&mut self, instr: Instruction) {
        let pattern = self.load_common_sources(instr, false);
        if self.sse41 {
            self.asm.roundps(SRC1, SRC1, 1); // toward negative infinity
        } else {
            self.asm.cvttps2dq(SRC1, SRC1);
            self.asm.cvtdq2ps(SRC1, SRC1);
        }
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_scalar_approx(&mut self, instr: Instruction, reciprocal: bool) {
        let pattern = self.load_common_sources(instr, false);
        if reciprocal {
            self.asm.rcpss(SRC1, SRC1);
        } else {
            self.asm.rsqrtss(SRC1, SRC1);
        }
        self.asm.shufps(SRC1, SRC1, 0); // broadcast lane 0
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_mov(&mut self, instr: Instruction) {
        let pattern = self.load_common_sources(instr, false);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    fn compile_mad(&mut self, instr: Instruction) {
        let mad = instr.mad();
        let pattern = self.swizzle(mad.operand_desc_id());
        let index = mad.address_register_index();
        self.load_source(SRC1, mad.src1(), 0, pattern, 0);
        if instr.opcode() == OpCode::Madi {
            self.load_source(SRC2, mad.src2_inverted(), 0, pattern, 1);
            self.load_source(SRC3, mad.src3_inverted(), index, pattern, 2);
        } else {
            self.load_source(SRC2, mad.src2(), index, pattern, 1);
            self.load_source(SRC3, mad.src3(), 0, pattern, 2);
        }
        self.sanitized_mul(SRC1, SRC2);
        self.asm.addps(SRC1, SRC3);
        self.store_dest(mad.dest(), SRC1, pattern);
    }

    /// `EX2`/`LG2`: scalar foreign call on lane 0, result broadcast.
    fn compile_scalar_call(&mut self, instr: Instruction, helper: usize) {
        let pattern = self.load_common_sources(instr, false);
        self.asm.movaps(XSCRATCH, SRC1);
        self.asm.push_set_aligned(CALLER_SAVED_ROLES);
        self.asm.call_far(helper as u64, SCRATCH);
        self.asm.pop_set_aligned(CALLER_SAVED_ROLES);
        self.reload_constants();
        self.asm.shufps(XSCRATCH, XSCRATCH, 0);
        self.asm.movaps(SRC1, XSCRATCH);
        self.store_dest(instr.common().dest(), SRC1, pattern);
    }

    // --- MOVA and CMP ---

    fn compile_mova(&mut self, instr: Instruction) {
        let common = instr.common();
        let pattern = self.swizzle(common.operand_desc_id());
        if !pattern.writes_component(0) && !pattern.writes_component(1) {
            return;
        }
        self.load_source(
            SRC1,
            common.src1(),
            common.address_register_index(),
            pattern,
            0,
        );
        if pattern.writes_component(0) {
            self.asm.cvttss2si(SCRATCH, SRC1);
            self.asm.shl_ri(SCRATCH, 4); // scale to the vector byte stride
            self.asm.mov_rr(ADDR0, SCRATCH);
        }
        if pattern.writes_component(1) {
            self.asm.movaps(XSCRATCH, SRC1);
            self.asm.shufps(XSCRATCH, XSCRATCH, 0x55); // broadcast lane 1
            self.asm.cvttss2si(SCRATCH, XSCRATCH);
            self.asm.shl_ri(SCRATCH, 4);
            self.asm.mov_rr(ADDR1, SCRATCH);
        }
    }

    /// Map a PICA comparison to an SSE predicate, swapping operands where
    /// SSE has no NaN-respecting encoding.
    fn emit_compare(&mut self, op: CompareOp) {
        let (predicate, swap) = match op {
            CompareOp::Eq => (0, false),
            CompareOp::Ne => (4, false),
            CompareOp::Lt => (1, false),
            CompareOp::Le => (2, false),
            CompareOp::Gt => (1, true),
            CompareOp::Ge => (2, true),
        };
        if swap {
            self.asm.movaps(XSCRATCH, SRC2);
            self.asm.cmpps(XSCRATCH, SRC1, predicate);
        } else {
            self.asm.movaps(XSCRATCH, SRC1);
            self.asm.cmpps(XSCRATCH, SRC2, predicate);
        }
    }

    /// Extract lane 0 (bit 31) and lane 1 (bit 63) of the packed compare
    /// result into the condition registers.
    fn extract_cond_x(&mut self) {
        self.asm.mov_rr(COND0, SCRATCH);
        self.asm.shr_ri(COND0, 31);
        self.asm.and_ri32(COND0, 1);
    }

    fn extract_cond_y(&mut self) {
        self.asm.mov_rr(COND1, SCRATCH);
        self.asm.shr_ri(COND1, 63);
    }

    fn compile_cmp(&mut self, instr: Instruction) {
        let common = instr.common();
        let pattern = self.swizzle(common.operand_desc_id());
        self.load_source(
            SRC1,
            common.src1(),
            common.address_register_index(),
            pattern,
            0,
        );
        self.load_source(SRC2, common.src2(), 0, pattern, 1);

        let ops = instr.compare();
        let (op_x, op_y) = match (ops.op_x(), ops.op_y()) {
            (Some(x), Some(y)) => (x, y),
            _ => unreachable!("reserved compare operator"),
        };

        if op_x == op_y {
            self.emit_compare(op_x);
            self.asm.movq_rx(SCRATCH, XSCRATCH);
            self.extract_cond_x();
            self.extract_cond_y();
        } else {
            self.emit_compare(op_x);
            self.asm.movq_rx(SCRATCH, XSCRATCH);
            self.extract_cond_x();
            self.emit_compare(op_y);
            self.asm.movq_rx(SCRATCH, XSCRATCH);
            self.extract_cond_y();
        }
    }

    // --- conditions and flow control ---

    /// Evaluate the cached-comparison condition; leaves ZF clear exactly
    /// when the condition holds, so consumers branch with `jz`/`jnz`.
    fn evaluate_condition(&mut self, instr: Instruction) {
        let flow = instr.flow_control();
        let refx = u32::from(flow.refx());
        let refy = u32::from(flow.refy());
        match flow.combinator() {
            Combinator::JustX => {
                self.asm.mov_rr32(SCRATCH, COND0);
                self.asm.xor_ri32(SCRATCH, refx ^ 1);
            }
            Combinator::JustY => {
                self.asm.mov_rr32(SCRATCH, COND1);
                self.asm.xor_ri32(SCRATCH, refy ^ 1);
            }
            Combinator::And => {
                self.asm.mov_rr32(SCRATCH, COND0);
                self.asm.xor_ri32(SCRATCH, refx ^ 1);
                self.asm.mov_rr32(SCRATCH2, COND1);
                self.asm.xor_ri32(SCRATCH2, refy ^ 1);
                self.asm.and_rr32(SCRATCH, SCRATCH2);
            }
            Combinator::Or => {
                self.asm.mov_rr32(SCRATCH, COND0);
                self.asm.xor_ri32(SCRATCH, refx ^ 1);
                self.asm.mov_rr32(SCRATCH2, COND1);
                self.asm.xor_ri32(SCRATCH2, refy ^ 1);
                self.asm.or_rr32(SCRATCH, SCRATCH2);
            }
        }
    }

    /// Test a boolean uniform; leaves ZF set exactly when it is false.
    fn uniform_condition(&mut self, bool_id: u32) {
        let disp = ShaderSetup::bool_uniform_offset(bool_id as usize);
        self.asm.cmp_m8_i8(Mem::base(SETUP, disp), 0);
    }

    fn compile_if(&mut self, pc: u32, instr: Instruction) -> Result<()> {
        let flow = instr.flow_control();
        let dest = flow.dest_offset();
        if dest < self.program_counter {
            return Err(CompileError::BackwardsIf { pc, dest });
        }

        if instr.opcode() == OpCode::Ifu {
            self.uniform_condition(flow.bool_uniform_id());
        } else {
            self.evaluate_condition(instr);
        }

        let mut else_label = Label::new();
        self.asm.jcc_label(Cc::E, &mut else_label);
        self.compile_block(dest)?;

        if flow.num_instructions() == 0 {
            self.asm.bind(&mut else_label);
        } else {
            let mut endif_label = Label::new();
            self.asm.jmp_label(&mut endif_label);
            self.asm.bind(&mut else_label);
            self.compile_block(dest + flow.num_instructions())?;
            self.asm.bind(&mut endif_label);
        }
        Ok(())
    }

    fn compile_loop(&mut self, pc: u32, instr: Instruction) -> Result<()> {
        let flow = instr.flow_control();
        let dest = flow.dest_offset();
        if self.looping {
            return Err(CompileError::NestedLoop { pc });
        }
        if dest < self.program_counter {
            return Err(CompileError::BackwardsLoop { pc, dest });
        }
        self.looping = true;

        // Integer uniform bytes: 0 = iterations − 1, 1 = start, 2 = stride.
        // Start and stride are kept pre-scaled by the vector byte stride.
        let disp = ShaderSetup::int_uniform_offset(flow.int_uniform_id() as usize);
        self.asm.mov_rm32(SCRATCH, Mem::base(SETUP, disp));
        self.asm.mov_rr32(LOOP_OFF, SCRATCH);
        self.asm.shr_ri32(LOOP_OFF, 4);
        self.asm.and_ri32(LOOP_OFF, 0xff0);
        self.asm.mov_rr32(LOOP_INC, SCRATCH);
        self.asm.shr_ri32(LOOP_INC, 12);
        self.asm.and_ri32(LOOP_INC, 0xff0);
        self.asm.movzx_rr8(LOOP_COUNT, SCRATCH);
        self.asm.add_ri32(LOOP_COUNT, 1);

        let mut loop_start = Label::new();
        self.asm.bind(&mut loop_start);
        self.compile_block(dest + 1)?;
        self.asm.add_rr32(LOOP_OFF, LOOP_INC);
        self.asm.sub_ri32(LOOP_COUNT, 1);
        self.asm.jcc_label(Cc::Ne, &mut loop_start);

        self.looping = false;
        Ok(())
    }

    fn compile_call(&mut self, instr: Instruction, kind: CallKind) {
        let flow = instr.flow_control();
        let dest = flow.dest_offset() as usize;
        if dest >= self.program.len() {
            warn!(dest, "call target out of range, skipping");
            return;
        }

        let mut skip = Label::new();
        match kind {
            CallKind::Always => {}
            CallKind::OnCondition => {
                self.evaluate_condition(instr);
                self.asm.jcc_label(Cc::E, &mut skip);
            }
            CallKind::OnUniform => {
                self.uniform_condition(instr.flow_control().bool_uniform_id());
                self.asm.jcc_label(Cc::E, &mut skip);
            }
        }

        // The sentinel names the offset just past the called region; the
        // return-checks spliced there pop back out to this call.
        let return_offset = flow.dest_offset() + flow.num_instructions();
        self.asm.push_imm32(return_offset as i32);
        self.asm.call_label(&mut self.labels[dest]);
        self.asm.add_ri(Reg::Rsp, 8);

        if !matches!(kind, CallKind::Always) {
            self.asm.bind(&mut skip);
        }
    }

    fn compile_jmp(&mut self, instr: Instruction) {
        let flow = instr.flow_control();
        let dest = flow.dest_offset() as usize;
        if dest >= self.program.len() {
            warn!(dest, "jump target out of range, skipping");
            return;
        }

        let cc = if instr.opcode() == OpCode::Jmpu {
            self.uniform_condition(flow.bool_uniform_id());
            // Odd num_instructions flips the jump sense.
            if flow.num_instructions() & 1 == 1 {
                Cc::E
            } else {
                Cc::Ne
            }
        } else {
            self.evaluate_condition(instr);
            Cc::Ne
        };
        self.asm.jcc_label(cc, &mut self.labels[dest]);
    }

    /// Reserved slot: warn at compile time and emit a state-preserving call
    /// to the logging shim, so execution bypasses the instruction but leaves
    /// a trace.
    fn compile_unknown(&mut self, pc: u32, raw: u8) {
        warn!(pc, raw_opcode = raw, "unknown shader opcode, skipping");
        self.asm.push_set_aligned(CALLER_SAVED_ROLES);
        self.asm
            .mov_ri64(Reg::Rdi, UNIMPLEMENTED_MSG.as_ptr() as u64);
        self.asm
            .call_far(helpers::jit_log_message as usize as u64, SCRATCH);
        self.asm.pop_set_aligned(CALLER_SAVED_ROLES);
        self.reload_constants();
    }
}

#[derive(Clone, Copy)]
enum CallKind {
    Always,
    OnCondition,
    OnUniform,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn end() -> u32 {
        0x22 << 26
    }

    fn flow_word(opcode: u32, dest: u32, num: u32) -> u32 {
        (opcode << 26) | (dest << 10) | num
    }

    fn options() -> CompilerOptions {
        CompilerOptions::new().with_sse41(false)
    }

    #[test]
    fn test_every_offset_gets_a_label_inside_the_buffer() {
        let program = [0x21 << 26, 0x21 << 26, end()];
        let shader = compile_with_options(&program, &[], &options()).unwrap();
        assert_eq!(shader.entry_points().len(), 3);
        let mut previous = 0;
        for &entry in shader.entry_points() {
            assert!(entry < shader.code().len());
            assert!(entry >= previous);
            previous = entry;
        }
    }

    #[test]
    fn test_backwards_if_is_rejected() {
        let program = [end(), flow_word(0x28, 0, 0), end()];
        let err = compile_with_options(&program, &[], &options()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::BackwardsIf { pc: 1, dest: 0 }
        ));
    }

    #[test]
    fn test_backwards_loop_is_rejected() {
        let program = [end(), flow_word(0x29, 0, 0), end()];
        let err = compile_with_options(&program, &[], &options()).unwrap_err();
        assert!(matches!(
            err,
            CompileError::BackwardsLoop { pc: 1, dest: 0 }
        ));
    }

    #[test]
    fn test_nested_loop_is_rejected() {
        // loop 2 { loop 2 {} }
        let program = [
            flow_word(0x29, 2, 0),
            flow_word(0x29, 2, 0),
            end(),
        ];
        let err = compile_with_options(&program, &[], &options()).unwrap_err();
        assert!(matches!(err, CompileError::NestedLoop { pc: 1 }));
    }

    #[test]
    fn test_sequential_loops_are_allowed() {
        let program = [
            flow_word(0x29, 1, 0),
            0x21 << 26,
            flow_word(0x29, 3, 0),
            0x21 << 26,
            end(),
        ];
        assert!(compile_with_options(&program, &[], &options()).is_ok());
    }

    #[test]
    fn test_oversized_program_is_rejected() {
        let program = vec![0x21 << 26; MAX_PROGRAM_LEN + 1];
        let err = compile_with_options(&program, &[], &options()).unwrap_err();
        assert!(matches!(err, CompileError::ProgramTooLarge { .. }));
    }

    #[test]
    fn test_oversized_swizzle_table_is_rejected() {
        let program = [end()];
        let swizzle = vec![0; MAX_SWIZZLE_PATTERNS + 1];
        let err = compile_with_options(&program, &swizzle, &options()).unwrap_err();
        assert!(matches!(err, CompileError::SwizzleTableTooLarge { .. }));
    }

    #[test]
    fn test_unknown_opcode_compiles_and_reports() {
        let program = [0x04 << 26, end()]; // DST is not implemented
        let shader = compile_with_options(&program, &[], &options()).unwrap();
        assert_eq!(shader.report().program_len, 2);
    }

    #[test]
    fn test_report_contains_return_offsets() {
        let program = [
            flow_word(0x24, 3, 1), // call 3..4
            end(),
            end(),
            end(),
        ];
        let shader = compile_with_options(&program, &[], &options()).unwrap();
        let report = shader.report();
        assert_eq!(report.return_offsets, vec![4]);
        assert!(!report.sse41);
        assert!(report.code_size > 0);
        assert_eq!(report.code_size, shader.code().len());
    }

    #[test]
    fn test_sse41_option_changes_generated_code() {
        // A masked mov takes the blendps path only under SSE4.1.
        let swizzle = [0b1010
            | (u32::from(IDENTITY_SELECTOR) << 5)
            | (u32::from(IDENTITY_SELECTOR) << 14)
            | (u32::from(IDENTITY_SELECTOR) << 23)];
        let program = [(0x13 << 26) | (0x01 << 12), end()]; // mov o0, v1
        let sse2 = compile_with_options(&program, &swizzle, &options()).unwrap();
        let sse41 = compile_with_options(
            &program,
            &swizzle,
            &CompilerOptions::new().with_sse41(true),
        )
        .unwrap();
        assert_ne!(sse2.code(), sse41.code());
        assert!(sse41.report().sse41);
    }
}
