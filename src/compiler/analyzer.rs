//! Control-flow pre-pass.
//!
//! Called regions are inlined into the emitted stream, so a call site pushes
//! the offset just past the called region as a sentinel and the emitter
//! splices a return-check at every such offset. This pass computes where
//! those checks go.

use crate::isa::{Instruction, OpCode};

/// Collect the return points induced by `CALL`/`CALLC`/`CALLU`: for each,
/// the instruction offset just past the called region. Sorted and
/// deduplicated so emission can test membership by binary search.
pub fn find_return_offsets(program: &[u32]) -> Vec<u32> {
    let mut offsets: Vec<u32> = program
        .iter()
        .map(|&word| Instruction(word))
        .filter(|instr| {
            matches!(
                instr.opcode(),
                OpCode::Call | OpCode::Callc | OpCode::Callu
            )
        })
        .map(|instr| {
            let flow = instr.flow_control();
            flow.dest_offset() + flow.num_instructions()
        })
        .collect();
    offsets.sort_unstable();
    offsets.dedup();
    offsets
}
