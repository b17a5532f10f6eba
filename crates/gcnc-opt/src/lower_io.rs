//! Shader I/O lowering for the AMD fragment-program ABI.

use gcnc_ir::hir::{InstFlags, OpCode, Program};
use gcnc_ir::types::TypeTable;

use crate::{Pass, PassError};

/// Rewrites the program's boundary to the hardware ABI. The parameter list
/// becomes the fixed triple `(primMask, barycentricI, barycentricJ)` and
/// every old scalar input is recomputed by a `gcn_interpolate` at the head
/// of the entry block, addressed by `(attr = k/4, channel = k%4)`. The
/// terminating `ret` is replaced by one `gcn_export` per group of four
/// operands (the last group carries the `done` bit) followed by a bare
/// `ret`.
pub struct LowerIo;

impl Pass for LowerIo {
    fn name(&self) -> &'static str {
        "lower-io"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        lower_inputs(program);
        lower_outputs(program)
    }
}

fn lower_inputs(program: &mut Program) {
    let prim_mask = program.create_inst(OpCode::Parameter, TypeTable::INT32, vec![]);
    let bary_i = program.create_inst_with_flags(
        OpCode::Parameter,
        TypeTable::FLOAT32,
        InstFlags::ALWAYS_VARYING,
        vec![],
    );
    let bary_j = program.create_inst_with_flags(
        OpCode::Parameter,
        TypeTable::FLOAT32,
        InstFlags::ALWAYS_VARYING,
        vec![],
    );
    let old_params = program.set_params(vec![prim_mask, bary_i, bary_j]);

    let mut head = Vec::with_capacity(old_params.len());
    for (index, &param) in old_params.iter().enumerate() {
        let attr = program.scalar_constant(TypeTable::INT32, (index / 4) as u64);
        let channel = program.scalar_constant(TypeTable::INT32, (index % 4) as u64);
        let interp = program.create_inst(
            OpCode::GcnInterpolate,
            TypeTable::FLOAT32,
            vec![prim_mask, bary_i, bary_j, attr, channel],
        );
        program.replace_uses(param, interp);
        head.push(interp);
    }
    let entry = program.entry_block();
    program.insert_insts_front(entry, head);
}

fn lower_outputs(program: &mut Program) -> Result<(), PassError> {
    let mut ret_block = None;
    for &block in program.block_order() {
        if let Some(&last) = program.block(block).insts().last() {
            if program.def(last).op() == OpCode::Ret {
                ret_block = Some((block, last));
                break;
            }
        }
    }
    let (block, ret) = ret_block.ok_or(PassError::MissingRet)?;

    let values = program.def(ret).operands().to_vec();
    if values.is_empty() {
        return Err(PassError::EmptyRet);
    }
    if values.len() % 4 != 0 {
        return Err(PassError::RetOperandCount(values.len()));
    }

    let mut insts = program.take_insts(block);
    insts.pop();

    let groups = values.len() / 4;
    for group in 0..groups {
        let enable = program.scalar_constant(TypeTable::INT32, 0xF);
        let target = program.scalar_constant(TypeTable::INT32, group as u64);
        let compressed = program.scalar_constant(TypeTable::INT32, 0);
        let done = program.scalar_constant(TypeTable::INT32, (group == groups - 1) as u64);
        let mut operands = vec![enable, target, compressed, done];
        operands.extend_from_slice(&values[group * 4..group * 4 + 4]);
        let export = program.create_inst(OpCode::GcnExport, TypeTable::VOID, operands);
        insts.push(export);
    }

    let new_ret = program.create_inst(OpCode::Ret, TypeTable::VOID, vec![]);
    insts.push(new_ret);
    program.set_insts(block, insts);
    program.detach_operands(ret);
    Ok(())
}
