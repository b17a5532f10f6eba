//! Composite load/store/shuffle splitting.

use gcnc_ir::hir::{DefId, OpCode, Program};
use gcnc_ir::types::TypeTable;

use crate::{Pass, PassError};

/// Rewrites vector `load`, `store` and `vector_shuffle` instructions into
/// per-element accesses, so every later pass sees only scalar memory
/// operations plus explicit `composite_construct`/`composite_extract`.
pub struct SplitComposites;

impl Pass for SplitComposites {
    fn name(&self) -> &'static str {
        "split-composites"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        for &block in &program.block_order().to_vec() {
            let old = program.take_insts(block);
            let mut out = Vec::with_capacity(old.len());
            for inst in old {
                match program.def(inst).op() {
                    OpCode::Load if program.types().is_composite(program.def(inst).ty()) => {
                        split_load(program, &mut out, inst)?;
                    }
                    OpCode::Store
                        if program
                            .types()
                            .is_composite(program.def(program.def(inst).operand(1)).ty()) =>
                    {
                        split_store(program, &mut out, inst)?;
                    }
                    OpCode::VectorShuffle => {
                        split_shuffle(program, &mut out, inst)?;
                    }
                    _ => out.push(inst),
                }
            }
            program.set_insts(block, out);
        }
        Ok(())
    }
}

/// Returns element `index` of `value`. Reuses the matching operand when the
/// value is itself a `composite_construct`; otherwise materializes a
/// `composite_extract`.
fn extract_component(
    program: &mut Program,
    out: &mut Vec<DefId>,
    value: DefId,
    index: usize,
) -> Result<DefId, PassError> {
    if program.def(value).op() == OpCode::CompositeConstruct {
        return Ok(program.def(value).operand(index));
    }
    let elem_ty = program
        .types()
        .element(program.def(value).ty(), index)
        .ok_or(PassError::Invariant("extract from non-composite value"))?;
    let selector = program.scalar_constant(TypeTable::INT32, index as u64);
    let extract = program.create_inst(OpCode::CompositeExtract, elem_ty, vec![value, selector]);
    out.push(extract);
    Ok(extract)
}

fn split_load(program: &mut Program, out: &mut Vec<DefId>, inst: DefId) -> Result<(), PassError> {
    let ty = program.def(inst).ty();
    let ptr = program.def(inst).operand(0);
    let count = program
        .types()
        .composite_count(ty)
        .ok_or(PassError::Invariant("composite load of scalar type"))?;
    let storage = program
        .types()
        .storage_class(program.def(ptr).ty())
        .ok_or(PassError::Invariant("load through a non-pointer"))?;

    let mut elements = Vec::with_capacity(count);
    for i in 0..count {
        let elem_ty = program
            .types()
            .element(ty, i)
            .ok_or(PassError::Invariant("composite load of scalar type"))?;
        let ptr_ty = program.types_mut().pointer(elem_ty, storage);
        let selector = program.scalar_constant(TypeTable::INT32, i as u64);
        let chain = program.create_inst(OpCode::AccessChain, ptr_ty, vec![ptr, selector]);
        out.push(chain);
        let load = program.create_inst(OpCode::Load, elem_ty, vec![chain]);
        out.push(load);
        elements.push(load);
    }

    let construct = program.create_inst(OpCode::CompositeConstruct, ty, elements);
    out.push(construct);
    program.replace_uses(inst, construct);
    program.detach_operands(inst);
    Ok(())
}

fn split_store(program: &mut Program, out: &mut Vec<DefId>, inst: DefId) -> Result<(), PassError> {
    let ptr = program.def(inst).operand(0);
    let value = program.def(inst).operand(1);
    let value_ty = program.def(value).ty();
    let count = program
        .types()
        .composite_count(value_ty)
        .ok_or(PassError::Invariant("composite store of scalar type"))?;
    let storage = program
        .types()
        .storage_class(program.def(ptr).ty())
        .ok_or(PassError::Invariant("store through a non-pointer"))?;

    for i in 0..count {
        let elem_ty = program
            .types()
            .element(value_ty, i)
            .ok_or(PassError::Invariant("composite store of scalar type"))?;
        let ptr_ty = program.types_mut().pointer(elem_ty, storage);
        let selector = program.scalar_constant(TypeTable::INT32, i as u64);
        let chain = program.create_inst(OpCode::AccessChain, ptr_ty, vec![ptr, selector]);
        out.push(chain);
        let element = extract_component(program, out, value, i)?;
        let store = program.create_inst(OpCode::Store, TypeTable::VOID, vec![chain, element]);
        out.push(store);
    }

    program.detach_operands(inst);
    Ok(())
}

fn split_shuffle(program: &mut Program, out: &mut Vec<DefId>, inst: DefId) -> Result<(), PassError> {
    let ty = program.def(inst).ty();
    let count = program
        .types()
        .composite_count(ty)
        .ok_or(PassError::Invariant("vector shuffle of scalar type"))?;
    let first = program.def(inst).operand(0);
    let second = program.def(inst).operand(1);
    let first_count = program
        .types()
        .composite_count(program.def(first).ty())
        .ok_or(PassError::Invariant("vector shuffle of scalar operand"))?;

    let mut elements = Vec::with_capacity(count);
    for k in 0..count {
        let selector = program.def(inst).operand(2 + k);
        let mut index = program
            .def(selector)
            .constant_bits()
            .ok_or(PassError::InvalidShuffleIndex)? as usize;
        let source = if index >= first_count {
            index -= first_count;
            second
        } else {
            first
        };
        elements.push(extract_component(program, out, source, index)?);
    }

    let construct = program.create_inst(OpCode::CompositeConstruct, ty, elements);
    out.push(construct);
    program.replace_uses(inst, construct);
    program.detach_operands(inst);
    Ok(())
}
