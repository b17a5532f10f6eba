//! Variable scalar-replacement and SSA promotion.

use std::collections::{HashMap, HashSet};

use gcnc_ir::hir::{BlockId, DefId, OpCode, Program};
use gcnc_ir::types::StorageClass;

use crate::{Pass, PassError};

/// Two-step pass. First splits aggregate variables whose every use is an
/// `access_chain` with a constant leading index into one variable per
/// element. Then folds variables that are only loaded and stored into SSA
/// values, inserting phis at multi-predecessor joins; blocks are processed
/// in reverse postorder so predecessor values are known at every forward
/// edge, and phi operands are filled in a second traversal (which is what
/// makes loop back-edges work).
pub struct PromoteVariables;

impl Pass for PromoteVariables {
    fn name(&self) -> &'static str {
        "promote-variables"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        split_variables(program)?;
        promote(program)
    }
}

fn split_variables(program: &mut Program) -> Result<(), PassError> {
    let mut cannot_split = vec![false; program.def_count()];
    for &block in program.block_order() {
        for &inst in program.block(block).insts() {
            let def = program.def(inst);
            if def.op() == OpCode::AccessChain {
                if def.operand_count() < 2 || !program.def(def.operand(1)).is_constant() {
                    cannot_split[def.operand(0).index()] = true;
                }
            } else {
                for &op in def.operands() {
                    cannot_split[op.index()] = true;
                }
            }
        }
    }

    // Replace each splittable aggregate with one fresh variable per element.
    let old_vars = program.set_variables(Vec::new());
    let mut element_vars: HashMap<DefId, Vec<DefId>> = HashMap::new();
    let mut kept = Vec::with_capacity(old_vars.len());
    for var in old_vars {
        let pointee = program
            .types()
            .pointee(program.def(var).ty())
            .ok_or(PassError::Invariant("variable of non-pointer type"))?;
        let count = program.types().composite_count(pointee);
        match count {
            Some(count) if !cannot_split[var.index()] => {
                let mut elements = Vec::with_capacity(count);
                for i in 0..count {
                    let elem_ty = program
                        .types()
                        .element(pointee, i)
                        .ok_or(PassError::Invariant("composite without element type"))?;
                    let ptr_ty = program
                        .types_mut()
                        .pointer(elem_ty, StorageClass::Invocation);
                    let elem_var = program.create_inst(OpCode::Variable, ptr_ty, vec![]);
                    kept.push(elem_var);
                    elements.push(elem_var);
                }
                element_vars.insert(var, elements);
            }
            _ => kept.push(var),
        }
    }
    program.set_variables(kept);

    if element_vars.is_empty() {
        return Ok(());
    }

    // Rewrite chains through split variables to target the element variable
    // directly, dropping the leading index.
    for &block in &program.block_order().to_vec() {
        let old = program.take_insts(block);
        let mut out = Vec::with_capacity(old.len());
        for inst in old {
            let def = program.def(inst);
            if def.op() == OpCode::AccessChain {
                if let Some(elements) = element_vars.get(&def.operand(0)) {
                    let index = program
                        .def(def.operand(1))
                        .constant_bits()
                        .expect("split analysis guarantees a constant index")
                        as usize;
                    let element = *elements
                        .get(index)
                        .ok_or(PassError::Invariant("access chain index out of bounds"))?;
                    if program.def(inst).operand_count() == 2 {
                        program.replace_uses(inst, element);
                        program.detach_operands(inst);
                        continue;
                    }
                    program.set_operand(inst, 0, element);
                    program.erase_operand(inst, 1);
                }
            }
            out.push(inst);
        }
        program.set_insts(block, out);
    }
    Ok(())
}

fn promote(program: &mut Program) -> Result<(), PassError> {
    // A variable is promotable iff nothing but loads and stores touch it
    // (and a store only as the address, never as the value).
    let mut cannot_promote = vec![false; program.def_count()];
    for &block in program.block_order() {
        for &inst in program.block(block).insts() {
            let def = program.def(inst);
            match def.op() {
                OpCode::Load => {}
                OpCode::Store => cannot_promote[def.operand(1).index()] = true,
                _ => {
                    for &op in def.operands() {
                        cannot_promote[op.index()] = true;
                    }
                }
            }
        }
    }

    let promotable: Vec<DefId> = program
        .variables()
        .iter()
        .copied()
        .filter(|v| !cannot_promote[v.index()])
        .collect();
    if promotable.is_empty() {
        return Ok(());
    }
    let promotable_set: HashSet<DefId> = promotable.iter().copied().collect();

    let order: Vec<BlockId> = program.block_order().to_vec();
    let mut value_out: HashMap<BlockId, HashMap<DefId, DefId>> = HashMap::new();
    let mut join_phis: HashMap<(BlockId, DefId), DefId> = HashMap::new();

    for &block in &order {
        let preds = program.block(block).predecessors().to_vec();
        let mut current: HashMap<DefId, DefId> = match preds.len() {
            1 => value_out.get(&preds[0]).cloned().unwrap_or_default(),
            _ => HashMap::new(),
        };

        if preds.len() > 1 {
            let mut head = Vec::with_capacity(promotable.len());
            for &var in &promotable {
                let elem_ty = program
                    .types()
                    .pointee(program.def(var).ty())
                    .ok_or(PassError::Invariant("variable of non-pointer type"))?;
                let phi = program.create_phi(elem_ty, preds.len());
                head.push(phi);
                current.insert(var, phi);
                join_phis.insert((block, var), phi);
            }
            program.insert_insts_front(block, head);
        }

        let old = program.take_insts(block);
        let mut out = Vec::with_capacity(old.len());
        for inst in old {
            let def = program.def(inst);
            match def.op() {
                OpCode::Store if promotable_set.contains(&def.operand(0)) => {
                    current.insert(def.operand(0), def.operand(1));
                    program.detach_operands(inst);
                }
                OpCode::Load if promotable_set.contains(&def.operand(0)) => {
                    let var = def.operand(0);
                    let value = *current
                        .get(&var)
                        .ok_or(PassError::ReadBeforeWrite(var.index()))?;
                    program.replace_uses(inst, value);
                    program.detach_operands(inst);
                }
                _ => out.push(inst),
            }
        }
        program.set_insts(block, out);
        value_out.insert(block, current);
    }

    // Second traversal: fill phi operands position-matched to predecessors.
    // Operands on edges where the variable is undefined keep their
    // self-reference.
    for &block in &order {
        for &succ in &program.block(block).successors().to_vec() {
            let preds = program.block(succ).predecessors();
            if preds.len() < 2 {
                continue;
            }
            let index = preds
                .iter()
                .position(|&p| p == block)
                .ok_or(PassError::Invariant("successor does not list predecessor"))?;
            for &var in &promotable {
                if let Some(&phi) = join_phis.get(&(succ, var)) {
                    if let Some(&value) = value_out[&block].get(&var) {
                        program.set_operand(phi, index, value);
                    }
                }
            }
        }
    }

    // Promoted variables have no remaining uses; drop them.
    let vars = program.set_variables(Vec::new());
    let total = vars.len();
    let kept: Vec<DefId> = vars
        .into_iter()
        .filter(|&v| program.def(v).has_uses())
        .collect();
    log::debug!("promote: {} variables folded to SSA", total - kept.len());
    program.set_variables(kept);
    Ok(())
}
