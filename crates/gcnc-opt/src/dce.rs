//! Dead-code elimination.

use gcnc_ir::hir::{DefId, InstFlags, Program};

use crate::{Pass, PassError};

/// Reverse mark-sweep from the instructions that must stay: anything with
/// side effects or control flow. The mark closure follows operand edges;
/// everything unmarked is removed from the blocks, the parameter list and
/// the variable list.
pub struct EliminateDeadCode;

impl Pass for EliminateDeadCode {
    fn name(&self) -> &'static str {
        "dce"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        let mut used = vec![false; program.def_count()];
        let mut worklist: Vec<DefId> = Vec::new();

        let roots = InstFlags::SIDE_EFFECTS | InstFlags::CONTROL;
        for &block in program.block_order() {
            for &inst in program.block(block).insts() {
                if program.def(inst).flags().intersects(roots) && !used[inst.index()] {
                    used[inst.index()] = true;
                    worklist.push(inst);
                }
            }
        }
        while let Some(def) = worklist.pop() {
            for &op in program.def(def).operands() {
                if !used[op.index()] {
                    used[op.index()] = true;
                    worklist.push(op);
                }
            }
        }

        let mut removed = 0usize;
        for &block in &program.block_order().to_vec() {
            let old = program.take_insts(block);
            let mut kept = Vec::with_capacity(old.len());
            for inst in old {
                if used[inst.index()] {
                    kept.push(inst);
                } else {
                    program.detach_operands(inst);
                    removed += 1;
                }
            }
            program.set_insts(block, kept);
        }

        let vars = program.set_variables(Vec::new());
        let kept_vars = vars.into_iter().filter(|v| used[v.index()]).collect();
        program.set_variables(kept_vars);

        let params = program.set_params(Vec::new());
        let kept_params = params.into_iter().filter(|p| used[p.index()]).collect();
        program.set_params(kept_params);

        log::debug!("dce: removed {removed} instructions");
        Ok(())
    }
}
