//! Uniform/varying analysis.

use gcnc_ir::hir::{DefId, InstFlags, OpCode, Program};

use crate::{Pass, PassError};

/// Worklist propagation of the `VARYING` flag over the use graph. Seeds are
/// every def flagged `ALWAYS_VARYING` and every phi (a value merged at a
/// join is assumed to differ per lane; proving otherwise is not attempted).
/// A marked def marks all of its consumers except those flagged
/// `ALWAYS_UNIFORM`, until fixpoint.
pub struct AnalyzeDivergence;

impl Pass for AnalyzeDivergence {
    fn name(&self) -> &'static str {
        "divergence"
    }

    fn run(&self, program: &mut Program) -> Result<(), PassError> {
        let mut varying = vec![false; program.def_count()];
        let mut worklist: Vec<DefId> = Vec::new();
        let mut marked: Vec<DefId> = Vec::new();

        for (id, def) in program.defs() {
            if def.flags().contains(InstFlags::ALWAYS_VARYING) || def.op() == OpCode::Phi {
                varying[id.index()] = true;
                worklist.push(id);
                marked.push(id);
            }
        }

        while let Some(def) = worklist.pop() {
            let consumers: Vec<DefId> = program.def(def).uses().iter().map(|u| u.consumer).collect();
            for consumer in consumers {
                if program
                    .def(consumer)
                    .flags()
                    .contains(InstFlags::ALWAYS_UNIFORM)
                {
                    continue;
                }
                if !varying[consumer.index()] {
                    varying[consumer.index()] = true;
                    worklist.push(consumer);
                    marked.push(consumer);
                }
            }
        }

        for id in marked {
            program.add_flags(id, InstFlags::VARYING);
        }
        Ok(())
    }
}
