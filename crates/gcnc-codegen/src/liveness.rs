//! Liveness dataflow over the two LIR control-flow variants.
//!
//! Live sets are ordered ([`BTreeSet`]) so everything derived from them,
//! parallel-copy operand order in particular, is deterministic.

use std::collections::BTreeSet;

use gcnc_ir::lir::{Program, RegClass, TempId};

pub type LiveSet = BTreeSet<TempId>;

/// Picks a block's neighbor list for the chosen CFG variant.
fn successors(program: &Program, block: usize, logical: bool) -> &[usize] {
    if logical {
        &program.blocks[block].logical_succs
    } else {
        &program.blocks[block].linearized_succs
    }
}

fn predecessors(program: &Program, block: usize, logical: bool) -> &[usize] {
    if logical {
        &program.blocks[block].logical_preds
    } else {
        &program.blocks[block].linearized_preds
    }
}

/// Live-out of `block`: the union of the successors' live-ins plus, for
/// every successor phi resolved on this CFG variant, the operand that flows
/// in from `block`. Vector phis live on the logical edges, scalar (mask)
/// phis on the linearized ones.
pub fn live_out(program: &Program, live_in: &[LiveSet], block: usize, logical: bool) -> LiveSet {
    let mut live = LiveSet::new();
    for &succ in successors(program, block, logical) {
        live.extend(live_in[succ].iter().copied());
        let pred_index = predecessors(program, succ, logical)
            .iter()
            .position(|&p| p == block);
        let Some(pred_index) = pred_index else {
            continue;
        };
        for inst in &program.blocks[succ].insts {
            if !inst.is_phi() {
                break;
            }
            let Some(def_id) = inst.defs[0].temp_id() else {
                continue;
            };
            let is_vector = program.temp_info(def_id).class == RegClass::Vgpr;
            if is_vector == logical {
                if let Some(op_id) = inst.ops[pred_index].temp_id() {
                    live.insert(op_id);
                }
            }
        }
    }
    live
}

/// Iterative backward dataflow: per-block live-in sets on one CFG variant.
/// Phi instructions define at the block head but their operands are charged
/// to the incoming edges, not to the block itself.
pub fn compute_live_in(program: &Program, logical: bool) -> Vec<LiveSet> {
    let count = program.blocks.len();
    let mut live_in: Vec<LiveSet> = vec![LiveSet::new(); count];

    loop {
        let mut changed = false;
        for block in (0..count).rev() {
            let mut live = live_out(program, &live_in, block, logical);
            for inst in program.blocks[block].insts.iter().rev() {
                for def in &inst.defs {
                    if let Some(id) = def.temp_id() {
                        live.remove(&id);
                    }
                }
                if inst.is_phi() {
                    continue;
                }
                for op in &inst.ops {
                    if let Some(id) = op.temp_id() {
                        live.insert(id);
                    }
                }
            }
            if live != live_in[block] {
                live_in[block] = live;
                changed = true;
            }
        }
        if !changed {
            return live_in;
        }
    }
}

/// Per-block live sets with each temp taken from its authoritative CFG
/// variant: vgpr temps from the logical sets, everything else from the
/// linearized ones.
pub fn merge_by_class(program: &Program, logical: &[LiveSet], linear: &[LiveSet]) -> Vec<LiveSet> {
    (0..program.blocks.len())
        .map(|block| {
            let mut merged = LiveSet::new();
            for &id in &logical[block] {
                if program.temp_info(id).class == RegClass::Vgpr {
                    merged.insert(id);
                }
            }
            for &id in &linear[block] {
                if program.temp_info(id).class != RegClass::Vgpr {
                    merged.insert(id);
                }
            }
            merged
        })
        .collect()
}

/// Class-authoritative live-in sets for every block.
pub fn live_in_sets(program: &Program) -> Vec<LiveSet> {
    let logical = compute_live_in(program, true);
    let linear = compute_live_in(program, false);
    merge_by_class(program, &logical, &linear)
}

/// Class-authoritative live-out sets for every block.
pub fn live_out_sets(program: &Program) -> Vec<LiveSet> {
    let logical = compute_live_in(program, true);
    let linear = compute_live_in(program, false);
    let logical_out: Vec<LiveSet> = (0..program.blocks.len())
        .map(|b| live_out(program, &logical, b, true))
        .collect();
    let linear_out: Vec<LiveSet> = (0..program.blocks.len())
        .map(|b| live_out(program, &linear, b, false))
        .collect();
    merge_by_class(program, &logical_out, &linear_out)
}

/// Recomputes kill bits: an operand is killed where the temp is not live
/// past the instruction. Phi operands never carry kill bits; their lifetime
/// ends on the predecessor edge.
pub fn set_kill_flags(program: &mut Program) {
    let live_outs = live_out_sets(program);
    for block in 0..program.blocks.len() {
        let mut live = live_outs[block].clone();
        for inst in program.blocks[block].insts.iter_mut().rev() {
            for def in &inst.defs {
                if let Some(id) = def.temp_id() {
                    live.remove(&id);
                }
            }
            if inst.is_phi() {
                for op in &mut inst.ops {
                    op.set_kill(false);
                }
                continue;
            }
            for op in &mut inst.ops {
                if let Some(id) = op.temp_id() {
                    op.set_kill(!live.contains(&id));
                }
            }
            for op in &inst.ops {
                if let Some(id) = op.temp_id() {
                    live.insert(id);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcnc_ir::lir::{Arg, Block, Inst, OpCode};

    /// Diamond with a vgpr value defined in the entry, merged by a phi, and
    /// a mask temp threaded from the entry to the merge's start_block.
    fn diamond() -> (Program, [TempId; 5]) {
        let mut p = Program::new();
        let val_a = p.allocate_temp(RegClass::Vgpr, 4);
        let val_b = p.allocate_temp(RegClass::Vgpr, 4);
        let merged = p.allocate_temp(RegClass::Vgpr, 4);
        let mask_left = p.allocate_temp(RegClass::Sgpr, 8);
        let mask_right = p.allocate_temp(RegClass::Sgpr, 8);

        let mut b0 = Block::new(0);
        b0.logical_succs = vec![1, 2];
        b0.linearized_succs = vec![1];
        b0.insts.push(Inst::new(
            OpCode::Start,
            vec![Arg::temp(val_a), Arg::temp(val_b)],
            vec![],
        ));
        b0.insts.push(Inst::new(
            OpCode::LogicalCondBranch,
            vec![Arg::temp(mask_left), Arg::temp(mask_right)],
            vec![Arg::temp(val_a)],
        ));

        let mut b1 = Block::new(1);
        b1.logical_preds = vec![0];
        b1.logical_succs = vec![3];
        b1.linearized_preds = vec![0];
        b1.linearized_succs = vec![2];
        b1.insts.push(Inst::new(
            OpCode::StartBlock,
            vec![],
            vec![Arg::temp(mask_left)],
        ));
        let exit_mask_1 = p.allocate_temp(RegClass::Sgpr, 8);
        b1.insts.push(Inst::new(
            OpCode::LogicalBranch,
            vec![Arg::temp(exit_mask_1)],
            vec![],
        ));

        let mut b2 = Block::new(2);
        b2.logical_preds = vec![0];
        b2.logical_succs = vec![3];
        b2.linearized_preds = vec![1];
        b2.linearized_succs = vec![3];
        b2.insts.push(Inst::new(
            OpCode::StartBlock,
            vec![],
            vec![Arg::temp(mask_right)],
        ));
        let exit_mask_2 = p.allocate_temp(RegClass::Sgpr, 8);
        b2.insts.push(Inst::new(
            OpCode::LogicalBranch,
            vec![Arg::temp(exit_mask_2)],
            vec![],
        ));

        let mut b3 = Block::new(3);
        b3.logical_preds = vec![1, 2];
        b3.linearized_preds = vec![2];
        b3.insts.push(Inst::new(
            OpCode::Phi,
            vec![Arg::temp(merged)],
            vec![Arg::temp(val_a), Arg::temp(val_b)],
        ));
        b3.insts.push(Inst::new(
            OpCode::StartBlock,
            vec![],
            vec![Arg::temp(exit_mask_1), Arg::temp(exit_mask_2)],
        ));
        b3.insts.push(Inst::new(
            OpCode::Exp,
            vec![],
            vec![Arg::temp(merged)],
        ));
        b3.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));

        p.blocks = vec![b0, b1, b2, b3];
        (p, [val_a, val_b, merged, mask_left, mask_right])
    }

    #[test]
    fn phi_operands_are_live_on_their_edge_only() {
        let (p, [val_a, val_b, merged, ..]) = diamond();
        let logical = compute_live_in(&p, true);

        // Phi operand a flows in from block 1, b from block 2.
        assert!(logical[1].contains(&val_a));
        assert!(logical[2].contains(&val_b));
        // The phi def is not live into the merge block.
        assert!(!logical[3].contains(&merged));
        // Phi operands are not live-in to the merge block itself.
        assert!(!logical[3].contains(&val_a));
    }

    #[test]
    fn masks_flow_on_the_linearized_chain() {
        let (p, [_, _, _, _mask_left, mask_right]) = diamond();
        let linear = compute_live_in(&p, false);

        // The right mask is defined in block 0 and consumed by block 2's
        // start_block; it must survive across block 1 on the wave chain.
        assert!(linear[1].contains(&mask_right));
        assert!(linear[2].contains(&mask_right));
        assert!(!linear[3].contains(&mask_right));
    }

    #[test]
    fn kill_bits_mark_last_uses() {
        let (mut p, [val_a, ..]) = diamond();
        set_kill_flags(&mut p);

        // val_a is used by the cond branch in block 0 but still feeds the
        // phi through block 1; no kill at the branch.
        let branch = &p.blocks[0].insts[1];
        assert_eq!(branch.ops[0].temp_id(), Some(val_a));
        assert!(!branch.ops[0].kill());

        // The export consumes the merged value for good.
        let exp = &p.blocks[3].insts[2];
        assert!(exp.ops[0].kill());
    }

    #[test]
    fn merged_sets_respect_classes() {
        let (p, [val_a, _, _, _, mask_right]) = diamond();
        let merged = live_in_sets(&p);
        // Block 1: the vgpr value is live (logical), and so is the sgpr
        // mask bound for block 2 (linearized).
        assert!(merged[1].contains(&val_a));
        assert!(merged[1].contains(&mask_right));
    }
}
