//! Register allocation over LIR in SSA form.
//!
//! Four stages, in order: parallel-copy insertion at fixed-register
//! constraints, SSA repair of the duplicate definitions those copies create
//! (a scoped rename over the dominator tree, scalar bank first, vector bank
//! second), greedy per-block coloring on the two banks, and phi destruction
//! into parallel copies.

use std::collections::HashMap;

use gcnc_ir::lir::{Arg, Inst, OpCode, PhysReg, Program, RegClass, TempId};

use crate::liveness::{self, LiveSet};

/// Byte bound of the scalar bank (128 registers of 4 bytes).
const SGPR_END: u32 = 128 * 4;
/// Byte base and bound of the vector bank (256 registers of 4 bytes).
const VGPR_BASE: u32 = 1024;
const VGPR_END: u32 = 1024 + 256 * 4;
/// One occupancy flag per 4-byte unit across both banks.
const UNIT_COUNT: usize = (VGPR_END / 4) as usize;

#[derive(Debug, thiserror::Error)]
pub enum RegAllocError {
    /// No free color range of the required size; spilling is not supported.
    #[error("out of {0:?} registers")]
    Exhausted(RegClass),

    /// An operand whose definition was never colored (malformed SSA).
    #[error("use of an uncolored temp")]
    UncoloredUse,

    /// A scalar-class phi survived to phi destruction.
    #[error("scalar phi survived to phi destruction")]
    ScalarPhiSurvived,

    /// A block lost its terminator; there is nowhere to put phi copies.
    #[error("block has no terminator instruction")]
    MissingTerminator,

    /// CFG edge lists disagree between a block and its successor.
    #[error("successor does not list its predecessor")]
    InconsistentCfg,
}

/// Runs the full allocation pipeline in place. Afterwards every temp
/// reference is fixed to a physical register and no phis remain.
pub fn allocate(program: &mut Program) -> Result<(), RegAllocError> {
    insert_copies(program);
    repair_ssa(program);
    liveness::set_kill_flags(program);
    color(program)?;
    destroy_phis(program)?;
    log::debug!(
        "regalloc: {} temps over {} blocks",
        program.temp_count(),
        program.blocks.len()
    );
    Ok(())
}

/// Walks each block back to front; any instruction carrying a fixed-register
/// definition or operand gets a parallel copy of every temp live just before
/// it, placed immediately ahead of it in program order. The identity pairs
/// give the colorer the slack to satisfy the fixed constraint without
/// corrupting other live values.
fn insert_copies(program: &mut Program) {
    let live_outs = liveness::live_out_sets(program);
    for block in 0..program.blocks.len() {
        let mut live: LiveSet = live_outs[block].clone();
        let old = std::mem::take(&mut program.blocks[block].insts);
        let mut rev: Vec<Inst> = Vec::with_capacity(old.len());
        for inst in old.into_iter().rev() {
            let mut constrained = false;
            for def in &inst.defs {
                if let Some(id) = def.temp_id() {
                    if def.phys_reg().is_some() {
                        constrained = true;
                    }
                    live.remove(&id);
                }
            }
            for op in &inst.ops {
                if op.is_temp() && op.phys_reg().is_some() {
                    constrained = true;
                }
            }
            if !inst.is_phi() {
                for op in &inst.ops {
                    if let Some(id) = op.temp_id() {
                        live.insert(id);
                    }
                }
            }
            rev.push(inst);
            if constrained && !live.is_empty() {
                let args: Vec<Arg> = live.iter().map(|&id| Arg::temp(id)).collect();
                rev.push(Inst::new(OpCode::ParallelCopy, args.clone(), args));
            }
        }
        rev.reverse();
        program.blocks[block].insts = rev;
    }
}

/// Immediate dominators on one CFG variant. Blocks are already in reverse
/// postorder, so the Cooper/Harvey/Kennedy intersection works directly on
/// block indices.
fn immediate_dominators(program: &Program, logical: bool) -> Vec<usize> {
    let count = program.blocks.len();
    let preds = |i: usize| -> &[usize] {
        if logical {
            &program.blocks[i].logical_preds
        } else {
            &program.blocks[i].linearized_preds
        }
    };

    let mut idom: Vec<Option<usize>> = vec![None; count];
    if count == 0 {
        return Vec::new();
    }
    idom[0] = Some(0);
    let mut changed = true;
    while changed {
        changed = false;
        for block in 1..count {
            let mut new_idom: Option<usize> = None;
            for &pred in preds(block) {
                if idom[pred].is_none() {
                    continue;
                }
                new_idom = Some(match new_idom {
                    None => pred,
                    Some(other) => intersect(&idom, pred, other),
                });
            }
            if new_idom.is_some() && new_idom != idom[block] {
                idom[block] = new_idom;
                changed = true;
            }
        }
    }
    // Blocks the variant cannot reach hang off the entry.
    idom.into_iter().map(|d| d.unwrap_or(0)).collect()
}

fn intersect(idom: &[Option<usize>], a: usize, b: usize) -> usize {
    let mut a = a;
    let mut b = b;
    while a != b {
        while a > b {
            a = idom[a].unwrap_or(0);
        }
        while b > a {
            b = idom[b].unwrap_or(0);
        }
    }
    a
}

/// Copy insertion leaves several definitions of one temp id. This renames
/// every definition after the first to a fresh temp and rewrites the uses
/// the definition dominates, restoring outer names when the dominator-tree
/// walk unwinds. Two sweeps: the scalar banks resolve on the linearized
/// CFG, the vector bank on the logical CFG.
fn repair_ssa(program: &mut Program) {
    repair_bank(program, false);
    repair_bank(program, true);
}

fn repair_bank(program: &mut Program, vector: bool) {
    let idom = immediate_dominators(program, vector);
    let count = program.blocks.len();
    if count == 0 {
        return;
    }
    let mut children: Vec<Vec<usize>> = vec![Vec::new(); count];
    for block in 1..count {
        children[idom[block]].push(block);
    }

    let in_bank = |program: &Program, id: TempId| {
        let class = program.temp_info(id).class;
        (class == RegClass::Vgpr) == vector
    };

    struct Frame {
        block: usize,
        next_child: usize,
        undo: Vec<(TempId, Option<TempId>)>,
    }

    let mut rename: HashMap<TempId, TempId> = HashMap::new();
    let mut defined: Vec<bool> = vec![false; program.temp_count()];
    let mut stack: Vec<Frame> = Vec::new();

    // Enter the root.
    let undo = rename_block(program, 0, vector, &in_bank, &mut rename, &mut defined);
    stack.push(Frame {
        block: 0,
        next_child: 0,
        undo,
    });

    while let Some(frame) = stack.last_mut() {
        let block = frame.block;
        if frame.next_child < children[block].len() {
            let child = children[block][frame.next_child];
            frame.next_child += 1;
            let undo = rename_block(program, child, vector, &in_bank, &mut rename, &mut defined);
            stack.push(Frame {
                block: child,
                next_child: 0,
                undo,
            });
        } else {
            let frame = stack.pop().expect("frame present");
            for (id, prior) in frame.undo.into_iter().rev() {
                match prior {
                    Some(previous) => rename.insert(id, previous),
                    None => rename.remove(&id),
                };
            }
        }
    }
}

/// Processes one block for [`repair_bank`]: rewrites operands through the
/// active rename map, renames repeated definitions to fresh temps, and
/// pushes the block's outgoing values into successor phi operands. Returns
/// the rename-map undo log for scope restoration.
fn rename_block(
    program: &mut Program,
    block: usize,
    vector: bool,
    in_bank: &dyn Fn(&Program, TempId) -> bool,
    rename: &mut HashMap<TempId, TempId>,
    defined: &mut Vec<bool>,
) -> Vec<(TempId, Option<TempId>)> {
    let mut undo: Vec<(TempId, Option<TempId>)> = Vec::new();

    for index in 0..program.blocks[block].insts.len() {
        let is_phi = program.blocks[block].insts[index].is_phi();
        if !is_phi {
            let inst = &mut program.blocks[block].insts[index];
            for op in &mut inst.ops {
                if let Some(id) = op.temp_id() {
                    if let Some(&new_id) = rename.get(&id) {
                        op.set_temp_id(new_id);
                    }
                }
            }
        }
        let def_count = program.blocks[block].insts[index].defs.len();
        for d in 0..def_count {
            let Some(id) = program.blocks[block].insts[index].defs[d].temp_id() else {
                continue;
            };
            if !in_bank(program, id) {
                continue;
            }
            if !defined[id.0 as usize] {
                defined[id.0 as usize] = true;
                continue;
            }
            let info = program.temp_info(id);
            let fresh = program.allocate_temp(info.class, info.size);
            if fresh.0 as usize >= defined.len() {
                defined.resize(fresh.0 as usize + 1, false);
            }
            defined[fresh.0 as usize] = true;
            undo.push((id, rename.get(&id).copied()));
            rename.insert(id, fresh);
            program.blocks[block].insts[index].defs[d].set_temp_id(fresh);
        }
    }

    // Outgoing phi operands take this block's end-of-block names.
    let succs = if vector {
        program.blocks[block].logical_succs.clone()
    } else {
        program.blocks[block].linearized_succs.clone()
    };
    for succ in succs {
        let preds = if vector {
            &program.blocks[succ].logical_preds
        } else {
            &program.blocks[succ].linearized_preds
        };
        let Some(pred_index) = preds.iter().position(|&p| p == block) else {
            continue;
        };
        for index in 0..program.blocks[succ].insts.len() {
            if !program.blocks[succ].insts[index].is_phi() {
                break;
            }
            let Some(def_id) = program.blocks[succ].insts[index].defs[0].temp_id() else {
                continue;
            };
            if !in_bank(program, def_id) {
                continue;
            }
            let op = &mut program.blocks[succ].insts[index].ops[pred_index];
            if let Some(id) = op.temp_id() {
                if let Some(&new_id) = rename.get(&id) {
                    op.set_temp_id(new_id);
                }
            }
        }
    }

    undo
}

/// Occupancy bitmap helpers. Colors are byte addresses; one flag covers a
/// 4-byte unit.
fn mark(units: &mut [bool], color: u32, size: u32, value: bool) {
    let mut offset = 0;
    while offset < size {
        let unit = ((color + offset) / 4) as usize;
        if unit < units.len() {
            units[unit] = value;
        }
        offset += 4;
    }
}

fn range_free(units: &[bool], color: u32, size: u32) -> bool {
    let mut offset = 0;
    while offset < size {
        let unit = ((color + offset) / 4) as usize;
        if unit >= units.len() || units[unit] {
            return false;
        }
        offset += 4;
    }
    true
}

fn bank_range(class: RegClass) -> (u32, u32) {
    match class {
        RegClass::Vgpr => (VGPR_BASE, VGPR_END),
        RegClass::Sgpr | RegClass::Scc => (0, SGPR_END),
    }
}

/// Lowest free range in the temp's bank, aligned to its byte size.
fn lowest_free(units: &[bool], class: RegClass, size: u32) -> Option<u32> {
    let (start, end) = bank_range(class);
    let mut color = start.next_multiple_of(size.max(4));
    while color + size <= end {
        if range_free(units, color, size) {
            return Some(color);
        }
        color += size.max(4);
    }
    None
}

/// Greedy linear scan per block. The block's live-in colors start out
/// occupied; kills free their ranges; definitions pick, in order of
/// preference, their pre-fixed slot, a slot the next instruction fixes for
/// this exact temp, the matching parallel-copy source slot, or the lowest
/// free range of their bank.
fn color(program: &mut Program) -> Result<(), RegAllocError> {
    let live_ins = liveness::live_in_sets(program);
    let mut colors: Vec<Option<u32>> = vec![None; program.temp_count()];

    for block in 0..program.blocks.len() {
        let mut occupied = vec![false; UNIT_COUNT];
        for &id in &live_ins[block] {
            if let Some(color) = colors[id.0 as usize] {
                mark(&mut occupied, color, program.temp_info(id).size, true);
            }
        }

        for index in 0..program.blocks[block].insts.len() {
            if program.blocks[block].insts[index].is_phi() {
                // Phi operands live on predecessor edges; only the def is
                // colored here, operands are fixed in a final pass.
                color_defs(program, block, index, &mut occupied, &mut colors)?;
                continue;
            }

            // Operands: pin to their def's color, free killed ranges.
            for op_index in 0..program.blocks[block].insts[index].ops.len() {
                let op = program.blocks[block].insts[index].ops[op_index];
                let Some(id) = op.temp_id() else { continue };
                let color = colors[id.0 as usize].ok_or(RegAllocError::UncoloredUse)?;
                let size = program.temp_info(id).size;
                program.blocks[block].insts[index].ops[op_index].set_fixed(PhysReg(color));
                if op.kill() {
                    mark(&mut occupied, color, size, false);
                }
            }

            color_defs(program, block, index, &mut occupied, &mut colors)?;
        }
    }

    // Phi operands share their own definition's color; those definitions
    // may live in later blocks (back edges), so this runs after the scan.
    for block in 0..program.blocks.len() {
        for index in 0..program.blocks[block].insts.len() {
            if !program.blocks[block].insts[index].is_phi() {
                break;
            }
            for op_index in 0..program.blocks[block].insts[index].ops.len() {
                let op = program.blocks[block].insts[index].ops[op_index];
                let Some(id) = op.temp_id() else { continue };
                let color = colors[id.0 as usize].ok_or(RegAllocError::UncoloredUse)?;
                program.blocks[block].insts[index].ops[op_index].set_fixed(PhysReg(color));
            }
        }
    }
    Ok(())
}

fn color_defs(
    program: &mut Program,
    block: usize,
    index: usize,
    occupied: &mut [bool],
    colors: &mut [Option<u32>],
) -> Result<(), RegAllocError> {
    let def_count = program.blocks[block].insts[index].defs.len();
    for d in 0..def_count {
        let def = program.blocks[block].insts[index].defs[d];
        let Some(id) = def.temp_id() else { continue };
        let info = program.temp_info(id);

        if colors[id.0 as usize].is_none() {
            let mut forbidden = occupied.to_vec();
            let mut chosen: Option<u32> = def.phys_reg().map(|r| r.0);

            // Fixed arguments of the next instruction constrain this slot:
            // a slot fixed for this very temp is taken over, any other
            // fixed slot must stay clear.
            if index + 1 < program.blocks[block].insts.len() {
                let next = &program.blocks[block].insts[index + 1];
                for arg in next.ops.iter().chain(next.defs.iter()) {
                    let (Some(arg_id), Some(reg)) = (arg.temp_id(), arg.phys_reg()) else {
                        continue;
                    };
                    if arg_id == id {
                        chosen = Some(reg.0);
                    } else {
                        mark(&mut forbidden, reg.0, program.temp_info(arg_id).size, true);
                    }
                }
            }

            // A parallel copy prefers to be the identity.
            if chosen.is_none() && program.blocks[block].insts[index].op == OpCode::ParallelCopy {
                if let Some(reg) = program.blocks[block].insts[index].ops[d].phys_reg() {
                    if range_free(&forbidden, reg.0, info.size) {
                        chosen = Some(reg.0);
                    }
                }
            }

            let color = match chosen {
                Some(color) => color,
                None => lowest_free(&forbidden, info.class, info.size)
                    .ok_or(RegAllocError::Exhausted(info.class))?,
            };
            colors[id.0 as usize] = Some(color);
        }

        let color = colors[id.0 as usize].expect("just assigned");
        mark(occupied, color, info.size, true);
        program.blocks[block].insts[index].defs[d].set_fixed(PhysReg(color));
    }
    Ok(())
}

/// Replaces every block's outgoing vector phis with one parallel copy in
/// front of the block terminator, pairing each phi operand with the phi
/// definition, then strips the now-dead phi prefixes. Scalar phis must not
/// exist at this point.
fn destroy_phis(program: &mut Program) -> Result<(), RegAllocError> {
    for block in 0..program.blocks.len() {
        let succs = program.blocks[block].logical_succs.clone();
        let mut pairs: Vec<(Arg, Arg)> = Vec::new();
        let mut seen: Vec<usize> = Vec::new();
        for succ in succs {
            if seen.contains(&succ) {
                continue;
            }
            seen.push(succ);
            let pred_index = program.blocks[succ]
                .logical_preds
                .iter()
                .position(|&p| p == block)
                .ok_or(RegAllocError::InconsistentCfg)?;
            for inst in &program.blocks[succ].insts {
                if !inst.is_phi() {
                    break;
                }
                if let Some(id) = inst.defs[0].temp_id() {
                    if program.temp_info(id).class != RegClass::Vgpr {
                        return Err(RegAllocError::ScalarPhiSurvived);
                    }
                }
                pairs.push((inst.ops[pred_index], inst.defs[0]));
            }
        }
        if pairs.is_empty() {
            continue;
        }
        let insts = &mut program.blocks[block].insts;
        if insts.is_empty() {
            return Err(RegAllocError::MissingTerminator);
        }
        let copy = Inst::new(
            OpCode::ParallelCopy,
            pairs.iter().map(|&(_, dst)| dst).collect(),
            pairs.iter().map(|&(src, _)| src).collect(),
        );
        let at = insts.len() - 1;
        insts.insert(at, copy);
    }

    for block in &mut program.blocks {
        let phi_count = block.insts.iter().take_while(|i| i.is_phi()).count();
        block.insts.drain(0..phi_count);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcnc_ir::lir::Block;

    #[test]
    fn dominators_on_a_diamond() {
        let mut p = Program::new();
        let mut b0 = Block::new(0);
        b0.logical_succs = vec![1, 2];
        let mut b1 = Block::new(1);
        b1.logical_preds = vec![0];
        b1.logical_succs = vec![3];
        let mut b2 = Block::new(2);
        b2.logical_preds = vec![0];
        b2.logical_succs = vec![3];
        let mut b3 = Block::new(3);
        b3.logical_preds = vec![1, 2];
        p.blocks = vec![b0, b1, b2, b3];

        let idom = immediate_dominators(&p, true);
        assert_eq!(idom, vec![0, 0, 0, 0]);
    }

    #[test]
    fn copies_are_inserted_before_fixed_instructions() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let b = p.allocate_temp(RegClass::Vgpr, 4);
        let mask = p.allocate_temp(RegClass::Sgpr, 8);
        let mut b0 = Block::new(0);
        b0.insts.push(Inst::new(
            OpCode::Start,
            vec![Arg::temp(a), Arg::temp(b)],
            vec![],
        ));
        b0.insts.push(Inst::new(
            OpCode::VCmpLtF32,
            vec![Arg::fixed_temp(mask, PhysReg(106 * 4))],
            vec![Arg::temp(a), Arg::temp(b)],
        ));
        b0.insts.push(Inst::new(
            OpCode::Exp,
            vec![],
            vec![Arg::temp(a), Arg::temp(b)],
        ));
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0];

        insert_copies(&mut p);

        let ops: Vec<OpCode> = p.blocks[0].insts.iter().map(|i| i.op).collect();
        // One copy right before the fixed-def compare; the start's fixed
        // defs see an empty live set and get none.
        assert_eq!(
            ops,
            vec![
                OpCode::Start,
                OpCode::ParallelCopy,
                OpCode::VCmpLtF32,
                OpCode::Exp,
                OpCode::SEndpgm
            ]
        );
        let copy = &p.blocks[0].insts[1];
        // Both vgprs are live across the compare.
        assert_eq!(copy.defs.len(), 2);
        assert_eq!(copy.defs, copy.ops);
    }

    #[test]
    fn ssa_repair_renames_second_definition() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let mut b0 = Block::new(0);
        b0.insts
            .push(Inst::new(OpCode::Start, vec![Arg::temp(a)], vec![]));
        // An identity copy redefines `a`.
        b0.insts.push(Inst::new(
            OpCode::ParallelCopy,
            vec![Arg::temp(a)],
            vec![Arg::temp(a)],
        ));
        b0.insts
            .push(Inst::new(OpCode::Exp, vec![], vec![Arg::temp(a)]));
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0];

        repair_ssa(&mut p);

        let insts = &p.blocks[0].insts;
        let copy_def = insts[1].defs[0].temp_id().unwrap();
        let copy_src = insts[1].ops[0].temp_id().unwrap();
        let exp_src = insts[2].ops[0].temp_id().unwrap();
        assert_eq!(copy_src, a);
        assert_ne!(copy_def, a);
        // The use after the copy sees the renamed def.
        assert_eq!(exp_src, copy_def);
        assert_eq!(p.temp_info(copy_def).class, RegClass::Vgpr);
    }

    #[test]
    fn coloring_packs_and_respects_kills() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let b = p.allocate_temp(RegClass::Vgpr, 4);
        let c = p.allocate_temp(RegClass::Vgpr, 4);
        let mut b0 = Block::new(0);
        b0.insts.push(Inst::new(
            OpCode::Start,
            vec![
                Arg::fixed_temp(a, PhysReg(VGPR_BASE)),
                Arg::fixed_temp(b, PhysReg(VGPR_BASE + 4)),
            ],
            vec![],
        ));
        // c defined after a dies: may reuse v0.
        let mut use_a = Arg::temp(a);
        use_a.set_kill(true);
        b0.insts
            .push(Inst::new(OpCode::ParallelCopy, vec![Arg::temp(c)], vec![use_a]));
        b0.insts.push(Inst::new(
            OpCode::Exp,
            vec![],
            vec![Arg::temp(c), Arg::temp(b)],
        ));
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0];

        color(&mut p).unwrap();

        let copy = &p.blocks[0].insts[1];
        // The copy takes the identity with its killed source.
        assert_eq!(copy.defs[0].phys_reg(), Some(PhysReg(VGPR_BASE)));
        let exp = &p.blocks[0].insts[2];
        assert_eq!(exp.ops[0].phys_reg(), Some(PhysReg(VGPR_BASE)));
        assert_eq!(exp.ops[1].phys_reg(), Some(PhysReg(VGPR_BASE + 4)));
    }

    #[test]
    fn masks_get_aligned_64_bit_ranges() {
        let mut p = Program::new();
        let s = p.allocate_temp(RegClass::Sgpr, 4);
        let mask = p.allocate_temp(RegClass::Sgpr, 8);
        let mut b0 = Block::new(0);
        b0.insts.push(Inst::new(
            OpCode::Start,
            vec![Arg::fixed_temp(s, PhysReg(0))],
            vec![],
        ));
        b0.insts.push(Inst::new(
            OpCode::LogicalBranch,
            vec![Arg::temp(mask)],
            vec![],
        ));
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0];

        color(&mut p).unwrap();

        let reg = p.blocks[0].insts[1].defs[0].phys_reg().unwrap();
        // s0 is taken, so the aligned pair lands on bytes 8..16 (s2/s3).
        assert_eq!(reg, PhysReg(8));
        assert_eq!(reg.0 % 8, 0);
    }

    #[test]
    fn exhaustion_is_fatal() {
        let mut p = Program::new();
        let mut b0 = Block::new(0);
        let mut defs = Vec::new();
        for _ in 0..=256 {
            let t = p.allocate_temp(RegClass::Vgpr, 4);
            defs.push(Arg::temp(t));
        }
        b0.insts.push(Inst::new(OpCode::Start, defs.clone(), vec![]));
        // Keep them all alive.
        b0.insts.push(Inst::new(OpCode::Exp, vec![], defs));
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0];

        assert!(matches!(
            color(&mut p),
            Err(RegAllocError::Exhausted(RegClass::Vgpr))
        ));
    }

    #[test]
    fn phi_destruction_builds_edge_copies() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let b = p.allocate_temp(RegClass::Vgpr, 4);
        let d = p.allocate_temp(RegClass::Vgpr, 4);
        let mask = p.allocate_temp(RegClass::Sgpr, 8);

        let mut b0 = Block::new(0);
        b0.logical_succs = vec![1];
        b0.insts.push(Inst::new(
            OpCode::Start,
            vec![Arg::temp(a), Arg::temp(b)],
            vec![],
        ));
        b0.insts
            .push(Inst::new(OpCode::LogicalBranch, vec![Arg::temp(mask)], vec![]));

        let mut b1 = Block::new(1);
        b1.logical_preds = vec![0];
        b1.insts.push(Inst::new(
            OpCode::Phi,
            vec![Arg::temp(d)],
            vec![Arg::temp(a)],
        ));
        b1.insts.push(Inst::new(
            OpCode::StartBlock,
            vec![],
            vec![Arg::temp(mask)],
        ));
        b1.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0, b1];

        destroy_phis(&mut p).unwrap();

        // The copy sits before block 0's terminator.
        let b0_ops: Vec<OpCode> = p.blocks[0].insts.iter().map(|i| i.op).collect();
        assert_eq!(
            b0_ops,
            vec![OpCode::Start, OpCode::ParallelCopy, OpCode::LogicalBranch]
        );
        let copy = &p.blocks[0].insts[1];
        assert_eq!(copy.ops[0].temp_id(), Some(a));
        assert_eq!(copy.defs[0].temp_id(), Some(d));
        // The phi prefix is gone.
        assert_eq!(p.blocks[1].insts[0].op, OpCode::StartBlock);
    }

    #[test]
    fn surviving_scalar_phi_is_fatal() {
        let mut p = Program::new();
        let s = p.allocate_temp(RegClass::Sgpr, 4);
        let mut b0 = Block::new(0);
        b0.logical_succs = vec![1];
        b0.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        let mut b1 = Block::new(1);
        b1.logical_preds = vec![0];
        b1.insts.push(Inst::new(
            OpCode::Phi,
            vec![Arg::temp(s)],
            vec![Arg::temp(s)],
        ));
        b1.insts.push(Inst::new(OpCode::SEndpgm, vec![], vec![]));
        p.blocks = vec![b0, b1];

        assert!(matches!(
            destroy_phis(&mut p),
            Err(RegAllocError::ScalarPhiSurvived)
        ));
    }
}
