//! Instruction selection: lowers HIR to LIR.
//!
//! Each HIR def is assigned a register class first, then blocks are lowered
//! one by one. Within a block instructions are visited back to front and the
//! emitted list reversed, so the single `start`/`start_block` marker can be
//! placed after the phi prefix once the lowering has seen every phi.

use std::collections::HashMap;

use gcnc_ir::hir::{self, BasicBlock, BlockId, DefId, OpCode as HirOp};
use gcnc_ir::lir::{self, Arg, Aux, Inst, OpCode as LirOp, PhysReg, RegClass, TempId};

/// Physical slot of the primitive-mask scalar input.
const PRIM_MASK_SLOT: PhysReg = PhysReg(16 * 4);
/// Physical slots of the two barycentric vector inputs.
const BARY_I_SLOT: PhysReg = PhysReg(256 * 4);
const BARY_J_SLOT: PhysReg = PhysReg(257 * 4);
/// Slot a wave-level predicate mask is pinned to (vcc).
const VCC_SLOT: PhysReg = PhysReg(106 * 4);

#[derive(Debug, thiserror::Error)]
pub enum SelectError {
    /// An opcode earlier passes should have eliminated reached selection
    /// (an unpromoted variable keeps its loads/stores alive, for example).
    #[error("cannot select '{0}'")]
    Unhandled(&'static str),

    /// Only vector-class phis can be lowered; a uniform phi has no
    /// register-machine representation here.
    #[error("scalar phi reached instruction selection")]
    ScalarPhi,

    /// A reachable block lists an unreachable one as predecessor.
    #[error("reachable block has an unreachable predecessor")]
    UnreachablePredecessor,

    /// A 64-bit constant cannot travel as a 32-bit literal.
    #[error("constant does not fit a 32-bit literal")]
    WideConstant,

    /// I/O lowering must have installed the ABI parameter triple.
    #[error("program does not carry the ABI parameter triple")]
    MissingAbiParams,

    /// Phi operand count must match the predecessor count.
    #[error("phi operand count does not match predecessors")]
    PhiArity,

    /// Branch successor count does not match the block's CFG edges.
    #[error("branch successor count does not match block edges")]
    BranchArity,

    /// Interpolate/export auxiliary operands must be integer constants.
    #[error("auxiliary operand is not a constant")]
    NonConstantAux,
}

struct Selector<'a> {
    program: &'a hir::Program,
    lprog: lir::Program,
    classes: Vec<Option<RegClass>>,
    temp_of: Vec<Option<TempId>>,
    control_flow_vars: HashMap<(usize, usize), TempId>,
}

/// Lowers a prepared HIR program to LIR.
pub fn select(program: &hir::Program) -> Result<lir::Program, SelectError> {
    let reachable: Vec<BlockId> = program
        .block_order()
        .iter()
        .copied()
        .filter(|&b| program.block(b).id() != BasicBlock::UNREACHABLE)
        .collect();
    let block_index: HashMap<BlockId, usize> = reachable
        .iter()
        .enumerate()
        .map(|(i, &b)| (b, i))
        .collect();

    let mut sel = Selector {
        program,
        lprog: lir::Program::new(),
        classes: compute_reg_classes(program)?,
        temp_of: vec![None; program.def_count()],
        control_flow_vars: HashMap::new(),
    };

    for i in 0..reachable.len() {
        sel.lprog.blocks.push(lir::Block::new(i));
    }

    // CFG wiring: logical edges mirror HIR, the linearized chain follows
    // program order. Every logical edge gets a dedicated 64-bit mask temp.
    for (i, &block) in reachable.iter().enumerate() {
        if i + 1 < reachable.len() {
            sel.lprog.blocks[i].linearized_succs.push(i + 1);
            sel.lprog.blocks[i + 1].linearized_preds.push(i);
        }
        for &pred in program.block(block).predecessors() {
            let p = *block_index
                .get(&pred)
                .ok_or(SelectError::UnreachablePredecessor)?;
            sel.lprog.blocks[i].logical_preds.push(p);
        }
        for &succ in program.block(block).successors() {
            let s = *block_index
                .get(&succ)
                .ok_or(SelectError::UnreachablePredecessor)?;
            sel.lprog.blocks[i].logical_succs.push(s);
            let mask = sel.lprog.allocate_temp(RegClass::Sgpr, 8);
            sel.control_flow_vars.insert((i, s), mask);
        }
    }

    for (i, &block) in reachable.iter().enumerate() {
        sel.lower_block(i, block)?;
    }

    Ok(sel.lprog)
}

/// Assigns each def its register class per the divergence results:
/// boolean values become wave masks (sgpr) when varying and `scc` when
/// uniform; everything else is vgpr when varying or fed by a vgpr, sgpr
/// otherwise. Parameter 0 is the scalar primitive mask, parameters 1 and 2
/// the per-lane barycentrics.
fn compute_reg_classes(program: &hir::Program) -> Result<Vec<Option<RegClass>>, SelectError> {
    let mut classes = vec![Some(RegClass::Sgpr); program.def_count()];
    let params = program.params();
    if params.len() < 3 {
        return Err(SelectError::MissingAbiParams);
    }
    classes[params[0].index()] = Some(RegClass::Sgpr);
    classes[params[1].index()] = Some(RegClass::Vgpr);
    classes[params[2].index()] = Some(RegClass::Vgpr);

    for &block in program.block_order() {
        if program.block(block).id() == BasicBlock::UNREACHABLE {
            continue;
        }
        for &inst in program.block(block).insts() {
            let def = program.def(inst);
            if program.types().is_void(def.ty()) {
                classes[inst.index()] = None;
                continue;
            }
            let is_bool = program.types().is_bool(def.ty());
            let mut class = match (def.is_varying(), is_bool) {
                (true, true) => RegClass::Sgpr,
                (true, false) => RegClass::Vgpr,
                (false, true) => RegClass::Scc,
                (false, false) => RegClass::Sgpr,
            };
            for &op in def.operands() {
                if classes[op.index()] == Some(RegClass::Vgpr) {
                    class = if is_bool {
                        RegClass::Sgpr
                    } else {
                        RegClass::Vgpr
                    };
                }
            }
            classes[inst.index()] = Some(class);
        }
    }
    Ok(classes)
}

impl<'a> Selector<'a> {
    /// The LIR temp backing a HIR def, allocated on first request. Varying
    /// booleans are 64-bit wave masks; everything else is one 4-byte slot.
    fn temp(&mut self, def: DefId) -> TempId {
        if let Some(t) = self.temp_of[def.index()] {
            return t;
        }
        let class = self.classes[def.index()].unwrap_or(RegClass::Sgpr);
        let size = if class == RegClass::Sgpr && self.program.types().is_bool(self.program.def(def).ty())
        {
            8
        } else {
            4
        };
        let t = self.lprog.allocate_temp(class, size);
        self.temp_of[def.index()] = Some(t);
        t
    }

    /// An operand argument that may stay an inline literal.
    fn src_arg(&mut self, def: DefId) -> Result<Arg, SelectError> {
        if let Some(bits) = self.program.def(def).constant_bits() {
            let lit = u32::try_from(bits).map_err(|_| SelectError::WideConstant)?;
            return Ok(Arg::Constant(lit));
        }
        Ok(Arg::temp(self.temp(def)))
    }

    /// An operand argument that must live in a vector register. Constants
    /// are materialized through a one-pair parallel copy placed just before
    /// the consuming instruction; the emitter turns it into a
    /// `v_mov_b32 dst, literal`.
    fn vgpr_arg(&mut self, def: DefId, pending: &mut Vec<Inst>) -> Result<Arg, SelectError> {
        if let Some(bits) = self.program.def(def).constant_bits() {
            let lit = u32::try_from(bits).map_err(|_| SelectError::WideConstant)?;
            let t = self.lprog.allocate_temp(RegClass::Vgpr, 4);
            pending.push(Inst::new(
                LirOp::ParallelCopy,
                vec![Arg::temp(t)],
                vec![Arg::Constant(lit)],
            ));
            return Ok(Arg::temp(t));
        }
        Ok(Arg::temp(self.temp(def)))
    }

    fn aux_constant(&self, def: DefId) -> Result<u64, SelectError> {
        self.program
            .def(def)
            .constant_bits()
            .ok_or(SelectError::NonConstantAux)
    }

    fn block_start(&mut self, index: usize) -> Inst {
        if self.lprog.blocks[index].linearized_preds.is_empty() {
            let params = self.program.params();
            let (p0, p1, p2) = (params[0], params[1], params[2]);
            let m = self.temp(p0);
            let i = self.temp(p1);
            let j = self.temp(p2);
            return Inst::new(
                LirOp::Start,
                vec![
                    Arg::fixed_temp(m, PRIM_MASK_SLOT),
                    Arg::fixed_temp(i, BARY_I_SLOT),
                    Arg::fixed_temp(j, BARY_J_SLOT),
                ],
                vec![],
            );
        }
        let preds = self.lprog.blocks[index].logical_preds.clone();
        let ops = preds
            .iter()
            .map(|&p| Arg::temp(self.control_flow_vars[&(p, index)]))
            .collect();
        Inst::new(LirOp::StartBlock, vec![], ops)
    }

    fn lower_block(&mut self, index: usize, block: BlockId) -> Result<(), SelectError> {
        let program = self.program;
        let mut rev: Vec<Inst> = Vec::new();
        let mut started = false;

        for &inst in program.block(block).insts().iter().rev() {
            let def = program.def(inst);
            match def.op() {
                HirOp::Ret => {
                    rev.push(Inst::new(LirOp::SEndpgm, vec![], vec![]));
                }
                HirOp::GcnInterpolate => {
                    let attribute = self.aux_constant(def.operand(3))? as u32;
                    let channel = self.aux_constant(def.operand(4))? as u32;
                    let mask = def.operand(0);
                    let bary_i = def.operand(1);
                    let bary_j = def.operand(2);

                    let partial = self.lprog.allocate_temp(RegClass::Vgpr, 4);
                    let dst = self.temp(inst);
                    let mask_arg = Arg::temp(self.temp(mask));
                    let i_arg = Arg::temp(self.temp(bary_i));
                    let j_arg = Arg::temp(self.temp(bary_j));
                    let aux = Aux::Interp { attribute, channel };

                    // Reverse build order: the second phase first.
                    rev.push(Inst::with_aux(
                        LirOp::VInterpP2F32,
                        vec![Arg::temp(dst)],
                        vec![Arg::temp(partial), j_arg, mask_arg],
                        aux,
                    ));
                    rev.push(Inst::with_aux(
                        LirOp::VInterpP1F32,
                        vec![Arg::temp(partial)],
                        vec![i_arg, mask_arg],
                        aux,
                    ));
                }
                HirOp::GcnExport => {
                    let enable = self.aux_constant(def.operand(0))? as u8;
                    let target = self.aux_constant(def.operand(1))? as u8;
                    let compressed = self.aux_constant(def.operand(2))? != 0;
                    let done = self.aux_constant(def.operand(3))? != 0;
                    let mut pending = Vec::new();
                    let mut ops = Vec::with_capacity(4);
                    for k in 0..4 {
                        let value = program.def(inst).operand(4 + k);
                        ops.push(self.vgpr_arg(value, &mut pending)?);
                    }
                    rev.push(Inst::with_aux(
                        LirOp::Exp,
                        vec![],
                        ops,
                        Aux::Export {
                            enable,
                            target,
                            compressed,
                            done,
                            valid_mask: true,
                        },
                    ));
                    rev.extend(pending);
                }
                HirOp::OrderedLessThan => {
                    let mut pending = Vec::new();
                    let lhs = self.src_arg(def.operand(0))?;
                    let rhs = self.vgpr_arg(program.def(inst).operand(1), &mut pending)?;
                    let dst = self.temp(inst);
                    rev.push(Inst::new(
                        LirOp::VCmpLtF32,
                        vec![Arg::fixed_temp(dst, VCC_SLOT)],
                        vec![lhs, rhs],
                    ));
                    rev.extend(pending);
                }
                HirOp::Phi => {
                    if !started {
                        let start = self.block_start(index);
                        rev.push(start);
                        started = true;
                    }
                    if self.classes[inst.index()] != Some(RegClass::Vgpr) {
                        return Err(SelectError::ScalarPhi);
                    }
                    let pred_count = self.lprog.blocks[index].logical_preds.len();
                    if def.operand_count() != pred_count {
                        return Err(SelectError::PhiArity);
                    }
                    let mut ops = Vec::with_capacity(pred_count);
                    for k in 0..pred_count {
                        let op = program.def(inst).operand(k);
                        ops.push(self.src_arg(op)?);
                    }
                    let dst = self.temp(inst);
                    rev.push(Inst::new(LirOp::Phi, vec![Arg::temp(dst)], ops));
                }
                HirOp::CondBranch => {
                    let succs = self.lprog.blocks[index].logical_succs.clone();
                    if succs.len() != 2 {
                        return Err(SelectError::BranchArity);
                    }
                    let predicate = Arg::temp(self.temp(def.operand(0)));
                    let true_mask = self.control_flow_vars[&(index, succs[0])];
                    let false_mask = self.control_flow_vars[&(index, succs[1])];
                    rev.push(Inst::new(
                        LirOp::LogicalCondBranch,
                        vec![Arg::temp(true_mask), Arg::temp(false_mask)],
                        vec![predicate],
                    ));
                }
                HirOp::Branch => {
                    let succs = self.lprog.blocks[index].logical_succs.clone();
                    if succs.len() != 1 {
                        return Err(SelectError::BranchArity);
                    }
                    let mask = self.control_flow_vars[&(index, succs[0])];
                    rev.push(Inst::new(
                        LirOp::LogicalBranch,
                        vec![Arg::temp(mask)],
                        vec![],
                    ));
                }
                other => return Err(SelectError::Unhandled(other.name())),
            }
        }

        if !started {
            let start = self.block_start(index);
            rev.push(start);
        }
        rev.reverse();
        self.lprog.blocks[index].insts = rev;
        Ok(())
    }
}
