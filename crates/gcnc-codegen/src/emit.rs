//! Code emission: allocated LIR → GCN word stream.

use gcnc_ir::lir::{Arg, Aux, Inst, OpCode, Program, RegClass};

use crate::encoder::{
    Encoder, Sgpr, Sop1Op, Sop2Op, SoppOp, Ssrc, Vgpr, VintrpOp, VopcOp, Vop1Op, EXEC_LO,
};

/// Byte base of the vector bank.
const VGPR_BASE: u32 = 1024;

#[derive(Debug, thiserror::Error)]
pub enum EmitError {
    /// Every temp must be pinned to a physical register before emission.
    #[error("temp without a physical register at emission")]
    UnfixedTemp,

    /// An argument's physical slot is not in the bank the encoding needs.
    #[error("argument is not in the {0} bank")]
    WrongBank(&'static str),

    /// SOP2 fits a single trailing literal.
    #[error("SOP2 allows at most one literal operand")]
    DoubleLiteral,

    /// The copy set has a cycle the allocator should have broken.
    #[error("parallel copy made no progress (cycle)")]
    ParallelCopyCycle,

    /// Only 4-byte moves exist for copy lowering.
    #[error("unsupported parallel-copy element size {0}")]
    UnsupportedCopySize(u32),

    /// A scalar destination cannot take a vector source.
    #[error("parallel copy from vector to scalar bank")]
    CrossBankCopy,

    /// An export instruction lost its auxiliary payload.
    #[error("export without its auxiliary payload")]
    MissingExportAux,
}

/// Encodes an allocated LIR program into its final word stream.
pub fn emit(program: &Program) -> Result<Vec<u32>, EmitError> {
    let mut emitter = Emitter {
        program,
        encoder: Encoder::new(program.blocks.len()),
    };
    emitter.run()?;
    Ok(emitter.encoder.into_words())
}

struct Emitter<'a> {
    program: &'a Program,
    encoder: Encoder,
}

impl<'a> Emitter<'a> {
    fn run(&mut self) -> Result<(), EmitError> {
        let program = self.program;
        for block in &program.blocks {
            self.encoder.start_block(block.id);
            for inst in &block.insts {
                self.emit_inst(inst)?;
            }
        }
        Ok(())
    }

    fn emit_inst(&mut self, inst: &Inst) -> Result<(), EmitError> {
        match inst.op {
            // Pseudo instructions without machine words: the wave start
            // materializes the ABI registers, phis are destroyed earlier.
            OpCode::Start | OpCode::Phi => Ok(()),
            OpCode::ParallelCopy => self.emit_parallel_copy(inst),
            OpCode::SEndpgm => {
                self.encoder.sopp(SoppOp::SEndpgm, 0);
                Ok(())
            }
            OpCode::VInterpP1F32 => {
                let (attribute, channel) = interp_aux(inst);
                self.encoder.vintrp(
                    VintrpOp::P1F32,
                    attribute,
                    channel,
                    vgpr(&inst.defs[0])?,
                    vgpr(&inst.ops[0])?,
                );
                Ok(())
            }
            OpCode::VInterpP2F32 => {
                let (attribute, channel) = interp_aux(inst);
                self.encoder.vintrp(
                    VintrpOp::P2F32,
                    attribute,
                    channel,
                    vgpr(&inst.defs[0])?,
                    vgpr(&inst.ops[1])?,
                );
                Ok(())
            }
            OpCode::Exp => {
                let Aux::Export {
                    enable,
                    target,
                    compressed,
                    done,
                    valid_mask,
                } = inst.aux
                else {
                    return Err(EmitError::MissingExportAux);
                };
                self.encoder.exp(
                    enable as u32,
                    target as u32,
                    compressed,
                    done,
                    valid_mask,
                    [
                        vgpr(&inst.ops[0])?,
                        vgpr(&inst.ops[1])?,
                        vgpr(&inst.ops[2])?,
                        vgpr(&inst.ops[3])?,
                    ],
                );
                Ok(())
            }
            OpCode::VCmpLtF32 => {
                self.encoder
                    .vopc(VopcOp::VCmpLtF32, vsrc(&inst.ops[0])?, vgpr(&inst.ops[1])?);
                Ok(())
            }
            // Block entry: OR the incoming wave masks into exec.
            OpCode::StartBlock => {
                match inst.ops.len() {
                    0 => {}
                    1 => {
                        self.encoder
                            .sop1(Sop1Op::SMovB64, Sgpr(EXEC_LO), ssrc(&inst.ops[0])?);
                    }
                    _ => {
                        self.encoder.sop2(
                            Sop2Op::SOrB64,
                            Sgpr(EXEC_LO),
                            ssrc(&inst.ops[0])?,
                            ssrc(&inst.ops[1])?,
                        )?;
                        for op in &inst.ops[2..] {
                            self.encoder.sop2(
                                Sop2Op::SOrB64,
                                Sgpr(EXEC_LO),
                                Ssrc::reg(EXEC_LO),
                                ssrc(op)?,
                            )?;
                        }
                    }
                }
                Ok(())
            }
            // The unconditional successor inherits the whole current mask.
            OpCode::LogicalBranch => {
                self.encoder
                    .sop1(Sop1Op::SMovB64, sgpr(&inst.defs[0])?, Ssrc::reg(EXEC_LO));
                Ok(())
            }
            // Split the current mask by the predicate. The definition that
            // aliases the predicate register must be written last.
            OpCode::LogicalCondBranch => {
                let predicate = ssrc(&inst.ops[0])?;
                if self.overlap(&inst.defs[0], &inst.ops[0]) {
                    self.encoder.sop2(
                        Sop2Op::SAndn2B64,
                        sgpr(&inst.defs[1])?,
                        Ssrc::reg(EXEC_LO),
                        predicate,
                    )?;
                    self.encoder.sop2(
                        Sop2Op::SAndB64,
                        sgpr(&inst.defs[0])?,
                        Ssrc::reg(EXEC_LO),
                        predicate,
                    )?;
                } else {
                    self.encoder.sop2(
                        Sop2Op::SAndB64,
                        sgpr(&inst.defs[0])?,
                        Ssrc::reg(EXEC_LO),
                        predicate,
                    )?;
                    self.encoder.sop2(
                        Sop2Op::SAndn2B64,
                        sgpr(&inst.defs[1])?,
                        Ssrc::reg(EXEC_LO),
                        predicate,
                    )?;
                }
                Ok(())
            }
        }
    }

    /// Byte-range interference of two located arguments.
    fn overlap(&self, a: &Arg, b: &Arg) -> bool {
        let (Some(a_id), Some(b_id)) = (a.temp_id(), b.temp_id()) else {
            return false;
        };
        let (Some(a_reg), Some(b_reg)) = (a.phys_reg(), b.phys_reg()) else {
            return false;
        };
        let a_end = a_reg.0 + self.program.temp_info(a_id).size;
        let b_end = b_reg.0 + self.program.temp_info(b_id).size;
        a_end > b_reg.0 && a_reg.0 < b_end
    }

    /// Lowers a parallel copy to a move sequence: repeatedly emit any pair
    /// whose destination no other pending pair still reads. A full scan
    /// with no progress means the allocator left a cycle, which is fatal.
    fn emit_parallel_copy(&mut self, inst: &Inst) -> Result<(), EmitError> {
        let mut pending: Vec<(Arg, Arg)> = Vec::new();
        for (op, def) in inst.ops.iter().zip(inst.defs.iter()) {
            if op.is_temp() && op.phys_reg() == def.phys_reg() {
                continue;
            }
            pending.push((*op, *def));
        }

        while !pending.is_empty() {
            let mut progress = false;
            let mut index = 0;
            while index < pending.len() {
                let (src, dst) = pending[index];
                let blocked = pending
                    .iter()
                    .enumerate()
                    .any(|(other, &(other_src, _))| other != index && self.overlap(&dst, &other_src));
                if blocked {
                    index += 1;
                    continue;
                }
                self.emit_move(&src, &dst)?;
                pending.remove(index);
                progress = true;
            }
            if !progress {
                return Err(EmitError::ParallelCopyCycle);
            }
        }
        Ok(())
    }

    fn emit_move(&mut self, src: &Arg, dst: &Arg) -> Result<(), EmitError> {
        let dst_id = dst.temp_id().ok_or(EmitError::UnfixedTemp)?;
        let dst_info = self.program.temp_info(dst_id);
        if dst_info.size != 4 {
            return Err(EmitError::UnsupportedCopySize(dst_info.size));
        }
        match dst_info.class {
            RegClass::Vgpr => {
                self.encoder.vop1(Vop1Op::VMovB32, vgpr(dst)?, vsrc(src)?);
            }
            RegClass::Sgpr | RegClass::Scc => {
                if let Some(id) = src.temp_id() {
                    if self.program.temp_info(id).class == RegClass::Vgpr {
                        return Err(EmitError::CrossBankCopy);
                    }
                }
                self.encoder.sop1(Sop1Op::SMovB32, sgpr(dst)?, ssrc(src)?);
            }
        }
        Ok(())
    }
}

fn interp_aux(inst: &Inst) -> (u32, u32) {
    match inst.aux {
        Aux::Interp { attribute, channel } => (attribute, channel),
        _ => (0, 0),
    }
}

/// Scalar register operand index of a located scalar temp.
fn sgpr(arg: &Arg) -> Result<Sgpr, EmitError> {
    let reg = arg.phys_reg().ok_or(EmitError::UnfixedTemp)?;
    if !arg.is_temp() || reg.0 % 4 != 0 || reg.0 >= VGPR_BASE {
        return Err(EmitError::WrongBank("scalar"));
    }
    Ok(Sgpr(reg.0 / 4))
}

/// Vector register number of a located vector temp.
fn vgpr(arg: &Arg) -> Result<Vgpr, EmitError> {
    let reg = arg.phys_reg().ok_or(EmitError::UnfixedTemp)?;
    if reg.0 % 4 != 0 || reg.0 < VGPR_BASE {
        return Err(EmitError::WrongBank("vector"));
    }
    Ok(Vgpr(reg.0 / 4 - 256))
}

/// Scalar source field: register index or trailing literal.
fn ssrc(arg: &Arg) -> Result<Ssrc, EmitError> {
    if let Some(value) = arg.constant_value() {
        return Ok(Ssrc::lit(value));
    }
    let reg = arg.phys_reg().ok_or(EmitError::UnfixedTemp)?;
    if reg.0 % 4 != 0 || reg.0 >= VGPR_BASE {
        return Err(EmitError::WrongBank("scalar"));
    }
    Ok(Ssrc::reg(reg.0 / 4))
}

/// Vector source field: any register operand index or trailing literal.
fn vsrc(arg: &Arg) -> Result<crate::encoder::Vsrc, EmitError> {
    use crate::encoder::Vsrc;
    if let Some(value) = arg.constant_value() {
        return Ok(Vsrc::lit(value));
    }
    let reg = arg.phys_reg().ok_or(EmitError::UnfixedTemp)?;
    if reg.0 % 4 != 0 {
        return Err(EmitError::WrongBank("vector source"));
    }
    Ok(Vsrc::reg(reg.0 / 4))
}

#[cfg(test)]
mod tests {
    use super::*;
    use gcnc_ir::lir::{Block, PhysReg, TempId};

    fn fixed(id: TempId, reg: u32) -> Arg {
        Arg::fixed_temp(id, PhysReg(reg))
    }

    fn one_block(program: &mut Program, insts: Vec<Inst>) {
        let mut block = Block::new(0);
        block.insts = insts;
        program.blocks.push(block);
    }

    #[test]
    fn endpgm_stream() {
        let mut p = Program::new();
        one_block(&mut p, vec![Inst::new(OpCode::SEndpgm, vec![], vec![])]);
        let words = emit(&p).unwrap();
        assert_eq!(words, vec![(0b1_0111_1111 << 23) | (1 << 16)]);
    }

    #[test]
    fn start_block_or_reduces_masks() {
        let mut p = Program::new();
        let m0 = p.allocate_temp(RegClass::Sgpr, 8);
        let m1 = p.allocate_temp(RegClass::Sgpr, 8);
        let m2 = p.allocate_temp(RegClass::Sgpr, 8);
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::StartBlock,
                vec![],
                vec![fixed(m0, 0), fixed(m1, 8), fixed(m2, 16)],
            )],
        );
        let words = emit(&p).unwrap();
        // s_or_b64 exec, s0, s2 ; s_or_b64 exec, exec, s4
        assert_eq!(words.len(), 2);
        assert_eq!(words[0], (0b10 << 30) | (15 << 23) | (126 << 16) | (2 << 8));
        assert_eq!(
            words[1],
            (0b10 << 30) | (15 << 23) | (126 << 16) | (4 << 8) | 126
        );
    }

    #[test]
    fn single_mask_start_block_is_a_move() {
        let mut p = Program::new();
        let m0 = p.allocate_temp(RegClass::Sgpr, 8);
        one_block(
            &mut p,
            vec![Inst::new(OpCode::StartBlock, vec![], vec![fixed(m0, 8)])],
        );
        let words = emit(&p).unwrap();
        assert_eq!(
            words,
            vec![(0b1_0111_1101 << 23) | (126 << 16) | (1 << 8) | 2]
        );
    }

    #[test]
    fn cond_branch_orders_aliasing_write_last() {
        let mut p = Program::new();
        let predicate = p.allocate_temp(RegClass::Sgpr, 8);
        let other = p.allocate_temp(RegClass::Sgpr, 8);
        // defs[0] aliases the predicate: andn2 must come first.
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::LogicalCondBranch,
                vec![fixed(predicate, 424), fixed(other, 8)],
                vec![fixed(predicate, 424)],
            )],
        );
        let words = emit(&p).unwrap();
        assert_eq!(words.len(), 2);
        let andn2 = (0b10u32 << 30) | (19 << 23) | (2 << 16) | (106 << 8) | 126;
        let and = (0b10u32 << 30) | (13 << 23) | (106 << 16) | (106 << 8) | 126;
        assert_eq!(words, vec![andn2, and]);
    }

    #[test]
    fn parallel_copy_swap_is_a_cycle_error() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let b = p.allocate_temp(RegClass::Vgpr, 4);
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::ParallelCopy,
                vec![fixed(a, 1024), fixed(b, 1028)],
                vec![fixed(b, 1028), fixed(a, 1024)],
            )],
        );
        assert!(matches!(emit(&p), Err(EmitError::ParallelCopyCycle)));
    }

    #[test]
    fn parallel_copy_chain_orders_moves() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        let b = p.allocate_temp(RegClass::Vgpr, 4);
        let c = p.allocate_temp(RegClass::Vgpr, 4);
        // b -> c must go before a -> b.
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::ParallelCopy,
                vec![fixed(b, 1028), fixed(c, 1032)],
                vec![fixed(a, 1024), fixed(b, 1028)],
            )],
        );
        let words = emit(&p).unwrap();
        let mov = |dst: u32, src: u32| (0b011_1111u32 << 25) | (dst << 17) | (1 << 9) | src;
        assert_eq!(words, vec![mov(2, 257), mov(1, 256)]);
    }

    #[test]
    fn constant_copy_loads_a_literal() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::ParallelCopy,
                vec![fixed(a, 1024)],
                vec![Arg::Constant(0x3F80_0000)],
            )],
        );
        let words = emit(&p).unwrap();
        assert_eq!(words.len(), 2);
        assert_eq!(words[0] & 0x1FF, 255);
        assert_eq!(words[1], 0x3F80_0000);
    }

    #[test]
    fn identity_pairs_emit_nothing() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::ParallelCopy,
                vec![fixed(a, 1024)],
                vec![fixed(a, 1024)],
            )],
        );
        assert!(emit(&p).unwrap().is_empty());
    }

    #[test]
    fn unfixed_temps_are_fatal() {
        let mut p = Program::new();
        let a = p.allocate_temp(RegClass::Vgpr, 4);
        one_block(
            &mut p,
            vec![Inst::new(
                OpCode::Exp,
                vec![],
                vec![Arg::temp(a), Arg::temp(a), Arg::temp(a), Arg::temp(a)],
            )],
        );
        // Aux is None here, which the export check reports before the args.
        assert!(emit(&p).is_err());
    }
}
