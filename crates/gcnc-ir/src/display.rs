//! Human-readable dumps of both IR levels, for `--emit-ir` and tests.

use std::fmt::Write;

use crate::hir;
use crate::lir;
use crate::types::TypeInfo;

/// Renders a HIR program as text.
pub fn dump_hir(program: &hir::Program) -> String {
    let mut out = String::new();
    let kind = match program.kind() {
        hir::ProgramKind::Fragment => "fragment",
        hir::ProgramKind::Vertex => "vertex",
        hir::ProgramKind::Compute => "compute",
    };
    let _ = writeln!(out, "----- program({kind}) -----");

    let _ = write!(out, "  params:");
    for &p in program.params() {
        let _ = write!(out, " %{}", p.index());
    }
    let _ = writeln!(out);

    if !program.variables().is_empty() {
        let _ = writeln!(out, "  variables:");
        for &v in program.variables() {
            let _ = writeln!(out, "    %{} = variable", v.index());
        }
    }

    for &block in program.block_order() {
        let bb = program.block(block);
        if bb.id() == hir::BasicBlock::UNREACHABLE {
            let _ = writeln!(out, "  block <unreachable>:");
        } else {
            let _ = writeln!(out, "  block {}:", bb.id());
        }
        for &inst in bb.insts() {
            let def = program.def(inst);
            let _ = write!(out, "    ");
            if !program.types().is_void(def.ty()) {
                let _ = write!(out, "%{} = ", inst.index());
            }
            let _ = write!(out, "{}", def.op().name());
            for &op in def.operands() {
                let operand = program.def(op);
                match (operand.constant_bits(), program.types().info(operand.ty())) {
                    (Some(bits), TypeInfo::Int { .. }) => {
                        let _ = write!(out, " {bits}");
                    }
                    _ => {
                        let _ = write!(out, " %{}", op.index());
                    }
                }
            }
            let _ = writeln!(out);
        }
        let _ = write!(out, "    successors:");
        for &succ in bb.successors() {
            let _ = write!(out, " {}", program.block(succ).id());
        }
        let _ = writeln!(out);
    }
    out
}

fn write_arg(out: &mut String, arg: &lir::Arg) {
    match arg {
        lir::Arg::Constant(v) => {
            let _ = write!(out, " #{v:#x}");
        }
        lir::Arg::Temp { id, fixed, kill } => {
            let _ = write!(out, " t{}", id.0);
            if let Some(reg) = fixed {
                if reg.0 >= 1024 {
                    let _ = write!(out, "@v{}", reg.0 / 4 - 256);
                } else {
                    let _ = write!(out, "@s{}", reg.0 / 4);
                }
            }
            if *kill {
                let _ = write!(out, "!");
            }
        }
    }
}

/// Renders a LIR program as text.
pub fn dump_lir(program: &lir::Program) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "----- lir -----");
    for block in &program.blocks {
        let _ = writeln!(
            out,
            "  block {} (logical {:?} -> {:?}, linear {:?} -> {:?}):",
            block.id,
            block.logical_preds,
            block.logical_succs,
            block.linearized_preds,
            block.linearized_succs
        );
        for inst in &block.insts {
            let _ = write!(out, "   ");
            for def in &inst.defs {
                write_arg(&mut out, def);
            }
            if !inst.defs.is_empty() {
                let _ = write!(out, " =");
            }
            let _ = write!(out, " {}", inst.op.name());
            for op in &inst.ops {
                write_arg(&mut out, op);
            }
            match inst.aux {
                lir::Aux::None => {}
                lir::Aux::Interp { attribute, channel } => {
                    let _ = write!(out, "  (attr {attribute}, chan {channel})");
                }
                lir::Aux::Export {
                    enable,
                    target,
                    done,
                    ..
                } => {
                    let _ = write!(out, "  (en {enable:#x}, tgt {target}, done {})", done as u8);
                }
            }
            let _ = writeln!(out);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hir::{OpCode, Program, ProgramKind};
    use crate::types::TypeTable;

    #[test]
    fn hir_dump_contains_blocks_and_ops() {
        let mut p = Program::new(ProgramKind::Fragment);
        let b = p.create_block();
        p.set_block_id(b, 0);
        let c = p.scalar_constant(TypeTable::INT32, 3);
        let i = p.create_inst(OpCode::CompositeExtract, TypeTable::FLOAT32, vec![c, c]);
        p.push_inst(b, i);
        let ret = p.create_inst(OpCode::Ret, TypeTable::VOID, vec![]);
        p.push_inst(b, ret);

        let dump = dump_hir(&p);
        assert!(dump.contains("block 0:"));
        assert!(dump.contains("composite_extract 3 3"));
        assert!(dump.contains("ret"));
    }

    #[test]
    fn lir_dump_formats_registers() {
        let mut p = lir::Program::new();
        let t = p.allocate_temp(lir::RegClass::Vgpr, 4);
        let mut block = lir::Block::new(0);
        block.insts.push(lir::Inst::new(
            lir::OpCode::Exp,
            vec![],
            vec![lir::Arg::fixed_temp(t, lir::PhysReg(1024))],
        ));
        p.blocks.push(block);
        let dump = dump_lir(&p);
        assert!(dump.contains("exp t0@v0"));
    }
}
