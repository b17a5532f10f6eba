//! End-to-end seed scenarios: whole-pipeline runs over small fragment
//! shaders, checked against the expected GCN word stream.

mod common;

use common::*;
use gcnc_ir::hir::OpCode;

/// `o = (a.x, a.y, 0.0, 1.0)`: two interpolated components plus two
/// constant-loaded vgprs, one export, one endpgm.
#[test]
fn identity_fragment() {
    let mut f = FragmentBuilder::new(1);
    let x = f.load_in(0, 0);
    let y = f.load_in(0, 1);
    let zero = f.const_f(0.0);
    let one = f.const_f(1.0);
    f.store_out(0, x);
    f.store_out(1, y);
    f.store_out(2, zero);
    f.store_out(3, one);
    let words = compile(&f.finish()).unwrap();

    // 2 interp pairs + 2 literal moves + exp pair + endpgm.
    assert_eq!(words.len(), 11);
    assert_eq!(words.iter().filter(|&&w| is_vintrp(w)).count(), 4);
    let movs: Vec<usize> = (0..words.len()).filter(|&i| is_v_mov(words[i])).collect();
    assert_eq!(movs.len(), 2);
    // Each move trails its literal: 0.0 and 1.0.
    let literals: Vec<u32> = movs.iter().map(|&i| words[i + 1]).collect();
    assert!(literals.contains(&0x0000_0000));
    assert!(literals.contains(&0x3F80_0000));

    let exp = words.iter().position(|&w| w == EXP_DONE_TARGET0).unwrap();
    assert_eq!(exp, words.len() - 3);
    assert_eq!(*words.last().unwrap(), S_ENDPGM);
}

/// `in vec4 a; out vec4 o; o = a;` compiles to exactly 11 words:
/// 4 interpolation pairs, 1 export pair, 1 endpgm.
#[test]
fn two_attribute_pass_through() {
    let mut f = FragmentBuilder::new(1);
    let a = f.inputs[0];
    let o = f.output;
    let v4 = f.v4;
    let value = f.b.load(v4, None, a, None, vec![]).unwrap();
    f.b.store(o, value, None, vec![]).unwrap();
    let words = compile(&f.finish()).unwrap();

    assert_eq!(words.len(), 11);
    // Interpolation pairs walk the four channels of attribute 0 in order.
    for k in 0..4 {
        let p1 = words[2 * k];
        let p2 = words[2 * k + 1];
        assert!(is_vintrp(p1) && is_vintrp(p2));
        assert_eq!(vintrp_phase(p1), 0);
        assert_eq!(vintrp_phase(p2), 1);
        assert_eq!(vintrp_attr_chan(p1), (0, k as u32));
        assert_eq!(vintrp_attr_chan(p2), (0, k as u32));
    }
    assert_eq!(words[8], EXP_DONE_TARGET0);
    assert_eq!(words[10], S_ENDPGM);
}

/// `o = (a.x < b.x) ? a : b;`: mask plumbing through the diamond, the
/// output phis destroyed into copies, a single terminal export.
#[test]
fn conditional_export() {
    let mut f = FragmentBuilder::new(2);
    let a_x = f.load_in(0, 0);
    let b_x = f.load_in(1, 0);
    let boolean = f.boolean;
    let cond = f.b.f_ord_less_than(boolean, None, a_x, b_x).unwrap();

    let true_label = f.b.id();
    let false_label = f.b.id();
    let merge_label = f.b.id();
    f.b.branch_conditional(cond, true_label, false_label, vec![])
        .unwrap();

    f.b.begin_block(Some(true_label)).unwrap();
    for k in 0..4 {
        let v = f.load_in(0, k);
        f.store_out(k, v);
    }
    f.b.branch(merge_label).unwrap();

    f.b.begin_block(Some(false_label)).unwrap();
    for k in 0..4 {
        let v = f.load_in(1, k);
        f.store_out(k, v);
    }
    f.b.branch(merge_label).unwrap();

    f.b.begin_block(Some(merge_label)).unwrap();
    let words = compile(&f.finish()).unwrap();

    // One compare producing the predicate mask.
    assert_eq!(words.iter().filter(|&&w| is_v_cmp_lt(w)).count(), 1);
    // The conditional branch splits exec: s_and_b64 + s_andn2_b64.
    assert!(words.iter().any(|&w| is_sop2(w, 13)));
    assert!(words.iter().any(|&w| is_sop2(w, 19)));
    // Each side block hands its mask on with s_mov_b64, and the merge
    // block OR-reduces with s_or_b64.
    assert!(words.iter().filter(|&&w| is_s_mov_b64(w)).count() >= 2);
    assert!(words.iter().any(|&w| is_sop2(w, 15)));
    // A single terminal export with done set, then endpgm.
    assert_eq!(
        words.iter().filter(|&&w| w == EXP_DONE_TARGET0).count(),
        1
    );
    assert_eq!(*words.last().unwrap(), S_ENDPGM);
    let exp = words.iter().position(|&w| w == EXP_DONE_TARGET0).unwrap();
    assert_eq!(exp, words.len() - 3);
}

/// A local `vec4 t` written component-wise and copied to the output: the
/// aggregate splits, every piece promotes, and no variable survives.
#[test]
fn splittable_aggregate() {
    let mut f = FragmentBuilder::new(1);
    let t = f.local_v4();
    for k in 0..4 {
        let v = f.load_in(0, k);
        f.store_local(t, k, v);
    }
    let v4 = f.v4;
    let t_val = f.b.load(v4, None, t, None, vec![]).unwrap();
    let o = f.output;
    f.b.store(o, t_val, None, vec![]).unwrap();
    let module = f.finish();

    let program = prepare(&module);
    assert!(program.variables().is_empty());
    // The construct feeding the export is consumed by it alone.
    let entry = program.entry_block();
    for &inst in program.block(entry).insts() {
        if program.def(inst).op() == OpCode::CompositeConstruct {
            for use_ref in program.def(inst).uses() {
                assert_eq!(
                    program.def(use_ref.consumer).op(),
                    OpCode::GcnExport
                );
            }
        }
    }

    let words = compile(&module).unwrap();
    assert_eq!(words.len(), 11);
}

/// A local aggregate indexed by a run-time value cannot be promoted; its
/// surviving loads reach instruction selection, which is fatal today.
#[test]
fn unpromotable_aggregate() {
    let mut f = FragmentBuilder::new(1);
    let t = f.local_v4();
    let j = f.local_int();
    for k in 0..4 {
        let v = f.load_in(0, k);
        f.store_local(t, k, v);
    }
    let one = f.const_i(1);
    let int = f.int;
    {
        // j = 1; index = j (a load, so not a constant at split time).
        f.b.store(j, one, None, vec![]).unwrap();
    }
    let index = f.b.load(int, None, j, None, vec![]).unwrap();
    let dynamic = f.load_local_at(t, index);
    f.store_out(0, dynamic);
    for k in 1..4 {
        let v = f.load_in(0, k);
        f.store_out(k, v);
    }

    let err = compile(&f.finish()).unwrap_err();
    assert!(err.contains("cannot select"), "unexpected error: {err}");
}

/// A vector constant flows through splitting unchanged in meaning: the
/// constant's pieces reach the export as four literal-loaded vgprs.
#[test]
fn vector_constant_output() {
    let mut f = FragmentBuilder::new(0);
    let parts: Vec<u32> = [0.25f32, 0.5, 0.75, 1.0]
        .iter()
        .map(|&v| f.const_f(v))
        .collect();
    let v4 = f.v4;
    let value = f.b.constant_composite(v4, parts);
    let o = f.output;
    f.b.store(o, value, None, vec![]).unwrap();
    let words = compile(&f.finish()).unwrap();

    // 4 literal moves (2 words each) + export pair + endpgm.
    assert_eq!(words.len(), 11);
    let movs: Vec<usize> = (0..words.len()).filter(|&i| is_v_mov(words[i])).collect();
    assert_eq!(movs.len(), 4);
    let literals: Vec<u32> = movs.iter().map(|&i| words[i + 1]).collect();
    for bits in [0.25f32, 0.5, 0.75, 1.0].map(f32::to_bits) {
        assert!(literals.contains(&bits));
    }
    assert_eq!(words[words.len() - 3], EXP_DONE_TARGET0);
    assert_eq!(*words.last().unwrap(), S_ENDPGM);
}

/// A conditional whose true arm does nothing observable: DCE strips the
/// arm, the diamond's mask plumbing remains, and compilation succeeds.
#[test]
fn dead_branch() {
    let mut f = FragmentBuilder::new(2);
    let a_x = f.load_in(0, 0);
    let b_x = f.load_in(1, 0);
    let boolean = f.boolean;
    let cond = f.b.f_ord_less_than(boolean, None, a_x, b_x).unwrap();

    let true_label = f.b.id();
    let false_label = f.b.id();
    let merge_label = f.b.id();
    f.b.branch_conditional(cond, true_label, false_label, vec![])
        .unwrap();

    // Side-effect-free arm: a load nothing consumes.
    f.b.begin_block(Some(true_label)).unwrap();
    let _dead = f.load_in(0, 3);
    f.b.branch(merge_label).unwrap();

    f.b.begin_block(Some(false_label)).unwrap();
    f.b.branch(merge_label).unwrap();

    f.b.begin_block(Some(merge_label)).unwrap();
    for k in 0..4 {
        let v = f.load_in(1, k);
        f.store_out(k, v);
    }
    let module = f.finish();

    // After the pipeline both arms carry only their terminators; the dead
    // load is gone but the conditional structure survives.
    let program = prepare(&module);
    let order = program.block_order().to_vec();
    assert_eq!(order.len(), 4);
    for &arm in &order[1..3] {
        let insts = program.block(arm).insts();
        assert_eq!(insts.len(), 1);
        assert_eq!(program.def(insts[0]).op(), OpCode::Branch);
    }
    let entry_ops: Vec<OpCode> = program
        .block(order[0])
        .insts()
        .iter()
        .map(|&i| program.def(i).op())
        .collect();
    assert!(entry_ops.contains(&OpCode::CondBranch));

    let words = compile(&module).unwrap();
    assert_eq!(*words.last().unwrap(), S_ENDPGM);
    assert_eq!(
        words.iter().filter(|&&w| w == EXP_DONE_TARGET0).count(),
        1
    );
}
