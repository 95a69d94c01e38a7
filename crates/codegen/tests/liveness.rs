mod common;

use std::collections::BTreeSet;

use cantata_codegen::{
    compile, lower::NoopLowerer, regalloc::Liveness, stackmap::LiveLocs, StackMaps,
};
use cantata_ir::{BlockId, Func, FunctionBuilder, Opcode, Type, ValueId};
use common::{checked_config, prepare, random_program, Lcg};

/// Plain set-based liveness, without distances.
fn brute_force_live_out(func: &Func) -> Vec<(BlockId, BTreeSet<ValueId>)> {
    let needs_reg = |v: ValueId| func.value_ty(v).needs_reg();
    let blocks = func.layout.clone();
    let mut live_in: Vec<BTreeSet<ValueId>> = vec![BTreeSet::new(); blocks.len()];
    let mut live_out: Vec<BTreeSet<ValueId>> = vec![BTreeSet::new(); blocks.len()];
    let index = |b: BlockId| blocks.iter().position(|&x| x == b).unwrap();

    let mut changed = true;
    while changed {
        changed = false;
        for (i, &block) in blocks.iter().enumerate().rev() {
            let data = func.block(block);
            let mut out = BTreeSet::new();
            for succ in data.succs() {
                let s = func.block(succ.block);
                for &v in &live_in[index(succ.block)] {
                    out.insert(v);
                }
                for &v in &s.values {
                    let value = func.value(v);
                    if value.is_phi() && needs_reg(value.arg(succ.index())) {
                        out.insert(value.arg(succ.index()));
                    }
                }
            }

            let mut live = out.clone();
            live.extend(data.controls().iter().copied().filter(|&c| needs_reg(c)));
            for &v in data.values.iter().rev() {
                live.remove(&v);
                let value = func.value(v);
                if !value.is_phi() {
                    live.extend(value.args().iter().copied().filter(|&a| needs_reg(a)));
                }
            }

            if out != live_out[i] || live != live_in[i] {
                live_out[i] = out;
                live_in[i] = live;
                changed = true;
            }
        }
    }
    blocks.into_iter().zip(live_out).collect()
}

#[test]
fn live_out_matches_set_liveness() {
    let mut rng = Lcg::new(5);
    for round in 0..60 {
        let mut func = random_program(&mut rng, round % 3 == 0);
        prepare(&mut func);
        let live = Liveness::compute(&mut func);
        for (block, expected) in brute_force_live_out(&func) {
            let got: BTreeSet<_> = live.live_out(block).iter().map(|x| x.value).collect();
            assert_eq!(got, expected, "round {round}, {block}");
            for x in live.live_out(block) {
                assert!(x.dist >= 0);
            }
        }
    }
}

fn pointer_diamond() -> Func {
    let config = checked_config(4);
    let abi = config.abi(&[("base", Type::Ptr), ("n", Type::I64)], &[Type::I64]);
    let mut b = FunctionBuilder::new("gc_diamond", config.clone(), abi);
    let base = b.param(0);
    let n = b.param(1);
    let p = b.load(Type::Ptr, base);
    let q = b.new_object(16);
    let zero = b.const_int(Type::I64, 0);
    let flags = b.insert(Opcode::Cmp, Type::Flags, &[n, zero]);
    let cond = b.insert(Opcode::SetCond, Type::I1, &[flags]);
    let (left, right, join) = (b.append_block(), b.append_block(), b.append_block());
    b.br(cond, left, right);

    let start = b.mem();
    b.switch_to_block(left);
    b.call(config.call_desc("collect", &[], &[]), &[]);
    let x = b.load(Type::I64, p);
    let m_left = b.mem();
    b.jump(join);

    b.switch_to_block(right);
    b.set_mem(start);
    b.preempt();
    let y = b.load(Type::I64, q);
    let m_right = b.mem();
    b.jump(join);

    b.switch_to_block(join);
    let mem = b.phi(Type::Mem, &[m_left, m_right]);
    b.set_mem(mem);
    let r = b.phi(Type::I64, &[x, y]);
    let z = b.load(Type::I64, q);
    let s = b.binary(Opcode::Add, r, z);
    b.ret(&[s]);
    b.finish()
}

#[test]
fn stack_maps_reach_a_fixpoint() {
    common::init_logger();
    let mut compiled = compile(pointer_diamond(), &NoopLowerer, None).unwrap();
    let func = &mut compiled.func;
    let maps = &mut compiled.stack_maps;

    // A call, an allocation and a preemption check.
    assert_eq!(maps.len(), 3);
    assert!(!maps.recompute(func));
    let func = &*func;

    let has_ptr_phi = |func: &Func, block: BlockId| {
        func.block(block)
            .values
            .iter()
            .any(|&v| func.value(v).is_phi() && func.value_ty(v) == Type::Ptr)
    };
    for &block in &func.layout {
        let succs: Vec<BlockId> = func.block(block).succs().iter().map(|e| e.block).collect();
        if succs.iter().any(|&s| has_ptr_phi(func, s)) {
            continue;
        }
        let mut union = LiveLocs::default();
        for s in succs {
            let live = maps.live_in(s);
            union.slots.union_with(&live.slots);
            union.regs = union.regs.union(live.regs);
        }
        assert_eq!(maps.live_out(block), &union, "{block}");
    }

    for (sp, live) in maps.iter() {
        assert!(func.op(sp).is_call() || func.op(sp).is_safe_point());
        assert!(live.slots.len() <= maps.num_slots());
    }
}

#[test]
fn calls_leave_no_pointer_in_registers() {
    let compiled = compile(pointer_diamond(), &NoopLowerer, None).unwrap();
    let maps: &StackMaps = &compiled.stack_maps;
    // Calls clobber every register, so nothing is left in one across them.
    for (sp, live) in maps.iter() {
        if compiled.func.op(sp).is_call() {
            assert!(live.regs.is_empty(), "{sp}");
        }
    }
}
