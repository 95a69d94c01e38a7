mod common;

use cantata_codegen::{
    compile,
    lower::NoopLowerer,
    regalloc::{
        verify,
        verify::{held, Held},
        Liveness,
    },
    Stats,
};
use cantata_ir::{
    builder::test_util::*, Func, FunctionBuilder, Location, Opcode, Type, ValueId,
};
use common::{checked_config, dominates_value, index_in_block, prepare, values, values_with_op};

fn diamond() -> TestFunc {
    let config = checked_config(4);
    let abi = config.abi(&[("x", Type::I64), ("y", Type::I64)], &[Type::I64]);
    fun_with(
        config,
        abi,
        "diamond",
        &[
            bloc(
                "entry",
                [
                    valu("mem", Opcode::InitMem, Type::Mem, &[]),
                    valu_i("x", Opcode::Arg, Type::I64, 0, &[]),
                    valu_i("y", Opcode::Arg, Type::I64, 1, &[]),
                    valu("v", Opcode::Mul, Type::I64, &["x", "y"]),
                    valu("f", Opcode::Cmp, Type::Flags, &["x", "y"]),
                    valu("c", Opcode::SetCond, Type::I1, &["f"]),
                ],
                br_if("c", "left", "right"),
            ),
            bloc(
                "left",
                [valu_i("a", Opcode::AddConst, Type::I64, 1, &["x"])],
                goto("join"),
            ),
            bloc(
                "right",
                [valu_i("b", Opcode::AddConst, Type::I64, 2, &["y"])],
                goto("join"),
            ),
            bloc(
                "join",
                [
                    valu("p", Opcode::Phi, Type::I64, &["a", "b"]),
                    valu("s", Opcode::Add, Type::I64, &["p", "v"]),
                    valu("r", Opcode::MakeResult, Type::Mem, &["s", "mem"]),
                ],
                ret("r"),
            ),
        ],
    )
}

#[test]
fn diamond_value_reaches_join() {
    common::init_logger();
    let mut f = diamond();
    prepare(&mut f.func);
    let [entry, left, right] = f.blocks(["entry", "left", "right"]);
    let v = f.value("v");
    assert_eq!(f.func.block_of(v), entry);

    let live = Liveness::compute(&mut f.func);
    assert!(live.is_live_out(entry, v));
    assert!(live.is_live_out(left, v));
    assert!(live.is_live_out(right, v));

    let f = diamond();
    let s = f.value("s");
    let join = f.block("join");
    let compiled = compile(f.func, &NoopLowerer, None).unwrap();
    let func = &compiled.func;
    assert_eq!(verify(func), Ok(()));

    // Whatever the allocator picked, `s` reads `v` from where it is at the
    // join on both paths.
    let arg = func.value(s).arg(1);
    assert_eq!(held(func, arg), Held::Value(v));
    match func.location(arg) {
        Some(Location::Reg(_)) => {
            assert!(values_with_op(func, Opcode::LoadReg).is_empty());
        }
        Some(Location::Stack(_)) => {
            for pred in func.block(join).preds() {
                assert!(func
                    .block(pred.block)
                    .values
                    .iter()
                    .any(|&x| func.op(x) == Opcode::StoreReg));
            }
        }
        None => panic!("{arg} has no location"),
    }
}

#[test]
fn self_loop_keeps_its_register() {
    let config = checked_config(4);
    let abi = config.abi(&[("n", Type::I64)], &[Type::I64]);
    let f = fun_with(
        config,
        abi,
        "count",
        &[
            bloc(
                "entry",
                [
                    valu("mem", Opcode::InitMem, Type::Mem, &[]),
                    valu_i("n", Opcode::Arg, Type::I64, 0, &[]),
                    valu_i("zero", Opcode::Const, Type::I64, 0, &[]),
                ],
                goto("loop"),
            ),
            bloc(
                "loop",
                [
                    valu("i", Opcode::Phi, Type::I64, &["zero", "next"]),
                    valu_i("next", Opcode::AddConst, Type::I64, 1, &["i"]),
                    valu("f", Opcode::Cmp, Type::Flags, &["next", "n"]),
                    valu("c", Opcode::SetCond, Type::I1, &["f"]),
                ],
                br_if("c", "loop", "exit"),
            ),
            bloc(
                "exit",
                [valu("r", Opcode::MakeResult, Type::Mem, &["next", "mem"])],
                ret("r"),
            ),
        ],
    );
    let i = f.value("i");
    let header = f.block("loop");
    let stats = Stats::new();
    let compiled = compile(f.func, &NoopLowerer, Some(&stats)).unwrap();
    let func = &compiled.func;

    assert_eq!(stats.get("regalloc.spills"), 0);
    assert_eq!(stats.get("regalloc.restores"), 0);
    assert!(values_with_op(func, Opcode::StoreReg).is_empty());
    assert!(values_with_op(func, Opcode::LoadReg).is_empty());

    // Both incoming values arrive where the phi lives.
    let loc = func.location(i);
    assert!(matches!(loc, Some(Location::Reg(_))));
    for (idx, _) in func.block(header).preds().iter().enumerate() {
        let arg = func.value(i).arg(idx);
        assert_eq!(func.location(arg), loc);
    }
}

fn pointer_pressure() -> (Func, [ValueId; 3]) {
    let config = checked_config(4);
    let abi = config.abi(&[("base", Type::Ptr)], &[Type::I64]);
    let mut b = FunctionBuilder::new("pressure", config.clone(), abi);
    let base = b.param(0);
    let p1 = b.load(Type::Ptr, base);
    let p2 = b.load(Type::Ptr, p1);
    let p3 = b.load(Type::Ptr, p2);
    b.call(config.call_desc("collect", &[], &[]), &[]);
    let x = b.load(Type::I64, p1);
    let y = b.load(Type::I64, p2);
    let z = b.load(Type::I64, p3);
    let s = b.binary(Opcode::Add, x, y);
    let s = b.binary(Opcode::Add, s, z);
    b.ret(&[s]);
    (b.finish(), [p1, p2, p3])
}

#[test]
fn pointers_live_across_call_are_spilled_and_mapped() {
    let (func, ptrs) = pointer_pressure();
    let mut compiled = compile(func, &NoopLowerer, None).unwrap();
    let func = &mut compiled.func;
    assert_eq!(verify(func), Ok(()));

    let calls = values_with_op(func, Opcode::Call);
    assert_eq!(calls.len(), 1);
    let call = calls[0];
    let map = compiled.stack_maps.get(call).unwrap().clone();
    let mapped: Vec<_> = map.slots.iter().map(|n| compiled.stack_maps.slot(n)).collect();

    for p in ptrs {
        let spills: Vec<ValueId> = values(func)
            .filter(|&v| func.op(v) == Opcode::StoreReg && held(func, v) == Held::Value(p))
            .collect();
        assert!(!spills.is_empty(), "{p} is not spilled");
        for &spill in &spills {
            assert!(dominates_value(func, spill, call), "{spill} after the call");
            let Some(Location::Stack(slot)) = func.location(spill) else {
                panic!("{spill} is not on the stack");
            };
            assert!(mapped.iter().any(|&m| func.same_storage(m, slot)));
        }

        // Restores wait until the value is needed again.
        let restores: Vec<ValueId> = values(func)
            .filter(|&v| func.op(v) == Opcode::LoadReg && held(func, v) == Held::Value(p))
            .collect();
        assert!(!restores.is_empty());
        for r in restores {
            assert_eq!(func.block_of(r), func.block_of(call));
            assert!(index_in_block(func, r) > index_in_block(func, call));
        }
    }
    // Nothing survives a call in a register.
    assert!(map.regs.is_empty());
}

#[test]
fn frame_holds_every_spill_slot() {
    let (func, _) = pointer_pressure();
    let compiled = compile(func, &NoopLowerer, None).unwrap();
    let func = &compiled.func;
    for v in values(func) {
        if let Some(Location::Stack(slot)) = func.location(v) {
            let off = func.slot_offset(slot).unwrap();
            let size = i64::from(func.slot(slot).ty.size());
            assert!(off >= 0 && off + size <= func.frame.size, "{v} at {off}");
        }
    }
}
