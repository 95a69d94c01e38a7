mod common;

use std::collections::{BTreeSet, HashMap};

use cantata_codegen::{
    compile,
    lower::NoopLowerer,
    regalloc::verify::held,
    verify, Stats,
};
use cantata_ir::{BlockId, Func, Location, ValueId};
use common::{random_program, random_program_with, Lcg};

fn frame_offset(func: &Func, v: ValueId) -> Option<i64> {
    match func.location(v) {
        Some(Location::Stack(slot)) => func.slot_offset(slot),
        _ => None,
    }
}

/// Checks that stack values live at the same time sit at distinct frame
/// offsets unless they hold the same value. Returns the number of stack
/// values seen.
fn assert_disjoint_frame_offsets(func: &Func, round: usize) -> usize {
    let on_stack = |v: ValueId| frame_offset(func, v).is_some();
    let mut live_in: HashMap<BlockId, BTreeSet<ValueId>> = HashMap::new();
    let mut seen = 0;
    let mut check = false;
    loop {
        let mut changed = false;
        for &block in func.layout.iter().rev() {
            let data = func.block(block);
            let mut live = BTreeSet::new();
            for succ in data.succs() {
                live.extend(live_in.get(&succ.block).into_iter().flatten().copied());
                for &v in &func.block(succ.block).values {
                    let value = func.value(v);
                    if value.is_phi() && on_stack(value.arg(succ.index())) {
                        live.insert(value.arg(succ.index()));
                    }
                }
            }

            for &v in data.values.iter().rev() {
                live.remove(&v);
                if let (true, Some(off)) = (check, frame_offset(func, v)) {
                    seen += 1;
                    for &w in &live {
                        if frame_offset(func, w) == Some(off) {
                            assert_eq!(
                                held(func, w),
                                held(func, v),
                                "round {round}: {v} overwrites {w} at offset {off}"
                            );
                        }
                    }
                }
                let value = func.value(v);
                if !value.is_phi() {
                    live.extend(value.args().iter().copied().filter(|&a| on_stack(a)));
                }
            }

            if live_in.get(&block) != Some(&live) {
                live_in.insert(block, live);
                changed = true;
            }
        }
        if check {
            return seen;
        }
        check = !changed;
    }
}

#[test]
fn random_programs_allocate_safely() {
    common::init_logger();
    let mut rng = Lcg::new(42);
    let stats = Stats::new();
    for round in 0..200 {
        let func = random_program(&mut rng, round % 2 == 1);
        let compiled = compile(func, &NoopLowerer, Some(&stats)).unwrap();
        assert_eq!(verify(&compiled.func), Ok(()), "round {round}");
    }
    // The register file is small enough that something had to move.
    assert!(stats.get("regalloc.spills") + stats.get("regalloc.copies") > 0);
}

#[test]
fn unoptimized_builds_still_allocate_safely() {
    let mut rng = Lcg::new(9);
    for round in 0..50 {
        let mut func = random_program(&mut rng, round % 2 == 0);
        let mut config = (*func.config).clone();
        config.optimize = false;
        func.config = config.into();
        let compiled = compile(func, &NoopLowerer, None).unwrap();
        assert_eq!(verify(&compiled.func), Ok(()), "round {round}");
        // Every parameter has a location list rooted at the prologue.
        for idx in 0..compiled.func.abi.params.len() {
            let slot = compiled.func.param_slot(idx);
            let list = compiled.debug.list(slot);
            assert!(!list.is_empty());
            assert_eq!(list[0].start, 0);
        }
    }
}

#[test]
fn live_stack_values_never_share_frame_offsets() {
    let mut rng = Lcg::new(17);
    let mut stack_values = 0;
    for round in 0..200 {
        let func = random_program_with(&mut rng, round % 2 == 0, 3);
        let compiled = compile(func, &NoopLowerer, None).unwrap();
        assert_eq!(verify(&compiled.func), Ok(()), "round {round}");
        stack_values += assert_disjoint_frame_offsets(&compiled.func, round);
    }
    // Three registers are not enough for these programs.
    assert!(stack_values > 0);
}
