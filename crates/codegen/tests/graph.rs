mod common;

use cantata_codegen::critical_edge::CriticalEdgeSplitter;
use cantata_ir::{
    builder::test_util::*, BlockId, DomTree, Edge, Func, Opcode, Type,
};
use common::{random_cfg, reachable_avoiding, Lcg};

fn assert_reciprocal(func: &Func) {
    for &block in &func.layout {
        let data = func.block(block);
        for (k, e) in data.succs().iter().enumerate() {
            assert_eq!(
                func.block(e.block).preds()[e.index()],
                Edge::new(block, k),
                "{block} -> {}",
                e.block
            );
        }
        for (k, e) in data.preds().iter().enumerate() {
            assert_eq!(func.block(e.block).succs()[e.index()], Edge::new(block, k));
        }
    }
}

/// Dominance from its definition: `d` dominates `b` if `b` can't be reached
/// from the entry once `d` is removed.
fn brute_force_dominates(func: &Func, d: BlockId, b: BlockId) -> bool {
    d == b || !reachable_avoiding(func, Some(d)).contains(&b)
}

fn check_dominance(func: &mut Func) {
    let dom_tree = DomTree::compute(func);
    let sparse = func.sparse_tree();
    let reachable = reachable_avoiding(func, None);
    let blocks = func.layout.clone();

    for &b in &reachable {
        assert!(dom_tree.is_reachable(b));
        for &d in &blocks {
            let expected = brute_force_dominates(func, d, b);
            assert_eq!(dom_tree.dominates(d, b), expected, "{d} dom {b}");
            if !reachable.contains(&d) {
                continue;
            }
            assert_eq!(sparse.is_ancestor_eq(d, b), expected, "{d} ancestor of {b}");
            let nested = sparse.entry(d) <= sparse.entry(b) && sparse.exit(b) <= sparse.exit(d);
            assert_eq!(nested, expected);
        }
    }
    for &b in &blocks {
        if !reachable.contains(&b) {
            assert!(!sparse.is_reachable(b));
        }
    }
}

#[test]
fn dominance_matches_path_enumeration() {
    let mut rng = Lcg::new(7);
    for n in 2..=8 {
        for _ in 0..40 {
            let mut func = random_cfg(&mut rng, n);
            check_dominance(&mut func);
        }
    }
}

#[test]
fn dominance_of_irreducible_loop() {
    let mut f = fun(
        "irreducible",
        &[
            bloc(
                "a",
                [
                    valu("mem", Opcode::InitMem, Type::Mem, &[]),
                    valu("c", Opcode::Const, Type::I1, &[]),
                ],
                br_if("c", "b", "c"),
            ),
            bloc("b", [], br_if("c", "c", "d")),
            bloc("c", [], br_if("c", "b", "d")),
            bloc("d", [], goto("e")),
            bloc("e", [], exit("mem")),
        ],
    );
    check_dominance(&mut f.func);

    let [a, b, c, e] = f.blocks(["a", "b", "c", "e"]);
    let sparse = f.func.sparse_tree();
    assert_eq!(sparse.parent(b), Some(a));
    assert_eq!(sparse.parent(c), Some(a));
    assert!(sparse.is_ancestor(a, e));
    assert_eq!(sparse.common_ancestor(b, c), Some(a));
}

#[test]
fn edges_stay_reciprocal() {
    let mut rng = Lcg::new(11);
    for _ in 0..50 {
        let mut func = random_cfg(&mut rng, 6);
        assert_reciprocal(&func);

        for _ in 0..10 {
            let blocks = func.layout.clone();
            let block = blocks[rng.below(blocks.len())];
            let succ_num = func.block(block).succ_num();
            if succ_num == 0 {
                continue;
            }
            let idx = rng.below(succ_num);
            match rng.below(3) {
                0 => {
                    func.split_edge(block, idx);
                }
                1 => {
                    let to = blocks[1 + rng.below(blocks.len() - 1)];
                    func.redirect_succ(block, idx, to);
                }
                _ if succ_num == 2 => func.swap_successors(block),
                _ => {}
            }
            assert_reciprocal(&func);
        }
    }
}

#[test]
fn no_critical_edges_after_splitting() {
    let mut rng = Lcg::new(3);
    for _ in 0..100 {
        let mut func = random_cfg(&mut rng, 7);
        CriticalEdgeSplitter::new().run(&mut func);
        assert_reciprocal(&func);
        for &block in &func.layout {
            let data = func.block(block);
            if data.succ_num() < 2 {
                continue;
            }
            for succ in data.succs() {
                assert_eq!(func.block(succ.block).pred_num(), 1);
            }
        }
        check_dominance(&mut func);
    }
}
