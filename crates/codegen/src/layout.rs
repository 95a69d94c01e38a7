//! Block ordering for emission.
use cranelift_entity::SecondaryMap;

use cantata_ir::{BlockId, BlockKind, BranchPrediction, Func};

/// Reorders `func.layout`: entry first, then a greedy walk that follows the
/// last placed block to a successor whose forward predecessors are all placed,
/// preferring the likely successor. `Exit` blocks go last.
///
/// Every block except the entry is placed after at least one of its
/// predecessors, which the register allocator relies on.
pub fn layout(func: &mut Func) {
    let order = layout_order(func);
    func.layout = order;
}

fn layout_order(func: &mut Func) -> Vec<BlockId> {
    let dom_tree = func.dom_tree();
    let entry = func.entry();

    // Back edges don't count, so loop headers become ready once the loop is
    // entered.
    let mut indegree: SecondaryMap<BlockId, usize> = SecondaryMap::new();
    for block in func.iter_blocks() {
        indegree[block] = func
            .block(block)
            .preds()
            .iter()
            .filter(|e| !dom_tree.dominates(block, e.block))
            .count();
    }

    let mut scheduled: SecondaryMap<BlockId, bool> = SecondaryMap::new();
    let mut order = Vec::with_capacity(func.num_blocks());
    // Blocks whose forward predecessors are all placed.
    let mut ready = Vec::new();
    // Blocks with at least one placed predecessor, most recent last.
    let mut seen = Vec::new();
    let mut exits = Vec::new();

    let mut next = Some(entry);
    while let Some(block) = next {
        order.push(block);
        scheduled[block] = true;

        let data = func.block(block);
        for succ in data.succs().iter().rev() {
            let c = succ.block;
            if scheduled[c] {
                continue;
            }
            if !dom_tree.dominates(c, block) {
                indegree[c] = indegree[c].saturating_sub(1);
            }
            if indegree[c] == 0 {
                ready.push(c);
            } else {
                seen.push(c);
            }
        }

        let likely = match (data.kind, data.likely) {
            (BlockKind::If, BranchPrediction::Likely) => Some(data.succ(0)),
            (BlockKind::If, BranchPrediction::Unlikely) => Some(data.succ(1)),
            _ => None,
        };
        let is_candidate = |c: BlockId| {
            !scheduled[c] && indegree[c] == 0 && func.block(c).kind != BlockKind::Exit
        };

        next = likely.filter(|&c| is_candidate(c)).or_else(|| {
            data.succs()
                .iter()
                .map(|e| e.block)
                .find(|&c| is_candidate(c))
        });
        if next.is_some() {
            continue;
        }

        // No successor of the previously placed block works.
        next = pop_unscheduled(&mut ready, &scheduled, |c| {
            if func.block(c).kind == BlockKind::Exit {
                exits.push(c);
                false
            } else {
                true
            }
        });
        if next.is_some() {
            continue;
        }

        // Irreducible entries never become ready, take the successor seen most
        // recently.
        next = pop_unscheduled(&mut seen, &scheduled, |c| {
            if func.block(c).kind == BlockKind::Exit {
                exits.push(c);
                false
            } else {
                true
            }
        });
        if next.is_some() {
            continue;
        }

        next = pop_unscheduled(&mut exits, &scheduled, |_| true);
    }

    // Unreachable blocks keep their relative order at the end.
    let rest: Vec<_> = func.iter_blocks().filter(|&b| !scheduled[b]).collect();
    order.extend(rest);
    order
}

fn pop_unscheduled(
    stack: &mut Vec<BlockId>,
    scheduled: &SecondaryMap<BlockId, bool>,
    mut accept: impl FnMut(BlockId) -> bool,
) -> Option<BlockId> {
    while let Some(c) = stack.pop() {
        if !scheduled[c] && accept(c) {
            return Some(c);
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use cantata_ir::{builder::test_util::*, Opcode, Type};

    use super::*;

    #[test]
    fn merge_after_both_arms() {
        let mut f = fun(
            "diamond",
            &[
                bloc(
                    "entry",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    br_if("c", "then", "else"),
                ),
                bloc("join", [], exit("mem")),
                bloc("then", [], goto("join")),
                bloc("else", [], goto("join")),
            ],
        );
        layout(&mut f.func);
        let [entry, join, then_block, else_block] = f.blocks(["entry", "join", "then", "else"]);
        assert_eq!(f.func.layout, [entry, then_block, else_block, join]);
    }

    #[test]
    fn likely_successor_and_loop() {
        let mut f = fun(
            "loop",
            &[
                bloc(
                    "entry",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    goto("header"),
                ),
                bloc("done", [], exit("mem")),
                bloc("header", [], br_if("c", "done", "body")),
                bloc("body", [], goto("header")),
            ],
        );
        let header = f.block("header");
        f.func.block_mut(header).likely = BranchPrediction::Unlikely;
        layout(&mut f.func);

        let [entry, done, body] = f.blocks(["entry", "done", "body"]);
        assert_eq!(f.func.layout, [entry, header, body, done]);
    }
}
