//! Removes unreachable blocks, redundant phis and values nothing depends on.
use cranelift_entity::SecondaryMap;
use smallvec::SmallVec;

use cantata_ir::{cfg, BlockId, Func, ValueId};

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeadcodeStats {
    pub blocks: usize,
    pub values: usize,
    pub phis: usize,
}

pub fn deadcode(func: &mut Func) -> DeadcodeStats {
    let mut stats = DeadcodeStats::default();
    let reachable = cfg::reachable_blocks(func);
    let dead_blocks: Vec<BlockId> = func.iter_blocks().filter(|&b| !reachable[b]).collect();

    // Cut unreachable blocks loose first; this also drops the phi arguments
    // they feed into reachable merge blocks.
    for &block in &dead_blocks {
        while func.block(block).succ_num() > 0 {
            let last = func.block(block).succ_num() - 1;
            func.remove_edge(block, last);
        }
        func.reset_controls(block);
    }

    stats.phis = eliminate_phis(func);

    let live = mark_live(func);
    let mut dead = Vec::new();
    for block in func.layout.clone() {
        let values = std::mem::take(&mut func.block_mut(block).values);
        let (keep, drop): (Vec<_>, Vec<_>) = values.into_iter().partition(|&v| live[v]);
        func.block_mut(block).values = keep;
        dead.extend(drop);
    }

    // Dead values may refer to each other, drop all edges before freeing.
    for &value in &dead {
        func.reset_args(value);
    }
    for &value in &dead {
        func.free_value(value);
    }
    stats.values = dead.len();
    prune_named_values(func, |func, v| func.value(v).block().is_some() && live[v]);

    for block in dead_blocks {
        func.free_block(block);
        stats.blocks += 1;
    }

    stats
}

/// Values with side effects and block controls of reachable blocks are
/// live, as is everything they transitively use.
fn mark_live(func: &Func) -> SecondaryMap<ValueId, bool> {
    let mut live = SecondaryMap::new();
    let mut worklist: Vec<ValueId> = Vec::new();
    let reachable = cfg::reachable_blocks(func);

    for block in func.iter_blocks().filter(|&b| reachable[b]) {
        let data = func.block(block);
        worklist.extend(data.controls());
        worklist.extend(
            data.values
                .iter()
                .copied()
                .filter(|&v| func.op(v).has_side_effects()),
        );
    }

    while let Some(value) = worklist.pop() {
        if live[value] {
            continue;
        }
        live[value] = true;
        worklist.extend(func.value(value).args().iter().filter(|&&a| !live[a]));
    }
    live
}

/// Replaces phis whose arguments are all the same value (ignoring
/// self references) by that value.
fn eliminate_phis(func: &mut Func) -> usize {
    let mut eliminated = 0;
    let mut changed = true;
    while changed {
        changed = false;
        for block in func.layout.clone() {
            let phis: SmallVec<[ValueId; 8]> = func
                .block(block)
                .values
                .iter()
                .copied()
                .filter(|&v| func.value(v).is_phi())
                .collect();
            for phi in phis {
                let Some(same) = unique_arg(func, phi) else {
                    continue;
                };
                func.replace_uses(phi, same);
                rename_value(func, phi, same);
                func.reset_args(phi);
                func.remove_value(phi);
                eliminated += 1;
                changed = true;
            }
        }
    }
    eliminated
}

fn unique_arg(func: &Func, phi: ValueId) -> Option<ValueId> {
    let mut same = None;
    for &arg in func.value(phi).args() {
        if arg == phi || Some(arg) == same {
            continue;
        }
        if same.is_some() {
            return None;
        }
        same = Some(arg);
    }
    same
}

fn rename_value(func: &mut Func, old: ValueId, new: ValueId) {
    for values in func.named_values.values_mut() {
        for v in values.iter_mut().filter(|v| **v == old) {
            *v = new;
        }
        values.dedup();
    }
}

/// Drops named value entries that no longer satisfy `keep`, and slots left
/// without values.
pub fn prune_named_values(func: &mut Func, keep: impl Fn(&Func, ValueId) -> bool) {
    let mut named = std::mem::take(&mut func.named_values);
    for values in named.values_mut() {
        values.retain(|&v| keep(&*func, v));
    }
    named.retain(|_, values| !values.is_empty());
    func.named_values = named;
}
