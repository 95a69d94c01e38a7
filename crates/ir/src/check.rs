//! Structural checker run between passes when the `check` phase option is on.
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashSet;
use thiserror::Error;

use crate::{domtree::DomTree, BlockId, BlockKind, Edge, Func, Opcode, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckError {
    #[error("{0} is in the layout but was freed")]
    FreedBlock(BlockId),

    #[error("{0} has no kind")]
    InvalidKind(BlockId),

    #[error("{block} of kind {kind} has {found} {what}, expected {expected}")]
    Arity {
        block: BlockId,
        kind: BlockKind,
        what: &'static str,
        found: usize,
        expected: usize,
    },

    #[error("edge {block}.{what}[{index}] has no matching reverse edge")]
    BrokenEdge {
        block: BlockId,
        what: &'static str,
        index: usize,
    },

    #[error("entry block {0} has predecessors")]
    EntryHasPreds(BlockId),

    #[error("{value} is listed in {block} but belongs to {owner:?}")]
    WrongBlock {
        value: ValueId,
        block: BlockId,
        owner: Option<BlockId>,
    },

    #[error("{value} has {found} args, expected {expected}")]
    ArgCount {
        value: ValueId,
        found: usize,
        expected: usize,
    },

    #[error("{value} uses {arg} which is not in the function")]
    DanglingArg { value: ValueId, arg: ValueId },

    #[error("{value} records {recorded} uses, found {found}")]
    UseCount {
        value: ValueId,
        recorded: u32,
        found: u32,
    },

    #[error("{value} uses {arg} which does not dominate it")]
    NotDominated { value: ValueId, arg: ValueId },

    #[error("{value} uses {arg} which is scheduled after it")]
    UseBeforeDef { value: ValueId, arg: ValueId },

    #[error("phi {0} is not at the start of its block")]
    LatePhi(ValueId),

    #[error("critical edge {from} -> {to}")]
    CriticalEdge { from: BlockId, to: BlockId },

    #[error("{0} needs a location but has none")]
    MissingLocation(ValueId),

    #[error("control of return block {0} is not a MakeResult")]
    BadReturn(BlockId),
}

pub fn check_func(func: &Func) -> Result<(), CheckError> {
    let entry = func.entry();
    if func.block(entry).pred_num() != 0 {
        return Err(CheckError::EntryHasPreds(entry));
    }

    let mut listed = FxHashSet::default();
    for block in func.iter_blocks() {
        check_block(func, block)?;
        for &value in &func.block(block).values {
            listed.insert(value);
        }
    }

    let mut uses: SecondaryMap<ValueId, u32> = SecondaryMap::new();
    for block in func.iter_blocks() {
        let data = func.block(block);
        for &value in &data.values {
            check_value(func, block, value, &listed)?;
            for &arg in func.value(value).args() {
                uses[arg] += 1;
            }
        }
        for &control in data.controls() {
            if !listed.contains(&control) {
                return Err(CheckError::DanglingArg {
                    value: control,
                    arg: control,
                });
            }
            uses[control] += 1;
        }
    }
    for &value in &listed {
        let recorded = func.value(value).uses();
        if recorded != uses[value] {
            return Err(CheckError::UseCount {
                value,
                recorded,
                found: uses[value],
            });
        }
    }

    // Edge fixup leaves copies that are not in SSA form.
    if !func.reg_allocated {
        check_dominance(func)?;
    }

    if func.scheduled {
        check_schedule(func)?;
    }

    if func.no_critical_edges {
        for block in func.iter_blocks() {
            let data = func.block(block);
            if data.succ_num() < 2 {
                continue;
            }
            for succ in data.succs() {
                if func.block(succ.block).pred_num() > 1 {
                    return Err(CheckError::CriticalEdge {
                        from: block,
                        to: succ.block,
                    });
                }
            }
        }
    }

    if func.reg_allocated {
        for value in func.iter_values() {
            let data = func.value(value);
            if data.ty.needs_reg() && data.uses() > 0 && func.location(value).is_none() {
                return Err(CheckError::MissingLocation(value));
            }
        }
    }

    Ok(())
}

fn check_block(func: &Func, block: BlockId) -> Result<(), CheckError> {
    if !func.is_block_live(block) {
        return Err(CheckError::FreedBlock(block));
    }
    let data = func.block(block);
    let (Some(succ_num), Some(control_num)) = (data.kind.succ_num(), data.kind.control_num())
    else {
        return Err(CheckError::InvalidKind(block));
    };

    let arity = |what, found, expected| {
        if found == expected {
            Ok(())
        } else {
            Err(CheckError::Arity {
                block,
                kind: data.kind,
                what,
                found,
                expected,
            })
        }
    };
    arity("successors", data.succ_num(), succ_num)?;
    arity("controls", data.controls().len(), control_num)?;

    if data.kind == BlockKind::Ret && func.op(data.controls()[0]) != Opcode::MakeResult {
        return Err(CheckError::BadReturn(block));
    }

    for (i, e) in data.succs().iter().enumerate() {
        if func.block(e.block).preds().get(e.index()) != Some(&Edge::new(block, i)) {
            return Err(CheckError::BrokenEdge {
                block,
                what: "succs",
                index: i,
            });
        }
    }
    for (i, e) in data.preds().iter().enumerate() {
        if func.block(e.block).succs().get(e.index()) != Some(&Edge::new(block, i)) {
            return Err(CheckError::BrokenEdge {
                block,
                what: "preds",
                index: i,
            });
        }
    }

    Ok(())
}

fn check_value(
    func: &Func,
    block: BlockId,
    value: ValueId,
    listed: &FxHashSet<ValueId>,
) -> Result<(), CheckError> {
    let data = func.value(value);
    if data.block() != Some(block) {
        return Err(CheckError::WrongBlock {
            value,
            block,
            owner: data.block(),
        });
    }

    let expected = if data.is_phi() {
        Some(func.block(block).pred_num())
    } else {
        usize::try_from(data.op.info().arg_len).ok()
    };
    if let Some(expected) = expected {
        if data.args().len() != expected {
            return Err(CheckError::ArgCount {
                value,
                found: data.args().len(),
                expected,
            });
        }
    }

    for &arg in data.args() {
        if !listed.contains(&arg) {
            return Err(CheckError::DanglingArg { value, arg });
        }
    }

    Ok(())
}

fn check_dominance(func: &Func) -> Result<(), CheckError> {
    let dom_tree = DomTree::compute(func);
    for block in func.iter_blocks() {
        if !dom_tree.is_reachable(block) {
            continue;
        }
        let data = func.block(block);
        for &value in &data.values {
            let v = func.value(value);
            for (i, &arg) in v.args().iter().enumerate() {
                // A phi argument must be available at the end of the matching
                // predecessor.
                let user_block = if v.is_phi() { data.pred(i) } else { block };
                if !dom_tree.is_reachable(user_block) {
                    continue;
                }
                if !dom_tree.dominates(func.block_of(arg), user_block) {
                    return Err(CheckError::NotDominated { value, arg });
                }
            }
        }
    }
    Ok(())
}

fn check_schedule(func: &Func) -> Result<(), CheckError> {
    for block in func.iter_blocks() {
        let mut seen = FxHashSet::default();
        let mut past_phis = false;
        for &value in &func.block(block).values {
            let data = func.value(value);
            if data.is_phi() {
                if past_phis {
                    return Err(CheckError::LatePhi(value));
                }
            } else {
                past_phis = true;
                for &arg in data.args() {
                    if func.block_of(arg) == block && !seen.contains(&arg) {
                        return Err(CheckError::UseBeforeDef { value, arg });
                    }
                }
            }
            seen.insert(value);
        }
    }
    Ok(())
}
