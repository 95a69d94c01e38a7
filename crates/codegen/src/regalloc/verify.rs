//! Checks an allocated function by tracking what every location holds.
//!
//! Copies, spills and restores carry the identity of the value they were
//! made from; rematerialized constants are identified by what they compute.
//! A forward dataflow over the blocks intersects the location contents at
//! merges, and every register argument must then read its own value. Once
//! the frame is laid out, stack contents are tracked per frame offset, so two
//! slots placed at the same offset clobber each other.
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;
use thiserror::Error;

use cantata_ir::{Aux, BlockId, DomTree, Func, Location, Opcode, RegNum, SlotId, Type, ValueId};

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Held {
    Value(ValueId),
    Const(Opcode, Type, i64, Aux),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VerifyError {
    #[error("{user} reads {arg} from {loc:?}, which holds {found:?}")]
    WrongContents {
        user: ValueId,
        arg: ValueId,
        loc: Location,
        found: Option<Held>,
    },

    #[error("{user} reads {arg}, which has no location")]
    NoLocation { user: ValueId, arg: ValueId },

    #[error("control of {block} reads {arg} from {loc:?}, which holds {found:?}")]
    WrongControl {
        block: BlockId,
        arg: ValueId,
        loc: Location,
        found: Option<Held>,
    },

    #[error("restore {restore} is not dominated by its spill {spill}")]
    RestoreNotDominated { restore: ValueId, spill: ValueId },
}

/// Where a location's contents live.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum Storage {
    Reg(RegNum),
    Slot(SlotId),
    Frame(i64),
}

impl Storage {
    fn of(func: &Func, loc: Location) -> Self {
        match loc {
            Location::Reg(r) => Self::Reg(r),
            Location::Stack(slot) => func.slot_offset(slot).map_or(Self::Slot(slot), Self::Frame),
        }
    }
}

type State = FxHashMap<Storage, Held>;

pub fn verify(func: &Func) -> Result<(), VerifyError> {
    let dom_tree = DomTree::compute(func);
    check_restores(func, &dom_tree)?;

    let mut end: SecondaryMap<BlockId, Option<State>> = SecondaryMap::new();
    let mut changed = true;
    while changed {
        changed = false;
        for &block in &func.layout {
            let Some(state) = entry_state(func, &end, block, false)? else {
                continue;
            };
            let out = transfer(func, block, state, false)?;
            if end[block].as_ref() != Some(&out) {
                end[block] = Some(out);
                changed = true;
            }
        }
    }

    for &block in &func.layout {
        if let Some(state) = entry_state(func, &end, block, true)? {
            transfer(func, block, state, true)?;
        }
    }
    Ok(())
}

/// Follows copies, spills and restores back to the value they hold.
pub fn held(func: &Func, mut v: ValueId) -> Held {
    loop {
        let data = func.value(v);
        match data.op {
            Opcode::Copy | Opcode::LoadReg | Opcode::StoreReg => v = data.arg(0),
            op if op.is_rematerializable() => {
                return Held::Const(op, data.ty, data.aux_int, data.aux.clone())
            }
            _ => return Held::Value(v),
        }
    }
}

fn check_restores(func: &Func, dom_tree: &DomTree) -> Result<(), VerifyError> {
    for &block in &func.layout {
        let values = &func.block(block).values;
        for (i, &v) in values.iter().enumerate() {
            let data = func.value(v);
            if data.op != Opcode::LoadReg {
                continue;
            }
            let spill = data.arg(0);
            if func.op(spill) != Opcode::StoreReg {
                continue;
            }
            let home = func.block_of(spill);
            let dominated = if home == block {
                values[..i].contains(&spill)
            } else {
                dom_tree.dominates(home, block)
            };
            if !dominated {
                return Err(VerifyError::RestoreNotDominated { restore: v, spill });
            }
        }
    }
    Ok(())
}

/// Contents of every location on entry to `block`: the intersection over
/// the predecessors visited so far, with phis taking the location they were
/// assigned.
fn entry_state(
    func: &Func,
    end: &SecondaryMap<BlockId, Option<State>>,
    block: BlockId,
    check: bool,
) -> Result<Option<State>, VerifyError> {
    let data = func.block(block);
    if data.preds().is_empty() {
        return Ok(Some(State::default()));
    }

    let phis: Vec<ValueId> = data
        .values
        .iter()
        .copied()
        .take_while(|&v| func.value(v).is_phi())
        .collect();

    let mut merged: Option<State> = None;
    for (idx, e) in data.preds().iter().enumerate() {
        let Some(pred_end) = &end[e.block] else {
            continue;
        };
        let mut state = pred_end.clone();
        for &phi in &phis {
            let Some(loc) = func.location(phi) else {
                continue;
            };
            let arg = func.value(phi).arg(idx);
            if check {
                let found = pred_end.get(&Storage::of(func, loc)).cloned();
                if found.as_ref() != Some(&held(func, arg)) {
                    return Err(VerifyError::WrongContents {
                        user: phi,
                        arg,
                        loc,
                        found,
                    });
                }
            }
            state.insert(Storage::of(func, loc), Held::Value(phi));
        }

        merged = Some(match merged {
            None => state,
            Some(mut acc) => {
                acc.retain(|loc, h| state.get(loc) == Some(&*h));
                acc
            }
        });
    }
    Ok(merged)
}

fn transfer(
    func: &Func,
    block: BlockId,
    mut state: State,
    check: bool,
) -> Result<State, VerifyError> {
    let caller_saved = func.config.regs.caller_saved;
    let data = func.block(block);
    for &v in &data.values {
        let value = func.value(v);
        if value.is_phi() {
            continue;
        }

        if check {
            for &arg in value.args() {
                if !func.value_ty(arg).needs_reg() {
                    continue;
                }
                let Some(loc) = func.location(arg) else {
                    return Err(VerifyError::NoLocation { user: v, arg });
                };
                let found = state.get(&Storage::of(func, loc));
                if found != Some(&held(func, arg)) {
                    return Err(VerifyError::WrongContents {
                        user: v,
                        arg,
                        loc,
                        found: found.cloned(),
                    });
                }
            }
        }

        if value.op.is_call() {
            state.retain(|s, _| !matches!(s, Storage::Reg(r) if caller_saved.contains(*r)));
        }
        if let Some(loc) = func.location(v) {
            state.insert(Storage::of(func, loc), held(func, v));
        }
    }

    if check {
        for &c in data.controls() {
            if !func.value_ty(c).needs_reg() {
                continue;
            }
            let loc = func.location(c);
            let found = loc.and_then(|loc| state.get(&Storage::of(func, loc)).cloned());
            match loc {
                Some(_) if found.as_ref() == Some(&held(func, c)) => {}
                Some(loc) => {
                    return Err(VerifyError::WrongControl {
                        block,
                        arg: c,
                        loc,
                        found,
                    })
                }
                None => return Err(VerifyError::NoLocation { user: c, arg: c }),
            }
        }
    }
    Ok(state)
}
