//! Location lists for unoptimized code, where every variable lives in its
//! stack home.
use cranelift_entity::SecondaryMap;
use indexmap::IndexMap;

use cantata_ir::{AbiLoc, Func, RegMask};

use super::{DebugInfo, VarLoc, VarLocEntry};

/// Program point 0 is the prologue, which spills the register parameters to
/// their homes; values follow from point 1.
const PROLOGUE_END: u32 = 1;

pub fn build_noopt(func: &Func) -> DebugInfo {
    let mut points = SecondaryMap::new();
    let mut n = PROLOGUE_END;
    for &block in &func.layout {
        for &v in &func.block(block).values {
            points[v] = n;
            n += 1;
        }
    }
    let end = n.max(PROLOGUE_END + 1);

    let mut lists: IndexMap<_, Vec<VarLocEntry>> = IndexMap::new();
    for (idx, param) in func.abi.params.iter().enumerate() {
        let slot = func.param_slot(idx);
        let home = func.slot_offset(slot);
        let mut list = Vec::with_capacity(2);
        if let AbiLoc::Reg(r) = param.loc {
            list.push(VarLocEntry {
                start: 0,
                end: PROLOGUE_END,
                loc: VarLoc {
                    regs: r.mask(),
                    stack: None,
                },
            });
        }
        if home.is_some() {
            list.push(VarLocEntry {
                start: if param.loc.reg().is_some() { PROLOGUE_END } else { 0 },
                end,
                loc: VarLoc {
                    regs: RegMask::EMPTY,
                    stack: home,
                },
            });
        }
        lists.insert(slot, list);
    }

    for &slot in func.named_values.keys() {
        if lists.contains_key(&slot) {
            continue;
        }
        let list = func
            .slot_offset(slot)
            .map(|off| VarLocEntry {
                start: PROLOGUE_END,
                end,
                loc: VarLoc {
                    regs: RegMask::EMPTY,
                    stack: Some(off),
                },
            })
            .into_iter()
            .collect();
        lists.insert(slot, list);
    }

    DebugInfo { lists, points }
}
