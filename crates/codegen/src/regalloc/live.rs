//! Live-out sets annotated with the distance to the next use.
use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;

use cantata_ir::{Block, BlockId, BranchPrediction, Func, ValueId};

/// Distance added when crossing an edge, by branch likelihood.
pub const LIKELY_DISTANCE: i32 = 1;
pub const NORMAL_DISTANCE: i32 = 10;
pub const UNLIKELY_DISTANCE: i32 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveInfo {
    pub value: ValueId,
    /// Number of values between the end of the block and the next use.
    pub dist: i32,
}

#[derive(Debug, Default)]
pub struct Liveness {
    live_out: SecondaryMap<BlockId, Vec<LiveInfo>>,
}

impl Liveness {
    /// Backward fixpoint over the register values of `func`.
    ///
    /// A phi argument is live out of the matching predecessor at the edge
    /// distance, the phi itself is not live into its block.
    pub fn compute(func: &mut Func) -> Self {
        let po = func.postorder();
        let mut live_out: SecondaryMap<BlockId, Vec<LiveInfo>> = SecondaryMap::new();
        let needs_reg = |func: &Func, v: ValueId| func.value_ty(v).needs_reg();

        let mut live: FxHashMap<ValueId, i32> = FxHashMap::default();
        let mut t: FxHashMap<ValueId, i32> = FxHashMap::default();
        let mut phis = Vec::new();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in po.iter() {
                let data = func.block(block);
                let len = data.values.len() as i32;

                live.clear();
                for e in &live_out[block] {
                    live.insert(e.value, e.dist + len);
                }
                for &c in data.controls() {
                    if needs_reg(func, c) {
                        live.insert(c, len);
                    }
                }

                phis.clear();
                for (i, &v) in data.values.iter().enumerate().rev() {
                    live.remove(&v);
                    let value = func.value(v);
                    if value.is_phi() {
                        phis.push(v);
                        continue;
                    }
                    for &a in value.args() {
                        if needs_reg(func, a) {
                            live.insert(a, i as i32);
                        }
                    }
                }

                for (i, e) in data.preds().iter().enumerate() {
                    let p = e.block;
                    let delta = edge_distance(func.block(p), block);

                    t.clear();
                    t.extend(live_out[p].iter().map(|x| (x.value, x.dist)));
                    let mut update = false;

                    for (&v, &d) in &live {
                        let d = d + delta;
                        if t.get(&v).map_or(true, |&old| d < old) {
                            update = true;
                            t.insert(v, d);
                        }
                    }
                    for &phi in &phis {
                        let a = func.value(phi).arg(i);
                        if needs_reg(func, a) && t.get(&a).map_or(true, |&old| delta < old) {
                            update = true;
                            t.insert(a, delta);
                        }
                    }

                    if !update {
                        continue;
                    }
                    let mut out: Vec<_> = t
                        .iter()
                        .map(|(&value, &dist)| LiveInfo { value, dist })
                        .collect();
                    out.sort_unstable_by_key(|x| x.value);
                    live_out[p] = out;
                    changed = true;
                }
            }
        }

        Self { live_out }
    }

    /// Values live at the end of `block`, ordered by id.
    pub fn live_out(&self, block: BlockId) -> &[LiveInfo] {
        &self.live_out[block]
    }

    pub fn is_live_out(&self, block: BlockId, value: ValueId) -> bool {
        self.live_out[block]
            .binary_search_by_key(&value, |x| x.value)
            .is_ok()
    }
}

fn edge_distance(pred: &Block, succ: BlockId) -> i32 {
    if pred.succ_num() != 2 {
        return NORMAL_DISTANCE;
    }
    let taken = pred.succ(0) == succ;
    match (pred.likely, taken) {
        (BranchPrediction::Likely, true) | (BranchPrediction::Unlikely, false) => LIKELY_DISTANCE,
        (BranchPrediction::Likely, false) | (BranchPrediction::Unlikely, true) => {
            UNLIKELY_DISTANCE
        }
        (BranchPrediction::Unknown, _) => NORMAL_DISTANCE,
    }
}
