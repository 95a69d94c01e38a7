//! Pointer maps at safe points.
//!
//! After register and stack allocation, every location holding a live
//! [`Type::Ptr`] value is tracked backwards through the function. At each
//! safe point the set live after it, minus what the safe point itself
//! defines, is recorded for the garbage collector.
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;

use cantata_ir::{BlockId, Func, Location, RegMask, SlotId, SlotKey, Type, ValueId};

use crate::bitset::BitSet;

/// Dense number of a stack slot that may hold a pointer.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct StackMapSlot(u32);
entity_impl!(StackMapSlot, "ptr");

/// Locations holding live pointers.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LiveLocs {
    pub slots: BitSet<StackMapSlot>,
    pub regs: RegMask,
}

impl LiveLocs {
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty() && self.regs.is_empty()
    }

    fn union_with(&mut self, other: &Self) {
        self.slots.union_with(&other.slots);
        self.regs = self.regs.union(other.regs);
    }
}

#[derive(Debug, Default)]
pub struct StackMaps {
    slots: PrimaryMap<StackMapSlot, SlotId>,
    slot_index: FxHashMap<SlotKey, StackMapSlot>,
    /// Keyed by safe point, in layout order.
    maps: IndexMap<ValueId, LiveLocs>,
    live_in: SecondaryMap<BlockId, LiveLocs>,
    live_out: SecondaryMap<BlockId, LiveLocs>,
}

impl StackMaps {
    pub fn compute(func: &mut Func) -> Self {
        let mut maps = Self::default();
        for &block in &func.layout {
            for &v in &func.block(block).values {
                if func.value_ty(v) != Type::Ptr {
                    continue;
                }
                if let Some(Location::Stack(slot)) = func.location(v) {
                    let key = func.slot_key(slot);
                    if !maps.slot_index.contains_key(&key) {
                        let n = maps.slots.push(slot);
                        maps.slot_index.insert(key, n);
                    }
                }
            }
        }
        maps.recompute(func);

        if func.config.options.pass("stackmap").log {
            for (sp, live) in &maps.maps {
                log::debug!("{}: {sp} {}", func.name, maps.describe(func, live));
            }
        }
        maps
    }

    /// Runs the backward liveness to a fixpoint and rebuilds the map of
    /// every safe point. Returns `true` if any block's live sets changed.
    pub fn recompute(&mut self, func: &mut Func) -> bool {
        let po = func.postorder();
        let before = (self.live_in.clone(), self.live_out.clone());
        self.live_in.clear();
        self.live_out.clear();

        let mut changed = true;
        while changed {
            changed = false;
            for &block in po.iter() {
                let out = self.block_out(func, block);
                let mut live = out.clone();
                self.transfer(func, block, &mut live, |_, _| {});
                if self.live_out[block] != out || self.live_in[block] != live {
                    self.live_out[block] = out;
                    self.live_in[block] = live;
                    changed = true;
                }
            }
        }

        let mut found: Vec<(ValueId, LiveLocs)> = Vec::new();
        for &block in &func.layout {
            let mut live = self.live_out[block].clone();
            self.transfer(func, block, &mut live, |sp, live| found.push((sp, live.clone())));
        }
        // Safe points were visited backwards within each block.
        let mut maps = IndexMap::new();
        for &block in &func.layout {
            for &v in &func.block(block).values {
                if let Some(i) = found.iter().position(|(sp, _)| *sp == v) {
                    maps.insert(v, found.swap_remove(i).1);
                }
            }
        }
        self.maps = maps;

        !(compare(&before.0, &self.live_in, func) && compare(&before.1, &self.live_out, func))
    }

    /// Pointer locations live at the end of `block`: the union over the
    /// successors, plus the phi arguments flowing along each edge.
    fn block_out(&self, func: &Func, block: BlockId) -> LiveLocs {
        let mut out = LiveLocs::default();
        for succ in func.block(block).succs() {
            out.union_with(&self.live_in[succ.block]);
            for &v in &func.block(succ.block).values {
                let phi = func.value(v);
                if !phi.is_phi() {
                    break;
                }
                self.gen(func, phi.arg(succ.index()), &mut out);
            }
        }
        out
    }

    fn transfer(
        &self,
        func: &Func,
        block: BlockId,
        live: &mut LiveLocs,
        mut at_safe_point: impl FnMut(ValueId, &LiveLocs),
    ) {
        let values = &func.block(block).values;
        for &c in func.block(block).controls() {
            self.gen(func, c, live);
        }
        for &v in values.iter().rev() {
            let value = func.value(v);
            if value.is_phi() {
                continue;
            }
            self.kill(func, v, live);
            if value.op.is_call() || value.op.is_safe_point() {
                at_safe_point(v, live);
            }
            for &arg in value.args() {
                self.gen(func, arg, live);
            }
        }
        for &v in values.iter().take_while(|&&v| func.value(v).is_phi()) {
            self.kill(func, v, live);
        }
    }

    fn gen(&self, func: &Func, v: ValueId, live: &mut LiveLocs) {
        if func.value_ty(v) != Type::Ptr {
            return;
        }
        match func.location(v) {
            Some(Location::Reg(r)) => live.regs.insert(r),
            Some(Location::Stack(slot)) => {
                if let Some(&n) = self.slot_index.get(&func.slot_key(slot)) {
                    live.slots.insert(n);
                }
            }
            None => {}
        }
    }

    /// A definition overwrites its location, whatever its type.
    fn kill(&self, func: &Func, v: ValueId, live: &mut LiveLocs) {
        match func.location(v) {
            Some(Location::Reg(r)) => live.regs.remove(r),
            Some(Location::Stack(slot)) => {
                if let Some(&n) = self.slot_index.get(&func.slot_key(slot)) {
                    live.slots.remove(n);
                }
            }
            None => {}
        }
    }

    /// The map recorded at safe point `v`.
    pub fn get(&self, v: ValueId) -> Option<&LiveLocs> {
        self.maps.get(&v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (ValueId, &LiveLocs)> {
        self.maps.iter().map(|(&v, live)| (v, live))
    }

    pub fn len(&self) -> usize {
        self.maps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.maps.is_empty()
    }

    pub fn live_in(&self, block: BlockId) -> &LiveLocs {
        &self.live_in[block]
    }

    pub fn live_out(&self, block: BlockId) -> &LiveLocs {
        &self.live_out[block]
    }

    pub fn slot(&self, n: StackMapSlot) -> SlotId {
        self.slots[n]
    }

    pub fn num_slots(&self) -> usize {
        self.slots.len()
    }

    /// Frame offsets of the stack slots in `live`, ascending.
    pub fn frame_offsets(&self, func: &Func, live: &LiveLocs) -> Vec<i64> {
        let mut offsets: Vec<i64> = live
            .slots
            .iter()
            .filter_map(|n| func.slot_offset(self.slots[n]))
            .collect();
        offsets.sort_unstable();
        offsets
    }

    pub fn describe(&self, func: &Func, live: &LiveLocs) -> String {
        let mut parts: Vec<String> = live
            .slots
            .iter()
            .map(|n| func.slot_name(self.slots[n]))
            .collect();
        parts.extend(live.regs.iter().map(|r| func.config.regs.name(r).to_string()));
        format!("[{}]", parts.join(" "))
    }
}

fn compare(
    a: &SecondaryMap<BlockId, LiveLocs>,
    b: &SecondaryMap<BlockId, LiveLocs>,
    func: &Func,
) -> bool {
    func.layout.iter().all(|&block| a[block] == b[block])
}

#[cfg(test)]
mod tests {
    use cantata_ir::{builder::test_util::*, Opcode, RegNum};

    use super::*;

    #[test]
    fn pointer_live_across_preempt() {
        let mut f = fun(
            "gc",
            &[
                bloc(
                    "entry",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu_i("p", Opcode::NewObject, Type::Ptr, 8, &["mem"]),
                        valu("m1", Opcode::Preempt, Type::Mem, &["mem"]),
                        valu("x", Opcode::Load, Type::I64, &["p", "m1"]),
                    ],
                    goto("exit"),
                ),
                bloc(
                    "exit",
                    [valu("r", Opcode::MakeResult, Type::Mem, &["m1"])],
                    ret("r"),
                ),
            ],
        );
        let [p, m1, x] = [f.value("p"), f.value("m1"), f.value("x")];
        let func = &mut f.func;
        func.set_location(p, Location::Reg(RegNum(3)));
        func.set_location(x, Location::Reg(RegNum(0)));

        let mut maps = StackMaps::compute(func);
        let at_preempt = maps.get(m1).unwrap();
        assert_eq!(at_preempt.regs, RegNum(3).mask());
        assert!(at_preempt.slots.is_empty());
        // The allocation does not see its own result.
        assert!(maps.get(p).unwrap().is_empty());
        assert_eq!(maps.len(), 2);
        assert!(!maps.recompute(func));
        assert_eq!(format!("{:?}", StackMapSlot(1)), "ptr1");
    }
}
