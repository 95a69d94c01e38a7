//! Greedy register allocation over the laid-out, scheduled function.
//!
//! Blocks are visited in layout order. Each block starts from the register
//! state of an already allocated predecessor, values get registers as they are
//! defined, and when registers run out the value whose next use is farthest
//! away is evicted. Evicted values are spilled lazily: the first restore
//! creates a detached `StoreReg`, which is placed once every block is
//! allocated, as high in the dominator tree as possible without entering a
//! deeper loop. Finally, moves on merge edges reconcile the end state of every
//! predecessor with the start state of the merge block.
use std::sync::Arc;

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use cantata_ir::{
    Aux, BlockId, Config, Func, LocalSlot, Location, Opcode, Pos, RegMask, RegNum, SlotId,
    SparseTree, Type, ValueId, VarKind,
};

use crate::{deadcode::prune_named_values, loop_analysis::LoopTree};

mod edge;
pub mod live;
pub mod verify;

pub use live::{LiveInfo, Liveness};
pub use verify::{verify, VerifyError};

/// Next-use distance of a value with no further use.
const NO_USE: i32 = i32::MAX;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RegallocStats {
    /// `StoreReg`s created for evicted values.
    pub spills: usize,
    pub restores: usize,
    pub copies: usize,
    pub remats: usize,
    pub stack_phis: usize,
}

/// Allocates registers and stack slots for every value of `func` that needs
/// one.
pub fn regalloc(func: &mut Func) -> RegallocStats {
    if !func.scheduled {
        func.fatal(Pos::default(), "register allocation of an unscheduled function");
    }
    let mut alloc = RegAlloc::new(func);
    alloc.run();
    alloc.stats
}

#[derive(Debug, Clone, Copy, Default)]
struct RegState {
    /// Original value held by the register.
    v: PackedOption<ValueId>,
    /// The copy of `v` that is in the register.
    c: PackedOption<ValueId>,
}

#[derive(Debug, Clone)]
struct ValState {
    regs: RegMask,
    /// Where the value is saved on the stack, created on the first restore.
    spill: PackedOption<ValueId>,
    needs_reg: bool,
    remat: bool,
    /// Sparse tree interval covering every block that restores the value.
    restore_min: u32,
    restore_max: u32,
    /// Use positions in the current block, nearest last.
    uses: SmallVec<[i32; 4]>,
}

impl Default for ValState {
    fn default() -> Self {
        Self {
            regs: RegMask::EMPTY,
            spill: None.into(),
            needs_reg: false,
            remat: false,
            restore_min: u32::MAX,
            restore_max: 0,
            uses: SmallVec::new(),
        }
    }
}

/// A register binding at a block boundary: register `r` holds copy `c` of
/// value `v`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RegBinding {
    pub r: RegNum,
    pub v: ValueId,
    pub c: ValueId,
}

pub(crate) struct RegAlloc<'a> {
    func: &'a mut Func,
    config: Arc<Config>,
    sparse: Arc<SparseTree>,
    loops: LoopTree,
    live: Liveness,

    regs: Vec<RegState>,
    values: SecondaryMap<ValueId, ValState>,
    /// Maps copies, restores and spills back to the value they hold.
    orig: SecondaryMap<ValueId, PackedOption<ValueId>>,
    used: RegMask,
    /// Registers holding arguments of the value being allocated.
    nospill: RegMask,

    cur_block: PackedOption<BlockId>,
    cur_idx: i32,
    cur_pos: Pos,
    /// Rebuilt value list of the current block.
    emitted: Vec<ValueId>,
    /// Values with recorded uses in the current block.
    touched: Vec<ValueId>,

    end_regs: SecondaryMap<BlockId, SmallVec<[RegBinding; 8]>>,
    start_regs: SecondaryMap<BlockId, SmallVec<[RegBinding; 8]>>,
    /// Spills that must hold their value at the end of a block.
    spill_live: SecondaryMap<BlockId, SmallVec<[ValueId; 4]>>,
    processed: SecondaryMap<BlockId, bool>,

    /// Values whose spill waits for placement.
    spilled: Vec<ValueId>,
    /// Rematerializable values, dropped from the value lists.
    remat_origs: Vec<ValueId>,

    log: bool,
    stats: RegallocStats,
}

impl<'a> RegAlloc<'a> {
    fn new(func: &'a mut Func) -> Self {
        let config = func.config.clone();
        let dom_tree = func.dom_tree();
        let sparse = func.sparse_tree();
        let mut loops = LoopTree::new();
        loops.compute(func, &dom_tree);
        let live = Liveness::compute(func);

        let mut values: SecondaryMap<ValueId, ValState> = SecondaryMap::new();
        let mut orig = SecondaryMap::new();
        for v in func.iter_values() {
            let data = func.value(v);
            values[v] = ValState {
                needs_reg: data.ty.needs_reg(),
                remat: data.op.is_rematerializable(),
                ..ValState::default()
            };
            orig[v] = v.into();
        }

        let log = config.options.pass("regalloc").log;
        Self {
            func,
            regs: vec![RegState::default(); config.regs.registers.len()],
            config,
            sparse,
            loops,
            live,
            values,
            orig,
            used: RegMask::EMPTY,
            nospill: RegMask::EMPTY,
            cur_block: None.into(),
            cur_idx: 0,
            cur_pos: Pos::default(),
            emitted: Vec::new(),
            touched: Vec::new(),
            end_regs: SecondaryMap::new(),
            start_regs: SecondaryMap::new(),
            spill_live: SecondaryMap::new(),
            processed: SecondaryMap::new(),
            spilled: Vec::new(),
            remat_origs: Vec::new(),
            log,
            stats: RegallocStats::default(),
        }
    }

    fn run(&mut self) {
        for block in self.func.layout.clone() {
            self.alloc_block(block);
        }
        self.place_spills();
        self.fixup_edges();
        self.cleanup();

        if self.log {
            log::debug!("regalloc {}: {:?}", self.func.name, self.stats);
        }
    }

    fn fatal(&self, msg: impl std::fmt::Display) -> ! {
        self.func.fatal(self.cur_pos, msg)
    }

    fn orig_of(&self, v: ValueId) -> ValueId {
        self.orig[v].expand().unwrap_or(v)
    }

    fn needs_reg(&self, v: ValueId) -> bool {
        self.values[self.orig_of(v)].needs_reg
    }

    fn class_of(&self, v: ValueId) -> RegMask {
        self.config.regs.class_of(self.func.value_ty(v))
    }

    /// The copy held by the occupied register `r`.
    fn copy_in(&self, r: RegNum) -> ValueId {
        match self.regs[r.index()].c.expand() {
            Some(c) => c,
            None => self.fatal(format!("{} is empty", self.config.regs.name(r))),
        }
    }

    /// Bindings of the occupied registers whose value satisfies `keep`.
    fn bindings(&self, keep: impl Fn(ValueId) -> bool) -> SmallVec<[RegBinding; 8]> {
        self.used
            .iter()
            .filter_map(|r| {
                let state = self.regs[r.index()];
                let (v, c) = (state.v.expand()?, state.c.expand()?);
                keep(v).then_some(RegBinding { r, v, c })
            })
            .collect()
    }

    /* Register state */

    fn assign_reg(&mut self, r: RegNum, v: ValueId, c: ValueId) {
        if self.used.contains(r) {
            self.fatal(format!("{} is already in use", self.config.regs.name(r)));
        }
        if self.log {
            log::trace!("assign {v}/{c} to {}", self.config.regs.name(r));
        }
        self.regs[r.index()] = RegState {
            v: v.into(),
            c: c.into(),
        };
        self.values[v].regs.insert(r);
        self.used.insert(r);
        self.func.set_location(c, Location::Reg(r));
    }

    fn free_reg(&mut self, r: RegNum) {
        let Some(v) = self.regs[r.index()].v.expand() else {
            self.fatal(format!("freeing the empty register {}", self.config.regs.name(r)));
        };
        self.values[v].regs.remove(r);
        self.regs[r.index()] = RegState::default();
        self.used.remove(r);
    }

    fn free_regs(&mut self, mask: RegMask) {
        for r in mask.intersect(self.used).iter() {
            self.free_reg(r);
        }
    }

    /// Picks a register in `mask`, evicting the value whose next use is
    /// farthest away if none is free.
    fn alloc_reg(&mut self, mask: RegMask) -> RegNum {
        if let Some(r) = mask.difference(self.used).first() {
            return r;
        }

        let mut best = None;
        let mut best_dist = -1;
        for r in mask.difference(self.nospill).iter() {
            let Some(v) = self.regs[r.index()].v.expand() else {
                continue;
            };
            let dist = self.values[v].uses.last().copied().unwrap_or(NO_USE);
            if dist > best_dist {
                best = Some(r);
                best_dist = dist;
            }
        }
        let Some(r) = best else {
            self.fatal(format!("no register available in {mask:?}"));
        };
        if self.log {
            log::trace!(
                "evict {} from {}",
                self.regs[r.index()].v.expand().map_or(String::new(), |v| v.to_string()),
                self.config.regs.name(r)
            );
        }
        self.free_reg(r);
        r
    }

    /// Returns a copy of `v` that is in a register of `mask`, emitting a
    /// copy, rematerialization or restore into the current block if needed.
    fn alloc_val_to_reg(&mut self, v: ValueId, mask: RegMask, nospill: bool) -> ValueId {
        if let Some(r) = self.values[v].regs.intersect(mask).first() {
            if nospill {
                self.nospill.insert(r);
            }
            return self.copy_in(r);
        }

        let r = self.alloc_reg(mask);
        let ty = self.func.value_ty(v);
        let (held, remat) = (self.values[v].regs.first(), self.values[v].remat);
        let c = if let Some(src) = held {
            let src = self.copy_in(src);
            self.stats.copies += 1;
            self.emit(Opcode::Copy, ty, Aux::None, 0, &[src])
        } else if remat {
            let data = self.func.value(v);
            let (op, aux, aux_int) = (data.op, data.aux.clone(), data.aux_int);
            self.stats.remats += 1;
            self.emit(op, ty, aux, aux_int, &[])
        } else {
            let Some(block) = self.cur_block.expand() else {
                self.fatal("restore outside of a block");
            };
            let spill = self.make_spill(v, block);
            self.stats.restores += 1;
            self.emit(Opcode::LoadReg, ty, Aux::None, 0, &[spill])
        };

        self.orig[c] = v.into();
        self.assign_reg(r, v, c);
        if nospill {
            self.nospill.insert(r);
        }
        c
    }

    fn emit(&mut self, op: Opcode, ty: Type, aux: Aux, aux_int: i64, args: &[ValueId]) -> ValueId {
        let Some(block) = self.cur_block.expand() else {
            self.fatal("emitting outside of a block");
        };
        let c = self
            .func
            .new_value_detached(op, ty, aux, aux_int, args, self.cur_pos);
        self.func.attach_value(c, block);
        self.emitted.push(c);
        c
    }

    /// Returns the spill of `v`, creating it if needed, and records a restore
    /// in `block`.
    fn make_spill(&mut self, v: ValueId, block: BlockId) -> ValueId {
        let (entry, exit) = (self.sparse.entry(block), self.sparse.exit(block));
        let state = &mut self.values[v];
        state.restore_min = state.restore_min.min(entry);
        state.restore_max = state.restore_max.max(exit);
        if let Some(spill) = state.spill.expand() {
            return spill;
        }

        let ty = self.func.value_ty(v);
        let pos = self.func.value(v).pos;
        let slot = self.new_spill_slot(ty);
        let spill = self
            .func
            .new_value_detached(Opcode::StoreReg, ty, Aux::None, 0, &[v], pos);
        self.func.set_location(spill, Location::Stack(slot));
        self.values[v].spill = spill.into();
        self.orig[spill] = v.into();
        self.spilled.push(v);
        self.stats.spills += 1;
        spill
    }

    /// A fresh stack slot; stack allocation later merges slots that don't
    /// interfere.
    fn new_spill_slot(&mut self, ty: Type) -> SlotId {
        let var = self.func.new_var("~spill", ty, VarKind::AutoTmp);
        self.func.local_slot(LocalSlot::new(var, ty, 0))
    }

    fn add_use(&mut self, v: ValueId, pos: i32) {
        let state = &mut self.values[v];
        if state.uses.is_empty() {
            self.touched.push(v);
        }
        state.uses.push(pos);
    }

    /// Drops the nearest use of `v`, freeing its registers if it was the last.
    fn advance_use(&mut self, v: ValueId) {
        let state = &mut self.values[v];
        state.uses.pop();
        if state.uses.is_empty() {
            let regs = state.regs;
            self.free_regs(regs);
        }
    }

    fn live_after_current(&self, v: ValueId) -> bool {
        self.values[v]
            .uses
            .first()
            .is_some_and(|&pos| pos > self.cur_idx)
    }

    /* Blocks */

    fn alloc_block(&mut self, block: BlockId) {
        self.cur_block = block.into();
        self.cur_pos = self.func.block(block).pos;
        let values = std::mem::take(&mut self.func.block_mut(block).values);
        let len = values.len() as i32;

        // Record the uses of every register value, farthest first, and the set
        // of values live after the phis.
        let mut live_set: FxHashSet<ValueId> = FxHashSet::default();
        let live_out: Vec<LiveInfo> = self.live.live_out(block).to_vec();
        for e in &live_out {
            self.add_use(e.value, len + e.dist);
            live_set.insert(e.value);
        }
        for c in self.func.block(block).controls().to_vec() {
            if self.needs_reg(c) {
                self.add_use(c, len);
                live_set.insert(c);
            }
        }
        for (i, &v) in values.iter().enumerate().rev() {
            live_set.remove(&v);
            if self.func.value(v).is_phi() {
                break;
            }
            for a in self.func.value(v).args().to_vec() {
                if self.needs_reg(a) {
                    self.add_use(a, i as i32);
                    live_set.insert(a);
                }
            }
        }

        let num_phis = values
            .iter()
            .take_while(|&&v| self.func.value(v).is_phi())
            .count();
        self.start_block(block, &values[..num_phis], &live_set);

        for (i, &v) in values.iter().enumerate().skip(num_phis) {
            self.cur_idx = i as i32;
            self.cur_pos = self.func.value(v).pos;
            self.alloc_value(v);
            self.nospill = RegMask::EMPTY;
        }

        self.cur_idx = len;
        self.cur_pos = self.func.block(block).pos;
        let controls = self.func.block(block).controls().to_vec();
        for (i, c) in controls.into_iter().enumerate() {
            if !self.needs_reg(c) {
                continue;
            }
            let mask = self.class_of(c);
            let x = self.alloc_val_to_reg(c, mask, false);
            if x != c {
                self.func.set_control_at(block, i, x);
            }
            self.advance_use(c);
        }
        self.nospill = RegMask::EMPTY;

        self.func.block_mut(block).values = std::mem::take(&mut self.emitted);
        self.end_block(block, &live_out);
    }

    /// Sets up the register state at the start of `block` and allocates its
    /// phis, which are the first values of `phis`.
    fn start_block(&mut self, block: BlockId, phis: &[ValueId], live_set: &FxHashSet<ValueId>) {
        self.emitted.extend_from_slice(phis);
        let preds: SmallVec<[BlockId; 4]> =
            self.func.block(block).preds().iter().map(|e| e.block).collect();

        if preds.is_empty() {
            // Entry block: every register is free.
        } else if preds.len() == 1 && phis.is_empty() {
            let p = preds[0];
            if !self.processed[p] {
                self.fatal(format!("{block} is allocated before its predecessor {p}"));
            }
            for b in self.end_regs[p].clone() {
                if live_set.contains(&b.v) {
                    self.assign_reg(b.r, b.v, b.c);
                }
            }
        } else {
            self.start_merge(block, &preds, phis, live_set);
        }

        let start = self.bindings(|v| !phis.contains(&v));
        self.start_regs[block] = start;
    }

    fn start_merge(
        &mut self,
        block: BlockId,
        preds: &[BlockId],
        phis: &[ValueId],
        live_set: &FxHashSet<ValueId>,
    ) {
        // Start from the allocated predecessor with the most useful values in
        // registers.
        let mut primary = None;
        let mut best = 0;
        for (idx, &p) in preds.iter().enumerate() {
            if !self.processed[p] {
                continue;
            }
            let n = self.end_regs[p]
                .iter()
                .filter(|b| {
                    live_set.contains(&b.v)
                        || phis.iter().any(|&phi| self.func.value(phi).arg(idx) == b.v)
                })
                .count();
            if primary.is_none() || n > best {
                primary = Some(idx);
                best = n;
            }
        }
        let Some(idx) = primary else {
            self.fatal(format!("no predecessor of {block} is allocated"));
        };
        let p = preds[idx];
        if self.func.block(p).succ_num() != 1 {
            self.fatal(format!("critical edge {p} -> {block}"));
        }
        if self.log {
            log::trace!("{block} starts from {p}");
        }
        for b in self.end_regs[p].clone() {
            self.assign_reg(b.r, b.v, b.c);
        }

        // Phis take the register of their primary input when possible.
        let mut phi_regs: SmallVec<[Option<RegNum>; 4]> = SmallVec::new();
        let mut phi_used = RegMask::EMPTY;
        for &phi in phis {
            let mut reg = None;
            if self.needs_reg(phi) {
                let a = self.func.value(phi).arg(idx);
                let m = self.values[a]
                    .regs
                    .difference(phi_used)
                    .intersect(self.class_of(phi));
                if let Some(r) = m.first() {
                    phi_used.insert(r);
                    reg = Some(r);
                }
            }
            phi_regs.push(reg);
        }

        // Inputs that stay live past the phi move to a free register first.
        for (i, &phi) in phis.iter().enumerate() {
            let Some(r) = phi_regs[i] else {
                continue;
            };
            let a = self.func.value(phi).arg(idx);
            if live_set.contains(&a) {
                let m = self
                    .class_of(a)
                    .difference(self.used)
                    .difference(phi_used);
                let state = &self.values[a];
                if let (Some(r2), false, 1) = (m.first(), state.remat, state.regs.len()) {
                    let src = self.copy_in(r);
                    let ty = self.func.value_ty(a);
                    let c = self.func.new_value(p, Opcode::Copy, ty, Aux::None, 0, &[src]);
                    self.orig[c] = a.into();
                    self.stats.copies += 1;
                    self.free_reg(r);
                    self.assign_reg(r2, a, c);
                    self.end_regs[p].push(RegBinding { r: r2, v: a, c });
                    continue;
                }
            }
            self.free_reg(r);
        }

        // Phis whose input wasn't in a register of the primary predecessor.
        for (i, &phi) in phis.iter().enumerate() {
            if !self.needs_reg(phi) || phi_regs[i].is_some() {
                continue;
            }
            let mut m = self
                .class_of(phi)
                .difference(phi_used)
                .difference(self.used);
            for (j, &pj) in preds.iter().enumerate() {
                if j == idx {
                    continue;
                }
                let arg = self.orig_of(self.func.value(phi).arg(j));
                let held = self.end_regs[pj].iter().find(|b| b.v == arg).map(|b| b.r);
                if let Some(r) = held.filter(|&r| m.contains(r)) {
                    m = r.mask();
                    break;
                }
            }
            if let Some(r) = m.first() {
                phi_regs[i] = Some(r);
                phi_used.insert(r);
            }
        }

        for (i, &phi) in phis.iter().enumerate() {
            if !self.needs_reg(phi) {
                continue;
            }
            match phi_regs[i] {
                Some(r) => self.assign_reg(r, phi, phi),
                None => {
                    let slot = self.new_spill_slot(self.func.value_ty(phi));
                    self.func.set_location(phi, Location::Stack(slot));
                    self.values[phi].spill = phi.into();
                    self.stats.stack_phis += 1;
                    if self.log {
                        log::trace!("{phi} lives on the stack");
                    }
                }
            }
        }

        // Drop values the primary predecessor kept for its other successors.
        for r in self.used.iter().collect::<SmallVec<[RegNum; 16]>>() {
            let Some(v) = self.regs[r.index()].v.expand() else {
                continue;
            };
            if !live_set.contains(&v) && !phis.contains(&v) {
                self.free_reg(r);
            }
        }
    }

    fn alloc_value(&mut self, v: ValueId) {
        let data = self.func.value(v);
        let (op, ty) = (data.op, data.ty);
        let (remat, needs_reg) = (self.values[v].remat, self.values[v].needs_reg);

        if op == Opcode::Arg {
            self.alloc_arg(v);
            return;
        }
        if remat && needs_reg {
            // Materialized at each use instead.
            self.func.detach_value(v);
            self.remat_origs.push(v);
            return;
        }
        if op == Opcode::CallResult {
            self.check_call_result(v);
        }

        let args: SmallVec<[ValueId; 4]> = self.func.value(v).args().into();
        match op {
            Opcode::Call => {
                let Some(desc) = self.func.value(v).aux.call().cloned() else {
                    self.fatal(format!("{v} has no call descriptor"));
                };
                let reg_args = &args[..args.len().saturating_sub(1)];
                if reg_args.len() != desc.arg_regs.len() {
                    self.fatal(format!("{v} passes {} register arguments", reg_args.len()));
                }
                for (i, &a) in reg_args.iter().enumerate() {
                    let c = self.alloc_val_to_reg(a, desc.arg_regs[i].mask(), true);
                    self.func.set_arg(v, i, c);
                }
            }
            Opcode::MakeResult => {
                let result_regs: SmallVec<[RegNum; 2]> = self
                    .func
                    .abi
                    .results
                    .iter()
                    .filter_map(|r| r.loc.reg())
                    .collect();
                let mut k = 0;
                for (i, &a) in args.iter().enumerate() {
                    if !self.needs_reg(a) {
                        continue;
                    }
                    let Some(&r) = result_regs.get(k) else {
                        self.fatal(format!("{v} returns more values than the ABI has registers"));
                    };
                    k += 1;
                    let c = self.alloc_val_to_reg(a, r.mask(), true);
                    self.func.set_arg(v, i, c);
                }
            }
            _ => {
                for (i, &a) in args.iter().enumerate() {
                    if !self.needs_reg(a) {
                        continue;
                    }
                    let mask = self.class_of(a);
                    let c = self.alloc_val_to_reg(a, mask, true);
                    self.func.set_arg(v, i, c);
                }
            }
        }

        // The output overwrites the first argument; preserve it if it is
        // still needed.
        if op.result_in_arg0() && self.needs_reg(args[0]) && self.live_after_current(args[0]) {
            let swap = op.is_commutative()
                && args.len() > 1
                && self.needs_reg(args[1])
                && !self.live_after_current(args[1]);
            if swap {
                let (a0, a1) = (self.func.value(v).arg(0), self.func.value(v).arg(1));
                self.func.set_arg(v, 0, a1);
                self.func.set_arg(v, 1, a0);
            } else {
                let m = self.class_of(args[0]).difference(self.values[args[0]].regs);
                let c = self.alloc_val_to_reg(args[0], m, true);
                self.func.set_arg(v, 0, c);
            }
        }

        for &a in &args {
            if self.needs_reg(a) {
                self.advance_use(a);
            }
        }

        if op.is_call() {
            let clobbered = self.config.regs.caller_saved;
            self.free_regs(clobbered);
        }
        self.nospill = RegMask::EMPTY;

        if needs_reg {
            let mask = if op.result_in_arg0() {
                let arg0 = self.func.value(v).arg(0);
                match self.func.location(arg0).and_then(Location::reg) {
                    Some(r) => r.mask(),
                    None => self.fatal(format!("first argument of {v} is not in a register")),
                }
            } else if op == Opcode::CallResult {
                self.call_result_reg(v).mask()
            } else {
                self.config.regs.class_of(ty)
            };
            let r = self.alloc_reg(mask);
            self.assign_reg(r, v, v);
            if self.values[v].uses.is_empty() {
                self.free_reg(r);
            }
        }
        self.emitted.push(v);
    }

    fn alloc_arg(&mut self, v: ValueId) {
        let idx = self.func.value(v).aux_int as usize;
        let Some(param) = self.func.abi.params.get(idx) else {
            self.fatal(format!("{v} refers to the missing parameter {idx}"));
        };
        match param.loc.reg() {
            Some(r) => {
                self.assign_reg(r, v, v);
                if self.values[v].uses.is_empty() {
                    self.free_reg(r);
                }
            }
            None => {
                let slot = self.func.param_slot(idx);
                self.func.set_location(v, Location::Stack(slot));
                self.values[v].spill = v.into();
            }
        }
        self.emitted.push(v);
    }

    /// Call results are read right after the call, before anything else can
    /// reuse the result registers.
    fn check_call_result(&self, v: ValueId) {
        let call = self.func.value(v).arg(0);
        let adjacent = self.emitted.iter().rev().find(|&&x| {
            let op = self.func.op(x);
            op != Opcode::CallResult
        });
        if adjacent != Some(&call) {
            self.fatal(format!("{v} is not scheduled right after {call}"));
        }
    }

    fn call_result_reg(&self, v: ValueId) -> RegNum {
        let data = self.func.value(v);
        let call = self.func.value(data.arg(0));
        match call
            .aux
            .call()
            .and_then(|desc| desc.results.get(data.aux_int as usize))
        {
            Some(&(r, _)) => r,
            None => self.fatal(format!("{v} has no result register")),
        }
    }

    fn end_block(&mut self, block: BlockId, live_out: &[LiveInfo]) {
        let end = self.bindings(|v| !self.values[v].uses.is_empty());
        self.end_regs[block] = end;

        // Live-out values that lost their register must be on the stack.
        let mut spills: SmallVec<[ValueId; 4]> = SmallVec::new();
        for e in live_out {
            let state = &self.values[e.value];
            if state.needs_reg && state.regs.is_empty() && !state.remat {
                spills.push(self.make_spill(e.value, block));
            }
        }
        self.spill_live[block] = spills;

        let used = self.used;
        self.free_regs(used);
        for v in self.touched.drain(..) {
            self.values[v].uses.clear();
        }
        self.processed[block] = true;
    }

    /* Spill placement */

    fn place_spills(&mut self) {
        for v in std::mem::take(&mut self.spilled) {
            let Some(spill) = self.values[v].spill.expand() else {
                continue;
            };
            let (block, arg, after) = self.spill_position(v);
            self.func.set_arg(spill, 0, arg);
            self.func.attach_value(spill, block);

            let values = &mut self.func.block_mut(block).values;
            let at = after.map_or(0, |x| {
                values.iter().position(|&y| y == x).map_or(values.len(), |i| i + 1)
            });
            values.insert(at, spill);
            if self.log {
                log::trace!("spill {v} in {block}");
            }
        }
    }

    /// Returns the block holding the spill of `v`, the copy of `v` it stores
    /// and the value it follows (`None` for the block start).
    fn spill_position(&self, v: ValueId) -> (BlockId, ValueId, Option<ValueId>) {
        let def = self.func.block_of(v);
        let state = &self.values[v];
        let (min, max) = (state.restore_min, state.restore_max);

        // The deepest block dominating every restore.
        let mut best = def;
        'down: loop {
            for c in self.sparse.children(best) {
                if self.sparse.entry(c) <= min && max <= self.sparse.exit(c) {
                    best = c;
                    continue 'down;
                }
            }
            break;
        }

        let depth = self.loops.depth(def);
        loop {
            if best == def {
                let values = &self.func.block(def).values;
                let after = if self.func.value(v).is_phi() {
                    values
                        .iter()
                        .take_while(|&&x| self.func.value(x).is_phi())
                        .last()
                        .copied()
                } else {
                    Some(v)
                };
                return (def, v, after);
            }
            if self.loops.depth(best) <= depth {
                if let Some(b) = self.start_regs[best].iter().find(|b| b.v == v) {
                    let after = self
                        .func
                        .block(best)
                        .values
                        .iter()
                        .take_while(|&&x| self.func.value(x).is_phi())
                        .last()
                        .copied();
                    return (best, b.c, after);
                }
            }
            let Some(parent) = self.sparse.parent(best) else {
                self.fatal(format!("{def} doesn't dominate the restores of {v}"));
            };
            best = parent;
        }
    }

    /* Cleanup */

    fn cleanup(&mut self) {
        for v in std::mem::take(&mut self.remat_origs) {
            if self.func.value(v).uses() != 0 {
                self.fatal(format!("{v} is still used after rematerialization"));
            }
            self.func.free_value(v);
        }
        prune_named_values(self.func, |func, v| {
            func.value(v).block().is_some() && func.location(v).is_some()
        });
        self.func.reg_allocated = true;
    }
}

#[cfg(test)]
mod tests {
    use cantata_ir::{builder::test_util::*, check_func, Type};

    use super::*;
    use crate::{
        critical_edge::CriticalEdgeSplitter, deadcode::deadcode, layout::layout,
        schedule::Scheduler,
    };

    fn allocate(func: &mut Func) -> RegallocStats {
        deadcode(func);
        CriticalEdgeSplitter::new().run(func);
        layout(func);
        Scheduler::new().run(func);
        let stats = regalloc(func);
        assert_eq!(verify(func), Ok(()));
        assert_eq!(check_func(func), Ok(()));
        stats
    }

    fn stores(func: &Func) -> Vec<ValueId> {
        func.layout
            .iter()
            .flat_map(|&b| func.block(b).values.iter().copied())
            .filter(|&v| func.op(v) == Opcode::StoreReg)
            .collect()
    }

    #[test]
    fn spill_farthest_use() {
        let config = small_config(3);
        let abi = config.abi(&[("x", Type::I64), ("y", Type::I64), ("z", Type::I64)], &[Type::I64]);
        let mut f = fun_with(
            config,
            abi,
            "pressure",
            &[bloc(
                "entry",
                [
                    valu("mem", Opcode::InitMem, Type::Mem, &[]),
                    valu_i("x", Opcode::Arg, Type::I64, 0, &[]),
                    valu_i("y", Opcode::Arg, Type::I64, 1, &[]),
                    valu_i("z", Opcode::Arg, Type::I64, 2, &[]),
                    valu("a", Opcode::Add, Type::I64, &["x", "y"]),
                    valu("b", Opcode::Add, Type::I64, &["a", "z"]),
                    valu("c", Opcode::Mul, Type::I64, &["b", "x"]),
                    valu("d", Opcode::Sub, Type::I64, &["c", "y"]),
                    valu("r", Opcode::MakeResult, Type::Void, &["d", "mem"]),
                ],
                ret("r"),
            )],
        );
        let [y, z] = [f.value("y"), f.value("z")];
        let stats = allocate(&mut f.func);

        // `y` is needed last, so it is the one evicted when `z` is loaded.
        let stores = stores(&f.func);
        assert_eq!(stores.len(), 1);
        assert_eq!(f.func.value(stores[0]).arg(0), y);
        assert_eq!(stats.spills, 1);
        assert_eq!(
            f.func.location(z),
            Some(Location::Stack(f.func.param_slot(2)))
        );

        // The result ends up in the first integer result register.
        let r = f.func.block(f.block("entry")).control().unwrap();
        let d = f.func.value(r).arg(0);
        assert_eq!(f.func.location(d), Some(Location::Reg(RegNum(0))));
    }

    #[test]
    fn merge_moves_phi_inputs() {
        let config = small_config(4);
        let abi = config.abi(&[("x", Type::I64), ("y", Type::I64)], &[Type::I64]);
        let mut f = fun_with(
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
                        valu("f", Opcode::Cmp, Type::Flags, &["x", "y"]),
                        valu("c", Opcode::SetCond, Type::I1, &["f"]),
                    ],
                    br_if("c", "then", "else"),
                ),
                bloc(
                    "then",
                    [valu("t", Opcode::Mul, Type::I64, &["y", "y"])],
                    goto("join"),
                ),
                bloc(
                    "else",
                    [valu_i("e", Opcode::AddConst, Type::I64, 7, &["x"])],
                    goto("join"),
                ),
                bloc(
                    "join",
                    [
                        valu("p", Opcode::Phi, Type::I64, &["t", "e"]),
                        valu("s", Opcode::Add, Type::I64, &["p", "x"]),
                        valu("r", Opcode::MakeResult, Type::Void, &["s", "mem"]),
                    ],
                    ret("r"),
                ),
            ],
        );
        let stats = allocate(&mut f.func);
        assert_eq!(stats.spills, 0);
        assert_eq!(stats.stack_phis, 0);

        // Both inputs of the phi sit in its register at the end of their block.
        let p = f.value("p");
        let loc = f.func.location(p);
        for &arg in f.func.value(p).args() {
            assert_eq!(f.func.location(arg), loc);
        }
    }
}
