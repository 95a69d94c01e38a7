//! Moves on merge edges.
//!
//! At the end of each predecessor of a merge block, values are shuffled from
//! where the predecessor left them to where the merge block expects them:
//! the registers it starts with and the locations of its phis. Moves whose
//! destination still holds the only copy of a pending value wait; when every
//! remaining move waits, the blocking value is copied aside to break the
//! cycle.
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use cantata_ir::{Aux, BlockId, Location, Opcode, RegMask, RegNum, Type, ValueId};

use super::RegAlloc;

#[derive(Debug, Clone, Copy)]
struct Content {
    /// Original value in the location.
    vid: ValueId,
    /// The copy of `vid` that is there.
    c: ValueId,
    /// Whether the location already holds what the merge block expects.
    fin: bool,
}

#[derive(Debug, Clone, Copy)]
struct Dest {
    loc: Location,
    vid: ValueId,
    /// Phi argument to point at the value placed in `loc`.
    splice: Option<(ValueId, usize)>,
}

impl RegAlloc<'_> {
    pub(super) fn fixup_edges(&mut self) {
        for block in self.func.layout.clone() {
            let preds: SmallVec<[BlockId; 4]> =
                self.func.block(block).preds().iter().map(|e| e.block).collect();
            if preds.len() < 2 {
                continue;
            }
            for (idx, p) in preds.into_iter().enumerate() {
                let mut edge = EdgeState::new(self, p, block, idx);
                edge.process();
            }
        }
    }
}

struct EdgeState<'s, 'f> {
    s: &'s mut RegAlloc<'f>,
    p: BlockId,
    b: BlockId,

    /// Locations holding each value at the current point of the shuffle.
    cache: FxHashMap<ValueId, SmallVec<[(ValueId, Location); 2]>>,
    cached_vals: Vec<ValueId>,
    contents: FxHashMap<Location, Content>,

    dests: Vec<Dest>,
    /// Final destinations overwritten to break a cycle.
    extra: Vec<Dest>,
    pending: FxHashMap<ValueId, u32>,

    used_regs: RegMask,
    /// Registers holding the only copy of a value.
    unique_regs: RegMask,
    final_regs: RegMask,
}

impl<'s, 'f> EdgeState<'s, 'f> {
    fn new(s: &'s mut RegAlloc<'f>, p: BlockId, b: BlockId, idx: usize) -> Self {
        if s.func.block(p).succ_num() != 1 {
            s.fatal(format!("critical edge {p} -> {b}"));
        }
        let mut e = Self {
            s,
            p,
            b,
            cache: FxHashMap::default(),
            cached_vals: Vec::new(),
            contents: FxHashMap::default(),
            dests: Vec::new(),
            extra: Vec::new(),
            pending: FxHashMap::default(),
            used_regs: RegMask::EMPTY,
            unique_regs: RegMask::EMPTY,
            final_regs: RegMask::EMPTY,
        };

        for binding in e.s.end_regs[p].clone() {
            e.set(Location::Reg(binding.r), binding.v, binding.c, false);
        }
        for spill in e.s.spill_live[p].clone() {
            let v = e.s.orig_of(spill);
            let Some(loc) = e.s.func.location(spill) else {
                e.s.fatal(format!("{spill} has no stack slot"));
            };
            let home = e.s.func.block_of(spill);
            if !e.s.sparse.is_ancestor_eq(home, p) {
                e.s.fatal(format!("spill {spill} of {v} doesn't dominate {p}"));
            }
            e.set(loc, v, spill, false);
        }

        for binding in e.s.start_regs[b].clone() {
            e.dests.push(Dest {
                loc: Location::Reg(binding.r),
                vid: binding.v,
                splice: None,
            });
        }
        let phis: SmallVec<[ValueId; 4]> = e
            .s
            .func
            .block(b)
            .values
            .iter()
            .copied()
            .take_while(|&v| e.s.func.value(v).is_phi())
            .collect();
        for phi in phis {
            if !e.s.needs_reg(phi) {
                continue;
            }
            let Some(loc) = e.s.func.location(phi) else {
                e.s.fatal(format!("{phi} has no location"));
            };
            let arg = e.s.func.value(phi).arg(idx);
            e.dests.push(Dest {
                loc,
                vid: e.s.orig_of(arg),
                splice: Some((phi, idx)),
            });
        }
        for d in &e.dests {
            *e.pending.entry(d.vid).or_default() += 1;
        }
        e
    }

    fn process(&mut self) {
        let mut dests = std::mem::take(&mut self.dests);
        while !dests.is_empty() {
            let mut progress = false;
            let mut blocked = Vec::new();
            for d in dests {
                if self.process_dest(d) {
                    progress = true;
                } else {
                    blocked.push(d);
                }
            }
            dests = blocked;
            dests.append(&mut self.extra);
            if progress || dests.is_empty() {
                continue;
            }

            // Every move waits on another: copy the occupant of the first
            // destination aside.
            let d = dests[0];
            let Some(occ) = self.contents.get(&d.loc).copied() else {
                self.s.fatal(format!("blocked move into empty {:?}", d.loc));
            };
            let ty = self.s.func.value_ty(occ.c);
            let r = self.find_reg_for(ty);
            let op = if d.loc.is_stack() {
                Opcode::LoadReg
            } else {
                Opcode::Copy
            };
            let x = self.emit(op, ty, occ.c);
            self.set(Location::Reg(r), occ.vid, x, false);
            if self.s.log {
                log::trace!("edge {} -> {}: break cycle with {x}", self.p, self.b);
            }
        }
    }

    /// Moves the value of `d` into place, returning `false` if the
    /// destination still holds a value needed elsewhere.
    fn process_dest(&mut self, d: Dest) -> bool {
        if let Some(occ) = self.contents.get(&d.loc).copied() {
            if occ.vid == d.vid {
                self.contents.insert(d.loc, Content { fin: true, ..occ });
                if let Location::Reg(r) = d.loc {
                    self.final_regs.insert(r);
                }
                self.finish(d, occ.c);
                return true;
            }
            let last_copy = self.cache.get(&occ.vid).map_or(0, |a| a.len()) == 1;
            if last_copy
                && !self.s.values[occ.vid].remat
                && self.pending.get(&occ.vid).copied().unwrap_or(0) > 0
            {
                return false;
            }
        }

        let v = d.vid;
        let ty = self.s.func.value_ty(v);
        let dst_is_reg = !d.loc.is_stack();
        let x = if self.s.values[v].remat {
            let data = self.s.func.value(v);
            let (op, aux, aux_int) = (data.op, data.aux.clone(), data.aux_int);
            if dst_is_reg {
                self.emit_with(op, ty, aux, aux_int, &[])
            } else {
                let r = self.find_reg_for(ty);
                let t = self.emit_with(op, ty, aux, aux_int, &[]);
                self.set(Location::Reg(r), v, t, false);
                self.emit(Opcode::StoreReg, ty, t)
            }
        } else {
            let Some((c, src)) = self.source_of(v) else {
                self.s
                    .fatal(format!("{v} is not available on edge {} -> {}", self.p, self.b));
            };
            match (src.is_stack(), dst_is_reg) {
                (false, true) => self.emit(Opcode::Copy, ty, c),
                (false, false) => self.emit(Opcode::StoreReg, ty, c),
                (true, true) => self.emit(Opcode::LoadReg, ty, c),
                (true, false) => {
                    let r = self.find_reg_for(ty);
                    let t = self.emit(Opcode::LoadReg, ty, c);
                    self.set(Location::Reg(r), v, t, false);
                    self.emit(Opcode::StoreReg, ty, t)
                }
            }
        };
        self.set(d.loc, v, x, true);
        self.finish(d, x);
        true
    }

    fn finish(&mut self, d: Dest, x: ValueId) {
        if let Some((phi, idx)) = d.splice {
            self.s.func.set_arg(phi, idx, x);
        }
        if let Some(n) = self.pending.get_mut(&d.vid) {
            *n = n.saturating_sub(1);
        }
    }

    /// A location holding `v`, registers first.
    fn source_of(&self, v: ValueId) -> Option<(ValueId, Location)> {
        let locs = self.cache.get(&v)?;
        locs.iter()
            .find(|(_, loc)| !loc.is_stack())
            .or_else(|| locs.first())
            .copied()
    }

    fn emit(&mut self, op: Opcode, ty: Type, arg: ValueId) -> ValueId {
        self.emit_with(op, ty, Aux::None, 0, &[arg])
    }

    fn emit_with(
        &mut self,
        op: Opcode,
        ty: Type,
        aux: Aux,
        aux_int: i64,
        args: &[ValueId],
    ) -> ValueId {
        match op {
            Opcode::Copy => self.s.stats.copies += 1,
            Opcode::LoadReg => self.s.stats.restores += 1,
            _ if op.is_rematerializable() => self.s.stats.remats += 1,
            _ => {}
        }
        self.s.func.new_value(self.p, op, ty, aux, aux_int, args)
    }

    /// Records that `loc` holds copy `c` of `vid`.
    fn set(&mut self, loc: Location, vid: ValueId, c: ValueId, fin: bool) {
        self.erase(loc);
        self.s.func.set_location(c, loc);
        self.s.orig[c] = vid.into();
        self.contents.insert(loc, Content { vid, c, fin });

        let locs = self.cache.entry(vid).or_default();
        if locs.is_empty() {
            self.cached_vals.push(vid);
        }
        locs.push((c, loc));
        let (n, first) = (locs.len(), locs[0].1);

        if let Location::Reg(r) = loc {
            if self.used_regs.contains(r) {
                self.s.fatal(format!("edge move into busy {}", self.s.config.regs.name(r)));
            }
            self.used_regs.insert(r);
            if fin {
                self.final_regs.insert(r);
            }
            if n == 1 {
                self.unique_regs.insert(r);
            }
        }
        if n == 2 {
            if let Location::Reg(t) = first {
                self.unique_regs.remove(t);
            }
        }
    }

    /// Forgets the content of `loc`, requeueing it if it was final.
    fn erase(&mut self, loc: Location) {
        let Some(cr) = self.contents.remove(&loc) else {
            return;
        };
        if cr.fin {
            self.extra.push(Dest {
                loc,
                vid: cr.vid,
                splice: None,
            });
            *self.pending.entry(cr.vid).or_default() += 1;
        }

        if let Some(locs) = self.cache.get_mut(&cr.vid) {
            if let Some(i) = locs.iter().position(|&(_, l)| l == loc) {
                locs.swap_remove(i);
            }
            if let [(_, Location::Reg(r))] = locs.as_slice() {
                self.unique_regs.insert(*r);
            }
        }
        if let Location::Reg(r) = loc {
            self.used_regs.remove(r);
            self.final_regs.remove(r);
            self.unique_regs.remove(r);
        }
    }

    /// A register for a temporary of type `ty`, freeing one by spilling it
    /// to a fresh slot if all are taken.
    fn find_reg_for(&mut self, ty: Type) -> RegNum {
        let m = self.s.config.regs.class_of(ty);
        let free = m.difference(self.used_regs);
        let expendable = m
            .intersect(self.used_regs)
            .difference(self.unique_regs)
            .difference(self.final_regs);
        let shared = m.difference(self.unique_regs);
        if let Some(r) = free.first().or(expendable.first()).or(shared.first()) {
            return r;
        }

        let victim = self.cached_vals.iter().find_map(|&vid| {
            let locs = self.cache.get(&vid)?;
            locs.iter().find_map(|&(c, loc)| match loc {
                Location::Reg(r) if m.contains(r) => Some((vid, c, r)),
                _ => None,
            })
        });
        let Some((vid, c, r)) = victim else {
            self.s.fatal(format!("no register for {ty} on edge {} -> {}", self.p, self.b));
        };
        if !self.s.values[vid].remat {
            let c_ty = self.s.func.value_ty(c);
            let slot = self.s.new_spill_slot(c_ty);
            let x = self.emit(Opcode::StoreReg, c_ty, c);
            self.set(Location::Stack(slot), vid, x, false);
        }
        r
    }
}
