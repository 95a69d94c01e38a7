//! Location lists for named variables.
//!
//! Every value named after a variable, and every copy, spill or restore of
//! one, tells where that variable can be found from its definition on. The
//! per-block variable state is kept in a [`PersistentMap`] so that blocks can
//! share unchanged parts of their predecessors' state. Block entry states
//! are the intersection of the already processed predecessors' end states,
//! and the walk repeats until no end state changes.
use cranelift_entity::SecondaryMap;
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use cantata_ir::{BlockId, Func, Location, Opcode, RegMask, SlotId, ValueId};

use crate::regalloc::verify::{held, Held};

pub mod abt;
mod noopt;

pub use abt::PersistentMap;
pub use noopt::build_noopt;

/// Where a variable lives over a range of program points. Empty means the
/// value is not available.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VarLoc {
    pub regs: RegMask,
    /// Frame offset of a stack home.
    pub stack: Option<i64>,
}

impl VarLoc {
    pub fn is_empty(&self) -> bool {
        self.regs.is_empty() && self.stack.is_none()
    }

    fn intersect(self, other: Self) -> Self {
        Self {
            regs: self.regs.intersect(other.regs),
            stack: self.stack.filter(|&s| other.stack == Some(s)),
        }
    }
}

/// `loc` holds from program point `start` up to, not including, `end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VarLocEntry {
    pub start: u32,
    pub end: u32,
    pub loc: VarLoc,
}

#[derive(Debug, Default)]
pub struct DebugInfo {
    lists: IndexMap<SlotId, Vec<VarLocEntry>>,
    /// Program point of every value: its index in layout order.
    points: SecondaryMap<ValueId, u32>,
}

impl DebugInfo {
    pub fn list(&self, slot: SlotId) -> &[VarLocEntry] {
        self.lists.get(&slot).map_or(&[], Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &[VarLocEntry])> {
        self.lists.iter().map(|(&s, l)| (s, l.as_slice()))
    }

    pub fn point(&self, v: ValueId) -> u32 {
        self.points[v]
    }

    /// Renders the lists with register and slot names, one variable per
    /// line.
    pub fn dump(&self, func: &Func) -> String {
        let mut s = String::new();
        for (slot, list) in self.iter() {
            s.push_str(&func.slot_name(slot));
            s.push(':');
            for e in list {
                let mut parts: Vec<String> = e
                    .loc
                    .regs
                    .iter()
                    .map(|r| func.config.regs.name(r).to_string())
                    .collect();
                if let Some(off) = e.loc.stack {
                    parts.push(format!("fp+{off}"));
                }
                s.push_str(&format!(" [{},{}) {}", e.start, e.end, parts.join("|")));
            }
            s.push('\n');
        }
        s
    }
}

/// A variable's state: which value it currently holds, and where.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct VarState {
    value: ValueId,
    loc: VarLoc,
}

type State = PersistentMap<SlotId, VarState>;

pub fn build(func: &mut Func) -> DebugInfo {
    let log = func.config.options.pass("debug").log;
    let mut builder = Builder::new(func);
    builder.solve(func);
    let info = builder.emit(func);
    if log {
        log::debug!("debug locations of {}:\n{}", func.name, info.dump(func));
    }
    info
}

struct Builder {
    /// Variables each named value belongs to.
    names: FxHashMap<ValueId, SmallVec<[SlotId; 1]>>,
    end: SecondaryMap<BlockId, Option<State>>,
    /// Bumped whenever the end state of a block changes.
    end_version: SecondaryMap<BlockId, u64>,
    /// Entry state of each block and the predecessor end-state versions it
    /// was merged from.
    entry_cache: SecondaryMap<BlockId, Option<(SmallVec<[u64; 2]>, State)>>,
    points: SecondaryMap<ValueId, u32>,
    block_start: SecondaryMap<BlockId, u32>,
    block_end: SecondaryMap<BlockId, u32>,
}

impl Builder {
    fn new(func: &Func) -> Self {
        let mut names: FxHashMap<ValueId, SmallVec<[SlotId; 1]>> = FxHashMap::default();
        for (&slot, values) in &func.named_values {
            for &v in values {
                names.entry(v).or_default().push(slot);
            }
        }

        let mut points = SecondaryMap::new();
        let mut block_start = SecondaryMap::new();
        let mut block_end = SecondaryMap::new();
        let mut n = 0;
        for &block in &func.layout {
            block_start[block] = n;
            for &v in &func.block(block).values {
                points[v] = n;
                n += 1;
            }
            block_end[block] = n;
        }

        Self {
            names,
            end: SecondaryMap::new(),
            end_version: SecondaryMap::new(),
            entry_cache: SecondaryMap::new(),
            points,
            block_start,
            block_end,
        }
    }

    fn solve(&mut self, func: &Func) {
        let mut changed = true;
        while changed {
            changed = false;
            let mut scratch = Vec::new();
            for &block in &func.layout {
                let mut state = self.entry_state(func, block);
                for &v in &func.block(block).values {
                    scratch.clear();
                    self.step(func, &mut state, v, &mut scratch);
                }
                if self.end[block].as_ref() != Some(&state) {
                    self.end[block] = Some(state);
                    self.end_version[block] += 1;
                    changed = true;
                }
            }
        }
    }

    fn entry_state(&mut self, func: &Func, block: BlockId) -> State {
        let preds = func.block(block).preds();
        let versions: SmallVec<[u64; 2]> = preds
            .iter()
            .map(|e| self.end_version[e.block])
            .collect();
        if let Some((cached, state)) = &self.entry_cache[block] {
            if *cached == versions {
                return state.clone();
            }
        }

        let mut ends = preds.iter().filter_map(|e| self.end[e.block].as_ref());
        let state = match ends.next() {
            None => State::new(),
            Some(first) => {
                let mut acc = first.clone();
                for other in ends {
                    if acc.ptr_eq(other) {
                        continue;
                    }
                    acc = merge(&acc, other);
                }
                acc
            }
        };
        self.entry_cache[block] = Some((versions, state.clone()));
        state
    }

    /// Applies the effect of `v` on `state`, recording every variable whose
    /// location changed.
    fn step(&self, func: &Func, state: &mut State, v: ValueId, changed: &mut Vec<SlotId>) {
        let value = func.value(v);
        if value.op.is_call() {
            let caller_saved = func.config.regs.caller_saved;
            clobber(
                state,
                |l| VarLoc {
                    regs: l.regs.difference(caller_saved),
                    ..l
                },
                changed,
            );
        }

        let Some(loc) = func.location(v) else {
            return;
        };
        let stack = match loc {
            Location::Stack(slot) => func.slot_offset(slot),
            Location::Reg(_) => None,
        };
        match loc {
            Location::Reg(r) => clobber(
                state,
                |l| VarLoc {
                    regs: l.regs.difference(r.mask()),
                    ..l
                },
                changed,
            ),
            Location::Stack(_) => clobber(
                state,
                |l| VarLoc {
                    stack: l.stack.filter(|&off| Some(off) != stack),
                    ..l
                },
                changed,
            ),
        }

        let orig = match held(func, v) {
            Held::Value(orig) => orig,
            Held::Const(..) => v,
        };
        let Some(slots) = self.names.get(&orig) else {
            return;
        };
        let is_move = matches!(value.op, Opcode::Copy | Opcode::LoadReg | Opcode::StoreReg);
        for &slot in slots {
            let mut var = match state.get(&slot) {
                Some(s) if is_move && s.value == orig => *s,
                // A move of a value the variable no longer holds.
                Some(_) | None if is_move => continue,
                _ => VarState {
                    value: orig,
                    loc: VarLoc::default(),
                },
            };
            match loc {
                Location::Reg(r) => var.loc.regs.insert(r),
                Location::Stack(_) => var.loc.stack = stack,
            }
            state.insert(slot, var);
            changed.push(slot);
        }
    }

    /// Walks the solved function once more, turning state changes into
    /// location ranges.
    fn emit(&self, func: &Func) -> DebugInfo {
        let mut lists: IndexMap<SlotId, Vec<VarLocEntry>> = IndexMap::new();
        for &slot in func.named_values.keys() {
            lists.insert(slot, Vec::new());
        }
        let push = |lists: &mut IndexMap<SlotId, Vec<VarLocEntry>>,
                    slot: SlotId,
                    start: u32,
                    end: u32,
                    loc: VarLoc| {
            if start >= end || loc.is_empty() {
                return;
            }
            let list = lists.entry(slot).or_default();
            if let Some(last) = list.last_mut() {
                if last.end == start && last.loc == loc {
                    last.end = end;
                    return;
                }
            }
            list.push(VarLocEntry { start, end, loc });
        };

        for &block in &func.layout {
            let Some((_, mut state)) = self.entry_cache[block].clone() else {
                continue;
            };
            let mut open: FxHashMap<SlotId, (u32, VarLoc)> = state
                .iter()
                .map(|(&slot, s)| (slot, (self.block_start[block], s.loc)))
                .collect();

            let mut changed = Vec::new();
            for &v in &func.block(block).values {
                changed.clear();
                self.step(func, &mut state, v, &mut changed);
                let at = self.points[v] + 1;
                for &slot in &changed {
                    let loc = state.get(&slot).map_or(VarLoc::default(), |s| s.loc);
                    match open.insert(slot, (at, loc)) {
                        Some((start, old)) if old != loc => push(&mut lists, slot, start, at, old),
                        // Unchanged, keep the range open where it began.
                        Some(prev) => {
                            open.insert(slot, prev);
                        }
                        None => {}
                    }
                }
            }

            let end = self.block_end[block];
            let mut open: Vec<_> = open.into_iter().collect();
            open.sort_unstable_by_key(|&(slot, _)| slot);
            for (slot, (start, loc)) in open {
                push(&mut lists, slot, start, end, loc);
            }
        }

        for list in lists.values_mut() {
            list.sort_by_key(|e| e.start);
        }
        DebugInfo {
            lists,
            points: self.points.clone(),
        }
    }
}

/// Narrows the location of every variable to what `keep` leaves of it,
/// dropping variables with no location left.
fn clobber(state: &mut State, keep: impl Fn(VarLoc) -> VarLoc, changed: &mut Vec<SlotId>) {
    let hit: Vec<(SlotId, VarState)> = state
        .iter()
        .filter_map(|(&slot, s)| {
            let loc = keep(s.loc);
            (loc != s.loc).then_some((slot, VarState { loc, ..*s }))
        })
        .collect();
    for (slot, s) in hit {
        if s.loc.is_empty() {
            state.remove(&slot);
        } else {
            state.insert(slot, s);
        }
        changed.push(slot);
    }
}

/// Variables known in both states, at the locations they share.
fn merge(a: &State, b: &State) -> State {
    let mut out = a.clone();
    for (slot, sa) in a.iter() {
        let keep = match b.get(slot) {
            Some(sb) if sb.value == sa.value => {
                let loc = sa.loc.intersect(sb.loc);
                (!loc.is_empty()).then_some(VarState { loc, ..*sa })
            }
            _ => None,
        };
        match keep {
            Some(s) if s == *sa => {}
            Some(s) => out.insert(*slot, s),
            None => {
                out.remove(slot);
            }
        }
    }
    out
}
