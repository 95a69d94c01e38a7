//! Stack slot assignment and frame layout.
//!
//! Register allocation gives every spill and stack phi a fresh slot. Here the
//! stack values are grouped (a stack phi shares its slot with its
//! arguments), groups that are never live at the same time share slots, and a
//! spill of a named value moves into the variable's own slot when nothing
//! else lives there. Finally every variable with storage gets a frame offset.
use cranelift_entity::{entity_impl, PrimaryMap, SecondaryMap};
use rustc_hash::{FxHashMap, FxHashSet};
use smallvec::SmallVec;

use cantata_ir::{BlockId, Func, Location, Opcode, SlotId, ValueId, VarId, VarKind};

use crate::{bitset::BitSet, regalloc::verify::held, regalloc::verify::Held};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct Group(u32);
entity_impl!(Group);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct StackAllocStats {
    /// Distinct slots holding stack values.
    pub slots: usize,
    /// Groups moved into a slot shared with another group.
    pub reused: usize,
    /// Groups moved into the slot of the variable they hold.
    pub named: usize,
}

#[derive(Debug, Default)]
struct GroupData {
    values: SmallVec<[ValueId; 2]>,
    /// Stack parameters are pinned to their ABI slot.
    pinned: Option<SlotId>,
}

pub fn stackalloc(func: &mut Func) -> StackAllocStats {
    let log = func.config.options.pass("stackalloc").log;
    let (groups, group_of) = build_groups(func);
    let interference = interference(func, &groups, &group_of);
    let mut stats = assign_slots(func, &groups, &interference);
    stats.slots = layout_frame(func);

    if log {
        log::debug!(
            "stackalloc {}: {} groups, {stats:?}, frame size {}",
            func.name,
            groups.len(),
            func.frame.size
        );
    }
    stats
}

fn is_stack_value(func: &Func, v: ValueId) -> bool {
    func.location(v).is_some_and(Location::is_stack)
}

/// Unions every stack phi with its arguments.
fn build_groups(
    func: &Func,
) -> (
    PrimaryMap<Group, GroupData>,
    SecondaryMap<ValueId, Option<Group>>,
) {
    let mut parent: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    fn find(parent: &mut FxHashMap<ValueId, ValueId>, v: ValueId) -> ValueId {
        let p = *parent.entry(v).or_insert(v);
        if p == v {
            return v;
        }
        let root = find(parent, p);
        parent.insert(v, root);
        root
    }

    let mut stack_values = Vec::new();
    for &block in &func.layout {
        for &v in &func.block(block).values {
            if !is_stack_value(func, v) {
                continue;
            }
            stack_values.push(v);
            find(&mut parent, v);
            if func.value(v).is_phi() {
                for &arg in func.value(v).args() {
                    if is_stack_value(func, arg) {
                        let (a, b) = (find(&mut parent, v), find(&mut parent, arg));
                        parent.insert(a, b);
                    }
                }
            }
        }
    }

    let mut groups: PrimaryMap<Group, GroupData> = PrimaryMap::new();
    let mut by_root: FxHashMap<ValueId, Group> = FxHashMap::default();
    let mut group_of = SecondaryMap::new();
    for v in stack_values {
        let root = find(&mut parent, v);
        let g = *by_root
            .entry(root)
            .or_insert_with(|| groups.push(GroupData::default()));
        groups[g].values.push(v);
        if func.op(v) == Opcode::Arg {
            groups[g].pinned = func.location(v).and_then(Location::slot);
        }
        group_of[v] = Some(g);
    }
    (groups, group_of)
}

/// Pairs of groups live at the same time, from a backward liveness pass.
fn interference(
    func: &mut Func,
    groups: &PrimaryMap<Group, GroupData>,
    group_of: &SecondaryMap<ValueId, Option<Group>>,
) -> FxHashSet<(Group, Group)> {
    let po = func.postorder();
    let func = &*func;
    let mut live_in: SecondaryMap<BlockId, BitSet<Group>> = SecondaryMap::new();
    let mut edges = FxHashSet::default();

    // Edges are only read off once the live-in sets are final.
    while sweep(func, &po, group_of, &mut live_in, None) {}
    sweep(func, &po, group_of, &mut live_in, Some(&mut edges));

    // Stack parameters occupy their slot from function entry.
    let entry = func.entry();
    for (g, data) in groups.iter() {
        if data.pinned.is_none() {
            continue;
        }
        for w in live_in[entry].iter().filter(|&w| w != g) {
            edges.insert((g.min(w), g.max(w)));
        }
    }
    edges
}

/// One backward pass over `po`, returning `true` if a live-in set changed.
/// With `edges`, every definition interferes with the groups live after it.
fn sweep(
    func: &Func,
    po: &[BlockId],
    group_of: &SecondaryMap<ValueId, Option<Group>>,
    live_in: &mut SecondaryMap<BlockId, BitSet<Group>>,
    mut edges: Option<&mut FxHashSet<(Group, Group)>>,
) -> bool {
    let mut changed = false;
    for &block in po {
        let data = func.block(block);
        let mut live: BitSet<Group> = BitSet::new();
        for succ in data.succs() {
            live.union_with(&live_in[succ.block]);
            for &v in &func.block(succ.block).values {
                let value = func.value(v);
                if !value.is_phi() {
                    break;
                }
                if let Some(g) = group_of[value.arg(succ.index())] {
                    live.insert(g);
                }
            }
        }

        for &v in data.values.iter().rev() {
            let value = func.value(v);
            if let Some(g) = group_of[v] {
                if let Some(edges) = edges.as_deref_mut() {
                    for w in live.iter().filter(|&w| w != g) {
                        edges.insert((g.min(w), g.max(w)));
                    }
                }
                live.remove(g);
            }
            if value.is_phi() {
                continue;
            }
            for &arg in value.args() {
                if let Some(g) = group_of[arg] {
                    live.insert(g);
                }
            }
        }

        if live_in[block] != live {
            live_in[block] = live;
            changed = true;
        }
    }
    changed
}

fn assign_slots(
    func: &mut Func,
    groups: &PrimaryMap<Group, GroupData>,
    interference: &FxHashSet<(Group, Group)>,
) -> StackAllocStats {
    let mut stats = StackAllocStats::default();
    let interferes = |a: Group, b: Group| interference.contains(&(a.min(b), a.max(b)));

    // Named slot of every value.
    let mut name_of: FxHashMap<ValueId, SlotId> = FxHashMap::default();
    for (&slot, values) in &func.named_values {
        for &v in values {
            name_of.entry(v).or_insert(slot);
        }
    }

    // Groups placed in each variable so far. Slots of one variable may
    // overlap in the frame, so sharing is decided per variable.
    let mut users: FxHashMap<VarId, Vec<Group>> = FxHashMap::default();
    let mut autotmps: Vec<SlotId> = Vec::new();
    let mut assigned: SecondaryMap<Group, Option<SlotId>> = SecondaryMap::new();

    for (g, data) in groups.iter() {
        if let Some(slot) = data.pinned {
            users.entry(func.slot(slot).var).or_default().push(g);
            assigned[g] = Some(slot);
        }
    }

    for (g, data) in groups.iter() {
        if assigned[g].is_some() {
            continue;
        }
        let Some(&first) = data.values.first() else {
            continue;
        };
        let ty = func.value_ty(first);
        let fits = |slot: SlotId, users: &FxHashMap<VarId, Vec<Group>>| {
            func.slot(slot).ty == ty
                && users
                    .get(&func.slot(slot).var)
                    .map_or(true, |gs| gs.iter().all(|&o| !interferes(g, o)))
        };

        let named = data.values.iter().find_map(|&v| match held(func, v) {
            Held::Value(orig) => name_of.get(&orig).copied(),
            Held::Const(..) => None,
        });
        let slot = if let Some(slot) = named.filter(|&s| fits(s, &users)) {
            stats.named += 1;
            slot
        } else if let Some(&slot) = autotmps.iter().find(|&&s| fits(s, &users)) {
            stats.reused += 1;
            slot
        } else {
            let Some(slot) = func.location(first).and_then(Location::slot) else {
                func.fatal(func.value(first).pos, format!("{first} is not on the stack"));
            };
            autotmps.push(slot);
            slot
        };

        users.entry(func.slot(slot).var).or_default().push(g);
        assigned[g] = Some(slot);
        for &v in &data.values {
            func.set_location(v, Location::Stack(slot));
        }
    }
    stats
}

/// Assigns frame offsets to every variable that has storage, returning the
/// number of distinct stack slots in use.
fn layout_frame(func: &mut Func) -> usize {
    let mut slots: FxHashSet<SlotId> = FxHashSet::default();
    for &block in &func.layout {
        for &v in &func.block(block).values {
            if let Some(slot) = func.location(v).and_then(Location::slot) {
                slots.insert(slot);
            }
        }
    }

    let mut vars: Vec<VarId> = slots.iter().map(|&s| func.slot(s).var).collect();
    // Parameters always get a home, the unoptimized prologue spills them.
    vars.extend((0..func.abi.params.len()).map(|i| func.slot(func.param_slot(i)).var));
    vars.sort_unstable();
    vars.dedup();

    let mut locals: Vec<VarId> = Vec::new();
    let mut stack_params: Vec<(VarId, i64)> = Vec::new();
    for var in vars {
        match func.vars[var].kind {
            VarKind::Param {
                offset: Some(off), ..
            } => stack_params.push((var, off)),
            _ => locals.push(var),
        }
    }
    locals.sort_by_key(|&var| (std::cmp::Reverse(func.vars[var].ty.align()), var));

    func.frame.clear();
    let mut off: i64 = 0;
    for var in locals {
        let ty = func.vars[var].ty;
        let align = i64::from(ty.align().max(1));
        off = (off + align - 1) / align * align;
        func.frame.set_offset(var, off);
        off += i64::from(ty.size());
    }
    let ptr = i64::from(func.config.ptr_size());
    let size = (off + ptr - 1) / ptr * ptr;
    func.frame.size = size;

    // The caller's argument area sits right above the frame.
    for (var, arg_off) in stack_params {
        func.frame.set_offset(var, size + arg_off);
    }
    slots.len()
}
