//! The function: owner of the whole block/value graph of one compilation
//! unit.
use std::{fmt, sync::Arc};

use cranelift_entity::{packed_option::PackedOption, EntityRef, PrimaryMap, SecondaryMap};
use indexmap::IndexMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use crate::{
    cache::Cache,
    cfg,
    domtree::DomTree,
    sparse_tree::SparseTree,
    AbiLoc, Abi, Aux, Block, BlockId, BlockKind, Config, Edge, LocalSlot, Location, Opcode, Pos,
    SlotId, SlotKey, Type, Value, ValueId, VarData, VarId, VarKind,
};

pub struct Func {
    pub name: String,
    pub config: Arc<Config>,
    pub abi: Abi,

    #[doc(hidden)]
    pub blocks: PrimaryMap<BlockId, Block>,
    #[doc(hidden)]
    pub values: PrimaryMap<ValueId, Value>,
    /// Order of the live blocks, entry first.
    pub layout: Vec<BlockId>,
    entry: PackedOption<BlockId>,

    free_values: Vec<ValueId>,
    free_blocks: Vec<BlockId>,
    freed: SecondaryMap<BlockId, bool>,
    value_lists: Vec<Vec<ValueId>>,

    const_cache: FxHashMap<(Opcode, Type, i64), ValueId>,

    pub vars: PrimaryMap<VarId, VarData>,
    slots: PrimaryMap<SlotId, LocalSlot>,
    slot_ids: FxHashMap<SlotKey, SlotId>,
    param_slots: Vec<SlotId>,
    /// Source level slots and the SSA values that hold (pieces of) them.
    pub named_values: IndexMap<SlotId, Vec<ValueId>>,

    /// Where each value lives once registers are allocated.
    pub locations: SecondaryMap<ValueId, Option<Location>>,
    pub frame: FrameLayout,

    cfg_version: u64,
    postorder: Option<Arc<Vec<BlockId>>>,
    dom_tree: Option<Arc<DomTree>>,
    sparse_tree: Option<Arc<SparseTree>>,

    /// Set once every block's values are in emission order.
    pub scheduled: bool,
    /// Set once critical edges have been split and must stay split.
    pub no_critical_edges: bool,
    /// Set once every value that needs one has a location.
    pub reg_allocated: bool,
}

/// Stack frame of a function.
#[derive(Debug, Clone, Default)]
pub struct FrameLayout {
    /// Bytes of locals and spill slots below the argument area.
    pub size: i64,
    offsets: SecondaryMap<VarId, Option<i64>>,
}

impl FrameLayout {
    pub fn set_offset(&mut self, var: VarId, offset: i64) {
        self.offsets[var] = Some(offset);
    }

    pub fn offset(&self, var: VarId) -> Option<i64> {
        self.offsets[var]
    }

    pub fn clear(&mut self) {
        self.size = 0;
        self.offsets.clear();
    }
}

impl Func {
    pub fn new(name: &str, config: Arc<Config>, abi: Abi) -> Self {
        Self::with_cache(name, config, abi, Cache::default())
    }

    /// Creates a function reusing the storage of `cache`.
    pub fn with_cache(name: &str, config: Arc<Config>, abi: Abi, cache: Cache) -> Self {
        let Cache {
            mut blocks,
            mut values,
            mut locations,
            value_lists,
        } = cache;
        blocks.clear();
        values.clear();
        locations.clear();

        let mut func = Self {
            name: name.to_string(),
            config,
            abi,
            blocks,
            values,
            layout: Vec::new(),
            entry: None.into(),
            free_values: Vec::new(),
            free_blocks: Vec::new(),
            freed: SecondaryMap::default(),
            value_lists,
            const_cache: FxHashMap::default(),
            vars: PrimaryMap::default(),
            slots: PrimaryMap::default(),
            slot_ids: FxHashMap::default(),
            param_slots: Vec::new(),
            named_values: IndexMap::new(),
            locations,
            frame: FrameLayout::default(),
            cfg_version: 0,
            postorder: None,
            dom_tree: None,
            sparse_tree: None,
            scheduled: false,
            no_critical_edges: false,
            reg_allocated: false,
        };

        let params: Vec<_> = func
            .abi
            .params
            .iter()
            .enumerate()
            .map(|(idx, p)| {
                let offset = match p.loc {
                    AbiLoc::Stack(off) => Some(off),
                    AbiLoc::Reg(_) => None,
                };
                let name = if p.name.is_empty() {
                    format!("~p{idx}")
                } else {
                    p.name.clone()
                };
                let kind = VarKind::Param {
                    index: idx as u32,
                    offset,
                };
                (name, p.ty, kind)
            })
            .collect();
        for (name, ty, kind) in params {
            let var = func.new_var(&name, ty, kind);
            let slot = func.local_slot(LocalSlot::new(var, ty, 0));
            func.param_slots.push(slot);
        }

        func
    }

    /// Releases the function, returning its storage for the next compilation.
    pub fn into_cache(self) -> Cache {
        let Self {
            mut blocks,
            mut values,
            mut locations,
            mut value_lists,
            ..
        } = self;

        for (_, block) in blocks.iter_mut() {
            let mut list = std::mem::take(&mut block.values);
            list.clear();
            value_lists.push(list);
        }
        blocks.clear();
        values.clear();
        locations.clear();

        Cache {
            blocks,
            values,
            locations,
            value_lists,
        }
    }

    /// Aborts compilation on a broken compiler invariant.
    #[track_caller]
    pub fn fatal(&self, pos: Pos, msg: impl fmt::Display) -> ! {
        panic!("internal compiler error: {}:{pos}: {msg}", self.name)
    }

    /// Reports a user-facing diagnostic tied to this function.
    pub fn warn(&self, pos: Pos, msg: impl fmt::Display) {
        log::warn!("{}:{pos}: {msg}", self.name);
    }

    pub fn entry(&self) -> BlockId {
        match self.entry.expand() {
            Some(entry) => entry,
            None => self.fatal(Pos::default(), "function has no entry block"),
        }
    }

    pub fn try_entry(&self) -> Option<BlockId> {
        self.entry.expand()
    }

    pub fn set_entry(&mut self, block: BlockId) {
        self.entry = block.into();
        if let Some(pos) = self.layout.iter().position(|&b| b == block) {
            self.layout.remove(pos);
            self.layout.insert(0, block);
        }
        self.invalidate_cfg();
    }

    pub fn block(&self, block: BlockId) -> &Block {
        &self.blocks[block]
    }

    pub fn block_mut(&mut self, block: BlockId) -> &mut Block {
        &mut self.blocks[block]
    }

    pub fn value(&self, value: ValueId) -> &Value {
        &self.values[value]
    }

    pub fn value_mut(&mut self, value: ValueId) -> &mut Value {
        &mut self.values[value]
    }

    pub fn value_ty(&self, value: ValueId) -> Type {
        self.values[value].ty
    }

    pub fn op(&self, value: ValueId) -> Opcode {
        self.values[value].op
    }

    /// Returns the block of an attached value.
    pub fn block_of(&self, value: ValueId) -> BlockId {
        match self.values[value].block() {
            Some(block) => block,
            None => self.fatal(self.values[value].pos, format!("{value} is detached")),
        }
    }

    pub fn is_block_live(&self, block: BlockId) -> bool {
        block.index() < self.blocks.len() && !self.freed[block]
    }

    /// Iterates over the live blocks in layout order.
    pub fn iter_blocks(&self) -> impl Iterator<Item = BlockId> + '_ {
        self.layout.iter().copied()
    }

    /// Iterates over the values of every live block in layout order.
    pub fn iter_values(&self) -> impl Iterator<Item = ValueId> + '_ {
        self.layout
            .iter()
            .flat_map(move |&b| self.blocks[b].values.iter().copied())
    }

    /// Number of live values.
    pub fn num_values(&self) -> usize {
        self.values.len() - self.free_values.len()
    }

    pub fn num_blocks(&self) -> usize {
        self.layout.len()
    }

    pub fn location(&self, value: ValueId) -> Option<Location> {
        self.locations[value]
    }

    pub fn set_location(&mut self, value: ValueId, loc: Location) {
        self.locations[value] = Some(loc);
    }

    pub fn cfg_version(&self) -> u64 {
        self.cfg_version
    }

    /* Block construction */

    pub fn new_block(&mut self, kind: BlockKind) -> BlockId {
        let mut data = Block {
            kind,
            ..Block::default()
        };
        if let Some(list) = self.value_lists.pop() {
            data.values = list;
        }

        let block = match self.free_blocks.pop() {
            Some(block) => {
                self.blocks[block] = data;
                self.freed[block] = false;
                block
            }
            None => self.blocks.push(data),
        };

        if self.entry.is_none() {
            self.entry = block.into();
        }
        self.layout.push(block);
        self.invalidate_cfg();
        block
    }

    /// Frees a block that has no edges left. Its values must be freed first.
    pub fn free_block(&mut self, block: BlockId) {
        if Some(block) == self.entry.expand() {
            self.fatal(self.blocks[block].pos, "freeing the entry block");
        }
        let data = &self.blocks[block];
        if !data.succs.is_empty() || !data.preds.is_empty() || !data.values.is_empty() {
            self.fatal(data.pos, format!("freeing {block} which is still in use"));
        }

        self.reset_controls(block);
        let mut list = std::mem::take(&mut self.blocks[block].values);
        list.clear();
        self.value_lists.push(list);
        self.blocks[block].clear();
        self.freed[block] = true;
        self.free_blocks.push(block);
        self.layout.retain(|&b| b != block);
        self.invalidate_cfg();
    }

    /// Changes the kind of `block` and drops its control values.
    pub fn reset(&mut self, block: BlockId, kind: BlockKind) {
        self.blocks[block].kind = kind;
        self.blocks[block].likely = Default::default();
        self.reset_controls(block);
    }

    pub fn set_control(&mut self, block: BlockId, value: ValueId) {
        self.reset_controls(block);
        self.add_control(block, value);
    }

    pub fn add_control(&mut self, block: BlockId, value: ValueId) {
        debug_assert!(self.blocks[block].controls.len() < 2);
        self.values[value].uses += 1;
        self.blocks[block].controls.push(value);
    }

    pub fn set_control_at(&mut self, block: BlockId, idx: usize, value: ValueId) {
        let old = std::mem::replace(&mut self.blocks[block].controls[idx], value);
        self.values[old].uses -= 1;
        self.values[value].uses += 1;
    }

    pub fn reset_controls(&mut self, block: BlockId) {
        let controls = std::mem::take(&mut self.blocks[block].controls);
        for v in controls {
            self.values[v].uses -= 1;
        }
    }

    /* Edges */

    /// Adds an edge from `from` to `to`, as the last successor of `from` and
    /// the last predecessor of `to`.
    pub fn add_edge_to(&mut self, from: BlockId, to: BlockId) {
        let i = self.blocks[from].succs.len();
        let j = self.blocks[to].preds.len();
        self.blocks[from].succs.push(Edge::new(to, j));
        self.blocks[to].preds.push(Edge::new(from, i));
        self.invalidate_cfg();
    }

    /// Removes the `idx`-th successor edge of `block` together with its
    /// reverse edge and the matching phi arguments of the successor.
    ///
    /// The last edge of each list moves into the freed position.
    pub fn remove_edge(&mut self, block: BlockId, idx: usize) {
        let edge = self.blocks[block].succs[idx];
        self.remove_succ(block, idx);
        self.remove_pred(edge.block, edge.index());
        self.remove_phi_args(edge.block, edge.index());
        self.invalidate_cfg();
    }

    fn remove_succ(&mut self, block: BlockId, idx: usize) {
        let succs = &mut self.blocks[block].succs;
        let last = succs.len() - 1;
        if idx != last {
            let moved = succs[last];
            succs[idx] = moved;
            self.blocks[moved.block].preds[moved.index()].index = idx as u32;
        }
        self.blocks[block].succs.pop();
    }

    fn remove_pred(&mut self, block: BlockId, idx: usize) {
        let preds = &mut self.blocks[block].preds;
        let last = preds.len() - 1;
        if idx != last {
            let moved = preds[last];
            preds[idx] = moved;
            self.blocks[moved.block].succs[moved.index()].index = idx as u32;
        }
        self.blocks[block].preds.pop();
    }

    /// Removes phi argument `idx` of every phi in `block`, mirroring the
    /// swap-removal done on the predecessor list.
    fn remove_phi_args(&mut self, block: BlockId, idx: usize) {
        let phis: SmallVec<[ValueId; 8]> = self.blocks[block]
            .values
            .iter()
            .copied()
            .filter(|&v| self.values[v].is_phi())
            .collect();
        for phi in phis {
            let removed = self.values[phi].args.swap_remove(idx);
            self.values[removed].uses -= 1;
        }
    }

    /// Swaps the two successors of `block`, e.g. after inverting a branch.
    pub fn swap_successors(&mut self, block: BlockId) {
        let succ_num = self.blocks[block].succs.len();
        if succ_num != 2 {
            let pos = self.blocks[block].pos;
            self.fatal(pos, format!("swap_successors on {block} with {succ_num} succs"));
        }
        let data = &mut self.blocks[block];
        data.succs.swap(0, 1);
        data.likely = match data.likely {
            crate::BranchPrediction::Likely => crate::BranchPrediction::Unlikely,
            crate::BranchPrediction::Unlikely => crate::BranchPrediction::Likely,
            p => p,
        };
        for (i, e) in self.blocks[block].succs.clone().into_iter().enumerate() {
            self.blocks[e.block].preds[e.index()].index = i as u32;
        }
        self.invalidate_cfg();
    }

    /// Redirects the `idx`-th successor edge of `block` to `to`, which gets a
    /// new predecessor edge. The old target loses its predecessor edge and the
    /// matching phi arguments.
    pub fn redirect_succ(&mut self, block: BlockId, idx: usize, to: BlockId) {
        let old = self.blocks[block].succs[idx];
        self.remove_pred(old.block, old.index());
        self.remove_phi_args(old.block, old.index());

        let j = self.blocks[to].preds.len();
        self.blocks[to].preds.push(Edge::new(block, idx));
        self.blocks[block].succs[idx] = Edge::new(to, j);
        self.invalidate_cfg();
    }

    /// Splits the `idx`-th successor edge of `block` with a new `Plain`
    /// block. The target keeps its predecessor index, so its phis are
    /// untouched.
    pub fn split_edge(&mut self, block: BlockId, idx: usize) -> BlockId {
        let edge = self.blocks[block].succs[idx];
        let mid = self.new_block(BlockKind::Plain);
        self.blocks[mid].pos = self.blocks[edge.block].pos;
        self.blocks[mid].preds.push(Edge::new(block, idx));
        self.blocks[mid].succs.push(edge);
        self.blocks[block].succs[idx] = Edge::new(mid, 0);
        self.blocks[edge.block].preds[edge.index()] = Edge::new(mid, 0);
        self.invalidate_cfg();
        mid
    }

    /* Value construction */

    fn alloc_value(&mut self, data: Value) -> ValueId {
        for &arg in &data.args {
            self.values[arg].uses += 1;
        }
        match self.free_values.pop() {
            Some(v) => {
                self.values[v] = data;
                self.locations[v] = None;
                v
            }
            None => self.values.push(data),
        }
    }

    /// Creates a value and appends it to `block`.
    pub fn new_value(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux: Aux,
        aux_int: i64,
        args: &[ValueId],
    ) -> ValueId {
        let pos = self.blocks[block].pos;
        let v = self.alloc_value(Value {
            op,
            ty,
            aux,
            aux_int,
            args: args.into(),
            block: block.into(),
            uses: 0,
            pos,
        });
        self.blocks[block].values.push(v);
        v
    }

    /// Creates a value that belongs to no block yet.
    pub fn new_value_detached(
        &mut self,
        op: Opcode,
        ty: Type,
        aux: Aux,
        aux_int: i64,
        args: &[ValueId],
        pos: Pos,
    ) -> ValueId {
        self.alloc_value(Value {
            op,
            ty,
            aux,
            aux_int,
            args: args.into(),
            block: None.into(),
            uses: 0,
            pos,
        })
    }

    /// Records `block` as the owner of `value`. The caller inserts the value
    /// into the block's value list.
    pub fn attach_value(&mut self, value: ValueId, block: BlockId) {
        self.values[value].block = block.into();
    }

    /// Clears the owner of `value`. The caller removes the value from the
    /// block's value list.
    pub fn detach_value(&mut self, value: ValueId) {
        self.values[value].block = None.into();
    }

    pub fn new_value0(&mut self, block: BlockId, op: Opcode, ty: Type) -> ValueId {
        self.new_value(block, op, ty, Aux::None, 0, &[])
    }

    pub fn new_value0_i(&mut self, block: BlockId, op: Opcode, ty: Type, aux_int: i64) -> ValueId {
        self.new_value(block, op, ty, Aux::None, aux_int, &[])
    }

    pub fn new_value0_a(&mut self, block: BlockId, op: Opcode, ty: Type, aux: Aux) -> ValueId {
        self.new_value(block, op, ty, aux, 0, &[])
    }

    pub fn new_value0_ia(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux_int: i64,
        aux: Aux,
    ) -> ValueId {
        self.new_value(block, op, ty, aux, aux_int, &[])
    }

    pub fn new_value1(&mut self, block: BlockId, op: Opcode, ty: Type, arg: ValueId) -> ValueId {
        self.new_value(block, op, ty, Aux::None, 0, &[arg])
    }

    pub fn new_value1_i(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux_int: i64,
        arg: ValueId,
    ) -> ValueId {
        self.new_value(block, op, ty, Aux::None, aux_int, &[arg])
    }

    pub fn new_value1_a(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux: Aux,
        arg: ValueId,
    ) -> ValueId {
        self.new_value(block, op, ty, aux, 0, &[arg])
    }

    pub fn new_value2(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        arg0: ValueId,
        arg1: ValueId,
    ) -> ValueId {
        self.new_value(block, op, ty, Aux::None, 0, &[arg0, arg1])
    }

    pub fn new_value2_i(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux_int: i64,
        arg0: ValueId,
        arg1: ValueId,
    ) -> ValueId {
        self.new_value(block, op, ty, Aux::None, aux_int, &[arg0, arg1])
    }

    pub fn new_value3(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        arg0: ValueId,
        arg1: ValueId,
        arg2: ValueId,
    ) -> ValueId {
        self.new_value(block, op, ty, Aux::None, 0, &[arg0, arg1, arg2])
    }

    pub fn new_value_n(&mut self, block: BlockId, op: Opcode, ty: Type, args: &[ValueId]) -> ValueId {
        self.new_value(block, op, ty, Aux::None, 0, args)
    }

    pub fn new_value_n_a(
        &mut self,
        block: BlockId,
        op: Opcode,
        ty: Type,
        aux: Aux,
        args: &[ValueId],
    ) -> ValueId {
        self.new_value(block, op, ty, aux, 0, args)
    }

    /// Returns the cached integer constant `c` of type `ty`, creating it in
    /// the entry block if needed.
    pub fn const_int(&mut self, ty: Type, c: i64) -> ValueId {
        self.cached_const(Opcode::Const, ty, c)
    }

    pub fn const_nil(&mut self) -> ValueId {
        self.cached_const(Opcode::ConstNil, Type::Ptr, 0)
    }

    fn cached_const(&mut self, op: Opcode, ty: Type, c: i64) -> ValueId {
        if let Some(&v) = self.const_cache.get(&(op, ty, c)) {
            let data = &self.values[v];
            if data.op == op && data.ty == ty && data.aux_int == c && data.block.is_some() {
                return v;
            }
        }
        let entry = self.entry();
        let v = self.new_value0_i(entry, op, ty, c);
        self.const_cache.insert((op, ty, c), v);
        v
    }

    /* Arguments */

    pub fn set_arg(&mut self, value: ValueId, idx: usize, arg: ValueId) {
        let old = std::mem::replace(&mut self.values[value].args[idx], arg);
        self.values[old].uses -= 1;
        self.values[arg].uses += 1;
    }

    pub fn add_arg(&mut self, value: ValueId, arg: ValueId) {
        self.values[arg].uses += 1;
        self.values[value].args.push(arg);
    }

    pub fn add_args(&mut self, value: ValueId, args: &[ValueId]) {
        for &arg in args {
            self.add_arg(value, arg);
        }
    }

    pub fn remove_arg(&mut self, value: ValueId, idx: usize) {
        let old = self.values[value].args.remove(idx);
        self.values[old].uses -= 1;
    }

    pub fn reset_args(&mut self, value: ValueId) {
        let args = std::mem::take(&mut self.values[value].args);
        for arg in &args {
            self.values[*arg].uses -= 1;
        }
    }

    /// Turns `value` into a copy of `arg`.
    pub fn copy_of(&mut self, value: ValueId, arg: ValueId) {
        let ty = self.values[value].ty;
        self.reset_args(value);
        self.values[value].reset(Opcode::Copy, ty);
        self.add_arg(value, arg);
    }

    /// Resets `value` to a new operation without arguments.
    pub fn reset_value(&mut self, value: ValueId, op: Opcode, ty: Type) {
        self.reset_args(value);
        self.values[value].reset(op, ty);
    }

    /// Rewrites every use of `old` (arguments and block controls) to `new`.
    pub fn replace_uses(&mut self, old: ValueId, new: ValueId) {
        let blocks: SmallVec<[BlockId; 16]> = self.layout.iter().copied().collect();
        for b in blocks {
            for i in 0..self.blocks[b].values.len() {
                let v = self.blocks[b].values[i];
                for j in 0..self.values[v].args.len() {
                    if self.values[v].args[j] == old {
                        self.set_arg(v, j, new);
                    }
                }
            }
            for i in 0..self.blocks[b].controls.len() {
                if self.blocks[b].controls[i] == old {
                    self.set_control_at(b, i, new);
                }
            }
        }
    }

    /// Detaches `value` from its block and frees it. It must have no uses.
    pub fn remove_value(&mut self, value: ValueId) {
        if let Some(block) = self.values[value].block() {
            self.blocks[block].values.retain(|v| *v != value);
        }
        self.free_value(value);
    }

    /// Frees a value that is no longer referenced by any block.
    pub fn free_value(&mut self, value: ValueId) {
        let data = &self.values[value];
        if data.uses != 0 {
            self.fatal(data.pos, format!("freeing {value} with {} uses", data.uses));
        }
        if data.op == Opcode::Invalid {
            self.fatal(data.pos, format!("freeing {value} twice"));
        }
        self.reset_args(value);
        self.values[value] = Value::default();
        self.locations[value] = None;
        self.free_values.push(value);
    }

    /* Stack slots */

    pub fn new_var(&mut self, name: &str, ty: Type, kind: VarKind) -> VarId {
        self.vars.push(VarData {
            name: name.to_string(),
            ty,
            kind,
        })
    }

    /// Interns `slot`, returning the existing id if a slot denoting the same
    /// storage was created before.
    pub fn local_slot(&mut self, slot: LocalSlot) -> SlotId {
        let key = SlotKey {
            var: slot.var,
            off: slot.off,
            ty: slot.ty,
        };
        if let Some(&id) = self.slot_ids.get(&key) {
            return id;
        }
        let id = self.slots.push(slot);
        self.slot_ids.insert(key, id);
        id
    }

    /// Creates the slot of a piece of type `ty` at `offset` within `parent`.
    pub fn split_slot(&mut self, parent: SlotId, ty: Type, offset: i64) -> SlotId {
        let p = self.slots[parent];
        self.local_slot(LocalSlot {
            var: p.var,
            ty,
            off: p.off + offset,
            split_of: parent.into(),
            split_offset: offset,
        })
    }

    pub fn slot(&self, slot: SlotId) -> &LocalSlot {
        &self.slots[slot]
    }

    pub fn slot_key(&self, slot: SlotId) -> SlotKey {
        let s = &self.slots[slot];
        SlotKey {
            var: s.var,
            off: s.off,
            ty: s.ty,
        }
    }

    pub fn same_storage(&self, a: SlotId, b: SlotId) -> bool {
        self.slot_key(a) == self.slot_key(b)
    }

    pub fn iter_slots(&self) -> impl Iterator<Item = (SlotId, &LocalSlot)> {
        self.slots.iter()
    }

    /// Home slot of the `idx`-th parameter.
    pub fn param_slot(&self, idx: usize) -> SlotId {
        self.param_slots[idx]
    }

    /// Frame offset of `slot`, once the frame is laid out.
    pub fn slot_offset(&self, slot: SlotId) -> Option<i64> {
        let s = &self.slots[slot];
        self.frame.offset(s.var).map(|off| off + s.off)
    }

    /// Human readable name of `slot`, e.g. `x` or `s.8`.
    pub fn slot_name(&self, slot: SlotId) -> String {
        let s = &self.slots[slot];
        let var = &self.vars[s.var].name;
        if s.off == 0 && s.ty.size() == self.vars[s.var].ty.size() {
            var.clone()
        } else {
            format!("{var}.{}", s.off)
        }
    }

    pub fn add_named_value(&mut self, slot: SlotId, value: ValueId) {
        self.named_values.entry(slot).or_default().push(value);
    }

    /* Cached CFG analyses */

    /// Drops every cached CFG analysis. Called by all CFG mutations.
    pub fn invalidate_cfg(&mut self) {
        self.cfg_version += 1;
        self.postorder = None;
        self.dom_tree = None;
        self.sparse_tree = None;
    }

    pub fn postorder(&mut self) -> Arc<Vec<BlockId>> {
        if let Some(po) = &self.postorder {
            return po.clone();
        }
        let po = Arc::new(cfg::post_order(self));
        self.postorder = Some(po.clone());
        po
    }

    pub fn dom_tree(&mut self) -> Arc<DomTree> {
        if let Some(tree) = &self.dom_tree {
            return tree.clone();
        }
        let tree = Arc::new(DomTree::compute(self));
        self.dom_tree = Some(tree.clone());
        tree
    }

    pub fn sparse_tree(&mut self) -> Arc<SparseTree> {
        if let Some(tree) = &self.sparse_tree {
            return tree.clone();
        }
        let dom_tree = self.dom_tree();
        let tree = Arc::new(SparseTree::new(self, &dom_tree));
        self.sparse_tree = Some(tree.clone());
        tree
    }

    /// Aborts if an analysis computed at `version` no longer describes the CFG.
    #[track_caller]
    pub fn assert_fresh(&self, version: u64, what: &str) {
        if version != self.cfg_version {
            self.fatal(
                Pos::default(),
                format!(
                    "stale {what}: computed at cfg version {version}, now {}",
                    self.cfg_version
                ),
            );
        }
    }
}

impl fmt::Debug for Func {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", crate::ir_writer::FuncWriter::new(self).dump_string())
    }
}
