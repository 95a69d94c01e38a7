use std::sync::Arc;

use crate::{
    Abi, Aux, BlockId, BlockKind, Cache, CallDesc, Config, Func, LocalSlot, Opcode, Pos, SlotId,
    Type, ValueId, VarKind,
};

/// Builds a function block by block, threading the memory state through
/// memory operations.
pub struct FunctionBuilder {
    pub func: Func,
    current: Option<BlockId>,
    mem: Option<ValueId>,
}

impl FunctionBuilder {
    pub fn new(name: &str, config: Arc<Config>, abi: Abi) -> Self {
        Self::with_cache(name, config, abi, Cache::default())
    }

    pub fn with_cache(name: &str, config: Arc<Config>, abi: Abi, cache: Cache) -> Self {
        let mut func = Func::with_cache(name, config, abi, cache);
        let entry = func.new_block(BlockKind::Invalid);
        let mem = func.new_value0(entry, Opcode::InitMem, Type::Mem);
        Self {
            func,
            current: Some(entry),
            mem: Some(mem),
        }
    }

    pub fn finish(self) -> Func {
        let Self { func, current, .. } = self;
        if let Some(block) = current {
            if func.block(block).kind == BlockKind::Invalid {
                func.fatal(Pos::default(), format!("{block} is not terminated"));
            }
        }
        func
    }

    pub fn entry_block(&self) -> BlockId {
        self.func.entry()
    }

    pub fn append_block(&mut self) -> BlockId {
        self.func.new_block(BlockKind::Invalid)
    }

    pub fn switch_to_block(&mut self, block: BlockId) {
        self.current = Some(block);
    }

    /// Sets the memory state seen by the next memory operation, e.g. the
    /// memory phi of a merge block.
    pub fn set_mem(&mut self, mem: ValueId) {
        self.mem = Some(mem);
    }

    pub fn mem(&self) -> ValueId {
        match self.mem {
            Some(mem) => mem,
            None => self.func.fatal(Pos::default(), "no memory state"),
        }
    }

    pub fn set_pos(&mut self, pos: Pos) {
        let block = self.current_block();
        self.func.block_mut(block).pos = pos;
    }

    fn current_block(&self) -> BlockId {
        match self.current {
            Some(block) => block,
            None => self.func.fatal(Pos::default(), "no current block"),
        }
    }

    /// Returns the value of the `idx`-th parameter, named after it for the
    /// debugger.
    pub fn param(&mut self, idx: usize) -> ValueId {
        let ty = self.func.abi.params[idx].ty;
        let entry = self.func.entry();
        let v = self.func.new_value0_i(entry, Opcode::Arg, ty, idx as i64);
        let slot = self.func.param_slot(idx);
        self.func.add_named_value(slot, v);
        v
    }

    /// Declares a user variable and returns its slot.
    pub fn declare_var(&mut self, name: &str, ty: Type) -> SlotId {
        let var = self.func.new_var(name, ty, VarKind::User);
        self.func.local_slot(LocalSlot::new(var, ty, 0))
    }

    /// Records that `value` is the current value of the variable `slot`.
    pub fn def_var(&mut self, slot: SlotId, value: ValueId) {
        self.func.add_named_value(slot, value);
    }

    pub fn const_int(&mut self, ty: Type, c: i64) -> ValueId {
        self.func.const_int(ty, c)
    }

    pub fn const_nil(&mut self) -> ValueId {
        self.func.const_nil()
    }

    pub fn insert(&mut self, op: Opcode, ty: Type, args: &[ValueId]) -> ValueId {
        let block = self.current_block();
        self.func.new_value_n(block, op, ty, args)
    }

    pub fn insert_i(&mut self, op: Opcode, ty: Type, aux_int: i64, args: &[ValueId]) -> ValueId {
        let block = self.current_block();
        self.func.new_value(block, op, ty, Aux::None, aux_int, args)
    }

    pub fn binary(&mut self, op: Opcode, lhs: ValueId, rhs: ValueId) -> ValueId {
        let ty = self.func.value_ty(lhs);
        self.insert(op, ty, &[lhs, rhs])
    }

    pub fn phi(&mut self, ty: Type, args: &[ValueId]) -> ValueId {
        let block = self.current_block();
        self.func.new_value_n(block, Opcode::Phi, ty, args)
    }

    pub fn load(&mut self, ty: Type, ptr: ValueId) -> ValueId {
        let mem = self.mem();
        self.insert(Opcode::Load, ty, &[ptr, mem])
    }

    pub fn store(&mut self, ptr: ValueId, val: ValueId) -> ValueId {
        let mem = self.mem();
        let mem = self.insert(Opcode::Store, Type::Mem, &[ptr, val, mem]);
        self.mem = Some(mem);
        mem
    }

    pub fn new_object(&mut self, size: i64) -> ValueId {
        let mem = self.mem();
        self.insert_i(Opcode::NewObject, Type::Ptr, size, &[mem])
    }

    pub fn preempt(&mut self) -> ValueId {
        let mem = self.mem();
        let mem = self.insert(Opcode::Preempt, Type::Mem, &[mem]);
        self.mem = Some(mem);
        mem
    }

    /// Emits a call and returns its results.
    pub fn call(&mut self, desc: CallDesc, args: &[ValueId]) -> Vec<ValueId> {
        let block = self.current_block();
        let mem = self.mem();
        let results: Vec<_> = desc.results.iter().map(|(_, ty)| *ty).collect();

        let mut call_args: Vec<_> = args.to_vec();
        call_args.push(mem);
        let call = self
            .func
            .new_value_n_a(block, Opcode::Call, Type::Mem, Aux::Call(desc.into()), &call_args);
        self.mem = Some(call);

        results
            .into_iter()
            .enumerate()
            .map(|(i, ty)| {
                self.func
                    .new_value1_i(block, Opcode::CallResult, ty, i as i64, call)
            })
            .collect()
    }

    pub fn jump(&mut self, dest: BlockId) {
        let block = self.current_block();
        self.func.reset(block, BlockKind::Plain);
        self.func.add_edge_to(block, dest);
    }

    pub fn br(&mut self, cond: ValueId, then_block: BlockId, else_block: BlockId) {
        let block = self.current_block();
        self.func.reset(block, BlockKind::If);
        self.func.set_control(block, cond);
        self.func.add_edge_to(block, then_block);
        self.func.add_edge_to(block, else_block);
    }

    pub fn ret(&mut self, results: &[ValueId]) {
        let block = self.current_block();
        let mem = self.mem();
        let mut args = results.to_vec();
        args.push(mem);
        let res = self.func.new_value_n(block, Opcode::MakeResult, Type::Mem, &args);
        self.func.reset(block, BlockKind::Ret);
        self.func.set_control(block, res);
    }
}
