#![allow(dead_code)]

use std::sync::Arc;

use cantata_codegen::{
    critical_edge::CriticalEdgeSplitter, deadcode::deadcode, layout::layout,
    schedule::Scheduler,
};
use cantata_ir::{
    builder::test_util::small_config, Abi, BlockId, BlockKind, Config, Func, FunctionBuilder,
    Opcode, PhaseOptions, Type, ValueId,
};

pub fn init_logger() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// A small register file with the structural checker on after every pass.
pub fn checked_config(gp: u8) -> Arc<Config> {
    let options = PhaseOptions::parse("check,stats").unwrap();
    Arc::new((*small_config(gp)).clone().with_options(options))
}

/// Runs the passes that precede register allocation.
pub fn prepare(func: &mut Func) {
    deadcode(func);
    CriticalEdgeSplitter::new().run(func);
    Scheduler::new().run(func);
    layout(func);
}

/// A deterministic generator for test inputs.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed.wrapping_mul(0x9e37_79b9_7f4a_7c15) | 1)
    }

    pub fn next(&mut self) -> u64 {
        self.0 = self
            .0
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.0 >> 33
    }

    /// A number in `0..n`.
    pub fn below(&mut self, n: usize) -> usize {
        (self.next() % n as u64) as usize
    }
}

/// A control flow graph with `n` blocks and random edges. Every block but
/// the last jumps or branches to blocks other than the entry; the last one
/// exits.
pub fn random_cfg(rng: &mut Lcg, n: usize) -> Func {
    let mut func = Func::new("random", small_config(4), Abi::default());
    let blocks: Vec<BlockId> = (0..n).map(|_| func.new_block(BlockKind::Plain)).collect();
    let entry = blocks[0];
    let mem = func.new_value0(entry, Opcode::InitMem, Type::Mem);
    let cond = func.new_value0_i(entry, Opcode::Const, Type::I1, 1);

    for (i, &block) in blocks.iter().enumerate() {
        if i == n - 1 {
            func.reset(block, BlockKind::Exit);
            func.set_control(block, mem);
            continue;
        }
        let target = |rng: &mut Lcg| blocks[1 + rng.below(n - 1)];
        if rng.below(3) == 0 {
            func.reset(block, BlockKind::Plain);
            let t = target(rng);
            func.add_edge_to(block, t);
        } else {
            func.reset(block, BlockKind::If);
            func.set_control(block, cond);
            let (t, e) = (target(rng), target(rng));
            func.add_edge_to(block, t);
            func.add_edge_to(block, e);
        }
    }
    func
}

/// Blocks reachable from the entry without passing through `avoid`.
pub fn reachable_avoiding(func: &Func, avoid: Option<BlockId>) -> Vec<BlockId> {
    let entry = func.entry();
    let mut seen = vec![entry];
    if Some(entry) == avoid {
        return Vec::new();
    }
    let mut stack = vec![entry];
    while let Some(block) = stack.pop() {
        for succ in func.block(block).succs() {
            if Some(succ.block) == avoid || seen.contains(&succ.block) {
                continue;
            }
            seen.push(succ.block);
            stack.push(succ.block);
        }
    }
    seen
}

/// Values of `func` in layout order.
pub fn values(func: &Func) -> impl Iterator<Item = ValueId> + '_ {
    func.layout
        .iter()
        .flat_map(move |&b| func.block(b).values.iter().copied())
}

pub fn values_with_op(func: &Func, op: Opcode) -> Vec<ValueId> {
    values(func).filter(|&v| func.op(v) == op).collect()
}

/// Position of `v` within its block.
pub fn index_in_block(func: &Func, v: ValueId) -> usize {
    let block = func.block_of(v);
    func.block(block)
        .values
        .iter()
        .position(|&x| x == v)
        .unwrap()
}

/// Returns `true` if `a` executes before `b` on every path to `b`.
pub fn dominates_value(func: &mut Func, a: ValueId, b: ValueId) -> bool {
    let (ba, bb) = (func.block_of(a), func.block_of(b));
    if ba == bb {
        return index_in_block(func, a) < index_in_block(func, b);
    }
    func.dom_tree().strictly_dominates(ba, bb)
}

const OPS: [Opcode; 4] = [Opcode::Add, Opcode::Sub, Opcode::Mul, Opcode::Xor];

fn pick(rng: &mut Lcg, pool: &[ValueId]) -> ValueId {
    pool[rng.below(pool.len())]
}

fn grow(rng: &mut Lcg, b: &mut FunctionBuilder, pool: &mut Vec<ValueId>, n: usize) {
    for _ in 0..n {
        let op = OPS[rng.below(OPS.len())];
        let (l, r) = (pick(rng, pool), pick(rng, pool));
        let v = b.binary(op, l, r);
        pool.push(v);
    }
}

/// A random straight-line prefix, a diamond and, when `with_loop` is set, a
/// counting loop before the return. Values from the prefix stay live until
/// the end so a small register file has to spill.
pub fn random_program(rng: &mut Lcg, with_loop: bool) -> Func {
    random_program_with(rng, with_loop, 4)
}

/// Like [`random_program`], with `gp` general purpose registers.
pub fn random_program_with(rng: &mut Lcg, with_loop: bool, gp: u8) -> Func {
    let config = checked_config(gp);
    let abi = config.abi(&[("x", Type::I64), ("y", Type::I64)], &[Type::I64]);
    let mut b = FunctionBuilder::new("random", config, abi);

    let mut pool = vec![b.param(0), b.param(1)];
    let c = b.const_int(Type::I64, rng.below(100) as i64);
    pool.push(c);
    let prefix = 2 + rng.below(8);
    grow(rng, &mut b, &mut pool, prefix);

    let (l, r) = (pick(rng, &pool), pick(rng, &pool));
    let flags = b.insert(Opcode::Cmp, Type::Flags, &[l, r]);
    let cond = b.insert(Opcode::SetCond, Type::I1, &[flags]);
    let (left, right, join) = (b.append_block(), b.append_block(), b.append_block());
    b.br(cond, left, right);

    let mut arms = Vec::new();
    for arm in [left, right] {
        b.switch_to_block(arm);
        let mut local = pool.clone();
        let n = 1 + rng.below(4);
        grow(rng, &mut b, &mut local, n);
        arms.push(*local.last().unwrap_or(&pool[0]));
        b.jump(join);
    }
    b.switch_to_block(join);
    let merged = b.phi(Type::I64, &arms);
    pool.push(merged);

    let result = if with_loop {
        let (header, exit) = (b.append_block(), b.append_block());
        let limit = pick(rng, &pool);
        b.jump(header);

        b.switch_to_block(header);
        let i = b.phi(Type::I64, &[merged]);
        let step = pick(rng, &pool);
        let next = b.binary(Opcode::Add, i, step);
        let flags = b.insert(Opcode::Cmp, Type::Flags, &[next, limit]);
        let again = b.insert(Opcode::SetCond, Type::I1, &[flags]);
        b.br(again, header, exit);
        b.func.add_arg(i, next);

        b.switch_to_block(exit);
        next
    } else {
        merged
    };

    // Keep a handful of prefix values alive to the end.
    let mut sum = result;
    for _ in 0..3 {
        let v = pick(rng, &pool);
        sum = b.binary(Opcode::Add, sum, v);
    }
    b.ret(&[sum]);
    b.finish()
}
