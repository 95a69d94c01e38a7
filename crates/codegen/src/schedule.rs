//! Orders the values of every block for emission.
//!
//! A list scheduler over the in-block dependency graph: argument edges, plus
//! an edge from every load of memory state `m` to the store that consumes
//! `m`. Among ready values the lowest [`Score`] goes first, then the value
//! that makes the most other values ready, then the lowest id.
use std::{cmp::Reverse, collections::BinaryHeap};

use cranelift_entity::SecondaryMap;
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

use cantata_ir::{BlockId, Func, Opcode, ValueId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Score {
    Phi,
    Arg,
    InitMem,
    /// Call results must directly follow their call.
    CallResult,
    Memory,
    /// Flag readers go right after the flags producer.
    ReadFlags,
    Default,
    /// Flags producers wait until their reader is the only thing left to do.
    Flags,
    Control,
}

#[derive(Default)]
pub struct Scheduler {
    score: SecondaryMap<ValueId, Option<Score>>,
    remaining: SecondaryMap<ValueId, u32>,
    users: FxHashMap<ValueId, SmallVec<[ValueId; 4]>>,
    ready: BinaryHeap<Reverse<(Score, Reverse<usize>, ValueId)>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn run(&mut self, func: &mut Func) {
        for block in func.layout.clone() {
            self.schedule_block(func, block);
        }
        func.scheduled = true;
    }

    fn schedule_block(&mut self, func: &mut Func, block: BlockId) {
        let values = std::mem::take(&mut func.block_mut(block).values);
        self.users.clear();
        self.ready.clear();

        for &v in &values {
            self.score[v] = Some(score_of(func, block, v));
            self.remaining[v] = 0;
        }
        for (from, to) in dependencies(func, block, &values) {
            self.users.entry(from).or_default().push(to);
            self.remaining[to] += 1;
        }

        for &v in &values {
            if self.remaining[v] == 0 {
                self.push_ready(v);
            }
        }

        let mut order = Vec::with_capacity(values.len());
        while let Some(Reverse((_, _, v))) = self.ready.pop() {
            order.push(v);
            let users = self.users.remove(&v).unwrap_or_default();
            for user in users {
                self.remaining[user] -= 1;
                if self.remaining[user] == 0 {
                    self.push_ready(user);
                }
            }
        }

        if order.len() != values.len() {
            let pos = func.block(block).pos;
            func.fatal(pos, format!("dependency cycle while scheduling {block}"));
        }
        for v in values {
            self.score[v] = None;
        }
        func.block_mut(block).values = order;
    }

    fn push_ready(&mut self, v: ValueId) {
        let unblocks = self
            .users
            .get(&v)
            .map_or(0, |users| users.iter().filter(|&&u| self.remaining[u] == 1).count());
        let score = self.score[v].unwrap_or(Score::Default);
        self.ready.push(Reverse((score, Reverse(unblocks), v)));
    }
}

fn score_of(func: &Func, block: BlockId, v: ValueId) -> Score {
    let data = func.value(v);
    let score = match data.op {
        Opcode::Phi => Score::Phi,
        Opcode::Arg => Score::Arg,
        Opcode::InitMem => Score::InitMem,
        Opcode::CallResult => Score::CallResult,
        _ if data.ty.is_mem() => Score::Memory,
        _ if data.args().iter().any(|&a| func.value_ty(a).is_flags()) => Score::ReadFlags,
        _ if data.ty.is_flags() => Score::Flags,
        _ => Score::Default,
    };

    if score >= Score::Memory && func.block(block).controls().contains(&v) {
        Score::Control
    } else {
        score
    }
}

/// `(before, after)` pairs between values of `block`.
fn dependencies(func: &Func, block: BlockId, values: &[ValueId]) -> Vec<(ValueId, ValueId)> {
    let mut deps = Vec::new();
    let ty_of = |v| func.value_ty(v);

    // The store consuming each memory state.
    let mut next_mem: FxHashMap<ValueId, ValueId> = FxHashMap::default();
    for &v in values {
        let data = func.value(v);
        if data.is_phi() {
            continue;
        }
        for &arg in data.args() {
            if func.value(arg).block() == Some(block) {
                deps.push((arg, v));
            }
        }
        if data.ty.is_mem() && data.op != Opcode::InitMem {
            if let Some(mem) = data.mem_arg(ty_of) {
                next_mem.insert(mem, v);
            }
        }
    }

    for &v in values {
        let data = func.value(v);
        if data.is_phi() || data.ty.is_mem() {
            continue;
        }
        let Some(mem) = data.mem_arg(ty_of) else {
            continue;
        };
        if let Some(&store) = next_mem.get(&mem) {
            deps.push((v, store));
        }
    }

    deps
}
