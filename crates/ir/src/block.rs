//! This module contains the basic block definition.
use std::fmt;

use cranelift_entity::entity_impl;
use smallvec::SmallVec;

use crate::{Pos, ValueId};

/// An opaque reference to [`Block`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BlockId(pub u32);
entity_impl!(BlockId, "b");

/// Shape of the control flow leaving a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BlockKind {
    #[default]
    Invalid,
    /// Unconditional jump to the only successor.
    Plain,
    /// Two-way branch on the control value: `succs[0]` if true, else `succs[1]`.
    If,
    /// Function return; the control value is a `MakeResult`.
    Ret,
    /// Leaves the function without returning, e.g. a panic. The control value
    /// is the final memory state.
    Exit,
    /// Two successors, the first one is always taken. Left by optimizations
    /// that proved a branch; the second edge keeps the CFG shape stable.
    First,
}

impl BlockKind {
    /// Number of successors a block of this kind must have.
    pub fn succ_num(self) -> Option<usize> {
        match self {
            Self::Invalid => None,
            Self::Plain => Some(1),
            Self::If | Self::First => Some(2),
            Self::Ret | Self::Exit => Some(0),
        }
    }

    /// Number of control values a block of this kind must have.
    pub fn control_num(self) -> Option<usize> {
        match self {
            Self::Invalid => None,
            Self::Plain | Self::First => Some(0),
            Self::If | Self::Ret | Self::Exit => Some(1),
        }
    }
}

impl fmt::Display for BlockKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BranchPrediction {
    Unlikely,
    #[default]
    Unknown,
    Likely,
}

/// One end of a CFG edge.
///
/// For a successor edge, `block` is the successor and `index` the position
/// of the reverse edge in the successor's predecessor list, and vice versa.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Edge {
    pub block: BlockId,
    pub index: u32,
}

impl Edge {
    pub fn new(block: BlockId, index: usize) -> Self {
        Self {
            block,
            index: index as u32,
        }
    }

    pub fn index(self) -> usize {
        self.index as usize
    }
}

#[derive(Debug, Clone, Default)]
pub struct Block {
    pub kind: BlockKind,
    /// Likelihood of taking `succs[0]` of an `If` block.
    pub likely: BranchPrediction,
    pub(crate) controls: SmallVec<[ValueId; 2]>,
    pub(crate) succs: SmallVec<[Edge; 2]>,
    pub(crate) preds: SmallVec<[Edge; 2]>,
    /// Values of the block; unordered until the block is scheduled.
    pub values: Vec<ValueId>,
    pub pos: Pos,
}

impl Block {
    pub fn controls(&self) -> &[ValueId] {
        &self.controls
    }

    pub fn control(&self) -> Option<ValueId> {
        self.controls.first().copied()
    }

    pub fn succs(&self) -> &[Edge] {
        &self.succs
    }

    pub fn preds(&self) -> &[Edge] {
        &self.preds
    }

    pub fn succ(&self, idx: usize) -> BlockId {
        self.succs[idx].block
    }

    pub fn pred(&self, idx: usize) -> BlockId {
        self.preds[idx].block
    }

    pub fn succ_num(&self) -> usize {
        self.succs.len()
    }

    pub fn pred_num(&self) -> usize {
        self.preds.len()
    }

    pub(crate) fn clear(&mut self) {
        self.kind = BlockKind::Invalid;
        self.likely = BranchPrediction::Unknown;
        self.controls.clear();
        self.succs.clear();
        self.preds.clear();
        self.values.clear();
        self.pos = Pos::default();
    }
}
