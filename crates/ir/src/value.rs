//! This module contains the SSA value definition.
use std::fmt;

use cranelift_entity::{entity_impl, packed_option::PackedOption};
use smallvec::SmallVec;

use crate::{Aux, BlockId, Opcode, Type};

/// An opaque reference to [`Value`].
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ValueId(pub u32);
entity_impl!(ValueId, "v");

/// Source position, used for diagnostics and debug information.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Pos {
    pub line: u32,
    pub col: u32,
}

impl Pos {
    pub fn new(line: u32, col: u32) -> Self {
        Self { line, col }
    }

    pub fn is_known(self) -> bool {
        self.line != 0
    }
}

impl fmt::Display for Pos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.line, self.col)
    }
}

/// A single operation of the function.
///
/// Values are owned by the function's arena; `args` are non-owning
/// references to other values.
#[derive(Debug, Clone, Default)]
pub struct Value {
    pub op: Opcode,
    pub ty: Type,
    pub aux: Aux,
    pub aux_int: i64,
    pub(crate) args: SmallVec<[ValueId; 3]>,
    /// The block holding the value. Detached values, e.g. spills that are not
    /// placed yet, have none.
    pub(crate) block: PackedOption<BlockId>,
    /// Number of argument slots and block controls referring to this value.
    pub(crate) uses: u32,
    pub pos: Pos,
}

impl Value {
    pub fn args(&self) -> &[ValueId] {
        &self.args
    }

    pub fn arg(&self, idx: usize) -> ValueId {
        self.args[idx]
    }

    pub fn block(&self) -> Option<BlockId> {
        self.block.expand()
    }

    pub fn uses(&self) -> u32 {
        self.uses
    }

    pub fn is_phi(&self) -> bool {
        self.op == Opcode::Phi
    }

    /// The memory argument, if the value takes one.
    pub fn mem_arg(&self, ty_of: impl Fn(ValueId) -> Type) -> Option<ValueId> {
        self.args.last().copied().filter(|&arg| ty_of(arg).is_mem())
    }

    pub(crate) fn reset(&mut self, op: Opcode, ty: Type) {
        self.op = op;
        self.ty = ty;
        self.aux = Aux::None;
        self.aux_int = 0;
    }
}
