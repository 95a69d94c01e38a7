//! Opcode specific side data attached to values.
use std::{fmt, sync::Arc};

use smallvec::SmallVec;

use crate::{RegNum, SlotId, Type};

#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Aux {
    #[default]
    None,
    /// A symbol reference, e.g. a global or a function.
    Sym(Symbol),
    Call(Arc<CallDesc>),
    /// A stack slot, e.g. the destination of a spill.
    Slot(SlotId),
    Cond(Cond),
}

impl Aux {
    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }

    pub fn call(&self) -> Option<&CallDesc> {
        match self {
            Self::Call(desc) => Some(desc),
            _ => None,
        }
    }

    pub fn slot(&self) -> Option<SlotId> {
        match self {
            Self::Slot(slot) => Some(*slot),
            _ => None,
        }
    }

    pub fn cond(&self) -> Option<Cond> {
        match self {
            Self::Cond(cond) => Some(*cond),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(pub Arc<str>);

impl Symbol {
    pub fn new(name: &str) -> Self {
        Self(name.into())
    }
}

/// Describes the register interface of a call.
///
/// Arguments that the callee expects on the stack are stored to the outgoing
/// argument area by lowering, so only register arguments reach the
/// allocator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CallDesc {
    pub callee: Symbol,
    pub arg_regs: SmallVec<[RegNum; 4]>,
    pub results: SmallVec<[(RegNum, Type); 2]>,
}

impl CallDesc {
    pub fn new(callee: &str, arg_regs: &[RegNum], results: &[(RegNum, Type)]) -> Self {
        Self {
            callee: Symbol::new(callee),
            arg_regs: arg_regs.into(),
            results: results.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Cond {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Ult,
    Ule,
    Ugt,
    Uge,
}

impl fmt::Display for Aux {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::None => Ok(()),
            Self::Sym(sym) => write!(f, "{{{}}}", sym.0),
            Self::Call(desc) => write!(f, "{{{}}}", desc.callee.0),
            Self::Slot(slot) => write!(f, "{{{slot}}}"),
            Self::Cond(cond) => write!(f, "{{{cond:?}}}"),
        }
    }
}
