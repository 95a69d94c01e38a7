//! Machine locations: registers, register masks and stack slots.
use std::fmt;

use cranelift_entity::{entity_impl, packed_option::PackedOption};

use crate::Type;

/// Dense index of a machine register in the target's register file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegNum(pub u8);

impl RegNum {
    pub fn index(self) -> usize {
        self.0 as usize
    }

    pub fn mask(self) -> RegMask {
        RegMask(1 << self.0)
    }
}

/// A set of registers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct RegMask(pub u64);

impl RegMask {
    pub const EMPTY: Self = Self(0);

    pub fn contains(self, reg: RegNum) -> bool {
        self.0 & (1 << reg.0) != 0
    }

    pub fn insert(&mut self, reg: RegNum) {
        self.0 |= 1 << reg.0;
    }

    pub fn remove(&mut self, reg: RegNum) {
        self.0 &= !(1 << reg.0);
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn len(self) -> u32 {
        self.0.count_ones()
    }

    /// Lowest numbered register in the set.
    pub fn first(self) -> Option<RegNum> {
        (self.0 != 0).then(|| RegNum(self.0.trailing_zeros() as u8))
    }

    pub fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    pub fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    pub fn difference(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    pub fn iter(self) -> impl Iterator<Item = RegNum> {
        let mut bits = self.0;
        std::iter::from_fn(move || {
            if bits == 0 {
                return None;
            }
            let reg = bits.trailing_zeros();
            bits &= bits - 1;
            Some(RegNum(reg as u8))
        })
    }
}

impl FromIterator<RegNum> for RegMask {
    fn from_iter<T: IntoIterator<Item = RegNum>>(iter: T) -> Self {
        let mut mask = RegMask::EMPTY;
        for reg in iter {
            mask.insert(reg);
        }
        mask
    }
}

/// An opaque reference to a source-level variable (or compiler temporary)
/// that owns stack storage.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VarId(pub u32);
entity_impl!(VarId, "var");

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VarData {
    pub name: String,
    pub ty: Type,
    pub kind: VarKind,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VarKind {
    /// A user variable, visible to the debugger.
    User,
    /// A parameter; `offset` is its position in the argument area if it is
    /// passed on the stack.
    Param { index: u32, offset: Option<i64> },
    /// A compiler generated temporary.
    AutoTmp,
}

impl VarData {
    pub fn is_autotmp(&self) -> bool {
        self.kind == VarKind::AutoTmp
    }
}

/// An opaque reference to [`LocalSlot`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotId(pub u32);
entity_impl!(SlotId, "slot");

/// A stack resident storage location: a variable, or a piece of a decomposed
/// one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct LocalSlot {
    pub var: VarId,
    pub ty: Type,
    /// Offset of the piece within `var`'s storage.
    pub off: i64,
    /// The slot this one was split from, if any.
    pub split_of: PackedOption<SlotId>,
    /// Offset of this piece within `split_of`.
    pub split_offset: i64,
}

impl LocalSlot {
    pub fn new(var: VarId, ty: Type, off: i64) -> Self {
        Self {
            var,
            ty,
            off,
            split_of: None.into(),
            split_offset: 0,
        }
    }
}

/// Canonical identity of stack storage; two slots denote the same storage iff
/// their keys are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SlotKey {
    pub var: VarId,
    pub off: i64,
    pub ty: Type,
}

/// Where a value lives after register allocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Location {
    Reg(RegNum),
    Stack(SlotId),
}

impl Location {
    pub fn reg(self) -> Option<RegNum> {
        match self {
            Self::Reg(reg) => Some(reg),
            Self::Stack(_) => None,
        }
    }

    pub fn slot(self) -> Option<SlotId> {
        match self {
            Self::Stack(slot) => Some(slot),
            Self::Reg(_) => None,
        }
    }

    pub fn is_stack(self) -> bool {
        matches!(self, Self::Stack(_))
    }
}

impl fmt::Display for RegNum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use cranelift_entity::EntityRef;

    use super::*;

    #[test]
    fn entity_names() {
        assert_eq!(format!("{:?}", VarId::new(2)), "var2");
        assert_eq!(format!("{:?}", SlotId::new(5)), "slot5");
        assert_eq!(SlotId::new(5).to_string(), "slot5");
    }

    #[test]
    fn reg_mask_ops() {
        let mut mask: RegMask = [RegNum(0), RegNum(3), RegNum(63)].into_iter().collect();
        assert_eq!(mask.len(), 3);
        assert!(mask.contains(RegNum(63)));
        assert_eq!(mask.first(), Some(RegNum(0)));

        mask.remove(RegNum(0));
        assert_eq!(mask.first(), Some(RegNum(3)));
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![RegNum(3), RegNum(63)]
        );

        let other = RegNum(3).mask();
        assert_eq!(mask.difference(other).iter().collect::<Vec<_>>(), vec![RegNum(63)]);
        assert_eq!(mask.intersect(other), other);
        assert!(RegMask::EMPTY.first().is_none());
    }
}
