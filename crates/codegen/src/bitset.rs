use bit_set::BitSet as Bs;
use cranelift_entity::EntityRef;
use std::{fmt, marker::PhantomData};

/// A dense set of entities, e.g. stack map slots or blocks.
#[derive(Clone)]
pub struct BitSet<T> {
    bs: Bs,
    marker: PhantomData<T>,
}

impl<T> BitSet<T> {
    pub fn new() -> Self {
        Self {
            bs: Bs::new(),
            marker: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.bs.is_empty()
    }

    pub fn len(&self) -> usize {
        self.bs.len()
    }

    /// Adds every element of `other`, returning `true` if the set grew.
    pub fn union_with(&mut self, other: &Self) -> bool {
        let before = self.bs.len();
        self.bs.union_with(&other.bs);
        self.bs.len() != before
    }

    pub fn clear(&mut self) {
        self.bs.clear()
    }
}

impl<T> BitSet<T>
where
    T: EntityRef,
{
    pub fn insert(&mut self, elem: T) -> bool {
        self.bs.insert(elem.index())
    }

    pub fn remove(&mut self, elem: T) -> bool {
        self.bs.remove(elem.index())
    }

    pub fn contains(&self, elem: T) -> bool {
        self.bs.contains(elem.index())
    }

    pub fn iter(&self) -> impl Iterator<Item = T> + '_ {
        self.bs.iter().map(|v| T::new(v))
    }
}

/// Sets are equal when they hold the same elements, whatever their capacity.
impl<T> PartialEq for BitSet<T> {
    fn eq(&self, other: &Self) -> bool {
        self.bs.iter().eq(other.bs.iter())
    }
}

impl<T> Eq for BitSet<T> {}

impl<T> Default for BitSet<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for BitSet<T>
where
    T: EntityRef + fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

impl<T: EntityRef, const N: usize> From<[T; N]> for BitSet<T> {
    fn from(elems: [T; N]) -> Self {
        elems.into_iter().collect()
    }
}

impl<A: EntityRef> FromIterator<A> for BitSet<A> {
    fn from_iter<T>(iter: T) -> Self
    where
        T: IntoIterator<Item = A>,
    {
        let mut bs = BitSet::new();
        for e in iter {
            bs.insert(e);
        }
        bs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cantata_ir::BlockId;

    #[test]
    fn equality_ignores_capacity() {
        let mut a: BitSet<BlockId> = [BlockId(2), BlockId(90)].into();
        a.remove(BlockId(90));
        let b: BitSet<BlockId> = [BlockId(2)].into();
        assert_eq!(a, b);
    }

    #[test]
    fn union_reports_growth() {
        let mut a: BitSet<BlockId> = [BlockId(1), BlockId(3)].into();
        let b: BitSet<BlockId> = [BlockId(3)].into();
        assert!(!a.union_with(&b));

        let c: BitSet<BlockId> = [BlockId(7)].into();
        assert!(a.union_with(&c));
        assert_eq!(a.iter().collect::<Vec<_>>(), [BlockId(1), BlockId(3), BlockId(7)]);
        assert!(a.contains(BlockId(7)));
        assert_ne!(a, b);
    }
}
