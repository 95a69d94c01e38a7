//! The dominator tree with child/sibling links and `(entry, exit)` numbering,
//! answering ancestor queries in constant time.
use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{domtree::DomTree, BlockId, Func};

#[derive(Debug, Clone, Copy, Default)]
struct Node {
    parent: PackedOption<BlockId>,
    child: PackedOption<BlockId>,
    sibling: PackedOption<BlockId>,
    entry: u32,
    exit: u32,
}

#[derive(Debug, Default)]
pub struct SparseTree {
    nodes: SecondaryMap<BlockId, Node>,
    root: PackedOption<BlockId>,
    version: u64,
}

impl SparseTree {
    pub fn new(func: &Func, dom_tree: &DomTree) -> Self {
        let mut tree = Self {
            version: dom_tree.version(),
            ..Self::default()
        };

        let rpo = dom_tree.rpo();
        let Some(&root) = rpo.first() else {
            return tree;
        };
        tree.root = root.into();

        // Prepending in descending id order leaves every child list sorted by
        // block id.
        let mut blocks = rpo.to_vec();
        blocks.sort_unstable_by(|x, y| y.cmp(x));
        for block in blocks {
            let Some(parent) = dom_tree.idom_of(block) else {
                continue;
            };
            debug_assert!(func.is_block_live(block));
            tree.nodes[block].parent = parent.into();
            tree.nodes[block].sibling = tree.nodes[parent].child;
            tree.nodes[parent].child = block.into();
        }

        tree.number(root);
        tree
    }

    /// Assigns `entry` on the way down and `exit` on the way up; numbers
    /// start at 1 so that 0 marks blocks outside the tree.
    fn number(&mut self, root: BlockId) {
        let mut n = 0;
        let mut stack = vec![(root, false)];
        while let Some((block, done)) = stack.pop() {
            n += 1;
            if done {
                self.nodes[block].exit = n;
                continue;
            }
            self.nodes[block].entry = n;
            stack.push((block, true));

            let mut children = Vec::new();
            let mut child = self.nodes[block].child.expand();
            while let Some(c) = child {
                children.push(c);
                child = self.nodes[c].sibling.expand();
            }
            stack.extend(children.into_iter().rev().map(|c| (c, false)));
        }
    }

    /// CFG version of the function this tree was computed from.
    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn root(&self) -> Option<BlockId> {
        self.root.expand()
    }

    pub fn parent(&self, block: BlockId) -> Option<BlockId> {
        self.nodes[block].parent.expand()
    }

    /// First child of `block` in the dominator tree. Children are ordered by
    /// block id.
    pub fn child(&self, block: BlockId) -> Option<BlockId> {
        self.nodes[block].child.expand()
    }

    /// Next sibling of `block` in its parent's child list.
    pub fn sibling(&self, block: BlockId) -> Option<BlockId> {
        self.nodes[block].sibling.expand()
    }

    pub fn children(&self, block: BlockId) -> impl Iterator<Item = BlockId> + '_ {
        std::iter::successors(self.child(block), move |&c| self.sibling(c))
    }

    pub fn entry(&self, block: BlockId) -> u32 {
        self.nodes[block].entry
    }

    pub fn exit(&self, block: BlockId) -> u32 {
        self.nodes[block].exit
    }

    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.nodes[block].entry != 0
    }

    /// Returns `true` if `x` dominates `y`.
    pub fn is_ancestor_eq(&self, x: BlockId, y: BlockId) -> bool {
        if x == y {
            return true;
        }
        let (x, y) = (&self.nodes[x], &self.nodes[y]);
        x.entry != 0 && y.entry != 0 && x.entry <= y.entry && y.exit <= x.exit
    }

    /// Returns `true` if `x` strictly dominates `y`.
    pub fn is_ancestor(&self, x: BlockId, y: BlockId) -> bool {
        x != y && self.is_ancestor_eq(x, y)
    }

    /// Nearest block dominating both `x` and `y`.
    pub fn common_ancestor(&self, x: BlockId, y: BlockId) -> Option<BlockId> {
        let mut a = Some(x);
        while let Some(b) = a {
            if self.is_ancestor_eq(b, y) {
                return Some(b);
            }
            a = self.parent(b);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use crate::{builder::test_util::*, Opcode, Type};

    #[test]
    fn numbering_nests() {
        let mut f = fun(
            "nest",
            &[
                bloc(
                    "a",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    br_if("c", "b", "c"),
                ),
                bloc("b", [], goto("d")),
                bloc("c", [], goto("d")),
                bloc("d", [], exit("mem")),
                bloc("dead", [], goto("d")),
            ],
        );
        let tree = f.func.sparse_tree();
        let [a, b, c, d, dead] = f.blocks(["a", "b", "c", "d", "dead"]);

        assert_eq!(tree.root(), Some(a));
        assert!(b < c && c < d);
        assert_eq!(tree.children(a).collect::<Vec<_>>(), vec![b, c, d]);
        assert_eq!(tree.child(a), Some(b));
        assert_eq!(tree.sibling(b), Some(c));
        assert_eq!(tree.parent(d), Some(a));
        assert!(tree.entry(a) < tree.entry(b));
        assert!(tree.exit(b) < tree.exit(a));
        assert!(tree.is_ancestor(a, d));
        assert!(!tree.is_ancestor_eq(b, d));
        assert!(!tree.is_reachable(dead));
        assert!(!tree.is_ancestor_eq(a, dead));
        assert_eq!(tree.common_ancestor(b, c), Some(a));
        assert_eq!(tree.common_ancestor(b, b), Some(b));
    }

    #[test]
    fn cache_is_invalidated() {
        let mut f = fun(
            "inval",
            &[
                bloc(
                    "a",
                    [valu("mem", Opcode::InitMem, Type::Mem, &[])],
                    goto("b"),
                ),
                bloc("b", [], exit("mem")),
            ],
        );
        let before = f.func.sparse_tree();
        assert!(std::sync::Arc::ptr_eq(&before, &f.func.sparse_tree()));

        let [a, b] = f.blocks(["a", "b"]);
        let c = f.func.new_block(crate::BlockKind::Plain);
        f.func.redirect_succ(a, 0, c);
        f.func.add_edge_to(c, b);

        let after = f.func.sparse_tree();
        assert_ne!(before.version(), after.version());
        assert_eq!(after.parent(b), Some(c));
        f.func.assert_fresh(after.version(), "sparse tree");
    }
}
