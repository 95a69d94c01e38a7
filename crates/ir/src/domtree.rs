//! This module contains dominator tree related structs.
//!
//! The algorithm is based on Keith D. Cooper., Timothy J. Harvey., and Ken Kennedy.: A Simple, Fast Dominance Algorithm:
//! <https://www.cs.rice.edu/~keith/EMBED/dom.pdf>
//!
//! The iterative formulation converges on irreducible control flow as well.

use cranelift_entity::{packed_option::PackedOption, SecondaryMap};

use crate::{cfg, BlockId, Func};

#[derive(Default, Debug)]
pub struct DomTree {
    doms: SecondaryMap<BlockId, PackedOption<BlockId>>,
    rpo: Vec<BlockId>,
    rpo_nums: SecondaryMap<BlockId, u32>,
    version: u64,
}

impl DomTree {
    pub fn compute(func: &Func) -> Self {
        let mut tree = Self {
            version: func.cfg_version(),
            ..Self::default()
        };

        tree.rpo = cfg::reverse_post_order(func);

        let block_num = tree.rpo.len();
        for (i, &block) in tree.rpo.iter().enumerate() {
            tree.rpo_nums[block] = (block_num - i) as u32;
        }

        match tree.rpo.first() {
            Some(&entry) => tree.doms[entry] = entry.into(),
            None => return tree,
        }

        let mut changed = true;
        while changed {
            changed = false;
            for &block in tree.rpo.iter().skip(1) {
                let preds = func.block(block).preds();
                let processed_pred = match preds
                    .iter()
                    .find(|pred| tree.doms[pred.block].is_some())
                {
                    Some(pred) => pred.block,
                    _ => continue,
                };
                let mut new_dom = processed_pred;

                for pred in preds {
                    if pred.block != processed_pred && tree.doms[pred.block].is_some() {
                        new_dom = tree.intersect(new_dom, pred.block);
                    }
                }
                if Some(new_dom) != tree.doms[block].expand() {
                    changed = true;
                    tree.doms[block] = new_dom.into();
                }
            }
        }

        tree
    }

    /// CFG version of the function this tree was computed from.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Returns the immediate dominator of the `block`.
    /// Returns None if the `block` is unreachable from the entry block, or the `block` is the entry block itself.
    pub fn idom_of(&self, block: BlockId) -> Option<BlockId> {
        if self.rpo.first() == Some(&block) {
            return None;
        }
        self.doms[block].expand()
    }

    /// Returns `true` if block1 strictly dominates block2.
    pub fn strictly_dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        let mut current_block = block2;
        while let Some(block) = self.idom_of(current_block) {
            if block == block1 {
                return true;
            }
            current_block = block;
        }

        false
    }

    /// Returns `true` if block1 dominates block2.
    pub fn dominates(&self, block1: BlockId, block2: BlockId) -> bool {
        if block1 == block2 {
            return true;
        }

        self.strictly_dominates(block1, block2)
    }

    /// Returns `true` if block is reachable from the entry block.
    pub fn is_reachable(&self, block: BlockId) -> bool {
        self.rpo.first() == Some(&block) || self.idom_of(block).is_some()
    }

    /// Returns blocks in RPO.
    pub fn rpo(&self) -> &[BlockId] {
        &self.rpo
    }

    fn intersect(&self, mut b1: BlockId, mut b2: BlockId) -> BlockId {
        while b1 != b2 {
            while self.rpo_nums[b1] < self.rpo_nums[b2] {
                b1 = self.doms[b1].unwrap();
            }
            while self.rpo_nums[b2] < self.rpo_nums[b1] {
                b2 = self.doms[b2].unwrap();
            }
        }

        b1
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::many_single_char_names)]

    use super::*;
    use crate::{builder::test_util::*, Opcode, Type};

    fn cond() -> [Valu; 2] {
        [
            valu("mem", Opcode::InitMem, Type::Mem, &[]),
            valu("c", Opcode::Const, Type::I1, &[]),
        ]
    }

    #[test]
    fn dom_tree_if_else() {
        let func = fun(
            "if_else",
            &[
                bloc("entry", cond(), br_if("c", "then", "else")),
                bloc("then", [], goto("merge")),
                bloc("else", [], goto("merge")),
                bloc("merge", [], exit("mem")),
            ],
        );
        let dom_tree = DomTree::compute(&func.func);
        let [entry, then_block, else_block, merge] = func.blocks(["entry", "then", "else", "merge"]);

        assert_eq!(dom_tree.idom_of(entry), None);
        assert_eq!(dom_tree.idom_of(then_block), Some(entry));
        assert_eq!(dom_tree.idom_of(else_block), Some(entry));
        assert_eq!(dom_tree.idom_of(merge), Some(entry));
        assert!(dom_tree.is_reachable(entry));
    }

    #[test]
    fn unreachable_edge() {
        let func = fun(
            "unreachable",
            &[
                bloc("a", cond(), br_if("c", "b", "c")),
                bloc("b", [], goto("e")),
                bloc("c", [], goto("e")),
                bloc("d", [], goto("e")),
                bloc("e", [], exit("mem")),
            ],
        );
        let dom_tree = DomTree::compute(&func.func);
        let [a, b, c, d, e] = func.blocks(["a", "b", "c", "d", "e"]);

        assert_eq!(dom_tree.idom_of(a), None);
        assert_eq!(dom_tree.idom_of(b), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), None);
        assert!(!dom_tree.is_reachable(d));
        assert_eq!(dom_tree.idom_of(e), Some(a));
    }

    #[test]
    fn dom_tree_complex() {
        let func = fun(
            "complex",
            &[
                bloc("a", cond(), br_if("c", "c_", "b")),
                bloc("b", [], br_if("c", "g", "d")),
                bloc("c_", [], br_if("c", "h", "e")),
                bloc("d", [], br_if("c", "g", "f")),
                bloc("e", [], br_if("c", "h", "c_")),
                bloc("f", [], br_if("c", "k", "i")),
                bloc("g", [], goto("j")),
                bloc("h", [], goto("m")),
                bloc("i", [], goto("l")),
                bloc("j", [], goto("i")),
                bloc("k", [], goto("l")),
                bloc("l", [], br_if("c", "m", "b")),
                bloc("m", [], exit("mem")),
            ],
        );
        let dom_tree = DomTree::compute(&func.func);
        let [a, b, c, d, e, f, g, h, i, j, k, l, m] = func.blocks([
            "a", "b", "c_", "d", "e", "f", "g", "h", "i", "j", "k", "l", "m",
        ]);

        assert_eq!(dom_tree.idom_of(a), None);
        assert_eq!(dom_tree.idom_of(b), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), Some(b));
        assert_eq!(dom_tree.idom_of(e), Some(c));
        assert_eq!(dom_tree.idom_of(f), Some(d));
        assert_eq!(dom_tree.idom_of(g), Some(b));
        assert_eq!(dom_tree.idom_of(h), Some(c));
        assert_eq!(dom_tree.idom_of(i), Some(b));
        assert_eq!(dom_tree.idom_of(j), Some(g));
        assert_eq!(dom_tree.idom_of(k), Some(f));
        assert_eq!(dom_tree.idom_of(l), Some(b));
        assert_eq!(dom_tree.idom_of(m), Some(a));
    }

    #[test]
    fn irreducible_loop() {
        // b and c form a loop with two entries.
        let func = fun(
            "irreducible",
            &[
                bloc("a", cond(), br_if("c", "b", "c")),
                bloc("b", [], br_if("c", "c", "d")),
                bloc("c", [], br_if("c", "b", "d")),
                bloc("d", [], exit("mem")),
            ],
        );
        let dom_tree = DomTree::compute(&func.func);
        let [a, b, c, d] = func.blocks(["a", "b", "c", "d"]);

        assert_eq!(dom_tree.idom_of(b), Some(a));
        assert_eq!(dom_tree.idom_of(c), Some(a));
        assert_eq!(dom_tree.idom_of(d), Some(a));
        assert!(!dom_tree.dominates(b, c));
        assert!(!dom_tree.dominates(c, b));
        assert!(dom_tree.strictly_dominates(a, d));
        assert!(!dom_tree.strictly_dominates(a, a));
    }
}
