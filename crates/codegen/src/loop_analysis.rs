//! Natural loop nesting, used to keep spills out of loops.
use cranelift_entity::{entity_impl, packed_option::PackedOption, PrimaryMap, SecondaryMap};

use cantata_ir::{BlockId, DomTree, Func};

#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Loop(u32);
entity_impl!(Loop, "loop");

#[derive(Debug, Clone)]
struct LoopData {
    header: BlockId,
    parent: PackedOption<Loop>,
    depth: u32,
}

#[derive(Debug, Default)]
pub struct LoopTree {
    /// Numbered in reverse postorder of their headers, so an enclosing loop
    /// always has a lower number than the loops nested in it.
    loops: PrimaryMap<Loop, LoopData>,
    /// Innermost loop of every block.
    innermost: SecondaryMap<BlockId, PackedOption<Loop>>,
}

impl LoopTree {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compute(&mut self, func: &Func, dom_tree: &DomTree) {
        self.loops.clear();
        self.innermost.clear();

        // A block is a header if it dominates one of its predecessors.
        for &block in dom_tree.rpo() {
            let is_header = func
                .block(block)
                .preds()
                .iter()
                .any(|e| dom_tree.dominates(block, e.block));
            if is_header {
                self.loops.push(LoopData {
                    header: block,
                    parent: None.into(),
                    depth: 0,
                });
            }
        }

        // Inner loops claim their blocks first; an outer loop that reaches a
        // claimed block adopts the outermost loop around it.
        let mut stack = Vec::new();
        for lp in self.loops.keys().rev() {
            let header = self.loops[lp].header;
            stack.extend(
                func.block(header)
                    .preds()
                    .iter()
                    .map(|e| e.block)
                    .filter(|&b| dom_tree.dominates(header, b)),
            );
            while let Some(block) = stack.pop() {
                let next = match self.innermost[block].expand() {
                    None => {
                        self.innermost[block] = lp.into();
                        if block == header {
                            continue;
                        }
                        block
                    }
                    Some(inner) => {
                        let top = self.outermost(inner);
                        if top == lp {
                            continue;
                        }
                        self.loops[top].parent = lp.into();
                        self.loops[top].header
                    }
                };
                stack.extend(func.block(next).preds().iter().map(|e| e.block));
            }
        }

        for lp in self.loops.keys() {
            let depth = self.parent(lp).map_or(0, |p| self.loops[p].depth);
            self.loops[lp].depth = depth + 1;
        }
    }

    pub fn len(&self) -> usize {
        self.loops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.loops.is_empty()
    }

    pub fn header(&self, lp: Loop) -> BlockId {
        self.loops[lp].header
    }

    pub fn parent(&self, lp: Loop) -> Option<Loop> {
        self.loops[lp].parent.expand()
    }

    pub fn loop_of(&self, block: BlockId) -> Option<Loop> {
        self.innermost[block].expand()
    }

    /// Number of loops containing `block`.
    pub fn depth(&self, block: BlockId) -> u32 {
        self.loop_of(block).map_or(0, |lp| self.loops[lp].depth)
    }

    fn outermost(&self, mut lp: Loop) -> Loop {
        while let Some(p) = self.parent(lp) {
            lp = p;
        }
        lp
    }
}
