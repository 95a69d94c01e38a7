//! Block orderings over the successor edges of a function.
use cranelift_entity::SecondaryMap;

use crate::{BlockId, Func};

/// Returns the blocks reachable from the entry in postorder.
pub fn post_order(func: &Func) -> Vec<BlockId> {
    CfgPostOrder::new(func).collect()
}

/// Returns the blocks reachable from the entry in reverse postorder.
pub fn reverse_post_order(func: &Func) -> Vec<BlockId> {
    let mut rpo = post_order(func);
    rpo.reverse();
    rpo
}

/// Returns a map from block to `true` for every block reachable from entry.
pub fn reachable_blocks(func: &Func) -> SecondaryMap<BlockId, bool> {
    let mut reachable = SecondaryMap::new();
    for block in CfgPostOrder::new(func) {
        reachable[block] = true;
    }
    reachable
}

/// Iterative depth first walk yielding blocks when all of their successors
/// have been visited. Successors are pushed in reverse so that `succs[0]` is
/// explored first.
pub struct CfgPostOrder<'a> {
    func: &'a Func,
    node_state: SecondaryMap<BlockId, NodeState>,
    stack: Vec<BlockId>,
}

impl<'a> CfgPostOrder<'a> {
    pub fn new(func: &'a Func) -> Self {
        let mut stack = Vec::new();

        if let Some(entry) = func.try_entry() {
            stack.push(entry);
        }

        Self {
            func,
            node_state: SecondaryMap::default(),
            stack,
        }
    }
}

impl<'a> Iterator for CfgPostOrder<'a> {
    type Item = BlockId;

    fn next(&mut self) -> Option<BlockId> {
        while let Some(&block) = self.stack.last() {
            if self.node_state[block].is_unvisited() {
                self.node_state[block].set_visited();
                for succ in self.func.block(block).succs().iter().rev() {
                    if self.node_state[succ.block].is_unvisited() {
                        self.stack.push(succ.block);
                    }
                }
            } else {
                self.stack.pop();
                if !self.node_state[block].has_finished() {
                    self.node_state[block].set_finished();
                    return Some(block);
                }
            }
        }

        None
    }
}

#[derive(Default, Debug, Clone, Copy)]
struct NodeState(u8);

impl NodeState {
    fn is_unvisited(self) -> bool {
        self.0 == 0
    }

    fn has_finished(self) -> bool {
        self.0 == 2
    }

    fn set_visited(&mut self) {
        self.0 = 1;
    }

    fn set_finished(&mut self) {
        self.0 = 2;
    }
}
