use cantata_ir::{BlockId, Func};

/// Splits every edge whose source has several successors and whose target
/// has several predecessors, so that edge fixup code always has a block of its
/// own to go to.
#[derive(Debug, Default)]
pub struct CriticalEdgeSplitter {
    critical_edges: Vec<CriticalEdge>,
}

impl CriticalEdgeSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of split edges.
    pub fn run(&mut self, func: &mut Func) -> usize {
        self.clear();

        for block in func.iter_blocks() {
            self.add_critical_edges(block, func);
        }

        let edges = std::mem::take(&mut self.critical_edges);
        let split = edges.len();
        for edge in edges {
            self.split_edge(edge, func);
        }
        func.no_critical_edges = true;
        split
    }

    pub fn clear(&mut self) {
        self.critical_edges.clear();
    }

    fn add_critical_edges(&mut self, block: BlockId, func: &Func) {
        let data = func.block(block);
        if data.succ_num() < 2 {
            return;
        }

        for (idx, succ) in data.succs().iter().enumerate() {
            if func.block(succ.block).pred_num() > 1 {
                self.critical_edges.push(CriticalEdge { from: block, idx });
            }
        }
    }

    fn split_edge(&mut self, edge: CriticalEdge, func: &mut Func) {
        let to = func.block(edge.from).succ(edge.idx);
        let mid = func.split_edge(edge.from, edge.idx);
        log::trace!("split {} -> {to} with {mid}", edge.from);
    }
}

/// The `idx`-th successor edge of `from`. Splitting keeps successor indices
/// stable, so recorded edges stay valid while others are split.
#[derive(Debug, Clone, Copy)]
struct CriticalEdge {
    from: BlockId,
    idx: usize,
}

#[cfg(test)]
mod tests {
    use cantata_ir::{builder::test_util::*, check_func, Opcode, Type};

    use super::*;

    #[test]
    fn critical_edge_basic() {
        let mut f = fun(
            "basic",
            &[
                bloc(
                    "a",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    br_if("c", "c", "b"),
                ),
                bloc("b", [], goto("c")),
                bloc("c", [], exit("mem")),
            ],
        );
        assert_eq!(CriticalEdgeSplitter::new().run(&mut f.func), 1);

        insta::assert_snapshot!(f.dump(), @r"
        func %basic() {
            b0:
                v0 = InitMem <mem>
                v1 = Const <i1> [0]
                If v1 -> b3 b1
            b1: <- b0
                Plain -> b2
            b2: <- b3 b1
                Exit v0
            b3: <- b0
                Plain -> b2
        }
        ");
        assert_eq!(check_func(&f.func), Ok(()));
    }

    #[test]
    fn critical_edge_phi() {
        let mut f = fun(
            "phi",
            &[
                bloc(
                    "a",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu_i("one", Opcode::Const, Type::I64, 1, &[]),
                    ],
                    goto("b"),
                ),
                bloc(
                    "b",
                    [
                        valu("p", Opcode::Phi, Type::I64, &["one", "sum"]),
                        valu("sum", Opcode::Add, Type::I64, &["p", "one"]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    br_if("c", "exit", "b"),
                ),
                bloc("exit", [], exit("mem")),
            ],
        );
        CriticalEdgeSplitter::new().run(&mut f.func);

        let [a, b] = f.blocks(["a", "b"]);
        let latch = f.func.block(b).succ(1);
        assert_ne!(latch, b);
        assert_eq!(f.func.block(b).preds()[0].block, a);
        assert_eq!(f.func.block(b).preds()[1].block, latch);

        // The phi still takes `sum` from the (now split) back edge.
        let p = f.value("p");
        assert_eq!(f.func.value(p).arg(1), f.value("sum"));
        assert_eq!(check_func(&f.func), Ok(()));
    }

    #[test]
    fn critical_edge_to_same_block() {
        let mut f = fun(
            "same",
            &[
                bloc(
                    "a",
                    [
                        valu("mem", Opcode::InitMem, Type::Mem, &[]),
                        valu("c", Opcode::Const, Type::I1, &[]),
                    ],
                    br_if("c", "d", "d"),
                ),
                bloc("d", [], exit("mem")),
            ],
        );
        assert_eq!(CriticalEdgeSplitter::new().run(&mut f.func), 2);
        let a = f.block("a");
        let succs: Vec<_> = f.func.block(a).succs().iter().map(|e| e.block).collect();
        assert_ne!(succs[0], succs[1]);
        assert_eq!(check_func(&f.func), Ok(()));
    }
}
