mod func_builder;

pub use func_builder::FunctionBuilder;

/// A declarative function builder for tests:
///
/// ```
/// use cantata_ir::{builder::test_util::*, Opcode, Type};
///
/// let f = fun(
///     "diamond",
///     &[
///         bloc(
///             "entry",
///             [
///                 valu("mem", Opcode::InitMem, Type::Mem, &[]),
///                 valu("c", Opcode::Const, Type::I1, &[]),
///             ],
///             br_if("c", "then", "exit"),
///         ),
///         bloc("then", [], goto("exit")),
///         bloc("exit", [], exit("mem")),
///     ],
/// );
/// assert_eq!(f.func.num_blocks(), 3);
/// ```
pub mod test_util {
    use std::sync::Arc;

    use cantata_triple::TargetTriple;
    use rustc_hash::FxHashMap;

    use crate::{
        ir_writer::FuncWriter, Abi, Aux, BlockId, BlockKind, Config, Func, Opcode, RegisterFile,
        Type, ValueId,
    };

    pub struct Valu {
        name: String,
        op: Opcode,
        ty: Type,
        aux: Aux,
        aux_int: i64,
        args: Vec<String>,
    }

    pub fn valu(name: &str, op: Opcode, ty: Type, args: &[&str]) -> Valu {
        valu_ia(name, op, ty, 0, Aux::None, args)
    }

    pub fn valu_i(name: &str, op: Opcode, ty: Type, aux_int: i64, args: &[&str]) -> Valu {
        valu_ia(name, op, ty, aux_int, Aux::None, args)
    }

    pub fn valu_a(name: &str, op: Opcode, ty: Type, aux: Aux, args: &[&str]) -> Valu {
        valu_ia(name, op, ty, 0, aux, args)
    }

    pub fn valu_ia(
        name: &str,
        op: Opcode,
        ty: Type,
        aux_int: i64,
        aux: Aux,
        args: &[&str],
    ) -> Valu {
        Valu {
            name: name.to_string(),
            op,
            ty,
            aux,
            aux_int,
            args: args.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub enum Ctrl {
        Goto(String),
        If(String, String, String),
        Ret(String),
        Exit(String),
    }

    pub fn goto(dest: &str) -> Ctrl {
        Ctrl::Goto(dest.to_string())
    }

    pub fn br_if(cond: &str, then_block: &str, else_block: &str) -> Ctrl {
        Ctrl::If(
            cond.to_string(),
            then_block.to_string(),
            else_block.to_string(),
        )
    }

    /// Return block whose control is the `MakeResult` value `result`.
    pub fn ret(result: &str) -> Ctrl {
        Ctrl::Ret(result.to_string())
    }

    pub fn exit(mem: &str) -> Ctrl {
        Ctrl::Exit(mem.to_string())
    }

    pub struct Bloc {
        name: String,
        values: Vec<Valu>,
        ctrl: Ctrl,
    }

    pub fn bloc<const N: usize>(name: &str, values: [Valu; N], ctrl: Ctrl) -> Bloc {
        Bloc {
            name: name.to_string(),
            values: values.into(),
            ctrl,
        }
    }

    pub struct TestFunc {
        pub func: Func,
        blocks: FxHashMap<String, BlockId>,
        values: FxHashMap<String, ValueId>,
    }

    impl TestFunc {
        pub fn block(&self, name: &str) -> BlockId {
            match self.blocks.get(name) {
                Some(b) => *b,
                None => panic!("no block named {name}"),
            }
        }

        pub fn blocks<const N: usize>(&self, names: [&str; N]) -> [BlockId; N] {
            names.map(|name| self.block(name))
        }

        pub fn value(&self, name: &str) -> ValueId {
            match self.values.get(name) {
                Some(v) => *v,
                None => panic!("no value named {name}"),
            }
        }

        pub fn dump(&self) -> String {
            dump_func(&self.func)
        }
    }

    pub fn test_config() -> Arc<Config> {
        let triple = TargetTriple::parse("amd64-linux-register").unwrap();
        Arc::new(Config::new(triple))
    }

    /// A config with `gp_num` general purpose registers, see
    /// [`RegisterFile::small`]. Panics on a register count it rejects.
    pub fn small_config(gp_num: u8) -> Arc<Config> {
        let triple = TargetTriple::parse("amd64-linux-register").unwrap();
        let regs = RegisterFile::small(gp_num).unwrap_or_else(|err| panic!("{err}"));
        Arc::new(Config::new(triple).with_regs(regs))
    }

    pub fn fun(name: &str, blocs: &[Bloc]) -> TestFunc {
        fun_with(test_config(), Abi::default(), name, blocs)
    }

    /// Builds a function from `blocs`; the first one is the entry block.
    ///
    /// Edges are added in the order the blocks are listed, so phi arguments
    /// follow the order in which predecessors appear.
    pub fn fun_with(config: Arc<Config>, abi: Abi, name: &str, blocs: &[Bloc]) -> TestFunc {
        let mut func = Func::new(name, config, abi);
        let mut blocks = FxHashMap::default();
        let mut values = FxHashMap::default();

        for bloc in blocs {
            let b = func.new_block(BlockKind::Invalid);
            assert!(
                blocks.insert(bloc.name.clone(), b).is_none(),
                "duplicate block {}",
                bloc.name
            );
        }

        for bloc in blocs {
            let b = blocks[&bloc.name];
            for valu in &bloc.values {
                let v = func.new_value(b, valu.op, valu.ty, valu.aux.clone(), valu.aux_int, &[]);
                assert!(
                    values.insert(valu.name.clone(), v).is_none(),
                    "duplicate value {}",
                    valu.name
                );
            }
        }

        let lookup = |values: &FxHashMap<String, ValueId>, name: &str| match values.get(name) {
            Some(v) => *v,
            None => panic!("no value named {name}"),
        };

        for bloc in blocs {
            for valu in &bloc.values {
                let v = values[&valu.name];
                for arg in &valu.args {
                    let arg = lookup(&values, arg);
                    func.add_arg(v, arg);
                }
            }
        }

        for bloc in blocs {
            let b = blocks[&bloc.name];
            let block_of = |name: &str| match blocks.get(name) {
                Some(b) => *b,
                None => panic!("no block named {name}"),
            };
            match &bloc.ctrl {
                Ctrl::Goto(dest) => {
                    func.reset(b, BlockKind::Plain);
                    func.add_edge_to(b, block_of(dest));
                }
                Ctrl::If(cond, then_block, else_block) => {
                    func.reset(b, BlockKind::If);
                    func.set_control(b, lookup(&values, cond));
                    func.add_edge_to(b, block_of(then_block));
                    func.add_edge_to(b, block_of(else_block));
                }
                Ctrl::Ret(result) => {
                    func.reset(b, BlockKind::Ret);
                    func.set_control(b, lookup(&values, result));
                }
                Ctrl::Exit(mem) => {
                    func.reset(b, BlockKind::Exit);
                    func.set_control(b, lookup(&values, mem));
                }
            }
        }

        TestFunc {
            func,
            blocks,
            values,
        }
    }

    pub fn dump_func(func: &Func) -> String {
        FuncWriter::new(func).dump_string()
    }
}
