pub mod aux;
pub mod block;
pub mod builder;
pub mod cfg;
pub mod check;
pub mod config;
pub mod domtree;
pub mod func;
pub mod ir_writer;
pub mod location;
pub mod op;
pub mod sparse_tree;
pub mod types;
pub mod value;

mod cache;

pub use aux::{Aux, CallDesc, Cond, Symbol};
pub use block::{Block, BlockId, BlockKind, BranchPrediction, Edge};
pub use builder::FunctionBuilder;
pub use cache::Cache;
pub use check::{check_func, CheckError};
pub use config::{
    Abi, AbiLoc, AbiParam, Config, InvalidPhaseOption, InvalidRegisterFile, PassOptions,
    PhaseOptions, Register, RegisterFile,
};
pub use domtree::DomTree;
pub use func::{FrameLayout, Func};
pub use location::{LocalSlot, Location, RegMask, RegNum, SlotId, SlotKey, VarData, VarId, VarKind};
pub use op::{OpInfo, Opcode, SideEffect};
pub use sparse_tree::SparseTree;
pub use types::Type;
pub use value::{Pos, Value, ValueId};

pub use cantata_triple as triple;
