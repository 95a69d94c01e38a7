pub mod bitset;
pub mod critical_edge;
pub mod deadcode;
pub mod debug;
pub mod error;
pub mod layout;
pub mod loop_analysis;
pub mod lower;
pub mod pipeline;
pub mod regalloc;
pub mod schedule;
pub mod stackalloc;
pub mod stackmap;

pub use error::CompileError;
pub use pipeline::{compile, compile_all, CompiledFunc, Stats};
pub use regalloc::{regalloc, verify, RegallocStats, VerifyError};
pub use stackmap::{StackMapSlot, StackMaps};
