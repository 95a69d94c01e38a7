//! This module contains the value types understood by the back end.
use std::fmt;

/// Type of an SSA value.
///
/// Aggregates never reach this layer as a whole: the frontend decomposes them
/// into pieces, each with its own [`crate::LocalSlot`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Type {
    #[default]
    Void,
    I1,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// A pointer into the garbage-collected heap.
    Ptr,
    /// An untraced machine address (stack or static data).
    Uintptr,
    /// Memory state threaded through memory operations.
    Mem,
    /// Condition codes produced by comparisons.
    Flags,
}

impl Type {
    /// Size in bytes of a value of this type when stored in memory.
    pub fn size(self) -> u32 {
        match self {
            Self::Void | Self::Mem | Self::Flags => 0,
            Self::I1 | Self::I8 => 1,
            Self::I16 => 2,
            Self::I32 | Self::F32 => 4,
            Self::I64 | Self::F64 | Self::Ptr | Self::Uintptr => 8,
        }
    }

    pub fn align(self) -> u32 {
        self.size().max(1)
    }

    pub fn is_ptr(self) -> bool {
        self == Self::Ptr
    }

    pub fn is_mem(self) -> bool {
        self == Self::Mem
    }

    pub fn is_flags(self) -> bool {
        self == Self::Flags
    }

    pub fn is_void(self) -> bool {
        self == Self::Void
    }

    pub fn is_float(self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    pub fn is_integral(self) -> bool {
        matches!(
            self,
            Self::I1 | Self::I8 | Self::I16 | Self::I32 | Self::I64 | Self::Uintptr
        )
    }

    /// Returns `true` if values of this type occupy a general purpose or
    /// floating point register.
    pub fn needs_reg(self) -> bool {
        !matches!(self, Self::Void | Self::Mem | Self::Flags)
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Void => "void",
            Self::I1 => "i1",
            Self::I8 => "i8",
            Self::I16 => "i16",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Ptr => "ptr",
            Self::Uintptr => "uintptr",
            Self::Mem => "mem",
            Self::Flags => "flags",
        };
        write!(f, "{s}")
    }
}
