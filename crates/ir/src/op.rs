//! Opcodes and their static properties.
//!
//! The graph layer never interprets an opcode; passes consult [`OpInfo`] for
//! the handful of properties they need (arity, memory effects, whether the
//! operation is a call or a GC safe point, ...).
use std::fmt;

/// Side effect of an operation on memory state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SideEffect {
    None,
    Read,
    Write,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpInfo {
    pub name: &'static str,
    /// Number of arguments, or `-1` if the operation is variadic.
    pub arg_len: i8,
    pub side_effect: SideEffect,
    /// The operation clobbers every caller-saved register.
    pub call: bool,
    /// The operation may observe a garbage collection.
    pub safe_point: bool,
    pub clobber_flags: bool,
    /// The result must be allocated to the same register as the first argument.
    pub result_in_arg0: bool,
    /// The value can be recomputed anywhere instead of being spilled.
    pub rematerializable: bool,
    pub commutative: bool,
    /// The operation emits no machine code by itself.
    pub zero_width: bool,
    /// The operation must be kept even if its result is unused.
    pub has_side_effects: bool,
}

impl OpInfo {
    const fn new(name: &'static str, arg_len: i8) -> Self {
        Self {
            name,
            arg_len,
            side_effect: SideEffect::None,
            call: false,
            safe_point: false,
            clobber_flags: false,
            result_in_arg0: false,
            rematerializable: false,
            commutative: false,
            zero_width: false,
            has_side_effects: false,
        }
    }

    const fn read(self) -> Self {
        Self {
            side_effect: SideEffect::Read,
            ..self
        }
    }

    const fn write(self) -> Self {
        Self {
            side_effect: SideEffect::Write,
            has_side_effects: true,
            ..self
        }
    }

    const fn call(self) -> Self {
        Self {
            call: true,
            safe_point: true,
            clobber_flags: true,
            ..self
        }
    }

    const fn safe_point(self) -> Self {
        Self {
            safe_point: true,
            ..self
        }
    }

    const fn clobber_flags(self) -> Self {
        Self {
            clobber_flags: true,
            ..self
        }
    }

    const fn result_in_arg0(self) -> Self {
        Self {
            result_in_arg0: true,
            ..self
        }
    }

    const fn remat(self) -> Self {
        Self {
            rematerializable: true,
            ..self
        }
    }

    const fn commutative(self) -> Self {
        Self {
            commutative: true,
            ..self
        }
    }

    const fn zero_width(self) -> Self {
        Self {
            zero_width: true,
            ..self
        }
    }

    const fn side_effects(self) -> Self {
        Self {
            has_side_effects: true,
            ..self
        }
    }
}

macro_rules! define_opcodes {
    ($($(#[$attr:meta])* $name:ident => $text:literal, $arg_len:literal $(, $flag:ident)*;)*) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
        pub enum Opcode {
            #[default]
            Invalid,
            $($(#[$attr])* $name,)*
        }

        impl Opcode {
            pub const ALL: &'static [Opcode] = &[$(Opcode::$name),*];

            pub fn info(self) -> &'static OpInfo {
                const INVALID: OpInfo = OpInfo::new("Invalid", 0);
                match self {
                    Opcode::Invalid => &INVALID,
                    $(Opcode::$name => {
                        const INFO: OpInfo = OpInfo::new($text, $arg_len)$(.$flag())*;
                        &INFO
                    })*
                }
            }
        }
    };
}

define_opcodes! {
    /// Initial memory state of the function.
    InitMem => "InitMem", 0, zero_width;
    /// Incoming parameter; `aux_int` is the parameter index in the ABI.
    Arg => "Arg", 0, zero_width;
    Phi => "Phi", -1, zero_width;

    Copy => "Copy", 1;
    /// Spill of the argument to a stack slot.
    StoreReg => "StoreReg", 1;
    /// Restore of a spilled value into a register.
    LoadReg => "LoadReg", 1;

    /// Integer constant held in `aux_int`.
    Const => "Const", 0, remat;
    ConstNil => "ConstNil", 0, remat;
    /// Address of the symbol held in `aux`.
    Addr => "Addr", 0, remat;

    Add => "Add", 2, commutative, clobber_flags, result_in_arg0;
    Sub => "Sub", 2, clobber_flags, result_in_arg0;
    Mul => "Mul", 2, commutative, clobber_flags, result_in_arg0;
    And => "And", 2, commutative, clobber_flags, result_in_arg0;
    Or => "Or", 2, commutative, clobber_flags, result_in_arg0;
    Xor => "Xor", 2, commutative, clobber_flags, result_in_arg0;
    Shl => "Shl", 2, clobber_flags, result_in_arg0;
    Shr => "Shr", 2, clobber_flags, result_in_arg0;
    Neg => "Neg", 1, clobber_flags, result_in_arg0;
    Not => "Not", 1, result_in_arg0;
    /// Adds `aux_int` to the argument.
    AddConst => "AddConst", 1, clobber_flags, result_in_arg0;
    FAdd => "FAdd", 2, commutative, result_in_arg0;
    FMul => "FMul", 2, commutative, result_in_arg0;
    /// Pointer plus the constant offset in `aux_int`.
    OffPtr => "OffPtr", 1;

    /// Compares two integers and produces flags.
    Cmp => "Cmp", 2, clobber_flags;
    /// Materializes the condition held in `aux` from flags.
    SetCond => "SetCond", 1;

    /// `Load ptr mem`.
    Load => "Load", 2, read;
    /// `Store ptr val mem`, produces memory.
    Store => "Store", 3, write;
    /// `Zero ptr mem` clears `aux_int` bytes, produces memory.
    Zero => "Zero", 2, write, clobber_flags;

    /// Call described by the `aux` call descriptor; the last argument is memory.
    Call => "Call", -1, write, call;
    /// Result `aux_int` of the call argument.
    CallResult => "CallResult", 1, zero_width;
    /// Allocates a heap object of `aux_int` bytes, `NewObject mem`.
    NewObject => "NewObject", 1, read, call;
    /// Cooperative preemption check, `Preempt mem`, produces memory.
    Preempt => "Preempt", 1, write, safe_point, side_effects;

    /// Packs the function results and final memory for a return block.
    MakeResult => "MakeResult", -1, zero_width;
}

impl Opcode {
    pub fn name(self) -> &'static str {
        self.info().name
    }

    pub fn is_call(self) -> bool {
        self.info().call
    }

    pub fn is_safe_point(self) -> bool {
        self.info().safe_point
    }

    pub fn side_effect(self) -> SideEffect {
        self.info().side_effect
    }

    pub fn is_rematerializable(self) -> bool {
        self.info().rematerializable
    }

    pub fn result_in_arg0(self) -> bool {
        self.info().result_in_arg0
    }

    pub fn clobbers_flags(self) -> bool {
        self.info().clobber_flags
    }

    pub fn has_side_effects(self) -> bool {
        self.info().has_side_effects
    }

    pub fn is_commutative(self) -> bool {
        self.info().commutative
    }

    /// Returns `true` for values that are available on block entry.
    pub fn is_entry_value(self) -> bool {
        matches!(self, Self::Phi | Self::Arg | Self::InitMem)
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
