//! Target and compilation configuration shared by every function of a
//! compilation session.
use cantata_triple::{Architecture, CallConv, TargetTriple};
use rustc_hash::FxHashMap;
use thiserror::Error;

use crate::{aux::CallDesc, RegMask, RegNum, Type};

#[derive(Debug, Clone)]
pub struct Config {
    pub triple: TargetTriple,
    pub regs: RegisterFile,
    pub options: PhaseOptions,
    /// Whether optimizing passes run. Debug locations of unoptimized functions
    /// use the degenerate parameter-only builder.
    pub optimize: bool,
    /// Functions with more values than this are rejected with a diagnostic.
    pub max_values: usize,
}

impl Config {
    pub const DEFAULT_MAX_VALUES: usize = 1 << 20;

    pub fn new(triple: TargetTriple) -> Self {
        let regs = RegisterFile::for_triple(&triple);
        Self {
            triple,
            regs,
            options: PhaseOptions::default(),
            optimize: true,
            max_values: Self::DEFAULT_MAX_VALUES,
        }
    }

    pub fn with_options(mut self, options: PhaseOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_regs(mut self, regs: RegisterFile) -> Self {
        self.regs = regs;
        self
    }

    pub fn ptr_size(&self) -> u32 {
        self.triple.ptr_size()
    }

    pub fn call_conv(&self) -> CallConv {
        self.triple.abi
    }

    /// Builds the ABI of a function with the given parameter and result types.
    pub fn abi(&self, params: &[(&str, Type)], results: &[Type]) -> Abi {
        Abi::assign(&self.regs, self.call_conv(), params, results)
    }

    /// Builds a call descriptor for a callee following this target's
    /// register convention.
    pub fn call_desc(&self, callee: &str, args: &[Type], results: &[Type]) -> CallDesc {
        let params: Vec<_> = args.iter().map(|ty| ("", *ty)).collect();
        let abi = self.abi(&params, results);

        let arg_regs: Vec<_> = abi.params.iter().filter_map(|p| p.loc.reg()).collect();
        let result_regs: Vec<_> = abi
            .results
            .iter()
            .filter_map(|p| p.loc.reg().map(|reg| (reg, p.ty)))
            .collect();
        CallDesc::new(callee, &arg_regs, &result_regs)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Register {
    pub num: RegNum,
    pub name: String,
}

/// Registers of the target and their roles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegisterFile {
    pub registers: Vec<Register>,
    /// Allocatable general purpose registers.
    pub gp: RegMask,
    /// Allocatable floating point registers.
    pub fp: RegMask,
    /// Registers clobbered by a call.
    pub caller_saved: RegMask,
    pub int_params: Vec<RegNum>,
    pub float_params: Vec<RegNum>,
    pub sp: RegNum,
}

impl RegisterFile {
    /// Fewest general purpose registers the allocator works with.
    pub const MIN_GP: u8 = 3;
    const MAX_SMALL_GP: u8 = 32;

    pub fn for_triple(triple: &TargetTriple) -> Self {
        let mut regs = match triple.architecture {
            Architecture::Amd64 => Self::amd64(),
            Architecture::Arm64 => Self::arm64(),
        };
        if triple.abi == CallConv::Stack {
            regs.int_params.clear();
            regs.float_params.clear();
        }
        regs
    }

    fn from_names(names: &[String]) -> Vec<Register> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| Register {
                num: RegNum(i as u8),
                name: name.clone(),
            })
            .collect()
    }

    pub fn amd64() -> Self {
        const GP: [&str; 16] = [
            "AX", "CX", "DX", "BX", "SP", "BP", "SI", "DI", "R8", "R9", "R10", "R11", "R12",
            "R13", "R14", "R15",
        ];
        let mut names: Vec<String> = GP.iter().map(|s| s.to_string()).collect();
        names.extend((0..16).map(|i| format!("X{i}")));
        let registers = Self::from_names(&names);

        let reg = |name: &str| match GP.iter().position(|&n| n == name) {
            Some(i) => RegNum(i as u8),
            None => unreachable!("{name} is not a general purpose register"),
        };

        // SP and BP hold the frame, R14 holds the current goroutine-like
        // context pointer and X15 is a fixed zero register.
        let gp: RegMask = (0..16)
            .map(|i| RegNum(i))
            .filter(|r| ![4, 5, 14].contains(&r.0))
            .collect();
        let fp: RegMask = (16..31).map(RegNum).collect();
        let int_params = ["AX", "BX", "CX", "DI", "SI", "R8", "R9", "R10", "R11"]
            .iter()
            .map(|name| reg(name))
            .collect();
        let float_params = (16..31).map(RegNum).collect();
        let sp = reg("SP");

        Self {
            registers,
            gp,
            fp,
            caller_saved: gp.union(fp),
            int_params,
            float_params,
            sp,
        }
    }

    pub fn arm64() -> Self {
        let mut names: Vec<String> = (0..31).map(|i| format!("R{i}")).collect();
        names.push("RSP".to_string());
        names.extend((0..32).map(|i| format!("F{i}")));
        let registers = Self::from_names(&names);

        // R18 is the platform register, R26..R30 are the context, temporary,
        // thread, frame and link registers.
        let gp: RegMask = (0..26).filter(|&i| i != 18).map(RegNum).collect();
        let fp: RegMask = (32..64).map(RegNum).collect();

        Self {
            registers,
            gp,
            fp,
            caller_saved: gp.union(fp),
            int_params: (0..16).map(RegNum).collect(),
            float_params: (32..48).map(RegNum).collect(),
            sp: RegNum(31),
        }
    }

    /// A small register file, used to exercise spilling in tests.
    ///
    /// `r0..r{gp_num}` are allocatable general purpose registers, the first
    /// two of them carry integer parameters and results. Four floating point
    /// registers follow, then the stack pointer.
    ///
    /// The allocator needs three general purpose registers: two operands and
    /// the copy made for ops whose result reuses their first operand.
    pub fn small(gp_num: u8) -> Result<Self, InvalidRegisterFile> {
        if !(Self::MIN_GP..=Self::MAX_SMALL_GP).contains(&gp_num) {
            return Err(InvalidRegisterFile::GpCount(gp_num));
        }
        let mut names: Vec<String> = (0..gp_num).map(|i| format!("r{i}")).collect();
        names.extend((0..4).map(|i| format!("f{i}")));
        names.push("sp".to_string());
        let registers = Self::from_names(&names);

        let gp: RegMask = (0..gp_num).map(RegNum).collect();
        let fp: RegMask = (gp_num..gp_num + 4).map(RegNum).collect();
        Ok(Self {
            registers,
            gp,
            fp,
            caller_saved: gp.union(fp),
            int_params: vec![RegNum(0), RegNum(1)],
            float_params: vec![RegNum(gp_num)],
            sp: RegNum(gp_num + 4),
        })
    }

    pub fn name(&self, reg: RegNum) -> &str {
        &self.registers[reg.index()].name
    }

    /// Allocatable registers able to hold a value of `ty`.
    pub fn class_of(&self, ty: Type) -> RegMask {
        if ty.is_float() {
            self.fp
        } else if ty.needs_reg() {
            self.gp
        } else {
            RegMask::EMPTY
        }
    }
}

/// Where the ABI places a parameter or result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbiLoc {
    Reg(RegNum),
    /// Offset in the caller's argument area.
    Stack(i64),
}

impl AbiLoc {
    pub fn reg(self) -> Option<RegNum> {
        match self {
            Self::Reg(reg) => Some(reg),
            Self::Stack(_) => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AbiParam {
    pub name: String,
    pub ty: Type,
    pub loc: AbiLoc,
}

/// Parameter and result locations of a function, pinned by the calling
/// convention.
///
/// Results assigned to the stack are stored by the frontend; only register
/// results flow through the `MakeResult` of a return block.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Abi {
    pub params: Vec<AbiParam>,
    pub results: Vec<AbiParam>,
    /// Size of the incoming argument area in bytes.
    pub arg_area_size: i64,
}

impl Abi {
    pub fn assign(
        regs: &RegisterFile,
        conv: CallConv,
        params: &[(&str, Type)],
        results: &[Type],
    ) -> Self {
        let mut offset = 0;
        let mut assign_all = |tys: &mut dyn Iterator<Item = (String, Type)>| {
            let (mut next_int, mut next_float) = (0, 0);
            tys.map(|(name, ty)| {
                let pool = if ty.is_float() {
                    (&regs.float_params, &mut next_float)
                } else {
                    (&regs.int_params, &mut next_int)
                };
                let loc = match (conv, pool.0.get(*pool.1)) {
                    (CallConv::Register, Some(&reg)) => {
                        *pool.1 += 1;
                        AbiLoc::Reg(reg)
                    }
                    _ => {
                        let size = i64::from(ty.size().max(1));
                        offset = (offset + size - 1) / size * size;
                        let loc = AbiLoc::Stack(offset);
                        offset += size;
                        loc
                    }
                };
                AbiParam { name, ty, loc }
            })
            .collect::<Vec<_>>()
        };

        let params = assign_all(&mut params.iter().map(|(n, ty)| (n.to_string(), *ty)));
        let results = assign_all(
            &mut results
                .iter()
                .enumerate()
                .map(|(i, ty)| (format!("~r{i}"), *ty)),
        );

        Self {
            params,
            results,
            arg_area_size: offset,
        }
    }
}

/// Per-pass diagnostic knobs, e.g. `"regalloc/log,schedule/dump,check,stats"`.
///
/// These select tooling output only and never change generated code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhaseOptions {
    passes: FxHashMap<String, PassOptions>,
    /// Run the structural checker after every pass.
    pub check: bool,
    /// Collect per-pass statistics.
    pub stats: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassOptions {
    pub log: bool,
    pub dump: bool,
}

impl PhaseOptions {
    pub fn parse(s: &str) -> Result<Self, InvalidPhaseOption> {
        let mut options = Self::default();
        for item in s.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            match item.split_once('/') {
                Some((pass, knob)) => {
                    if pass.is_empty() {
                        return Err(InvalidPhaseOption::EmptyPass(item.to_string()));
                    }
                    let entry = options.passes.entry(pass.to_string()).or_default();
                    match knob {
                        "log" => entry.log = true,
                        "dump" => entry.dump = true,
                        _ => return Err(InvalidPhaseOption::UnknownKnob(knob.to_string())),
                    }
                }
                None => match item {
                    "check" => options.check = true,
                    "stats" => options.stats = true,
                    _ => return Err(InvalidPhaseOption::UnknownKnob(item.to_string())),
                },
            }
        }
        Ok(options)
    }

    pub fn pass(&self, name: &str) -> PassOptions {
        let all = self.passes.get("all").copied().unwrap_or_default();
        let pass = self.passes.get(name).copied().unwrap_or_default();
        PassOptions {
            log: all.log || pass.log,
            dump: all.dump || pass.dump,
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidPhaseOption {
    #[error("unknown phase option `{0}`, expected `log`, `dump`, `check` or `stats`")]
    UnknownKnob(String),

    #[error("missing pass name in `{0}`")]
    EmptyPass(String),
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidRegisterFile {
    #[error("{0} general purpose registers, expected 3 to 32")]
    GpCount(u8),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn triple(s: &str) -> TargetTriple {
        TargetTriple::parse(s).unwrap()
    }

    #[test]
    fn amd64_abi() {
        let config = Config::new(triple("amd64-linux-register"));
        let abi = config.abi(&[("p", Type::Ptr), ("x", Type::F64), ("n", Type::I64)], &[Type::I64]);
        let names: Vec<_> = abi
            .params
            .iter()
            .map(|p| config.regs.name(p.loc.reg().unwrap()))
            .collect();
        assert_eq!(names, ["AX", "X0", "BX"]);
        assert_eq!(abi.results[0].loc, AbiLoc::Reg(RegNum(0)));
        assert_eq!(abi.arg_area_size, 0);
    }

    #[test]
    fn stack_abi() {
        let config = Config::new(triple("amd64-linux-stack"));
        let abi = config.abi(&[("a", Type::I8), ("b", Type::I64)], &[Type::I32]);
        assert_eq!(abi.params[0].loc, AbiLoc::Stack(0));
        assert_eq!(abi.params[1].loc, AbiLoc::Stack(8));
        assert_eq!(abi.results[0].loc, AbiLoc::Stack(16));
        assert_eq!(abi.arg_area_size, 20);
    }

    #[test]
    fn arm64_registers() {
        let regs = RegisterFile::arm64();
        assert!(!regs.gp.contains(RegNum(18)));
        assert!(regs.gp.contains(RegNum(25)));
        assert_eq!(regs.name(regs.sp), "RSP");
        assert_eq!(regs.class_of(Type::F32), regs.fp);
        assert_eq!(regs.class_of(Type::Mem), RegMask::EMPTY);
    }

    #[test]
    fn small_register_file() {
        let regs = RegisterFile::small(3).unwrap();
        assert_eq!(regs.gp, RegMask(0b111));
        assert_eq!(regs.name(regs.sp), "sp");
        assert_eq!(
            RegisterFile::small(2).err(),
            Some(InvalidRegisterFile::GpCount(2))
        );
        assert!(RegisterFile::small(33).is_err());
    }

    #[test]
    fn phase_options() {
        let options = PhaseOptions::parse("regalloc/log, schedule/dump,check").unwrap();
        assert!(options.pass("regalloc").log);
        assert!(!options.pass("regalloc").dump);
        assert!(options.pass("schedule").dump);
        assert!(options.check);
        assert!(!options.stats);

        let all = PhaseOptions::parse("all/log").unwrap();
        assert!(all.pass("stackmap").log);

        assert_eq!(
            PhaseOptions::parse("regalloc/trace"),
            Err(InvalidPhaseOption::UnknownKnob("trace".to_string()))
        );
        assert_eq!(
            PhaseOptions::parse("/log"),
            Err(InvalidPhaseOption::EmptyPass("/log".to_string()))
        );
    }
}
