use std::fmt::{Display, Formatter};

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetTriple {
    pub architecture: Architecture,
    pub os: OperatingSystem,
    pub abi: CallConv,
}

impl TargetTriple {
    pub fn new(architecture: Architecture, os: OperatingSystem, abi: CallConv) -> Self {
        Self {
            architecture,
            os,
            abi,
        }
    }

    pub fn parse(s: &str) -> Result<Self, InvalidTriple> {
        let mut triple = s.split('-');

        let arch = Architecture::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;
        let os = OperatingSystem::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;
        let abi = CallConv::parse(triple.next().ok_or(InvalidTriple::InvalidFormat(s))?)?;

        if triple.next().is_some() {
            return Err(InvalidTriple::InvalidFormat(s));
        }

        // Darwin on arm64 reserves x18, which the register ABI needs.
        if arch == Architecture::Arm64
            && os == OperatingSystem::Darwin
            && abi == CallConv::Register
        {
            return Err(InvalidTriple::InvalidCombination);
        }

        Ok(Self::new(arch, os, abi))
    }

    /// Size of a pointer in bytes.
    pub fn ptr_size(&self) -> u32 {
        match self.architecture {
            Architecture::Amd64 | Architecture::Arm64 => 8,
        }
    }
}

impl Display for TargetTriple {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}-{}", self.architecture, self.os, self.abi)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Architecture {
    Amd64,
    Arm64,
}

impl Architecture {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "amd64" | "x86_64" => Ok(Self::Amd64),
            "arm64" | "aarch64" => Ok(Self::Arm64),
            _ => Err(InvalidTriple::ArchitectureNotSupported),
        }
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amd64 => write!(f, "amd64"),
            Self::Arm64 => write!(f, "arm64"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperatingSystem {
    Linux,
    Darwin,
}

impl OperatingSystem {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "linux" => Ok(Self::Linux),
            "darwin" => Ok(Self::Darwin),
            _ => Err(InvalidTriple::OsNotSupported),
        }
    }
}

impl Display for OperatingSystem {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Linux => write!(f, "linux"),
            Self::Darwin => write!(f, "darwin"),
        }
    }
}

/// How parameters and results are passed between functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallConv {
    /// Parameters and results are passed in registers while they last.
    Register,
    /// Every parameter and result lives in the caller's argument area.
    Stack,
}

impl CallConv {
    fn parse(s: &str) -> Result<Self, InvalidTriple> {
        match s {
            "register" | "regabi" => Ok(Self::Register),
            "stack" => Ok(Self::Stack),
            _ => Err(InvalidTriple::AbiNotSupported),
        }
    }
}

impl Display for CallConv {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Register => write!(f, "register"),
            Self::Stack => write!(f, "stack"),
        }
    }
}

#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
pub enum InvalidTriple<'a> {
    #[error("the format of triple must be `architecture-os-abi`: but got `{0}`")]
    InvalidFormat(&'a str),

    #[error("given architecture is not supported")]
    ArchitectureNotSupported,

    #[error("given operating system is not supported")]
    OsNotSupported,

    #[error("given abi is not supported")]
    AbiNotSupported,

    #[error("given triple consists of invalid combination")]
    InvalidCombination,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test() {
        let target = "amd64-linux-register";
        let triple = TargetTriple::parse(target).unwrap();

        assert_eq!(triple.architecture, Architecture::Amd64);
        assert_eq!(triple.os, OperatingSystem::Linux);
        assert_eq!(triple.abi, CallConv::Register);
        assert_eq!(triple.to_string(), target);
    }

    #[test]
    fn aliases() {
        let triple = TargetTriple::parse("aarch64-linux-stack").unwrap();
        assert_eq!(triple.architecture, Architecture::Arm64);
        assert_eq!(triple.abi, CallConv::Stack);
    }

    #[test]
    fn invalid() {
        assert_eq!(
            TargetTriple::parse("amd64-linux"),
            Err(InvalidTriple::InvalidFormat("amd64-linux"))
        );
        assert_eq!(
            TargetTriple::parse("mips-linux-stack"),
            Err(InvalidTriple::ArchitectureNotSupported)
        );
        assert_eq!(
            TargetTriple::parse("arm64-darwin-register"),
            Err(InvalidTriple::InvalidCombination)
        );
        assert_eq!(
            TargetTriple::parse("amd64-linux-stack-extra"),
            Err(InvalidTriple::InvalidFormat("amd64-linux-stack-extra"))
        );
    }
}
