//! Textual dump of a function, used by pass dumps, logs and snapshot tests.
use std::{fmt, io};

use crate::{BlockId, Func, Location, ValueId};

pub struct FuncWriter<'a> {
    pub(crate) func: &'a Func,
    level: u8,
}

impl<'a> FuncWriter<'a> {
    pub fn new(func: &'a Func) -> Self {
        Self { func, level: 0 }
    }

    pub fn write(&mut self, mut w: impl io::Write) -> io::Result<()> {
        write!(w, "func %{}(", self.func.name)?;
        let mut delim = "";
        for param in &self.func.abi.params {
            write!(w, "{delim}{}: {}", param.name, param.ty)?;
            delim = ", ";
        }
        writeln!(w, ") {{")?;
        self.level += 1;

        for block in self.func.iter_blocks() {
            self.write_block_with_values(block, &mut w)?;
        }

        self.level -= 1;
        writeln!(w, "}}")?;

        Ok(())
    }

    pub fn dump_string(&mut self) -> String {
        let mut s = Vec::new();
        // Writing into a `Vec` can't fail.
        let _ = self.write(&mut s);
        String::from_utf8_lossy(&s).into_owned()
    }

    pub fn write_block_with_values(
        &mut self,
        block: BlockId,
        mut w: impl io::Write,
    ) -> io::Result<()> {
        let data = self.func.block(block);
        self.indent(&mut w)?;
        write!(w, "{block}:")?;
        if !data.preds().is_empty() {
            write!(w, " <-")?;
            for pred in data.preds() {
                write!(w, " {}", pred.block)?;
            }
        }
        self.newline(&mut w)?;

        self.level += 1;
        for &value in &data.values {
            self.indent(&mut w)?;
            write!(w, "{}", DisplayableWithFunc(value, self.func))?;
            self.newline(&mut w)?;
        }

        self.indent(&mut w)?;
        write!(w, "{}", data.kind)?;
        for &control in data.controls() {
            write!(w, " {control}")?;
        }
        if !data.succs().is_empty() {
            write!(w, " ->")?;
            for succ in data.succs() {
                write!(w, " {}", succ.block)?;
            }
        }
        self.newline(&mut w)?;
        self.level -= 1;

        Ok(())
    }

    pub fn indent(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(" ".repeat(self.level as usize * 4).as_bytes())
    }

    pub fn newline(&self, mut w: impl io::Write) -> io::Result<()> {
        w.write_all(b"\n")
    }
}

pub trait DisplayWithFunc {
    fn fmt(&self, func: &Func, formatter: &mut fmt::Formatter) -> fmt::Result;
}

impl<T> DisplayWithFunc for &T
where
    T: DisplayWithFunc,
{
    fn fmt(&self, func: &Func, formatter: &mut fmt::Formatter) -> fmt::Result {
        (*self).fmt(func, formatter)
    }
}

/// `v2 = Add <i64> v0 v1 : AX`
impl DisplayWithFunc for ValueId {
    fn fmt(&self, func: &Func, formatter: &mut fmt::Formatter) -> fmt::Result {
        let data = func.value(*self);
        write!(formatter, "{self} = {} <{}>", data.op, data.ty)?;
        if data.aux_int != 0 || data.op == crate::Opcode::Const {
            write!(formatter, " [{}]", data.aux_int)?;
        }
        if !data.aux.is_none() {
            write!(formatter, " {}", data.aux)?;
        }
        for arg in data.args() {
            write!(formatter, " {arg}")?;
        }
        if let Some(loc) = func.location(*self) {
            write!(formatter, " : {}", DisplayableWithFunc(loc, func))?;
        }
        Ok(())
    }
}

impl DisplayWithFunc for Location {
    fn fmt(&self, func: &Func, formatter: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Location::Reg(reg) => formatter.write_str(func.config.regs.name(*reg)),
            Location::Stack(slot) => write!(formatter, "{}", func.slot_name(*slot)),
        }
    }
}

pub struct DisplayableWithFunc<'f, T>(pub T, pub &'f Func);

impl<'f, T> fmt::Display for DisplayableWithFunc<'f, T>
where
    T: DisplayWithFunc,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(self.1, f)
    }
}
