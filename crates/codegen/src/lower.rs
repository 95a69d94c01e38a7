//! Hook for target specific rewrites run on the scheduled function.
use cantata_ir::{Func, Opcode, ValueId};

/// Rewrites values into their machine specific form.
///
/// Runs after scheduling; implementations rewrite a value in place and may
/// only drop arguments, never add ones defined later in the block.
pub trait Lowerer: Sync {
    /// Rewrites `value`, returning `true` if it changed.
    fn lower_value(&self, func: &mut Func, value: ValueId) -> bool;
}

/// Leaves every value as is.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLowerer;

impl Lowerer for NoopLowerer {
    fn lower_value(&self, _func: &mut Func, _value: ValueId) -> bool {
        false
    }
}

/// Folds small constant operands into immediate forms.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateLowerer;

impl ImmediateLowerer {
    fn small_const(func: &Func, value: ValueId) -> Option<i64> {
        let data = func.value(value);
        (data.op == Opcode::Const && i32::try_from(data.aux_int).is_ok()).then_some(data.aux_int)
    }
}

impl Lowerer for ImmediateLowerer {
    fn lower_value(&self, func: &mut Func, value: ValueId) -> bool {
        let data = func.value(value);
        let (x, c) = match (data.op, data.args()) {
            (Opcode::Add, &[x, y]) => match (Self::small_const(func, x), Self::small_const(func, y)) {
                (_, Some(c)) => (x, c),
                (Some(c), None) => (y, c),
                (None, None) => return false,
            },
            (Opcode::Sub, &[x, y]) => match Self::small_const(func, y) {
                Some(c) if c != i64::from(i32::MIN) => (x, -c),
                _ => return false,
            },
            _ => return false,
        };

        let ty = data.ty;
        func.reset_value(value, Opcode::AddConst, ty);
        func.value_mut(value).aux_int = c;
        func.add_arg(value, x);
        true
    }
}

/// Runs `lowerer` over every value, returning the number of rewritten ones.
pub fn lower(func: &mut Func, lowerer: &dyn Lowerer) -> usize {
    let mut changed = 0;
    for block in func.layout.clone() {
        for i in 0..func.block(block).values.len() {
            let value = func.block(block).values[i];
            if lowerer.lower_value(func, value) {
                changed += 1;
            }
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use cantata_ir::{builder::test_util::*, Type};

    use super::*;

    #[test]
    fn fold_immediates() {
        let mut f = fun(
            "imm",
            &[bloc(
                "entry",
                [
                    valu("mem", Opcode::InitMem, Type::Mem, &[]),
                    valu_i("x", Opcode::Arg, Type::I64, 0, &[]),
                    valu_i("k", Opcode::Const, Type::I64, 5, &[]),
                    valu("a", Opcode::Add, Type::I64, &["k", "x"]),
                    valu("s", Opcode::Sub, Type::I64, &["a", "k"]),
                    valu("r", Opcode::MakeResult, Type::Void, &["s", "mem"]),
                ],
                ret("r"),
            )],
        );
        assert_eq!(lower(&mut f.func, &ImmediateLowerer), 2);

        let [a, s, x, k] = [f.value("a"), f.value("s"), f.value("x"), f.value("k")];
        assert_eq!(f.func.op(a), Opcode::AddConst);
        assert_eq!(f.func.value(a).aux_int, 5);
        assert_eq!(f.func.value(a).args(), [x]);
        assert_eq!(f.func.value(s).aux_int, -5);
        assert_eq!(f.func.value(s).args(), [a]);
        assert_eq!(f.func.value(k).uses(), 0);

        assert_eq!(lower(&mut f.func, &NoopLowerer), 0);
    }
}
