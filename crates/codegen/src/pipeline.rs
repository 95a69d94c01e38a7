//! The pass pipeline and the parallel driver.
//!
//! A function goes through deadcode, critical edge splitting, scheduling,
//! lowering, a second deadcode, block layout, register allocation, stack
//! allocation, stack maps and debug locations, in that order. Every pass
//! honours the `log`, `dump`, `check` and `stats` phase options.
use dashmap::DashMap;
use rayon::prelude::*;

use cantata_ir::{check_func, ir_writer::FuncWriter, Cache, Func, Pos};

use crate::{
    critical_edge::CriticalEdgeSplitter,
    deadcode::deadcode,
    debug::{self, DebugInfo},
    error::CompileError,
    layout::layout,
    lower::{lower, Lowerer},
    regalloc::{regalloc, verify},
    schedule::Scheduler,
    stackalloc::stackalloc,
    stackmap::StackMaps,
};

/// The result of compiling one function.
pub struct CompiledFunc {
    /// Scheduled, laid out and allocated; every value that needs one has a
    /// location and `func.frame` is final.
    pub func: Func,
    pub stack_maps: StackMaps,
    pub debug: DebugInfo,
}

/// Counters collected by the passes when the `stats` option is on, shared
/// by every worker of a batch.
#[derive(Debug, Default)]
pub struct Stats {
    counters: DashMap<&'static str, u64>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, key: &'static str, n: usize) {
        *self.counters.entry(key).or_default() += n as u64;
    }

    pub fn get(&self, key: &str) -> u64 {
        self.counters.get(key).map_or(0, |n| *n)
    }

    /// All counters, sorted by name.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        let mut all: Vec<_> = self.counters.iter().map(|e| (*e.key(), *e.value())).collect();
        all.sort_unstable();
        all
    }
}

/// Runs `pass` over `func`, then dumps and checks the result as requested.
fn run_pass<R>(func: &mut Func, name: &'static str, pass: impl FnOnce(&mut Func) -> R) -> R {
    let options = func.config.options.pass(name);
    if options.log {
        log::debug!("{}: running {name}", func.name);
    }
    let result = pass(func);
    if options.dump {
        log::debug!(
            "{} after {name}:\n{}",
            func.name,
            FuncWriter::new(func).dump_string()
        );
    }
    if func.config.options.check {
        if let Err(err) = check_func(func) {
            func.fatal(Pos::default(), format!("after {name}: {err}"));
        }
    }
    result
}

/// Compiles one function. Invariant violations inside a pass panic; input
/// that the back-end refuses is reported as a [`CompileError`].
pub fn compile(
    mut func: Func,
    lowerer: &dyn Lowerer,
    stats: Option<&Stats>,
) -> Result<CompiledFunc, CompileError> {
    if func.try_entry().is_none() {
        let err = CompileError::EmptyFunc { name: func.name };
        log::warn!("{err}");
        return Err(err);
    }
    let limit = func.config.max_values;
    let values = func.num_values();
    if values > limit {
        let err = CompileError::FuncTooLarge {
            name: func.name.clone(),
            values,
            limit,
        };
        func.warn(Pos::default(), &err);
        return Err(err);
    }

    let collect = func.config.options.stats;
    let stat = |key: &'static str, n: usize| {
        if let (true, Some(stats)) = (collect, stats) {
            stats.add(key, n);
        }
    };

    let dead = run_pass(&mut func, "deadcode", deadcode);
    stat("deadcode.blocks", dead.blocks);
    stat("deadcode.values", dead.values);
    stat("deadcode.phis", dead.phis);

    let split = run_pass(&mut func, "critical", |f| CriticalEdgeSplitter::new().run(f));
    stat("critical.split", split);

    run_pass(&mut func, "schedule", |f| Scheduler::new().run(f));

    let lowered = run_pass(&mut func, "lower", |f| lower(f, lowerer));
    stat("lower.values", lowered);

    let dead = run_pass(&mut func, "deadcode", deadcode);
    stat("deadcode.values", dead.values);

    run_pass(&mut func, "layout", layout);

    let ra = run_pass(&mut func, "regalloc", regalloc);
    stat("regalloc.spills", ra.spills);
    stat("regalloc.restores", ra.restores);
    stat("regalloc.copies", ra.copies);
    stat("regalloc.remats", ra.remats);
    stat("regalloc.stack_phis", ra.stack_phis);

    let sa = run_pass(&mut func, "stackalloc", stackalloc);
    stat("stackalloc.slots", sa.slots);
    stat("stackalloc.reused", sa.reused);
    stat("stackalloc.named", sa.named);
    if func.config.options.check {
        if let Err(err) = verify(&func) {
            func.fatal(Pos::default(), format!("after stackalloc: {err}"));
        }
    }

    let stack_maps = run_pass(&mut func, "stackmap", StackMaps::compute);
    stat("stackmap.safe_points", stack_maps.len());

    let debug = if func.config.optimize {
        run_pass(&mut func, "debug", debug::build)
    } else {
        run_pass(&mut func, "debug", |f| debug::build_noopt(f))
    };

    Ok(CompiledFunc {
        func,
        stack_maps,
        debug,
    })
}

/// Compiles `inputs` in parallel.
///
/// Each worker owns one [`Cache`]: `build` creates a function from it and,
/// once `emit` has consumed the compiled function, its storage goes back to
/// the worker for the next input. Results keep the order of `inputs`.
pub fn compile_all<I, R>(
    inputs: &[I],
    lowerer: &dyn Lowerer,
    stats: &Stats,
    build: impl Fn(&I, Cache) -> Func + Sync,
    emit: impl Fn(&CompiledFunc) -> R + Sync,
) -> Vec<Result<R, CompileError>>
where
    I: Sync,
    R: Send,
{
    inputs
        .par_iter()
        .map_init(
            || Some(Cache::new()),
            |cache, input| {
                let func = build(input, cache.take().unwrap_or_default());
                match compile(func, lowerer, Some(stats)) {
                    Ok(compiled) => {
                        let out = emit(&compiled);
                        *cache = Some(compiled.func.into_cache());
                        Ok(out)
                    }
                    Err(err) => Err(err),
                }
            },
        )
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use cantata_ir::{builder::test_util::*, Config, FunctionBuilder, Opcode, PhaseOptions, Type};

    use super::*;
    use crate::lower::NoopLowerer;

    fn sum_to(config: Arc<Config>, cache: Cache, n: i64) -> Func {
        let abi = config.abi(&[], &[Type::I64]);
        let mut b = FunctionBuilder::with_cache(&format!("sum{n}"), config, abi, cache);
        let mut acc = b.const_int(Type::I64, 0);
        for i in 1..=n {
            let c = b.const_int(Type::I64, i);
            acc = b.binary(Opcode::Add, acc, c);
        }
        b.ret(&[acc]);
        b.finish()
    }

    #[test]
    fn too_large() {
        let mut config = (*small_config(4)).clone();
        config.max_values = 4;
        let func = sum_to(Arc::new(config), Cache::new(), 8);
        let err = compile(func, &NoopLowerer, None).err();
        assert!(matches!(
            err,
            Some(CompileError::FuncTooLarge { limit: 4, .. })
        ));
    }

    #[test]
    fn parallel_batch_keeps_order() {
        let options = PhaseOptions::parse("check,stats").unwrap();
        let config = Arc::new((*small_config(4)).clone().with_options(options));
        let stats = Stats::new();
        let inputs: Vec<i64> = (1..=16).collect();

        let names = compile_all(
            &inputs,
            &NoopLowerer,
            &stats,
            |&n, cache| sum_to(config.clone(), cache, n),
            |compiled| compiled.func.name.clone(),
        );
        let names: Vec<String> = names.into_iter().map(Result::unwrap).collect();
        let expected: Vec<String> = inputs.iter().map(|n| format!("sum{n}")).collect();
        assert_eq!(names, expected);
        assert_eq!(stats.get("regalloc.spills"), 0);
        assert!(stats.snapshot().iter().any(|(k, _)| *k == "stackmap.safe_points"));
    }
}
