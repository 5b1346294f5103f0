//! Engine construction tests: concurrent first use and data layout validation.

use std::sync::{Arc, Barrier};
use std::thread;

use inkwell::targets::TargetData;
use llvm_unit::llvm::UnitCodegen;
use llvm_unit::{
    CompiledUnit, LoweredFunction, PackedArgs, PackedBody, PackedFn, UnitError, UnitResult,
};

fn square_body(body: &PackedBody<'_, '_>) -> UnitResult<()> {
    body.expect_args(1)?;
    let x = body.arg_i64(0)?;
    let sq = body.builder().build_int_mul(x, x, "sq")?;
    body.store_i64(0, sq)?;
    body.ret_ok()
}

#[test]
fn test_concurrent_first_use_builds_one_engine() {
    const THREADS: usize = 8;
    let functions: Vec<Box<dyn LoweredFunction>> =
        vec![Box::new(PackedFn::new("square", square_body))];
    let unit = CompiledUnit::init(&functions, "llvm").unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let unit = Arc::clone(&unit);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                barrier.wait();
                let square = unit.get_function("square").unwrap().unwrap();
                let mut args = PackedArgs::new();
                args.push_int(i as i64);
                square.call(&mut args).unwrap();
                args.int(0).unwrap()
            })
        })
        .collect();

    for (i, handle) in handles.into_iter().enumerate() {
        let i = i as i64;
        assert_eq!(handle.join().unwrap(), i * i);
    }
    let stats = unit.stats();
    assert_eq!(stats.engine_builds, 1);
    assert_eq!(stats.layout_checks, 1);
    assert_eq!(stats.lookups, THREADS);
}

/// Wraps a function and stamps the module with a foreign data layout.
struct ForeignLayout<F> {
    inner: F,
    layout: &'static str,
}

impl<F: LoweredFunction> LoweredFunction for ForeignLayout<F> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn lower<'ctx>(&self, unit: &UnitCodegen<'ctx>) -> UnitResult<()> {
        self.inner.lower(unit)?;
        let data = TargetData::create(self.layout);
        unit.module().set_data_layout(&data.get_data_layout());
        Ok(())
    }
}

#[cfg(target_pointer_width = "64")]
#[test]
fn test_data_layout_mismatch() {
    let functions: Vec<Box<dyn LoweredFunction>> = vec![Box::new(ForeignLayout {
        inner: PackedFn::new("square", square_body),
        layout: "e-m:e-p:32:32-i64:64-n32-S128",
    })];
    let unit = CompiledUnit::init(&functions, "llvm").unwrap();

    let err = unit.get_function("square").unwrap_err();
    match &err {
        UnitError::DataLayoutMismatch { module, engine } => {
            assert_eq!(module, "e-m:e-p:32:32-i64:64-n32-S128");
            assert_ne!(module, engine);
        }
        other => panic!("unexpected error: {other}"),
    }

    // The failed construction is latched and reported to every caller.
    assert_eq!(unit.pre_compile("square").unwrap_err(), err);
    assert_eq!(unit.stats().engine_builds, 1);
    assert_eq!(unit.stats().layout_checks, 1);
}
