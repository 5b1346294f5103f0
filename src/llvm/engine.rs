//! Execution engine construction.
//!
//! [`JitEngine::create`] consumes a built module: ownership moves into an
//! MCJIT engine, the engine's data layout is checked against the module's,
//! and static constructors run. Dropping the engine runs static destructors
//! before LLVM releases the machine code.

use inkwell::execution_engine::ExecutionEngine;
use inkwell::module::Module;
use inkwell::OptimizationLevel;

use crate::core::abi::PackedCFunc;
use crate::core::stats::StatCounters;
use crate::core::{UnitError, UnitResult};

/// A running MCJIT engine owning the unit's module.
pub(crate) struct JitEngine<'ctx> {
    engine: ExecutionEngine<'ctx>,
    triple: String,
}

impl<'ctx> JitEngine<'ctx> {
    pub(crate) fn create(
        module: Module<'ctx>,
        opt_level: OptimizationLevel,
        stats: &StatCounters,
    ) -> UnitResult<Self> {
        let triple = module.get_triple().as_str().to_string_lossy().into_owned();
        log::info!("Creating JIT engine for {} ({:?})", triple, opt_level);

        let engine = module
            .create_jit_execution_engine(opt_level)
            .map_err(|e| UnitError::EngineBuild {
                triple: triple.clone(),
                reason: e.to_string(),
            })?;
        stats.record_engine_build();

        stats.record_layout_check();
        let engine_layout = engine.get_target_data().get_data_layout();
        let module_layout = module.get_data_layout();
        if engine_layout.as_str() != module_layout.as_str() {
            return Err(UnitError::DataLayoutMismatch {
                module: module_layout.as_str().to_string_lossy().into_owned(),
                engine: engine_layout.as_str().to_string_lossy().into_owned(),
            });
        }
        drop(module_layout);

        engine.run_static_constructors();
        // `module` is only a view now; the engine disposes the module itself.
        drop(module);

        Ok(Self { engine, triple })
    }

    /// Address of `name`, or `None` if the engine has no such symbol.
    pub(crate) fn symbol_address(&self, name: &str) -> Option<usize> {
        self.engine.get_function_address(name).ok().filter(|&addr| addr != 0)
    }

    /// `name` resolved as a packed function.
    ///
    /// Callers must only pass names of functions defined with the packed type;
    /// data symbols and other functions resolve too.
    pub(crate) fn packed_function(&self, name: &str) -> Option<PackedCFunc> {
        self.symbol_address(name).map(|addr| {
            // SAFETY: the caller checked that `name` is a function of the packed type.
            unsafe { std::mem::transmute::<usize, PackedCFunc>(addr) }
        })
    }
}

impl Drop for JitEngine<'_> {
    fn drop(&mut self) {
        log::debug!("Running static destructors for {}", self.triple);
        self.engine.run_static_destructors();
    }
}
