// This module provides CompiledUnit, the owner of one LLVM compilation unit across its two
// lifetime states. A unit starts Unbuilt: the module sits in a mutex and can be printed or
// serialized to object code, bitcode, textual IR or assembly. On the first symbol demand
// the module is taken out of the mutex and moved into an MCJIT engine; from then on the
// unit is Built and only symbol resolution is possible. The transition is a one-shot latch
// (once_cell::sync::OnceCell): exactly one thread constructs the engine, every other thread
// blocks until it finishes and then observes the same engine or the same error. Reads of
// the module after the transition fail with ModuleConsumed instead of touching storage now
// owned by the engine. The LLVM context lives in a Box declared as the last field so that
// every module, engine and target machine derived from it is dropped first.

//! Compiled unit lifecycle.

use std::collections::HashSet;
use std::ffi::c_void;
use std::io::Write;
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use inkwell::context::Context;
use inkwell::module::Module;
use inkwell::targets::FileType;
use once_cell::sync::OnceCell;

use super::adapter::PackedFunc;
use super::builder::{packed_fn_type, CodegenLlvm, LoweredFunction, UnitBuilder};
use super::engine::JitEngine;
use super::target::{LlvmTargetResolver, TargetDescriptor, TargetResolver};
use crate::core::abi::{name_from_raw, CallContext, PackedCFunc};
use crate::core::stats::StatCounters;
use crate::core::{
    ModuleHandle, OutputFormat, RuntimeModule, UnitError, UnitOptions, UnitResult, UnitStats,
};

/// Type key of units backed by LLVM.
pub const TYPE_KEY: &str = "llvm";

/// A compilation unit that can be persisted before, or executed after,
/// its execution engine is created.
pub struct CompiledUnit {
    this: Weak<CompiledUnit>,
    entry: String,
    function_names: Vec<String>,
    /// Defined functions with the packed signature; the only names handed out as callables.
    packed_names: HashSet<String>,
    options: UnitOptions,
    stats: StatCounters,
    /// Built state.
    engine: OnceCell<UnitResult<JitEngine<'static>>>,
    /// Unbuilt state; `None` once the module moved into the engine.
    module: Mutex<Option<Module<'static>>>,
    target: TargetDescriptor,
    // Must stay last: everything above borrows from it.
    #[allow(dead_code)]
    context: Box<Context>,
}

// SAFETY: LLVM objects in a unit are never touched concurrently. The module is only
// reachable through its mutex, the engine is created exactly once inside the latch, and
// MCJIT serializes symbol lookups internally. The context is only used while building.
unsafe impl Send for CompiledUnit {}
unsafe impl Sync for CompiledUnit {}

impl CompiledUnit {
    /// Build a unit for `target` with the default resolver and builder.
    pub fn init(functions: &[Box<dyn LoweredFunction>], target: &str) -> UnitResult<Arc<Self>> {
        Self::init_with(
            functions,
            target,
            UnitOptions::default(),
            &LlvmTargetResolver,
            &CodegenLlvm,
        )
    }

    pub fn init_with(
        functions: &[Box<dyn LoweredFunction>],
        target: &str,
        options: UnitOptions,
        resolver: &dyn TargetResolver,
        builder: &dyn UnitBuilder,
    ) -> UnitResult<Arc<Self>> {
        let first = functions.first().ok_or(UnitError::EmptyFunctionList)?;
        let entry = first.name().to_string();
        let target = resolver.resolve(target)?;

        let context = Box::new(Context::create());
        // SAFETY: the context is heap allocated, never moved out of its box, and
        // dropped after every LLVM object created from it (see field order).
        let context_ref: &'static Context = unsafe { &*(context.as_ref() as *const Context) };

        let module = builder.build_unit(context_ref, functions, &target, &options)?;
        let packed_type = packed_fn_type(context_ref);
        let mut function_names = Vec::new();
        let mut packed_names = HashSet::new();
        for func in module.get_functions().filter(|f| f.count_basic_blocks() > 0) {
            let name = func.get_name().to_string_lossy().into_owned();
            if func.get_type() == packed_type {
                packed_names.insert(name.clone());
            } else {
                log::debug!("{} is not a packed function; it will not be resolvable", name);
            }
            function_names.push(name);
        }

        log::info!(
            "Built unit {} with {} functions for {}",
            entry,
            functions.len(),
            target.triple()
        );
        Ok(Arc::new_cyclic(|this| Self {
            this: this.clone(),
            entry,
            function_names,
            packed_names,
            options,
            stats: StatCounters::default(),
            engine: OnceCell::new(),
            module: Mutex::new(Some(module)),
            target,
            context,
        }))
    }

    /// Name of the distinguished entry function.
    pub fn entry_point(&self) -> &str {
        &self.entry
    }

    /// Functions defined in the unit, in module order.
    pub fn function_names(&self) -> &[String] {
        &self.function_names
    }

    pub fn target(&self) -> &TargetDescriptor {
        &self.target
    }

    pub fn options(&self) -> &UnitOptions {
        &self.options
    }

    /// Whether the module has moved into the execution engine.
    pub fn is_built(&self) -> bool {
        self.engine.get().is_some()
    }

    pub fn stats(&self) -> UnitStats {
        self.stats.snapshot()
    }

    fn module_slot(&self) -> MutexGuard<'_, Option<Module<'static>>> {
        self.module.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn engine(&self) -> UnitResult<&JitEngine<'static>> {
        self.engine
            .get_or_init(|| self.build_engine())
            .as_ref()
            .map_err(Clone::clone)
    }

    fn build_engine(&self) -> UnitResult<JitEngine<'static>> {
        let module = self.module_slot().take().ok_or(UnitError::ModuleConsumed)?;
        JitEngine::create(module, self.options.opt_level, &self.stats)
    }

    /// Address of `name` in the running unit, building the engine if needed.
    pub fn symbol_address(&self, name: &str) -> UnitResult<Option<usize>> {
        let addr = self.engine()?.symbol_address(name);
        self.stats.record_lookup(addr.is_some());
        Ok(addr)
    }

    /// Whether `name` is defined with the packed signature.
    pub fn is_packed(&self, name: &str) -> bool {
        self.packed_names.contains(name)
    }

    /// Native entry of `name` if it is a packed function of this unit.
    fn packed_function(&self, name: &str) -> UnitResult<Option<PackedCFunc>> {
        let engine = self.engine()?;
        let func = if self.is_packed(name) {
            engine.packed_function(name)
        } else {
            None
        };
        self.stats.record_lookup(func.is_some());
        Ok(func)
    }

    /// Resolve `name` into a callable that keeps this unit alive.
    ///
    /// A missing symbol, or one without the packed signature, is `Ok(None)`.
    pub fn get_function(&self, name: &str) -> UnitResult<Option<PackedFunc>> {
        match self.packed_function(name)? {
            Some(addr) => {
                let unit = self.this.upgrade().ok_or(UnitError::Detached)?;
                log::debug!("Resolved {} in unit {}", name, self.entry);
                Ok(Some(PackedFunc::new(name, addr, unit)))
            }
            None => {
                log::warn!("Function {} not found in unit {}", name, self.entry);
                Ok(None)
            }
        }
    }

    /// Make sure `name` is compiled; a missing symbol is an error.
    pub fn pre_compile(&self, name: &str) -> UnitResult<()> {
        self.symbol_address(name)?
            .map(|_| ())
            .ok_or_else(|| UnitError::SymbolNotFound { name: name.to_string() })
    }

    /// Serialize the unit in `format` to memory.
    pub fn emit(&self, format: OutputFormat) -> UnitResult<Vec<u8>> {
        let slot = self.module_slot();
        let module = slot.as_ref().ok_or(UnitError::ModuleConsumed)?;
        let bytes = match format {
            OutputFormat::Object => self.emit_machine_code(module, FileType::Object)?,
            OutputFormat::Assembly => self.emit_machine_code(module, FileType::Assembly)?,
            OutputFormat::Bitcode => module.write_bitcode_to_memory().as_slice().to_vec(),
            OutputFormat::TextualIr => module.print_to_string().to_bytes().to_vec(),
        };
        self.stats.record_artifact();
        log::debug!("Emitted {} bytes of {} for {}", bytes.len(), format, self.entry);
        Ok(bytes)
    }

    fn emit_machine_code(&self, module: &Module<'static>, kind: FileType) -> UnitResult<Vec<u8>> {
        let buffer = self
            .target
            .machine()
            .write_to_memory_buffer(module, kind)
            .map_err(|e| UnitError::codegen(format!("cannot emit {:?}: {}", kind, e)))?;
        Ok(buffer.as_slice().to_vec())
    }

    /// Write the unit to `path`. An empty `format` uses the path's extension.
    pub fn save_to_file(&self, path: &Path, format: &str) -> UnitResult<()> {
        let format = OutputFormat::resolve(path, format)?;
        let bytes = self.emit(format)?;
        let mut file = std::fs::File::create(path).map_err(|e| UnitError::io(path, e))?;
        file.write_all(&bytes).map_err(|e| UnitError::io(path, e))?;
        log::info!("Saved unit {} to {} ({})", self.entry, path.display(), format);
        Ok(())
    }

    /// Textual form of the unit: IR for `""`/`ll`, assembly for `s`/`asm`.
    pub fn get_source(&self, format: &str) -> UnitResult<String> {
        let format = match format {
            "" => OutputFormat::TextualIr,
            other => other.parse()?,
        };
        if !format.is_text() {
            return Err(UnitError::UnsupportedFormat { format: format.to_string() });
        }
        let bytes = self.emit(format)?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Units do not take part in generic binary serialization.
    pub fn save_to_binary(&self, _stream: &mut dyn Write) -> UnitResult<()> {
        Err(UnitError::BinarySerializationUnsupported { type_key: TYPE_KEY })
    }
}

impl RuntimeModule for CompiledUnit {
    fn type_key(&self) -> &'static str {
        TYPE_KEY
    }

    fn get_function(&self, name: &str) -> UnitResult<Option<PackedFunc>> {
        CompiledUnit::get_function(self, name)
    }

    fn pre_compile(&self, name: &str) -> UnitResult<()> {
        CompiledUnit::pre_compile(self, name)
    }

    fn save_to_file(&self, path: &Path, format: &str) -> UnitResult<()> {
        CompiledUnit::save_to_file(self, path, format)
    }

    fn save_to_binary(&self, stream: &mut dyn Write) -> UnitResult<()> {
        CompiledUnit::save_to_binary(self, stream)
    }

    fn get_source(&self, format: &str) -> UnitResult<String> {
        CompiledUnit::get_source(self, format)
    }
}

impl std::fmt::Debug for CompiledUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledUnit")
            .field("entry", &self.entry)
            .field("triple", &self.target.triple())
            .field("built", &self.is_built())
            .finish_non_exhaustive()
    }
}

/// Host `lookup` service: resolves a sibling function of the calling unit.
///
/// # Safety
/// `ctx` must be a live context whose `host` points at a live `CompiledUnit`,
/// and `name` must point to `len` readable bytes.
pub(crate) unsafe extern "C" fn lookup_in_unit(
    ctx: *mut CallContext,
    name: *const u8,
    len: u64,
) -> *const c_void {
    if ctx.is_null() || (*ctx).host.is_null() {
        return std::ptr::null();
    }
    let unit = &*((*ctx).host as *const CompiledUnit);
    match name_from_raw(name, len).map(|name| unit.packed_function(name)) {
        Some(Ok(Some(func))) => func as *const c_void,
        _ => std::ptr::null(),
    }
}

/// Build a unit and return it as a shared runtime module.
pub fn build(functions: &[Box<dyn LoweredFunction>], target: &str) -> UnitResult<ModuleHandle> {
    let unit: ModuleHandle = CompiledUnit::init(functions, target)?;
    Ok(unit)
}

/// [`build`] with explicit options, resolver and builder.
pub fn build_with(
    functions: &[Box<dyn LoweredFunction>],
    target: &str,
    options: UnitOptions,
    resolver: &dyn TargetResolver,
    builder: &dyn UnitBuilder,
) -> UnitResult<ModuleHandle> {
    let unit: ModuleHandle = CompiledUnit::init_with(functions, target, options, resolver, builder)?;
    Ok(unit)
}
