// This module turns an ordered list of lowered functions into one LLVM module. UnitBuilder
// is the seam: CodegenLlvm is the default implementation, which creates a module named
// after the entry function, stamps it with the target triple and data layout, lowers each
// function in order, records the entry function in the exported `__unit_main__` string and
// optionally verifies the result. LoweredFunction is what callers provide; PackedFn lowers a
// closure against a PackedBody, and IrSource links textual IR (for example a previously saved
// `.ll` file) into the unit. PackedBody wraps one function with the packed signature and
// offers the helpers generated code needs: argument loads and stores, status returns,
// error reporting through the call context, and calls to sibling functions resolved
// through the host lookup service.

//! Lowering functions into a compilation unit.

use std::path::Path;

use inkwell::builder::Builder;
use inkwell::context::Context;
use inkwell::memory_buffer::MemoryBuffer;
use inkwell::module::{Linkage, Module};
use inkwell::types::{BasicType, FunctionType, StructType};
use inkwell::values::{FloatValue, FunctionValue, IntValue, PointerValue};
use inkwell::{AddressSpace, IntPredicate};

use super::target::TargetDescriptor;
use crate::core::{UnitError, UnitOptions, UnitResult};

/// Exported constant string naming the entry function of a unit.
pub const MAIN_SYMBOL: &str = "__unit_main__";

// Field indices of the call context as seen from generated code.
const CTX_SET_ERROR: u32 = 1;
const CTX_LOOKUP: u32 = 2;

/// `i32 (ptr values, ptr type_codes, i32 num_args, ptr call_ctx)` in `context`.
pub fn packed_fn_type(context: &Context) -> FunctionType<'_> {
    let ptr_type = context.ptr_type(AddressSpace::default());
    let i32_type = context.i32_type();
    i32_type.fn_type(
        &[ptr_type.into(), ptr_type.into(), i32_type.into(), ptr_type.into()],
        false,
    )
}

/// A function ready to be lowered into a unit.
pub trait LoweredFunction {
    /// Symbol name of the function.
    fn name(&self) -> &str;

    /// Emit the function into `unit`.
    fn lower<'ctx>(&self, unit: &UnitCodegen<'ctx>) -> UnitResult<()>;
}

/// Produces a compilation unit from lowered functions.
///
/// The first function is the distinguished entry point.
pub trait UnitBuilder {
    fn build_unit<'ctx>(
        &self,
        context: &'ctx Context,
        functions: &[Box<dyn LoweredFunction>],
        target: &TargetDescriptor,
        options: &UnitOptions,
    ) -> UnitResult<Module<'ctx>>;
}

/// Default builder emitting LLVM IR through inkwell.
#[derive(Debug, Default, Clone, Copy)]
pub struct CodegenLlvm;

impl UnitBuilder for CodegenLlvm {
    fn build_unit<'ctx>(
        &self,
        context: &'ctx Context,
        functions: &[Box<dyn LoweredFunction>],
        target: &TargetDescriptor,
        options: &UnitOptions,
    ) -> UnitResult<Module<'ctx>> {
        let entry = functions.first().ok_or(UnitError::EmptyFunctionList)?.name();
        let unit = UnitCodegen::new(context, entry, target);
        for func in functions {
            log::debug!("Lowering function {}", func.name());
            func.lower(&unit)?;
        }
        unit.add_main_function(entry)?;
        unit.finish(options.verify)
    }
}

/// Module under construction plus the types of the packed convention.
pub struct UnitCodegen<'ctx> {
    context: &'ctx Context,
    module: Module<'ctx>,
    builder: Builder<'ctx>,
    packed_type: FunctionType<'ctx>,
    call_ctx_type: StructType<'ctx>,
}

impl<'ctx> UnitCodegen<'ctx> {
    pub fn new(context: &'ctx Context, name: &str, target: &TargetDescriptor) -> Self {
        let module = context.create_module(name);
        module.set_triple(&target.target_triple());
        module.set_data_layout(&target.data_layout());

        let ptr_type = context.ptr_type(AddressSpace::default());
        let packed_type = packed_fn_type(context);
        let call_ctx_type =
            context.struct_type(&[ptr_type.into(), ptr_type.into(), ptr_type.into()], false);

        Self {
            context,
            module,
            builder: context.create_builder(),
            packed_type,
            call_ctx_type,
        }
    }

    pub fn context(&self) -> &'ctx Context {
        self.context
    }

    pub fn module(&self) -> &Module<'ctx> {
        &self.module
    }

    pub fn builder(&self) -> &Builder<'ctx> {
        &self.builder
    }

    /// `i32 (ptr values, ptr type_codes, i32 num_args, ptr call_ctx)`
    pub fn packed_type(&self) -> FunctionType<'ctx> {
        self.packed_type
    }

    /// Add an externally visible packed function and position the builder
    /// at its entry block.
    pub fn define_packed(&self, name: &str) -> UnitResult<PackedBody<'_, 'ctx>> {
        if self.module.get_function(name).is_some() {
            return Err(UnitError::codegen(format!("function {} is already defined", name)));
        }
        let function = self
            .module
            .add_function(name, self.packed_type, Some(Linkage::External));
        let param = |idx: u32| {
            function
                .get_nth_param(idx)
                .ok_or_else(|| UnitError::codegen(format!("{} is missing parameter {}", name, idx)))
        };
        let values = param(0)?.into_pointer_value();
        let type_codes = param(1)?.into_pointer_value();
        let num_args = param(2)?.into_int_value();
        let call_ctx = param(3)?.into_pointer_value();

        let entry = self.context.append_basic_block(function, "entry");
        self.builder.position_at_end(entry);

        Ok(PackedBody {
            unit: self,
            name: name.to_string(),
            function,
            values,
            type_codes,
            num_args,
            call_ctx,
        })
    }

    /// Parse textual IR and link it into the unit. `name` must be defined by it.
    pub fn link_ir(&self, name: &str, text: &str) -> UnitResult<()> {
        let buffer = MemoryBuffer::create_from_memory_range_copy(text.as_bytes(), name);
        let parsed = self
            .context
            .create_module_from_ir(buffer)
            .map_err(|e| UnitError::codegen(format!("cannot parse IR for {}: {}", name, e)))?;

        // The marker is regenerated for this unit.
        if let Some(stale) = parsed.get_global(MAIN_SYMBOL) {
            // SAFETY: nothing in this crate holds a reference to the stale global.
            unsafe { stale.delete() };
        }

        self.module
            .link_in_module(parsed)
            .map_err(|e| UnitError::codegen(format!("cannot link IR for {}: {}", name, e)))?;

        if self.module.get_function(name).is_none() {
            return Err(UnitError::codegen(format!("IR source does not define {}", name)));
        }
        Ok(())
    }

    fn add_main_function(&self, entry: &str) -> UnitResult<()> {
        if self.module.get_function(entry).is_none() {
            return Err(UnitError::codegen(format!("entry function {} was not lowered", entry)));
        }
        let name = self.context.const_string(entry.as_bytes(), true);
        let global = self.module.add_global(name.get_type(), None, MAIN_SYMBOL);
        global.set_initializer(&name);
        global.set_constant(true);
        global.set_linkage(Linkage::External);
        Ok(())
    }

    fn finish(self, verify: bool) -> UnitResult<Module<'ctx>> {
        let UnitCodegen { module, .. } = self;
        if verify {
            module
                .verify()
                .map_err(|e| UnitError::codegen(format!("module verification failed: {}", e)))?;
        }
        Ok(module)
    }
}

/// Body of one packed function under construction.
pub struct PackedBody<'a, 'ctx> {
    unit: &'a UnitCodegen<'ctx>,
    name: String,
    function: FunctionValue<'ctx>,
    values: PointerValue<'ctx>,
    type_codes: PointerValue<'ctx>,
    num_args: IntValue<'ctx>,
    call_ctx: PointerValue<'ctx>,
}

impl<'a, 'ctx> PackedBody<'a, 'ctx> {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn context(&self) -> &'ctx Context {
        self.unit.context
    }

    pub fn builder(&self) -> &'a Builder<'ctx> {
        &self.unit.builder
    }

    pub fn function(&self) -> FunctionValue<'ctx> {
        self.function
    }

    /// The `i32` argument count.
    pub fn num_args(&self) -> IntValue<'ctx> {
        self.num_args
    }

    /// Branch to an error return unless exactly `count` arguments were passed.
    pub fn expect_args(&self, count: u32) -> UnitResult<()> {
        let i32_type = self.context().i32_type();
        let ok = self.builder().build_int_compare(
            IntPredicate::EQ,
            self.num_args,
            i32_type.const_int(count as u64, false),
            "argc.ok",
        )?;
        let pass = self.context().append_basic_block(self.function, "argc.pass");
        let fail = self.context().append_basic_block(self.function, "argc.fail");
        self.builder().build_conditional_branch(ok, pass, fail)?;

        self.builder().position_at_end(fail);
        self.ret_error(&format!("{}: expected {} arguments", self.name, count))?;

        self.builder().position_at_end(pass);
        Ok(())
    }

    fn slot<T: BasicType<'ctx>>(
        &self,
        base: PointerValue<'ctx>,
        elem: T,
        idx: u32,
        name: &str,
    ) -> UnitResult<PointerValue<'ctx>> {
        let index = self.context().i64_type().const_int(idx as u64, false);
        // SAFETY: the index stays within the caller-provided arrays when the
        // function body checked its argument count.
        let ptr = unsafe { self.builder().build_in_bounds_gep(elem, base, &[index], name)? };
        Ok(ptr)
    }

    /// Type code of argument `idx`.
    pub fn type_code(&self, idx: u32) -> UnitResult<IntValue<'ctx>> {
        let i32_type = self.context().i32_type();
        let ptr = self.slot(self.type_codes, i32_type, idx, "tcode.ptr")?;
        Ok(self.builder().build_load(i32_type, ptr, "tcode")?.into_int_value())
    }

    pub fn arg_i64(&self, idx: u32) -> UnitResult<IntValue<'ctx>> {
        let i64_type = self.context().i64_type();
        let ptr = self.slot(self.values, i64_type, idx, "arg.ptr")?;
        Ok(self.builder().build_load(i64_type, ptr, "arg")?.into_int_value())
    }

    pub fn arg_f64(&self, idx: u32) -> UnitResult<FloatValue<'ctx>> {
        let ptr = self.slot(self.values, self.context().i64_type(), idx, "arg.ptr")?;
        let f64_type = self.context().f64_type();
        Ok(self.builder().build_load(f64_type, ptr, "arg")?.into_float_value())
    }

    /// Write an integer result back into argument slot `idx`.
    pub fn store_i64(&self, idx: u32, value: IntValue<'ctx>) -> UnitResult<()> {
        let ptr = self.slot(self.values, self.context().i64_type(), idx, "out.ptr")?;
        self.builder().build_store(ptr, value)?;
        Ok(())
    }

    pub fn store_f64(&self, idx: u32, value: FloatValue<'ctx>) -> UnitResult<()> {
        let ptr = self.slot(self.values, self.context().i64_type(), idx, "out.ptr")?;
        self.builder().build_store(ptr, value)?;
        Ok(())
    }

    pub fn ret_ok(&self) -> UnitResult<()> {
        self.ret_status(self.context().i32_type().const_zero())
    }

    pub fn ret_status(&self, status: IntValue<'ctx>) -> UnitResult<()> {
        self.builder().build_return(Some(&status))?;
        Ok(())
    }

    /// Report `message` through the call context and return a failure status.
    pub fn ret_error(&self, message: &str) -> UnitResult<()> {
        let ptr_type = self.context().ptr_type(AddressSpace::default());
        let i64_type = self.context().i64_type();

        let text = self.builder().build_global_string_ptr(message, "err.msg")?;
        let set_error = self.load_service(CTX_SET_ERROR, "set_error")?;
        let set_error_type = self
            .context()
            .void_type()
            .fn_type(&[ptr_type.into(), ptr_type.into(), i64_type.into()], false);
        self.builder().build_indirect_call(
            set_error_type,
            set_error,
            &[
                self.call_ctx.into(),
                text.as_pointer_value().into(),
                i64_type.const_int(message.len() as u64, false).into(),
            ],
            "",
        )?;
        self.ret_status(self.context().i32_type().const_all_ones())
    }

    /// Resolve `callee` through the host and call it with this function's
    /// arguments. A missing callee returns an error from this function.
    pub fn call_sibling(&self, callee: &str) -> UnitResult<IntValue<'ctx>> {
        let ptr_type = self.context().ptr_type(AddressSpace::default());
        let i64_type = self.context().i64_type();

        let callee_name = self.builder().build_global_string_ptr(callee, "callee.name")?;
        let lookup = self.load_service(CTX_LOOKUP, "lookup")?;
        let lookup_type =
            ptr_type.fn_type(&[ptr_type.into(), ptr_type.into(), i64_type.into()], false);
        let target = self
            .builder()
            .build_indirect_call(
                lookup_type,
                lookup,
                &[
                    self.call_ctx.into(),
                    callee_name.as_pointer_value().into(),
                    i64_type.const_int(callee.len() as u64, false).into(),
                ],
                "callee",
            )?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| UnitError::codegen("lookup service returned no value"))?
            .into_pointer_value();

        let missing = self.builder().build_is_null(target, "callee.missing")?;
        let found_block = self.context().append_basic_block(self.function, "callee.found");
        let missing_block = self.context().append_basic_block(self.function, "callee.absent");
        self.builder()
            .build_conditional_branch(missing, missing_block, found_block)?;

        self.builder().position_at_end(missing_block);
        self.ret_error(&format!("{}: cannot find function {}", self.name, callee))?;

        self.builder().position_at_end(found_block);
        let status = self
            .builder()
            .build_indirect_call(
                self.unit.packed_type,
                target,
                &[
                    self.values.into(),
                    self.type_codes.into(),
                    self.num_args.into(),
                    self.call_ctx.into(),
                ],
                "status",
            )?
            .try_as_basic_value()
            .left()
            .ok_or_else(|| UnitError::codegen("packed call returned no status"))?
            .into_int_value();
        Ok(status)
    }

    fn load_service(&self, field: u32, name: &str) -> UnitResult<PointerValue<'ctx>> {
        let ptr_type = self.context().ptr_type(AddressSpace::default());
        let field_ptr =
            self.builder()
                .build_struct_gep(self.unit.call_ctx_type, self.call_ctx, field, name)?;
        Ok(self.builder().build_load(ptr_type, field_ptr, name)?.into_pointer_value())
    }
}

/// A packed function whose body is produced by a closure.
pub struct PackedFn<F> {
    name: String,
    body: F,
}

impl<F> PackedFn<F> {
    pub fn new(name: impl Into<String>, body: F) -> Self
    where
        F: for<'a, 'ctx> Fn(&PackedBody<'a, 'ctx>) -> UnitResult<()>,
    {
        Self { name: name.into(), body }
    }
}

impl<F> LoweredFunction for PackedFn<F>
where
    F: for<'a, 'ctx> Fn(&PackedBody<'a, 'ctx>) -> UnitResult<()>,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn lower<'ctx>(&self, unit: &UnitCodegen<'ctx>) -> UnitResult<()> {
        let body = unit.define_packed(&self.name)?;
        (self.body)(&body)
    }
}

/// Textual IR linked into the unit, e.g. a saved `.ll` file.
#[derive(Debug, Clone)]
pub struct IrSource {
    name: String,
    text: String,
}

impl IrSource {
    pub fn new(name: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            text: text.into(),
        }
    }

    /// Read `path`; the entry name comes from its `__unit_main__` marker or,
    /// failing that, its first defined function.
    pub fn from_file(path: &Path) -> UnitResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| UnitError::io(path, e))?;
        let name = Self::detect_entry(&text)?;
        Ok(Self { name, text })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Entry function named by textual IR.
    pub fn detect_entry(text: &str) -> UnitResult<String> {
        let context = Context::create();
        let buffer = MemoryBuffer::create_from_memory_range_copy(text.as_bytes(), "detect");
        let module = context
            .create_module_from_ir(buffer)
            .map_err(|e| UnitError::codegen(format!("cannot parse IR: {}", e)))?;

        let marked = module
            .get_global(MAIN_SYMBOL)
            .and_then(|g| g.get_initializer())
            .filter(|init| init.is_array_value())
            .and_then(|init| {
                init.into_array_value()
                    .get_string_constant()
                    .map(|s| s.to_string_lossy().into_owned())
            });
        if let Some(name) = marked {
            return Ok(name);
        }

        module
            .get_functions()
            .find(|f| f.count_basic_blocks() > 0)
            .map(|f| f.get_name().to_string_lossy().into_owned())
            .ok_or_else(|| UnitError::codegen("IR defines no functions"))
    }
}

impl LoweredFunction for IrSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn lower<'ctx>(&self, unit: &UnitCodegen<'ctx>) -> UnitResult<()> {
        unit.link_ir(&self.name, &self.text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llvm::target::{LlvmTargetResolver, TargetResolver};

    fn lower_one(func: Box<dyn LoweredFunction>, verify: bool) -> UnitResult<String> {
        let context = Context::create();
        let target = LlvmTargetResolver.resolve("llvm").unwrap();
        let options = UnitOptions::default().with_verify(verify);
        let module = CodegenLlvm.build_unit(&context, &[func], &target, &options)?;
        Ok(module.print_to_string().to_string())
    }

    #[test]
    fn test_packed_signature_and_marker() {
        let ir = lower_one(Box::new(PackedFn::new("noop", |body| body.ret_ok())), true).unwrap();
        assert!(ir.contains("define i32 @noop(ptr"));
        assert!(ir.contains("@__unit_main__ = constant [5 x i8] c\"noop\\00\""));
    }

    #[test]
    fn test_unterminated_body_fails_verification() {
        let err = lower_one(Box::new(PackedFn::new("open", |_body| Ok(()))), true).unwrap_err();
        assert!(matches!(err, UnitError::Codegen { .. }));
    }

    #[test]
    fn test_duplicate_definition() {
        let context = Context::create();
        let target = LlvmTargetResolver.resolve("llvm").unwrap();
        let unit = UnitCodegen::new(&context, "dup", &target);
        unit.define_packed("dup").unwrap().ret_ok().unwrap();
        assert!(unit.define_packed("dup").is_err());
    }

    #[test]
    fn test_ir_source_must_define_its_name() {
        let text = "define i32 @other(ptr %0, ptr %1, i32 %2, ptr %3) {\n  ret i32 0\n}\n";
        let err = lower_one(Box::new(IrSource::new("wanted", text)), true).unwrap_err();
        assert!(err.to_string().contains("does not define wanted"));
    }

    #[test]
    fn test_detect_entry() {
        let text = "define i32 @first(ptr %0, ptr %1, i32 %2, ptr %3) {\n  ret i32 0\n}\n";
        assert_eq!(IrSource::detect_entry(text).unwrap(), "first");

        let marked = lower_one(Box::new(PackedFn::new("marked", |body| body.ret_ok())), true)
            .unwrap();
        assert_eq!(IrSource::detect_entry(&marked).unwrap(), "marked");
    }
}
