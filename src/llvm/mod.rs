//! LLVM-backed compiled units.
//!
//! This module holds everything that touches LLVM: target resolution, lowering
//! functions into a module, creating the JIT engine, the [`CompiledUnit`]
//! lifecycle and the [`PackedFunc`] adapter.
//!
//! # Example
//! ```ignore
//! use llvm_unit::llvm::{CompiledUnit, LoweredFunction, PackedFn};
//! use llvm_unit::core::PackedArgs;
//!
//! let inc: Box<dyn LoweredFunction> = Box::new(PackedFn::new("inc", |body| {
//!     body.expect_args(1)?;
//!     let x = body.arg_i64(0)?;
//!     let one = body.context().i64_type().const_int(1, false);
//!     body.store_i64(0, body.builder().build_int_add(x, one, "inc")?)?;
//!     body.ret_ok()
//! }));
//! let unit = CompiledUnit::init(&[inc], "llvm")?;
//! let mut args = PackedArgs::new();
//! args.push_int(41);
//! unit.get_function("inc")?.unwrap().call(&mut args)?;
//! assert_eq!(args.int(0), Some(42));
//! ```

pub mod adapter;
pub mod builder;
pub mod engine;
pub mod target;
pub mod unit;

pub use adapter::PackedFunc;
pub use builder::{
    packed_fn_type, CodegenLlvm, IrSource, LoweredFunction, PackedBody, PackedFn, UnitBuilder,
    UnitCodegen, MAIN_SYMBOL,
};
pub use target::{initialize_llvm, LlvmTargetResolver, TargetDescriptor, TargetResolver, TargetSpec};
pub use unit::{build, build_with, CompiledUnit, TYPE_KEY};
