//! llvm-unit - runtime wrapper around one LLVM compilation unit.
//!
//! A unit is built from an ordered list of lowered functions and a target
//! string. Until something asks for a symbol it can be persisted as object
//! code, bitcode, textual IR or assembly. The first symbol request moves the
//! module into an MCJIT engine; from then on functions are handed out as
//! [`PackedFunc`] callables that keep the unit alive.
//!
//! # Primary Usage
//!
//! ```ignore
//! use llvm_unit::{build, LoweredFunction, PackedArgs, PackedFn};
//!
//! let answer: Box<dyn LoweredFunction> = Box::new(PackedFn::new("answer", |body| {
//!     body.store_i64(0, body.context().i64_type().const_int(42, false))?;
//!     body.ret_ok()
//! }));
//! let unit = build(&[answer], "llvm")?;
//! unit.save_to_file("answer.ll".as_ref(), "")?;
//!
//! let mut args = PackedArgs::new();
//! args.push_int(0);
//! unit.get_function("answer")?.unwrap().call(&mut args)?;
//! ```
//!
//! # Architecture
//!
//! - [`core`] - Errors, calling convention, formats, options and the module protocol
//! - [`llvm`] - Target resolution, lowering, the JIT engine and [`CompiledUnit`]

pub mod core;
pub mod llvm;

pub use core::{
    ModuleHandle, OutputFormat, PackedArgs, RuntimeModule, TypeCode, UnitError, UnitOptions,
    UnitResult, UnitStats,
};
pub use llvm::{
    build, build_with, CompiledUnit, IrSource, LoweredFunction, PackedBody, PackedFn, PackedFunc,
    TargetDescriptor, UnitBuilder,
};
