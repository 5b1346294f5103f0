// This module gathers the backend-independent pieces of llvm-unit: the error enum, the
// packed calling convention shared with generated code, the persisted artifact formats,
// build options, per-unit statistics, and the generic runtime module protocol through
// which dispatchers hold and query compiled units.

//! Core infrastructure.
//!
//! # Key Components
//!
//! ## Errors (`error`)
//! - One `UnitError` enum for every failing operation
//!
//! ## Calling Convention (`abi`)
//! - `PackedArgs`, `TypeCode` and the per-call `CallContext`
//!
//! ## Formats (`format`)
//! - Object, bitcode, textual IR and assembly outputs
//!
//! ## Module Protocol (`module`)
//! - `RuntimeModule` trait and the shared `ModuleHandle`

pub mod abi;
pub mod error;
pub mod format;
pub mod module;
pub mod options;
pub mod stats;

pub use abi::{ArgValue, CallContext, PackedArgs, PackedCFunc, TypeCode};
pub use error::{UnitError, UnitResult};
pub use format::OutputFormat;
pub use module::{ModuleHandle, RuntimeModule};
pub use options::UnitOptions;
pub use stats::UnitStats;
