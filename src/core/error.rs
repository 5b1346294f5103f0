// This module defines the error type for llvm-unit using the thiserror crate. UnitError
// covers every way an operation on a compiled unit can fail: an empty function list,
// target resolution failures, code generation and verification failures, engine
// construction failures, data layout mismatches between module and engine, unknown
// serialization formats, file I/O failures, missing symbols on pre-compilation, the
// unsupported binary serialization protocol, reads of a module that has already been
// handed to the engine, argument lists too long for the packed convention, and non-zero
// status codes returned by packed calls. The enum is Clone so that one failed engine
// construction can be reported to every waiting caller. UnitResult<T> is
// the convenience alias used throughout the crate.

//! Error types for compiled units.

use thiserror::Error;

/// Main error type for building, serializing and calling a compiled unit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum UnitError {
    #[error("Cannot build a unit from an empty function list")]
    EmptyFunctionList,

    #[error("Invalid target '{spec}': {reason}")]
    Target {
        spec: String,
        reason: String,
    },

    #[error("Code generation failed: {reason}")]
    Codegen {
        reason: String,
    },

    #[error("Failed to initialize JIT engine for {triple}: {reason}")]
    EngineBuild {
        triple: String,
        reason: String,
    },

    #[error("Data layout mismatch between module ({module}) and execution engine ({engine})")]
    DataLayoutMismatch {
        module: String,
        engine: String,
    },

    #[error("Do not know how to save with format '{format}'")]
    UnsupportedFormat {
        format: String,
    },

    #[error("Cannot write {path}: {reason}")]
    Io {
        path: String,
        reason: String,
    },

    #[error("Failed to pre-compile function {name}")]
    SymbolNotFound {
        name: String,
    },

    #[error("{type_key} module: SaveToBinary not supported")]
    BinarySerializationUnsupported {
        type_key: &'static str,
    },

    #[error("Module has been moved into the execution engine")]
    ModuleConsumed,

    #[error("Unit is no longer shared; callables need a shared handle")]
    Detached,

    #[error("Too many arguments for a packed call: {count}")]
    TooManyArguments {
        count: usize,
    },

    #[error("Call to {name} failed with status {code}: {message}")]
    CallFailed {
        name: String,
        code: i32,
        message: String,
    },
}

impl UnitError {
    pub(crate) fn codegen(reason: impl Into<String>) -> Self {
        Self::Codegen { reason: reason.into() }
    }

    pub(crate) fn io(path: &std::path::Path, err: impl std::fmt::Display) -> Self {
        Self::Io {
            path: path.display().to_string(),
            reason: err.to_string(),
        }
    }
}

impl From<inkwell::builder::BuilderError> for UnitError {
    fn from(err: inkwell::builder::BuilderError) -> Self {
        Self::codegen(format!("{:?}", err))
    }
}

/// Result type alias for unit operations.
pub type UnitResult<T> = Result<T, UnitError>;
