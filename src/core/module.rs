//! Generic runtime module protocol.
//!
//! A runtime module hands out packed functions by name and can persist itself.
//! Dispatchers hold modules through [`ModuleHandle`]; the last handle to go away
//! tears the module down.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use super::error::UnitResult;
use crate::llvm::PackedFunc;

/// Operations every module kind exposes to the dispatcher.
pub trait RuntimeModule: Send + Sync {
    /// Short name of the module kind.
    fn type_key(&self) -> &'static str;

    /// Resolve `name` into a callable, or `None` if the module has no such
    /// function. The callable keeps the module alive.
    fn get_function(&self, name: &str) -> UnitResult<Option<PackedFunc>>;

    /// Make sure `name` is compiled and resolvable; missing symbols are errors.
    fn pre_compile(&self, name: &str) -> UnitResult<()>;

    /// Persist the module to `path`. An empty `format` uses the path's extension.
    fn save_to_file(&self, path: &Path, format: &str) -> UnitResult<()>;

    /// Generic binary serialization used to embed modules in other modules.
    fn save_to_binary(&self, stream: &mut dyn Write) -> UnitResult<()>;

    /// Source text of the module in `format`.
    fn get_source(&self, format: &str) -> UnitResult<String>;
}

/// Shared ownership of a runtime module.
pub type ModuleHandle = Arc<dyn RuntimeModule>;
