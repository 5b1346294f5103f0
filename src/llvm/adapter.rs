//! Adapting resolved native addresses to packed callables.

use std::fmt;
use std::sync::Arc;

use super::unit::{lookup_in_unit, CompiledUnit};
use crate::core::abi::{CallContext, PackedArgs, PackedCFunc};
use crate::core::{UnitError, UnitResult};

/// A function of a compiled unit callable through the packed convention.
///
/// Holds the owning unit, so the engine and its machine code stay alive for
/// as long as any clone of the callable exists.
#[derive(Clone)]
pub struct PackedFunc {
    name: Arc<str>,
    addr: PackedCFunc,
    unit: Arc<CompiledUnit>,
}

impl PackedFunc {
    pub(crate) fn new(name: &str, addr: PackedCFunc, unit: Arc<CompiledUnit>) -> Self {
        Self {
            name: Arc::from(name),
            addr,
            unit,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn unit(&self) -> &Arc<CompiledUnit> {
        &self.unit
    }

    /// Invoke the function on the calling thread.
    ///
    /// The callee may write results back into `args`. A non-zero status
    /// becomes [`UnitError::CallFailed`] with the message the callee reported.
    pub fn call(&self, args: &mut PackedArgs) -> UnitResult<()> {
        let host = Arc::as_ptr(&self.unit).cast();
        let mut ctx = CallContext::new(host, lookup_in_unit);
        let (values, type_codes, num_args) = args.raw_parts_mut()?;

        // SAFETY: `addr` was resolved from the engine owned by `self.unit`, which this
        // callable keeps alive, and only functions defined with the packed type resolve.
        let status = unsafe { (self.addr)(values, type_codes, num_args, &mut ctx) };
        if status == 0 {
            return Ok(());
        }

        let message = ctx
            .take_error()
            .unwrap_or_else(|| format!("{} returned status {}", self.name, status));
        log::debug!("Call to {} failed: {}", self.name, message);
        Err(UnitError::CallFailed {
            name: self.name.to_string(),
            code: status,
            message,
        })
    }
}

impl fmt::Debug for PackedFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PackedFunc")
            .field("name", &self.name)
            .field("addr", &(self.addr as usize as *const ()))
            .field("unit", &self.unit.entry_point())
            .finish()
    }
}
