// This module defines the packed calling convention shared by generated code and the host.
// Every callable function in a unit has the native signature
// `i32 (values*, type_codes*, num_args, call_ctx*)`. Arguments travel as an array of 8-byte
// ArgValue unions with a parallel array of TypeCode tags; PackedArgs owns both arrays on the
// host side. The fourth parameter points at a CallContext, a per-call record that carries the
// owning unit as an opaque host pointer plus two host services generated code may call:
// set_error to report a failure message for this call, and lookup to resolve another function
// of the same unit. A status of zero means success. There is no process-wide error channel
// and no hidden global slot; everything the callee needs is passed explicitly.

//! Packed calling convention.

use std::ffi::c_void;
use std::fmt;

use super::error::{UnitError, UnitResult};

/// Native signature of every packed function.
pub type PackedCFunc =
    unsafe extern "C" fn(*mut ArgValue, *const i32, i32, *mut CallContext) -> i32;

/// Host service that records the error message of the current call.
pub type SetErrorFn = unsafe extern "C" fn(*mut CallContext, *const u8, u64);

/// Host service that resolves a function of the same unit, or returns null.
pub type LookupFn = unsafe extern "C" fn(*mut CallContext, *const u8, u64) -> *const c_void;

/// Type tag stored next to each argument value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum TypeCode {
    Int = 0,
    UInt = 1,
    Float = 2,
    Handle = 3,
    Null = 4,
}

impl TypeCode {
    pub fn from_raw(code: i32) -> Option<Self> {
        match code {
            0 => Some(Self::Int),
            1 => Some(Self::UInt),
            2 => Some(Self::Float),
            3 => Some(Self::Handle),
            4 => Some(Self::Null),
            _ => None,
        }
    }
}

/// One argument slot. Generated code addresses slots as an `i64` array.
#[derive(Clone, Copy)]
#[repr(C)]
pub union ArgValue {
    pub v_int64: i64,
    pub v_float64: f64,
    pub v_handle: *mut c_void,
}

/// Owned argument list for a packed call.
///
/// Callees may write results back into the slots, so the list is passed
/// mutably and can be inspected after the call.
#[derive(Default, Clone)]
pub struct PackedArgs {
    values: Vec<ArgValue>,
    type_codes: Vec<i32>,
}

impl PackedArgs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_int(&mut self, value: i64) -> &mut Self {
        self.push(ArgValue { v_int64: value }, TypeCode::Int)
    }

    pub fn push_float(&mut self, value: f64) -> &mut Self {
        self.push(ArgValue { v_float64: value }, TypeCode::Float)
    }

    pub fn push_handle(&mut self, handle: *mut c_void) -> &mut Self {
        let code = if handle.is_null() { TypeCode::Null } else { TypeCode::Handle };
        self.push(ArgValue { v_handle: handle }, code)
    }

    fn push(&mut self, value: ArgValue, code: TypeCode) -> &mut Self {
        self.values.push(value);
        self.type_codes.push(code as i32);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn type_code(&self, idx: usize) -> Option<TypeCode> {
        self.type_codes.get(idx).copied().and_then(TypeCode::from_raw)
    }

    /// Integer view of slot `idx`, regardless of its tag.
    pub fn int(&self, idx: usize) -> Option<i64> {
        // Every variant is 8 bytes of plain data, so any bit pattern is a valid i64.
        self.values.get(idx).map(|v| unsafe { v.v_int64 })
    }

    /// Float view of slot `idx`, regardless of its tag.
    pub fn float(&self, idx: usize) -> Option<f64> {
        self.values.get(idx).map(|v| unsafe { v.v_float64 })
    }

    pub(crate) fn raw_parts_mut(&mut self) -> UnitResult<(*mut ArgValue, *const i32, i32)> {
        let num_args = arg_count(self.values.len())?;
        Ok((self.values.as_mut_ptr(), self.type_codes.as_ptr(), num_args))
    }
}

impl fmt::Debug for PackedArgs {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut list = f.debug_list();
        for idx in 0..self.len() {
            match self.type_code(idx) {
                Some(TypeCode::Float) => list.entry(&self.float(idx)),
                _ => list.entry(&self.int(idx)),
            };
        }
        list.finish()
    }
}

/// Argument count as passed to generated code.
pub(crate) fn arg_count(len: usize) -> UnitResult<i32> {
    i32::try_from(len).map_err(|_| UnitError::TooManyArguments { count: len })
}

/// Per-call context handed to generated code as the fourth argument.
///
/// The first three fields are read by generated code, so their order and
/// layout are part of the ABI.
#[repr(C)]
pub struct CallContext {
    pub host: *const c_void,
    pub set_error: SetErrorFn,
    pub lookup: LookupFn,
    error: Option<String>,
}

impl CallContext {
    pub fn new(host: *const c_void, lookup: LookupFn) -> Self {
        Self {
            host,
            set_error: host_set_error,
            lookup,
            error: None,
        }
    }

    /// Message recorded by the callee through `set_error`, if any.
    pub fn take_error(&mut self) -> Option<String> {
        self.error.take()
    }
}

/// Default `set_error` service: copies the message into the context.
///
/// # Safety
/// `ctx` must point to a live `CallContext` and `msg` to `len` readable bytes.
pub unsafe extern "C" fn host_set_error(ctx: *mut CallContext, msg: *const u8, len: u64) {
    if ctx.is_null() || msg.is_null() {
        return;
    }
    let bytes = std::slice::from_raw_parts(msg, len as usize);
    (*ctx).error = Some(String::from_utf8_lossy(bytes).into_owned());
}

/// Reads a `(ptr, len)` name passed from generated code.
///
/// # Safety
/// `name` must point to `len` readable bytes.
pub(crate) unsafe fn name_from_raw<'a>(name: *const u8, len: u64) -> Option<&'a str> {
    if name.is_null() {
        return None;
    }
    std::str::from_utf8(std::slice::from_raw_parts(name, len as usize)).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    unsafe extern "C" fn no_lookup(_: *mut CallContext, _: *const u8, _: u64) -> *const c_void {
        std::ptr::null()
    }

    #[test]
    fn test_push_records_type_codes() {
        let mut args = PackedArgs::new();
        args.push_int(7).push_float(1.5).push_handle(std::ptr::null_mut());

        assert_eq!(args.len(), 3);
        assert_eq!(args.type_code(0), Some(TypeCode::Int));
        assert_eq!(args.type_code(1), Some(TypeCode::Float));
        assert_eq!(args.type_code(2), Some(TypeCode::Null));
        assert_eq!(args.int(0), Some(7));
        assert_eq!(args.float(1), Some(1.5));
        assert_eq!(args.int(3), None);
    }

    #[test]
    fn test_set_error_fills_context() {
        let mut ctx = CallContext::new(std::ptr::null(), no_lookup);
        let msg = "index out of range";
        unsafe { (ctx.set_error)(&mut ctx, msg.as_ptr(), msg.len() as u64) };
        assert_eq!(ctx.take_error().as_deref(), Some("index out of range"));
        assert_eq!(ctx.take_error(), None);
    }

    #[test]
    fn test_context_layout_matches_generated_code() {
        // Generated code reads the context as { ptr, ptr, ptr }.
        let ptr = std::mem::size_of::<*const c_void>();
        assert_eq!(std::mem::offset_of!(CallContext, host), 0);
        assert_eq!(std::mem::offset_of!(CallContext, set_error), ptr);
        assert_eq!(std::mem::offset_of!(CallContext, lookup), 2 * ptr);
        assert_eq!(std::mem::size_of::<ArgValue>(), 8);
    }

    #[test]
    fn test_arg_count_rejects_overflow() {
        assert_eq!(arg_count(3), Ok(3));
        assert_eq!(arg_count(i32::MAX as usize), Ok(i32::MAX));
        let too_many = i32::MAX as usize + 1;
        assert_eq!(arg_count(too_many), Err(UnitError::TooManyArguments { count: too_many }));
    }

    #[test]
    fn test_unknown_type_code() {
        assert_eq!(TypeCode::from_raw(4), Some(TypeCode::Null));
        assert_eq!(TypeCode::from_raw(17), None);
    }
}
